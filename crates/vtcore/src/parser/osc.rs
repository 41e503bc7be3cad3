//! OSC string sub-parser.
//!
//! Collects `OSC Ps ; Pt` sequences: ASCII digits before the first `;`
//! select the handler chain, everything after it streams into the payload.
//! Payload accumulation is capped; hitting the cap discards the payload and
//! the handlers still run with an empty string so they can reset their own
//! state (overflow is not an abort).

use rustc_hash::FxHashMap;

use super::{ActionSink, DispatchResult, HandlerResult, OscHandler, Registered};

/// Maximum accumulated OSC payload (in characters).
pub const PAYLOAD_LIMIT: usize = 10_000_000;

/// Payload buffers above this capacity are released after dispatch instead
/// of being recycled.
const RETAIN_CAPACITY: usize = 1 << 20;

#[derive(Debug, Clone, Copy)]
struct Suspend {
    ident: u16,
    /// Chain slots below this index have not run yet.
    next_pos: usize,
    success: bool,
}

/// OSC collector with per-identifier handler chains.
pub struct OscParser {
    handlers: FxHashMap<u16, Vec<Registered<Box<dyn OscHandler>>>>,
    ident: u32,
    has_ident: bool,
    ident_valid: bool,
    in_payload: bool,
    active: bool,
    payload: String,
    payload_len: usize,
    hit_limit: bool,
    suspend: Option<Suspend>,
}

impl Default for OscParser {
    fn default() -> Self {
        Self::new()
    }
}

impl OscParser {
    /// Create an empty OSC parser.
    #[must_use]
    pub fn new() -> Self {
        Self {
            handlers: FxHashMap::default(),
            ident: 0,
            has_ident: false,
            ident_valid: true,
            in_payload: false,
            active: false,
            payload: String::new(),
            payload_len: 0,
            hit_limit: false,
            suspend: None,
        }
    }

    /// Register a handler for `ident`; later registrations dispatch first.
    pub fn add_handler(&mut self, ident: u16, id: u64, handler: Box<dyn OscHandler>) {
        self.handlers
            .entry(ident)
            .or_default()
            .push(Registered { id, handler });
    }

    /// Remove a registered handler. Returns false if it was already gone.
    pub fn remove_handler(&mut self, ident: u16, id: u64) -> bool {
        if let Some(chain) = self.handlers.get_mut(&ident) {
            let before = chain.len();
            chain.retain(|r| r.id != id);
            return chain.len() != before;
        }
        false
    }

    /// Begin a new OSC sequence.
    pub fn start(&mut self) {
        self.ident = 0;
        self.has_ident = false;
        self.ident_valid = true;
        self.in_payload = false;
        self.active = true;
        self.payload.clear();
        self.payload_len = 0;
        self.hit_limit = false;
    }

    /// Stream payload code points.
    pub fn put(&mut self, data: &[u32]) {
        if !self.active {
            return;
        }
        for &cp in data {
            if !self.in_payload {
                match cp {
                    0x30..=0x39 => {
                        self.ident = self
                            .ident
                            .saturating_mul(10)
                            .saturating_add(cp - 0x30)
                            .min(u32::from(u16::MAX));
                        self.has_ident = true;
                    }
                    0x3B => {
                        self.in_payload = true;
                    }
                    _ => {
                        // Non-numeric identifier: swallow the sequence at end.
                        self.ident_valid = false;
                        self.has_ident = true;
                    }
                }
                continue;
            }
            if self.hit_limit {
                continue;
            }
            if self.payload_len >= PAYLOAD_LIMIT {
                tracing::warn!(ident = self.ident, "OSC payload cap hit, discarding");
                self.hit_limit = true;
                self.payload.clear();
                continue;
            }
            self.payload
                .push(char::from_u32(cp).unwrap_or(char::REPLACEMENT_CHARACTER));
            self.payload_len += 1;
        }
    }

    /// Terminate the sequence and dispatch the handler chain.
    ///
    /// `success` is false when the sequence was aborted (CAN/SUB). May
    /// return [`DispatchResult::Pending`] if a handler suspended; the parser
    /// then drives [`OscParser::resume`].
    pub fn end<S: ActionSink>(&mut self, success: bool, sink: &mut S) -> DispatchResult {
        if !self.active {
            return DispatchResult::Complete;
        }
        self.active = false;
        if !self.has_ident && self.payload.is_empty() {
            // `ESC ] ST` with no content at all.
            self.finish();
            return DispatchResult::Complete;
        }
        if !self.ident_valid {
            tracing::debug!("OSC with non-numeric identifier ignored");
            self.finish();
            return DispatchResult::Complete;
        }
        let ident = self.ident as u16;
        let chain_len = self.handlers.get(&ident).map_or(0, Vec::len);
        self.run_chain(ident, chain_len, success, sink)
    }

    /// Continue a suspended dispatch with the settled outcome.
    pub fn resume<S: ActionSink>(&mut self, outcome: bool, sink: &mut S) -> DispatchResult {
        let Some(suspend) = self.suspend.take() else {
            return DispatchResult::Complete;
        };
        if outcome {
            self.finish();
            return DispatchResult::Complete;
        }
        self.run_chain(suspend.ident, suspend.next_pos, suspend.success, sink)
    }

    /// Abort any in-flight collection (parser reset / dispose).
    pub fn abort<S: ActionSink>(&mut self, sink: &mut S) {
        if self.active {
            // Handlers see the abort so they can reset their own state.
            let _ = self.end(false, sink);
        }
        self.suspend = None;
    }

    fn run_chain<S: ActionSink>(
        &mut self,
        ident: u16,
        from: usize,
        success: bool,
        sink: &mut S,
    ) -> DispatchResult {
        let payload: &str = if self.hit_limit { "" } else { &self.payload };
        let mut consumed = false;
        if let Some(chain) = self.handlers.get_mut(&ident) {
            let upper = from.min(chain.len());
            for pos in (0..upper).rev() {
                match chain[pos].handler.osc(payload, success) {
                    HandlerResult::Consumed => {
                        consumed = true;
                        break;
                    }
                    HandlerResult::FallThrough => {}
                    HandlerResult::Pending => {
                        self.suspend = Some(Suspend {
                            ident,
                            next_pos: pos,
                            success,
                        });
                        return DispatchResult::Pending;
                    }
                }
            }
        }
        if !consumed && !sink.osc_dispatch(ident, payload, success) {
            tracing::debug!(ident, "unhandled OSC");
        }
        self.finish();
        DispatchResult::Complete
    }

    fn finish(&mut self) {
        if self.payload.capacity() > RETAIN_CAPACITY {
            self.payload = String::new();
        } else {
            self.payload.clear();
        }
        self.payload_len = 0;
        self.hit_limit = false;
    }
}

impl std::fmt::Debug for OscParser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OscParser")
            .field("ident", &self.ident)
            .field("active", &self.active)
            .field("payload_len", &self.payload_len)
            .field("hit_limit", &self.hit_limit)
            .finish_non_exhaustive()
    }
}
