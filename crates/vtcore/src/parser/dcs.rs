//! DCS string sub-parser.
//!
//! Shaped like the OSC collector, but the identifier comes from the
//! CSI-like hook step (prefix/intermediates/final plus params) and the
//! payload streams through `put` to every handler in the chain rather than
//! accumulating centrally. At `unhook` the chain is walked most-recent
//! first; once a handler consumes the sequence the remaining handlers are
//! told to discard with `unhook(false)`.

use rustc_hash::FxHashMap;

use crate::params::Params;

use super::{ActionSink, DcsHandler, DispatchResult, HandlerResult, Registered};

#[derive(Debug, Clone, Copy)]
struct Suspend {
    ident: u32,
    /// Chain slots below this index have not run yet.
    next_pos: usize,
    success: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Active {
    /// No handler claimed the stream; payload is dropped.
    None,
    /// A custom handler chain is receiving the stream.
    Chain(u32),
    /// The fallback sink claimed the stream.
    Sink,
}

/// DCS hook/put/unhook router with per-identifier handler chains.
pub struct DcsParser {
    handlers: FxHashMap<u32, Vec<Registered<Box<dyn DcsHandler>>>>,
    active: Active,
    suspend: Option<Suspend>,
}

impl Default for DcsParser {
    fn default() -> Self {
        Self::new()
    }
}

impl DcsParser {
    /// Create an empty DCS parser.
    #[must_use]
    pub fn new() -> Self {
        Self {
            handlers: FxHashMap::default(),
            active: Active::None,
            suspend: None,
        }
    }

    /// Register a handler for `ident`; later registrations dispatch first.
    pub fn add_handler(&mut self, ident: u32, id: u64, handler: Box<dyn DcsHandler>) {
        self.handlers
            .entry(ident)
            .or_default()
            .push(Registered { id, handler });
    }

    /// Remove a registered handler. Returns false if it was already gone.
    pub fn remove_handler(&mut self, ident: u32, id: u64) -> bool {
        if let Some(chain) = self.handlers.get_mut(&ident) {
            let before = chain.len();
            chain.retain(|r| r.id != id);
            return chain.len() != before;
        }
        false
    }

    /// Begin payload streaming for `ident`.
    pub fn hook<S: ActionSink>(&mut self, ident: u32, params: &Params, sink: &mut S) {
        match self.handlers.get_mut(&ident) {
            Some(chain) if !chain.is_empty() => {
                for reg in chain.iter_mut().rev() {
                    reg.handler.hook(params);
                }
                self.active = Active::Chain(ident);
            }
            _ => {
                if sink.dcs_hook(ident, params) {
                    self.active = Active::Sink;
                } else {
                    tracing::debug!(ident, "unhandled DCS");
                    self.active = Active::None;
                }
            }
        }
    }

    /// Stream payload code points to the active receiver.
    pub fn put<S: ActionSink>(&mut self, data: &[u32], sink: &mut S) {
        match self.active {
            Active::None => {}
            Active::Chain(ident) => {
                if let Some(chain) = self.handlers.get_mut(&ident) {
                    for reg in chain.iter_mut().rev() {
                        reg.handler.put(data);
                    }
                }
            }
            Active::Sink => sink.dcs_put(data),
        }
    }

    /// Terminate the stream.
    ///
    /// `success` is false when the sequence was aborted (CAN/SUB).
    pub fn unhook<S: ActionSink>(&mut self, success: bool, sink: &mut S) -> DispatchResult {
        match self.active {
            Active::None => DispatchResult::Complete,
            Active::Sink => {
                self.active = Active::None;
                sink.dcs_unhook(success);
                DispatchResult::Complete
            }
            Active::Chain(ident) => {
                self.active = Active::None;
                let chain_len = self.handlers.get(&ident).map_or(0, Vec::len);
                self.run_chain(ident, chain_len, success)
            }
        }
    }

    /// Continue a suspended unhook with the settled outcome.
    pub fn resume<S: ActionSink>(&mut self, outcome: bool, _sink: &mut S) -> DispatchResult {
        let Some(suspend) = self.suspend.take() else {
            return DispatchResult::Complete;
        };
        if outcome {
            self.discard_below(suspend.ident, suspend.next_pos);
            return DispatchResult::Complete;
        }
        self.run_chain(suspend.ident, suspend.next_pos, suspend.success)
    }

    /// Abort any in-flight stream (parser reset / dispose).
    pub fn abort<S: ActionSink>(&mut self, sink: &mut S) {
        if self.active != Active::None {
            let _ = self.unhook(false, sink);
        }
        self.suspend = None;
    }

    fn run_chain(&mut self, ident: u32, from: usize, success: bool) -> DispatchResult {
        let mut consumed_at = None;
        if let Some(chain) = self.handlers.get_mut(&ident) {
            let upper = from.min(chain.len());
            for pos in (0..upper).rev() {
                match chain[pos].handler.unhook(success) {
                    HandlerResult::Consumed => {
                        consumed_at = Some(pos);
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
        if let Some(pos) = consumed_at {
            self.discard_below(ident, pos);
        }
        DispatchResult::Complete
    }

    /// Tell handlers that streamed data but lost the dispatch to discard it.
    fn discard_below(&mut self, ident: u32, pos: usize) {
        if let Some(chain) = self.handlers.get_mut(&ident) {
            let upper = pos.min(chain.len());
            for reg in chain[..upper].iter_mut().rev() {
                let _ = reg.handler.unhook(false);
            }
        }
    }
}

impl std::fmt::Debug for DcsParser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DcsParser")
            .field("active", &self.active)
            .finish_non_exhaustive()
    }
}
