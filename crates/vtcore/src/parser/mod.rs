//! VT/ANSI escape sequence parser.
//!
//! ## Design
//!
//! Table-driven state machine based on the
//! [vt100.net DEC ANSI parser](https://vt100.net/emu/dec_ansi_parser),
//! operating on decoded code points. Printable runs are batched to the
//! print handler; CSI/ESC sequences dispatch through per-identifier handler
//! chains (most recently registered first, first consumer wins) with the
//! [`ActionSink`] as the built-in fallback; OSC and DCS payloads route
//! through the string sub-parsers in [`osc`] and [`dcs`].
//!
//! ## Suspension
//!
//! A CSI/OSC/DCS handler may return [`HandlerResult::Pending`] to park the
//! parse mid-chunk (e.g. while an image decodes). The parser snapshots the
//! chunk offset and the chain position; [`Parser::resume`] replays only the
//! not-yet-executed handlers with the settled outcome and then continues
//! the chunk. At most one suspension may be outstanding; calling
//! [`Parser::parse`] while suspended is a reentrancy bug and panics.

mod dcs;
mod osc;
mod states;

pub use dcs::DcsParser;
pub use osc::{OscParser, PAYLOAD_LIMIT};
pub use states::{class_of, Action, State, Transition, TABLE_WIDTH, TRANSITIONS};

use arrayvec::ArrayVec;
use rustc_hash::FxHashMap;

use crate::params::Params;

/// Maximum collected prefix/intermediate bytes per sequence.
pub const MAX_INTERMEDIATES: usize = 4;

/// Result of a single handler invocation in a dispatch chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerResult {
    /// The handler consumed the sequence; earlier registrations are skipped.
    Consumed,
    /// The handler declined; the chain continues.
    FallThrough,
    /// The handler started an asynchronous operation; the parse suspends.
    Pending,
}

/// Result of [`Parser::parse`] / [`Parser::resume`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub enum DispatchResult {
    /// The chunk was fully consumed.
    Complete,
    /// A handler suspended; drive [`Parser::resume`] with the same chunk.
    Pending,
}

/// A CSI handler registered for one function identifier.
pub trait CsiHandler {
    /// Handle a dispatched CSI sequence.
    fn csi(&mut self, params: &Params) -> HandlerResult;
}

impl<F: FnMut(&Params) -> HandlerResult> CsiHandler for F {
    fn csi(&mut self, params: &Params) -> HandlerResult {
        self(params)
    }
}

/// An ESC handler registered for one function identifier.
pub trait EscHandler {
    /// Handle a dispatched ESC sequence; true consumes it.
    fn esc(&mut self) -> bool;
}

impl<F: FnMut() -> bool> EscHandler for F {
    fn esc(&mut self) -> bool {
        self()
    }
}

/// An OSC handler registered for one numeric identifier.
pub trait OscHandler {
    /// Handle the accumulated payload. `success` is false on abort.
    fn osc(&mut self, data: &str, success: bool) -> HandlerResult;
}

impl<F: FnMut(&str, bool) -> HandlerResult> OscHandler for F {
    fn osc(&mut self, data: &str, success: bool) -> HandlerResult {
        self(data, success)
    }
}

/// A DCS handler registered for one function identifier.
///
/// `hook` and `put` stream to every handler in the chain; `unhook` settles
/// which one consumes the sequence.
pub trait DcsHandler {
    /// Payload streaming is about to begin.
    fn hook(&mut self, params: &Params);
    /// A run of payload code points.
    fn put(&mut self, data: &[u32]);
    /// Payload finished (`success` false on abort or when another handler
    /// consumed the sequence).
    fn unhook(&mut self, success: bool) -> HandlerResult;
}

/// Built-in dispatch target: receives everything no custom handler consumed.
///
/// All methods default to no-ops; dispatch methods return whether the
/// sequence was recognized so the parser can log fallthroughs.
pub trait ActionSink {
    /// A run of printable code points.
    fn print(&mut self, _data: &[u32]) {}
    /// A C0/C1 control code.
    fn execute(&mut self, _code: u8) {}
    /// A CSI sequence nobody consumed.
    fn csi_dispatch(&mut self, _ident: u32, _params: &Params) -> bool {
        false
    }
    /// An ESC sequence nobody consumed.
    fn esc_dispatch(&mut self, _ident: u32) -> bool {
        false
    }
    /// An OSC payload nobody consumed. `success` is false on abort.
    fn osc_dispatch(&mut self, _ident: u16, _payload: &str, _success: bool) -> bool {
        false
    }
    /// Claim an unclaimed DCS stream; true routes `put`/`unhook` here.
    fn dcs_hook(&mut self, _ident: u32, _params: &Params) -> bool {
        false
    }
    /// DCS payload run (only after a claimed hook).
    fn dcs_put(&mut self, _data: &[u32]) {}
    /// DCS stream end (only after a claimed hook).
    fn dcs_unhook(&mut self, _success: bool) {}
}

/// A handler registration slot (chain entry).
pub(crate) struct Registered<T> {
    pub id: u64,
    pub handler: T,
}

/// Opaque registration token; pass back to the matching `unregister_*`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

/// Identifies a CSI/ESC/DCS function: optional prefix (`<`, `=`, `>`, `?`),
/// up to two intermediates (0x20-0x2F), and the final byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct FunctionIdentifier {
    prefix: Option<u8>,
    intermediates: [u8; 2],
    n_intermediates: u8,
    final_byte: u8,
}

impl FunctionIdentifier {
    /// Identifier with just a final byte (e.g. `m` for SGR).
    #[must_use]
    pub fn new(final_byte: u8) -> Self {
        Self {
            final_byte,
            ..Self::default()
        }
    }

    /// Add a prefix byte (`<`, `=`, `>`, `?`).
    #[must_use]
    pub fn with_prefix(mut self, prefix: u8) -> Self {
        self.prefix = Some(prefix);
        self
    }

    /// Add up to two intermediate bytes; extras are dropped.
    #[must_use]
    pub fn with_intermediates(mut self, intermediates: &[u8]) -> Self {
        let n = intermediates.len().min(2);
        self.intermediates[..n].copy_from_slice(&intermediates[..n]);
        self.n_intermediates = n as u8;
        self
    }

    /// Packed identifier: `prefix << 16 | intermediate << 8 | final`
    /// (the prefix shifts to bits 24+ when two intermediates are present).
    #[must_use]
    pub fn ident(&self) -> u32 {
        encode_ident(
            self.prefix,
            &self.intermediates[..usize::from(self.n_intermediates)],
            self.final_byte,
        )
    }
}

/// Packed function identifier encoding shared by registration and dispatch.
fn encode_ident(prefix: Option<u8>, intermediates: &[u8], final_byte: u8) -> u32 {
    let mut res = u32::from(final_byte);
    let mut shift = 8;
    for &b in intermediates.iter().rev() {
        res |= u32::from(b) << shift;
        shift += 8;
    }
    if let Some(p) = prefix {
        res |= u32::from(p) << shift.max(16);
    }
    res
}

#[derive(Debug, Clone, Copy)]
enum PendingKind {
    Csi { ident: u32, next_pos: usize },
    Osc,
    Dcs,
}

#[derive(Debug, Clone, Copy)]
struct PendingState {
    /// Chunk offset to continue from after the dispatch settles.
    resume_at: usize,
    kind: PendingKind,
}

enum ChainOutcome {
    Done,
    Pending { next_pos: usize },
}

/// The escape sequence parser.
pub struct Parser {
    state: State,
    params: Params,
    collect: ArrayVec<u8, MAX_INTERMEDIATES>,
    osc: OscParser,
    dcs: DcsParser,
    csi_handlers: FxHashMap<u32, Vec<Registered<Box<dyn CsiHandler>>>>,
    esc_handlers: FxHashMap<u32, Vec<Registered<Box<dyn EscHandler>>>>,
    execute_handlers: FxHashMap<u8, Box<dyn FnMut() -> bool>>,
    pending: Option<PendingState>,
    next_id: u64,
}

impl Default for Parser {
    fn default() -> Self {
        Self::new()
    }
}

impl Parser {
    /// Create a parser in the ground state.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: State::Ground,
            params: Params::new(),
            collect: ArrayVec::new_const(),
            osc: OscParser::new(),
            dcs: DcsParser::new(),
            csi_handlers: FxHashMap::default(),
            esc_handlers: FxHashMap::default(),
            execute_handlers: FxHashMap::default(),
            pending: None,
            next_id: 1,
        }
    }

    /// Current parser state.
    #[inline]
    #[must_use]
    pub fn state(&self) -> State {
        self.state
    }

    /// Whether a handler suspension is outstanding.
    #[must_use]
    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Chunk offset a suspended parse will continue from.
    #[must_use]
    pub fn pending_offset(&self) -> Option<usize> {
        self.pending.map(|p| p.resume_at)
    }

    /// Return to the ground state, aborting any in-flight OSC/DCS sequence
    /// (`end(false)` / `unhook(false)`).
    pub fn reset<S: ActionSink>(&mut self, sink: &mut S) {
        self.osc.abort(sink);
        self.dcs.abort(sink);
        self.state = State::Ground;
        self.params.clear();
        self.collect.clear();
        self.pending = None;
    }

    // -------------------------------------------------------------------
    // Handler registration
    // -------------------------------------------------------------------

    fn allocate_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Register a CSI handler; later registrations dispatch first.
    pub fn register_csi_handler(
        &mut self,
        ident: FunctionIdentifier,
        handler: Box<dyn CsiHandler>,
    ) -> HandlerId {
        let id = self.allocate_id();
        self.csi_handlers
            .entry(ident.ident())
            .or_default()
            .push(Registered { id, handler });
        HandlerId(id)
    }

    /// Remove a CSI handler registration.
    pub fn unregister_csi_handler(&mut self, ident: FunctionIdentifier, handle: HandlerId) -> bool {
        if let Some(chain) = self.csi_handlers.get_mut(&ident.ident()) {
            let before = chain.len();
            chain.retain(|r| r.id != handle.0);
            return chain.len() != before;
        }
        false
    }

    /// Register an ESC handler; later registrations dispatch first.
    pub fn register_esc_handler(
        &mut self,
        ident: FunctionIdentifier,
        handler: Box<dyn EscHandler>,
    ) -> HandlerId {
        let id = self.allocate_id();
        self.esc_handlers
            .entry(ident.ident())
            .or_default()
            .push(Registered { id, handler });
        HandlerId(id)
    }

    /// Remove an ESC handler registration.
    pub fn unregister_esc_handler(&mut self, ident: FunctionIdentifier, handle: HandlerId) -> bool {
        if let Some(chain) = self.esc_handlers.get_mut(&ident.ident()) {
            let before = chain.len();
            chain.retain(|r| r.id != handle.0);
            return chain.len() != before;
        }
        false
    }

    /// Register an OSC handler for a numeric identifier.
    pub fn register_osc_handler(&mut self, ident: u16, handler: Box<dyn OscHandler>) -> HandlerId {
        let id = self.allocate_id();
        self.osc.add_handler(ident, id, handler);
        HandlerId(id)
    }

    /// Remove an OSC handler registration.
    pub fn unregister_osc_handler(&mut self, ident: u16, handle: HandlerId) -> bool {
        self.osc.remove_handler(ident, handle.0)
    }

    /// Register a DCS handler; later registrations dispatch first.
    pub fn register_dcs_handler(
        &mut self,
        ident: FunctionIdentifier,
        handler: Box<dyn DcsHandler>,
    ) -> HandlerId {
        let id = self.allocate_id();
        self.dcs.add_handler(ident.ident(), id, handler);
        HandlerId(id)
    }

    /// Remove a DCS handler registration.
    pub fn unregister_dcs_handler(&mut self, ident: FunctionIdentifier, handle: HandlerId) -> bool {
        self.dcs.remove_handler(ident.ident(), handle.0)
    }

    /// Install the custom execute handler for a control code (replaces any
    /// previous one); return false from the handler to fall through.
    pub fn set_execute_handler(&mut self, code: u8, handler: Box<dyn FnMut() -> bool>) {
        self.execute_handlers.insert(code, handler);
    }

    /// Remove the custom execute handler for a control code.
    pub fn clear_execute_handler(&mut self, code: u8) {
        self.execute_handlers.remove(&code);
    }

    // -------------------------------------------------------------------
    // Parsing
    // -------------------------------------------------------------------

    /// Parse a chunk of decoded code points.
    ///
    /// # Panics
    ///
    /// Panics if a handler suspension is outstanding — that is a reentrancy
    /// bug in the driver; settle it through [`Parser::resume`] first.
    pub fn parse<S: ActionSink>(&mut self, data: &[u32], sink: &mut S) -> DispatchResult {
        assert!(
            self.pending.is_none(),
            "reentrant parse() while a handler is pending; drive resume() instead"
        );
        self.run(data, 0, sink)
    }

    /// Settle an outstanding suspension with `outcome` (true = the sequence
    /// was consumed) and continue parsing `data` — the same chunk that was
    /// passed to the suspended [`Parser::parse`] call.
    pub fn resume<S: ActionSink>(
        &mut self,
        outcome: bool,
        data: &[u32],
        sink: &mut S,
    ) -> DispatchResult {
        let Some(pending) = self.pending.take() else {
            return DispatchResult::Complete;
        };
        match pending.kind {
            PendingKind::Csi { ident, next_pos } => {
                if !outcome {
                    match self.run_csi_chain(ident, next_pos, sink) {
                        ChainOutcome::Pending { next_pos } => {
                            self.pending = Some(PendingState {
                                resume_at: pending.resume_at,
                                kind: PendingKind::Csi { ident, next_pos },
                            });
                            return DispatchResult::Pending;
                        }
                        ChainOutcome::Done => {}
                    }
                }
            }
            PendingKind::Osc => {
                if let DispatchResult::Pending = self.osc.resume(outcome, sink) {
                    self.pending = Some(pending);
                    return DispatchResult::Pending;
                }
            }
            PendingKind::Dcs => {
                if let DispatchResult::Pending = self.dcs.resume(outcome, sink) {
                    self.pending = Some(pending);
                    return DispatchResult::Pending;
                }
            }
        }
        self.run(data, pending.resume_at, sink)
    }

    fn run<S: ActionSink>(&mut self, data: &[u32], start: usize, sink: &mut S) -> DispatchResult {
        let mut i = start;
        while i < data.len() {
            let cp = data[i];

            // Batched runs for the three streaming states.
            match self.state {
                State::Ground if is_printable(cp) => {
                    let begin = i;
                    while i < data.len() && is_printable(data[i]) {
                        i += 1;
                    }
                    sink.print(&data[begin..i]);
                    continue;
                }
                State::DcsPassthrough if is_dcs_put(cp) => {
                    let begin = i;
                    while i < data.len() && is_dcs_put(data[i]) {
                        i += 1;
                    }
                    self.dcs.put(&data[begin..i], sink);
                    continue;
                }
                State::OscString if is_osc_put(cp) => {
                    let begin = i;
                    while i < data.len() && is_osc_put(data[i]) {
                        i += 1;
                    }
                    self.osc.put(&data[begin..i]);
                    continue;
                }
                _ => {}
            }

            let transition = TRANSITIONS[self.state as usize][class_of(cp)];

            // Leaving a string state without its end action terminates the
            // collector; CAN/SUB signal an abort, everything else (ESC, ST,
            // C1 re-entry) a regular end.
            let success = cp != 0x18 && cp != 0x1A;
            if self.state == State::OscString
                && transition.next != State::OscString
                && transition.action != Action::OscEnd
            {
                if let DispatchResult::Pending = self.osc.end(success, sink) {
                    // Re-process the terminator from ground on resume.
                    self.state = State::Ground;
                    self.pending = Some(PendingState {
                        resume_at: i,
                        kind: PendingKind::Osc,
                    });
                    return DispatchResult::Pending;
                }
            }
            if self.state == State::DcsPassthrough && transition.next != State::DcsPassthrough {
                if let DispatchResult::Pending = self.dcs.unhook(success, sink) {
                    self.state = State::Ground;
                    self.pending = Some(PendingState {
                        resume_at: i,
                        kind: PendingKind::Dcs,
                    });
                    return DispatchResult::Pending;
                }
            }

            match transition.action {
                Action::Ignore => {}
                Action::Print => sink.print(&data[i..i + 1]),
                Action::Execute => self.do_execute(cp as u8, sink),
                Action::Clear => {
                    self.params.clear();
                    self.collect.clear();
                }
                Action::Collect => {
                    let _ = self.collect.try_push(cp as u8);
                }
                Action::Param => self.params.put(cp as u8),
                Action::EscDispatch => {
                    let ident = self.current_ident(cp as u8);
                    self.dispatch_esc(ident, sink);
                }
                Action::CsiDispatch => {
                    self.params.finalize();
                    let ident = self.current_ident(cp as u8);
                    match self.run_csi_chain(ident, usize::MAX, sink) {
                        ChainOutcome::Pending { next_pos } => {
                            self.state = transition.next;
                            self.pending = Some(PendingState {
                                resume_at: i + 1,
                                kind: PendingKind::Csi { ident, next_pos },
                            });
                            return DispatchResult::Pending;
                        }
                        ChainOutcome::Done => {}
                    }
                }
                Action::DcsHook => {
                    self.params.finalize();
                    let ident = self.current_ident(cp as u8);
                    self.dcs.hook(ident, &self.params, sink);
                }
                Action::DcsPut => self.dcs.put(&data[i..i + 1], sink),
                Action::DcsUnhook => {
                    // Exits from passthrough run through the leave hook above.
                }
                Action::OscStart => self.osc.start(),
                Action::OscPut => self.osc.put(&data[i..i + 1]),
                Action::OscEnd => {
                    if let DispatchResult::Pending = self.osc.end(true, sink) {
                        self.state = transition.next;
                        self.pending = Some(PendingState {
                            resume_at: i + 1,
                            kind: PendingKind::Osc,
                        });
                        return DispatchResult::Pending;
                    }
                }
            }

            self.state = transition.next;
            i += 1;
        }
        DispatchResult::Complete
    }

    fn do_execute<S: ActionSink>(&mut self, code: u8, sink: &mut S) {
        if let Some(handler) = self.execute_handlers.get_mut(&code) {
            if handler() {
                return;
            }
        }
        sink.execute(code);
    }

    fn dispatch_esc<S: ActionSink>(&mut self, ident: u32, sink: &mut S) {
        let mut consumed = false;
        if let Some(chain) = self.esc_handlers.get_mut(&ident) {
            for reg in chain.iter_mut().rev() {
                if reg.handler.esc() {
                    consumed = true;
                    break;
                }
            }
        }
        if !consumed && !sink.esc_dispatch(ident) {
            tracing::debug!(ident, "unhandled ESC");
        }
    }

    fn run_csi_chain<S: ActionSink>(
        &mut self,
        ident: u32,
        from: usize,
        sink: &mut S,
    ) -> ChainOutcome {
        let mut consumed = false;
        if let Some(chain) = self.csi_handlers.get_mut(&ident) {
            let upper = from.min(chain.len());
            for pos in (0..upper).rev() {
                match chain[pos].handler.csi(&self.params) {
                    HandlerResult::Consumed => {
                        consumed = true;
                        break;
                    }
                    HandlerResult::FallThrough => {}
                    HandlerResult::Pending => return ChainOutcome::Pending { next_pos: pos },
                }
            }
        }
        if !consumed && !sink.csi_dispatch(ident, &self.params) {
            tracing::debug!(ident, "unhandled CSI");
        }
        ChainOutcome::Done
    }

    /// Identifier for the sequence currently being collected.
    fn current_ident(&self, final_byte: u8) -> u32 {
        let (prefix, intermediates) = match self.collect.first() {
            Some(&b) if (0x3C..=0x3F).contains(&b) => (Some(b), &self.collect[1..]),
            _ => (None, &self.collect[..]),
        };
        let n = intermediates.len().min(2);
        encode_ident(prefix, &intermediates[..n], final_byte)
    }
}

impl std::fmt::Debug for Parser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Parser")
            .field("state", &self.state)
            .field("pending", &self.pending)
            .finish_non_exhaustive()
    }
}

/// Printable in ground state: ASCII 0x20-0x7E plus everything >= 0xA0.
#[inline]
fn is_printable(cp: u32) -> bool {
    matches!(cp, 0x20..=0x7E) || cp >= 0xA0
}

/// Accumulates into a DCS payload without leaving passthrough.
#[inline]
fn is_dcs_put(cp: u32) -> bool {
    matches!(cp, 0x00..=0x17 | 0x19 | 0x1C..=0x7E) || cp >= 0xA0
}

/// Accumulates into an OSC payload without leaving the string state.
#[inline]
fn is_osc_put(cp: u32) -> bool {
    matches!(cp, 0x20..=0x7F) || cp >= 0xA0
}

/// Decode a UTF-8 byte string into code points (test/helper convenience).
#[must_use]
pub fn codepoints(input: &str) -> Vec<u32> {
    input.chars().map(u32::from).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Test sink that records all fallback dispatches.
    #[derive(Default)]
    struct RecordingSink {
        prints: Vec<u32>,
        executes: Vec<u8>,
        csi: Vec<(u32, Vec<u16>)>,
        esc: Vec<u32>,
        osc: Vec<(u16, String, bool)>,
        dcs_hooks: Vec<(u32, Vec<u16>)>,
        dcs_data: Vec<u32>,
        dcs_unhooks: Vec<bool>,
        claim_dcs: bool,
    }

    impl ActionSink for RecordingSink {
        fn print(&mut self, data: &[u32]) {
            self.prints.extend_from_slice(data);
        }
        fn execute(&mut self, code: u8) {
            self.executes.push(code);
        }
        fn csi_dispatch(&mut self, ident: u32, params: &Params) -> bool {
            self.csi.push((ident, params.as_slice().to_vec()));
            true
        }
        fn esc_dispatch(&mut self, ident: u32) -> bool {
            self.esc.push(ident);
            true
        }
        fn osc_dispatch(&mut self, ident: u16, payload: &str, success: bool) -> bool {
            self.osc.push((ident, payload.to_string(), success));
            true
        }
        fn dcs_hook(&mut self, ident: u32, params: &Params) -> bool {
            self.dcs_hooks.push((ident, params.as_slice().to_vec()));
            self.claim_dcs
        }
        fn dcs_put(&mut self, data: &[u32]) {
            self.dcs_data.extend_from_slice(data);
        }
        fn dcs_unhook(&mut self, success: bool) {
            self.dcs_unhooks.push(success);
        }
    }

    fn feed(parser: &mut Parser, sink: &mut RecordingSink, input: &[u8]) {
        let cps: Vec<u32> = input.iter().map(|&b| u32::from(b)).collect();
        let _ = parser.parse(&cps, sink);
    }

    fn printed(sink: &RecordingSink) -> String {
        sink.prints
            .iter()
            .filter_map(|&cp| char::from_u32(cp))
            .collect()
    }

    #[test]
    fn plain_text_prints_in_one_run() {
        let mut parser = Parser::new();
        let mut sink = RecordingSink::default();
        feed(&mut parser, &mut sink, b"Hello");
        assert_eq!(printed(&sink), "Hello");
    }

    #[test]
    fn controls_execute() {
        let mut parser = Parser::new();
        let mut sink = RecordingSink::default();
        feed(&mut parser, &mut sink, b"\n\r\t");
        assert_eq!(sink.executes, vec![b'\n', b'\r', b'\t']);
    }

    #[test]
    fn csi_with_params() {
        let mut parser = Parser::new();
        let mut sink = RecordingSink::default();
        feed(&mut parser, &mut sink, b"\x1b[1;31m");
        assert_eq!(sink.csi.len(), 1);
        assert_eq!(sink.csi[0].0, u32::from(b'm'));
        assert_eq!(sink.csi[0].1, vec![1, 31]);
    }

    #[test]
    fn csi_private_prefix_in_ident() {
        let mut parser = Parser::new();
        let mut sink = RecordingSink::default();
        feed(&mut parser, &mut sink, b"\x1b[?1049h");
        let want = FunctionIdentifier::new(b'h').with_prefix(b'?').ident();
        assert_eq!(sink.csi[0].0, want);
        assert_eq!(sink.csi[0].1, vec![1049]);
    }

    #[test]
    fn csi_intermediate_in_ident() {
        let mut parser = Parser::new();
        let mut sink = RecordingSink::default();
        // DECSTR: CSI ! p
        feed(&mut parser, &mut sink, b"\x1b[!p");
        let want = FunctionIdentifier::new(b'p')
            .with_intermediates(b"!")
            .ident();
        assert_eq!(sink.csi[0].0, want);
    }

    #[test]
    fn esc_with_intermediate() {
        let mut parser = Parser::new();
        let mut sink = RecordingSink::default();
        feed(&mut parser, &mut sink, b"\x1b(B");
        let want = FunctionIdentifier::new(b'B')
            .with_intermediates(b"(")
            .ident();
        assert_eq!(sink.esc, vec![want]);
    }

    #[test]
    fn osc_terminated_by_bel_st_and_esc_backslash() {
        for terminator in [&b"\x07"[..], &b"\x9c"[..], &b"\x1b\\"[..]] {
            let mut parser = Parser::new();
            let mut sink = RecordingSink::default();
            let mut input = b"\x1b]0;Title".to_vec();
            input.extend_from_slice(terminator);
            feed(&mut parser, &mut sink, &input);
            assert_eq!(sink.osc.len(), 1, "terminator {terminator:?}");
            assert_eq!(sink.osc[0], (0, "Title".to_string(), true));
        }
    }

    #[test]
    fn osc_abort_by_can_flags_failure() {
        let mut parser = Parser::new();
        let mut sink = RecordingSink::default();
        feed(&mut parser, &mut sink, b"\x1b]0;Ti\x18tle");
        assert_eq!(sink.osc.len(), 1);
        assert!(!sink.osc[0].2);
        assert_eq!(printed(&sink), "tle");
    }

    #[test]
    fn dcs_routes_hook_put_unhook() {
        let mut parser = Parser::new();
        let mut sink = RecordingSink {
            claim_dcs: true,
            ..RecordingSink::default()
        };
        feed(&mut parser, &mut sink, b"\x1bP1$qm\x1b\\");
        assert_eq!(sink.dcs_hooks.len(), 1);
        assert_eq!(sink.dcs_hooks[0].1, vec![1]);
        assert_eq!(sink.dcs_data, vec![u32::from(b'm')]);
        assert_eq!(sink.dcs_unhooks, vec![true]);
    }

    #[test]
    fn unclaimed_dcs_payload_is_dropped() {
        let mut parser = Parser::new();
        let mut sink = RecordingSink::default();
        feed(&mut parser, &mut sink, b"\x1bPqABC\x1b\\");
        assert_eq!(sink.dcs_hooks.len(), 1);
        assert!(sink.dcs_data.is_empty());
        assert!(sink.dcs_unhooks.is_empty());
    }

    #[test]
    fn can_aborts_csi() {
        let mut parser = Parser::new();
        let mut sink = RecordingSink::default();
        feed(&mut parser, &mut sink, b"\x1b[31\x18Hello");
        assert!(sink.csi.is_empty());
        assert!(sink.executes.contains(&0x18));
        assert_eq!(printed(&sink), "Hello");
    }

    #[test]
    fn esc_restarts_sequence() {
        let mut parser = Parser::new();
        let mut sink = RecordingSink::default();
        feed(&mut parser, &mut sink, b"\x1b[31\x1b[32m");
        assert_eq!(sink.csi.len(), 1);
        assert_eq!(sink.csi[0].1, vec![32]);
    }

    #[test]
    fn c1_csi_and_osc() {
        let mut parser = Parser::new();
        let mut sink = RecordingSink::default();
        feed(&mut parser, &mut sink, b"\x9b31m\x9d0;T\x07");
        assert_eq!(sink.csi.len(), 1);
        assert_eq!(sink.csi[0].1, vec![31]);
        assert_eq!(sink.osc.len(), 1);
    }

    #[test]
    fn split_sequence_across_chunks_matches_single_feed() {
        let input = b"ab\x1b[38;5;196mXY\x1b]8;;http://e.com\x07Z";
        for split in 0..input.len() {
            let mut parser = Parser::new();
            let mut sink = RecordingSink::default();
            feed(&mut parser, &mut sink, &input[..split]);
            feed(&mut parser, &mut sink, &input[split..]);

            let mut whole_parser = Parser::new();
            let mut whole_sink = RecordingSink::default();
            feed(&mut whole_parser, &mut whole_sink, input);

            assert_eq!(sink.csi, whole_sink.csi, "split at {split}");
            assert_eq!(sink.osc, whole_sink.osc, "split at {split}");
            assert_eq!(printed(&sink), printed(&whole_sink), "split at {split}");
        }
    }

    #[test]
    fn chain_dispatches_most_recent_first() {
        use std::cell::RefCell;
        use std::rc::Rc;

        let order: Rc<RefCell<Vec<&'static str>>> = Rc::default();
        let mut parser = Parser::new();
        let ident = FunctionIdentifier::new(b'm');

        let o1 = order.clone();
        parser.register_csi_handler(
            ident,
            Box::new(move |_: &Params| {
                o1.borrow_mut().push("first");
                HandlerResult::FallThrough
            }),
        );
        let o2 = order.clone();
        parser.register_csi_handler(
            ident,
            Box::new(move |_: &Params| {
                o2.borrow_mut().push("second");
                HandlerResult::Consumed
            }),
        );

        let mut sink = RecordingSink::default();
        feed(&mut parser, &mut sink, b"\x1b[0m");
        // Later registration runs first and consumes; the chain never
        // reaches the earlier handler or the sink.
        assert_eq!(*order.borrow(), vec!["second"]);
        assert!(sink.csi.is_empty());
    }

    #[test]
    fn fallthrough_reaches_sink() {
        let mut parser = Parser::new();
        parser.register_csi_handler(
            FunctionIdentifier::new(b'm'),
            Box::new(|_: &Params| HandlerResult::FallThrough),
        );
        let mut sink = RecordingSink::default();
        feed(&mut parser, &mut sink, b"\x1b[7m");
        assert_eq!(sink.csi.len(), 1);
    }

    #[test]
    fn unregistered_handler_no_longer_dispatches() {
        let mut parser = Parser::new();
        let ident = FunctionIdentifier::new(b'm');
        let handle = parser.register_csi_handler(
            ident,
            Box::new(|_: &Params| HandlerResult::Consumed),
        );
        assert!(parser.unregister_csi_handler(ident, handle));
        assert!(!parser.unregister_csi_handler(ident, handle));

        let mut sink = RecordingSink::default();
        feed(&mut parser, &mut sink, b"\x1b[1m");
        assert_eq!(sink.csi.len(), 1);
    }

    #[test]
    fn custom_execute_handler_intercepts() {
        use std::cell::Cell;
        use std::rc::Rc;

        let bells: Rc<Cell<u32>> = Rc::default();
        let mut parser = Parser::new();
        let b = bells.clone();
        parser.set_execute_handler(
            0x07,
            Box::new(move || {
                b.set(b.get() + 1);
                true
            }),
        );
        let mut sink = RecordingSink::default();
        feed(&mut parser, &mut sink, b"\x07\x07");
        assert_eq!(bells.get(), 2);
        assert!(sink.executes.is_empty());
    }

    #[test]
    fn pending_osc_suspends_and_resumes() {
        let mut parser = Parser::new();
        parser.register_osc_handler(
            8,
            Box::new(|_: &str, _: bool| HandlerResult::Pending),
        );

        let mut sink = RecordingSink::default();
        let cps = codepoints("\u{1b}]8;;http://x\u{7}after");
        let result = parser.parse(&cps, &mut sink);
        assert_eq!(result, DispatchResult::Pending);
        assert!(sink.prints.is_empty());

        // Settled as consumed: the tail parses, the sink never sees OSC 8.
        let result = parser.resume(true, &cps, &mut sink);
        assert_eq!(result, DispatchResult::Complete);
        assert_eq!(printed(&sink), "after");
        assert!(sink.osc.is_empty());
    }

    #[test]
    fn pending_rejection_falls_through_chain() {
        let mut parser = Parser::new();
        parser.register_osc_handler(
            2,
            Box::new(|_: &str, _: bool| HandlerResult::Pending),
        );
        let mut sink = RecordingSink::default();
        let cps = codepoints("\u{1b}]2;title\u{7}");
        assert_eq!(parser.parse(&cps, &mut sink), DispatchResult::Pending);
        // Rejected: the dispatch falls through to the sink.
        assert_eq!(parser.resume(false, &cps, &mut sink), DispatchResult::Complete);
        assert_eq!(sink.osc.len(), 1);
        assert_eq!(sink.osc[0].1, "title");
    }

    #[test]
    #[should_panic(expected = "reentrant")]
    fn reentrant_parse_while_pending_panics() {
        let mut parser = Parser::new();
        parser.register_osc_handler(
            2,
            Box::new(|_: &str, _: bool| HandlerResult::Pending),
        );
        let mut sink = RecordingSink::default();
        let cps = codepoints("\u{1b}]2;t\u{7}");
        let _ = parser.parse(&cps, &mut sink);
        let _ = parser.parse(&cps, &mut sink);
    }

    #[test]
    fn reset_aborts_inflight_osc() {
        let mut parser = Parser::new();
        let mut sink = RecordingSink::default();
        feed(&mut parser, &mut sink, b"\x1b]0;half");
        parser.reset(&mut sink);
        assert_eq!(sink.osc.len(), 1);
        assert!(!sink.osc[0].2);
        assert_eq!(parser.state(), State::Ground);
    }
}
