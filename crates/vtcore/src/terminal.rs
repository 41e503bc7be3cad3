//! The terminal facade: write/resize, events, handler registration.
//!
//! Wires the write queue, the UTF-8 decoder, the escape sequence parser and
//! the input handler together. Writes are processed strictly in submission
//! order; dirty-row notifications are coalesced and flushed once per
//! processed chunk, not per control sequence.

use std::time::Instant;

use crate::buffer::line::CellData;
use crate::buffer::Buffer;
use crate::handler::{ColorKind, Event, InputHandler};
use crate::parser::{
    CsiHandler, DcsHandler, DispatchResult, EscHandler, FunctionIdentifier, HandlerId, OscHandler,
    Parser,
};
use crate::scheduler::{Utf8Decoder, WriteBuffer, SYNC_CALL_LIMIT, WRITE_TIMEOUT};
use crate::Error;

/// Terminal construction options.
#[derive(Debug, Clone)]
pub struct TerminalOptions {
    /// Viewport columns.
    pub cols: usize,
    /// Viewport rows.
    pub rows: usize,
    /// Scrollback lines retained beyond the viewport (normal buffer).
    pub scrollback: usize,
    /// Re-wrap soft-wrapped lines when the column count changes.
    pub reflow_on_resize: bool,
}

impl Default for TerminalOptions {
    fn default() -> Self {
        Self {
            cols: 80,
            rows: 24,
            scrollback: 1000,
            reflow_on_resize: true,
        }
    }
}

/// Receiver for terminal side effects. All methods default to no-ops.
pub trait EventListener {
    /// A line feed was executed.
    fn on_line_feed(&mut self) {}
    /// The cursor position changed during the last chunk.
    fn on_cursor_move(&mut self, _x: usize, _y: usize) {}
    /// The window title changed.
    fn on_title_change(&mut self, _title: &str) {}
    /// BEL.
    fn on_bell(&mut self) {}
    /// The buffer scrolled; payload is the new `ybase`.
    fn on_scroll(&mut self, _ybase: usize) {}
    /// Rows `[start, end]` (viewport-relative, inclusive) need repainting.
    fn on_refresh_rows(&mut self, _start: usize, _end: usize) {}
    /// A palette or special color changed.
    fn on_color_change(&mut self, _kind: ColorKind) {}
    /// The terminal was resized.
    fn on_resize(&mut self, _cols: usize, _rows: usize) {}
    /// Bytes to transmit back to the application (status reports).
    fn on_data(&mut self, _data: &[u8]) {}
}

struct CurrentChunk {
    cps: Vec<u32>,
    callback: Option<Box<dyn FnOnce() + Send>>,
}

/// A terminal emulation engine instance.
pub struct Terminal {
    parser: Parser,
    handler: InputHandler,
    queue: WriteBuffer,
    decoder: Utf8Decoder,
    current: Option<CurrentChunk>,
    listener: Option<Box<dyn EventListener>>,
    continuation: Option<Box<dyn FnMut()>>,
    options: TerminalOptions,
    last_cursor: (usize, usize),
    sync_depth: usize,
    disposed: bool,
}

impl Terminal {
    /// Create a terminal with the given options.
    #[must_use]
    pub fn new(options: TerminalOptions) -> Self {
        let handler = InputHandler::new(options.rows, options.cols, options.scrollback);
        Self {
            parser: Parser::new(),
            handler,
            queue: WriteBuffer::new(),
            decoder: Utf8Decoder::new(),
            current: None,
            listener: None,
            continuation: None,
            options,
            last_cursor: (0, 0),
            sync_depth: 0,
            disposed: false,
        }
    }

    /// Install the event listener.
    pub fn set_event_listener(&mut self, listener: Box<dyn EventListener>) {
        self.listener = Some(listener);
    }

    /// Install the continuation hook, invoked when a processing slice hits
    /// its deadline with work remaining; the host should schedule a call to
    /// [`Terminal::process_pending`].
    pub fn set_continuation_hook(&mut self, hook: Box<dyn FnMut()>) {
        self.continuation = Some(hook);
    }

    // -------------------------------------------------------------------
    // Writing
    // -------------------------------------------------------------------

    /// Queue bytes and process them within this slice's time budget.
    ///
    /// Fails fast once pending data exceeds the discard watermark
    /// (backpressure, not recoverable buffering).
    pub fn write(&mut self, data: &[u8]) -> Result<(), Error> {
        self.write_with_callback(data, None)
    }

    /// [`Terminal::write`] with a completion callback, run after the chunk
    /// has been fully parsed.
    pub fn write_with_callback(
        &mut self,
        data: &[u8],
        callback: Option<Box<dyn FnOnce() + Send>>,
    ) -> Result<(), Error> {
        self.queue.enqueue(data.to_vec(), callback)?;
        self.process_slice();
        Ok(())
    }

    /// Synchronous write bypassing the scheduler (test determinism).
    ///
    /// `max_subsequent_calls` caps runaway synchronous recursion.
    pub fn write_sync(&mut self, data: &[u8]) -> Result<(), Error> {
        self.write_sync_with_limit(data, SYNC_CALL_LIMIT)
    }

    /// [`Terminal::write_sync`] with an explicit recursion cap.
    pub fn write_sync_with_limit(
        &mut self,
        data: &[u8],
        max_subsequent_calls: usize,
    ) -> Result<(), Error> {
        if self.sync_depth >= max_subsequent_calls {
            return Err(Error::SyncCallLimit(max_subsequent_calls));
        }
        self.sync_depth += 1;
        // Drain anything already queued first to preserve write ordering.
        while !self.parser.has_pending() {
            let Some(chunk) = self.next_chunk() else {
                break;
            };
            self.run_chunk(chunk);
        }
        let result = if self.parser.has_pending() {
            // A handler suspension is outstanding; queue behind it rather
            // than reentering the parser.
            self.queue.enqueue(data.to_vec(), None)
        } else {
            let mut cps = Vec::with_capacity(data.len());
            self.decoder.decode(data, &mut cps);
            self.run_chunk(CurrentChunk { cps, callback: None });
            Ok(())
        };
        self.sync_depth -= 1;
        result
    }

    /// Continue processing queued writes after a yield.
    pub fn process_pending(&mut self) {
        self.process_slice();
    }

    /// Whether queued or suspended write data remains.
    #[must_use]
    pub fn has_pending_data(&self) -> bool {
        self.current.is_some() || self.queue.has_pending()
    }

    /// Whether an asynchronous handler suspension is outstanding.
    #[must_use]
    pub fn has_pending_handler(&self) -> bool {
        self.parser.has_pending()
    }

    /// Settle an outstanding handler suspension and continue parsing.
    ///
    /// `success` is the handler's settled outcome: true consumes the
    /// sequence, false falls through to the rest of the chain; a rejected
    /// asynchronous operation is reported as false, never as a crash.
    pub fn resume_pending(&mut self, success: bool) {
        if !self.parser.has_pending() {
            return;
        }
        let Some(chunk) = self.current.take() else {
            return;
        };
        let result = self.parser.resume(success, &chunk.cps, &mut self.handler);
        match result {
            DispatchResult::Pending => {
                self.current = Some(chunk);
                self.flush_frame();
            }
            DispatchResult::Complete => {
                if let Some(callback) = chunk.callback {
                    callback();
                }
                self.flush_frame();
                self.process_slice();
            }
        }
    }

    fn next_chunk(&mut self) -> Option<CurrentChunk> {
        if let Some(chunk) = self.current.take() {
            return Some(chunk);
        }
        let chunk = self.queue.pop()?;
        let mut cps = Vec::with_capacity(chunk.bytes.len());
        self.decoder.decode(&chunk.bytes, &mut cps);
        Some(CurrentChunk {
            cps,
            callback: chunk.callback,
        })
    }

    /// Parse one decoded chunk to completion (or suspension) and flush.
    fn run_chunk(&mut self, chunk: CurrentChunk) -> bool {
        let result = self.parser.parse(&chunk.cps, &mut self.handler);
        match result {
            DispatchResult::Pending => {
                self.current = Some(chunk);
                self.flush_frame();
                false
            }
            DispatchResult::Complete => {
                if let Some(callback) = chunk.callback {
                    callback();
                }
                self.flush_frame();
                true
            }
        }
    }

    fn process_slice(&mut self) {
        if self.disposed || self.parser.has_pending() {
            return;
        }
        let deadline = Instant::now() + WRITE_TIMEOUT;
        while let Some(chunk) = self.next_chunk() {
            if !self.run_chunk(chunk) {
                // Suspended mid-chunk; resume_pending drives the rest.
                return;
            }
            if Instant::now() >= deadline && self.queue.has_pending() {
                // Yield; the host requeues via the continuation hook.
                if let Some(hook) = &mut self.continuation {
                    hook();
                }
                return;
            }
        }
    }

    /// Flush coalesced side effects to the listener (once per chunk).
    fn flush_frame(&mut self) {
        self.handler.prune_links();
        let events = self.handler.take_events();
        let dirty = self.handler.take_dirty();
        let cursor = {
            let buffer = self.handler.buffer();
            (buffer.x, buffer.y)
        };
        let Some(listener) = &mut self.listener else {
            return;
        };
        for event in events {
            match event {
                Event::LineFeed => listener.on_line_feed(),
                Event::Bell => listener.on_bell(),
                Event::Scroll(ybase) => listener.on_scroll(ybase),
                Event::TitleChange(title) => listener.on_title_change(&title),
                Event::ColorChange(kind) => listener.on_color_change(kind),
                Event::Data(data) => listener.on_data(&data),
            }
        }
        if let Some((start, end)) = dirty {
            listener.on_refresh_rows(start, end);
        }
        if cursor != self.last_cursor {
            self.last_cursor = cursor;
            listener.on_cursor_move(cursor.0, cursor.1);
        }
    }

    // -------------------------------------------------------------------
    // Geometry and state access
    // -------------------------------------------------------------------

    /// Resize the terminal, re-wrapping soft-wrapped lines when enabled.
    pub fn resize(&mut self, cols: usize, rows: usize) {
        let cols = cols.max(1);
        let rows = rows.max(1);
        if cols == self.options.cols && rows == self.options.rows {
            return;
        }
        self.options.cols = cols;
        self.options.rows = rows;
        self.handler.resize(cols, rows, self.options.reflow_on_resize);
        if let Some(listener) = &mut self.listener {
            listener.on_resize(cols, rows);
        }
        self.flush_frame();
    }

    /// Viewport columns.
    #[must_use]
    pub fn cols(&self) -> usize {
        self.options.cols
    }

    /// Viewport rows.
    #[must_use]
    pub fn rows(&self) -> usize {
        self.options.rows
    }

    /// The active buffer (read accessors: lines, trimmed length, markers).
    #[must_use]
    pub fn buffer(&self) -> &Buffer {
        self.handler.buffer()
    }

    /// Mutable active buffer (viewport scrolling, marker registration).
    pub fn buffer_mut(&mut self) -> &mut Buffer {
        self.handler.buffer_mut()
    }

    /// The input handler (attributes, palette, links, modes).
    #[must_use]
    pub fn handler(&self) -> &InputHandler {
        &self.handler
    }

    /// Fill a caller-owned record from the cell at `(col, viewport row)`.
    pub fn load_cell(&self, col: usize, row: usize, out: &mut CellData) -> bool {
        self.handler
            .buffer()
            .row(row)
            .is_some_and(|line| line.load_cell(col, out))
    }

    /// Text content of a viewport row.
    #[must_use]
    pub fn row_text(&self, row: usize, trim_right: bool) -> String {
        self.handler
            .buffer()
            .row(row)
            .map(|line| line.translate_to_string(trim_right, 0, line.len()))
            .unwrap_or_default()
    }

    // -------------------------------------------------------------------
    // Handler registration (the add-on extension point)
    // -------------------------------------------------------------------

    /// Register a CSI handler; most recent registration dispatches first.
    pub fn register_csi_handler(
        &mut self,
        ident: FunctionIdentifier,
        handler: Box<dyn CsiHandler>,
    ) -> HandlerId {
        self.parser.register_csi_handler(ident, handler)
    }

    /// Remove a CSI handler registration.
    pub fn unregister_csi_handler(&mut self, ident: FunctionIdentifier, handle: HandlerId) -> bool {
        self.parser.unregister_csi_handler(ident, handle)
    }

    /// Register an ESC handler.
    pub fn register_esc_handler(
        &mut self,
        ident: FunctionIdentifier,
        handler: Box<dyn EscHandler>,
    ) -> HandlerId {
        self.parser.register_esc_handler(ident, handler)
    }

    /// Remove an ESC handler registration.
    pub fn unregister_esc_handler(&mut self, ident: FunctionIdentifier, handle: HandlerId) -> bool {
        self.parser.unregister_esc_handler(ident, handle)
    }

    /// Register an OSC handler for a numeric identifier.
    pub fn register_osc_handler(&mut self, ident: u16, handler: Box<dyn OscHandler>) -> HandlerId {
        self.parser.register_osc_handler(ident, handler)
    }

    /// Remove an OSC handler registration.
    pub fn unregister_osc_handler(&mut self, ident: u16, handle: HandlerId) -> bool {
        self.parser.unregister_osc_handler(ident, handle)
    }

    /// Register a DCS handler.
    pub fn register_dcs_handler(
        &mut self,
        ident: FunctionIdentifier,
        handler: Box<dyn DcsHandler>,
    ) -> HandlerId {
        self.parser.register_dcs_handler(ident, handler)
    }

    /// Remove a DCS handler registration.
    pub fn unregister_dcs_handler(&mut self, ident: FunctionIdentifier, handle: HandlerId) -> bool {
        self.parser.unregister_dcs_handler(ident, handle)
    }

    // -------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------

    /// Tear down mid-stream: aborts any in-flight OSC/DCS collection
    /// (`end(false)` / `unhook(false)`) and drops queued writes.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;
        self.parser.reset(&mut self.handler);
        self.queue.clear();
        self.current = None;
        self.decoder.clear();
        self.flush_frame();
    }
}

impl Drop for Terminal {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl std::fmt::Debug for Terminal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Terminal")
            .field("cols", &self.options.cols)
            .field("rows", &self.options.rows)
            .field("pending_data", &self.has_pending_data())
            .finish_non_exhaustive()
    }
}
