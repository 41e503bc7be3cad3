//! Terminal emulation engine.
//!
//! Ingests a byte stream containing text interleaved with ANSI/VT/xterm
//! control sequences, maintains the resulting screen and scrollback state,
//! and exposes that state for a renderer to display and an application to
//! query.
//!
//! ## Architecture
//!
//! - [`parser`] — table-driven escape sequence state machine over decoded
//!   code points, with per-identifier handler chains and asynchronous
//!   handler suspension.
//! - [`buffer`] — packed-cell lines, the scrollback ring, cursor/region
//!   state, markers, and the column-reflow engine.
//! - [`handler`] — the input handler interpreting parsed actions against
//!   buffer state (cursor motion, SGR, scroll regions, tab stops,
//!   titles/colors/hyperlinks, status reports).
//! - [`scheduler`] — chunked, time-sliced write feeding with backpressure
//!   and stream-safe UTF-8 decoding.
//! - [`terminal`] — the facade wiring it all together.
//!
//! ## Example
//!
//! ```
//! use vtcore::{Terminal, TerminalOptions};
//!
//! let mut term = Terminal::new(TerminalOptions::default());
//! term.write_sync(b"\x1b[31mhello\x1b[0m").unwrap();
//! assert_eq!(term.row_text(0, true), "hello");
//! ```
//!
//! Rendering, glyph rasterization, selection and PTY process I/O are
//! external collaborators: they consume buffer state through read accessors
//! and dirty-row notifications, and supply/receive the byte stream.

pub mod buffer;
pub mod charset;
pub mod color;
pub mod handler;
pub mod links;
pub mod params;
pub mod parser;
pub mod scheduler;
pub mod terminal;
pub mod unicode;

#[cfg(test)]
mod tests;

pub use buffer::attr::{AttributeData, ExtendedAttrs, UnderlineStyle};
pub use buffer::line::{BufferLine, Cell, CellData};
pub use buffer::{Buffer, MarkerId};
pub use handler::{ColorKind, InputHandler};
pub use params::Params;
pub use parser::{
    CsiHandler, DcsHandler, EscHandler, FunctionIdentifier, HandlerId, HandlerResult, OscHandler,
    Parser,
};
pub use terminal::{EventListener, Terminal, TerminalOptions};

/// Errors surfaced by the public write API.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Pending write data exceeded the discard watermark; the write was
    /// rejected (backpressure, not recoverable buffering).
    #[error("write buffer overflow: {pending} pending bytes exceed the discard watermark")]
    WriteOverflow {
        /// Bytes that would have been pending had the write been accepted.
        pending: usize,
    },
    /// `write_sync` recursed past its cap.
    #[error("write_sync exceeded {0} subsequent calls")]
    SyncCallLimit(usize),
}
