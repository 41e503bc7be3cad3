//! The terminal state machine: interprets parsed actions against buffer
//! state.
//!
//! Implements the parser's [`ActionSink`] as the built-in dispatch target:
//! the print path (charset remap, width/join decisions, wraparound, insert
//! mode), C0/C1 executes, the CSI/ESC repertoire, SGR, OSC
//! title/color/hyperlink handling and the DECRQSS report. Unknown
//! identifiers are swallowed and logged — a conformant terminal never
//! aborts the stream.
//!
//! Two attribute records matter here: the *current* attribute (applied to
//! printed cells) and the *erase* attribute (used for erase/scroll fill),
//! which derives from the current background only — foreground and flags
//! excluded. Conformant re-serialization depends on that asymmetry.

mod sgr;

use crate::buffer::attr::{bg_flags, color as attr_color, AttributeData};
use crate::buffer::{BufferSet, SavedCursor};
use crate::charset::{Charset, CharsetState};
use crate::color::{format_color_query, parse_color_spec, ColorPalette};
use crate::links::OscLinkStore;
use crate::params::Params;
use crate::parser::ActionSink;
use crate::unicode;

/// Maximum depth of the OSC title push/pop stack.
const TITLE_STACK_LIMIT: usize = 10;

/// Accumulation cap for DECRQSS request payloads.
const DCS_REQUEST_LIMIT: usize = 64;

/// Side effects produced while interpreting input, drained once per chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// A line feed was executed.
    LineFeed,
    /// BEL was executed.
    Bell,
    /// The buffer scrolled; payload is the new `ybase`.
    Scroll(usize),
    /// The window title changed.
    TitleChange(String),
    /// A palette or special color changed.
    ColorChange(ColorKind),
    /// Bytes to send back to the application (status reports).
    Data(Vec<u8>),
}

/// Which color slot an OSC sequence touched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorKind {
    Palette(u8),
    Foreground,
    Background,
    Cursor,
    /// A reset touched multiple entries.
    Reset,
}

/// Coalesced dirty-row interval (viewport-relative, inclusive).
#[derive(Debug, Default, Clone, Copy)]
pub struct DirtyRange {
    range: Option<(usize, usize)>,
}

impl DirtyRange {
    /// Include one row.
    pub fn mark(&mut self, row: usize) {
        self.mark_span(row, row);
    }

    /// Include an inclusive row interval.
    pub fn mark_span(&mut self, start: usize, end: usize) {
        let (start, end) = (start.min(end), start.max(end));
        self.range = Some(match self.range {
            Some((a, b)) => (a.min(start), b.max(end)),
            None => (start, end),
        });
    }

    /// Include every viewport row.
    pub fn mark_all(&mut self, rows: usize) {
        self.mark_span(0, rows.saturating_sub(1));
    }

    /// Take the accumulated interval.
    pub fn take(&mut self) -> Option<(usize, usize)> {
        self.range.take()
    }
}

/// ANSI modes (SM/RM).
#[derive(Debug, Clone, Copy, Default)]
pub struct Modes {
    /// IRM (4): printed cells shift existing content right.
    pub insert: bool,
    /// LNM (20): LF implies CR.
    pub line_feed: bool,
}

/// DEC private modes (DECSET/DECRST).
#[derive(Debug, Clone, Copy)]
pub struct DecModes {
    /// DECCKM (1).
    pub application_cursor_keys: bool,
    /// DECSCNM (5).
    pub reverse_video: bool,
    /// DECOM (6).
    pub origin: bool,
    /// DECAWM (7).
    pub wraparound: bool,
    /// Cursor blink (12).
    pub cursor_blink: bool,
    /// DECTCEM (25).
    pub cursor_visible: bool,
    /// Reverse wraparound (45).
    pub reverse_wraparound: bool,
    /// Bracketed paste (2004).
    pub bracketed_paste: bool,
    /// DECPAM/DECPNM (ESC = / ESC >).
    pub application_keypad: bool,
}

impl Default for DecModes {
    fn default() -> Self {
        Self {
            application_cursor_keys: false,
            reverse_video: false,
            origin: false,
            wraparound: true,
            cursor_blink: false,
            cursor_visible: true,
            reverse_wraparound: false,
            bracketed_paste: false,
            application_keypad: false,
        }
    }
}

/// The input handler.
pub struct InputHandler {
    buffers: BufferSet,
    cur_attr: AttributeData,
    charset: CharsetState,
    modes: Modes,
    dec_modes: DecModes,
    palette: ColorPalette,
    links: OscLinkStore,
    /// Absolute row most recently stamped with the active hyperlink.
    last_link_row: Option<usize>,
    title: String,
    icon_title: String,
    title_stack: Vec<(String, String)>,
    events: Vec<Event>,
    dirty: DirtyRange,
    /// In-flight DECRQSS payload, when the DCS stream was claimed.
    dcs_request: Option<String>,
    scrollback: usize,
}

impl InputHandler {
    /// Create a handler with fresh buffers.
    #[must_use]
    pub fn new(rows: usize, cols: usize, scrollback: usize) -> Self {
        Self {
            buffers: BufferSet::new(rows, cols, scrollback),
            cur_attr: AttributeData::default(),
            charset: CharsetState::default(),
            modes: Modes::default(),
            dec_modes: DecModes::default(),
            palette: ColorPalette::new(),
            links: OscLinkStore::new(),
            last_link_row: None,
            title: String::new(),
            icon_title: String::new(),
            title_stack: Vec::new(),
            events: Vec::new(),
            dirty: DirtyRange::default(),
            dcs_request: None,
            scrollback,
        }
    }

    // -------------------------------------------------------------------
    // Accessors for the terminal facade and tests
    // -------------------------------------------------------------------

    /// The active buffer.
    #[must_use]
    pub fn buffer(&self) -> &crate::buffer::Buffer {
        self.buffers.active()
    }

    /// Mutable active buffer (viewport scrolling, markers).
    pub fn buffer_mut(&mut self) -> &mut crate::buffer::Buffer {
        self.buffers.active_mut()
    }

    /// The normal/alternate pair.
    #[must_use]
    pub fn buffers(&self) -> &BufferSet {
        &self.buffers
    }

    /// Current SGR state.
    #[must_use]
    pub fn attributes(&self) -> &AttributeData {
        &self.cur_attr
    }

    /// The color palette.
    #[must_use]
    pub fn palette(&self) -> &ColorPalette {
        &self.palette
    }

    /// The hyperlink store.
    #[must_use]
    pub fn links(&self) -> &OscLinkStore {
        &self.links
    }

    /// The window title.
    #[must_use]
    pub fn title(&self) -> &str {
        &self.title
    }

    /// ANSI mode state.
    #[must_use]
    pub fn modes(&self) -> Modes {
        self.modes
    }

    /// DEC private mode state.
    #[must_use]
    pub fn dec_modes(&self) -> DecModes {
        self.dec_modes
    }

    /// Drain the pending events.
    pub fn take_events(&mut self) -> Vec<Event> {
        std::mem::take(&mut self.events)
    }

    /// Drop hyperlinks whose every line marker was trimmed out of the ring.
    ///
    /// Line-coverage markers live in the normal buffer only; the alternate
    /// buffer has no scrollback for links to outlive.
    pub fn prune_links(&mut self) {
        if self.buffers.is_alt() {
            return;
        }
        let buffer = self.buffers.normal();
        self.links
            .prune(|marker| buffer.marker_line(marker).is_some());
    }

    /// Take the coalesced dirty interval.
    pub fn take_dirty(&mut self) -> Option<(usize, usize)> {
        self.dirty.take()
    }

    /// Resize both buffers, reflowing the normal one when enabled.
    pub fn resize(&mut self, cols: usize, rows: usize, reflow: bool) {
        let fill = AttributeData::default();
        self.buffers
            .resize(cols, rows, self.scrollback, reflow, &fill);
        let rows = self.buffers.active().rows();
        self.dirty.mark_all(rows);
    }

    /// The erase attribute: current background only, no flags, no extended.
    #[must_use]
    fn erase_attr(&self) -> AttributeData {
        AttributeData {
            fg: 0,
            bg: self.cur_attr.bg & (attr_color::CM_MASK | attr_color::COLOR_MASK),
            extended: None,
        }
    }

    // -------------------------------------------------------------------
    // Print path
    // -------------------------------------------------------------------

    fn print_char(&mut self, cp: u32, width: u8, erase: &AttributeData) {
        let wraparound = self.dec_modes.wraparound;
        let insert = self.modes.insert;
        let cols = self.buffers.active().cols();

        if self.buffers.active().x + usize::from(width) > cols {
            if wraparound {
                let buffer = self.buffers.active_mut();
                buffer.x = 0;
                if buffer.y == buffer.scroll_bottom {
                    let scrolled = buffer.scroll_up_one(erase, true);
                    if scrolled {
                        self.events.push(Event::Scroll(buffer.ybase));
                    }
                    self.dirty.mark_span(buffer.scroll_top, buffer.scroll_bottom);
                } else if buffer.y < buffer.rows() - 1 {
                    buffer.y += 1;
                    let y = buffer.y;
                    if let Some(row) = buffer.row_mut(y) {
                        row.set_wrapped(true);
                    }
                }
            } else {
                if width == 2 {
                    // A wide character cannot overwrite the final column;
                    // its second half would be dropped, so the glyph is.
                    return;
                }
                self.buffers.active_mut().x = cols - 1;
            }
        }

        let (y, abs_row) = {
            let buffer = self.buffers.active_mut();
            let x = buffer.x;
            let y = buffer.y;
            let abs = buffer.ybase + y;
            if insert {
                if let Some(row) = buffer.row_mut(y) {
                    row.insert_cells(x, usize::from(width), erase);
                }
            }
            if let Some(row) = buffer.row_mut(y) {
                row.split_wide_at(x, erase);
                if width == 2 {
                    row.split_wide_at(x + 1, erase);
                }
                row.put_char(x, cp, width, &self.cur_attr);
                if width == 2 {
                    row.put_wide_trailer(x + 1, &self.cur_attr);
                }
            }
            buffer.x += usize::from(width);
            (y, abs)
        };
        self.dirty.mark(y);

        // Hyperlink line coverage: the first cell of the link on each row
        // registers a marker (normal buffer only; alt rows don't outlive
        // the screen switch).
        let link = self.cur_attr.url_id();
        if link != 0 && self.last_link_row != Some(abs_row) && !self.buffers.is_alt() {
            let marker = self.buffers.active_mut().add_marker(abs_row);
            self.links.add_line(link, marker);
            self.last_link_row = Some(abs_row);
        }
    }

    fn join_preceding(&mut self, cp: u32) {
        let Some(ch) = char::from_u32(cp) else {
            return;
        };
        let buffer = self.buffers.active_mut();
        let cols = buffer.cols();
        let y = buffer.y;
        let ybase = buffer.ybase;
        let (row_index, col) = if buffer.x == 0 {
            // Reach into the previous row only across a soft wrap.
            let wrapped = buffer.row(y).is_some_and(|r| r.is_wrapped());
            if wrapped && ybase + y > 0 {
                (ybase + y - 1, cols - 1)
            } else {
                return;
            }
        } else {
            (ybase + y, buffer.x.min(cols) - 1)
        };
        if let Some(line) = buffer.line_mut(row_index) {
            let mut col = col;
            if col > 0 && line.cell(col).is_some_and(|c| c.width() == 0) {
                col -= 1;
            }
            line.append_combining(col, ch);
        }
        if row_index >= ybase {
            self.dirty.mark(row_index - ybase);
        }
    }

    // -------------------------------------------------------------------
    // C0/C1 executes
    // -------------------------------------------------------------------

    fn bell(&mut self) {
        self.events.push(Event::Bell);
    }

    /// IND: move down, scrolling at the region bottom. No LNM, no event.
    fn index(&mut self) {
        let erase = self.erase_attr();
        let buffer = self.buffers.active_mut();
        if buffer.y == buffer.scroll_bottom {
            let scrolled = buffer.scroll_up_one(&erase, false);
            if scrolled {
                self.events.push(Event::Scroll(buffer.ybase));
            }
            self.dirty.mark_span(buffer.scroll_top, buffer.scroll_bottom);
        } else if buffer.y < buffer.rows() - 1 {
            buffer.y += 1;
        }
    }

    fn line_feed(&mut self) {
        self.index();
        if self.modes.line_feed {
            self.buffers.active_mut().x = 0;
        }
        self.events.push(Event::LineFeed);
    }

    fn carriage_return(&mut self) {
        self.buffers.active_mut().x = 0;
    }

    fn backspace(&mut self) {
        let reverse_wrap = self.dec_modes.reverse_wraparound && self.dec_modes.wraparound;
        let buffer = self.buffers.active_mut();
        let cols = buffer.cols();
        buffer.x = buffer.x.min(cols - 1);
        if buffer.x > 0 {
            buffer.x -= 1;
        } else if reverse_wrap && buffer.y > 0 {
            let y = buffer.y;
            if buffer.row(y).is_some_and(|r| r.is_wrapped()) {
                buffer.y -= 1;
                buffer.x = cols - 1;
            }
        }
    }

    fn tab(&mut self) {
        let buffer = self.buffers.active_mut();
        let x = buffer.x.min(buffer.cols() - 1);
        buffer.x = buffer.next_tab_stop(x);
    }

    fn reverse_index(&mut self) {
        let erase = self.erase_attr();
        let buffer = self.buffers.active_mut();
        if buffer.y == buffer.scroll_top {
            buffer.scroll_down_one(&erase);
            self.dirty.mark_span(buffer.scroll_top, buffer.scroll_bottom);
        } else if buffer.y > 0 {
            buffer.y -= 1;
        }
    }

    // -------------------------------------------------------------------
    // Cursor movement
    // -------------------------------------------------------------------

    fn restrict_cursor(&mut self) {
        let buffer = self.buffers.active_mut();
        buffer.x = buffer.x.min(buffer.cols() - 1);
    }

    fn cursor_up(&mut self, n: usize) {
        self.restrict_cursor();
        let buffer = self.buffers.active_mut();
        let top = if buffer.y >= buffer.scroll_top {
            buffer.scroll_top
        } else {
            0
        };
        buffer.y = buffer.y.saturating_sub(n).max(top.min(buffer.y));
    }

    fn cursor_down(&mut self, n: usize) {
        self.restrict_cursor();
        let buffer = self.buffers.active_mut();
        let bottom = if buffer.y <= buffer.scroll_bottom {
            buffer.scroll_bottom
        } else {
            buffer.rows() - 1
        };
        buffer.y = (buffer.y + n).min(bottom);
    }

    fn cursor_forward(&mut self, n: usize) {
        self.restrict_cursor();
        let buffer = self.buffers.active_mut();
        buffer.x = (buffer.x + n).min(buffer.cols() - 1);
    }

    fn cursor_backward(&mut self, n: usize) {
        self.restrict_cursor();
        let buffer = self.buffers.active_mut();
        buffer.x = buffer.x.saturating_sub(n);
    }

    /// Absolute cursor placement (CUP/HVP), honoring DECOM.
    fn set_cursor(&mut self, row: usize, col: usize) {
        let origin = self.dec_modes.origin;
        let buffer = self.buffers.active_mut();
        let (base, limit) = if origin {
            (buffer.scroll_top, buffer.scroll_bottom)
        } else {
            (0, buffer.rows() - 1)
        };
        buffer.y = (base + row).min(limit);
        buffer.x = col.min(buffer.cols() - 1);
    }

    // -------------------------------------------------------------------
    // Erasing and editing
    // -------------------------------------------------------------------

    fn erase_in_display(&mut self, mode: u16, respect_protected: bool) {
        let erase = self.erase_attr();
        match mode {
            0 => {
                let buffer = self.buffers.active_mut();
                let (x, y, rows, cols) = (
                    buffer.x.min(buffer.cols()),
                    buffer.y,
                    buffer.rows(),
                    buffer.cols(),
                );
                if let Some(row) = buffer.row_mut(y) {
                    row.fill_range(x, cols, &erase, respect_protected);
                    if x == 0 {
                        row.set_wrapped(false);
                    }
                }
                for r in y + 1..rows {
                    if let Some(row) = buffer.row_mut(r) {
                        row.fill_range(0, cols, &erase, respect_protected);
                        row.set_wrapped(false);
                    }
                }
                self.dirty.mark_span(y, rows - 1);
            }
            1 => {
                let buffer = self.buffers.active_mut();
                let (x, y, cols) = (buffer.x.min(buffer.cols() - 1), buffer.y, buffer.cols());
                for r in 0..y {
                    if let Some(row) = buffer.row_mut(r) {
                        row.fill_range(0, cols, &erase, respect_protected);
                        row.set_wrapped(false);
                    }
                }
                if let Some(row) = buffer.row_mut(y) {
                    row.fill_range(0, x + 1, &erase, respect_protected);
                }
                self.dirty.mark_span(0, y);
            }
            2 => {
                let buffer = self.buffers.active_mut();
                let (rows, cols) = (buffer.rows(), buffer.cols());
                for r in 0..rows {
                    if let Some(row) = buffer.row_mut(r) {
                        row.fill_range(0, cols, &erase, respect_protected);
                        row.set_wrapped(false);
                    }
                }
                self.dirty.mark_all(rows);
            }
            3 => {
                self.buffers.active_mut().clear_scrollback();
                let rows = self.buffers.active().rows();
                self.dirty.mark_all(rows);
            }
            _ => tracing::debug!(mode, "unhandled ED mode"),
        }
    }

    fn erase_in_line(&mut self, mode: u16, respect_protected: bool) {
        let erase = self.erase_attr();
        let buffer = self.buffers.active_mut();
        let (x, y, cols) = (buffer.x, buffer.y, buffer.cols());
        if let Some(row) = buffer.row_mut(y) {
            match mode {
                0 => row.fill_range(x.min(cols), cols, &erase, respect_protected),
                1 => row.fill_range(0, x.min(cols - 1) + 1, &erase, respect_protected),
                2 => row.fill_range(0, cols, &erase, respect_protected),
                _ => tracing::debug!(mode, "unhandled EL mode"),
            }
        }
        self.dirty.mark(y);
    }

    fn insert_chars(&mut self, n: usize) {
        let erase = self.erase_attr();
        self.restrict_cursor();
        let buffer = self.buffers.active_mut();
        let (x, y) = (buffer.x, buffer.y);
        if let Some(row) = buffer.row_mut(y) {
            row.insert_cells(x, n, &erase);
        }
        self.dirty.mark(y);
    }

    fn delete_chars(&mut self, n: usize) {
        let erase = self.erase_attr();
        self.restrict_cursor();
        let buffer = self.buffers.active_mut();
        let (x, y) = (buffer.x, buffer.y);
        if let Some(row) = buffer.row_mut(y) {
            row.delete_cells(x, n, &erase);
        }
        self.dirty.mark(y);
    }

    fn erase_chars(&mut self, n: usize) {
        let erase = self.erase_attr();
        self.restrict_cursor();
        let buffer = self.buffers.active_mut();
        let (x, y, cols) = (buffer.x, buffer.y, buffer.cols());
        if let Some(row) = buffer.row_mut(y) {
            row.fill_range(x, (x + n).min(cols), &erase, false);
        }
        self.dirty.mark(y);
    }

    fn insert_lines(&mut self, n: usize) {
        let erase = self.erase_attr();
        self.restrict_cursor();
        let buffer = self.buffers.active_mut();
        let y = buffer.y;
        buffer.insert_lines(y, n, &erase);
        buffer.x = 0;
        self.dirty.mark_span(y, buffer.scroll_bottom);
    }

    fn delete_lines(&mut self, n: usize) {
        let erase = self.erase_attr();
        self.restrict_cursor();
        let buffer = self.buffers.active_mut();
        let y = buffer.y;
        buffer.delete_lines(y, n, &erase);
        buffer.x = 0;
        self.dirty.mark_span(y, buffer.scroll_bottom);
    }

    fn scroll_up(&mut self, n: usize) {
        let erase = self.erase_attr();
        let buffer = self.buffers.active_mut();
        buffer.scroll_region_up(n, &erase);
        self.dirty.mark_span(buffer.scroll_top, buffer.scroll_bottom);
    }

    fn scroll_down(&mut self, n: usize) {
        let erase = self.erase_attr();
        let buffer = self.buffers.active_mut();
        buffer.scroll_region_down(n, &erase);
        self.dirty.mark_span(buffer.scroll_top, buffer.scroll_bottom);
    }

    fn repeat_preceding(&mut self, n: usize) {
        let erase = self.erase_attr();
        let (cp, width) = {
            let buffer = self.buffers.active();
            if buffer.x == 0 {
                return;
            }
            let Some(row) = buffer.row(buffer.y) else {
                return;
            };
            let mut col = buffer.x.min(buffer.cols()) - 1;
            if col > 0 && row.cell(col).is_some_and(|c| c.width() == 0) {
                col -= 1;
            }
            match row.cell(col) {
                Some(cell) if cell.codepoint() != 0 && !cell.is_combined() => {
                    (cell.codepoint(), cell.width())
                }
                _ => return,
            }
        };
        for _ in 0..n {
            self.print_char(cp, width, &erase);
        }
    }

    // -------------------------------------------------------------------
    // Save/restore, resets
    // -------------------------------------------------------------------

    fn save_cursor(&mut self) {
        let saved = {
            let buffer = self.buffers.active();
            SavedCursor {
                x: buffer.x,
                y: buffer.y,
                attrs: self.cur_attr.clone(),
                charset: self.charset,
                origin_mode: self.dec_modes.origin,
            }
        };
        self.buffers.active_mut().saved_cursor = Some(saved);
    }

    fn restore_cursor(&mut self) {
        let saved = self.buffers.active().saved_cursor.clone();
        let buffer = self.buffers.active_mut();
        match saved {
            Some(saved) => {
                buffer.x = saved.x.min(buffer.cols() - 1);
                buffer.y = saved.y.min(buffer.rows() - 1);
                self.cur_attr = saved.attrs;
                self.charset = saved.charset;
                self.dec_modes.origin = saved.origin_mode;
            }
            None => {
                buffer.x = 0;
                buffer.y = 0;
                self.cur_attr = AttributeData::default();
                self.charset.reset();
            }
        }
    }

    fn soft_reset(&mut self) {
        self.dec_modes.cursor_visible = true;
        self.dec_modes.origin = false;
        self.dec_modes.wraparound = true;
        self.dec_modes.application_cursor_keys = false;
        self.dec_modes.application_keypad = false;
        self.modes.insert = false;
        self.cur_attr = AttributeData::default();
        self.charset.reset();
        let buffer = self.buffers.active_mut();
        let rows = buffer.rows();
        buffer.set_scroll_region(0, rows - 1);
        buffer.saved_cursor = None;
    }

    fn full_reset(&mut self) {
        let rows = self.buffers.active().rows();
        let cols = self.buffers.active().cols();
        self.buffers = BufferSet::new(rows, cols, self.scrollback);
        self.cur_attr = AttributeData::default();
        self.charset.reset();
        self.modes = Modes::default();
        self.dec_modes = DecModes::default();
        self.links = OscLinkStore::new();
        self.last_link_row = None;
        self.dcs_request = None;
        self.dirty.mark_all(rows);
    }

    fn screen_alignment_fill(&mut self) {
        let fill = AttributeData::default();
        let buffer = self.buffers.active_mut();
        let (rows, cols) = (buffer.rows(), buffer.cols());
        buffer.set_scroll_region(0, rows - 1);
        buffer.x = 0;
        buffer.y = 0;
        for y in 0..rows {
            if let Some(row) = buffer.row_mut(y) {
                for x in 0..cols {
                    row.put_char(x, u32::from('E'), 1, &fill);
                }
                row.set_wrapped(false);
            }
        }
        self.dirty.mark_all(rows);
    }

    // -------------------------------------------------------------------
    // Modes
    // -------------------------------------------------------------------

    fn set_mode(&mut self, params: &Params, enable: bool) {
        for group in params.groups() {
            match group.value {
                4 => self.modes.insert = enable,
                20 => self.modes.line_feed = enable,
                other => tracing::debug!(mode = other, enable, "unhandled ANSI mode"),
            }
        }
    }

    fn set_dec_mode(&mut self, params: &Params, enable: bool) {
        for group in params.groups() {
            match group.value {
                1 => self.dec_modes.application_cursor_keys = enable,
                5 => {
                    if self.dec_modes.reverse_video != enable {
                        self.dec_modes.reverse_video = enable;
                        let rows = self.buffers.active().rows();
                        self.dirty.mark_all(rows);
                    }
                }
                6 => {
                    self.dec_modes.origin = enable;
                    self.set_cursor(0, 0);
                }
                7 => self.dec_modes.wraparound = enable,
                12 => self.dec_modes.cursor_blink = enable,
                25 => {
                    self.dec_modes.cursor_visible = enable;
                    let y = self.buffers.active().y;
                    self.dirty.mark(y.min(self.buffers.active().rows() - 1));
                }
                45 => self.dec_modes.reverse_wraparound = enable,
                47 | 1047 => {
                    let erase = self.erase_attr();
                    if enable {
                        self.buffers.activate_alt(&erase);
                    } else {
                        if group.value == 1047 && self.buffers.is_alt() {
                            self.buffers.active_mut().clear_all(&erase);
                        }
                        self.buffers.activate_normal();
                    }
                    let rows = self.buffers.active().rows();
                    self.dirty.mark_all(rows);
                }
                1048 => {
                    if enable {
                        self.save_cursor();
                    } else {
                        self.restore_cursor();
                    }
                }
                1049 => {
                    if enable {
                        self.save_cursor();
                        let erase = self.erase_attr();
                        self.buffers.activate_alt(&erase);
                    } else {
                        self.buffers.activate_normal();
                        self.restore_cursor();
                    }
                    let rows = self.buffers.active().rows();
                    self.dirty.mark_all(rows);
                }
                2004 => self.dec_modes.bracketed_paste = enable,
                other => tracing::debug!(mode = other, enable, "unhandled DEC private mode"),
            }
        }
    }

    /// DECRQM lookup: Some(state) for tracked modes, None for unrecognized.
    fn mode_state(&self, dec: bool, mode: u16) -> Option<bool> {
        if dec {
            match mode {
                1 => Some(self.dec_modes.application_cursor_keys),
                5 => Some(self.dec_modes.reverse_video),
                6 => Some(self.dec_modes.origin),
                7 => Some(self.dec_modes.wraparound),
                12 => Some(self.dec_modes.cursor_blink),
                25 => Some(self.dec_modes.cursor_visible),
                45 => Some(self.dec_modes.reverse_wraparound),
                47 | 1047 | 1049 => Some(self.buffers.is_alt()),
                2004 => Some(self.dec_modes.bracketed_paste),
                _ => None,
            }
        } else {
            match mode {
                4 => Some(self.modes.insert),
                20 => Some(self.modes.line_feed),
                _ => None,
            }
        }
    }

    // -------------------------------------------------------------------
    // Reports
    // -------------------------------------------------------------------

    fn reply(&mut self, data: impl Into<Vec<u8>>) {
        self.events.push(Event::Data(data.into()));
    }

    fn device_status_report(&mut self, params: &Params, dec: bool) {
        match params.get_or(0, 0) {
            5 if !dec => self.reply(&b"\x1b[0n"[..]),
            6 => {
                let buffer = self.buffers.active();
                let row = if self.dec_modes.origin {
                    buffer.y.saturating_sub(buffer.scroll_top) + 1
                } else {
                    buffer.y + 1
                };
                let col = buffer.x.min(buffer.cols() - 1) + 1;
                let reply = if dec {
                    format!("\x1b[?{row};{col}R")
                } else {
                    format!("\x1b[{row};{col}R")
                };
                self.reply(reply.into_bytes());
            }
            other => tracing::debug!(report = other, "unhandled DSR"),
        }
    }

    fn request_mode(&mut self, params: &Params, dec: bool) {
        let mode = params.get_or(0, 0);
        let value = match self.mode_state(dec, mode) {
            Some(true) => 1,
            Some(false) => 2,
            None => 0,
        };
        let reply = if dec {
            format!("\x1b[?{mode};{value}$y")
        } else {
            format!("\x1b[{mode};{value}$y")
        };
        self.reply(reply.into_bytes());
    }

    /// Serialize the current attribute as SGR parameters (DECRQSS).
    fn serialize_sgr(&self) -> String {
        let attr = &self.cur_attr;
        let mut out = String::from("0");
        let mut push = |s: String| {
            out.push(';');
            out.push_str(&s);
        };
        if attr.is_bold() {
            push("1".into());
        }
        if attr.is_dim() {
            push("2".into());
        }
        if attr.is_italic() {
            push("3".into());
        }
        if attr.is_underline() {
            push("4".into());
        }
        if attr.is_blink() {
            push("5".into());
        }
        if attr.is_inverse() {
            push("7".into());
        }
        if attr.is_invisible() {
            push("8".into());
        }
        if attr.is_strikethrough() {
            push("9".into());
        }
        if attr.is_overline() {
            push("53".into());
        }
        match attr.fg_color_mode() {
            attr_color::CM_P16 => {
                let idx = attr.fg_color();
                if idx < 8 {
                    push(format!("{}", 30 + idx));
                } else {
                    push(format!("{}", 90 + idx - 8));
                }
            }
            attr_color::CM_P256 => push(format!("38;5;{}", attr.fg_color())),
            attr_color::CM_RGB => {
                let (r, g, b) = attr.fg_rgb();
                push(format!("38;2;{r};{g};{b}"));
            }
            _ => {}
        }
        match attr.bg_color_mode() {
            attr_color::CM_P16 => {
                let idx = attr.bg_color();
                if idx < 8 {
                    push(format!("{}", 40 + idx));
                } else {
                    push(format!("{}", 100 + idx - 8));
                }
            }
            attr_color::CM_P256 => push(format!("48;5;{}", attr.bg_color())),
            attr_color::CM_RGB => {
                let (r, g, b) = attr.bg_rgb();
                push(format!("48;2;{r};{g};{b}"));
            }
            _ => {}
        }
        out
    }

    fn answer_decrqss(&mut self, request: &str) {
        let reply = match request {
            "m" => Some(format!("{}m", self.serialize_sgr())),
            "r" => {
                let buffer = self.buffers.active();
                Some(format!(
                    "{};{}r",
                    buffer.scroll_top + 1,
                    buffer.scroll_bottom + 1
                ))
            }
            "\"q" => {
                let protected = self.cur_attr.bg & bg_flags::PROTECTED != 0;
                Some(format!("{}\"q", if protected { 1 } else { 0 }))
            }
            _ => None,
        };
        match reply {
            Some(data) => self.reply(format!("\x1bP1$r{data}\x1b\\").into_bytes()),
            None => {
                tracing::debug!(request, "unhandled DECRQSS");
                self.reply(&b"\x1bP0$r\x1b\\"[..]);
            }
        }
    }

    // -------------------------------------------------------------------
    // Titles, colors, hyperlinks (OSC)
    // -------------------------------------------------------------------

    fn set_title(&mut self, title: &str, window: bool, icon: bool) {
        if window {
            self.title = title.to_string();
            self.events.push(Event::TitleChange(self.title.clone()));
        }
        if icon {
            self.icon_title = title.to_string();
        }
    }

    fn push_title(&mut self, which: u16) {
        if self.title_stack.len() >= TITLE_STACK_LIMIT {
            self.title_stack.remove(0);
        }
        let entry = match which {
            1 => (self.icon_title.clone(), String::new()),
            2 => (String::new(), self.title.clone()),
            _ => (self.icon_title.clone(), self.title.clone()),
        };
        self.title_stack.push(entry);
    }

    fn pop_title(&mut self, which: u16) {
        if let Some((icon, title)) = self.title_stack.pop() {
            if which != 2 && !icon.is_empty() {
                self.icon_title = icon;
            }
            if which != 1 {
                self.title = title;
                self.events.push(Event::TitleChange(self.title.clone()));
            }
        }
    }

    fn osc_color_table(&mut self, payload: &str) {
        let mut parts = payload.split(';');
        while let (Some(index), Some(spec)) = (parts.next(), parts.next()) {
            let Ok(index) = index.parse::<u16>() else {
                continue;
            };
            if index > 255 {
                continue;
            }
            let index = index as u8;
            if spec == "?" {
                let rgb = self.palette.get(index);
                let reply = format!("\x1b]4;{index};{}\x07", format_color_query(rgb));
                self.reply(reply.into_bytes());
            } else if let Some(rgb) = parse_color_spec(spec) {
                self.palette.set(index, rgb);
                self.events.push(Event::ColorChange(ColorKind::Palette(index)));
            }
        }
    }

    fn osc_special_color(&mut self, ident: u16, payload: &str) {
        let kind = match ident {
            10 => ColorKind::Foreground,
            11 => ColorKind::Background,
            _ => ColorKind::Cursor,
        };
        if payload == "?" {
            let rgb = match kind {
                ColorKind::Foreground => self.palette.foreground,
                ColorKind::Background => self.palette.background,
                _ => self.palette.cursor,
            };
            let reply = format!("\x1b]{ident};{}\x07", format_color_query(rgb));
            self.reply(reply.into_bytes());
            return;
        }
        if let Some(rgb) = parse_color_spec(payload) {
            match kind {
                ColorKind::Foreground => self.palette.foreground = rgb,
                ColorKind::Background => self.palette.background = rgb,
                _ => self.palette.cursor = rgb,
            }
            self.events.push(Event::ColorChange(kind));
        }
    }

    fn osc_reset_colors(&mut self, payload: &str) {
        if payload.is_empty() {
            self.palette.reset_all();
        } else {
            for part in payload.split(';') {
                if let Ok(index) = part.parse::<u16>() {
                    if index <= 255 {
                        self.palette.reset(index as u8);
                    }
                }
            }
        }
        self.events.push(Event::ColorChange(ColorKind::Reset));
    }

    fn osc_hyperlink(&mut self, payload: &str) {
        let Some((params, uri)) = payload.split_once(';') else {
            tracing::debug!("malformed OSC 8");
            return;
        };
        if uri.is_empty() {
            if self.cur_attr.extended.is_some() {
                self.cur_attr.extended_mut().url_id = 0;
                self.cur_attr.prune_extended();
            }
            self.last_link_row = None;
            return;
        }
        let id = params
            .split(':')
            .find_map(|kv| kv.strip_prefix("id="))
            .filter(|s| !s.is_empty());
        let link = self.links.open(id, uri);
        self.cur_attr.extended_mut().url_id = link;
        if !self.buffers.is_alt() {
            let abs = self.buffers.active().cursor_abs_row();
            let marker = self.buffers.active_mut().add_marker(abs);
            self.links.add_line(link, marker);
            self.last_link_row = Some(abs);
        }
    }
}

// -----------------------------------------------------------------------
// ActionSink: built-in dispatch
// -----------------------------------------------------------------------

/// Split a packed function identifier into (prefix, intermediate, final).
fn split_ident(ident: u32) -> (u8, u8, u8) {
    (
        ((ident >> 16) & 0xFF) as u8,
        ((ident >> 8) & 0xFF) as u8,
        (ident & 0xFF) as u8,
    )
}

impl ActionSink for InputHandler {
    fn print(&mut self, data: &[u32]) {
        let erase = self.erase_attr();
        for &raw in data {
            let cp = match char::from_u32(raw) {
                Some(c) => u32::from(self.charset.remap(c)),
                None => u32::from(char::REPLACEMENT_CHARACTER),
            };
            if unicode::joins_preceding(cp) {
                self.join_preceding(cp);
                continue;
            }
            let width = unicode::char_width(cp);
            self.print_char(cp, width, &erase);
        }
    }

    fn execute(&mut self, code: u8) {
        match code {
            0x07 => self.bell(),
            0x08 => self.backspace(),
            0x09 => self.tab(),
            0x0A | 0x0B | 0x0C => self.line_feed(),
            0x0D => self.carriage_return(),
            0x0E => self.charset.shift(1),
            0x0F => self.charset.shift(0),
            0x84 => self.index(), // IND
            0x85 => {
                // NEL
                self.index();
                self.carriage_return();
            }
            0x88 => {
                // HTS
                let x = self.buffers.active().x.min(self.buffers.active().cols() - 1);
                self.buffers.active_mut().set_tab_stop(x);
            }
            0x8D => self.reverse_index(), // RI
            _ => tracing::trace!(code, "ignored control"),
        }
    }

    fn csi_dispatch(&mut self, ident: u32, params: &Params) -> bool {
        let (prefix, intermediate, final_byte) = split_ident(ident);
        let p1 = params.get_or(0, 1).max(1) as usize;
        match (prefix, intermediate, final_byte) {
            (0, 0, b'@') => self.insert_chars(p1),
            (0, 0, b'A') => self.cursor_up(p1),
            (0, 0, b'B') => self.cursor_down(p1),
            (0, 0, b'C') => self.cursor_forward(p1),
            (0, 0, b'D') => self.cursor_backward(p1),
            (0, 0, b'E') => {
                self.cursor_down(p1);
                self.buffers.active_mut().x = 0;
            }
            (0, 0, b'F') => {
                self.cursor_up(p1);
                self.buffers.active_mut().x = 0;
            }
            (0, 0, b'G') | (0, 0, b'`') => {
                self.restrict_cursor();
                let buffer = self.buffers.active_mut();
                buffer.x = (p1 - 1).min(buffer.cols() - 1);
            }
            (0, 0, b'H') | (0, 0, b'f') => {
                let row = p1 - 1;
                let col = params.get_or(1, 1).max(1) as usize - 1;
                self.set_cursor(row, col);
            }
            (0, 0, b'I') => {
                for _ in 0..p1 {
                    self.tab();
                }
            }
            (0, 0, b'J') => self.erase_in_display(params.get_or(0, 0), false),
            (b'?', 0, b'J') => self.erase_in_display(params.get_or(0, 0), true),
            (0, 0, b'K') => self.erase_in_line(params.get_or(0, 0), false),
            (b'?', 0, b'K') => self.erase_in_line(params.get_or(0, 0), true),
            (0, 0, b'L') => self.insert_lines(p1),
            (0, 0, b'M') => self.delete_lines(p1),
            (0, 0, b'P') => self.delete_chars(p1),
            (0, 0, b'S') => self.scroll_up(p1),
            (0, 0, b'T') => self.scroll_down(p1),
            (0, 0, b'X') => self.erase_chars(p1),
            (0, 0, b'Z') => {
                self.restrict_cursor();
                for _ in 0..p1 {
                    let buffer = self.buffers.active_mut();
                    let x = buffer.x;
                    buffer.x = buffer.prev_tab_stop(x);
                }
            }
            (0, 0, b'a') => self.cursor_forward(p1),
            (0, 0, b'b') => self.repeat_preceding(p1),
            (0, 0, b'c') => {
                if params.get_or(0, 0) == 0 {
                    self.reply(&b"\x1b[?1;2c"[..]);
                }
            }
            (b'>', 0, b'c') => {
                if params.get_or(0, 0) == 0 {
                    self.reply(&b"\x1b[>0;276;0c"[..]);
                }
            }
            (0, 0, b'd') => {
                self.restrict_cursor();
                let origin = self.dec_modes.origin;
                let buffer = self.buffers.active_mut();
                let base = if origin { buffer.scroll_top } else { 0 };
                buffer.y = (base + p1 - 1).min(buffer.rows() - 1);
            }
            (0, 0, b'e') => self.cursor_down(p1),
            (0, 0, b'g') => match params.get_or(0, 0) {
                0 => {
                    let x = self.buffers.active().x.min(self.buffers.active().cols() - 1);
                    self.buffers.active_mut().clear_tab_stop(x);
                }
                3 => self.buffers.active_mut().clear_all_tab_stops(),
                other => tracing::debug!(mode = other, "unhandled TBC"),
            },
            (0, 0, b'h') => self.set_mode(params, true),
            (0, 0, b'l') => self.set_mode(params, false),
            (b'?', 0, b'h') => self.set_dec_mode(params, true),
            (b'?', 0, b'l') => self.set_dec_mode(params, false),
            (0, 0, b'm') => sgr::apply_sgr(&mut self.cur_attr, params),
            (0, 0, b'n') => self.device_status_report(params, false),
            (b'?', 0, b'n') => self.device_status_report(params, true),
            (0, b'!', b'p') => self.soft_reset(),
            (0, b'$', b'p') => self.request_mode(params, false),
            (b'?', b'$', b'p') => self.request_mode(params, true),
            (0, b'"', b'q') => match params.get_or(0, 0) {
                1 => self.cur_attr.bg |= bg_flags::PROTECTED,
                _ => self.cur_attr.bg &= !bg_flags::PROTECTED,
            },
            (0, 0, b'r') => {
                let rows = self.buffers.active().rows();
                let top = p1 - 1;
                // Zero or absent bottom means the last row.
                let bottom = match params.get_or(1, 0) as usize {
                    0 => rows - 1,
                    b => b - 1,
                };
                self.buffers.active_mut().set_scroll_region(top, bottom);
                self.set_cursor(0, 0);
            }
            (0, 0, b's') => self.save_cursor(),
            (0, 0, b'u') => self.restore_cursor(),
            (0, 0, b't') => match params.get_or(0, 0) {
                22 => self.push_title(params.get_or(1, 0)),
                23 => self.pop_title(params.get_or(1, 0)),
                other => tracing::debug!(op = other, "unhandled window op"),
            },
            _ => return false,
        }
        true
    }

    fn esc_dispatch(&mut self, ident: u32) -> bool {
        let (_, intermediate, final_byte) = split_ident(ident);
        match (intermediate, final_byte) {
            (0, b'7') => self.save_cursor(),
            (0, b'8') => self.restore_cursor(),
            (0, b'D') => self.index(),
            (0, b'E') => {
                self.index();
                self.carriage_return();
            }
            (0, b'H') => {
                let x = self.buffers.active().x.min(self.buffers.active().cols() - 1);
                self.buffers.active_mut().set_tab_stop(x);
            }
            (0, b'M') => self.reverse_index(),
            (0, b'c') => self.full_reset(),
            (0, b'n') => self.charset.shift(2),
            (0, b'o') => self.charset.shift(3),
            (0, b'=') => self.dec_modes.application_keypad = true,
            (0, b'>') => self.dec_modes.application_keypad = false,
            (0, b'\\') => {} // ST after a string sequence
            (b'#', b'8') => self.screen_alignment_fill(),
            (i @ (b'(' | b')' | b'*' | b'+'), final_byte) => {
                let slot = match i {
                    b'(' => 0,
                    b')' => 1,
                    b'*' => 2,
                    _ => 3,
                };
                match Charset::from_final(final_byte) {
                    Some(charset) => self.charset.designate(slot, charset),
                    None => {
                        tracing::debug!(final_byte, "unknown charset designation");
                    }
                }
            }
            _ => return false,
        }
        true
    }

    fn osc_dispatch(&mut self, ident: u16, payload: &str, success: bool) -> bool {
        if !success {
            // Aborted sequence: nothing to apply.
            return true;
        }
        match ident {
            0 => self.set_title(payload, true, true),
            1 => self.set_title(payload, false, true),
            2 => self.set_title(payload, true, false),
            4 => self.osc_color_table(payload),
            8 => self.osc_hyperlink(payload),
            10 | 11 | 12 => self.osc_special_color(ident, payload),
            104 => self.osc_reset_colors(payload),
            110 => {
                self.palette.reset_foreground();
                self.events.push(Event::ColorChange(ColorKind::Foreground));
            }
            111 => {
                self.palette.reset_background();
                self.events.push(Event::ColorChange(ColorKind::Background));
            }
            112 => {
                self.palette.reset_cursor();
                self.events.push(Event::ColorChange(ColorKind::Cursor));
            }
            _ => return false,
        }
        true
    }

    fn dcs_hook(&mut self, ident: u32, _params: &Params) -> bool {
        let (_, intermediate, final_byte) = split_ident(ident);
        if intermediate == b'$' && final_byte == b'q' {
            self.dcs_request = Some(String::new());
            return true;
        }
        false
    }

    fn dcs_put(&mut self, data: &[u32]) {
        if let Some(request) = &mut self.dcs_request {
            for &cp in data {
                if request.len() >= DCS_REQUEST_LIMIT {
                    break;
                }
                request.push(char::from_u32(cp).unwrap_or(char::REPLACEMENT_CHARACTER));
            }
        }
    }

    fn dcs_unhook(&mut self, success: bool) {
        if let Some(request) = self.dcs_request.take() {
            if success {
                self.answer_decrqss(&request);
            }
        }
    }
}
