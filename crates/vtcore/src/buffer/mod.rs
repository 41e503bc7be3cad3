//! Screen buffer: line store, cursor, scroll region, markers.
//!
//! Two buffers exist per terminal (normal + alternate); exactly one is
//! active. The normal buffer keeps `rows + scrollback` lines in its ring;
//! the alternate buffer has no scrollback. `y` is relative to `ybase` (the
//! top of the viewport when following output); `ydisp` is the viewport
//! scroll position and never exceeds `ybase`.

pub mod attr;
pub mod circular;
pub mod line;
mod reflow;

use rustc_hash::FxHashMap;

use crate::charset::CharsetState;

use attr::AttributeData;
use circular::{CircularList, ListEvent};
use line::BufferLine;

/// Stable handle to a buffer line, kept consistent across scrollback trims
/// and scroll-region splices. Ids are monotonic and never reused; a
/// disposed marker (or one whose line was trimmed away) stays invalid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MarkerId(pub(crate) u64);

/// Saved cursor snapshot (DECSC/DECRC).
#[derive(Debug, Clone, Default)]
pub struct SavedCursor {
    pub x: usize,
    pub y: usize,
    pub attrs: AttributeData,
    pub charset: CharsetState,
    pub origin_mode: bool,
}

/// One screen buffer.
#[derive(Debug)]
pub struct Buffer {
    lines: CircularList<BufferLine>,
    /// Cursor column.
    pub x: usize,
    /// Cursor row, relative to `ybase`.
    pub y: usize,
    /// First viewport row when following output.
    pub ybase: usize,
    /// Viewport scroll position (<= `ybase`).
    pub ydisp: usize,
    /// Scroll region top (inclusive, viewport-relative).
    pub scroll_top: usize,
    /// Scroll region bottom (inclusive, viewport-relative).
    pub scroll_bottom: usize,
    rows: usize,
    cols: usize,
    tab_stops: Vec<bool>,
    /// DECSC snapshot.
    pub saved_cursor: Option<SavedCursor>,
    markers: FxHashMap<u64, usize>,
    next_marker_id: u64,
    has_scrollback: bool,
}

impl Buffer {
    /// Create a buffer filled with `rows` blank lines.
    ///
    /// `has_scrollback` is false for the alternate buffer, capping the ring
    /// at exactly `rows` lines.
    #[must_use]
    pub fn new(rows: usize, cols: usize, scrollback: usize, has_scrollback: bool) -> Self {
        let rows = rows.max(1);
        let cols = cols.max(1);
        let max_length = if has_scrollback {
            rows + scrollback
        } else {
            rows
        };
        let mut lines = CircularList::new(max_length);
        let fill = AttributeData::default();
        for _ in 0..rows {
            lines.push(BufferLine::new(cols, &fill));
        }
        lines.clear_events();
        Self {
            lines,
            x: 0,
            y: 0,
            ybase: 0,
            ydisp: 0,
            scroll_top: 0,
            scroll_bottom: rows - 1,
            rows,
            cols,
            tab_stops: default_tab_stops(cols),
            saved_cursor: None,
            markers: FxHashMap::default(),
            next_marker_id: 1,
            has_scrollback,
        }
    }

    /// Number of viewport rows.
    #[must_use]
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Number of columns.
    #[must_use]
    pub fn cols(&self) -> usize {
        self.cols
    }

    /// Total retained lines (scrollback + viewport).
    #[must_use]
    pub fn total_lines(&self) -> usize {
        self.lines.len()
    }

    /// Scrollback lines above the viewport.
    #[must_use]
    pub fn scrollback_lines(&self) -> usize {
        self.ybase
    }

    /// Whether this buffer retains scrollback.
    #[must_use]
    pub fn has_scrollback(&self) -> bool {
        self.has_scrollback
    }

    /// Absolute row of the cursor within the line store.
    #[must_use]
    pub fn cursor_abs_row(&self) -> usize {
        self.ybase + self.y
    }

    /// Line at an absolute index (0 = oldest retained).
    #[must_use]
    pub fn line(&self, index: usize) -> Option<&BufferLine> {
        self.lines.get(index)
    }

    /// Mutable line at an absolute index.
    pub fn line_mut(&mut self, index: usize) -> Option<&mut BufferLine> {
        self.lines.get_mut(index)
    }

    /// Mutable viewport row (relative to `ybase`).
    pub fn row_mut(&mut self, y: usize) -> Option<&mut BufferLine> {
        self.lines.get_mut(self.ybase + y)
    }

    /// Viewport row (relative to `ybase`).
    #[must_use]
    pub fn row(&self, y: usize) -> Option<&BufferLine> {
        self.lines.get(self.ybase + y)
    }

    // -------------------------------------------------------------------
    // Cursor and regions
    // -------------------------------------------------------------------

    /// Clamp cursor and scroll region into the buffer geometry.
    pub fn clamp(&mut self) {
        self.x = self.x.min(self.cols.saturating_sub(1));
        self.y = self.y.min(self.rows.saturating_sub(1));
        self.scroll_bottom = self.scroll_bottom.min(self.rows - 1);
        if self.scroll_top > self.scroll_bottom {
            self.scroll_top = 0;
            self.scroll_bottom = self.rows - 1;
        }
        self.ydisp = self.ydisp.min(self.ybase);
    }

    /// Set the scroll region (DECSTBM); resets to full screen on bad input.
    pub fn set_scroll_region(&mut self, top: usize, bottom: usize) {
        if top < bottom && bottom < self.rows {
            self.scroll_top = top;
            self.scroll_bottom = bottom;
        } else {
            self.scroll_top = 0;
            self.scroll_bottom = self.rows - 1;
        }
    }

    // -------------------------------------------------------------------
    // Tab stops
    // -------------------------------------------------------------------

    /// Set a tab stop at the given column.
    pub fn set_tab_stop(&mut self, col: usize) {
        if col < self.tab_stops.len() {
            self.tab_stops[col] = true;
        }
    }

    /// Clear the tab stop at the given column.
    pub fn clear_tab_stop(&mut self, col: usize) {
        if col < self.tab_stops.len() {
            self.tab_stops[col] = false;
        }
    }

    /// Clear every tab stop (TBC 3).
    pub fn clear_all_tab_stops(&mut self) {
        self.tab_stops.fill(false);
    }

    /// Next tab stop strictly right of `col` (or the last column).
    #[must_use]
    pub fn next_tab_stop(&self, col: usize) -> usize {
        for c in col + 1..self.cols {
            if self.tab_stops.get(c).copied().unwrap_or(false) {
                return c;
            }
        }
        self.cols - 1
    }

    /// Previous tab stop strictly left of `col` (or column 0).
    #[must_use]
    pub fn prev_tab_stop(&self, col: usize) -> usize {
        for c in (0..col).rev() {
            if self.tab_stops.get(c).copied().unwrap_or(false) {
                return c;
            }
        }
        0
    }

    // -------------------------------------------------------------------
    // Scrolling
    // -------------------------------------------------------------------

    /// Scroll the region up one line (line feed at the region bottom).
    ///
    /// The freed line is filled with `fill`; `wrapped` marks the new line as
    /// a soft-wrap continuation. Returns true when a scrollback line was
    /// created (viewport moved down in the ring).
    pub fn scroll_up_one(&mut self, fill: &AttributeData, wrapped: bool) -> bool {
        let top_row = self.ybase + self.scroll_top;
        let bottom_row = self.ybase + self.scroll_bottom;
        let mut new_line = BufferLine::new(self.cols, fill);
        new_line.set_wrapped(wrapped);
        let mut scrolled = false;

        if self.scroll_top == 0 && self.has_scrollback {
            let will_trim = self.lines.is_full();
            let follow = self.ydisp == self.ybase;
            if bottom_row == self.lines.len() - 1 {
                self.lines.push(new_line);
            } else {
                self.lines.splice(bottom_row + 1, 0, vec![new_line]);
            }
            if !will_trim {
                self.ybase += 1;
                if follow {
                    self.ydisp = self.ybase;
                }
            }
            scrolled = true;
        } else {
            // Restricted region or no scrollback: rotate in place.
            self.lines.splice(top_row, 1, Vec::new());
            self.lines.splice(bottom_row, 0, vec![new_line]);
        }
        self.apply_list_events();
        scrolled
    }

    /// Scroll the region down one line (reverse index at the region top).
    pub fn scroll_down_one(&mut self, fill: &AttributeData) {
        self.scroll_region_down(1, fill);
    }

    /// Rotate the scroll region up `n` lines (SU): content moves up, blanks
    /// fill in at the bottom. Never feeds scrollback.
    pub fn scroll_region_up(&mut self, n: usize, fill: &AttributeData) {
        let top_row = self.ybase + self.scroll_top;
        let bottom_row = self.ybase + self.scroll_bottom;
        for _ in 0..n.min(self.scroll_bottom - self.scroll_top + 1) {
            self.lines.splice(top_row, 1, Vec::new());
            self.lines
                .splice(bottom_row, 0, vec![BufferLine::new(self.cols, fill)]);
        }
        self.apply_list_events();
    }

    /// Rotate the scroll region down `n` lines (SD): content moves down,
    /// blanks fill in at the top.
    pub fn scroll_region_down(&mut self, n: usize, fill: &AttributeData) {
        let top_row = self.ybase + self.scroll_top;
        let bottom_row = self.ybase + self.scroll_bottom;
        for _ in 0..n.min(self.scroll_bottom - self.scroll_top + 1) {
            self.lines.splice(bottom_row, 1, Vec::new());
            self.lines
                .splice(top_row, 0, vec![BufferLine::new(self.cols, fill)]);
        }
        self.apply_list_events();
    }

    /// Insert `n` blank lines at viewport row `row` (IL), pushing lines
    /// toward the region bottom.
    pub fn insert_lines(&mut self, row: usize, n: usize, fill: &AttributeData) {
        if row < self.scroll_top || row > self.scroll_bottom {
            return;
        }
        let abs_row = self.ybase + row;
        let abs_bottom = self.ybase + self.scroll_bottom;
        for _ in 0..n.min(self.scroll_bottom - row + 1) {
            self.lines.splice(abs_bottom, 1, Vec::new());
            self.lines
                .splice(abs_row, 0, vec![BufferLine::new(self.cols, fill)]);
        }
        self.apply_list_events();
    }

    /// Delete `n` lines at viewport row `row` (DL), pulling lines up from
    /// the region bottom.
    pub fn delete_lines(&mut self, row: usize, n: usize, fill: &AttributeData) {
        if row < self.scroll_top || row > self.scroll_bottom {
            return;
        }
        let abs_row = self.ybase + row;
        let abs_bottom = self.ybase + self.scroll_bottom;
        for _ in 0..n.min(self.scroll_bottom - row + 1) {
            self.lines.splice(abs_row, 1, Vec::new());
            self.lines
                .splice(abs_bottom, 0, vec![BufferLine::new(self.cols, fill)]);
        }
        self.apply_list_events();
    }

    /// Drop all scrollback lines (ED 3).
    pub fn clear_scrollback(&mut self) {
        if self.ybase > 0 {
            self.lines.splice(0, self.ybase, Vec::new());
            self.ybase = 0;
            self.ydisp = 0;
            self.apply_list_events();
        }
    }

    /// Move the viewport by `delta` lines (negative = into history).
    pub fn scroll_display(&mut self, delta: isize) {
        let ydisp = self.ydisp as isize + delta;
        self.ydisp = ydisp.clamp(0, self.ybase as isize) as usize;
    }

    /// Snap the viewport back to live output.
    pub fn scroll_to_bottom(&mut self) {
        self.ydisp = self.ybase;
    }

    // -------------------------------------------------------------------
    // Markers
    // -------------------------------------------------------------------

    /// Register a marker bound to an absolute line index.
    pub fn add_marker(&mut self, line: usize) -> MarkerId {
        let id = self.next_marker_id;
        self.next_marker_id += 1;
        self.markers.insert(id, line.min(self.lines.len()));
        MarkerId(id)
    }

    /// Current line of a marker; `None` once invalidated.
    #[must_use]
    pub fn marker_line(&self, marker: MarkerId) -> Option<usize> {
        self.markers.get(&marker.0).copied()
    }

    /// Permanently invalidate a marker.
    pub fn dispose_marker(&mut self, marker: MarkerId) {
        self.markers.remove(&marker.0);
    }

    fn apply_list_events(&mut self) {
        for event in self.lines.drain_events() {
            match event {
                ListEvent::Trim(n) => {
                    self.markers.retain(|_, line| {
                        if *line < n {
                            false
                        } else {
                            *line -= n;
                            true
                        }
                    });
                }
                ListEvent::Insert { index, count } => {
                    for line in self.markers.values_mut() {
                        if *line >= index {
                            *line += count;
                        }
                    }
                }
                ListEvent::Delete { index, count } => {
                    self.markers.retain(|_, line| {
                        if *line >= index + count {
                            *line -= count;
                            true
                        } else {
                            *line < index
                        }
                    });
                }
            }
        }
    }

    // -------------------------------------------------------------------
    // Resize
    // -------------------------------------------------------------------

    /// Resize to a new geometry, optionally reflowing wrapped lines when
    /// the column count changes.
    pub fn resize(
        &mut self,
        new_cols: usize,
        new_rows: usize,
        scrollback: usize,
        reflow: bool,
        fill: &AttributeData,
    ) {
        let new_cols = new_cols.max(1);
        let new_rows = new_rows.max(1);
        let old_cols = self.cols;
        let new_max = if self.has_scrollback {
            new_rows + scrollback
        } else {
            new_rows
        };

        // Grow capacity first so the row adjustments below have room.
        if new_max > self.lines.max_length() {
            self.lines.set_max_length(new_max);
        }

        // Re-wrap while lines still carry the old width; shrinking after
        // the per-line resize would have already truncated the content.
        if reflow && self.has_scrollback && new_cols != old_cols {
            reflow::reflow(self, new_cols, fill);
        }

        // Column change: every line adopts the new width.
        if new_cols != old_cols {
            for index in 0..self.lines.len() {
                if let Some(line) = self.lines.get_mut(index) {
                    line.resize(new_cols, fill);
                }
            }
            resize_tab_stops(&mut self.tab_stops, new_cols);
            self.cols = new_cols;
        }

        // Row growth: reveal scrollback under the cursor before appending
        // blank lines, keeping the visually scrolled position stable. The
        // cursor rides its absolute line while the viewport slides up.
        while self.lines.len() < self.ybase + new_rows {
            if self.ybase > 0 && self.lines.len() <= self.ybase + self.y + 1 {
                self.ybase -= 1;
                self.y += 1;
                if self.ydisp > 0 {
                    self.ydisp -= 1;
                }
            } else {
                self.lines.push(BufferLine::new(new_cols, fill));
            }
        }

        // Row shrink: drop blank lines below the cursor, otherwise push the
        // top of the viewport into scrollback.
        if new_rows < self.rows {
            for _ in 0..self.rows - new_rows {
                if self.lines.len() > self.ybase + new_rows {
                    if self.lines.len() > self.ybase + self.y + 1 {
                        self.lines.pop();
                    } else {
                        self.ybase += 1;
                        if self.ydisp == self.ybase - 1 {
                            self.ydisp = self.ybase;
                        }
                    }
                }
            }
        }
        self.rows = new_rows;

        // Shrink capacity last; explicit ybase/ydisp compensation.
        if new_max < self.lines.max_length() {
            let before = self.lines.len();
            self.lines.set_max_length(new_max);
            let trimmed = before - self.lines.len();
            self.ybase = self.ybase.saturating_sub(trimmed);
            self.ydisp = self.ydisp.min(self.ybase);
        }

        self.scroll_top = 0;
        self.scroll_bottom = new_rows - 1;
        if let Some(saved) = &mut self.saved_cursor {
            saved.x = saved.x.min(new_cols - 1);
            saved.y = saved.y.min(new_rows - 1);
        }
        self.clamp();
        self.apply_list_events();
    }

    /// Reset lines/cursor to a blank screen (RIS, alt-buffer entry).
    pub fn clear_all(&mut self, fill: &AttributeData) {
        for y in 0..self.rows {
            if let Some(line) = self.lines.get_mut(self.ybase + y) {
                *line = BufferLine::new(self.cols, fill);
            }
        }
        self.x = 0;
        self.y = 0;
    }
}

/// Default tab stops: every 8 columns.
fn default_tab_stops(cols: usize) -> Vec<bool> {
    (0..cols).map(|c| c > 0 && c % 8 == 0).collect()
}

/// Preserve existing stops, extend with defaults, truncate on shrink.
fn resize_tab_stops(tab_stops: &mut Vec<bool>, cols: usize) {
    let old = tab_stops.len();
    if cols < old {
        tab_stops.truncate(cols);
    } else {
        tab_stops.extend((old..cols).map(|c| c > 0 && c % 8 == 0));
    }
}

/// The normal/alternate buffer pair; exactly one is active.
#[derive(Debug)]
pub struct BufferSet {
    normal: Buffer,
    alt: Buffer,
    alt_active: bool,
}

impl BufferSet {
    /// Create the buffer pair.
    #[must_use]
    pub fn new(rows: usize, cols: usize, scrollback: usize) -> Self {
        Self {
            normal: Buffer::new(rows, cols, scrollback, true),
            alt: Buffer::new(rows, cols, 0, false),
            alt_active: false,
        }
    }

    /// The buffer all operations currently apply to.
    #[must_use]
    pub fn active(&self) -> &Buffer {
        if self.alt_active {
            &self.alt
        } else {
            &self.normal
        }
    }

    /// Mutable active buffer.
    pub fn active_mut(&mut self) -> &mut Buffer {
        if self.alt_active {
            &mut self.alt
        } else {
            &mut self.normal
        }
    }

    /// The normal (scrollback-backed) buffer.
    #[must_use]
    pub fn normal(&self) -> &Buffer {
        &self.normal
    }

    /// Mutable normal buffer.
    pub fn normal_mut(&mut self) -> &mut Buffer {
        &mut self.normal
    }

    /// Whether the alternate buffer is active.
    #[must_use]
    pub fn is_alt(&self) -> bool {
        self.alt_active
    }

    /// Switch to the alternate buffer, clearing it.
    pub fn activate_alt(&mut self, fill: &AttributeData) {
        if self.alt_active {
            return;
        }
        self.alt.clear_all(fill);
        self.alt.x = self.normal.x;
        self.alt.y = self.normal.y;
        self.alt_active = true;
    }

    /// Switch back to the normal buffer.
    pub fn activate_normal(&mut self) {
        self.alt_active = false;
    }

    /// Resize both buffers.
    pub fn resize(
        &mut self,
        cols: usize,
        rows: usize,
        scrollback: usize,
        reflow: bool,
        fill: &AttributeData,
    ) {
        self.normal.resize(cols, rows, scrollback, reflow, fill);
        self.alt.resize(cols, rows, 0, false, fill);
    }
}
