//! Cell and line storage.
//!
//! A cell is three packed 32-bit words (content + the two attribute words).
//! Combined characters (base + joining marks) and extended attributes are
//! rare, so they live in sparse side maps keyed by column instead of
//! widening every cell.

use std::sync::Arc;

use rustc_hash::FxHashMap;

use super::attr::{bg_flags, content, AttributeData, ExtendedAttrs};

/// One screen position: packed content word plus the two attribute words.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(C)]
pub struct Cell {
    /// Code point, combined flag, and width (see [`content`]).
    pub content: u32,
    /// Foreground attribute word.
    pub fg: u32,
    /// Background attribute word.
    pub bg: u32,
}

impl Cell {
    /// A blank width-1 cell carrying the given fill attributes.
    #[must_use]
    pub fn blank(attr: &AttributeData) -> Self {
        Self {
            content: 1 << content::WIDTH_SHIFT,
            fg: attr.fg,
            bg: attr.bg,
        }
    }

    /// The stored code point (0 for blanks, combined cells and continuations).
    #[must_use]
    #[inline]
    pub fn codepoint(&self) -> u32 {
        self.content & content::CODEPOINT_MASK
    }

    /// Display width: 0 (wide continuation), 1, or 2.
    #[must_use]
    #[inline]
    pub fn width(&self) -> u8 {
        ((self.content & content::WIDTH_MASK) >> content::WIDTH_SHIFT) as u8
    }

    /// Whether the text lives in the line's combined side table.
    #[must_use]
    #[inline]
    pub fn is_combined(&self) -> bool {
        self.content & content::IS_COMBINED != 0
    }

    /// Whether this cell holds no text at all.
    #[must_use]
    #[inline]
    pub fn is_blank(&self) -> bool {
        self.codepoint() == 0 && !self.is_combined()
    }

    /// Whether the PROTECTED bit (DECSCA) is set.
    #[must_use]
    #[inline]
    pub fn is_protected(&self) -> bool {
        self.bg & bg_flags::PROTECTED != 0
    }
}

/// A cell extracted with its side-table state; the unit reflow moves around.
#[derive(Debug, Clone)]
pub struct OwnedCell {
    pub cell: Cell,
    pub combined: Option<String>,
    pub extended: Option<Arc<ExtendedAttrs>>,
}

/// Caller-owned cell record filled by [`BufferLine::load_cell`] so renderers
/// can read attribute-resolved cells without allocating.
#[derive(Debug, Clone, Default)]
pub struct CellData {
    /// Packed content word.
    pub content: u32,
    /// Foreground attribute word.
    pub fg: u32,
    /// Background attribute word.
    pub bg: u32,
    /// Extended attributes, if attached.
    pub extended: Option<Arc<ExtendedAttrs>>,
    combined: String,
    char_buf: [u8; 4],
    char_len: u8,
}

impl CellData {
    /// The stored code point.
    #[must_use]
    pub fn codepoint(&self) -> u32 {
        self.content & content::CODEPOINT_MASK
    }

    /// Display width of this cell.
    #[must_use]
    pub fn width(&self) -> u8 {
        ((self.content & content::WIDTH_MASK) >> content::WIDTH_SHIFT) as u8
    }

    /// Whether the cell text is a combined string.
    #[must_use]
    pub fn is_combined(&self) -> bool {
        self.content & content::IS_COMBINED != 0
    }

    /// The cell text ("" for blanks and wide continuations).
    #[must_use]
    pub fn text(&self) -> &str {
        if self.is_combined() {
            &self.combined
        } else {
            std::str::from_utf8(&self.char_buf[..usize::from(self.char_len)]).unwrap_or("")
        }
    }

    /// The attribute state of this cell (cheap; shares the extended record).
    #[must_use]
    pub fn attrs(&self) -> AttributeData {
        AttributeData {
            fg: self.fg,
            bg: self.bg,
            extended: self.extended.clone(),
        }
    }
}

/// A single buffer row: fixed-length cell array plus sparse side maps.
#[derive(Debug, Clone, Default)]
pub struct BufferLine {
    cells: Vec<Cell>,
    combined: FxHashMap<u16, String>,
    extended: FxHashMap<u16, Arc<ExtendedAttrs>>,
    /// True when this row is the soft-wrap continuation of the row above.
    is_wrapped: bool,
}

impl BufferLine {
    /// Create a line of `cols` blank cells with the given fill attributes.
    #[must_use]
    pub fn new(cols: usize, fill: &AttributeData) -> Self {
        Self {
            cells: vec![Cell::blank(fill); cols],
            combined: FxHashMap::default(),
            extended: FxHashMap::default(),
            is_wrapped: false,
        }
    }

    /// Number of columns.
    #[must_use]
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    /// Whether the line has zero columns.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Soft-wrap flag: this row continues the row above.
    #[must_use]
    pub fn is_wrapped(&self) -> bool {
        self.is_wrapped
    }

    /// Set the soft-wrap flag.
    pub fn set_wrapped(&mut self, wrapped: bool) {
        self.is_wrapped = wrapped;
    }

    /// Raw cell access.
    #[must_use]
    pub fn cell(&self, col: usize) -> Option<&Cell> {
        self.cells.get(col)
    }

    /// Fill a caller-owned [`CellData`] from the cell at `col`.
    ///
    /// Returns false (leaving `out` untouched) when `col` is out of range.
    pub fn load_cell(&self, col: usize, out: &mut CellData) -> bool {
        let Some(cell) = self.cells.get(col) else {
            return false;
        };
        out.content = cell.content;
        out.fg = cell.fg;
        out.bg = cell.bg;
        let col16 = col as u16;
        out.extended = self.extended.get(&col16).cloned();
        out.combined.clear();
        out.char_len = 0;
        if cell.is_combined() {
            if let Some(text) = self.combined.get(&col16) {
                out.combined.push_str(text);
            }
        } else if cell.codepoint() != 0 {
            if let Some(c) = char::from_u32(cell.codepoint()) {
                out.char_len = c.encode_utf8(&mut out.char_buf).len() as u8;
            }
        }
        true
    }

    /// Write a single-code-point cell.
    pub fn put_char(&mut self, col: usize, cp: u32, width: u8, attr: &AttributeData) {
        if col >= self.cells.len() {
            return;
        }
        self.cells[col] = Cell {
            content: (cp & content::CODEPOINT_MASK)
                | (u32::from(width.min(2)) << content::WIDTH_SHIFT),
            fg: attr.fg,
            bg: attr.bg,
        };
        self.store_extras(col, attr, None);
    }

    /// Write a combined-text cell (base character plus joining marks).
    pub fn put_combined(&mut self, col: usize, text: &str, width: u8, attr: &AttributeData) {
        if col >= self.cells.len() {
            return;
        }
        self.cells[col] = Cell {
            content: content::IS_COMBINED | (u32::from(width.min(2)) << content::WIDTH_SHIFT),
            fg: attr.fg,
            bg: attr.bg,
        };
        self.store_extras(col, attr, Some(text));
    }

    /// Append a joining mark to the cell at `col`, upgrading it to combined.
    pub fn append_combining(&mut self, col: usize, ch: char) {
        let Some(cell) = self.cells.get_mut(col) else {
            return;
        };
        let col16 = col as u16;
        if cell.is_combined() {
            self.combined.entry(col16).or_default().push(ch);
            return;
        }
        let mut text = String::new();
        if let Some(base) = char::from_u32(cell.codepoint()) {
            if cell.codepoint() != 0 {
                text.push(base);
            }
        }
        text.push(ch);
        cell.content = content::IS_COMBINED | (cell.content & content::WIDTH_MASK);
        self.combined.insert(col16, text);
    }

    /// Write the continuation placeholder of a wide character.
    pub fn put_wide_trailer(&mut self, col: usize, attr: &AttributeData) {
        if col >= self.cells.len() {
            return;
        }
        self.cells[col] = Cell {
            content: 0,
            fg: attr.fg,
            bg: attr.bg,
        };
        self.clear_extras(col);
    }

    /// Blank one cell with erase attributes.
    pub fn erase_cell(&mut self, col: usize, erase_attr: &AttributeData) {
        if col >= self.cells.len() {
            return;
        }
        self.cells[col] = Cell::blank(erase_attr);
        self.clear_extras(col);
    }

    /// Blank `[start, end)` with erase attributes; with `respect_protected`
    /// cells carrying the DECSCA bit survive.
    pub fn fill_range(
        &mut self,
        start: usize,
        end: usize,
        erase_attr: &AttributeData,
        respect_protected: bool,
    ) {
        let end = end.min(self.cells.len());
        for col in start..end {
            if respect_protected && self.cells[col].is_protected() {
                continue;
            }
            self.erase_cell(col, erase_attr);
        }
        if start < end {
            self.fix_wide_boundary(start, erase_attr);
        }
    }

    /// Insert `n` blank cells at `col`, shifting the rest right (ICH).
    pub fn insert_cells(&mut self, col: usize, n: usize, fill: &AttributeData) {
        let cols = self.cells.len();
        if col >= cols || n == 0 {
            return;
        }
        self.split_wide_at(col, fill);
        let n = n.min(cols - col);
        for src in (col..cols - n).rev() {
            self.cells[src + n] = self.cells[src];
            self.move_extras(src, src + n);
        }
        for c in col..col + n {
            self.cells[c] = Cell::blank(fill);
            self.clear_extras(c);
        }
        self.fix_line_end(fill);
    }

    /// Delete `n` cells at `col`, shifting the rest left and filling the
    /// tail with blanks (DCH).
    pub fn delete_cells(&mut self, col: usize, n: usize, fill: &AttributeData) {
        let cols = self.cells.len();
        if col >= cols || n == 0 {
            return;
        }
        self.split_wide_at(col, fill);
        let n = n.min(cols - col);
        for src in col + n..cols {
            self.cells[src - n] = self.cells[src];
            self.move_extras(src, src - n);
        }
        for c in cols - n..cols {
            self.cells[c] = Cell::blank(fill);
            self.clear_extras(c);
        }
        // Deleting may have pulled a continuation to `col` without its lead.
        if self.cells[col].width() == 0 && (col == 0 || self.cells[col - 1].width() != 2) {
            self.cells[col] = Cell::blank(fill);
            self.clear_extras(col);
        }
    }

    /// Grow or shrink to `cols`, filling new cells with `fill`.
    pub fn resize(&mut self, cols: usize, fill: &AttributeData) {
        if cols == self.cells.len() {
            return;
        }
        if cols < self.cells.len() {
            self.cells.truncate(cols);
            self.combined.retain(|&c, _| usize::from(c) < cols);
            self.extended.retain(|&c, _| usize::from(c) < cols);
            // A wide character cut in half at the new edge collapses.
            if let Some(last) = self.cells.last() {
                if last.width() == 2 {
                    let col = cols - 1;
                    self.cells[col] = Cell::blank(fill);
                    self.clear_extras(col);
                }
            }
        } else {
            self.cells.resize(cols, Cell::blank(fill));
        }
    }

    /// Columns up to and including the last cell with text.
    #[must_use]
    pub fn trimmed_length(&self) -> usize {
        for col in (0..self.cells.len()).rev() {
            let cell = &self.cells[col];
            if cell.codepoint() != 0 || cell.is_combined() {
                return col + usize::from(cell.width().max(1));
            }
        }
        0
    }

    /// Translate a column range to its text content.
    ///
    /// Wide-character continuations are skipped; blank cells read as spaces.
    /// With `trim_right`, trailing blanks are dropped.
    #[must_use]
    pub fn translate_to_string(&self, trim_right: bool, start: usize, end: usize) -> String {
        let end = if trim_right {
            end.min(self.trimmed_length())
        } else {
            end.min(self.cells.len())
        };
        let mut out = String::new();
        let mut col = start;
        while col < end {
            let cell = &self.cells[col];
            if cell.width() == 0 {
                col += 1;
                continue;
            }
            if cell.is_combined() {
                if let Some(text) = self.combined.get(&(col as u16)) {
                    out.push_str(text);
                }
            } else if let Some(c) = char::from_u32(cell.codepoint()) {
                out.push(if cell.codepoint() == 0 { ' ' } else { c });
            }
            col += usize::from(cell.width().max(1));
        }
        out
    }

    /// Extract `[start, end)` as owned cells (for reflow).
    #[must_use]
    pub fn export_cells(&self, start: usize, end: usize) -> Vec<OwnedCell> {
        let end = end.min(self.cells.len());
        (start..end)
            .map(|col| OwnedCell {
                cell: self.cells[col],
                combined: self.combined.get(&(col as u16)).cloned(),
                extended: self.extended.get(&(col as u16)).cloned(),
            })
            .collect()
    }

    /// Overwrite this line from owned cells, blank-filling the remainder.
    pub fn restore_cells(&mut self, source: &[OwnedCell], fill: &AttributeData) {
        let cols = self.cells.len();
        self.combined.clear();
        self.extended.clear();
        for col in 0..cols {
            if let Some(owned) = source.get(col) {
                self.cells[col] = owned.cell;
                if let Some(text) = &owned.combined {
                    self.combined.insert(col as u16, text.clone());
                }
                if let Some(ext) = &owned.extended {
                    self.extended.insert(col as u16, ext.clone());
                }
            } else {
                self.cells[col] = Cell::blank(fill);
            }
        }
        self.fix_line_end(fill);
    }

    fn store_extras(&mut self, col: usize, attr: &AttributeData, combined: Option<&str>) {
        let col16 = col as u16;
        match combined {
            Some(text) => {
                self.combined.insert(col16, text.to_string());
            }
            None => {
                self.combined.remove(&col16);
            }
        }
        match (&attr.extended, attr.has_extended()) {
            (Some(ext), true) => {
                self.extended.insert(col16, ext.clone());
            }
            _ => {
                self.extended.remove(&col16);
            }
        }
    }

    fn clear_extras(&mut self, col: usize) {
        let col16 = col as u16;
        self.combined.remove(&col16);
        self.extended.remove(&col16);
    }

    fn move_extras(&mut self, from: usize, to: usize) {
        let from16 = from as u16;
        let to16 = to as u16;
        match self.combined.remove(&from16) {
            Some(text) => {
                self.combined.insert(to16, text);
            }
            None => {
                self.combined.remove(&to16);
            }
        }
        match self.extended.remove(&from16) {
            Some(ext) => {
                self.extended.insert(to16, ext);
            }
            None => {
                self.extended.remove(&to16);
            }
        }
    }

    /// Overwriting `col` must not leave half a wide character behind.
    pub fn split_wide_at(&mut self, col: usize, fill: &AttributeData) {
        if col < self.cells.len() && self.cells[col].width() == 0 && col > 0 {
            if self.cells[col - 1].width() == 2 {
                self.cells[col - 1] = Cell::blank(fill);
                self.clear_extras(col - 1);
            }
        }
        if col < self.cells.len() && self.cells[col].width() == 2 {
            if col + 1 < self.cells.len() && self.cells[col + 1].width() == 0 {
                self.cells[col + 1] = Cell::blank(fill);
                self.clear_extras(col + 1);
            }
        }
    }

    fn fix_wide_boundary(&mut self, start: usize, fill: &AttributeData) {
        // Erasing from `start` may have orphaned a lead cell just before it.
        if start > 0 && start <= self.cells.len() {
            if self.cells[start - 1].width() == 2 {
                self.cells[start - 1] = Cell::blank(fill);
                self.clear_extras(start - 1);
            }
        }
    }

    fn fix_line_end(&mut self, fill: &AttributeData) {
        if let Some(last) = self.cells.last() {
            if last.width() == 2 {
                let col = self.cells.len() - 1;
                self.cells[col] = Cell::blank(fill);
                self.clear_extras(col);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attr() -> AttributeData {
        AttributeData::new()
    }

    fn line_text(line: &BufferLine) -> String {
        line.translate_to_string(true, 0, line.len())
    }

    fn put_str(line: &mut BufferLine, start: usize, text: &str) {
        let a = attr();
        for (i, c) in text.chars().enumerate() {
            line.put_char(start + i, u32::from(c), 1, &a);
        }
    }

    #[test]
    fn new_line_is_blank_width_one() {
        let line = BufferLine::new(10, &attr());
        assert_eq!(line.len(), 10);
        assert_eq!(line.cell(0).unwrap().width(), 1);
        assert_eq!(line.trimmed_length(), 0);
        assert_eq!(line_text(&line), "");
    }

    #[test]
    fn put_and_load_round_trip() {
        let mut line = BufferLine::new(10, &attr());
        let mut a = attr();
        a.set_fg_p16(1);
        line.put_char(3, u32::from('x'), 1, &a);

        let mut cell = CellData::default();
        assert!(line.load_cell(3, &mut cell));
        assert_eq!(cell.text(), "x");
        assert_eq!(cell.width(), 1);
        assert_eq!(cell.fg, a.fg);
        assert!(!line.load_cell(10, &mut cell));
    }

    #[test]
    fn wide_char_occupies_two_cells() {
        let mut line = BufferLine::new(10, &attr());
        let a = attr();
        line.put_char(0, 0x4E2D, 2, &a);
        line.put_wide_trailer(1, &a);
        assert_eq!(line.cell(0).unwrap().width(), 2);
        assert_eq!(line.cell(1).unwrap().width(), 0);
        assert_eq!(line.trimmed_length(), 2);
        assert_eq!(line_text(&line), "中");
    }

    #[test]
    fn combined_text_round_trips() {
        let mut line = BufferLine::new(5, &attr());
        let a = attr();
        line.put_char(0, u32::from('e'), 1, &a);
        line.append_combining(0, '\u{0301}');
        let mut cell = CellData::default();
        line.load_cell(0, &mut cell);
        assert!(cell.is_combined());
        assert_eq!(cell.text(), "e\u{0301}");
        assert_eq!(line_text(&line), "e\u{0301}");
    }

    #[test]
    fn insert_cells_shifts_and_drops_overflow() {
        let mut line = BufferLine::new(5, &attr());
        put_str(&mut line, 0, "abcde");
        line.insert_cells(1, 2, &attr());
        assert_eq!(line_text(&line), "a  bc");
    }

    #[test]
    fn delete_cells_shifts_left() {
        let mut line = BufferLine::new(5, &attr());
        put_str(&mut line, 0, "abcde");
        line.delete_cells(1, 2, &attr());
        assert_eq!(line_text(&line), "ade");
    }

    #[test]
    fn extras_follow_shifted_cells() {
        let mut line = BufferLine::new(6, &attr());
        let a = attr();
        line.put_char(2, u32::from('e'), 1, &a);
        line.append_combining(2, '\u{0301}');
        line.insert_cells(0, 1, &a);
        let mut cell = CellData::default();
        line.load_cell(3, &mut cell);
        assert_eq!(cell.text(), "e\u{0301}");
        line.load_cell(2, &mut cell);
        assert!(!cell.is_combined());
    }

    #[test]
    fn fill_range_respects_protected() {
        let mut line = BufferLine::new(4, &attr());
        let mut protected = attr();
        protected.bg |= bg_flags::PROTECTED;
        line.put_char(0, u32::from('a'), 1, &attr());
        line.put_char(1, u32::from('b'), 1, &protected);
        line.fill_range(0, 4, &attr(), true);
        assert_eq!(line_text(&line), " b");
        line.fill_range(0, 4, &attr(), false);
        assert_eq!(line_text(&line), "");
    }

    #[test]
    fn shrink_resize_collapses_cut_wide_char() {
        let mut line = BufferLine::new(4, &attr());
        let a = attr();
        line.put_char(2, 0x4E2D, 2, &a);
        line.put_wide_trailer(3, &a);
        line.resize(3, &a);
        assert_eq!(line.len(), 3);
        assert!(line.cell(2).unwrap().is_blank());
    }

    #[test]
    fn overwrite_half_of_wide_char_blanks_pair() {
        let mut line = BufferLine::new(4, &attr());
        let a = attr();
        line.put_char(0, 0x4E2D, 2, &a);
        line.put_wide_trailer(1, &a);
        line.split_wide_at(1, &a);
        assert!(line.cell(0).unwrap().is_blank());
        line.put_char(1, u32::from('x'), 1, &a);
        assert_eq!(line_text(&line), " x");
    }

    #[test]
    fn export_restore_round_trip() {
        let mut line = BufferLine::new(6, &attr());
        put_str(&mut line, 0, "abc");
        line.append_combining(2, '\u{0308}');
        let cells = line.export_cells(0, line.trimmed_length());

        let mut other = BufferLine::new(6, &attr());
        other.restore_cells(&cells, &attr());
        assert_eq!(line_text(&other), "abc\u{0308}");
    }
}
