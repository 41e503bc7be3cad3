//! End-to-end scenarios through the `Terminal` facade.

use std::cell::RefCell;
use std::rc::Rc;

use crate::buffer::attr::color;
use crate::buffer::line::CellData;
use crate::terminal::{EventListener, Terminal, TerminalOptions};

fn term(cols: usize, rows: usize, scrollback: usize) -> Terminal {
    Terminal::new(TerminalOptions {
        cols,
        rows,
        scrollback,
        reflow_on_resize: true,
    })
}

fn write(term: &mut Terminal, data: &str) {
    term.write_sync(data.as_bytes()).unwrap();
}

#[derive(Default)]
struct CaptureState {
    data: Vec<u8>,
    titles: Vec<String>,
    bells: usize,
    scrolls: Vec<usize>,
    refreshes: Vec<(usize, usize)>,
    resizes: Vec<(usize, usize)>,
}

#[derive(Clone, Default)]
struct Capture(Rc<RefCell<CaptureState>>);

impl EventListener for Capture {
    fn on_title_change(&mut self, title: &str) {
        self.0.borrow_mut().titles.push(title.to_string());
    }
    fn on_bell(&mut self) {
        self.0.borrow_mut().bells += 1;
    }
    fn on_scroll(&mut self, ybase: usize) {
        self.0.borrow_mut().scrolls.push(ybase);
    }
    fn on_refresh_rows(&mut self, start: usize, end: usize) {
        self.0.borrow_mut().refreshes.push((start, end));
    }
    fn on_resize(&mut self, cols: usize, rows: usize) {
        self.0.borrow_mut().resizes.push((cols, rows));
    }
    fn on_data(&mut self, data: &[u8]) {
        self.0.borrow_mut().data.extend_from_slice(data);
    }
}

fn capture(term: &mut Terminal) -> Capture {
    let cap = Capture::default();
    term.set_event_listener(Box::new(cap.clone()));
    cap
}

/// Width invariant: cell widths sum to the line length and every wide lead
/// is followed by its continuation.
fn assert_width_invariant(term: &Terminal) {
    let buffer = term.buffer();
    for index in 0..buffer.total_lines() {
        let line = buffer.line(index).unwrap();
        let mut sum = 0usize;
        for col in 0..line.len() {
            let cell = line.cell(col).unwrap();
            sum += usize::from(cell.width());
            if cell.width() == 2 {
                let next = line.cell(col + 1);
                assert!(
                    next.is_some_and(|c| c.width() == 0),
                    "wide cell at ({index},{col}) missing continuation"
                );
            }
        }
        assert_eq!(sum, line.len(), "width sum mismatch on line {index}");
    }
}

// ===================== spec scenarios =====================

#[test]
fn red_hi_scenario() {
    let mut t = term(80, 24, 1000);
    write(&mut t, "\x1b[31mHi\x1b[0m");

    let mut cell = CellData::default();
    assert!(t.load_cell(0, 0, &mut cell));
    assert_eq!(cell.text(), "H");
    assert_eq!(cell.fg & color::CM_MASK, color::CM_P16);
    assert_eq!(cell.fg & color::COLOR_MASK, 1);
    assert_eq!(cell.bg, 0);

    assert!(t.load_cell(1, 0, &mut cell));
    assert_eq!(cell.text(), "i");
    assert_eq!(cell.fg & color::COLOR_MASK, 1);

    assert_eq!(t.buffer().x, 2);
    assert_eq!(t.buffer().y, 0);

    // Subsequent writes use default attributes again.
    write(&mut t, "x");
    assert!(t.load_cell(2, 0, &mut cell));
    assert_eq!(cell.fg, 0);
    assert_eq!(cell.bg, 0);
}

#[test]
fn line_feeds_feed_scrollback_and_follow() {
    let mut t = term(80, 24, 1000);
    for _ in 0..23 {
        write(&mut t, "\n");
    }
    assert_eq!(t.buffer().ybase, 0);
    assert_eq!(t.buffer().scrollback_lines(), 0);

    // The line feed that pushes past the bottom creates scrollback.
    write(&mut t, "\n");
    assert_eq!(t.buffer().ybase, 1);
    assert_eq!(t.buffer().ydisp, 1, "viewport auto-follows output");
    assert_eq!(t.buffer().scrollback_lines(), 1);
}

#[test]
fn osc8_same_id_two_rows_shares_one_entry() {
    let mut t = term(80, 24, 1000);
    write(&mut t, "\x1b]8;id=abc;http://example.com\x07link");
    write(&mut t, "\x1b]8;;\x07\r\n");
    write(&mut t, "\x1b]8;id=abc;http://example.com\x07more\x1b]8;;\x07");

    let links = t.handler().links();
    assert_eq!(links.len(), 1, "one entry for the shared id");
    let entry = links.entry(1).unwrap();
    assert_eq!(entry.uri, "http://example.com");
    assert_eq!(entry.lines.len(), 2, "covers both rows");

    // The cells carry the link id in their extended attributes.
    let mut cell = CellData::default();
    assert!(t.load_cell(0, 0, &mut cell));
    assert_eq!(cell.extended.as_ref().unwrap().url_id, 1);
    assert!(t.load_cell(0, 1, &mut cell));
    assert_eq!(cell.extended.as_ref().unwrap().url_id, 1);
    // The closed link no longer stamps new cells.
    write(&mut t, "plain");
    assert!(t.load_cell(4, 1, &mut cell));
    assert!(cell.extended.is_none());
}

#[test]
fn sgr_reset_restores_fresh_bit_pattern() {
    let mut t = term(80, 24, 0);
    write(&mut t, "\x1b[1;3;4;31;48;5;100m\x1b[0m");
    assert_eq!(*t.handler().attributes(), Default::default());
}

// ===================== printing =====================

#[test]
fn wraparound_continues_on_wrapped_line() {
    let mut t = term(5, 4, 10);
    write(&mut t, "abcdef");
    assert_eq!(t.row_text(0, true), "abcde");
    assert_eq!(t.row_text(1, true), "f");
    assert!(t.buffer().row(1).unwrap().is_wrapped());
    assert_width_invariant(&t);
}

#[test]
fn wraparound_disabled_overwrites_last_column() {
    let mut t = term(5, 4, 10);
    write(&mut t, "\x1b[?7labcdefgh");
    assert_eq!(t.row_text(0, true), "abcdh");
    assert_eq!(t.row_text(1, true), "");
}

#[test]
fn wide_char_wraps_whole_at_line_end() {
    let mut t = term(5, 4, 10);
    write(&mut t, "abcd中");
    assert_eq!(t.row_text(0, true), "abcd");
    assert_eq!(t.row_text(1, true), "中");
    assert_width_invariant(&t);
}

#[test]
fn combining_mark_joins_previous_cell() {
    let mut t = term(10, 4, 0);
    write(&mut t, "e\u{0301}x");
    assert_eq!(t.row_text(0, true), "e\u{0301}x");
    assert_eq!(t.buffer().x, 2);
}

#[test]
fn insert_mode_shifts_existing_cells() {
    let mut t = term(10, 4, 0);
    write(&mut t, "abc\r\x1b[4hXY\x1b[4l");
    assert_eq!(t.row_text(0, true), "XYabc");
}

#[test]
fn rep_repeats_preceding_character() {
    let mut t = term(10, 4, 0);
    write(&mut t, "ab\x1b[3b");
    assert_eq!(t.row_text(0, true), "abbbb");
}

#[test]
fn dec_graphics_charset_remaps() {
    let mut t = term(10, 4, 0);
    write(&mut t, "\x1b(0qqq\x1b(Bq");
    assert_eq!(t.row_text(0, true), "───q");
}

// ===================== cursor and regions =====================

#[test]
fn cursor_positioning_and_clamping() {
    let mut t = term(10, 4, 0);
    write(&mut t, "\x1b[2;3H");
    assert_eq!((t.buffer().x, t.buffer().y), (2, 1));
    write(&mut t, "\x1b[99;99H");
    assert_eq!((t.buffer().x, t.buffer().y), (9, 3));
    write(&mut t, "\x1b[H");
    assert_eq!((t.buffer().x, t.buffer().y), (0, 0));
}

#[test]
fn scroll_region_confines_line_feeds() {
    let mut t = term(10, 4, 100);
    write(&mut t, "r0\r\nr1\r\nr2\r\nr3");
    write(&mut t, "\x1b[2;3r"); // region rows 1-2 (0-based)
    write(&mut t, "\x1b[3;1H\n"); // LF at region bottom
    assert_eq!(t.row_text(0, true), "r0");
    assert_eq!(t.row_text(1, true), "r2");
    assert_eq!(t.row_text(2, true), "");
    assert_eq!(t.row_text(3, true), "r3");
    assert_eq!(t.buffer().ybase, 0, "region scroll never feeds scrollback");
}

#[test]
fn su_sd_rotate_within_region() {
    let mut t = term(10, 4, 100);
    write(&mut t, "r0\r\nr1\r\nr2\r\nr3");
    write(&mut t, "\x1b[1;2r\x1b[S");
    assert_eq!(t.row_text(0, true), "r1");
    assert_eq!(t.row_text(1, true), "");
    assert_eq!(t.row_text(2, true), "r2");
    write(&mut t, "\x1b[T");
    assert_eq!(t.row_text(0, true), "");
    assert_eq!(t.row_text(1, true), "r1");
}

#[test]
fn origin_mode_offsets_cursor_addressing() {
    let mut t = term(10, 6, 0);
    write(&mut t, "\x1b[2;5r\x1b[?6h\x1b[1;1HX");
    // Row 1 in origin mode is the region top (absolute row 2, index 1).
    assert_eq!(t.row_text(1, true), "X");
    write(&mut t, "\x1b[?6l");
}

#[test]
fn decsc_decrc_round_trip() {
    let mut t = term(10, 4, 0);
    write(&mut t, "\x1b[2;2H\x1b[31m\x1b7");
    write(&mut t, "\x1b[4;8H\x1b[0m\x1b8");
    assert_eq!((t.buffer().x, t.buffer().y), (1, 1));
    assert_eq!(t.handler().attributes().fg_color(), 1);
}

// ===================== erasing =====================

#[test]
fn erase_in_line_variants() {
    let mut t = term(10, 2, 0);
    write(&mut t, "abcdefghij\x1b[1;5H\x1b[K");
    assert_eq!(t.row_text(0, true), "abcd");
    write(&mut t, "\x1b[1;5H\x1b[1K");
    assert_eq!(t.row_text(0, true), "");
}

#[test]
fn erase_uses_background_only() {
    let mut t = term(10, 2, 0);
    // Red fg, blue bg; erase fill must carry only the bg color.
    write(&mut t, "\x1b[31;44mab\x1b[2J");
    let mut cell = CellData::default();
    assert!(t.load_cell(0, 0, &mut cell));
    assert_eq!(cell.fg, 0, "erase attr drops fg and flags");
    assert_eq!(cell.bg & color::CM_MASK, color::CM_P16);
    assert_eq!(cell.bg & color::COLOR_MASK, 4);
}

#[test]
fn selective_erase_respects_protected_cells() {
    let mut t = term(10, 2, 0);
    write(&mut t, "a\x1b[1\"qb\x1b[\"qc");
    write(&mut t, "\x1b[?2J");
    assert_eq!(t.row_text(0, true), " b");
    // Plain ED clears protected cells too.
    write(&mut t, "\x1b[2J");
    assert_eq!(t.row_text(0, true), "");
}

#[test]
fn ed3_clears_scrollback() {
    let mut t = term(10, 2, 100);
    write(&mut t, "a\r\nb\r\nc\r\nd");
    assert!(t.buffer().scrollback_lines() > 0);
    write(&mut t, "\x1b[3J");
    assert_eq!(t.buffer().scrollback_lines(), 0);
    assert_eq!(t.buffer().ydisp, 0);
}

// ===================== alternate screen =====================

#[test]
fn alternate_screen_round_trip() {
    let mut t = term(10, 4, 100);
    write(&mut t, "main\x1b[31m");
    write(&mut t, "\x1b[?1049h");
    assert!(t.handler().buffers().is_alt());
    write(&mut t, "\x1b[Halt");
    assert_eq!(t.row_text(0, true), "alt");
    write(&mut t, "\x1b[?1049l");
    assert!(!t.handler().buffers().is_alt());
    assert_eq!(t.row_text(0, true), "main");
    // Cursor and attributes restored by the 1049 save/restore pair.
    assert_eq!((t.buffer().x, t.buffer().y), (4, 0));
    assert_eq!(t.handler().attributes().fg_color(), 1);
}

// ===================== reports =====================

#[test]
fn cursor_position_report() {
    let mut t = term(80, 24, 0);
    let cap = capture(&mut t);
    write(&mut t, "\x1b[5;10H\x1b[6n");
    assert_eq!(cap.0.borrow().data, b"\x1b[5;10R");
}

#[test]
fn device_attributes_replies() {
    let mut t = term(80, 24, 0);
    let cap = capture(&mut t);
    write(&mut t, "\x1b[c\x1b[>c");
    assert_eq!(cap.0.borrow().data, b"\x1b[?1;2c\x1b[>0;276;0c");
}

#[test]
fn decrqm_reports_tracked_modes() {
    let mut t = term(80, 24, 0);
    let cap = capture(&mut t);
    write(&mut t, "\x1b[?7$p\x1b[?2004$p\x1b[?999$p");
    assert_eq!(
        cap.0.borrow().data,
        b"\x1b[?7;1$y\x1b[?2004;2$y\x1b[?999;0$y"
    );
}

#[test]
fn decrqss_reports_scroll_region_and_sgr() {
    let mut t = term(80, 24, 0);
    let cap = capture(&mut t);
    write(&mut t, "\x1b[3;10r\x1bP$qr\x1b\\");
    assert_eq!(cap.0.borrow().data, b"\x1bP1$r3;10r\x1b\\");
    cap.0.borrow_mut().data.clear();
    write(&mut t, "\x1b[0;1;31m\x1bP$qm\x1b\\");
    assert_eq!(cap.0.borrow().data, b"\x1bP1$r0;1;31m\x1b\\");
}

// ===================== titles and colors =====================

#[test]
fn title_events_and_stack() {
    let mut t = term(80, 24, 0);
    let cap = capture(&mut t);
    write(&mut t, "\x1b]2;First\x07\x1b[22;0t\x1b]2;Second\x07\x1b[23;0t");
    assert_eq!(t.handler().title(), "First");
    assert_eq!(
        cap.0.borrow().titles,
        vec!["First", "Second", "First"]
    );
}

#[test]
fn title_stack_is_bounded() {
    let mut t = term(80, 24, 0);
    write(&mut t, "\x1b]2;T\x07");
    for _ in 0..20 {
        write(&mut t, "\x1b[22;0t");
    }
    for _ in 0..20 {
        write(&mut t, "\x1b[23;0t");
    }
    assert_eq!(t.handler().title(), "T");
}

#[test]
fn palette_set_and_query_round_trip() {
    let mut t = term(80, 24, 0);
    let cap = capture(&mut t);
    write(&mut t, "\x1b]4;1;rgb:12/34/56\x07\x1b]4;1;?\x07");
    assert_eq!(t.handler().palette().get(1), (0x12, 0x34, 0x56));
    assert_eq!(cap.0.borrow().data, b"\x1b]4;1;rgb:1212/3434/5656\x07");
    write(&mut t, "\x1b]104;1\x07");
    assert_eq!(t.handler().palette().get(1), (205, 0, 0));
}

#[test]
fn special_colors_set_query_reset() {
    let mut t = term(80, 24, 0);
    let cap = capture(&mut t);
    write(&mut t, "\x1b]10;#336699\x07\x1b]10;?\x07\x1b]110\x07");
    assert_eq!(cap.0.borrow().data, b"\x1b]10;rgb:3333/6666/9999\x07");
    assert_eq!(t.handler().palette().foreground, (255, 255, 255));
}

// ===================== events and dirty ranges =====================

#[test]
fn bell_scroll_and_refresh_events() {
    let mut t = term(10, 2, 100);
    let cap = capture(&mut t);
    write(&mut t, "\x07");
    assert_eq!(cap.0.borrow().bells, 1);
    write(&mut t, "a\r\nb\r\nc");
    assert!(!cap.0.borrow().scrolls.is_empty());
    assert!(!cap.0.borrow().refreshes.is_empty());
}

#[test]
fn dirty_range_coalesces_per_chunk() {
    let mut t = term(10, 6, 0);
    let cap = capture(&mut t);
    // One chunk touching rows 0 and 3 produces one coalesced refresh.
    write(&mut t, "a\x1b[4;1Hb");
    assert_eq!(cap.0.borrow().refreshes, vec![(0, 3)]);
}

#[test]
fn resize_event_fires_once() {
    let mut t = term(10, 6, 0);
    let cap = capture(&mut t);
    t.resize(20, 10);
    t.resize(20, 10);
    assert_eq!(cap.0.borrow().resizes, vec![(20, 10)]);
    assert_eq!(t.cols(), 20);
    assert_eq!(t.rows(), 10);
}

// ===================== resize and reflow =====================

#[test]
fn reflow_round_trip_preserves_rows() {
    let mut t = term(10, 6, 100);
    write(&mut t, "hello\r\nworld wide\r\nx");
    write(&mut t, "\x1b[6;1H"); // park the cursor on a blank row
    let before: Vec<String> = (0..6).map(|r| t.row_text(r, true)).collect();
    t.resize(7, 6);
    t.resize(10, 6);
    let after: Vec<String> = (0..6).map(|r| t.row_text(r, true)).collect();
    assert_eq!(after, before);
    assert_width_invariant(&t);
}

#[test]
fn resize_keeps_ring_capacity_bounds() {
    let mut t = term(10, 4, 10);
    for i in 0..30 {
        write(&mut t, &format!("line{i}\r\n"));
    }
    t.resize(10, 2);
    let buffer = t.buffer();
    assert!(buffer.total_lines() <= 2 + 10);
    assert!(buffer.total_lines() >= 2);
    t.resize(10, 8);
    assert!(t.buffer().total_lines() <= 8 + 10);
}

#[test]
fn mode_flags_are_queryable() {
    let mut t = term(10, 4, 0);
    write(&mut t, "\x1b[?2004h\x1b[?1h\x1b[4h");
    assert!(t.handler().dec_modes().bracketed_paste);
    assert!(t.handler().dec_modes().application_cursor_keys);
    assert!(t.handler().modes().insert);
    write(&mut t, "\x1b[?2004l\x1b[?1l\x1b[4l");
    assert!(!t.handler().dec_modes().bracketed_paste);
    assert!(!t.handler().modes().insert);
}

#[test]
fn unknown_sequences_are_swallowed() {
    let mut t = term(10, 4, 0);
    // Unknown CSI final, unknown OSC ident, unknown ESC: stream continues.
    write(&mut t, "a\x1b[99~b\x1b]7777;x\x07c\x1b Fd");
    assert_eq!(t.row_text(0, true), "abcd");
}

#[test]
fn full_reset_clears_screen_and_modes() {
    let mut t = term(10, 4, 100);
    write(&mut t, "text\x1b[31m\x1b[?6h\x1bc");
    assert_eq!(t.row_text(0, true), "");
    assert_eq!(*t.handler().attributes(), Default::default());
    assert!(!t.handler().dec_modes().origin);
}
