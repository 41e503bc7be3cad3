//! Column reflow: re-wrap soft-wrapped line groups on width change.
//!
//! A wrapped group is a line plus every following line flagged `is_wrapped`.
//! On resize the group's trimmed content is re-packed greedily into
//! `new_cols`-wide segments — growing widths pack into fewer lines, shrinking
//! widths spill into more — with two hard rules: a 2-column glyph never
//! splits across a boundary (it moves whole to the next segment), and the
//! group holding the cursor's absolute row is never touched, so live edit
//! state cannot be corrupted. Trailing empty wrapped lines disappear as a
//! side effect of trimming.
//!
//! `ybase`, `ydisp`, the cursor and all markers are compensated so the
//! visually scrolled position stays stable, then the ring is re-trimmed to
//! capacity.

use super::attr::AttributeData;
use super::line::{BufferLine, OwnedCell};
use super::Buffer;

/// Old-index to new-index mapping for one wrapped group.
struct GroupMap {
    old_start: usize,
    old_len: usize,
    new_start: usize,
    new_len: usize,
}

/// Re-wrap every non-cursor group of `buffer` to `new_cols`.
///
/// Called before the per-line width resize: lines still carry their old
/// width, so shrinking loses nothing. Rebuilt lines come out at `new_cols`.
pub(super) fn reflow(buffer: &mut Buffer, new_cols: usize, fill: &AttributeData) {
    let old_total = buffer.lines.len();
    let cursor_abs = buffer.ybase + buffer.y;
    let follow = buffer.ydisp == buffer.ybase;

    let mut groups: Vec<GroupMap> = Vec::new();
    let mut new_lines: Vec<BufferLine> = Vec::with_capacity(old_total);

    let mut i = 0;
    while i < old_total {
        let start = i;
        i += 1;
        while i < old_total && buffer.lines.get(i).is_some_and(BufferLine::is_wrapped) {
            i += 1;
        }
        let end = i;
        let new_start = new_lines.len();

        let contains_cursor = (start..end).contains(&cursor_abs);
        let single_fitting = end - start == 1
            && buffer
                .lines
                .get(start)
                .is_some_and(|l| l.trimmed_length() <= new_cols);

        if contains_cursor || single_fitting {
            for idx in start..end {
                if let Some(line) = buffer.lines.get(idx) {
                    new_lines.push(line.clone());
                }
            }
        } else {
            rewrap_group(buffer, start, end, new_cols, fill, &mut new_lines);
        }

        groups.push(GroupMap {
            old_start: start,
            old_len: end - start,
            new_start,
            new_len: new_lines.len() - new_start,
        });
    }

    let built_fallback = new_lines.len().saturating_sub(1);
    let mut new_cursor_abs = map_old_index(&groups, cursor_abs, built_fallback);
    let mut new_ydisp = if follow {
        usize::MAX
    } else {
        map_old_index(&groups, buffer.ydisp, built_fallback)
    };

    // Keep the cursor's viewport row; run out of history and the cursor
    // slides up instead.
    let mut new_ybase = new_cursor_abs.saturating_sub(buffer.y);

    // The viewport must stay fully backed by lines.
    while new_lines.len() < new_ybase + buffer.rows {
        new_lines.push(BufferLine::new(new_cols, fill));
    }

    // Re-trim to ring capacity.
    let max_length = buffer.lines.max_length();
    let trimmed = new_lines.len().saturating_sub(max_length);
    if trimmed > 0 {
        new_lines.drain(..trimmed);
        new_ybase = new_ybase.saturating_sub(trimmed);
        new_cursor_abs = new_cursor_abs.saturating_sub(trimmed);
    }

    // Swap the rebuilt store in and fix up positions.
    let mut lines = super::circular::CircularList::new(max_length);
    for line in new_lines {
        lines.push(line);
    }
    lines.clear_events();
    buffer.lines = lines;

    buffer.ybase = new_ybase;
    buffer.y = new_cursor_abs.saturating_sub(new_ybase);
    buffer.ydisp = if follow {
        new_ybase
    } else {
        new_ydisp = new_ydisp.saturating_sub(trimmed);
        new_ydisp.min(new_ybase)
    };

    // Markers ride their group; lines trimmed away invalidate them.
    let remapped: Vec<(u64, Option<usize>)> = buffer
        .markers
        .iter()
        .map(|(&id, &line)| {
            let mapped = map_old_index(&groups, line, built_fallback);
            if mapped < trimmed {
                (id, None)
            } else {
                (id, Some(mapped - trimmed))
            }
        })
        .collect();
    for (id, line) in remapped {
        match line {
            Some(line) => {
                buffer.markers.insert(id, line);
            }
            None => {
                buffer.markers.remove(&id);
            }
        }
    }
}

/// Map an old absolute line index through the group table.
fn map_old_index(groups: &[GroupMap], old: usize, fallback: usize) -> usize {
    for g in groups {
        if old >= g.old_start && old < g.old_start + g.old_len {
            return g.new_start + (old - g.old_start).min(g.new_len.saturating_sub(1));
        }
    }
    fallback
}

/// Gather one group's trimmed content and re-pack it into `new_cols`-wide
/// segments.
fn rewrap_group(
    buffer: &Buffer,
    start: usize,
    end: usize,
    new_cols: usize,
    fill: &AttributeData,
    out: &mut Vec<BufferLine>,
) {
    let mut cells: Vec<OwnedCell> = Vec::new();
    for idx in start..end {
        if let Some(line) = buffer.lines.get(idx) {
            cells.extend(line.export_cells(0, line.trimmed_length()));
        }
    }

    if cells.is_empty() {
        out.push(BufferLine::new(new_cols, fill));
        return;
    }

    let mut pos = 0;
    let mut first = true;
    while pos < cells.len() {
        let mut take = new_cols.min(cells.len() - pos);
        // A wide glyph may not straddle the boundary: if the first cell of
        // the next segment would be its continuation, move the glyph whole.
        if pos + take < cells.len() && cells[pos + take].cell.width() == 0 && take > 1 {
            take -= 1;
        }
        let mut line = BufferLine::new(new_cols, fill);
        line.restore_cells(&cells[pos..pos + take], fill);
        line.set_wrapped(!first);
        out.push(line);
        first = false;
        pos += take;
    }
}
