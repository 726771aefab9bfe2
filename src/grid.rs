//! Character + attribute buffer for one terminal screen, plus scrollback.
//!
//! This is pure state: no I/O, no knowledge of PTYs or escape sequences.
//! The [`crate::parser`] module drives it from a decoded byte stream.

/// 32-entry DEC Special Graphics translation table for UTF-8/UCS-2 mode,
/// indexed by `code - 0x60`. Index 0x11 (code 0x71, ASCII `q`) is the
/// horizontal line glyph used by `scan line 5` box drawing, matching the
/// reference device's ROM font.
const GRAPHICS_TABLE_WIDE: [u16; 32] = [
    0x25C6, // ` -> diamond
    0x2592, // a -> checkerboard
    0x2409, // b -> HT
    0x240C, // c -> FF
    0x240D, // d -> CR
    0x240A, // e -> LF
    0x00B0, // f -> degree
    0x00B1, // g -> plus/minus
    0x2424, // h -> NL
    0x240B, // i -> VT
    0x2518, // j -> lower right corner
    0x2510, // k -> upper right corner
    0x250C, // l -> upper left corner
    0x2514, // m -> lower left corner
    0x253C, // n -> crossing lines
    0x23BA, // o -> scan line 1
    0x23BB, // p -> scan line 3
    0x2500, // q -> horizontal line (scan line 5)
    0x23BC, // r -> scan line 7
    0x23BD, // s -> scan line 9
    0x251C, // t -> left tee
    0x2524, // u -> right tee
    0x2534, // v -> bottom tee
    0x252C, // w -> top tee
    0x2502, // x -> vertical line
    0x2264, // y -> less-or-equal
    0x2265, // z -> greater-or-equal
    0x03C0, // { -> pi
    0x2260, // | -> not equal
    0x00A3, // } -> pound sterling
    0x00B7, // ~ -> centered dot
    0x007F, // unused (DEL range)
];

/// Same 32 glyphs as [`GRAPHICS_TABLE_WIDE`], but as single-byte codepage
/// codes for 8-bit (non-UTF-8) mode. Entries with no representable glyph in
/// the reference codepage fall back to `?`, matching the original firmware's
/// `special[]` table.
const GRAPHICS_TABLE_NARROW: [u16; 32] = [
    0x3F, // ` -> diamond (unrepresentable)
    0xB1, // a -> checkerboard
    0x3F, // b -> HT (unrepresentable)
    0x3F, // c -> FF (unrepresentable)
    0x3F, // d -> CR (unrepresentable)
    0x3F, // e -> LF (unrepresentable)
    0xF8, // f -> degree
    0xF1, // g -> plus/minus
    0x3F, // h -> NL (unrepresentable)
    0x3F, // i -> VT (unrepresentable)
    0xD9, // j -> lower right corner
    0xBF, // k -> upper right corner
    0xDA, // l -> upper left corner
    0xC0, // m -> lower left corner
    0xC5, // n -> crossing lines
    0x3F, // o -> scan line 1 (unrepresentable)
    0x3F, // p -> scan line 3 (unrepresentable)
    0xC4, // q -> horizontal line (scan line 5)
    0x3F, // r -> scan line 7 (unrepresentable)
    0x3F, // s -> scan line 9 (unrepresentable)
    0xC3, // t -> left tee
    0xB4, // u -> right tee
    0xC1, // v -> bottom tee
    0xC2, // w -> top tee
    0xB3, // x -> vertical line
    0xF3, // y -> less-or-equal
    0xF2, // z -> greater-or-equal
    0xE3, // { -> pi
    0x3F, // | -> not equal (unrepresentable)
    0x9C, // } -> pound sterling
    0xFA, // ~ -> centered dot
    0x3F, // unused (DEL range)
];

#[derive(Debug, Clone, Copy, Default)]
pub struct Flags {
    pub cursor_keys_app: bool,
    pub cursor_hidden: bool,
    pub graphics_g0_selected: bool,
    pub graphics_active: bool,
    pub autowrap_pending: bool,
    pub origin_mode: bool,
    pub nowrap: bool,
}

/// Cell count occupied by scrollback rows, paired with the character cells.
#[derive(Debug, Clone)]
struct Scrollback {
    chars: Vec<u16>,
    attrs: Vec<u8>,
    lines: usize,
    top: usize,
}

impl Scrollback {
    fn new(lines: usize, cols: usize) -> Option<Self> {
        if lines == 0 {
            return None;
        }
        Some(Self {
            chars: vec![b' ' as u16; lines * cols],
            attrs: vec![0; lines * cols],
            lines,
            top: 0,
        })
    }

    /// Shift existing rows up by one and insert `row` at the tail.
    fn push_row(&mut self, cols: usize, row_chars: &[u16], row_attrs: &[u8]) {
        if self.top < self.lines {
            self.top += 1;
        }
        self.chars.copy_within(cols.., 0);
        self.attrs.copy_within(cols.., 0);
        let tail = (self.lines - 1) * cols;
        self.chars[tail..tail + cols].copy_from_slice(row_chars);
        self.attrs[tail..tail + cols].copy_from_slice(row_attrs);
    }
}

/// A snapshot of grid state suitable for rendering, borrowed from the grid.
pub struct Snapshot<'a> {
    pub rows: usize,
    pub cols: usize,
    /// `None` when the cursor is hidden.
    pub cursor: Option<(usize, usize)>,
    pub chars: &'a [u16],
    pub attrs: &'a [u8],
    pub scrollback_chars: &'a [u16],
    pub scrollback_attrs: &'a [u8],
    pub scrollback_top: usize,
}

pub struct Grid {
    pub rows: usize,
    pub cols: usize,
    chars: Vec<u16>,
    attrs: Vec<u8>,
    cursor: usize,
    pub scroll_top: usize,
    pub scroll_bottom: usize,
    pub current_attr: u8,
    pub flags: Flags,
    scrollback: Option<Scrollback>,
    /// Set at creation; selects which DEC Special Graphics table
    /// [`Self::translate_graphics`] uses. `true` for UTF-8/UCS-2 mode,
    /// `false` for 8-bit codepage mode.
    wide_chars: bool,
}

impl Grid {
    /// Convenience constructor defaulting to wide (UTF-8/UCS-2) graphics
    /// translation; see [`Self::with_encoding`] to select 8-bit mode.
    pub fn new(rows: usize, cols: usize, sb_lines: usize) -> Self {
        Self::with_encoding(rows, cols, sb_lines, true)
    }

    pub fn with_encoding(rows: usize, cols: usize, sb_lines: usize, wide_chars: bool) -> Self {
        let pagelen = rows * cols;
        Self {
            rows,
            cols,
            chars: vec![b' ' as u16; pagelen],
            attrs: vec![0; pagelen],
            cursor: 0,
            scroll_top: 0,
            scroll_bottom: rows,
            current_attr: 0,
            flags: Flags {
                nowrap: false,
                ..Flags::default()
            },
            scrollback: Scrollback::new(sb_lines, cols),
            wide_chars,
        }
    }

    pub fn pagelen(&self) -> usize {
        self.rows * self.cols
    }

    pub fn cursor_linear(&self) -> usize {
        self.cursor
    }

    pub fn cursor_rc(&self) -> (usize, usize) {
        (self.cursor / self.cols, self.cursor % self.cols)
    }

    pub fn scrollback_top(&self) -> usize {
        self.scrollback.as_ref().map_or(0, |s| s.top)
    }

    /// Clamp and set the cursor from a linear offset.
    pub fn set_cursor_linear(&mut self, n: usize) {
        self.cursor = n.min(self.pagelen());
    }

    /// Set cursor from a CUP-style (row, col) pair: `row`/`col` are relative
    /// to the scroll region top when origin mode is set (used by CSI H/f and
    /// the DECSET-6 home), absolute otherwise.
    pub fn set_cursor_rc(&mut self, row: usize, col: usize) {
        let row = if self.flags.origin_mode {
            (self.scroll_top + row).min(self.scroll_bottom.saturating_sub(1))
        } else {
            row.min(self.rows.saturating_sub(1))
        };
        let col = col.min(self.cols.saturating_sub(1));
        self.cursor = row * self.cols + col;
        self.flags.autowrap_pending = false;
    }

    /// Set cursor from an absolute (row, col) pair, independent of origin
    /// mode offsetting. Used by relative cursor motion (CUU/CUD/CUF/CUB,
    /// CHA, VPA) which already reads the current absolute row/col back from
    /// [`Self::cursor_rc`].
    pub fn set_cursor_rc_absolute(&mut self, row: usize, col: usize) {
        let row = row.min(self.rows.saturating_sub(1));
        let col = col.min(self.cols.saturating_sub(1));
        self.cursor = row * self.cols + col;
        self.flags.autowrap_pending = false;
    }

    /// Clamp the cursor to the active region: `[scroll_top*cols,
    /// scroll_bottom*cols)` in origin mode, else `[0, pagelen]`.
    pub fn clamp_cursor(&mut self) {
        if self.flags.origin_mode {
            let lo = self.scroll_top * self.cols;
            let hi = self.scroll_bottom * self.cols;
            self.cursor = self.cursor.clamp(lo, hi.saturating_sub(1));
        } else {
            self.cursor = self.cursor.min(self.pagelen());
        }
    }

    pub fn erase(&mut self, start: usize, len: usize) {
        let end = (start + len).min(self.pagelen());
        let start = start.min(end);
        for i in start..end {
            self.chars[i] = b' ' as u16;
            self.attrs[i] = self.current_attr;
        }
    }

    fn row_range(&self, row: usize) -> std::ops::Range<usize> {
        let start = row * self.cols;
        start..start + self.cols
    }

    /// Scroll the scroll region up by one row.
    pub fn scroll_up(&mut self) {
        if self.scroll_top >= self.scroll_bottom {
            return;
        }
        if self.scroll_top == 0 {
            if let Some(sb) = self.scrollback.as_mut() {
                let top_row = self.chars[self.row_range(0)].to_vec();
                let top_attrs = self.attrs[self.row_range(0)].to_vec();
                sb.push_row(self.cols, &top_row, &top_attrs);
            }
        }
        for row in self.scroll_top..self.scroll_bottom.saturating_sub(1) {
            let src = self.row_range(row + 1);
            let dst_start = row * self.cols;
            let moved_chars: Vec<u16> = self.chars[src.clone()].to_vec();
            let moved_attrs: Vec<u8> = self.attrs[src].to_vec();
            self.chars[dst_start..dst_start + self.cols].copy_from_slice(&moved_chars);
            self.attrs[dst_start..dst_start + self.cols].copy_from_slice(&moved_attrs);
        }
        let last = self.scroll_bottom.saturating_sub(1);
        self.erase(last * self.cols, self.cols);
    }

    /// Scroll the scroll region down by one row (no scrollback participation).
    pub fn scroll_down(&mut self) {
        if self.scroll_top >= self.scroll_bottom {
            return;
        }
        let mut row = self.scroll_bottom.saturating_sub(1);
        while row > self.scroll_top {
            let src = self.row_range(row - 1);
            let dst_start = row * self.cols;
            let moved_chars: Vec<u16> = self.chars[src.clone()].to_vec();
            let moved_attrs: Vec<u8> = self.attrs[src].to_vec();
            self.chars[dst_start..dst_start + self.cols].copy_from_slice(&moved_chars);
            self.attrs[dst_start..dst_start + self.cols].copy_from_slice(&moved_attrs);
            row -= 1;
        }
        self.erase(self.scroll_top * self.cols, self.cols);
    }

    fn translate_graphics(&self, code: u16) -> u16 {
        if self.flags.graphics_active && self.flags.graphics_g0_selected && (0x60..0x7F).contains(&code) {
            let table = if self.wide_chars {
                &GRAPHICS_TABLE_WIDE
            } else {
                &GRAPHICS_TABLE_NARROW
            };
            table[(code - 0x60) as usize]
        } else {
            code
        }
    }

    /// Write one printable code point at the cursor, advancing it (or
    /// marking `autowrap_pending` at the last column).
    pub fn put(&mut self, code: u16) {
        let code = self.translate_graphics(code);
        let (row, col) = self.cursor_rc();
        if self.cursor < self.pagelen() {
            self.chars[self.cursor] = code;
            self.attrs[self.cursor] = self.current_attr;
        }
        if col + 1 >= self.cols {
            self.flags.autowrap_pending = true;
        } else {
            self.cursor = row * self.cols + col + 1;
        }
    }

    /// Advance past an autowrap-pending cell: CR+LF semantics, may scroll.
    pub fn wrap_to_next_line(&mut self) {
        self.flags.autowrap_pending = false;
        self.carriage_return();
        self.line_feed();
    }

    pub fn carriage_return(&mut self) {
        let (row, _) = self.cursor_rc();
        self.cursor = row * self.cols;
        self.flags.autowrap_pending = false;
    }

    /// Advance one row; scrolls when already at/past `scroll_bottom`.
    pub fn line_feed(&mut self) {
        let (row, col) = self.cursor_rc();
        self.flags.autowrap_pending = false;
        if row + 1 >= self.scroll_bottom {
            self.scroll_up();
            self.cursor = row * self.cols + col;
        } else {
            self.cursor = (row + 1) * self.cols + col;
        }
    }

    pub fn backspace(&mut self) {
        let (row, col) = self.cursor_rc();
        if col > 0 {
            self.cursor = row * self.cols + col - 1;
        }
        self.flags.autowrap_pending = false;
    }

    pub fn tab(&mut self) {
        let (row, col) = self.cursor_rc();
        let next = ((col / 8) + 1) * 8;
        self.cursor = row * self.cols + next.min(self.cols - 1);
        self.flags.autowrap_pending = false;
    }

    /// ESC D: index. Like line feed but does not touch column or clear
    /// autowrap twice; kept distinct per the spec's listing.
    pub fn index(&mut self) {
        self.line_feed();
    }

    /// ESC E: next line (CR then LF).
    pub fn next_line(&mut self) {
        self.carriage_return();
        self.line_feed();
    }

    /// ESC M: reverse index.
    pub fn reverse_index(&mut self) {
        let (row, col) = self.cursor_rc();
        if row > self.scroll_top {
            self.cursor = (row - 1) * self.cols + col;
        } else {
            self.scroll_down();
        }
    }

    /// ESC c: reset cursor and scroll region to defaults.
    pub fn reset(&mut self) {
        self.cursor = 0;
        self.scroll_top = 0;
        self.scroll_bottom = self.rows;
    }

    /// CSI P (DCH): delete `n` characters at the cursor, shifting the rest
    /// of the row left and erasing the vacated tail.
    pub fn delete_chars(&mut self, n: usize) {
        let (row, col) = self.cursor_rc();
        let row_start = row * self.cols;
        let row_end = row_start + self.cols;
        let n = n.min(self.cols - col);
        let src_start = (self.cursor + n).min(row_end);
        let moved: Vec<u16> = self.chars[src_start..row_end].to_vec();
        let moved_attrs: Vec<u8> = self.attrs[src_start..row_end].to_vec();
        let dst_len = moved.len();
        self.chars[self.cursor..self.cursor + dst_len].copy_from_slice(&moved);
        self.attrs[self.cursor..self.cursor + dst_len].copy_from_slice(&moved_attrs);
        self.erase(self.cursor + dst_len, row_end - (self.cursor + dst_len));
    }

    /// ESC # 8: fill the page with 'E' at current attribute.
    pub fn fill_with_e(&mut self) {
        for c in self.chars.iter_mut() {
            *c = b'E' as u16;
        }
        for a in self.attrs.iter_mut() {
            *a = self.current_attr;
        }
    }

    pub fn snapshot(&self) -> Snapshot<'_> {
        let (scrollback_chars, scrollback_attrs, top): (&[u16], &[u8], usize) =
            match &self.scrollback {
                Some(sb) => (&sb.chars, &sb.attrs, sb.top),
                None => (&[], &[], 0),
            };
        Snapshot {
            rows: self.rows,
            cols: self.cols,
            cursor: if self.flags.cursor_hidden {
                None
            } else {
                Some(self.cursor_rc())
            },
            chars: &self.chars,
            attrs: &self.attrs,
            scrollback_chars,
            scrollback_attrs,
            scrollback_top: top,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ascii_row(g: &Grid, row: usize) -> String {
        let snap = g.snapshot();
        let start = row * snap.cols;
        snap.chars[start..start + snap.cols]
            .iter()
            .map(|&c| char::from_u32(c as u32).unwrap_or(' '))
            .collect()
    }

    #[test]
    fn cursor_stays_within_pagelen() {
        let mut g = Grid::new(25, 80, 0);
        g.set_cursor_linear(usize::MAX);
        assert!(g.cursor_linear() <= g.pagelen());
    }

    #[test]
    fn erase_clamps_to_pagelen() {
        let mut g = Grid::new(4, 10, 0);
        g.erase(35, 100);
        assert_eq!(g.snapshot().chars.len(), 40);
    }

    #[test]
    fn put_sets_autowrap_pending_at_last_column() {
        let mut g = Grid::new(4, 10, 0);
        g.set_cursor_rc(0, 9);
        g.put(b'A' as u16);
        assert!(g.flags.autowrap_pending);
        assert_eq!(g.cursor_linear(), 9);
    }

    #[test]
    fn autowrap_then_next_char_wraps_to_next_row() {
        let mut g = Grid::new(4, 10, 0);
        g.set_cursor_rc(0, 9);
        g.put(b'A' as u16);
        g.wrap_to_next_line();
        g.put(b'B' as u16);
        assert_eq!(ascii_row(&g, 0).trim_end(), "A");
        assert_eq!(ascii_row(&g, 1).chars().next(), Some('B'));
    }

    #[test]
    fn scroll_up_discards_top_row_without_scrollback() {
        let mut g = Grid::new(4, 10, 0);
        for _ in 0..6 {
            g.line_feed();
        }
        assert_eq!(g.cursor_rc().0, 3);
        assert_eq!(g.scrollback_top(), 0);
    }

    #[test]
    fn scroll_up_pushes_into_scrollback_when_enabled() {
        let mut g = Grid::new(4, 10, 100);
        g.put(b'X' as u16);
        for _ in 0..4 {
            g.line_feed();
        }
        assert_eq!(g.scrollback_top(), 1);
        assert_eq!(g.snapshot().scrollback_chars[0], b'X' as u16);
    }

    #[test]
    fn ed_2j_then_home_yields_blank_grid_cursor_zero() {
        let mut g = Grid::new(25, 80, 0);
        g.put(b'X' as u16);
        g.erase(0, g.pagelen());
        g.set_cursor_linear(0);
        assert_eq!(g.cursor_linear(), 0);
        assert!(g.snapshot().chars.iter().all(|&c| c == b' ' as u16));
    }

    #[test]
    fn scroll_region_confines_line_feed_scrolling() {
        let mut g = Grid::new(10, 10, 0);
        g.scroll_top = 0;
        g.scroll_bottom = 3;
        g.set_cursor_rc(2, 0);
        for _ in 0..5 {
            g.line_feed();
        }
        assert_eq!(g.cursor_rc().0, 2);
    }

    #[test]
    fn graphics_translation_maps_q_to_horizontal_line() {
        let mut g = Grid::new(4, 10, 0);
        g.flags.graphics_g0_selected = true;
        g.flags.graphics_active = true;
        g.put(b'q' as u16);
        assert_eq!(g.snapshot().chars[0], 0x2500);
    }

    #[test]
    fn delete_chars_shifts_row_left_and_erases_tail() {
        let mut g = Grid::new(1, 5, 0);
        for c in "ABCDE".chars() {
            g.put(c as u16);
        }
        g.set_cursor_linear(1);
        g.delete_chars(2);
        assert_eq!(ascii_row(&g, 0), "ADE  ");
    }

    #[test]
    fn graphics_translation_inactive_leaves_ascii() {
        let mut g = Grid::new(4, 10, 0);
        g.put(b'q' as u16);
        assert_eq!(g.snapshot().chars[0], b'q' as u16);
    }

    #[test]
    fn narrow_encoding_uses_8bit_graphics_table() {
        let mut g = Grid::with_encoding(4, 10, 0, false);
        g.flags.graphics_g0_selected = true;
        g.flags.graphics_active = true;
        g.put(b'q' as u16);
        assert_eq!(g.snapshot().chars[0], 0xC4);
    }

    #[test]
    fn narrow_encoding_falls_back_to_question_mark_for_unrepresentable_glyph() {
        let mut g = Grid::with_encoding(4, 10, 0, false);
        g.flags.graphics_g0_selected = true;
        g.flags.graphics_active = true;
        g.put(b'`' as u16);
        assert_eq!(g.snapshot().chars[0], 0x3F);
    }

    #[test]
    fn backspace_clears_autowrap_pending() {
        let mut g = Grid::new(4, 10, 0);
        g.set_cursor_rc(0, 9);
        g.put(b'A' as u16);
        assert!(g.flags.autowrap_pending);
        g.backspace();
        assert!(!g.flags.autowrap_pending);
    }

    #[test]
    fn tab_clears_autowrap_pending() {
        let mut g = Grid::new(4, 10, 0);
        g.set_cursor_rc(0, 9);
        g.put(b'A' as u16);
        assert!(g.flags.autowrap_pending);
        g.tab();
        assert!(!g.flags.autowrap_pending);
    }
}
