//! VT100/ANSI escape sequence interpreter.
//!
//! Modeled as a pure function over `(&mut Grid, &[u8]) -> consumed: usize`
//! per the resumption design: the caller (the [`crate::session`] module)
//! retains whatever suffix is left unconsumed and re-presents it, prefixed
//! to the next read, the next time bytes arrive.

use crate::grid::Grid;
use crate::utf8::{self, Decoded};

/// Feed as much of `buf` as forms complete control structures into `grid`.
/// Returns the number of bytes consumed; the remainder (always a prefix of
/// an incomplete escape/CSI/UTF-8 sequence) should be retried once more
/// bytes are available.
pub fn feed(grid: &mut Grid, buf: &[u8]) -> usize {
    let mut i = 0;
    while i < buf.len() {
        match buf[i] {
            0x0D => {
                grid.carriage_return();
                i += 1;
            }
            0x0A => {
                grid.line_feed();
                i += 1;
            }
            0x08 => {
                grid.backspace();
                i += 1;
            }
            0x09 => {
                grid.tab();
                i += 1;
            }
            0x07 => {
                i += 1;
            }
            0x0E => {
                grid.flags.graphics_active = true;
                i += 1;
            }
            0x0F => {
                grid.flags.graphics_active = false;
                i += 1;
            }
            0x1B => match parse_escape(grid, &buf[i..]) {
                Some(consumed) => i += consumed,
                None => break,
            },
            _ => match utf8::decode_one(&buf[i..]) {
                Decoded::Incomplete => break,
                Decoded::Char { code, consumed } => {
                    if grid.flags.autowrap_pending {
                        grid.wrap_to_next_line();
                    }
                    grid.put(code);
                    i += consumed;
                }
            },
        }
    }
    i
}

/// Parse one `ESC ...` sequence starting at `seq[0] == 0x1B`. Returns the
/// number of bytes consumed, or `None` if `seq` ends mid-sequence.
fn parse_escape(grid: &mut Grid, seq: &[u8]) -> Option<usize> {
    if seq.len() < 2 {
        return None;
    }
    match seq[1] {
        b'[' => parse_csi(grid, seq),
        b'(' | b')' => {
            if seq.len() < 3 {
                return None;
            }
            let is_g0 = seq[1] == b'(';
            match seq[2] {
                b'0' => {
                    if is_g0 {
                        grid.flags.graphics_g0_selected = true;
                    }
                }
                b'B' => {
                    if is_g0 {
                        grid.flags.graphics_g0_selected = false;
                    }
                }
                _ => {}
            }
            Some(3)
        }
        b'=' | b'>' => Some(2),
        b'H' => Some(2),
        b'c' => {
            grid.reset();
            Some(2)
        }
        b'D' => {
            grid.index();
            Some(2)
        }
        b'E' => {
            grid.next_line();
            Some(2)
        }
        b'M' => {
            grid.reverse_index();
            Some(2)
        }
        b'#' => {
            if seq.len() < 3 {
                return None;
            }
            if seq[2] == b'8' {
                grid.fill_with_e();
            }
            Some(3)
        }
        _ => {
            tracing::debug!(byte = seq[1], "unrecognized escape sequence, skipping");
            Some(2)
        }
    }
}

/// Parse `ESC [ ...` starting at `seq[0] == 0x1B, seq[1] == '['`. Returns
/// bytes consumed, or `None` if incomplete.
fn parse_csi(grid: &mut Grid, seq: &[u8]) -> Option<usize> {
    let mut i = 2;
    let private = if i < seq.len() && matches!(seq[i], b'<' | b'=' | b'>' | b'?') {
        let m = seq[i];
        i += 1;
        Some(m)
    } else {
        None
    };

    let mut params: Vec<i64> = Vec::new();
    let mut cur: Option<i64> = None;
    loop {
        if i >= seq.len() {
            return None;
        }
        let b = seq[i];
        if b.is_ascii_digit() {
            let d = (b - b'0') as i64;
            cur = Some(cur.unwrap_or(0).saturating_mul(10).saturating_add(d));
            i += 1;
        } else if b == b';' {
            params.push(cur.take().unwrap_or(0));
            i += 1;
        } else {
            if let Some(v) = cur.take() {
                params.push(v);
            }
            i += 1;
            apply_csi(grid, private, &params, b);
            return Some(i);
        }
    }
}

/// Parameter at `idx`, defaulting to `default` when absent or zero. Use for
/// count-like parameters (cursor motion, insert/delete counts); ED/EL pass
/// their own default handling since `0` is a meaningful value there.
fn count_param(params: &[i64], idx: usize, default: i64) -> i64 {
    match params.get(idx) {
        None | Some(0) => default,
        Some(&v) => v,
    }
}

fn raw_param(params: &[i64], idx: usize, default: i64) -> i64 {
    params.get(idx).copied().unwrap_or(default)
}

fn apply_csi(grid: &mut Grid, private: Option<u8>, params: &[i64], final_byte: u8) {
    match (private, final_byte) {
        (None, b'A') => {
            let n = count_param(params, 0, 1) as usize;
            let (row, col) = grid.cursor_rc();
            grid.set_cursor_rc_absolute(row.saturating_sub(n), col);
        }
        (None, b'B') => {
            let n = count_param(params, 0, 1) as usize;
            let (row, col) = grid.cursor_rc();
            grid.set_cursor_rc_absolute((row + n).min(grid.rows - 1), col);
        }
        (None, b'C') => {
            let n = count_param(params, 0, 1) as usize;
            let (row, col) = grid.cursor_rc();
            grid.set_cursor_rc_absolute(row, (col + n).min(grid.cols - 1));
        }
        (None, b'D') => {
            let n = count_param(params, 0, 1) as usize;
            let (row, col) = grid.cursor_rc();
            grid.set_cursor_rc_absolute(row, col.saturating_sub(n));
        }
        (None, b'd') => {
            let n = count_param(params, 0, 1) as usize;
            let (_, col) = grid.cursor_rc();
            grid.set_cursor_rc_absolute(n.saturating_sub(1), col);
        }
        (None, b'G') | (None, b'`') => {
            let n = count_param(params, 0, 1) as usize;
            let (row, _) = grid.cursor_rc();
            grid.set_cursor_rc_absolute(row, n.saturating_sub(1));
        }
        (None, b'H') | (None, b'f') => {
            let row = count_param(params, 0, 1) as usize;
            let col = count_param(params, 1, 1) as usize;
            grid.set_cursor_rc(row.saturating_sub(1), col.saturating_sub(1));
        }
        (None, b'J') => {
            let mode = raw_param(params, 0, 0);
            let cursor = grid.cursor_linear();
            match mode {
                1 => grid.erase(0, cursor + 1),
                2 => grid.erase(0, grid.pagelen()),
                _ => grid.erase(cursor, grid.pagelen() - cursor),
            }
        }
        (None, b'K') => {
            let mode = raw_param(params, 0, 0);
            let (row, col) = grid.cursor_rc();
            let row_start = row * grid.cols;
            match mode {
                1 => grid.erase(row_start, col + 1),
                2 => grid.erase(row_start, grid.cols),
                _ => grid.erase(row_start + col, grid.cols - col),
            }
        }
        (None, b'L') => {
            let n = count_param(params, 0, 1) as usize;
            let row = grid.cursor_rc().0;
            let saved_top = grid.scroll_top;
            grid.scroll_top = row;
            for _ in 0..n {
                grid.scroll_down();
            }
            grid.scroll_top = saved_top;
        }
        (None, b'M') => {
            let n = count_param(params, 0, 1) as usize;
            let row = grid.cursor_rc().0;
            let saved_top = grid.scroll_top;
            grid.scroll_top = row;
            for _ in 0..n {
                grid.scroll_up();
            }
            grid.scroll_top = saved_top;
        }
        (None, b'P') => {
            let n = count_param(params, 0, 1) as usize;
            grid.delete_chars(n);
        }
        (None, b'X') => {
            let n = count_param(params, 0, 1) as usize;
            grid.erase(grid.cursor_linear(), n);
        }
        (None, b'g') => {}
        (Some(b'?'), b'h') | (Some(b'?'), b'l') => {
            let set = final_byte == b'h';
            for &mode in params {
                decset(grid, mode, set);
            }
            if params.is_empty() {
                decset(grid, 0, set);
            }
        }
        (None, b'h') | (None, b'l') => {
            // SM/RM without a private marker: only mode 4 (insert mode) is
            // recognized by the spec, and it is a deliberate no-op.
        }
        (None, b'm') => {
            if params.is_empty() {
                sgr(grid, 0);
            } else {
                for &code in params {
                    sgr(grid, code);
                }
            }
        }
        (None, b'r') => {
            let a1 = count_param(params, 0, 1) as usize;
            let a2 = raw_param(params, 1, grid.rows as i64) as usize;
            let a2 = if a2 == 0 { grid.rows } else { a2 };
            grid.scroll_top = (a1 - 1).min(grid.rows.saturating_sub(1));
            grid.scroll_bottom = a2.clamp(grid.scroll_top + 1, grid.rows);
            grid.set_cursor_rc(0, 0);
        }
        (None, b't') => {}
        _ => {
            tracing::debug!(
                private = ?private,
                final_byte,
                ?params,
                "unhandled CSI sequence, skipping"
            );
        }
    }
    grid.clamp_cursor();
}

fn decset(grid: &mut Grid, mode: i64, set: bool) {
    match mode {
        1 => grid.flags.cursor_keys_app = set,
        3 => {
            grid.erase(0, grid.pagelen());
            grid.set_cursor_linear(0);
        }
        6 => {
            if set {
                grid.flags.origin_mode = true;
                grid.set_cursor_rc(0, 0);
            } else {
                grid.flags.origin_mode = false;
                grid.set_cursor_linear(0);
            }
        }
        7 => {
            // Decided open question: `?7l` leaves autowrap unchanged.
            if set {
                grid.flags.nowrap = false;
            }
        }
        25 => grid.flags.cursor_hidden = !set,
        _ => {}
    }
}

fn sgr(grid: &mut Grid, code: i64) {
    match code {
        0 => grid.current_attr = 0,
        1 | 4 | 5 | 7 | 22 | 24 | 25 | 27 => {}
        30..=37 => {
            let fg = (37 - code) as u8;
            grid.current_attr = (grid.current_attr & !0x07) | fg;
        }
        39 => grid.current_attr &= !0x07,
        40..=47 => {
            let bg = (47 - code) as u8;
            grid.current_attr = (grid.current_attr & !0x38) | (bg << 3);
        }
        49 => grid.current_attr &= !0x38,
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row_text(g: &Grid, row: usize) -> String {
        let snap = g.snapshot();
        let start = row * snap.cols;
        snap.chars[start..start + snap.cols]
            .iter()
            .map(|&c| char::from_u32(c as u32).unwrap_or(' '))
            .collect()
    }

    #[test]
    fn scenario_hello_crlf() {
        let mut g = Grid::new(25, 80, 0);
        let consumed = feed(&mut g, b"Hello\r\n");
        assert_eq!(consumed, 7);
        assert_eq!(row_text(&g, 0).trim_end(), "Hello");
        assert_eq!(g.cursor_rc(), (1, 0));
    }

    #[test]
    fn oversized_csi_parameter_saturates_instead_of_panicking() {
        let mut g = Grid::new(25, 80, 0);
        let mut seq = b"\x1b[".to_vec();
        seq.extend(std::iter::repeat(b'9').take(30));
        seq.push(b'H');
        let consumed = feed(&mut g, &seq);
        assert_eq!(consumed, seq.len());
    }

    #[test]
    fn scenario_clear_and_position() {
        let mut g = Grid::new(25, 80, 0);
        feed(&mut g, b"\x1b[2J\x1b[5;10HX");
        let snap = g.snapshot();
        assert_eq!(snap.chars[4 * 80 + 9], b'X' as u16);
        assert_eq!(g.cursor_rc(), (4, 10));
    }

    #[test]
    fn scenario_sgr_colors() {
        let mut g = Grid::new(25, 80, 0);
        feed(&mut g, b"\x1b[31;40mA\x1b[0mB");
        let snap = g.snapshot();
        assert_eq!(snap.chars[0], b'A' as u16);
        assert_eq!(snap.attrs[0] & 0x07, 6);
        assert_eq!((snap.attrs[0] >> 3) & 0x07, 7);
        assert_eq!(snap.chars[1], b'B' as u16);
        assert_eq!(snap.attrs[1], 0);
    }

    #[test]
    fn scenario_scroll_region_confines_feed() {
        let mut g = Grid::new(25, 80, 0);
        feed(&mut g, b"\x1b[1;3r");
        g.set_cursor_rc(2, 0);
        for _ in 0..5 {
            g.line_feed();
        }
        assert!(g.cursor_rc().0 <= 2);
    }

    #[test]
    fn scenario_autowrap_then_wrap() {
        let mut g = Grid::new(25, 80, 0);
        g.set_cursor_rc(0, 79);
        feed(&mut g, b"AB");
        assert_eq!(row_text(&g, 0).chars().nth(79), Some('A'));
        assert_eq!(row_text(&g, 1).chars().next(), Some('B'));
    }

    #[test]
    fn scenario_graphics_horizontal_line() {
        let mut g = Grid::new(25, 80, 0);
        feed(&mut g, b"\x1b(0\x0eq");
        assert_eq!(g.snapshot().chars[0], 0x2500);
    }

    #[test]
    fn idempotent_double_clear() {
        let mut g1 = Grid::new(10, 10, 0);
        feed(&mut g1, b"hi\x1b[2J");
        let mut g2 = Grid::new(10, 10, 0);
        feed(&mut g2, b"hi\x1b[2J\x1b[2J");
        assert_eq!(g1.snapshot().chars, g2.snapshot().chars);
    }

    #[test]
    fn partial_sequences_split_anywhere_match_whole() {
        let whole = b"\x1b[5;10HX\x1b[31mY";
        let mut whole_grid = Grid::new(25, 80, 0);
        feed(&mut whole_grid, whole);

        for split in 1..whole.len() {
            let mut g = Grid::new(25, 80, 0);
            let mut pending = Vec::new();
            pending.extend_from_slice(&whole[..split]);
            let consumed = feed(&mut g, &pending);
            pending.drain(..consumed);
            pending.extend_from_slice(&whole[split..]);
            let consumed2 = feed(&mut g, &pending);
            pending.drain(..consumed2);
            assert!(pending.is_empty(), "split at {split} left unconsumed bytes");
            assert_eq!(g.snapshot().chars, whole_grid.snapshot().chars);
        }
    }

    #[test]
    fn incomplete_escape_leaves_suffix_unconsumed() {
        let mut g = Grid::new(10, 10, 0);
        let consumed = feed(&mut g, b"A\x1b[31");
        assert_eq!(consumed, 1);
    }

    #[test]
    fn dch_deletes_and_shifts_row() {
        let mut g = Grid::new(1, 10, 0);
        feed(&mut g, b"ABCDE");
        g.set_cursor_linear(1);
        feed(&mut g, b"\x1b[2P");
        assert_eq!(row_text(&g, 0), "ADE       ");
    }
}
