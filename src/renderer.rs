//! Converts a [`crate::grid::Snapshot`] into framebuffer updates.
//!
//! Scrollback rows (when the user has scrolled back) are drawn first, then
//! live rows fill the remainder of the screen. Every cell is a glyph
//! lookup plus a nibble blit; the affected rectangle is pushed once at the
//! end rather than per cell.

use crate::font::FontSystem;
use crate::framebuffer::{Framebuffer, Rect};
use crate::grid::Snapshot;

/// Attribute-nibble bit layout, matching [`crate::grid::Grid::current_attr`]:
/// foreground in bits 0-2, background in bits 3-5.
fn attr_nibbles(attr: u8, inverted: bool) -> (u8, u8) {
    let fg = attr & 0x07;
    let bg = (attr >> 3) & 0x07;
    if inverted {
        (bg, fg)
    } else {
        (fg, bg)
    }
}

pub struct Renderer {
    pub y_offset: u32,
}

impl Renderer {
    pub fn new(y_offset: u32) -> Self {
        Self { y_offset }
    }

    /// `scrollback_pos` is how many scrollback rows (from the most recent)
    /// are being displayed in place of the top of the live page.
    pub fn render(
        &self,
        snapshot: &Snapshot<'_>,
        scrollback_pos: usize,
        font: &dyn FontSystem,
        fb: &mut dyn Framebuffer,
    ) {
        if !fb.open() {
            return;
        }

        let cell_w = font.cell_width();
        let cell_h = font.cell_height();
        let mut row_drawn = 0usize;

        if scrollback_pos > 0 {
            let sb_rows = snapshot.scrollback_chars.len() / snapshot.cols.max(1);
            let start_row = sb_rows.saturating_sub(scrollback_pos);
            for sb_row in start_row..sb_rows.min(start_row + snapshot.rows) {
                self.draw_row(
                    row_drawn,
                    &snapshot.scrollback_chars[sb_row * snapshot.cols..(sb_row + 1) * snapshot.cols],
                    &snapshot.scrollback_attrs[sb_row * snapshot.cols..(sb_row + 1) * snapshot.cols],
                    None,
                    snapshot.cols,
                    font,
                    fb,
                );
                row_drawn += 1;
                if row_drawn >= snapshot.rows {
                    break;
                }
            }
        }

        // Fill the remaining screen rows from the top of the live page;
        // `row_drawn` screen rows are already occupied by scrollback.
        let live_start = row_drawn;
        for live_row in 0..(snapshot.rows - live_start) {
            let screen_row = live_start + live_row;
            let cursor_here = snapshot.cursor.map(|(r, _)| r) == Some(live_row);
            let range = live_row * snapshot.cols..(live_row + 1) * snapshot.cols;
            self.draw_row(
                screen_row,
                &snapshot.chars[range.clone()],
                &snapshot.attrs[range],
                if cursor_here { snapshot.cursor } else { None },
                snapshot.cols,
                font,
                fb,
            );
        }

        let rect = Rect {
            x1: 0,
            y1: self.y_offset,
            x2: snapshot.cols as u32 * cell_w,
            y2: self.y_offset + snapshot.rows as u32 * cell_h,
        };
        fb.update_rectangle(rect);
    }

    #[allow(clippy::too_many_arguments)]
    fn draw_row(
        &self,
        screen_row: usize,
        chars: &[u16],
        attrs: &[u8],
        cursor: Option<(usize, usize)>,
        cols: usize,
        font: &dyn FontSystem,
        fb: &mut dyn Framebuffer,
    ) {
        let cell_w = font.cell_width();
        let cell_h = font.cell_height();
        for col in 0..cols {
            let code = chars[col];
            let inverted = cursor.map(|(_, c)| c) == Some(col);
            let (fg, bg) = attr_nibbles(attrs[col], inverted);
            let Some(glyph) = font.glyph(code) else {
                continue;
            };
            self.blit_glyph(
                col as u32 * cell_w,
                self.y_offset + screen_row as u32 * cell_h,
                &glyph,
                fg,
                bg,
                fb,
            );
        }
    }

    fn blit_glyph(
        &self,
        x0: u32,
        y0: u32,
        glyph: &crate::font::Glyph<'_>,
        fg: u8,
        bg: u8,
        fb: &mut dyn Framebuffer,
    ) {
        let row_bytes = (glyph.width as usize).div_ceil(8);
        for gy in 0..glyph.height {
            let row = &glyph.bitmap[gy as usize * row_bytes..(gy as usize + 1) * row_bytes];
            for gx in 0..glyph.width {
                let byte = row[(gx / 8) as usize];
                let bit_set = byte & (0x80 >> (gx % 8)) != 0;
                let nibble = if bit_set { fg } else { bg };
                fb.put_nibble(x0 + gx, y0 + gy, nibble);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::font::BlankFont;
    use crate::framebuffer::NullFramebuffer;
    use crate::grid::Grid;

    #[test]
    fn render_opens_framebuffer_and_pushes_a_rectangle() {
        let mut g = Grid::new(4, 10, 0);
        g.put(b'X' as u16);
        let snap = g.snapshot();
        let font = BlankFont::new(8, 16);
        let mut fb = NullFramebuffer::new(80, 64);
        let renderer = Renderer::new(0);
        renderer.render(&snap, 0, &font, &mut fb);
        assert!(fb.open);
        assert!(fb.last_update.is_some());
    }
}
