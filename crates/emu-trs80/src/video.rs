//! VRAM rasteriser.
//!
//! The display is 64 characters by 16 lines, each cell 6 pixels wide and
//! 12 tall (8 dot-matrix rows plus a 4-row inter-line gap), for a
//! 384x192 logical resolution. Characters with bit 7 set are
//! semigraphics: six 3x4-pixel blocks in a 2-wide, 3-tall grid, one
//! block per bit 0-5.

use crate::bus::Trs80Bus;
use crate::font::char_pattern;

pub const CHARS_PER_LINE: usize = 64;
pub const CHAR_LINES: usize = 16;

pub const CELL_W: usize = 6;
pub const CELL_H: usize = 12;

pub const FB_WIDTH: usize = CHARS_PER_LINE * CELL_W; // 384
pub const FB_HEIGHT: usize = CHAR_LINES * CELL_H; // 192

/// Phosphor green on black, ARGB32.
const COLOR_ON: u32 = 0xFF00_E000;
const COLOR_OFF: u32 = 0xFF00_0000;

/// Character-cell framebuffer renderer.
pub struct Video {
    framebuffer: Vec<u32>,
}

impl Video {
    #[must_use]
    pub fn new() -> Self {
        Self {
            framebuffer: vec![COLOR_OFF; FB_WIDTH * FB_HEIGHT],
        }
    }

    #[must_use]
    pub fn framebuffer(&self) -> &[u32] {
        &self.framebuffer
    }

    /// Redraw the whole frame from VRAM.
    pub fn render(&mut self, bus: &Trs80Bus) {
        for line in 0..CHAR_LINES {
            for col in 0..CHARS_PER_LINE {
                let code = bus.get_vram_byte((line * CHARS_PER_LINE + col) as u16);
                self.draw_cell(col, line, code);
            }
        }
    }

    fn draw_cell(&mut self, col: usize, line: usize, code: u8) {
        let x0 = col * CELL_W;
        let y0 = line * CELL_H;

        if code & 0x80 != 0 {
            // Semigraphics: 2 columns x 3 rows of 3x4 blocks
            for block_row in 0..3 {
                for block_col in 0..2 {
                    let bit = block_row * 2 + block_col;
                    let on = code & (1 << bit) != 0;
                    for py in 0..4 {
                        for px in 0..3 {
                            self.set_pixel(
                                x0 + block_col * 3 + px,
                                y0 + block_row * 4 + py,
                                on,
                            );
                        }
                    }
                }
            }
            return;
        }

        // Dot-matrix character: 8 ROM rows, then 4 blank gap rows
        for row in 0..CELL_H {
            let pattern = if row < 8 { char_pattern(code, row as u8) } else { 0 };
            for px in 0..CELL_W {
                // Bit 4 is the leftmost of the 5-wide glyph; column 5 is
                // the inter-character gap.
                let on = px < 5 && pattern & (0x10 >> px) != 0;
                self.set_pixel(x0 + px, y0 + row, on);
            }
        }
    }

    fn set_pixel(&mut self, x: usize, y: usize, on: bool) {
        self.framebuffer[y * FB_WIDTH + x] = if on { COLOR_ON } else { COLOR_OFF };
    }

    /// The screen contents as 16 lines of 64 ASCII characters, for
    /// headless runs and tests. Semigraphics render as '#'.
    #[must_use]
    pub fn screen_text(bus: &Trs80Bus) -> String {
        let mut out = String::with_capacity((CHARS_PER_LINE + 1) * CHAR_LINES);
        for line in 0..CHAR_LINES {
            for col in 0..CHARS_PER_LINE {
                let code = bus.get_vram_byte((line * CHARS_PER_LINE + col) as u16);
                let ch = if code & 0x80 != 0 {
                    '#'
                } else {
                    let rom_addr = code & 0x3F;
                    let ascii = if rom_addr < 0x20 { rom_addr + 0x40 } else { rom_addr };
                    ascii as char
                };
                out.push(ch);
            }
            out.push('\n');
        }
        out
    }
}

impl Default for Video {
    fn default() -> Self {
        Self::new()
    }
}
