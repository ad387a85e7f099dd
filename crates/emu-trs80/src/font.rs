//! Character-generator data.
//!
//! The character generator was a separate dot-matrix ROM on the
//! motherboard, not part of the BASIC ROMs, so a built-in glyph set keeps
//! the emulator self-contained. 64 glyphs cover the 6-bit character
//! range: table entries 0-31 are ASCII 0x20-0x3F, entries 32-63 are
//! ASCII 0x40-0x5F. Each glyph is a 5x7 dot matrix stored as 8 row
//! bytes, bit 4 = leftmost pixel, row 7 blank.

/// Glyph rows for the 64 displayable characters.
pub const GLYPHS: [[u8; 8]; 64] = [
    // 0x20 ' '
    [0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00],
    // 0x21 '!'
    [0x04, 0x04, 0x04, 0x04, 0x04, 0x00, 0x04, 0x00],
    // 0x22 '"'
    [0x0A, 0x0A, 0x0A, 0x00, 0x00, 0x00, 0x00, 0x00],
    // 0x23 '#'
    [0x0A, 0x0A, 0x1F, 0x0A, 0x1F, 0x0A, 0x0A, 0x00],
    // 0x24 '$'
    [0x04, 0x0F, 0x14, 0x0E, 0x05, 0x1E, 0x04, 0x00],
    // 0x25 '%'
    [0x18, 0x19, 0x02, 0x04, 0x08, 0x13, 0x03, 0x00],
    // 0x26 '&'
    [0x0C, 0x12, 0x14, 0x08, 0x15, 0x12, 0x0D, 0x00],
    // 0x27 '''
    [0x0C, 0x04, 0x08, 0x00, 0x00, 0x00, 0x00, 0x00],
    // 0x28 '('
    [0x02, 0x04, 0x08, 0x08, 0x08, 0x04, 0x02, 0x00],
    // 0x29 ')'
    [0x08, 0x04, 0x02, 0x02, 0x02, 0x04, 0x08, 0x00],
    // 0x2A '*'
    [0x00, 0x04, 0x15, 0x0E, 0x15, 0x04, 0x00, 0x00],
    // 0x2B '+'
    [0x00, 0x04, 0x04, 0x1F, 0x04, 0x04, 0x00, 0x00],
    // 0x2C ','
    [0x00, 0x00, 0x00, 0x00, 0x0C, 0x04, 0x08, 0x00],
    // 0x2D '-'
    [0x00, 0x00, 0x00, 0x1F, 0x00, 0x00, 0x00, 0x00],
    // 0x2E '.'
    [0x00, 0x00, 0x00, 0x00, 0x00, 0x0C, 0x0C, 0x00],
    // 0x2F '/'
    [0x00, 0x01, 0x02, 0x04, 0x08, 0x10, 0x00, 0x00],
    // 0x30 '0'
    [0x0E, 0x11, 0x13, 0x15, 0x19, 0x11, 0x0E, 0x00],
    // 0x31 '1'
    [0x04, 0x0C, 0x04, 0x04, 0x04, 0x04, 0x0E, 0x00],
    // 0x32 '2'
    [0x0E, 0x11, 0x01, 0x02, 0x04, 0x08, 0x1F, 0x00],
    // 0x33 '3'
    [0x1F, 0x02, 0x04, 0x02, 0x01, 0x11, 0x0E, 0x00],
    // 0x34 '4'
    [0x02, 0x06, 0x0A, 0x12, 0x1F, 0x02, 0x02, 0x00],
    // 0x35 '5'
    [0x1F, 0x10, 0x1E, 0x01, 0x01, 0x11, 0x0E, 0x00],
    // 0x36 '6'
    [0x06, 0x08, 0x10, 0x1E, 0x11, 0x11, 0x0E, 0x00],
    // 0x37 '7'
    [0x1F, 0x01, 0x02, 0x04, 0x08, 0x08, 0x08, 0x00],
    // 0x38 '8'
    [0x0E, 0x11, 0x11, 0x0E, 0x11, 0x11, 0x0E, 0x00],
    // 0x39 '9'
    [0x0E, 0x11, 0x11, 0x0F, 0x01, 0x02, 0x0C, 0x00],
    // 0x3A ':'
    [0x00, 0x0C, 0x0C, 0x00, 0x0C, 0x0C, 0x00, 0x00],
    // 0x3B ';'
    [0x00, 0x0C, 0x0C, 0x00, 0x0C, 0x04, 0x08, 0x00],
    // 0x3C '<'
    [0x02, 0x04, 0x08, 0x10, 0x08, 0x04, 0x02, 0x00],
    // 0x3D '='
    [0x00, 0x00, 0x1F, 0x00, 0x1F, 0x00, 0x00, 0x00],
    // 0x3E '>'
    [0x08, 0x04, 0x02, 0x01, 0x02, 0x04, 0x08, 0x00],
    // 0x3F '?'
    [0x0E, 0x11, 0x01, 0x02, 0x04, 0x00, 0x04, 0x00],
    // 0x40 '@'
    [0x0E, 0x11, 0x01, 0x0D, 0x15, 0x15, 0x0E, 0x00],
    // 0x41 'A'
    [0x0E, 0x11, 0x11, 0x11, 0x1F, 0x11, 0x11, 0x00],
    // 0x42 'B'
    [0x1E, 0x11, 0x11, 0x1E, 0x11, 0x11, 0x1E, 0x00],
    // 0x43 'C'
    [0x0E, 0x11, 0x10, 0x10, 0x10, 0x11, 0x0E, 0x00],
    // 0x44 'D'
    [0x1C, 0x12, 0x11, 0x11, 0x11, 0x12, 0x1C, 0x00],
    // 0x45 'E'
    [0x1F, 0x10, 0x10, 0x1E, 0x10, 0x10, 0x1F, 0x00],
    // 0x46 'F'
    [0x1F, 0x10, 0x10, 0x1E, 0x10, 0x10, 0x10, 0x00],
    // 0x47 'G'
    [0x0E, 0x11, 0x10, 0x17, 0x11, 0x11, 0x0F, 0x00],
    // 0x48 'H'
    [0x11, 0x11, 0x11, 0x1F, 0x11, 0x11, 0x11, 0x00],
    // 0x49 'I'
    [0x0E, 0x04, 0x04, 0x04, 0x04, 0x04, 0x0E, 0x00],
    // 0x4A 'J'
    [0x07, 0x02, 0x02, 0x02, 0x02, 0x12, 0x0C, 0x00],
    // 0x4B 'K'
    [0x11, 0x12, 0x14, 0x18, 0x14, 0x12, 0x11, 0x00],
    // 0x4C 'L'
    [0x10, 0x10, 0x10, 0x10, 0x10, 0x10, 0x1F, 0x00],
    // 0x4D 'M'
    [0x11, 0x1B, 0x15, 0x15, 0x11, 0x11, 0x11, 0x00],
    // 0x4E 'N'
    [0x11, 0x11, 0x19, 0x15, 0x13, 0x11, 0x11, 0x00],
    // 0x4F 'O'
    [0x0E, 0x11, 0x11, 0x11, 0x11, 0x11, 0x0E, 0x00],
    // 0x50 'P'
    [0x1E, 0x11, 0x11, 0x1E, 0x10, 0x10, 0x10, 0x00],
    // 0x51 'Q'
    [0x0E, 0x11, 0x11, 0x11, 0x15, 0x12, 0x0D, 0x00],
    // 0x52 'R'
    [0x1E, 0x11, 0x11, 0x1E, 0x14, 0x12, 0x11, 0x00],
    // 0x53 'S'
    [0x0F, 0x10, 0x10, 0x0E, 0x01, 0x01, 0x1E, 0x00],
    // 0x54 'T'
    [0x1F, 0x04, 0x04, 0x04, 0x04, 0x04, 0x04, 0x00],
    // 0x55 'U'
    [0x11, 0x11, 0x11, 0x11, 0x11, 0x11, 0x0E, 0x00],
    // 0x56 'V'
    [0x11, 0x11, 0x11, 0x11, 0x11, 0x0A, 0x04, 0x00],
    // 0x57 'W'
    [0x11, 0x11, 0x11, 0x15, 0x15, 0x15, 0x0A, 0x00],
    // 0x58 'X'
    [0x11, 0x11, 0x0A, 0x04, 0x0A, 0x11, 0x11, 0x00],
    // 0x59 'Y'
    [0x11, 0x11, 0x11, 0x0A, 0x04, 0x04, 0x04, 0x00],
    // 0x5A 'Z'
    [0x1F, 0x01, 0x02, 0x04, 0x08, 0x10, 0x1F, 0x00],
    // 0x5B '['
    [0x0E, 0x08, 0x08, 0x08, 0x08, 0x08, 0x0E, 0x00],
    // 0x5C '\'
    [0x00, 0x10, 0x08, 0x04, 0x02, 0x01, 0x00, 0x00],
    // 0x5D ']'
    [0x0E, 0x02, 0x02, 0x02, 0x02, 0x02, 0x0E, 0x00],
    // 0x5E '^'
    [0x04, 0x0A, 0x11, 0x00, 0x00, 0x00, 0x00, 0x00],
    // 0x5F '_'
    [0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x1F, 0x00],
];

/// Row pattern for a character code, mirroring the character ROM's 6-bit
/// addressing: bit 6 is ignored, codes below 0x20 alias 0x40-0x5F.
#[must_use]
pub fn char_pattern(code: u8, row: u8) -> u8 {
    if row >= 8 {
        return 0;
    }
    let rom_addr = code & 0x3F;
    let index = if rom_addr < 0x20 {
        usize::from(rom_addr) + 0x20
    } else {
        usize::from(rom_addr) - 0x20
    };
    GLYPHS[index][usize::from(row)]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn space_is_blank() {
        for row in 0..8 {
            assert_eq!(char_pattern(0x20, row), 0);
        }
    }

    #[test]
    fn low_codes_alias_letters() {
        // VRAM 0x01 displays 'A' (0x41): 6-bit ROM addressing
        for row in 0..8 {
            assert_eq!(char_pattern(0x01, row), char_pattern(0x41, row));
        }
    }

    #[test]
    fn bit_six_ignored() {
        for row in 0..8 {
            assert_eq!(char_pattern(0x41, row), char_pattern(0x01, row));
            assert_eq!(char_pattern(0x61, row), char_pattern(0x21, row));
        }
    }
}
