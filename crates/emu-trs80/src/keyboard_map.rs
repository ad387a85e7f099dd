//! Host keyboard to TRS-80 matrix mapping.

use winit::keyboard::KeyCode;

/// Map a winit keycode to a (row, bit) matrix position.
///
/// Letters, digits and punctuation sit where the original keyboard put
/// them; Backspace doubles as the Left key (the machine's rubout),
/// Backquote is the @ key, and Home/End stand in for Clear/Break.
#[must_use]
pub fn map_keycode(code: KeyCode) -> Option<(usize, u8)> {
    let pos = match code {
        KeyCode::Backquote => (0, 0), // @
        KeyCode::KeyA => (0, 1),
        KeyCode::KeyB => (0, 2),
        KeyCode::KeyC => (0, 3),
        KeyCode::KeyD => (0, 4),
        KeyCode::KeyE => (0, 5),
        KeyCode::KeyF => (0, 6),
        KeyCode::KeyG => (0, 7),

        KeyCode::KeyH => (1, 0),
        KeyCode::KeyI => (1, 1),
        KeyCode::KeyJ => (1, 2),
        KeyCode::KeyK => (1, 3),
        KeyCode::KeyL => (1, 4),
        KeyCode::KeyM => (1, 5),
        KeyCode::KeyN => (1, 6),
        KeyCode::KeyO => (1, 7),

        KeyCode::KeyP => (2, 0),
        KeyCode::KeyQ => (2, 1),
        KeyCode::KeyR => (2, 2),
        KeyCode::KeyS => (2, 3),
        KeyCode::KeyT => (2, 4),
        KeyCode::KeyU => (2, 5),
        KeyCode::KeyV => (2, 6),
        KeyCode::KeyW => (2, 7),

        KeyCode::KeyX => (3, 0),
        KeyCode::KeyY => (3, 1),
        KeyCode::KeyZ => (3, 2),

        KeyCode::Digit0 => (4, 0),
        KeyCode::Digit1 => (4, 1),
        KeyCode::Digit2 => (4, 2),
        KeyCode::Digit3 => (4, 3),
        KeyCode::Digit4 => (4, 4),
        KeyCode::Digit5 => (4, 5),
        KeyCode::Digit6 => (4, 6),
        KeyCode::Digit7 => (4, 7),

        KeyCode::Digit8 => (5, 0),
        KeyCode::Digit9 => (5, 1),
        KeyCode::Quote => (5, 2), // :
        KeyCode::Semicolon => (5, 3),
        KeyCode::Comma => (5, 4),
        KeyCode::Minus => (5, 5),
        KeyCode::Period => (5, 6),
        KeyCode::Slash => (5, 7),

        KeyCode::Enter => (6, 0),
        KeyCode::Home => (6, 1), // Clear
        KeyCode::End => (6, 2),  // Break
        KeyCode::ArrowUp => (6, 3),
        KeyCode::ArrowDown => (6, 4),
        KeyCode::ArrowLeft | KeyCode::Backspace => (6, 5),
        KeyCode::ArrowRight => (6, 6),
        KeyCode::Space => (6, 7),

        KeyCode::ShiftLeft | KeyCode::ShiftRight => (7, 0),

        _ => return None,
    };
    Some(pos)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn letters_map_to_matrix() {
        assert_eq!(map_keycode(KeyCode::KeyA), Some((0, 1)));
        assert_eq!(map_keycode(KeyCode::KeyZ), Some((3, 2)));
    }

    #[test]
    fn backspace_is_left_arrow() {
        assert_eq!(map_keycode(KeyCode::Backspace), map_keycode(KeyCode::ArrowLeft));
    }

    #[test]
    fn unmapped_keys_return_none() {
        assert_eq!(map_keycode(KeyCode::F12), None);
    }
}
