//! Unicode character → HID usage code + modifier mask.
//!
//! Usage codes are from the USB HID keyboard/keypad page (0x07) and describe
//! *physical key positions*; the character a position produces depends on the
//! host's keyboard layout. The national-character block below assumes the
//! host uses a Danish layout, where å/æ/ø sit on the bracket, semicolon and
//! apostrophe positions of a US keyboard.

/// Left-shift bit of the HID modifier byte.
pub const MOD_LSHIFT: u8 = 0x02;

/// Map a character to `(usage, modifiers)`.
///
/// Total over all of `char`: anything without a mapping yields `(0, 0)`,
/// which callers must treat as "skip this character". Dropping unmapped
/// input silently is deliberate — a pen scanner producing a stray symbol
/// must not stall the whole line behind it.
pub fn map_char(ch: char) -> (u8, u8) {
    match ch {
        ' ' => (0x2C, 0),
        // Both line terminators type Enter.
        '\n' | '\r' => (0x28, 0),
        '\t' => (0x2B, 0),
        '-' => (0x2D, 0),
        '_' => (0x2D, MOD_LSHIFT),

        'a'..='z' => (0x04 + (ch as u8 - b'a'), 0),
        'A'..='Z' => (0x04 + (ch as u8 - b'A'), MOD_LSHIFT),

        '1'..='9' => (0x1E + (ch as u8 - b'1'), 0),
        '0' => (0x27, 0),

        // Danish national characters on their physical key positions.
        'å' => (0x2F, 0),
        'Å' => (0x2F, MOD_LSHIFT),
        'æ' => (0x33, 0),
        'Æ' => (0x33, MOD_LSHIFT),
        'ø' => (0x34, 0),
        'Ø' => (0x34, MOD_LSHIFT),

        _ => (0, 0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn letters_map_to_hid_range_with_shift_for_uppercase() {
        for (i, ch) in ('a'..='z').enumerate() {
            assert_eq!(map_char(ch), (0x04 + i as u8, 0), "lowercase {ch}");
        }
        for (i, ch) in ('A'..='Z').enumerate() {
            assert_eq!(
                map_char(ch),
                (0x04 + i as u8, MOD_LSHIFT),
                "uppercase {ch}"
            );
        }
    }

    #[test]
    fn digits_map_to_hid_range() {
        assert_eq!(map_char('1'), (0x1E, 0));
        assert_eq!(map_char('9'), (0x26, 0));
        // Zero sits after nine on the HID page, not before one.
        assert_eq!(map_char('0'), (0x27, 0));
    }

    #[test]
    fn whitespace_and_punctuation() {
        assert_eq!(map_char(' '), (0x2C, 0));
        assert_eq!(map_char('\n'), (0x28, 0));
        assert_eq!(map_char('\r'), (0x28, 0));
        assert_eq!(map_char('\t'), (0x2B, 0));
        assert_eq!(map_char('-'), (0x2D, 0));
        assert_eq!(map_char('_'), (0x2D, MOD_LSHIFT));
    }

    #[test]
    fn danish_characters_use_physical_positions() {
        assert_eq!(map_char('å'), (0x2F, 0));
        assert_eq!(map_char('Å'), (0x2F, MOD_LSHIFT));
        assert_eq!(map_char('æ'), (0x33, 0));
        assert_eq!(map_char('Æ'), (0x33, MOD_LSHIFT));
        assert_eq!(map_char('ø'), (0x34, 0));
        assert_eq!(map_char('Ø'), (0x34, MOD_LSHIFT));
    }

    #[test]
    fn supported_set_never_yields_zero_usage() {
        let supported = "abcxyzABCXYZ0123456789 \n\r\t-_åÅæÆøØ";
        for ch in supported.chars() {
            let (usage, _) = map_char(ch);
            assert_ne!(usage, 0, "{ch:?} should have a usage code");
        }
    }

    #[test]
    fn unmapped_characters_yield_zero_and_are_dropped_by_contract() {
        // Deliberate best-effort policy: no error, just (0, 0).
        for ch in ['€', '!', '?', '@', 'ü', '中', '\u{7}'] {
            assert_eq!(map_char(ch), (0, 0), "{ch:?} should be unmapped");
        }
    }
}
