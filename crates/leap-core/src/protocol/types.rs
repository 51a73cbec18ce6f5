//! Payload value types carried by input-leap messages.
//!
//! Every value on the wire is a fixed-width integer with a domain meaning.
//! Each gets its own newtype so a key button can never be passed where a
//! mouse button is expected, even though both are small integers.
//!
//! Widths:
//!
//! | Type              | Wire width |
//! |-------------------|------------|
//! | [`KeyId`]           | u32 |
//! | [`KeyModifierMask`] | u32 |
//! | [`KeyButton`]       | u16 |
//! | [`ButtonId`]        | u8  |
//! | [`ClipboardId`]     | u8  |
//! | [`OptionId`]        | u32 |

use std::fmt;

use serde::{Deserialize, Serialize};

// ── Keyboard ──────────────────────────────────────────────────────────────────

/// Platform-independent key symbol (X11 keysym space plus input-leap extensions).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct KeyId(pub u32);

impl KeyId {
    pub const NONE: KeyId = KeyId(0x0000);
    pub const BACKSPACE: KeyId = KeyId(0xEF08);
    pub const TAB: KeyId = KeyId(0xEF09);
    pub const RETURN: KeyId = KeyId(0xEF0D);
    pub const ESCAPE: KeyId = KeyId(0xEF1B);
    pub const DELETE: KeyId = KeyId(0xEFFF);
    pub const SHIFT_L: KeyId = KeyId(0xEFE1);
    pub const CONTROL_L: KeyId = KeyId(0xEFE3);
    pub const ALT_L: KeyId = KeyId(0xEFE9);
}

impl From<char> for KeyId {
    /// Printable characters use their Unicode scalar value as the key id.
    fn from(c: char) -> Self {
        KeyId(c as u32)
    }
}

/// Modifier key bitmask.
///
/// Bit layout:
/// - `0x0001` Shift
/// - `0x0002` Control
/// - `0x0004` Alt
/// - `0x0008` Meta
/// - `0x0010` Super
/// - `0x0020` AltGr
/// - `0x0040` Level5Lock
/// - `0x1000` CapsLock
/// - `0x2000` NumLock
/// - `0x4000` ScrollLock
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct KeyModifierMask(pub u32);

impl KeyModifierMask {
    pub const SHIFT: u32 = 0x0001;
    pub const CONTROL: u32 = 0x0002;
    pub const ALT: u32 = 0x0004;
    pub const META: u32 = 0x0008;
    pub const SUPER: u32 = 0x0010;
    pub const ALT_GR: u32 = 0x0020;
    pub const LEVEL5_LOCK: u32 = 0x0040;
    pub const CAPS_LOCK: u32 = 0x1000;
    pub const NUM_LOCK: u32 = 0x2000;
    pub const SCROLL_LOCK: u32 = 0x4000;

    /// Returns `true` if every bit of `flags` is set.
    pub fn contains(&self, flags: u32) -> bool {
        self.0 & flags == flags
    }

    /// Returns `true` if Shift is active.
    pub fn shift(&self) -> bool {
        self.contains(Self::SHIFT)
    }

    /// Returns `true` if Control is active.
    pub fn control(&self) -> bool {
        self.contains(Self::CONTROL)
    }

    /// Returns `true` if Alt is active.
    pub fn alt(&self) -> bool {
        self.contains(Self::ALT)
    }
}

impl fmt::LowerHex for KeyModifierMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::LowerHex::fmt(&self.0, f)
    }
}

/// Physical key (scan code) on the server keyboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct KeyButton(pub u16);

impl fmt::LowerHex for KeyButton {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::LowerHex::fmt(&self.0, f)
    }
}

// ── Mouse ─────────────────────────────────────────────────────────────────────

/// Mouse button identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct ButtonId(pub u8);

impl ButtonId {
    pub const NONE: ButtonId = ButtonId(0);
    pub const LEFT: ButtonId = ButtonId(1);
    pub const MIDDLE: ButtonId = ButtonId(2);
    pub const RIGHT: ButtonId = ButtonId(3);
    pub const EXTRA0: ButtonId = ButtonId(4);
    pub const EXTRA1: ButtonId = ButtonId(5);
}

// ── Clipboard ─────────────────────────────────────────────────────────────────

/// Which clipboard a grab or data message refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct ClipboardId(pub u8);

impl ClipboardId {
    /// The regular copy/paste clipboard.
    pub const CLIPBOARD: ClipboardId = ClipboardId(0);
    /// The X11 primary selection.
    pub const SELECTION: ClipboardId = ClipboardId(1);
}

// ── Options ───────────────────────────────────────────────────────────────────

/// Option identifier: a four-character ASCII code packed big-endian into a u32.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OptionId(pub u32);

impl OptionId {
    /// Packs a four-character code, e.g. `OptionId::from_code(*b"HART")`.
    pub const fn from_code(code: [u8; 4]) -> Self {
        OptionId(u32::from_be_bytes(code))
    }

    /// Returns the four-character code.
    pub const fn code(&self) -> [u8; 4] {
        self.0.to_be_bytes()
    }

    pub const HALF_DUPLEX_CAPS_LOCK: OptionId = OptionId::from_code(*b"HDCL");
    pub const HALF_DUPLEX_NUM_LOCK: OptionId = OptionId::from_code(*b"HDNL");
    pub const HALF_DUPLEX_SCROLL_LOCK: OptionId = OptionId::from_code(*b"HDSL");
    pub const MODIFIER_MAP_FOR_SHIFT: OptionId = OptionId::from_code(*b"MMFS");
    pub const MODIFIER_MAP_FOR_CONTROL: OptionId = OptionId::from_code(*b"MMFC");
    pub const MODIFIER_MAP_FOR_ALT: OptionId = OptionId::from_code(*b"MMFA");
    pub const MODIFIER_MAP_FOR_ALT_GR: OptionId = OptionId::from_code(*b"MMFG");
    pub const MODIFIER_MAP_FOR_META: OptionId = OptionId::from_code(*b"MMFM");
    pub const MODIFIER_MAP_FOR_SUPER: OptionId = OptionId::from_code(*b"MMFR");
    pub const HEARTBEAT: OptionId = OptionId::from_code(*b"HART");
    pub const SCREEN_SAVER_SYNC: OptionId = OptionId::from_code(*b"SSVR");
    pub const RELATIVE_MOUSE_MOVES: OptionId = OptionId::from_code(*b"MDLT");
}

impl fmt::Debug for OptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let code = self.code();
        if code.iter().all(u8::is_ascii_graphic) {
            // All four bytes are printable ASCII, checked above.
            write!(f, "OptionId({})", String::from_utf8_lossy(&code))
        } else {
            write!(f, "OptionId(0x{:08X})", self.0)
        }
    }
}

/// One `(identifier, value)` entry of an [`OptionsList`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OptionPair {
    pub id: OptionId,
    pub value: i32,
}

impl OptionPair {
    pub const fn new(id: OptionId, value: i32) -> Self {
        Self { id, value }
    }
}

/// Ordered option assignments pushed to a peer.
///
/// Order is preserved on the wire. When the same identifier appears twice
/// the receiver decides which entry wins; this type never sorts or
/// deduplicates.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct OptionsList(Vec<OptionPair>);

impl OptionsList {
    /// Creates an empty list.
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Appends an assignment at the end of the list.
    pub fn push(&mut self, id: OptionId, value: i32) {
        self.0.push(OptionPair::new(id, value));
    }

    /// Number of `(id, value)` pairs.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[OptionPair] {
        &self.0
    }

    pub fn iter(&self) -> std::slice::Iter<'_, OptionPair> {
        self.0.iter()
    }
}

impl From<Vec<OptionPair>> for OptionsList {
    fn from(pairs: Vec<OptionPair>) -> Self {
        Self(pairs)
    }
}

impl FromIterator<(OptionId, i32)> for OptionsList {
    fn from_iter<I: IntoIterator<Item = (OptionId, i32)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(id, value)| OptionPair::new(id, value)).collect())
    }
}

impl<'a> IntoIterator for &'a OptionsList {
    type Item = &'a OptionPair;
    type IntoIter = std::slice::Iter<'a, OptionPair>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_option_id_packs_code_big_endian() {
        assert_eq!(OptionId::HEARTBEAT.0, 0x4841_5254);
        assert_eq!(OptionId::HALF_DUPLEX_CAPS_LOCK.0, 0x4844_434C);
    }

    #[test]
    fn test_option_id_code_round_trips() {
        assert_eq!(&OptionId::SCREEN_SAVER_SYNC.code(), b"SSVR");
    }

    #[test]
    fn test_option_id_debug_shows_ascii_code() {
        assert_eq!(format!("{:?}", OptionId::HEARTBEAT), "OptionId(HART)");
        assert_eq!(format!("{:?}", OptionId(1)), "OptionId(0x00000001)");
    }

    #[test]
    fn test_options_list_preserves_insertion_order() {
        // Arrange
        let mut list = OptionsList::new();

        // Act
        list.push(OptionId::SCREEN_SAVER_SYNC, 1);
        list.push(OptionId::HEARTBEAT, 5000);
        list.push(OptionId::SCREEN_SAVER_SYNC, 0);

        // Assert
        let ids: Vec<OptionId> = list.iter().map(|p| p.id).collect();
        assert_eq!(
            ids,
            vec![OptionId::SCREEN_SAVER_SYNC, OptionId::HEARTBEAT, OptionId::SCREEN_SAVER_SYNC]
        );
        assert_eq!(list.len(), 3);
    }

    #[test]
    fn test_options_list_from_iterator() {
        let list: OptionsList = [(OptionId::HEARTBEAT, 1), (OptionId::RELATIVE_MOUSE_MOVES, 0)]
            .into_iter()
            .collect();
        assert_eq!(list.as_slice()[1], OptionPair::new(OptionId::RELATIVE_MOUSE_MOVES, 0));
    }

    #[test]
    fn test_modifier_mask_helpers() {
        let mask = KeyModifierMask(KeyModifierMask::SHIFT | KeyModifierMask::ALT);
        assert!(mask.shift());
        assert!(mask.alt());
        assert!(!mask.control());
    }

    #[test]
    fn test_key_id_from_char_uses_scalar_value() {
        assert_eq!(KeyId::from('a'), KeyId(0x61));
    }
}
