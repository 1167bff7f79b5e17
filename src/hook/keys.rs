//! Logical key definitions
//!
//! Provides the platform-independent key identifier used by the tracker and
//! the translation tables from Windows virtual-key codes and macOS keycodes.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

macro_rules! logical_keys {
    ($($variant:ident => $name:literal),* $(,)?) => {
        /// Platform-independent key identifier
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub enum LogicalKey {
            $($variant,)*
            /// A key without a named variant, carrying the platform key code
            Other(u32),
        }

        impl LogicalKey {
            /// Canonical configuration name, `None` for [`LogicalKey::Other`]
            pub fn name(&self) -> Option<&'static str> {
                match self {
                    $(LogicalKey::$variant => Some($name),)*
                    LogicalKey::Other(_) => None,
                }
            }

            fn from_name(name: &str) -> Option<Self> {
                $(
                    if name.eq_ignore_ascii_case($name) {
                        return Some(LogicalKey::$variant);
                    }
                )*
                None
            }
        }
    };
}

logical_keys! {
    LeftCtrl => "LeftCtrl",
    RightCtrl => "RightCtrl",
    LeftShift => "LeftShift",
    RightShift => "RightShift",
    LeftAlt => "LeftAlt",
    RightAlt => "RightAlt",
    LeftMeta => "LeftMeta",
    RightMeta => "RightMeta",
    CapsLock => "CapsLock",
    A => "A", B => "B", C => "C", D => "D", E => "E", F => "F", G => "G",
    H => "H", I => "I", J => "J", K => "K", L => "L", M => "M", N => "N",
    O => "O", P => "P", Q => "Q", R => "R", S => "S", T => "T", U => "U",
    V => "V", W => "W", X => "X", Y => "Y", Z => "Z",
    D0 => "D0", D1 => "D1", D2 => "D2", D3 => "D3", D4 => "D4",
    D5 => "D5", D6 => "D6", D7 => "D7", D8 => "D8", D9 => "D9",
    F1 => "F1", F2 => "F2", F3 => "F3", F4 => "F4", F5 => "F5", F6 => "F6",
    F7 => "F7", F8 => "F8", F9 => "F9", F10 => "F10", F11 => "F11", F12 => "F12",
    Space => "Space",
    Enter => "Enter",
    Escape => "Escape",
    Tab => "Tab",
    Backspace => "Backspace",
    Delete => "Delete",
    Insert => "Insert",
    Home => "Home",
    End => "End",
    PageUp => "PageUp",
    PageDown => "PageDown",
    Left => "Left",
    Right => "Right",
    Up => "Up",
    Down => "Down",
    PrintScreen => "PrintScreen",
    ScrollLock => "ScrollLock",
    Pause => "Pause",
    NumLock => "NumLock",
    Apps => "Apps",
}

/// Alternate spellings accepted in configuration
const ALIASES: &[(&str, LogicalKey)] = &[
    ("rctrl", LogicalKey::RightCtrl),
    ("rightcontrol", LogicalKey::RightCtrl),
    ("lctrl", LogicalKey::LeftCtrl),
    ("leftcontrol", LogicalKey::LeftCtrl),
    ("rshift", LogicalKey::RightShift),
    ("lshift", LogicalKey::LeftShift),
    ("ralt", LogicalKey::RightAlt),
    ("rightoption", LogicalKey::RightAlt),
    ("lalt", LogicalKey::LeftAlt),
    ("leftoption", LogicalKey::LeftAlt),
    ("lwin", LogicalKey::LeftMeta),
    ("leftcommand", LogicalKey::LeftMeta),
    ("rwin", LogicalKey::RightMeta),
    ("rightcommand", LogicalKey::RightMeta),
    ("capital", LogicalKey::CapsLock),
    ("return", LogicalKey::Enter),
    ("esc", LogicalKey::Escape),
    ("back", LogicalKey::Backspace),
    ("prior", LogicalKey::PageUp),
    ("next", LogicalKey::PageDown),
];

/// Error returned when a key name cannot be parsed
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown key: {0}")]
pub struct UnknownKey(pub String);

impl FromStr for LogicalKey {
    type Err = UnknownKey;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if let Some(key) = LogicalKey::from_name(trimmed) {
            return Ok(key);
        }
        if let Some((_, key)) = ALIASES
            .iter()
            .find(|(alias, _)| trimmed.eq_ignore_ascii_case(alias))
        {
            return Ok(*key);
        }
        if let Some(hex) = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
        {
            if let Ok(code) = u32::from_str_radix(hex, 16) {
                return Ok(from_native_code(code));
            }
        }
        // Single digits are accepted as-is ("1" -> D1)
        match trimmed.as_bytes() {
            [d @ b'0'..=b'9'] => Ok(digit_key(d - b'0')),
            _ => Err(UnknownKey(s.to_string())),
        }
    }
}

impl std::fmt::Display for LogicalKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let LogicalKey::Other(code) = self {
            return write!(f, "0x{:02X}", code);
        }
        f.write_str(self.name().unwrap_or_default())
    }
}

impl TryFrom<String> for LogicalKey {
    type Error = UnknownKey;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<LogicalKey> for String {
    fn from(key: LogicalKey) -> Self {
        key.to_string()
    }
}

fn digit_key(digit: u8) -> LogicalKey {
    match digit {
        0 => LogicalKey::D0,
        1 => LogicalKey::D1,
        2 => LogicalKey::D2,
        3 => LogicalKey::D3,
        4 => LogicalKey::D4,
        5 => LogicalKey::D5,
        6 => LogicalKey::D6,
        7 => LogicalKey::D7,
        8 => LogicalKey::D8,
        _ => LogicalKey::D9,
    }
}

fn letter_key(index: u8) -> LogicalKey {
    const LETTERS: [LogicalKey; 26] = [
        LogicalKey::A, LogicalKey::B, LogicalKey::C, LogicalKey::D, LogicalKey::E,
        LogicalKey::F, LogicalKey::G, LogicalKey::H, LogicalKey::I, LogicalKey::J,
        LogicalKey::K, LogicalKey::L, LogicalKey::M, LogicalKey::N, LogicalKey::O,
        LogicalKey::P, LogicalKey::Q, LogicalKey::R, LogicalKey::S, LogicalKey::T,
        LogicalKey::U, LogicalKey::V, LogicalKey::W, LogicalKey::X, LogicalKey::Y,
        LogicalKey::Z,
    ];
    LETTERS[index as usize % LETTERS.len()]
}

fn function_key(number: u8) -> LogicalKey {
    const FUNCTION: [LogicalKey; 12] = [
        LogicalKey::F1, LogicalKey::F2, LogicalKey::F3, LogicalKey::F4,
        LogicalKey::F5, LogicalKey::F6, LogicalKey::F7, LogicalKey::F8,
        LogicalKey::F9, LogicalKey::F10, LogicalKey::F11, LogicalKey::F12,
    ];
    FUNCTION[(number as usize - 1) % FUNCTION.len()]
}

/// Translate a key code in the form this platform's hook reports it
///
/// Keeps configured codes comparable with hook events: a code with a named
/// variant resolves to that variant, so `Other` only holds unnamed codes.
#[cfg(target_os = "macos")]
pub fn from_native_code(code: u32) -> LogicalKey {
    match u16::try_from(code) {
        Ok(keycode) => from_mac_keycode(keycode),
        Err(_) => LogicalKey::Other(code),
    }
}

/// Translate a key code in the form this platform's hook reports it
///
/// Keeps configured codes comparable with hook events: a code with a named
/// variant resolves to that variant, so `Other` only holds unnamed codes.
#[cfg(not(target_os = "macos"))]
pub fn from_native_code(code: u32) -> LogicalKey {
    from_virtual_key(code)
}

/// Translate a Windows virtual-key code (`KBDLLHOOKSTRUCT::vkCode`)
pub fn from_virtual_key(vk: u32) -> LogicalKey {
    match vk {
        0x08 => LogicalKey::Backspace,
        0x09 => LogicalKey::Tab,
        0x0D => LogicalKey::Enter,
        0x13 => LogicalKey::Pause,
        0x14 => LogicalKey::CapsLock,
        0x1B => LogicalKey::Escape,
        0x20 => LogicalKey::Space,
        0x21 => LogicalKey::PageUp,
        0x22 => LogicalKey::PageDown,
        0x23 => LogicalKey::End,
        0x24 => LogicalKey::Home,
        0x25 => LogicalKey::Left,
        0x26 => LogicalKey::Up,
        0x27 => LogicalKey::Right,
        0x28 => LogicalKey::Down,
        0x2C => LogicalKey::PrintScreen,
        0x2D => LogicalKey::Insert,
        0x2E => LogicalKey::Delete,
        0x30..=0x39 => digit_key((vk - 0x30) as u8),
        0x41..=0x5A => letter_key((vk - 0x41) as u8),
        0x5B => LogicalKey::LeftMeta,
        0x5C => LogicalKey::RightMeta,
        0x5D => LogicalKey::Apps,
        0x70..=0x7B => function_key((vk - 0x6F) as u8),
        0x90 => LogicalKey::NumLock,
        0x91 => LogicalKey::ScrollLock,
        0xA0 => LogicalKey::LeftShift,
        0xA1 => LogicalKey::RightShift,
        0xA2 => LogicalKey::LeftCtrl,
        0xA3 => LogicalKey::RightCtrl,
        0xA4 => LogicalKey::LeftAlt,
        0xA5 => LogicalKey::RightAlt,
        other => LogicalKey::Other(other),
    }
}

/// Translate a macOS virtual keycode (`kCGKeyboardEventKeycode`)
pub fn from_mac_keycode(code: u16) -> LogicalKey {
    match code {
        0x00 => LogicalKey::A,
        0x01 => LogicalKey::S,
        0x02 => LogicalKey::D,
        0x03 => LogicalKey::F,
        0x04 => LogicalKey::H,
        0x05 => LogicalKey::G,
        0x06 => LogicalKey::Z,
        0x07 => LogicalKey::X,
        0x08 => LogicalKey::C,
        0x09 => LogicalKey::V,
        0x0B => LogicalKey::B,
        0x0C => LogicalKey::Q,
        0x0D => LogicalKey::W,
        0x0E => LogicalKey::E,
        0x0F => LogicalKey::R,
        0x10 => LogicalKey::Y,
        0x11 => LogicalKey::T,
        0x12 => LogicalKey::D1,
        0x13 => LogicalKey::D2,
        0x14 => LogicalKey::D3,
        0x15 => LogicalKey::D4,
        0x16 => LogicalKey::D6,
        0x17 => LogicalKey::D5,
        0x19 => LogicalKey::D9,
        0x1A => LogicalKey::D7,
        0x1C => LogicalKey::D8,
        0x1D => LogicalKey::D0,
        0x1F => LogicalKey::O,
        0x20 => LogicalKey::U,
        0x22 => LogicalKey::I,
        0x23 => LogicalKey::P,
        0x24 => LogicalKey::Enter,
        0x25 => LogicalKey::L,
        0x26 => LogicalKey::J,
        0x28 => LogicalKey::K,
        0x2D => LogicalKey::N,
        0x2E => LogicalKey::M,
        0x30 => LogicalKey::Tab,
        0x31 => LogicalKey::Space,
        0x33 => LogicalKey::Backspace,
        0x35 => LogicalKey::Escape,
        0x36 => LogicalKey::RightMeta,
        0x37 => LogicalKey::LeftMeta,
        0x38 => LogicalKey::LeftShift,
        0x39 => LogicalKey::CapsLock,
        0x3A => LogicalKey::LeftAlt,
        0x3B => LogicalKey::LeftCtrl,
        0x3C => LogicalKey::RightShift,
        0x3D => LogicalKey::RightAlt,
        0x3E => LogicalKey::RightCtrl,
        0x60 => LogicalKey::F5,
        0x61 => LogicalKey::F6,
        0x62 => LogicalKey::F7,
        0x63 => LogicalKey::F3,
        0x64 => LogicalKey::F8,
        0x65 => LogicalKey::F9,
        0x67 => LogicalKey::F11,
        0x6D => LogicalKey::F10,
        0x6F => LogicalKey::F12,
        0x73 => LogicalKey::Home,
        0x74 => LogicalKey::PageUp,
        0x75 => LogicalKey::Delete,
        0x76 => LogicalKey::F4,
        0x77 => LogicalKey::End,
        0x78 => LogicalKey::F2,
        0x79 => LogicalKey::PageDown,
        0x7A => LogicalKey::F1,
        0x7B => LogicalKey::Left,
        0x7C => LogicalKey::Right,
        0x7D => LogicalKey::Down,
        0x7E => LogicalKey::Up,
        other => LogicalKey::Other(other as u32),
    }
}

/// Device-dependent modifier bits carried in macOS `CGEventFlags`
///
/// `FlagsChanged` events only report the keycode, the direction has to be
/// read back from the side-specific bit for that key. Caps Lock has no such
/// bit: alpha-shift reflects the toggle, not whether the key is held.
pub fn mac_modifier_mask(key: LogicalKey) -> Option<u64> {
    match key {
        LogicalKey::LeftCtrl => Some(0x0000_0001),
        LogicalKey::LeftShift => Some(0x0000_0002),
        LogicalKey::RightShift => Some(0x0000_0004),
        LogicalKey::LeftMeta => Some(0x0000_0008),
        LogicalKey::RightMeta => Some(0x0000_0010),
        LogicalKey::LeftAlt => Some(0x0000_0020),
        LogicalKey::RightAlt => Some(0x0000_0040),
        LogicalKey::RightCtrl => Some(0x0000_2000),
        _ => None,
    }
}
