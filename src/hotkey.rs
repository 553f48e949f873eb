use std::collections::BTreeSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Largest number of keys a captured hotkey may contain.
pub const MAX_HOTKEY_KEYS: usize = 3;

/// Some keyboard hooks report this code for synthetic events; never part of a combo.
pub const IGNORED_KEY_CODE: u32 = 255;

/// Windows virtual-key codes used by the label table and the hotkey parser.
pub mod vk {
    pub const BACKSPACE: u32 = 0x08;
    pub const TAB: u32 = 0x09;
    pub const RETURN: u32 = 0x0D;
    pub const PAUSE: u32 = 0x13;
    pub const CAPS_LOCK: u32 = 0x14;
    pub const ESCAPE: u32 = 0x1B;
    pub const SPACE: u32 = 0x20;
    pub const PAGE_UP: u32 = 0x21;
    pub const PAGE_DOWN: u32 = 0x22;
    pub const END: u32 = 0x23;
    pub const HOME: u32 = 0x24;
    pub const LEFT: u32 = 0x25;
    pub const UP: u32 = 0x26;
    pub const RIGHT: u32 = 0x27;
    pub const DOWN: u32 = 0x28;
    pub const PRINT_SCREEN: u32 = 0x2C;
    pub const INSERT: u32 = 0x2D;
    pub const DELETE: u32 = 0x2E;
    pub const NUM_0: u32 = 0x30;
    pub const KEY_A: u32 = 0x41;
    pub const LEFT_WIN: u32 = 0x5B;
    pub const RIGHT_WIN: u32 = 0x5C;
    pub const APPS: u32 = 0x5D;
    pub const NUMPAD_0: u32 = 0x60;
    pub const MULTIPLY: u32 = 0x6A;
    pub const ADD: u32 = 0x6B;
    pub const SUBTRACT: u32 = 0x6D;
    pub const DECIMAL: u32 = 0x6E;
    pub const DIVIDE: u32 = 0x6F;
    pub const F1: u32 = 0x70;
    pub const F24: u32 = 0x87;
    pub const NUM_LOCK: u32 = 0x90;
    pub const SCROLL_LOCK: u32 = 0x91;
    pub const LEFT_SHIFT: u32 = 0xA0;
    pub const RIGHT_SHIFT: u32 = 0xA1;
    pub const LEFT_CONTROL: u32 = 0xA2;
    pub const RIGHT_CONTROL: u32 = 0xA3;
    pub const LEFT_ALT: u32 = 0xA4;
    pub const RIGHT_ALT: u32 = 0xA5;
    pub const SEMICOLON: u32 = 0xBA;
    pub const EQUALS: u32 = 0xBB;
    pub const COMMA: u32 = 0xBC;
    pub const MINUS: u32 = 0xBD;
    pub const PERIOD: u32 = 0xBE;
    pub const SLASH: u32 = 0xBF;
    pub const BACK_QUOTE: u32 = 0xC0;
    pub const OPEN_BRACKET: u32 = 0xDB;
    pub const BACK_SLASH: u32 = 0xDC;
    pub const CLOSE_BRACKET: u32 = 0xDD;
    pub const QUOTE: u32 = 0xDE;
}

/// Virtual-key codes a stored hotkey may reference.
pub fn is_valid_key_code(code: u32) -> bool {
    (1..IGNORED_KEY_CODE).contains(&code)
}

/// Human readable name for a virtual-key code.
pub fn key_label(code: u32) -> String {
    let fixed = match code {
        vk::BACKSPACE => "Backspace",
        vk::TAB => "Tab",
        vk::RETURN => "Enter",
        vk::PAUSE => "Pause",
        vk::CAPS_LOCK => "Caps Lock",
        vk::ESCAPE => "Escape",
        vk::SPACE => "Space",
        vk::PAGE_UP => "Page Up",
        vk::PAGE_DOWN => "Page Down",
        vk::END => "End",
        vk::HOME => "Home",
        vk::LEFT => "Left",
        vk::UP => "Up",
        vk::RIGHT => "Right",
        vk::DOWN => "Down",
        vk::PRINT_SCREEN => "Print Screen",
        vk::INSERT => "Insert",
        vk::DELETE => "Delete",
        vk::LEFT_WIN => "Windows",
        vk::RIGHT_WIN => "Right Windows",
        vk::APPS => "Context Menu",
        vk::MULTIPLY => "NumPad *",
        vk::ADD => "NumPad +",
        vk::SUBTRACT => "NumPad -",
        vk::DECIMAL => "NumPad .",
        vk::DIVIDE => "NumPad /",
        vk::NUM_LOCK => "Num Lock",
        vk::SCROLL_LOCK => "Scroll Lock",
        vk::LEFT_SHIFT => "Shift",
        vk::RIGHT_SHIFT => "Right Shift",
        vk::LEFT_CONTROL => "Ctrl",
        vk::RIGHT_CONTROL => "Right Ctrl",
        vk::LEFT_ALT => "Alt",
        vk::RIGHT_ALT => "Right Alt",
        vk::SEMICOLON => "Semicolon",
        vk::EQUALS => "Equals",
        vk::COMMA => "Comma",
        vk::MINUS => "Minus",
        vk::PERIOD => "Period",
        vk::SLASH => "Forward Slash",
        vk::BACK_QUOTE => "Back Quote",
        vk::OPEN_BRACKET => "Open Bracket",
        vk::BACK_SLASH => "Back Slash",
        vk::CLOSE_BRACKET => "Close Bracket",
        vk::QUOTE => "Apostrophe",
        _ => "",
    };
    if !fixed.is_empty() {
        return fixed.to_string();
    }

    match code {
        0x30..=0x39 | 0x41..=0x5A => char::from_u32(code)
            .map(|c| c.to_string())
            .unwrap_or_else(|| format!("Key {code}")),
        0x60..=0x69 => format!("NumPad {}", code - vk::NUMPAD_0),
        vk::F1..=vk::F24 => format!("F{}", code - vk::F1 + 1),
        _ => format!("Key {code}"),
    }
}

/// Parse a hotkey string like `"Ctrl+Alt+1"` into virtual-key codes.
///
/// Returns `None` for unknown key names, empty strings and combos longer than
/// [`MAX_HOTKEY_KEYS`].
pub fn parse_hotkey(s: &str) -> Option<Vec<u32>> {
    let mut codes = Vec::new();
    for part in s.split('+') {
        let upper = part.trim().to_ascii_uppercase();
        if upper.is_empty() {
            continue;
        }
        let code = parse_key(&upper)?;
        if !codes.contains(&code) {
            codes.push(code);
        }
    }
    if codes.is_empty() || codes.len() > MAX_HOTKEY_KEYS {
        return None;
    }
    Some(codes)
}

fn parse_key(upper: &str) -> Option<u32> {
    match upper {
        "CTRL" | "CONTROL" => Some(vk::LEFT_CONTROL),
        "RCTRL" => Some(vk::RIGHT_CONTROL),
        "ALT" => Some(vk::LEFT_ALT),
        "ALTGR" | "RALT" => Some(vk::RIGHT_ALT),
        "SHIFT" => Some(vk::LEFT_SHIFT),
        "RSHIFT" => Some(vk::RIGHT_SHIFT),
        "WIN" | "META" | "SUPER" => Some(vk::LEFT_WIN),
        "SPACE" => Some(vk::SPACE),
        "TAB" => Some(vk::TAB),
        "ENTER" | "RETURN" => Some(vk::RETURN),
        "ESC" | "ESCAPE" => Some(vk::ESCAPE),
        "DELETE" => Some(vk::DELETE),
        "INSERT" => Some(vk::INSERT),
        "BACKSPACE" => Some(vk::BACKSPACE),
        "CAPSLOCK" => Some(vk::CAPS_LOCK),
        "HOME" => Some(vk::HOME),
        "END" => Some(vk::END),
        "PAGEUP" => Some(vk::PAGE_UP),
        "PAGEDOWN" => Some(vk::PAGE_DOWN),
        "LEFT" | "LEFTARROW" => Some(vk::LEFT),
        "RIGHT" | "RIGHTARROW" => Some(vk::RIGHT),
        "UP" | "UPARROW" => Some(vk::UP),
        "DOWN" | "DOWNARROW" => Some(vk::DOWN),
        _ if upper.starts_with('F') && upper.len() > 1 => match upper[1..].parse::<u32>().ok() {
            Some(n @ 1..=24) => Some(vk::F1 + n - 1),
            _ => None,
        },
        _ if upper.starts_with("NUMPAD") => match upper["NUMPAD".len()..].parse::<u32>().ok() {
            Some(n @ 0..=9) => Some(vk::NUMPAD_0 + n),
            _ => None,
        },
        _ if upper.len() == 1 => {
            let c = upper.chars().next()?;
            if c.is_ascii_digit() || c.is_ascii_uppercase() {
                Some(c as u32)
            } else {
                None
            }
        }
        _ => None,
    }
}

/// A physical key. Identity is the key code; label and pressed state are not
/// part of equality or hashing.
#[derive(Debug, Clone)]
pub struct Key {
    code: u32,
    label: String,
    pressed: bool,
}

impl Key {
    pub fn new(code: u32) -> Self {
        Self::with_label(code, key_label(code))
    }

    pub fn with_label(code: u32, label: impl Into<String>) -> Self {
        Self {
            code,
            label: label.into(),
            pressed: false,
        }
    }

    pub fn code(&self) -> u32 {
        self.code
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn is_pressed(&self) -> bool {
        self.pressed
    }

    pub fn set_pressed(&mut self, pressed: bool) {
        self.pressed = pressed;
    }
}

impl PartialEq for Key {
    fn eq(&self, other: &Self) -> bool {
        self.code == other.code
    }
}

impl Eq for Key {}

impl Hash for Key {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.code.hash(state);
    }
}

/// What a single key update did to a combo.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComboTransition {
    Unchanged,
    /// All keys became pressed while the combo was not latched.
    Fired,
    /// The last held member key was released; the latch is cleared.
    Released,
}

#[derive(Debug, Default)]
struct ComboState {
    keys: Vec<Key>,
    pressed: bool,
    held_down: bool,
}

impl ComboState {
    fn recompute(&mut self) -> ComboTransition {
        let all = !self.keys.is_empty() && self.keys.iter().all(Key::is_pressed);
        let any = self.keys.iter().any(Key::is_pressed);
        let was_held = self.held_down;

        self.pressed = all;
        if all && !was_held {
            self.held_down = true;
            return ComboTransition::Fired;
        }
        if was_held && !any {
            self.held_down = false;
            return ComboTransition::Released;
        }
        ComboTransition::Unchanged
    }
}

/// An unordered set of keys that must be held together.
///
/// `is_pressed` is the AND over the member keys. `is_held_down` latches on the
/// rising edge of `is_pressed` and only clears once every member key is up, so
/// key repeat or a bouncing member cannot fire the combo twice.
#[derive(Debug, Default)]
pub struct HotKey {
    state: Mutex<ComboState>,
}

impl HotKey {
    pub fn new(codes: impl IntoIterator<Item = u32>) -> Self {
        let hotkey = Self::default();
        hotkey.set_keys(codes);
        hotkey
    }

    pub fn unbound() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, ComboState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn keys(&self) -> Vec<Key> {
        self.lock().keys.clone()
    }

    pub fn codes(&self) -> Vec<u32> {
        self.lock().keys.iter().map(Key::code).collect()
    }

    /// Order independent view of the member codes, used to compare combos.
    pub fn key_set(&self) -> BTreeSet<u32> {
        self.lock().keys.iter().map(Key::code).collect()
    }

    pub fn is_bound(&self) -> bool {
        !self.lock().keys.is_empty()
    }

    pub fn contains(&self, code: u32) -> bool {
        self.lock().keys.iter().any(|k| k.code == code)
    }

    pub fn is_pressed(&self) -> bool {
        self.lock().pressed
    }

    pub fn is_held_down(&self) -> bool {
        self.lock().held_down
    }

    /// Update one member key and report the resulting combo transition.
    pub fn set_key_pressed(&self, code: u32, pressed: bool) -> ComboTransition {
        let mut state = self.lock();
        let mut touched = false;
        for key in state.keys.iter_mut().filter(|k| k.code == code) {
            key.set_pressed(pressed);
            touched = true;
        }
        if !touched {
            return ComboTransition::Unchanged;
        }
        state.recompute()
    }

    pub fn release_all(&self) {
        let mut state = self.lock();
        for key in state.keys.iter_mut() {
            key.set_pressed(false);
        }
        state.pressed = false;
        state.held_down = false;
    }

    /// Replace the member keys. Duplicate codes are dropped and the latch is reset.
    pub fn set_keys(&self, codes: impl IntoIterator<Item = u32>) {
        let mut keys: Vec<Key> = Vec::new();
        for code in codes {
            let key = Key::new(code);
            if !keys.contains(&key) {
                keys.push(key);
            }
        }
        let mut state = self.lock();
        state.keys = keys;
        state.pressed = false;
        state.held_down = false;
    }

    pub fn clear(&self) {
        self.set_keys(std::iter::empty());
    }

    pub fn label(&self) -> String {
        let state = self.lock();
        if state.keys.is_empty() {
            return "Not Set".to_string();
        }
        state
            .keys
            .iter()
            .map(Key::label)
            .collect::<Vec<_>>()
            .join(" + ")
    }
}

impl fmt::Display for HotKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_compare_by_code_only() {
        let mut a = Key::with_label(65, "A");
        let b = Key::with_label(65, "something else");
        a.set_pressed(true);
        assert_eq!(a, b);
        assert_ne!(Key::new(65), Key::new(66));
    }

    #[test]
    fn unbound_hotkey_never_fires() {
        let hotkey = HotKey::unbound();
        assert_eq!(hotkey.set_key_pressed(65, true), ComboTransition::Unchanged);
        assert!(!hotkey.is_pressed());
        assert!(!hotkey.is_held_down());
        assert_eq!(hotkey.label(), "Not Set");
    }

    #[test]
    fn fires_once_in_any_press_order() {
        let hotkey = HotKey::new([vk::LEFT_CONTROL, vk::LEFT_ALT, 0x31]);
        assert_eq!(hotkey.set_key_pressed(0x31, true), ComboTransition::Unchanged);
        assert_eq!(
            hotkey.set_key_pressed(vk::LEFT_CONTROL, true),
            ComboTransition::Unchanged
        );
        assert_eq!(hotkey.set_key_pressed(vk::LEFT_ALT, true), ComboTransition::Fired);
        // key repeat from the OS
        assert_eq!(hotkey.set_key_pressed(vk::LEFT_ALT, true), ComboTransition::Unchanged);
        assert!(hotkey.is_pressed() && hotkey.is_held_down());
    }

    #[test]
    fn latch_survives_partial_release() {
        let hotkey = HotKey::new([vk::LEFT_CONTROL, 0x31]);
        hotkey.set_key_pressed(vk::LEFT_CONTROL, true);
        assert_eq!(hotkey.set_key_pressed(0x31, true), ComboTransition::Fired);

        assert_eq!(hotkey.set_key_pressed(0x31, false), ComboTransition::Unchanged);
        assert!(!hotkey.is_pressed());
        assert!(hotkey.is_held_down());

        assert_eq!(hotkey.set_key_pressed(0x31, true), ComboTransition::Unchanged);

        hotkey.set_key_pressed(0x31, false);
        assert_eq!(
            hotkey.set_key_pressed(vk::LEFT_CONTROL, false),
            ComboTransition::Released
        );
        assert!(!hotkey.is_held_down());
        hotkey.set_key_pressed(vk::LEFT_CONTROL, true);
        assert_eq!(hotkey.set_key_pressed(0x31, true), ComboTransition::Fired);
    }

    #[test]
    fn pressed_flag_tracks_and_of_members() {
        let codes = [vk::LEFT_SHIFT, vk::LEFT_ALT, 0x41];
        let hotkey = HotKey::new(codes);
        let sequence = [
            (0x41, true),
            (vk::LEFT_ALT, true),
            (0x41, false),
            (vk::LEFT_SHIFT, true),
            (0x41, true),
            (vk::LEFT_ALT, false),
            (vk::LEFT_ALT, true),
            (vk::LEFT_SHIFT, false),
        ];
        let mut held = [false; 3];
        for (code, pressed) in sequence {
            hotkey.set_key_pressed(code, pressed);
            let idx = codes.iter().position(|c| *c == code).unwrap();
            held[idx] = pressed;
            assert_eq!(hotkey.is_pressed(), held.iter().all(|h| *h));
        }
    }

    #[test]
    fn set_keys_dedupes_and_resets_latch() {
        let hotkey = HotKey::new([0x41]);
        hotkey.set_key_pressed(0x41, true);
        assert!(hotkey.is_held_down());
        hotkey.set_keys([0x42, 0x42, 0x43]);
        assert_eq!(hotkey.codes(), vec![0x42, 0x43]);
        assert!(!hotkey.is_held_down());
    }

    #[test]
    fn parse_combo_hotkey() {
        assert_eq!(
            parse_hotkey("Ctrl+Alt+1"),
            Some(vec![vk::LEFT_CONTROL, vk::LEFT_ALT, 0x31])
        );
        assert_eq!(parse_hotkey("F2"), Some(vec![vk::F1 + 1]));
        assert_eq!(parse_hotkey("shift + numpad4"), Some(vec![vk::LEFT_SHIFT, 0x64]));
    }

    #[test]
    fn parse_invalid_hotkey() {
        assert!(parse_hotkey("Ctrl+Foo").is_none());
        assert!(parse_hotkey("").is_none());
        assert!(parse_hotkey("Ctrl+Alt+Shift+A").is_none());
        assert!(parse_hotkey("F25").is_none());
    }

    #[test]
    fn labels_render_combo() {
        let hotkey = HotKey::new([vk::LEFT_CONTROL, vk::LEFT_ALT, 0x31]);
        assert_eq!(hotkey.to_string(), "Ctrl + Alt + 1");
        assert_eq!(key_label(vk::F1 + 11), "F12");
        assert_eq!(key_label(vk::QUOTE), "Apostrophe");
    }
}
