use anyhow::anyhow;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex};

/// Raw global key transition, identified by Windows virtual-key code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyEvent {
    Down(u32),
    Up(u32),
}

impl KeyEvent {
    pub fn code(self) -> u32 {
        match self {
            KeyEvent::Down(code) | KeyEvent::Up(code) => code,
        }
    }
}

/// A system-wide keyboard hook that delivers events regardless of focus.
pub trait KeySource: Send {
    fn install(&mut self, sender: Sender<KeyEvent>) -> anyhow::Result<()>;
    fn uninstall(&mut self) -> anyhow::Result<()>;
    fn is_installed(&self) -> bool;
}

#[derive(Default)]
struct SimulatedKeyState {
    install_count: AtomicUsize,
    uninstall_count: AtomicUsize,
    sender: Mutex<Option<Sender<KeyEvent>>>,
}

/// Key source driven from code through a [`SimulatedKeyHandle`].
pub struct SimulatedKeySource {
    state: Arc<SimulatedKeyState>,
}

impl SimulatedKeySource {
    pub fn new() -> (Self, SimulatedKeyHandle) {
        let state = Arc::new(SimulatedKeyState::default());
        (
            Self {
                state: Arc::clone(&state),
            },
            SimulatedKeyHandle { state },
        )
    }
}

impl KeySource for SimulatedKeySource {
    fn install(&mut self, sender: Sender<KeyEvent>) -> anyhow::Result<()> {
        let mut guard = self.state.sender.lock().map_err(|_| anyhow!("lock"))?;
        if guard.is_none() {
            self.state.install_count.fetch_add(1, Ordering::SeqCst);
            *guard = Some(sender);
        }
        Ok(())
    }

    fn uninstall(&mut self) -> anyhow::Result<()> {
        let mut guard = self.state.sender.lock().map_err(|_| anyhow!("lock"))?;
        if guard.is_some() {
            self.state.uninstall_count.fetch_add(1, Ordering::SeqCst);
        }
        *guard = None;
        Ok(())
    }

    fn is_installed(&self) -> bool {
        match self.state.sender.lock() {
            Ok(guard) => guard.is_some(),
            Err(_) => false,
        }
    }
}

#[derive(Clone)]
pub struct SimulatedKeyHandle {
    state: Arc<SimulatedKeyState>,
}

impl SimulatedKeyHandle {
    pub fn install_count(&self) -> usize {
        self.state.install_count.load(Ordering::SeqCst)
    }

    pub fn uninstall_count(&self) -> usize {
        self.state.uninstall_count.load(Ordering::SeqCst)
    }

    /// Deliver an event. Returns `false` when no hook is installed.
    pub fn emit(&self, event: KeyEvent) -> bool {
        match self.state.sender.lock() {
            Ok(guard) => guard
                .as_ref()
                .map(|sender| sender.send(event).is_ok())
                .unwrap_or(false),
            Err(_) => false,
        }
    }

    pub fn press(&self, code: u32) -> bool {
        self.emit(KeyEvent::Down(code))
    }

    pub fn release(&self, code: u32) -> bool {
        self.emit(KeyEvent::Up(code))
    }

    /// Press every code in order, then release them in reverse.
    pub fn tap_combo(&self, codes: &[u32]) -> bool {
        let pressed = codes.iter().all(|c| self.press(*c));
        let released = codes.iter().rev().all(|c| self.release(*c));
        pressed && released
    }
}

#[cfg(windows)]
pub use rdev_source::RdevKeySource;

#[cfg(windows)]
mod rdev_source {
    use super::{KeyEvent, KeySource};
    use crate::hotkey::{vk, IGNORED_KEY_CODE};
    use once_cell::sync::OnceCell;
    use rdev::{listen, EventType, Key};
    use std::sync::mpsc::Sender;
    use std::sync::{Arc, Mutex};
    use std::thread;
    use std::time::Duration;

    type SharedSender = Arc<Mutex<Option<Sender<KeyEvent>>>>;

    /// rdev's listener can't be stopped once started, so a single thread
    /// forwards into whichever sender is currently installed.
    static LISTENER: OnceCell<SharedSender> = OnceCell::new();

    fn listener() -> &'static SharedSender {
        LISTENER.get_or_init(|| {
            let shared: SharedSender = Arc::new(Mutex::new(None));
            let forward = Arc::clone(&shared);
            thread::spawn(move || loop {
                let target = Arc::clone(&forward);
                let result = listen(move |event| {
                    let key_event = match event.event_type {
                        EventType::KeyPress(k) => KeyEvent::Down(virtual_key(k)),
                        EventType::KeyRelease(k) => KeyEvent::Up(virtual_key(k)),
                        _ => return,
                    };
                    if key_event.code() == 0 || key_event.code() == IGNORED_KEY_CODE {
                        return;
                    }
                    if let Ok(guard) = target.lock() {
                        if let Some(sender) = guard.as_ref() {
                            let _ = sender.send(key_event);
                        }
                    }
                });

                match result {
                    Ok(()) => tracing::warn!("key listener exited unexpectedly. Restarting shortly"),
                    Err(e) => tracing::warn!(?e, "key listener failed. Retrying shortly"),
                }
                thread::sleep(Duration::from_millis(500));
            });
            shared
        })
    }

    #[derive(Debug, Default)]
    pub struct RdevKeySource {
        installed: bool,
    }

    impl RdevKeySource {
        pub fn new() -> Self {
            Self::default()
        }
    }

    impl KeySource for RdevKeySource {
        fn install(&mut self, sender: Sender<KeyEvent>) -> anyhow::Result<()> {
            let mut guard = listener()
                .lock()
                .map_err(|_| anyhow::anyhow!("key listener lock poisoned"))?;
            *guard = Some(sender);
            self.installed = true;
            Ok(())
        }

        fn uninstall(&mut self) -> anyhow::Result<()> {
            if let Some(shared) = LISTENER.get() {
                let mut guard = shared
                    .lock()
                    .map_err(|_| anyhow::anyhow!("key listener lock poisoned"))?;
                *guard = None;
            }
            self.installed = false;
            Ok(())
        }

        fn is_installed(&self) -> bool {
            self.installed
        }
    }

    fn virtual_key(key: Key) -> u32 {
        match key {
            Key::Alt => vk::LEFT_ALT,
            Key::AltGr => vk::RIGHT_ALT,
            Key::Backspace => vk::BACKSPACE,
            Key::CapsLock => vk::CAPS_LOCK,
            Key::ControlLeft => vk::LEFT_CONTROL,
            Key::ControlRight => vk::RIGHT_CONTROL,
            Key::Delete => vk::DELETE,
            Key::DownArrow => vk::DOWN,
            Key::End => vk::END,
            Key::Escape => vk::ESCAPE,
            Key::F1 => vk::F1,
            Key::F2 => vk::F1 + 1,
            Key::F3 => vk::F1 + 2,
            Key::F4 => vk::F1 + 3,
            Key::F5 => vk::F1 + 4,
            Key::F6 => vk::F1 + 5,
            Key::F7 => vk::F1 + 6,
            Key::F8 => vk::F1 + 7,
            Key::F9 => vk::F1 + 8,
            Key::F10 => vk::F1 + 9,
            Key::F11 => vk::F1 + 10,
            Key::F12 => vk::F1 + 11,
            Key::Home => vk::HOME,
            Key::LeftArrow => vk::LEFT,
            Key::MetaLeft => vk::LEFT_WIN,
            Key::MetaRight => vk::RIGHT_WIN,
            Key::PageDown => vk::PAGE_DOWN,
            Key::PageUp => vk::PAGE_UP,
            Key::Return => vk::RETURN,
            Key::RightArrow => vk::RIGHT,
            Key::ShiftLeft => vk::LEFT_SHIFT,
            Key::ShiftRight => vk::RIGHT_SHIFT,
            Key::Space => vk::SPACE,
            Key::Tab => vk::TAB,
            Key::UpArrow => vk::UP,
            Key::PrintScreen => vk::PRINT_SCREEN,
            Key::ScrollLock => vk::SCROLL_LOCK,
            Key::Pause => vk::PAUSE,
            Key::NumLock => vk::NUM_LOCK,
            Key::BackQuote => vk::BACK_QUOTE,
            Key::Num1 => 0x31,
            Key::Num2 => 0x32,
            Key::Num3 => 0x33,
            Key::Num4 => 0x34,
            Key::Num5 => 0x35,
            Key::Num6 => 0x36,
            Key::Num7 => 0x37,
            Key::Num8 => 0x38,
            Key::Num9 => 0x39,
            Key::Num0 => vk::NUM_0,
            Key::Minus => vk::MINUS,
            Key::Equal => vk::EQUALS,
            Key::KeyQ => 0x51,
            Key::KeyW => 0x57,
            Key::KeyE => 0x45,
            Key::KeyR => 0x52,
            Key::KeyT => 0x54,
            Key::KeyY => 0x59,
            Key::KeyU => 0x55,
            Key::KeyI => 0x49,
            Key::KeyO => 0x4F,
            Key::KeyP => 0x50,
            Key::LeftBracket => vk::OPEN_BRACKET,
            Key::RightBracket => vk::CLOSE_BRACKET,
            Key::KeyA => vk::KEY_A,
            Key::KeyS => 0x53,
            Key::KeyD => 0x44,
            Key::KeyF => 0x46,
            Key::KeyG => 0x47,
            Key::KeyH => 0x48,
            Key::KeyJ => 0x4A,
            Key::KeyK => 0x4B,
            Key::KeyL => 0x4C,
            Key::SemiColon => vk::SEMICOLON,
            Key::Quote => vk::QUOTE,
            Key::BackSlash => vk::BACK_SLASH,
            Key::IntlBackslash => vk::BACK_SLASH,
            Key::KeyZ => 0x5A,
            Key::KeyX => 0x58,
            Key::KeyC => 0x43,
            Key::KeyV => 0x56,
            Key::KeyB => 0x42,
            Key::KeyN => 0x4E,
            Key::KeyM => 0x4D,
            Key::Comma => vk::COMMA,
            Key::Dot => vk::PERIOD,
            Key::Slash => vk::SLASH,
            Key::Insert => vk::INSERT,
            Key::KpReturn => vk::RETURN,
            Key::KpMinus => vk::SUBTRACT,
            Key::KpPlus => vk::ADD,
            Key::KpMultiply => vk::MULTIPLY,
            Key::KpDivide => vk::DIVIDE,
            Key::Kp0 => vk::NUMPAD_0,
            Key::Kp1 => vk::NUMPAD_0 + 1,
            Key::Kp2 => vk::NUMPAD_0 + 2,
            Key::Kp3 => vk::NUMPAD_0 + 3,
            Key::Kp4 => vk::NUMPAD_0 + 4,
            Key::Kp5 => vk::NUMPAD_0 + 5,
            Key::Kp6 => vk::NUMPAD_0 + 6,
            Key::Kp7 => vk::NUMPAD_0 + 7,
            Key::Kp8 => vk::NUMPAD_0 + 8,
            Key::Kp9 => vk::NUMPAD_0 + 9,
            Key::KpDelete => vk::DECIMAL,
            Key::Function => 0,
            Key::Unknown(code) => code,
            _ => 0,
        }
    }
}
