//! Canonical key and button names
//!
//! Profiles refer to keys by lowercase names: printable keys by their
//! unshifted character, everything else by a fixed word (`space`,
//! `ctrl_l`, `page_up`, ...). Both capture backends translate their native
//! codes into these names here. Codes with no name are dropped.

/// Canonical names for mouse buttons
pub const MOUSE_BUTTONS: &[&str] = &["left", "right", "middle", "x1", "x2"];

/// Canonical name for an rdev key
pub fn rdev_key_name(key: rdev::Key) -> Option<&'static str> {
    use rdev::Key::*;

    let name = match key {
        Alt => "alt_l",
        AltGr => "alt_gr",
        Backspace => "backspace",
        CapsLock => "caps_lock",
        ControlLeft => "ctrl_l",
        ControlRight => "ctrl_r",
        Delete | KpDelete => "delete",
        DownArrow => "down",
        End => "end",
        Escape => "esc",
        F1 => "f1",
        F2 => "f2",
        F3 => "f3",
        F4 => "f4",
        F5 => "f5",
        F6 => "f6",
        F7 => "f7",
        F8 => "f8",
        F9 => "f9",
        F10 => "f10",
        F11 => "f11",
        F12 => "f12",
        Home => "home",
        LeftArrow => "left",
        MetaLeft => "cmd",
        MetaRight => "cmd_r",
        PageDown => "page_down",
        PageUp => "page_up",
        Return | KpReturn => "enter",
        RightArrow => "right",
        ShiftLeft => "shift",
        ShiftRight => "shift_r",
        Space => "space",
        Tab => "tab",
        UpArrow => "up",
        PrintScreen => "print_screen",
        ScrollLock => "scroll_lock",
        Pause => "pause",
        NumLock => "num_lock",
        Insert => "insert",
        Function => "fn",
        BackQuote => "`",
        Num1 | Kp1 => "1",
        Num2 | Kp2 => "2",
        Num3 | Kp3 => "3",
        Num4 | Kp4 => "4",
        Num5 | Kp5 => "5",
        Num6 | Kp6 => "6",
        Num7 | Kp7 => "7",
        Num8 | Kp8 => "8",
        Num9 | Kp9 => "9",
        Num0 | Kp0 => "0",
        Minus | KpMinus => "-",
        Equal => "=",
        KpPlus => "+",
        KpMultiply => "*",
        KpDivide | Slash => "/",
        KeyQ => "q",
        KeyW => "w",
        KeyE => "e",
        KeyR => "r",
        KeyT => "t",
        KeyY => "y",
        KeyU => "u",
        KeyI => "i",
        KeyO => "o",
        KeyP => "p",
        LeftBracket => "[",
        RightBracket => "]",
        KeyA => "a",
        KeyS => "s",
        KeyD => "d",
        KeyF => "f",
        KeyG => "g",
        KeyH => "h",
        KeyJ => "j",
        KeyK => "k",
        KeyL => "l",
        SemiColon => ";",
        Quote => "'",
        BackSlash | IntlBackslash => "\\",
        KeyZ => "z",
        KeyX => "x",
        KeyC => "c",
        KeyV => "v",
        KeyB => "b",
        KeyN => "n",
        KeyM => "m",
        Comma => ",",
        Dot => ".",
        Unknown(_) => return None,
    };

    Some(name)
}

/// Canonical name for an rdev mouse button
pub fn rdev_button_name(button: rdev::Button) -> Option<&'static str> {
    match button {
        rdev::Button::Left => Some("left"),
        rdev::Button::Right => Some("right"),
        rdev::Button::Middle => Some("middle"),
        // X11 reports back/forward as 8/9, Windows as XBUTTON1/2
        rdev::Button::Unknown(1 | 8) => Some("x1"),
        rdev::Button::Unknown(2 | 9) => Some("x2"),
        rdev::Button::Unknown(_) => None,
    }
}

/// Canonical name for an evdev key or button code
#[cfg(target_os = "linux")]
pub fn evdev_key_name(key: evdev::Key) -> Option<&'static str> {
    use evdev::Key;

    let name = match key {
        Key::KEY_ESC => "esc",
        Key::KEY_1 | Key::KEY_KP1 => "1",
        Key::KEY_2 | Key::KEY_KP2 => "2",
        Key::KEY_3 | Key::KEY_KP3 => "3",
        Key::KEY_4 | Key::KEY_KP4 => "4",
        Key::KEY_5 | Key::KEY_KP5 => "5",
        Key::KEY_6 | Key::KEY_KP6 => "6",
        Key::KEY_7 | Key::KEY_KP7 => "7",
        Key::KEY_8 | Key::KEY_KP8 => "8",
        Key::KEY_9 | Key::KEY_KP9 => "9",
        Key::KEY_0 | Key::KEY_KP0 => "0",
        Key::KEY_MINUS | Key::KEY_KPMINUS => "-",
        Key::KEY_EQUAL => "=",
        Key::KEY_BACKSPACE => "backspace",
        Key::KEY_TAB => "tab",
        Key::KEY_Q => "q",
        Key::KEY_W => "w",
        Key::KEY_E => "e",
        Key::KEY_R => "r",
        Key::KEY_T => "t",
        Key::KEY_Y => "y",
        Key::KEY_U => "u",
        Key::KEY_I => "i",
        Key::KEY_O => "o",
        Key::KEY_P => "p",
        Key::KEY_LEFTBRACE => "[",
        Key::KEY_RIGHTBRACE => "]",
        Key::KEY_ENTER | Key::KEY_KPENTER => "enter",
        Key::KEY_LEFTCTRL => "ctrl_l",
        Key::KEY_A => "a",
        Key::KEY_S => "s",
        Key::KEY_D => "d",
        Key::KEY_F => "f",
        Key::KEY_G => "g",
        Key::KEY_H => "h",
        Key::KEY_J => "j",
        Key::KEY_K => "k",
        Key::KEY_L => "l",
        Key::KEY_SEMICOLON => ";",
        Key::KEY_APOSTROPHE => "'",
        Key::KEY_GRAVE => "`",
        Key::KEY_LEFTSHIFT => "shift",
        Key::KEY_BACKSLASH | Key::KEY_102ND => "\\",
        Key::KEY_Z => "z",
        Key::KEY_X => "x",
        Key::KEY_C => "c",
        Key::KEY_V => "v",
        Key::KEY_B => "b",
        Key::KEY_N => "n",
        Key::KEY_M => "m",
        Key::KEY_COMMA => ",",
        Key::KEY_DOT => ".",
        Key::KEY_SLASH | Key::KEY_KPSLASH => "/",
        Key::KEY_RIGHTSHIFT => "shift_r",
        Key::KEY_KPASTERISK => "*",
        Key::KEY_LEFTALT => "alt_l",
        Key::KEY_SPACE => "space",
        Key::KEY_CAPSLOCK => "caps_lock",
        Key::KEY_F1 => "f1",
        Key::KEY_F2 => "f2",
        Key::KEY_F3 => "f3",
        Key::KEY_F4 => "f4",
        Key::KEY_F5 => "f5",
        Key::KEY_F6 => "f6",
        Key::KEY_F7 => "f7",
        Key::KEY_F8 => "f8",
        Key::KEY_F9 => "f9",
        Key::KEY_F10 => "f10",
        Key::KEY_F11 => "f11",
        Key::KEY_F12 => "f12",
        Key::KEY_F13 => "f13",
        Key::KEY_F14 => "f14",
        Key::KEY_F15 => "f15",
        Key::KEY_F16 => "f16",
        Key::KEY_F17 => "f17",
        Key::KEY_F18 => "f18",
        Key::KEY_F19 => "f19",
        Key::KEY_F20 => "f20",
        Key::KEY_F21 => "f21",
        Key::KEY_F22 => "f22",
        Key::KEY_F23 => "f23",
        Key::KEY_F24 => "f24",
        Key::KEY_NUMLOCK => "num_lock",
        Key::KEY_SCROLLLOCK => "scroll_lock",
        Key::KEY_KPPLUS => "+",
        Key::KEY_KPDOT => ".",
        Key::KEY_RIGHTCTRL => "ctrl_r",
        Key::KEY_SYSRQ => "print_screen",
        Key::KEY_RIGHTALT => "alt_gr",
        Key::KEY_HOME => "home",
        Key::KEY_UP => "up",
        Key::KEY_PAGEUP => "page_up",
        Key::KEY_LEFT => "left",
        Key::KEY_RIGHT => "right",
        Key::KEY_END => "end",
        Key::KEY_DOWN => "down",
        Key::KEY_PAGEDOWN => "page_down",
        Key::KEY_INSERT => "insert",
        Key::KEY_DELETE => "delete",
        Key::KEY_PAUSE => "pause",
        Key::KEY_LEFTMETA => "cmd",
        Key::KEY_RIGHTMETA => "cmd_r",
        Key::KEY_COMPOSE => "menu",
        Key::KEY_MUTE => "media_volume_mute",
        Key::KEY_VOLUMEDOWN => "media_volume_down",
        Key::KEY_VOLUMEUP => "media_volume_up",
        Key::KEY_PLAYPAUSE => "media_play_pause",
        Key::KEY_NEXTSONG => "media_next",
        Key::KEY_PREVIOUSSONG => "media_previous",
        Key::BTN_LEFT => "left",
        Key::BTN_RIGHT => "right",
        Key::BTN_MIDDLE => "middle",
        Key::BTN_SIDE => "x1",
        Key::BTN_EXTRA => "x2",
        _ => return None,
    };

    Some(name)
}

/// Whether an evdev code is a mouse button rather than a key
#[cfg(target_os = "linux")]
pub fn evdev_is_button(key: evdev::Key) -> bool {
    use evdev::Key;
    matches!(
        key,
        Key::BTN_LEFT | Key::BTN_RIGHT | Key::BTN_MIDDLE | Key::BTN_SIDE | Key::BTN_EXTRA
    )
}
