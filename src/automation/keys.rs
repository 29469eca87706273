use enigo::Key;

/// Maps a key name as written by the model ("enter", "Ctrl", "f5", "a")
/// to an enigo key. Matching is case-insensitive for named keys; single
/// characters are sent as-is.
pub fn parse_key(name: &str) -> Result<Key, String> {
    let trimmed = name.trim();
    let mut chars = trimmed.chars();
    if let (Some(c), None) = (chars.next(), chars.next()) {
        return Ok(Key::Unicode(c));
    }

    let lower = trimmed.to_ascii_lowercase();
    let key = match lower.as_str() {
        "enter" | "return" => Key::Return,
        "tab" => Key::Tab,
        "esc" | "escape" => Key::Escape,
        "space" | "spacebar" => Key::Space,
        "backspace" => Key::Backspace,
        "delete" | "del" => Key::Delete,
        "home" => Key::Home,
        "end" => Key::End,
        "pageup" | "pgup" => Key::PageUp,
        "pagedown" | "pgdn" => Key::PageDown,
        "up" | "arrowup" => Key::UpArrow,
        "down" | "arrowdown" => Key::DownArrow,
        "left" | "arrowleft" => Key::LeftArrow,
        "right" | "arrowright" => Key::RightArrow,
        "ctrl" | "control" | "ctrlleft" | "ctrlright" => Key::Control,
        "alt" | "altleft" | "altright" | "option" => Key::Alt,
        "shift" | "shiftleft" | "shiftright" => Key::Shift,
        "win" | "winleft" | "winright" | "cmd" | "command" | "meta" | "super" => Key::Meta,
        "capslock" => Key::CapsLock,
        "f1" => Key::F1,
        "f2" => Key::F2,
        "f3" => Key::F3,
        "f4" => Key::F4,
        "f5" => Key::F5,
        "f6" => Key::F6,
        "f7" => Key::F7,
        "f8" => Key::F8,
        "f9" => Key::F9,
        "f10" => Key::F10,
        "f11" => Key::F11,
        "f12" => Key::F12,
        "" => return Err("empty key name".to_string()),
        _ => return Err(format!("unknown key '{trimmed}'")),
    };
    Ok(key)
}

/// Parses a combination such as `ctrl+shift+t` into its keys, in order.
pub fn parse_combination(combo: &str) -> Result<Vec<Key>, String> {
    combo.split('+').map(parse_key).collect()
}
