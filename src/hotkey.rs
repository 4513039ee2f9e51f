//! App-specific configuration extensions.
//!
//! This module provides hotkey support on top of the core Config: the
//! config stores the combination as a plain string, parsed here into a
//! registrable `HotKey`.

use global_hotkey::hotkey::{Code, HotKey, Modifiers};
use tracing::warn;
use voxkey_core::Config;

/// Default hotkey: Ctrl+Shift+Space
pub fn default_hotkey() -> HotKey {
    HotKey::new(Some(Modifiers::CONTROL | Modifiers::SHIFT), Code::Space)
}

/// Extension trait for Config to handle hotkeys.
pub trait ConfigExt {
    /// Get the hotkey, parsing from config or using default.
    fn hotkey(&self) -> HotKey;
}

impl ConfigExt for Config {
    fn hotkey(&self) -> HotKey {
        match self.hotkey.as_deref() {
            None => default_hotkey(),
            Some(input) => parse_hotkey(input).unwrap_or_else(|e| {
                warn!(hotkey = input, error = %e, "unparseable hotkey in config, using default");
                default_hotkey()
            }),
        }
    }
}

/// Parse a "modifier+modifier+key" string such as "ctrl+shift+space".
///
/// Modifier tokens are the usual aliases; the key token is matched
/// case-insensitively against a set of friendly names plus bare letters
/// and digits.
pub fn parse_hotkey(input: &str) -> Result<HotKey, String> {
    let mut modifiers = Modifiers::empty();
    let mut code = None;

    for token in input.split('+').map(str::trim).filter(|t| !t.is_empty()) {
        match token.to_lowercase().as_str() {
            "ctrl" | "control" => modifiers |= Modifiers::CONTROL,
            "shift" => modifiers |= Modifiers::SHIFT,
            "alt" | "option" => modifiers |= Modifiers::ALT,
            "super" | "meta" | "cmd" | "win" => modifiers |= Modifiers::META,
            key => {
                let parsed =
                    parse_code(key).ok_or_else(|| format!("unknown key '{key}' in '{input}'"))?;
                if code.replace(parsed).is_some() {
                    return Err(format!("more than one key in '{input}'"));
                }
            }
        }
    }

    let code = code.ok_or_else(|| format!("no key in '{input}'"))?;
    let modifiers = (!modifiers.is_empty()).then_some(modifiers);
    Ok(HotKey::new(modifiers, code))
}

const LETTERS: [Code; 26] = [
    Code::KeyA,
    Code::KeyB,
    Code::KeyC,
    Code::KeyD,
    Code::KeyE,
    Code::KeyF,
    Code::KeyG,
    Code::KeyH,
    Code::KeyI,
    Code::KeyJ,
    Code::KeyK,
    Code::KeyL,
    Code::KeyM,
    Code::KeyN,
    Code::KeyO,
    Code::KeyP,
    Code::KeyQ,
    Code::KeyR,
    Code::KeyS,
    Code::KeyT,
    Code::KeyU,
    Code::KeyV,
    Code::KeyW,
    Code::KeyX,
    Code::KeyY,
    Code::KeyZ,
];

const DIGITS: [Code; 10] = [
    Code::Digit0,
    Code::Digit1,
    Code::Digit2,
    Code::Digit3,
    Code::Digit4,
    Code::Digit5,
    Code::Digit6,
    Code::Digit7,
    Code::Digit8,
    Code::Digit9,
];

const FUNCTION_KEYS: [Code; 12] = [
    Code::F1,
    Code::F2,
    Code::F3,
    Code::F4,
    Code::F5,
    Code::F6,
    Code::F7,
    Code::F8,
    Code::F9,
    Code::F10,
    Code::F11,
    Code::F12,
];

/// Key token (already lowercased) to key code.
fn parse_code(key: &str) -> Option<Code> {
    let named = match key {
        "space" | "spacebar" => Some(Code::Space),
        "enter" | "return" => Some(Code::Enter),
        "tab" => Some(Code::Tab),
        "escape" | "esc" => Some(Code::Escape),
        "backspace" => Some(Code::Backspace),
        "semicolon" | ";" => Some(Code::Semicolon),
        "comma" | "," => Some(Code::Comma),
        "period" | "." => Some(Code::Period),
        "slash" | "/" => Some(Code::Slash),
        "backslash" | "\\" => Some(Code::Backslash),
        "backquote" | "grave" | "`" => Some(Code::Backquote),
        "minus" | "-" => Some(Code::Minus),
        "equal" | "=" => Some(Code::Equal),
        _ => None,
    };
    if named.is_some() {
        return named;
    }

    if let Some(rest) = key.strip_prefix('f') {
        if let Ok(n) = rest.parse::<usize>() {
            return FUNCTION_KEYS.get(n.wrapping_sub(1)).copied();
        }
    }

    let mut chars = key.chars();
    let (c, rest) = (chars.next()?, chars.next());
    if rest.is_some() {
        return None;
    }
    match c {
        'a'..='z' => Some(LETTERS[(c as u8 - b'a') as usize]),
        '0'..='9' => Some(DIGITS[(c as u8 - b'0') as usize]),
        _ => None,
    }
}
