//! Trigger descriptor grammar.
//!
//! Turns user-editable binding text such as `Ctrl+H` or `GP:DPAD_DOWN` into a
//! normalized [`Trigger`] and back.

use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

use crate::error::EngineError;

/// Prefix that marks a controller binding.
pub const CONTROLLER_PREFIX: &str = "GP:";

/// Keyboard modifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Modifier {
    Ctrl,
    Alt,
    Shift,
    Win,
}

impl Modifier {
    /// Display order used by [`Trigger`] formatting.
    pub const ORDER: [Modifier; 4] = [Modifier::Ctrl, Modifier::Alt, Modifier::Shift, Modifier::Win];

    #[inline(always)]
    const fn bit(self) -> u8 {
        match self {
            Modifier::Ctrl => 0b0001,
            Modifier::Alt => 0b0010,
            Modifier::Shift => 0b0100,
            Modifier::Win => 0b1000,
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Modifier::Ctrl => "Ctrl",
            Modifier::Alt => "Alt",
            Modifier::Shift => "Shift",
            Modifier::Win => "Win",
        }
    }

    /// Recognizes a modifier token. Expects uppercase input.
    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "CTRL" | "CONTROL" => Some(Modifier::Ctrl),
            "ALT" => Some(Modifier::Alt),
            "SHIFT" => Some(Modifier::Shift),
            "WIN" | "WINDOWS" | "SUPER" | "META" => Some(Modifier::Win),
            _ => None,
        }
    }
}

/// Order-independent set of modifiers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct ModifierSet(u8);

impl ModifierSet {
    pub const EMPTY: ModifierSet = ModifierSet(0);

    #[inline(always)]
    pub fn insert(&mut self, modifier: Modifier) {
        self.0 |= modifier.bit();
    }

    #[inline(always)]
    pub fn remove(&mut self, modifier: Modifier) {
        self.0 &= !modifier.bit();
    }

    #[inline(always)]
    pub fn contains(self, modifier: Modifier) -> bool {
        self.0 & modifier.bit() != 0
    }

    /// True when every modifier in `self` is also in `other`.
    #[inline(always)]
    pub fn is_subset(self, other: ModifierSet) -> bool {
        self.0 & !other.0 == 0
    }

    #[inline(always)]
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn iter(self) -> impl Iterator<Item = Modifier> {
        Modifier::ORDER.into_iter().filter(move |m| self.contains(*m))
    }
}

impl FromIterator<Modifier> for ModifierSet {
    fn from_iter<I: IntoIterator<Item = Modifier>>(iter: I) -> Self {
        let mut set = ModifierSet::EMPTY;
        for modifier in iter {
            set.insert(modifier);
        }
        set
    }
}

/// Source family a trigger listens to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TriggerKind {
    Keyboard,
    Controller,
}

/// Normalized binding. Symbols are stored uppercase, so derived equality is
/// case-insensitive with respect to the binding text.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Trigger {
    pub kind: TriggerKind,
    pub modifiers: ModifierSet,
    pub symbol: String,
}

impl Trigger {
    /// Trigger that never matches anything.
    pub fn null() -> Self {
        Self {
            kind: TriggerKind::Keyboard,
            modifiers: ModifierSet::EMPTY,
            symbol: String::new(),
        }
    }

    pub fn keyboard(modifiers: ModifierSet, symbol: &str) -> Self {
        Self {
            kind: TriggerKind::Keyboard,
            modifiers,
            symbol: normalize_key_name(symbol),
        }
    }

    pub fn controller(button: &str) -> Self {
        Self {
            kind: TriggerKind::Controller,
            modifiers: ModifierSet::EMPTY,
            symbol: button.trim().to_uppercase(),
        }
    }

    #[inline(always)]
    pub fn is_null(&self) -> bool {
        self.symbol.is_empty()
    }

    /// Lenient parse. Anything unusable becomes [`Trigger::null`].
    pub fn parse(text: &str) -> Self {
        let text = text.trim();
        if text.is_empty() {
            return Self::null();
        }

        if is_controller_binding(text) {
            return Self::controller(&text[CONTROLLER_PREFIX.len()..]);
        }

        let parts: Vec<String> = text
            .split(['+', '-'])
            .map(|p| p.trim().to_uppercase())
            .filter(|p| !p.is_empty())
            .collect();

        let mut modifiers = ModifierSet::EMPTY;
        let mut symbol: Option<&str> = None;
        for part in &parts {
            match Modifier::from_token(part) {
                Some(modifier) => modifiers.insert(modifier),
                None => symbol = Some(part),
            }
        }

        // A modifier-only binding keeps its last token as the symbol.
        let symbol = symbol.or(parts.last().map(String::as_str)).unwrap_or("");
        // "+GP:A" would print as a controller binding
        if is_controller_binding(symbol) {
            return Self::null();
        }
        Self::keyboard(modifiers, symbol)
    }

    /// Strict parse used when loading configuration so that unusable
    /// bindings can be reported.
    pub fn try_parse(text: &str) -> Result<Self, EngineError> {
        let trigger = Self::parse(text);
        if trigger.is_null() && !text.trim().is_empty() {
            return Err(EngineError::MalformedTrigger(text.to_string()));
        }
        Ok(trigger)
    }
}

impl FromStr for Trigger {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::parse(s))
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            TriggerKind::Controller => write!(f, "{}{}", CONTROLLER_PREFIX, self.symbol),
            TriggerKind::Keyboard => {
                let mut first = true;
                for modifier in self.modifiers.iter() {
                    if !first {
                        f.write_str("+")?;
                    }
                    f.write_str(modifier.display_name())?;
                    first = false;
                }
                if !self.symbol.is_empty() {
                    if !first {
                        f.write_str("+")?;
                    }
                    f.write_str(&self.symbol)?;
                }
                Ok(())
            }
        }
    }
}

#[inline]
pub fn is_controller_binding(text: &str) -> bool {
    text.len() >= CONTROLLER_PREFIX.len()
        && text.is_char_boundary(CONTROLLER_PREFIX.len())
        && text[..CONTROLLER_PREFIX.len()].eq_ignore_ascii_case(CONTROLLER_PREFIX)
}

/// Display form of stored binding text: a controller binding shows its bare
/// button name, keyboard bindings show as stored.
pub fn display_hotkey(raw: &str) -> String {
    let raw = raw.trim();
    if is_controller_binding(raw) {
        raw[CONTROLLER_PREFIX.len()..].trim().to_uppercase()
    } else {
        raw.to_string()
    }
}

/// Uppercases a key name and folds the accepted aliases onto the names the
/// keyboard listener emits.
pub fn normalize_key_name(name: &str) -> String {
    let upper = name.trim().to_uppercase();
    match upper.as_str() {
        "ESCAPE" => "ESC".to_string(),
        "RETURN" => "ENTER".to_string(),
        "BACK" => "BACKSPACE".to_string(),
        _ => upper,
    }
}
