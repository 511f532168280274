use std::fmt;

use crate::binding::{ModifierSet, Trigger, TriggerKind};

/// Every action the engine can dispatch, in first-match scan order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Action {
    ToggleAll,
    Stall,
    SpeedFlip,
    StraightDashHold,
    TurningDashHold,
    Emergency,
    Exit,
}

/// How a dispatched action runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionKind {
    /// Runs its sequence once.
    OneShot,
    /// Repeats while its trigger stays held.
    HoldLoop,
    /// Engine control actions, never gated by the enable flags.
    Control,
}

impl Action {
    pub const COUNT: usize = 7;

    /// Declaration order. The router scans in this order and the first match
    /// wins.
    pub const ALL: [Action; Action::COUNT] = [
        Action::ToggleAll,
        Action::Stall,
        Action::SpeedFlip,
        Action::StraightDashHold,
        Action::TurningDashHold,
        Action::Emergency,
        Action::Exit,
    ];

    #[inline(always)]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Key used in the `[hotkeys]` table.
    pub const fn config_key(self) -> &'static str {
        match self {
            Action::ToggleAll => "toggle_all",
            Action::Stall => "stall",
            Action::SpeedFlip => "speedflip",
            Action::StraightDashHold => "straightdash",
            Action::TurningDashHold => "turningdash",
            Action::Emergency => "emergency",
            Action::Exit => "exit",
        }
    }

    /// Key used in the `[features]` table, if the action can be disabled.
    pub const fn feature_key(self) -> Option<&'static str> {
        match self {
            Action::Stall | Action::SpeedFlip | Action::StraightDashHold | Action::TurningDashHold => {
                Some(self.config_key())
            }
            Action::ToggleAll | Action::Emergency | Action::Exit => None,
        }
    }

    pub const fn execution_kind(self) -> ExecutionKind {
        match self {
            Action::Stall | Action::SpeedFlip => ExecutionKind::OneShot,
            Action::StraightDashHold | Action::TurningDashHold => ExecutionKind::HoldLoop,
            Action::ToggleAll | Action::Emergency | Action::Exit => ExecutionKind::Control,
        }
    }

    #[inline(always)]
    pub const fn is_hold_loop(self) -> bool {
        matches!(self.execution_kind(), ExecutionKind::HoldLoop)
    }

    /// Control actions dispatch regardless of the global enable flag.
    #[inline(always)]
    pub const fn bypasses_gating(self) -> bool {
        matches!(self.execution_kind(), ExecutionKind::Control)
    }

    pub fn from_config_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|a| a.config_key() == key)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.config_key())
    }
}

/// Canonical, source-independent input symbol.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Token {
    /// Key name plus the modifiers that were down when it was pressed.
    Keyboard { key: String, modifiers: ModifierSet },
    /// Canonical controller button name without the `GP:` prefix.
    Controller(String),
}

impl Token {
    pub fn key(key: &str) -> Self {
        Token::Keyboard {
            key: key.to_uppercase(),
            modifiers: ModifierSet::EMPTY,
        }
    }

    pub fn key_with(key: &str, modifiers: ModifierSet) -> Self {
        Token::Keyboard {
            key: key.to_uppercase(),
            modifiers,
        }
    }

    pub fn button(name: &str) -> Self {
        Token::Controller(name.to_uppercase())
    }

    pub fn kind(&self) -> TriggerKind {
        match self {
            Token::Keyboard { .. } => TriggerKind::Keyboard,
            Token::Controller(_) => TriggerKind::Controller,
        }
    }

    /// Symbol used for pressed-set bookkeeping.
    pub fn symbol(&self) -> &str {
        match self {
            Token::Keyboard { key, .. } => key,
            Token::Controller(name) => name,
        }
    }

    /// Press-time match: same kind, same symbol, and for keyboard triggers
    /// every required modifier active.
    pub fn matches(&self, trigger: &Trigger) -> bool {
        if trigger.is_null() || trigger.kind != self.kind() {
            return false;
        }
        match self {
            Token::Keyboard { key, modifiers } => {
                trigger.symbol == *key && trigger.modifiers.is_subset(*modifiers)
            }
            Token::Controller(name) => trigger.symbol == *name,
        }
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Keyboard { key, modifiers } => {
                for modifier in modifiers.iter() {
                    write!(f, "{}+", modifier.display_name())?;
                }
                f.write_str(key)
            }
            Token::Controller(name) => write!(f, "GP:{}", name),
        }
    }
}

/// One press or release, as delivered to the router.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenEvent {
    pub token: Token,
    pub pressed: bool,
}

impl TokenEvent {
    #[inline]
    pub fn press(token: Token) -> Self {
        Self { token, pressed: true }
    }

    #[inline]
    pub fn release(token: Token) -> Self {
        Self { token, pressed: false }
    }
}

/// Keys a macro may hold down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputKey {
    W,
    A,
    S,
    D,
    Q,
    E,
    I,
    LShift,
}

impl OutputKey {
    pub const ALL: [OutputKey; 8] = [
        OutputKey::W,
        OutputKey::A,
        OutputKey::S,
        OutputKey::D,
        OutputKey::Q,
        OutputKey::E,
        OutputKey::I,
        OutputKey::LShift,
    ];

    /// Set 1 make code.
    pub const fn scancode(self) -> u16 {
        match self {
            OutputKey::Q => 0x10,
            OutputKey::W => 0x11,
            OutputKey::E => 0x12,
            OutputKey::I => 0x17,
            OutputKey::A => 0x1E,
            OutputKey::S => 0x1F,
            OutputKey::D => 0x20,
            OutputKey::LShift => 0x2A,
        }
    }
}

/// Mouse buttons the macros click. Only the right button is ever pressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MouseButton {
    Right,
}

impl MouseButton {
    pub const ALL: [MouseButton; 1] = [MouseButton::Right];
}

/// Anything the synthetic sink can hold down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Output {
    Key(OutputKey),
    Mouse(MouseButton),
}

impl Output {
    /// Everything the release sweep lets go of.
    pub fn all() -> impl Iterator<Item = Output> {
        OutputKey::ALL
            .into_iter()
            .map(Output::Key)
            .chain(MouseButton::ALL.into_iter().map(Output::Mouse))
    }
}

impl From<OutputKey> for Output {
    fn from(key: OutputKey) -> Self {
        Output::Key(key)
    }
}

impl From<MouseButton> for Output {
    fn from(button: MouseButton) -> Self {
        Output::Mouse(button)
    }
}

/// Audible feedback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tone {
    High,
    Low,
}

impl Tone {
    pub const DURATION_MS: u32 = 140;

    pub const fn frequency(self) -> u32 {
        match self {
            Tone::High => 750,
            Tone::Low => 500,
        }
    }
}
