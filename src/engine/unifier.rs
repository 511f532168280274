//! Token unifier.
//!
//! Reduces raw keyboard virtual-key events and raw controller button indices
//! or hat values into canonical [`Token`]s.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use super::types::{Token, TokenEvent};
use crate::binding::{Modifier, ModifierSet};

/// Classified virtual-key code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyInput {
    Modifier(Modifier),
    Key(String),
}

/// Maps a Windows virtual-key code to a modifier or canonical key name.
pub fn classify_vk(vk: u32) -> Option<KeyInput> {
    let modifier = match vk {
        0x10 | 0xA0 | 0xA1 => Some(Modifier::Shift),
        0x11 | 0xA2 | 0xA3 => Some(Modifier::Ctrl),
        0x12 | 0xA4 | 0xA5 => Some(Modifier::Alt),
        0x5B | 0x5C => Some(Modifier::Win),
        _ => None,
    };
    if let Some(modifier) = modifier {
        return Some(KeyInput::Modifier(modifier));
    }

    let name = match vk {
        0x30..=0x39 | 0x41..=0x5A => char::from_u32(vk)?.to_string(),
        0x70..=0x87 => format!("F{}", vk - 0x70 + 1),
        0x08 => "BACKSPACE".to_string(),
        0x09 => "TAB".to_string(),
        0x0D => "ENTER".to_string(),
        0x1B => "ESC".to_string(),
        0x20 => "SPACE".to_string(),
        0x21 => "PAGEUP".to_string(),
        0x22 => "PAGEDOWN".to_string(),
        0x23 => "END".to_string(),
        0x24 => "HOME".to_string(),
        0x25 => "LEFT".to_string(),
        0x26 => "UP".to_string(),
        0x27 => "RIGHT".to_string(),
        0x28 => "DOWN".to_string(),
        0x2D => "INSERT".to_string(),
        0x2E => "DELETE".to_string(),
        0xBA => ";".to_string(),
        0xBC => ",".to_string(),
        0xBE => ".".to_string(),
        0xBF => "/".to_string(),
        0xC0 => "`".to_string(),
        0xDB => "[".to_string(),
        0xDC => "\\".to_string(),
        0xDD => "]".to_string(),
        0xDE => "'".to_string(),
        _ => return None,
    };
    Some(KeyInput::Key(name))
}

/// Tracks live modifiers and turns key events into tokens. Auto-repeat
/// presses of a key that is already down are dropped here.
#[derive(Debug, Default)]
pub struct KeyboardUnifier {
    modifier_keys: SmallVec<[(u32, Modifier); 4]>,
    pressed: HashSet<String>,
}

impl KeyboardUnifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Modifiers currently held, left and right variants combined.
    pub fn modifiers(&self) -> ModifierSet {
        self.modifier_keys.iter().map(|(_, m)| *m).collect()
    }

    /// Returns the token event for a non-modifier key. Modifier keys only
    /// update the live set.
    pub fn key_event(&mut self, vk: u32, pressed: bool) -> Option<TokenEvent> {
        match classify_vk(vk)? {
            KeyInput::Modifier(modifier) => {
                if pressed {
                    if !self.modifier_keys.iter().any(|(k, _)| *k == vk) {
                        self.modifier_keys.push((vk, modifier));
                    }
                } else {
                    self.modifier_keys.retain(|(k, _)| *k != vk);
                }
                None
            }
            KeyInput::Key(key) => {
                let changed = if pressed {
                    self.pressed.insert(key.clone())
                } else {
                    self.pressed.remove(&key)
                };
                changed.then(|| TokenEvent {
                    token: Token::Keyboard {
                        key,
                        modifiers: self.modifiers(),
                    },
                    pressed,
                })
            }
        }
    }

    /// Releases for every key still down. Clears modifiers too.
    pub fn drain(&mut self) -> Vec<TokenEvent> {
        self.modifier_keys.clear();
        self.pressed
            .drain()
            .map(|key| TokenEvent::release(Token::Keyboard {
                key,
                modifiers: ModifierSet::EMPTY,
            }))
            .collect()
    }
}

/// Canonical name for one raw button index.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ButtonName {
    pub index: u32,
    pub name: String,
}

/// Button naming for one device family.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ButtonLayout {
    pub family: String,
    /// Lowercase substrings matched against the device name.
    #[serde(default)]
    pub match_names: Vec<String>,
    #[serde(default)]
    pub buttons: Vec<ButtonName>,
}

impl ButtonLayout {
    pub fn new(family: &str, match_names: &[&str], buttons: &[(u32, &str)]) -> Self {
        Self {
            family: family.to_string(),
            match_names: match_names.iter().map(|s| s.to_string()).collect(),
            buttons: buttons
                .iter()
                .map(|(index, name)| ButtonName {
                    index: *index,
                    name: name.to_string(),
                })
                .collect(),
        }
    }

    pub fn xbox() -> Self {
        Self::new(
            "xbox",
            &["xbox", "xinput"],
            &[
                (0, "A"),
                (1, "B"),
                (2, "X"),
                (3, "Y"),
                (4, "LB"),
                (5, "RB"),
                (6, "BACK"),
                (7, "START"),
                (8, "LS"),
                (9, "RS"),
            ],
        )
    }

    pub fn playstation() -> Self {
        Self::new(
            "playstation",
            &["playstation", "wireless controller", "dualshock", "dualsense", "ps4", "ps5"],
            &[
                (0, "SQUARE"),
                (1, "CROSS"),
                (2, "CIRCLE"),
                (3, "TRIANGLE"),
                (4, "L1"),
                (5, "R1"),
                (8, "SHARE"),
                (9, "OPTIONS"),
                (10, "L3"),
                (11, "R3"),
                (12, "PS"),
                (13, "TOUCHPAD"),
            ],
        )
    }

    /// XInput names keyed by bit position in `wButtons`. Bits 0 to 3 are the
    /// D-pad and are reported as a hat value instead.
    pub fn xinput() -> Self {
        Self::new(
            "xinput",
            &[],
            &[
                (4, "START"),
                (5, "BACK"),
                (6, "LS"),
                (7, "RS"),
                (8, "LB"),
                (9, "RB"),
                (12, "A"),
                (13, "B"),
                (14, "X"),
                (15, "Y"),
            ],
        )
    }

    pub fn matches(&self, device_name: &str) -> bool {
        let lower = device_name.to_lowercase();
        self.match_names
            .iter()
            .any(|needle| !needle.is_empty() && lower.contains(&needle.to_lowercase()))
    }

    /// Unmapped indices become `BTN<n>`.
    pub fn name_for(&self, index: u32) -> String {
        self.buttons
            .iter()
            .find(|b| b.index == index)
            .map(|b| b.name.to_uppercase())
            .unwrap_or_else(|| format!("BTN{}", index))
    }
}

/// Ordered family layouts with a fallback.
#[derive(Debug, Clone)]
pub struct LayoutTable {
    layouts: Vec<ButtonLayout>,
    baseline: ButtonLayout,
}

impl LayoutTable {
    /// Built-in families, preceded by any configured extras.
    pub fn with_extra(extra: &[ButtonLayout]) -> Self {
        let mut layouts = extra.to_vec();
        layouts.push(ButtonLayout::xbox());
        layouts.push(ButtonLayout::playstation());
        Self {
            layouts,
            baseline: ButtonLayout::xbox(),
        }
    }

    /// Single fixed layout regardless of device name.
    pub fn fixed(layout: ButtonLayout) -> Self {
        Self {
            layouts: Vec::new(),
            baseline: layout,
        }
    }

    pub fn resolve(&self, device_name: &str) -> &ButtonLayout {
        self.layouts
            .iter()
            .find(|layout| layout.matches(device_name))
            .unwrap_or(&self.baseline)
    }
}

impl Default for LayoutTable {
    fn default() -> Self {
        Self::with_extra(&[])
    }
}

pub const DPAD_UP: &str = "DPAD_UP";
pub const DPAD_DOWN: &str = "DPAD_DOWN";
pub const DPAD_LEFT: &str = "DPAD_LEFT";
pub const DPAD_RIGHT: &str = "DPAD_RIGHT";

/// Directions active for a hat value. `y` is positive for up.
fn hat_directions(x: i32, y: i32) -> SmallVec<[&'static str; 2]> {
    let mut dirs = SmallVec::new();
    if y > 0 {
        dirs.push(DPAD_UP);
    } else if y < 0 {
        dirs.push(DPAD_DOWN);
    }
    if x < 0 {
        dirs.push(DPAD_LEFT);
    } else if x > 0 {
        dirs.push(DPAD_RIGHT);
    }
    dirs
}

/// Backend-side device identifier.
pub type DeviceId = usize;

#[derive(Debug)]
struct DeviceSlot {
    name: String,
    layout: ButtonLayout,
    held: HashSet<String>,
    hat: (i32, i32),
}

/// Per-backend controller state.
///
/// A token is reported pressed when the first device holding it goes down and
/// released when the last one lets go, so two pads on one backend never
/// produce duplicate edges.
#[derive(Debug)]
pub struct ControllerUnifier {
    layouts: LayoutTable,
    devices: HashMap<DeviceId, DeviceSlot>,
    holders: HashMap<String, usize>,
}

impl ControllerUnifier {
    pub fn new(layouts: LayoutTable) -> Self {
        Self {
            layouts,
            devices: HashMap::new(),
            holders: HashMap::new(),
        }
    }

    /// Registers a device. Returns false if it was already known.
    pub fn connect(&mut self, id: DeviceId, name: &str) -> bool {
        if self.devices.contains_key(&id) {
            return false;
        }
        let layout = self.layouts.resolve(name).clone();
        self.devices.insert(
            id,
            DeviceSlot {
                name: name.to_string(),
                layout,
                held: HashSet::new(),
                hat: (0, 0),
            },
        );
        true
    }

    /// Forgets a device, releasing whatever it held.
    pub fn disconnect(&mut self, id: DeviceId) -> Vec<TokenEvent> {
        let Some(slot) = self.devices.remove(&id) else {
            return Vec::new();
        };
        slot.held
            .into_iter()
            .filter_map(|name| self.drop_holder(name))
            .collect()
    }

    pub fn is_connected(&self, id: DeviceId) -> bool {
        self.devices.contains_key(&id)
    }

    pub fn device_ids(&self) -> Vec<DeviceId> {
        self.devices.keys().copied().collect()
    }

    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    /// Name of some connected device, for status text.
    pub fn first_device_name(&self) -> Option<&str> {
        self.devices
            .iter()
            .min_by_key(|(id, _)| **id)
            .map(|(_, slot)| slot.name.as_str())
    }

    /// Raw button index through the device's family layout.
    pub fn button(&mut self, id: DeviceId, index: u32, pressed: bool) -> Option<TokenEvent> {
        self.connect(id, "");
        let name = self.devices.get(&id)?.layout.name_for(index);
        self.named(id, name, pressed)
    }

    /// Button already in canonical form.
    pub fn named(&mut self, id: DeviceId, name: String, pressed: bool) -> Option<TokenEvent> {
        self.connect(id, "");
        let slot = self.devices.get_mut(&id)?;
        if pressed {
            if !slot.held.insert(name.clone()) {
                return None;
            }
            let count = self.holders.entry(name.clone()).or_insert(0);
            *count += 1;
            (*count == 1).then(|| TokenEvent::press(Token::Controller(name)))
        } else {
            if !slot.held.remove(&name) {
                return None;
            }
            self.drop_holder(name)
        }
    }

    /// Hat or D-pad axis value. Emits releases before presses.
    pub fn hat(&mut self, id: DeviceId, x: i32, y: i32) -> SmallVec<[TokenEvent; 4]> {
        self.connect(id, "");
        let mut events = SmallVec::new();
        let Some(slot) = self.devices.get_mut(&id) else {
            return events;
        };
        let previous = std::mem::replace(&mut slot.hat, (x.signum(), y.signum()));
        if previous == slot.hat {
            return events;
        }

        let before = hat_directions(previous.0, previous.1);
        let after = hat_directions(x, y);
        for dir in before.iter().filter(|d| !after.contains(d)) {
            events.extend(self.named(id, dir.to_string(), false));
        }
        for dir in after.iter().filter(|d| !before.contains(d)) {
            events.extend(self.named(id, dir.to_string(), true));
        }
        events
    }

    /// Releases everything held on every device and resets hat state.
    pub fn drain(&mut self) -> Vec<TokenEvent> {
        let mut events = Vec::new();
        let mut names = Vec::new();
        for slot in self.devices.values_mut() {
            names.extend(slot.held.drain());
            slot.hat = (0, 0);
        }
        for name in names {
            events.extend(self.drop_holder(name));
        }
        events
    }

    fn drop_holder(&mut self, name: String) -> Option<TokenEvent> {
        let count = self.holders.get_mut(&name)?;
        *count -= 1;
        if *count > 0 {
            return None;
        }
        self.holders.remove(&name);
        Some(TokenEvent::release(Token::Controller(name)))
    }
}
