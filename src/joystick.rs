//! Generic-joystick controller adapter (gilrs).
//!
//! Raw button codes go through the device-family layout table. D-pad input
//! arrives either as four buttons or as two axes depending on the driver; both
//! are folded into one hat value per device.

use std::thread::JoinHandle;

use crate::config::AppConfig;
use crate::engine::{ControllerUnifier, LayoutTable};
use crate::error::EngineError;
use crate::input_manager::AdapterContext;

pub const BACKEND: &str = "joystick";

/// D-pad direction reported as a button.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DPadButton {
    Up,
    Down,
    Left,
    Right,
}

/// Hat value rebuilt from D-pad button edges, `y` positive for up.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HatState {
    pub x: i32,
    pub y: i32,
}

impl HatState {
    pub fn set_button(&mut self, button: DPadButton, pressed: bool) {
        let (axis, value) = match button {
            DPadButton::Up => (&mut self.y, 1),
            DPadButton::Down => (&mut self.y, -1),
            DPadButton::Left => (&mut self.x, -1),
            DPadButton::Right => (&mut self.x, 1),
        };
        if pressed {
            *axis = value;
        } else if *axis == value {
            *axis = 0;
        }
    }

    /// Analog D-pad axis; anything inside the dead zone is centred.
    pub fn axis_value(value: f32) -> i32 {
        if value > 0.5 {
            1
        } else if value < -0.5 {
            -1
        } else {
            0
        }
    }
}

/// Unifier with the built-in families plus any configured ones.
pub fn unifier(config: &AppConfig) -> ControllerUnifier {
    ControllerUnifier::new(LayoutTable::with_extra(&config.layouts))
}

#[cfg(windows)]
pub fn start(config: &AppConfig, ctx: AdapterContext) -> Result<JoinHandle<()>, EngineError> {
    crate::input_manager::spawn_controller(BACKEND, unifier(config), ctx, platform::GilrsBackend::open)
}

#[cfg(not(windows))]
pub fn start(_config: &AppConfig, _ctx: AdapterContext) -> Result<JoinHandle<()>, EngineError> {
    Err(EngineError::unsupported(BACKEND, "joystick backend is only enabled on Windows"))
}

#[cfg(windows)]
mod platform {
    use std::collections::{HashMap, HashSet};

    use gilrs::{Axis, Button, Event, EventType, Gilrs};
    use tracing::{debug, info};

    use super::{BACKEND, DPadButton, HatState};
    use crate::engine::{ControllerUnifier, DeviceId, TokenEvent};
    use crate::error::EngineError;
    use crate::input_manager::ControllerBackend;

    pub struct GilrsBackend {
        gilrs: Gilrs,
        hats: HashMap<DeviceId, HatState>,
    }

    impl GilrsBackend {
        pub fn open() -> Result<Self, EngineError> {
            let gilrs = Gilrs::new().map_err(|e| EngineError::unsupported(BACKEND, e.to_string()))?;
            Ok(Self {
                gilrs,
                hats: HashMap::new(),
            })
        }

        fn dpad_button(button: Button) -> Option<DPadButton> {
            match button {
                Button::DPadUp => Some(DPadButton::Up),
                Button::DPadDown => Some(DPadButton::Down),
                Button::DPadLeft => Some(DPadButton::Left),
                Button::DPadRight => Some(DPadButton::Right),
                _ => None,
            }
        }

        fn update_hat(
            &mut self,
            unifier: &mut ControllerUnifier,
            id: DeviceId,
            events: &mut Vec<TokenEvent>,
            update: impl FnOnce(&mut HatState),
        ) {
            let hat = self.hats.entry(id).or_default();
            update(hat);
            events.extend(unifier.hat(id, hat.x, hat.y));
        }
    }

    impl ControllerBackend for GilrsBackend {
        fn name(&self) -> &'static str {
            BACKEND
        }

        fn rescan(
            &mut self,
            unifier: &mut ControllerUnifier,
            events: &mut Vec<TokenEvent>,
        ) -> Result<(), EngineError> {
            let connected: HashSet<DeviceId> = self
                .gilrs
                .gamepads()
                .filter(|(_, pad)| pad.is_connected())
                .map(|(id, pad)| {
                    let id = usize::from(id);
                    if unifier.connect(id, pad.name()) {
                        info!(device = pad.name(), "Joystick connected");
                    }
                    id
                })
                .collect();

            for id in unifier.device_ids() {
                if !connected.contains(&id) {
                    self.hats.remove(&id);
                    events.extend(unifier.disconnect(id));
                }
            }
            Ok(())
        }

        fn poll(
            &mut self,
            unifier: &mut ControllerUnifier,
            events: &mut Vec<TokenEvent>,
        ) -> Result<(), EngineError> {
            while let Some(Event { id, event, .. }) = self.gilrs.next_event() {
                let device = usize::from(id);
                match event {
                    EventType::Connected => {
                        let name = self.gilrs.gamepad(id).name().to_string();
                        if unifier.connect(device, &name) {
                            info!(device = %name, "Joystick connected");
                        }
                    }
                    EventType::Disconnected => {
                        debug!(device, "Joystick disconnected");
                        self.hats.remove(&device);
                        events.extend(unifier.disconnect(device));
                    }
                    EventType::ButtonPressed(button, code) => match Self::dpad_button(button) {
                        Some(dir) => self.update_hat(unifier, device, events, |hat| hat.set_button(dir, true)),
                        None => events.extend(unifier.button(device, code.into_u32(), true)),
                    },
                    EventType::ButtonReleased(button, code) => match Self::dpad_button(button) {
                        Some(dir) => self.update_hat(unifier, device, events, |hat| hat.set_button(dir, false)),
                        None => events.extend(unifier.button(device, code.into_u32(), false)),
                    },
                    EventType::AxisChanged(Axis::DPadX, value, _) => {
                        self.update_hat(unifier, device, events, |hat| hat.x = HatState::axis_value(value))
                    }
                    EventType::AxisChanged(Axis::DPadY, value, _) => {
                        self.update_hat(unifier, device, events, |hat| hat.y = HatState::axis_value(value))
                    }
                    _ => {}
                }
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{ButtonLayout, Token, TokenEvent};

    #[test]
    fn test_hat_from_buttons() {
        let mut hat = HatState::default();
        hat.set_button(DPadButton::Up, true);
        assert_eq!(hat, HatState { x: 0, y: 1 });
        hat.set_button(DPadButton::Right, true);
        assert_eq!(hat, HatState { x: 1, y: 1 });

        // Releasing a direction that is not active leaves the axis alone.
        hat.set_button(DPadButton::Down, false);
        assert_eq!(hat, HatState { x: 1, y: 1 });

        hat.set_button(DPadButton::Up, false);
        hat.set_button(DPadButton::Right, false);
        assert_eq!(hat, HatState::default());
    }

    #[test]
    fn test_axis_dead_zone() {
        assert_eq!(HatState::axis_value(1.0), 1);
        assert_eq!(HatState::axis_value(-0.9), -1);
        assert_eq!(HatState::axis_value(0.2), 0);
    }

    #[test]
    fn test_unifier_uses_configured_layouts() {
        let mut config = AppConfig::default();
        config
            .layouts
            .push(ButtonLayout::new("switch", &["pro controller"], &[(0, "B"), (1, "A")]));
        let mut unifier = unifier(&config);
        unifier.connect(0, "Pro Controller");
        assert_eq!(unifier.button(0, 1, true), Some(TokenEvent::press(Token::button("A"))));

        unifier.connect(1, "DualShock 4");
        assert_eq!(unifier.button(1, 1, true), Some(TokenEvent::press(Token::button("CROSS"))));
    }
}
