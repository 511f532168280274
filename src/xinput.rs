//! Platform-native controller adapter (XInput).
//!
//! Polls the four XInput user slots. Buttons are named by their bit position
//! in `wButtons`; the four D-pad bits are folded into a hat value so they go
//! through the same direction synthesis as the generic adapter.

use std::thread::JoinHandle;

use crate::config::AppConfig;
use crate::engine::{ButtonLayout, ControllerUnifier, DeviceId, LayoutTable, TokenEvent};
use crate::error::EngineError;
use crate::input_manager::AdapterContext;

pub const BACKEND: &str = "xinput";

const DPAD_UP: u16 = 0x0001;
const DPAD_DOWN: u16 = 0x0002;
const DPAD_LEFT: u16 = 0x0004;
const DPAD_RIGHT: u16 = 0x0008;
const DPAD_MASK: u16 = DPAD_UP | DPAD_DOWN | DPAD_LEFT | DPAD_RIGHT;

/// Hat value for the D-pad bits of a button mask, `y` positive for up.
pub fn dpad_hat(buttons: u16) -> (i32, i32) {
    let x = match (buttons & DPAD_LEFT != 0, buttons & DPAD_RIGHT != 0) {
        (true, false) => -1,
        (false, true) => 1,
        _ => 0,
    };
    let y = match (buttons & DPAD_UP != 0, buttons & DPAD_DOWN != 0) {
        (true, false) => 1,
        (false, true) => -1,
        _ => 0,
    };
    (x, y)
}

/// Feeds the difference between two button masks into the unifier.
pub fn apply_buttons(
    unifier: &mut ControllerUnifier,
    slot: DeviceId,
    previous: u16,
    current: u16,
    events: &mut Vec<TokenEvent>,
) {
    let changed = previous ^ current;
    if changed == 0 {
        return;
    }

    if changed & DPAD_MASK != 0 {
        let (x, y) = dpad_hat(current);
        events.extend(unifier.hat(slot, x, y));
    }

    let mut rest = changed & !DPAD_MASK;
    while rest != 0 {
        let bit = rest.trailing_zeros();
        rest &= rest - 1;
        let pressed = current & (1 << bit) != 0;
        events.extend(unifier.button(slot, bit, pressed));
    }
}

/// Unifier configured with the XInput bit table.
pub fn unifier() -> ControllerUnifier {
    ControllerUnifier::new(LayoutTable::fixed(ButtonLayout::xinput()))
}

#[cfg(windows)]
pub fn start(_config: &AppConfig, ctx: AdapterContext) -> Result<JoinHandle<()>, EngineError> {
    crate::input_manager::spawn_controller(BACKEND, unifier(), ctx, platform::XInputBackend::open)
}

#[cfg(not(windows))]
pub fn start(_config: &AppConfig, _ctx: AdapterContext) -> Result<JoinHandle<()>, EngineError> {
    Err(EngineError::unsupported(BACKEND, "XInput requires Windows"))
}

#[cfg(windows)]
mod platform {
    use tracing::debug;
    use windows::Win32::Foundation::ERROR_DEVICE_NOT_CONNECTED;
    use windows::Win32::UI::Input::XboxController::*;

    use super::{BACKEND, apply_buttons};
    use crate::engine::{ControllerUnifier, TokenEvent};
    use crate::error::EngineError;
    use crate::input_manager::ControllerBackend;

    /// XInput handler for Xbox controller input.
    pub struct XInputBackend {
        last_buttons: [Option<u16>; XUSER_MAX_COUNT as usize],
    }

    impl XInputBackend {
        pub fn open() -> Result<Self, EngineError> {
            Ok(Self {
                last_buttons: [None; XUSER_MAX_COUNT as usize],
            })
        }
    }

    impl ControllerBackend for XInputBackend {
        fn name(&self) -> &'static str {
            BACKEND
        }

        fn poll(
            &mut self,
            unifier: &mut ControllerUnifier,
            events: &mut Vec<TokenEvent>,
        ) -> Result<(), EngineError> {
            let mut failure = None;

            for user_index in 0..XUSER_MAX_COUNT {
                let slot = user_index as usize;
                let mut state = XINPUT_STATE::default();

                match unsafe { XInputGetState(user_index, &mut state) } {
                    0 => {
                        if unifier.connect(slot, &format!("XInput Controller {}", user_index + 1)) {
                            debug!(slot, "XInput controller connected");
                        }
                        let current = state.Gamepad.wButtons.0;
                        let previous = self.last_buttons[slot].unwrap_or(0);
                        apply_buttons(unifier, slot, previous, current, events);
                        self.last_buttons[slot] = Some(current);
                    }
                    code if code == ERROR_DEVICE_NOT_CONNECTED.0 => {
                        self.last_buttons[slot] = None;
                        if unifier.is_connected(slot) {
                            debug!(slot, "XInput controller disconnected");
                            events.extend(unifier.disconnect(slot));
                        }
                    }
                    code => {
                        failure = Some(EngineError::DeviceTransient(format!(
                            "XInput slot {} returned {}",
                            user_index, code
                        )));
                    }
                }
            }

            match failure {
                Some(e) => Err(e),
                None => Ok(()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Token;

    #[test]
    fn test_dpad_hat() {
        assert_eq!(dpad_hat(0), (0, 0));
        assert_eq!(dpad_hat(DPAD_UP), (0, 1));
        assert_eq!(dpad_hat(DPAD_DOWN | DPAD_RIGHT), (1, -1));
        assert_eq!(dpad_hat(DPAD_LEFT | 0x1000), (-1, 0));
        // Opposing bits cancel.
        assert_eq!(dpad_hat(DPAD_LEFT | DPAD_RIGHT), (0, 0));
    }

    #[test]
    fn test_apply_buttons_names_bits() {
        let mut unifier = unifier();
        let mut events = Vec::new();

        apply_buttons(&mut unifier, 0, 0, 0x1000 | 0x0010, &mut events);
        assert_eq!(
            events,
            vec![
                TokenEvent::press(Token::button("START")),
                TokenEvent::press(Token::button("A")),
            ]
        );

        events.clear();
        apply_buttons(&mut unifier, 0, 0x1010, 0x0010, &mut events);
        assert_eq!(events, vec![TokenEvent::release(Token::button("A"))]);
    }

    #[test]
    fn test_apply_buttons_dpad() {
        let mut unifier = unifier();
        let mut events = Vec::new();

        apply_buttons(&mut unifier, 1, 0, DPAD_DOWN, &mut events);
        assert_eq!(events, vec![TokenEvent::press(Token::button("DPAD_DOWN"))]);

        events.clear();
        apply_buttons(&mut unifier, 1, DPAD_DOWN, DPAD_DOWN | DPAD_LEFT, &mut events);
        assert_eq!(events, vec![TokenEvent::press(Token::button("DPAD_LEFT"))]);

        events.clear();
        apply_buttons(&mut unifier, 1, DPAD_DOWN | DPAD_LEFT, 0, &mut events);
        assert_eq!(
            events,
            vec![
                TokenEvent::release(Token::button("DPAD_DOWN")),
                TokenEvent::release(Token::button("DPAD_LEFT")),
            ]
        );
    }

    #[test]
    fn test_unchanged_mask_is_silent() {
        let mut unifier = unifier();
        let mut events = Vec::new();
        apply_buttons(&mut unifier, 0, 0x2000, 0x2000, &mut events);
        assert!(events.is_empty());
    }

    #[test]
    fn test_shoulders_and_unmapped_bits() {
        let mut unifier = unifier();
        let mut events = Vec::new();
        apply_buttons(&mut unifier, 0, 0, 0x0100 | 0x0400, &mut events);
        assert_eq!(
            events,
            vec![
                TokenEvent::press(Token::button("LB")),
                TokenEvent::press(Token::button("BTN10")),
            ]
        );
    }
}
