//! Synthetic input sink.
//!
//! The sink itself is stateless. [`OutputLedger`] sits in front of it and
//! gives macro runs and the release sweep a shared notion of "who released
//! what" so that each key-down gets exactly one key-up.

use std::sync::{Arc, Mutex, PoisonError};

use tracing::warn;

use crate::engine::{MouseButton, Output, OutputKey, Tone};
use crate::error::EngineError;

/// Marker placed in `dwExtraInfo` of injected events so the keyboard hook can
/// skip the engine's own output.
pub const SIMULATED_EVENT_MARKER: usize = 0x5053;

pub trait InputSink: Send + Sync {
    fn key(&self, key: OutputKey, down: bool) -> Result<(), EngineError>;

    fn mouse(&self, button: MouseButton, down: bool) -> Result<(), EngineError>;

    /// Audible feedback. Best effort.
    fn tone(&self, _tone: Tone) {}
}

/// Serialises sink access against the release sweep.
///
/// Each press is stamped with the sweep epoch current at the time. A run only
/// issues its own key-up if no sweep has happened since it pressed the key;
/// otherwise the sweep already released it.
pub struct OutputLedger {
    sink: Arc<dyn InputSink>,
    epoch: Mutex<u64>,
}

impl OutputLedger {
    pub fn new(sink: Arc<dyn InputSink>) -> Self {
        Self {
            sink,
            epoch: Mutex::new(0),
        }
    }

    /// Issues a key-down and returns the epoch it belongs to.
    pub fn press(&self, output: Output) -> u64 {
        let epoch = self.epoch.lock().unwrap_or_else(PoisonError::into_inner);
        self.emit(output, true);
        *epoch
    }

    /// Key-down only while the sweep epoch is still `bound`. Returns the
    /// press epoch, or `None` if a sweep has happened since.
    pub fn press_within(&self, output: Output, bound: u64) -> Option<u64> {
        let epoch = self.epoch.lock().unwrap_or_else(PoisonError::into_inner);
        if *epoch != bound {
            return None;
        }
        self.emit(output, true);
        Some(*epoch)
    }

    #[inline]
    pub fn epoch(&self) -> u64 {
        *self.epoch.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Issues the key-up for a press made at `pressed_epoch`, unless a sweep
    /// has released it in the meantime. Returns whether a key-up was sent.
    pub fn release(&self, output: Output, pressed_epoch: u64) -> bool {
        let epoch = self.epoch.lock().unwrap_or_else(PoisonError::into_inner);
        if *epoch != pressed_epoch {
            return false;
        }
        self.emit(output, false);
        true
    }

    /// Key-up for an output the caller never pressed.
    pub fn release_unowned(&self, output: Output) {
        let _epoch = self.epoch.lock().unwrap_or_else(PoisonError::into_inner);
        self.emit(output, false);
    }

    /// Releases everything the engine could have pressed.
    pub fn sweep(&self) {
        let mut epoch = self.epoch.lock().unwrap_or_else(PoisonError::into_inner);
        for output in Output::all() {
            self.emit(output, false);
        }
        *epoch += 1;
    }

    pub fn tone(&self, tone: Tone) {
        self.sink.tone(tone);
    }

    fn emit(&self, output: Output, down: bool) {
        let result = match output {
            Output::Key(key) => self.sink.key(key, down),
            Output::Mouse(button) => self.sink.mouse(button, down),
        };
        if let Err(e) = result {
            warn!("{}", e);
        }
    }
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl InputSink for NullSink {
    fn key(&self, _key: OutputKey, _down: bool) -> Result<(), EngineError> {
        Ok(())
    }

    fn mouse(&self, _button: MouseButton, _down: bool) -> Result<(), EngineError> {
        Ok(())
    }
}

/// One call recorded by [`RecordingSink`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SinkEvent {
    pub output: Output,
    pub down: bool,
}

/// Keeps every call in memory. Used by tests and dry runs.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<SinkEvent>>,
    tones: Mutex<Vec<Tone>>,
    fail: std::sync::atomic::AtomicBool,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent key and mouse call fail after being recorded.
    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, std::sync::atomic::Ordering::Relaxed);
    }

    pub fn events(&self) -> Vec<SinkEvent> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn tones(&self) -> Vec<Tone> {
        self.tones.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn clear(&self) {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).clear();
        self.tones.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }

    /// Outputs whose most recent recorded event is a key-down.
    pub fn held(&self) -> Vec<Output> {
        let events = self.events();
        let mut held: Vec<Output> = Vec::new();
        for event in events {
            held.retain(|o| *o != event.output);
            if event.down {
                held.push(event.output);
            }
        }
        held
    }

    pub fn downs(&self, output: Output) -> usize {
        self.events()
            .iter()
            .filter(|e| e.output == output && e.down)
            .count()
    }

    fn record(&self, output: Output, down: bool) -> Result<(), EngineError> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(SinkEvent { output, down });
        if self.fail.load(std::sync::atomic::Ordering::Relaxed) {
            return Err(EngineError::OutputInjectionFailure(format!("{output:?}")));
        }
        Ok(())
    }
}

impl InputSink for RecordingSink {
    fn key(&self, key: OutputKey, down: bool) -> Result<(), EngineError> {
        self.record(Output::Key(key), down)
    }

    fn mouse(&self, button: MouseButton, down: bool) -> Result<(), EngineError> {
        self.record(Output::Mouse(button), down)
    }

    fn tone(&self, tone: Tone) {
        self.tones.lock().unwrap_or_else(PoisonError::into_inner).push(tone);
    }
}

#[cfg(windows)]
pub use platform::SendInputSink;

#[cfg(windows)]
mod platform {
    use windows::Win32::System::Diagnostics::Debug::Beep;
    use windows::Win32::UI::Input::KeyboardAndMouse::*;

    use super::{InputSink, SIMULATED_EVENT_MARKER};
    use crate::engine::{MouseButton, OutputKey, Tone};
    use crate::error::EngineError;

    /// Injects events with `SendInput`.
    #[derive(Debug, Default, Clone, Copy)]
    pub struct SendInputSink;

    impl SendInputSink {
        #[inline]
        fn send(input: INPUT) -> Result<(), EngineError> {
            let sent = unsafe { SendInput(&[input], std::mem::size_of::<INPUT>() as i32) };
            if sent == 0 {
                return Err(EngineError::OutputInjectionFailure(
                    std::io::Error::last_os_error().to_string(),
                ));
            }
            Ok(())
        }
    }

    impl InputSink for SendInputSink {
        fn key(&self, key: OutputKey, down: bool) -> Result<(), EngineError> {
            let mut flags = KEYEVENTF_SCANCODE;
            if !down {
                flags |= KEYEVENTF_KEYUP;
            }
            Self::send(INPUT {
                r#type: INPUT_KEYBOARD,
                Anonymous: INPUT_0 {
                    ki: KEYBDINPUT {
                        wVk: VIRTUAL_KEY(0),
                        wScan: key.scancode(),
                        dwFlags: flags,
                        time: 0,
                        dwExtraInfo: SIMULATED_EVENT_MARKER,
                    },
                },
            })
        }

        fn mouse(&self, button: MouseButton, down: bool) -> Result<(), EngineError> {
            let flags = match (button, down) {
                (MouseButton::Right, true) => MOUSEEVENTF_RIGHTDOWN,
                (MouseButton::Right, false) => MOUSEEVENTF_RIGHTUP,
            };
            Self::send(INPUT {
                r#type: INPUT_MOUSE,
                Anonymous: INPUT_0 {
                    mi: MOUSEINPUT {
                        dx: 0,
                        dy: 0,
                        mouseData: 0,
                        dwFlags: flags,
                        time: 0,
                        dwExtraInfo: SIMULATED_EVENT_MARKER,
                    },
                },
            })
        }

        fn tone(&self, tone: Tone) {
            // Beep blocks for its duration.
            let _ = std::thread::Builder::new()
                .name("tone".to_string())
                .spawn(move || unsafe {
                    let _ = Beep(tone.frequency(), Tone::DURATION_MS);
                });
        }
    }
}
