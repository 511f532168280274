//! Common utility functions.
//!
//! Provides a branch prediction hint and the sleep used for macro timing.

use std::thread;
use std::time::{Duration, Instant};

/// Marker function for cold code paths.
#[inline(always)]
#[cold]
pub fn cold() {}

/// Branch prediction hint for conditions expected to be false.
#[inline(always)]
pub fn unlikely(b: bool) -> bool {
    if b {
        cold()
    }
    b
}

/// Remaining time below which [`precise_sleep`] stops sleeping and spins.
const SPIN_THRESHOLD: Duration = Duration::from_millis(1);

/// Sleeps for `duration` with sub-millisecond accuracy.
///
/// Hands the bulk of the wait to the OS scheduler and spins through the last
/// millisecond, yielding between checks.
pub fn precise_sleep(duration: Duration) {
    if duration.is_zero() {
        return;
    }
    let deadline = Instant::now() + duration;
    if duration > SPIN_THRESHOLD {
        thread::sleep(duration - SPIN_THRESHOLD);
    }
    while Instant::now() < deadline {
        thread::yield_now();
    }
}
