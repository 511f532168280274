//! Console interrupt handling.

use anyhow::{Context, Result};
use tracing::info;

use crate::input_manager::StopHandle;

/// Stops all input backends on Ctrl+C, Ctrl+Break or console close. The
/// router then runs out of events and the caller shuts the engine down.
pub fn install(stop: StopHandle) -> Result<()> {
    ctrlc::set_handler(move || {
        if stop.is_stopped() {
            // Second interrupt while backends are still winding down
            std::process::exit(1);
        }
        info!("Shutdown signal received");
        stop.stop();
    })
    .context("Failed to set Ctrl+C handler")
}
