//! Capability interfaces the engine calls out through.
//!
//! Each has a default implementation that either logs or does nothing, so the
//! engine can be constructed without a UI attached.

use std::fmt;

use tracing::{debug, info, warn};

/// Notified after the global enable flag flips.
pub trait ToggleObserver: Send + Sync {
    fn on_toggle(&self, enabled: bool);
}

/// Observer used until a UI registers its own.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopToggleObserver;

impl ToggleObserver for NoopToggleObserver {
    fn on_toggle(&self, _enabled: bool) {}
}

impl<F> ToggleObserver for F
where
    F: Fn(bool) + Send + Sync,
{
    fn on_toggle(&self, enabled: bool) {
        self(enabled)
    }
}

/// Controller connectivity, for display only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusUpdate {
    Connected {
        backend: &'static str,
        count: usize,
        name: Option<String>,
    },
    Unavailable {
        backend: &'static str,
        reason: String,
    },
}

impl fmt::Display for StatusUpdate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatusUpdate::Connected { backend, count: 0, .. } => {
                write!(f, "Controller: none connected ({backend}).")
            }
            StatusUpdate::Connected {
                backend,
                count: 1,
                name: Some(name),
            } => write!(f, "Controller: 1 connected ({backend}) — {name}."),
            StatusUpdate::Connected { backend, count, .. } => {
                write!(f, "Controller: {count} connected ({backend}).")
            }
            StatusUpdate::Unavailable { backend, reason } => {
                write!(f, "Controller: {backend} not available: {reason}.")
            }
        }
    }
}

pub trait StatusSink: Send + Sync {
    fn status(&self, update: &StatusUpdate);
}

/// Writes status transitions to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogStatus;

impl StatusSink for LogStatus {
    fn status(&self, update: &StatusUpdate) {
        match update {
            StatusUpdate::Unavailable { .. } => warn!("{}", update),
            StatusUpdate::Connected { .. } => info!("{}", update),
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopStatus;

impl StatusSink for NoopStatus {
    fn status(&self, _update: &StatusUpdate) {}
}

/// Fire-and-forget usage reporting. Implementations must not block.
pub trait EventReporter: Send + Sync {
    fn report_event(&self, name: &str);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LogReporter;

impl EventReporter for LogReporter {
    fn report_event(&self, name: &str) {
        debug!(event = name, "action dispatched");
    }
}

/// Terminates the process once the Exit action has released all outputs.
pub trait ExitHandler: Send + Sync {
    fn exit(&self);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessExit;

impl ExitHandler for ProcessExit {
    fn exit(&self) {
        info!("Exiting");
        std::process::exit(0);
    }
}
