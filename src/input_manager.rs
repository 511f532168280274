//! Input manager coordinating the keyboard listener and controller adapters.
//!
//! Every backend runs on its own thread and sends canonical token events into
//! one channel that the router drains.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::Sender;
use tracing::{debug, info, warn};

use crate::config::{AppConfig, BackendConfig};
use crate::engine::{ControllerUnifier, LayoutTable, TokenEvent};
use crate::error::EngineError;
use crate::observer::{StatusSink, StatusUpdate};

/// One controller API polled by [`run_controller`].
pub trait ControllerBackend {
    fn name(&self) -> &'static str;

    /// Syncs the device list. Called at start and every rescan interval.
    fn rescan(
        &mut self,
        _unifier: &mut ControllerUnifier,
        _events: &mut Vec<TokenEvent>,
    ) -> Result<(), EngineError> {
        Ok(())
    }

    /// Reads current device state and appends any edges to `events`.
    fn poll(
        &mut self,
        unifier: &mut ControllerUnifier,
        events: &mut Vec<TokenEvent>,
    ) -> Result<(), EngineError>;
}

#[derive(Debug, Clone, Copy)]
pub struct AdapterSettings {
    pub poll_interval: Duration,
    pub rescan_interval: Duration,
}

impl From<&BackendConfig> for AdapterSettings {
    fn from(config: &BackendConfig) -> Self {
        Self {
            poll_interval: config.poll_interval(),
            rescan_interval: config.rescan_interval(),
        }
    }
}

/// Everything a backend thread needs.
#[derive(Clone)]
pub struct AdapterContext {
    pub sender: Sender<TokenEvent>,
    pub status: Arc<dyn StatusSink>,
    pub stop: Arc<AtomicBool>,
    pub settings: AdapterSettings,
}

/// Polls `backend` until `stop` is set or the router goes away, then emits
/// releases for everything still held.
pub fn run_controller<B: ControllerBackend>(
    mut backend: B,
    mut unifier: ControllerUnifier,
    ctx: AdapterContext,
) {
    let backend_name = backend.name();
    let mut events = Vec::new();
    let mut last_count: Option<usize> = None;
    let mut last_rescan: Option<Instant> = None;

    info!(backend = backend_name, "Controller adapter started");
    while !ctx.stop.load(Ordering::Relaxed) {
        if last_rescan.is_none_or(|t| t.elapsed() >= ctx.settings.rescan_interval) {
            if let Err(e) = backend.rescan(&mut unifier, &mut events) {
                debug!(backend = backend_name, "Rescan: {}", e);
            }
            last_rescan = Some(Instant::now());
        }

        if let Err(e) = backend.poll(&mut unifier, &mut events) {
            debug!(backend = backend_name, "Poll: {}", e);
        }

        for event in events.drain(..) {
            if ctx.sender.send(event).is_err() {
                debug!(backend = backend_name, "Router gone");
                return;
            }
        }

        let count = unifier.device_count();
        if last_count != Some(count) {
            ctx.status.status(&StatusUpdate::Connected {
                backend: backend_name,
                count,
                name: unifier.first_device_name().map(str::to_string),
            });
            last_count = Some(count);
        }

        thread::sleep(ctx.settings.poll_interval);
    }

    for event in unifier.drain() {
        let _ = ctx.sender.send(event);
    }
    info!(backend = backend_name, "Controller adapter stopped");
}

/// Opens a backend on its own thread and runs it there. Returns once the
/// backend reports whether it could initialise.
pub fn spawn_controller<B, F>(
    name: &'static str,
    unifier: ControllerUnifier,
    ctx: AdapterContext,
    open: F,
) -> Result<JoinHandle<()>, EngineError>
where
    B: ControllerBackend,
    F: FnOnce() -> Result<B, EngineError> + Send + 'static,
{
    let (ready_tx, ready_rx) = crossbeam_channel::bounded(1);
    let handle = thread::Builder::new()
        .name(format!("{}_thread", name))
        .spawn(move || match open() {
            Ok(backend) => {
                let _ = ready_tx.send(Ok(()));
                run_controller(backend, unifier, ctx);
            }
            Err(e) => {
                let _ = ready_tx.send(Err(e));
            }
        })?;

    match ready_rx.recv() {
        Ok(Ok(())) => Ok(handle),
        Ok(Err(e)) => {
            let _ = handle.join();
            Err(e)
        }
        Err(_) => Err(EngineError::unsupported(name, "backend thread exited during start")),
    }
}

/// Which backends this platform can offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Availability {
    pub keyboard: bool,
    pub joystick: bool,
    pub xinput: bool,
}

pub fn probe() -> Availability {
    Availability {
        keyboard: cfg!(windows),
        joystick: cfg!(windows),
        xinput: cfg!(windows),
    }
}

/// Stops every backend started by an [`InputManager`]. Cheap to clone.
#[derive(Clone, Default)]
pub struct StopHandle {
    flag: Arc<AtomicBool>,
    keyboard_thread: Arc<AtomicU32>,
}

impl StopHandle {
    pub fn stop(&self) {
        self.flag.store(true, Ordering::SeqCst);
        let thread_id = self.keyboard_thread.load(Ordering::SeqCst);
        if thread_id != 0 {
            crate::keyboard::stop(thread_id);
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Input manager for all input sources.
pub struct InputManager {
    stop: StopHandle,
    handles: Vec<(&'static str, JoinHandle<()>)>,
}

impl InputManager {
    /// Starts every backend that is both enabled and available. Unavailable
    /// controller backends are reported once through `status`.
    pub fn start(config: &AppConfig, sender: Sender<TokenEvent>, status: Arc<dyn StatusSink>) -> Self {
        let stop = StopHandle::default();
        let available = probe();
        let backends = &config.backends;
        let ctx = AdapterContext {
            sender,
            status: status.clone(),
            stop: stop.flag.clone(),
            settings: AdapterSettings::from(backends),
        };
        let mut handles = Vec::new();

        if backends.keyboard {
            if available.keyboard {
                match crate::keyboard::start(ctx.sender.clone(), stop.keyboard_thread.clone()) {
                    Ok(handle) => handles.push(("keyboard", handle)),
                    Err(e) => warn!("Keyboard hotkeys disabled: {}", e),
                }
            } else {
                warn!("Keyboard hotkeys disabled: no keyboard hook on this platform");
            }
        }

        let controllers: [(&'static str, bool, bool, StartFn); 2] = [
            ("joystick", backends.joystick, available.joystick, crate::joystick::start),
            ("xinput", backends.xinput, available.xinput, crate::xinput::start),
        ];
        for (name, enabled, is_available, start) in controllers {
            if !enabled {
                debug!(backend = name, "Disabled in configuration");
                continue;
            }
            let result = if is_available {
                start(config, ctx.clone())
            } else {
                Err(EngineError::unsupported(name, "not supported on this platform"))
            };
            match result {
                Ok(handle) => handles.push((name, handle)),
                Err(EngineError::UnsupportedPlatform { backend, reason }) => {
                    status.status(&StatusUpdate::Unavailable { backend, reason });
                }
                Err(e) => status.status(&StatusUpdate::Unavailable {
                    backend: name,
                    reason: e.to_string(),
                }),
            }
        }

        info!(running = handles.len(), "Input backends started");
        Self { stop, handles }
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn backend_count(&self) -> usize {
        self.handles.len()
    }

    /// Stops all backends and waits for them to emit their final releases.
    pub fn shutdown(self) {
        self.stop.stop();
        for (name, handle) in self.handles {
            if handle.join().is_err() {
                warn!(backend = name, "Backend thread panicked");
            }
        }
    }
}

type StartFn = fn(&AppConfig, AdapterContext) -> Result<JoinHandle<()>, EngineError>;
