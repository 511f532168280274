//! Binding-resolution and macro-execution engine.
//!
//! [`Engine`] is the one shared context: configuration snapshot, resolved
//! triggers, pressed-token sets and the hold-loop registry all sit behind a
//! single mutex. The kill and capture flags are atomics so hot paths can read
//! them without the lock.

pub mod macros;
pub mod router;
#[cfg(test)]
mod tests;
pub mod types;
pub mod unifier;

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender};
use tracing::{debug, info, warn};

use crate::binding::{Trigger, TriggerKind};
use crate::config::{AppConfig, ConfigStore, MemoryStore};
use crate::observer::{
    EventReporter, ExitHandler, LogReporter, NoopToggleObserver, ProcessExit, ToggleObserver,
};
use crate::output::{InputSink, NullSink, OutputLedger};

pub use macros::SpeedFlipTiming;
pub use types::*;
pub use unifier::{
    ButtonLayout, ButtonName, ControllerUnifier, DeviceId, KeyboardUnifier, LayoutTable,
};

/// External collaborators handed to the engine at construction.
pub struct Collaborators {
    pub sink: Arc<dyn InputSink>,
    pub store: Arc<dyn ConfigStore>,
    pub reporter: Arc<dyn EventReporter>,
    pub exit: Arc<dyn ExitHandler>,
}

impl Default for Collaborators {
    fn default() -> Self {
        Self {
            sink: Arc::new(NullSink),
            store: Arc::new(MemoryStore::default()),
            reporter: Arc::new(LogReporter),
            exit: Arc::new(ProcessExit),
        }
    }
}

/// State guarded by the engine lock.
pub(crate) struct EngineState {
    pub(crate) config: AppConfig,
    triggers: [Trigger; Action::COUNT],
    hold_running: HashMap<Action, bool>,
    pressed_keys: HashSet<String>,
    pressed_buttons: HashSet<String>,
}

impl EngineState {
    fn new(config: AppConfig) -> Self {
        let triggers = Self::resolve_triggers(&config);
        let hold_running = Action::ALL
            .into_iter()
            .filter(|a| a.is_hold_loop())
            .map(|a| (a, false))
            .collect();
        Self {
            config,
            triggers,
            hold_running,
            pressed_keys: HashSet::new(),
            pressed_buttons: HashSet::new(),
        }
    }

    fn resolve_triggers(config: &AppConfig) -> [Trigger; Action::COUNT] {
        Action::ALL.map(|action| {
            Trigger::try_parse(config.hotkey(action)).unwrap_or_else(|e| {
                warn!(action = %action, "{}; binding disabled", e);
                Trigger::null()
            })
        })
    }

    fn replace_config(&mut self, config: AppConfig) {
        self.triggers = Self::resolve_triggers(&config);
        self.config = config;
    }

    #[inline]
    pub(crate) fn trigger(&self, action: Action) -> &Trigger {
        &self.triggers[action.index()]
    }

    fn pressed_set(&self, kind: TriggerKind) -> &HashSet<String> {
        match kind {
            TriggerKind::Keyboard => &self.pressed_keys,
            TriggerKind::Controller => &self.pressed_buttons,
        }
    }

    fn pressed_set_mut(&mut self, kind: TriggerKind) -> &mut HashSet<String> {
        match kind {
            TriggerKind::Keyboard => &mut self.pressed_keys,
            TriggerKind::Controller => &mut self.pressed_buttons,
        }
    }

    /// Records a press or release. Returns false when nothing changed: a
    /// press of an already-held symbol or a release nobody pressed.
    pub(crate) fn track(&mut self, token: &Token, pressed: bool) -> bool {
        let set = self.pressed_set_mut(token.kind());
        if pressed {
            set.insert(token.symbol().to_string())
        } else {
            set.remove(token.symbol())
        }
    }

    /// Whether the trigger's symbol is still physically down.
    pub(crate) fn is_held(&self, trigger: &Trigger) -> bool {
        !trigger.is_null() && self.pressed_set(trigger.kind).contains(&trigger.symbol)
    }

    pub(crate) fn first_match(&self, token: &Token) -> Option<Action> {
        Action::ALL
            .into_iter()
            .find(|action| token.matches(self.trigger(*action)))
    }

    /// Global and per-feature enable flags.
    pub(crate) fn permits(&self, action: Action) -> bool {
        action.bypasses_gating()
            || (self.config.global_enabled && self.config.feature_enabled(action))
    }

    #[inline]
    pub(crate) fn is_running(&self, action: Action) -> bool {
        self.hold_running.get(&action).copied().unwrap_or(false)
    }

    #[inline]
    pub(crate) fn set_running(&mut self, action: Action, running: bool) {
        if action.is_hold_loop() {
            self.hold_running.insert(action, running);
        }
    }

    fn any_running(&self) -> bool {
        self.hold_running.values().any(|running| *running)
    }

    fn clear_pressed(&mut self) {
        self.pressed_keys.clear();
        self.pressed_buttons.clear();
    }
}

pub struct Engine {
    state: Mutex<EngineState>,
    kill: AtomicBool,
    exited: AtomicBool,
    capture_mode: AtomicBool,
    capture_sender: Sender<Token>,
    capture_receiver: Receiver<Token>,
    pub(crate) outputs: OutputLedger,
    store: Arc<dyn ConfigStore>,
    toggle_observer: Mutex<Arc<dyn ToggleObserver>>,
    /// Serializes ToggleAll flip-and-save.
    save_lock: Mutex<()>,
    reporter: Arc<dyn EventReporter>,
    exit_handler: Arc<dyn ExitHandler>,
}

impl Engine {
    pub fn new(config: AppConfig, collaborators: Collaborators) -> Arc<Self> {
        let (capture_sender, capture_receiver) = crossbeam_channel::bounded(16);
        Arc::new(Self {
            state: Mutex::new(EngineState::new(config)),
            kill: AtomicBool::new(false),
            exited: AtomicBool::new(false),
            capture_mode: AtomicBool::new(false),
            capture_sender,
            capture_receiver,
            outputs: OutputLedger::new(collaborators.sink),
            store: collaborators.store,
            toggle_observer: Mutex::new(Arc::new(NoopToggleObserver)),
            save_lock: Mutex::new(()),
            reporter: collaborators.reporter,
            exit_handler: collaborators.exit,
        })
    }

    #[inline]
    pub(crate) fn lock(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replaces the configuration snapshot and re-resolves every trigger in
    /// one critical section.
    pub fn apply_configuration(&self, config: AppConfig) {
        self.lock().replace_config(config);
        debug!("Configuration applied");
    }

    /// Copy of the current snapshot.
    pub fn configuration(&self) -> AppConfig {
        self.lock().config.clone()
    }

    pub fn global_enabled(&self) -> bool {
        self.lock().config.global_enabled
    }

    /// Suspends dispatch while a binding is being recorded. Pressed tokens
    /// are forwarded to [`Engine::capture_receiver`] instead.
    pub fn on_capture_mode(&self, active: bool) {
        if active {
            while self.capture_receiver.try_recv().is_ok() {}
        }
        self.capture_mode.store(active, Ordering::SeqCst);
        debug!(active, "Capture mode");
    }

    #[inline]
    pub fn is_capture_mode(&self) -> bool {
        self.capture_mode.load(Ordering::SeqCst)
    }

    pub fn capture_receiver(&self) -> Receiver<Token> {
        self.capture_receiver.clone()
    }

    pub fn register_toggle_observer(&self, observer: Arc<dyn ToggleObserver>) {
        *self
            .toggle_observer
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = observer;
    }

    fn toggle_observer(&self) -> Arc<dyn ToggleObserver> {
        self.toggle_observer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Same as pressing the emergency hotkey. Returns immediately.
    pub fn trigger_emergency(self: &Arc<Self>) {
        self.spawn(Action::Emergency);
    }

    /// Same as pressing the exit hotkey.
    pub fn trigger_exit(&self) {
        self.run_exit();
    }

    pub fn is_hold_running(&self, action: Action) -> bool {
        self.lock().is_running(action)
    }

    #[inline]
    pub fn is_killed(&self) -> bool {
        self.kill.load(Ordering::SeqCst)
    }

    #[inline]
    pub fn is_exited(&self) -> bool {
        self.exited.load(Ordering::SeqCst)
    }

    /// Single-consumer router loop. Returns when every sender is gone or the
    /// engine has exited.
    pub fn run(self: &Arc<Self>, events: Receiver<TokenEvent>) {
        info!("Router started");
        for event in events.iter() {
            if self.is_exited() {
                break;
            }
            self.on_token(&event.token, event.pressed);
        }
        info!("Router stopped");
    }

    /// Stops dispatch for good, drains pressed sets, waits up to `timeout`
    /// for hold loops to finish, then releases all outputs.
    pub fn shutdown(&self, timeout: Duration) {
        self.exited.store(true, Ordering::SeqCst);
        self.kill.store(true, Ordering::SeqCst);
        self.lock().clear_pressed();

        let deadline = Instant::now() + timeout;
        while self.lock().any_running() {
            if Instant::now() >= deadline {
                warn!("Hold loops still running at shutdown");
                break;
            }
            thread::sleep(Duration::from_millis(5));
        }

        self.outputs.sweep();
        info!("Engine shut down");
    }
}
