//! Macro executor.
//!
//! Every dispatched action runs on its own named thread. Output goes through
//! a [`MacroRun`], which remembers what it pressed and lets go of it on drop,
//! so early returns and panics still release held keys.

use std::sync::{Arc, PoisonError};
use std::sync::atomic::Ordering;
use std::thread;
use std::time::Duration;

use smallvec::SmallVec;
use tracing::{debug, error, info, warn};

use super::{Action, Engine, MouseButton, Output, OutputKey, Tone};
use crate::config::AppConfig;
use crate::output::OutputLedger;
use crate::util::{precise_sleep, unlikely};

/// Pause between the emergency sweep and clearing the kill flag.
pub const EMERGENCY_PAUSE: Duration = Duration::from_millis(150);

/// Tail added to every hold-loop cycle.
const CYCLE_TAIL: Duration = Duration::from_millis(1);

/// Outputs pressed by one macro run, each stamped with its sweep epoch.
pub(crate) struct MacroRun<'a> {
    ledger: &'a OutputLedger,
    held: SmallVec<[(Output, u64); 8]>,
    /// Sweep epoch after which presses are dropped.
    bound: Option<u64>,
}

impl<'a> MacroRun<'a> {
    pub(crate) fn new(ledger: &'a OutputLedger) -> Self {
        Self {
            ledger,
            held: SmallVec::new(),
            bound: None,
        }
    }

    /// Run that stops pressing anything once a sweep has happened.
    pub(crate) fn until_sweep(ledger: &'a OutputLedger) -> Self {
        Self {
            ledger,
            held: SmallVec::new(),
            bound: Some(ledger.epoch()),
        }
    }

    /// Whether a sweep has ended this run.
    pub(crate) fn is_swept(&self) -> bool {
        self.bound.is_some_and(|bound| self.ledger.epoch() != bound)
    }

    pub(crate) fn down(&mut self, output: impl Into<Output>) {
        let output = output.into();
        let epoch = match self.bound {
            Some(bound) => match self.ledger.press_within(output, bound) {
                Some(epoch) => epoch,
                None => return,
            },
            None => self.ledger.press(output),
        };
        match self.held.iter_mut().find(|(o, _)| *o == output) {
            Some(entry) => entry.1 = epoch,
            None => self.held.push((output, epoch)),
        }
    }

    pub(crate) fn up(&mut self, output: impl Into<Output>) {
        let output = output.into();
        if let Some(pos) = self.held.iter().position(|(o, _)| *o == output) {
            let (output, epoch) = self.held.remove(pos);
            self.ledger.release(output, epoch);
        }
    }

    /// Key-up whether or not this run pressed it.
    pub(crate) fn force_up(&mut self, output: impl Into<Output>) {
        let output = output.into();
        if self.held.iter().any(|(o, _)| *o == output) {
            self.up(output);
        } else {
            self.ledger.release_unowned(output);
        }
    }

    pub(crate) fn click(&mut self, button: MouseButton, hold: Duration) {
        self.down(button);
        precise_sleep(hold);
        self.up(button);
    }

    /// Releases everything still held, most recent first.
    pub(crate) fn release_all(&mut self) {
        while let Some((output, epoch)) = self.held.pop() {
            self.ledger.release(output, epoch);
        }
    }
}

impl Drop for MacroRun<'_> {
    fn drop(&mut self) {
        self.release_all();
    }
}

/// SpeedFlip parameters and the derived wait windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpeedFlipTiming {
    pub a_hold: Duration,
    pub wait_before_jump: Duration,
    pub s_hold: Duration,
    pub d_hold: Duration,
    pub airroll: Duration,
    pub shift_start: Duration,
    pub shift_duration: Duration,
    pub prejump: Duration,
    pub click_down: Duration,
    pub between_jumps: Duration,
    pub post_shift: Duration,
}

impl SpeedFlipTiming {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            a_hold: config.timing("sf_a_hold_ms"),
            wait_before_jump: config.timing("sf_wait_before_jump_ms"),
            s_hold: config.timing("sf_s_hold_ms"),
            d_hold: config.timing("sf_d_hold_ms"),
            airroll: config.timing("sf_airroll_time_ms"),
            shift_start: config.timing("sf_shift_start_ms"),
            shift_duration: config.timing("sf_shift_duration_ms"),
            prejump: config.timing("sf_prejump_ms"),
            click_down: config.timing("sf_click_down_ms"),
            between_jumps: config.timing("sf_between_jumps_ms"),
            post_shift: config.timing("sf_post_shift_ms"),
        }
    }

    #[inline]
    pub fn longer_hold(&self) -> Duration {
        self.s_hold.max(self.d_hold)
    }

    #[inline]
    pub fn shorter_hold(&self) -> Duration {
        self.s_hold.min(self.d_hold)
    }

    /// Keys in release order: the one with the shorter hold goes first. Ties
    /// release D first.
    pub fn release_order(&self) -> (OutputKey, OutputKey) {
        if self.s_hold < self.d_hold {
            (OutputKey::S, OutputKey::D)
        } else {
            (OutputKey::D, OutputKey::S)
        }
    }

    /// `airroll - max(s, d)`, never negative.
    #[inline]
    pub fn until_e_release(&self) -> Duration {
        self.airroll.saturating_sub(self.longer_hold())
    }

    /// `shift_start - max(airroll, max(s, d))`, never negative.
    #[inline]
    pub fn until_shift(&self) -> Duration {
        self.shift_start
            .saturating_sub(self.airroll.max(self.longer_hold()))
    }
}

#[derive(Debug, Clone, Copy)]
struct DashTiming {
    pre: Duration,
    click_down: Duration,
    between_clicks: Duration,
}

impl DashTiming {
    fn for_action(action: Action, config: &AppConfig) -> Self {
        match action {
            Action::TurningDashHold => Self {
                pre: config.timing("td_pre_ms"),
                click_down: config.timing("td_click_down_ms"),
                between_clicks: config.timing("td_between_clicks_ms"),
            },
            _ => Self {
                pre: Duration::ZERO,
                click_down: config.timing("sd_click_down_ms"),
                between_clicks: config.timing("sd_between_clicks_ms"),
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HoldExit {
    Killed,
    Released,
    Disabled,
}

/// Clears the registry entry when the loop thread leaves, however it leaves.
struct HoldRegistration<'a> {
    engine: &'a Engine,
    action: Action,
}

impl Drop for HoldRegistration<'_> {
    fn drop(&mut self) {
        self.engine.lock().set_running(self.action, false);
    }
}

impl Engine {
    /// Runs `action` on a detached thread.
    pub(crate) fn spawn(self: &Arc<Self>, action: Action) {
        let engine = Arc::clone(self);
        let spawned = thread::Builder::new()
            .name(format!("macro_{}", action.config_key()))
            .spawn(move || engine.execute(action));

        if let Err(e) = spawned {
            error!(%action, "Failed to spawn macro thread: {}", e);
            if action.is_hold_loop() {
                self.lock().set_running(action, false);
            }
        }
    }

    pub(crate) fn execute(&self, action: Action) {
        match action {
            Action::ToggleAll => self.run_toggle_all(),
            Action::Stall => self.run_stall(),
            Action::SpeedFlip => self.run_speed_flip(),
            Action::StraightDashHold | Action::TurningDashHold => self.run_hold_loop(action),
            Action::Emergency => self.run_emergency(),
            Action::Exit => self.run_exit(),
        }
    }

    /// Re-checks gating and reads what the run needs, in one critical section.
    fn one_shot_snapshot<T>(&self, action: Action, read: impl FnOnce(&AppConfig) -> T) -> Option<T> {
        if unlikely(self.is_killed()) {
            return None;
        }
        let state = self.lock();
        if !state.permits(action) {
            debug!(%action, "Disabled before start");
            return None;
        }
        Some(read(&state.config))
    }

    pub(crate) fn run_toggle_all(&self) {
        // Held across flip and save so the file sees flips in order
        let _save = self.save_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let (enabled, snapshot) = {
            let mut state = self.lock();
            state.config.global_enabled = !state.config.global_enabled;
            (state.config.global_enabled, state.config.clone())
        };

        if let Err(e) = self.store.save(&snapshot) {
            warn!("Failed to save configuration: {}", e);
        }
        self.outputs
            .tone(if enabled { Tone::High } else { Tone::Low });
        info!(enabled, "Global enable toggled");
        self.toggle_observer().on_toggle(enabled);
    }

    pub(crate) fn run_emergency(&self) {
        warn!("Emergency stop");
        self.kill.store(true, Ordering::SeqCst);
        self.outputs.sweep();
        self.outputs.tone(Tone::Low);
        thread::sleep(EMERGENCY_PAUSE);
        if !self.is_exited() {
            self.kill.store(false, Ordering::SeqCst);
        }
    }

    pub(crate) fn run_exit(&self) {
        info!("Exit requested");
        self.exited.store(true, Ordering::SeqCst);
        self.kill.store(true, Ordering::SeqCst);
        self.outputs.sweep();
        self.exit_handler.exit();
    }

    pub(crate) fn run_stall(&self) {
        let Some(click) =
            self.one_shot_snapshot(Action::Stall, |config| config.timing("stall_click_ms"))
        else {
            return;
        };

        let mut run = MacroRun::new(&self.outputs);
        run.down(OutputKey::Q);
        run.down(OutputKey::D);
        run.click(MouseButton::Right, click);
        run.up(OutputKey::D);
        run.up(OutputKey::Q);
    }

    pub(crate) fn run_speed_flip(&self) {
        let Some(t) = self.one_shot_snapshot(Action::SpeedFlip, SpeedFlipTiming::from_config)
        else {
            return;
        };

        let mut run = MacroRun::new(&self.outputs);
        run.down(OutputKey::I);
        run.down(OutputKey::A);
        precise_sleep(t.a_hold);
        run.up(OutputKey::A);
        precise_sleep(t.wait_before_jump);

        for key in [OutputKey::W, OutputKey::S, OutputKey::E, OutputKey::Q] {
            run.force_up(key);
        }
        run.down(OutputKey::E);
        run.down(OutputKey::W);
        precise_sleep(t.prejump);

        run.click(MouseButton::Right, t.click_down);
        precise_sleep(t.between_jumps);
        run.click(MouseButton::Right, t.click_down);

        run.up(OutputKey::W);
        run.down(OutputKey::S);
        run.down(OutputKey::D);

        // S is replaced by W as soon as it is let go.
        let (first, second) = t.release_order();
        precise_sleep(t.shorter_hold());
        run.up(first);
        if first == OutputKey::S {
            run.down(OutputKey::W);
        }
        precise_sleep(t.longer_hold() - t.shorter_hold());
        run.up(second);
        if second == OutputKey::S {
            run.down(OutputKey::W);
        }

        precise_sleep(t.until_e_release());
        run.up(OutputKey::E);
        precise_sleep(t.until_shift());

        run.down(OutputKey::LShift);
        precise_sleep(t.shift_duration);
        run.up(OutputKey::LShift);
        precise_sleep(t.post_shift);
        run.up(OutputKey::I);
    }

    pub(crate) fn run_hold_loop(&self, action: Action) {
        self.lock().set_running(action, true);
        let _registration = HoldRegistration {
            engine: self,
            action,
        };

        let (trigger, timing) = {
            let state = self.lock();
            (
                state.trigger(action).clone(),
                DashTiming::for_action(action, &state.config),
            )
        };
        info!(%action, %trigger, "Hold loop started");

        let mut run = MacroRun::until_sweep(&self.outputs);
        let mut cycles: u64 = 0;
        let reason = loop {
            // A sweep outlasting the kill pause still ends the loop
            if unlikely(self.is_killed() || run.is_swept()) {
                break HoldExit::Killed;
            }
            {
                let state = self.lock();
                if !state.is_held(&trigger) {
                    break HoldExit::Released;
                }
                if !state.permits(action) {
                    break HoldExit::Disabled;
                }
            }

            match action {
                Action::TurningDashHold => turning_dash_cycle(&mut run, &timing),
                _ => straight_dash_cycle(&mut run, &timing),
            }
            cycles += 1;
        };

        run.release_all();
        info!(%action, ?reason, cycles, "Hold loop stopped");
    }
}

fn straight_dash_cycle(run: &mut MacroRun<'_>, timing: &DashTiming) {
    run.down(OutputKey::W);
    run.down(OutputKey::Q);
    run.click(MouseButton::Right, timing.click_down);
    precise_sleep(timing.between_clicks);
    run.click(MouseButton::Right, timing.click_down);
    precise_sleep(CYCLE_TAIL);
}

fn turning_dash_cycle(run: &mut MacroRun<'_>, timing: &DashTiming) {
    run.down(OutputKey::W);
    run.down(OutputKey::Q);
    run.down(OutputKey::D);
    precise_sleep(timing.pre);
    run.up(OutputKey::D);
    run.down(OutputKey::A);
    run.click(MouseButton::Right, timing.click_down);
    precise_sleep(timing.between_clicks);
    run.click(MouseButton::Right, timing.click_down);
    run.up(OutputKey::A);
    precise_sleep(CYCLE_TAIL);
}
