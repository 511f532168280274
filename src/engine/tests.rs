//! Unit tests for the engine module.

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::thread;
    use std::time::{Duration, Instant};

    use crate::binding::{Modifier, ModifierSet};
    use crate::config::{AppConfig, DEFAULT_TIMINGS, MemoryStore};
    use crate::engine::macros::MacroRun;
    use crate::engine::*;
    use crate::observer::{EventReporter, ExitHandler};
    use crate::output::{OutputLedger, RecordingSink, SinkEvent};

    #[derive(Default)]
    struct RecordingReporter {
        events: Mutex<Vec<String>>,
    }

    impl RecordingReporter {
        fn events(&self) -> Vec<String> {
            self.events.lock().unwrap().clone()
        }

        fn count(&self, name: &str) -> usize {
            self.events().iter().filter(|e| *e == name).count()
        }
    }

    impl EventReporter for RecordingReporter {
        fn report_event(&self, name: &str) {
            self.events.lock().unwrap().push(name.to_string());
        }
    }

    #[derive(Default)]
    struct RecordingExit {
        calls: AtomicUsize,
    }

    impl ExitHandler for RecordingExit {
        fn exit(&self) {
            self.calls.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct Harness {
        engine: Arc<Engine>,
        sink: Arc<RecordingSink>,
        store: Arc<MemoryStore>,
        reporter: Arc<RecordingReporter>,
        exit: Arc<RecordingExit>,
    }

    fn harness(config: AppConfig) -> Harness {
        let sink = Arc::new(RecordingSink::new());
        let store = Arc::new(MemoryStore::new(config.clone()));
        let reporter = Arc::new(RecordingReporter::default());
        let exit = Arc::new(RecordingExit::default());
        let engine = Engine::new(
            config,
            Collaborators {
                sink: sink.clone(),
                store: store.clone(),
                reporter: reporter.clone(),
                exit: exit.clone(),
            },
        );
        Harness {
            engine,
            sink,
            store,
            reporter,
            exit,
        }
    }

    /// Every timing set to 1 ms so macros finish quickly.
    fn fast_config() -> AppConfig {
        let mut config = AppConfig::default();
        for (name, _) in DEFAULT_TIMINGS {
            config.set_timing(name, 1);
        }
        config
    }

    fn wait_until(timeout_ms: u64, mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_millis(timeout_ms);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(1));
        }
        condition()
    }

    fn press(h: &Harness, token: Token) {
        h.engine.on_token(&token, true);
    }

    fn release(h: &Harness, token: Token) {
        h.engine.on_token(&token, false);
    }

    fn key(output: OutputKey) -> Output {
        Output::Key(output)
    }

    #[test]
    fn test_action_order_and_keys() {
        assert_eq!(Action::ALL[0], Action::ToggleAll);
        assert_eq!(Action::ALL[6], Action::Exit);
        for (i, action) in Action::ALL.iter().enumerate() {
            assert_eq!(action.index(), i);
            assert_eq!(Action::from_config_key(action.config_key()), Some(*action));
        }
        assert_eq!(Action::StraightDashHold.execution_kind(), ExecutionKind::HoldLoop);
        assert_eq!(Action::SpeedFlip.execution_kind(), ExecutionKind::OneShot);
        assert!(Action::Emergency.bypasses_gating());
        assert!(Action::ToggleAll.feature_key().is_none());
        assert_eq!(Action::TurningDashHold.feature_key(), Some("turningdash"));
    }

    #[test]
    fn test_token_matching() {
        let ctrl: ModifierSet = [Modifier::Ctrl].into_iter().collect();
        let ctrl_shift: ModifierSet = [Modifier::Ctrl, Modifier::Shift].into_iter().collect();
        let trigger = crate::binding::Trigger::parse("Ctrl+H");

        assert!(!Token::key("H").matches(&trigger));
        assert!(Token::key_with("h", ctrl).matches(&trigger));
        assert!(Token::key_with("H", ctrl_shift).matches(&trigger));
        assert!(!Token::button("H").matches(&trigger));

        let pad = crate::binding::Trigger::parse("GP:a");
        assert!(Token::button("A").matches(&pad));
        assert!(!Token::key("A").matches(&pad));
        assert!(!Token::key("A").matches(&crate::binding::Trigger::null()));
    }

    /// Tests that the earlier action wins when two share a trigger.
    #[test]
    fn test_first_match_wins() {
        let mut config = fast_config();
        config.set_hotkey(Action::Stall, "X");
        config.set_hotkey(Action::SpeedFlip, "x");
        let h = harness(config);

        assert_eq!(h.engine.resolve(&Token::key("X")), Some(Action::Stall));
        press(&h, Token::key("X"));
        assert_eq!(h.reporter.events(), vec!["stall".to_string()]);

        assert!(wait_until(1000, || h.sink.downs(key(OutputKey::Q)) == 1));
        thread::sleep(Duration::from_millis(20));
        assert_eq!(h.sink.downs(key(OutputKey::I)), 0);
    }

    #[test]
    fn test_gating_when_disabled() {
        let mut config = fast_config();
        config.global_enabled = false;
        let h = harness(config);

        press(&h, Token::key("F"));
        assert_eq!(h.reporter.count("stall"), 0);

        press(&h, Token::key("L"));
        assert_eq!(h.reporter.count("emergency"), 1);
        assert!(wait_until(1000, || h.sink.tones().len() == 1 && !h.engine.is_killed()));

        press(&h, Token::key("F10"));
        assert_eq!(h.reporter.count("exit"), 1);
        assert!(wait_until(1000, || h.exit.calls.load(Ordering::SeqCst) == 1));
    }

    #[test]
    fn test_feature_flag_gates_action() {
        let mut config = fast_config();
        config.set_feature(Action::SpeedFlip, false);
        let h = harness(config);

        press(&h, Token::key("H"));
        assert!(h.reporter.events().is_empty());
        press(&h, Token::key("F"));
        assert_eq!(h.reporter.count("stall"), 1);
    }

    #[test]
    fn test_modifiers_must_be_active() {
        let mut config = fast_config();
        config.set_hotkey(Action::Stall, "Ctrl+G");
        let h = harness(config);

        press(&h, Token::key("G"));
        release(&h, Token::key("G"));
        assert!(h.reporter.events().is_empty());

        let modifiers: ModifierSet = [Modifier::Ctrl, Modifier::Alt].into_iter().collect();
        press(&h, Token::key_with("G", modifiers));
        assert_eq!(h.reporter.count("stall"), 1);
    }

    #[test]
    fn test_repeated_press_dispatches_once() {
        let h = harness(fast_config());

        for _ in 0..5 {
            press(&h, Token::key("V"));
        }
        assert_eq!(h.reporter.count("straightdash"), 1);
        assert!(h.engine.is_hold_running(Action::StraightDashHold));

        release(&h, Token::key("V"));
        assert!(wait_until(1000, || !h.engine.is_hold_running(Action::StraightDashHold)));
        assert!(h.sink.held().is_empty());
    }

    #[test]
    fn test_running_hold_loop_blocks_redispatch() {
        let h = harness(fast_config());
        h.engine
            .lock()
            .set_running(Action::StraightDashHold, true);

        press(&h, Token::key("V"));
        assert_eq!(h.reporter.count("straightdash"), 0);

        // A different hold action is unaffected.
        press(&h, Token::key("N"));
        assert_eq!(h.reporter.count("turningdash"), 1);
        release(&h, Token::key("N"));
        assert!(wait_until(1000, || !h.engine.is_hold_running(Action::TurningDashHold)));
    }

    #[test]
    fn test_release_without_press_is_ignored() {
        let h = harness(fast_config());
        release(&h, Token::key("F"));
        release(&h, Token::button("A"));
        assert!(h.reporter.events().is_empty());

        press(&h, Token::key("F"));
        assert_eq!(h.reporter.count("stall"), 1);
    }

    /// Tests the controller hold scenario: press starts the loop, release
    /// stops it and leaves nothing held.
    #[test]
    fn test_controller_hold_end_to_end() {
        let mut config = AppConfig::default();
        config.set_hotkey(Action::StraightDashHold, "GP:A");
        config.set_timing("sd_click_down_ms", 15);
        config.set_timing("sd_between_clicks_ms", 25);
        let h = harness(config);

        press(&h, Token::button("A"));
        assert!(h.engine.is_hold_running(Action::StraightDashHold));
        assert!(wait_until(1000, || h.sink.downs(key(OutputKey::W)) >= 1));

        release(&h, Token::button("A"));
        assert!(wait_until(1000, || !h.engine.is_hold_running(Action::StraightDashHold)));
        assert!(h.sink.held().is_empty());

        let events = h.sink.events();
        assert!(events.contains(&SinkEvent {
            output: Output::Mouse(MouseButton::Right),
            down: true,
        }));
        let last_w = events.iter().rev().find(|e| e.output == key(OutputKey::W));
        assert_eq!(last_w.map(|e| e.down), Some(false));
    }

    #[test]
    fn test_turning_dash_cleanup() {
        let h = harness(fast_config());
        press(&h, Token::key("N"));
        assert!(wait_until(1000, || h.sink.downs(key(OutputKey::A)) >= 2));
        release(&h, Token::key("N"));
        assert!(wait_until(1000, || !h.engine.is_hold_running(Action::TurningDashHold)));
        assert!(h.sink.held().is_empty());
    }

    #[test]
    fn test_feature_disabled_mid_hold() {
        let h = harness(fast_config());
        press(&h, Token::key("V"));
        assert!(wait_until(1000, || h.sink.downs(key(OutputKey::Q)) >= 1));

        let mut config = h.engine.configuration();
        config.set_feature(Action::StraightDashHold, false);
        h.engine.apply_configuration(config);

        assert!(wait_until(1000, || !h.engine.is_hold_running(Action::StraightDashHold)));
        assert!(h.sink.held().is_empty());
    }

    #[test]
    fn test_emergency_stops_hold_loop() {
        let h = harness(fast_config());
        press(&h, Token::key("V"));
        assert!(wait_until(1000, || h.sink.downs(key(OutputKey::W)) >= 1));

        h.engine.run_emergency();
        assert!(!h.engine.is_killed());
        assert!(wait_until(1000, || !h.engine.is_hold_running(Action::StraightDashHold)));
        assert!(h.sink.held().is_empty());
        assert_eq!(h.sink.tones(), vec![Tone::Low]);
    }

    #[test]
    fn test_emergency_stops_long_cycle_hold_loop() {
        let mut config = fast_config();
        config.set_timing("sd_click_down_ms", 150);
        let h = harness(config);
        press(&h, Token::key("V"));
        assert!(wait_until(1000, || h.sink.downs(key(OutputKey::W)) >= 1));

        // Kill flag is cleared again before the first cycle ends
        h.engine.run_emergency();
        assert!(!h.engine.is_killed());
        assert!(wait_until(2000, || !h.engine.is_hold_running(Action::StraightDashHold)));
        assert!(h.sink.held().is_empty());
        assert_eq!(h.sink.downs(key(OutputKey::W)), 1);

        let before = h.sink.events().len();
        thread::sleep(Duration::from_millis(200));
        assert_eq!(h.sink.events().len(), before);
    }

    #[test]
    fn test_emergency_sweeps_outputs() {
        let h = harness(fast_config());
        h.engine.run_emergency();

        let events = h.sink.events();
        for output in Output::all() {
            assert!(events.contains(&SinkEvent { output, down: false }));
        }
        assert!(events.iter().all(|e| !e.down));
        assert!(!h.engine.is_killed());
    }

    #[test]
    fn test_press_during_kill_is_tracked_not_dispatched() {
        let h = harness(fast_config());
        h.engine.kill.store(true, Ordering::SeqCst);
        press(&h, Token::key("F"));
        assert!(h.reporter.events().is_empty());

        h.engine.kill.store(false, Ordering::SeqCst);
        // Still held from before, so not a new press.
        press(&h, Token::key("F"));
        assert!(h.reporter.events().is_empty());

        release(&h, Token::key("F"));
        press(&h, Token::key("F"));
        assert_eq!(h.reporter.count("stall"), 1);
    }

    #[test]
    fn test_exit_is_permanent() {
        let h = harness(fast_config());
        h.engine.trigger_exit();
        assert_eq!(h.exit.calls.load(Ordering::SeqCst), 1);
        assert!(h.engine.is_killed());
        assert!(h.engine.is_exited());

        press(&h, Token::key("F"));
        assert!(h.reporter.events().is_empty());

        h.engine.run_emergency();
        assert!(h.engine.is_killed());
    }

    #[test]
    fn test_capture_mode_suppresses_dispatch() {
        let h = harness(fast_config());
        let captured = h.engine.capture_receiver();

        h.engine.on_capture_mode(true);
        press(&h, Token::key("F"));
        assert!(h.reporter.events().is_empty());
        assert_eq!(captured.try_recv().ok(), Some(Token::key("F")));

        h.engine.on_capture_mode(false);
        release(&h, Token::key("F"));
        press(&h, Token::key("F"));
        assert_eq!(h.reporter.count("stall"), 1);
        assert!(captured.try_recv().is_err());
    }

    #[test]
    fn test_toggle_all() {
        let h = harness(fast_config());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let recorder = seen.clone();
        h.engine.register_toggle_observer(Arc::new(move |enabled: bool| {
            recorder.lock().unwrap().push(enabled)
        }));

        h.engine.run_toggle_all();
        assert!(!h.engine.global_enabled());
        assert_eq!(h.store.save_count(), 1);
        assert!(!h.store.snapshot().global_enabled);

        h.engine.run_toggle_all();
        assert!(h.engine.global_enabled());
        assert_eq!(*seen.lock().unwrap(), vec![false, true]);
        assert_eq!(h.sink.tones(), vec![Tone::Low, Tone::High]);
    }

    #[test]
    fn test_concurrent_toggles_persist_last_state() {
        let h = harness(fast_config());
        let workers: Vec<_> = (0..8)
            .map(|_| {
                let engine = h.engine.clone();
                thread::spawn(move || engine.run_toggle_all())
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }

        assert_eq!(h.store.save_count(), 8);
        assert!(h.engine.global_enabled());
        assert_eq!(h.store.snapshot().global_enabled, h.engine.global_enabled());
    }

    #[test]
    fn test_toggle_hotkey_while_disabled() {
        let mut config = fast_config();
        config.global_enabled = false;
        let h = harness(config);

        press(&h, Token::key("F6"));
        assert_eq!(h.reporter.count("toggle_all"), 1);
        assert!(wait_until(1000, || h.engine.global_enabled()));
    }

    #[test]
    fn test_apply_configuration_rebinds() {
        let h = harness(fast_config());
        let mut config = h.engine.configuration();
        config.set_hotkey(Action::Stall, "GP:X");
        config.set_hotkey(Action::SpeedFlip, "+");
        h.engine.apply_configuration(config);

        assert_eq!(h.engine.resolve(&Token::key("F")), None);
        assert_eq!(h.engine.resolve(&Token::button("X")), Some(Action::Stall));
        assert_eq!(h.engine.resolve(&Token::key("H")), None);
        assert_eq!(h.engine.resolve(&Token::key("+")), None);
    }

    #[test]
    fn test_one_shot_rechecks_gating() {
        let mut config = fast_config();
        config.global_enabled = false;
        let h = harness(config);
        h.engine.execute(Action::Stall);
        h.engine.execute(Action::SpeedFlip);
        assert!(h.sink.events().is_empty());
    }

    #[test]
    fn test_stall_sequence() {
        let h = harness(fast_config());
        h.engine.execute(Action::Stall);

        let right = Output::Mouse(MouseButton::Right);
        assert_eq!(
            h.sink.events(),
            vec![
                SinkEvent { output: key(OutputKey::Q), down: true },
                SinkEvent { output: key(OutputKey::D), down: true },
                SinkEvent { output: right, down: true },
                SinkEvent { output: right, down: false },
                SinkEvent { output: key(OutputKey::D), down: false },
                SinkEvent { output: key(OutputKey::Q), down: false },
            ]
        );
    }

    #[test]
    fn test_speed_flip_timing_arithmetic() {
        let mut config = AppConfig::default();
        config.set_timing("sf_s_hold_ms", 690);
        config.set_timing("sf_d_hold_ms", 720);
        config.set_timing("sf_airroll_time_ms", 799);
        config.set_timing("sf_shift_start_ms", 840);
        let timing = SpeedFlipTiming::from_config(&config);
        assert_eq!(timing.until_e_release(), Duration::from_millis(79));
        assert_eq!(timing.until_shift(), Duration::from_millis(41));

        config.set_timing("sf_airroll_time_ms", 500);
        let timing = SpeedFlipTiming::from_config(&config);
        assert_eq!(timing.until_e_release(), Duration::ZERO);
        assert_eq!(timing.until_shift(), Duration::from_millis(120));

        config.set_timing("sf_shift_start_ms", 100);
        let timing = SpeedFlipTiming::from_config(&config);
        assert_eq!(timing.until_shift(), Duration::ZERO);
    }

    #[test]
    fn test_speed_flip_release_order() {
        let mut config = AppConfig::default();
        config.set_timing("sf_s_hold_ms", 690);
        config.set_timing("sf_d_hold_ms", 720);
        let timing = SpeedFlipTiming::from_config(&config);
        assert_eq!(timing.release_order(), (OutputKey::S, OutputKey::D));

        config.set_timing("sf_s_hold_ms", 800);
        let timing = SpeedFlipTiming::from_config(&config);
        assert_eq!(timing.release_order(), (OutputKey::D, OutputKey::S));
        assert_eq!(timing.longer_hold(), Duration::from_millis(800));
        assert_eq!(timing.shorter_hold(), Duration::from_millis(720));
    }

    fn position(events: &[SinkEvent], output: Output, down: bool) -> Vec<usize> {
        events
            .iter()
            .enumerate()
            .filter(|(_, e)| e.output == output && e.down == down)
            .map(|(i, _)| i)
            .collect()
    }

    #[test]
    fn test_speed_flip_sequence_s_shorter() {
        let mut config = fast_config();
        config.set_timing("sf_s_hold_ms", 2);
        config.set_timing("sf_d_hold_ms", 6);
        let h = harness(config);
        h.engine.execute(Action::SpeedFlip);

        let events = h.sink.events();
        assert_eq!(events[0], SinkEvent { output: key(OutputKey::I), down: true });
        assert_eq!(events[1], SinkEvent { output: key(OutputKey::A), down: true });

        let s_up = *position(&events, key(OutputKey::S), false).last().unwrap();
        let d_up = *position(&events, key(OutputKey::D), false).last().unwrap();
        let w_down = *position(&events, key(OutputKey::W), true).last().unwrap();
        assert!(s_up < d_up);
        assert_eq!(w_down, s_up + 1);

        assert_eq!(position(&events, Output::Mouse(MouseButton::Right), true).len(), 2);
        assert_eq!(position(&events, key(OutputKey::LShift), true).len(), 1);
        assert!(h.sink.held().is_empty());
    }

    #[test]
    fn test_speed_flip_sequence_d_shorter() {
        let mut config = fast_config();
        config.set_timing("sf_s_hold_ms", 6);
        config.set_timing("sf_d_hold_ms", 2);
        let h = harness(config);
        h.engine.execute(Action::SpeedFlip);

        let events = h.sink.events();
        let s_up = *position(&events, key(OutputKey::S), false).last().unwrap();
        let d_up = *position(&events, key(OutputKey::D), false).last().unwrap();
        let w_down = *position(&events, key(OutputKey::W), true).last().unwrap();
        assert!(d_up < s_up);
        assert_eq!(w_down, s_up + 1);
        assert!(h.sink.held().is_empty());
    }

    #[test]
    fn test_sink_failure_does_not_abort() {
        let h = harness(fast_config());
        h.sink.set_failing(true);
        h.engine.execute(Action::Stall);
        assert_eq!(h.sink.events().len(), 6);
    }

    #[test]
    fn test_macro_run_after_sweep_skips_release() {
        let sink = Arc::new(RecordingSink::new());
        let ledger = OutputLedger::new(sink.clone());
        {
            let mut run = MacroRun::new(&ledger);
            run.down(OutputKey::W);
            ledger.sweep();
        }
        let w_ups = sink
            .events()
            .iter()
            .filter(|e| e.output == key(OutputKey::W) && !e.down)
            .count();
        assert_eq!(w_ups, 1);
    }

    #[test]
    fn test_macro_run_releases_on_drop() {
        let sink = Arc::new(RecordingSink::new());
        let ledger = OutputLedger::new(sink.clone());
        {
            let mut run = MacroRun::new(&ledger);
            run.down(OutputKey::W);
            run.down(OutputKey::Q);
            run.down(OutputKey::W);
        }
        assert!(sink.held().is_empty());
        let ups: Vec<Output> = sink
            .events()
            .iter()
            .filter(|e| !e.down)
            .map(|e| e.output)
            .collect();
        assert_eq!(ups, vec![key(OutputKey::Q), key(OutputKey::W)]);
    }

    #[test]
    fn test_shutdown_drains_hold_loops() {
        let h = harness(fast_config());
        press(&h, Token::key("V"));
        press(&h, Token::button("DPAD_UP"));
        assert!(wait_until(1000, || h.sink.downs(key(OutputKey::W)) >= 1));

        h.engine.shutdown(Duration::from_secs(2));
        assert!(!h.engine.is_hold_running(Action::StraightDashHold));
        assert!(h.sink.held().is_empty());
        assert!(h.engine.is_exited());
        assert!(!h.engine.lock().is_held(&crate::binding::Trigger::parse("GP:DPAD_UP")));
    }

    #[test]
    fn test_run_consumes_channel() {
        let h = harness(fast_config());
        let (tx, rx) = crossbeam_channel::unbounded();
        tx.send(TokenEvent::press(Token::key("F"))).unwrap();
        tx.send(TokenEvent::release(Token::key("F"))).unwrap();
        tx.send(TokenEvent::press(Token::key("F"))).unwrap();
        drop(tx);

        h.engine.run(rx);
        assert_eq!(h.reporter.count("stall"), 2);
    }
}
