//! Binding router.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use tracing::{debug, trace};

use super::{Action, Engine, Token};

impl Engine {
    /// Routes one press or release. Never blocks on macro execution.
    pub fn on_token(self: &Arc<Self>, token: &Token, pressed: bool) {
        let action = {
            let mut state = self.lock();
            if !state.track(token, pressed) {
                trace!(%token, pressed, "Repeated edge ignored");
                return;
            }
            if !pressed {
                return;
            }

            if self.capture_mode.load(Ordering::SeqCst) {
                let _ = self.capture_sender.try_send(token.clone());
                return;
            }
            if self.kill.load(Ordering::SeqCst) {
                debug!(%token, "Kill flag set, press not dispatched");
                return;
            }

            let Some(action) = state.first_match(token) else {
                return;
            };
            if !state.permits(action) {
                debug!(%action, "Suppressed by enable flags");
                return;
            }
            if action.is_hold_loop() {
                if state.is_running(action) {
                    debug!(%action, "Hold loop already running");
                    return;
                }
                state.set_running(action, true);
            }
            action
        };

        debug!(%action, %token, "Dispatch");
        self.reporter.report_event(action.config_key());
        self.spawn(action);
    }

    /// Press-time lookup without side effects.
    pub fn resolve(&self, token: &Token) -> Option<Action> {
        self.lock().first_match(token)
    }
}
