//! Keyboard listener.
//!
//! A `WH_KEYBOARD_LL` hook on a dedicated thread. The hook never blocks keys;
//! it only classifies them through a
//! [`KeyboardUnifier`](crate::engine::KeyboardUnifier) and forwards tokens
//! to the router.

#[cfg(windows)]
pub use platform::{start, stop};

#[cfg(not(windows))]
pub use fallback::{start, stop};

#[cfg(not(windows))]
mod fallback {
    use std::sync::Arc;
    use std::sync::atomic::AtomicU32;
    use std::thread::JoinHandle;

    use crossbeam_channel::Sender;

    use crate::engine::TokenEvent;
    use crate::error::EngineError;

    pub fn start(
        _sender: Sender<TokenEvent>,
        _thread_id: Arc<AtomicU32>,
    ) -> Result<JoinHandle<()>, EngineError> {
        Err(EngineError::unsupported(
            "keyboard",
            "low-level keyboard hook requires Windows",
        ))
    }

    pub fn stop(_thread_id: u32) {}
}

#[cfg(windows)]
mod platform {
    use std::cell::RefCell;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::thread::{self, JoinHandle};

    use crossbeam_channel::Sender;
    use tracing::{debug, info, warn};
    use windows::Win32::Foundation::{LPARAM, LRESULT, WPARAM};
    use windows::Win32::System::Threading::GetCurrentThreadId;
    use windows::Win32::UI::WindowsAndMessaging::*;

    use crate::engine::{KeyboardUnifier, TokenEvent};
    use crate::error::EngineError;
    use crate::output::SIMULATED_EVENT_MARKER;

    struct HookState {
        unifier: KeyboardUnifier,
        sender: Sender<TokenEvent>,
    }

    thread_local! {
        // Low-level hooks are called on the installing thread.
        static HOOK_STATE: RefCell<Option<HookState>> = const { RefCell::new(None) };
    }

    /// Installs the hook on a new thread and pumps its message loop until
    /// [`stop`] posts `WM_QUIT`.
    pub fn start(
        sender: Sender<TokenEvent>,
        thread_id: Arc<AtomicU32>,
    ) -> Result<JoinHandle<()>, EngineError> {
        let (ready_tx, ready_rx) = crossbeam_channel::bounded(1);
        let handle = thread::Builder::new()
            .name("keyboard_hook".to_string())
            .spawn(move || {
                let hook = match unsafe { SetWindowsHookExW(WH_KEYBOARD_LL, Some(keyboard_proc), None, 0) } {
                    Ok(hook) if !hook.0.is_null() => hook,
                    Ok(_) => {
                        let _ = ready_tx.send(Err(EngineError::unsupported("keyboard", "hook handle was null")));
                        return;
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(EngineError::unsupported("keyboard", e.to_string())));
                        return;
                    }
                };

                HOOK_STATE.with(|state| {
                    *state.borrow_mut() = Some(HookState {
                        unifier: KeyboardUnifier::new(),
                        sender,
                    });
                });

                // Force create message queue before publishing the thread id
                unsafe {
                    let mut msg = MSG::default();
                    let _ = PeekMessageW(&mut msg, None, WM_USER, WM_USER, PM_NOREMOVE);
                }
                thread_id.store(unsafe { GetCurrentThreadId() }, Ordering::SeqCst);
                let _ = ready_tx.send(Ok(()));
                info!("Keyboard hook installed");

                unsafe {
                    let mut msg = MSG::default();
                    loop {
                        let result = GetMessageW(&mut msg, None, 0, 0);
                        if result.0 == 0 || result.0 == -1 {
                            break;
                        }
                        let _ = TranslateMessage(&msg);
                        DispatchMessageW(&msg);
                    }
                    let _ = UnhookWindowsHookEx(hook);
                }

                thread_id.store(0, Ordering::SeqCst);
                HOOK_STATE.with(|state| {
                    if let Some(mut state) = state.borrow_mut().take() {
                        for event in state.unifier.drain() {
                            let _ = state.sender.send(event);
                        }
                    }
                });
                info!("Keyboard hook removed");
            })?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(handle),
            Ok(Err(e)) => {
                let _ = handle.join();
                Err(e)
            }
            Err(_) => Err(EngineError::unsupported("keyboard", "hook thread exited during start")),
        }
    }

    /// Ends the hook thread's message loop.
    pub fn stop(thread_id: u32) {
        if let Err(e) = unsafe { PostThreadMessageW(thread_id, WM_QUIT, WPARAM(0), LPARAM(0)) } {
            warn!("Failed to stop keyboard hook: {}", e);
        }
    }

    unsafe extern "system" fn keyboard_proc(code: i32, w_param: WPARAM, l_param: LPARAM) -> LRESULT {
        if code < 0 {
            return unsafe { CallNextHookEx(None, code, w_param, l_param) };
        }

        let kb_struct = unsafe { &*(l_param.0 as *const KBDLLHOOKSTRUCT) };

        // Skip simulated key events
        if kb_struct.dwExtraInfo == SIMULATED_EVENT_MARKER {
            return unsafe { CallNextHookEx(None, code, w_param, l_param) };
        }

        let pressed = match w_param.0 as u32 {
            WM_KEYDOWN | WM_SYSKEYDOWN => Some(true),
            WM_KEYUP | WM_SYSKEYUP => Some(false),
            _ => None,
        };

        if let Some(pressed) = pressed {
            HOOK_STATE.with(|state| {
                if let Ok(mut state) = state.try_borrow_mut()
                    && let Some(state) = state.as_mut()
                    && let Some(event) = state.unifier.key_event(kb_struct.vkCode, pressed)
                    && state.sender.send(event).is_err()
                {
                    debug!("Router gone, dropping key event");
                }
            });
        }

        unsafe { CallNextHookEx(None, code, w_param, l_param) }
    }
}
