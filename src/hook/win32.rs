//! Global keyboard hook using Win32 `WH_KEYBOARD_LL`
//!
//! The hook is installed from a dedicated thread that pumps messages for as
//! long as the hook is alive; Windows delivers the callbacks on that thread.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc as std_mpsc;
use std::sync::{Arc, PoisonError, RwLock};
use std::thread::{self, JoinHandle};

use tracing::{error, info, warn};
use windows::Win32::Foundation::{HINSTANCE, HWND, LPARAM, LRESULT, WPARAM};
use windows::Win32::System::Threading::GetCurrentThreadId;
use windows::Win32::UI::WindowsAndMessaging::{
    CallNextHookEx, GetMessageW, PostThreadMessageW, SetWindowsHookExW, UnhookWindowsHookEx,
    HHOOK, KBDLLHOOKSTRUCT, MSG, WH_KEYBOARD_LL, WM_QUIT,
};

use super::raw::{process_raw, HookVerdict};
use super::source::{HookError, KeySink, KeySource};

/// Set while a `WindowsKeySource` exists; the OS callback has no context pointer
static ACQUIRED: AtomicBool = AtomicBool::new(false);

/// Sink the hook procedure delivers to
static SINK: RwLock<Option<Arc<dyn KeySink>>> = RwLock::new(None);

/// Process-wide low-level keyboard hook
pub struct WindowsKeySource {
    hook_thread: Option<HookThread>,
}

struct HookThread {
    thread_id: u32,
    handle: JoinHandle<()>,
}

impl WindowsKeySource {
    /// Take the process's single keyboard hook slot
    pub fn acquire() -> Result<Self, HookError> {
        if ACQUIRED.swap(true, Ordering::SeqCst) {
            return Err(HookError::AlreadyRunning);
        }
        Ok(Self { hook_thread: None })
    }
}

impl KeySource for WindowsKeySource {
    fn install(&mut self, sink: Arc<dyn KeySink>) -> Result<(), HookError> {
        if self.hook_thread.is_some() {
            return Err(HookError::AlreadyInstalled);
        }

        set_sink(Some(sink));

        let (ready_tx, ready_rx) = std_mpsc::channel::<Result<u32, i32>>();
        let handle = thread::Builder::new()
            .name("key-hook".to_string())
            .spawn(move || run_hook_thread(ready_tx))
            .map_err(|e| {
                set_sink(None);
                HookError::ThreadSpawn(e.to_string())
            })?;

        match ready_rx.recv() {
            Ok(Ok(thread_id)) => {
                info!(thread_id, "low-level keyboard hook installed");
                self.hook_thread = Some(HookThread { thread_id, handle });
                Ok(())
            }
            Ok(Err(code)) => {
                let _ = handle.join();
                set_sink(None);
                Err(HookError::Os { code })
            }
            Err(_) => {
                let _ = handle.join();
                set_sink(None);
                Err(HookError::ThreadSpawn(
                    "hook thread exited before reporting".to_string(),
                ))
            }
        }
    }

    fn uninstall(&mut self) {
        let Some(hook_thread) = self.hook_thread.take() else {
            return;
        };

        let posted = unsafe {
            PostThreadMessageW(hook_thread.thread_id, WM_QUIT, WPARAM(0), LPARAM(0))
        };
        if let Err(e) = posted {
            warn!(?e, "failed to post quit to hook thread");
        }
        if hook_thread.handle.join().is_err() {
            warn!("hook thread panicked");
        }

        // Only after the hook is gone may the sink be released
        set_sink(None);
        info!("low-level keyboard hook removed");
    }

    fn is_installed(&self) -> bool {
        self.hook_thread.is_some()
    }
}

impl Drop for WindowsKeySource {
    fn drop(&mut self) {
        self.uninstall();
        ACQUIRED.store(false, Ordering::SeqCst);
    }
}

fn set_sink(sink: Option<Arc<dyn KeySink>>) {
    *SINK.write().unwrap_or_else(PoisonError::into_inner) = sink;
}

/// Install the hook and pump messages until `WM_QUIT`
fn run_hook_thread(ready_tx: std_mpsc::Sender<Result<u32, i32>>) {
    let thread_id = unsafe { GetCurrentThreadId() };

    let hook = match unsafe {
        SetWindowsHookExW(
            WH_KEYBOARD_LL,
            Some(low_level_keyboard_proc),
            HINSTANCE::default(),
            0,
        )
    } {
        Ok(hook) => hook,
        Err(e) => {
            error!(?e, "SetWindowsHookExW failed");
            let _ = ready_tx.send(Err(e.code().0));
            return;
        }
    };

    let _ = ready_tx.send(Ok(thread_id));

    // GetMessageW returns 0 for WM_QUIT and -1 on error
    let mut msg = MSG::default();
    while unsafe { GetMessageW(&mut msg, HWND::default(), 0, 0) }.0 > 0 {}

    if let Err(e) = unsafe { UnhookWindowsHookEx(hook) } {
        warn!(?e, "UnhookWindowsHookEx failed");
    }
}

unsafe extern "system" fn low_level_keyboard_proc(
    code: i32,
    wparam: WPARAM,
    lparam: LPARAM,
) -> LRESULT {
    if code >= 0 {
        let info = &*(lparam.0 as *const KBDLLHOOKSTRUCT);
        let sink = SINK.read().unwrap_or_else(PoisonError::into_inner);
        if let Some(sink) = sink.as_ref() {
            let verdict = process_raw(sink.as_ref(), code, wparam.0 as u32, info.vkCode);
            if verdict == HookVerdict::Swallow {
                return LRESULT(1);
            }
        }
    }
    CallNextHookEx(HHOOK::default(), code, wparam, lparam)
}
