//! Windows instance primitives
//!
//! Ownership is a named mutex; the notify signal is a named manual-reset
//! event waited on by a dedicated thread.

use std::thread::{self, JoinHandle};

use tokio::sync::mpsc;
use tracing::{debug, warn};
use windows::core::{HSTRING, PCWSTR};
use windows::Win32::Foundation::{
    CloseHandle, BOOL, HANDLE, WAIT_ABANDONED, WAIT_OBJECT_0, WAIT_TIMEOUT,
};
use windows::Win32::System::Threading::{
    CreateEventW, CreateMutexW, OpenEventW, ReleaseMutex, ResetEvent, SetEvent,
    WaitForMultipleObjects, WaitForSingleObject, EVENT_MODIFY_STATE, INFINITE,
};

use super::{Acquisition, InitGuard, InstanceError, OwnershipToken, SignalListener};
use crate::events::InstanceEvent;

/// Kernel handle closed on drop
struct OwnedHandle(HANDLE);

// Kernel handles are process-wide and usable from any thread
unsafe impl Send for OwnedHandle {}

impl Drop for OwnedHandle {
    fn drop(&mut self) {
        if let Err(e) = unsafe { CloseHandle(self.0) } {
            debug!(?e, "CloseHandle failed");
        }
    }
}

/// Raw handle copy handed to the waiter thread
#[derive(Clone, Copy)]
struct SendHandle(HANDLE);

unsafe impl Send for SendHandle {}

fn os_error(e: windows::core::Error) -> InstanceError {
    InstanceError::Os { code: e.code().0 }
}

/// Named kernel objects in the session namespace
///
/// Win32 mutexes are recursive, so the same thread taking the token twice
/// would succeed; the init guard rejects that before it reaches the kernel.
#[derive(Debug, Clone, Default)]
pub struct WindowsPrimitives {
    guard: InitGuard,
}

/// Ownership of the named instance mutex
///
/// Must be released on the thread that acquired it.
pub struct MutexToken {
    handle: OwnedHandle,
}

impl OwnershipToken for MutexToken {
    fn release(self) -> Result<(), InstanceError> {
        unsafe { ReleaseMutex(self.handle.0) }.map_err(os_error)
    }
}

impl super::InstancePrimitives for WindowsPrimitives {
    type Token = MutexToken;
    type Listener = EventListener;

    fn init_guard(&self) -> &InitGuard {
        &self.guard
    }

    fn acquire_exclusive_or_detect_existing(
        &self,
        name: &str,
    ) -> Result<Acquisition<MutexToken>, InstanceError> {
        let name = HSTRING::from(name);
        let handle = unsafe { CreateMutexW(None, BOOL::from(false), &name) }.map_err(os_error)?;
        let handle = OwnedHandle(handle);

        let result = unsafe { WaitForSingleObject(handle.0, 0) };
        if result == WAIT_OBJECT_0 {
            Ok(Acquisition::Owned(MutexToken { handle }))
        } else if result == WAIT_ABANDONED {
            Ok(Acquisition::Abandoned(MutexToken { handle }))
        } else if result == WAIT_TIMEOUT {
            Ok(Acquisition::AlreadyHeld)
        } else {
            Err(InstanceError::Os {
                code: result.0 as i32,
            })
        }
    }

    fn create_signal(&self, name: &str) -> Result<EventListener, InstanceError> {
        let name = HSTRING::from(name);
        let event = unsafe { CreateEventW(None, BOOL::from(true), BOOL::from(false), &name) }
            .map_err(os_error)?;
        let event = OwnedHandle(event);
        let cancel =
            unsafe { CreateEventW(None, BOOL::from(true), BOOL::from(false), PCWSTR::null()) }
                .map_err(os_error)?;
        let cancel = OwnedHandle(cancel);

        let (wake_tx, wake_rx) = mpsc::channel(8);
        let handles = [SendHandle(event.0), SendHandle(cancel.0)];
        let thread = thread::Builder::new()
            .name("instance-signal".to_string())
            .spawn(move || wait_for_signal(handles, wake_tx))
            .map_err(InstanceError::Io)?;

        debug!("notify event waiter started");
        Ok(EventListener {
            wake_rx,
            thread: Some(thread),
            cancel,
            _event: event,
        })
    }

    fn signal_existing(&self, name: &str) -> Result<(), InstanceError> {
        let name = HSTRING::from(name);
        let event = unsafe { OpenEventW(EVENT_MODIFY_STATE, BOOL::from(false), &name) }
            .map_err(|e| InstanceError::SignalAccess(e.message().to_string()))?;
        let event = OwnedHandle(event);
        unsafe { SetEvent(event.0) }.map_err(os_error)
    }
}

/// Block on the notify event until it fires or the cancel event is set
fn wait_for_signal(handles: [SendHandle; 2], wake_tx: mpsc::Sender<()>) {
    let [event, cancel] = handles;
    let raw = [event.0, cancel.0];

    loop {
        let result = unsafe { WaitForMultipleObjects(&raw, BOOL::from(false), INFINITE) };
        if result != WAIT_OBJECT_0 {
            break;
        }
        // Reset before dispatch so a launch during dispatch is not lost
        if let Err(e) = unsafe { ResetEvent(event.0) } {
            warn!(?e, "failed to reset notify event");
        }
        if wake_tx.blocking_send(()).is_err() {
            break;
        }
    }

    debug!("notify event waiter stopped");
}

/// First instance's end of the notify event
pub struct EventListener {
    wake_rx: mpsc::Receiver<()>,
    thread: Option<JoinHandle<()>>,
    cancel: OwnedHandle,
    _event: OwnedHandle,
}

impl SignalListener for EventListener {
    async fn wait(&mut self) -> Option<InstanceEvent> {
        self.wake_rx
            .recv()
            .await
            .map(|()| InstanceEvent::SecondInstanceStarted { pid: None })
    }
}

impl Drop for EventListener {
    fn drop(&mut self) {
        if let Err(e) = unsafe { SetEvent(self.cancel.0) } {
            warn!(?e, "failed to cancel notify event waiter");
        }
        // Unblocks a waiter parked in blocking_send
        self.wake_rx.close();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("notify event waiter panicked");
            }
        }
    }
}
