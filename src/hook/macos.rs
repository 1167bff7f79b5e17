//! Global keyboard tap using macOS CGEventTap
//!
//! Monitors system-wide key down/up and modifier flag changes.
//! Runs on a dedicated thread with its own CFRunLoop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc as std_mpsc;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use core_foundation::runloop::{kCFRunLoopCommonModes, kCFRunLoopDefaultMode, CFRunLoop};
use core_graphics::event::{
    CGEvent, CGEventTap, CGEventTapLocation, CGEventTapOptions, CGEventTapPlacement,
    CGEventTapProxy, CGEventType, EventField,
};
use tracing::{debug, error, info, warn};

use super::event::{KeyDirection, KeyEvent, Propagation};
use super::keys::{from_mac_keycode, mac_modifier_mask};
use super::source::{HookError, KeySink, KeySource};

static ACQUIRED: AtomicBool = AtomicBool::new(false);

/// Process-wide keyboard event tap
pub struct MacKeySource {
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl MacKeySource {
    /// Take the process's single keyboard tap slot
    pub fn acquire() -> Result<Self, HookError> {
        if ACQUIRED.swap(true, Ordering::SeqCst) {
            return Err(HookError::AlreadyRunning);
        }
        Ok(Self {
            running: Arc::new(AtomicBool::new(false)),
            thread: None,
        })
    }
}

impl KeySource for MacKeySource {
    /// Spawns a dedicated thread that runs a CFRunLoop to receive
    /// CGEventTap callbacks, and waits until the tap is enabled.
    fn install(&mut self, sink: Arc<dyn KeySink>) -> Result<(), HookError> {
        if self.thread.is_some() {
            return Err(HookError::AlreadyInstalled);
        }

        self.running.store(true, Ordering::SeqCst);
        let running = Arc::clone(&self.running);
        let (ready_tx, ready_rx) = std_mpsc::channel::<bool>();

        let handle = thread::Builder::new()
            .name("key-tap".to_string())
            .spawn(move || {
                info!("key tap thread started");
                run_event_loop(sink, Arc::clone(&running), ready_tx);
                running.store(false, Ordering::SeqCst);
                info!("key tap thread stopped");
            })
            .map_err(|e| HookError::ThreadSpawn(e.to_string()))?;

        if ready_rx.recv().unwrap_or(false) {
            self.thread = Some(handle);
            Ok(())
        } else {
            self.running.store(false, Ordering::SeqCst);
            let _ = handle.join();
            Err(HookError::EventTapCreation)
        }
    }

    fn uninstall(&mut self) {
        let Some(handle) = self.thread.take() else {
            return;
        };
        // The run loop checks the flag every 100ms
        self.running.store(false, Ordering::SeqCst);
        if handle.join().is_err() {
            warn!("key tap thread panicked");
        }
        info!("key tap removed");
    }

    fn is_installed(&self) -> bool {
        self.thread.is_some()
    }
}

impl Drop for MacKeySource {
    fn drop(&mut self) {
        self.uninstall();
        ACQUIRED.store(false, Ordering::SeqCst);
    }
}

/// Resolve the transition carried by a tap callback, if it is one we track
fn key_event_for(event_type: CGEventType, event: &CGEvent) -> Option<KeyEvent> {
    let keycode = event.get_integer_value_field(EventField::KEYBOARD_EVENT_KEYCODE) as u16;
    let key = from_mac_keycode(keycode);

    let direction = match event_type {
        CGEventType::KeyDown => KeyDirection::Down,
        CGEventType::KeyUp => KeyDirection::Up,
        // Modifiers only report that flags changed; read the side-specific bit back
        CGEventType::FlagsChanged => {
            let mask = mac_modifier_mask(key)?;
            if event.get_flags().bits() & mask != 0 {
                KeyDirection::Down
            } else {
                KeyDirection::Up
            }
        }
        _ => return None,
    };

    Some(KeyEvent { key, direction })
}

/// Whether the system is reporting that it switched the tap off
///
/// The tap stays off until it is enabled again.
fn is_disable_notice(event_type: CGEventType) -> bool {
    matches!(
        event_type,
        CGEventType::TapDisabledByTimeout | CGEventType::TapDisabledByUserInput
    )
}

/// Run the CFRunLoop with the event tap
fn run_event_loop(
    sink: Arc<dyn KeySink>,
    running: Arc<AtomicBool>,
    ready_tx: std_mpsc::Sender<bool>,
) {
    let disabled = Arc::new(AtomicBool::new(false));
    let disabled_flag = Arc::clone(&disabled);

    // CGEventTap callback - must be fast and non-blocking
    let callback = move |_proxy: CGEventTapProxy,
                         event_type: CGEventType,
                         event: &CGEvent|
                         -> Option<CGEvent> {
        if is_disable_notice(event_type) {
            warn!("event tap disabled by the system");
            disabled_flag.store(true, Ordering::SeqCst);
            return Some(event.clone());
        }

        let Some(key_event) = key_event_for(event_type, event) else {
            debug!("ignoring untracked tap event");
            return Some(event.clone());
        };

        match sink.on_key_event(key_event) {
            Propagation::Consumed => None,
            Propagation::Propagate => Some(event.clone()),
        }
    };

    // Default (not ListenOnly) so a consumed event can be dropped
    let tap = match CGEventTap::new(
        CGEventTapLocation::Session,
        CGEventTapPlacement::HeadInsertEventTap,
        CGEventTapOptions::Default,
        vec![
            CGEventType::KeyDown,
            CGEventType::KeyUp,
            CGEventType::FlagsChanged,
        ],
        callback,
    ) {
        Ok(tap) => tap,
        Err(()) => {
            error!("failed to create event tap - is Accessibility permission granted?");
            let _ = ready_tx.send(false);
            return;
        }
    };

    tap.enable();

    let run_loop_source = match tap.mach_port.create_runloop_source(0) {
        Ok(source) => source,
        Err(()) => {
            error!("failed to create run loop source for event tap");
            let _ = ready_tx.send(false);
            return;
        }
    };
    let run_loop = CFRunLoop::get_current();

    unsafe {
        run_loop.add_source(&run_loop_source, kCFRunLoopCommonModes);
    }

    info!("event tap created and enabled");
    let _ = ready_tx.send(true);

    while running.load(Ordering::SeqCst) {
        unsafe {
            CFRunLoop::run_in_mode(kCFRunLoopDefaultMode, Duration::from_millis(100), true);
        }
        if disabled.swap(false, Ordering::SeqCst) {
            tap.enable();
            info!("event tap re-enabled");
        }
    }

    // Tap will be automatically cleaned up when it goes out of scope
}
