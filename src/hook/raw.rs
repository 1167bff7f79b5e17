//! Raw low-level keyboard callback handling
//!
//! Shared by the Win32 hook procedure and the test double so the pass-through
//! and suppression rules are exercised without a live OS hook.

use tracing::warn;

use super::event::{KeyDirection, KeyEvent, Propagation};
use super::keys::from_virtual_key;
use super::source::KeySink;

pub const WM_KEYDOWN: u32 = 0x0100;
pub const WM_KEYUP: u32 = 0x0101;
pub const WM_SYSKEYDOWN: u32 = 0x0104;
pub const WM_SYSKEYUP: u32 = 0x0105;

/// What the hook procedure must do with the physical event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookVerdict {
    /// Hand the event to the next hook in the chain
    CallNext,
    /// Return the handled sentinel, the event is swallowed
    Swallow,
}

/// Translate one raw hook notification and deliver it to `sink`
pub fn process_raw(sink: &dyn KeySink, code: i32, message: u32, vk_code: u32) -> HookVerdict {
    // Negative codes belong to the hook chain, not to us
    if code < 0 {
        return HookVerdict::CallNext;
    }

    let direction = match message {
        WM_KEYDOWN | WM_SYSKEYDOWN => KeyDirection::Down,
        WM_KEYUP | WM_SYSKEYUP => KeyDirection::Up,
        other => {
            warn!(message = other, "unexpected keyboard message in hook callback");
            return HookVerdict::CallNext;
        }
    };

    let event = KeyEvent {
        key: from_virtual_key(vk_code),
        direction,
    };

    match sink.on_key_event(event) {
        Propagation::Consumed => HookVerdict::Swallow,
        Propagation::Propagate => HookVerdict::CallNext,
    }
}
