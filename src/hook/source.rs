//! Seam between the OS interception point and its consumer

use std::sync::Arc;

use super::event::{KeyEvent, Propagation};

/// Consumer of normalized key events
///
/// Called synchronously on the OS hook dispatch thread for every key
/// transition system-wide, so implementations must return quickly.
pub trait KeySink: Send + Sync + 'static {
    fn on_key_event(&self, event: KeyEvent) -> Propagation;
}

/// A system-wide keyboard interception point
pub trait KeySource: Send {
    /// Register the interception callback and start delivering events to `sink`
    fn install(&mut self, sink: Arc<dyn KeySink>) -> Result<(), HookError>;

    /// Remove the registration if present
    fn uninstall(&mut self);

    fn is_installed(&self) -> bool;
}

/// Errors that can occur installing or owning the keyboard hook
#[derive(Debug, thiserror::Error)]
pub enum HookError {
    #[error("keyboard hook is already installed for this source")]
    AlreadyInstalled,

    #[error("keyboard hook is already running in this process")]
    AlreadyRunning,

    #[error("failed to install keyboard hook (os error {code})")]
    Os { code: i32 },

    #[error("failed to create event tap - check Accessibility permissions")]
    EventTapCreation,

    #[error("global keyboard hooks are not supported on this platform")]
    Unsupported,

    #[error("failed to spawn hook thread: {0}")]
    ThreadSpawn(String),
}
