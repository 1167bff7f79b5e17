//! Process lifecycle: hook ownership and OS signals

mod manager;
mod shutdown;

pub use manager::{HookManager, HookState};
pub use shutdown::{ReloadSignal, ShutdownSignal};
