//! instant-trigger: raise a trigger while a configured modifier chord is held
//!
//! - [`hook`]: system-wide low-level key events
//! - [`tracker`]: pressed state of the configured modifier set
//! - [`lifecycle`]: install/uninstall of the hook and signal handling
//! - [`instance`]: first-instance detection and second-launch notification

pub mod config;
pub mod events;
pub mod hook;
pub mod instance;
pub mod ipc;
pub mod lifecycle;
pub mod tracker;
