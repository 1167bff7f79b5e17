//! Low-level keyboard interception
//!
//! Installs a system-wide keyboard hook and turns raw notifications into
//! [`KeyEvent`]s delivered to a [`KeySink`].

mod event;
pub mod keys;
pub mod raw;
mod source;

#[cfg(test)]
pub(crate) mod fake;

#[cfg(target_os = "macos")]
mod macos;
#[cfg(not(any(target_os = "windows", target_os = "macos")))]
mod unsupported;
#[cfg(target_os = "windows")]
mod win32;

pub use event::{KeyDirection, KeyEvent, Propagation};
pub use keys::LogicalKey;
pub use raw::{process_raw, HookVerdict};
pub use source::{HookError, KeySink, KeySource};

#[cfg(target_os = "macos")]
pub use macos::MacKeySource as NativeKeySource;
#[cfg(not(any(target_os = "windows", target_os = "macos")))]
pub use unsupported::UnsupportedKeySource as NativeKeySource;
#[cfg(target_os = "windows")]
pub use win32::WindowsKeySource as NativeKeySource;
