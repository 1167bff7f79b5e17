//! Modifier state tracking
//!
//! Keeps the pressed/released state of a configurable set of modifier keys:
//! - Modifier keys update the state map and report changes
//! - Other key-downs are forwarded to observers and interceptors
//! - Pressing the whole set raises the instant trigger

mod modifiers;
mod set;

pub use modifiers::{KeyInterceptor, ModifierTracker};
pub use set::{ModifierSet, ModifierStates};
