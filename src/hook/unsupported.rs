//! Fallback for targets without a global keyboard hook backend

use std::sync::Arc;

use super::source::{HookError, KeySink, KeySource};

pub struct UnsupportedKeySource;

impl UnsupportedKeySource {
    pub fn acquire() -> Result<Self, HookError> {
        Ok(Self)
    }
}

impl KeySource for UnsupportedKeySource {
    fn install(&mut self, _sink: Arc<dyn KeySink>) -> Result<(), HookError> {
        Err(HookError::Unsupported)
    }

    fn uninstall(&mut self) {}

    fn is_installed(&self) -> bool {
        false
    }
}
