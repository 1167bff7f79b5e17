//! In-process stand-in for the OS hook, used by tests

use std::sync::Arc;

use super::raw::{process_raw, HookVerdict};
use super::source::{HookError, KeySink, KeySource};

/// Key source driven by hand instead of by the OS
#[derive(Default)]
pub struct FakeKeySource {
    sink: Option<Arc<dyn KeySink>>,
    fail_with: Option<i32>,
    pub installs: usize,
    pub uninstalls: usize,
}

impl FakeKeySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following `install` fail with the given OS error code
    pub fn failing(code: i32) -> Self {
        Self {
            fail_with: Some(code),
            ..Self::default()
        }
    }

    /// Deliver a raw notification as the OS would
    ///
    /// Events arriving while uninstalled are not intercepted at all.
    pub fn raw(&self, code: i32, message: u32, vk_code: u32) -> HookVerdict {
        match &self.sink {
            Some(sink) => process_raw(sink.as_ref(), code, message, vk_code),
            None => HookVerdict::CallNext,
        }
    }
}

impl KeySource for FakeKeySource {
    fn install(&mut self, sink: Arc<dyn KeySink>) -> Result<(), HookError> {
        if self.sink.is_some() {
            return Err(HookError::AlreadyInstalled);
        }
        if let Some(code) = self.fail_with {
            return Err(HookError::Os { code });
        }
        self.sink = Some(sink);
        self.installs += 1;
        Ok(())
    }

    fn uninstall(&mut self) {
        if self.sink.take().is_some() {
            self.uninstalls += 1;
        }
    }

    fn is_installed(&self) -> bool {
        self.sink.is_some()
    }
}
