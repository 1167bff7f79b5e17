//! Hook lifecycle management
//!
//! Owns the key source and the tracker it feeds. The source is always
//! uninstalled before the tracker is released.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::hook::{HookError, KeySink, KeySource};
use crate::tracker::{ModifierSet, ModifierTracker};

/// The two states of the hook lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HookState {
    #[default]
    Uninstalled,
    Running,
}

impl std::fmt::Display for HookState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HookState::Uninstalled => write!(f, "Uninstalled"),
            HookState::Running => write!(f, "Running"),
        }
    }
}

struct Running {
    tracker: Arc<ModifierTracker>,
    settings_task: Option<JoinHandle<()>>,
}

/// Ties one [`ModifierTracker`] to a [`KeySource`]
pub struct HookManager<S: KeySource> {
    source: S,
    running: Option<Running>,
}

impl<S: KeySource> HookManager<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            running: None,
        }
    }

    pub fn state(&self) -> HookState {
        if self.running.is_some() {
            HookState::Running
        } else {
            HookState::Uninstalled
        }
    }

    /// Create the tracker for `modifiers` and install the key source
    pub fn start(&mut self, modifiers: ModifierSet) -> Result<Arc<ModifierTracker>, HookError> {
        if self.running.is_some() {
            return Err(HookError::AlreadyRunning);
        }

        let tracker = Arc::new(ModifierTracker::new(modifiers.clone()));
        let sink: Arc<dyn KeySink> = tracker.clone();
        self.source.install(sink)?;

        info!(modifiers = %modifiers, "hook manager started");
        self.running = Some(Running {
            tracker: Arc::clone(&tracker),
            settings_task: None,
        });
        Ok(tracker)
    }

    /// Re-apply the modifier set whenever the settings channel changes
    ///
    /// Must be called from within a tokio runtime. Replaces any earlier
    /// subscription; ignored while uninstalled.
    pub fn follow_settings(&mut self, mut settings_rx: watch::Receiver<ModifierSet>) {
        let Some(running) = self.running.as_mut() else {
            debug!("hook manager not running, settings not followed");
            return;
        };

        if let Some(task) = running.settings_task.take() {
            task.abort();
        }

        let tracker = Arc::clone(&running.tracker);
        running.settings_task = Some(tokio::spawn(async move {
            while settings_rx.changed().await.is_ok() {
                let modifiers = settings_rx.borrow_and_update().clone();
                tracker.set_modifier_set(modifiers);
            }
            debug!("settings channel closed");
        }));
    }

    /// Uninstall the key source and release the tracker
    ///
    /// Safe to call any number of times.
    pub fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };

        if let Some(task) = running.settings_task {
            task.abort();
        }
        self.source.uninstall();
        drop(running.tracker);

        info!("hook manager stopped");
    }

    pub fn tracker(&self) -> Option<&Arc<ModifierTracker>> {
        self.running.as_ref().map(|running| &running.tracker)
    }

    pub fn source(&self) -> &S {
        &self.source
    }
}

impl<S: KeySource> Drop for HookManager<S> {
    fn drop(&mut self) {
        self.stop();
    }
}
