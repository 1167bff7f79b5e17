//! instant-trigger: background process watching for the modifier chord
//!
//! Only the first launch per identity runs; later launches notify it and exit.

use anyhow::{Context, Result};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use instant_trigger::config::{Config, SettingsStore};
use instant_trigger::events::{InstanceEvent, TrackerEvent};
use instant_trigger::hook::NativeKeySource;
use instant_trigger::instance::{native_primitives, InstanceCoordinator, InstanceRole};
use instant_trigger::lifecycle::{HookManager, ReloadSignal, ShutdownSignal};

// Single-threaded so the instance token is released on the thread that took it
#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "instant-trigger starting");

    let config = Config::load()?;
    config.ensure_dirs()?;
    info!(identity = %config.identity, data_dir = ?config.data_dir, "configuration loaded");

    let (instance_tx, instance_rx) = mpsc::channel(8);
    let primitives = native_primitives(&config.runtime_dir);
    let mut coordinator =
        match InstanceCoordinator::initialize(&primitives, &config.identity, instance_tx) {
            Ok(coordinator) if coordinator.role() == InstanceRole::Secondary => {
                info!("instant-trigger is already running, exiting");
                return Ok(());
            }
            Ok(coordinator) => Some(coordinator),
            Err(e) => {
                warn!(?e, "single-instance detection failed, continuing without it");
                None
            }
        };

    let result = run(&config, instance_rx).await;

    // Every exit after initialize goes through dispose so the lock is left clean
    if let Some(coordinator) = coordinator.as_mut() {
        coordinator.dispose().await;
    }

    if let Err(e) = &result {
        error!(error = %format!("{:#}", e), "instant-trigger failed");
    }

    info!("instant-trigger stopped");

    result
}

/// Install the hook and run the event loop until shutdown
async fn run(config: &Config, mut instance_rx: mpsc::Receiver<InstanceEvent>) -> Result<()> {
    let settings = SettingsStore::open(config.settings_path())?;

    let source = NativeKeySource::acquire().context("keyboard hook unavailable")?;
    let mut manager = HookManager::new(source);
    let tracker = manager
        .start(settings.modifier_set())
        .context("failed to install keyboard hook")?;
    manager.follow_settings(settings.subscribe());

    let mut tracker_events = tracker.subscribe();
    let mut reload = ReloadSignal::new()?;
    let shutdown = ShutdownSignal::new();
    let shutdown_wait = shutdown.wait();
    tokio::pin!(shutdown_wait);

    info!("instant-trigger initialized, entering main loop");

    loop {
        tokio::select! {
            result = &mut shutdown_wait => {
                if let Err(e) = result {
                    error!(?e, "failed to listen for shutdown signals");
                }
                info!("shutdown signal received");
                break;
            }

            event = tracker_events.recv() => match event {
                Ok(TrackerEvent::Triggered) => {
                    info!(modifiers = %tracker.modifier_set(), "instant trigger");
                }
                Ok(event) => debug!(%event, "tracker event"),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(skipped = n, "tracker event receiver lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },

            Some(event) = instance_rx.recv() => {
                info!(%event, "another launch was attempted");
            }

            _ = reload.recv() => {
                if let Err(e) = settings.reload() {
                    warn!(error = %format!("{:#}", e), "failed to reload settings");
                }
            }
        }
    }

    info!("shutting down...");
    manager.stop();
    Ok(())
}
