//! Configuration loading and management

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, info};

use crate::tracker::ModifierSet;

const APP_DIR: &str = "instant-trigger";
const SETTINGS_FILE: &str = "settings.json";

/// Process configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Name the single-instance primitives are derived from
    pub identity: String,

    /// Directory for persistent data
    pub data_dir: PathBuf,

    /// Directory for the instance lock and notify socket
    pub runtime_dir: PathBuf,
}

impl Config {
    /// Load configuration from environment and defaults
    pub fn load() -> Result<Self> {
        let identity =
            std::env::var("INSTANT_TRIGGER_IDENTITY").unwrap_or_else(|_| APP_DIR.to_string());

        let data_dir = match std::env::var_os("INSTANT_TRIGGER_DATA_DIR") {
            Some(dir) => PathBuf::from(dir),
            None => dirs::data_dir()
                .context("no data directory for this platform")?
                .join(APP_DIR),
        };

        let runtime_dir = dirs::runtime_dir().unwrap_or_else(std::env::temp_dir);

        Ok(Self {
            identity,
            data_dir,
            runtime_dir,
        })
    }

    pub fn settings_path(&self) -> PathBuf {
        self.data_dir.join(SETTINGS_FILE)
    }

    /// Ensure data directory exists
    pub fn ensure_dirs(&self) -> Result<()> {
        std::fs::create_dir_all(&self.data_dir)
            .with_context(|| format!("failed to create {}", self.data_dir.display()))?;
        Ok(())
    }
}

/// User settings persisted as JSON
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Modifiers that must all be held to trigger
    pub modifier_keys: ModifierSet,
}

impl Settings {
    /// Read settings from `path`; a missing file yields defaults
    pub fn load(path: &Path) -> Result<Self> {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no settings file, using defaults");
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(e).with_context(|| format!("failed to read {}", path.display()));
            }
        };

        serde_json::from_str(&contents)
            .with_context(|| format!("malformed settings in {}", path.display()))
    }
}

/// Current settings plus a channel announcing modifier set changes
pub struct SettingsStore {
    path: PathBuf,
    modifiers_tx: watch::Sender<ModifierSet>,
}

impl SettingsStore {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let settings = Settings::load(&path)?;
        info!(modifiers = %settings.modifier_keys, "settings loaded");

        let (modifiers_tx, _) = watch::channel(settings.modifier_keys);
        Ok(Self { path, modifiers_tx })
    }

    pub fn modifier_set(&self) -> ModifierSet {
        self.modifiers_tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ModifierSet> {
        self.modifiers_tx.subscribe()
    }

    /// Re-read the settings file, publishing the modifier set if it changed
    ///
    /// Returns whether subscribers were notified. On error the current
    /// settings are kept.
    pub fn reload(&self) -> Result<bool> {
        let settings = Settings::load(&self.path)?;
        let changed = self.modifiers_tx.send_if_modified(|current| {
            if *current == settings.modifier_keys {
                false
            } else {
                *current = settings.modifier_keys;
                true
            }
        });

        if changed {
            info!(modifiers = %self.modifier_set(), "modifier keys changed");
        } else {
            debug!("settings reloaded, modifier keys unchanged");
        }
        Ok(changed)
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::hook::LogicalKey;

    fn write_settings(dir: &TempDir, json: &str) -> PathBuf {
        let path = dir.path().join(SETTINGS_FILE);
        std::fs::write(&path, json).unwrap();
        path
    }

    #[test]
    fn test_config_load() {
        let config = Config::load().unwrap();
        assert!(config.settings_path().ends_with(SETTINGS_FILE));
        assert!(!config.identity.is_empty());
    }

    #[test]
    fn test_missing_settings_use_defaults() {
        let dir = TempDir::new().unwrap();
        let settings = Settings::load(&dir.path().join("absent.json")).unwrap();
        assert_eq!(
            settings.modifier_keys,
            ModifierSet::new([LogicalKey::RightCtrl, LogicalKey::RightShift])
        );
    }

    #[test]
    fn test_settings_parse_names_and_codes() {
        let dir = TempDir::new().unwrap();
        let path = write_settings(&dir, r#"{"modifier_keys": ["LeftAlt", "0xE8"]}"#);

        let settings = Settings::load(&path).unwrap();

        assert_eq!(
            settings.modifier_keys,
            ModifierSet::new([LogicalKey::LeftAlt, LogicalKey::Other(0xE8)])
        );
    }

    #[test]
    fn test_malformed_settings_rejected() {
        let dir = TempDir::new().unwrap();
        let path = write_settings(&dir, r#"{"modifier_keys": ["NotAKey"]}"#);

        let err = Settings::load(&path).unwrap_err();
        assert!(err.to_string().contains("malformed settings"));
    }

    #[test]
    fn test_reload_publishes_only_changes() {
        let dir = TempDir::new().unwrap();
        let path = write_settings(&dir, r#"{"modifier_keys": ["RightCtrl", "RightShift"]}"#);
        let store = SettingsStore::open(&path).unwrap();
        let mut rx = store.subscribe();

        assert!(!store.reload().unwrap());
        assert!(!rx.has_changed().unwrap());

        write_settings(&dir, r#"{"modifier_keys": ["RightAlt"]}"#);
        assert!(store.reload().unwrap());
        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow_and_update(), ModifierSet::new([LogicalKey::RightAlt]));
    }

    #[test]
    fn test_failed_reload_keeps_settings() {
        let dir = TempDir::new().unwrap();
        let path = write_settings(&dir, r#"{"modifier_keys": ["RightAlt"]}"#);
        let store = SettingsStore::open(&path).unwrap();

        write_settings(&dir, "{ not json");

        assert!(store.reload().is_err());
        assert_eq!(store.modifier_set(), ModifierSet::new([LogicalKey::RightAlt]));
    }
}
