//! Events module for tracker and instance notifications
//!
//! Provides structured event types published by the modifier tracker and
//! the single-instance coordinator.

use serde::{Deserialize, Serialize};

use crate::hook::{KeyEvent, LogicalKey};
use crate::tracker::ModifierSet;

/// Notifications published by the modifier tracker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TrackerEvent {
    /// The tracked modifier set was replaced
    ModifierSetChanged { modifiers: ModifierSet },

    /// A tracked modifier was pressed or released
    ModifierStateChanged { key: LogicalKey, pressed: bool },

    /// A non-modifier key went down
    KeyObserved { event: KeyEvent },

    /// Every modifier of a non-empty set is now held
    Triggered,
}

impl std::fmt::Display for TrackerEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TrackerEvent::ModifierSetChanged { modifiers } => {
                write!(f, "MODIFIER_SET_CHANGED ({})", modifiers)
            }
            TrackerEvent::ModifierStateChanged { key, pressed } => {
                write!(f, "MODIFIER_STATE_CHANGED ({} {})", key, if *pressed { "down" } else { "up" })
            }
            TrackerEvent::KeyObserved { event } => write!(f, "KEY_OBSERVED ({})", event),
            TrackerEvent::Triggered => write!(f, "TRIGGERED"),
        }
    }
}

/// Notifications raised by the single-instance coordinator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InstanceEvent {
    /// Another launch of the application was attempted
    SecondInstanceStarted {
        /// Process id of the launcher, when the signal carries one
        pid: Option<u32>,
    },
}

impl std::fmt::Display for InstanceEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InstanceEvent::SecondInstanceStarted { pid: Some(pid) } => {
                write!(f, "SECOND_INSTANCE_STARTED (pid {})", pid)
            }
            InstanceEvent::SecondInstanceStarted { pid: None } => {
                write!(f, "SECOND_INSTANCE_STARTED")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serialization() {
        let event = TrackerEvent::ModifierStateChanged {
            key: LogicalKey::RightCtrl,
            pressed: true,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("modifier_state_changed"));
        assert!(json.contains("RightCtrl"));
    }

    #[test]
    fn test_event_deserialization() {
        let json = r#"{"type":"triggered"}"#;
        let event: TrackerEvent = serde_json::from_str(json).unwrap();
        assert!(matches!(event, TrackerEvent::Triggered));
    }

    #[test]
    fn test_display() {
        let event = InstanceEvent::SecondInstanceStarted { pid: Some(42) };
        assert_eq!(event.to_string(), "SECOND_INSTANCE_STARTED (pid 42)");
    }
}
