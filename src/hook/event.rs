//! Normalized key events delivered from the hook to the tracker

use serde::{Deserialize, Serialize};

use super::keys::LogicalKey;

/// Direction of a key transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyDirection {
    Down,
    Up,
}

/// A single key transition observed system-wide
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyEvent {
    pub key: LogicalKey,
    pub direction: KeyDirection,
}

impl KeyEvent {
    pub fn down(key: LogicalKey) -> Self {
        Self {
            key,
            direction: KeyDirection::Down,
        }
    }

    pub fn up(key: LogicalKey) -> Self {
        Self {
            key,
            direction: KeyDirection::Up,
        }
    }

    pub fn is_down(&self) -> bool {
        self.direction == KeyDirection::Down
    }
}

impl std::fmt::Display for KeyEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.direction {
            KeyDirection::Down => write!(f, "{} down", self.key),
            KeyDirection::Up => write!(f, "{} up", self.key),
        }
    }
}

/// Verdict returned for each delivered key event
///
/// `Consumed` swallows the physical event so no other hook or window sees it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Propagation {
    #[default]
    Propagate,
    Consumed,
}

impl Propagation {
    /// Combine two verdicts, any `Consumed` wins
    pub fn merge(self, other: Propagation) -> Propagation {
        if self == Propagation::Consumed || other == Propagation::Consumed {
            Propagation::Consumed
        } else {
            Propagation::Propagate
        }
    }

    pub fn is_consumed(&self) -> bool {
        *self == Propagation::Consumed
    }
}
