//! Modifier set and state map

use serde::{Deserialize, Serialize};

use crate::hook::LogicalKey;

/// Ordered, duplicate-free set of modifier keys
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<LogicalKey>", into = "Vec<LogicalKey>")]
pub struct ModifierSet(Vec<LogicalKey>);

impl ModifierSet {
    /// Build a set, keeping the first occurrence of each key
    pub fn new(keys: impl IntoIterator<Item = LogicalKey>) -> Self {
        let mut unique: Vec<LogicalKey> = Vec::new();
        for key in keys {
            if !unique.contains(&key) {
                unique.push(key);
            }
        }
        Self(unique)
    }

    pub fn empty() -> Self {
        Self(Vec::new())
    }

    pub fn keys(&self) -> &[LogicalKey] {
        &self.0
    }

    pub fn contains(&self, key: LogicalKey) -> bool {
        self.0.contains(&key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Right Control + Right Shift
impl Default for ModifierSet {
    fn default() -> Self {
        Self(vec![LogicalKey::RightCtrl, LogicalKey::RightShift])
    }
}

impl From<Vec<LogicalKey>> for ModifierSet {
    fn from(keys: Vec<LogicalKey>) -> Self {
        Self::new(keys)
    }
}

impl From<ModifierSet> for Vec<LogicalKey> {
    fn from(set: ModifierSet) -> Self {
        set.0
    }
}

impl FromIterator<LogicalKey> for ModifierSet {
    fn from_iter<I: IntoIterator<Item = LogicalKey>>(iter: I) -> Self {
        Self::new(iter)
    }
}

impl std::fmt::Display for ModifierSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.0.is_empty() {
            return write!(f, "(none)");
        }
        let names: Vec<String> = self.0.iter().map(ToString::to_string).collect();
        write!(f, "{}", names.join("+"))
    }
}

/// Pressed flag for each key of the current modifier set
///
/// The domain always equals the modifier set it was last built from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ModifierStates {
    entries: Vec<(LogicalKey, bool)>,
}

impl ModifierStates {
    /// All keys of `set`, released
    pub fn released(set: &ModifierSet) -> Self {
        Self {
            entries: set.keys().iter().map(|&key| (key, false)).collect(),
        }
    }

    /// Rebuild for `set`, keeping the pressed flag of retained keys
    pub fn replace(&mut self, set: &ModifierSet) {
        let entries = set
            .keys()
            .iter()
            .map(|&key| (key, self.get(key).unwrap_or(false)))
            .collect();
        self.entries = entries;
    }

    /// Pressed flag for `key`, `None` if it is not a modifier
    pub fn get(&self, key: LogicalKey) -> Option<bool> {
        self.entries
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, pressed)| *pressed)
    }

    /// Set the flag for a member key
    ///
    /// Returns `None` for non-members, otherwise whether the value changed.
    pub fn update(&mut self, key: LogicalKey, pressed: bool) -> Option<bool> {
        let entry = self.entries.iter_mut().find(|(k, _)| *k == key)?;
        if entry.1 == pressed {
            return Some(false);
        }
        entry.1 = pressed;
        Some(true)
    }

    /// Every tracked modifier is held; an empty set is vacuously active
    pub fn all_active(&self) -> bool {
        if self.entries.is_empty() {
            return true;
        }
        self.entries.iter().all(|(_, pressed)| *pressed)
    }

    pub fn iter(&self) -> impl Iterator<Item = (LogicalKey, bool)> + '_ {
        self.entries.iter().copied()
    }

    pub fn modifier_set(&self) -> ModifierSet {
        ModifierSet(self.entries.iter().map(|(key, _)| *key).collect())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_deduplicates_in_order() {
        let set = ModifierSet::new([
            LogicalKey::RightShift,
            LogicalKey::RightCtrl,
            LogicalKey::RightShift,
        ]);
        assert_eq!(set.keys(), &[LogicalKey::RightShift, LogicalKey::RightCtrl]);
    }

    #[test]
    fn test_default_set() {
        let set = ModifierSet::default();
        assert_eq!(set.to_string(), "RightCtrl+RightShift");
    }

    #[test]
    fn test_set_deserialization_deduplicates() {
        let set: ModifierSet = serde_json::from_str(r#"["RightCtrl","rctrl","L"]"#).unwrap();
        assert_eq!(set.keys(), &[LogicalKey::RightCtrl, LogicalKey::L]);
    }

    #[test]
    fn test_replace_keeps_only_retained_pressed_keys() {
        let (a, b, c) = (LogicalKey::A, LogicalKey::B, LogicalKey::C);
        let mut states = ModifierStates::released(&ModifierSet::new([a, b]));
        states.update(a, true);

        states.replace(&ModifierSet::new([a, c]));

        assert_eq!(states.iter().collect::<Vec<_>>(), vec![(a, true), (c, false)]);
        assert_eq!(states.get(b), None);
    }

    #[test]
    fn test_update_reports_change() {
        let mut states = ModifierStates::released(&ModifierSet::default());
        assert_eq!(states.update(LogicalKey::RightCtrl, true), Some(true));
        assert_eq!(states.update(LogicalKey::RightCtrl, true), Some(false));
        assert_eq!(states.update(LogicalKey::L, true), None);
    }

    #[test]
    fn test_empty_states_are_all_active() {
        let states = ModifierStates::released(&ModifierSet::empty());
        assert!(states.all_active());
    }
}
