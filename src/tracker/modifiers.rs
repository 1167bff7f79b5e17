//! Core modifier tracker implementation
//!
//! Consumes key events from the hook thread and configuration changes from
//! the runtime, both serialized through one mutex around the state map.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::events::TrackerEvent;
use crate::hook::{KeyEvent, KeySink, LogicalKey, Propagation};

use super::set::{ModifierSet, ModifierStates};

/// Synchronous observer that may swallow a non-modifier key-down
pub trait KeyInterceptor: Send + Sync + 'static {
    fn intercept(&self, event: &KeyEvent) -> Propagation;
}

impl<F> KeyInterceptor for F
where
    F: Fn(&KeyEvent) -> Propagation + Send + Sync + 'static,
{
    fn intercept(&self, event: &KeyEvent) -> Propagation {
        self(event)
    }
}

/// What a key event did to the state map, decided under the lock
enum Outcome {
    NotModifier,
    Unchanged,
    Changed { pressed: bool, triggered: bool },
}

/// Tracks the modifier set and publishes its transitions
pub struct ModifierTracker {
    states: Mutex<ModifierStates>,
    event_tx: broadcast::Sender<TrackerEvent>,
    interceptors: RwLock<Vec<Arc<dyn KeyInterceptor>>>,
}

impl ModifierTracker {
    /// Create a tracker with every key of `modifiers` released
    pub fn new(modifiers: ModifierSet) -> Self {
        let (event_tx, _) = broadcast::channel(64);
        Self {
            states: Mutex::new(ModifierStates::released(&modifiers)),
            event_tx,
            interceptors: RwLock::new(Vec::new()),
        }
    }

    /// Subscribe to tracker notifications
    pub fn subscribe(&self) -> broadcast::Receiver<TrackerEvent> {
        self.event_tx.subscribe()
    }

    /// Register an interceptor consulted for every non-modifier key-down
    pub fn add_interceptor(&self, interceptor: impl KeyInterceptor) {
        self.interceptors
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(interceptor));
    }

    /// Replace the tracked keys
    ///
    /// Retained keys keep their pressed state, new keys start released.
    pub fn set_modifier_set(&self, modifiers: ModifierSet) {
        {
            let mut states = self.lock_states();
            states.replace(&modifiers);
        }

        info!(modifiers = %modifiers, "modifier set changed");
        self.emit(TrackerEvent::ModifierSetChanged { modifiers });
    }

    /// Apply one key transition
    pub fn on_key_event(&self, event: KeyEvent) -> Propagation {
        let outcome = {
            let mut states = self.lock_states();
            let was_active = states.all_active();
            match states.update(event.key, event.is_down()) {
                None => Outcome::NotModifier,
                Some(false) => Outcome::Unchanged,
                Some(true) => Outcome::Changed {
                    pressed: event.is_down(),
                    triggered: !was_active && !states.is_empty() && states.all_active(),
                },
            }
        };

        // Lock released: observers may query the tracker again
        match outcome {
            Outcome::Changed { pressed, triggered } => {
                debug!(key = %event.key, pressed, "modifier state changed");
                self.emit(TrackerEvent::ModifierStateChanged {
                    key: event.key,
                    pressed,
                });
                if triggered {
                    debug!("all modifiers active");
                    self.emit(TrackerEvent::Triggered);
                }
                Propagation::Propagate
            }
            Outcome::Unchanged => Propagation::Propagate,
            Outcome::NotModifier if event.is_down() => self.observe_key(event),
            Outcome::NotModifier => Propagation::Propagate,
        }
    }

    /// Every tracked modifier is currently held (true for an empty set)
    pub fn all_modifiers_active(&self) -> bool {
        self.lock_states().all_active()
    }

    /// Point-in-time copy of the state map
    pub fn modifier_states(&self) -> ModifierStates {
        self.lock_states().clone()
    }

    pub fn modifier_set(&self) -> ModifierSet {
        self.lock_states().modifier_set()
    }

    /// Whether `key` is a tracked modifier that is currently held
    pub fn is_pressed(&self, key: LogicalKey) -> bool {
        self.lock_states().get(key).unwrap_or(false)
    }

    fn observe_key(&self, event: KeyEvent) -> Propagation {
        self.emit(TrackerEvent::KeyObserved { event });

        let interceptors = self
            .interceptors
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        interceptors
            .iter()
            .fold(Propagation::Propagate, |verdict, interceptor| {
                verdict.merge(interceptor.intercept(&event))
            })
    }

    fn emit(&self, event: TrackerEvent) {
        // No subscribers is not an error
        let _ = self.event_tx.send(event);
    }

    fn lock_states(&self) -> MutexGuard<'_, ModifierStates> {
        self.states.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for ModifierTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let interceptors = self
            .interceptors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len();
        f.debug_struct("ModifierTracker")
            .field("states", &*self.lock_states())
            .field("interceptors", &interceptors)
            .finish()
    }
}

impl KeySink for ModifierTracker {
    fn on_key_event(&self, event: KeyEvent) -> Propagation {
        ModifierTracker::on_key_event(self, event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::broadcast::error::TryRecvError;

    fn create_tracker(keys: &[LogicalKey]) -> (ModifierTracker, broadcast::Receiver<TrackerEvent>) {
        let tracker = ModifierTracker::new(ModifierSet::new(keys.iter().copied()));
        let rx = tracker.subscribe();
        (tracker, rx)
    }

    fn drain(rx: &mut broadcast::Receiver<TrackerEvent>) -> Vec<TrackerEvent> {
        let mut events = Vec::new();
        loop {
            match rx.try_recv() {
                Ok(event) => events.push(event),
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return events,
                Err(TryRecvError::Lagged(_)) => continue,
            }
        }
    }

    #[test]
    fn test_initial_state() {
        let (tracker, _) = create_tracker(&[LogicalKey::RightCtrl, LogicalKey::RightShift]);
        assert!(!tracker.all_modifiers_active());
        assert!(!tracker.is_pressed(LogicalKey::RightCtrl));
    }

    #[test]
    fn test_all_modifiers_active_follows_last_transition() {
        let (ctrl, shift) = (LogicalKey::RightCtrl, LogicalKey::RightShift);
        let (tracker, _) = create_tracker(&[ctrl, shift]);

        tracker.on_key_event(KeyEvent::down(ctrl));
        assert!(!tracker.all_modifiers_active());

        tracker.on_key_event(KeyEvent::down(shift));
        assert!(tracker.all_modifiers_active());

        tracker.on_key_event(KeyEvent::up(ctrl));
        assert!(!tracker.all_modifiers_active());

        tracker.on_key_event(KeyEvent::down(ctrl));
        assert!(tracker.all_modifiers_active());
    }

    #[test]
    fn test_repeated_down_is_silent() {
        let ctrl = LogicalKey::RightCtrl;
        let (tracker, mut rx) = create_tracker(&[ctrl, LogicalKey::RightShift]);

        tracker.on_key_event(KeyEvent::down(ctrl));
        tracker.on_key_event(KeyEvent::down(ctrl));
        tracker.on_key_event(KeyEvent::down(ctrl));

        assert_eq!(
            drain(&mut rx),
            vec![TrackerEvent::ModifierStateChanged {
                key: ctrl,
                pressed: true
            }]
        );
    }

    #[test]
    fn test_non_modifier_down_observed_once_up_dropped() {
        let (tracker, mut rx) = create_tracker(&[LogicalKey::RightCtrl]);

        tracker.on_key_event(KeyEvent::down(LogicalKey::L));
        tracker.on_key_event(KeyEvent::up(LogicalKey::L));

        assert_eq!(
            drain(&mut rx),
            vec![TrackerEvent::KeyObserved {
                event: KeyEvent::down(LogicalKey::L)
            }]
        );
    }

    #[test]
    fn test_trigger_fires_on_rising_edge_only() {
        let (ctrl, shift) = (LogicalKey::RightCtrl, LogicalKey::RightShift);
        let (tracker, mut rx) = create_tracker(&[ctrl, shift]);

        tracker.on_key_event(KeyEvent::down(ctrl));
        tracker.on_key_event(KeyEvent::down(shift));
        tracker.on_key_event(KeyEvent::down(shift));
        tracker.on_key_event(KeyEvent::up(shift));
        tracker.on_key_event(KeyEvent::down(shift));

        let triggers = drain(&mut rx)
            .into_iter()
            .filter(|e| *e == TrackerEvent::Triggered)
            .count();
        assert_eq!(triggers, 2);
    }

    #[test]
    fn test_set_change_preserves_retained_keys() {
        let (a, b, c) = (LogicalKey::A, LogicalKey::B, LogicalKey::C);
        let (tracker, mut rx) = create_tracker(&[a, b]);
        tracker.on_key_event(KeyEvent::down(a));
        drain(&mut rx);

        tracker.set_modifier_set(ModifierSet::new([a, c]));

        let states: Vec<_> = tracker.modifier_states().iter().collect();
        assert_eq!(states, vec![(a, true), (c, false)]);
        assert_eq!(
            drain(&mut rx),
            vec![TrackerEvent::ModifierSetChanged {
                modifiers: ModifierSet::new([a, c])
            }]
        );

        // B is no longer a modifier
        tracker.on_key_event(KeyEvent::down(b));
        assert_eq!(
            drain(&mut rx),
            vec![TrackerEvent::KeyObserved {
                event: KeyEvent::down(b)
            }]
        );
    }

    #[test]
    fn test_empty_set_is_vacuously_active() {
        let (tracker, _) = create_tracker(&[LogicalKey::RightCtrl]);
        tracker.set_modifier_set(ModifierSet::empty());
        assert!(tracker.all_modifiers_active());
        assert!(tracker.modifier_states().is_empty());
    }

    #[test]
    fn test_interceptor_consumes_key_down() {
        let (tracker, _) = create_tracker(&[LogicalKey::RightCtrl]);
        tracker.add_interceptor(|event: &KeyEvent| {
            if event.key == LogicalKey::L {
                Propagation::Consumed
            } else {
                Propagation::Propagate
            }
        });
        tracker.add_interceptor(|_: &KeyEvent| Propagation::Propagate);

        assert_eq!(
            tracker.on_key_event(KeyEvent::down(LogicalKey::L)),
            Propagation::Consumed
        );
        assert_eq!(
            tracker.on_key_event(KeyEvent::down(LogicalKey::K)),
            Propagation::Propagate
        );
        // Modifiers are never swallowed
        assert_eq!(
            tracker.on_key_event(KeyEvent::down(LogicalKey::RightCtrl)),
            Propagation::Propagate
        );
    }

    #[test]
    fn test_interceptor_may_query_tracker() {
        let tracker = Arc::new(ModifierTracker::new(ModifierSet::new([LogicalKey::RightCtrl])));
        let weak = Arc::downgrade(&tracker);
        tracker.add_interceptor(move |_: &KeyEvent| {
            // Would deadlock if the state lock were held during notification
            match weak.upgrade() {
                Some(t) if t.all_modifiers_active() => Propagation::Consumed,
                _ => Propagation::Propagate,
            }
        });

        assert_eq!(
            tracker.on_key_event(KeyEvent::down(LogicalKey::L)),
            Propagation::Propagate
        );
        tracker.on_key_event(KeyEvent::down(LogicalKey::RightCtrl));
        assert_eq!(
            tracker.on_key_event(KeyEvent::down(LogicalKey::L)),
            Propagation::Consumed
        );
    }

    #[test]
    fn test_concurrent_updates() {
        let keys = [LogicalKey::A, LogicalKey::B, LogicalKey::C, LogicalKey::D];
        let tracker = Arc::new(ModifierTracker::new(ModifierSet::new(keys)));

        let handles: Vec<_> = keys
            .iter()
            .map(|&key| {
                let tracker = Arc::clone(&tracker);
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        tracker.on_key_event(KeyEvent::down(key));
                        tracker.on_key_event(KeyEvent::up(key));
                    }
                    tracker.on_key_event(KeyEvent::down(key));
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert!(tracker.all_modifiers_active());
    }

    #[test]
    fn test_debug_shows_states() {
        let (tracker, _) = create_tracker(&[LogicalKey::RightCtrl]);
        tracker.on_key_event(KeyEvent::down(LogicalKey::RightCtrl));

        let debug = format!("{:?}", tracker);
        assert!(debug.contains("ModifierTracker"));
        assert!(debug.contains("RightCtrl"));
    }
}
