//! Entity history store - the only shared mutable state in the engine
//!
//! Holds per-room last-motion timestamps, the door's last-closed timestamp
//! and the door's current semantic state behind a single lock. Every
//! operation is one critical section, so a snapshot never mixes a new door
//! state with a stale closed timestamp.
//!
//! Callers must not hold the returned values as a lock; nothing here awaits.

use crate::domain::types::{DoorState, RoomId, Timestamp};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;

/// Consistent view of the history relevant to one room
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EntityHistory {
    pub last_motion_at: Option<Timestamp>,
    pub last_door_closed_at: Option<Timestamp>,
    pub current_door_state: DoorState,
}

#[derive(Debug)]
struct HistoryState {
    last_motion: FxHashMap<RoomId, Timestamp>,
    last_door_closed_at: Option<Timestamp>,
    door_state: DoorState,
}

#[derive(Debug)]
pub struct HistoryStore {
    inner: Mutex<HistoryState>,
}

impl HistoryStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(HistoryState {
                last_motion: FxHashMap::default(),
                last_door_closed_at: None,
                door_state: DoorState::Unknown,
            }),
        }
    }

    /// Record motion in a room, returning the stored timestamp
    ///
    /// Keeps the later of the stored and submitted timestamps so a late
    /// redelivery cannot move the history backwards.
    pub fn record_motion(&self, room: RoomId, at: Timestamp) -> Timestamp {
        let mut state = self.inner.lock();
        let entry = state.last_motion.entry(room).or_insert(at);
        if at > *entry {
            *entry = at;
        }
        *entry
    }

    /// Commit a classified door state, returning the previous state
    ///
    /// The closed timestamp only moves on a non-Closed → Closed edge.
    pub fn record_door_transition(&self, new_state: DoorState, at: Timestamp) -> DoorState {
        let mut state = self.inner.lock();
        let previous = state.door_state;
        if new_state == DoorState::Closed && previous != DoorState::Closed {
            state.last_door_closed_at = Some(at);
        }
        state.door_state = new_state;
        previous
    }

    pub fn get(&self, room: RoomId) -> EntityHistory {
        let state = self.inner.lock();
        EntityHistory {
            last_motion_at: state.last_motion.get(&room).copied(),
            last_door_closed_at: state.last_door_closed_at,
            current_door_state: state.door_state,
        }
    }

    pub fn door_state(&self) -> DoorState {
        self.inner.lock().door_state
    }
}

impl Default for HistoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use std::sync::Arc;

    fn t(secs: i64) -> Timestamp {
        Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap() + Duration::seconds(secs)
    }

    #[test]
    fn test_defaults() {
        let store = HistoryStore::new();
        let history = store.get(RoomId::Room1);
        assert_eq!(history.last_motion_at, None);
        assert_eq!(history.last_door_closed_at, None);
        assert_eq!(history.current_door_state, DoorState::Unknown);
    }

    #[test]
    fn test_first_close_from_unknown_sets_timestamp() {
        let store = HistoryStore::new();
        let previous = store.record_door_transition(DoorState::Closed, t(0));
        assert_eq!(previous, DoorState::Unknown);
        assert_eq!(store.get(RoomId::Room1).last_door_closed_at, Some(t(0)));
    }

    #[test]
    fn test_repeated_close_is_edge_triggered() {
        let store = HistoryStore::new();
        store.record_door_transition(DoorState::Closed, t(0));
        let previous = store.record_door_transition(DoorState::Closed, t(10));
        assert_eq!(previous, DoorState::Closed);
        store.record_door_transition(DoorState::Closed, t(20));

        assert_eq!(store.get(RoomId::Room1).last_door_closed_at, Some(t(0)));
    }

    #[test]
    fn test_reopen_then_close_advances_timestamp() {
        let store = HistoryStore::new();
        store.record_door_transition(DoorState::Closed, t(0));
        store.record_door_transition(DoorState::PartiallyOpen, t(5));
        store.record_door_transition(DoorState::Open, t(6));
        assert_eq!(store.get(RoomId::Room1).last_door_closed_at, Some(t(0)));

        store.record_door_transition(DoorState::Closed, t(12));
        let history = store.get(RoomId::Room2);
        assert_eq!(history.last_door_closed_at, Some(t(12)));
        assert_eq!(history.current_door_state, DoorState::Closed);
    }

    #[test]
    fn test_motion_is_per_room() {
        let store = HistoryStore::new();
        store.record_motion(RoomId::Room1, t(3));
        assert_eq!(store.get(RoomId::Room1).last_motion_at, Some(t(3)));
        assert_eq!(store.get(RoomId::Room2).last_motion_at, None);
    }

    #[test]
    fn test_late_motion_does_not_rewind() {
        let store = HistoryStore::new();
        store.record_motion(RoomId::Room1, t(10));
        let stored = store.record_motion(RoomId::Room1, t(4));
        assert_eq!(stored, t(10));
        assert_eq!(store.get(RoomId::Room1).last_motion_at, Some(t(10)));
    }

    #[test]
    fn test_concurrent_motion_keeps_maximum() {
        let store = Arc::new(HistoryStore::new());
        let handles: Vec<_> = (0..8i64)
            .map(|worker| {
                let store = store.clone();
                std::thread::spawn(move || {
                    for i in 0..500i64 {
                        // Interleave so workers submit out of order
                        let secs = if i % 2 == 0 { i * 8 + worker } else { 4000 - i * 8 - worker };
                        store.record_motion(RoomId::Room1, t(secs));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        // Largest submitted: i=498 → 3984 + 7 = 3991; odd i=1 → 4000 - 8 - 0 = 3992
        assert_eq!(store.get(RoomId::Room1).last_motion_at, Some(t(3992)));
    }

    #[test]
    fn test_concurrent_door_transitions_stay_consistent() {
        let store = Arc::new(HistoryStore::new());
        let handles: Vec<_> = (0..4i64)
            .map(|worker| {
                let store = store.clone();
                std::thread::spawn(move || {
                    for i in 0..200i64 {
                        let state = if (i + worker) % 3 == 0 { DoorState::Closed } else { DoorState::Open };
                        store.record_door_transition(state, t(i));
                        let snapshot = store.get(RoomId::Room1);
                        if snapshot.current_door_state == DoorState::Closed {
                            assert!(snapshot.last_door_closed_at.is_some());
                        }
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
    }
}
