//! Room occupancy classification with time-windowed hysteresis
//!
//! A room is occupied while its last motion is within the room's window.
//! Hallways always use the short window. The door-adjacent room switches to
//! the long window while the door is closed and motion was seen after it
//! closed, since a person sitting behind a shut door rarely retriggers the
//! PIR sensor.

use crate::domain::types::{DoorState, OccupancyState, RoomId, RoomKind, Timestamp};
use crate::infra::config::Config;
use crate::services::history::EntityHistory;
use chrono::Duration;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OccupancyPolicy {
    hallway_timeout: Duration,
    door_adjacent_timeout: Duration,
}

impl Default for OccupancyPolicy {
    fn default() -> Self {
        Self { hallway_timeout: Duration::seconds(10), door_adjacent_timeout: Duration::seconds(30) }
    }
}

impl OccupancyPolicy {
    pub fn new(hallway_timeout: Duration, door_adjacent_timeout: Duration) -> Self {
        Self { hallway_timeout, door_adjacent_timeout }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            Duration::seconds(config.hallway_timeout_secs() as i64),
            Duration::seconds(config.door_adjacent_timeout_secs() as i64),
        )
    }

    /// Window applicable to a room given its history
    pub fn window(&self, room: RoomId, history: &EntityHistory) -> Duration {
        match room.kind() {
            RoomKind::Hallway => self.hallway_timeout,
            RoomKind::DoorAdjacent => {
                if shut_in_since_close(history) {
                    self.door_adjacent_timeout
                } else {
                    self.hallway_timeout
                }
            }
        }
    }

    pub fn classify(&self, room: RoomId, now: Timestamp, history: &EntityHistory) -> OccupancyState {
        let Some(last_motion) = history.last_motion_at else {
            return OccupancyState::NotOccupied;
        };

        let elapsed = now - last_motion;
        if elapsed <= self.window(room, history) {
            OccupancyState::Occupied
        } else {
            OccupancyState::NotOccupied
        }
    }
}

/// Door closed and motion strictly after the close
///
/// A door that has never closed counts as closed at the beginning of time.
fn shut_in_since_close(history: &EntityHistory) -> bool {
    if history.current_door_state != DoorState::Closed {
        return false;
    }
    match (history.last_motion_at, history.last_door_closed_at) {
        (Some(motion), Some(closed)) => motion > closed,
        (Some(_), None) => true,
        (None, _) => false,
    }
}

/// Classify with the default 10 s / 30 s windows
pub fn classify_occupancy(room: RoomId, now: Timestamp, history: &EntityHistory) -> OccupancyState {
    OccupancyPolicy::default().classify(room, now, history)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn t(secs: i64) -> Timestamp {
        Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap() + Duration::seconds(secs)
    }

    fn history(motion: Option<i64>, closed: Option<i64>, door: DoorState) -> EntityHistory {
        EntityHistory {
            last_motion_at: motion.map(t),
            last_door_closed_at: closed.map(t),
            current_door_state: door,
        }
    }

    #[test]
    fn test_no_motion_is_not_occupied() {
        let h = history(None, Some(0), DoorState::Closed);
        assert_eq!(classify_occupancy(RoomId::Room1, t(1), &h), OccupancyState::NotOccupied);
        assert_eq!(classify_occupancy(RoomId::Room2, t(1), &h), OccupancyState::NotOccupied);
    }

    #[test]
    fn test_hallway_ten_second_window_inclusive() {
        let h = history(Some(0), None, DoorState::Open);
        assert_eq!(classify_occupancy(RoomId::Room2, t(10), &h), OccupancyState::Occupied);
        assert_eq!(classify_occupancy(RoomId::Room2, t(11), &h), OccupancyState::NotOccupied);
    }

    #[test]
    fn test_hallway_ignores_door_state() {
        let h = history(Some(5), Some(0), DoorState::Closed);
        assert_eq!(classify_occupancy(RoomId::Room2, t(20), &h), OccupancyState::NotOccupied);
    }

    #[test]
    fn test_room1_door_closed_motion_after_close_uses_long_window() {
        let h = history(Some(5), Some(0), DoorState::Closed);
        assert_eq!(classify_occupancy(RoomId::Room1, t(33), &h), OccupancyState::Occupied);
        assert_eq!(classify_occupancy(RoomId::Room1, t(35), &h), OccupancyState::Occupied);
        assert_eq!(classify_occupancy(RoomId::Room1, t(36), &h), OccupancyState::NotOccupied);
    }

    #[test]
    fn test_room1_door_open_uses_short_window() {
        let h = history(Some(5), Some(0), DoorState::Open);
        assert_eq!(classify_occupancy(RoomId::Room1, t(15), &h), OccupancyState::Occupied);
        assert_eq!(classify_occupancy(RoomId::Room1, t(16), &h), OccupancyState::NotOccupied);
    }

    #[test]
    fn test_room1_motion_before_close_uses_short_window() {
        let h = history(Some(5), Some(8), DoorState::Closed);
        assert_eq!(classify_occupancy(RoomId::Room1, t(16), &h), OccupancyState::NotOccupied);
    }

    #[test]
    fn test_room1_equal_timestamps_fall_through_to_short_window() {
        let h = history(Some(8), Some(8), DoorState::Closed);
        let policy = OccupancyPolicy::default();
        assert_eq!(policy.window(RoomId::Room1, &h), Duration::seconds(10));
        assert_eq!(classify_occupancy(RoomId::Room1, t(19), &h), OccupancyState::NotOccupied);
    }

    #[test]
    fn test_window_selection() {
        let policy = OccupancyPolicy::default();
        let shut_in = history(Some(5), Some(0), DoorState::Closed);
        let partial = history(Some(5), Some(0), DoorState::PartiallyOpen);
        assert_eq!(policy.window(RoomId::Room1, &shut_in), Duration::seconds(30));
        assert_eq!(policy.window(RoomId::Room1, &partial), Duration::seconds(10));
        assert_eq!(policy.window(RoomId::Room2, &shut_in), Duration::seconds(10));
    }

    #[test]
    fn test_custom_windows_from_config() {
        let policy = OccupancyPolicy::from_config(&Config::default());
        assert_eq!(policy, OccupancyPolicy::default());

        let tight = OccupancyPolicy::new(Duration::seconds(2), Duration::seconds(4));
        let h = history(Some(5), Some(0), DoorState::Closed);
        assert_eq!(tight.classify(RoomId::Room1, t(9), &h), OccupancyState::Occupied);
        assert_eq!(tight.classify(RoomId::Room1, t(10), &h), OccupancyState::NotOccupied);
    }
}
