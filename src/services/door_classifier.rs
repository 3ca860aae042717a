//! Door state classification from a raw door sample
//!
//! Rules, first match wins:
//! 1. magnet closed, or angle within ±5° → Closed (the hall sensor can stick
//!    on, so a near-zero angle is independent evidence)
//! 2. |angle| > 30° → Open (the door swings both ways)
//! 3. otherwise → PartiallyOpen

use crate::domain::types::{DoorSample, DoorState};

/// Inclusive half-width of the angle band treated as closed (degrees)
pub const CLOSED_ANGLE_DEG: f64 = 5.0;

/// Exclusive angle beyond which the door is open (degrees)
pub const OPEN_ANGLE_DEG: f64 = 30.0;

pub fn classify_door(sample: &DoorSample) -> DoorState {
    let angle = sample.angle;

    if sample.magnet_closed || (-CLOSED_ANGLE_DEG..=CLOSED_ANGLE_DEG).contains(&angle) {
        return DoorState::Closed;
    }

    if angle > OPEN_ANGLE_DEG || angle < -OPEN_ANGLE_DEG {
        return DoorState::Open;
    }

    DoorState::PartiallyOpen
}
