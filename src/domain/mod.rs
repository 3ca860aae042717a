//! Domain models - sensor samples, semantic states and errors
//!
//! This module contains the canonical data types used throughout the system:
//! - `SensorPayload` - decoded gateway event (door sample + room samples)
//! - `DoorState` / `OccupancyState` - derived semantic states
//! - `AnomalyRecord` - single-property twin assertion
//! - error enums for decoding, twin store access and configuration

pub mod error;
pub mod types;

pub use error::{ConfigError, DecodeError, TwinError};
pub use types::{
    new_event_id, AnomalyRecord, DeviceSample, DoorSample, DoorState, EventId, OccupancyState,
    RoomId, RoomKind, SensorPayload, Timestamp, TwinIds,
};
