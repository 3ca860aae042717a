//! Shared types for the twin reconciler

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

/// Wall-clock instant used for all history bookkeeping
pub type Timestamp = DateTime<Utc>;

/// Correlates every log line and audit entry produced by one event
pub type EventId = uuid::Uuid;

/// Time-ordered id for a newly accepted event
pub fn new_event_id() -> EventId {
    uuid::Uuid::now_v7()
}

/// Raw door sensor reading (accelerometer angle, gyro rate, hall sensor)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DoorSample {
    pub angle: f64,
    #[serde(rename = "gyro")]
    pub gyro_rate: f64,
    #[serde(rename = "magnet")]
    pub magnet_closed: bool,
    /// Gateway-side sample time, when forwarded
    #[serde(default, alias = "door_timestamp", skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

/// Environmental reading from one room's remote device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceSample {
    pub temperature: f64,
    pub humidity: f64,
    pub light: f64,
    pub co2: f64,
    #[serde(rename = "motion")]
    pub motion_detected: bool,
    /// Device-side sample time, when the gateway forwards one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteData {
    pub device_1: DeviceSample,
    pub device_2: DeviceSample,
}

/// Decoded gateway payload: one door sample plus one sample per room
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorPayload {
    pub local_data: DoorSample,
    pub remote_data: RemoteData,
}

impl SensorPayload {
    /// Device sample belonging to a room
    pub fn device(&self, room: RoomId) -> &DeviceSample {
        match room {
            RoomId::Room1 => &self.remote_data.device_1,
            RoomId::Room2 => &self.remote_data.device_2,
        }
    }
}

/// Semantic door state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DoorState {
    Closed,
    Open,
    PartiallyOpen,
    /// Nothing observed yet since process start
    Unknown,
}

impl DoorState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DoorState::Closed => "closed",
            DoorState::Open => "open",
            DoorState::PartiallyOpen => "partially_open",
            DoorState::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for DoorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Semantic room occupancy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OccupancyState {
    Occupied,
    NotOccupied,
}

impl OccupancyState {
    pub fn as_str(&self) -> &'static str {
        match self {
            OccupancyState::Occupied => "occupied",
            OccupancyState::NotOccupied => "not_occupied",
        }
    }
}

impl std::fmt::Display for OccupancyState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Monitored rooms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RoomId {
    /// Enclosed room behind the monitored door
    Room1,
    /// Hallway
    Room2,
}

/// How a room's occupancy timeout is chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomKind {
    /// Longer window while the door is shut with someone inside
    DoorAdjacent,
    /// Fixed short window
    Hallway,
}

impl RoomId {
    pub const ALL: [RoomId; 2] = [RoomId::Room1, RoomId::Room2];

    pub fn kind(&self) -> RoomKind {
        match self {
            RoomId::Room1 => RoomKind::DoorAdjacent,
            RoomId::Room2 => RoomKind::Hallway,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RoomId::Room1 => "room1",
            RoomId::Room2 => "room2",
        }
    }
}

impl std::fmt::Display for RoomId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Twin ids of the monitored entities in the twin store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TwinIds {
    pub door: String,
    pub room1: String,
    pub room2: String,
}

impl TwinIds {
    pub fn room(&self, room: RoomId) -> &str {
        match room {
            RoomId::Room1 => &self.room1,
            RoomId::Room2 => &self.room2,
        }
    }
}

impl Default for TwinIds {
    fn default() -> Self {
        Self { door: "Door".to_string(), room1: "Room1".to_string(), room2: "Room2".to_string() }
    }
}

/// Single-property state assertion for a twin
///
/// Accepts both the PascalCase keys sent by the stream analytics job and
/// the camelCase keys produced internally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnomalyRecord {
    #[serde(rename = "TwinId", alias = "twinId", alias = "entityId")]
    pub entity_id: String,
    #[serde(rename = "Property", alias = "property")]
    pub property: String,
    #[serde(rename = "Value", alias = "value")]
    pub value: String,
}

impl AnomalyRecord {
    pub fn new(entity_id: &str, property: &str, value: &str) -> Self {
        Self {
            entity_id: entity_id.to_string(),
            property: property.to_string(),
            value: value.to_string(),
        }
    }
}

/// Parse a device or twin timestamp
///
/// Accepts RFC 3339 and naive ISO 8601 (assumed UTC), which is what the
/// gateway emits when the device clock has no offset.
pub fn parse_timestamp(raw: &str) -> Option<Timestamp> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw.trim_end_matches('Z'), "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}
