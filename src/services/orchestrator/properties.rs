//! Property sets proposed for each twin

use crate::domain::types::{parse_timestamp, DeviceSample, DoorSample, DoorState, OccupancyState};
use crate::io::twin_store::TwinSnapshot;
use crate::services::updater::PropertySet;
use serde_json::Value;

pub const ROOM_TIMESTAMP_PROPERTY: &str = "roomTimestamp";
pub const DOOR_TIMESTAMP_PROPERTY: &str = "doorTimestamp";
pub const OCCUPANCY_PROPERTY: &str = "occupancy";

pub fn door_properties(sample: &DoorSample, state: DoorState) -> PropertySet {
    let mut props = PropertySet::new();
    props.insert("angle".to_string(), Value::from(sample.angle));
    props.insert("gyro".to_string(), Value::from(sample.gyro_rate));
    props.insert("magnet".to_string(), Value::Bool(sample.magnet_closed));
    props.insert("doorState".to_string(), Value::from(state.as_str()));
    if let Some(ref ts) = sample.timestamp {
        props.insert(DOOR_TIMESTAMP_PROPERTY.to_string(), Value::from(ts.as_str()));
    }
    props
}

pub fn room_properties(sample: &DeviceSample, occupancy: OccupancyState) -> PropertySet {
    let mut props = PropertySet::new();
    props.insert("temperature".to_string(), Value::from(sample.temperature));
    props.insert("humidity".to_string(), Value::from(sample.humidity));
    props.insert("light".to_string(), Value::from(sample.light));
    props.insert("co2".to_string(), Value::from(sample.co2));
    props.insert(OCCUPANCY_PROPERTY.to_string(), Value::from(occupancy.as_str()));
    if let Some(ref ts) = sample.timestamp {
        props.insert(ROOM_TIMESTAMP_PROPERTY.to_string(), Value::from(ts.as_str()));
    }
    props
}

/// Sample is not newer than the timestamp the twin already recorded in `property`
///
/// A sample without a timestamp is never stale; one whose timestamp does not
/// parse always is. Missing or unparseable twin time lets the sample through.
pub fn is_stale(sample_ts: Option<&str>, snapshot: &TwinSnapshot, property: &str) -> bool {
    let Some(raw) = sample_ts else {
        return false;
    };
    let Some(sample_ts) = parse_timestamp(raw) else {
        return true;
    };
    match snapshot.get_str(property).and_then(parse_timestamp) {
        Some(twin_ts) => sample_ts <= twin_ts,
        None => false,
    }
}

pub fn is_stale_room_sample(sample: &DeviceSample, snapshot: &TwinSnapshot) -> bool {
    is_stale(sample.timestamp.as_deref(), snapshot, ROOM_TIMESTAMP_PROPERTY)
}

pub fn is_stale_door_sample(sample: &DoorSample, snapshot: &TwinSnapshot) -> bool {
    is_stale(sample.timestamp.as_deref(), snapshot, DOOR_TIMESTAMP_PROPERTY)
}

/// Drop sensor readings, keeping the arrival-time derived occupancy
pub fn retain_occupancy(props: &mut PropertySet) {
    props.retain(|name, _| name == OCCUPANCY_PROPERTY);
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample(timestamp: Option<&str>) -> DeviceSample {
        DeviceSample {
            temperature: 21.0,
            humidity: 40.0,
            light: 300.0,
            co2: 650.0,
            motion_detected: true,
            timestamp: timestamp.map(str::to_string),
        }
    }

    #[test]
    fn test_door_property_names() {
        let props = door_properties(
            &DoorSample { angle: 45.0, gyro_rate: -2.0, magnet_closed: false, timestamp: None },
            DoorState::Open,
        );
        let names: Vec<&str> = props.keys().map(String::as_str).collect();
        assert_eq!(names, vec!["angle", "doorState", "gyro", "magnet"]);
        assert_eq!(props["doorState"], json!("open"));
    }

    #[test]
    fn test_door_timestamp_only_when_present() {
        let mut door = DoorSample { angle: 0.0, gyro_rate: 0.0, magnet_closed: true, timestamp: None };
        assert!(!door_properties(&door, DoorState::Closed).contains_key(DOOR_TIMESTAMP_PROPERTY));

        door.timestamp = Some("2025-03-01T10:00:00Z".to_string());
        let props = door_properties(&door, DoorState::Closed);
        assert_eq!(props[DOOR_TIMESTAMP_PROPERTY], json!("2025-03-01T10:00:00Z"));
    }

    #[test]
    fn test_room_timestamp_only_when_present() {
        let without = room_properties(&sample(None), OccupancyState::Occupied);
        assert!(!without.contains_key(ROOM_TIMESTAMP_PROPERTY));
        assert_eq!(without[OCCUPANCY_PROPERTY], json!("occupied"));

        let with = room_properties(&sample(Some("2025-03-01T10:00:00")), OccupancyState::NotOccupied);
        assert_eq!(with[ROOM_TIMESTAMP_PROPERTY], json!("2025-03-01T10:00:00"));
    }

    #[test]
    fn test_stale_sample_detection() {
        let twin = TwinSnapshot::from_value(json!({"roomTimestamp": "2025-03-01T10:00:05Z"}));
        assert!(is_stale_room_sample(&sample(Some("2025-03-01T10:00:00")), &twin));
        assert!(is_stale_room_sample(&sample(Some("2025-03-01T10:00:05")), &twin));
        assert!(!is_stale_room_sample(&sample(Some("2025-03-01T10:00:06")), &twin));
        assert!(!is_stale_room_sample(&sample(None), &twin));
        assert!(!is_stale_room_sample(&sample(Some("2025-03-01T10:00:00")), &TwinSnapshot::default()));
    }

    #[test]
    fn test_unparseable_sample_timestamp_is_stale() {
        let twin = TwinSnapshot::from_value(json!({"roomTimestamp": "2025-03-01T10:00:05Z"}));
        assert!(is_stale_room_sample(&sample(Some("garbage")), &twin));
        assert!(is_stale_room_sample(&sample(Some("")), &twin));
        // Even with nothing recorded yet
        assert!(is_stale_room_sample(&sample(Some("garbage")), &TwinSnapshot::default()));
        // Junk already in the twin does not block a good sample
        let junk = TwinSnapshot::from_value(json!({"roomTimestamp": "garbage"}));
        assert!(!is_stale_room_sample(&sample(Some("2025-03-01T10:00:00")), &junk));
    }

    #[test]
    fn test_stale_door_sample_uses_door_timestamp() {
        let twin = TwinSnapshot::from_value(json!({
            "doorTimestamp": "2025-03-01T10:00:05Z",
            "roomTimestamp": "2025-03-01T09:00:00Z"
        }));
        let mut door = DoorSample { angle: 0.0, gyro_rate: 0.0, magnet_closed: true, timestamp: None };
        assert!(!is_stale_door_sample(&door, &twin));

        door.timestamp = Some("2025-03-01T10:00:01Z".to_string());
        assert!(is_stale_door_sample(&door, &twin));

        door.timestamp = Some("2025-03-01T10:00:09Z".to_string());
        assert!(!is_stale_door_sample(&door, &twin));
    }

    #[test]
    fn test_retain_occupancy() {
        let mut props = room_properties(&sample(Some("2025-03-01T10:00:00")), OccupancyState::Occupied);
        retain_occupancy(&mut props);
        assert_eq!(props.len(), 1);
        assert!(props.contains_key(OCCUPANCY_PROPERTY));
    }
}
