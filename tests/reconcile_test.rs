//! End-to-end reconciliation against the in-memory twin store

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{Duration, TimeZone, Utc};
use serde_json::{json, Value};
use std::sync::Arc;
use twin_reconciler::domain::types::{DoorState, OccupancyState, RoomId, Timestamp};
use twin_reconciler::infra::{Config, ManualClock, Metrics};
use twin_reconciler::io::{InMemoryTwinStore, TwinSnapshot};
use twin_reconciler::services::{HistoryStore, Orchestrator};

fn t(secs: i64) -> Timestamp {
    Utc.with_ymd_and_hms(2025, 3, 1, 8, 0, 0).unwrap() + Duration::seconds(secs)
}

struct Site {
    orchestrator: Orchestrator,
    store: Arc<InMemoryTwinStore>,
    clock: Arc<ManualClock>,
}

impl Site {
    fn new(config: Config) -> Self {
        let store = Arc::new(InMemoryTwinStore::with_twins(&["Door", "Room1", "Room2"]));
        let clock = Arc::new(ManualClock::new(t(0)));
        let orchestrator = Orchestrator::new(
            &config,
            store.clone(),
            Arc::new(HistoryStore::new()),
            clock.clone(),
            Arc::new(Metrics::new()),
        );
        Self { orchestrator, store, clock }
    }

    async fn post(&self, secs: i64, event: Value) -> twin_reconciler::services::EventOutcome {
        self.clock.set(t(secs));
        let envelope = json!({ "body": STANDARD.encode(event.to_string()) });
        self.orchestrator.handle_envelope(envelope.to_string().as_bytes()).await.unwrap()
    }

    fn prop(&self, twin: &str, property: &str) -> Option<Value> {
        self.store.twin(twin).and_then(|s| s.get(property).cloned())
    }
}

fn event(angle: f64, magnet: bool, gyro: f64, room1_motion: bool, room2_motion: bool) -> Value {
    json!({
        "local_data": {"angle": angle, "gyro": gyro, "magnet": magnet},
        "remote_data": {
            "device_1": {"temperature": 21.5, "humidity": 41.0, "light": 320.0, "motion": room1_motion, "co2": 640.0},
            "device_2": {"temperature": 19.0, "humidity": 47.0, "light": 90.0, "motion": room2_motion, "co2": 580.0}
        }
    })
}

#[tokio::test]
async fn test_door_scenarios() {
    let site = Site::new(Config::default());

    // magnet and angle both say closed
    assert_eq!(site.post(0, event(0.0, true, 0.0, false, false)).await.door_state, DoorState::Closed);
    // wide open
    assert_eq!(site.post(1, event(45.0, false, 0.0, false, false)).await.door_state, DoorState::Open);
    // ajar
    assert_eq!(
        site.post(2, event(15.0, false, 0.0, false, false)).await.door_state,
        DoorState::PartiallyOpen
    );
    assert_eq!(site.prop("Door", "doorState"), Some(json!("partially_open")));
}

#[tokio::test]
async fn test_person_shut_in_room1() {
    let site = Site::new(Config::default());

    site.post(0, event(0.0, true, 0.0, false, false)).await;
    site.post(5, event(0.0, true, 0.0, true, false)).await;

    let at33 = site.post(33, event(0.0, true, 0.0, false, false)).await;
    assert_eq!(at33.occupancy(RoomId::Room1), OccupancyState::Occupied);
    assert_eq!(site.prop("Room1", "occupancy"), Some(json!("occupied")));

    let at36 = site.post(36, event(0.0, true, 0.0, false, false)).await;
    assert_eq!(at36.occupancy(RoomId::Room1), OccupancyState::NotOccupied);
    assert_eq!(site.prop("Room1", "occupancy"), Some(json!("not_occupied")));
}

#[tokio::test]
async fn test_repeated_closed_does_not_move_close_time() {
    let site = Site::new(Config::default());

    site.post(0, event(0.0, true, 0.0, false, false)).await;
    site.post(3, event(0.0, true, 0.0, false, false)).await;
    site.post(8, event(1.0, true, 0.0, false, false)).await;

    let history = site.orchestrator.history().get(RoomId::Room1);
    assert_eq!(history.last_door_closed_at, Some(t(0)));

    site.post(9, event(50.0, false, 0.0, false, false)).await;
    site.post(12, event(0.0, true, 0.0, false, false)).await;
    assert_eq!(site.orchestrator.history().get(RoomId::Room1).last_door_closed_at, Some(t(12)));
}

#[tokio::test]
async fn test_motion_before_close_uses_short_window() {
    let site = Site::new(Config::default());

    // Motion while the door is open, then the door shuts
    site.post(0, event(45.0, false, 0.0, true, false)).await;
    site.post(2, event(0.0, true, 0.0, false, false)).await;

    let at11 = site.post(11, event(0.0, true, 0.0, false, false)).await;
    assert_eq!(at11.occupancy(RoomId::Room1), OccupancyState::NotOccupied);
}

#[tokio::test]
async fn test_redelivered_envelope_is_idempotent() {
    let site = Site::new(Config::default());
    let payload = event(45.0, false, 0.0, true, true);

    let first = site.post(0, payload.clone()).await;
    assert_eq!(first.entities_updated, 3);
    let patches = site.store.patches().len();

    let second = site.post(0, payload).await;
    assert_eq!(second.entities_updated, 0);
    assert_eq!(site.store.patches().len(), patches);
}

#[tokio::test]
async fn test_already_recorded_anomaly_skips_patch() {
    let site = Site::new(Config::default());
    site.store
        .insert_twin("Door", TwinSnapshot::from_value(json!({"slammedAnomaly": "slammed"})));

    let batch = json!([{"TwinId": "Door", "Property": "slammedAnomaly", "Value": "slammed"}]);
    let outcome = site.orchestrator.handle_anomaly_batch(batch.to_string().as_bytes()).await.unwrap();

    assert!(outcome.is_success());
    assert_eq!(outcome.unchanged, 1);
    assert!(site.store.patches().is_empty());
}

#[tokio::test]
async fn test_detected_anomalies_reach_twins() {
    let site = Site::new(Config::default());
    let mut payload = event(0.5, false, -90.0, false, false);
    payload["remote_data"]["device_1"]["co2"] = json!(2400.0);

    let outcome = site.post(0, payload).await;

    let anomalies = outcome.anomalies.unwrap();
    assert_eq!(anomalies.received, 3);
    assert_eq!(anomalies.updated, 3);
    assert_eq!(site.prop("Door", "slammedAnomaly"), Some(json!("slammed")));
    assert_eq!(site.prop("Door", "conflictAnomaly"), Some(json!("conflict")));
    assert_eq!(site.prop("Room1", "airQualityState"), Some(json!("too_high")));
    assert_eq!(site.prop("Room2", "airQualityState"), None);
}

#[tokio::test]
async fn test_audit_trail_records_decisions() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("audit").join("patches.jsonl");
    let mut toml = String::from("[audit]\n");
    toml.push_str(&format!("file = {:?}\n", path.to_str().unwrap()));
    let config_file = dir.path().join("config.toml");
    std::fs::write(&config_file, toml).unwrap();
    let config = Config::from_file(&config_file).unwrap();

    let site = Site::new(config);
    let payload = event(45.0, false, 0.0, false, false);
    site.post(0, payload.clone()).await;
    site.post(0, payload).await;

    let content = std::fs::read_to_string(&path).unwrap();
    let entries: Vec<Value> = content.lines().map(|l| serde_json::from_str(l).unwrap()).collect();
    assert_eq!(entries.len(), 6);
    assert!(entries[..3].iter().all(|e| e["decision"] == "applied"));
    assert!(entries[3..].iter().all(|e| e["decision"] == "skipped_unchanged"));
    assert!(entries.iter().any(|e| e["entity_id"] == "Door"));
}
