//! Per-event reconciliation
//!
//! The Orchestrator turns one decoded gateway event into twin updates:
//! - classify the door and commit the transition to the history store
//! - record motion and derive occupancy for each room
//! - reconcile the door and both rooms against the twin store concurrently
//! - optionally detect anomalies and run them through the anomaly path
//!
//! History is always updated before any twin store call is made, and no
//! history lock is held across a store call. A failure on one entity is
//! logged and counted; the sibling entities still reconcile.

mod properties;

pub use properties::{
    door_properties, room_properties, DOOR_TIMESTAMP_PROPERTY, OCCUPANCY_PROPERTY,
    ROOM_TIMESTAMP_PROPERTY,
};

use crate::domain::error::{DecodeError, TwinError};
use crate::domain::types::{
    new_event_id, AnomalyRecord, DeviceSample, DoorSample, DoorState, EventId, OccupancyState,
    RoomId, SensorPayload, Timestamp, TwinIds,
};
use crate::infra::clock::Clock;
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use crate::io::audit::AuditLog;
use crate::io::decode::{decode_anomaly_batch, decode_envelope, decode_payload};
use crate::io::twin_store::TwinStore;
use crate::services::anomaly::{reconcile_anomalies, AnomalyBatchOutcome, AnomalyDetector};
use crate::services::door_classifier::classify_door;
use crate::services::history::HistoryStore;
use crate::services::occupancy::OccupancyPolicy;
use crate::services::updater::TwinUpdater;
use properties::{is_stale_door_sample, is_stale_room_sample, retain_occupancy};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Result of reconciling one sensor event
#[derive(Debug, Clone, PartialEq)]
pub struct EventOutcome {
    pub event_id: EventId,
    pub door_state: DoorState,
    pub occupancy: [OccupancyState; 2],
    /// Entities that received a patch
    pub entities_updated: usize,
    pub properties_written: usize,
    /// Entities whose fetch or patch failed
    pub failures: usize,
    /// Present when anomaly detection flagged at least one record
    pub anomalies: Option<AnomalyBatchOutcome>,
}

impl EventOutcome {
    pub fn occupancy(&self, room: RoomId) -> OccupancyState {
        match room {
            RoomId::Room1 => self.occupancy[0],
            RoomId::Room2 => self.occupancy[1],
        }
    }
}

pub struct Orchestrator {
    history: Arc<HistoryStore>,
    updater: TwinUpdater,
    clock: Arc<dyn Clock>,
    policy: OccupancyPolicy,
    detector: Option<AnomalyDetector>,
    twins: TwinIds,
    metrics: Arc<Metrics>,
}

impl Orchestrator {
    pub fn new(
        config: &Config,
        store: Arc<dyn TwinStore>,
        history: Arc<HistoryStore>,
        clock: Arc<dyn Clock>,
        metrics: Arc<Metrics>,
    ) -> Self {
        let audit = config.audit_file().map(|path| Arc::new(AuditLog::new(path)));
        let call_timeout = Duration::from_millis(config.twin_store_timeout_ms());
        let updater = TwinUpdater::new(store, metrics.clone(), call_timeout).with_audit(audit);
        let detector = config.anomaly_enabled().then(|| AnomalyDetector::from_config(config));

        Self {
            history,
            updater,
            clock,
            policy: OccupancyPolicy::from_config(config),
            detector,
            twins: config.twin_ids(),
            metrics,
        }
    }

    pub fn history(&self) -> &HistoryStore {
        &self.history
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    /// Decode a base64 envelope and reconcile it
    pub async fn handle_envelope(&self, raw: &[u8]) -> Result<EventOutcome, DecodeError> {
        let payload = self.accept(decode_envelope(raw))?;
        Ok(self.reconcile_payload(&payload).await)
    }

    /// Decode raw sensor JSON and reconcile it
    pub async fn handle_raw_payload(&self, raw: &[u8]) -> Result<EventOutcome, DecodeError> {
        let payload = self.accept(decode_payload(raw))?;
        Ok(self.reconcile_payload(&payload).await)
    }

    /// Decode an anomaly record array and reconcile it
    pub async fn handle_anomaly_batch(&self, raw: &[u8]) -> Result<AnomalyBatchOutcome, DecodeError> {
        let records = self.accept(decode_anomaly_batch(raw))?;
        Ok(self.reconcile_anomalies(new_event_id(), &records).await)
    }

    fn accept<T>(&self, decoded: Result<T, DecodeError>) -> Result<T, DecodeError> {
        if let Err(ref e) = decoded {
            warn!(error = %e, "event_rejected");
            self.metrics.record_event_rejected();
        }
        decoded
    }

    /// Reconcile one decoded sensor event
    pub async fn reconcile_payload(&self, payload: &SensorPayload) -> EventOutcome {
        let started = Instant::now();
        let event_id = new_event_id();
        let now = self.clock.now();

        let door_state = classify_door(&payload.local_data);
        let previous = self.history.record_door_transition(door_state, now);
        if previous != door_state {
            info!(
                event_id = %event_id,
                previous = %previous,
                current = %door_state,
                "door_state_changed"
            );
        }

        let occupancy = RoomId::ALL.map(|room| self.derive_occupancy(event_id, room, payload, now));

        let (door, room1, room2) = tokio::join!(
            self.reconcile_door(event_id, &payload.local_data, door_state),
            self.reconcile_room(event_id, RoomId::Room1, payload.device(RoomId::Room1), occupancy[0]),
            self.reconcile_room(event_id, RoomId::Room2, payload.device(RoomId::Room2), occupancy[1]),
        );

        let mut outcome = EventOutcome {
            event_id,
            door_state,
            occupancy,
            entities_updated: 0,
            properties_written: 0,
            failures: 0,
            anomalies: None,
        };
        let results = [(&self.twins.door, door), (&self.twins.room1, room1), (&self.twins.room2, room2)];
        for (entity_id, result) in results {
            match result {
                Ok(written) if written.is_empty() => {}
                Ok(written) => {
                    outcome.entities_updated += 1;
                    outcome.properties_written += written.len();
                }
                Err(e) => {
                    warn!(
                        event_id = %event_id,
                        entity_id = %entity_id,
                        error = %e,
                        error_kind = e.kind(),
                        "entity_reconcile_failed"
                    );
                    outcome.failures += 1;
                }
            }
        }

        if let Some(detector) = self.detector {
            let records = detector.detect(payload, &self.twins);
            if !records.is_empty() {
                outcome.anomalies = Some(self.reconcile_anomalies(event_id, &records).await);
            }
        }

        let latency_us = started.elapsed().as_micros() as u64;
        self.metrics.record_event_accepted(latency_us);
        info!(
            event_id = %event_id,
            door_state = %door_state,
            room1 = %occupancy[0],
            room2 = %occupancy[1],
            entities_updated = %outcome.entities_updated,
            properties_written = %outcome.properties_written,
            failures = %outcome.failures,
            latency_us = %latency_us,
            "event_reconciled"
        );

        outcome
    }

    /// Apply anomaly records through the change-gated updater
    pub async fn reconcile_anomalies(
        &self,
        event_id: EventId,
        records: &[AnomalyRecord],
    ) -> AnomalyBatchOutcome {
        let outcome = reconcile_anomalies(&self.updater, event_id, records).await;
        self.metrics.record_anomaly_batch(outcome.updated, outcome.unchanged);
        outcome
    }

    fn derive_occupancy(
        &self,
        event_id: EventId,
        room: RoomId,
        payload: &SensorPayload,
        now: Timestamp,
    ) -> OccupancyState {
        if payload.device(room).motion_detected {
            self.history.record_motion(room, now);
        }
        let history = self.history.get(room);
        let occupancy = self.policy.classify(room, now, &history);
        debug!(
            event_id = %event_id,
            room = %room,
            occupancy = %occupancy,
            window_secs = %self.policy.window(room, &history).num_seconds(),
            "occupancy_derived"
        );
        occupancy
    }

    /// A stale door sample is dropped whole; its state already went into history
    async fn reconcile_door(
        &self,
        event_id: EventId,
        sample: &DoorSample,
        door_state: DoorState,
    ) -> Result<Vec<String>, TwinError> {
        let entity_id = &self.twins.door;
        let snapshot = self.updater.fetch_snapshot(entity_id).await?;

        if is_stale_door_sample(sample, &snapshot) {
            debug!(
                event_id = %event_id,
                entity_id = %entity_id,
                sample_ts = ?sample.timestamp,
                "stale_door_sample"
            );
            self.metrics.record_stale_sample();
            return Ok(Vec::new());
        }

        let proposed = door_properties(sample, door_state);
        self.updater.reconcile_patch(event_id, entity_id, &proposed, &snapshot).await
    }

    async fn reconcile_room(
        &self,
        event_id: EventId,
        room: RoomId,
        sample: &DeviceSample,
        occupancy: OccupancyState,
    ) -> Result<Vec<String>, TwinError> {
        let entity_id = self.twins.room(room);
        let snapshot = self.updater.fetch_snapshot(entity_id).await?;

        let mut proposed = room_properties(sample, occupancy);
        if is_stale_room_sample(sample, &snapshot) {
            debug!(
                event_id = %event_id,
                entity_id = %entity_id,
                sample_ts = ?sample.timestamp,
                "stale_room_sample"
            );
            self.metrics.record_stale_sample();
            retain_occupancy(&mut proposed);
        }

        self.updater.reconcile_patch(event_id, entity_id, &proposed, &snapshot).await
    }
}
