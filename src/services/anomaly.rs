//! Anomaly detection and anomaly record reconciliation
//!
//! Detection flags three conditions on a decoded payload:
//! - door slam: |gyro| above the slam threshold
//! - sensor conflict: magnet and angle disagree about the door being shut
//! - CO2 spike: a room's CO2 above the air quality threshold
//!
//! Records (detected here or posted by an external analytics job) are
//! applied one property at a time through the change-gated updater, so an
//! anomaly that is already recorded never retriggers notifications.

use crate::domain::types::{AnomalyRecord, DoorSample, EventId, RoomId, SensorPayload, TwinIds};
use crate::infra::config::Config;
use crate::services::door_classifier::CLOSED_ANGLE_DEG;
use crate::services::updater::{PropertySet, TwinUpdater};
use serde_json::Value;
use tracing::{info, warn};

pub const SLAMMED_PROPERTY: &str = "slammedAnomaly";
pub const SLAMMED_VALUE: &str = "slammed";
pub const CONFLICT_PROPERTY: &str = "conflictAnomaly";
pub const CONFLICT_VALUE: &str = "conflict";
pub const AIR_QUALITY_PROPERTY: &str = "airQualityState";
pub const AIR_QUALITY_TOO_HIGH: &str = "too_high";

/// Angle band (degrees) in which an open magnet contradicts the accelerometer
const CONFLICT_OPEN_ANGLE_DEG: f64 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnomalyDetector {
    slam_gyro_threshold: f64,
    co2_threshold: f64,
}

impl Default for AnomalyDetector {
    fn default() -> Self {
        Self { slam_gyro_threshold: 65.0, co2_threshold: 2000.0 }
    }
}

impl AnomalyDetector {
    pub fn new(slam_gyro_threshold: f64, co2_threshold: f64) -> Self {
        Self { slam_gyro_threshold, co2_threshold }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.slam_gyro_threshold(), config.co2_threshold())
    }

    pub fn detect(&self, payload: &SensorPayload, twins: &TwinIds) -> Vec<AnomalyRecord> {
        let mut records = Vec::new();
        let door = &payload.local_data;

        if door.gyro_rate.abs() > self.slam_gyro_threshold {
            records.push(AnomalyRecord::new(&twins.door, SLAMMED_PROPERTY, SLAMMED_VALUE));
        }

        if sensor_conflict(door) {
            records.push(AnomalyRecord::new(&twins.door, CONFLICT_PROPERTY, CONFLICT_VALUE));
        }

        for room in RoomId::ALL {
            if payload.device(room).co2 > self.co2_threshold {
                records.push(AnomalyRecord::new(
                    twins.room(room),
                    AIR_QUALITY_PROPERTY,
                    AIR_QUALITY_TOO_HIGH,
                ));
            }
        }

        records
    }
}

/// Magnet and accelerometer disagree
fn sensor_conflict(door: &DoorSample) -> bool {
    if door.magnet_closed {
        door.angle > CLOSED_ANGLE_DEG || door.angle < -CLOSED_ANGLE_DEG
    } else {
        (-CONFLICT_OPEN_ANGLE_DEG..=CONFLICT_OPEN_ANGLE_DEG).contains(&door.angle)
    }
}

/// Coarse result of an anomaly batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AnomalyBatchOutcome {
    pub received: usize,
    /// Records that caused a twin write
    pub updated: usize,
    /// Records already reflected in the twin
    pub unchanged: usize,
    pub failed: usize,
}

impl AnomalyBatchOutcome {
    pub fn is_success(&self) -> bool {
        self.failed == 0
    }
}

/// Apply each record whose value differs from the twin's current value
///
/// A failing record is logged and does not stop the rest of the batch.
pub async fn reconcile_anomalies(
    updater: &TwinUpdater,
    event_id: EventId,
    records: &[AnomalyRecord],
) -> AnomalyBatchOutcome {
    let mut outcome = AnomalyBatchOutcome { received: records.len(), ..Default::default() };

    for record in records {
        let mut proposed = PropertySet::new();
        proposed.insert(record.property.clone(), Value::String(record.value.clone()));

        match updater.reconcile(event_id, &record.entity_id, &proposed).await {
            Ok(written) if written.is_empty() => outcome.unchanged += 1,
            Ok(_) => outcome.updated += 1,
            Err(e) => {
                warn!(
                    event_id = %event_id,
                    entity_id = %record.entity_id,
                    property = %record.property,
                    error = %e,
                    error_kind = e.kind(),
                    "anomaly_reconcile_failed"
                );
                outcome.failed += 1;
            }
        }
    }

    info!(
        event_id = %event_id,
        received = %outcome.received,
        updated = %outcome.updated,
        unchanged = %outcome.unchanged,
        failed = %outcome.failed,
        "anomaly_batch_reconciled"
    );

    outcome
}
