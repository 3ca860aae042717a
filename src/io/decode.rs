//! Event decoding for the ingestion transports
//!
//! The HTTP telemetry route receives the gateway message wrapped in an
//! envelope whose `body` (top level, or under `data` for Event Grid style
//! deliveries) is base64-encoded JSON. MQTT delivers the raw JSON.

use crate::domain::error::DecodeError;
use crate::domain::types::{AnomalyRecord, SensorPayload};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct EnvelopeData {
    body: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Envelope {
    body: Option<String>,
    data: Option<EnvelopeData>,
}

/// Decode a base64 envelope into a sensor payload
pub fn decode_envelope(raw: &[u8]) -> Result<SensorPayload, DecodeError> {
    let envelope: Envelope = serde_json::from_slice(raw)?;
    let body = envelope
        .body
        .or_else(|| envelope.data.and_then(|d| d.body))
        .ok_or(DecodeError::MissingBody)?;
    let json = STANDARD.decode(body.trim())?;
    decode_payload(&json)
}

/// Decode raw sensor payload JSON
pub fn decode_payload(raw: &[u8]) -> Result<SensorPayload, DecodeError> {
    Ok(serde_json::from_slice(raw)?)
}

/// Decode an anomaly record batch (JSON array); `null` is an empty batch
pub fn decode_anomaly_batch(raw: &[u8]) -> Result<Vec<AnomalyRecord>, DecodeError> {
    let batch: Option<Vec<AnomalyRecord>> = serde_json::from_slice(raw)?;
    Ok(batch.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::RoomId;

    const PAYLOAD: &str = r#"{"local_data":{"angle":45.0,"gyro":1.0,"magnet":false},
        "remote_data":{"device_1":{"temperature":21.0,"humidity":40.0,"light":100.0,"motion":true,"co2":500.0},
                       "device_2":{"temperature":20.0,"humidity":42.0,"light":80.0,"motion":false,"co2":450.0}}}"#;

    #[test]
    fn test_top_level_body() {
        let envelope = format!(r#"{{"body":"{}"}}"#, STANDARD.encode(PAYLOAD));
        let payload = decode_envelope(envelope.as_bytes()).unwrap();
        assert_eq!(payload.local_data.angle, 45.0);
        assert!(payload.device(RoomId::Room1).motion_detected);
    }

    #[test]
    fn test_event_grid_body() {
        let envelope = format!(r#"{{"id":"1","data":{{"body":"{}"}}}}"#, STANDARD.encode(PAYLOAD));
        let payload = decode_envelope(envelope.as_bytes()).unwrap();
        assert_eq!(payload.device(RoomId::Room2).co2, 450.0);
    }

    #[test]
    fn test_missing_body() {
        assert!(matches!(decode_envelope(br#"{"data":{}}"#), Err(DecodeError::MissingBody)));
    }

    #[test]
    fn test_bad_base64() {
        assert!(matches!(decode_envelope(br#"{"body":"%%%"}"#), Err(DecodeError::Base64(_))));
    }

    #[test]
    fn test_body_missing_sub_object() {
        let body = STANDARD.encode(r#"{"local_data":{"angle":0.0,"gyro":0.0,"magnet":true}}"#);
        let envelope = format!(r#"{{"body":"{}"}}"#, body);
        assert!(matches!(decode_envelope(envelope.as_bytes()), Err(DecodeError::Json(_))));
    }

    #[test]
    fn test_anomaly_batch() {
        let raw = br#"[{"TwinId":"Door","Property":"slammedAnomaly","Value":"slammed"},
                       {"TwinId":"Room1","Property":"airQualityState","Value":"too_high"}]"#;
        let records = decode_anomaly_batch(raw).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].entity_id, "Room1");
        assert!(decode_anomaly_batch(br#"{"TwinId":"Door"}"#).is_err());
    }

    #[test]
    fn test_null_anomaly_batch_is_empty() {
        assert!(decode_anomaly_batch(b"null").unwrap().is_empty());
        assert!(decode_anomaly_batch(b" null\n").unwrap().is_empty());
        assert!(decode_anomaly_batch(b"[]").unwrap().is_empty());
        assert!(decode_anomaly_batch(b"").is_err());
    }
}
