//! IO modules - external system interfaces
//!
//! This module contains all external IO operations:
//! - `twin_store` - Twin store trait, HTTP client and in-memory store
//! - `decode` - Envelope, payload and anomaly batch decoding
//! - `http` - HTTP ingestion endpoint (telemetry, anomalies, health, metrics)
//! - `mqtt` - MQTT subscriber for raw gateway telemetry
//! - `prometheus` - Prometheus text formatting
//! - `audit` - Patch decision audit trail (JSONL format)

pub mod audit;
pub mod decode;
pub mod http;
pub mod mqtt;
pub mod prometheus;
pub mod twin_store;

// Re-export commonly used types
pub use audit::{AuditLog, PatchDecision};
pub use twin_store::{HttpTwinStore, InMemoryTwinStore, PatchOp, TwinSnapshot, TwinStore};
