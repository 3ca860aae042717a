//! Services - reconciliation logic and shared state
//!
//! This module contains the core business logic services:
//! - `door_classifier` - Raw door sample to semantic door state
//! - `occupancy` - Time-windowed room occupancy
//! - `history` - Shared motion / door history store
//! - `updater` - Change-gated twin patching
//! - `anomaly` - Anomaly detection and anomaly record reconciliation
//! - `orchestrator` - Per-event sequencing across door and rooms

pub mod anomaly;
pub mod door_classifier;
pub mod history;
pub mod occupancy;
pub mod orchestrator;
pub mod updater;

// Re-export commonly used types
pub use anomaly::{AnomalyBatchOutcome, AnomalyDetector};
pub use history::{EntityHistory, HistoryStore};
pub use occupancy::OccupancyPolicy;
pub use orchestrator::{EventOutcome, Orchestrator};
pub use updater::{PropertySet, TwinUpdater};
