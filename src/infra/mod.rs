//! Infrastructure - configuration, clock and metrics
//!
//! This module contains infrastructure concerns:
//! - `config` - Application configuration (TOML loading, env overrides, validation)
//! - `clock` - Injectable time source
//! - `metrics` - Lock-free reconciliation counters

pub mod clock;
pub mod config;
pub mod metrics;

// Re-export commonly used types
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Config;
pub use metrics::{Metrics, MetricsSummary};
