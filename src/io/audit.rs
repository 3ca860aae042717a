//! Patch decision audit trail
//!
//! Decisions are written in JSONL format (one JSON object per line)
//! to the file specified in config, so flapping can be traced after the fact.

use crate::domain::types::Timestamp;
use parking_lot::Mutex;
use serde::Serialize;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use tracing::{debug, error, info};

/// Outcome of one change-gated reconciliation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PatchDecision {
    Applied,
    SkippedUnchanged,
}

impl PatchDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            PatchDecision::Applied => "applied",
            PatchDecision::SkippedUnchanged => "skipped_unchanged",
        }
    }
}

#[derive(Debug, Serialize)]
pub struct AuditEntry<'a> {
    pub ts: Timestamp,
    pub event_id: String,
    pub entity_id: &'a str,
    pub properties: &'a [String],
    pub decision: PatchDecision,
}

/// Append-only JSONL audit log
pub struct AuditLog {
    file_path: String,
    // Serializes appends so concurrent reconciliations never interleave lines
    write_lock: Mutex<()>,
}

impl AuditLog {
    pub fn new(file_path: &str) -> Self {
        info!(file_path = %file_path, "audit_log_initialized");
        Self { file_path: file_path.to_string(), write_lock: Mutex::new(()) }
    }

    /// Record a decision; returns true if the line was written
    pub fn record(&self, entry: &AuditEntry<'_>) -> bool {
        let json = match serde_json::to_string(entry) {
            Ok(json) => json,
            Err(e) => {
                error!(entity_id = %entry.entity_id, error = %e, "audit_encode_failed");
                return false;
            }
        };

        match self.append_line(&json) {
            Ok(()) => true,
            Err(e) => {
                error!(entity_id = %entry.entity_id, error = %e, "audit_write_failed");
                false
            }
        }
    }

    fn append_line(&self, line: &str) -> std::io::Result<()> {
        let path = Path::new(&self.file_path);

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let _guard = self.write_lock.lock();
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        writeln!(file, "{}", line)?;
        debug!(file = %self.file_path, bytes = %line.len(), "audit_written");

        Ok(())
    }
}
