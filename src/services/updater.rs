//! Change-gated twin updater
//!
//! Downstream consumers react to every recorded twin change, so a patch is
//! only sent for properties whose value differs from what the twin already
//! holds. An empty diff issues no write at all, which makes redelivered
//! events harmless.
//!
//! Values are compared on their string form, with numbers rendered through
//! f64 so `45` and `45.0` compare equal.

use crate::domain::error::TwinError;
use crate::domain::types::EventId;
use crate::infra::metrics::Metrics;
use crate::io::audit::{AuditEntry, AuditLog, PatchDecision};
use crate::io::twin_store::{PatchOp, TwinSnapshot, TwinStore};
use chrono::Utc;
use serde_json::Value;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Proposed property values for one twin, keyed by property name
pub type PropertySet = BTreeMap<String, Value>;

/// Canonical string form used for equality
pub fn value_key(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => match n.as_f64() {
            Some(f) => f.to_string(),
            None => n.to_string(),
        },
        Value::Bool(b) => b.to_string(),
        other => other.to_string(),
    }
}

/// Replace ops for every proposed property that is missing or different
pub fn diff_properties(proposed: &PropertySet, snapshot: &TwinSnapshot) -> Vec<PatchOp> {
    proposed
        .iter()
        .filter(|(name, value)| match snapshot.get(name) {
            Some(current) => value_key(current) != value_key(value),
            None => true,
        })
        .map(|(name, value)| PatchOp::replace(name, value.clone()))
        .collect()
}

pub struct TwinUpdater {
    store: Arc<dyn TwinStore>,
    metrics: Arc<Metrics>,
    /// Upper bound for any single store call
    call_timeout: Duration,
    audit: Option<Arc<AuditLog>>,
}

impl TwinUpdater {
    pub fn new(store: Arc<dyn TwinStore>, metrics: Arc<Metrics>, call_timeout: Duration) -> Self {
        Self { store, metrics, call_timeout, audit: None }
    }

    pub fn with_audit(mut self, audit: Option<Arc<AuditLog>>) -> Self {
        self.audit = audit;
        self
    }

    async fn bounded<T, F>(&self, call: F) -> Result<T, TwinError>
    where
        F: Future<Output = Result<T, TwinError>>,
    {
        let result = match tokio::time::timeout(self.call_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(TwinError::Timeout(self.call_timeout.as_millis() as u64)),
        };
        if let Err(ref e) = result {
            self.metrics.record_twin_error(e);
        }
        result
    }

    pub async fn fetch_snapshot(&self, entity_id: &str) -> Result<TwinSnapshot, TwinError> {
        self.bounded(self.store.get_twin(entity_id)).await
    }

    /// Write the properties that differ from `snapshot`
    ///
    /// Returns the names of the properties actually written; empty when the
    /// twin already holds every proposed value.
    pub async fn reconcile_patch(
        &self,
        event_id: EventId,
        entity_id: &str,
        proposed: &PropertySet,
        snapshot: &TwinSnapshot,
    ) -> Result<Vec<String>, TwinError> {
        let ops = diff_properties(proposed, snapshot);

        if ops.is_empty() {
            let properties: Vec<String> = proposed.keys().cloned().collect();
            info!(
                event_id = %event_id,
                entity_id = %entity_id,
                properties = ?properties,
                decision = PatchDecision::SkippedUnchanged.as_str(),
                "patch_skipped_unchanged"
            );
            self.metrics.record_patch_skipped();
            self.audit(event_id, entity_id, &properties, PatchDecision::SkippedUnchanged);
            return Ok(Vec::new());
        }

        let written: Vec<String> = ops.iter().map(|op| op.property().to_string()).collect();
        self.bounded(self.store.apply_patch(entity_id, &ops)).await?;

        info!(
            event_id = %event_id,
            entity_id = %entity_id,
            properties = ?written,
            decision = PatchDecision::Applied.as_str(),
            "patch_applied"
        );
        self.metrics.record_patch_applied(written.len());
        self.audit(event_id, entity_id, &written, PatchDecision::Applied);

        Ok(written)
    }

    /// Fetch the twin's current snapshot, then reconcile against it
    pub async fn reconcile(
        &self,
        event_id: EventId,
        entity_id: &str,
        proposed: &PropertySet,
    ) -> Result<Vec<String>, TwinError> {
        let snapshot = self.fetch_snapshot(entity_id).await?;
        self.reconcile_patch(event_id, entity_id, proposed, &snapshot).await
    }

    fn audit(&self, event_id: EventId, entity_id: &str, properties: &[String], decision: PatchDecision) {
        if let Some(ref audit) = self.audit {
            audit.record(&AuditEntry {
                ts: Utc::now(),
                event_id: event_id.to_string(),
                entity_id,
                properties,
                decision,
            });
        }
    }
}
