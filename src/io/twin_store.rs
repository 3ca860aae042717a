//! Twin store client
//!
//! The twin store holds the recorded properties of each monitored entity.
//! Downstream consumers react to every recorded change, which is why writes
//! are gated by the updater.
//!
//! Wire format (Digital Twins REST compatible):
//! - GET   {endpoint}/digitaltwins/{id}  → JSON object of properties
//! - PATCH {endpoint}/digitaltwins/{id}  ← JSON Patch `[{"op":"replace","path":"/p","value":v}]`

use crate::domain::error::TwinError;
use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::{StatusCode, Url};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;
use tracing::debug;

const API_VERSION: &str = "2023-10-31";

/// JSON Patch operation kinds used against twins
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatchOpKind {
    Replace,
}

/// One property write
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatchOp {
    pub op: PatchOpKind,
    pub path: String,
    pub value: Value,
}

impl PatchOp {
    pub fn replace(property: &str, value: Value) -> Self {
        Self { op: PatchOpKind::Replace, path: format!("/{property}"), value }
    }

    /// Property name addressed by this op (path without the leading slash)
    pub fn property(&self) -> &str {
        self.path.strip_prefix('/').unwrap_or(&self.path)
    }
}

/// Current recorded properties of one twin
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TwinSnapshot {
    properties: Map<String, Value>,
}

impl TwinSnapshot {
    pub fn new(properties: Map<String, Value>) -> Self {
        Self { properties }
    }

    /// Build from a twin document; non-object documents yield an empty snapshot
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Object(properties) => Self { properties },
            _ => Self::default(),
        }
    }

    pub fn get(&self, property: &str) -> Option<&Value> {
        self.properties.get(property)
    }

    pub fn get_str(&self, property: &str) -> Option<&str> {
        self.properties.get(property).and_then(Value::as_str)
    }

    pub fn apply(&mut self, ops: &[PatchOp]) {
        for op in ops {
            match op.op {
                PatchOpKind::Replace => {
                    self.properties.insert(op.property().to_string(), op.value.clone());
                }
            }
        }
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.properties.clone())
    }
}

#[async_trait]
pub trait TwinStore: Send + Sync {
    async fn get_twin(&self, id: &str) -> Result<TwinSnapshot, TwinError>;
    async fn apply_patch(&self, id: &str, ops: &[PatchOp]) -> Result<(), TwinError>;
}

/// HTTP twin store client
pub struct HttpTwinStore {
    client: reqwest::Client,
    base_url: Url,
    api_token: Option<String>,
    timeout_ms: u64,
}

impl HttpTwinStore {
    pub fn new(endpoint: &str, api_token: Option<String>, timeout: Duration) -> Result<Self, TwinError> {
        // Create HTTP client once for reuse (connection pooling)
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TwinError::Unavailable(format!("failed to build HTTP client: {e}")))?;

        let base_url = Url::parse(endpoint)
            .map_err(|e| TwinError::Unavailable(format!("invalid endpoint {endpoint}: {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(TwinError::Unavailable(format!(
                "invalid endpoint {endpoint}: not a base URL"
            )));
        }

        Ok(Self {
            client,
            base_url,
            api_token,
            timeout_ms: timeout.as_millis() as u64,
        })
    }

    /// Twin id goes in as a single escaped path segment
    fn twin_url(&self, id: &str) -> Result<Url, TwinError> {
        // Dot segments are dropped by the URL builder and would address the collection
        if id.is_empty() || id == "." || id == ".." {
            return Err(TwinError::NotFound(id.to_string()));
        }

        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| TwinError::Unavailable(format!("invalid endpoint {}", self.base_url)))?
            .pop_if_empty()
            .push("digitaltwins")
            .push(id);
        url.set_query(None);
        url.query_pairs_mut().append_pair("api-version", API_VERSION);
        Ok(url)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    fn transport_error(&self, e: reqwest::Error) -> TwinError {
        if e.is_timeout() {
            TwinError::Timeout(self.timeout_ms)
        } else {
            TwinError::Unavailable(e.to_string())
        }
    }
}

#[async_trait]
impl TwinStore for HttpTwinStore {
    async fn get_twin(&self, id: &str) -> Result<TwinSnapshot, TwinError> {
        let response = self
            .authorize(self.client.get(self.twin_url(id)?))
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        debug!(twin_id = %id, status = %status.as_u16(), "twin_get");

        match status {
            s if s.is_success() => {
                let body: Value = response.json().await.map_err(|e| self.transport_error(e))?;
                Ok(TwinSnapshot::from_value(body))
            }
            StatusCode::NOT_FOUND => Err(TwinError::NotFound(id.to_string())),
            other => Err(TwinError::Unavailable(format!("GET {id} returned {other}"))),
        }
    }

    async fn apply_patch(&self, id: &str, ops: &[PatchOp]) -> Result<(), TwinError> {
        let body = serde_json::to_vec(ops)
            .map_err(|e| TwinError::Unavailable(format!("failed to encode patch: {e}")))?;

        let response = self
            .authorize(self.client.patch(self.twin_url(id)?))
            .header("Content-Type", "application/json-patch+json")
            .body(body)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        debug!(twin_id = %id, status = %status.as_u16(), ops = %ops.len(), "twin_patch");

        match status {
            s if s.is_success() => Ok(()),
            StatusCode::NOT_FOUND => Err(TwinError::NotFound(id.to_string())),
            StatusCode::CONFLICT | StatusCode::PRECONDITION_FAILED => {
                Err(TwinError::Conflict(id.to_string()))
            }
            other => Err(TwinError::Unavailable(format!("PATCH {id} returned {other}"))),
        }
    }
}

/// Patch call observed by the in-memory store
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedPatch {
    pub twin_id: String,
    pub ops: Vec<PatchOp>,
}

/// In-memory twin store
///
/// Records every patch call and supports per-twin failure injection and
/// artificial latency, for tests and the mock server.
#[derive(Default)]
pub struct InMemoryTwinStore {
    twins: Mutex<FxHashMap<String, TwinSnapshot>>,
    patches: Mutex<Vec<RecordedPatch>>,
    failures: Mutex<FxHashMap<String, TwinError>>,
    latency: Mutex<Option<Duration>>,
}

impl InMemoryTwinStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store seeded with empty twins
    pub fn with_twins(ids: &[&str]) -> Self {
        let store = Self::new();
        for id in ids {
            store.insert_twin(id, TwinSnapshot::default());
        }
        store
    }

    pub fn insert_twin(&self, id: &str, snapshot: TwinSnapshot) {
        self.twins.lock().insert(id.to_string(), snapshot);
    }

    pub fn twin(&self, id: &str) -> Option<TwinSnapshot> {
        self.twins.lock().get(id).cloned()
    }

    pub fn twin_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.twins.lock().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn patches(&self) -> Vec<RecordedPatch> {
        self.patches.lock().clone()
    }

    pub fn patches_for(&self, id: &str) -> Vec<RecordedPatch> {
        self.patches.lock().iter().filter(|p| p.twin_id == id).cloned().collect()
    }

    pub fn clear_patches(&self) {
        self.patches.lock().clear();
    }

    /// Make every call for `id` fail with `error` (None clears)
    pub fn set_failure(&self, id: &str, error: Option<TwinError>) {
        let mut failures = self.failures.lock();
        match error {
            Some(e) => {
                failures.insert(id.to_string(), e);
            }
            None => {
                failures.remove(id);
            }
        }
    }

    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.latency.lock() = latency;
    }

    async fn simulate_latency(&self) {
        let latency = *self.latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }

    fn injected_failure(&self, id: &str) -> Option<TwinError> {
        self.failures.lock().get(id).cloned()
    }
}

#[async_trait]
impl TwinStore for InMemoryTwinStore {
    async fn get_twin(&self, id: &str) -> Result<TwinSnapshot, TwinError> {
        self.simulate_latency().await;
        if let Some(error) = self.injected_failure(id) {
            return Err(error);
        }
        self.twin(id).ok_or_else(|| TwinError::NotFound(id.to_string()))
    }

    async fn apply_patch(&self, id: &str, ops: &[PatchOp]) -> Result<(), TwinError> {
        self.simulate_latency().await;
        if let Some(error) = self.injected_failure(id) {
            return Err(error);
        }
        {
            let mut twins = self.twins.lock();
            let twin = twins.get_mut(id).ok_or_else(|| TwinError::NotFound(id.to_string()))?;
            twin.apply(ops);
        }
        self.patches.lock().push(RecordedPatch { twin_id: id.to_string(), ops: ops.to_vec() });
        Ok(())
    }
}
