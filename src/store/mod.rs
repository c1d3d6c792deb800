//! External store adapters
//!
//! The pipeline reaches its two persistent stores through the traits defined
//! here. Concrete adapters speak HTTP to the SIEM index and the graph
//! database; tests substitute in-memory fakes. Unavailability is a result
//! value ([`StoreError::Unavailable`]), not a panic or a process-wide state.

pub mod graph;
pub mod vector;

pub use graph::Neo4jGraphStore;
pub use vector::OpenSearchVectorStore;

use crate::alert::{AiAnalysis, Alert};
use crate::context::path::GraphPath;
use crate::graph::{EntitySpec, RelationshipSpec, UpsertSummary};
use crate::plan::templates::TemplateName;
use crate::retrieve::bundle::EvidenceRecord;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::time::Duration;
use thiserror::Error;

/// Store errors
#[derive(Error, Debug)]
pub enum StoreError {
    /// The store cannot be reached; callers degrade instead of failing
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The store answered with an error
    #[error("store request failed: {0}")]
    Request(String),

    /// The response body did not parse
    #[error("store serialization error: {0}")]
    Serialization(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Parameters of one keyword + time-window search.
#[derive(Debug, Clone)]
pub struct KeywordQuery {
    pub keywords: Vec<String>,
    pub host: Option<String>,
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    pub size: usize,
}

/// One row returned by a graph traversal: the projected columns plus the
/// traversal paths the row touched.
#[derive(Debug, Clone, Default)]
pub struct GraphRow {
    pub row: Value,
    pub paths: Vec<GraphPath>,
}

/// The SIEM alert index.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Install the index template declaring the k-NN vector mapping.
    /// Safe to call repeatedly.
    async fn ensure_index_template(&self) -> StoreResult<()>;

    /// Oldest alerts that do not carry an `ai_analysis` block yet.
    async fn list_unprocessed(&self, limit: usize) -> StoreResult<Vec<Alert>>;

    /// Top-k cosine neighbours among already-analyzed alerts.
    async fn knn(&self, vector: &[f32], k: usize) -> StoreResult<Vec<EvidenceRecord>>;

    /// Fuzzy keyword search bounded by a time window and optional host.
    async fn keyword_time_window(&self, query: &KeywordQuery) -> StoreResult<Vec<EvidenceRecord>>;

    /// Partial-update the alert document with its enrichment. Idempotent:
    /// repeated writes with the same payload converge.
    async fn update_enrichment(
        &self,
        alert: &Alert,
        vector: &[f32],
        analysis: &AiAnalysis,
    ) -> StoreResult<()>;

    /// Connectivity probe used at startup.
    async fn ping(&self) -> StoreResult<()>;
}

/// The threat knowledge graph.
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Whether the store was reachable at startup. `false` means every
    /// operation returns [`StoreError::Unavailable`] and callers skip
    /// graph work for the alert.
    fn is_available(&self) -> bool;

    /// Create uniqueness constraints and secondary indexes when missing.
    async fn ensure_schema(&self) -> StoreResult<()>;

    /// Execute one named traversal template with bound parameters.
    async fn run(
        &self,
        template: TemplateName,
        params: &Map<String, Value>,
    ) -> StoreResult<Vec<GraphRow>>;

    /// Merge-or-create the given nodes, then the given edges. Edges whose
    /// endpoints could not be matched are dropped and counted, never fatal.
    async fn upsert(
        &self,
        entities: &[EntitySpec],
        relationships: &[RelationshipSpec],
    ) -> StoreResult<UpsertSummary>;
}

/// Send a request up to `attempts` times, backing off on transient failures
/// (network errors, 429, 5xx). Non-transient HTTP errors return immediately.
pub(crate) async fn send_with_retry(
    builder: reqwest::RequestBuilder,
    attempts: u32,
    delay: Duration,
) -> StoreResult<reqwest::Response> {
    let mut last_error = StoreError::Unavailable("no attempt made".to_string());

    for attempt in 0..attempts.max(1) {
        let request = match builder.try_clone() {
            Some(cloned) => cloned,
            // Streaming bodies cannot be cloned; fall back to a single shot.
            None => return builder.send().await.map_err(network_error),
        };

        match request.send().await {
            Ok(resp) => {
                let status = resp.status();
                if status.as_u16() == 429 || status.is_server_error() {
                    last_error = StoreError::Unavailable(format!("store returned {}", status));
                } else {
                    return Ok(resp);
                }
            }
            Err(e) => last_error = network_error(e),
        }

        if attempt + 1 < attempts {
            tokio::time::sleep(delay * 2u32.pow(attempt)).await;
        }
    }

    Err(last_error)
}

fn network_error(e: reqwest::Error) -> StoreError {
    StoreError::Unavailable(e.to_string())
}
