//! Hybrid retriever
//!
//! Executes a retrieval plan against the vector and graph stores with
//! bounded fan-out, folding everything into the typed context bundle. A
//! failing task empties its slot and sets the slot's failure flag; the
//! bundle itself always comes back.

pub mod bundle;

pub use bundle::{ContextBundle, EvidenceRecord, EvidenceSource, Slot};

use crate::alert::Alert;
use crate::config::PipelineConfig;
use crate::metrics::PipelineMetrics;
use crate::plan::{Plan, RetrievalTask, TaskKind};
use crate::store::{GraphRow, GraphStore, KeywordQuery, StoreResult, VectorStore};
use chrono::{DateTime, Duration as ChronoDuration};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

/// Keyword tasks run when the graph produced too little evidence.
const FALLBACK_SLOTS: [(Slot, &[&str]); 3] = [
    (Slot::ProcessData, &["process", "cpu"]),
    (Slot::HostMetrics, &["memory", "usage"]),
    (Slot::NetworkLogs, &["network", "connection"]),
];

/// Executes retrieval plans. Construct once and share.
pub struct HybridRetriever {
    vector: Arc<dyn VectorStore>,
    graph: Arc<dyn GraphStore>,
    config: PipelineConfig,
    vector_timeout: Duration,
    graph_timeout: Duration,
    metrics: Arc<PipelineMetrics>,
}

impl HybridRetriever {
    pub fn new(
        vector: Arc<dyn VectorStore>,
        graph: Arc<dyn GraphStore>,
        config: PipelineConfig,
        vector_timeout: Duration,
        graph_timeout: Duration,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        Self {
            vector,
            graph,
            config,
            vector_timeout,
            graph_timeout,
            metrics,
        }
    }

    /// Execute the plan and gather everything into a bundle.
    pub async fn retrieve(&self, alert: &Alert, plan: &Plan, vector: &[f32]) -> ContextBundle {
        let mut bundle = ContextBundle::new(self.config.result_cap);
        let graph_up = self.graph.is_available();

        let mut tasks: Vec<RetrievalTask> = plan.tasks.clone();
        tasks.sort_by_key(|t| t.priority.rank());

        let semaphore = Arc::new(Semaphore::new(self.config.retrieval_concurrency.max(1)));
        let mut join_set: JoinSet<(Slot, StoreResult<Vec<EvidenceRecord>>)> = JoinSet::new();

        for task in tasks {
            if !graph_up && matches!(task.kind, TaskKind::CypherTemplate { .. }) {
                // Degraded mode: graph slots stay empty rather than failing.
                continue;
            }

            let slot = task.slot;
            let semaphore = Arc::clone(&semaphore);
            let vector_store = Arc::clone(&self.vector);
            let graph_store = Arc::clone(&self.graph);
            let query_vector = vector.to_vec();
            let vector_timeout = self.vector_timeout;
            let graph_timeout = self.graph_timeout;
            let result_cap = self.config.result_cap;

            join_set.spawn(async move {
                // Closing the semaphore is not part of this flow, so an
                // acquire error cannot happen outside shutdown.
                let _permit = semaphore.acquire().await;
                let result = match task.kind {
                    TaskKind::VectorKnn { k } => {
                        run_with_timeout(vector_timeout, vector_store.knn(&query_vector, k)).await
                    }
                    TaskKind::KeywordTimeWindow {
                        keywords,
                        host,
                        from,
                        to,
                    } => {
                        let query = KeywordQuery {
                            keywords,
                            host,
                            from,
                            to,
                            size: result_cap,
                        };
                        run_with_timeout(vector_timeout, vector_store.keyword_time_window(&query))
                            .await
                    }
                    TaskKind::CypherTemplate { template, params } => run_with_timeout(
                        graph_timeout,
                        async move {
                            let rows = graph_store.run(template, &params).await?;
                            Ok(rows
                                .into_iter()
                                .map(|row| graph_record(template, row))
                                .collect())
                        },
                    )
                    .await,
                };
                (slot, result)
            });
        }

        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((slot, Ok(records))) => {
                    debug!(slot = %slot, count = records.len(), "retrieval task finished");
                    bundle.extend(slot, records);
                }
                Ok((slot, Err(e))) => {
                    warn!(slot = %slot, error = %e, "retrieval task failed");
                    self.metrics.incr(&self.metrics.retrieval_task_failures);
                    bundle.mark_failed(slot);
                }
                Err(e) => {
                    warn!(error = %e, "retrieval task panicked");
                    self.metrics.incr(&self.metrics.retrieval_task_failures);
                }
            }
        }

        // Thin graph evidence: backfill the classic keyword slots around
        // the alert so the analyst prompt is never empty-handed.
        if bundle.graph_hit_count() < self.config.graph_minimum {
            self.keyword_fallback(alert, &mut bundle).await;
        }

        bundle
    }

    async fn keyword_fallback(&self, alert: &Alert, bundle: &mut ContextBundle) {
        let Some(center) = alert.timestamp else {
            return;
        };
        let host = alert.host_name().map(str::to_string);

        for (slot, keywords) in FALLBACK_SLOTS {
            if bundle.len(slot) > 0 {
                continue;
            }

            let query = KeywordQuery {
                keywords: keywords.iter().map(|k| k.to_string()).collect(),
                host: host.clone(),
                from: center - ChronoDuration::minutes(2),
                to: center + ChronoDuration::minutes(2),
                size: self.config.result_cap,
            };

            match run_with_timeout(self.vector_timeout, self.vector.keyword_time_window(&query))
                .await
            {
                Ok(records) => bundle.extend(slot, records),
                Err(e) => {
                    warn!(slot = %slot, error = %e, "fallback retrieval failed");
                    self.metrics.incr(&self.metrics.retrieval_task_failures);
                    bundle.mark_failed(slot);
                }
            }
        }
    }
}

async fn run_with_timeout<F>(limit: Duration, fut: F) -> StoreResult<Vec<EvidenceRecord>>
where
    F: std::future::Future<Output = StoreResult<Vec<EvidenceRecord>>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(crate::store::StoreError::Unavailable(format!(
            "retrieval task exceeded {:?}",
            limit
        ))),
    }
}

/// Convert one traversal row into an evidence record. Alert-shaped columns
/// (`a` or `other`) donate the historical alert id and timestamp the
/// persister needs for temporal edges.
fn graph_record(template: crate::plan::TemplateName, row: GraphRow) -> EvidenceRecord {
    let mut record = EvidenceRecord::new(EvidenceSource::Graph(template));

    let alert_column = row.row.get("a").or_else(|| row.row.get("other"));
    if let Some(alert) = alert_column {
        record.alert_id = alert
            .get("id")
            .and_then(Value::as_str)
            .map(str::to_string);
        record.timestamp = alert
            .get("timestamp")
            .and_then(Value::as_i64)
            .and_then(DateTime::from_timestamp_millis);
    }

    record.fields = row.row;
    record.paths = row.paths;
    record
}
