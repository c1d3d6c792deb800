//! Poll scheduler
//!
//! Drives the pipeline on a fixed interval: poll the alert index for
//! unprocessed alerts, dispatch them with bounded concurrency, collect the
//! outcomes. Ticks are serialized; an overrunning tick coalesces the missed
//! firings instead of queueing them.

use super::{AlertProcessor, ProcessOutcome};
use crate::config::PipelineConfig;
use crate::metrics::PipelineMetrics;
use crate::store::VectorStore;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

/// Scheduler lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Polling,
    Processing,
}

impl SchedulerState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => SchedulerState::Polling,
            2 => SchedulerState::Processing,
            _ => SchedulerState::Idle,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            SchedulerState::Idle => 0,
            SchedulerState::Polling => 1,
            SchedulerState::Processing => 2,
        }
    }
}

/// The periodic poll-and-dispatch loop.
pub struct Scheduler {
    processor: Arc<AlertProcessor>,
    vector: Arc<dyn VectorStore>,
    config: PipelineConfig,
    metrics: Arc<PipelineMetrics>,
    state: AtomicU8,
}

impl Scheduler {
    pub fn new(
        processor: Arc<AlertProcessor>,
        vector: Arc<dyn VectorStore>,
        config: PipelineConfig,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        Self {
            processor,
            vector,
            config,
            metrics,
            state: AtomicU8::new(SchedulerState::Idle.as_u8()),
        }
    }

    pub fn state(&self) -> SchedulerState {
        SchedulerState::from_u8(self.state.load(Ordering::Relaxed))
    }

    fn set_state(&self, state: SchedulerState) {
        self.state.store(state.as_u8(), Ordering::Relaxed);
    }

    /// Run until the shutdown signal flips. The tick in flight when the
    /// signal arrives finishes before the loop exits.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.config.interval);
        // Overrunning ticks are coalesced, never queued.
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            interval_secs = self.config.interval.as_secs(),
            batch_size = self.config.batch_size,
            "scheduler started"
        );

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.tick().await;
                }
                result = shutdown.changed() => {
                    if result.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("scheduler stopped");
    }

    /// One poll-and-dispatch pass.
    pub async fn tick(&self) {
        self.metrics.incr(&self.metrics.ticks);
        self.set_state(SchedulerState::Polling);

        let alerts = match self.vector.list_unprocessed(self.config.batch_size).await {
            Ok(alerts) => alerts,
            Err(e) => {
                error!(error = %e, "failed to poll for new alerts");
                self.set_state(SchedulerState::Idle);
                return;
            }
        };

        if alerts.is_empty() {
            info!("no new alerts to process");
            self.set_state(SchedulerState::Idle);
            return;
        }

        let total = alerts.len();
        self.metrics.add(&self.metrics.alerts_found, total as u64);
        info!(count = total, "dispatching alert batch");
        self.set_state(SchedulerState::Processing);

        let semaphore = Arc::new(Semaphore::new(self.config.alert_concurrency.max(1)));
        let mut join_set: JoinSet<ProcessOutcome> = JoinSet::new();
        for alert in alerts {
            let processor = Arc::clone(&self.processor);
            let semaphore = Arc::clone(&semaphore);
            join_set.spawn(async move {
                let _permit = semaphore.acquire().await;
                processor.process(alert).await
            });
        }

        let mut succeeded = 0usize;
        let mut partial = 0usize;
        let mut failed = 0usize;
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(ProcessOutcome::Enriched) => succeeded += 1,
                Ok(ProcessOutcome::Partial) | Ok(ProcessOutcome::Unprocessable) => partial += 1,
                Ok(ProcessOutcome::WriteFailed) => failed += 1,
                Err(e) => {
                    warn!(error = %e, "alert task panicked");
                    failed += 1;
                }
            }
        }

        let success_rate = (succeeded + partial) as f64 / total as f64 * 100.0;
        info!(
            total,
            succeeded,
            partial,
            failed,
            success_rate = %format!("{:.1}%", success_rate),
            "tick complete"
        );
        self.set_state(SchedulerState::Idle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::{AiAnalysis, Alert};
    use crate::retrieve::bundle::EvidenceRecord;
    use crate::store::{KeywordQuery, StoreResult};
    use async_trait::async_trait;

    struct EmptyVector;

    #[async_trait]
    impl VectorStore for EmptyVector {
        async fn ensure_index_template(&self) -> StoreResult<()> {
            Ok(())
        }

        async fn list_unprocessed(&self, _limit: usize) -> StoreResult<Vec<Alert>> {
            Ok(Vec::new())
        }

        async fn knn(&self, _vector: &[f32], _k: usize) -> StoreResult<Vec<EvidenceRecord>> {
            Ok(Vec::new())
        }

        async fn keyword_time_window(
            &self,
            _query: &KeywordQuery,
        ) -> StoreResult<Vec<EvidenceRecord>> {
            Ok(Vec::new())
        }

        async fn update_enrichment(
            &self,
            _alert: &Alert,
            _vector: &[f32],
            _analysis: &AiAnalysis,
        ) -> StoreResult<()> {
            Ok(())
        }

        async fn ping(&self) -> StoreResult<()> {
            Ok(())
        }
    }

    fn test_scheduler() -> Scheduler {
        use crate::analyze::Analyzer;
        use crate::config::{EmbeddingConfig, LlmConfig, PipelineConfig};
        use crate::embed::{EmbedProvider, EmbeddingClient};
        use crate::llm::{ChatClient, ChatProvider};
        use crate::persist::GraphPersister;
        use crate::plan::Planner;
        use crate::retrieve::HybridRetriever;
        use crate::store::Neo4jGraphStore;
        use std::time::Duration;

        let vector: Arc<dyn VectorStore> = Arc::new(EmptyVector);
        let graph = Arc::new(Neo4jGraphStore::new(None).unwrap());
        let metrics = Arc::new(PipelineMetrics::new());
        let config = PipelineConfig::default();

        let embedder = Arc::new(
            EmbeddingClient::new(EmbeddingConfig {
                provider: EmbedProvider::Mock,
                dimension: 8,
                ..Default::default()
            })
            .unwrap(),
        );
        let llm = Arc::new(
            ChatClient::new(LlmConfig {
                provider: ChatProvider::Mock,
                model: "mock".to_string(),
                ..Default::default()
            })
            .unwrap(),
        );

        let retriever = HybridRetriever::new(
            Arc::clone(&vector),
            graph.clone(),
            config.clone(),
            Duration::from_secs(1),
            Duration::from_secs(1),
            Arc::clone(&metrics),
        );
        let processor = Arc::new(AlertProcessor::new(
            embedder,
            Planner::new(config.knn_k),
            retriever,
            Analyzer::new(llm),
            GraphPersister::new(graph, config.clone()),
            Arc::clone(&vector),
            Arc::clone(&metrics),
        ));

        Scheduler::new(processor, vector, config, metrics)
    }

    #[tokio::test]
    async fn test_empty_tick_returns_to_idle() {
        let scheduler = test_scheduler();
        assert_eq!(scheduler.state(), SchedulerState::Idle);
        scheduler.tick().await;
        assert_eq!(scheduler.state(), SchedulerState::Idle);
    }

    #[tokio::test]
    async fn test_shutdown_signal_stops_the_loop() {
        let scheduler = Arc::new(test_scheduler());
        let (tx, rx) = watch::channel(false);

        let handle = {
            let scheduler = Arc::clone(&scheduler);
            tokio::spawn(async move { scheduler.run(rx).await })
        };

        tx.send(true).unwrap();
        tokio::time::timeout(std::time::Duration::from_secs(5), handle)
            .await
            .expect("scheduler did not stop")
            .unwrap();
    }

    #[test]
    fn test_state_round_trip() {
        for state in [
            SchedulerState::Idle,
            SchedulerState::Polling,
            SchedulerState::Processing,
        ] {
            assert_eq!(SchedulerState::from_u8(state.as_u8()), state);
        }
    }
}
