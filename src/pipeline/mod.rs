//! Per-alert processing pipeline
//!
//! Runs the full sequence for one alert: embed, plan, retrieve, format,
//! analyze, write back, persist to the graph. Every failure mode terminates
//! in a written enrichment so the alert leaves the unprocessed set.

pub mod scheduler;

pub use scheduler::{Scheduler, SchedulerState};

use crate::alert::{AiAnalysis, Alert, GraphStats, RiskLevel};
use crate::analyze::{Analyzer, TriageReport};
use crate::context::format_bundle;
use crate::embed::EmbeddingClient;
use crate::metrics::PipelineMetrics;
use crate::persist::GraphPersister;
use crate::plan::Planner;
use crate::retrieve::{ContextBundle, HybridRetriever, Slot};
use crate::store::VectorStore;
use chrono::Utc;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

/// Marker recorded in every enrichment this pipeline writes.
const STAGE_MARKER: &str = "hybrid-graph-triage";

/// Terminal state of one alert's processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Report generated and graph delta persisted
    Enriched,
    /// Enrichment written but analysis failed or graph was degraded
    Partial,
    /// Alert was missing required fields; tagged and skipped
    Unprocessable,
    /// The enrichment write itself failed; the alert will be retried
    WriteFailed,
}

/// Orchestrates the processing steps for single alerts.
pub struct AlertProcessor {
    embedder: Arc<EmbeddingClient>,
    planner: Planner,
    retriever: HybridRetriever,
    analyzer: Analyzer,
    persister: GraphPersister,
    vector: Arc<dyn VectorStore>,
    metrics: Arc<PipelineMetrics>,
}

impl AlertProcessor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        embedder: Arc<EmbeddingClient>,
        planner: Planner,
        retriever: HybridRetriever,
        analyzer: Analyzer,
        persister: GraphPersister,
        vector: Arc<dyn VectorStore>,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        Self {
            embedder,
            planner,
            retriever,
            analyzer,
            persister,
            vector,
            metrics,
        }
    }

    /// Process one alert to a terminal state.
    pub async fn process(&self, alert: Alert) -> ProcessOutcome {
        let started = Instant::now();
        info!(alert_id = %alert.id, rule = alert.rule_description(), "processing alert");

        // Embed up front so even degenerate outcomes carry a vector
        // alongside the analysis block.
        let (vector, embed_failed) = match self.embedder.embed_alert(&alert).await {
            Ok(embedding) => {
                self.metrics
                    .add(&self.metrics.embed_tokens_in, embedding.tokens_in);
                (embedding.vector, false)
            }
            Err(e) => {
                warn!(alert_id = %alert.id, error = %e, "embedding unavailable");
                (vec![0.0; self.embedder.dimension()], true)
            }
        };

        // Malformed alerts are tagged unprocessable and never retried; the
        // write below removes them from the unprocessed set.
        if let Err(e) = alert.validate() {
            warn!(alert_id = %alert.id, error = %e, "unprocessable alert");
            let analysis = self.degenerate_analysis(
                format!("Unprocessable alert: {}. No analysis was attempted.", e),
                started,
            );
            return match self.write(&alert, &vector, &analysis).await {
                Ok(()) => {
                    self.metrics.incr(&self.metrics.alerts_unprocessable);
                    ProcessOutcome::Unprocessable
                }
                Err(()) => ProcessOutcome::WriteFailed,
            };
        }

        if embed_failed {
            // Short-circuit: record the failure, then still attempt the
            // graph write so entity history keeps accruing.
            let analysis = self.degenerate_analysis(
                "Enrichment failed: embedding provider unavailable. \
                 The alert was stored without semantic context."
                    .to_string(),
                started,
            );
            let outcome = match self.write(&alert, &vector, &analysis).await {
                Ok(()) => ProcessOutcome::Partial,
                Err(()) => ProcessOutcome::WriteFailed,
            };
            let report = failed_report(&analysis);
            let stats = self
                .persister
                .persist(&alert, &ContextBundle::new(0), &report)
                .await;
            self.finalize(&alert, &vector, analysis, stats).await;
            if outcome == ProcessOutcome::Partial {
                self.metrics.incr(&self.metrics.alerts_partial);
            }
            return outcome;
        }

        // Plan and gather evidence; both are total, so from here on only
        // the store writes can fail.
        let plan = self.planner.plan(&alert);
        let bundle = self.retriever.retrieve(&alert, &plan, &vector).await;
        let formatted = format_bundle(&bundle);
        let report = self.analyzer.analyze(&alert.summary(), &formatted).await;

        self.metrics.add(&self.metrics.llm_tokens_in, report.tokens_in);
        self.metrics
            .add(&self.metrics.llm_tokens_out, report.tokens_out);

        let pending = AiAnalysis {
            report_text: report.text.clone(),
            provider_id: report.provider_id.clone(),
            timestamp: Utc::now(),
            risk_level: report.risk_level,
            plan_summary: plan.summary(),
            graph_stats: GraphStats::default(),
            similar_alerts_count: bundle.len(Slot::SimilarAlerts),
            processing_ms: started.elapsed().as_millis() as u64,
            stage_marker: STAGE_MARKER.to_string(),
        };

        if self.write(&alert, &vector, &pending).await.is_err() {
            return ProcessOutcome::WriteFailed;
        }

        let stats = self.persister.persist(&alert, &bundle, &report).await;
        self.metrics
            .add(&self.metrics.graph_edges_skipped, stats.edges_skipped);

        let persisted = stats.persisted;
        self.finalize(&alert, &vector, pending, stats).await;

        let outcome = if report.failed || !persisted {
            ProcessOutcome::Partial
        } else {
            ProcessOutcome::Enriched
        };
        match outcome {
            ProcessOutcome::Enriched => self.metrics.incr(&self.metrics.alerts_enriched),
            _ => self.metrics.incr(&self.metrics.alerts_partial),
        }
        self.metrics.add(
            &self.metrics.processing_ms_total,
            started.elapsed().as_millis() as u64,
        );

        info!(
            alert_id = %alert.id,
            risk = %report.risk_level,
            persisted,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "alert processed"
        );
        outcome
    }

    /// Second enrichment write with the final graph stats. Elided when the
    /// stats match the pending value already written.
    async fn finalize(
        &self,
        alert: &Alert,
        vector: &[f32],
        pending: AiAnalysis,
        stats: GraphStats,
    ) {
        if stats == pending.graph_stats {
            return;
        }
        let analysis = AiAnalysis {
            graph_stats: stats,
            ..pending
        };
        if let Err(e) = self.vector.update_enrichment(alert, vector, &analysis).await {
            // The first write already landed; losing only the stats update
            // is tolerable.
            warn!(alert_id = %alert.id, error = %e, "graph stats update failed");
        }
    }

    async fn write(&self, alert: &Alert, vector: &[f32], analysis: &AiAnalysis) -> Result<(), ()> {
        match self.vector.update_enrichment(alert, vector, analysis).await {
            Ok(()) => Ok(()),
            Err(e) => {
                error!(alert_id = %alert.id, error = %e, "enrichment write failed");
                self.metrics.incr(&self.metrics.alerts_failed);
                Err(())
            }
        }
    }

    fn degenerate_analysis(&self, report_text: String, started: Instant) -> AiAnalysis {
        AiAnalysis {
            report_text,
            provider_id: "none".to_string(),
            timestamp: Utc::now(),
            risk_level: RiskLevel::Unknown,
            plan_summary: Default::default(),
            graph_stats: GraphStats::default(),
            similar_alerts_count: 0,
            processing_ms: started.elapsed().as_millis() as u64,
            stage_marker: STAGE_MARKER.to_string(),
        }
    }
}

fn failed_report(analysis: &AiAnalysis) -> TriageReport {
    TriageReport {
        text: analysis.report_text.clone(),
        risk_level: analysis.risk_level,
        provider_id: analysis.provider_id.clone(),
        tokens_in: 0,
        tokens_out: 0,
        failed: true,
    }
}
