//! Sentria — AI-driven security alert triage
//!
//! Sentria augments a SIEM pipeline with automated triage: new alerts are
//! polled from the alert index, semantically embedded, correlated against
//! historical evidence through vector similarity and a threat knowledge
//! graph, analyzed by an LLM, and written back with a structured triage
//! report plus the artifacts future correlations build on.
//!
//! # Architecture
//!
//! The pipeline for one alert runs through a fixed sequence of components:
//!
//! - [`pipeline::Scheduler`] polls the alert index on a fixed interval and
//!   dispatches a bounded batch of alerts.
//! - [`embed::EmbeddingClient`] turns the alert's textual projection into a
//!   fixed-dimension vector.
//! - [`plan::Planner`] derives the retrieval plan from alert features alone.
//! - [`retrieve::HybridRetriever`] executes the plan against both stores
//!   with bounded fan-out and folds the results into a typed bundle.
//! - [`context`] renders the bundle into prompt slots, including the
//!   Cypher-path notation for graph evidence.
//! - [`analyze::Analyzer`] selects the prompt template and invokes the LLM.
//! - [`persist::GraphPersister`] grows the threat knowledge graph from the
//!   alert, its evidence, and the report.
//!
//! When the graph store is unreachable the engine degrades to vector-only
//! retrieval; every alert still terminates with an enrichment written back
//! to the index, so no alert is selected twice.
//!
//! # Example
//!
//! ```no_run
//! use sentria::config::Config;
//! use sentria::plan::Planner;
//! use sentria::alert::Alert;
//!
//! let config = Config::from_env();
//! let planner = Planner::new(config.pipeline.knn_k);
//! let plan = planner.plan(&Alert::default());
//! assert!(!plan.tasks.is_empty());
//! ```

#![warn(clippy::all)]

pub mod alert;
pub mod analyze;
pub mod config;
pub mod context;
pub mod embed;
pub mod graph;
pub mod llm;
pub mod metrics;
pub mod persist;
pub mod pipeline;
pub mod plan;
pub mod retrieve;
pub mod store;

// Re-export the main types for convenience
pub use alert::{AiAnalysis, Alert, GraphStats, RiskLevel};
pub use analyze::{Analyzer, TriageReport};
pub use config::Config;
pub use context::{format_bundle, FormattedContext};
pub use embed::{EmbedProvider, EmbeddingClient};
pub use llm::{ChatClient, ChatProvider};
pub use metrics::{MetricsSnapshot, PipelineMetrics};
pub use persist::GraphPersister;
pub use pipeline::{AlertProcessor, ProcessOutcome, Scheduler};
pub use plan::{Plan, Planner, Priority, RetrievalTask, TaskKind, TemplateName};
pub use retrieve::{ContextBundle, EvidenceRecord, HybridRetriever, Slot};
pub use store::{
    GraphStore, Neo4jGraphStore, OpenSearchVectorStore, StoreError, StoreResult, VectorStore,
};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get version string
pub fn version() -> &'static str {
    VERSION
}
