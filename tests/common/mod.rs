//! Shared in-memory fakes for the integration tests
//!
//! The fake vector store keeps alert documents with their enrichment; the
//! fake graph store mirrors merge-by-identity semantics so idempotence
//! properties can be asserted without a live database.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sentria::alert::{AiAnalysis, Alert};
use sentria::analyze::Analyzer;
use sentria::config::{EmbeddingConfig, LlmConfig, PipelineConfig};
use sentria::embed::{EmbedProvider, EmbeddingClient};
use sentria::graph::{EntitySpec, RelationshipSpec, UpsertSummary};
use sentria::llm::{ChatClient, ChatProvider};
use sentria::metrics::PipelineMetrics;
use sentria::persist::GraphPersister;
use sentria::pipeline::{AlertProcessor, Scheduler};
use sentria::plan::{Planner, TemplateName};
use sentria::retrieve::{EvidenceRecord, HybridRetriever};
use sentria::store::{GraphRow, GraphStore, KeywordQuery, StoreError, StoreResult, VectorStore};
use sentria::context::path::{GraphPath, PathEdge, PathNode};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const TEST_INDEX: &str = "alerts-test";

/// One stored alert document.
#[derive(Debug, Clone)]
pub struct StoredDoc {
    pub source: Value,
    pub vector: Option<Vec<f32>>,
    pub analysis: Option<AiAnalysis>,
    pub update_count: usize,
}

/// In-memory stand-in for the alert index.
#[derive(Default)]
pub struct InMemoryVectorStore {
    pub docs: Mutex<HashMap<String, StoredDoc>>,
    /// Artificial latency applied to enrichment writes
    pub update_delay: Option<Duration>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_update_delay(delay: Duration) -> Self {
        Self {
            update_delay: Some(delay),
            ..Default::default()
        }
    }

    pub fn seed(&self, id: &str, source: Value) {
        self.docs.lock().unwrap().insert(
            id.to_string(),
            StoredDoc {
                source,
                vector: None,
                analysis: None,
                update_count: 0,
            },
        );
    }

    pub fn doc(&self, id: &str) -> Option<StoredDoc> {
        self.docs.lock().unwrap().get(id).cloned()
    }

    fn doc_timestamp(source: &Value) -> Option<DateTime<Utc>> {
        source["timestamp"]
            .as_str()
            .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
            .map(|t| t.with_timezone(&Utc))
    }

    fn to_alert(id: &str, source: &Value) -> Alert {
        let mut alert: Alert = serde_json::from_value(source.clone()).unwrap_or_default();
        alert.id = id.to_string();
        alert.index = TEST_INDEX.to_string();
        alert
    }

    fn cosine(a: &[f32], b: &[f32]) -> f64 {
        let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
        let na: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        let nb: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
        if na <= 0.0 || nb <= 0.0 {
            return 0.0;
        }
        f64::from(dot / (na * nb))
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn ensure_index_template(&self) -> StoreResult<()> {
        Ok(())
    }

    async fn list_unprocessed(&self, limit: usize) -> StoreResult<Vec<Alert>> {
        let docs = self.docs.lock().unwrap();
        let mut unprocessed: Vec<(&String, &StoredDoc)> =
            docs.iter().filter(|(_, d)| d.analysis.is_none()).collect();
        unprocessed.sort_by_key(|(_, d)| Self::doc_timestamp(&d.source));
        Ok(unprocessed
            .into_iter()
            .take(limit)
            .map(|(id, d)| Self::to_alert(id, &d.source))
            .collect())
    }

    async fn knn(&self, vector: &[f32], k: usize) -> StoreResult<Vec<EvidenceRecord>> {
        let docs = self.docs.lock().unwrap();
        let mut scored: Vec<(f64, String, Value, Option<AiAnalysis>)> = docs
            .iter()
            .filter_map(|(id, d)| {
                let doc_vector = d.vector.as_ref()?;
                d.analysis.as_ref()?;
                Some((
                    Self::cosine(vector, doc_vector),
                    id.clone(),
                    d.source.clone(),
                    d.analysis.clone(),
                ))
            })
            .collect();
        scored.sort_by(|a, b| b.0.total_cmp(&a.0));

        Ok(scored
            .into_iter()
            .take(k)
            .map(|(score, id, source, analysis)| {
                let mut fields = source;
                if let Some(analysis) = analysis {
                    fields["ai_analysis"] = serde_json::to_value(&analysis).unwrap();
                }
                let mut record =
                    EvidenceRecord::new(sentria::retrieve::bundle::EvidenceSource::VectorKnn);
                record.score = Some(score);
                record.timestamp = Self::doc_timestamp(&fields);
                record.alert_id = Some(id);
                record.fields = fields;
                record
            })
            .collect())
    }

    async fn keyword_time_window(&self, query: &KeywordQuery) -> StoreResult<Vec<EvidenceRecord>> {
        let docs = self.docs.lock().unwrap();
        let mut records: Vec<EvidenceRecord> = docs
            .iter()
            .filter_map(|(id, d)| {
                let ts = Self::doc_timestamp(&d.source)?;
                if ts < query.from || ts > query.to {
                    return None;
                }
                if let Some(host) = &query.host {
                    if d.source["agent"]["name"].as_str() != Some(host.as_str()) {
                        return None;
                    }
                }
                let description = d.source["rule"]["description"]
                    .as_str()
                    .unwrap_or_default()
                    .to_lowercase();
                if !query
                    .keywords
                    .iter()
                    .any(|k| description.contains(&k.to_lowercase()))
                {
                    return None;
                }
                let mut record = EvidenceRecord::new(
                    sentria::retrieve::bundle::EvidenceSource::KeywordTimeWindow,
                );
                record.timestamp = Some(ts);
                record.alert_id = Some(id.clone());
                record.fields = d.source.clone();
                record.score = Some(1.0);
                Some(record)
            })
            .collect();
        records.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        records.truncate(query.size);
        Ok(records)
    }

    async fn update_enrichment(
        &self,
        alert: &Alert,
        vector: &[f32],
        analysis: &AiAnalysis,
    ) -> StoreResult<()> {
        if let Some(delay) = self.update_delay {
            tokio::time::sleep(delay).await;
        }
        let mut docs = self.docs.lock().unwrap();
        let doc = docs
            .entry(alert.id.clone())
            .or_insert_with(|| StoredDoc {
                source: json!({}),
                vector: None,
                analysis: None,
                update_count: 0,
            });
        doc.vector = Some(vector.to_vec());
        doc.analysis = Some(analysis.clone());
        doc.update_count += 1;
        Ok(())
    }

    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }
}

pub type NodeKey = (String, String);
pub type EdgeKey = (NodeKey, String, NodeKey);

/// In-memory stand-in for the threat graph with merge semantics.
pub struct InMemoryGraphStore {
    pub available: AtomicBool,
    pub nodes: Mutex<HashMap<NodeKey, Map<String, Value>>>,
    pub edges: Mutex<HashMap<EdgeKey, Map<String, Value>>>,
}

impl InMemoryGraphStore {
    pub fn new(available: bool) -> Self {
        Self {
            available: AtomicBool::new(available),
            nodes: Mutex::new(HashMap::new()),
            edges: Mutex::new(HashMap::new()),
        }
    }

    pub fn seed_node(&self, label: &str, key: &str, props: Value) {
        let props = match props {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        self.nodes
            .lock()
            .unwrap()
            .insert((label.to_string(), key.to_string()), props);
    }

    pub fn seed_edge(&self, from: (&str, &str), rel: &str, to: (&str, &str)) {
        self.edges.lock().unwrap().insert(
            (
                (from.0.to_string(), from.1.to_string()),
                rel.to_string(),
                (to.0.to_string(), to.1.to_string()),
            ),
            Map::new(),
        );
    }

    pub fn node_count(&self, label: &str) -> usize {
        self.nodes
            .lock()
            .unwrap()
            .keys()
            .filter(|(l, _)| l == label)
            .count()
    }

    pub fn has_node(&self, label: &str, key: &str) -> bool {
        self.nodes
            .lock()
            .unwrap()
            .contains_key(&(label.to_string(), key.to_string()))
    }

    pub fn has_edge(&self, from: (&str, &str), rel: &str, to: (&str, &str)) -> bool {
        self.edges.lock().unwrap().contains_key(&(
            (from.0.to_string(), from.1.to_string()),
            rel.to_string(),
            (to.0.to_string(), to.1.to_string()),
        ))
    }

    pub fn edge_count(&self) -> usize {
        self.edges.lock().unwrap().len()
    }

    /// Endpoints must exist for every stored edge.
    pub fn dangling_edges(&self) -> usize {
        let nodes = self.nodes.lock().unwrap();
        self.edges
            .lock()
            .unwrap()
            .keys()
            .filter(|(from, _, to)| !nodes.contains_key(from) || !nodes.contains_key(to))
            .count()
    }
}

#[async_trait]
impl GraphStore for InMemoryGraphStore {
    fn is_available(&self) -> bool {
        self.available.load(Ordering::Relaxed)
    }

    async fn ensure_schema(&self) -> StoreResult<()> {
        if !self.is_available() {
            return Err(StoreError::Unavailable("degraded".to_string()));
        }
        Ok(())
    }

    async fn run(
        &self,
        template: TemplateName,
        params: &Map<String, Value>,
    ) -> StoreResult<Vec<GraphRow>> {
        if !self.is_available() {
            return Err(StoreError::Unavailable("degraded".to_string()));
        }

        let nodes = self.nodes.lock().unwrap();
        let edges = self.edges.lock().unwrap();
        let from_ms = params.get("from_ms").and_then(Value::as_i64).unwrap_or(i64::MIN);
        let to_ms = params.get("to_ms").and_then(Value::as_i64).unwrap_or(i64::MAX);

        let rows = match template {
            TemplateName::AttackSourcePanorama => {
                let source_ip = params.get("source_ip").and_then(Value::as_str).unwrap_or("");
                edges
                    .keys()
                    .filter(|(from, rel, to)| {
                        rel == "HAS_SOURCE_IP" && from.0 == "Alert" && to.1 == source_ip
                    })
                    .filter_map(|(from, _, to)| {
                        let props = nodes.get(from)?;
                        let ts = props.get("timestamp").and_then(Value::as_i64)?;
                        if ts < from_ms || ts > to_ms {
                            return None;
                        }
                        let path = GraphPath::single(
                            PathNode::new("IPAddress", to.1.clone()),
                            PathEdge::new("HAS_SOURCE_IP"),
                            PathNode::new("Alert", from.1.clone()),
                        );
                        Some(GraphRow {
                            row: json!({"a": {"id": from.1.clone(), "timestamp": ts}}),
                            paths: vec![path],
                        })
                    })
                    .collect()
            }
            TemplateName::TemporalCorrelation => {
                let agent_id = params.get("agent_id").and_then(Value::as_str).unwrap_or("");
                let alert_id = params.get("alert_id").and_then(Value::as_str).unwrap_or("");
                edges
                    .keys()
                    .filter(|(from, rel, to)| {
                        rel == "TRIGGERED_ON"
                            && from.0 == "Alert"
                            && to.1 == agent_id
                            && from.1 != alert_id
                    })
                    .filter_map(|(from, _, to)| {
                        let props = nodes.get(from)?;
                        let ts = props.get("timestamp").and_then(Value::as_i64)?;
                        if ts < from_ms || ts > to_ms {
                            return None;
                        }
                        let path = GraphPath::single(
                            PathNode::new("Host", to.1.clone()),
                            PathEdge::new("TRIGGERED_ON"),
                            PathNode::new("Alert", from.1.clone()),
                        );
                        Some(GraphRow {
                            row: json!({"a": {"id": from.1.clone(), "timestamp": ts}}),
                            paths: vec![path],
                        })
                    })
                    .collect()
            }
            _ => Vec::new(),
        };

        Ok(rows)
    }

    async fn upsert(
        &self,
        entities: &[EntitySpec],
        relationships: &[RelationshipSpec],
    ) -> StoreResult<UpsertSummary> {
        if !self.is_available() {
            return Err(StoreError::Unavailable("degraded".to_string()));
        }

        let mut summary = UpsertSummary::default();
        let mut nodes = self.nodes.lock().unwrap();
        let mut edges = self.edges.lock().unwrap();

        for entity in entities {
            let key = (entity.kind.label().to_string(), entity.key.clone());
            match nodes.get_mut(&key) {
                Some(existing) => {
                    for (k, v) in &entity.props {
                        existing.insert(k.clone(), v.clone());
                    }
                }
                None => {
                    nodes.insert(key, entity.props.clone());
                    summary.nodes_created += 1;
                }
            }
        }

        for rel in relationships {
            let from = (rel.from.kind.label().to_string(), rel.from.key.clone());
            let to = (rel.to.kind.label().to_string(), rel.to.key.clone());
            if !nodes.contains_key(&from) || !nodes.contains_key(&to) {
                summary.edges_skipped += 1;
                continue;
            }
            let key = (from, rel.rel.as_str().to_string(), to);
            match edges.get_mut(&key) {
                Some(existing) => {
                    for (k, v) in &rel.attrs {
                        existing.insert(k.clone(), v.clone());
                    }
                }
                None => {
                    edges.insert(key, rel.attrs.clone());
                    summary.relationships_created += 1;
                }
            }
        }

        Ok(summary)
    }
}

/// A fully-wired engine over the in-memory fakes.
pub struct TestEngine {
    pub vector: Arc<InMemoryVectorStore>,
    pub graph: Arc<InMemoryGraphStore>,
    pub metrics: Arc<PipelineMetrics>,
    pub processor: Arc<AlertProcessor>,
    pub config: PipelineConfig,
}

impl TestEngine {
    pub fn builder() -> TestEngineBuilder {
        TestEngineBuilder::default()
    }

    pub fn scheduler(&self) -> Scheduler {
        Scheduler::new(
            Arc::clone(&self.processor),
            self.vector.clone() as Arc<dyn VectorStore>,
            self.config.clone(),
            Arc::clone(&self.metrics),
        )
    }
}

pub struct TestEngineBuilder {
    pub graph_available: bool,
    pub llm_model: String,
    pub config: PipelineConfig,
    pub update_delay: Option<Duration>,
}

impl Default for TestEngineBuilder {
    fn default() -> Self {
        Self {
            graph_available: true,
            llm_model: "mock".to_string(),
            config: PipelineConfig::default(),
            update_delay: None,
        }
    }
}

impl TestEngineBuilder {
    pub fn graph_available(mut self, available: bool) -> Self {
        self.graph_available = available;
        self
    }

    pub fn llm_model(mut self, model: &str) -> Self {
        self.llm_model = model.to_string();
        self
    }

    pub fn config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn update_delay(mut self, delay: Duration) -> Self {
        self.update_delay = Some(delay);
        self
    }

    pub fn build(self) -> TestEngine {
        let vector = Arc::new(match self.update_delay {
            Some(delay) => InMemoryVectorStore::with_update_delay(delay),
            None => InMemoryVectorStore::new(),
        });
        let graph = Arc::new(InMemoryGraphStore::new(self.graph_available));
        let metrics = Arc::new(PipelineMetrics::new());

        let embedder = Arc::new(
            EmbeddingClient::new(EmbeddingConfig {
                provider: EmbedProvider::Mock,
                dimension: 32,
                ..Default::default()
            })
            .unwrap(),
        );
        let llm = Arc::new(
            ChatClient::new(LlmConfig {
                provider: ChatProvider::Mock,
                model: self.llm_model.clone(),
                retry_delay: Duration::from_millis(1),
                ..Default::default()
            })
            .unwrap(),
        );

        let retriever = HybridRetriever::new(
            vector.clone() as Arc<dyn VectorStore>,
            graph.clone() as Arc<dyn GraphStore>,
            self.config.clone(),
            Duration::from_secs(5),
            Duration::from_secs(5),
            Arc::clone(&metrics),
        );

        let processor = Arc::new(AlertProcessor::new(
            embedder,
            Planner::new(self.config.knn_k),
            retriever,
            Analyzer::new(llm),
            GraphPersister::new(graph.clone() as Arc<dyn GraphStore>, self.config.clone()),
            vector.clone() as Arc<dyn VectorStore>,
            Arc::clone(&metrics),
        ));

        TestEngine {
            vector,
            graph,
            metrics,
            processor,
            config: self.config,
        }
    }
}

/// The SSH brute-force scenario alert.
pub fn ssh_alert_source() -> Value {
    json!({
        "timestamp": "2024-12-15T14:32:15Z",
        "rule": {
            "id": 100002,
            "description": "SSH brute force attack detected",
            "level": 8,
            "groups": ["authentication", "attack"]
        },
        "agent": {"id": "A1", "name": "web-01", "ip": "192.168.1.10"},
        "data": {"srcip": "203.0.113.45", "dstip": "192.168.1.10", "srcuser": "admin"}
    })
}

/// The resource-usage scenario alert.
pub fn cpu_alert_source() -> Value {
    json!({
        "timestamp": "2024-12-15T14:40:00Z",
        "rule": {
            "description": "High CPU usage detected",
            "level": 7,
            "groups": ["system", "performance"]
        },
        "agent": {"name": "web-01"},
        "data": {"cpu_usage": "95%"}
    })
}

pub fn alert_from(id: &str, source: &Value) -> Alert {
    let mut alert: Alert = serde_json::from_value(source.clone()).unwrap_or_default();
    alert.id = id.to_string();
    alert.index = TEST_INDEX.to_string();
    alert
}
