//! Threat graph adapter
//!
//! Speaks the graph database's HTTP transaction endpoint. All statements are
//! parameterized; labels and relationship types come from the closed enums in
//! [`crate::graph`], never from input data. When the store is unreachable at
//! startup the adapter stays in degraded mode and every operation returns
//! [`StoreError::Unavailable`] as a value.

use super::{send_with_retry, GraphRow, GraphStore, StoreError, StoreResult};
use crate::config::GraphStoreConfig;
use crate::context::path::{GraphPath, PathEdge, PathNode};
use crate::graph::{EntityKind, EntitySpec, RelationshipSpec, UpsertSummary};
use crate::plan::templates::TemplateName;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

const RETRY_ATTEMPTS: u32 = 3;
const RETRY_DELAY: Duration = Duration::from_millis(250);

/// Annotation properties rendered onto path nodes and edges, beyond the
/// identity itself.
const PATH_PROP_CAP: usize = 3;

/// HTTP adapter for the threat knowledge graph.
pub struct Neo4jGraphStore {
    client: Client,
    config: Option<GraphStoreConfig>,
    available: AtomicBool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Statement {
    statement: String,
    parameters: Map<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    result_data_contents: Option<Vec<&'static str>>,
    include_stats: bool,
}

#[derive(Deserialize)]
struct TxResponse {
    #[serde(default)]
    results: Vec<TxResult>,
    #[serde(default)]
    errors: Vec<TxError>,
}

#[derive(Deserialize)]
struct TxResult {
    #[serde(default)]
    columns: Vec<String>,
    #[serde(default)]
    data: Vec<TxData>,
    stats: Option<TxStats>,
}

#[derive(Deserialize)]
struct TxData {
    row: Option<Vec<Value>>,
    graph: Option<TxGraph>,
}

#[derive(Deserialize, Default)]
struct TxGraph {
    #[serde(default)]
    nodes: Vec<TxNode>,
    #[serde(default)]
    relationships: Vec<TxRel>,
}

#[derive(Deserialize)]
struct TxNode {
    id: String,
    #[serde(default)]
    labels: Vec<String>,
    #[serde(default)]
    properties: Map<String, Value>,
}

#[derive(Deserialize)]
struct TxRel {
    #[serde(rename = "type")]
    rel_type: String,
    #[serde(rename = "startNode")]
    start_node: String,
    #[serde(rename = "endNode")]
    end_node: String,
    #[serde(default)]
    properties: Map<String, Value>,
}

#[derive(Deserialize, Default)]
struct TxStats {
    #[serde(default)]
    nodes_created: u64,
    #[serde(default)]
    relationships_created: u64,
}

#[derive(Deserialize)]
struct TxError {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

impl Neo4jGraphStore {
    /// Build the adapter. `None` config means the deployment has no graph
    /// store; the adapter then starts (and stays) degraded.
    pub fn new(config: Option<GraphStoreConfig>) -> StoreResult<Self> {
        let client = Client::builder()
            .timeout(
                config
                    .as_ref()
                    .map(|c| c.timeout)
                    .unwrap_or(Duration::from_secs(30)),
            )
            .build()
            .map_err(|e| StoreError::Request(e.to_string()))?;

        let available = config.is_some();
        Ok(Self {
            client,
            config,
            available: AtomicBool::new(available),
        })
    }

    /// Startup connectivity probe. A failed probe flips the adapter into
    /// degraded mode for the lifetime of the process.
    pub async fn probe(&self) -> bool {
        if self.config.is_none() {
            info!("graph store not configured, running vector-only");
            return false;
        }

        let result = self
            .commit(vec![Statement {
                statement: "RETURN 1".to_string(),
                parameters: Map::new(),
                result_data_contents: None,
                include_stats: false,
            }])
            .await;

        match result {
            Ok(_) => {
                info!("graph store reachable");
                true
            }
            Err(e) => {
                warn!(error = %e, "graph store unreachable, degrading to vector-only");
                self.available.store(false, Ordering::Relaxed);
                false
            }
        }
    }

    fn endpoint(&self) -> StoreResult<(String, &GraphStoreConfig)> {
        let config = self
            .config
            .as_ref()
            .ok_or_else(|| StoreError::Unavailable("graph store not configured".to_string()))?;
        let url = format!(
            "{}/db/{}/tx/commit",
            config.url.trim_end_matches('/'),
            config.database
        );
        Ok((url, config))
    }

    async fn commit(&self, statements: Vec<Statement>) -> StoreResult<TxResponse> {
        let (url, config) = self.endpoint()?;

        let request = self
            .client
            .post(&url)
            .basic_auth(&config.username, Some(&config.password))
            .json(&json!({ "statements": statements }));

        let resp = send_with_retry(request, RETRY_ATTEMPTS, RETRY_DELAY).await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(StoreError::Request(format!(
                "graph store returned {}: {}",
                status, body
            )));
        }

        let parsed: TxResponse = resp
            .json()
            .await
            .map_err(|e| StoreError::Serialization(e.to_string()))?;

        if let Some(error) = parsed.errors.first() {
            return Err(StoreError::Request(format!(
                "{}: {}",
                error.code, error.message
            )));
        }

        Ok(parsed)
    }

    fn check_available(&self) -> StoreResult<()> {
        if self.available.load(Ordering::Relaxed) {
            Ok(())
        } else {
            Err(StoreError::Unavailable(
                "graph store in degraded mode".to_string(),
            ))
        }
    }
}

#[async_trait]
impl GraphStore for Neo4jGraphStore {
    fn is_available(&self) -> bool {
        self.available.load(Ordering::Relaxed)
    }

    async fn ensure_schema(&self) -> StoreResult<()> {
        self.check_available()?;

        let mut statements: Vec<Statement> = EntityKind::ALL
            .iter()
            .map(|kind| Statement {
                statement: format!(
                    "CREATE CONSTRAINT IF NOT EXISTS FOR (n:{}) REQUIRE n.{} IS UNIQUE",
                    kind.label(),
                    kind.key_property()
                ),
                parameters: Map::new(),
                result_data_contents: None,
                include_stats: false,
            })
            .collect();

        for (label, property) in [
            ("Alert", "timestamp"),
            ("IPAddress", "address"),
            ("Host", "agent_id"),
            ("User", "username"),
        ] {
            statements.push(Statement {
                statement: format!(
                    "CREATE INDEX IF NOT EXISTS FOR (n:{}) ON (n.{})",
                    label, property
                ),
                parameters: Map::new(),
                result_data_contents: None,
                include_stats: false,
            });
        }

        self.commit(statements).await?;
        info!("graph schema ensured");
        Ok(())
    }

    async fn run(
        &self,
        template: TemplateName,
        params: &Map<String, Value>,
    ) -> StoreResult<Vec<GraphRow>> {
        self.check_available()?;

        let response = self
            .commit(vec![Statement {
                statement: template.cypher().to_string(),
                parameters: params.clone(),
                result_data_contents: Some(vec!["row", "graph"]),
                include_stats: false,
            }])
            .await?;

        let result = response
            .results
            .into_iter()
            .next()
            .ok_or_else(|| StoreError::Serialization("empty result set".to_string()))?;

        let rows = result
            .data
            .into_iter()
            .map(|data| GraphRow {
                row: row_object(&result.columns, data.row),
                paths: data.graph.map(paths_from_graph).unwrap_or_default(),
            })
            .collect();

        debug!(template = %template, "graph traversal executed");
        Ok(rows)
    }

    async fn upsert(
        &self,
        entities: &[EntitySpec],
        relationships: &[RelationshipSpec],
    ) -> StoreResult<UpsertSummary> {
        self.check_available()?;

        let mut statements = Vec::with_capacity(entities.len() + relationships.len());
        for entity in entities {
            statements.push(entity_statement(entity));
        }
        for rel in relationships {
            statements.push(relationship_statement(rel));
        }

        let response = self.commit(statements).await?;

        let mut summary = UpsertSummary::default();
        for (i, result) in response.results.iter().enumerate() {
            let stats = result.stats.as_ref();
            if i < entities.len() {
                summary.nodes_created += stats.map(|s| s.nodes_created).unwrap_or(0);
            } else if result.data.is_empty() {
                // The MERGE never ran: one of the endpoints did not match.
                summary.edges_skipped += 1;
            } else {
                summary.relationships_created += stats.map(|s| s.relationships_created).unwrap_or(0);
            }
        }

        if summary.edges_skipped > 0 {
            warn!(
                skipped = summary.edges_skipped,
                "dropped edges with missing endpoints"
            );
        }
        Ok(summary)
    }
}

fn entity_statement(entity: &EntitySpec) -> Statement {
    let label = entity.kind.label();
    let key_property = entity.kind.key_property();

    // Alert nodes are immutable after creation except for the attributes
    // promoted from the triage report. Every other node type accumulates
    // scalar properties monotonically.
    let statement = if entity.kind == EntityKind::Alert {
        format!(
            "MERGE (n:{label} {{{key}: $key}}) \
             ON CREATE SET n += $props \
             SET n.risk_level = coalesce($props.risk_level, n.risk_level), \
                 n.triage_score = coalesce($props.triage_score, n.triage_score)",
            label = label,
            key = key_property
        )
    } else {
        format!(
            "MERGE (n:{label} {{{key}: $key}}) SET n += $props",
            label = label,
            key = key_property
        )
    };

    let mut parameters = Map::new();
    parameters.insert("key".to_string(), Value::String(entity.key.clone()));
    parameters.insert("props".to_string(), Value::Object(entity.props.clone()));

    Statement {
        statement,
        parameters,
        result_data_contents: None,
        include_stats: true,
    }
}

fn relationship_statement(rel: &RelationshipSpec) -> Statement {
    let statement = format!(
        "MATCH (a:{from_label} {{{from_key}: $from_key}}) \
         MATCH (b:{to_label} {{{to_key}: $to_key}}) \
         MERGE (a)-[r:{rel_type}]->(b) \
         SET r += $attrs \
         RETURN type(r)",
        from_label = rel.from.kind.label(),
        from_key = rel.from.kind.key_property(),
        to_label = rel.to.kind.label(),
        to_key = rel.to.kind.key_property(),
        rel_type = rel.rel.as_str()
    );

    let mut parameters = Map::new();
    parameters.insert("from_key".to_string(), Value::String(rel.from.key.clone()));
    parameters.insert("to_key".to_string(), Value::String(rel.to.key.clone()));
    parameters.insert("attrs".to_string(), Value::Object(rel.attrs.clone()));

    Statement {
        statement,
        parameters,
        result_data_contents: None,
        include_stats: true,
    }
}

fn row_object(columns: &[String], row: Option<Vec<Value>>) -> Value {
    let mut object = Map::new();
    if let Some(values) = row {
        for (column, value) in columns.iter().zip(values) {
            object.insert(column.clone(), value);
        }
    }
    Value::Object(object)
}

/// Flatten one row's graph section into single-hop paths. Multi-hop
/// traversals come back as several relationships sharing intermediate nodes,
/// which renders as one notation line per hop.
fn paths_from_graph(graph: TxGraph) -> Vec<GraphPath> {
    let nodes: std::collections::HashMap<&str, PathNode> = graph
        .nodes
        .iter()
        .map(|n| (n.id.as_str(), path_node(n)))
        .collect();

    graph
        .relationships
        .iter()
        .filter_map(|rel| {
            let start = nodes.get(rel.start_node.as_str())?.clone();
            let end = nodes.get(rel.end_node.as_str())?.clone();
            let mut edge = PathEdge::new(&rel.rel_type);
            for (key, value) in scalar_props(&rel.properties, None) {
                edge = edge.attr(key, value);
            }
            Some(GraphPath::single(start, edge, end))
        })
        .collect()
}

fn path_node(node: &TxNode) -> PathNode {
    let label = node.labels.first().map(String::as_str).unwrap_or("Node");
    let identity_key = identity_property(label);
    let identity = node
        .properties
        .get(identity_key)
        .map(display_value)
        .unwrap_or_else(|| node.id.clone());

    let mut path_node = PathNode::new(label, identity);
    for (key, value) in scalar_props(&node.properties, Some(identity_key)) {
        path_node = path_node.prop(key, value);
    }
    path_node
}

/// The identity property for a known label, falling back to `id`.
fn identity_property(label: &str) -> &'static str {
    EntityKind::ALL
        .iter()
        .find(|kind| kind.label() == label)
        .map(|kind| kind.key_property())
        .unwrap_or("id")
}

/// Scalar annotation properties: sorted for determinism, capped, identity
/// excluded.
fn scalar_props(props: &Map<String, Value>, exclude: Option<&str>) -> Vec<(String, String)> {
    let mut pairs: Vec<(String, String)> = props
        .iter()
        .filter(|(key, _)| Some(key.as_str()) != exclude)
        .filter_map(|(key, value)| match value {
            Value::String(_) | Value::Number(_) | Value::Bool(_) => {
                Some((key.clone(), display_value(value)))
            }
            _ => None,
        })
        .collect();
    pairs.sort();
    pairs.truncate(PATH_PROP_CAP);
    pairs
}

fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{EntityRef, RelKind};

    #[test]
    fn test_entity_statement_merges_by_identity() {
        let entity = EntitySpec::new(EntityKind::Host, "A1").prop("name", "web-01");
        let stmt = entity_statement(&entity);
        assert!(stmt.statement.contains("MERGE (n:Host {agent_id: $key})"));
        assert_eq!(stmt.parameters["key"], Value::String("A1".to_string()));
        assert!(stmt.include_stats);
    }

    #[test]
    fn test_alert_statement_promotes_report_attributes_only() {
        let entity = EntitySpec::new(EntityKind::Alert, "a1").prop("rule_level", 8);
        let stmt = entity_statement(&entity);
        assert!(stmt.statement.contains("ON CREATE SET n += $props"));
        assert!(stmt.statement.contains("n.risk_level"));
        assert!(stmt.statement.contains("n.triage_score"));
    }

    #[test]
    fn test_relationship_statement_matches_both_endpoints() {
        let rel = RelationshipSpec::new(
            RelKind::HasSourceIp,
            EntityRef::new(EntityKind::Alert, "a1"),
            EntityRef::new(EntityKind::IpAddress, "203.0.113.45"),
        );
        let stmt = relationship_statement(&rel);
        assert!(stmt.statement.contains("MATCH (a:Alert {id: $from_key})"));
        assert!(stmt.statement.contains("MATCH (b:IPAddress {address: $to_key})"));
        assert!(stmt.statement.contains("MERGE (a)-[r:HAS_SOURCE_IP]->(b)"));
        assert!(stmt.statement.contains("RETURN type(r)"));
    }

    #[test]
    fn test_paths_from_graph_builds_single_hop_lines() {
        let graph = TxGraph {
            nodes: vec![
                TxNode {
                    id: "1".to_string(),
                    labels: vec!["IPAddress".to_string()],
                    properties: serde_json::from_value(serde_json::json!({
                        "address": "203.0.113.45",
                        "is_internal": false
                    }))
                    .unwrap(),
                },
                TxNode {
                    id: "2".to_string(),
                    labels: vec!["Alert".to_string()],
                    properties: serde_json::from_value(serde_json::json!({
                        "id": "a1",
                        "rule_level": 8
                    }))
                    .unwrap(),
                },
            ],
            relationships: vec![TxRel {
                rel_type: "HAS_SOURCE_IP".to_string(),
                start_node: "2".to_string(),
                end_node: "1".to_string(),
                properties: Map::new(),
            }],
        };

        let paths = paths_from_graph(graph);
        assert_eq!(paths.len(), 1);
        assert_eq!(
            paths[0].render(),
            "(Alert:a1 {rule_level=8}) -[HAS_SOURCE_IP]-> (IPAddress:203.0.113.45 {is_internal=false})"
        );
    }

    #[test]
    fn test_degraded_without_config() {
        let store = Neo4jGraphStore::new(None).unwrap();
        assert!(!store.is_available());
    }

    #[tokio::test]
    async fn test_degraded_operations_return_unavailable() {
        let store = Neo4jGraphStore::new(None).unwrap();
        let err = store.run(TemplateName::IpReputation, &Map::new()).await.unwrap_err();
        assert!(matches!(err, StoreError::Unavailable(_)));
        let err = store.upsert(&[], &[]).await.unwrap_err();
        assert!(matches!(err, StoreError::Unavailable(_)));
    }
}
