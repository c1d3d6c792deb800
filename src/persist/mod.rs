//! Graph persistence
//!
//! Extracts entities and relationships from an alert, its evidence bundle
//! and the triage report, then upserts them into the threat graph.
//! Extraction is pure; a degraded graph store just means the summary comes
//! back with `persisted = false`.

use crate::alert::{Alert, GraphStats, RiskLevel};
use crate::graph::{
    classify_ip, process_identity, EntityKind, EntityRef, EntitySpec, RelKind, RelationshipSpec,
};
use crate::analyze::TriageReport;
use crate::config::PipelineConfig;
use crate::retrieve::bundle::{ContextBundle, Slot};
use crate::store::GraphStore;
use regex::Regex;
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Ceiling on indicators pulled out of one report.
const INDICATOR_CAP: usize = 20;

/// Extracts and writes the per-alert graph delta.
pub struct GraphPersister {
    graph: Arc<dyn GraphStore>,
    config: PipelineConfig,
    ipv4: Regex,
    hash: Regex,
    domain: Regex,
}

impl GraphPersister {
    pub fn new(graph: Arc<dyn GraphStore>, config: PipelineConfig) -> Self {
        Self {
            graph,
            config,
            // Candidate IPs are re-validated with a real parser below.
            ipv4: Regex::new(r"\b(?:\d{1,3}\.){3}\d{1,3}\b").unwrap(),
            hash: Regex::new(r"\b[a-fA-F0-9]{64}\b|\b[a-fA-F0-9]{40}\b|\b[a-fA-F0-9]{32}\b")
                .unwrap(),
            domain: Regex::new(
                r"\b[a-z0-9][a-z0-9-]{0,62}(?:\.[a-z0-9][a-z0-9-]{0,62})*\.(?:com|net|org|io|info|biz|xyz|top|ru|cn)\b",
            )
            .unwrap(),
        }
    }

    /// Extract the graph delta for one alert. Missing fields suppress the
    /// affected entity or edge, never the whole extraction.
    pub fn extract(
        &self,
        alert: &Alert,
        bundle: &ContextBundle,
        report: &TriageReport,
    ) -> (Vec<EntitySpec>, Vec<RelationshipSpec>) {
        let mut entities = Vec::new();
        let mut relationships = Vec::new();

        let alert_ref = EntityRef::new(EntityKind::Alert, alert.id.clone());
        let timestamp_ms = alert.timestamp.map(|t| t.timestamp_millis()).unwrap_or(0);

        // The alert itself, with the attributes promoted from the report.
        entities.push(
            EntitySpec::new(EntityKind::Alert, alert.id.clone())
                .prop("timestamp", timestamp_ms)
                .prop_opt(
                    "rule_id",
                    alert.rule.as_ref().and_then(|r| r.id.clone()),
                )
                .prop("rule_level", alert.rule_level() as i64)
                .prop("risk_level", report.risk_level.as_str())
                .prop("triage_score", triage_score(alert.rule_level(), report.risk_level) as i64),
        );

        // Host and the edge onto it.
        if let Some(agent_id) = alert.agent_id() {
            entities.push(
                EntitySpec::new(EntityKind::Host, agent_id)
                    .prop_opt("name", alert.host_name())
                    .prop_opt("ip", alert.agent.as_ref().and_then(|a| a.ip.as_deref())),
            );
            relationships.push(RelationshipSpec::new(
                RelKind::TriggeredOn,
                alert_ref.clone(),
                EntityRef::new(EntityKind::Host, agent_id),
            ));
        }

        // Source and destination addresses.
        for (field, rel) in [("srcip", RelKind::HasSourceIp), ("dstip", RelKind::HasDestIp)] {
            if let Some(address) = alert.data_str(field) {
                if let Some(is_internal) = classify_ip(address) {
                    entities.push(
                        EntitySpec::new(EntityKind::IpAddress, address)
                            .prop("is_internal", is_internal),
                    );
                    relationships.push(RelationshipSpec::new(
                        rel,
                        alert_ref.clone(),
                        EntityRef::new(EntityKind::IpAddress, address),
                    ));
                }
            }
        }

        // User.
        if let Some(username) = alert.username() {
            entities.push(EntitySpec::new(EntityKind::User, username));
            relationships.push(RelationshipSpec::new(
                RelKind::InvolvesUser,
                alert_ref.clone(),
                EntityRef::new(EntityKind::User, username),
            ));
        }

        // Process, scoped to the host it ran on.
        if let (Some(host), Some(process)) = (alert.host_name(), alert.process_name()) {
            let identity = process_identity(host, process);
            entities.push(
                EntitySpec::new(EntityKind::Process, identity.clone())
                    .prop("name", process)
                    .prop_opt("pid", alert.data_str("pid"))
                    .prop_opt(
                        "command_line",
                        alert.data_str("cmdline").or_else(|| alert.data_str("command")),
                    ),
            );
            relationships.push(RelationshipSpec::new(
                RelKind::InvolvesProcess,
                alert_ref.clone(),
                EntityRef::new(EntityKind::Process, identity),
            ));
        }

        // File.
        if let Some(path) = alert.file_path() {
            let name = path.rsplit('/').next().unwrap_or(path);
            entities.push(EntitySpec::new(EntityKind::File, path).prop("name", name));
            relationships.push(RelationshipSpec::new(
                RelKind::AccessesFile,
                alert_ref.clone(),
                EntityRef::new(EntityKind::File, path),
            ));
        }

        // Rule.
        if let Some(rule) = &alert.rule {
            if let Some(rule_id) = &rule.id {
                entities.push(
                    EntitySpec::new(EntityKind::Rule, rule_id.clone())
                        .prop("description", rule.description.clone())
                        .prop("level", rule.level as i64),
                );
                relationships.push(RelationshipSpec::new(
                    RelKind::MatchedRule,
                    alert_ref.clone(),
                    EntityRef::new(EntityKind::Rule, rule_id.clone()),
                ));
            }
        }

        // Similarity edges against already-analyzed history.
        for record in bundle.records(Slot::SimilarAlerts) {
            let (Some(other_id), Some(score)) = (&record.alert_id, record.score) else {
                continue;
            };
            if other_id == &alert.id || score < self.config.similarity_threshold {
                continue;
            }
            relationships.push(
                RelationshipSpec::new(
                    RelKind::SimilarTo,
                    alert_ref.clone(),
                    EntityRef::new(EntityKind::Alert, other_id.clone()),
                )
                .attr("score", json!(score)),
            );
        }

        // Temporal ordering within the correlation window, earliest first.
        if let Some(this_ts) = alert.timestamp {
            let window = self.config.correlation_window.as_secs() as i64;
            for record in bundle.records(Slot::TemporalSequences) {
                let (Some(other_id), Some(other_ts)) = (&record.alert_id, record.timestamp) else {
                    continue;
                };
                if other_id == &alert.id {
                    continue;
                }
                let gap = (this_ts - other_ts).num_seconds().abs();
                if gap > window {
                    continue;
                }

                let other_ref = EntityRef::new(EntityKind::Alert, other_id.clone());
                let (from, to) = if other_ts <= this_ts {
                    (other_ref, alert_ref.clone())
                } else {
                    (alert_ref.clone(), other_ref)
                };
                relationships.push(
                    RelationshipSpec::new(RelKind::Precedes, from, to)
                        .attr("time_gap_seconds", json!(gap)),
                );
            }
        }

        // Indicators surfaced by the report text.
        for (kind, value) in self.extract_indicators(&report.text) {
            let key = format!("{}:{}", kind, value);
            entities.push(
                EntitySpec::new(EntityKind::ThreatIndicator, key.clone())
                    .prop("kind", kind)
                    .prop("value", value),
            );
            relationships.push(RelationshipSpec::new(
                RelKind::PartOf,
                EntityRef::new(EntityKind::ThreatIndicator, key),
                alert_ref.clone(),
            ));
        }

        debug!(
            entities = entities.len(),
            relationships = relationships.len(),
            "graph delta extracted"
        );
        (entities, relationships)
    }

    /// Extract and upsert in one step, degrading to a non-persisted summary
    /// when the graph store is down.
    pub async fn persist(
        &self,
        alert: &Alert,
        bundle: &ContextBundle,
        report: &TriageReport,
    ) -> GraphStats {
        let (entities, relationships) = self.extract(alert, bundle, report);

        if !self.graph.is_available() {
            debug!(alert_id = %alert.id, "graph degraded, skipping persistence");
            return GraphStats::default();
        }

        match self.graph.upsert(&entities, &relationships).await {
            Ok(summary) => {
                info!(
                    alert_id = %alert.id,
                    nodes = summary.nodes_created,
                    edges = summary.relationships_created,
                    skipped = summary.edges_skipped,
                    "graph delta persisted"
                );
                GraphStats {
                    entities_created: summary.nodes_created,
                    relationships_created: summary.relationships_created,
                    edges_skipped: summary.edges_skipped,
                    persisted: true,
                }
            }
            Err(e) => {
                warn!(alert_id = %alert.id, error = %e, "graph persistence failed");
                GraphStats::default()
            }
        }
    }

    /// Pull (kind, value) indicator pairs from report text.
    fn extract_indicators(&self, report: &str) -> Vec<(&'static str, String)> {
        let lowered = report.to_lowercase();
        let mut seen = HashSet::new();
        let mut indicators = Vec::new();

        for m in self.ipv4.find_iter(report) {
            let candidate = m.as_str();
            if candidate.parse::<std::net::Ipv4Addr>().is_ok()
                && seen.insert(candidate.to_string())
            {
                indicators.push(("ip", candidate.to_string()));
            }
        }

        for m in self.hash.find_iter(report) {
            let value = m.as_str().to_lowercase();
            if seen.insert(value.clone()) {
                indicators.push(("hash", value));
            }
        }

        for m in self.domain.find_iter(&lowered) {
            let value = m.as_str().to_string();
            if seen.insert(value.clone()) {
                indicators.push(("domain", value));
            }
        }

        indicators.truncate(INDICATOR_CAP);
        indicators
    }
}

/// Triage score stored on the Alert node, in [0, 100].
fn triage_score(rule_level: u8, risk: RiskLevel) -> u32 {
    (u32::from(rule_level) * 8 + risk.score_bonus()).min(100)
}
