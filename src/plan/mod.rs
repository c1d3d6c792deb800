//! Decision engine
//!
//! Pure planning: from alert features alone, produce the ordered set of
//! retrieval tasks the hybrid retriever will execute. The planner never
//! talks to a store, so the same alert always yields the same plan.

pub mod templates;

pub use templates::TemplateName;

use crate::alert::{Alert, PlanSummary};
use crate::graph::{classify_ip, process_identity};
use crate::retrieve::bundle::Slot;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fmt;

/// Task priority; lower rank runs earlier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Critical,
    High,
    Medium,
    Low,
}

impl Priority {
    pub fn rank(&self) -> u8 {
        match self {
            Priority::Critical => 0,
            Priority::High => 1,
            Priority::Medium => 2,
            Priority::Low => 3,
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Priority::Critical => "critical",
            Priority::High => "high",
            Priority::Medium => "medium",
            Priority::Low => "low",
        };
        write!(f, "{}", name)
    }
}

/// One retrieval task with its alert-bound parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TaskKind {
    VectorKnn {
        k: usize,
    },
    KeywordTimeWindow {
        keywords: Vec<String>,
        host: Option<String>,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    },
    CypherTemplate {
        template: TemplateName,
        params: Map<String, Value>,
    },
}

impl TaskKind {
    pub fn name(&self) -> &'static str {
        match self {
            TaskKind::VectorKnn { .. } => "vector_knn",
            TaskKind::KeywordTimeWindow { .. } => "keyword_time_window",
            TaskKind::CypherTemplate { .. } => "cypher_template",
        }
    }
}

/// A retrieval task: what to fetch, how urgently, and where it lands.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalTask {
    pub kind: TaskKind,
    pub priority: Priority,
    pub slot: Slot,
}

/// The ordered task list for one alert.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Plan {
    pub tasks: Vec<RetrievalTask>,
}

impl Plan {
    /// Counts per task kind, recorded in the enrichment.
    pub fn summary(&self) -> PlanSummary {
        let mut summary = PlanSummary::default();
        for task in &self.tasks {
            match task.kind {
                TaskKind::VectorKnn { .. } => summary.vector_knn += 1,
                TaskKind::KeywordTimeWindow { .. } => summary.keyword_time_window += 1,
                TaskKind::CypherTemplate { .. } => summary.cypher_template += 1,
            }
        }
        summary
    }

    pub fn has_template(&self, template: TemplateName) -> bool {
        self.tasks.iter().any(|t| {
            matches!(&t.kind, TaskKind::CypherTemplate { template: tpl, .. } if *tpl == template)
        })
    }
}

/// Rule vocabularies. Matching is substring-based over the lowercased rule
/// description plus groups.
const RESOURCE_TERMS: &[&str] = &["cpu", "memory", "ram", "disk", "performance", "overload"];
const SECURITY_GROUPS: &[&str] = &["authentication", "attack", "intrusion_detection", "malware"];
const MALWARE_TERMS: &[&str] = &["malware", "virus", "trojan", "rootkit", "ransomware"];
const WEB_ATTACK_TERMS: &[&str] = &["web", "sql injection", "xss", "http"];
const AUTH_TERMS: &[&str] = &["authentication", "privilege", "sudo", "pam", "login"];

/// The decision engine. Stateless apart from the configured k.
#[derive(Debug, Clone)]
pub struct Planner {
    k: usize,
}

impl Planner {
    pub fn new(k: usize) -> Self {
        Self { k }
    }

    /// Produce the retrieval plan for one alert.
    ///
    /// Rules fire independently; the result is sorted by priority rank
    /// (stable, so rule order breaks ties).
    pub fn plan(&self, alert: &Alert) -> Plan {
        let mut tasks = Vec::new();
        let text = alert.match_text();
        let ts = alert.timestamp.unwrap_or_default();
        let host = alert.host_name().map(str::to_string);
        let agent_id = alert.agent_id().unwrap_or_default().to_string();

        // 1. The similarity baseline every plan carries.
        tasks.push(RetrievalTask {
            kind: TaskKind::VectorKnn { k: self.k },
            priority: Priority::High,
            slot: Slot::SimilarAlerts,
        });

        // 2. Resource-monitoring vocabulary: process and memory evidence
        //    around the alert.
        if RESOURCE_TERMS.iter().any(|t| text.contains(t)) {
            tasks.push(keyword_task(
                &["process", "cpu"],
                &host,
                ts,
                Duration::minutes(5),
                Priority::High,
                Slot::ProcessData,
            ));
            tasks.push(keyword_task(
                &["memory", "usage", "load"],
                &host,
                ts,
                Duration::minutes(5),
                Priority::High,
                Slot::HostMetrics,
            ));
        }

        // 3. Security events: tight window over host CPU, network I/O and
        //    user activity.
        let is_security_event = alert.rule_level() >= 7
            || SECURITY_GROUPS.iter().any(|g| alert.has_group(g));
        if is_security_event {
            tasks.push(keyword_task(
                &["cpu", "load"],
                &host,
                ts,
                Duration::minutes(1),
                Priority::Medium,
                Slot::HostMetrics,
            ));
            tasks.push(keyword_task(
                &["network", "connection"],
                &host,
                ts,
                Duration::minutes(1),
                Priority::Medium,
                Slot::NetworkLogs,
            ));
            tasks.push(keyword_task(
                &["login", "session", "user"],
                &host,
                ts,
                Duration::minutes(1),
                Priority::Medium,
                Slot::ProtocolLogs,
            ));
        }

        // 4. SSH activity: attacker panorama plus lateral movement.
        if text.contains("ssh") {
            tasks.push(RetrievalTask {
                kind: TaskKind::CypherTemplate {
                    template: TemplateName::AttackSourcePanorama,
                    params: window_params(
                        json!({"source_ip": alert.src_ip().unwrap_or_default()}),
                        ts - Duration::hours(1),
                        ts + Duration::hours(1),
                    ),
                },
                priority: Priority::Critical,
                slot: Slot::AttackPaths,
            });
            tasks.push(RetrievalTask {
                kind: TaskKind::CypherTemplate {
                    template: TemplateName::LateralMovementDetection,
                    params: window_params(
                        json!({
                            "username": alert.username().unwrap_or_default(),
                            "agent_id": agent_id,
                        }),
                        ts,
                        ts + Duration::minutes(30),
                    ),
                },
                priority: Priority::High,
                slot: Slot::LateralMovement,
            });
        }

        // 5. Malware activity: process ancestry and file neighborhood.
        if alert.has_group("malware") || MALWARE_TERMS.iter().any(|t| text.contains(t)) {
            let identity = process_identity(
                host.as_deref().unwrap_or_default(),
                alert.process_name().unwrap_or_default(),
            );
            tasks.push(RetrievalTask {
                kind: TaskKind::CypherTemplate {
                    template: TemplateName::ProcessExecutionChain,
                    params: window_params(
                        json!({"process_identity": identity}),
                        ts - Duration::hours(2),
                        ts + Duration::hours(2),
                    ),
                },
                priority: Priority::Critical,
                slot: Slot::ProcessChains,
            });
            tasks.push(RetrievalTask {
                kind: TaskKind::CypherTemplate {
                    template: TemplateName::FileInteractions,
                    params: object(json!({
                        "file_path": alert.file_path().unwrap_or_default(),
                    })),
                },
                priority: Priority::High,
                slot: Slot::FileInteractions,
            });
        }

        // 6. Web attacks: how far the attacker can reach in the network.
        if alert.has_group("web")
            || alert.has_group("web_attack")
            || WEB_ATTACK_TERMS.iter().any(|t| text.contains(t))
        {
            tasks.push(RetrievalTask {
                kind: TaskKind::CypherTemplate {
                    template: TemplateName::NetworkTopology,
                    params: window_params(
                        json!({"source_ip": alert.src_ip().unwrap_or_default()}),
                        ts - Duration::hours(6),
                        ts + Duration::hours(6),
                    ),
                },
                priority: Priority::High,
                slot: Slot::NetworkTopology,
            });
        }

        // 7. Authentication and privilege events: the user's recent record.
        if AUTH_TERMS.iter().any(|t| text.contains(t)) {
            tasks.push(RetrievalTask {
                kind: TaskKind::CypherTemplate {
                    template: TemplateName::UserBehavior,
                    params: window_params(
                        json!({"username": alert.username().unwrap_or_default()}),
                        ts - Duration::days(7),
                        ts,
                    ),
                },
                priority: Priority::Medium,
                slot: Slot::UserBehavior,
            });
        }

        // 8. Always look at the host's surrounding half hour.
        tasks.push(RetrievalTask {
            kind: TaskKind::CypherTemplate {
                template: TemplateName::TemporalCorrelation,
                params: window_params(
                    json!({
                        "agent_id": alert.agent_id().unwrap_or_default(),
                        "alert_id": alert.id,
                    }),
                    ts - Duration::minutes(30),
                    ts + Duration::minutes(30),
                ),
            },
            priority: Priority::Medium,
            slot: Slot::TemporalSequences,
        });

        // 9. External address involved: reputation lookup.
        if let Some(external) = external_ip(alert) {
            tasks.push(RetrievalTask {
                kind: TaskKind::CypherTemplate {
                    template: TemplateName::IpReputation,
                    params: object(json!({"address": external})),
                },
                priority: Priority::Medium,
                slot: Slot::IpReputation,
            });
        }

        // 10. High-severity alerts also scan the day's landscape.
        if alert.rule_level() >= 8 {
            tasks.push(RetrievalTask {
                kind: TaskKind::CypherTemplate {
                    template: TemplateName::ThreatLandscape,
                    params: window_params(
                        json!({"alert_id": alert.id}),
                        ts - Duration::hours(24),
                        ts,
                    ),
                },
                priority: Priority::Medium,
                slot: Slot::ThreatLandscape,
            });
        }

        tasks.sort_by_key(|t| t.priority.rank());
        Plan { tasks }
    }
}

/// The first externally-routable address on the alert, source first.
fn external_ip(alert: &Alert) -> Option<String> {
    [alert.src_ip(), alert.dst_ip()]
        .into_iter()
        .flatten()
        .find(|ip| classify_ip(ip) == Some(false))
        .map(str::to_string)
}

fn keyword_task(
    keywords: &[&str],
    host: &Option<String>,
    center: DateTime<Utc>,
    half_window: Duration,
    priority: Priority,
    slot: Slot,
) -> RetrievalTask {
    RetrievalTask {
        kind: TaskKind::KeywordTimeWindow {
            keywords: keywords.iter().map(|k| k.to_string()).collect(),
            host: host.clone(),
            from: center - half_window,
            to: center + half_window,
        },
        priority,
        slot,
    }
}

fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

fn window_params(base: Value, from: DateTime<Utc>, to: DateTime<Utc>) -> Map<String, Value> {
    let mut params = object(base);
    params.insert("from_ms".to_string(), json!(from.timestamp_millis()));
    params.insert("to_ms".to_string(), json!(to.timestamp_millis()));
    params
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ssh_alert() -> Alert {
        let mut alert: Alert = serde_json::from_value(json!({
            "timestamp": "2024-12-15T14:32:15Z",
            "rule": {
                "id": 100002,
                "description": "SSH brute force attack detected",
                "level": 8,
                "groups": ["authentication", "attack"]
            },
            "agent": {"id": "A1", "name": "web-01", "ip": "192.168.1.10"},
            "data": {"srcip": "203.0.113.45", "dstip": "192.168.1.10", "srcuser": "admin"}
        }))
        .unwrap();
        alert.id = "a1".to_string();
        alert
    }

    fn cpu_alert() -> Alert {
        let mut alert: Alert = serde_json::from_value(json!({
            "timestamp": "2024-12-15T14:40:00Z",
            "rule": {
                "description": "High CPU usage detected",
                "level": 7,
                "groups": ["system", "performance"]
            },
            "agent": {"name": "web-01"},
            "data": {"cpu_usage": "95%"}
        }))
        .unwrap();
        alert.id = "a2".to_string();
        alert
    }

    #[test]
    fn test_plan_always_has_exactly_one_knn_task() {
        let planner = Planner::new(5);
        for alert in [ssh_alert(), cpu_alert(), Alert::default()] {
            let plan = planner.plan(&alert);
            assert!(!plan.tasks.is_empty());
            let knn_count = plan
                .tasks
                .iter()
                .filter(|t| matches!(t.kind, TaskKind::VectorKnn { .. }))
                .count();
            assert_eq!(knn_count, 1);
        }
    }

    #[test]
    fn test_ssh_brute_force_plan() {
        let plan = Planner::new(5).plan(&ssh_alert());

        assert!(plan.has_template(TemplateName::AttackSourcePanorama));
        assert!(plan.has_template(TemplateName::LateralMovementDetection));
        assert!(plan.has_template(TemplateName::TemporalCorrelation));
        assert!(plan.has_template(TemplateName::IpReputation));
        assert!(plan.has_template(TemplateName::ThreatLandscape));

        let panorama = plan
            .tasks
            .iter()
            .find(|t| {
                matches!(&t.kind, TaskKind::CypherTemplate { template, .. }
                    if *template == TemplateName::AttackSourcePanorama)
            })
            .unwrap();
        assert_eq!(panorama.priority, Priority::Critical);
        assert_eq!(panorama.slot, Slot::AttackPaths);
        if let TaskKind::CypherTemplate { params, .. } = &panorama.kind {
            assert_eq!(
                params.get("source_ip").and_then(Value::as_str),
                Some("203.0.113.45")
            );
            assert!(params.contains_key("from_ms"));
        }
    }

    #[test]
    fn test_resource_alert_plan() {
        let plan = Planner::new(5).plan(&cpu_alert());

        let keyword_slots: Vec<Slot> = plan
            .tasks
            .iter()
            .filter(|t| matches!(t.kind, TaskKind::KeywordTimeWindow { .. }))
            .map(|t| t.slot)
            .collect();

        // Resource vocabulary evidence plus the level-7 security sweep.
        assert!(keyword_slots.contains(&Slot::ProcessData));
        assert!(keyword_slots.contains(&Slot::HostMetrics));
        assert!(keyword_slots.contains(&Slot::NetworkLogs));
        assert!(keyword_slots.contains(&Slot::ProtocolLogs));

        // Level 7 stays under the threat-landscape threshold.
        assert!(!plan.has_template(TemplateName::ThreatLandscape));
        assert!(!plan.has_template(TemplateName::AttackSourcePanorama));
    }

    #[test]
    fn test_plan_is_sorted_by_priority() {
        let plan = Planner::new(5).plan(&ssh_alert());
        let ranks: Vec<u8> = plan.tasks.iter().map(|t| t.priority.rank()).collect();
        let mut sorted = ranks.clone();
        sorted.sort();
        assert_eq!(ranks, sorted);
        assert_eq!(plan.tasks[0].priority, Priority::Critical);
    }

    #[test]
    fn test_internal_ip_does_not_trigger_reputation() {
        let mut alert = ssh_alert();
        alert
            .data
            .insert("srcip".to_string(), json!("192.168.1.77"));
        alert.data.insert("dstip".to_string(), json!("10.0.0.3"));
        let plan = Planner::new(5).plan(&alert);
        assert!(!plan.has_template(TemplateName::IpReputation));
    }

    #[test]
    fn test_plan_is_deterministic() {
        let planner = Planner::new(5);
        let a = serde_json::to_string(&planner.plan(&ssh_alert())).unwrap();
        let b = serde_json::to_string(&planner.plan(&ssh_alert())).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_plan_summary_counts() {
        let summary = Planner::new(5).plan(&ssh_alert()).summary();
        assert_eq!(summary.vector_knn, 1);
        assert!(summary.cypher_template >= 5);
        assert!(summary.keyword_time_window >= 3);
    }
}
