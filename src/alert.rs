//! Alert model and the enrichment written back onto it
//!
//! Alerts are produced by the SIEM and treated as read-only input. The only
//! mutation the engine performs is attaching an [`Enrichment`] (the embedding
//! vector plus the [`AiAnalysis`] triage block) through the vector store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// Alert validation errors
#[derive(Error, Debug)]
pub enum AlertError {
    /// A field the pipeline cannot work without is absent
    #[error("malformed alert: missing required field `{0}`")]
    MissingField(&'static str),
}

pub type AlertResult<T> = Result<T, AlertError>;

/// Rule metadata attached to an alert by the SIEM ruleset.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Rule {
    /// Rule identifier; the SIEM emits both numeric and string forms
    #[serde(default, deserialize_with = "string_or_number")]
    pub id: Option<String>,
    #[serde(default)]
    pub level: u8,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub groups: Vec<String>,
}

/// The agent (host sensor) that produced the alert.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentRef {
    #[serde(default, deserialize_with = "string_or_number")]
    pub id: Option<String>,
    pub name: Option<String>,
    pub ip: Option<String>,
}

/// Decoder that parsed the raw log line.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Decoder {
    pub name: Option<String>,
}

/// A single SIEM alert as read from the vector store.
///
/// `id` and `index` come from the document envelope, not the source body;
/// the vector store adapter fills them in after deserializing the source.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Alert {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub index: String,
    pub timestamp: Option<DateTime<Utc>>,
    pub rule: Option<Rule>,
    pub agent: Option<AgentRef>,
    #[serde(default)]
    pub data: HashMap<String, Value>,
    pub full_log: Option<String>,
    pub location: Option<String>,
    pub decoder: Option<Decoder>,
}

impl Alert {
    /// Check the fields the pipeline cannot proceed without.
    pub fn validate(&self) -> AlertResult<()> {
        if self.rule.is_none() {
            return Err(AlertError::MissingField("rule"));
        }
        if self.agent.is_none() {
            return Err(AlertError::MissingField("agent"));
        }
        if self.timestamp.is_none() {
            return Err(AlertError::MissingField("timestamp"));
        }
        Ok(())
    }

    pub fn rule_level(&self) -> u8 {
        self.rule.as_ref().map(|r| r.level).unwrap_or(0)
    }

    pub fn rule_description(&self) -> &str {
        self.rule.as_ref().map(|r| r.description.as_str()).unwrap_or("")
    }

    pub fn rule_groups(&self) -> &[String] {
        self.rule.as_ref().map(|r| r.groups.as_slice()).unwrap_or(&[])
    }

    pub fn has_group(&self, group: &str) -> bool {
        self.rule_groups().iter().any(|g| g.eq_ignore_ascii_case(group))
    }

    pub fn host_name(&self) -> Option<&str> {
        self.agent.as_ref().and_then(|a| a.name.as_deref())
    }

    pub fn agent_id(&self) -> Option<&str> {
        self.agent.as_ref().and_then(|a| a.id.as_deref())
    }

    /// String-typed `data` field accessor; non-string values are ignored.
    pub fn data_str(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(Value::as_str)
    }

    pub fn src_ip(&self) -> Option<&str> {
        self.data_str("srcip")
    }

    pub fn dst_ip(&self) -> Option<&str> {
        self.data_str("dstip")
    }

    /// Source user, falling back to the generic `user` field.
    pub fn username(&self) -> Option<&str> {
        self.data_str("srcuser").or_else(|| self.data_str("user"))
    }

    pub fn process_name(&self) -> Option<&str> {
        self.data_str("process")
    }

    pub fn file_path(&self) -> Option<&str> {
        self.data_str("file")
    }

    /// Lowercased rule description plus groups, used for vocabulary matching.
    pub fn match_text(&self) -> String {
        let mut text = self.rule_description().to_lowercase();
        for g in self.rule_groups() {
            text.push(' ');
            text.push_str(&g.to_lowercase());
        }
        text
    }

    /// Multi-line projection of the alert used as the prompt's alert block.
    pub fn summary(&self) -> String {
        let na = "N/A";
        format!(
            "Rule: {}\nLevel: {}\nAgent: {}\nSource IP: {}\nDestination IP: {}\nEvent Type: {}\nProcess: {}\nUser: {}\nTimestamp: {}",
            non_empty(self.rule_description()).unwrap_or(na),
            self.rule
                .as_ref()
                .map(|r| r.level.to_string())
                .unwrap_or_else(|| na.to_string()),
            self.host_name().unwrap_or(na),
            self.src_ip().unwrap_or(na),
            self.dst_ip().unwrap_or(na),
            self.decoder
                .as_ref()
                .and_then(|d| d.name.as_deref())
                .unwrap_or(na),
            self.process_name().unwrap_or(na),
            self.username().unwrap_or(na),
            self.timestamp
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| na.to_string()),
        )
    }
}

fn non_empty(s: &str) -> Option<&str> {
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}

fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.and_then(|v| match v {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }))
}

/// Risk level extracted from a triage report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Critical,
    High,
    Medium,
    Low,
    Informational,
    Unknown,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Critical => "critical",
            RiskLevel::High => "high",
            RiskLevel::Medium => "medium",
            RiskLevel::Low => "low",
            RiskLevel::Informational => "informational",
            RiskLevel::Unknown => "unknown",
        }
    }

    /// Bonus applied to the triage score stored on the Alert graph node.
    pub fn score_bonus(&self) -> u32 {
        match self {
            RiskLevel::Critical => 36,
            RiskLevel::High => 24,
            RiskLevel::Medium => 12,
            RiskLevel::Low => 4,
            RiskLevel::Informational | RiskLevel::Unknown => 0,
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Counts of retrieval tasks by kind, recorded in the enrichment.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PlanSummary {
    pub vector_knn: usize,
    pub keyword_time_window: usize,
    pub cypher_template: usize,
}

/// Outcome of the knowledge-graph write for one alert.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct GraphStats {
    pub entities_created: u64,
    pub relationships_created: u64,
    pub edges_skipped: u64,
    pub persisted: bool,
}

/// The triage block written back onto the alert document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiAnalysis {
    pub report_text: String,
    pub provider_id: String,
    pub timestamp: DateTime<Utc>,
    pub risk_level: RiskLevel,
    pub plan_summary: PlanSummary,
    pub graph_stats: GraphStats,
    pub similar_alerts_count: usize,
    pub processing_ms: u64,
    pub stage_marker: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_alert() -> Alert {
        serde_json::from_value(json!({
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
        .unwrap()
    }

    #[test]
    fn test_deserialize_numeric_rule_id() {
        let alert = sample_alert();
        assert_eq!(alert.rule.as_ref().unwrap().id.as_deref(), Some("100002"));
        assert_eq!(alert.rule_level(), 8);
    }

    #[test]
    fn test_validate_accepts_complete_alert() {
        let mut alert = sample_alert();
        alert.id = "a1".to_string();
        assert!(alert.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bare_alert() {
        let alert = Alert {
            id: "a3".to_string(),
            ..Default::default()
        };
        let err = alert.validate().unwrap_err();
        assert!(matches!(err, AlertError::MissingField("rule")));
    }

    #[test]
    fn test_field_accessors() {
        let alert = sample_alert();
        assert_eq!(alert.src_ip(), Some("203.0.113.45"));
        assert_eq!(alert.username(), Some("admin"));
        assert_eq!(alert.host_name(), Some("web-01"));
        assert!(alert.has_group("AUTHENTICATION"));
        assert!(alert.process_name().is_none());
    }

    #[test]
    fn test_summary_contains_core_fields() {
        let summary = sample_alert().summary();
        assert!(summary.contains("SSH brute force attack detected"));
        assert!(summary.contains("Level: 8"));
        assert!(summary.contains("203.0.113.45"));
        assert!(summary.contains("web-01"));
    }

    #[test]
    fn test_match_text_is_lowercased() {
        let text = sample_alert().match_text();
        assert!(text.contains("ssh brute force"));
        assert!(text.contains("authentication"));
    }

    #[test]
    fn test_risk_level_display() {
        assert_eq!(RiskLevel::Critical.to_string(), "critical");
        assert_eq!(RiskLevel::Unknown.as_str(), "unknown");
    }
}
