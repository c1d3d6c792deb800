//! Typed evidence bundle for one alert
//!
//! The bundle maps a closed set of slots to evidence records. Slots are known
//! at compile time; routing a record to an unknown slot cannot be expressed.

use crate::context::path::GraphPath;
use crate::plan::templates::TemplateName;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;

/// Evidence slots in the context bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Slot {
    SimilarAlerts,
    AttackPaths,
    LateralMovement,
    TemporalSequences,
    IpReputation,
    UserBehavior,
    ProcessChains,
    FileInteractions,
    NetworkTopology,
    ThreatLandscape,
    HostMetrics,
    ProcessData,
    NetworkLogs,
    ProtocolLogs,
}

impl Slot {
    pub fn name(&self) -> &'static str {
        match self {
            Slot::SimilarAlerts => "similar_alerts",
            Slot::AttackPaths => "attack_paths",
            Slot::LateralMovement => "lateral_movement",
            Slot::TemporalSequences => "temporal_sequences",
            Slot::IpReputation => "ip_reputation",
            Slot::UserBehavior => "user_behavior",
            Slot::ProcessChains => "process_chains",
            Slot::FileInteractions => "file_interactions",
            Slot::NetworkTopology => "network_topology",
            Slot::ThreatLandscape => "threat_landscape",
            Slot::HostMetrics => "host_metrics",
            Slot::ProcessData => "process_data",
            Slot::NetworkLogs => "network_logs",
            Slot::ProtocolLogs => "protocol_logs",
        }
    }

    /// Slots populated by graph traversal templates.
    pub fn is_graph(&self) -> bool {
        matches!(
            self,
            Slot::AttackPaths
                | Slot::LateralMovement
                | Slot::TemporalSequences
                | Slot::IpReputation
                | Slot::UserBehavior
                | Slot::ProcessChains
                | Slot::FileInteractions
                | Slot::NetworkTopology
                | Slot::ThreatLandscape
        )
    }

    /// Slots whose presence switches the analyzer to the graph-aware prompt.
    pub fn drives_graph_prompt(&self) -> bool {
        matches!(
            self,
            Slot::AttackPaths | Slot::LateralMovement | Slot::TemporalSequences | Slot::ProcessChains
        )
    }

    pub const ALL: [Slot; 14] = [
        Slot::SimilarAlerts,
        Slot::AttackPaths,
        Slot::LateralMovement,
        Slot::TemporalSequences,
        Slot::IpReputation,
        Slot::UserBehavior,
        Slot::ProcessChains,
        Slot::FileInteractions,
        Slot::NetworkTopology,
        Slot::ThreatLandscape,
        Slot::HostMetrics,
        Slot::ProcessData,
        Slot::NetworkLogs,
        Slot::ProtocolLogs,
    ];
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Where an evidence record came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EvidenceSource {
    VectorKnn,
    KeywordTimeWindow,
    Graph(TemplateName),
}

/// One piece of retrieved evidence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvidenceRecord {
    pub source: EvidenceSource,
    /// Similarity or relevance score, when the source produces one
    pub score: Option<f64>,
    /// Historical alert id, when the record is alert-shaped
    pub alert_id: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
    /// Original document fields the formatter renders from
    pub fields: Value,
    /// Flattened traversal paths, for graph-sourced records
    pub paths: Vec<GraphPath>,
}

impl EvidenceRecord {
    pub fn new(source: EvidenceSource) -> Self {
        Self {
            source,
            score: None,
            alert_id: None,
            timestamp: None,
            fields: Value::Null,
            paths: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default)]
struct SlotData {
    records: Vec<EvidenceRecord>,
    failed: bool,
}

/// The per-alert evidence bundle.
///
/// Each slot holds at most `result_cap` records; retrieval failures are
/// recorded against the slot instead of propagating.
#[derive(Debug, Clone)]
pub struct ContextBundle {
    slots: HashMap<Slot, SlotData>,
    result_cap: usize,
}

impl ContextBundle {
    pub fn new(result_cap: usize) -> Self {
        Self {
            slots: HashMap::new(),
            result_cap,
        }
    }

    /// Append records to a slot, dropping anything past the cap.
    pub fn extend(&mut self, slot: Slot, records: impl IntoIterator<Item = EvidenceRecord>) {
        let data = self.slots.entry(slot).or_default();
        for record in records {
            if data.records.len() >= self.result_cap {
                break;
            }
            data.records.push(record);
        }
    }

    /// Record a task failure against its slot.
    pub fn mark_failed(&mut self, slot: Slot) {
        self.slots.entry(slot).or_default().failed = true;
    }

    pub fn records(&self, slot: Slot) -> &[EvidenceRecord] {
        self.slots
            .get(&slot)
            .map(|d| d.records.as_slice())
            .unwrap_or(&[])
    }

    pub fn failed(&self, slot: Slot) -> bool {
        self.slots.get(&slot).map(|d| d.failed).unwrap_or(false)
    }

    pub fn len(&self, slot: Slot) -> usize {
        self.records(slot).len()
    }

    pub fn total_records(&self) -> usize {
        Slot::ALL.iter().map(|s| self.len(*s)).sum()
    }

    /// Total records across all graph-sourced slots.
    pub fn graph_hit_count(&self) -> usize {
        Slot::ALL
            .iter()
            .filter(|s| s.is_graph())
            .map(|s| self.len(*s))
            .sum()
    }

    /// Whether the graph-aware prompt should be selected.
    pub fn graph_present(&self) -> bool {
        Slot::ALL
            .iter()
            .any(|s| s.drives_graph_prompt() && self.len(*s) > 0)
    }
}
