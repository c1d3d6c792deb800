//! Context formatting
//!
//! Renders the evidence bundle into the string slots the prompt templates
//! expect. Graph evidence becomes Cypher-path notation lines; everything
//! else becomes bulleted text blocks. Pure string work, cannot fail.

pub mod path;

use crate::retrieve::bundle::{ContextBundle, EvidenceRecord, Slot};

/// Per-record cap on quoted prior reports.
const REPORT_SNIPPET_CAP: usize = 400;

/// Total cap on the rendered graph block.
const GRAPH_BLOCK_CAP: usize = 4000;

/// Marker appended when the graph block is cut off.
const TRUNCATION_MARKER: &str = "... [graph context truncated]";

/// Cap on synthesized fallback lines when no real graph evidence exists.
const FALLBACK_LINE_CAP: usize = 10;

/// Graph slots in rendering order, with their analysis-dimension headers.
const GRAPH_SECTIONS: [(Slot, &str); 9] = [
    (Slot::AttackPaths, "Attack Paths"),
    (Slot::LateralMovement, "Lateral Movement"),
    (Slot::TemporalSequences, "Temporal Sequences"),
    (Slot::ProcessChains, "Process Chains"),
    (Slot::FileInteractions, "File Interactions"),
    (Slot::NetworkTopology, "Network Topology"),
    (Slot::UserBehavior, "User Behavior"),
    (Slot::IpReputation, "IP Reputation"),
    (Slot::ThreatLandscape, "Threat Landscape"),
];

/// The rendered prompt inputs for one alert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormattedContext {
    /// Whether the graph-aware prompt should be used
    pub graph_present: bool,
    pub graph_context: String,
    pub similar_alerts_context: String,
    pub system_metrics_context: String,
    pub process_context: String,
    pub network_context: String,
    pub additional_context: String,
}

/// Render the bundle into prompt slots.
pub fn format_bundle(bundle: &ContextBundle) -> FormattedContext {
    let graph_present = bundle.graph_present();

    let mut additional = render_plain_block(bundle.records(Slot::ProtocolLogs));
    if !graph_present {
        let fallback = degenerate_paths(bundle);
        if !fallback.is_empty() {
            if !additional.is_empty() {
                additional.push('\n');
            }
            additional.push_str("Entity relations observed in similar alerts:\n");
            additional.push_str(&fallback.join("\n"));
        }
    }

    FormattedContext {
        graph_present,
        graph_context: if graph_present {
            render_graph_block(bundle)
        } else {
            String::new()
        },
        similar_alerts_context: render_similar_alerts(bundle.records(Slot::SimilarAlerts)),
        system_metrics_context: render_plain_block(bundle.records(Slot::HostMetrics)),
        process_context: render_plain_block(bundle.records(Slot::ProcessData)),
        network_context: render_plain_block(bundle.records(Slot::NetworkLogs)),
        additional_context: additional,
    }
}

/// Historical alerts with their prior triage reports.
fn render_similar_alerts(records: &[EvidenceRecord]) -> String {
    if records.is_empty() {
        return "No relevant historical alerts found.".to_string();
    }

    let mut blocks = Vec::with_capacity(records.len());
    for (i, record) in records.iter().enumerate() {
        let source = &record.fields;
        let timestamp = record
            .timestamp
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "unknown time".to_string());
        let host = source["agent"]["name"].as_str().unwrap_or("unknown");
        let rule = source["rule"]["description"].as_str().unwrap_or("N/A");
        let level = &source["rule"]["level"];
        let prior = source["ai_analysis"]["report_text"]
            .as_str()
            .unwrap_or("No previous analysis available");
        let score = record
            .score
            .map(|s| format!("{:.3}", s))
            .unwrap_or_else(|| "N/A".to_string());

        blocks.push(format!(
            "{}. [{}] host={} rule={} (level {})\n   prior analysis: {}\n   similarity: {}",
            i + 1,
            timestamp,
            host,
            rule,
            level,
            snippet(prior, REPORT_SNIPPET_CAP),
            score
        ));
    }
    blocks.join("\n")
}

/// Generic bulleted rendering for keyword-sourced evidence.
fn render_plain_block(records: &[EvidenceRecord]) -> String {
    if records.is_empty() {
        return String::new();
    }

    records
        .iter()
        .map(|record| {
            let source = &record.fields;
            let timestamp = record
                .timestamp
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| "unknown time".to_string());
            let description = source["rule"]["description"]
                .as_str()
                .or_else(|| source["full_log"].as_str())
                .unwrap_or("(no description)");
            format!("- [{}] {}", timestamp, snippet(description, REPORT_SNIPPET_CAP))
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// The Cypher-path block: one section per populated graph dimension,
/// capped as a whole.
fn render_graph_block(bundle: &ContextBundle) -> String {
    let mut out = String::new();

    'sections: for (slot, header) in GRAPH_SECTIONS {
        let records = bundle.records(slot);
        if records.iter().all(|r| r.paths.is_empty()) {
            continue;
        }

        let section_header = format!("### {}\n", header);
        if out.len() + section_header.len() > GRAPH_BLOCK_CAP {
            out.push_str(TRUNCATION_MARKER);
            break;
        }
        out.push_str(&section_header);

        for record in records {
            for path in &record.paths {
                let line = path.render();
                if out.len() + line.len() + 1 > GRAPH_BLOCK_CAP {
                    out.push_str(TRUNCATION_MARKER);
                    break 'sections;
                }
                out.push_str(&line);
                out.push('\n');
            }
        }
    }

    out.trim_end().to_string()
}

/// When no real graph evidence exists but similar alerts carry entity
/// fields, synthesize a few degenerate notation lines so the model still
/// sees structured relations.
fn degenerate_paths(bundle: &ContextBundle) -> Vec<String> {
    use path::{GraphPath, PathEdge, PathNode};

    let mut lines = Vec::new();
    for record in bundle.records(Slot::SimilarAlerts) {
        if lines.len() >= FALLBACK_LINE_CAP {
            break;
        }
        let source = &record.fields;
        let src_ip = source["data"]["srcip"].as_str();
        let host = source["agent"]["name"].as_str();
        if let (Some(ip), Some(host)) = (src_ip, host) {
            let mut edge = PathEdge::new("OBSERVED_WITH");
            if let Some(score) = record.score {
                edge = edge.summary(format!("similarity {:.2}", score));
            }
            lines.push(
                GraphPath::single(PathNode::new("IP", ip), edge, PathNode::new("Host", host))
                    .render(),
            );
        }
    }
    lines
}

fn snippet(text: &str, cap: usize) -> String {
    if text.chars().count() <= cap {
        text.to_string()
    } else {
        let cut: String = text.chars().take(cap).collect();
        format!("{}...", cut)
    }
}
