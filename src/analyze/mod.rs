//! Triage analysis
//!
//! Selects the prompt template from the formatted context, invokes the chat
//! client, and extracts the risk level from the report. An LLM outage
//! produces a structured analysis-failed report instead of an error, so the
//! alert still gets enriched.

use crate::alert::RiskLevel;
use crate::context::FormattedContext;
use crate::llm::{ChatClient, ChatMessage, LlmResult};
use std::sync::Arc;
use tracing::{info, warn};

/// How far into the report the risk token is searched for.
const RISK_SCAN_CHARS: usize = 500;

/// Graph-aware analysis prompt.
const GRAPH_TEMPLATE: &str = "\
You are a senior security analyst specializing in graph-based threat hunting. \
Analyze the new alert below by interpreting the threat context graph gathered \
from the security knowledge graph.

**Threat Context Graph (Cypher path notation):**
{graph_context}

**New Alert:**
{alert_summary}

**Your analysis task:**
1. Summarize the core characteristics of the event.
2. Interpret the threat graph: describe attack paths, related entities, and any lateral movement indications.
3. Rate the risk level (Critical/High/Medium/Low/Informational) drawing on the attack patterns the graph reveals.
4. Give a concrete recommendation that references the specific graph entities involved.

**Your threat analysis report:**
";

/// Plain analysis prompt used when no graph evidence is available.
const PLAIN_TEMPLATE: &str = "\
You are a senior security analyst with expertise in correlating security \
events with system performance data. Analyze the new alert below using the \
provided multi-source context.

**Historical Similar Alerts:**
{similar_alerts_context}

**Correlated System Metrics:**
{system_metrics_context}

**Process Information:**
{process_context}

**Network Data:**
{network_context}

**Additional Context:**
{additional_context}

**New Alert:**
{alert_summary}

**Your analysis task:**
1. Summarize the core characteristics of the event.
2. Correlate the alert with the contextual information above.
3. Rate the risk level (Critical/High/Medium/Low/Informational) considering all available context.
4. Give an actionable recommendation based on the correlated evidence.

**Your triage report:**
";

/// The analyzer's output for one alert.
#[derive(Debug, Clone)]
pub struct TriageReport {
    pub text: String,
    pub risk_level: RiskLevel,
    pub provider_id: String,
    pub tokens_in: u64,
    pub tokens_out: u64,
    /// True when this is an analysis-failed placeholder report
    pub failed: bool,
}

/// Template selection plus LLM dispatch.
pub struct Analyzer {
    llm: Arc<ChatClient>,
}

impl Analyzer {
    pub fn new(llm: Arc<ChatClient>) -> Self {
        Self { llm }
    }

    /// Analyze one alert. Never fails: LLM outages produce an
    /// analysis-failed report with `risk_level = unknown`.
    pub async fn analyze(&self, alert_summary: &str, context: &FormattedContext) -> TriageReport {
        let prompt = render_prompt(alert_summary, context);

        match self.complete(&prompt).await {
            Ok(completion) => {
                let risk_level = extract_risk_level(&completion.text);
                info!(risk = %risk_level, graph = context.graph_present, "analysis complete");
                TriageReport {
                    text: completion.text,
                    risk_level,
                    provider_id: completion.provider_id,
                    tokens_in: completion.tokens_in,
                    tokens_out: completion.tokens_out,
                    failed: false,
                }
            }
            Err(e) => {
                warn!(error = %e, "analysis failed, writing placeholder report");
                TriageReport {
                    text: format!(
                        "AI analysis failed: {}. The alert was enriched without a triage \
                         report and should be reviewed manually.",
                        e
                    ),
                    risk_level: RiskLevel::Unknown,
                    provider_id: self.llm.provider_id(),
                    tokens_in: 0,
                    tokens_out: 0,
                    failed: true,
                }
            }
        }
    }

    async fn complete(&self, prompt: &str) -> LlmResult<crate::llm::Completion> {
        self.llm.complete(&[ChatMessage::user(prompt)]).await
    }
}

/// Render the selected template with the formatted slots.
fn render_prompt(alert_summary: &str, context: &FormattedContext) -> String {
    if context.graph_present {
        GRAPH_TEMPLATE
            .replace("{graph_context}", &context.graph_context)
            .replace("{alert_summary}", alert_summary)
    } else {
        PLAIN_TEMPLATE
            .replace("{similar_alerts_context}", &context.similar_alerts_context)
            .replace("{system_metrics_context}", &context.system_metrics_context)
            .replace("{process_context}", &context.process_context)
            .replace("{network_context}", &context.network_context)
            .replace("{additional_context}", &context.additional_context)
            .replace("{alert_summary}", alert_summary)
    }
}

/// Extract the risk level: the earliest case-insensitive severity token
/// within the head of the report wins.
pub fn extract_risk_level(report: &str) -> RiskLevel {
    let head: String = report.chars().take(RISK_SCAN_CHARS).collect();
    let head = head.to_lowercase();

    let candidates = [
        ("critical", RiskLevel::Critical),
        ("high", RiskLevel::High),
        ("medium", RiskLevel::Medium),
        ("low", RiskLevel::Low),
        ("informational", RiskLevel::Informational),
    ];

    candidates
        .iter()
        .filter_map(|(token, level)| head.find(token).map(|pos| (pos, *level)))
        .min_by_key(|(pos, _)| *pos)
        .map(|(_, level)| level)
        .unwrap_or(RiskLevel::Unknown)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LlmConfig;
    use crate::llm::ChatProvider;

    fn empty_context(graph_present: bool) -> FormattedContext {
        FormattedContext {
            graph_present,
            graph_context: "(IP:203.0.113.45) -[HAS_SOURCE_IP]-> (Alert:a0)".to_string(),
            similar_alerts_context: "No relevant historical alerts found.".to_string(),
            system_metrics_context: String::new(),
            process_context: String::new(),
            network_context: String::new(),
            additional_context: String::new(),
        }
    }

    fn analyzer(model: &str) -> Analyzer {
        let client = ChatClient::new(LlmConfig {
            provider: ChatProvider::Mock,
            model: model.to_string(),
            retry_delay: std::time::Duration::from_millis(1),
            ..Default::default()
        })
        .unwrap();
        Analyzer::new(Arc::new(client))
    }

    #[test]
    fn test_template_selection() {
        let graph_prompt = render_prompt("summary", &empty_context(true));
        assert!(graph_prompt.contains("Threat Context Graph"));
        assert!(graph_prompt.contains("(IP:203.0.113.45)"));

        let plain_prompt = render_prompt("summary", &empty_context(false));
        assert!(plain_prompt.contains("Historical Similar Alerts"));
        assert!(!plain_prompt.contains("Threat Context Graph"));
    }

    #[test]
    fn test_rendered_prompt_has_no_leftover_placeholders() {
        for graph in [true, false] {
            let prompt = render_prompt("summary", &empty_context(graph));
            assert!(!prompt.contains("{alert_summary}"));
            assert!(!prompt.contains("{graph_context}"));
            assert!(!prompt.contains("{similar_alerts_context}"));
        }
    }

    #[test]
    fn test_risk_extraction_first_token_wins() {
        assert_eq!(
            extract_risk_level("Risk Level: HIGH. Could become critical."),
            RiskLevel::High
        );
        assert_eq!(
            extract_risk_level("This is Critical, not medium"),
            RiskLevel::Critical
        );
        assert_eq!(extract_risk_level("nothing to see here"), RiskLevel::Unknown);
    }

    #[test]
    fn test_risk_extraction_only_scans_head() {
        let report = format!("{}{}", "x".repeat(600), "critical");
        assert_eq!(extract_risk_level(&report), RiskLevel::Unknown);
    }

    #[tokio::test]
    async fn test_analysis_success() {
        let report = analyzer("mock")
            .analyze("Rule: test", &empty_context(false))
            .await;
        assert!(!report.failed);
        assert_eq!(report.risk_level, RiskLevel::Medium);
        assert!(report.tokens_out > 0);
    }

    #[tokio::test]
    async fn test_analysis_failure_produces_placeholder() {
        let report = analyzer("fail")
            .analyze("Rule: test", &empty_context(true))
            .await;
        assert!(report.failed);
        assert_eq!(report.risk_level, RiskLevel::Unknown);
        assert!(report.text.contains("AI analysis failed"));
    }
}
