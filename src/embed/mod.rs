//! Alert embedding
//!
//! Projects an alert into a compact textual form and turns it into a
//! fixed-dimension vector through the configured provider. Provider vectors
//! wider than the configured dimension are prefix-truncated and
//! re-normalized (Matryoshka-style).

pub mod client;

pub use client::EmbeddingClient;

use crate::alert::Alert;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Longest text sent to an embedding provider.
pub const MAX_EMBED_CHARS: usize = 8000;

/// Embedding errors
#[derive(Error, Debug)]
pub enum EmbedError {
    /// Provider rejected the request
    #[error("embedding API error: {0}")]
    Api(String),

    /// Configuration error
    #[error("embedding configuration error: {0}")]
    Config(String),

    /// Network error
    #[error("embedding network error: {0}")]
    Network(String),

    /// Response body did not parse
    #[error("embedding serialization error: {0}")]
    Serialization(String),

    /// Retries exhausted; the provider is treated as down
    #[error("embedding provider unavailable: {0}")]
    Unavailable(String),
}

pub type EmbedResult<T> = Result<T, EmbedError>;

/// Embedding provider options
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum EmbedProvider {
    Gemini,
    OpenAI,
    /// Deterministic offline vectors, for tests and local smoke runs
    Mock,
}

/// One embedding result with the provider-side token count.
#[derive(Debug, Clone)]
pub struct Embedding {
    pub vector: Vec<f32>,
    pub tokens_in: u64,
}

/// Project an alert into the text that gets embedded.
///
/// Field order matters for determinism: identical alerts must produce
/// identical vectors across runs.
pub fn alert_text(alert: &Alert) -> String {
    let mut parts: Vec<String> = Vec::new();

    if let Some(rule) = &alert.rule {
        if !rule.description.is_empty() {
            parts.push(format!("rule: {}", rule.description));
        }
        parts.push(format!("level: {}", rule.level));
        if let Some(id) = &rule.id {
            parts.push(format!("rule id: {}", id));
        }
        if !rule.groups.is_empty() {
            parts.push(format!("groups: {}", rule.groups.join(", ")));
        }
    }

    if let Some(host) = alert.host_name() {
        parts.push(format!("host: {}", host));
    }

    for field in [
        "srcip", "dstip", "srcport", "dstport", "protocol", "url", "user", "command", "process",
        "file",
    ] {
        if let Some(value) = alert.data_str(field) {
            parts.push(format!("{}: {}", field, value));
        }
    }

    if let Some(location) = &alert.location {
        parts.push(format!("location: {}", location));
    }
    if let Some(decoder) = alert.decoder.as_ref().and_then(|d| d.name.as_deref()) {
        parts.push(format!("decoder: {}", decoder));
    }
    if let Some(full_log) = &alert.full_log {
        parts.push(format!("log: {}", truncate_chars(full_log, MAX_EMBED_CHARS)));
    }

    let text = parts.join(" | ");
    if text.is_empty() {
        return "unknown alert".to_string();
    }
    truncate_chars(&text, MAX_EMBED_CHARS)
}

/// Truncate a provider vector to `dimension` and re-normalize.
///
/// Vectors already at or below the target width pass through untouched.
pub fn fit_dimension(mut vector: Vec<f32>, dimension: usize) -> Vec<f32> {
    if vector.len() <= dimension {
        return vector;
    }
    vector.truncate(dimension);
    l2_normalize(&mut vector);
    vector
}

pub fn l2_normalize(vector: &mut [f32]) {
    let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in vector.iter_mut() {
            *v /= norm;
        }
    }
}

fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}
