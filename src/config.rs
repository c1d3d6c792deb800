//! Engine configuration
//!
//! All settings are loadable from the environment with sane defaults, and
//! every struct can also be built directly so tests construct configs
//! without touching the process environment.

use crate::embed::EmbedProvider;
use crate::llm::ChatProvider;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

/// Vector store (SIEM index) connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorStoreConfig {
    pub url: String,
    pub username: String,
    pub password: String,
    /// Index pattern queried for alerts
    pub index_pattern: String,
    /// Accept self-signed certificates (the SIEM indexer ships with them)
    pub insecure_tls: bool,
    pub timeout: Duration,
}

impl Default for VectorStoreConfig {
    fn default() -> Self {
        Self {
            url: "https://wazuh.indexer:9200".to_string(),
            username: "admin".to_string(),
            password: "SecretPassword".to_string(),
            index_pattern: "wazuh-alerts-*".to_string(),
            insecure_tls: true,
            timeout: Duration::from_secs(5),
        }
    }
}

/// Graph store connection settings. Absent entirely when the deployment
/// runs without a graph database; the engine then stays in degraded mode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphStoreConfig {
    pub url: String,
    pub username: String,
    pub password: String,
    pub database: String,
    /// Per-template query timeout
    pub timeout: Duration,
}

impl Default for GraphStoreConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:7474".to_string(),
            username: "neo4j".to_string(),
            password: String::new(),
            database: "neo4j".to_string(),
            timeout: Duration::from_secs(30),
        }
    }
}

/// Embedding provider settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    pub provider: EmbedProvider,
    pub model: String,
    pub api_key: Option<String>,
    pub api_base_url: Option<String>,
    /// Output dimension; longer provider vectors are prefix-truncated
    pub dimension: usize,
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub timeout: Duration,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: EmbedProvider::Gemini,
            model: "models/text-embedding-004".to_string(),
            api_key: None,
            api_base_url: None,
            dimension: 768,
            max_retries: 3,
            retry_delay: Duration::from_secs(1),
            timeout: Duration::from_secs(10),
        }
    }
}

/// Chat (LLM) provider settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    pub provider: ChatProvider,
    pub model: String,
    pub api_key: Option<String>,
    pub api_base_url: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub timeout: Duration,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: ChatProvider::Anthropic,
            model: "claude-3-haiku-20240307".to_string(),
            api_key: None,
            api_base_url: None,
            temperature: 0.2,
            max_tokens: 2048,
            max_retries: 3,
            retry_delay: Duration::from_secs(1),
            timeout: Duration::from_secs(25),
        }
    }
}

/// Pipeline tuning knobs shared by the scheduler, retriever and persister.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub interval: Duration,
    pub batch_size: usize,
    pub alert_concurrency: usize,
    pub retrieval_concurrency: usize,
    /// k-NN neighbours fetched for the similar-alerts slot
    pub knn_k: usize,
    /// Per-slot record ceiling in the context bundle
    pub result_cap: usize,
    /// Minimum graph records before the keyword fallback kicks in
    pub graph_minimum: usize,
    /// PRECEDES correlation window
    pub correlation_window: Duration,
    /// SIMILAR_TO edge threshold
    pub similarity_threshold: f64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            batch_size: 10,
            alert_concurrency: 5,
            retrieval_concurrency: 8,
            knn_k: 5,
            result_cap: 50,
            graph_minimum: 10,
            correlation_window: Duration::from_secs(1800),
            similarity_threshold: 0.7,
        }
    }
}

/// Top-level engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    pub vector_store: VectorStoreConfig,
    /// `None` disables the knowledge graph entirely
    pub graph_store: Option<GraphStoreConfig>,
    pub embedding: EmbeddingConfig,
    pub llm: LlmConfig,
    pub pipeline: PipelineConfig,
}

impl Config {
    /// Load configuration from the environment, defaulting every field.
    pub fn from_env() -> Self {
        let vector_store = VectorStoreConfig {
            url: env_or("OPENSEARCH_URL", "https://wazuh.indexer:9200"),
            username: env_or("OPENSEARCH_USER", "admin"),
            password: env_or("OPENSEARCH_PASSWORD", "SecretPassword"),
            index_pattern: env_or("ALERT_INDEX_PATTERN", "wazuh-alerts-*"),
            insecure_tls: env_bool("OPENSEARCH_INSECURE_TLS", true),
            timeout: Duration::from_secs(env_u64("VECTOR_STORE_TIMEOUT_SECONDS", 5)),
        };

        // The graph store is optional: no URI means the engine runs
        // vector-only from the start.
        let graph_store = env::var("NEO4J_URI").ok().map(|url| GraphStoreConfig {
            url,
            username: env_or("NEO4J_USER", "neo4j"),
            password: env_or("NEO4J_PASSWORD", ""),
            database: env_or("NEO4J_DATABASE", "neo4j"),
            timeout: Duration::from_secs(env_u64("GRAPH_STORE_TIMEOUT_SECONDS", 30)),
        });

        let embedding = EmbeddingConfig {
            provider: match env_or("EMBEDDING_PROVIDER", "gemini").to_lowercase().as_str() {
                "openai" => EmbedProvider::OpenAI,
                "mock" => EmbedProvider::Mock,
                _ => EmbedProvider::Gemini,
            },
            model: env_or("EMBEDDING_MODEL", "models/text-embedding-004"),
            api_key: env::var("GOOGLE_API_KEY")
                .or_else(|_| env::var("EMBEDDING_API_KEY"))
                .ok(),
            api_base_url: env::var("EMBEDDING_API_BASE_URL").ok(),
            dimension: env_u64("EMBEDDING_DIMENSION", 768) as usize,
            max_retries: env_u64("EMBEDDING_MAX_RETRIES", 3) as u32,
            retry_delay: Duration::from_secs(env_u64("EMBEDDING_RETRY_DELAY_SECONDS", 1)),
            timeout: Duration::from_secs(env_u64("EMBEDDING_TIMEOUT_SECONDS", 10)),
        };

        let llm = LlmConfig {
            provider: match env_or("LLM_PROVIDER", "anthropic").to_lowercase().as_str() {
                "gemini" => ChatProvider::Gemini,
                "mock" => ChatProvider::Mock,
                _ => ChatProvider::Anthropic,
            },
            model: env_or("LLM_MODEL", "claude-3-haiku-20240307"),
            api_key: env::var("ANTHROPIC_API_KEY")
                .or_else(|_| env::var("GEMINI_API_KEY"))
                .ok(),
            api_base_url: env::var("LLM_API_BASE_URL").ok(),
            temperature: 0.2,
            max_tokens: 2048,
            max_retries: env_u64("LLM_MAX_RETRIES", 3) as u32,
            retry_delay: Duration::from_secs(env_u64("LLM_RETRY_DELAY_SECONDS", 1)),
            timeout: Duration::from_secs(env_u64("LLM_TIMEOUT_SECONDS", 25)),
        };

        let pipeline = PipelineConfig {
            interval: Duration::from_secs(env_u64("SCHEDULER_INTERVAL_SECONDS", 60)),
            batch_size: env_u64("BATCH_SIZE", 10) as usize,
            alert_concurrency: env_u64("ALERT_CONCURRENCY", 5) as usize,
            retrieval_concurrency: env_u64("RETRIEVAL_CONCURRENCY", 8) as usize,
            knn_k: env_u64("VECTOR_SEARCH_K", 5) as usize,
            result_cap: env_u64("RESULT_CAP", 50) as usize,
            graph_minimum: env_u64("GRAPH_MINIMUM", 10) as usize,
            correlation_window: Duration::from_secs(env_u64("CORRELATION_WINDOW_SECONDS", 1800)),
            similarity_threshold: env_f64("SIMILARITY_THRESHOLD", 0.7),
        };

        Self {
            vector_store,
            graph_store,
            embedding,
            llm,
            pipeline,
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_f64(key: &str, default: f64) -> f64 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipeline_defaults() {
        let cfg = PipelineConfig::default();
        assert_eq!(cfg.interval, Duration::from_secs(60));
        assert_eq!(cfg.batch_size, 10);
        assert_eq!(cfg.alert_concurrency, 5);
        assert_eq!(cfg.retrieval_concurrency, 8);
        assert_eq!(cfg.knn_k, 5);
        assert_eq!(cfg.result_cap, 50);
        assert_eq!(cfg.graph_minimum, 10);
        assert_eq!(cfg.similarity_threshold, 0.7);
    }

    #[test]
    fn test_llm_defaults_are_bounded() {
        let cfg = LlmConfig::default();
        assert!(cfg.temperature <= 0.2);
        assert!(cfg.max_tokens <= 2048);
    }
}
