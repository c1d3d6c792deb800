//! Embedding client for the supported providers

use super::{alert_text, fit_dimension, EmbedError, EmbedProvider, EmbedResult, Embedding};
use crate::alert::Alert;
use crate::config::EmbeddingConfig;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Client for turning alert text into vectors.
///
/// Transient provider failures (network errors, 429, 5xx) are retried with
/// exponential backoff; exhaustion surfaces as [`EmbedError::Unavailable`].
pub struct EmbeddingClient {
    client: Client,
    config: EmbeddingConfig,
    api_base_url: String,
}

impl EmbeddingClient {
    pub fn new(config: EmbeddingConfig) -> EmbedResult<Self> {
        if config.dimension == 0 {
            return Err(EmbedError::Config(
                "embedding dimension must be at least 1".to_string(),
            ));
        }

        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| EmbedError::Config(e.to_string()))?;

        let api_base_url = config.api_base_url.clone().unwrap_or_else(|| {
            match config.provider {
                EmbedProvider::Gemini => {
                    "https://generativelanguage.googleapis.com/v1beta".to_string()
                }
                EmbedProvider::OpenAI => "https://api.openai.com/v1".to_string(),
                EmbedProvider::Mock => String::new(),
            }
        });

        Ok(Self {
            client,
            config,
            api_base_url,
        })
    }

    pub fn dimension(&self) -> usize {
        self.config.dimension
    }

    /// Embed one piece of text, retrying transient failures.
    pub async fn embed(&self, text: &str) -> EmbedResult<Embedding> {
        let text = if text.trim().is_empty() { "empty content" } else { text };

        let mut last_error = EmbedError::Unavailable("no attempt made".to_string());
        for attempt in 0..self.config.max_retries {
            match self.embed_once(text).await {
                Ok(embedding) => {
                    debug!(dimension = embedding.vector.len(), "embedding generated");
                    return Ok(embedding);
                }
                Err(e @ (EmbedError::Network(_) | EmbedError::Unavailable(_))) => {
                    let wait = self.config.retry_delay * 2u32.pow(attempt);
                    warn!(
                        attempt = attempt + 1,
                        max = self.config.max_retries,
                        error = %e,
                        "embedding attempt failed, backing off {:?}",
                        wait
                    );
                    last_error = e;
                    if attempt + 1 < self.config.max_retries {
                        tokio::time::sleep(wait).await;
                    }
                }
                Err(e) => return Err(e),
            }
        }

        Err(EmbedError::Unavailable(last_error.to_string()))
    }

    /// Embed an alert through its textual projection.
    pub async fn embed_alert(&self, alert: &Alert) -> EmbedResult<Embedding> {
        self.embed(&alert_text(alert)).await
    }

    async fn embed_once(&self, text: &str) -> EmbedResult<Embedding> {
        let raw = match self.config.provider {
            EmbedProvider::Gemini => self.gemini_embed(text).await?,
            EmbedProvider::OpenAI => self.openai_embed(text).await?,
            EmbedProvider::Mock => self.mock_embed(text),
        };
        Ok(Embedding {
            vector: fit_dimension(raw.vector, self.config.dimension),
            tokens_in: raw.tokens_in,
        })
    }

    async fn gemini_embed(&self, text: &str) -> EmbedResult<Embedding> {
        #[derive(Serialize)]
        struct Part<'a> {
            text: &'a str,
        }

        #[derive(Serialize)]
        struct Content<'a> {
            parts: Vec<Part<'a>>,
        }

        #[derive(Serialize)]
        #[serde(rename_all = "camelCase")]
        struct Request<'a> {
            model: String,
            content: Content<'a>,
            output_dimensionality: usize,
        }

        #[derive(Deserialize)]
        struct Response {
            embedding: EmbeddingValues,
        }

        #[derive(Deserialize)]
        struct EmbeddingValues {
            values: Vec<f32>,
        }

        let api_key = self
            .config
            .api_key
            .as_ref()
            .ok_or_else(|| EmbedError::Config("Gemini requires an API key".to_string()))?;

        let url = format!(
            "{}/models/{}:embedContent?key={}",
            self.api_base_url,
            self.config.model.trim_start_matches("models/"),
            api_key
        );

        let resp = self
            .client
            .post(&url)
            .json(&Request {
                model: format!("models/{}", self.config.model.trim_start_matches("models/")),
                content: Content {
                    parts: vec![Part { text }],
                },
                output_dimensionality: self.config.dimension,
            })
            .send()
            .await
            .map_err(|e| EmbedError::Network(e.to_string()))?;

        let status = resp.status();
        if status.as_u16() == 429 || status.is_server_error() {
            return Err(EmbedError::Unavailable(format!("Gemini returned {}", status)));
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(EmbedError::Api(format!("Gemini returned error: {}", body)));
        }

        let result: Response = resp
            .json()
            .await
            .map_err(|e| EmbedError::Serialization(e.to_string()))?;

        Ok(Embedding {
            vector: result.embedding.values,
            tokens_in: estimate_tokens(text),
        })
    }

    async fn openai_embed(&self, text: &str) -> EmbedResult<Embedding> {
        #[derive(Serialize)]
        struct Request<'a> {
            input: Vec<&'a str>,
            model: &'a str,
        }

        #[derive(Deserialize)]
        struct Response {
            data: Vec<Data>,
            usage: Option<Usage>,
        }

        #[derive(Deserialize)]
        struct Data {
            embedding: Vec<f32>,
        }

        #[derive(Deserialize)]
        struct Usage {
            prompt_tokens: u64,
        }

        let api_key = self
            .config
            .api_key
            .as_ref()
            .ok_or_else(|| EmbedError::Config("OpenAI requires an API key".to_string()))?;

        let url = format!("{}/embeddings", self.api_base_url);
        let resp = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", api_key))
            .json(&Request {
                input: vec![text],
                model: &self.config.model,
            })
            .send()
            .await
            .map_err(|e| EmbedError::Network(e.to_string()))?;

        let status = resp.status();
        if status.as_u16() == 429 || status.is_server_error() {
            return Err(EmbedError::Unavailable(format!("OpenAI returned {}", status)));
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(EmbedError::Api(format!("OpenAI returned error: {}", body)));
        }

        let result: Response = resp
            .json()
            .await
            .map_err(|e| EmbedError::Serialization(e.to_string()))?;

        let tokens_in = result
            .usage
            .map(|u| u.prompt_tokens)
            .unwrap_or_else(|| estimate_tokens(text));
        let vector = result
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| EmbedError::Api("OpenAI returned no embedding".to_string()))?;

        Ok(Embedding { vector, tokens_in })
    }

    /// Deterministic offline vector: seeded from a rolling hash of the text,
    /// always L2-normalized so repeated runs are byte-identical.
    fn mock_embed(&self, text: &str) -> Embedding {
        let mut state: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in text.bytes() {
            state ^= u64::from(byte);
            state = state.wrapping_mul(0x0000_0100_0000_01b3);
        }

        let mut vector = Vec::with_capacity(self.config.dimension);
        for i in 0..self.config.dimension {
            state = state
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407 ^ i as u64);
            let unit = (state >> 11) as f64 / (1u64 << 53) as f64;
            vector.push((unit * 2.0 - 1.0) as f32);
        }
        super::l2_normalize(&mut vector);

        Embedding {
            vector,
            tokens_in: estimate_tokens(text),
        }
    }
}

fn estimate_tokens(text: &str) -> u64 {
    (text.len() as u64 / 4).max(1)
}
