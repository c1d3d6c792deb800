//! Chat client for the supported providers

use super::{ChatMessage, ChatProvider, Completion, LlmError, LlmResult};
use crate::config::LlmConfig;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Provider-dispatched chat completion client.
///
/// Each call runs under the configured timeout; transient failures (network
/// errors, 429, 5xx) are retried with doubling backoff before surfacing as
/// [`LlmError::Unavailable`].
pub struct ChatClient {
    client: Client,
    config: LlmConfig,
    api_base_url: String,
}

impl ChatClient {
    pub fn new(config: LlmConfig) -> LlmResult<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| LlmError::Config(e.to_string()))?;

        let api_base_url = config.api_base_url.clone().unwrap_or_else(|| {
            match config.provider {
                ChatProvider::Gemini => {
                    "https://generativelanguage.googleapis.com/v1beta".to_string()
                }
                ChatProvider::Anthropic => "https://api.anthropic.com/v1".to_string(),
                ChatProvider::Mock => String::new(),
            }
        });

        Ok(Self {
            client,
            config,
            api_base_url,
        })
    }

    pub fn provider_id(&self) -> String {
        format!("{}:{}", self.config.provider.as_str(), self.config.model)
    }

    /// Run one chat completion, retrying transient failures.
    pub async fn complete(&self, messages: &[ChatMessage]) -> LlmResult<Completion> {
        let mut last_error = LlmError::Unavailable("no attempt made".to_string());
        for attempt in 0..self.config.max_retries {
            match self.complete_once(messages).await {
                Ok(completion) => {
                    debug!(
                        tokens_in = completion.tokens_in,
                        tokens_out = completion.tokens_out,
                        "completion received"
                    );
                    return Ok(completion);
                }
                Err(e @ (LlmError::Network(_) | LlmError::Unavailable(_))) => {
                    let wait = self.config.retry_delay * 2u32.pow(attempt);
                    warn!(
                        attempt = attempt + 1,
                        max = self.config.max_retries,
                        error = %e,
                        "completion attempt failed, backing off {:?}",
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

        Err(LlmError::Unavailable(last_error.to_string()))
    }

    async fn complete_once(&self, messages: &[ChatMessage]) -> LlmResult<Completion> {
        match self.config.provider {
            ChatProvider::Gemini => self.gemini_chat(messages).await,
            ChatProvider::Anthropic => self.anthropic_chat(messages).await,
            ChatProvider::Mock => self.mock_chat(messages),
        }
    }

    async fn anthropic_chat(&self, messages: &[ChatMessage]) -> LlmResult<Completion> {
        #[derive(Serialize)]
        struct Request<'a> {
            model: &'a str,
            max_tokens: u32,
            temperature: f32,
            #[serde(skip_serializing_if = "Option::is_none")]
            system: Option<String>,
            messages: Vec<&'a ChatMessage>,
        }

        #[derive(Deserialize)]
        struct Response {
            content: Vec<ContentBlock>,
            usage: Usage,
        }

        #[derive(Deserialize)]
        struct ContentBlock {
            #[serde(default)]
            text: String,
        }

        #[derive(Deserialize)]
        struct Usage {
            input_tokens: u64,
            output_tokens: u64,
        }

        let api_key = self
            .config
            .api_key
            .as_ref()
            .ok_or_else(|| LlmError::Config("Anthropic requires an API key".to_string()))?;

        // The messages endpoint takes the system prompt as a dedicated field.
        let system = messages
            .iter()
            .find(|m| m.role == "system")
            .map(|m| m.content.clone());
        let chat: Vec<&ChatMessage> = messages.iter().filter(|m| m.role != "system").collect();

        let url = format!("{}/messages", self.api_base_url);
        let resp = self
            .client
            .post(&url)
            .header("x-api-key", api_key)
            .header("anthropic-version", "2023-06-01")
            .json(&Request {
                model: &self.config.model,
                max_tokens: self.config.max_tokens,
                temperature: self.config.temperature,
                system,
                messages: chat,
            })
            .send()
            .await
            .map_err(|e| LlmError::Network(e.to_string()))?;

        let status = resp.status();
        if status.as_u16() == 429 || status.is_server_error() {
            return Err(LlmError::Unavailable(format!("Anthropic returned {}", status)));
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(LlmError::Api(format!("Anthropic returned error: {}", body)));
        }

        let result: Response = resp
            .json()
            .await
            .map_err(|e| LlmError::Serialization(e.to_string()))?;

        let text = result
            .content
            .into_iter()
            .map(|c| c.text)
            .collect::<Vec<_>>()
            .join("");

        Ok(Completion {
            text,
            tokens_in: result.usage.input_tokens,
            tokens_out: result.usage.output_tokens,
            provider_id: self.provider_id(),
        })
    }

    async fn gemini_chat(&self, messages: &[ChatMessage]) -> LlmResult<Completion> {
        #[derive(Serialize, Deserialize)]
        struct Content {
            #[serde(skip_serializing_if = "Option::is_none")]
            role: Option<String>,
            parts: Vec<Part>,
        }

        #[derive(Serialize, Deserialize)]
        struct Part {
            text: String,
        }

        #[derive(Serialize)]
        #[serde(rename_all = "camelCase")]
        struct Request {
            contents: Vec<Content>,
            generation_config: GenerationConfig,
        }

        #[derive(Serialize)]
        #[serde(rename_all = "camelCase")]
        struct GenerationConfig {
            temperature: f32,
            max_output_tokens: u32,
        }

        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Response {
            candidates: Option<Vec<Candidate>>,
            usage_metadata: Option<UsageMetadata>,
        }

        #[derive(Deserialize)]
        struct Candidate {
            content: Content,
        }

        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct UsageMetadata {
            #[serde(default)]
            prompt_token_count: u64,
            #[serde(default)]
            candidates_token_count: u64,
        }

        let api_key = self
            .config
            .api_key
            .as_ref()
            .ok_or_else(|| LlmError::Config("Gemini requires an API key".to_string()))?;

        // Gemini has no system role on this endpoint; prepend the system
        // prompt to the first user turn instead.
        let system = messages
            .iter()
            .find(|m| m.role == "system")
            .map(|m| m.content.as_str())
            .unwrap_or("");
        let user = messages
            .iter()
            .filter(|m| m.role != "system")
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");
        let full_prompt = if system.is_empty() {
            user
        } else {
            format!("{}\n\n{}", system, user)
        };

        let url = format!(
            "{}/models/{}:generateContent?key={}",
            self.api_base_url, self.config.model, api_key
        );

        let resp = self
            .client
            .post(&url)
            .json(&Request {
                contents: vec![Content {
                    role: Some("user".to_string()),
                    parts: vec![Part { text: full_prompt }],
                }],
                generation_config: GenerationConfig {
                    temperature: self.config.temperature,
                    max_output_tokens: self.config.max_tokens,
                },
            })
            .send()
            .await
            .map_err(|e| LlmError::Network(e.to_string()))?;

        let status = resp.status();
        if status.as_u16() == 429 || status.is_server_error() {
            return Err(LlmError::Unavailable(format!("Gemini returned {}", status)));
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(LlmError::Api(format!("Gemini returned error: {}", body)));
        }

        let result: Response = resp
            .json()
            .await
            .map_err(|e| LlmError::Serialization(e.to_string()))?;

        let text = result
            .candidates
            .and_then(|c| c.into_iter().next())
            .map(|c| {
                c.content
                    .parts
                    .into_iter()
                    .map(|p| p.text)
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();

        let (tokens_in, tokens_out) = result
            .usage_metadata
            .map(|u| (u.prompt_token_count, u.candidates_token_count))
            .unwrap_or((0, 0));

        Ok(Completion {
            text,
            tokens_in,
            tokens_out,
            provider_id: self.provider_id(),
        })
    }

    /// Mock completion: model name "fail" simulates a provider outage,
    /// anything else returns a canned medium-risk triage report.
    fn mock_chat(&self, messages: &[ChatMessage]) -> LlmResult<Completion> {
        if self.config.model == "fail" {
            return Err(LlmError::Unavailable("mock provider outage".to_string()));
        }

        let prompt_len: usize = messages.iter().map(|m| m.content.len()).sum();
        let rule_line = messages
            .iter()
            .flat_map(|m| m.content.lines())
            .find(|line| line.starts_with("Rule: "))
            .unwrap_or("Rule: unknown")
            .to_string();
        let text = format!(
            "Risk Level: Medium\n\nEvent summary: {}\n\nThe event matches known alert patterns \
             for this host. Review the source address activity, confirm the affected account, \
             and keep monitoring for repeated occurrences.",
            rule_line
        );

        Ok(Completion {
            tokens_in: (prompt_len as u64 / 4).max(1),
            tokens_out: (text.len() as u64 / 4).max(1),
            text,
            provider_id: self.provider_id(),
        })
    }
}
