//! SIEM alert index adapter
//!
//! Speaks the OpenSearch REST API: filtered k-NN search, fuzzy multi-field
//! keyword queries, partial document updates, and index-template install.

use super::{send_with_retry, KeywordQuery, StoreError, StoreResult, VectorStore};
use crate::alert::{AiAnalysis, Alert};
use crate::retrieve::bundle::{EvidenceRecord, EvidenceSource};
use crate::config::VectorStoreConfig;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, info};

const TEMPLATE_NAME: &str = "alerts-vector-template";
const RETRY_ATTEMPTS: u32 = 3;
const RETRY_DELAY: Duration = Duration::from_millis(250);

/// HTTP adapter for the alert index.
pub struct OpenSearchVectorStore {
    client: Client,
    config: VectorStoreConfig,
    /// Declared width of the `alert_vector` field
    dimension: usize,
}

impl OpenSearchVectorStore {
    pub fn new(config: VectorStoreConfig, dimension: usize) -> StoreResult<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .danger_accept_invalid_certs(config.insecure_tls)
            .build()
            .map_err(|e| StoreError::Request(e.to_string()))?;

        Ok(Self {
            client,
            config,
            dimension,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.url.trim_end_matches('/'), path)
    }

    async fn search(&self, body: Value) -> StoreResult<Value> {
        let request = self
            .client
            .post(self.url(&format!("{}/_search", self.config.index_pattern)))
            .basic_auth(&self.config.username, Some(&self.config.password))
            .json(&body);

        let resp = send_with_retry(request, RETRY_ATTEMPTS, RETRY_DELAY).await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(StoreError::Request(format!(
                "search returned {}: {}",
                status, body
            )));
        }

        resp.json()
            .await
            .map_err(|e| StoreError::Serialization(e.to_string()))
    }

    fn hits(response: &Value) -> &[Value] {
        response["hits"]["hits"].as_array().map(Vec::as_slice).unwrap_or(&[])
    }

    fn hit_to_record(hit: &Value, source_tag: EvidenceSource) -> EvidenceRecord {
        let mut record = EvidenceRecord::new(source_tag);
        record.score = hit["_score"].as_f64();
        record.alert_id = hit["_id"].as_str().map(str::to_string);
        record.timestamp = hit["_source"]["timestamp"]
            .as_str()
            .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
            .map(|t| t.with_timezone(&Utc));
        record.fields = hit["_source"].clone();
        record
    }
}

#[async_trait]
impl VectorStore for OpenSearchVectorStore {
    async fn ensure_index_template(&self) -> StoreResult<()> {
        let template_url = self.url(&format!("_index_template/{}", TEMPLATE_NAME));

        let existing = send_with_retry(
            self.client
                .get(&template_url)
                .basic_auth(&self.config.username, Some(&self.config.password)),
            RETRY_ATTEMPTS,
            RETRY_DELAY,
        )
        .await?;
        if existing.status().is_success() {
            debug!("index template {} already installed", TEMPLATE_NAME);
            return Ok(());
        }

        let body = json!({
            "index_patterns": [self.config.index_pattern],
            "priority": 1,
            "template": {
                "settings": {
                    "index": {
                        "knn": true,
                        "knn.algo_param.ef_search": 512
                    }
                },
                "mappings": {
                    "properties": {
                        "alert_vector": {
                            "type": "knn_vector",
                            "dimension": self.dimension,
                            "method": {
                                "name": "hnsw",
                                "space_type": "cosinesimil",
                                "engine": "nmslib",
                                "parameters": {"m": 16, "ef_construction": 512}
                            }
                        },
                        "ai_analysis": {
                            "properties": {
                                "report_text": {"type": "text"},
                                "provider_id": {"type": "keyword"},
                                "timestamp": {"type": "date"},
                                "risk_level": {"type": "keyword"},
                                "processing_ms": {"type": "long"},
                                "stage_marker": {"type": "keyword"}
                            }
                        }
                    }
                }
            }
        });

        let resp = send_with_retry(
            self.client
                .put(&template_url)
                .basic_auth(&self.config.username, Some(&self.config.password))
                .json(&body),
            RETRY_ATTEMPTS,
            RETRY_DELAY,
        )
        .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(StoreError::Request(format!(
                "template install returned {}: {}",
                status, body
            )));
        }

        info!("installed index template {}", TEMPLATE_NAME);
        Ok(())
    }

    async fn list_unprocessed(&self, limit: usize) -> StoreResult<Vec<Alert>> {
        let body = json!({
            "size": limit,
            "query": {
                "bool": {
                    "must_not": [{"exists": {"field": "ai_analysis"}}]
                }
            },
            "sort": [{"timestamp": {"order": "asc"}}]
        });

        let response = self.search(body).await?;
        let mut alerts = Vec::new();
        for hit in Self::hits(&response) {
            let mut alert: Alert = serde_json::from_value(hit["_source"].clone())
                .map_err(|e| StoreError::Serialization(e.to_string()))?;
            alert.id = hit["_id"].as_str().unwrap_or_default().to_string();
            alert.index = hit["_index"].as_str().unwrap_or_default().to_string();
            alerts.push(alert);
        }

        debug!(count = alerts.len(), "unprocessed alerts fetched");
        Ok(alerts)
    }

    async fn knn(&self, vector: &[f32], k: usize) -> StoreResult<Vec<EvidenceRecord>> {
        let body = json!({
            "size": k,
            "query": {
                "bool": {
                    "must": [{
                        "knn": {
                            "alert_vector": {"vector": vector, "k": k}
                        }
                    }],
                    // Only history that already carries a triage report is
                    // useful as context.
                    "filter": [{"exists": {"field": "ai_analysis"}}]
                }
            },
            "_source": ["rule", "agent", "ai_analysis", "timestamp", "data"]
        });

        let response = self.search(body).await?;
        Ok(Self::hits(&response)
            .iter()
            .map(|hit| Self::hit_to_record(hit, EvidenceSource::VectorKnn))
            .collect())
    }

    async fn keyword_time_window(&self, query: &KeywordQuery) -> StoreResult<Vec<EvidenceRecord>> {
        let mut filter = vec![json!({
            "range": {
                "timestamp": {
                    "gte": query.from.to_rfc3339(),
                    "lte": query.to.to_rfc3339()
                }
            }
        })];
        if let Some(host) = &query.host {
            filter.push(json!({"term": {"agent.name.keyword": host}}));
        }

        let body = json!({
            "size": query.size,
            "query": {
                "bool": {
                    "should": [{
                        "multi_match": {
                            "query": query.keywords.join(" "),
                            "fields": ["rule.description^2", "data.*", "full_log", "location"],
                            "type": "best_fields",
                            "fuzziness": "AUTO"
                        }
                    }],
                    "filter": filter,
                    "minimum_should_match": 1
                }
            },
            "sort": [
                {"timestamp": {"order": "desc"}},
                {"_score": {"order": "desc"}}
            ]
        });

        let response = self.search(body).await?;
        Ok(Self::hits(&response)
            .iter()
            .map(|hit| Self::hit_to_record(hit, EvidenceSource::KeywordTimeWindow))
            .collect())
    }

    async fn update_enrichment(
        &self,
        alert: &Alert,
        vector: &[f32],
        analysis: &AiAnalysis,
    ) -> StoreResult<()> {
        if alert.index.is_empty() {
            return Err(StoreError::Request(format!(
                "alert {} carries no index name",
                alert.id
            )));
        }

        let body = json!({
            "doc": {
                "alert_vector": vector,
                "ai_analysis": analysis
            }
        });

        let resp = send_with_retry(
            self.client
                .post(self.url(&format!("{}/_update/{}", alert.index, alert.id)))
                .basic_auth(&self.config.username, Some(&self.config.password))
                .json(&body),
            RETRY_ATTEMPTS,
            RETRY_DELAY,
        )
        .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(StoreError::Request(format!(
                "enrichment update returned {}: {}",
                status, body
            )));
        }

        debug!(alert_id = %alert.id, "enrichment written");
        Ok(())
    }

    async fn ping(&self) -> StoreResult<()> {
        let resp = send_with_retry(
            self.client
                .get(self.url(""))
                .basic_auth(&self.config.username, Some(&self.config.password)),
            1,
            RETRY_DELAY,
        )
        .await?;

        if resp.status().is_success() {
            Ok(())
        } else {
            Err(StoreError::Unavailable(format!(
                "alert index returned {}",
                resp.status()
            )))
        }
    }
}
