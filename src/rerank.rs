//! Cross-encoder reranking capability.
//!
//! A [`Reranker`] scores (query, candidate) pairs; the query executor applies
//! it as an optional second pass over the cut list. The HTTP implementation
//! speaks the common rerank API shape (`{model, query, documents}` in,
//! `{results: [{index, relevance_score}]}` out); when disabled the executor
//! skips the pass entirely.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::config::RerankConfig;
use crate::error::{Error, ErrorKind, Result};

#[async_trait]
pub trait Reranker: Send + Sync {
    fn is_enabled(&self) -> bool;
    /// Relevance score per candidate, in candidate order.
    async fn score(&self, query: &str, candidates: &[String]) -> Result<Vec<f32>>;
}

pub struct DisabledReranker;

#[async_trait]
impl Reranker for DisabledReranker {
    fn is_enabled(&self) -> bool {
        false
    }
    async fn score(&self, _query: &str, _candidates: &[String]) -> Result<Vec<f32>> {
        Err(Error::validation("reranker is disabled"))
    }
}

pub struct HttpReranker {
    client: reqwest::Client,
    endpoint: String,
    model: String,
}

impl HttpReranker {
    pub fn new(endpoint: &str, model: &str, timeout_secs: u64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(Error::from)?;
        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
            model: model.to_string(),
        })
    }
}

#[async_trait]
impl Reranker for HttpReranker {
    fn is_enabled(&self) -> bool {
        true
    }

    async fn score(&self, query: &str, candidates: &[String]) -> Result<Vec<f32>> {
        let body = serde_json::json!({
            "model": self.model,
            "query": query,
            "documents": candidates,
        });
        let response = self.client.post(&self.endpoint).json(&body).send().await?;
        let status = response.status();
        if status.as_u16() == 429 || status.is_server_error() {
            return Err(Error::new(
                ErrorKind::Backpressure,
                format!("rerank API error {status}"),
            ));
        }
        if !status.is_success() {
            return Err(Error::validation(format!("rerank API error {status}")));
        }

        let json: serde_json::Value = response.json().await?;
        let results = json
            .get("results")
            .and_then(|r| r.as_array())
            .ok_or_else(|| Error::internal("rerank response missing results"))?;

        let mut scores = vec![0.0f32; candidates.len()];
        for item in results {
            let index = item.get("index").and_then(|i| i.as_u64()).unwrap_or(0) as usize;
            let score = item
                .get("relevance_score")
                .and_then(|s| s.as_f64())
                .unwrap_or(0.0) as f32;
            if index < scores.len() {
                scores[index] = score;
            }
        }
        Ok(scores)
    }
}

pub fn create_reranker(config: &RerankConfig) -> Result<Arc<dyn Reranker>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledReranker)),
        "http" => {
            let endpoint = config
                .endpoint
                .as_deref()
                .ok_or_else(|| Error::validation("rerank.endpoint is required"))?;
            Ok(Arc::new(HttpReranker::new(
                endpoint,
                &config.model,
                config.timeout_secs,
            )?))
        }
        other => Err(Error::validation(format!("unknown rerank provider: {other}"))),
    }
}
