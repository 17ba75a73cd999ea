//! Smart-query layer: LLM query enhancement and answer synthesis.
//!
//! Purely additive over the query executor — removing this module leaves
//! plain retrieval unchanged. Enhancement produces rewritten sub-queries
//! and/or a HyDE-style hypothetical passage, each run through the normal
//! pipeline; the per-query hit lists are fused again with RRF, and an
//! optional synthesis step grounds a text answer in the top hits with
//! bracketed citations referencing hit ids.

use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::config::LlmConfig;
use crate::engine::Engine;
use crate::error::{Error, ErrorKind, Result};
use crate::progress::{emit, emit_done, ProgressSink};
use crate::query::{self, QueryHit, QueryRequest};

// ============ LLM capability ============

#[async_trait]
pub trait LlmProvider: Send + Sync {
    fn is_enabled(&self) -> bool;
    async fn complete(&self, system: &str, user: &str) -> Result<String>;
}

pub struct DisabledLlm;

#[async_trait]
impl LlmProvider for DisabledLlm {
    fn is_enabled(&self) -> bool {
        false
    }
    async fn complete(&self, _system: &str, _user: &str) -> Result<String> {
        Err(Error::validation("llm provider is disabled"))
    }
}

/// OpenAI-compatible chat provider (`POST /v1/chat/completions`).
pub struct OpenAiLlm {
    client: reqwest::Client,
    model: String,
    api_key: String,
}

impl OpenAiLlm {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env).map_err(|_| {
            Error::new(
                ErrorKind::Unauthorized,
                format!("{} environment variable not set", config.api_key_env),
            )
        })?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(Error::from)?;
        Ok(Self {
            client,
            model: config.model.clone(),
            api_key,
        })
    }
}

#[async_trait]
impl LlmProvider for OpenAiLlm {
    fn is_enabled(&self) -> bool {
        true
    }

    async fn complete(&self, system: &str, user: &str) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user},
            ],
            "temperature": 0.2,
        });
        let response = self
            .client
            .post("https://api.openai.com/v1/chat/completions")
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await?;
        let status = response.status();
        if status.as_u16() == 429 || status.is_server_error() {
            return Err(Error::new(
                ErrorKind::Backpressure,
                format!("llm API error {status}"),
            ));
        }
        if !status.is_success() {
            return Err(Error::validation(format!("llm API error {status}")));
        }
        let json: serde_json::Value = response.json().await?;
        json.get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(|c| c.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| Error::internal("llm response missing content"))
    }
}

pub fn create_llm(config: &LlmConfig) -> Result<Arc<dyn LlmProvider>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledLlm)),
        "openai" => Ok(Arc::new(OpenAiLlm::new(config)?)),
        other => Err(Error::validation(format!("unknown llm provider: {other}"))),
    }
}

// ============ Smart query ============

/// Enhancement strategies. Unknown names are ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Ask the LLM for alternative phrasings of the query.
    Rewrite,
    /// HyDE: embed a hypothetical answer instead of the question.
    Hyde,
}

impl Strategy {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "rewrite" => Some(Strategy::Rewrite),
            "hyde" => Some(Strategy::Hyde),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SmartQueryRequest {
    pub base: QueryRequest,
    pub strategies: Vec<Strategy>,
    /// `answer` synthesizes a grounded response; `retrieval` skips synthesis.
    pub answer_type: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Citation {
    /// Bracket number used in the answer text.
    pub marker: usize,
    pub hit_id: String,
    pub source: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SmartAnswer {
    pub answer: Option<String>,
    pub confidence: f32,
    pub citations: Vec<Citation>,
    pub retrievals: Vec<QueryHit>,
    pub sub_queries: Vec<String>,
    pub latency_ms: u64,
}

/// Run an enhanced query and optionally synthesize a grounded answer.
pub async fn run_smart_query(
    engine: &Engine,
    req: &SmartQueryRequest,
    progress: Option<ProgressSink>,
) -> Result<SmartAnswer> {
    let started = Instant::now();
    let progress = progress.as_ref();

    // Enhancement: rewritten queries and/or a hypothetical answer.
    let mut queries: Vec<String> = vec![req.base.query.clone()];
    if engine.llm.is_enabled() && !req.strategies.is_empty() {
        emit(progress, "enhance", 0, 1, "enhancing query");
        for strategy in &req.strategies {
            match enhance(engine, &req.base.query, *strategy).await {
                Ok(mut extra) => queries.append(&mut extra),
                Err(e) => debug!(error = %e, ?strategy, "enhancement failed; continuing"),
            }
        }
        emit(progress, "enhance", 1, 1, format!("{} sub-queries", queries.len()));
    }
    queries.dedup();

    // Each sub-query goes through the standard executor; lists are re-fused.
    let mut lists: Vec<Vec<QueryHit>> = Vec::with_capacity(queries.len());
    for q in &queries {
        let sub_req = QueryRequest {
            query: q.clone(),
            ..req.base.clone()
        };
        lists.push(query::run_query(engine, &sub_req, None).await?);
    }
    let hits = query::fuse_hit_lists(
        lists,
        engine.config.retrieval.rank_constant,
        req.base.top_k,
    );

    // Synthesis.
    let (answer, citations, confidence) = if req.answer_type == "answer"
        && engine.llm.is_enabled()
        && !hits.is_empty()
    {
        emit(progress, "synthesize", 0, 1, "composing answer");
        match synthesize(engine, &req.base.query, &hits).await {
            Ok((text, citations)) => {
                let confidence = confidence_for(&hits, citations.len());
                (Some(text), citations, confidence)
            }
            Err(e) => {
                debug!(error = %e, "synthesis failed; returning retrievals only");
                (None, Vec::new(), confidence_for(&hits, 0))
            }
        }
    } else {
        (None, Vec::new(), confidence_for(&hits, 0))
    };

    emit_done(progress, "done", format!("{} hits", hits.len()));
    Ok(SmartAnswer {
        answer,
        confidence,
        citations,
        retrievals: hits,
        sub_queries: queries,
        latency_ms: started.elapsed().as_millis() as u64,
    })
}

async fn enhance(engine: &Engine, query: &str, strategy: Strategy) -> Result<Vec<String>> {
    match strategy {
        Strategy::Rewrite => {
            let raw = engine
                .llm
                .complete(
                    "You rewrite search queries for a code and documentation search engine. \
                     Produce exactly two alternative phrasings, one per line, no numbering.",
                    query,
                )
                .await?;
            Ok(raw
                .lines()
                .map(|l| l.trim().trim_start_matches(['-', '*', ' ']).to_string())
                .filter(|l| !l.is_empty())
                .take(2)
                .collect())
        }
        Strategy::Hyde => {
            let passage = engine
                .llm
                .complete(
                    "Write a short, plausible documentation paragraph that would answer the \
                     user's question. No preamble.",
                    query,
                )
                .await?;
            let trimmed = passage.trim();
            if trimmed.is_empty() {
                Ok(Vec::new())
            } else {
                Ok(vec![trimmed.to_string()])
            }
        }
    }
}

async fn synthesize(
    engine: &Engine,
    query: &str,
    hits: &[QueryHit],
) -> Result<(String, Vec<Citation>)> {
    let mut context = String::new();
    for (i, hit) in hits.iter().enumerate() {
        let source = source_label(hit);
        context.push_str(&format!("[{}] {}\n{}\n\n", i + 1, source, hit.snippet));
    }

    let answer = engine
        .llm
        .complete(
            "Answer using only the numbered context passages. Cite passages inline with \
             their bracket numbers, like [2]. If the context is insufficient, say so.",
            &format!("Question: {query}\n\nContext:\n{context}"),
        )
        .await?;

    // Citations are the passages the answer actually references.
    let mut citations = Vec::new();
    for (i, hit) in hits.iter().enumerate() {
        let marker = i + 1;
        if answer.contains(&format!("[{marker}]")) {
            citations.push(Citation {
                marker,
                hit_id: hit.id.clone(),
                source: source_label(hit),
            });
        }
    }
    Ok((answer, citations))
}

fn source_label(hit: &QueryHit) -> String {
    if let Some(ref url) = hit.payload.url {
        url.clone()
    } else if let Some(ref path) = hit.payload.relative_path {
        match (hit.payload.start_line, hit.payload.end_line) {
            (Some(start), Some(end)) => format!("{path}:{start}-{end}"),
            _ => path.clone(),
        }
    } else {
        hit.id.clone()
    }
}

/// Confidence in [0, 1]: retrieval strength blended with citation coverage.
fn confidence_for(hits: &[QueryHit], citations: usize) -> f32 {
    if hits.is_empty() {
        return 0.0;
    }
    let top_dense = hits
        .iter()
        .map(|h| h.scores.dense)
        .fold(f32::MIN, f32::max)
        .clamp(0.0, 1.0);
    let coverage = if citations == 0 {
        0.0
    } else {
        (citations as f32 / hits.len() as f32).min(1.0)
    };
    (0.6 * top_dense + 0.4 * coverage).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Payload, SourceType};
    use crate::query::ScoreBreakdown;

    fn hit(id: &str, dense: f32, path: Option<&str>) -> QueryHit {
        let mut payload = Payload::new("p", "d", SourceType::Code, "h");
        payload.relative_path = path.map(|s| s.to_string());
        payload.start_line = Some(3);
        payload.end_line = Some(9);
        QueryHit {
            id: id.to_string(),
            collection: "c".into(),
            snippet: "snippet".into(),
            payload,
            scores: ScoreBreakdown {
                dense,
                sparse: None,
                fused: 0.1,
                rerank: None,
                final_score: 0.1,
            },
        }
    }

    #[test]
    fn strategy_parsing() {
        assert_eq!(Strategy::parse("rewrite"), Some(Strategy::Rewrite));
        assert_eq!(Strategy::parse("hyde"), Some(Strategy::Hyde));
        assert_eq!(Strategy::parse("other"), None);
    }

    #[test]
    fn confidence_bounds() {
        assert_eq!(confidence_for(&[], 0), 0.0);
        let hits = vec![hit("a", 0.9, Some("x.rs")), hit("b", 0.4, None)];
        let low = confidence_for(&hits, 0);
        let high = confidence_for(&hits, 2);
        assert!(low > 0.0 && low <= 1.0);
        assert!(high > low);
        assert!(high <= 1.0);
    }

    #[test]
    fn source_labels_prefer_span() {
        let h = hit("a", 0.5, Some("src/auth.rs"));
        assert_eq!(source_label(&h), "src/auth.rs:3-9");
        let mut web = hit("b", 0.5, None);
        web.payload.url = Some("https://x.dev/doc".into());
        assert_eq!(source_label(&web), "https://x.dev/doc");
    }
}
