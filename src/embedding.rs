//! Embedding coordination: dense routing, sparse encoding, batching, retry.
//!
//! Dense vectors come from a [`DenseProvider`] — the OpenAI-compatible HTTP
//! backend, the deterministic local hashed-projection backend, or the
//! disabled stub. Chunks are routed per [`ModelHint`] (`Text` vs `Code`) to
//! the configured model; when a round contains both kinds, both batches are
//! dispatched concurrently and a failure on one model only zero-fills its own
//! slots.
//!
//! Sparse vectors are hashed term-frequency representations produced locally
//! by [`SparseEncoder`].
//!
//! # Retry Strategy
//!
//! The coordinator retries `Timeout`, `Backpressure`, and transient `Io`
//! failures with exponential backoff (1s, 2s, 4s, …) up to the configured
//! bound. `DimensionMismatch` and auth/validation failures are never retried.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::config::EmbeddingConfig;
use crate::error::{Error, ErrorKind, Result};

/// Routing hint for dense model selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelHint {
    Text,
    Code,
}

/// Sparse vector: parallel term-index / weight arrays, indices ascending.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SparseVector {
    pub indices: Vec<u32>,
    pub weights: Vec<f32>,
}

impl SparseVector {
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// Dot product against another sparse vector (both index-sorted).
    pub fn dot(&self, other: &SparseVector) -> f32 {
        let mut sum = 0.0f32;
        let (mut i, mut j) = (0usize, 0usize);
        while i < self.indices.len() && j < other.indices.len() {
            match self.indices[i].cmp(&other.indices[j]) {
                std::cmp::Ordering::Less => i += 1,
                std::cmp::Ordering::Greater => j += 1,
                std::cmp::Ordering::Equal => {
                    sum += self.weights[i] * other.weights[j];
                    i += 1;
                    j += 1;
                }
            }
        }
        sum
    }
}

/// Dense + optional sparse representation of a query.
#[derive(Debug, Clone)]
pub struct QueryVectors {
    pub dense: Vec<f32>,
    pub sparse: Option<SparseVector>,
}

// ============ Dense providers ============

/// Capability over a dense embedding backend. One attempt per call; the
/// coordinator owns batching and retries.
#[async_trait]
pub trait DenseProvider: Send + Sync {
    fn model_name(&self) -> &str;
    fn dims(&self) -> usize;
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Deterministic local provider: hashed bag-of-words projection, L2
/// normalized. No network, stable across runs — the dev/test default.
pub struct LocalProvider {
    model: String,
    dims: usize,
}

impl LocalProvider {
    pub fn new(model: &str, dims: usize) -> Self {
        Self {
            model: format!("local:{model}"),
            dims,
        }
    }

    fn project(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dims];
        for token in tokenize(text) {
            let h = fnv1a64(token.as_bytes());
            let idx = (h % self.dims as u64) as usize;
            let sign = if (h >> 32) & 1 == 0 { 1.0 } else { -1.0 };
            v[idx] += sign;
            // A second rotated slot reduces collision damage.
            let idx2 = ((h.rotate_left(17)) % self.dims as u64) as usize;
            let sign2 = if (h >> 33) & 1 == 0 { 1.0 } else { -1.0 };
            v[idx2] += 0.5 * sign2;
        }
        l2_normalize(&mut v);
        v
    }
}

#[async_trait]
impl DenseProvider for LocalProvider {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.project(t)).collect())
    }
}

/// OpenAI-compatible HTTP provider (`POST /v1/embeddings`).
pub struct OpenAiProvider {
    client: reqwest::Client,
    model: String,
    dims: usize,
    api_key: String,
}

impl OpenAiProvider {
    pub fn new(model: &str, dims: usize, timeout_secs: u64) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY").map_err(|_| {
            Error::new(
                ErrorKind::Unauthorized,
                "OPENAI_API_KEY environment variable not set",
            )
        })?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(Error::from)?;
        Ok(Self {
            client,
            model: model.to_string(),
            dims,
            api_key,
        })
    }
}

#[async_trait]
impl DenseProvider for OpenAiProvider {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });

        let response = self
            .client
            .post("https://api.openai.com/v1/embeddings")
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(Error::new(
                ErrorKind::Backpressure,
                "embedding API rate limited",
            ));
        }
        if status.is_server_error() {
            return Err(Error::new(
                ErrorKind::Backpressure,
                format!("embedding API error {status}"),
            ));
        }
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(Error::new(
                ErrorKind::Unauthorized,
                format!("embedding API rejected credentials ({status})"),
            ));
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(Error::validation(format!(
                "embedding API error {status}: {text}"
            )));
        }

        let json: serde_json::Value = response.json().await?;
        let data = json
            .get("data")
            .and_then(|d| d.as_array())
            .ok_or_else(|| Error::internal("embedding response missing data array"))?;

        let mut vectors = Vec::with_capacity(data.len());
        for item in data {
            let embedding = item
                .get("embedding")
                .and_then(|e| e.as_array())
                .ok_or_else(|| Error::internal("embedding response missing vector"))?;
            vectors.push(
                embedding
                    .iter()
                    .map(|v| v.as_f64().unwrap_or(0.0) as f32)
                    .collect::<Vec<f32>>(),
            );
        }
        Ok(vectors)
    }
}

/// Stub provider used when embeddings are disabled.
pub struct DisabledProvider;

#[async_trait]
impl DenseProvider for DisabledProvider {
    fn model_name(&self) -> &str {
        "disabled"
    }
    fn dims(&self) -> usize {
        0
    }
    async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Err(Error::validation("embedding provider is disabled"))
    }
}

// ============ Sparse encoder ============

/// Hashed term-frequency encoder: token → 32-bit index, weight `1 + ln(tf)`,
/// L2 normalized. Deterministic across processes.
#[derive(Debug, Clone, Default)]
pub struct SparseEncoder;

impl SparseEncoder {
    pub fn encode(&self, text: &str) -> SparseVector {
        let mut counts: std::collections::HashMap<u32, f32> = std::collections::HashMap::new();
        for token in tokenize(text) {
            let idx = (fnv1a64(token.as_bytes()) & 0xFFFF_FFFF) as u32;
            *counts.entry(idx).or_insert(0.0) += 1.0;
        }
        let mut pairs: Vec<(u32, f32)> = counts
            .into_iter()
            .map(|(i, tf)| (i, 1.0 + tf.ln()))
            .collect();
        pairs.sort_by_key(|(i, _)| *i);

        let norm: f32 = pairs.iter().map(|(_, w)| w * w).sum::<f32>().sqrt();
        let (indices, weights) = pairs
            .into_iter()
            .map(|(i, w)| (i, if norm > f32::EPSILON { w / norm } else { w }))
            .unzip();
        SparseVector { indices, weights }
    }
}

// ============ Coordinator ============

/// Per-chunk outcome of a mixed embedding run: zero-filled vectors for the
/// indices listed in `failed`.
#[derive(Debug)]
pub struct EmbedOutcome {
    pub vectors: Vec<Vec<f32>>,
    pub failed: Vec<usize>,
}

/// Routes chunks to the configured dense models with bounded concurrency and
/// bounded retries, and produces sparse vectors when enabled.
pub struct EmbeddingCoordinator {
    text_provider: Arc<dyn DenseProvider>,
    code_provider: Arc<dyn DenseProvider>,
    sparse: Option<SparseEncoder>,
    semaphore: Arc<Semaphore>,
    dims: usize,
    batch_size: usize,
    max_retries: u32,
    input_cap_chars: usize,
}

impl EmbeddingCoordinator {
    pub fn from_config(config: &EmbeddingConfig) -> Result<Self> {
        let (text_provider, code_provider): (Arc<dyn DenseProvider>, Arc<dyn DenseProvider>) =
            match config.provider.as_str() {
                "local" => (
                    Arc::new(LocalProvider::new(&config.text_model, config.dims)),
                    Arc::new(LocalProvider::new(&config.code_model, config.dims)),
                ),
                "openai" => (
                    Arc::new(OpenAiProvider::new(
                        &config.text_model,
                        config.dims,
                        config.timeout_secs,
                    )?),
                    Arc::new(OpenAiProvider::new(
                        &config.code_model,
                        config.dims,
                        config.timeout_secs,
                    )?),
                ),
                "disabled" => (Arc::new(DisabledProvider), Arc::new(DisabledProvider)),
                other => {
                    return Err(Error::validation(format!(
                        "unknown embedding provider: {other}"
                    )))
                }
            };

        Ok(Self {
            text_provider,
            code_provider,
            sparse: config.sparse.then(SparseEncoder::default),
            semaphore: Arc::new(Semaphore::new(config.concurrency.max(1))),
            dims: config.dims,
            batch_size: config.batch_size.max(1),
            max_retries: config.max_retries,
            input_cap_chars: config.input_cap_chars.max(1),
        })
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    pub fn sparse_enabled(&self) -> bool {
        self.sparse.is_some()
    }

    fn provider(&self, hint: ModelHint) -> &Arc<dyn DenseProvider> {
        match hint {
            ModelHint::Text => &self.text_provider,
            ModelHint::Code => &self.code_provider,
        }
    }

    /// Encode one text's sparse representation (`None` when sparse is off).
    pub fn encode_sparse(&self, text: &str) -> Option<SparseVector> {
        self.sparse.as_ref().map(|s| s.encode(text))
    }

    /// Embed texts in input order through the hinted model. Over-cap texts
    /// are pre-split and mean-pooled so no request exceeds the input cap.
    pub async fn embed_dense(&self, texts: &[String], hint: ModelHint) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        // Expand over-cap texts into capped pieces, remembering their owner.
        let mut expanded: Vec<String> = Vec::with_capacity(texts.len());
        let mut owner: Vec<usize> = Vec::with_capacity(texts.len());
        for (i, text) in texts.iter().enumerate() {
            for piece in split_to_cap(text, self.input_cap_chars) {
                expanded.push(piece);
                owner.push(i);
            }
        }

        let mut flat: Vec<Vec<f32>> = Vec::with_capacity(expanded.len());
        for batch in expanded.chunks(self.batch_size) {
            let vectors = self.call_with_retry(self.provider(hint), batch).await?;
            flat.extend(vectors);
        }

        // Mean-pool pieces back to one vector per input.
        let mut pooled: Vec<Vec<f32>> = vec![Vec::new(); texts.len()];
        let mut counts = vec![0usize; texts.len()];
        for (vec, &idx) in flat.iter().zip(owner.iter()) {
            if pooled[idx].is_empty() {
                pooled[idx] = vec.clone();
            } else {
                for (a, b) in pooled[idx].iter_mut().zip(vec.iter()) {
                    *a += *b;
                }
            }
            counts[idx] += 1;
        }
        for (vec, count) in pooled.iter_mut().zip(counts.iter()) {
            if *count > 1 {
                for v in vec.iter_mut() {
                    *v /= *count as f32;
                }
                l2_normalize(vec);
            }
        }
        Ok(pooled)
    }

    /// Embed a mixed batch of `(text, is_code)` items, preserving order.
    ///
    /// Each round takes one batch per model; when both models have work the
    /// two requests are dispatched concurrently and the round completes when
    /// both finish. A failed round on one model zero-fills that model's slots
    /// and records their indices; the other model is unaffected.
    pub async fn embed_mixed(&self, items: &[(String, bool)]) -> Result<EmbedOutcome> {
        let mut vectors: Vec<Vec<f32>> = vec![Vec::new(); items.len()];
        let mut failed: Vec<usize> = Vec::new();

        let text_idx: Vec<usize> = items
            .iter()
            .enumerate()
            .filter(|(_, (_, code))| !code)
            .map(|(i, _)| i)
            .collect();
        let code_idx: Vec<usize> = items
            .iter()
            .enumerate()
            .filter(|(_, (_, code))| *code)
            .map(|(i, _)| i)
            .collect();

        let mut text_pos = 0usize;
        let mut code_pos = 0usize;

        while text_pos < text_idx.len() || code_pos < code_idx.len() {
            let text_batch = &text_idx[text_pos..(text_pos + self.batch_size).min(text_idx.len())];
            let code_batch = &code_idx[code_pos..(code_pos + self.batch_size).min(code_idx.len())];

            let text_texts: Vec<String> =
                text_batch.iter().map(|&i| items[i].0.clone()).collect();
            let code_texts: Vec<String> =
                code_batch.iter().map(|&i| items[i].0.clone()).collect();

            // Single-model rounds take the fast path with no join overhead.
            let (text_result, code_result) = if text_texts.is_empty() {
                (Ok(Vec::new()), self.embed_dense(&code_texts, ModelHint::Code).await)
            } else if code_texts.is_empty() {
                (self.embed_dense(&text_texts, ModelHint::Text).await, Ok(Vec::new()))
            } else {
                tokio::join!(
                    self.embed_dense(&text_texts, ModelHint::Text),
                    self.embed_dense(&code_texts, ModelHint::Code),
                )
            };

            for (result, batch) in [(text_result, text_batch), (code_result, code_batch)] {
                match result {
                    Ok(vecs) => {
                        for (&i, v) in batch.iter().zip(vecs.into_iter()) {
                            vectors[i] = v;
                        }
                    }
                    Err(e) if e.kind == ErrorKind::DimensionMismatch => return Err(e),
                    Err(e) => {
                        warn!(error = %e, slots = batch.len(), "embedding round failed; zero-filling");
                        for &i in batch {
                            vectors[i] = vec![0.0; self.dims];
                            failed.push(i);
                        }
                    }
                }
            }

            text_pos += text_batch.len();
            code_pos += code_batch.len();
        }

        failed.sort_unstable();
        Ok(EmbedOutcome { vectors, failed })
    }

    /// Embed a query: one dense vector, plus a sparse representation when
    /// requested and enabled.
    pub async fn embed_query(
        &self,
        query: &str,
        hint: ModelHint,
        want_sparse: bool,
    ) -> Result<QueryVectors> {
        let dense = self
            .embed_dense(&[query.to_string()], hint)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| Error::internal("empty embedding response"))?;
        let sparse = if want_sparse {
            self.encode_sparse(query)
        } else {
            None
        };
        Ok(QueryVectors { dense, sparse })
    }

    /// One provider call under the concurrency limit, with bounded
    /// exponential-backoff retries for transient failures and a dimension
    /// check on success.
    async fn call_with_retry(
        &self,
        provider: &Arc<dyn DenseProvider>,
        texts: &[String],
    ) -> Result<Vec<Vec<f32>>> {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| Error::internal("embedding semaphore closed"))?;

        let mut last_err: Option<Error> = None;
        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                debug!(attempt, ?delay, "retrying embedding batch");
                tokio::time::sleep(delay).await;
            }

            match provider.embed(texts).await {
                Ok(vectors) => {
                    if vectors.len() != texts.len() {
                        return Err(Error::internal(format!(
                            "embedding count mismatch: sent {}, got {}",
                            texts.len(),
                            vectors.len()
                        )));
                    }
                    if let Some(bad) = vectors.iter().find(|v| v.len() != self.dims) {
                        return Err(Error::new(
                            ErrorKind::DimensionMismatch,
                            format!(
                                "model {} returned dimension {}, collection expects {}",
                                provider.model_name(),
                                bad.len(),
                                self.dims
                            ),
                        ));
                    }
                    return Ok(vectors);
                }
                Err(e) if e.is_retryable() && attempt < self.max_retries => {
                    last_err = Some(e);
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_err.unwrap_or_else(|| Error::internal("embedding failed after retries")))
    }
}

// ============ Vector utilities ============

/// Encode a float vector as little-endian f32 bytes for BLOB storage.
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB back into a float vector.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Cosine similarity; `0.0` for empty or mismatched-length vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }
    dot / denom
}

fn l2_normalize(v: &mut [f32]) {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
}

/// Split a text into pieces no longer than `cap` characters, on char
/// boundaries.
fn split_to_cap(text: &str, cap: usize) -> Vec<String> {
    if text.len() <= cap {
        return vec![text.to_string()];
    }
    let mut pieces = Vec::new();
    let mut current = String::with_capacity(cap);
    for ch in text.chars() {
        if current.len() + ch.len_utf8() > cap {
            pieces.push(std::mem::take(&mut current));
        }
        current.push(ch);
    }
    if !current.is_empty() {
        pieces.push(current);
    }
    pieces
}

fn fnv1a64(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for &b in bytes {
        hash ^= b as u64;
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;

    fn coordinator(dims: usize) -> EmbeddingCoordinator {
        let config = EmbeddingConfig {
            provider: "local".into(),
            dims,
            ..Default::default()
        };
        EmbeddingCoordinator::from_config(&config).unwrap()
    }

    #[test]
    fn blob_roundtrip() {
        let v = vec![1.0f32, -2.5, 3.125, 0.0];
        assert_eq!(blob_to_vec(&vec_to_blob(&v)), v);
    }

    #[test]
    fn cosine_basics() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
    }

    #[test]
    fn sparse_encoder_is_deterministic_and_sorted() {
        let enc = SparseEncoder;
        let a = enc.encode("the quick brown fox jumps over the lazy dog");
        let b = enc.encode("the quick brown fox jumps over the lazy dog");
        assert_eq!(a, b);
        assert!(a.indices.windows(2).all(|w| w[0] < w[1]));
        // Unit norm.
        let norm: f32 = a.weights.iter().map(|w| w * w).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);
    }

    #[test]
    fn sparse_dot_overlap() {
        let enc = SparseEncoder;
        let a = enc.encode("auth middleware token");
        let b = enc.encode("auth middleware session");
        let c = enc.encode("completely unrelated gardening tips");
        assert!(a.dot(&b) > a.dot(&c));
        assert!((a.dot(&a) - 1.0).abs() < 1e-4);
    }

    #[tokio::test]
    async fn local_provider_is_deterministic() {
        let coord = coordinator(64);
        let texts = vec!["hello world".to_string(), "fn main() {}".to_string()];
        let a = coord.embed_dense(&texts, ModelHint::Text).await.unwrap();
        let b = coord.embed_dense(&texts, ModelHint::Text).await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a[0].len(), 64);
    }

    #[tokio::test]
    async fn similar_texts_are_closer() {
        let coord = coordinator(128);
        let texts = vec![
            "database connection pooling".to_string(),
            "pooling database connections".to_string(),
            "chocolate cake recipe".to_string(),
        ];
        let v = coord.embed_dense(&texts, ModelHint::Text).await.unwrap();
        let near = cosine_similarity(&v[0], &v[1]);
        let far = cosine_similarity(&v[0], &v[2]);
        assert!(near > far, "near={near} far={far}");
    }

    #[tokio::test]
    async fn mixed_batch_preserves_order() {
        let coord = coordinator(32);
        let items = vec![
            ("prose one".to_string(), false),
            ("fn code_one() {}".to_string(), true),
            ("prose two".to_string(), false),
            ("fn code_two() {}".to_string(), true),
        ];
        let out = coord.embed_mixed(&items).await.unwrap();
        assert_eq!(out.vectors.len(), 4);
        assert!(out.failed.is_empty());
        // Each slot matches a direct single-hint embedding of the same text.
        let direct = coord
            .embed_dense(&["prose two".to_string()], ModelHint::Text)
            .await
            .unwrap();
        assert_eq!(out.vectors[2], direct[0]);
    }

    #[tokio::test]
    async fn over_cap_input_is_pre_split() {
        let config = EmbeddingConfig {
            provider: "local".into(),
            dims: 32,
            input_cap_chars: 50,
            ..Default::default()
        };
        let coord = EmbeddingCoordinator::from_config(&config).unwrap();
        let long = "word ".repeat(100);
        let v = coord
            .embed_dense(&[long.clone()], ModelHint::Text)
            .await
            .unwrap();
        assert_eq!(v.len(), 1);
        assert_eq!(v[0].len(), 32);
    }

    #[tokio::test]
    async fn query_embeds_with_optional_sparse() {
        let coord = coordinator(32);
        let q = coord
            .embed_query("find auth code", ModelHint::Text, true)
            .await
            .unwrap();
        assert_eq!(q.dense.len(), 32);
        assert!(q.sparse.is_some());
        let q2 = coord
            .embed_query("find auth code", ModelHint::Text, false)
            .await
            .unwrap();
        assert!(q2.sparse.is_none());
    }

    #[test]
    fn split_to_cap_respects_cap() {
        let text = "abcdef".repeat(10);
        for piece in split_to_cap(&text, 7) {
            assert!(piece.len() <= 7);
        }
        assert_eq!(split_to_cap("short", 100), vec!["short".to_string()]);
    }
}
