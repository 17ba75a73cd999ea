//! Configuration parsing and validation.
//!
//! The engine is configured via a TOML file (default: `./config/ctxscope.toml`).
//! Every knob has a serde default, so a missing or empty file yields a working
//! local-only configuration.
//!
//! # Sections
//!
//! - `[storage]` — SQLite path, Merkle snapshot directory, defaults file
//! - `[chunking]` — chunk size, overlap, chunker mode
//! - `[embedding]` — dense text/code models, sparse switch, concurrency, retries
//! - `[retrieval]` — top-k, similarity threshold, RRF rank constant
//! - `[sync]` — watcher debounce, hashing workers
//! - `[llm]` — optional answer-synthesis provider
//! - `[rerank]` — optional cross-encoder provider

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub rerank: RerankConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    /// SQLite database file holding metadata and vector points.
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
    /// Directory for per-root Merkle snapshots. Defaults to `~/.context/merkle`.
    #[serde(default)]
    pub snapshot_dir: Option<PathBuf>,
    /// Scope defaults file. Defaults to `~/.context/claude-mcp.json`.
    #[serde(default)]
    pub defaults_file: Option<PathBuf>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            snapshot_dir: None,
            defaults_file: None,
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./data/ctxscope.db")
}

impl StorageConfig {
    /// Resolved snapshot directory (`~/.context/merkle` unless overridden).
    pub fn snapshot_dir(&self) -> PathBuf {
        self.snapshot_dir.clone().unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".context")
                .join("merkle")
        })
    }

    /// Resolved defaults file (`~/.context/claude-mcp.json` unless overridden).
    pub fn defaults_file(&self) -> PathBuf {
        self.defaults_file.clone().unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".context")
                .join("claude-mcp.json")
        })
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    /// Target maximum chunk size in characters (~1000 tokens).
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,
    /// Overlap between adjacent chunks in characters (~100 tokens).
    #[serde(default = "default_overlap_chars")]
    pub overlap_chars: usize,
    /// Chunker mode: `ast`, `character`, or `semantic`.
    #[serde(default = "default_chunk_mode")]
    pub mode: String,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chars: default_max_chars(),
            overlap_chars: default_overlap_chars(),
            mode: default_chunk_mode(),
        }
    }
}

fn default_max_chars() -> usize {
    4000
}
fn default_overlap_chars() -> usize {
    400
}
fn default_chunk_mode() -> String {
    "ast".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    /// Dense provider: `local`, `openai`, or `disabled`.
    #[serde(default = "default_embed_provider")]
    pub provider: String,
    /// Dense model for prose and markdown.
    #[serde(default = "default_text_model")]
    pub text_model: String,
    /// Dense model for source code.
    #[serde(default = "default_code_model")]
    pub code_model: String,
    /// Embedding dimensionality (stable within a collection).
    #[serde(default = "default_dims")]
    pub dims: usize,
    /// Whether to produce sparse vectors alongside dense ones.
    #[serde(default = "default_true")]
    pub sparse: bool,
    /// Texts per embedding request.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Maximum in-flight embedding requests.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_embed_timeout")]
    pub timeout_secs: u64,
    /// Model input cap in characters; over-cap chunks are pre-split.
    #[serde(default = "default_input_cap")]
    pub input_cap_chars: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embed_provider(),
            text_model: default_text_model(),
            code_model: default_code_model(),
            dims: default_dims(),
            sparse: true,
            batch_size: default_batch_size(),
            concurrency: default_concurrency(),
            max_retries: default_max_retries(),
            timeout_secs: default_embed_timeout(),
            input_cap_chars: default_input_cap(),
        }
    }
}

fn default_embed_provider() -> String {
    "local".to_string()
}
fn default_text_model() -> String {
    "text-embedding-3-small".to_string()
}
fn default_code_model() -> String {
    "text-embedding-3-small".to_string()
}
fn default_dims() -> usize {
    256
}
fn default_true() -> bool {
    true
}
fn default_batch_size() -> usize {
    32
}
fn default_concurrency() -> usize {
    16
}
fn default_max_retries() -> u32 {
    3
}
fn default_embed_timeout() -> u64 {
    30
}
fn default_input_cap() -> usize {
    16_000
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// Minimum dense similarity for a hit to survive the cut.
    #[serde(default = "default_threshold")]
    pub threshold: f32,
    /// RRF rank constant (`score = Σ 1/(c + rank)`).
    #[serde(default = "default_rank_constant")]
    pub rank_constant: usize,
    /// Vector-index write concurrency (batches in flight).
    #[serde(default = "default_write_concurrency")]
    pub write_concurrency: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            threshold: default_threshold(),
            rank_constant: default_rank_constant(),
            write_concurrency: default_write_concurrency(),
        }
    }
}

fn default_top_k() -> usize {
    10
}
fn default_threshold() -> f32 {
    0.5
}
fn default_rank_constant() -> usize {
    60
}
fn default_write_concurrency() -> usize {
    4
}

#[derive(Debug, Deserialize, Clone)]
pub struct SyncConfig {
    /// Quiet window before a watcher flushes its change set.
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    /// Parallel hashing/chunking workers.
    #[serde(default = "default_workers")]
    pub workers: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            workers: default_workers(),
        }
    }
}

fn default_debounce_ms() -> u64 {
    2000
}
fn default_workers() -> usize {
    8
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    /// `openai` or `disabled`.
    #[serde(default = "default_disabled")]
    pub provider: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    /// Environment variable holding the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_disabled(),
            model: default_llm_model(),
            api_key_env: default_api_key_env(),
            timeout_secs: default_llm_timeout(),
        }
    }
}

fn default_disabled() -> String {
    "disabled".to_string()
}
fn default_llm_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}
fn default_llm_timeout() -> u64 {
    60
}

impl LlmConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RerankConfig {
    /// `http` or `disabled`.
    #[serde(default = "default_disabled")]
    pub provider: String,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default = "default_rerank_model")]
    pub model: String,
    #[serde(default = "default_embed_timeout")]
    pub timeout_secs: u64,
}

impl Default for RerankConfig {
    fn default() -> Self {
        Self {
            provider: default_disabled(),
            endpoint: None,
            model: default_rerank_model(),
            timeout_secs: default_embed_timeout(),
        }
    }
}

fn default_rerank_model() -> String {
    "rerank-lite-1".to_string()
}

impl RerankConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

/// Load and validate a configuration file. A missing file yields defaults.
pub fn load_config(path: &Path) -> Result<Config> {
    let config: Config = if path.exists() {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        toml::from_str(&content).with_context(|| "Failed to parse config file")?
    } else {
        Config::default()
    };

    if config.chunking.max_chars == 0 {
        anyhow::bail!("chunking.max_chars must be > 0");
    }
    if config.chunking.overlap_chars >= config.chunking.max_chars {
        anyhow::bail!("chunking.overlap_chars must be < chunking.max_chars");
    }
    match config.chunking.mode.as_str() {
        "ast" | "character" | "semantic" => {}
        other => anyhow::bail!("Unknown chunking.mode: '{other}'. Use ast, character, or semantic."),
    }

    match config.embedding.provider.as_str() {
        "disabled" | "openai" | "local" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{other}'. Must be disabled, openai, or local."
        ),
    }
    if config.embedding.is_enabled() && config.embedding.dims == 0 {
        anyhow::bail!("embedding.dims must be > 0");
    }
    if config.embedding.concurrency == 0 || config.embedding.batch_size == 0 {
        anyhow::bail!("embedding.concurrency and embedding.batch_size must be > 0");
    }

    if !(0.0..=1.0).contains(&config.retrieval.threshold) {
        anyhow::bail!("retrieval.threshold must be in [0.0, 1.0]");
    }
    if config.retrieval.rank_constant == 0 {
        anyhow::bail!("retrieval.rank_constant must be > 0");
    }
    if config.retrieval.write_concurrency == 0 {
        anyhow::bail!("retrieval.write_concurrency must be > 0");
    }

    match config.llm.provider.as_str() {
        "disabled" | "openai" => {}
        other => anyhow::bail!("Unknown llm provider: '{other}'. Must be disabled or openai."),
    }
    match config.rerank.provider.as_str() {
        "disabled" | "http" => {}
        other => anyhow::bail!("Unknown rerank provider: '{other}'. Must be disabled or http."),
    }
    if config.rerank.provider == "http" && config.rerank.endpoint.is_none() {
        anyhow::bail!("rerank.endpoint is required when rerank.provider = 'http'");
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        assert_eq!(config.chunking.max_chars, 4000);
        assert_eq!(config.embedding.concurrency, 16);
        assert_eq!(config.retrieval.rank_constant, 60);
        assert_eq!(config.sync.debounce_ms, 2000);
        assert!(!config.llm.is_enabled());
    }

    #[test]
    fn missing_file_yields_defaults() {
        let config = load_config(Path::new("/nonexistent/ctxscope.toml")).unwrap();
        assert_eq!(config.retrieval.top_k, 10);
    }

    #[test]
    fn rejects_bad_mode() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("c.toml");
        std::fs::write(&path, "[chunking]\nmode = \"magic\"\n").unwrap();
        assert!(load_config(&path).is_err());
    }

    #[test]
    fn rejects_overlap_not_below_max() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("c.toml");
        std::fs::write(&path, "[chunking]\nmax_chars = 100\noverlap_chars = 100\n").unwrap();
        assert!(load_config(&path).is_err());
    }
}
