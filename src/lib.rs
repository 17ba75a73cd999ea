//! # Context Scope
//!
//! **A project-scoped code and document search engine with hybrid retrieval.**
//!
//! Context Scope ingests source trees (local paths, Git repositories,
//! crawled web pages) into per-dataset collections, chunks and embeds their
//! contents with dense and sparse models, stores vectors and metadata in
//! SQLite, and answers natural-language queries with hybrid retrieval,
//! optional cross-encoder reranking, and optional LLM answer synthesis. A
//! Merkle-hash incremental synchronizer with a debounced file watcher keeps
//! local indexes current.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌───────────────┐   ┌───────────────┐
//! │   Sources    │──▶│   Ingestion    │──▶│    SQLite      │
//! │ FS/Git/Crawl │   │ Chunk + Embed │   │ Metadata+Vec  │
//! └──────────────┘   └───────────────┘   └───────┬───────┘
//!                                                │
//!        ┌────────────────┐   ┌─────────────────┤
//!        │  Synchronizer  │   ▼                 ▼
//!        │  + Watcher     │  ┌──────────┐  ┌───────────┐
//!        └───────┬────────┘  │  Query   │  │   Smart   │
//!                └──────────▶│ Executor │─▶│   Query   │
//!                            └──────────┘  └───────────┘
//! ```
//!
//! ## Data Flow
//!
//! 1. A source is enumerated into documents with content hashes.
//! 2. The **ingestion orchestrator** ([`ingest`]) chunks each document
//!    ([`chunker`]), routes chunks through the **embedding coordinator**
//!    ([`embedding`]), and dual-writes points ([`vector`]) plus shadow rows
//!    ([`store`]).
//! 3. The **scope manager** ([`scope`]) names collections canonically and
//!    resolves the access set a query may touch (own + shared + global).
//! 4. The **synchronizer** ([`sync`]) diffs the on-disk tree against its
//!    Merkle snapshot ([`merkle`]) and applies only the delta; the
//!    **watcher** ([`watch`]) debounces filesystem events into subset syncs.
//! 5. The **query executor** ([`query`]) fans out dense/hybrid searches over
//!    the access set, fuses with RRF, thresholds, and optionally reranks
//!    ([`rerank`]); the **smart-query layer** ([`smart`]) adds LLM query
//!    enhancement and grounded answer synthesis.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`error`] | Structured error taxonomy carried to every caller |
//! | [`models`] | Core entities: projects, datasets, chunks, jobs, payloads |
//! | [`engine`] | Constructed-once handle exposing the operation surface |
//! | [`merkle`] | Content hashing, Merkle trees, persisted snapshots |
//! | [`chunker`] | AST / heading / line-window chunking with span provenance |
//! | [`embedding`] | Dense model routing, sparse encoding, batching, retry |
//! | [`scope`] | Canonical collection naming and access-set resolution |
//! | [`store`] | Transactional metadata gateway (SQLite) |
//! | [`vector`] | Vector index capability and SQLite implementation |
//! | [`ingest`] | Seven-phase ingestion orchestrator |
//! | [`git_source`] | Shallow clone/fetch with provenance |
//! | [`crawl`] | Page-producer capability and bounded HTTP fetcher |
//! | [`sync`] | Merkle-diff incremental synchronizer |
//! | [`watch`] | Debounced filesystem watcher |
//! | [`query`] | Access-set fan-out, RRF fusion, threshold, rerank |
//! | [`smart`] | LLM query enhancement and answer synthesis |
//! | [`rerank`] | Cross-encoder reranking capability |
//! | [`jobs`] | Job and watcher registries with cooperative cancellation |
//! | [`defaults`] | Scope defaults file and automatic scoping |
//! | [`stats`] | Stats, scope listing, history, status, clear |
//! | [`db`] | SQLite connection pool |
//! | [`migrate`] | Idempotent schema migrations |
//! | [`progress`] | Progress events for long-running operations |

pub mod chunker;
pub mod config;
pub mod crawl;
pub mod db;
pub mod defaults;
pub mod embedding;
pub mod engine;
pub mod error;
pub mod git_source;
pub mod ingest;
pub mod jobs;
pub mod merkle;
pub mod migrate;
pub mod models;
pub mod progress;
pub mod query;
pub mod rerank;
pub mod scope;
pub mod smart;
pub mod stats;
pub mod store;
pub mod sync;
pub mod vector;
pub mod watch;
