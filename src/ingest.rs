//! Ingestion orchestration.
//!
//! Drives a single ingest through seven ordered phases — scope resolve,
//! collection prepare, enumerate, chunk, embed, write, finalize — reporting
//! progress per phase and honoring `force` and cooperative cancellation.
//! Local paths, Git checkouts, and crawled page sets all funnel into the same
//! chunk → embed → dual-write pipeline; only enumeration and provenance
//! differ.
//!
//! Re-runs over identical inputs are idempotent: chunk ids are a stable
//! function of `(source_key, content_hash, chunk_index)`, vector upserts
//! overwrite by id, and the collection binding converges to the live point
//! count. A failed run never touches the binding, so readers keep seeing the
//! prior successful state.

use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::{Path, PathBuf};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;
use walkdir::WalkDir;

use crate::chunker::{self, ChunkParams};
use crate::crawl::PageInput;
use crate::engine::Engine;
use crate::error::{Error, ErrorKind, Result};
use crate::git_source;
use crate::merkle::{self, MerkleTree};
use crate::models::{Chunk, Dataset, Payload, Project, SourceType};
use crate::progress::{emit, emit_done, ProgressSink};
use crate::vector::Point;

/// Extensions walked during local enumeration.
pub const SUPPORTED_EXTENSIONS: &[&str] = &[
    "rs", "ts", "tsx", "js", "jsx", "mjs", "py", "go", "java", "c", "h", "cpp", "cc", "hpp", "rb",
    "php", "cs", "swift", "kt", "sh", "bash", "sql", "toml", "yaml", "yml", "json", "md",
    "markdown", "html", "htm", "txt",
];

/// Always-excluded directories and files: build output, VCS internals, IDE
/// state, caches, minified bundles, env files.
pub const IGNORE_GLOBS: &[&str] = &[
    "**/.git/**",
    "**/.hg/**",
    "**/.svn/**",
    "**/node_modules/**",
    "**/target/**",
    "**/build/**",
    "**/dist/**",
    "**/out/**",
    "**/.idea/**",
    "**/.vscode/**",
    "**/__pycache__/**",
    "**/.pytest_cache/**",
    "**/.mypy_cache/**",
    "**/.cache/**",
    "**/venv/**",
    "**/.venv/**",
    "**/*.min.js",
    "**/*.min.css",
    "**/.env",
    "**/.env.*",
    "**/*.lock",
    "**/package-lock.json",
];

/// Files larger than this are skipped during enumeration.
const MAX_FILE_BYTES: u64 = 1_500_000;

/// Points per write batch; also the job-progress granularity.
const WRITE_BATCH: usize = 128;

/// What to ingest.
#[derive(Debug, Clone)]
pub enum IngestSource {
    LocalPath { path: PathBuf },
    Git { repo: String, branch: Option<String> },
    Pages { pages: Vec<PageInput> },
}

#[derive(Debug, Clone)]
pub struct IngestRequest {
    pub project: String,
    pub dataset: String,
    pub source: IngestSource,
    pub force: bool,
    /// Durable job row to keep progress counters on, if any.
    pub job_id: Option<String>,
}

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct IngestStats {
    pub files: usize,
    pub chunks: usize,
    pub points_written: usize,
    pub embed_failures: usize,
    pub point_count: i64,
}

#[derive(Debug, Clone, serde::Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum IngestOutcome {
    /// Content fingerprint matched the last successful run.
    Skipped { reason: String },
    Completed(IngestStats),
}

/// Scope and provenance shared by every document of one ingest run.
#[derive(Debug, Clone)]
pub struct IngestContext {
    pub project: Project,
    pub dataset: Dataset,
    pub collection: String,
    pub backend: &'static str,
    pub hybrid: bool,
    pub source_type: SourceType,
    pub repo: Option<String>,
    pub branch: Option<String>,
    pub commit: Option<String>,
}

/// One enumerated document, source-kind neutral.
#[derive(Debug, Clone)]
pub struct SourceDoc {
    /// Relative path for files, URL for pages; the stable source key.
    pub key: String,
    pub text: String,
    pub content_hash: String,
    pub language: Option<String>,
    pub url: Option<String>,
    pub title: Option<String>,
}

/// Stable chunk identity: UUIDv5 over `(source_key, content_hash, index)`.
pub fn chunk_id(source_key: &str, content_hash: &str, index: usize) -> String {
    let name = format!("{source_key}|{content_hash}|{index}");
    Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes()).to_string()
}

/// Run one ingest end to end. On failure the progress sink receives a
/// terminal `failed` event mirroring the error.
pub async fn run_ingest(
    engine: &Engine,
    req: IngestRequest,
    progress: Option<ProgressSink>,
    cancel: CancellationToken,
) -> Result<IngestOutcome> {
    match run_phases(engine, req, progress.as_ref(), cancel).await {
        Ok(outcome) => Ok(outcome),
        Err(e) => {
            emit_done(progress.as_ref(), "failed", e.to_string());
            Err(e)
        }
    }
}

async fn run_phases(
    engine: &Engine,
    req: IngestRequest,
    progress: Option<&ProgressSink>,
    cancel: CancellationToken,
) -> Result<IngestOutcome> {

    // Phase 1: scope resolve.
    emit(progress, "scope", 0, 1, "resolving project and dataset");
    let project = engine.store.get_or_create_project(&req.project).await?;
    let dataset = engine.store.get_or_create_dataset(&project, &req.dataset).await?;
    let collection = dataset.collection_name.clone();
    let hybrid = engine.embedder.sparse_enabled();
    let backend: &'static str = if hybrid { "hybrid" } else { "dense" };
    let binding = engine
        .store
        .get_or_create_collection_binding(
            &dataset.id,
            &collection,
            backend,
            engine.embedder.dims(),
            hybrid,
        )
        .await?;
    emit(progress, "scope", 1, 1, collection.as_str());
    check_cancel(&cancel)?;

    // Phase 2: collection prepare.
    emit(progress, "prepare", 0, 1, "preparing collection");
    let exists = engine.index.has_collection(&collection).await?;
    if exists && req.force {
        info!(collection = %collection, "force reindex: dropping collection");
        engine.index.drop_collection(&collection).await?;
    }
    if !exists || req.force {
        if hybrid {
            engine.index.create_hybrid_collection(&collection, engine.embedder.dims()).await?;
        } else {
            engine.index.create_collection(&collection, engine.embedder.dims()).await?;
        }
    }
    emit(progress, "prepare", 1, 1, "collection ready");
    check_cancel(&cancel)?;

    // Phase 3: enumerate (and compute the content fingerprint).
    let mut ctx = IngestContext {
        project,
        dataset,
        collection: collection.clone(),
        backend,
        hybrid,
        source_type: SourceType::Code,
        repo: None,
        branch: None,
        commit: None,
    };

    let (docs, fingerprint, snapshot) = match &req.source {
        IngestSource::LocalPath { path } => {
            let (docs, tree) = enumerate_local(engine, path, progress, &cancel).await?;
            let fingerprint = tree.root.clone();
            (docs, fingerprint, Some((path.clone(), tree)))
        }
        IngestSource::Git { repo, branch } => {
            emit(progress, "enumerate", 0, 1, format!("cloning {repo}"));
            let cache_root = engine
                .config
                .storage
                .db_path
                .parent()
                .unwrap_or_else(|| Path::new("."))
                .join(".git-cache");
            let repo_url = repo.clone();
            let branch_arg = branch.clone();
            let checkout = tokio::task::spawn_blocking(move || {
                git_source::prepare_checkout(&repo_url, branch_arg.as_deref(), &cache_root)
            })
            .await
            .map_err(|e| Error::internal(format!("clone task panicked: {e}")))??;

            ctx.repo = Some(git_source::repo_short_name(repo));
            ctx.branch = Some(checkout.branch.clone());
            ctx.commit = Some(checkout.commit.clone());

            let (docs, _tree) = enumerate_local(engine, &checkout.dir, progress, &cancel).await?;
            (docs, checkout.commit.clone(), None)
        }
        IngestSource::Pages { pages } => {
            ctx.source_type = SourceType::Web;
            let docs = enumerate_pages(engine, &ctx, pages, progress).await?;
            let mut keys: Vec<String> = docs
                .iter()
                .map(|d| format!("{}\0{}", d.key, d.content_hash))
                .collect();
            keys.sort();
            let fingerprint = merkle::hash_bytes(keys.join("\n").as_bytes());
            (docs, fingerprint, None)
        }
    };
    check_cancel(&cancel)?;

    // Short-circuit: same content as the last successful run.
    if !req.force
        && binding.content_fingerprint.as_deref() == Some(fingerprint.as_str())
        && engine.index.count(&collection).await? > 0
    {
        emit_done(progress, "done", "content unchanged; skipped");
        return Ok(IngestOutcome::Skipped {
            reason: "content fingerprint unchanged".to_string(),
        });
    }

    // Phases 4-6.
    let stats = process_docs(engine, &ctx, &docs, req.job_id.as_deref(), progress, &cancel).await?;

    // Phase 7: finalize.
    emit(progress, "finalize", 0, 1, "updating collection binding");
    let point_count = engine.index.count(&collection).await?;
    engine
        .store
        .finalize_collection_binding(&ctx.dataset.id, backend, point_count, Some(&fingerprint))
        .await?;
    if let Some((root, tree)) = snapshot {
        let snap = merkle::snapshot_path(&engine.config.storage.snapshot_dir(), &root);
        tree.save(&snap)?;
    }
    emit_done(progress, "done", format!("{point_count} points indexed"));

    Ok(IngestOutcome::Completed(IngestStats {
        files: docs.len(),
        chunks: stats.chunks,
        points_written: stats.points_written,
        embed_failures: stats.embed_failures,
        point_count,
    }))
}

fn check_cancel(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        Err(Error::cancelled())
    } else {
        Ok(())
    }
}

// ============ Enumeration ============

pub fn ignore_globset() -> GlobSet {
    let mut builder = GlobSetBuilder::new();
    for pattern in IGNORE_GLOBS {
        if let Ok(glob) = Glob::new(pattern) {
            builder.add(glob);
        }
    }
    builder.build().unwrap_or_else(|_| GlobSet::empty())
}

/// Whether a relative path carries an indexable extension.
pub fn is_supported_path(rel: &str) -> bool {
    Path::new(rel)
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .map(|ext| SUPPORTED_EXTENSIONS.contains(&ext.as_str()))
        .unwrap_or(false)
}

/// Walk a directory, honoring the ignore set, extension allowlist, and size
/// cap. Returns sorted relative paths (forward slashes).
pub fn enumerate_local_files(root: &Path) -> Result<Vec<String>> {
    if !root.is_dir() {
        return Err(Error::validation(format!(
            "not a directory: {}",
            root.display()
        )));
    }
    let ignore = ignore_globset();

    let mut files = Vec::new();
    for entry in WalkDir::new(root).follow_links(false) {
        let entry = entry.map_err(|e| Error::new(ErrorKind::Io, format!("walk failed: {e}")))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(root)
            .unwrap_or(entry.path())
            .to_string_lossy()
            .replace('\\', "/");
        if ignore.is_match(&rel) || !is_supported_path(&rel) {
            continue;
        }
        if entry.metadata().map(|m| m.len() > MAX_FILE_BYTES).unwrap_or(true) {
            continue;
        }
        files.push(rel);
    }
    files.sort();
    Ok(files)
}

/// Hash the given relative paths under `root` with bounded workers and build
/// the Merkle tree.
pub async fn hash_tree(root: &Path, rel_paths: &[String], workers: usize) -> Result<MerkleTree> {
    let mut set: JoinSet<Result<(String, String)>> = JoinSet::new();
    let mut pending = rel_paths.iter().cloned().collect::<std::collections::VecDeque<_>>();
    let mut entries: Vec<(String, String)> = Vec::with_capacity(rel_paths.len());

    let spawn_one = |set: &mut JoinSet<Result<(String, String)>>, rel: String| {
        let abs = root.join(&rel);
        set.spawn_blocking(move || {
            let hash = merkle::hash_file(&abs)?;
            Ok((rel, hash))
        });
    };

    for _ in 0..workers.max(1) {
        if let Some(rel) = pending.pop_front() {
            spawn_one(&mut set, rel);
        }
    }
    while let Some(joined) = set.join_next().await {
        let pair = joined.map_err(|e| Error::internal(format!("hash task panicked: {e}")))??;
        entries.push(pair);
        if let Some(rel) = pending.pop_front() {
            spawn_one(&mut set, rel);
        }
    }

    Ok(MerkleTree::from_hashes(entries))
}

/// Enumerate a local tree into [`SourceDoc`]s plus the Merkle tree.
async fn enumerate_local(
    engine: &Engine,
    root: &Path,
    progress: Option<&ProgressSink>,
    cancel: &CancellationToken,
) -> Result<(Vec<SourceDoc>, MerkleTree)> {
    emit(progress, "enumerate", 0, 1, format!("walking {}", root.display()));
    let rel_paths = enumerate_local_files(root)?;
    let total = rel_paths.len() as u64;
    let tree = hash_tree(root, &rel_paths, engine.config.sync.workers).await?;
    check_cancel(cancel)?;

    let mut docs = Vec::with_capacity(rel_paths.len());
    for (i, rel) in rel_paths.iter().enumerate() {
        let abs = root.join(rel);
        let Ok(text) = tokio::fs::read_to_string(&abs).await else {
            // Binary or unreadable content is enumerated but not indexed.
            continue;
        };
        let ext = Path::new(rel)
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        docs.push(SourceDoc {
            key: rel.clone(),
            content_hash: tree.files.get(rel).cloned().unwrap_or_default(),
            language: chunker::language_for_extension(&ext).map(|s| s.to_string()),
            text,
            url: None,
            title: None,
        });
        if i % 64 == 0 {
            emit(progress, "enumerate", i as u64, total, rel.as_str());
            check_cancel(cancel)?;
        }
    }
    emit(progress, "enumerate", total, total, format!("{total} files"));
    Ok((docs, tree))
}

/// Upsert crawled pages into the metadata store, then expose them as
/// [`SourceDoc`]s chunked from the extracted content.
async fn enumerate_pages(
    engine: &Engine,
    ctx: &IngestContext,
    pages: &[PageInput],
    progress: Option<&ProgressSink>,
) -> Result<Vec<SourceDoc>> {
    let total = pages.len() as u64;
    let mut docs = Vec::with_capacity(pages.len());
    for (i, page) in pages.iter().enumerate() {
        let domain = crate::crawl::domain_of(&page.url);
        engine
            .store
            .upsert_web_page(
                &ctx.dataset.id,
                &page.url,
                page.title.as_deref(),
                domain.as_deref(),
                &page.content,
                &Default::default(),
            )
            .await?;
        docs.push(SourceDoc {
            key: page.url.clone(),
            content_hash: merkle::hash_bytes(page.content.as_bytes()),
            language: Some("markdown".to_string()),
            text: page.content.clone(),
            url: Some(page.url.clone()),
            title: page.title.clone(),
        });
        emit(progress, "enumerate", i as u64 + 1, total, page.url.as_str());
    }
    Ok(docs)
}

// ============ Chunk, embed, write ============

pub struct WriteStats {
    pub chunks: usize,
    pub points_written: usize,
    pub embed_failures: usize,
}

/// Chunk, embed, and dual-write the given documents. Shared by full ingest
/// and the incremental synchronizer.
pub async fn process_docs(
    engine: &Engine,
    ctx: &IngestContext,
    docs: &[SourceDoc],
    job_id: Option<&str>,
    progress: Option<&ProgressSink>,
    cancel: &CancellationToken,
) -> Result<WriteStats> {
    // Phase 4: chunk in parallel with bounded workers.
    let params: ChunkParams = (&engine.config.chunking).into();
    let total_docs = docs.len() as u64;
    emit(progress, "chunk", 0, total_docs, "chunking");

    let mut set: JoinSet<(usize, Vec<chunker::ChunkPiece>)> = JoinSet::new();
    let mut pending: std::collections::VecDeque<usize> = (0..docs.len()).collect();
    let mut pieces_by_doc: Vec<Vec<chunker::ChunkPiece>> = vec![Vec::new(); docs.len()];

    let spawn_chunk = |set: &mut JoinSet<(usize, Vec<chunker::ChunkPiece>)>, i: usize| {
        let text = docs[i].text.clone();
        let language = docs[i].language.clone();
        set.spawn_blocking(move || (i, chunker::chunk_source(&text, language.as_deref(), &params)));
    };

    for _ in 0..engine.config.sync.workers.max(1) {
        if let Some(i) = pending.pop_front() {
            spawn_chunk(&mut set, i);
        }
    }
    let mut chunked = 0u64;
    while let Some(joined) = set.join_next().await {
        let (i, pieces) =
            joined.map_err(|e| Error::internal(format!("chunk task panicked: {e}")))?;
        pieces_by_doc[i] = pieces;
        chunked += 1;
        if chunked % 32 == 0 {
            emit(progress, "chunk", chunked, total_docs, docs[i].key.as_str());
            check_cancel(cancel)?;
        }
        if let Some(next) = pending.pop_front() {
            spawn_chunk(&mut set, next);
        }
    }
    emit(progress, "chunk", total_docs, total_docs, "chunked");
    check_cancel(cancel)?;

    // Flatten in document order so vectors line up with chunks.
    struct PendingChunk<'a> {
        doc: &'a SourceDoc,
        piece: chunker::ChunkPiece,
    }
    let mut flat: Vec<PendingChunk> = Vec::new();
    for (doc, pieces) in docs.iter().zip(pieces_by_doc.into_iter()) {
        for piece in pieces {
            flat.push(PendingChunk { doc, piece });
        }
    }
    let total_chunks = flat.len();

    // Phase 5: embed, preserving order.
    emit(progress, "embed", 0, total_chunks as u64, "embedding");
    let items: Vec<(String, bool)> = flat
        .iter()
        .map(|c| (c.piece.content.clone(), c.piece.is_code))
        .collect();
    let outcome = engine.embedder.embed_mixed(&items).await?;
    let embed_failures = outcome.failed.len();
    if embed_failures > 0 {
        warn!(failures = embed_failures, "some chunks embedded as zero vectors");
    }
    emit(
        progress,
        "embed",
        total_chunks as u64,
        total_chunks as u64,
        format!("{total_chunks} chunks embedded"),
    );
    check_cancel(cancel)?;

    // Phase 6: dual-write in bounded batches.
    let mut points_written = 0usize;
    let write_total = total_chunks as u64;
    emit(progress, "write", 0, write_total, "writing points");

    let batches: Vec<(usize, usize)> = (0..total_chunks)
        .step_by(WRITE_BATCH)
        .map(|start| (start, (start + WRITE_BATCH).min(total_chunks)))
        .collect();
    let total_batches = batches.len();
    let mut failed_batches = 0usize;
    let mut last_write_error: Option<Error> = None;

    for (start, end) in batches {
        check_cancel(cancel)?;

        let mut points = Vec::with_capacity(end - start);
        let mut shadow = Vec::with_capacity(end - start);
        for i in start..end {
            let item = &flat[i];
            let id = chunk_id(&item.doc.key, &item.doc.content_hash, item.piece.chunk_index);

            let mut payload = Payload::new(
                &ctx.project.id,
                &ctx.dataset.id,
                ctx.source_type,
                &item.doc.content_hash,
            );
            payload.language = item.piece.language.clone();
            payload.repo = ctx.repo.clone();
            payload.branch = ctx.branch.clone();
            payload.commit = ctx.commit.clone();
            payload.title = item.doc.title.clone();
            payload.snippet = Some(snippet_of(&item.piece.content));
            if let Some(ref url) = item.doc.url {
                payload.url = Some(url.clone());
            } else {
                payload.relative_path = Some(item.doc.key.clone());
                payload.start_line = Some(item.piece.start_line);
                payload.end_line = Some(item.piece.end_line);
            }

            points.push(Point {
                id: id.clone(),
                dense: outcome.vectors[i].clone(),
                sparse: if ctx.hybrid {
                    engine.embedder.encode_sparse(&item.piece.content)
                } else {
                    None
                },
                payload,
            });
            shadow.push(Chunk {
                id,
                dataset_id: ctx.dataset.id.clone(),
                collection_name: ctx.collection.clone(),
                chunk_index: item.piece.chunk_index as i64,
                content: item.piece.content.clone(),
                content_hash: item.doc.content_hash.clone(),
                source_type: ctx.source_type,
                relative_path: item.doc.url.is_none().then(|| item.doc.key.clone()),
                url: item.doc.url.clone(),
                start_line: Some(item.piece.start_line),
                end_line: Some(item.piece.end_line),
                language: item.piece.language.clone(),
            });
        }

        let _write_permit = engine
            .write_semaphore
            .acquire()
            .await
            .map_err(|_| Error::internal("write semaphore closed"))?;
        match write_batch_with_retry(engine, &ctx.collection, points, &shadow, cancel).await {
            Ok(()) => points_written += end - start,
            Err(e) if e.kind == ErrorKind::Cancelled => return Err(e),
            Err(e) if e.kind == ErrorKind::DimensionMismatch => return Err(e),
            Err(e) => {
                warn!(error = %e, start, end, "write batch failed after retries");
                failed_batches += 1;
                last_write_error = Some(e);
            }
        }

        emit(
            progress,
            "write",
            points_written as u64,
            write_total,
            format!("{points_written}/{total_chunks} points"),
        );
        if let Some(job_id) = job_id {
            engine
                .store
                .update_job_progress(job_id, points_written as i64, total_chunks as i64)
                .await?;
        }
    }

    // Partial write failures degrade the run; only a run where nothing
    // landed is a failure.
    if failed_batches == total_batches && total_batches > 0 {
        return Err(last_write_error
            .unwrap_or_else(|| Error::internal("every write batch failed")));
    }

    Ok(WriteStats {
        chunks: total_chunks,
        points_written,
        embed_failures,
    })
}

/// One dual-write batch with bounded exponential backoff on transient
/// failures. The vector upsert is idempotent on point id, so a retry after a
/// partially applied batch converges.
async fn write_batch_with_retry(
    engine: &Engine,
    collection: &str,
    points: Vec<Point>,
    shadow: &[Chunk],
    cancel: &CancellationToken,
) -> Result<()> {
    const WRITE_RETRIES: u32 = 3;
    let mut last_err: Option<Error> = None;
    for attempt in 0..=WRITE_RETRIES {
        if attempt > 0 {
            tokio::time::sleep(std::time::Duration::from_secs(1 << (attempt - 1).min(4))).await;
        }
        check_cancel(cancel)?;
        let result = async {
            engine.index.upsert(collection, points.clone()).await?;
            engine.store.upsert_chunks(shadow).await
        }
        .await;
        match result {
            Ok(()) => return Ok(()),
            Err(e) if e.is_retryable() && attempt < WRITE_RETRIES => last_err = Some(e),
            Err(e) => return Err(e),
        }
    }
    Err(last_err.unwrap_or_else(|| Error::internal("write failed after retries")))
}

fn snippet_of(content: &str) -> String {
    let trimmed = content.trim();
    let mut end = trimmed.len().min(240);
    while end > 0 && !trimmed.is_char_boundary(end) {
        end -= 1;
    }
    trimmed[..end].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_ids_are_stable_and_distinct() {
        let a = chunk_id("src/main.rs", "abc", 0);
        let b = chunk_id("src/main.rs", "abc", 0);
        assert_eq!(a, b);
        assert_ne!(a, chunk_id("src/main.rs", "abc", 1));
        assert_ne!(a, chunk_id("src/main.rs", "def", 0));
        assert_ne!(a, chunk_id("src/lib.rs", "abc", 0));
    }

    #[test]
    fn enumeration_honors_ignores_and_extensions() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        std::fs::create_dir_all(root.join("src")).unwrap();
        std::fs::create_dir_all(root.join("node_modules/pkg")).unwrap();
        std::fs::create_dir_all(root.join(".git")).unwrap();
        std::fs::write(root.join("src/main.rs"), "fn main() {}").unwrap();
        std::fs::write(root.join("README.md"), "# readme").unwrap();
        std::fs::write(root.join("node_modules/pkg/index.js"), "x").unwrap();
        std::fs::write(root.join(".git/config"), "x").unwrap();
        std::fs::write(root.join("binary.png"), [0u8, 159, 146, 150]).unwrap();
        std::fs::write(root.join(".env"), "SECRET=1").unwrap();

        let files = enumerate_local_files(root).unwrap();
        assert_eq!(files, vec!["README.md".to_string(), "src/main.rs".to_string()]);
    }

    #[test]
    fn enumeration_rejects_non_directories() {
        let err = enumerate_local_files(Path::new("/nonexistent/nope")).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Validation);
    }

    #[tokio::test]
    async fn hash_tree_matches_sequential_hashing() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        std::fs::write(root.join("a.txt"), "alpha").unwrap();
        std::fs::write(root.join("b.txt"), "beta").unwrap();

        let files = vec!["a.txt".to_string(), "b.txt".to_string()];
        let tree = hash_tree(root, &files, 4).await.unwrap();
        assert_eq!(tree.len(), 2);
        assert_eq!(
            tree.files.get("a.txt").unwrap(),
            &merkle::hash_bytes(b"alpha")
        );
        // Worker count does not change the root.
        let tree_single = hash_tree(root, &files, 1).await.unwrap();
        assert_eq!(tree.root, tree_single.root);
    }

    #[test]
    fn snippet_respects_char_boundaries() {
        let s = "é".repeat(300);
        let snip = snippet_of(&s);
        assert!(snip.len() <= 240);
        assert!(!snip.is_empty());
    }
}
