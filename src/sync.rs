//! Incremental synchronization.
//!
//! Brings an existing index to parity with the on-disk tree in time
//! proportional to the change size: the current tree is hashed with bounded
//! workers, compared against the persisted Merkle snapshot, and only the
//! per-path differences are applied — deleted paths purge their chunks,
//! added and modified paths are re-chunked and re-embedded (old chunks of a
//! modified path are removed first so no orphans remain), and renamed paths
//! get a provenance rewrite without touching vectors.
//!
//! Sync is exclusive per `(project, dataset, root)`: a second invocation
//! queues behind the in-flight one on the same single-flight lock.

use serde::Serialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::engine::Engine;
use crate::error::{Error, ErrorKind, Result};
use crate::ingest::{self, IngestContext, SourceDoc};
use crate::merkle::{self, MerkleTree, TreeDiff};
use crate::models::SourceType;
use crate::progress::{emit, emit_done, ProgressSink};
use crate::vector::Filter;

/// Result of one sync run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncStats {
    /// `unchanged` or `synced`.
    pub status: String,
    pub added: usize,
    pub modified: usize,
    pub deleted: usize,
    pub renamed: usize,
    pub unchanged: usize,
    pub chunks_written: usize,
    pub point_count: i64,
}

/// Full sync of `root` against its snapshot.
pub async fn run_sync(
    engine: &Engine,
    project: &str,
    dataset: &str,
    root: &Path,
    force: bool,
    progress: Option<ProgressSink>,
    cancel: CancellationToken,
) -> Result<SyncStats> {
    let root = canonical_root(root)?;
    let lock = engine.sync_lock(project, dataset, &root);
    let _guard = lock.lock().await;
    let progress = progress.as_ref();

    let ctx = resolve_sync_scope(engine, project, dataset).await?;

    // Load the prior snapshot; a corrupt one degrades to a full rescan.
    let snap_path = merkle::snapshot_path(&engine.config.storage.snapshot_dir(), &root);
    let (old_tree, forced_rescan) = match MerkleTree::load(&snap_path) {
        Ok(Some(tree)) => (tree, false),
        Ok(None) => (MerkleTree::empty(), false),
        Err(e) if e.kind == ErrorKind::CorruptSnapshot => {
            warn!(snapshot = %snap_path.display(), "corrupt snapshot; full rescan");
            (MerkleTree::empty(), true)
        }
        Err(e) => return Err(e),
    };

    emit(progress, "hash", 0, 1, "hashing current tree");
    let rel_paths = ingest::enumerate_local_files(&root)?;
    let new_tree = ingest::hash_tree(&root, &rel_paths, engine.config.sync.workers).await?;

    if new_tree.root == old_tree.root && !force && !forced_rescan {
        emit_done(progress, "done", "tree unchanged");
        return Ok(SyncStats {
            status: "unchanged".to_string(),
            unchanged: new_tree.len(),
            point_count: engine.index.count(&ctx.collection).await?,
            ..Default::default()
        });
    }

    let delta = merkle::diff(&old_tree, &new_tree);
    let stats = apply_delta(engine, &ctx, &root, &delta, progress, &cancel).await?;

    new_tree.save(&snap_path)?;
    let point_count = engine.index.count(&ctx.collection).await?;
    engine
        .store
        .finalize_collection_binding(&ctx.dataset.id, ctx.backend, point_count, Some(&new_tree.root))
        .await?;
    emit_done(progress, "done", format!("{point_count} points after sync"));

    Ok(SyncStats {
        status: "synced".to_string(),
        added: delta.added.len(),
        modified: delta.modified.len(),
        deleted: delta.deleted.len(),
        renamed: delta.renamed.len(),
        unchanged: delta.unchanged.len(),
        chunks_written: stats,
        point_count,
    })
}

/// Sync only a recorded change set (the watcher's debounced batch), leaving
/// the rest of the snapshot untouched.
pub async fn run_sync_subset(
    engine: &Engine,
    project: &str,
    dataset: &str,
    root: &Path,
    changed: &HashSet<PathBuf>,
    cancel: CancellationToken,
) -> Result<SyncStats> {
    let root = canonical_root(root)?;
    let lock = engine.sync_lock(project, dataset, &root);
    let _guard = lock.lock().await;

    let ctx = resolve_sync_scope(engine, project, dataset).await?;
    let snap_path = merkle::snapshot_path(&engine.config.storage.snapshot_dir(), &root);
    let mut snapshot = match MerkleTree::load(&snap_path) {
        Ok(Some(tree)) => tree,
        Ok(None) => MerkleTree::empty(),
        Err(e) if e.kind == ErrorKind::CorruptSnapshot => MerkleTree::empty(),
        Err(e) => return Err(e),
    };

    // Restrict both sides of the diff to the changed set.
    let ignore = ingest::ignore_globset();
    let mut subset_rel: Vec<String> = Vec::new();
    for abs in changed {
        let Ok(rel) = abs.strip_prefix(&root) else {
            continue;
        };
        let rel = rel.to_string_lossy().replace('\\', "/");
        if rel.is_empty() || ignore.is_match(&rel) || !ingest::is_supported_path(&rel) {
            continue;
        }
        subset_rel.push(rel);
    }
    subset_rel.sort();
    subset_rel.dedup();
    if subset_rel.is_empty() {
        return Ok(SyncStats {
            status: "unchanged".to_string(),
            ..Default::default()
        });
    }

    let old_subset = MerkleTree::from_hashes(
        subset_rel
            .iter()
            .filter_map(|rel| snapshot.files.get(rel).map(|h| (rel.clone(), h.clone()))),
    );

    let mut present: Vec<String> = Vec::new();
    for rel in &subset_rel {
        let abs = root.join(rel);
        if abs.is_file() {
            present.push(rel.clone());
        }
    }
    let new_subset = ingest::hash_tree(&root, &present, engine.config.sync.workers).await?;

    let delta = merkle::diff(&old_subset, &new_subset);
    if delta.is_empty() {
        return Ok(SyncStats {
            status: "unchanged".to_string(),
            unchanged: delta.unchanged.len(),
            ..Default::default()
        });
    }

    let written = apply_delta(engine, &ctx, &root, &delta, None, &cancel).await?;

    // Fold the subset results back into the full snapshot.
    for path in delta.deleted.iter() {
        snapshot.files.remove(path);
    }
    for (from, to) in delta.renamed.iter() {
        if let Some(hash) = snapshot.files.remove(from) {
            snapshot.files.insert(to.clone(), hash);
        }
    }
    for path in delta.added.iter().chain(delta.modified.iter()) {
        if let Some(hash) = new_subset.files.get(path) {
            snapshot.files.insert(path.clone(), hash.clone());
        }
    }
    let snapshot = MerkleTree::from_hashes(snapshot.files.into_iter());
    snapshot.save(&snap_path)?;

    let point_count = engine.index.count(&ctx.collection).await?;
    engine
        .store
        .finalize_collection_binding(&ctx.dataset.id, ctx.backend, point_count, Some(&snapshot.root))
        .await?;

    Ok(SyncStats {
        status: "synced".to_string(),
        added: delta.added.len(),
        modified: delta.modified.len(),
        deleted: delta.deleted.len(),
        renamed: delta.renamed.len(),
        unchanged: delta.unchanged.len(),
        chunks_written: written,
        point_count,
    })
}

fn canonical_root(root: &Path) -> Result<PathBuf> {
    if !root.is_absolute() {
        return Err(Error::validation(format!(
            "sync path must be absolute: {}",
            root.display()
        )));
    }
    root.canonicalize().map_err(|e| {
        Error::new(
            ErrorKind::Validation,
            format!("cannot resolve {}: {e}", root.display()),
        )
    })
}

/// Resolve scope records and make sure the collection and binding exist, so
/// a first sync on a fresh dataset behaves like an initial ingest.
async fn resolve_sync_scope(engine: &Engine, project: &str, dataset: &str) -> Result<IngestContext> {
    let project = engine.store.get_or_create_project(project).await?;
    let dataset = engine.store.get_or_create_dataset(&project, dataset).await?;
    let collection = dataset.collection_name.clone();
    let hybrid = engine.embedder.sparse_enabled();
    let backend: &'static str = if hybrid { "hybrid" } else { "dense" };

    engine
        .store
        .get_or_create_collection_binding(
            &dataset.id,
            &collection,
            backend,
            engine.embedder.dims(),
            hybrid,
        )
        .await?;
    if !engine.index.has_collection(&collection).await? {
        if hybrid {
            engine
                .index
                .create_hybrid_collection(&collection, engine.embedder.dims())
                .await?;
        } else {
            engine
                .index
                .create_collection(&collection, engine.embedder.dims())
                .await?;
        }
    }

    Ok(IngestContext {
        project,
        dataset,
        collection,
        backend,
        hybrid,
        source_type: SourceType::Code,
        repo: None,
        branch: None,
        commit: None,
    })
}

/// Apply a computed delta: purge deletions, re-index additions and
/// modifications, rewrite provenance for renames.
async fn apply_delta(
    engine: &Engine,
    ctx: &IngestContext,
    root: &Path,
    delta: &TreeDiff,
    progress: Option<&ProgressSink>,
    cancel: &CancellationToken,
) -> Result<usize> {
    info!(
        added = delta.added.len(),
        modified = delta.modified.len(),
        deleted = delta.deleted.len(),
        renamed = delta.renamed.len(),
        collection = %ctx.collection,
        "applying sync delta"
    );

    // Deletions first (modified paths also purge their old chunks so stale
    // chunk ids never linger).
    for path in delta.deleted.iter().chain(delta.modified.iter()) {
        if cancel.is_cancelled() {
            return Err(Error::cancelled());
        }
        let filter = Filter {
            dataset_ids: Some(vec![ctx.dataset.id.clone()]),
            relative_path: Some(path.clone()),
            ..Default::default()
        };
        engine.index.delete_by_filter(&ctx.collection, &filter).await?;
        engine.store.delete_chunks_by_path(&ctx.dataset.id, path).await?;
    }

    // Renames rewrite provenance only; vectors stay put.
    for (from, to) in &delta.renamed {
        engine
            .index
            .rename_path(&ctx.collection, &ctx.dataset.id, from, to)
            .await?;
        engine.store.rename_chunk_paths(&ctx.dataset.id, from, to).await?;
    }

    // Re-index added and modified paths through the shared pipeline.
    let mut docs: Vec<SourceDoc> = Vec::new();
    for rel in delta.added.iter().chain(delta.modified.iter()) {
        let abs = root.join(rel);
        let Ok(text) = tokio::fs::read_to_string(&abs).await else {
            continue;
        };
        let ext = Path::new(rel)
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        docs.push(SourceDoc {
            key: rel.clone(),
            content_hash: merkle::hash_bytes(text.as_bytes()),
            language: crate::chunker::language_for_extension(&ext).map(|s| s.to_string()),
            text,
            url: None,
            title: None,
        });
    }

    if docs.is_empty() {
        return Ok(0);
    }
    let stats = ingest::process_docs(engine, ctx, &docs, None, progress, cancel).await?;
    Ok(stats.points_written)
}
