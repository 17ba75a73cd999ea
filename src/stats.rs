//! Management operations: stats, scope listing, history, status, clear.
//!
//! Read-side summaries of what is indexed, plus the explicit destructive
//! `clear` operation (with dry-run) that drops collections and cascades the
//! dataset records.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::Path;
use tracing::info;

use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::merkle;
use crate::models::IngestionJob;
use crate::scope::{self, AccessVia};

#[derive(Debug, Clone, Serialize)]
pub struct DatasetStats {
    pub dataset: String,
    pub dataset_id: String,
    pub collection: String,
    pub backend: String,
    pub dimension: usize,
    pub is_hybrid: bool,
    pub point_count: i64,
    pub chunk_rows: i64,
    pub last_indexed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProjectStats {
    pub project: String,
    pub project_id: String,
    pub datasets: Vec<DatasetStats>,
}

/// Per-dataset index statistics for one project.
pub async fn stats(engine: &Engine, project: &str) -> Result<ProjectStats> {
    let project_record = engine
        .store
        .get_project_by_name(project)
        .await?
        .ok_or_else(|| Error::not_found("project not found").with_resource(project))?;

    let mut datasets = Vec::new();
    for dataset in engine
        .store
        .list_datasets_for_project(&project_record.id)
        .await?
    {
        let chunk_rows = engine.store.count_chunks(&dataset.id).await?;
        for binding in engine.store.list_collection_bindings(&dataset.id).await? {
            datasets.push(DatasetStats {
                dataset: dataset.name.clone(),
                dataset_id: dataset.id.clone(),
                collection: binding.collection_name,
                backend: binding.backend,
                dimension: binding.dimension,
                is_hybrid: binding.is_hybrid,
                point_count: binding.point_count,
                chunk_rows,
                last_indexed_at: binding.last_indexed_at,
            });
        }
    }

    Ok(ProjectStats {
        project: project_record.name,
        project_id: project_record.id,
        datasets,
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct ScopeEntry {
    pub dataset: String,
    pub dataset_id: String,
    pub collection: String,
    /// `own`, `share`, or `global`.
    pub via: String,
    pub is_global: bool,
}

/// Everything a query scoped to `project` may touch.
pub async fn list_scopes(engine: &Engine, project: &str) -> Result<Vec<ScopeEntry>> {
    let access = scope::resolve_access_set(&engine.store, project, None, true).await?;
    Ok(access
        .into_iter()
        .map(|entry| ScopeEntry {
            dataset: entry.dataset.name,
            dataset_id: entry.dataset.id,
            collection: entry.dataset.collection_name,
            via: match entry.via {
                AccessVia::Own => "own",
                AccessVia::Share => "share",
                AccessVia::Global => "global",
            }
            .to_string(),
            is_global: entry.dataset.is_global,
        })
        .collect())
}

/// Recent ingestion jobs for a project, newest first.
pub async fn history(engine: &Engine, project: &str, limit: i64) -> Result<Vec<IngestionJob>> {
    let project_record = engine
        .store
        .get_project_by_name(project)
        .await?
        .ok_or_else(|| Error::not_found("project not found").with_resource(project))?;
    engine.store.list_jobs(&project_record.id, limit).await
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub project: Option<String>,
    pub dataset: Option<String>,
    pub collections: Vec<DatasetStats>,
    pub active_watchers: usize,
    /// Whether a Merkle snapshot exists for the given path.
    pub snapshot_present: Option<bool>,
}

/// Point-in-time view of a scope: bindings, watcher count, snapshot state.
pub async fn status(
    engine: &Engine,
    project: Option<&str>,
    dataset: Option<&str>,
    path: Option<&Path>,
) -> Result<StatusReport> {
    let mut collections = Vec::new();
    let mut active_watchers = 0usize;

    if let Some(project) = project {
        if let Some(project_record) = engine.store.get_project_by_name(project).await? {
            for ds in engine
                .store
                .list_datasets_for_project(&project_record.id)
                .await?
            {
                if dataset.map(|d| d != ds.name).unwrap_or(false) {
                    continue;
                }
                let chunk_rows = engine.store.count_chunks(&ds.id).await?;
                for binding in engine.store.list_collection_bindings(&ds.id).await? {
                    collections.push(DatasetStats {
                        dataset: ds.name.clone(),
                        dataset_id: ds.id.clone(),
                        collection: binding.collection_name,
                        backend: binding.backend,
                        dimension: binding.dimension,
                        is_hybrid: binding.is_hybrid,
                        point_count: binding.point_count,
                        chunk_rows,
                        last_indexed_at: binding.last_indexed_at,
                    });
                }
            }
            active_watchers = engine
                .store
                .list_watchers(&project_record.id)
                .await?
                .len();
        }
    }

    let snapshot_present = path.map(|p| {
        let snap = merkle::snapshot_path(&engine.config.storage.snapshot_dir(), p);
        snap.exists()
    });

    Ok(StatusReport {
        project: project.map(|s| s.to_string()),
        dataset: dataset.map(|s| s.to_string()),
        collections,
        active_watchers,
        snapshot_present,
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct ClearResult {
    pub dry_run: bool,
    pub collections_deleted: usize,
    pub collections: Vec<String>,
}

/// Drop a project's collections (optionally one dataset) and cascade the
/// dataset records. `dry_run` reports what would be removed.
pub async fn clear(
    engine: &Engine,
    project: &str,
    dataset: Option<&str>,
    dry_run: bool,
) -> Result<ClearResult> {
    let project_record = engine
        .store
        .get_project_by_name(project)
        .await?
        .ok_or_else(|| Error::not_found("project not found").with_resource(project))?;

    let mut targets = Vec::new();
    for ds in engine
        .store
        .list_datasets_for_project(&project_record.id)
        .await?
    {
        if dataset.map(|d| d == ds.name).unwrap_or(true) {
            targets.push(ds);
        }
    }
    if let Some(dataset) = dataset {
        if targets.is_empty() {
            return Err(Error::not_found("dataset not found").with_resource(dataset));
        }
    }

    let collections: Vec<String> = targets.iter().map(|d| d.collection_name.clone()).collect();
    if dry_run {
        return Ok(ClearResult {
            dry_run: true,
            collections_deleted: 0,
            collections,
        });
    }

    for ds in &targets {
        if engine.index.has_collection(&ds.collection_name).await? {
            engine.index.drop_collection(&ds.collection_name).await?;
        }
        engine.store.delete_dataset(&ds.id).await?;
        info!(dataset = %ds.name, collection = %ds.collection_name, "cleared dataset");
    }

    Ok(ClearResult {
        dry_run: false,
        collections_deleted: collections.len(),
        collections,
    })
}
