//! Metadata store gateway.
//!
//! The only transactional mutator of projects, datasets, collection bindings,
//! ingestion jobs, web pages, chunk shadow rows, watchers, and shares. Every
//! write either runs as a single statement or inside a scoped transaction
//! that rolls back on any error. All other components read and write through
//! this gateway.

use chrono::{DateTime, TimeZone, Utc};
use sqlx::{Row, SqlitePool};
use tracing::debug;
use uuid::Uuid;

use crate::error::{Error, ErrorKind, Result};
use crate::models::{
    Chunk, CollectionBinding, Dataset, IngestionJob, JobKind, JobStatus, Metadata, Project, Share,
    SharePermission, SourceType, WatcherInfo, WebPage,
};
use crate::scope::canonical_collection_name;

#[derive(Clone)]
pub struct MetadataStore {
    pool: SqlitePool,
}

fn ts(dt: DateTime<Utc>) -> i64 {
    dt.timestamp()
}

fn from_ts(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).single().unwrap_or_default()
}

fn metadata_from_json(json: &str) -> Metadata {
    serde_json::from_str(json).unwrap_or_default()
}

impl MetadataStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    // ============ Projects ============

    pub async fn get_or_create_project(&self, name: &str) -> Result<Project> {
        if name.trim().is_empty() {
            return Err(Error::validation("project name must not be empty"));
        }
        if let Some(project) = self.get_project_by_name(name).await? {
            return Ok(project);
        }

        let now = Utc::now();
        let project = Project {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            description: None,
            owner: None,
            is_global: false,
            metadata: Metadata::new(),
            created_at: now,
            updated_at: now,
        };
        let inserted = sqlx::query(
            r#"
            INSERT INTO projects (id, name, description, owner, is_global, metadata_json, created_at, updated_at)
            VALUES (?, ?, NULL, NULL, 0, '{}', ?, ?)
            ON CONFLICT(name) DO NOTHING
            "#,
        )
        .bind(&project.id)
        .bind(&project.name)
        .bind(ts(now))
        .bind(ts(now))
        .execute(&self.pool)
        .await?;

        if inserted.rows_affected() == 0 {
            // Lost a create race; the row exists now.
            return self
                .get_project_by_name(name)
                .await?
                .ok_or_else(|| Error::internal("project vanished after conflict"));
        }
        debug!(project = %project.name, id = %project.id, "created project");
        Ok(project)
    }

    pub async fn get_project_by_name(&self, name: &str) -> Result<Option<Project>> {
        let row = sqlx::query("SELECT * FROM projects WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| project_from_row(&r)))
    }

    pub async fn get_project(&self, id: &str) -> Result<Project> {
        let row = sqlx::query("SELECT * FROM projects WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| project_from_row(&r))
            .ok_or_else(|| Error::not_found("project not found").with_resource(id))
    }

    // ============ Datasets ============

    /// Idempotent get-or-create. The canonical collection name is computed
    /// and pinned here; a normalization collision with a different dataset is
    /// rejected at this point, before any collection exists.
    pub async fn get_or_create_dataset(&self, project: &Project, name: &str) -> Result<Dataset> {
        if name.trim().is_empty() {
            return Err(Error::validation("dataset name must not be empty"));
        }
        if let Some(dataset) = self.get_dataset(&project.id, name).await? {
            return Ok(dataset);
        }

        let collection_name = canonical_collection_name(&project.name, name);
        let now = Utc::now();
        let dataset = Dataset {
            id: Uuid::new_v4().to_string(),
            project_id: project.id.clone(),
            name: name.to_string(),
            collection_name: collection_name.clone(),
            description: None,
            is_global: false,
            metadata: Metadata::new(),
            created_at: now,
            updated_at: now,
        };

        let result = sqlx::query(
            r#"
            INSERT INTO datasets (id, project_id, name, collection_name, description, is_global, metadata_json, created_at, updated_at)
            VALUES (?, ?, ?, ?, NULL, 0, '{}', ?, ?)
            ON CONFLICT(project_id, name) DO NOTHING
            "#,
        )
        .bind(&dataset.id)
        .bind(&dataset.project_id)
        .bind(&dataset.name)
        .bind(&collection_name)
        .bind(ts(now))
        .bind(ts(now))
        .execute(&self.pool)
        .await;

        match result {
            Ok(r) if r.rows_affected() == 0 => self
                .get_dataset(&project.id, name)
                .await?
                .ok_or_else(|| Error::internal("dataset vanished after conflict")),
            Ok(_) => {
                debug!(dataset = %dataset.name, collection = %collection_name, "created dataset");
                Ok(dataset)
            }
            Err(e) => {
                // The UNIQUE(collection_name) constraint fires when two
                // distinct (project, dataset) inputs normalize identically.
                if let sqlx::Error::Database(db) = &e {
                    if db.is_unique_violation() {
                        return Err(Error::new(
                            ErrorKind::Conflict,
                            format!(
                                "dataset '{name}' normalizes to collection '{collection_name}', which is taken by another dataset"
                            ),
                        )
                        .with_resource(collection_name));
                    }
                }
                Err(e.into())
            }
        }
    }

    pub async fn get_dataset(&self, project_id: &str, name: &str) -> Result<Option<Dataset>> {
        let row = sqlx::query("SELECT * FROM datasets WHERE project_id = ? AND name = ?")
            .bind(project_id)
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| dataset_from_row(&r)))
    }

    pub async fn get_dataset_by_id(&self, id: &str) -> Result<Dataset> {
        let row = sqlx::query("SELECT * FROM datasets WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| dataset_from_row(&r))
            .ok_or_else(|| Error::not_found("dataset not found").with_resource(id))
    }

    pub async fn list_datasets_for_project(&self, project_id: &str) -> Result<Vec<Dataset>> {
        let rows = sqlx::query("SELECT * FROM datasets WHERE project_id = ? ORDER BY name")
            .bind(project_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(dataset_from_row).collect())
    }

    pub async fn list_global_datasets(&self) -> Result<Vec<Dataset>> {
        let rows = sqlx::query("SELECT * FROM datasets WHERE is_global = 1 ORDER BY name")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(dataset_from_row).collect())
    }

    /// Datasets owned by other projects that granted at least `read` to
    /// `project_id`.
    pub async fn list_shared_datasets_for(&self, project_id: &str) -> Result<Vec<Dataset>> {
        let rows = sqlx::query(
            r#"
            SELECT d.* FROM datasets d
            JOIN shares s ON s.dataset_id = d.id
            WHERE s.grantee_project_id = ?
            ORDER BY d.name
            "#,
        )
        .bind(project_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(dataset_from_row).collect())
    }

    pub async fn set_dataset_global(&self, dataset_id: &str, is_global: bool) -> Result<()> {
        let result = sqlx::query("UPDATE datasets SET is_global = ?, updated_at = ? WHERE id = ?")
            .bind(is_global as i64)
            .bind(ts(Utc::now()))
            .bind(dataset_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(Error::not_found("dataset not found").with_resource(dataset_id));
        }
        Ok(())
    }

    /// Delete a dataset and everything hanging off it (bindings, chunk
    /// shadows, web pages, shares) in one transaction.
    pub async fn delete_dataset(&self, dataset_id: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM dataset_collections WHERE dataset_id = ?")
            .bind(dataset_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM chunks WHERE dataset_id = ?")
            .bind(dataset_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM web_pages WHERE dataset_id = ?")
            .bind(dataset_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM shares WHERE dataset_id = ?")
            .bind(dataset_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM datasets WHERE id = ?")
            .bind(dataset_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    // ============ Collection bindings ============

    pub async fn get_or_create_collection_binding(
        &self,
        dataset_id: &str,
        collection_name: &str,
        backend: &str,
        dimension: usize,
        is_hybrid: bool,
    ) -> Result<CollectionBinding> {
        sqlx::query(
            r#"
            INSERT INTO dataset_collections (dataset_id, collection_name, backend, dimension, is_hybrid, point_count)
            VALUES (?, ?, ?, ?, ?, 0)
            ON CONFLICT(dataset_id, backend) DO NOTHING
            "#,
        )
        .bind(dataset_id)
        .bind(collection_name)
        .bind(backend)
        .bind(dimension as i64)
        .bind(is_hybrid as i64)
        .execute(&self.pool)
        .await?;

        let binding = self
            .get_collection_binding(dataset_id, backend)
            .await?
            .ok_or_else(|| Error::internal("binding vanished after insert"))?;
        if binding.dimension != dimension {
            return Err(Error::new(
                ErrorKind::DimensionMismatch,
                format!(
                    "collection {} is bound at dimension {}, got {}",
                    binding.collection_name, binding.dimension, dimension
                ),
            )
            .with_resource(binding.collection_name.clone()));
        }
        Ok(binding)
    }

    pub async fn get_collection_binding(
        &self,
        dataset_id: &str,
        backend: &str,
    ) -> Result<Option<CollectionBinding>> {
        let row =
            sqlx::query("SELECT * FROM dataset_collections WHERE dataset_id = ? AND backend = ?")
                .bind(dataset_id)
                .bind(backend)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|r| binding_from_row(&r)))
    }

    pub async fn list_collection_bindings(&self, dataset_id: &str) -> Result<Vec<CollectionBinding>> {
        let rows = sqlx::query("SELECT * FROM dataset_collections WHERE dataset_id = ?")
            .bind(dataset_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(binding_from_row).collect())
    }

    /// Record post-ingest state. Only called after a successful run, so a
    /// failed ingest leaves the binding at the prior successful state.
    pub async fn finalize_collection_binding(
        &self,
        dataset_id: &str,
        backend: &str,
        point_count: i64,
        content_fingerprint: Option<&str>,
    ) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE dataset_collections
            SET point_count = ?, last_indexed_at = ?, content_fingerprint = COALESCE(?, content_fingerprint)
            WHERE dataset_id = ? AND backend = ?
            "#,
        )
        .bind(point_count)
        .bind(ts(Utc::now()))
        .bind(content_fingerprint)
        .bind(dataset_id)
        .bind(backend)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(Error::internal(format!(
                "no collection binding for dataset {dataset_id} backend {backend}"
            )));
        }
        Ok(())
    }

    // ============ Chunk shadow rows ============

    /// Insert chunk rows for one write batch, replacing any prior row with
    /// the same id.
    pub async fn upsert_chunks(&self, chunks: &[Chunk]) -> Result<()> {
        if chunks.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await?;
        for chunk in chunks {
            sqlx::query(
                r#"
                INSERT OR REPLACE INTO chunks
                    (id, dataset_id, collection_name, chunk_index, content, content_hash,
                     source_type, relative_path, url, start_line, end_line, language)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&chunk.id)
            .bind(&chunk.dataset_id)
            .bind(&chunk.collection_name)
            .bind(chunk.chunk_index)
            .bind(&chunk.content)
            .bind(&chunk.content_hash)
            .bind(chunk.source_type.as_str())
            .bind(&chunk.relative_path)
            .bind(&chunk.url)
            .bind(chunk.start_line.map(|v| v as i64))
            .bind(chunk.end_line.map(|v| v as i64))
            .bind(&chunk.language)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn delete_chunks_by_path(&self, dataset_id: &str, relative_path: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM chunks WHERE dataset_id = ? AND relative_path = ?")
            .bind(dataset_id)
            .bind(relative_path)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn rename_chunk_paths(
        &self,
        dataset_id: &str,
        old_path: &str,
        new_path: &str,
    ) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE chunks SET relative_path = ? WHERE dataset_id = ? AND relative_path = ?",
        )
        .bind(new_path)
        .bind(dataset_id)
        .bind(old_path)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn count_chunks(&self, dataset_id: &str) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks WHERE dataset_id = ?")
            .bind(dataset_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    // ============ Web pages ============

    pub async fn upsert_web_page(
        &self,
        dataset_id: &str,
        url: &str,
        title: Option<&str>,
        domain: Option<&str>,
        content: &str,
        metadata: &Metadata,
    ) -> Result<WebPage> {
        let now = Utc::now();
        let id = Uuid::new_v4().to_string();
        let metadata_json = serde_json::to_string(metadata)
            .map_err(|e| Error::internal(format!("metadata serialize: {e}")))?;

        sqlx::query(
            r#"
            INSERT INTO web_pages (id, dataset_id, url, title, domain, content, status, metadata_json, crawled_at)
            VALUES (?, ?, ?, ?, ?, ?, 'crawled', ?, ?)
            ON CONFLICT(dataset_id, url) DO UPDATE SET
                title = excluded.title,
                domain = excluded.domain,
                content = excluded.content,
                status = excluded.status,
                metadata_json = excluded.metadata_json,
                crawled_at = excluded.crawled_at
            "#,
        )
        .bind(&id)
        .bind(dataset_id)
        .bind(url)
        .bind(title)
        .bind(domain)
        .bind(content)
        .bind(&metadata_json)
        .bind(ts(now))
        .execute(&self.pool)
        .await?;

        let row = sqlx::query("SELECT * FROM web_pages WHERE dataset_id = ? AND url = ?")
            .bind(dataset_id)
            .bind(url)
            .fetch_one(&self.pool)
            .await?;
        Ok(web_page_from_row(&row))
    }

    pub async fn list_web_pages(&self, dataset_id: &str) -> Result<Vec<WebPage>> {
        let rows = sqlx::query("SELECT * FROM web_pages WHERE dataset_id = ? ORDER BY url")
            .bind(dataset_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(web_page_from_row).collect())
    }

    // ============ Ingestion jobs ============

    pub async fn create_job(
        &self,
        project_id: &str,
        dataset_id: &str,
        kind: JobKind,
        source: &str,
    ) -> Result<IngestionJob> {
        let now = Utc::now();
        let job = IngestionJob {
            id: Uuid::new_v4().to_string(),
            project_id: project_id.to_string(),
            dataset_id: dataset_id.to_string(),
            kind,
            source: source.to_string(),
            status: JobStatus::Pending,
            summary: None,
            processed: 0,
            total: 0,
            started_at: None,
            finished_at: None,
            error: None,
            created_at: now,
        };
        sqlx::query(
            r#"
            INSERT INTO ingestion_jobs (id, project_id, dataset_id, kind, source, status, processed, total, created_at)
            VALUES (?, ?, ?, ?, ?, 'pending', 0, 0, ?)
            "#,
        )
        .bind(&job.id)
        .bind(&job.project_id)
        .bind(&job.dataset_id)
        .bind(kind.as_str())
        .bind(&job.source)
        .bind(ts(now))
        .execute(&self.pool)
        .await?;
        Ok(job)
    }

    pub async fn get_job(&self, id: &str) -> Result<IngestionJob> {
        let row = sqlx::query("SELECT * FROM ingestion_jobs WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| job_from_row(&r))
            .ok_or_else(|| Error::not_found("job not found").with_resource(id))
    }

    /// Validated state transition; terminal states never re-transition.
    pub async fn transition_job(
        &self,
        id: &str,
        next: JobStatus,
        error: Option<&str>,
        summary: Option<&str>,
    ) -> Result<IngestionJob> {
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query("SELECT status FROM ingestion_jobs WHERE id = ?")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| Error::not_found("job not found").with_resource(id))?;
        let current: JobStatus = row
            .get::<String, _>("status")
            .parse()
            .map_err(Error::internal)?;
        if !current.can_transition_to(next) {
            tx.rollback().await.ok();
            return Err(Error::new(
                ErrorKind::Conflict,
                format!("job is {} and cannot become {}", current.as_str(), next.as_str()),
            )
            .with_resource(id));
        }

        let now = ts(Utc::now());
        let started_at = if next == JobStatus::Running {
            Some(now)
        } else {
            None
        };
        let finished_at = if next.is_terminal() { Some(now) } else { None };
        sqlx::query(
            r#"
            UPDATE ingestion_jobs
            SET status = ?,
                error = COALESCE(?, error),
                summary = COALESCE(?, summary),
                started_at = COALESCE(?, started_at),
                finished_at = COALESCE(?, finished_at)
            WHERE id = ?
            "#,
        )
        .bind(next.as_str())
        .bind(error)
        .bind(summary)
        .bind(started_at)
        .bind(finished_at)
        .bind(id)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        self.get_job(id).await
    }

    pub async fn update_job_progress(&self, id: &str, processed: i64, total: i64) -> Result<()> {
        sqlx::query("UPDATE ingestion_jobs SET processed = ?, total = ? WHERE id = ?")
            .bind(processed)
            .bind(total)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn list_jobs(&self, project_id: &str, limit: i64) -> Result<Vec<IngestionJob>> {
        let rows = sqlx::query(
            "SELECT * FROM ingestion_jobs WHERE project_id = ? ORDER BY created_at DESC LIMIT ?",
        )
        .bind(project_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(job_from_row).collect())
    }

    // ============ Watchers ============

    pub async fn insert_watcher(&self, watcher: &WatcherInfo) -> Result<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO watchers (id, project_id, dataset_id, path, started_at, sync_count)
            VALUES (?, ?, ?, ?, ?, 0)
            ON CONFLICT(project_id, dataset_id, path) DO NOTHING
            "#,
        )
        .bind(&watcher.id)
        .bind(&watcher.project_id)
        .bind(&watcher.dataset_id)
        .bind(&watcher.path)
        .bind(ts(watcher.started_at))
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(Error::new(
                ErrorKind::AlreadyWatching,
                format!("a watcher already covers {}", watcher.path),
            )
            .with_resource(watcher.path.clone()));
        }
        Ok(())
    }

    pub async fn touch_watcher(&self, id: &str) -> Result<()> {
        sqlx::query(
            "UPDATE watchers SET last_sync_at = ?, sync_count = sync_count + 1 WHERE id = ?",
        )
        .bind(ts(Utc::now()))
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn delete_watcher(&self, id: &str) -> Result<()> {
        let result = sqlx::query("DELETE FROM watchers WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(Error::not_found("watcher not found").with_resource(id));
        }
        Ok(())
    }

    pub async fn list_watchers(&self, project_id: &str) -> Result<Vec<WatcherInfo>> {
        let rows = sqlx::query("SELECT * FROM watchers WHERE project_id = ? ORDER BY started_at")
            .bind(project_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(watcher_from_row).collect())
    }

    // ============ Shares ============

    pub async fn create_share(
        &self,
        dataset_id: &str,
        owner_project_id: &str,
        grantee_project_id: &str,
        permission: SharePermission,
    ) -> Result<Share> {
        if owner_project_id == grantee_project_id {
            return Err(Error::validation("cannot share a dataset with its own project"));
        }
        let now = Utc::now();
        sqlx::query(
            r#"
            INSERT INTO shares (dataset_id, owner_project_id, grantee_project_id, permission, created_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(dataset_id, grantee_project_id) DO UPDATE SET permission = excluded.permission
            "#,
        )
        .bind(dataset_id)
        .bind(owner_project_id)
        .bind(grantee_project_id)
        .bind(permission.as_str())
        .bind(ts(now))
        .execute(&self.pool)
        .await?;
        Ok(Share {
            dataset_id: dataset_id.to_string(),
            owner_project_id: owner_project_id.to_string(),
            grantee_project_id: grantee_project_id.to_string(),
            permission,
            created_at: now,
        })
    }

    pub async fn revoke_share(&self, dataset_id: &str, grantee_project_id: &str) -> Result<()> {
        let result =
            sqlx::query("DELETE FROM shares WHERE dataset_id = ? AND grantee_project_id = ?")
                .bind(dataset_id)
                .bind(grantee_project_id)
                .execute(&self.pool)
                .await?;
        if result.rows_affected() == 0 {
            return Err(Error::not_found("share not found").with_resource(dataset_id));
        }
        Ok(())
    }
}

// ============ Row mapping ============

fn project_from_row(row: &sqlx::sqlite::SqliteRow) -> Project {
    Project {
        id: row.get("id"),
        name: row.get("name"),
        description: row.get("description"),
        owner: row.get("owner"),
        is_global: row.get::<i64, _>("is_global") != 0,
        metadata: metadata_from_json(&row.get::<String, _>("metadata_json")),
        created_at: from_ts(row.get("created_at")),
        updated_at: from_ts(row.get("updated_at")),
    }
}

fn dataset_from_row(row: &sqlx::sqlite::SqliteRow) -> Dataset {
    Dataset {
        id: row.get("id"),
        project_id: row.get("project_id"),
        name: row.get("name"),
        collection_name: row.get("collection_name"),
        description: row.get("description"),
        is_global: row.get::<i64, _>("is_global") != 0,
        metadata: metadata_from_json(&row.get::<String, _>("metadata_json")),
        created_at: from_ts(row.get("created_at")),
        updated_at: from_ts(row.get("updated_at")),
    }
}

fn binding_from_row(row: &sqlx::sqlite::SqliteRow) -> CollectionBinding {
    CollectionBinding {
        dataset_id: row.get("dataset_id"),
        collection_name: row.get("collection_name"),
        backend: row.get("backend"),
        dimension: row.get::<i64, _>("dimension") as usize,
        is_hybrid: row.get::<i64, _>("is_hybrid") != 0,
        point_count: row.get("point_count"),
        last_indexed_at: row
            .get::<Option<i64>, _>("last_indexed_at")
            .map(from_ts),
        content_fingerprint: row.get("content_fingerprint"),
    }
}

fn web_page_from_row(row: &sqlx::sqlite::SqliteRow) -> WebPage {
    WebPage {
        id: row.get("id"),
        dataset_id: row.get("dataset_id"),
        url: row.get("url"),
        title: row.get("title"),
        domain: row.get("domain"),
        content: row.get("content"),
        status: row.get("status"),
        metadata: metadata_from_json(&row.get::<String, _>("metadata_json")),
        crawled_at: from_ts(row.get("crawled_at")),
    }
}

fn job_from_row(row: &sqlx::sqlite::SqliteRow) -> IngestionJob {
    let kind = match row.get::<String, _>("kind").as_str() {
        "github" => JobKind::Github,
        "crawl" => JobKind::Crawl,
        _ => JobKind::Local,
    };
    IngestionJob {
        id: row.get("id"),
        project_id: row.get("project_id"),
        dataset_id: row.get("dataset_id"),
        kind,
        source: row.get("source"),
        status: row
            .get::<String, _>("status")
            .parse()
            .unwrap_or(JobStatus::Failed),
        summary: row.get("summary"),
        processed: row.get("processed"),
        total: row.get("total"),
        started_at: row.get::<Option<i64>, _>("started_at").map(from_ts),
        finished_at: row.get::<Option<i64>, _>("finished_at").map(from_ts),
        error: row.get("error"),
        created_at: from_ts(row.get("created_at")),
    }
}

fn watcher_from_row(row: &sqlx::sqlite::SqliteRow) -> WatcherInfo {
    WatcherInfo {
        id: row.get("id"),
        project_id: row.get("project_id"),
        dataset_id: row.get("dataset_id"),
        path: row.get("path"),
        started_at: from_ts(row.get("started_at")),
        last_sync_at: row.get::<Option<i64>, _>("last_sync_at").map(from_ts),
        sync_count: row.get("sync_count"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_store() -> (tempfile::TempDir, MetadataStore) {
        let dir = tempfile::tempdir().unwrap();
        let config = crate::config::Config {
            storage: crate::config::StorageConfig {
                db_path: dir.path().join("test.db"),
                ..Default::default()
            },
            ..Default::default()
        };
        let pool = crate::db::connect(&config).await.unwrap();
        crate::migrate::run_migrations(&pool).await.unwrap();
        (dir, MetadataStore::new(pool))
    }

    #[tokio::test]
    async fn project_get_or_create_is_idempotent() {
        let (_dir, store) = test_store().await;
        let a = store.get_or_create_project("acme").await.unwrap();
        let b = store.get_or_create_project("acme").await.unwrap();
        assert_eq!(a.id, b.id);
    }

    #[tokio::test]
    async fn dataset_pins_collection_name() {
        let (_dir, store) = test_store().await;
        let project = store.get_or_create_project("My App").await.unwrap();
        let dataset = store.get_or_create_dataset(&project, "Main").await.unwrap();
        assert_eq!(dataset.collection_name, "project_my_app_dataset_main");
        let again = store.get_or_create_dataset(&project, "Main").await.unwrap();
        assert_eq!(again.id, dataset.id);
    }

    #[tokio::test]
    async fn colliding_normalization_is_rejected_at_creation() {
        let (_dir, store) = test_store().await;
        let project = store.get_or_create_project("acme").await.unwrap();
        store.get_or_create_dataset(&project, "a b").await.unwrap();
        let err = store
            .get_or_create_dataset(&project, "a_b")
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Conflict);
    }

    #[tokio::test]
    async fn job_transitions_are_validated() {
        let (_dir, store) = test_store().await;
        let project = store.get_or_create_project("p").await.unwrap();
        let dataset = store.get_or_create_dataset(&project, "d").await.unwrap();
        let job = store
            .create_job(&project.id, &dataset.id, JobKind::Local, "/tmp/x")
            .await
            .unwrap();
        assert_eq!(job.status, JobStatus::Pending);

        let job = store
            .transition_job(&job.id, JobStatus::Running, None, None)
            .await
            .unwrap();
        assert_eq!(job.status, JobStatus::Running);
        assert!(job.started_at.is_some());

        let job = store
            .transition_job(&job.id, JobStatus::Completed, None, Some("ok"))
            .await
            .unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert!(job.finished_at.is_some());

        // Terminal states are final.
        let err = store
            .transition_job(&job.id, JobStatus::Running, None, None)
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Conflict);
    }

    #[tokio::test]
    async fn web_page_unique_per_dataset_url() {
        let (_dir, store) = test_store().await;
        let project = store.get_or_create_project("p").await.unwrap();
        let dataset = store.get_or_create_dataset(&project, "docs").await.unwrap();
        let meta = Metadata::new();
        let first = store
            .upsert_web_page(&dataset.id, "https://x.dev/a", Some("A"), Some("x.dev"), "v1", &meta)
            .await
            .unwrap();
        let second = store
            .upsert_web_page(&dataset.id, "https://x.dev/a", Some("A"), Some("x.dev"), "v2", &meta)
            .await
            .unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(second.content, "v2");
        assert_eq!(store.list_web_pages(&dataset.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn watcher_uniqueness_enforced() {
        let (_dir, store) = test_store().await;
        let watcher = WatcherInfo {
            id: "w1".into(),
            project_id: "p1".into(),
            dataset_id: "d1".into(),
            path: "/tmp/watched".into(),
            started_at: Utc::now(),
            last_sync_at: None,
            sync_count: 0,
        };
        store.insert_watcher(&watcher).await.unwrap();
        let dup = WatcherInfo {
            id: "w2".into(),
            ..watcher.clone()
        };
        let err = store.insert_watcher(&dup).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::AlreadyWatching);
    }

    #[tokio::test]
    async fn shares_grant_and_revoke() {
        let (_dir, store) = test_store().await;
        let a = store.get_or_create_project("a").await.unwrap();
        let b = store.get_or_create_project("b").await.unwrap();
        let docs = store.get_or_create_dataset(&a, "docs").await.unwrap();

        store
            .create_share(&docs.id, &a.id, &b.id, SharePermission::Read)
            .await
            .unwrap();
        let shared = store.list_shared_datasets_for(&b.id).await.unwrap();
        assert_eq!(shared.len(), 1);
        assert_eq!(shared[0].id, docs.id);

        store.revoke_share(&docs.id, &b.id).await.unwrap();
        assert!(store.list_shared_datasets_for(&b.id).await.unwrap().is_empty());
    }
}
