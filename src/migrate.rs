//! Database schema migrations.
//!
//! Creates all required tables (projects, datasets, dataset_collections,
//! chunks, web_pages, ingestion_jobs, watchers, shares, plus the vector
//! gateway's collections and points tables) and ensures idempotent execution.
//! Designed to be run via `ctxscope init`; every other command runs it lazily
//! on startup.

use sqlx::SqlitePool;

use crate::error::Result;

pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS projects (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            description TEXT,
            owner TEXT,
            is_global INTEGER NOT NULL DEFAULT 0,
            metadata_json TEXT NOT NULL DEFAULT '{}',
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS datasets (
            id TEXT PRIMARY KEY,
            project_id TEXT NOT NULL,
            name TEXT NOT NULL,
            collection_name TEXT NOT NULL UNIQUE,
            description TEXT,
            is_global INTEGER NOT NULL DEFAULT 0,
            metadata_json TEXT NOT NULL DEFAULT '{}',
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            UNIQUE(project_id, name),
            FOREIGN KEY (project_id) REFERENCES projects(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS dataset_collections (
            dataset_id TEXT NOT NULL,
            collection_name TEXT NOT NULL,
            backend TEXT NOT NULL,
            dimension INTEGER NOT NULL,
            is_hybrid INTEGER NOT NULL DEFAULT 0,
            point_count INTEGER NOT NULL DEFAULT 0,
            last_indexed_at INTEGER,
            content_fingerprint TEXT,
            PRIMARY KEY (dataset_id, backend),
            FOREIGN KEY (dataset_id) REFERENCES datasets(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Shadow rows for search-by-metadata and sync bookkeeping.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunks (
            id TEXT PRIMARY KEY,
            dataset_id TEXT NOT NULL,
            collection_name TEXT NOT NULL,
            chunk_index INTEGER NOT NULL,
            content TEXT NOT NULL,
            content_hash TEXT NOT NULL,
            source_type TEXT NOT NULL,
            relative_path TEXT,
            url TEXT,
            start_line INTEGER,
            end_line INTEGER,
            language TEXT,
            FOREIGN KEY (dataset_id) REFERENCES datasets(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS web_pages (
            id TEXT PRIMARY KEY,
            dataset_id TEXT NOT NULL,
            url TEXT NOT NULL,
            title TEXT,
            domain TEXT,
            content TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'crawled',
            metadata_json TEXT NOT NULL DEFAULT '{}',
            crawled_at INTEGER NOT NULL,
            UNIQUE(dataset_id, url),
            FOREIGN KEY (dataset_id) REFERENCES datasets(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS ingestion_jobs (
            id TEXT PRIMARY KEY,
            project_id TEXT NOT NULL,
            dataset_id TEXT NOT NULL,
            kind TEXT NOT NULL,
            source TEXT NOT NULL,
            status TEXT NOT NULL,
            summary TEXT,
            processed INTEGER NOT NULL DEFAULT 0,
            total INTEGER NOT NULL DEFAULT 0,
            started_at INTEGER,
            finished_at INTEGER,
            error TEXT,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS watchers (
            id TEXT PRIMARY KEY,
            project_id TEXT NOT NULL,
            dataset_id TEXT NOT NULL,
            path TEXT NOT NULL,
            started_at INTEGER NOT NULL,
            last_sync_at INTEGER,
            sync_count INTEGER NOT NULL DEFAULT 0,
            UNIQUE(project_id, dataset_id, path)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS shares (
            dataset_id TEXT NOT NULL,
            owner_project_id TEXT NOT NULL,
            grantee_project_id TEXT NOT NULL,
            permission TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            PRIMARY KEY (dataset_id, grantee_project_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Vector gateway tables. Frequently filtered payload keys are mirrored
    // into real columns so filters compile to SQL predicates.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS vector_collections (
            name TEXT PRIMARY KEY,
            dimension INTEGER NOT NULL,
            is_hybrid INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS vector_points (
            collection_name TEXT NOT NULL,
            id TEXT NOT NULL,
            dense BLOB,
            sparse TEXT,
            payload_json TEXT NOT NULL,
            project_id TEXT NOT NULL,
            dataset_id TEXT NOT NULL,
            source_type TEXT NOT NULL,
            relative_path TEXT,
            language TEXT,
            repo TEXT,
            PRIMARY KEY (collection_name, id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_dataset ON chunks(dataset_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_path ON chunks(dataset_id, relative_path)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_jobs_project ON ingestion_jobs(project_id, created_at DESC)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_points_dataset ON vector_points(collection_name, dataset_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_points_path ON vector_points(collection_name, relative_path)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_shares_grantee ON shares(grantee_project_id)")
        .execute(pool)
        .await?;

    Ok(())
}
