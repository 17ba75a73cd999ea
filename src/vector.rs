//! Vector index gateway.
//!
//! [`VectorIndex`] is a uniform capability over the vector store, independent
//! of the concrete backend; the engine selects an implementation from
//! configuration. Points carry dense vectors, optional sparse vectors, and a
//! payload whose required keys (`project_id`, `dataset_id`, `source_type`)
//! are mirrored into indexed columns so filter descriptors compile to SQL
//! predicates.
//!
//! The bundled [`SqliteVectorIndex`] stores dense vectors as little-endian
//! f32 blobs and performs brute-force cosine scoring; hybrid search fuses the
//! dense and sparse rankings with reciprocal-rank fusion inside the
//! collection. Writes are idempotent on `(collection, point_id)` and
//! serialized per collection at batch granularity.

use async_trait::async_trait;
use dashmap::DashMap;
use sqlx::{Row, SqlitePool};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::embedding::{blob_to_vec, cosine_similarity, vec_to_blob, SparseVector};
use crate::error::{Error, ErrorKind, Result};
use crate::models::Payload;

/// A point to upsert: id, dense vector, optional sparse vector, payload.
#[derive(Debug, Clone)]
pub struct Point {
    pub id: String,
    pub dense: Vec<f32>,
    pub sparse: Option<SparseVector>,
    pub payload: Payload,
}

/// A scored hit returned from search.
#[derive(Debug, Clone)]
pub struct Hit {
    pub id: String,
    pub dense_score: f32,
    pub sparse_score: Option<f32>,
    pub payload: Payload,
}

/// Declarative filter descriptor, compiled by the gateway into an AND of
/// equality/IN/prefix predicates. An empty descriptor means "no filter".
///
/// Dataset filtering is mandatory whenever more than one collection is
/// consulted in a single query; the planner enforces that before calling in.
#[derive(Debug, Clone, Default)]
pub struct Filter {
    pub project_id: Option<String>,
    pub dataset_ids: Option<Vec<String>>,
    pub repo: Option<String>,
    pub lang: Option<String>,
    pub path_prefix: Option<String>,
    /// Exact provenance path equality (used by the synchronizer).
    pub relative_path: Option<String>,
}

impl Filter {
    pub fn is_empty(&self) -> bool {
        self.project_id.is_none()
            && self.dataset_ids.is_none()
            && self.repo.is_none()
            && self.lang.is_none()
            && self.path_prefix.is_none()
            && self.relative_path.is_none()
    }

    pub fn for_datasets(ids: Vec<String>) -> Self {
        Self {
            dataset_ids: Some(ids),
            ..Default::default()
        }
    }

    /// Compile to SQL predicate fragments plus their bind values, ANDed onto
    /// the collection predicate by the caller.
    fn to_sql(&self) -> (String, Vec<String>) {
        let mut clauses: Vec<String> = Vec::new();
        let mut binds: Vec<String> = Vec::new();

        if let Some(ref project_id) = self.project_id {
            clauses.push("project_id = ?".into());
            binds.push(project_id.clone());
        }
        if let Some(ref ids) = self.dataset_ids {
            if ids.is_empty() {
                // An empty IN-list matches nothing.
                clauses.push("1 = 0".into());
            } else {
                let marks = vec!["?"; ids.len()].join(", ");
                clauses.push(format!("dataset_id IN ({marks})"));
                binds.extend(ids.iter().cloned());
            }
        }
        if let Some(ref repo) = self.repo {
            clauses.push("repo = ?".into());
            binds.push(repo.clone());
        }
        if let Some(ref lang) = self.lang {
            clauses.push("language = ?".into());
            binds.push(lang.clone());
        }
        if let Some(ref prefix) = self.path_prefix {
            clauses.push("relative_path LIKE ? ESCAPE '\\'".into());
            binds.push(format!("{}%", escape_like(prefix)));
        }
        if let Some(ref path) = self.relative_path {
            clauses.push("relative_path = ?".into());
            binds.push(path.clone());
        }

        if clauses.is_empty() {
            (String::new(), binds)
        } else {
            (format!(" AND {}", clauses.join(" AND ")), binds)
        }
    }
}

fn escape_like(s: &str) -> String {
    s.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
}

/// Capability over the vector index.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn has_collection(&self, name: &str) -> Result<bool>;
    /// Create a dense-only collection. Idempotent for matching dimensions.
    async fn create_collection(&self, name: &str, dim: usize) -> Result<()>;
    /// Create a collection storing dense + sparse vectors per point.
    async fn create_hybrid_collection(&self, name: &str, dim: usize) -> Result<()>;
    async fn drop_collection(&self, name: &str) -> Result<()>;
    /// Upsert points; idempotent on `(collection, point_id)`.
    async fn upsert(&self, name: &str, points: Vec<Point>) -> Result<()>;
    /// Dense search, ranked by cosine similarity descending.
    async fn search(
        &self,
        name: &str,
        query: &[f32],
        k: usize,
        threshold: Option<f32>,
        filter: &Filter,
    ) -> Result<Vec<Hit>>;
    /// Dense + sparse search fused with RRF inside the collection.
    async fn hybrid_search(
        &self,
        name: &str,
        dense_query: &[f32],
        sparse_query: &SparseVector,
        k: usize,
        filter: &Filter,
    ) -> Result<Vec<Hit>>;
    /// Page through points without scoring.
    async fn scroll(&self, name: &str, limit: usize, offset: usize, filter: &Filter)
        -> Result<Vec<Hit>>;
    /// Delete points matching the filter; returns the number removed.
    async fn delete_by_filter(&self, name: &str, filter: &Filter) -> Result<u64>;
    /// Rewrite `relative_path` provenance without touching vectors.
    async fn rename_path(
        &self,
        name: &str,
        dataset_id: &str,
        old_path: &str,
        new_path: &str,
    ) -> Result<u64>;
    async fn count(&self, name: &str) -> Result<i64>;
}

/// SQLite-backed implementation.
pub struct SqliteVectorIndex {
    pool: SqlitePool,
    /// Per-collection write locks: same-collection upserts are serialized at
    /// batch granularity so point counts stay monotonic.
    write_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl SqliteVectorIndex {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            write_locks: DashMap::new(),
        }
    }

    fn write_lock(&self, collection: &str) -> Arc<Mutex<()>> {
        self.write_locks
            .entry(collection.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    async fn collection_meta(&self, name: &str) -> Result<(usize, bool)> {
        let row = sqlx::query("SELECT dimension, is_hybrid FROM vector_collections WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(r) => Ok((
                r.get::<i64, _>("dimension") as usize,
                r.get::<i64, _>("is_hybrid") != 0,
            )),
            None => Err(Error::new(
                ErrorKind::NotFound,
                format!("collection {name} not found"),
            )
            .with_resource(name)),
        }
    }

    async fn create(&self, name: &str, dim: usize, hybrid: bool) -> Result<()> {
        if dim == 0 {
            return Err(Error::validation("collection dimension must be > 0"));
        }
        sqlx::query(
            r#"
            INSERT INTO vector_collections (name, dimension, is_hybrid, created_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(name) DO NOTHING
            "#,
        )
        .bind(name)
        .bind(dim as i64)
        .bind(hybrid as i64)
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await?;

        let (existing_dim, _) = self.collection_meta(name).await?;
        if existing_dim != dim {
            return Err(Error::new(
                ErrorKind::DimensionMismatch,
                format!("collection {name} exists at dimension {existing_dim}, requested {dim}"),
            )
            .with_resource(name));
        }
        Ok(())
    }

    /// Fetch candidate rows for a collection + filter.
    async fn fetch_rows(&self, name: &str, filter: &Filter) -> Result<Vec<RawRow>> {
        let (clause, binds) = filter.to_sql();
        let sql = format!(
            "SELECT id, dense, sparse, payload_json FROM vector_points WHERE collection_name = ?{clause}"
        );
        let mut query = sqlx::query(&sql).bind(name);
        for bind in &binds {
            query = query.bind(bind);
        }
        let rows = query.fetch_all(&self.pool).await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let payload: Payload = serde_json::from_str(&row.get::<String, _>("payload_json"))
                .map_err(|e| Error::internal(format!("corrupt point payload: {e}")))?;
            let sparse = row
                .get::<Option<String>, _>("sparse")
                .map(|s| serde_json::from_str::<SparseVector>(&s))
                .transpose()
                .map_err(|e| Error::internal(format!("corrupt sparse vector: {e}")))?;
            out.push(RawRow {
                id: row.get("id"),
                dense: row
                    .get::<Option<Vec<u8>>, _>("dense")
                    .map(|b| blob_to_vec(&b))
                    .unwrap_or_default(),
                sparse,
                payload,
            });
        }
        Ok(out)
    }
}

struct RawRow {
    id: String,
    dense: Vec<f32>,
    sparse: Option<SparseVector>,
    payload: Payload,
}

#[async_trait]
impl VectorIndex for SqliteVectorIndex {
    async fn has_collection(&self, name: &str) -> Result<bool> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM vector_collections WHERE name = ?")
                .bind(name)
                .fetch_one(&self.pool)
                .await?;
        Ok(count > 0)
    }

    async fn create_collection(&self, name: &str, dim: usize) -> Result<()> {
        self.create(name, dim, false).await
    }

    async fn create_hybrid_collection(&self, name: &str, dim: usize) -> Result<()> {
        self.create(name, dim, true).await
    }

    async fn drop_collection(&self, name: &str) -> Result<()> {
        let lock = self.write_lock(name);
        let _guard = lock.lock().await;
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM vector_points WHERE collection_name = ?")
            .bind(name)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM vector_collections WHERE name = ?")
            .bind(name)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn upsert(&self, name: &str, points: Vec<Point>) -> Result<()> {
        if points.is_empty() {
            return Ok(());
        }
        let (dim, _) = self.collection_meta(name).await?;
        for point in &points {
            if point.dense.len() != dim {
                return Err(Error::new(
                    ErrorKind::DimensionMismatch,
                    format!(
                        "point {} has dimension {}, collection {name} expects {dim}",
                        point.id,
                        point.dense.len()
                    ),
                )
                .with_resource(name));
            }
        }

        let lock = self.write_lock(name);
        let _guard = lock.lock().await;

        let mut tx = self.pool.begin().await?;
        for point in points {
            let payload_json = serde_json::to_string(&point.payload)
                .map_err(|e| Error::internal(format!("payload serialize: {e}")))?;
            let sparse_json = point
                .sparse
                .as_ref()
                .map(serde_json::to_string)
                .transpose()
                .map_err(|e| Error::internal(format!("sparse serialize: {e}")))?;
            sqlx::query(
                r#"
                INSERT OR REPLACE INTO vector_points
                    (collection_name, id, dense, sparse, payload_json,
                     project_id, dataset_id, source_type, relative_path, language, repo)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(name)
            .bind(&point.id)
            .bind(vec_to_blob(&point.dense))
            .bind(sparse_json)
            .bind(&payload_json)
            .bind(&point.payload.project_id)
            .bind(&point.payload.dataset_id)
            .bind(point.payload.source_type.as_str())
            .bind(&point.payload.relative_path)
            .bind(&point.payload.language)
            .bind(&point.payload.repo)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn search(
        &self,
        name: &str,
        query: &[f32],
        k: usize,
        threshold: Option<f32>,
        filter: &Filter,
    ) -> Result<Vec<Hit>> {
        let (dim, _) = self.collection_meta(name).await?;
        if query.len() != dim {
            return Err(Error::new(
                ErrorKind::DimensionMismatch,
                format!("query dimension {} != collection dimension {dim}", query.len()),
            )
            .with_resource(name));
        }
        if k == 0 {
            return Ok(Vec::new());
        }

        let rows = self.fetch_rows(name, filter).await?;
        let mut hits: Vec<Hit> = rows
            .into_iter()
            .map(|row| {
                let score = cosine_similarity(query, &row.dense);
                Hit {
                    id: row.id,
                    dense_score: score,
                    sparse_score: None,
                    payload: row.payload,
                }
            })
            .filter(|hit| threshold.map(|t| hit.dense_score >= t).unwrap_or(true))
            .collect();

        hits.sort_by(|a, b| {
            b.dense_score
                .partial_cmp(&a.dense_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        hits.truncate(k);
        Ok(hits)
    }

    async fn hybrid_search(
        &self,
        name: &str,
        dense_query: &[f32],
        sparse_query: &SparseVector,
        k: usize,
        filter: &Filter,
    ) -> Result<Vec<Hit>> {
        let (dim, _) = self.collection_meta(name).await?;
        if dense_query.len() != dim {
            return Err(Error::new(
                ErrorKind::DimensionMismatch,
                format!(
                    "query dimension {} != collection dimension {dim}",
                    dense_query.len()
                ),
            )
            .with_resource(name));
        }
        if k == 0 {
            return Ok(Vec::new());
        }

        let rows = self.fetch_rows(name, filter).await?;
        let mut scored: Vec<(usize, f32, f32)> = rows
            .iter()
            .enumerate()
            .map(|(i, row)| {
                let dense = cosine_similarity(dense_query, &row.dense);
                let sparse = row
                    .sparse
                    .as_ref()
                    .map(|s| s.dot(sparse_query))
                    .unwrap_or(0.0);
                (i, dense, sparse)
            })
            .collect();

        // Rank positions per modality, then reciprocal-rank fuse.
        const RRF_C: f32 = 60.0;
        let mut dense_rank = vec![0usize; scored.len()];
        let mut sparse_rank = vec![0usize; scored.len()];

        let mut by_dense: Vec<usize> = (0..scored.len()).collect();
        by_dense.sort_by(|&a, &b| {
            scored[b]
                .1
                .partial_cmp(&scored[a].1)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        for (rank, &i) in by_dense.iter().enumerate() {
            dense_rank[i] = rank;
        }

        let mut by_sparse: Vec<usize> = (0..scored.len()).collect();
        by_sparse.sort_by(|&a, &b| {
            scored[b]
                .2
                .partial_cmp(&scored[a].2)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        for (rank, &i) in by_sparse.iter().enumerate() {
            sparse_rank[i] = rank;
        }

        scored.sort_by(|&(a, ad, _), &(b, bd, _)| {
            let fused_a = 1.0 / (RRF_C + dense_rank[a] as f32) + 1.0 / (RRF_C + sparse_rank[a] as f32);
            let fused_b = 1.0 / (RRF_C + dense_rank[b] as f32) + 1.0 / (RRF_C + sparse_rank[b] as f32);
            fused_b
                .partial_cmp(&fused_a)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| bd.partial_cmp(&ad).unwrap_or(std::cmp::Ordering::Equal))
        });

        let hits: Vec<Hit> = scored
            .into_iter()
            .take(k)
            .map(|(i, dense, sparse)| Hit {
                id: rows[i].id.clone(),
                dense_score: dense,
                sparse_score: Some(sparse),
                payload: rows[i].payload.clone(),
            })
            .collect();
        Ok(hits)
    }

    async fn scroll(
        &self,
        name: &str,
        limit: usize,
        offset: usize,
        filter: &Filter,
    ) -> Result<Vec<Hit>> {
        self.collection_meta(name).await?;
        let (clause, binds) = filter.to_sql();
        let sql = format!(
            "SELECT id, dense, sparse, payload_json FROM vector_points \
             WHERE collection_name = ?{clause} ORDER BY id LIMIT ? OFFSET ?"
        );
        let mut query = sqlx::query(&sql).bind(name);
        for bind in &binds {
            query = query.bind(bind);
        }
        let rows = query
            .bind(limit as i64)
            .bind(offset as i64)
            .fetch_all(&self.pool)
            .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let payload: Payload = serde_json::from_str(&row.get::<String, _>("payload_json"))
                .map_err(|e| Error::internal(format!("corrupt point payload: {e}")))?;
            out.push(Hit {
                id: row.get("id"),
                dense_score: 0.0,
                sparse_score: None,
                payload,
            });
        }
        Ok(out)
    }

    async fn delete_by_filter(&self, name: &str, filter: &Filter) -> Result<u64> {
        self.collection_meta(name).await?;
        let lock = self.write_lock(name);
        let _guard = lock.lock().await;

        let (clause, binds) = filter.to_sql();
        let sql = format!("DELETE FROM vector_points WHERE collection_name = ?{clause}");
        let mut query = sqlx::query(&sql).bind(name);
        for bind in &binds {
            query = query.bind(bind);
        }
        let result = query.execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    async fn rename_path(
        &self,
        name: &str,
        dataset_id: &str,
        old_path: &str,
        new_path: &str,
    ) -> Result<u64> {
        self.collection_meta(name).await?;
        let lock = self.write_lock(name);
        let _guard = lock.lock().await;

        let rows = sqlx::query(
            "SELECT id, payload_json FROM vector_points \
             WHERE collection_name = ? AND dataset_id = ? AND relative_path = ?",
        )
        .bind(name)
        .bind(dataset_id)
        .bind(old_path)
        .fetch_all(&self.pool)
        .await?;

        let mut tx = self.pool.begin().await?;
        let mut updated = 0u64;
        for row in &rows {
            let mut payload: Payload = serde_json::from_str(&row.get::<String, _>("payload_json"))
                .map_err(|e| Error::internal(format!("corrupt point payload: {e}")))?;
            payload.relative_path = Some(new_path.to_string());
            let payload_json = serde_json::to_string(&payload)
                .map_err(|e| Error::internal(format!("payload serialize: {e}")))?;
            sqlx::query(
                "UPDATE vector_points SET relative_path = ?, payload_json = ? \
                 WHERE collection_name = ? AND id = ?",
            )
            .bind(new_path)
            .bind(&payload_json)
            .bind(name)
            .bind(row.get::<String, _>("id"))
            .execute(&mut *tx)
            .await?;
            updated += 1;
        }
        tx.commit().await?;
        Ok(updated)
    }

    async fn count(&self, name: &str) -> Result<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM vector_points WHERE collection_name = ?")
                .bind(name)
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SourceType;

    async fn test_index() -> (tempfile::TempDir, SqliteVectorIndex) {
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
        (dir, SqliteVectorIndex::new(pool))
    }

    fn point(id: &str, dense: Vec<f32>, dataset: &str, path: &str) -> Point {
        let mut payload = Payload::new("proj", dataset, SourceType::Code, "hash");
        payload.relative_path = Some(path.to_string());
        Point {
            id: id.to_string(),
            dense,
            sparse: None,
            payload,
        }
    }

    #[tokio::test]
    async fn collection_lifecycle() {
        let (_dir, index) = test_index().await;
        assert!(!index.has_collection("c1").await.unwrap());
        index.create_collection("c1", 3).await.unwrap();
        assert!(index.has_collection("c1").await.unwrap());
        // Idempotent at same dim; mismatched dim is structured.
        index.create_collection("c1", 3).await.unwrap();
        let err = index.create_collection("c1", 4).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::DimensionMismatch);

        index.drop_collection("c1").await.unwrap();
        assert!(!index.has_collection("c1").await.unwrap());
    }

    #[tokio::test]
    async fn upsert_is_idempotent_on_id() {
        let (_dir, index) = test_index().await;
        index.create_collection("c", 2).await.unwrap();
        let p = point("p1", vec![1.0, 0.0], "ds", "a.rs");
        index.upsert("c", vec![p.clone()]).await.unwrap();
        index.upsert("c", vec![p]).await.unwrap();
        assert_eq!(index.count("c").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn upsert_rejects_wrong_dimension() {
        let (_dir, index) = test_index().await;
        index.create_collection("c", 2).await.unwrap();
        let err = index
            .upsert("c", vec![point("p1", vec![1.0, 0.0, 0.0], "ds", "a.rs")])
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::DimensionMismatch);
    }

    #[tokio::test]
    async fn missing_collection_is_not_found() {
        let (_dir, index) = test_index().await;
        let err = index
            .search("ghost", &[1.0], 5, None, &Filter::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn dense_search_ranks_by_similarity() {
        let (_dir, index) = test_index().await;
        index.create_collection("c", 2).await.unwrap();
        index
            .upsert(
                "c",
                vec![
                    point("near", vec![1.0, 0.0], "ds", "a.rs"),
                    point("far", vec![0.0, 1.0], "ds", "b.rs"),
                    point("mid", vec![0.7, 0.7], "ds", "c.rs"),
                ],
            )
            .await
            .unwrap();

        let hits = index
            .search("c", &[1.0, 0.0], 10, None, &Filter::default())
            .await
            .unwrap();
        assert_eq!(hits[0].id, "near");
        assert_eq!(hits[1].id, "mid");
        assert_eq!(hits[2].id, "far");

        let thresholded = index
            .search("c", &[1.0, 0.0], 10, Some(0.5), &Filter::default())
            .await
            .unwrap();
        assert_eq!(thresholded.len(), 2);
    }

    #[tokio::test]
    async fn filters_compile_to_predicates() {
        let (_dir, index) = test_index().await;
        index.create_collection("c", 2).await.unwrap();
        index
            .upsert(
                "c",
                vec![
                    point("a", vec![1.0, 0.0], "ds1", "src/a.rs"),
                    point("b", vec![1.0, 0.0], "ds2", "src/b.rs"),
                    point("c", vec![1.0, 0.0], "ds1", "docs/readme.md"),
                ],
            )
            .await
            .unwrap();

        let by_dataset = index
            .search(
                "c",
                &[1.0, 0.0],
                10,
                None,
                &Filter::for_datasets(vec!["ds1".into()]),
            )
            .await
            .unwrap();
        assert_eq!(by_dataset.len(), 2);
        assert!(by_dataset.iter().all(|h| h.payload.dataset_id == "ds1"));

        let by_prefix = index
            .search(
                "c",
                &[1.0, 0.0],
                10,
                None,
                &Filter {
                    dataset_ids: Some(vec!["ds1".into()]),
                    path_prefix: Some("src/".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(by_prefix.len(), 1);
        assert_eq!(by_prefix[0].id, "a");

        // Empty IN-list matches nothing.
        let none = index
            .search("c", &[1.0, 0.0], 10, None, &Filter::for_datasets(vec![]))
            .await
            .unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn hybrid_search_fuses_both_rankings() {
        let (_dir, index) = test_index().await;
        index.create_hybrid_collection("c", 2).await.unwrap();
        let enc = crate::embedding::SparseEncoder;

        let mut lexical = point("lexical", vec![0.0, 1.0], "ds", "a.md");
        lexical.sparse = Some(enc.encode("auth middleware token handler"));
        let mut semantic = point("semantic", vec![1.0, 0.0], "ds", "b.md");
        semantic.sparse = Some(enc.encode("session validation pipeline"));
        let mut noise = point("noise", vec![0.1, 0.9], "ds", "c.md");
        noise.sparse = Some(enc.encode("gardening tips for spring"));

        index.upsert("c", vec![lexical, semantic, noise]).await.unwrap();

        // Dense query matches "semantic"; sparse query matches "lexical".
        let sparse_q = enc.encode("auth middleware");
        let hits = index
            .hybrid_search("c", &[1.0, 0.0], &sparse_q, 2, &Filter::default())
            .await
            .unwrap();
        let ids: Vec<&str> = hits.iter().map(|h| h.id.as_str()).collect();
        assert!(ids.contains(&"lexical"), "hits: {ids:?}");
        assert!(ids.contains(&"semantic"), "hits: {ids:?}");
    }

    #[tokio::test]
    async fn rename_path_updates_payload_without_vectors() {
        let (_dir, index) = test_index().await;
        index.create_collection("c", 2).await.unwrap();
        index
            .upsert("c", vec![point("p", vec![1.0, 0.0], "ds", "old.rs")])
            .await
            .unwrap();
        let n = index.rename_path("c", "ds", "old.rs", "new.rs").await.unwrap();
        assert_eq!(n, 1);
        let hits = index
            .search("c", &[1.0, 0.0], 1, None, &Filter::default())
            .await
            .unwrap();
        assert_eq!(hits[0].payload.relative_path.as_deref(), Some("new.rs"));
    }

    #[tokio::test]
    async fn delete_by_filter_and_scroll() {
        let (_dir, index) = test_index().await;
        index.create_collection("c", 2).await.unwrap();
        index
            .upsert(
                "c",
                vec![
                    point("a", vec![1.0, 0.0], "ds", "x/a.rs"),
                    point("b", vec![1.0, 0.0], "ds", "x/b.rs"),
                    point("c", vec![1.0, 0.0], "ds", "y/c.rs"),
                ],
            )
            .await
            .unwrap();

        let page = index
            .scroll("c", 2, 0, &Filter::default())
            .await
            .unwrap();
        assert_eq!(page.len(), 2);

        let removed = index
            .delete_by_filter(
                "c",
                &Filter {
                    path_prefix: Some("x/".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(removed, 2);
        assert_eq!(index.count("c").await.unwrap(), 1);
    }
}
