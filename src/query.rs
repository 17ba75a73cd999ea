//! Query planning and execution.
//!
//! Turns a natural-language query into ranked hits across the access set:
//! resolve accessible collections, embed the query once, fan out dense or
//! hybrid searches in parallel with the mandatory dataset filter, fuse the
//! per-collection lists with reciprocal-rank fusion, apply the similarity
//! threshold and cut, optionally rerank with a cross-encoder, and materialize
//! provenance with a full scoring breakdown.
//!
//! Dataset isolation is asserted before returning: a hit whose payload
//! `dataset_id` is outside the access set is an internal error, never a
//! result.

use serde::Serialize;
use std::collections::HashSet;
use tokio::task::JoinSet;
use tracing::debug;

use crate::embedding::ModelHint;
use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::models::Payload;
use crate::progress::{emit, emit_done, ProgressSink};
use crate::scope;
use crate::vector::{Filter, Hit};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryMode {
    Dense,
    Hybrid,
}

impl QueryMode {
    pub fn parse(s: &str) -> Self {
        match s {
            "dense" => QueryMode::Dense,
            _ => QueryMode::Hybrid,
        }
    }
}

#[derive(Debug, Clone)]
pub struct QueryRequest {
    pub query: String,
    pub project: String,
    pub dataset: Option<String>,
    pub include_global: bool,
    pub top_k: usize,
    pub threshold: f32,
    pub repo: Option<String>,
    pub lang: Option<String>,
    pub path_prefix: Option<String>,
    pub mode: QueryMode,
}

impl QueryRequest {
    pub fn new(query: &str, project: &str) -> Self {
        Self {
            query: query.to_string(),
            project: project.to_string(),
            dataset: None,
            include_global: true,
            top_k: 10,
            threshold: 0.5,
            repo: None,
            lang: None,
            path_prefix: None,
            mode: QueryMode::Hybrid,
        }
    }
}

/// Scoring breakdown carried on every hit.
#[derive(Debug, Clone, Serialize)]
pub struct ScoreBreakdown {
    pub dense: f32,
    pub sparse: Option<f32>,
    pub fused: f32,
    pub rerank: Option<f32>,
    pub final_score: f32,
}

/// A materialized query result.
#[derive(Debug, Clone, Serialize)]
pub struct QueryHit {
    pub id: String,
    pub collection: String,
    pub snippet: String,
    pub payload: Payload,
    pub scores: ScoreBreakdown,
}

/// Execute a query across the access set.
pub async fn run_query(
    engine: &Engine,
    req: &QueryRequest,
    progress: Option<ProgressSink>,
) -> Result<Vec<QueryHit>> {
    let progress = progress.as_ref();

    // Empty query and zero top-k short-circuit without touching the index.
    if req.query.trim().is_empty() || req.top_k == 0 {
        emit_done(progress, "done", "nothing to search");
        return Ok(Vec::new());
    }

    // Step 1: access-set resolution.
    emit(progress, "resolve", 0, 1, "resolving access set");
    let access = scope::resolve_access_set(
        &engine.store,
        &req.project,
        req.dataset.as_deref(),
        req.include_global,
    )
    .await?;
    let access_ids: HashSet<String> = access.iter().map(|e| e.dataset.id.clone()).collect();

    // Collections that physically exist for this backend.
    let mut targets: Vec<(String, bool)> = Vec::new();
    for entry in &access {
        for binding in &entry.bindings {
            targets.push((binding.collection_name.clone(), binding.is_hybrid));
        }
    }
    targets.sort();
    targets.dedup();
    emit(progress, "resolve", 1, 1, format!("{} collections", targets.len()));

    if targets.is_empty() || access_ids.is_empty() {
        emit_done(progress, "done", "empty access set");
        return Ok(Vec::new());
    }

    // Step 2: query embedding (sparse only when a hybrid target will use it).
    emit(progress, "embed", 0, 1, "embedding query");
    let any_hybrid = req.mode == QueryMode::Hybrid && targets.iter().any(|(_, h)| *h);
    let query_vectors = engine
        .embedder
        .embed_query(&req.query, ModelHint::Text, any_hybrid)
        .await?;
    emit(progress, "embed", 1, 1, "query embedded");

    // Step 3: the dataset filter is mandatory on every search call.
    let filter = Filter {
        dataset_ids: Some(access_ids.iter().cloned().collect()),
        repo: req.repo.clone(),
        lang: req.lang.clone(),
        path_prefix: req.path_prefix.clone(),
        ..Default::default()
    };

    // Step 4: parallel fan-out.
    let k = (req.top_k * 2).clamp(20, 50);
    let total_targets = targets.len() as u64;
    emit(progress, "search", 0, total_targets, "searching collections");

    let mut set: JoinSet<Result<(usize, Vec<Hit>)>> = JoinSet::new();
    for (i, (collection, is_hybrid)) in targets.iter().enumerate() {
        let index = engine.index.clone();
        let collection = collection.clone();
        let hybrid = *is_hybrid && req.mode == QueryMode::Hybrid;
        let dense = query_vectors.dense.clone();
        let sparse = query_vectors.sparse.clone();
        let filter = filter.clone();
        set.spawn(async move {
            // A binding can exist before its collection does (ingest failed
            // between scope resolve and collection prepare); treat as empty.
            if !index.has_collection(&collection).await? {
                return Ok((i, Vec::new()));
            }
            let hits = match (hybrid, sparse) {
                (true, Some(sparse)) => {
                    index
                        .hybrid_search(&collection, &dense, &sparse, k, &filter)
                        .await?
                }
                _ => index.search(&collection, &dense, k, None, &filter).await?,
            };
            Ok((i, hits))
        });
    }

    let mut per_collection: Vec<Vec<Hit>> = vec![Vec::new(); targets.len()];
    let mut done = 0u64;
    while let Some(joined) = set.join_next().await {
        let (i, hits) = joined.map_err(|e| Error::internal(format!("search task panicked: {e}")))??;
        per_collection[i] = hits;
        done += 1;
        emit(progress, "search", done, total_targets, targets[i].0.as_str());
    }

    // Step 5: reciprocal-rank fusion across collections. Ties break on raw
    // dense similarity, then on insertion order (stable sort).
    emit(progress, "fuse", 0, 1, "fusing results");
    let rank_c = engine.config.retrieval.rank_constant as f32;

    struct Fused {
        collection: String,
        hit: Hit,
        fused: f32,
    }
    let mut fused: Vec<Fused> = Vec::new();
    for (i, hits) in per_collection.into_iter().enumerate() {
        for (rank, hit) in hits.into_iter().enumerate() {
            fused.push(Fused {
                collection: targets[i].0.clone(),
                fused: 1.0 / (rank_c + rank as f32),
                hit,
            });
        }
    }
    fused.sort_by(|a, b| {
        b.fused
            .partial_cmp(&a.fused)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| {
                b.hit
                    .dense_score
                    .partial_cmp(&a.hit.dense_score)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
    });
    emit(progress, "fuse", 1, 1, format!("{} candidates", fused.len()));

    // Step 6: threshold on best raw similarity, then cut.
    fused.retain(|f| f.hit.dense_score >= req.threshold);
    fused.truncate(req.top_k);

    // Step 7: optional cross-encoder rerank; original rank is the tiebreak.
    let mut rerank_scores: Option<Vec<f32>> = None;
    if engine.reranker.is_enabled() && !fused.is_empty() {
        emit(progress, "rerank", 0, 1, "reranking");
        let candidates: Vec<String> = fused
            .iter()
            .map(|f| f.hit.payload.snippet.clone().unwrap_or_default())
            .collect();
        match engine.reranker.score(&req.query, &candidates).await {
            Ok(scores) => {
                let mut order: Vec<usize> = (0..fused.len()).collect();
                order.sort_by(|&a, &b| {
                    scores[b]
                        .partial_cmp(&scores[a])
                        .unwrap_or(std::cmp::Ordering::Equal)
                        .then(a.cmp(&b))
                });
                let mut slots: Vec<Option<Fused>> = fused.into_iter().map(Some).collect();
                let mut reordered = Vec::with_capacity(slots.len());
                let mut reordered_scores = Vec::with_capacity(slots.len());
                for idx in order {
                    let slot = slots[idx]
                        .take()
                        .ok_or_else(|| Error::internal("rerank permutation is not a bijection"))?;
                    reordered_scores.push(scores[idx]);
                    reordered.push(slot);
                }
                fused = reordered;
                rerank_scores = Some(reordered_scores);
            }
            Err(e) => {
                debug!(error = %e, "rerank failed; keeping fused order");
            }
        }
        emit(progress, "rerank", 1, 1, "reranked");
    }

    // Step 8: materialize, asserting dataset isolation.
    let mut out = Vec::with_capacity(fused.len());
    for (i, f) in fused.into_iter().enumerate() {
        if !access_ids.contains(&f.hit.payload.dataset_id) {
            return Err(Error::internal(format!(
                "dataset isolation violated: hit {} belongs to dataset {} outside the access set",
                f.hit.id, f.hit.payload.dataset_id
            )));
        }
        let rerank = rerank_scores.as_ref().map(|s| s[i]);
        out.push(QueryHit {
            id: f.hit.id,
            collection: f.collection,
            snippet: f.hit.payload.snippet.clone().unwrap_or_default(),
            scores: ScoreBreakdown {
                dense: f.hit.dense_score,
                sparse: f.hit.sparse_score,
                fused: f.fused,
                rerank,
                final_score: rerank.unwrap_or(f.fused),
            },
            payload: f.hit.payload,
        });
    }

    emit_done(progress, "done", format!("{} hits", out.len()));
    Ok(out)
}

/// Fuse several already-ranked hit lists (sub-query results) into one, by
/// RRF over `(collection, id)` identity. Used by the smart-query layer.
pub fn fuse_hit_lists(lists: Vec<Vec<QueryHit>>, rank_constant: usize, top_k: usize) -> Vec<QueryHit> {
    use std::collections::HashMap;
    let c = rank_constant as f32;

    let mut best: HashMap<(String, String), QueryHit> = HashMap::new();
    let mut scores: HashMap<(String, String), f32> = HashMap::new();

    for list in lists {
        for (rank, hit) in list.into_iter().enumerate() {
            let key = (hit.collection.clone(), hit.id.clone());
            *scores.entry(key.clone()).or_insert(0.0) += 1.0 / (c + rank as f32);
            best.entry(key).or_insert(hit);
        }
    }

    let mut fused: Vec<QueryHit> = best
        .into_iter()
        .map(|(key, mut hit)| {
            let fused_score = scores[&key];
            hit.scores.fused = fused_score;
            hit.scores.final_score = fused_score;
            hit
        })
        .collect();
    fused.sort_by(|a, b| {
        b.scores
            .fused
            .partial_cmp(&a.scores.fused)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| {
                b.scores
                    .dense
                    .partial_cmp(&a.scores.dense)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .then_with(|| a.id.cmp(&b.id))
    });
    fused.truncate(top_k);
    fused
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SourceType;

    fn hit(id: &str, collection: &str, dense: f32) -> QueryHit {
        QueryHit {
            id: id.to_string(),
            collection: collection.to_string(),
            snippet: String::new(),
            payload: Payload::new("p", "d", SourceType::Code, "h"),
            scores: ScoreBreakdown {
                dense,
                sparse: None,
                fused: 0.0,
                rerank: None,
                final_score: 0.0,
            },
        }
    }

    #[test]
    fn mode_parsing_defaults_to_hybrid() {
        assert_eq!(QueryMode::parse("dense"), QueryMode::Dense);
        assert_eq!(QueryMode::parse("hybrid"), QueryMode::Hybrid);
        assert_eq!(QueryMode::parse("anything"), QueryMode::Hybrid);
    }

    #[test]
    fn fuse_prefers_hits_present_in_multiple_lists() {
        let a = vec![hit("x", "c1", 0.9), hit("y", "c1", 0.8)];
        let b = vec![hit("y", "c1", 0.8), hit("z", "c1", 0.7)];
        let fused = fuse_hit_lists(vec![a, b], 60, 10);
        // "y" appears in both lists and outranks single-list entries.
        assert_eq!(fused[0].id, "y");
        assert_eq!(fused.len(), 3);
    }

    #[test]
    fn fuse_respects_top_k() {
        let list: Vec<QueryHit> = (0..30).map(|i| hit(&format!("h{i}"), "c", 0.5)).collect();
        let fused = fuse_hit_lists(vec![list], 60, 5);
        assert_eq!(fused.len(), 5);
    }

    #[test]
    fn fuse_tie_breaks_deterministically() {
        let a = vec![hit("b", "c", 0.5)];
        let b = vec![hit("a", "c", 0.5)];
        let fused = fuse_hit_lists(vec![a, b], 60, 10);
        // Same fused score and dense score: id order decides.
        assert_eq!(fused[0].id, "a");
        assert_eq!(fused[1].id, "b");
    }
}
