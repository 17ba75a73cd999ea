//! End-to-end scenarios against a real engine: local deterministic
//! embeddings, temp-dir SQLite and snapshots, no network.

use std::fs;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

use context_scope::config::{Config, EmbeddingConfig, StorageConfig, SyncConfig};
use context_scope::engine::Engine;
use context_scope::ingest::IngestOutcome;
use context_scope::models::SharePermission;
use context_scope::query::{QueryMode, QueryRequest};

async fn test_engine(tmp: &TempDir) -> Arc<Engine> {
    let config = Config {
        storage: StorageConfig {
            db_path: tmp.path().join("data").join("ctxscope.db"),
            snapshot_dir: Some(tmp.path().join("merkle")),
            defaults_file: Some(tmp.path().join("claude-mcp.json")),
        },
        embedding: EmbeddingConfig {
            provider: "local".to_string(),
            dims: 128,
            ..Default::default()
        },
        sync: SyncConfig {
            debounce_ms: 300,
            ..Default::default()
        },
        ..Default::default()
    };
    Engine::connect(config).await.unwrap()
}

fn write_tree(root: &Path, files: &[(&str, &str)]) {
    for (rel, content) in files {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }
}

fn query(project: &str, dataset: Option<&str>, text: &str, threshold: f32) -> QueryRequest {
    QueryRequest {
        query: text.to_string(),
        project: project.to_string(),
        dataset: dataset.map(|s| s.to_string()),
        include_global: true,
        top_k: 10,
        threshold,
        repo: None,
        lang: None,
        path_prefix: None,
        mode: QueryMode::Hybrid,
    }
}

#[tokio::test]
async fn dataset_isolation() {
    let tmp = TempDir::new().unwrap();
    let engine = test_engine(&tmp).await;

    let alpha_dir = tmp.path().join("alpha");
    let beta_dir = tmp.path().join("beta");
    write_tree(&alpha_dir, &[("hello.txt", "alpha only")]);
    write_tree(&beta_dir, &[("hello.txt", "beta only")]);

    engine
        .index_local(&alpha_dir, "acme", "alpha", false, None)
        .await
        .unwrap();
    engine
        .index_local(&beta_dir, "acme", "beta", false, None)
        .await
        .unwrap();

    let hits = engine
        .query(&query("acme", Some("alpha"), "alpha only", 0.6), None)
        .await
        .unwrap();
    assert_eq!(hits.len(), 1, "expected exactly the alpha hit");
    assert!(hits[0].snippet.contains("alpha"));

    let hits = engine
        .query(&query("acme", Some("beta"), "alpha only", 0.6), None)
        .await
        .unwrap();
    assert!(hits.is_empty(), "beta scope must not see alpha content");
}

#[tokio::test]
async fn reingest_without_force_is_skipped_and_idempotent() {
    let tmp = TempDir::new().unwrap();
    let engine = test_engine(&tmp).await;
    let dir = tmp.path().join("src");
    write_tree(&dir, &[("lib.rs", "pub fn answer() -> u32 { 42 }\n")]);

    let first = engine
        .index_local(&dir, "proj", "main", false, None)
        .await
        .unwrap();
    let stats = match first {
        IngestOutcome::Completed(stats) => stats,
        other => panic!("expected completion, got {other:?}"),
    };
    assert!(stats.point_count > 0);

    let second = engine
        .index_local(&dir, "proj", "main", false, None)
        .await
        .unwrap();
    assert!(
        matches!(second, IngestOutcome::Skipped { .. }),
        "unchanged content must short-circuit"
    );

    let report = engine.stats("proj").await.unwrap();
    assert_eq!(report.datasets.len(), 1);
    assert_eq!(report.datasets[0].point_count, stats.point_count);
}

#[tokio::test]
async fn force_reindex_converges_to_same_point_count() {
    let tmp = TempDir::new().unwrap();
    let engine = test_engine(&tmp).await;
    let dir = tmp.path().join("src");
    write_tree(
        &dir,
        &[("main.rs", "fn main() {\n    println!(\"hello\");\n}\n")],
    );

    let first = engine
        .index_local(&dir, "proj", "main", false, None)
        .await
        .unwrap();
    let n = match first {
        IngestOutcome::Completed(stats) => stats.point_count,
        other => panic!("expected completion, got {other:?}"),
    };

    let second = engine
        .index_local(&dir, "proj", "main", true, None)
        .await
        .unwrap();
    let n2 = match second {
        IngestOutcome::Completed(stats) => stats.point_count,
        other => panic!("expected completion, got {other:?}"),
    };
    assert_eq!(n, n2, "force reindex must not duplicate points");
}

#[tokio::test]
async fn sync_right_after_ingest_reports_unchanged() {
    let tmp = TempDir::new().unwrap();
    let engine = test_engine(&tmp).await;
    let dir = tmp.path().join("tree");
    write_tree(&dir, &[("a.ts", "const a = 1;\n"), ("b.ts", "const b = 2;\n")]);

    engine
        .index_local(&dir, "proj", "main", false, None)
        .await
        .unwrap();

    let stats = engine
        .sync_local(&dir, "proj", "main", false, None)
        .await
        .unwrap();
    assert_eq!(stats.status, "unchanged");
    assert_eq!(stats.added, 0);
    assert_eq!(stats.modified, 0);
    assert_eq!(stats.deleted, 0);
    assert_eq!(stats.unchanged, 2);
}

#[tokio::test]
async fn incremental_sync_classifies_changes() {
    let tmp = TempDir::new().unwrap();
    let engine = test_engine(&tmp).await;
    let dir = tmp.path().join("tree");
    write_tree(
        &dir,
        &[
            ("a.ts", "export const a = 'aye';\n"),
            ("b.ts", "export const b = 'bee';\n"),
            ("c.ts", "export const c = 'sea';\n"),
        ],
    );

    engine
        .index_local(&dir, "proj", "main", false, None)
        .await
        .unwrap();

    fs::write(dir.join("b.ts"), "export const b = 'bee, revised';\n").unwrap();
    fs::write(dir.join("d.ts"), "export const d = 'dee';\n").unwrap();
    fs::remove_file(dir.join("a.ts")).unwrap();

    let stats = engine
        .sync_local(&dir, "proj", "main", false, None)
        .await
        .unwrap();
    assert_eq!(stats.status, "synced");
    assert_eq!(stats.added, 1, "d.ts");
    assert_eq!(stats.modified, 1, "b.ts");
    assert_eq!(stats.deleted, 1, "a.ts");
    assert_eq!(stats.unchanged, 1, "c.ts");

    // Collection holds exactly the chunks of b (new), c, and d.
    assert_eq!(stats.point_count, 3);

    // A second sync settles to unchanged.
    let again = engine
        .sync_local(&dir, "proj", "main", false, None)
        .await
        .unwrap();
    assert_eq!(again.status, "unchanged");
}

#[tokio::test]
async fn sync_pairs_renames_without_reembedding() {
    let tmp = TempDir::new().unwrap();
    let engine = test_engine(&tmp).await;
    let dir = tmp.path().join("tree");
    write_tree(&dir, &[("old_name.rs", "pub fn stay_the_same() {}\n")]);

    engine
        .index_local(&dir, "proj", "main", false, None)
        .await
        .unwrap();

    fs::rename(dir.join("old_name.rs"), dir.join("new_name.rs")).unwrap();
    let stats = engine
        .sync_local(&dir, "proj", "main", false, None)
        .await
        .unwrap();
    assert_eq!(stats.renamed, 1);
    assert_eq!(stats.added, 0);
    assert_eq!(stats.deleted, 0);
    assert_eq!(stats.point_count, 1);

    let hits = engine
        .query(&query("proj", None, "stay_the_same", 0.2), None)
        .await
        .unwrap();
    assert_eq!(
        hits[0].payload.relative_path.as_deref(),
        Some("new_name.rs"),
        "provenance must follow the rename"
    );
}

#[tokio::test]
async fn shares_grant_and_revoke_visibility() {
    let tmp = TempDir::new().unwrap();
    let engine = test_engine(&tmp).await;
    let docs_dir = tmp.path().join("docs");
    write_tree(&docs_dir, &[("guide.md", "# Deployment guide\n\nzebra quantum walrus\n")]);

    engine
        .index_local(&docs_dir, "project-a", "docs", false, None)
        .await
        .unwrap();

    // Before the grant, project B sees nothing.
    let mut req = query("project-b", None, "zebra quantum walrus", 0.3);
    req.include_global = false;
    let hits = engine.query(&req, None).await.unwrap();
    assert!(hits.is_empty());

    engine
        .share_dataset("project-a", "docs", "project-b", SharePermission::Read)
        .await
        .unwrap();
    let hits = engine.query(&req, None).await.unwrap();
    assert!(!hits.is_empty(), "granted share must be queryable");

    engine
        .revoke_share("project-a", "docs", "project-b")
        .await
        .unwrap();
    let hits = engine.query(&req, None).await.unwrap();
    assert!(hits.is_empty(), "revocation takes effect immediately");
}

#[tokio::test]
async fn clear_removes_collections_from_stats() {
    let tmp = TempDir::new().unwrap();
    let engine = test_engine(&tmp).await;
    let dir = tmp.path().join("src");
    write_tree(&dir, &[("x.py", "def x():\n    return 1\n")]);

    engine
        .index_local(&dir, "proj", "main", false, None)
        .await
        .unwrap();
    assert_eq!(engine.stats("proj").await.unwrap().datasets.len(), 1);

    // Dry run deletes nothing.
    let preview = engine.clear("proj", Some("main"), true).await.unwrap();
    assert!(preview.dry_run);
    assert_eq!(preview.collections.len(), 1);
    assert_eq!(engine.stats("proj").await.unwrap().datasets.len(), 1);

    let result = engine.clear("proj", Some("main"), false).await.unwrap();
    assert_eq!(result.collections_deleted, 1);
    assert!(engine.stats("proj").await.unwrap().datasets.is_empty());
}

#[tokio::test]
async fn background_job_completes_with_progress() {
    let tmp = TempDir::new().unwrap();
    let engine = test_engine(&tmp).await;
    let dir = tmp.path().join("src");
    write_tree(
        &dir,
        &[
            ("one.rs", "pub fn one() -> u8 { 1 }\n"),
            ("two.rs", "pub fn two() -> u8 { 2 }\n"),
        ],
    );

    let job = engine
        .index_local_job(&dir, "proj", "main", false)
        .await
        .unwrap();

    let mut final_status = None;
    for _ in 0..200 {
        let current = engine.job_get(&job.id).await.unwrap();
        if current.status.is_terminal() {
            final_status = Some(current);
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    }
    let finished = final_status.expect("job did not finish in time");
    assert_eq!(finished.status.as_str(), "completed");
    assert!(finished.summary.is_some());

    let history = engine.history("proj", 10).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].id, job.id);
}

#[tokio::test]
async fn watcher_syncs_changes_after_debounce() {
    let tmp = TempDir::new().unwrap();
    let engine = test_engine(&tmp).await;
    let dir = tmp.path().join("watched");
    write_tree(&dir, &[("start.txt", "initial content here\n")]);

    engine
        .index_local(&dir, "proj", "main", false, None)
        .await
        .unwrap();

    let watcher = engine.watch_local(&dir, "proj", "main").await.unwrap();

    // Duplicate watchers on the same scope are rejected.
    let dup = engine.watch_local(&dir, "proj", "main").await;
    assert!(dup.is_err());

    fs::write(dir.join("later.txt"), "content that arrived later\n").unwrap();

    // Wait out the debounce window plus sync time.
    let mut seen = false;
    for _ in 0..200 {
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        let report = engine.stats("proj").await.unwrap();
        if report.datasets.first().map(|d| d.point_count).unwrap_or(0) >= 2 {
            seen = true;
            break;
        }
    }
    assert!(seen, "watcher should have indexed the new file");

    engine
        .stop_watching("proj", Some(&watcher.id), None)
        .await
        .unwrap();
    assert!(engine.watchers_list("proj").await.unwrap().is_empty());
    engine.shutdown().await;
}

#[tokio::test]
async fn defaults_roundtrip_through_engine() {
    let tmp = TempDir::new().unwrap();
    let engine = test_engine(&tmp).await;

    engine.set_defaults("acme", Some("main")).unwrap();
    let defaults = engine.get_defaults().unwrap();
    assert_eq!(defaults.project.as_deref(), Some("acme"));
    assert_eq!(defaults.dataset.as_deref(), Some("main"));

    let (project, dataset) = engine.resolve_scope(None, None).unwrap();
    assert_eq!(project, "acme");
    assert_eq!(dataset, "main");

    let (project, dataset) = engine.resolve_scope(Some("other"), None).unwrap();
    assert_eq!(project, "other");
    assert_eq!(dataset, "main");
}

#[tokio::test]
async fn empty_query_and_empty_scope_return_nothing() {
    let tmp = TempDir::new().unwrap();
    let engine = test_engine(&tmp).await;

    let hits = engine
        .query(&query("ghost-project", None, "   ", 0.5), None)
        .await
        .unwrap();
    assert!(hits.is_empty());

    let hits = engine
        .query(&query("ghost-project", None, "anything", 0.5), None)
        .await
        .unwrap();
    assert!(hits.is_empty(), "unknown project yields an empty access set");

    let mut zero_k = query("ghost-project", None, "anything", 0.5);
    zero_k.top_k = 0;
    let hits = engine.query(&zero_k, None).await.unwrap();
    assert!(hits.is_empty());
}

#[tokio::test]
async fn query_filters_by_language_and_path_prefix() {
    let tmp = TempDir::new().unwrap();
    let engine = test_engine(&tmp).await;
    let dir = tmp.path().join("mixed");
    write_tree(
        &dir,
        &[
            ("src/auth.rs", "pub fn verify_token(token: &str) -> bool { !token.is_empty() }\n"),
            ("docs/auth.md", "# Token verification\n\nverify token flow documented\n"),
        ],
    );

    engine
        .index_local(&dir, "proj", "main", false, None)
        .await
        .unwrap();

    let mut rust_only = query("proj", None, "verify token", 0.1);
    rust_only.lang = Some("rust".to_string());
    let hits = engine.query(&rust_only, None).await.unwrap();
    assert!(!hits.is_empty());
    assert!(hits
        .iter()
        .all(|h| h.payload.language.as_deref() == Some("rust")));

    let mut docs_only = query("proj", None, "verify token", 0.1);
    docs_only.path_prefix = Some("docs/".to_string());
    let hits = engine.query(&docs_only, None).await.unwrap();
    assert!(!hits.is_empty());
    assert!(hits
        .iter()
        .all(|h| h.payload.relative_path.as_deref().unwrap().starts_with("docs/")));
}
