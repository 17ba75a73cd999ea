//! Scope management: canonical collection naming and access-set resolution.
//!
//! Every (project, dataset) pair maps to exactly one collection name, by a
//! normalization that existing deployments depend on — the rule is a
//! compatibility contract and must not drift:
//!
//! 1. `project_{project}_dataset_{dataset}`
//! 2. lower-case
//! 3. any character outside `[a-z0-9_]` becomes `_`
//! 4. runs of `_` collapse to one; leading/trailing `_` trimmed
//! 5. truncated to 63 characters, keeping the prefix
//!
//! The access set of a query is the project's own datasets (optionally
//! narrowed to one), plus datasets shared in with at least `read`, plus
//! global datasets when requested — deduplicated by dataset id.

use crate::error::Result;
use crate::models::{CollectionBinding, Dataset};
use crate::store::MetadataStore;

/// Maximum identifier length accepted by the vector index backend.
pub const MAX_COLLECTION_NAME_LEN: usize = 63;

/// Deterministic collection name for a (project, dataset) pair.
pub fn canonical_collection_name(project: &str, dataset: &str) -> String {
    let raw = format!("project_{project}_dataset_{dataset}").to_lowercase();

    let mut out = String::with_capacity(raw.len());
    let mut prev_underscore = false;
    for c in raw.chars() {
        let mapped = if c.is_ascii_lowercase() || c.is_ascii_digit() {
            c
        } else {
            '_'
        };
        if mapped == '_' {
            if prev_underscore {
                continue;
            }
            prev_underscore = true;
        } else {
            prev_underscore = false;
        }
        out.push(mapped);
    }

    let trimmed = out.trim_matches('_');
    let mut name = trimmed.to_string();
    if name.len() > MAX_COLLECTION_NAME_LEN {
        name.truncate(MAX_COLLECTION_NAME_LEN);
        // Truncation must not leave a trailing separator.
        while name.ends_with('_') {
            name.pop();
        }
    }
    name
}

/// How a dataset entered the access set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessVia {
    Own,
    Share,
    Global,
}

/// One dataset a query may touch, with its physical bindings.
#[derive(Debug, Clone)]
pub struct AccessEntry {
    pub dataset: Dataset,
    pub via: AccessVia,
    /// Bindings present in the metadata store; empty until first ingest.
    pub bindings: Vec<CollectionBinding>,
}

/// Resolve the set of datasets a query scoped to `project` may touch.
///
/// A project with no record contributes no own datasets; shares and globals
/// still apply, so the result can be non-empty for a fresh project name.
pub async fn resolve_access_set(
    store: &MetadataStore,
    project: &str,
    dataset: Option<&str>,
    include_global: bool,
) -> Result<Vec<AccessEntry>> {
    let mut entries: Vec<(Dataset, AccessVia)> = Vec::new();

    let project_record = store.get_project_by_name(project).await?;
    if let Some(ref p) = project_record {
        let own = store.list_datasets_for_project(&p.id).await?;
        for d in own {
            if dataset.map(|name| name == d.name).unwrap_or(true) {
                entries.push((d, AccessVia::Own));
            }
        }
        for d in store.list_shared_datasets_for(&p.id).await? {
            entries.push((d, AccessVia::Share));
        }
    }

    if include_global {
        for d in store.list_global_datasets().await? {
            entries.push((d, AccessVia::Global));
        }
    }

    // Dedup by dataset id; the first occurrence (own > share > global) wins.
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    for (d, via) in entries {
        if !seen.insert(d.id.clone()) {
            continue;
        }
        let bindings = store.list_collection_bindings(&d.id).await?;
        out.push(AccessEntry {
            dataset: d,
            via,
            bindings,
        });
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_basic() {
        assert_eq!(
            canonical_collection_name("My App", "Main"),
            "project_my_app_dataset_main"
        );
        assert_eq!(
            canonical_collection_name("a/b", "c_d"),
            "project_a_b_dataset_c_d"
        );
    }

    #[test]
    fn canonical_collapses_runs_and_trims() {
        assert_eq!(
            canonical_collection_name("--weird--", "##name##"),
            "project_weird_dataset_name"
        );
        assert_eq!(
            canonical_collection_name("a   b", "c...d"),
            "project_a_b_dataset_c_d"
        );
    }

    #[test]
    fn canonical_is_idempotent() {
        let once = canonical_collection_name("Söme Prøject", "däta-set");
        // Re-normalizing the normalized output changes nothing.
        let again = canonical_collection_name(
            once.trim_start_matches("project_")
                .split("_dataset_")
                .next()
                .unwrap(),
            once.split("_dataset_").nth(1).unwrap(),
        );
        assert_eq!(once, again);
    }

    #[test]
    fn canonical_truncates_to_limit() {
        let long = "x".repeat(200);
        let name = canonical_collection_name(&long, &long);
        assert!(name.len() <= MAX_COLLECTION_NAME_LEN);
        assert!(name.starts_with("project_x"));
        assert!(!name.ends_with('_'));
    }

    #[test]
    fn canonical_identical_inputs_collide() {
        assert_eq!(
            canonical_collection_name("a b", "x"),
            canonical_collection_name("a_b", "x")
        );
    }

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
    async fn access_set_own_and_filtered() {
        let (_dir, store) = test_store().await;
        let p = store.get_or_create_project("acme").await.unwrap();
        store.get_or_create_dataset(&p, "alpha").await.unwrap();
        store.get_or_create_dataset(&p, "beta").await.unwrap();

        let all = resolve_access_set(&store, "acme", None, true).await.unwrap();
        assert_eq!(all.len(), 2);

        let one = resolve_access_set(&store, "acme", Some("alpha"), true)
            .await
            .unwrap();
        assert_eq!(one.len(), 1);
        assert_eq!(one[0].dataset.name, "alpha");
        assert_eq!(one[0].via, AccessVia::Own);
    }

    #[tokio::test]
    async fn access_set_includes_shares_and_globals() {
        let (_dir, store) = test_store().await;
        let a = store.get_or_create_project("a").await.unwrap();
        let b = store.get_or_create_project("b").await.unwrap();
        let docs = store.get_or_create_dataset(&a, "docs").await.unwrap();
        let wiki = store.get_or_create_dataset(&a, "wiki").await.unwrap();
        store.set_dataset_global(&wiki.id, true).await.unwrap();
        store
            .create_share(&docs.id, &a.id, &b.id, crate::models::SharePermission::Read)
            .await
            .unwrap();

        let set = resolve_access_set(&store, "b", None, true).await.unwrap();
        let ids: Vec<&str> = set.iter().map(|e| e.dataset.id.as_str()).collect();
        assert!(ids.contains(&docs.id.as_str()));
        assert!(ids.contains(&wiki.id.as_str()));

        let without_global = resolve_access_set(&store, "b", None, false).await.unwrap();
        let ids: Vec<&str> = without_global.iter().map(|e| e.dataset.id.as_str()).collect();
        assert!(ids.contains(&docs.id.as_str()));
        assert!(!ids.contains(&wiki.id.as_str()));
    }

    #[tokio::test]
    async fn access_set_dedups_by_dataset_id() {
        let (_dir, store) = test_store().await;
        let a = store.get_or_create_project("a").await.unwrap();
        let docs = store.get_or_create_dataset(&a, "docs").await.unwrap();
        store.set_dataset_global(&docs.id, true).await.unwrap();

        // Own and global both match; the entry appears once, as Own.
        let set = resolve_access_set(&store, "a", None, true).await.unwrap();
        assert_eq!(set.len(), 1);
        assert_eq!(set[0].via, AccessVia::Own);
    }

    #[tokio::test]
    async fn unknown_project_sees_only_globals() {
        let (_dir, store) = test_store().await;
        let a = store.get_or_create_project("a").await.unwrap();
        let wiki = store.get_or_create_dataset(&a, "wiki").await.unwrap();
        store.set_dataset_global(&wiki.id, true).await.unwrap();

        let set = resolve_access_set(&store, "ghost", None, true).await.unwrap();
        assert_eq!(set.len(), 1);
        assert_eq!(set[0].via, AccessVia::Global);

        let none = resolve_access_set(&store, "ghost", None, false).await.unwrap();
        assert!(none.is_empty());
    }
}
