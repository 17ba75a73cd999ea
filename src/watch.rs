//! Debounced filesystem watching.
//!
//! A watcher subscribes to create/modify/remove events under a root and
//! coalesces bursts behind a quiet window (default 2000 ms); when the window
//! expires with no new events, the recorded change set — not the whole tree —
//! is synced through [`crate::sync::run_sync_subset`]. Duplicate watchers on
//! the same `(project, dataset, path)` are rejected with `AlreadyWatching`.

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::engine::Engine;
use crate::error::{Error, ErrorKind, Result};
use crate::models::WatcherInfo;

/// Start watching `path` for the given scope. Returns the registered
/// watcher; the subscription lives until [`stop_watching`] or shutdown.
pub async fn start_watching(
    engine: Arc<Engine>,
    project: &str,
    dataset: &str,
    path: &Path,
) -> Result<WatcherInfo> {
    if !path.is_absolute() {
        return Err(Error::validation(format!(
            "watch path must be absolute: {}",
            path.display()
        )));
    }
    let root = path.canonicalize().map_err(|e| {
        Error::new(
            ErrorKind::Validation,
            format!("cannot resolve {}: {e}", path.display()),
        )
    })?;
    if !root.is_dir() {
        return Err(Error::validation(format!(
            "watch path is not a directory: {}",
            root.display()
        )));
    }

    let project_record = engine.store.get_or_create_project(project).await?;
    let dataset_record = engine
        .store
        .get_or_create_dataset(&project_record, dataset)
        .await?;

    let info = WatcherInfo {
        id: Uuid::new_v4().to_string(),
        project_id: project_record.id.clone(),
        dataset_id: dataset_record.id.clone(),
        path: root.to_string_lossy().to_string(),
        started_at: chrono::Utc::now(),
        last_sync_at: None,
        sync_count: 0,
    };
    // Uniqueness on (project, dataset, path) is enforced by the store.
    engine.store.insert_watcher(&info).await?;

    let (tx, rx) = tokio::sync::mpsc::unbounded_channel::<Vec<PathBuf>>();
    let mut fs_watcher = RecommendedWatcher::new(
        move |result: std::result::Result<Event, notify::Error>| {
            if let Ok(event) = result {
                if matches!(
                    event.kind,
                    EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
                ) {
                    let _ = tx.send(event.paths);
                }
            }
        },
        notify::Config::default(),
    )
    .map_err(|e| Error::new(ErrorKind::Io, format!("cannot create watcher: {e}")))?;

    fs_watcher
        .watch(&root, RecursiveMode::Recursive)
        .map_err(|e| {
            Error::new(
                ErrorKind::Io,
                format!("cannot watch {}: {e}", root.display()),
            )
        })?;

    let token = CancellationToken::new();
    let task = tokio::spawn(debounce_loop(
        engine.clone(),
        info.clone(),
        project.to_string(),
        dataset.to_string(),
        root,
        fs_watcher,
        rx,
        token.clone(),
    ));
    engine.watchers.register(&info.id, token, task);

    info!(watcher = %info.id, path = %info.path, "watcher started");
    Ok(info)
}

/// Stop a watcher by id, or by `(project, path)` when no id is given.
pub async fn stop_watching(
    engine: &Engine,
    project: &str,
    id: Option<&str>,
    path: Option<&Path>,
) -> Result<()> {
    let id = match (id, path) {
        (Some(id), _) => id.to_string(),
        (None, Some(path)) => {
            let project_record = engine
                .store
                .get_project_by_name(project)
                .await?
                .ok_or_else(|| Error::not_found("project not found").with_resource(project))?;
            let needle = path
                .canonicalize()
                .unwrap_or_else(|_| path.to_path_buf())
                .to_string_lossy()
                .to_string();
            engine
                .store
                .list_watchers(&project_record.id)
                .await?
                .into_iter()
                .find(|w| w.path == needle)
                .map(|w| w.id)
                .ok_or_else(|| Error::not_found("no watcher on that path").with_resource(needle))?
        }
        (None, None) => return Err(Error::validation("provide a watcher id or a path")),
    };

    engine.watchers.stop(&id);
    engine.store.delete_watcher(&id).await?;
    info!(watcher = %id, "watcher stopped");
    Ok(())
}

/// Collect events until the debounce window passes without new ones, then
/// sync the recorded change set.
#[allow(clippy::too_many_arguments)]
async fn debounce_loop(
    engine: Arc<Engine>,
    info: WatcherInfo,
    project: String,
    dataset: String,
    root: PathBuf,
    _fs_watcher: RecommendedWatcher,
    mut rx: tokio::sync::mpsc::UnboundedReceiver<Vec<PathBuf>>,
    token: CancellationToken,
) {
    let debounce = Duration::from_millis(engine.config.sync.debounce_ms);
    let mut pending: HashSet<PathBuf> = HashSet::new();

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            event = rx.recv() => {
                match event {
                    Some(paths) => {
                        pending.extend(paths);
                    }
                    None => break,
                }
            }
            _ = tokio::time::sleep(debounce), if !pending.is_empty() => {
                let batch = std::mem::take(&mut pending);
                match crate::sync::run_sync_subset(
                    &engine,
                    &project,
                    &dataset,
                    &root,
                    &batch,
                    token.clone(),
                )
                .await
                {
                    Ok(stats) if stats.status == "synced" => {
                        info!(
                            watcher = %info.id,
                            added = stats.added,
                            modified = stats.modified,
                            deleted = stats.deleted,
                            "watcher sync applied"
                        );
                        if let Err(e) = engine.store.touch_watcher(&info.id).await {
                            warn!(watcher = %info.id, error = %e, "failed to record sync");
                        }
                    }
                    Ok(_) => {}
                    Err(e) if e.kind == ErrorKind::Cancelled => break,
                    Err(e) => {
                        error!(watcher = %info.id, error = %e, "watcher sync failed");
                    }
                }
            }
        }
    }
}
