//! In-process registries for jobs and watchers.
//!
//! Durable job state lives in the metadata store; these registries track the
//! live handles — cancellation tokens and spawned tasks — so callers can
//! cancel cooperatively. Orchestrators check their token between phases and
//! between batches; on cancel, queued work is dropped and the job row
//! transitions to `cancelled`.

use dashmap::DashMap;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Live handle for a running ingestion job.
pub struct JobHandle {
    pub token: CancellationToken,
    pub task: JoinHandle<()>,
}

/// Registry of in-flight jobs keyed by job id.
#[derive(Default)]
pub struct JobRegistry {
    jobs: DashMap<String, JobHandle>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, job_id: &str, token: CancellationToken, task: JoinHandle<()>) {
        self.jobs.insert(job_id.to_string(), JobHandle { token, task });
    }

    /// Signal cooperative cancellation. Returns false when the job is not
    /// live here (already finished, or never started in this process).
    pub fn cancel(&self, job_id: &str) -> bool {
        match self.jobs.get(job_id) {
            Some(handle) => {
                handle.token.cancel();
                true
            }
            None => false,
        }
    }

    /// Drop the handle once the job task has finished.
    pub fn remove(&self, job_id: &str) {
        self.jobs.remove(job_id);
    }

    pub fn is_live(&self, job_id: &str) -> bool {
        self.jobs.contains_key(job_id)
    }

    pub fn live_count(&self) -> usize {
        self.jobs.len()
    }
}

/// Live handle for an active filesystem watcher.
pub struct WatcherHandle {
    pub token: CancellationToken,
    pub task: JoinHandle<()>,
}

/// Registry of active watchers keyed by watcher id.
#[derive(Default)]
pub struct WatcherRegistry {
    watchers: DashMap<String, WatcherHandle>,
}

impl WatcherRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, watcher_id: &str, token: CancellationToken, task: JoinHandle<()>) {
        self.watchers
            .insert(watcher_id.to_string(), WatcherHandle { token, task });
    }

    /// Cancel and forget a watcher. Returns false when unknown.
    pub fn stop(&self, watcher_id: &str) -> bool {
        match self.watchers.remove(watcher_id) {
            Some((_, handle)) => {
                handle.token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn is_live(&self, watcher_id: &str) -> bool {
        self.watchers.contains_key(watcher_id)
    }

    /// Cancel every watcher (process shutdown).
    pub fn stop_all(&self) {
        for entry in self.watchers.iter() {
            entry.value().token.cancel();
        }
        self.watchers.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cancel_reaches_the_task() {
        let registry = JobRegistry::new();
        let token = CancellationToken::new();
        let child = token.clone();
        let task = tokio::spawn(async move {
            child.cancelled().await;
        });
        registry.register("job1", token, task);

        assert!(registry.is_live("job1"));
        assert!(registry.cancel("job1"));
        // The task observes the cancellation and finishes.
        tokio::time::timeout(std::time::Duration::from_secs(1), async {
            while registry.jobs.get("job1").map(|h| !h.task.is_finished()).unwrap_or(false) {
                tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        registry.remove("job1");
        assert!(!registry.is_live("job1"));
        assert!(!registry.cancel("job1"));
    }

    #[tokio::test]
    async fn watcher_stop_is_idempotent() {
        let registry = WatcherRegistry::new();
        let token = CancellationToken::new();
        let child = token.clone();
        let task = tokio::spawn(async move { child.cancelled().await });
        registry.register("w1", token, task);
        assert!(registry.stop("w1"));
        assert!(!registry.stop("w1"));
    }
}
