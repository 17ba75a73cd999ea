//! The engine handle.
//!
//! All process-wide state — configuration, the SQLite pool, the vector index,
//! the embedding coordinator, provider capabilities, and the job/watcher
//! registries — is constructed once in [`Engine::connect`] and plumbed
//! explicitly. There are no globals; transports hold an `Arc<Engine>` and
//! call the operation surface below.

use dashmap::DashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::Config;
use crate::crawl::{CrawlSpec, HttpPageProducer, PageProducer};
use crate::defaults::{self, ScopeDefaults};
use crate::embedding::EmbeddingCoordinator;
use crate::error::{Error, Result};
use crate::ingest::{self, IngestOutcome, IngestRequest, IngestSource};
use crate::jobs::{JobRegistry, WatcherRegistry};
use crate::models::{IngestionJob, JobKind, JobStatus, Share, SharePermission, WatcherInfo};
use crate::progress::ProgressSink;
use crate::query::{self, QueryHit, QueryRequest};
use crate::rerank::{self, Reranker};
use crate::smart::{self, LlmProvider, SmartAnswer, SmartQueryRequest};
use crate::stats::{ClearResult, ProjectStats, ScopeEntry, StatusReport};
use crate::store::MetadataStore;
use crate::sync::SyncStats;
use crate::vector::{SqliteVectorIndex, VectorIndex};
use crate::watch;

pub struct Engine {
    pub config: Arc<Config>,
    pub store: MetadataStore,
    pub index: Arc<dyn VectorIndex>,
    pub embedder: Arc<EmbeddingCoordinator>,
    pub reranker: Arc<dyn Reranker>,
    pub llm: Arc<dyn LlmProvider>,
    pub pages: Arc<dyn PageProducer>,
    pub jobs: Arc<JobRegistry>,
    pub watchers: Arc<WatcherRegistry>,
    /// Bounds concurrent vector-index write batches across all jobs.
    pub write_semaphore: Arc<Semaphore>,
    sync_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl Engine {
    /// Build the engine: open the pool, run migrations, construct providers.
    pub async fn connect(config: Config) -> Result<Arc<Self>> {
        let pool = crate::db::connect(&config).await?;
        crate::migrate::run_migrations(&pool).await?;

        let embedder = Arc::new(EmbeddingCoordinator::from_config(&config.embedding)?);
        let reranker = rerank::create_reranker(&config.rerank)?;
        let llm = smart::create_llm(&config.llm)?;
        let write_semaphore = Arc::new(Semaphore::new(config.retrieval.write_concurrency.max(1)));

        Ok(Arc::new(Self {
            store: MetadataStore::new(pool.clone()),
            index: Arc::new(SqliteVectorIndex::new(pool)),
            embedder,
            reranker,
            llm,
            pages: Arc::new(HttpPageProducer::new()?),
            jobs: Arc::new(JobRegistry::new()),
            watchers: Arc::new(WatcherRegistry::new()),
            write_semaphore,
            sync_locks: DashMap::new(),
            config: Arc::new(config),
        }))
    }

    /// Single-flight lock for one `(project, dataset, root)` sync scope.
    pub fn sync_lock(&self, project: &str, dataset: &str, root: &Path) -> Arc<Mutex<()>> {
        let key = format!("{project}\0{dataset}\0{}", root.display());
        self.sync_locks
            .entry(key)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Stop watchers and drain the pool.
    pub async fn shutdown(&self) {
        self.watchers.stop_all();
        self.store.pool().close().await;
        info!("engine shut down");
    }

    // ============ Defaults & scoping ============

    pub fn set_defaults(&self, project: &str, dataset: Option<&str>) -> Result<()> {
        let defaults = ScopeDefaults {
            project: Some(project.to_string()),
            dataset: dataset.map(|s| s.to_string()),
        };
        defaults::save_defaults(&self.config.storage.defaults_file(), &defaults)
    }

    pub fn get_defaults(&self) -> Result<ScopeDefaults> {
        defaults::load_defaults(&self.config.storage.defaults_file())
    }

    pub fn auto_scope(
        &self,
        path: &str,
        source_kind: &str,
        identifier: Option<&str>,
    ) -> Result<(String, String)> {
        let defaults = self.get_defaults()?;
        Ok(defaults::auto_scope(&defaults, path, source_kind, identifier))
    }

    /// Resolve an operation's scope from explicit arguments, falling back to
    /// stored defaults.
    pub fn resolve_scope(
        &self,
        project: Option<&str>,
        dataset: Option<&str>,
    ) -> Result<(String, String)> {
        let defaults = self.get_defaults()?;
        let project = project
            .map(|s| s.to_string())
            .or(defaults.project)
            .ok_or_else(|| Error::validation("no project given and no default set"))?;
        let dataset = dataset
            .map(|s| s.to_string())
            .or(defaults.dataset)
            .unwrap_or_else(|| "main".to_string());
        Ok((project, dataset))
    }

    // ============ Ingestion ============

    /// Index a local directory synchronously.
    pub async fn index_local(
        &self,
        path: &Path,
        project: &str,
        dataset: &str,
        force: bool,
        progress: Option<ProgressSink>,
    ) -> Result<IngestOutcome> {
        let path = absolute_dir(path)?;
        let req = IngestRequest {
            project: project.to_string(),
            dataset: dataset.to_string(),
            source: IngestSource::LocalPath { path },
            force,
            job_id: None,
        };
        ingest::run_ingest(self, req, progress, CancellationToken::new()).await
    }

    /// Index a local directory on a background job.
    pub async fn index_local_job(
        self: &Arc<Self>,
        path: &Path,
        project: &str,
        dataset: &str,
        force: bool,
    ) -> Result<IngestionJob> {
        let path = absolute_dir(path)?;
        let source = IngestSource::LocalPath { path: path.clone() };
        self.spawn_ingest_job(JobKind::Local, &path.to_string_lossy(), project, dataset, source, force)
            .await
    }

    /// Index a Git repository synchronously.
    pub async fn index_git(
        &self,
        repo: &str,
        branch: Option<&str>,
        project: &str,
        dataset: &str,
        force: bool,
        progress: Option<ProgressSink>,
    ) -> Result<IngestOutcome> {
        let req = IngestRequest {
            project: project.to_string(),
            dataset: dataset.to_string(),
            source: IngestSource::Git {
                repo: repo.to_string(),
                branch: branch.map(|s| s.to_string()),
            },
            force,
            job_id: None,
        };
        ingest::run_ingest(self, req, progress, CancellationToken::new()).await
    }

    /// Index a Git repository on a background job.
    pub async fn index_git_job(
        self: &Arc<Self>,
        repo: &str,
        branch: Option<&str>,
        project: &str,
        dataset: &str,
        force: bool,
    ) -> Result<IngestionJob> {
        let source = IngestSource::Git {
            repo: repo.to_string(),
            branch: branch.map(|s| s.to_string()),
        };
        self.spawn_ingest_job(JobKind::Github, repo, project, dataset, source, force)
            .await
    }

    /// Crawl a URL and index the produced pages synchronously.
    pub async fn crawl(
        &self,
        spec: &CrawlSpec,
        project: &str,
        dataset: &str,
        force: bool,
        progress: Option<ProgressSink>,
    ) -> Result<IngestOutcome> {
        let cancel = CancellationToken::new();
        let pages = self.pages.produce(spec, &cancel).await?;
        let req = IngestRequest {
            project: project.to_string(),
            dataset: dataset.to_string(),
            source: IngestSource::Pages { pages },
            force,
            job_id: None,
        };
        ingest::run_ingest(self, req, progress, cancel).await
    }

    /// Crawl on a background job: pages are produced inside the job so the
    /// caller returns immediately.
    pub async fn crawl_job(
        self: &Arc<Self>,
        spec: CrawlSpec,
        project: &str,
        dataset: &str,
        force: bool,
    ) -> Result<IngestionJob> {
        let project_record = self.store.get_or_create_project(project).await?;
        let dataset_record = self
            .store
            .get_or_create_dataset(&project_record, dataset)
            .await?;
        let job = self
            .store
            .create_job(&project_record.id, &dataset_record.id, JobKind::Crawl, &spec.url)
            .await?;

        let engine = Arc::clone(self);
        let job_id = job.id.clone();
        let token = CancellationToken::new();
        let task_token = token.clone();
        let project = project.to_string();
        let dataset = dataset.to_string();
        let task = tokio::spawn(async move {
            let result = async {
                engine
                    .store
                    .transition_job(&job_id, JobStatus::Running, None, None)
                    .await?;
                let pages = engine.pages.produce(&spec, &task_token).await?;
                let req = IngestRequest {
                    project,
                    dataset,
                    source: IngestSource::Pages { pages },
                    force,
                    job_id: Some(job_id.clone()),
                };
                ingest::run_ingest(&engine, req, None, task_token.clone()).await
            }
            .await;
            engine.finish_job(&job_id, result).await;
        });
        self.jobs.register(&job.id, token, task);
        Ok(job)
    }

    async fn spawn_ingest_job(
        self: &Arc<Self>,
        kind: JobKind,
        source_desc: &str,
        project: &str,
        dataset: &str,
        source: IngestSource,
        force: bool,
    ) -> Result<IngestionJob> {
        let project_record = self.store.get_or_create_project(project).await?;
        let dataset_record = self
            .store
            .get_or_create_dataset(&project_record, dataset)
            .await?;
        let job = self
            .store
            .create_job(&project_record.id, &dataset_record.id, kind, source_desc)
            .await?;

        let engine = Arc::clone(self);
        let job_id = job.id.clone();
        let token = CancellationToken::new();
        let task_token = token.clone();
        let req = IngestRequest {
            project: project.to_string(),
            dataset: dataset.to_string(),
            source,
            force,
            job_id: Some(job.id.clone()),
        };
        let task = tokio::spawn(async move {
            let result = async {
                engine
                    .store
                    .transition_job(&job_id, JobStatus::Running, None, None)
                    .await?;
                ingest::run_ingest(&engine, req, None, task_token.clone()).await
            }
            .await;
            engine.finish_job(&job_id, result).await;
        });
        self.jobs.register(&job.id, token, task);
        Ok(job)
    }

    /// Record the terminal state for a finished job task.
    async fn finish_job(&self, job_id: &str, result: Result<IngestOutcome>) {
        let transition = match result {
            Ok(outcome) => {
                let summary = serde_json::to_string(&outcome).ok();
                self.store
                    .transition_job(job_id, JobStatus::Completed, None, summary.as_deref())
                    .await
            }
            Err(e) if e.kind == crate::error::ErrorKind::Cancelled => {
                self.store
                    .transition_job(job_id, JobStatus::Cancelled, Some(&e.to_string()), None)
                    .await
            }
            Err(e) => {
                self.store
                    .transition_job(job_id, JobStatus::Failed, Some(&e.to_string()), None)
                    .await
            }
        };
        if let Err(e) = transition {
            tracing::warn!(job = %job_id, error = %e, "failed to record job terminal state");
        }
        self.jobs.remove(job_id);
    }

    // ============ Sync & watch ============

    pub async fn sync_local(
        &self,
        path: &Path,
        project: &str,
        dataset: &str,
        force: bool,
        progress: Option<ProgressSink>,
    ) -> Result<SyncStats> {
        let sink = progress.clone();
        let result = crate::sync::run_sync(
            self,
            project,
            dataset,
            path,
            force,
            progress,
            CancellationToken::new(),
        )
        .await;
        if let Err(ref e) = result {
            crate::progress::emit_done(sink.as_ref(), "failed", e.to_string());
        }
        result
    }

    pub async fn watch_local(
        self: &Arc<Self>,
        path: &Path,
        project: &str,
        dataset: &str,
    ) -> Result<WatcherInfo> {
        watch::start_watching(Arc::clone(self), project, dataset, path).await
    }

    pub async fn stop_watching(
        &self,
        project: &str,
        id: Option<&str>,
        path: Option<&Path>,
    ) -> Result<()> {
        watch::stop_watching(self, project, id, path).await
    }

    pub async fn watchers_list(&self, project: &str) -> Result<Vec<WatcherInfo>> {
        let project_record = self
            .store
            .get_project_by_name(project)
            .await?
            .ok_or_else(|| Error::not_found("project not found").with_resource(project))?;
        self.store.list_watchers(&project_record.id).await
    }

    // ============ Query ============

    pub async fn query(
        &self,
        req: &QueryRequest,
        progress: Option<ProgressSink>,
    ) -> Result<Vec<QueryHit>> {
        query::run_query(self, req, progress).await
    }

    pub async fn smart_query(
        &self,
        req: &SmartQueryRequest,
        progress: Option<ProgressSink>,
    ) -> Result<SmartAnswer> {
        smart::run_smart_query(self, req, progress).await
    }

    // ============ Management ============

    pub async fn stats(&self, project: &str) -> Result<ProjectStats> {
        crate::stats::stats(self, project).await
    }

    pub async fn list_scopes(&self, project: &str) -> Result<Vec<ScopeEntry>> {
        crate::stats::list_scopes(self, project).await
    }

    pub async fn history(&self, project: &str, limit: i64) -> Result<Vec<IngestionJob>> {
        crate::stats::history(self, project, limit).await
    }

    pub async fn clear(
        &self,
        project: &str,
        dataset: Option<&str>,
        dry_run: bool,
    ) -> Result<ClearResult> {
        crate::stats::clear(self, project, dataset, dry_run).await
    }

    pub async fn status(
        &self,
        project: Option<&str>,
        dataset: Option<&str>,
        path: Option<&Path>,
    ) -> Result<StatusReport> {
        crate::stats::status(self, project, dataset, path).await
    }

    pub async fn job_get(&self, job_id: &str) -> Result<IngestionJob> {
        self.store.get_job(job_id).await
    }

    /// Signal cooperative cancellation. A live job observes its token between
    /// phases and batches; an orphaned non-terminal row transitions directly.
    pub async fn job_cancel(&self, job_id: &str) -> Result<IngestionJob> {
        if self.jobs.cancel(job_id) {
            return self.store.get_job(job_id).await;
        }
        self.store
            .transition_job(job_id, JobStatus::Cancelled, Some("cancelled by caller"), None)
            .await
    }

    // ============ Shares ============

    pub async fn share_dataset(
        &self,
        owner_project: &str,
        dataset: &str,
        grantee_project: &str,
        permission: SharePermission,
    ) -> Result<Share> {
        let owner = self
            .store
            .get_project_by_name(owner_project)
            .await?
            .ok_or_else(|| Error::not_found("project not found").with_resource(owner_project))?;
        let grantee = self
            .store
            .get_or_create_project(grantee_project)
            .await?;
        let dataset_record = self
            .store
            .get_dataset(&owner.id, dataset)
            .await?
            .ok_or_else(|| Error::not_found("dataset not found").with_resource(dataset))?;
        self.store
            .create_share(&dataset_record.id, &owner.id, &grantee.id, permission)
            .await
    }

    pub async fn revoke_share(
        &self,
        owner_project: &str,
        dataset: &str,
        grantee_project: &str,
    ) -> Result<()> {
        let owner = self
            .store
            .get_project_by_name(owner_project)
            .await?
            .ok_or_else(|| Error::not_found("project not found").with_resource(owner_project))?;
        let grantee = self
            .store
            .get_project_by_name(grantee_project)
            .await?
            .ok_or_else(|| Error::not_found("project not found").with_resource(grantee_project))?;
        let dataset_record = self
            .store
            .get_dataset(&owner.id, dataset)
            .await?
            .ok_or_else(|| Error::not_found("dataset not found").with_resource(dataset))?;
        self.store.revoke_share(&dataset_record.id, &grantee.id).await
    }
}

fn absolute_dir(path: &Path) -> Result<PathBuf> {
    if !path.is_absolute() {
        return Err(Error::validation(format!(
            "path must be absolute: {}",
            path.display()
        )));
    }
    path.canonicalize().map_err(|e| {
        Error::validation(format!("cannot resolve {}: {e}", path.display()))
    })
}
