//! # ctxscope
//!
//! Command-line surface over the Context Scope engine. Every subcommand is a
//! thin projection of the transport-neutral operation surface on
//! [`context_scope::engine::Engine`].

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use context_scope::config;
use context_scope::crawl::CrawlSpec;
use context_scope::engine::Engine;
use context_scope::models::SharePermission;
use context_scope::progress::{ProgressEvent, ProgressSink};
use context_scope::query::{QueryMode, QueryRequest};
use context_scope::smart::{SmartQueryRequest, Strategy};

#[derive(Parser)]
#[command(
    name = "ctxscope",
    about = "Context Scope — a project-scoped code and document search engine",
    version
)]
struct Cli {
    /// Path to configuration file
    #[arg(long, global = true, default_value = "./config/ctxscope.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema
    Init,

    /// Manage scope defaults
    Defaults {
        #[command(subcommand)]
        action: DefaultsAction,
    },

    /// Index a local directory
    Index {
        /// Absolute path to the directory
        path: PathBuf,

        #[arg(long)]
        project: Option<String>,

        #[arg(long)]
        dataset: Option<String>,

        /// Drop and rebuild the collection
        #[arg(long)]
        force: bool,

        /// Run as a background job and print the job id
        #[arg(long)]
        job: bool,
    },

    /// Index a Git repository (shallow clone)
    IndexGit {
        /// Repository URL or local path
        repo: String,

        #[arg(long)]
        branch: Option<String>,

        #[arg(long)]
        project: Option<String>,

        #[arg(long)]
        dataset: Option<String>,

        #[arg(long)]
        force: bool,

        #[arg(long)]
        job: bool,
    },

    /// Crawl a URL and index the produced pages
    Crawl {
        /// Seed URL
        url: String,

        /// `page` fetches only the seed; `site` follows same-domain links
        #[arg(long, default_value = "page")]
        crawl_type: String,

        #[arg(long, default_value_t = 25)]
        max_pages: usize,

        #[arg(long, default_value_t = 2)]
        depth: usize,

        #[arg(long)]
        project: Option<String>,

        #[arg(long)]
        dataset: Option<String>,

        #[arg(long)]
        force: bool,

        #[arg(long)]
        job: bool,
    },

    /// Sync a previously indexed directory against its snapshot
    Sync {
        path: PathBuf,

        #[arg(long)]
        project: Option<String>,

        #[arg(long)]
        dataset: Option<String>,

        /// Re-apply everything even when the tree root is unchanged
        #[arg(long)]
        force: bool,
    },

    /// Watch a directory and sync changes automatically
    Watch {
        path: PathBuf,

        #[arg(long)]
        project: Option<String>,

        #[arg(long)]
        dataset: Option<String>,
    },

    /// Stop a watcher by id or path
    Unwatch {
        #[arg(long)]
        id: Option<String>,

        #[arg(long)]
        path: Option<PathBuf>,

        #[arg(long)]
        project: Option<String>,
    },

    /// List active watchers
    Watchers {
        #[arg(long)]
        project: Option<String>,
    },

    /// Search indexed content
    Query {
        query: String,

        #[arg(long)]
        project: Option<String>,

        #[arg(long)]
        dataset: Option<String>,

        /// Exclude global datasets
        #[arg(long)]
        no_global: bool,

        #[arg(long, default_value_t = 10)]
        top_k: usize,

        #[arg(long, default_value_t = 0.5)]
        threshold: f32,

        #[arg(long)]
        repo: Option<String>,

        #[arg(long)]
        lang: Option<String>,

        #[arg(long)]
        path_prefix: Option<String>,

        /// `dense` or `hybrid`
        #[arg(long, default_value = "hybrid")]
        mode: String,
    },

    /// LLM-enhanced search with optional answer synthesis
    SmartQuery {
        query: String,

        #[arg(long)]
        project: Option<String>,

        #[arg(long)]
        dataset: Option<String>,

        #[arg(long)]
        no_global: bool,

        #[arg(long, default_value_t = 10)]
        top_k: usize,

        /// Comma-separated strategies: rewrite, hyde
        #[arg(long, default_value = "rewrite")]
        strategies: String,

        /// `answer` or `retrieval`
        #[arg(long, default_value = "answer")]
        answer_type: String,
    },

    /// Per-dataset index statistics
    Stats {
        #[arg(long)]
        project: Option<String>,
    },

    /// List every dataset a query may touch
    Scopes {
        #[arg(long)]
        project: Option<String>,
    },

    /// Recent ingestion jobs
    History {
        #[arg(long)]
        project: Option<String>,

        #[arg(long, default_value_t = 20)]
        limit: i64,
    },

    /// Scope status: bindings, watchers, snapshot presence
    Status {
        #[arg(long)]
        project: Option<String>,

        #[arg(long)]
        dataset: Option<String>,

        #[arg(long)]
        path: Option<PathBuf>,
    },

    /// Delete collections and dataset records
    Clear {
        #[arg(long)]
        project: Option<String>,

        #[arg(long)]
        dataset: Option<String>,

        /// Report what would be deleted without deleting
        #[arg(long)]
        dry_run: bool,
    },

    /// Inspect or cancel jobs
    Job {
        #[command(subcommand)]
        action: JobAction,
    },

    /// Manage cross-project dataset shares
    Share {
        #[command(subcommand)]
        action: ShareAction,
    },
}

#[derive(Subcommand)]
enum DefaultsAction {
    /// Set default project (and optionally dataset)
    Set {
        project: String,

        #[arg(long)]
        dataset: Option<String>,
    },
    /// Show current defaults
    Show,
}

#[derive(Subcommand)]
enum JobAction {
    /// Show a job's status and progress
    Get { id: String },
    /// Cancel a running job
    Cancel { id: String },
}

#[derive(Subcommand)]
enum ShareAction {
    /// Grant another project access to a dataset
    Grant {
        dataset: String,

        /// Grantee project name
        #[arg(long)]
        to: String,

        #[arg(long)]
        project: Option<String>,

        /// read, write, or owner
        #[arg(long, default_value = "read")]
        permission: String,
    },
    /// Revoke a grant
    Revoke {
        dataset: String,

        #[arg(long)]
        to: String,

        #[arg(long)]
        project: Option<String>,
    },
}

fn progress_printer() -> ProgressSink {
    Arc::new(|event: ProgressEvent| {
        eprintln!(
            "  [{:<9}] {:>5.1}% {}",
            event.phase, event.percentage, event.detail
        );
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;
    let engine = Engine::connect(cfg).await?;

    match cli.command {
        Commands::Init => {
            // Connecting already ran the migrations.
            println!("Database initialized at {}", engine.config.storage.db_path.display());
        }

        Commands::Defaults { action } => match action {
            DefaultsAction::Set { project, dataset } => {
                engine.set_defaults(&project, dataset.as_deref())?;
                println!("defaults set: project={project} dataset={}", dataset.as_deref().unwrap_or("-"));
            }
            DefaultsAction::Show => {
                let defaults = engine.get_defaults()?;
                println!("project: {}", defaults.project.as_deref().unwrap_or("-"));
                println!("dataset: {}", defaults.dataset.as_deref().unwrap_or("-"));
            }
        },

        Commands::Index {
            path,
            project,
            dataset,
            force,
            job,
        } => {
            let (project, dataset) = engine.resolve_scope(project.as_deref(), dataset.as_deref())?;
            if job {
                let job = engine.index_local_job(&path, &project, &dataset, force).await?;
                println!("job started: {}", job.id);
            } else {
                let outcome = engine
                    .index_local(&path, &project, &dataset, force, Some(progress_printer()))
                    .await?;
                println!("{}", serde_json::to_string_pretty(&outcome)?);
            }
        }

        Commands::IndexGit {
            repo,
            branch,
            project,
            dataset,
            force,
            job,
        } => {
            let (project, dataset) = engine.resolve_scope(project.as_deref(), dataset.as_deref())?;
            if job {
                let job = engine
                    .index_git_job(&repo, branch.as_deref(), &project, &dataset, force)
                    .await?;
                println!("job started: {}", job.id);
            } else {
                let outcome = engine
                    .index_git(
                        &repo,
                        branch.as_deref(),
                        &project,
                        &dataset,
                        force,
                        Some(progress_printer()),
                    )
                    .await?;
                println!("{}", serde_json::to_string_pretty(&outcome)?);
            }
        }

        Commands::Crawl {
            url,
            crawl_type,
            max_pages,
            depth,
            project,
            dataset,
            force,
            job,
        } => {
            let (project, dataset) = engine.resolve_scope(project.as_deref(), dataset.as_deref())?;
            let spec = CrawlSpec {
                url,
                crawl_type,
                max_pages,
                depth,
            };
            if job {
                let job = engine.crawl_job(spec, &project, &dataset, force).await?;
                println!("job started: {}", job.id);
            } else {
                let outcome = engine
                    .crawl(&spec, &project, &dataset, force, Some(progress_printer()))
                    .await?;
                println!("{}", serde_json::to_string_pretty(&outcome)?);
            }
        }

        Commands::Sync {
            path,
            project,
            dataset,
            force,
        } => {
            let (project, dataset) = engine.resolve_scope(project.as_deref(), dataset.as_deref())?;
            let stats = engine
                .sync_local(&path, &project, &dataset, force, Some(progress_printer()))
                .await?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }

        Commands::Watch {
            path,
            project,
            dataset,
        } => {
            let (project, dataset) = engine.resolve_scope(project.as_deref(), dataset.as_deref())?;
            let watcher = engine.watch_local(&path, &project, &dataset).await?;
            println!("watching {} (id {})", watcher.path, watcher.id);
            println!("press Ctrl-C to stop");
            tokio::signal::ctrl_c().await?;
            engine.stop_watching(&project, Some(&watcher.id), None).await?;
            engine.shutdown().await;
        }

        Commands::Unwatch { id, path, project } => {
            let (project, _) = engine.resolve_scope(project.as_deref(), None)?;
            engine
                .stop_watching(&project, id.as_deref(), path.as_deref())
                .await?;
            println!("watcher stopped");
        }

        Commands::Watchers { project } => {
            let (project, _) = engine.resolve_scope(project.as_deref(), None)?;
            let watchers = engine.watchers_list(&project).await?;
            if watchers.is_empty() {
                println!("No watchers.");
            }
            for w in watchers {
                println!(
                    "{}  {}  syncs={}  last={}",
                    w.id,
                    w.path,
                    w.sync_count,
                    w.last_sync_at
                        .map(|t| t.to_rfc3339())
                        .unwrap_or_else(|| "-".to_string())
                );
            }
        }

        Commands::Query {
            query,
            project,
            dataset,
            no_global,
            top_k,
            threshold,
            repo,
            lang,
            path_prefix,
            mode,
        } => {
            let (project, _) = engine.resolve_scope(project.as_deref(), None)?;
            let req = QueryRequest {
                query,
                project,
                dataset,
                include_global: !no_global,
                top_k,
                threshold,
                repo,
                lang,
                path_prefix,
                mode: QueryMode::parse(&mode),
            };
            let hits = engine.query(&req, None).await?;
            if hits.is_empty() {
                println!("No results.");
            }
            for (i, hit) in hits.iter().enumerate() {
                let source = hit
                    .payload
                    .url
                    .clone()
                    .or_else(|| hit.payload.relative_path.clone())
                    .unwrap_or_else(|| hit.id.clone());
                println!(
                    "{}. [{:.3}] {} (dense {:.3}{})",
                    i + 1,
                    hit.scores.final_score,
                    source,
                    hit.scores.dense,
                    hit.scores
                        .sparse
                        .map(|s| format!(", sparse {s:.3}"))
                        .unwrap_or_default()
                );
                println!("    {}", hit.snippet.replace('\n', " "));
            }
        }

        Commands::SmartQuery {
            query,
            project,
            dataset,
            no_global,
            top_k,
            strategies,
            answer_type,
        } => {
            let (project, _) = engine.resolve_scope(project.as_deref(), None)?;
            let mut base = QueryRequest::new(&query, &project);
            base.dataset = dataset;
            base.include_global = !no_global;
            base.top_k = top_k;
            let req = SmartQueryRequest {
                base,
                strategies: strategies
                    .split(',')
                    .filter_map(|s| Strategy::parse(s.trim()))
                    .collect(),
                answer_type,
            };
            let answer = engine.smart_query(&req, Some(progress_printer())).await?;
            if let Some(ref text) = answer.answer {
                println!("{text}\n");
                for citation in &answer.citations {
                    println!("[{}] {}", citation.marker, citation.source);
                }
            } else {
                for (i, hit) in answer.retrievals.iter().enumerate() {
                    println!("{}. {}", i + 1, hit.snippet.replace('\n', " "));
                }
            }
            println!(
                "\nconfidence: {:.2}  latency: {}ms  sub-queries: {}",
                answer.confidence,
                answer.latency_ms,
                answer.sub_queries.len()
            );
        }

        Commands::Stats { project } => {
            let (project, _) = engine.resolve_scope(project.as_deref(), None)?;
            let stats = engine.stats(&project).await?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }

        Commands::Scopes { project } => {
            let (project, _) = engine.resolve_scope(project.as_deref(), None)?;
            for entry in engine.list_scopes(&project).await? {
                println!("{:<8} {}  ({})", entry.via, entry.dataset, entry.collection);
            }
        }

        Commands::History { project, limit } => {
            let (project, _) = engine.resolve_scope(project.as_deref(), None)?;
            for job in engine.history(&project, limit).await? {
                println!(
                    "{}  {:<9} {:<7} {}  {}/{}",
                    job.id,
                    job.status.as_str(),
                    job.kind.as_str(),
                    job.source,
                    job.processed,
                    job.total
                );
            }
        }

        Commands::Status {
            project,
            dataset,
            path,
        } => {
            let report = engine
                .status(project.as_deref(), dataset.as_deref(), path.as_deref())
                .await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }

        Commands::Clear {
            project,
            dataset,
            dry_run,
        } => {
            let (project, _) = engine.resolve_scope(project.as_deref(), None)?;
            let result = engine.clear(&project, dataset.as_deref(), dry_run).await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }

        Commands::Job { action } => match action {
            JobAction::Get { id } => {
                let job = engine.job_get(&id).await?;
                println!("{}", serde_json::to_string_pretty(&job)?);
            }
            JobAction::Cancel { id } => {
                let job = engine.job_cancel(&id).await?;
                println!("job {} is {}", job.id, job.status.as_str());
            }
        },

        Commands::Share { action } => match action {
            ShareAction::Grant {
                dataset,
                to,
                project,
                permission,
            } => {
                let (project, _) = engine.resolve_scope(project.as_deref(), None)?;
                let permission: SharePermission = permission
                    .parse()
                    .map_err(|e: String| anyhow::anyhow!(e))?;
                engine
                    .share_dataset(&project, &dataset, &to, permission)
                    .await?;
                println!("granted {} on {project}/{dataset} to {to}", permission.as_str());
            }
            ShareAction::Revoke {
                dataset,
                to,
                project,
            } => {
                let (project, _) = engine.resolve_scope(project.as_deref(), None)?;
                engine.revoke_share(&project, &dataset, &to).await?;
                println!("revoked {project}/{dataset} from {to}");
            }
        },
    }

    Ok(())
}
