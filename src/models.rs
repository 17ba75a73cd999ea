//! Core data models used throughout the engine.
//!
//! These types represent the projects, datasets, chunks, jobs, and point
//! payloads that flow through the ingestion and retrieval pipeline. Rows are
//! stored by id; related entities reference each other by id, never by
//! back-pointer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Free-form metadata mapping, persisted as a JSON blob at the storage edge.
pub type Metadata = HashMap<String, serde_json::Value>;

/// Top-level knowledge island.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub owner: Option<String>,
    pub is_global: bool,
    #[serde(default)]
    pub metadata: Metadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Named partition within a project; the unit of retrieval scope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dataset {
    pub id: String,
    pub project_id: String,
    pub name: String,
    /// Canonical collection name, pinned at record creation.
    pub collection_name: String,
    pub description: Option<String>,
    pub is_global: bool,
    #[serde(default)]
    pub metadata: Metadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Mapping from a dataset to its physical vector-index collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionBinding {
    pub dataset_id: String,
    pub collection_name: String,
    /// `dense` or `hybrid`.
    pub backend: String,
    pub dimension: usize,
    pub is_hybrid: bool,
    pub point_count: i64,
    pub last_indexed_at: Option<DateTime<Utc>>,
    /// Fingerprint of the last successfully ingested content (Merkle root,
    /// commit sha, or page-set digest). Used for the skip short-circuit.
    pub content_fingerprint: Option<String>,
}

/// Where indexed content came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    Code,
    Web,
    Manual,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Code => "code",
            SourceType::Web => "web",
            SourceType::Manual => "manual",
        }
    }
}

impl std::str::FromStr for SourceType {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "code" => Ok(SourceType::Code),
            "web" => Ok(SourceType::Web),
            "manual" => Ok(SourceType::Manual),
            other => Err(format!("unknown source type: {other}")),
        }
    }
}

/// Payload attached to every point in the vector index.
///
/// `project_id`, `dataset_id`, and `source_type` are required on every point;
/// the rest is provenance that depends on the source kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payload {
    pub project_id: String,
    pub dataset_id: String,
    pub source_type: SourceType,
    pub content_hash: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relative_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_line: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_line: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repo: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commit: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Short excerpt of the chunk content for result display.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snippet: Option<String>,
    #[serde(default, skip_serializing_if = "Metadata::is_empty")]
    pub extra: Metadata,
}

impl Payload {
    pub fn new(project_id: &str, dataset_id: &str, source_type: SourceType, hash: &str) -> Self {
        Self {
            project_id: project_id.to_string(),
            dataset_id: dataset_id.to_string(),
            source_type,
            content_hash: hash.to_string(),
            relative_path: None,
            url: None,
            start_line: None,
            end_line: None,
            language: None,
            repo: None,
            branch: None,
            commit: None,
            title: None,
            snippet: None,
            extra: Metadata::new(),
        }
    }
}

/// An indexed unit of content (shadow row in the metadata store).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    /// Stable function of `(source_key, content_hash, chunk_index)`.
    pub id: String,
    pub dataset_id: String,
    pub collection_name: String,
    pub chunk_index: i64,
    pub content: String,
    pub content_hash: String,
    pub source_type: SourceType,
    pub relative_path: Option<String>,
    pub url: Option<String>,
    pub start_line: Option<u32>,
    pub end_line: Option<u32>,
    pub language: Option<String>,
}

/// A crawled URL with extracted markdown content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebPage {
    pub id: String,
    pub dataset_id: String,
    pub url: String,
    pub title: Option<String>,
    pub domain: Option<String>,
    pub content: String,
    pub status: String,
    #[serde(default)]
    pub metadata: Metadata,
    pub crawled_at: DateTime<Utc>,
}

/// Kind of a long-running ingestion job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    Local,
    Github,
    Crawl,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Local => "local",
            JobKind::Github => "github",
            JobKind::Crawl => "crawl",
        }
    }
}

/// Job lifecycle state. Terminal states are final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    /// Valid transitions: pending → running → {completed, failed, cancelled};
    /// pending may also be cancelled before it starts.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        match (self, next) {
            (JobStatus::Pending, JobStatus::Running) => true,
            (JobStatus::Pending, JobStatus::Cancelled) => true,
            (JobStatus::Running, JobStatus::Completed) => true,
            (JobStatus::Running, JobStatus::Failed) => true,
            (JobStatus::Running, JobStatus::Cancelled) => true,
            _ => false,
        }
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "running" => Ok(JobStatus::Running),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            "cancelled" => Ok(JobStatus::Cancelled),
            other => Err(format!("unknown job status: {other}")),
        }
    }
}

/// Durable record of a long-running ingest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionJob {
    pub id: String,
    pub project_id: String,
    pub dataset_id: String,
    pub kind: JobKind,
    /// Human-readable source descriptor (path, repo URL, or seed URL).
    pub source: String,
    pub status: JobStatus,
    pub summary: Option<String>,
    pub processed: i64,
    pub total: i64,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Active automatic-sync subscription.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatcherInfo {
    pub id: String,
    pub project_id: String,
    pub dataset_id: String,
    pub path: String,
    pub started_at: DateTime<Utc>,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub sync_count: i64,
}

/// Cross-project grant level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SharePermission {
    Read,
    Write,
    Owner,
}

impl SharePermission {
    pub fn as_str(&self) -> &'static str {
        match self {
            SharePermission::Read => "read",
            SharePermission::Write => "write",
            SharePermission::Owner => "owner",
        }
    }
}

impl std::str::FromStr for SharePermission {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "read" => Ok(SharePermission::Read),
            "write" => Ok(SharePermission::Write),
            "owner" => Ok(SharePermission::Owner),
            other => Err(format!("unknown permission: {other}")),
        }
    }
}

/// Explicit cross-project grant of access to a dataset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Share {
    pub dataset_id: String,
    pub owner_project_id: String,
    pub grantee_project_id: String,
    pub permission: SharePermission,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_transitions() {
        use JobStatus::*;
        assert!(Pending.can_transition_to(Running));
        assert!(Pending.can_transition_to(Cancelled));
        assert!(Running.can_transition_to(Completed));
        assert!(Running.can_transition_to(Failed));
        assert!(Running.can_transition_to(Cancelled));
        assert!(!Completed.can_transition_to(Running));
        assert!(!Failed.can_transition_to(Completed));
        assert!(!Cancelled.can_transition_to(Running));
    }

    #[test]
    fn payload_roundtrip() {
        let mut p = Payload::new("proj_1", "ds_1", SourceType::Code, "abc123");
        p.relative_path = Some("src/main.rs".into());
        p.start_line = Some(1);
        p.end_line = Some(40);
        p.language = Some("rust".into());
        let json = serde_json::to_string(&p).unwrap();
        let back: Payload = serde_json::from_str(&json).unwrap();
        assert_eq!(back.dataset_id, "ds_1");
        assert_eq!(back.relative_path.as_deref(), Some("src/main.rs"));
        assert_eq!(back.source_type, SourceType::Code);
        assert!(back.url.is_none());
    }

    #[test]
    fn permission_ordering() {
        assert!(SharePermission::Read < SharePermission::Write);
        assert!(SharePermission::Write < SharePermission::Owner);
    }
}
