use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Lifecycle state of a generation job. Forward-only: once a job reaches
/// `Completed` or `Failed` it never moves again.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    InProgress,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(Self::Queued),
            "in_progress" => Ok(Self::InProgress),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Invalid job status: {}", s)),
        }
    }
}

/// Validate that a job status transition is allowed.
pub fn is_valid_transition(from: &JobStatus, to: &JobStatus) -> bool {
    matches!(
        (from, to),
        (JobStatus::Queued, JobStatus::InProgress)
            | (JobStatus::Queued, JobStatus::Failed)
            | (JobStatus::InProgress, JobStatus::Completed)
            | (JobStatus::InProgress, JobStatus::Failed)
    )
}

/// One generation job: created by the submission boundary, mutated only by
/// the orchestrator, retained after terminal states for audit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub user_id: i64,
    pub project_id: i64,
    pub status: JobStatus,
    pub plan_json: Option<String>,
    pub error_message: Option<String>,
    /// Progress sink address supplied at submission time, if any.
    pub callback_url: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// The project description a job was submitted for.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectBrief {
    pub id: i64,
    pub title: String,
    pub description: String,
    pub tech_used: String,
    pub pack_type: String,
}

/// Owning user of a job. The token is the publish credential.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserAccount {
    pub id: i64,
    pub github_login: Option<String>,
    pub github_token: String,
}

/// One planned file. `purpose` and `dependencies` are opaque hints forwarded
/// to the generator; either (or both) may be absent depending on which
/// planner shape produced the plan, and downstream code must not assume one.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FileTask {
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub purpose: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dependencies: Option<Vec<String>>,
}

impl FileTask {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            purpose: None,
            dependencies: None,
        }
    }
}

/// Validated output of the planner. Immutable once accepted; `api_contract`
/// and `database_schema` are passed through to generation uninterpreted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub file_structure: Vec<FileTask>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_contract: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_schema: Option<serde_json::Value>,
}

/// One generated file, persisted to the ledger and later published.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GeneratedFile {
    pub path: String,
    pub content: String,
}

/// Coarse build buckets, in fixed build order. Later buckets may assume the
/// conventions of earlier ones, so the order is the only dependency ordering
/// the pipeline enforces.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum ModuleKind {
    Setup,
    Backend,
    Services,
    Ui,
}

impl ModuleKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Setup => "setup",
            Self::Backend => "backend",
            Self::Services => "services",
            Self::Ui => "ui",
        }
    }

    /// Human-readable name used in progress messages.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Setup => "Config & Setup",
            Self::Backend => "Backend Core",
            Self::Services => "Service Layer",
            Self::Ui => "User Interface",
        }
    }
}

/// A transient, ordered bucket of file tasks scoped to one generation call.
#[derive(Debug, Clone)]
pub struct BuildModule {
    pub kind: ModuleKind,
    pub tasks: Vec<FileTask>,
}

/// The repository created by a successful publish.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteRepo {
    pub owner: String,
    pub name: String,
    pub html_url: String,
    pub default_branch: String,
}
