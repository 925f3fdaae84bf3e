//! Durable job and artifact ledger.
//!
//! SQLite-backed store for jobs, project briefs, user credentials, and
//! generated files. The pipeline publishes from what this ledger holds, not
//! from in-memory accumulation, so a job's result set is always the durable
//! one. Each job is processed by exactly one orchestrator run and all rows
//! are keyed by job id, so no locking beyond the connection mutex is needed.

use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params};
use uuid::Uuid;

use crate::models::{GeneratedFile, Job, JobStatus, ProjectBrief, UserAccount, is_valid_transition};

/// Async-safe handle to the ledger.
///
/// Wraps [`Ledger`] behind `Arc<Mutex>` and runs all access on tokio's
/// blocking thread pool via `spawn_blocking`, keeping synchronous SQLite
/// I/O off the async worker threads.
#[derive(Clone)]
pub struct LedgerHandle {
    inner: Arc<std::sync::Mutex<Ledger>>,
}

impl LedgerHandle {
    pub fn new(ledger: Ledger) -> Self {
        Self {
            inner: Arc::new(std::sync::Mutex::new(ledger)),
        }
    }

    /// Run a closure with ledger access on a blocking thread. All data
    /// passed into `f` must be owned (`'static`).
    pub async fn call<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&Ledger) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let ledger = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let guard = ledger
                .lock()
                .map_err(|e| anyhow::anyhow!("Ledger lock poisoned: {}", e))?;
            f(&guard)
        })
        .await
        .context("Ledger task panicked")?
    }

    /// Acquire the ledger mutex synchronously. For startup initialization
    /// and tests; not for hot async paths.
    pub fn lock_sync(&self) -> Result<std::sync::MutexGuard<'_, Ledger>> {
        self.inner
            .lock()
            .map_err(|e| anyhow::anyhow!("Ledger lock poisoned: {}", e))
    }
}

pub struct Ledger {
    conn: Connection,
}

impl Ledger {
    /// Open (or create) the ledger database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).context("Failed to open SQLite database")?;
        let ledger = Self { conn };
        ledger.init()?;
        Ok(ledger)
    }

    /// Create an in-memory ledger (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().context("Failed to open in-memory SQLite database")?;
        let ledger = Self { conn };
        ledger.init()?;
        Ok(ledger)
    }

    fn init(&self) -> Result<()> {
        self.conn
            .execute_batch("PRAGMA foreign_keys = ON;")
            .context("Failed to enable foreign keys")?;
        self.conn
            .execute_batch(
                "
                CREATE TABLE IF NOT EXISTS users (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    github_login TEXT,
                    github_token TEXT NOT NULL,
                    created_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE TABLE IF NOT EXISTS projects (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    title TEXT NOT NULL,
                    description TEXT NOT NULL DEFAULT '',
                    tech_used TEXT NOT NULL DEFAULT '',
                    pack_type TEXT NOT NULL DEFAULT '',
                    created_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE TABLE IF NOT EXISTS jobs (
                    id TEXT PRIMARY KEY,
                    user_id INTEGER NOT NULL REFERENCES users(id),
                    project_id INTEGER NOT NULL REFERENCES projects(id),
                    status TEXT NOT NULL DEFAULT 'queued',
                    plan_json TEXT,
                    error_message TEXT,
                    callback_url TEXT,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS generated_files (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    job_id TEXT NOT NULL REFERENCES jobs(id) ON DELETE CASCADE,
                    path TEXT NOT NULL,
                    content TEXT NOT NULL,
                    created_at TEXT NOT NULL DEFAULT (datetime('now')),
                    UNIQUE(job_id, path)
                );

                CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs(status);
                CREATE INDEX IF NOT EXISTS idx_generated_files_job ON generated_files(job_id);
                ",
            )
            .context("Failed to create tables")?;
        Ok(())
    }

    // ── users & projects ─────────────────────────────────────────────

    pub fn create_user(&self, github_login: Option<&str>, github_token: &str) -> Result<UserAccount> {
        self.conn
            .execute(
                "INSERT INTO users (github_login, github_token) VALUES (?1, ?2)",
                params![github_login, github_token],
            )
            .context("Failed to insert user")?;
        let id = self.conn.last_insert_rowid();
        Ok(UserAccount {
            id,
            github_login: github_login.map(str::to_string),
            github_token: github_token.to_string(),
        })
    }

    pub fn get_user(&self, id: i64) -> Result<Option<UserAccount>> {
        self.conn
            .query_row(
                "SELECT id, github_login, github_token FROM users WHERE id = ?1",
                params![id],
                |row| {
                    Ok(UserAccount {
                        id: row.get(0)?,
                        github_login: row.get(1)?,
                        github_token: row.get(2)?,
                    })
                },
            )
            .optional()
            .context("Failed to query user")
    }

    pub fn create_project(
        &self,
        title: &str,
        description: &str,
        tech_used: &str,
        pack_type: &str,
    ) -> Result<ProjectBrief> {
        self.conn
            .execute(
                "INSERT INTO projects (title, description, tech_used, pack_type)
                 VALUES (?1, ?2, ?3, ?4)",
                params![title, description, tech_used, pack_type],
            )
            .context("Failed to insert project")?;
        Ok(ProjectBrief {
            id: self.conn.last_insert_rowid(),
            title: title.to_string(),
            description: description.to_string(),
            tech_used: tech_used.to_string(),
            pack_type: pack_type.to_string(),
        })
    }

    pub fn get_project(&self, id: i64) -> Result<Option<ProjectBrief>> {
        self.conn
            .query_row(
                "SELECT id, title, description, tech_used, pack_type FROM projects WHERE id = ?1",
                params![id],
                |row| {
                    Ok(ProjectBrief {
                        id: row.get(0)?,
                        title: row.get(1)?,
                        description: row.get(2)?,
                        tech_used: row.get(3)?,
                        pack_type: row.get(4)?,
                    })
                },
            )
            .optional()
            .context("Failed to query project")
    }

    // ── jobs ─────────────────────────────────────────────────────────

    /// Create a queued job. A caller-supplied id is honored; otherwise a
    /// fresh UUID is assigned.
    pub fn create_job(
        &self,
        id: Option<&str>,
        user_id: i64,
        project_id: i64,
        callback_url: Option<&str>,
    ) -> Result<Job> {
        let id = id
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "INSERT INTO jobs (id, user_id, project_id, status, callback_url, created_at, updated_at)
                 VALUES (?1, ?2, ?3, 'queued', ?4, ?5, ?5)",
                params![id, user_id, project_id, callback_url, now],
            )
            .context("Failed to insert job")?;
        self.get_job(&id)?
            .context("Job vanished immediately after insert")
    }

    pub fn get_job(&self, id: &str) -> Result<Option<Job>> {
        self.conn
            .query_row(
                "SELECT id, user_id, project_id, status, plan_json, error_message, callback_url,
                        created_at, updated_at
                 FROM jobs WHERE id = ?1",
                params![id],
                |row| {
                    let status_str: String = row.get(3)?;
                    Ok((
                        Job {
                            id: row.get(0)?,
                            user_id: row.get(1)?,
                            project_id: row.get(2)?,
                            status: JobStatus::Queued, // replaced below
                            plan_json: row.get(4)?,
                            error_message: row.get(5)?,
                            callback_url: row.get(6)?,
                            created_at: row.get(7)?,
                            updated_at: row.get(8)?,
                        },
                        status_str,
                    ))
                },
            )
            .optional()
            .context("Failed to query job")?
            .map(|(mut job, status_str)| {
                job.status = JobStatus::from_str(&status_str)
                    .map_err(|e| anyhow::anyhow!("Corrupt job row: {}", e))?;
                Ok(job)
            })
            .transpose()
    }

    /// Move a job to a new status, enforcing the forward-only transition
    /// table. Returns the updated job.
    pub fn set_status(&self, id: &str, to: JobStatus) -> Result<Job> {
        let job = self
            .get_job(id)?
            .with_context(|| format!("Job {} not found", id))?;
        if !is_valid_transition(&job.status, &to) {
            anyhow::bail!(
                "Invalid status transition {} -> {} for job {}",
                job.status.as_str(),
                to.as_str(),
                id
            );
        }
        self.conn
            .execute(
                "UPDATE jobs SET status = ?1, updated_at = ?2 WHERE id = ?3",
                params![to.as_str(), Utc::now().to_rfc3339(), id],
            )
            .context("Failed to update job status")?;
        self.get_job(id)?
            .with_context(|| format!("Job {} vanished during status update", id))
    }

    pub fn set_plan(&self, id: &str, plan_json: &str) -> Result<()> {
        self.conn
            .execute(
                "UPDATE jobs SET plan_json = ?1, updated_at = ?2 WHERE id = ?3",
                params![plan_json, Utc::now().to_rfc3339(), id],
            )
            .context("Failed to store plan")?;
        Ok(())
    }

    pub fn set_error(&self, id: &str, message: &str) -> Result<()> {
        self.conn
            .execute(
                "UPDATE jobs SET error_message = ?1, updated_at = ?2 WHERE id = ?3",
                params![message, Utc::now().to_rfc3339(), id],
            )
            .context("Failed to store error message")?;
        Ok(())
    }

    // ── generated files ──────────────────────────────────────────────

    /// Persist generated files for a job in one transaction. A job is
    /// processed at most once, so overwrite semantics are a convenience,
    /// not a requirement.
    pub fn save_files(&self, job_id: &str, files: &[GeneratedFile]) -> Result<()> {
        self.conn
            .execute_batch("BEGIN")
            .context("Failed to begin transaction")?;
        let result = (|| -> Result<()> {
            let mut stmt = self.conn.prepare(
                "INSERT OR REPLACE INTO generated_files (job_id, path, content) VALUES (?1, ?2, ?3)",
            )?;
            for file in files {
                stmt.execute(params![job_id, file.path, file.content])?;
            }
            Ok(())
        })();
        match result {
            Ok(()) => self
                .conn
                .execute_batch("COMMIT")
                .context("Failed to commit generated files"),
            Err(e) => {
                let _ = self.conn.execute_batch("ROLLBACK");
                Err(e.context("Failed to persist generated files"))
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn conn_for_tests(&self) -> &Connection {
        &self.conn
    }

    /// Everything recorded for a job, ordered by path. The publisher works
    /// from this, never from in-memory accumulation.
    pub fn load_files(&self, job_id: &str) -> Result<Vec<GeneratedFile>> {
        let mut stmt = self
            .conn
            .prepare("SELECT path, content FROM generated_files WHERE job_id = ?1 ORDER BY path")
            .context("Failed to prepare file query")?;
        let rows = stmt
            .query_map(params![job_id], |row| {
                Ok(GeneratedFile {
                    path: row.get(0)?,
                    content: row.get(1)?,
                })
            })
            .context("Failed to query generated files")?;
        let mut files = Vec::new();
        for row in rows {
            files.push(row.context("Failed to read generated file row")?);
        }
        Ok(files)
    }
}
