//! Repository publishing.
//!
//! Turns a job's persisted files into a real repository on the host in a
//! single atomic commit: create the repository, wait for its initial commit
//! to land, replace the auto-initialized README through the contents API
//! when the plan produced one, then upload blobs for the remaining files,
//! build a tree on top of the branch tip's tree, commit with that tip as
//! sole parent, and fast-forward the branch ref. If the ref update is
//! rejected the branch is left untouched — there is no partial publish
//! state.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use crate::errors::PublishError;
use crate::models::{GeneratedFile, ProjectBrief, RemoteRepo};
use crate::progress::{ProgressEvent, ProgressSink, ProgressTarget, Step};

/// Derive a host-safe repository name from a project title.
///
/// Lowercases, turns whitespace runs into single dashes, drops everything
/// outside `[a-z0-9-]`, collapses dash runs, and trims leading/trailing
/// dashes. Deterministic, so retrying a job derives the same name.
pub fn derive_repo_name(title: &str) -> String {
    let mut name = String::with_capacity(title.len());
    let mut last_dash = true; // suppress a leading dash
    for c in title.chars() {
        let c = c.to_ascii_lowercase();
        if c.is_whitespace() || c == '-' {
            if !last_dash {
                name.push('-');
                last_dash = true;
            }
        } else if c.is_ascii_alphanumeric() {
            name.push(c);
            last_dash = false;
        }
    }
    let name = name.trim_matches('-').to_string();
    let name = if name.len() > 100 {
        name[..100].trim_end_matches('-').to_string()
    } else {
        name
    };
    if name.is_empty() {
        "generated-project".to_string()
    } else {
        name
    }
}

/// One entry of a tree to be written. Always a regular file blob.
#[derive(Debug, Clone)]
pub struct TreeFileEntry {
    pub path: String,
    pub blob_sha: String,
}

/// Low-level operations against the repository host, one method per API
/// call. [`publish`] drives these; tests substitute an in-memory host.
#[async_trait]
pub trait GitHost: Send + Sync {
    /// Create a repository initialized with a first commit, owned by the
    /// authenticated user.
    async fn create_repo(
        &self,
        name: &str,
        description: &str,
        private: bool,
    ) -> Result<RemoteRepo, PublishError>;

    /// Resolve a ref (e.g. `heads/main`) to the commit sha it points at.
    async fn get_ref(
        &self,
        owner: &str,
        repo: &str,
        reference: &str,
    ) -> Result<String, PublishError>;

    /// The tree sha a commit points at.
    async fn get_commit_tree(
        &self,
        owner: &str,
        repo: &str,
        commit_sha: &str,
    ) -> Result<String, PublishError>;

    /// Current blob sha of a file through the contents API, `None` when the
    /// file does not exist on the default branch.
    async fn get_file_sha(
        &self,
        owner: &str,
        repo: &str,
        path: &str,
    ) -> Result<Option<String>, PublishError>;

    /// Create or replace a single file through the contents API. `sha` is
    /// the required precondition when replacing an existing file.
    async fn put_file(
        &self,
        owner: &str,
        repo: &str,
        path: &str,
        content: &str,
        message: &str,
        sha: Option<&str>,
    ) -> Result<(), PublishError>;

    async fn create_blob(
        &self,
        owner: &str,
        repo: &str,
        content: &str,
    ) -> Result<String, PublishError>;

    async fn create_tree(
        &self,
        owner: &str,
        repo: &str,
        base_tree: &str,
        entries: &[TreeFileEntry],
    ) -> Result<String, PublishError>;

    async fn create_commit(
        &self,
        owner: &str,
        repo: &str,
        message: &str,
        tree_sha: &str,
        parent_sha: &str,
    ) -> Result<String, PublishError>;

    /// Fast-forward a ref to `sha`. `expected` is the commit the caller
    /// believes the ref currently points at; implementations reject the
    /// update with [`PublishError::Conflict`] when the branch has moved.
    async fn update_ref(
        &self,
        owner: &str,
        repo: &str,
        reference: &str,
        sha: &str,
        expected: &str,
    ) -> Result<(), PublishError>;
}

/// Binds a per-job credential to a concrete [`GitHost`]. Tokens live on
/// user rows, so the host client cannot be constructed up front.
pub trait GitHostFactory: Send + Sync {
    fn with_credential(&self, token: &str) -> Arc<dyn GitHost>;
}

/// Knobs for the publish flow, from configuration.
#[derive(Debug, Clone)]
pub struct PublishConfig {
    /// Attempts to read the branch ref after repository creation before
    /// giving up. The initial commit lands asynchronously on the host side.
    pub ref_read_attempts: u32,
    /// Initial backoff between ref read attempts; doubles per attempt.
    pub ref_read_backoff: Duration,
    pub private_repos: bool,
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            ref_read_attempts: 5,
            ref_read_backoff: Duration::from_millis(500),
            private_repos: true,
        }
    }
}

/// Publish a job's generated files as one commit on a fresh repository.
pub async fn publish(
    host: &dyn GitHost,
    brief: &ProjectBrief,
    files: &[GeneratedFile],
    config: &PublishConfig,
    sink: &dyn ProgressSink,
    target: &ProgressTarget,
) -> Result<RemoteRepo, PublishError> {
    let name = derive_repo_name(&brief.title);

    sink.emit(
        target,
        ProgressEvent::step(Step::RepoCreate, format!("Creating repository: {}...", name)),
    )
    .await;
    let repo = host
        .create_repo(&name, &brief.description, config.private_repos)
        .await?;
    info!(
        "[publisher] job={}: created repository {}/{}",
        target.job_id, repo.owner, repo.name
    );

    let reference = format!("heads/{}", repo.default_branch);
    wait_for_ref(host, &repo, &reference, config).await?;

    // The auto-init README is replaced in place through the contents API
    // when the plan produced one; it never rides along in the tree push.
    let readme = files
        .iter()
        .find(|f| f.path.eq_ignore_ascii_case("README.md"));
    let rest: Vec<&GeneratedFile> = files
        .iter()
        .filter(|f| !f.path.eq_ignore_ascii_case("README.md"))
        .collect();

    if let Some(readme) = readme {
        sink.emit(
            target,
            ProgressEvent::step(Step::Readme, "Updating README.md...".to_string()),
        )
        .await;
        let existing = host
            .get_file_sha(&repo.owner, &repo.name, "README.md")
            .await?;
        host.put_file(
            &repo.owner,
            &repo.name,
            "README.md",
            &readme.content,
            "Update README.md with project details",
            existing.as_deref(),
        )
        .await?;
    }

    if !rest.is_empty() {
        sink.emit(
            target,
            ProgressEvent::step(
                Step::Files,
                format!("Uploading {} project files...", rest.len()),
            ),
        )
        .await;

        // Whatever the branch points at now (the README commit, or the
        // initial commit) parents the final commit; its tree is the base.
        let parent = host.get_ref(&repo.owner, &repo.name, &reference).await?;
        let base_tree = host
            .get_commit_tree(&repo.owner, &repo.name, &parent)
            .await?;

        let mut entries = Vec::with_capacity(rest.len());
        for file in &rest {
            let blob_sha = host
                .create_blob(&repo.owner, &repo.name, &file.content)
                .await?;
            entries.push(TreeFileEntry {
                path: file.path.clone(),
                blob_sha,
            });
        }

        let tree_sha = host
            .create_tree(&repo.owner, &repo.name, &base_tree, &entries)
            .await?;
        let commit_sha = host
            .create_commit(
                &repo.owner,
                &repo.name,
                "Initial commit of project files",
                &tree_sha,
                &parent,
            )
            .await?;
        host.update_ref(&repo.owner, &repo.name, &reference, &commit_sha, &parent)
            .await?;

        info!(
            "[publisher] job={}: pushed {} files to {} ({})",
            target.job_id,
            rest.len(),
            repo.html_url,
            &commit_sha[..commit_sha.len().min(7)]
        );
    }
    Ok(repo)
}

/// Poll the branch ref until the host's initial commit is visible. Backoff
/// doubles per attempt; the final failure is returned as-is.
async fn wait_for_ref(
    host: &dyn GitHost,
    repo: &RemoteRepo,
    reference: &str,
    config: &PublishConfig,
) -> Result<String, PublishError> {
    let attempts = config.ref_read_attempts.max(1);
    let mut backoff = config.ref_read_backoff;
    for attempt in 1..=attempts {
        match host.get_ref(&repo.owner, &repo.name, reference).await {
            Ok(sha) => return Ok(sha),
            Err(e) if attempt == attempts => return Err(e),
            Err(e) => {
                warn!(
                    "[publisher] ref '{}' not readable yet (attempt {}/{}): {}",
                    reference, attempt, attempts, e
                );
                tokio::time::sleep(backoff).await;
                backoff *= 2;
            }
        }
    }
    unreachable!("loop returns on the final attempt")
}

// ── GitHub implementation ───────────────────────────────────────────

const DEFAULT_API_BASE: &str = "https://api.github.com";
const USER_AGENT: &str = "packsmith";

#[derive(Debug, Deserialize)]
struct RepoResponse {
    name: String,
    html_url: String,
    default_branch: String,
    owner: OwnerResponse,
}

#[derive(Debug, Deserialize)]
struct OwnerResponse {
    login: String,
}

#[derive(Debug, Deserialize)]
struct ShaResponse {
    sha: String,
}

#[derive(Debug, Deserialize)]
struct RefResponse {
    object: ShaResponse,
}

#[derive(Debug, Deserialize)]
struct CommitResponse {
    tree: ShaResponse,
}

/// GitHub REST v3 client bound to one credential.
pub struct GitHubClient {
    http: reqwest::Client,
    api_base: String,
    token: String,
}

impl GitHubClient {
    pub fn new(api_base: impl Into<String>, token: impl Into<String>, timeout: Duration) -> Self {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self {
            http,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            token: token.into(),
        }
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.http
            .request(method, format!("{}{}", self.api_base, path))
            .header("Authorization", format!("Bearer {}", self.token))
            .header("User-Agent", USER_AGENT)
            .header("Accept", "application/vnd.github+json")
    }

    /// Map a non-success response to the typed error surface. 401/403 is a
    /// credential problem; everything else is a remote failure.
    async fn check(
        resp: reqwest::Response,
        what: &'static str,
    ) -> Result<reqwest::Response, PublishError> {
        let status = resp.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(PublishError::Unauthorized);
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(PublishError::Remote(anyhow::anyhow!(
                "{} returned {}: {}",
                what,
                status,
                body
            )));
        }
        Ok(resp)
    }
}

#[async_trait]
impl GitHost for GitHubClient {
    async fn create_repo(
        &self,
        name: &str,
        description: &str,
        private: bool,
    ) -> Result<RemoteRepo, PublishError> {
        let resp = self
            .request(reqwest::Method::POST, "/user/repos")
            .json(&json!({
                "name": name,
                "description": description,
                "private": private,
                "auto_init": true,
            }))
            .send()
            .await
            .context("Failed to send create-repo request")
            .map_err(PublishError::Remote)?;
        let repo: RepoResponse = Self::check(resp, "create-repo")
            .await?
            .json()
            .await
            .context("Failed to parse create-repo response")
            .map_err(PublishError::Remote)?;
        Ok(RemoteRepo {
            owner: repo.owner.login,
            name: repo.name,
            html_url: repo.html_url,
            default_branch: repo.default_branch,
        })
    }

    async fn get_ref(
        &self,
        owner: &str,
        repo: &str,
        reference: &str,
    ) -> Result<String, PublishError> {
        let path = format!("/repos/{}/{}/git/ref/{}", owner, repo, reference);
        let resp = self
            .request(reqwest::Method::GET, &path)
            .send()
            .await
            .context("Failed to send get-ref request")
            .map_err(PublishError::Remote)?;
        let r: RefResponse = Self::check(resp, "get-ref")
            .await?
            .json()
            .await
            .context("Failed to parse get-ref response")
            .map_err(PublishError::Remote)?;
        Ok(r.object.sha)
    }

    async fn get_commit_tree(
        &self,
        owner: &str,
        repo: &str,
        commit_sha: &str,
    ) -> Result<String, PublishError> {
        let path = format!("/repos/{}/{}/git/commits/{}", owner, repo, commit_sha);
        let resp = self
            .request(reqwest::Method::GET, &path)
            .send()
            .await
            .context("Failed to send get-commit request")
            .map_err(PublishError::Remote)?;
        let c: CommitResponse = Self::check(resp, "get-commit")
            .await?
            .json()
            .await
            .context("Failed to parse get-commit response")
            .map_err(PublishError::Remote)?;
        Ok(c.tree.sha)
    }

    async fn get_file_sha(
        &self,
        owner: &str,
        repo: &str,
        path: &str,
    ) -> Result<Option<String>, PublishError> {
        let url = format!("/repos/{}/{}/contents/{}", owner, repo, path);
        let resp = self
            .request(reqwest::Method::GET, &url)
            .send()
            .await
            .context("Failed to send get-contents request")
            .map_err(PublishError::Remote)?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let s: ShaResponse = Self::check(resp, "get-contents")
            .await?
            .json()
            .await
            .context("Failed to parse get-contents response")
            .map_err(PublishError::Remote)?;
        Ok(Some(s.sha))
    }

    async fn put_file(
        &self,
        owner: &str,
        repo: &str,
        path: &str,
        content: &str,
        message: &str,
        sha: Option<&str>,
    ) -> Result<(), PublishError> {
        use base64::Engine;
        let url = format!("/repos/{}/{}/contents/{}", owner, repo, path);
        let mut body = json!({
            "message": message,
            "content": base64::engine::general_purpose::STANDARD.encode(content),
        });
        if let Some(sha) = sha {
            body["sha"] = json!(sha);
        }
        let resp = self
            .request(reqwest::Method::PUT, &url)
            .json(&body)
            .send()
            .await
            .context("Failed to send put-contents request")
            .map_err(PublishError::Remote)?;
        Self::check(resp, "put-contents").await?;
        Ok(())
    }

    async fn create_blob(
        &self,
        owner: &str,
        repo: &str,
        content: &str,
    ) -> Result<String, PublishError> {
        let path = format!("/repos/{}/{}/git/blobs", owner, repo);
        let resp = self
            .request(reqwest::Method::POST, &path)
            .json(&json!({"content": content, "encoding": "utf-8"}))
            .send()
            .await
            .context("Failed to send create-blob request")
            .map_err(PublishError::Remote)?;
        let s: ShaResponse = Self::check(resp, "create-blob")
            .await?
            .json()
            .await
            .context("Failed to parse create-blob response")
            .map_err(PublishError::Remote)?;
        Ok(s.sha)
    }

    async fn create_tree(
        &self,
        owner: &str,
        repo: &str,
        base_tree: &str,
        entries: &[TreeFileEntry],
    ) -> Result<String, PublishError> {
        let path = format!("/repos/{}/{}/git/trees", owner, repo);
        let tree: Vec<serde_json::Value> = entries
            .iter()
            .map(|e| {
                json!({
                    "path": e.path,
                    "mode": "100644",
                    "type": "blob",
                    "sha": e.blob_sha,
                })
            })
            .collect();
        let resp = self
            .request(reqwest::Method::POST, &path)
            .json(&json!({"base_tree": base_tree, "tree": tree}))
            .send()
            .await
            .context("Failed to send create-tree request")
            .map_err(PublishError::Remote)?;
        let s: ShaResponse = Self::check(resp, "create-tree")
            .await?
            .json()
            .await
            .context("Failed to parse create-tree response")
            .map_err(PublishError::Remote)?;
        Ok(s.sha)
    }

    async fn create_commit(
        &self,
        owner: &str,
        repo: &str,
        message: &str,
        tree_sha: &str,
        parent_sha: &str,
    ) -> Result<String, PublishError> {
        let path = format!("/repos/{}/{}/git/commits", owner, repo);
        let resp = self
            .request(reqwest::Method::POST, &path)
            .json(&json!({
                "message": message,
                "tree": tree_sha,
                "parents": [parent_sha],
            }))
            .send()
            .await
            .context("Failed to send create-commit request")
            .map_err(PublishError::Remote)?;
        let s: ShaResponse = Self::check(resp, "create-commit")
            .await?
            .json()
            .await
            .context("Failed to parse create-commit response")
            .map_err(PublishError::Remote)?;
        Ok(s.sha)
    }

    async fn update_ref(
        &self,
        owner: &str,
        repo: &str,
        reference: &str,
        sha: &str,
        expected: &str,
    ) -> Result<(), PublishError> {
        let path = format!("/repos/{}/{}/git/refs/{}", owner, repo, reference);
        let resp = self
            .request(reqwest::Method::PATCH, &path)
            // force=false makes the update fast-forward-only; the host
            // rejects it when the branch moved past `expected`.
            .json(&json!({"sha": sha, "force": false}))
            .send()
            .await
            .context("Failed to send update-ref request")
            .map_err(PublishError::Remote)?;
        let status = resp.status();
        if status == reqwest::StatusCode::CONFLICT
            || status == reqwest::StatusCode::UNPROCESSABLE_ENTITY
        {
            return Err(PublishError::Conflict {
                reference: reference.to_string(),
                expected: expected.to_string(),
            });
        }
        Self::check(resp, "update-ref").await?;
        Ok(())
    }
}

/// Builds [`GitHubClient`]s bound to per-user tokens.
pub struct GitHubFactory {
    api_base: String,
    timeout: Duration,
}

impl GitHubFactory {
    pub fn new(api_base: Option<String>, timeout: Duration) -> Self {
        Self {
            api_base: api_base.unwrap_or_else(|| DEFAULT_API_BASE.to_string()),
            timeout,
        }
    }
}

impl GitHostFactory for GitHubFactory {
    fn with_credential(&self, token: &str) -> Arc<dyn GitHost> {
        Arc::new(GitHubClient::new(self.api_base.clone(), token, self.timeout))
    }
}
