//! Progress broadcasting.
//!
//! Every phase boundary in the pipeline emits a step-labelled
//! [`ProgressEvent`]. Delivery is best-effort and fire-and-forget: a sink
//! that cannot deliver logs a warning and swallows the failure — progress
//! reporting is never allowed to fail a job. Events are transient; there is
//! no replay for late subscribers.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::warn;

/// Pipeline phase tags, matching the wire labels the UI keys on.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    Start,
    Architect,
    BuildStart,
    BuildModule,
    CompleteModule,
    Assembly,
    RepoCreate,
    Readme,
    Files,
}

/// Terminal markers. A job emits exactly one terminal event.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TerminalStatus {
    Done,
    Error,
}

/// One progress update. Intermediate events carry a `step`; terminal events
/// carry a `status` instead. Optional fields are omitted from the JSON so
/// the terminal shape stays the bare `{"status": ..., "message": ...}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProgressEvent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<Step>,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<TerminalStatus>,
}

impl ProgressEvent {
    pub fn step(step: Step, message: impl Into<String>) -> Self {
        Self {
            step: Some(step),
            message: message.into(),
            status: None,
        }
    }

    pub fn done(message: impl Into<String>) -> Self {
        Self {
            step: None,
            message: message.into(),
            status: Some(TerminalStatus::Done),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            step: None,
            message: message.into(),
            status: Some(TerminalStatus::Error),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_some()
    }
}

/// Where a job's events should go: the job id plus the indirection address
/// supplied at submission time (absent means "nobody is listening").
#[derive(Debug, Clone)]
pub struct ProgressTarget {
    pub job_id: String,
    pub callback_url: Option<String>,
}

impl ProgressTarget {
    pub fn new(job_id: impl Into<String>, callback_url: Option<String>) -> Self {
        Self {
            job_id: job_id.into(),
            callback_url,
        }
    }
}

/// Observer seam for pipeline progress. Implementations must never surface
/// delivery failures to the caller.
#[async_trait]
pub trait ProgressSink: Send + Sync {
    async fn emit(&self, target: &ProgressTarget, event: ProgressEvent);
}

/// POSTs each event as JSON to the job's callback URL.
pub struct WebhookSink {
    http: reqwest::Client,
}

impl WebhookSink {
    pub fn new(timeout: Duration) -> Self {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self { http }
    }
}

#[async_trait]
impl ProgressSink for WebhookSink {
    async fn emit(&self, target: &ProgressTarget, event: ProgressEvent) {
        let Some(url) = target.callback_url.as_deref() else {
            return;
        };
        let mut payload = match serde_json::to_value(&event) {
            Ok(serde_json::Value::Object(map)) => map,
            Ok(_) | Err(_) => {
                warn!("[progress] job={}: failed to serialize event", target.job_id);
                return;
            }
        };
        payload.insert(
            "job_id".to_string(),
            serde_json::Value::String(target.job_id.clone()),
        );

        if let Err(e) = self.http.post(url).json(&payload).send().await {
            warn!(
                "[progress] job={}: failed to deliver progress update: {}",
                target.job_id, e
            );
        }
    }
}

/// An event paired with the job it belongs to, for in-process subscribers.
#[derive(Debug, Clone)]
pub struct ProgressUpdate {
    pub job_id: String,
    pub event: ProgressEvent,
}

/// Broadcasts events on a tokio channel. Used by embedders and tests; like
/// the webhook sink, a send with no receivers is silently dropped.
pub struct ChannelSink {
    tx: broadcast::Sender<ProgressUpdate>,
}

impl ChannelSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProgressUpdate> {
        self.tx.subscribe()
    }
}

#[async_trait]
impl ProgressSink for ChannelSink {
    async fn emit(&self, target: &ProgressTarget, event: ProgressEvent) {
        let _ = self.tx.send(ProgressUpdate {
            job_id: target.job_id.clone(),
            event,
        });
    }
}

/// Discards everything. For callers that submitted no address at all.
pub struct NullSink;

#[async_trait]
impl ProgressSink for NullSink {
    async fn emit(&self, _target: &ProgressTarget, _event: ProgressEvent) {}
}
