//! Tracker-side result types shared by the resolver, orchestrator and server.

use serde::{Deserialize, Serialize};

use super::event::SyncAction;
use super::ids::{AttachmentId, RemoteTaskId};

/// The mirrored task for one GitHub entity.
///
/// This is a lookup result, not an owned resource: the coordinator caches the
/// id as a hint and the resolver can re-derive the handle at any time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteTaskHandle {
    pub remote_id: RemoteTaskId,
    pub permalink: String,
}

/// An image uploaded to a task, keyed by its content hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentRecord {
    pub content_hash: u32,
    pub remote_attachment_id: AttachmentId,
}

/// Outcome of one orchestrator run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncOutcome {
    pub handle: RemoteTaskHandle,
    pub action: SyncAction,
    /// Whether the resolver had to create the task during this run.
    pub created: bool,
    /// The completion flag written in step 3, or `None` for comment events.
    pub completed: Option<bool>,
    /// Whether the description had to fall back to plain text.
    pub plain_text_fallback: bool,
}

/// Whether the ingestion layer acted on a delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Processed,
    Ignored,
}

/// The `result` field of a response: a permalink for comment events, the
/// completion outcome for lifecycle events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SyncResult {
    Permalink { url: String },
    Completion { completed: bool },
}

/// Response handed back to the ingestion layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncResponse {
    pub status: SyncStatus,
    pub action: Option<String>,
    pub result: Option<SyncResult>,
    pub remote_task_id: Option<RemoteTaskId>,
    pub permalink: Option<String>,
}

impl SyncResponse {
    /// A delivery the ingestion layer chose not to act on.
    pub fn ignored(reason: impl Into<String>) -> Self {
        SyncResponse {
            status: SyncStatus::Ignored,
            action: Some(reason.into()),
            result: None,
            remote_task_id: None,
            permalink: None,
        }
    }
}

impl From<SyncOutcome> for SyncResponse {
    fn from(outcome: SyncOutcome) -> Self {
        let result = match outcome.completed {
            Some(completed) => SyncResult::Completion { completed },
            None => SyncResult::Permalink {
                url: outcome.handle.permalink.clone(),
            },
        };
        SyncResponse {
            status: SyncStatus::Processed,
            action: Some(outcome.action.as_str().to_string()),
            result: Some(result),
            remote_task_id: Some(outcome.handle.remote_id),
            permalink: Some(outcome.handle.permalink),
        }
    }
}
