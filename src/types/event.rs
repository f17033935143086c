//! The canonical inbound event.
//!
//! A `SyncEvent` is built once per webhook delivery by the ingestion layer
//! (`github::payload` plus `github::history`) and never mutated afterwards.
//! Everything downstream re-renders the full current state from it, which is
//! why out-of-order deliveries still converge.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{CanonicalUrl, RepoId};

/// Whether the mirrored entity is an issue or a pull request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Issue,
    PullRequest,
}

impl EntityKind {
    /// The value written to the tracker's entity-type field.
    pub fn label(&self) -> &'static str {
        match self {
            EntityKind::Issue => "Issue",
            EntityKind::PullRequest => "Pull Request",
        }
    }
}

/// The lifecycle action that triggered the delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncAction {
    Opened,
    Edited,
    Closed,
    Reopened,
    CommentCreated,
}

impl SyncAction {
    /// Returns the label reported back to the ingestion layer.
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncAction::Opened => "opened",
            SyncAction::Edited => "edited",
            SyncAction::Closed => "closed",
            SyncAction::Reopened => "reopened",
            SyncAction::CommentCreated => "comment_created",
        }
    }

    /// Comment events never alter the task's completion flag.
    pub fn is_comment(&self) -> bool {
        matches!(self, SyncAction::CommentCreated)
    }
}

impl fmt::Display for SyncAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Open/closed state of the GitHub entity at delivery time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityState {
    Open,
    Closed,
}

/// A single conversation comment, rendered after the body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    pub author: String,
    pub created_at: DateTime<Utc>,
    pub body: String,
}

/// How a file changed in a pull request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileChangeStatus {
    Added,
    Modified,
    Renamed,
    Removed,
}

impl FileChangeStatus {
    pub fn heading(&self) -> &'static str {
        match self {
            FileChangeStatus::Added => "Added",
            FileChangeStatus::Modified => "Modified",
            FileChangeStatus::Renamed => "Renamed",
            FileChangeStatus::Removed => "Deleted",
        }
    }
}

/// One entry of a pull request's file-change summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileChange {
    pub path: String,
    /// Set for renames.
    pub previous_path: Option<String>,
    pub status: FileChangeStatus,
    pub additions: u64,
    pub deletions: u64,
}

/// A canonical, immutable sync event for one GitHub issue or pull request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncEvent {
    pub entity_kind: EntityKind,
    pub action: SyncAction,
    pub canonical_url: CanonicalUrl,
    pub repository: RepoId,
    pub number: u64,
    pub title: String,
    pub body_markdown: String,
    pub author: String,
    pub labels: BTreeSet<String>,
    pub state: EntityState,
    pub created_at: DateTime<Utc>,
    /// Conversation history, oldest first. Empty for fresh-open events.
    pub comments: Vec<Comment>,
    /// File-change summary; only populated for pull requests.
    pub file_changes: Vec<FileChange>,
}

impl SyncEvent {
    /// The task name: `[repo#number] title`.
    pub fn task_name(&self) -> String {
        format!("[{}#{}] {}", self.repository.repo, self.number, self.title)
    }

    /// Whether the comment thread belongs in the rendered narrative.
    pub fn includes_conversation(&self) -> bool {
        self.action != SyncAction::Opened
    }
}
