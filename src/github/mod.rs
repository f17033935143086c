//! The GitHub side: webhook payloads, conversation history and image
//! downloads.
//!
//! A delivery becomes a [`SyncEvent`] in two steps. [`payload::parse`] reads
//! the webhook body; [`attach_history`] then fetches what the body does not
//! carry (comments for every action but `opened`, changed files for pull
//! requests).

mod history;
mod images;
pub mod payload;

pub use history::{ConversationSource, HistoryError, OctocrabHistory};
pub use images::HttpImageFetcher;
pub use payload::{Parsed, PayloadError, parse};

use tracing::instrument;

use crate::types::{EntityKind, SyncEvent};

/// Completes a parsed event with its conversation and file changes.
#[instrument(skip_all, fields(url = %event.canonical_url, action = %event.action))]
pub async fn attach_history<C: ConversationSource>(
    source: &C,
    mut event: SyncEvent,
) -> Result<SyncEvent, HistoryError> {
    if event.includes_conversation() {
        let mut comments = source.comments(&event.repository, event.number).await?;
        comments.sort_by_key(|c| c.created_at);
        event.comments = comments;
    }
    if event.entity_kind == EntityKind::PullRequest {
        event.file_changes = source.file_changes(&event.repository, event.number).await?;
    }
    Ok(event)
}
