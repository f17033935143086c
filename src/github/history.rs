//! Conversation history and pull request file listings.

use std::future::Future;

use octocrab::Octocrab;
use octocrab::models::repos::DiffEntryStatus;
use thiserror::Error;
use tracing::debug;

use crate::types::{Comment, FileChange, FileChangeStatus, RepoId};

const PER_PAGE: u8 = 100;

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("fetching comments of {repo}#{number}: {source}")]
    Comments {
        repo: RepoId,
        number: u64,
        #[source]
        source: octocrab::Error,
    },

    #[error("fetching files of {repo}#{number}: {source}")]
    Files {
        repo: RepoId,
        number: u64,
        #[source]
        source: octocrab::Error,
    },
}

/// Where comment threads and file changes come from.
pub trait ConversationSource: Send + Sync + 'static {
    /// All comments on the issue or pull request, in any order.
    fn comments(
        &self,
        repo: &RepoId,
        number: u64,
    ) -> impl Future<Output = Result<Vec<Comment>, HistoryError>> + Send;

    fn file_changes(
        &self,
        repo: &RepoId,
        number: u64,
    ) -> impl Future<Output = Result<Vec<FileChange>, HistoryError>> + Send;
}

/// [`ConversationSource`] backed by the GitHub REST API.
#[derive(Clone)]
pub struct OctocrabHistory {
    client: Octocrab,
}

impl OctocrabHistory {
    pub fn new(client: Octocrab) -> Self {
        OctocrabHistory { client }
    }

    /// Builds a client, authenticated if a token is given. Unauthenticated
    /// clients work for public repositories at a low rate limit.
    pub fn from_token(token: Option<String>) -> Result<Self, octocrab::Error> {
        let builder = Octocrab::builder();
        let client = match token {
            Some(token) => builder.personal_token(token).build()?,
            None => builder.build()?,
        };
        Ok(Self::new(client))
    }
}

impl std::fmt::Debug for OctocrabHistory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OctocrabHistory").finish_non_exhaustive()
    }
}

impl ConversationSource for OctocrabHistory {
    async fn comments(&self, repo: &RepoId, number: u64) -> Result<Vec<Comment>, HistoryError> {
        let wrap = |source| HistoryError::Comments {
            repo: repo.clone(),
            number,
            source,
        };
        let first = self
            .client
            .issues(&repo.owner, &repo.repo)
            .list_comments(number)
            .per_page(PER_PAGE)
            .send()
            .await
            .map_err(wrap)?;
        let all = self.client.all_pages(first).await.map_err(wrap)?;
        debug!(repo = %repo, number, count = all.len(), "Fetched comments");

        Ok(all
            .into_iter()
            .map(|c| Comment {
                author: c.user.login,
                created_at: c.created_at,
                body: c.body.unwrap_or_default(),
            })
            .collect())
    }

    async fn file_changes(&self, repo: &RepoId, number: u64) -> Result<Vec<FileChange>, HistoryError> {
        let wrap = |source| HistoryError::Files {
            repo: repo.clone(),
            number,
            source,
        };
        let first = self
            .client
            .pulls(&repo.owner, &repo.repo)
            .list_files(number)
            .await
            .map_err(wrap)?;
        let all = self.client.all_pages(first).await.map_err(wrap)?;
        debug!(repo = %repo, number, count = all.len(), "Fetched changed files");

        Ok(all
            .into_iter()
            .map(|entry| FileChange {
                status: file_status(&entry.status),
                path: entry.filename,
                previous_path: entry.previous_filename,
                additions: entry.additions,
                deletions: entry.deletions,
            })
            .collect())
    }
}

/// Copies and type changes are listed with the modifications.
fn file_status(status: &DiffEntryStatus) -> FileChangeStatus {
    match status {
        DiffEntryStatus::Added => FileChangeStatus::Added,
        DiffEntryStatus::Removed => FileChangeStatus::Removed,
        DiffEntryStatus::Renamed => FileChangeStatus::Renamed,
        _ => FileChangeStatus::Modified,
    }
}
