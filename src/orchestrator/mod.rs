//! The per-event sync protocol.
//!
//! Every event, whether it creates or updates, runs the same three steps:
//!
//! 1. resolve the task (find or create, identity fields refreshed)
//! 2. push name and rendered description
//! 3. set completion from the entity state, except for comment events
//!
//! Each step is idempotent, so a retry after a partial failure (task created,
//! description rejected) converges instead of duplicating.

use std::sync::Arc;

use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::config::SyncConfig;
use crate::coordinator::SyncProcessor;
use crate::render::{ContentRenderer, ImageFetcher};
use crate::resolver::{IdentityAttributes, ResolveError, TaskResolver};
use crate::tracker::{TaskService, TaskUpdate, TrackerError};
use crate::types::{EntityState, RemoteTaskId, SyncEvent, SyncOutcome};

/// One sync attempt failed.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("resolving task: {0}")]
    Resolve(#[from] ResolveError),

    #[error("updating description of task {task}: {source}")]
    Content {
        task: RemoteTaskId,
        #[source]
        source: TrackerError,
    },

    #[error("setting completion of task {task}: {source}")]
    Completion {
        task: RemoteTaskId,
        #[source]
        source: TrackerError,
    },
}

impl SyncError {
    /// The task this attempt resolved before failing, if it got that far.
    pub fn task(&self) -> Option<&RemoteTaskId> {
        match self {
            SyncError::Resolve(_) => None,
            SyncError::Content { task, .. } | SyncError::Completion { task, .. } => Some(task),
        }
    }
}

pub struct SyncOrchestrator<T, I> {
    tracker: Arc<T>,
    resolver: TaskResolver<T>,
    renderer: ContentRenderer<T, I>,
}

impl<T: TaskService, I: ImageFetcher> SyncOrchestrator<T, I> {
    pub fn new(tracker: Arc<T>, fetcher: Arc<I>, config: &SyncConfig) -> Self {
        SyncOrchestrator {
            resolver: TaskResolver::new(tracker.clone(), config.project.clone(), config.fields.clone()),
            renderer: ContentRenderer::new(tracker.clone(), fetcher, config),
            tracker,
        }
    }

    /// Pushes name and description, falling back to plain text once if the
    /// tracker rejects the markup. Returns whether the fallback was used.
    async fn push_content(&self, event: &SyncEvent, task: &RemoteTaskId) -> Result<bool, SyncError> {
        let rendered = self.renderer.render(event, task).await;
        let update = TaskUpdate::default()
            .with_name(event.task_name())
            .with_html_notes(rendered.html);

        match self.tracker.update_task(task, &update).await {
            Ok(_) => Ok(false),
            Err(e) if e.is_invalid_content() => {
                warn!(task = %task, error = %e, "Description rejected, retrying as plain text");
                let fallback = TaskUpdate::default()
                    .with_name(event.task_name())
                    .with_notes(rendered.raw_markdown);
                self.tracker
                    .update_task(task, &fallback)
                    .await
                    .map_err(|source| SyncError::Content {
                        task: task.clone(),
                        source,
                    })?;
                Ok(true)
            }
            Err(source) => Err(SyncError::Content {
                task: task.clone(),
                source,
            }),
        }
    }
}

impl<T, I> SyncProcessor for SyncOrchestrator<T, I>
where
    T: TaskService + 'static,
    I: ImageFetcher,
{
    #[instrument(skip(self, event), fields(url = %event.canonical_url, action = %event.action))]
    async fn process(&self, event: &SyncEvent, hint: Option<&RemoteTaskId>) -> Result<SyncOutcome, SyncError> {
        let attributes = IdentityAttributes::from_event(event);
        let resolution = self
            .resolver
            .resolve(&event.canonical_url, hint, &attributes)
            .await?;
        let task = &resolution.handle.remote_id;

        let plain_text_fallback = self.push_content(event, task).await?;

        let completed = if event.action.is_comment() {
            None
        } else {
            let completed = event.state == EntityState::Closed;
            self.tracker
                .update_task(task, &TaskUpdate::default().with_completed(completed))
                .await
                .map_err(|source| SyncError::Completion {
                    task: task.clone(),
                    source,
                })?;
            Some(completed)
        };

        info!(
            remote_id = %task,
            created = resolution.created,
            completed = ?completed,
            plain_text_fallback,
            "Synced"
        );

        Ok(SyncOutcome {
            handle: resolution.handle,
            action: event.action,
            created: resolution.created,
            completed,
            plain_text_fallback,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::test_utils::{FakeImageFetcher, InMemoryTracker, TrackerOp, issue_event};
    use crate::types::{ProjectId, SyncAction};

    type Orchestrator = SyncOrchestrator<InMemoryTracker, FakeImageFetcher>;

    fn orchestrator(tracker: Arc<InMemoryTracker>) -> Orchestrator {
        let config = SyncConfig::new(ProjectId::new("proj")).with_image_settle_delay(Duration::ZERO);
        SyncOrchestrator::new(tracker, Arc::new(FakeImageFetcher::new()), &config)
    }

    #[tokio::test]
    async fn opened_creates_task_with_description() {
        let tracker = Arc::new(InMemoryTracker::new());
        let outcome = orchestrator(tracker.clone())
            .process(&issue_event(SyncAction::Opened), None)
            .await
            .unwrap();

        assert!(outcome.created);
        assert_eq!(outcome.completed, Some(false));
        assert!(!outcome.plain_text_fallback);
        let task = tracker.task(&outcome.handle.remote_id).unwrap();
        assert_eq!(task.name, "[widgets#7] Widget falls over");
        let html = tracker.html_notes(&outcome.handle.remote_id).unwrap();
        assert!(html.contains("It <em>falls</em> over."), "{html}");
    }

    #[tokio::test]
    async fn closed_then_comment_then_reopened() {
        let tracker = Arc::new(InMemoryTracker::new());
        let orchestrator = orchestrator(tracker.clone());

        let closed = orchestrator
            .process(&issue_event(SyncAction::Closed), None)
            .await
            .unwrap();
        let id = closed.handle.remote_id.clone();
        assert_eq!(closed.completed, Some(true));
        assert!(tracker.task(&id).unwrap().completed);

        let comment = orchestrator
            .process(&issue_event(SyncAction::CommentCreated), Some(&id))
            .await
            .unwrap();
        assert_eq!(comment.completed, None);
        assert!(tracker.task(&id).unwrap().completed);

        let reopened = orchestrator
            .process(&issue_event(SyncAction::Reopened), Some(&id))
            .await
            .unwrap();
        assert_eq!(reopened.completed, Some(false));
        assert!(!tracker.task(&id).unwrap().completed);
    }

    #[tokio::test]
    async fn rejected_html_falls_back_to_plain_text() {
        let tracker = Arc::new(InMemoryTracker::new());
        tracker.reject_html(true);

        let outcome = orchestrator(tracker.clone())
            .process(&issue_event(SyncAction::Opened), None)
            .await
            .unwrap();

        assert!(outcome.plain_text_fallback);
        let task = tracker.task(&outcome.handle.remote_id).unwrap();
        assert!(task.notes.contains("It *falls* over."));
        assert!(task.notes.contains("**Source:** <https://github.com/acme/widgets/issues/7>"));
        assert!(tracker.html_notes(&outcome.handle.remote_id).is_none());
    }

    #[tokio::test]
    async fn failed_description_push_keeps_the_created_task() {
        let tracker = Arc::new(InMemoryTracker::new());
        let orchestrator = orchestrator(tracker.clone());
        tracker.fail_next(TrackerOp::UpdateTask, 1);

        let err = orchestrator
            .process(&issue_event(SyncAction::Opened), None)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Content { .. }));
        assert_eq!(tracker.task_count(), 1);

        let created = tracker.tasks()[0].id.clone();
        let retried = orchestrator
            .process(&issue_event(SyncAction::Opened), Some(&created))
            .await
            .unwrap();
        assert_eq!(retried.handle.remote_id, created);
        assert!(!retried.created);
        assert_eq!(tracker.task_count(), 1);
    }

    #[tokio::test]
    async fn comment_events_skip_the_completion_write() {
        let tracker = Arc::new(InMemoryTracker::new());
        let orchestrator = orchestrator(tracker.clone());
        let opened = orchestrator
            .process(&issue_event(SyncAction::Opened), None)
            .await
            .unwrap();

        let before = tracker.calls(TrackerOp::UpdateTask);
        orchestrator
            .process(&issue_event(SyncAction::CommentCreated), Some(&opened.handle.remote_id))
            .await
            .unwrap();
        assert_eq!(tracker.calls(TrackerOp::UpdateTask), before + 1);
    }

    #[tokio::test]
    async fn create_failure_surfaces_as_resolve_error() {
        let tracker = Arc::new(InMemoryTracker::new());
        tracker.fail_always(TrackerOp::CreateTask);

        let err = orchestrator(tracker.clone())
            .process(&issue_event(SyncAction::Opened), None)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Resolve(ResolveError::Create(_))));
    }
}
