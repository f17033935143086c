//! Turning a sync event into a task description.
//!
//! Rendering is a fixed pipeline:
//!
//! 1. [`narrative::build`] assembles markdown from the event (header, body,
//!    file changes, conversation)
//! 2. [`tree::parse`] parses it into a node tree
//! 3. [`rewrite::rewrite`] brings the tree within the dialect (heading levels,
//!    absolute links, flattened tables)
//! 4. images are attached to the task ([`attachments`])
//! 5. [`html::to_html`] serializes the tree inside `<body>`
//!
//! Rendering itself never fails. Image problems degrade to links; whether the
//! tracker accepts the result is the orchestrator's concern.

use std::sync::Arc;
use std::time::Duration;

use chrono_tz::Tz;
use tracing::{debug, instrument};

use crate::config::SyncConfig;
use crate::tracker::TaskService;
use crate::types::{AttachmentRecord, RemoteTaskId, SyncEvent};

pub mod attachments;
pub mod html;
pub mod narrative;
pub mod rewrite;
pub mod table;
pub mod tree;

pub use attachments::{AttachmentPipeline, FetchError, ImageFetcher};
pub use html::{ImageAttachments, ImageKey};

/// A rendered description.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedContent {
    /// The description in the tracker's rich-text dialect.
    pub html: String,
    /// The narrative markdown, used verbatim as the plain-text fallback.
    pub raw_markdown: String,
    /// Attachments created while rendering.
    pub uploaded: Vec<AttachmentRecord>,
}

/// Renders markdown to the dialect without touching the tracker.
pub fn markdown_to_html(markdown: &str, attachments: &ImageAttachments) -> String {
    html::to_html(&rewrite::rewrite(tree::parse(markdown)), attachments)
}

pub struct ContentRenderer<T, I> {
    tracker: Arc<T>,
    fetcher: Arc<I>,
    zones: [Tz; 2],
    settle_delay: Duration,
}

impl<T: TaskService, I: ImageFetcher> ContentRenderer<T, I> {
    pub fn new(tracker: Arc<T>, fetcher: Arc<I>, config: &SyncConfig) -> Self {
        ContentRenderer {
            tracker,
            fetcher,
            zones: config.display_zones,
            settle_delay: config.image_settle_delay,
        }
    }

    pub fn narrative(&self, event: &SyncEvent) -> String {
        narrative::build(event, &self.zones)
    }

    /// Renders `event` for `task`, uploading its images as attachments.
    #[instrument(skip(self, event), fields(url = %event.canonical_url, task = %task))]
    pub async fn render(&self, event: &SyncEvent, task: &RemoteTaskId) -> RenderedContent {
        let raw_markdown = self.narrative(event);
        let tree = rewrite::rewrite(tree::parse(&raw_markdown));

        let images = attachments::collect_images(&tree);
        let pass = AttachmentPipeline::new(&*self.tracker, &*self.fetcher, self.settle_delay)
            .attach(task, &images)
            .await;
        debug!(
            images = images.len(),
            attached = pass.resolved.len(),
            uploaded = pass.uploaded.len(),
            "Rendered description"
        );

        RenderedContent {
            html: html::to_html(&tree, &pass.resolved),
            raw_markdown,
            uploaded: pass.uploaded,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{FakeImageFetcher, InMemoryTracker, issue_event};
    use crate::tracker::NewTask;
    use crate::types::{ProjectId, SyncAction};

    const SHOT: &str = "https://github.com/user-attachments/assets/shot.png";

    fn renderer(
        tracker: Arc<InMemoryTracker>,
        fetcher: Arc<FakeImageFetcher>,
    ) -> ContentRenderer<InMemoryTracker, FakeImageFetcher> {
        let config = SyncConfig::new(ProjectId::new("p")).with_image_settle_delay(Duration::ZERO);
        ContentRenderer::new(tracker, fetcher, &config)
    }

    async fn new_task(tracker: &InMemoryTracker) -> RemoteTaskId {
        tracker
            .create_task(&NewTask {
                project: ProjectId::new("p"),
                name: "t".into(),
                notes: String::new(),
            })
            .await
            .unwrap()
            .id
    }

    #[tokio::test]
    async fn same_markdown_twice_uploads_once() {
        let tracker = Arc::new(InMemoryTracker::new());
        let fetcher = Arc::new(FakeImageFetcher::new().with_image(SHOT, b"png"));
        let renderer = renderer(tracker.clone(), fetcher.clone());
        let task = new_task(&tracker).await;

        let mut event = issue_event(SyncAction::Opened);
        event.body_markdown = format!("Broken:\n\n<img alt=\"shot\" src=\"{SHOT}\">\n");

        let first = renderer.render(&event, &task).await;
        let second = renderer.render(&event, &task).await;

        assert_eq!(tracker.upload_count(), 1);
        assert_eq!(first.uploaded.len(), 1);
        assert!(second.uploaded.is_empty());
        let gid = &first.uploaded[0].remote_attachment_id;
        let tag = format!("<img data-asana-gid=\"{gid}\"/>");
        assert!(first.html.contains(&tag), "{}", first.html);
        assert!(second.html.contains(&tag), "{}", second.html);
    }

    #[tokio::test]
    async fn images_in_tables_are_not_uploaded() {
        let tracker = Arc::new(InMemoryTracker::new());
        let fetcher = Arc::new(FakeImageFetcher::new().with_image(SHOT, b"png"));
        let renderer = renderer(tracker.clone(), fetcher.clone());
        let task = new_task(&tracker).await;

        let mut event = issue_event(SyncAction::Opened);
        event.body_markdown = format!("| before |\n|---|\n| ![b]({SHOT}) |\n");

        let rendered = renderer.render(&event, &task).await;
        assert_eq!(fetcher.fetch_count(), 0);
        assert!(rendered.html.contains(&format!("[b]({SHOT})")));
        assert!(rendered.html.contains("<pre>"));
    }

    #[tokio::test]
    async fn output_has_single_body_root_and_source_link() {
        let tracker = Arc::new(InMemoryTracker::new());
        let renderer = renderer(tracker.clone(), Arc::new(FakeImageFetcher::new()));
        let task = new_task(&tracker).await;

        let rendered = renderer.render(&issue_event(SyncAction::Opened), &task).await;
        assert!(rendered.html.starts_with("<body>"));
        assert!(rendered.html.ends_with("</body>"));
        assert_eq!(rendered.html.matches("<body>").count(), 1);
        assert!(rendered.html.contains(
            "<strong>Source:</strong> <a href=\"https://github.com/acme/widgets/issues/7\">"
        ));
        assert!(rendered.raw_markdown.contains("It *falls* over."));
    }

    #[test]
    fn markdown_to_html_without_attachments() {
        assert_eq!(
            markdown_to_html("#### Notes\n- [ ] a", &ImageAttachments::new()),
            "<body><h2>Notes</h2>\n<ul><li>[ ] a</li></ul></body>"
        );
    }
}
