//! Content-addressed image attachments.
//!
//! Every image outside a table is uploaded to the task once. The attachment's
//! filename is derived from a hash of (source URL, content type, alt text),
//! so the task's own attachment list is the dedup cache: a later render of
//! the same content finds the file by name and reuses it.
//!
//! Uploading makes the tracker log an "attachment added" story on the task
//! for each file. Those are noise on a mirrored task, so after a settle delay
//! the stories for files created in this pass are deleted. Stories for
//! attachments from earlier passes, or added by people, are left alone.
//!
//! Stories do not name the attachment they belong to, only its filename, and
//! a filename can come back if someone deleted the earlier upload. So the
//! task's story ids are recorded before the first upload, and only stories
//! that appeared after that are candidates. If that listing fails, the pass
//! still uploads but leaves every story in place.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::hash::rolling_hash;
use crate::tracker::{ATTACHMENT_ADDED, AttachmentUpload, TaskService};
use crate::types::{ActivityId, AttachmentRecord, RemoteTaskId};

use super::html::{ImageAttachments, ImageKey};
use super::tree::Node;

/// Why an image could not be downloaded.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request for {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("request for {url} returned HTTP {status}")]
    Status { url: String, status: u16 },
}

/// Downloads image bytes by URL.
pub trait ImageFetcher: Send + Sync + 'static {
    fn fetch(&self, url: &str) -> impl Future<Output = Result<Vec<u8>, FetchError>> + Send;
}

/// Images in document order, without duplicates. Tables are expected to be
/// flattened already, so their images are not included.
pub fn collect_images(nodes: &[Node]) -> Vec<ImageKey> {
    let mut seen = HashSet::new();
    let mut images = Vec::new();
    collect_into(nodes.iter(), &mut seen, &mut images);
    images
}

fn collect_into<'a>(
    nodes: impl Iterator<Item = &'a Node>,
    seen: &mut HashSet<ImageKey>,
    images: &mut Vec<ImageKey>,
) {
    for node in nodes {
        match node {
            Node::Image { src, alt } => {
                let key = ImageKey::new(src, alt);
                if seen.insert(key.clone()) {
                    images.push(key);
                }
            }
            Node::Table { .. } => {}
            other => collect_into(other.children().into_iter(), seen, images),
        }
    }
}

/// Guesses the content type from the URL's extension; `image/png` otherwise.
pub fn content_type_for(url: &str) -> &'static str {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let file = path.rsplit('/').next().unwrap_or(path);
    let ext = file
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        _ => "image/png",
    }
}

fn extension_for(content_type: &str) -> &'static str {
    match content_type {
        "image/jpeg" => "jpg",
        "image/gif" => "gif",
        "image/webp" => "webp",
        "image/svg+xml" => "svg",
        _ => "png",
    }
}

/// Hash identifying an image's content for dedup.
pub fn content_hash(url: &str, content_type: &str, alt: &str) -> u32 {
    rolling_hash(&format!("{url}|{content_type}|{alt}"))
}

/// The attachment filename for a content hash.
pub fn attachment_filename(hash: u32, content_type: &str) -> String {
    format!("gh-img-{hash:08x}.{}", extension_for(content_type))
}

/// Result of attaching a document's images.
#[derive(Debug, Default)]
pub struct AttachmentPass {
    /// Attachment for every image that can be referenced inline.
    pub resolved: ImageAttachments,
    /// Attachments created in this pass.
    pub uploaded: Vec<AttachmentRecord>,
}

/// Uploads (or reuses) the attachments for a set of images.
pub struct AttachmentPipeline<'a, T, I> {
    tracker: &'a T,
    fetcher: &'a I,
    settle_delay: Duration,
}

impl<'a, T: TaskService, I: ImageFetcher> AttachmentPipeline<'a, T, I> {
    pub fn new(tracker: &'a T, fetcher: &'a I, settle_delay: Duration) -> Self {
        AttachmentPipeline {
            tracker,
            fetcher,
            settle_delay,
        }
    }

    /// Makes every image in `images` available on `task` where possible.
    ///
    /// Never fails: an image that can't be fetched or uploaded is simply
    /// missing from the result and renders as a link. If the existing
    /// attachments can't be listed, nothing is uploaded at all, since the
    /// pass could not tell a new image from a duplicate.
    #[instrument(skip(self, images), fields(task = %task, images = images.len()))]
    pub async fn attach(&self, task: &RemoteTaskId, images: &[ImageKey]) -> AttachmentPass {
        let mut pass = AttachmentPass::default();
        if images.is_empty() {
            return pass;
        }

        let mut existing: HashMap<String, _> = match self.tracker.list_attachments(task).await {
            Ok(attachments) => attachments.into_iter().map(|a| (a.name, a.id)).collect(),
            Err(e) => {
                warn!(error = %e, "Could not list attachments, images will render as links");
                return pass;
            }
        };

        let needs_upload = images
            .iter()
            .any(|image| !existing.contains_key(&image_filename(image).2));
        let earlier_stories = if needs_upload {
            self.story_ids(task).await
        } else {
            None
        };

        let mut created_names = Vec::new();
        for image in images {
            let (content_type, hash, filename) = image_filename(image);

            if let Some(id) = existing.get(&filename) {
                debug!(filename = %filename, "Reusing attachment");
                pass.resolved.insert(image.clone(), id.clone());
                continue;
            }

            let bytes = match self.fetcher.fetch(&image.src).await {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!(src = %image.src, error = %e, "Image download failed");
                    continue;
                }
            };

            let upload = AttachmentUpload {
                filename: filename.clone(),
                content_type: content_type.to_string(),
                bytes,
            };
            match self.tracker.create_attachment(task, upload).await {
                Ok(attachment) => {
                    debug!(filename = %filename, attachment = %attachment.id, "Uploaded attachment");
                    pass.resolved.insert(image.clone(), attachment.id.clone());
                    pass.uploaded.push(AttachmentRecord {
                        content_hash: hash,
                        remote_attachment_id: attachment.id.clone(),
                    });
                    existing.insert(filename.clone(), attachment.id);
                    created_names.push(filename);
                }
                Err(e) => warn!(src = %image.src, error = %e, "Attachment upload failed"),
            }
        }

        if let Some(earlier) = earlier_stories
            && !created_names.is_empty()
        {
            tokio::time::sleep(self.settle_delay).await;
            self.remove_upload_stories(task, created_names, &earlier).await;
        }

        pass
    }

    /// Ids of the task's current stories, or `None` if they can't be listed.
    async fn story_ids(&self, task: &RemoteTaskId) -> Option<HashSet<ActivityId>> {
        match self.tracker.list_activity(task).await {
            Ok(entries) => Some(entries.into_iter().map(|e| e.id).collect()),
            Err(e) => {
                warn!(error = %e, "Could not list activity, upload stories will stay");
                None
            }
        }
    }

    /// Deletes one new "attachment added" story per uploaded filename.
    async fn remove_upload_stories(
        &self,
        task: &RemoteTaskId,
        mut filenames: Vec<String>,
        earlier: &HashSet<ActivityId>,
    ) {
        let entries = match self.tracker.list_activity(task).await {
            Ok(entries) => entries,
            Err(e) => {
                warn!(error = %e, "Could not list activity, leaving upload stories");
                return;
            }
        };

        for entry in entries {
            if entry.subtype != ATTACHMENT_ADDED || earlier.contains(&entry.id) {
                continue;
            }
            let Some(index) = filenames
                .iter()
                .position(|name| entry.text.contains(name.as_str()))
            else {
                continue;
            };
            filenames.swap_remove(index);
            if let Err(e) = self.tracker.delete_activity(&entry.id).await {
                warn!(story = %entry.id, error = %e, "Could not delete upload story");
            }
        }
    }
}

/// Content type, content hash and attachment filename of an image.
fn image_filename(image: &ImageKey) -> (&'static str, u32, String) {
    let content_type = content_type_for(&image.src);
    let hash = content_hash(&image.src, content_type, &image.alt);
    (content_type, hash, attachment_filename(hash, content_type))
}
