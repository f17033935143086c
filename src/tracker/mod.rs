//! The work-tracking service seam.
//!
//! The core only talks to the tracker through [`TaskService`], a handful of
//! simple verbs that map one-to-one onto REST calls. [`AsanaClient`] is the
//! production implementation; tests use an in-memory fake.
//!
//! Every verb is fallible and may be retried wholesale by the coordinator, so
//! implementations must not retry internally.

use std::collections::BTreeMap;
use std::future::Future;

use serde::{Deserialize, Serialize};

use crate::types::{ActivityId, AttachmentId, FieldId, OptionId, ProjectId, RemoteTaskId};

mod asana;
mod error;

pub use asana::{AsanaClient, AsanaConfig};
pub use error::{TrackerError, TrackerErrorKind};

/// Result type for tracker operations.
pub type Result<T> = std::result::Result<T, TrackerError>;

/// Activity-log subtype the tracker emits for each new attachment.
pub const ATTACHMENT_ADDED: &str = "attachment_added";

/// A custom field value on a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum FieldValue {
    Text(String),
    Enum(OptionId),
    MultiEnum(Vec<OptionId>),
}

/// A task as returned by the tracker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTask {
    pub id: RemoteTaskId,
    pub name: String,
    pub permalink: String,
    pub completed: bool,
    /// Plain-text rendering of the description.
    pub notes: String,
    pub custom_fields: BTreeMap<FieldId, FieldValue>,
}

/// Fields for a new task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTask {
    pub project: ProjectId,
    pub name: String,
    /// Initial plain-text description. Carries the `Source:` marker so the
    /// task is findable before its first content push succeeds.
    pub notes: String,
}

/// A partial task update; `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskUpdate {
    pub name: Option<String>,
    pub html_notes: Option<String>,
    pub notes: Option<String>,
    pub completed: Option<bool>,
    pub custom_fields: BTreeMap<FieldId, FieldValue>,
}

impl TaskUpdate {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_html_notes(mut self, html: impl Into<String>) -> Self {
        self.html_notes = Some(html.into());
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    pub fn with_completed(mut self, completed: bool) -> Self {
        self.completed = Some(completed);
        self
    }

    pub fn with_field(mut self, field: FieldId, value: FieldValue) -> Self {
        self.custom_fields.insert(field, value);
        self
    }
}

/// How to narrow a task search within a project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskFilter {
    /// Tasks whose text custom field equals `value` exactly.
    FieldEquals { field: FieldId, value: String },
    /// Every task in the project.
    All,
}

/// An attachment already stored on a task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub id: AttachmentId,
    pub name: String,
}

/// Bytes to upload as a new attachment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentUpload {
    pub filename: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

/// One entry of a task's activity log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivityEntry {
    pub id: ActivityId,
    pub subtype: String,
    pub text: String,
}

/// An enum option of a custom field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldOption {
    pub option_id: OptionId,
    pub value: String,
    pub color: Option<String>,
}

/// A custom field definition with its current options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CustomField {
    pub id: FieldId,
    pub options: Vec<FieldOption>,
}

/// Operations the core needs from the work-tracking service.
pub trait TaskService: Send + Sync {
    fn create_task(&self, task: &NewTask) -> impl Future<Output = Result<RemoteTask>> + Send;

    fn update_task(
        &self,
        id: &RemoteTaskId,
        update: &TaskUpdate,
    ) -> impl Future<Output = Result<RemoteTask>> + Send;

    /// Fetches a task; `Ok(None)` if it does not exist (deleted or never did).
    fn get_task(&self, id: &RemoteTaskId)
    -> impl Future<Output = Result<Option<RemoteTask>>> + Send;

    fn search_tasks(
        &self,
        project: &ProjectId,
        filter: &TaskFilter,
    ) -> impl Future<Output = Result<Vec<RemoteTask>>> + Send;

    fn create_attachment(
        &self,
        task: &RemoteTaskId,
        upload: AttachmentUpload,
    ) -> impl Future<Output = Result<Attachment>> + Send;

    fn list_attachments(
        &self,
        task: &RemoteTaskId,
    ) -> impl Future<Output = Result<Vec<Attachment>>> + Send;

    fn list_activity(
        &self,
        task: &RemoteTaskId,
    ) -> impl Future<Output = Result<Vec<ActivityEntry>>> + Send;

    fn delete_activity(&self, entry: &ActivityId) -> impl Future<Output = Result<()>> + Send;

    fn get_field(&self, field: &FieldId) -> impl Future<Output = Result<CustomField>> + Send;

    fn create_field_option(
        &self,
        field: &FieldId,
        name: &str,
        color: &str,
    ) -> impl Future<Output = Result<FieldOption>> + Send;
}
