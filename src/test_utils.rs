//! Shared test doubles: an in-memory tracker with failure injection, an image
//! fetcher serving canned bytes, a canned conversation source, and event
//! builders.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, TimeZone, Utc};

use crate::github::{ConversationSource, HistoryError};
use crate::render::{FetchError, ImageFetcher};
use crate::tracker::{
    ATTACHMENT_ADDED, ActivityEntry, Attachment, AttachmentUpload, CustomField, FieldOption,
    FieldValue, NewTask, RemoteTask, Result, TaskFilter, TaskService, TaskUpdate, TrackerError,
};
use crate::types::{
    ActivityId, AttachmentId, CanonicalUrl, Comment, EntityKind, EntityState, FieldId, FileChange,
    OptionId, ProjectId, RemoteTaskId, RepoId, SyncAction, SyncEvent,
};

// ─── Tracker ───

/// Tracker verbs, for call counting and failure injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackerOp {
    CreateTask,
    UpdateTask,
    GetTask,
    SearchTasks,
    CreateAttachment,
    ListAttachments,
    ListActivity,
    DeleteActivity,
    GetField,
    CreateFieldOption,
}

#[derive(Debug, Clone)]
struct StoredTask {
    project: ProjectId,
    task: RemoteTask,
    html_notes: Option<String>,
}

#[derive(Debug, Default)]
struct TrackerState {
    next_gid: u64,
    tasks: BTreeMap<RemoteTaskId, StoredTask>,
    attachments: BTreeMap<RemoteTaskId, Vec<Attachment>>,
    uploads: Vec<(RemoteTaskId, AttachmentUpload)>,
    activity: BTreeMap<RemoteTaskId, Vec<ActivityEntry>>,
    deleted_activity: Vec<ActivityId>,
    fields: BTreeMap<FieldId, Vec<FieldOption>>,
    calls: HashMap<TrackerOp, usize>,
    /// Remaining forced failures per op; `usize::MAX` means forever.
    failures: HashMap<TrackerOp, usize>,
    reject_html: bool,
}

impl TrackerState {
    fn gid(&mut self) -> String {
        self.next_gid += 1;
        format!("{}", 1_000 + self.next_gid)
    }

    fn enter(&mut self, op: TrackerOp) -> Result<()> {
        *self.calls.entry(op).or_default() += 1;
        if let Some(remaining) = self.failures.get_mut(&op)
            && *remaining > 0
        {
            if *remaining != usize::MAX {
                *remaining -= 1;
            }
            return Err(TrackerError::transient(format!("injected {op:?} failure")));
        }
        Ok(())
    }
}

/// An in-memory [`TaskService`].
#[derive(Debug, Default)]
pub struct InMemoryTracker {
    state: Mutex<TrackerState>,
}

impl InMemoryTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an enum (or text) custom field with no options.
    pub fn with_field(self, field: FieldId) -> Self {
        self.lock().fields.insert(field, Vec::new());
        self
    }

    fn lock(&self) -> MutexGuard<'_, TrackerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Makes the next `n` calls of `op` fail with a transient error.
    pub fn fail_next(&self, op: TrackerOp, n: usize) {
        self.lock().failures.insert(op, n);
    }

    /// Makes every call of `op` fail until cleared.
    pub fn fail_always(&self, op: TrackerOp) {
        self.fail_next(op, usize::MAX);
    }

    pub fn clear_failures(&self) {
        self.lock().failures.clear();
    }

    /// Rejects every `html_notes` write as invalid content.
    pub fn reject_html(&self, reject: bool) {
        self.lock().reject_html = reject;
    }

    pub fn calls(&self, op: TrackerOp) -> usize {
        self.lock().calls.get(&op).copied().unwrap_or(0)
    }

    pub fn task(&self, id: &RemoteTaskId) -> Option<RemoteTask> {
        self.lock().tasks.get(id).map(|s| s.task.clone())
    }

    pub fn html_notes(&self, id: &RemoteTaskId) -> Option<String> {
        self.lock().tasks.get(id).and_then(|s| s.html_notes.clone())
    }

    pub fn tasks(&self) -> Vec<RemoteTask> {
        self.lock().tasks.values().map(|s| s.task.clone()).collect()
    }

    pub fn task_count(&self) -> usize {
        self.lock().tasks.len()
    }

    /// Simulates someone deleting the task in the tracker UI.
    pub fn delete_task(&self, id: &RemoteTaskId) {
        self.lock().tasks.remove(id);
    }

    /// Seeds a task as if created by an earlier deployment.
    pub fn insert_task(&self, project: &ProjectId, name: &str, notes: &str) -> RemoteTaskId {
        let mut state = self.lock();
        let id = RemoteTaskId::new(state.gid());
        let task = RemoteTask {
            id: id.clone(),
            name: name.to_string(),
            permalink: permalink(&id),
            completed: false,
            notes: notes.to_string(),
            custom_fields: BTreeMap::new(),
        };
        state.tasks.insert(
            id.clone(),
            StoredTask {
                project: project.clone(),
                task,
                html_notes: None,
            },
        );
        id
    }

    pub fn upload_count(&self) -> usize {
        self.lock().uploads.len()
    }

    pub fn attachments(&self, task: &RemoteTaskId) -> Vec<Attachment> {
        self.lock().attachments.get(task).cloned().unwrap_or_default()
    }

    /// Simulates someone removing an attachment by hand. Its story stays.
    pub fn delete_attachment(&self, task: &RemoteTaskId, attachment: &AttachmentId) {
        if let Some(attachments) = self.lock().attachments.get_mut(task) {
            attachments.retain(|a| &a.id != attachment);
        }
    }

    pub fn activity(&self, task: &RemoteTaskId) -> Vec<ActivityEntry> {
        self.lock().activity.get(task).cloned().unwrap_or_default()
    }

    /// Adds an unrelated activity entry (a human's comment, say).
    pub fn push_activity(&self, task: &RemoteTaskId, subtype: &str, text: &str) -> ActivityId {
        let mut state = self.lock();
        let id = ActivityId::new(state.gid());
        state
            .activity
            .entry(task.clone())
            .or_default()
            .push(ActivityEntry {
                id: id.clone(),
                subtype: subtype.to_string(),
                text: text.to_string(),
            });
        id
    }

    pub fn deleted_activity(&self) -> Vec<ActivityId> {
        self.lock().deleted_activity.clone()
    }

    pub fn field_options(&self, field: &FieldId) -> Vec<FieldOption> {
        self.lock().fields.get(field).cloned().unwrap_or_default()
    }

    /// The option value an enum field of `task` is set to.
    pub fn enum_value(&self, task: &RemoteTaskId, field: &FieldId) -> Option<String> {
        let state = self.lock();
        let stored = state.tasks.get(task)?;
        let Some(FieldValue::Enum(option)) = stored.task.custom_fields.get(field) else {
            return None;
        };
        option_value(&state, field, option)
    }

    pub fn multi_enum_values(&self, task: &RemoteTaskId, field: &FieldId) -> Vec<String> {
        let state = self.lock();
        let Some(FieldValue::MultiEnum(options)) = state
            .tasks
            .get(task)
            .and_then(|s| s.task.custom_fields.get(field))
        else {
            return Vec::new();
        };
        options
            .iter()
            .filter_map(|o| option_value(&state, field, o))
            .collect()
    }
}

fn option_value(state: &TrackerState, field: &FieldId, option: &OptionId) -> Option<String> {
    state
        .fields
        .get(field)?
        .iter()
        .find(|o| &o.option_id == option)
        .map(|o| o.value.clone())
}

fn permalink(id: &RemoteTaskId) -> String {
    format!("https://app.asana.com/0/0/{id}")
}

/// Crude tag stripper standing in for the tracker's own html-to-text.
fn strip_tags(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut in_tag = false;
    for c in html.chars() {
        match c {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }
    out.replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
}

impl TaskService for InMemoryTracker {
    async fn create_task(&self, new: &NewTask) -> Result<RemoteTask> {
        let mut state = self.lock();
        state.enter(TrackerOp::CreateTask)?;
        let id = RemoteTaskId::new(state.gid());
        let task = RemoteTask {
            id: id.clone(),
            name: new.name.clone(),
            permalink: permalink(&id),
            completed: false,
            notes: new.notes.clone(),
            custom_fields: BTreeMap::new(),
        };
        state.tasks.insert(
            id,
            StoredTask {
                project: new.project.clone(),
                task: task.clone(),
                html_notes: None,
            },
        );
        Ok(task)
    }

    async fn update_task(&self, id: &RemoteTaskId, update: &TaskUpdate) -> Result<RemoteTask> {
        let mut state = self.lock();
        state.enter(TrackerOp::UpdateTask)?;
        if update.html_notes.is_some() && state.reject_html {
            return Err(TrackerError::from_status(
                400,
                "html_notes: XML is invalid",
            ));
        }
        let stored = state
            .tasks
            .get_mut(id)
            .ok_or_else(|| TrackerError::not_found(format!("task {id}")))?;
        if let Some(name) = &update.name {
            stored.task.name = name.clone();
        }
        if let Some(html) = &update.html_notes {
            stored.task.notes = strip_tags(html);
            stored.html_notes = Some(html.clone());
        }
        if let Some(notes) = &update.notes {
            stored.task.notes = notes.clone();
            stored.html_notes = None;
        }
        if let Some(completed) = update.completed {
            stored.task.completed = completed;
        }
        for (field, value) in &update.custom_fields {
            stored.task.custom_fields.insert(field.clone(), value.clone());
        }
        Ok(stored.task.clone())
    }

    async fn get_task(&self, id: &RemoteTaskId) -> Result<Option<RemoteTask>> {
        let mut state = self.lock();
        state.enter(TrackerOp::GetTask)?;
        Ok(state.tasks.get(id).map(|s| s.task.clone()))
    }

    async fn search_tasks(&self, project: &ProjectId, filter: &TaskFilter) -> Result<Vec<RemoteTask>> {
        let mut state = self.lock();
        state.enter(TrackerOp::SearchTasks)?;
        Ok(state
            .tasks
            .values()
            .filter(|s| &s.project == project)
            .filter(|s| match filter {
                TaskFilter::All => true,
                TaskFilter::FieldEquals { field, value } => matches!(
                    s.task.custom_fields.get(field),
                    Some(FieldValue::Text(text)) if text == value
                ),
            })
            .map(|s| s.task.clone())
            .collect())
    }

    async fn create_attachment(&self, task: &RemoteTaskId, upload: AttachmentUpload) -> Result<Attachment> {
        let mut state = self.lock();
        state.enter(TrackerOp::CreateAttachment)?;
        if !state.tasks.contains_key(task) {
            return Err(TrackerError::not_found(format!("task {task}")));
        }
        let attachment = Attachment {
            id: AttachmentId::new(state.gid()),
            name: upload.filename.clone(),
        };
        let activity_id = ActivityId::new(state.gid());
        state
            .attachments
            .entry(task.clone())
            .or_default()
            .push(attachment.clone());
        state
            .activity
            .entry(task.clone())
            .or_default()
            .push(ActivityEntry {
                id: activity_id,
                subtype: ATTACHMENT_ADDED.to_string(),
                text: format!("attached {}", upload.filename),
            });
        state.uploads.push((task.clone(), upload));
        Ok(attachment)
    }

    async fn list_attachments(&self, task: &RemoteTaskId) -> Result<Vec<Attachment>> {
        let mut state = self.lock();
        state.enter(TrackerOp::ListAttachments)?;
        Ok(state.attachments.get(task).cloned().unwrap_or_default())
    }

    async fn list_activity(&self, task: &RemoteTaskId) -> Result<Vec<ActivityEntry>> {
        let mut state = self.lock();
        state.enter(TrackerOp::ListActivity)?;
        Ok(state.activity.get(task).cloned().unwrap_or_default())
    }

    async fn delete_activity(&self, entry: &ActivityId) -> Result<()> {
        let mut state = self.lock();
        state.enter(TrackerOp::DeleteActivity)?;
        for entries in state.activity.values_mut() {
            entries.retain(|e| &e.id != entry);
        }
        state.deleted_activity.push(entry.clone());
        Ok(())
    }

    async fn get_field(&self, field: &FieldId) -> Result<CustomField> {
        let mut state = self.lock();
        state.enter(TrackerOp::GetField)?;
        let options = state
            .fields
            .get(field)
            .cloned()
            .ok_or_else(|| TrackerError::not_found(format!("custom field {field}")))?;
        Ok(CustomField {
            id: field.clone(),
            options,
        })
    }

    async fn create_field_option(&self, field: &FieldId, name: &str, color: &str) -> Result<FieldOption> {
        let mut state = self.lock();
        state.enter(TrackerOp::CreateFieldOption)?;
        let option = FieldOption {
            option_id: OptionId::new(state.gid()),
            value: name.to_string(),
            color: Some(color.to_string()),
        };
        state
            .fields
            .get_mut(field)
            .ok_or_else(|| TrackerError::not_found(format!("custom field {field}")))?
            .push(option.clone());
        Ok(option)
    }
}

// ─── Images ───

/// Serves registered bytes by URL; anything else is a 404.
#[derive(Debug, Default)]
pub struct FakeImageFetcher {
    images: Mutex<HashMap<String, Vec<u8>>>,
    fetches: AtomicUsize,
}

impl FakeImageFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_image(self, url: &str, bytes: &[u8]) -> Self {
        self.images
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(url.to_string(), bytes.to_vec());
        self
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

impl ImageFetcher for FakeImageFetcher {
    async fn fetch(&self, url: &str) -> std::result::Result<Vec<u8>, FetchError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.images
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(url)
            .cloned()
            .ok_or_else(|| FetchError::Status {
                url: url.to_string(),
                status: 404,
            })
    }
}

// ─── Conversation history ───

/// Returns the same comments and file changes for every entity.
#[derive(Debug, Default)]
pub struct FakeConversationSource {
    pub comments: Vec<Comment>,
    pub file_changes: Vec<FileChange>,
}

impl ConversationSource for FakeConversationSource {
    async fn comments(&self, _repo: &RepoId, _number: u64) -> std::result::Result<Vec<Comment>, HistoryError> {
        Ok(self.comments.clone())
    }

    async fn file_changes(
        &self,
        _repo: &RepoId,
        _number: u64,
    ) -> std::result::Result<Vec<FileChange>, HistoryError> {
        Ok(self.file_changes.clone())
    }
}

// ─── Events ───

pub fn ts(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + secs, 0)
        .single()
        .unwrap_or_default()
}

/// An issue event for `acme/widgets#7`.
pub fn issue_event(action: SyncAction) -> SyncEvent {
    SyncEvent {
        entity_kind: EntityKind::Issue,
        action,
        canonical_url: CanonicalUrl::new("https://github.com/acme/widgets/issues/7"),
        repository: RepoId::new("acme", "widgets"),
        number: 7,
        title: "Widget falls over".to_string(),
        body_markdown: "It *falls* over.".to_string(),
        author: "octocat".to_string(),
        labels: BTreeSet::from(["bug".to_string()]),
        state: match action {
            SyncAction::Closed => EntityState::Closed,
            _ => EntityState::Open,
        },
        created_at: ts(0),
        comments: Vec::new(),
        file_changes: Vec::new(),
    }
}

pub fn comment(author: &str, secs: i64, body: &str) -> Comment {
    Comment {
        author: author.to_string(),
        created_at: ts(secs),
        body: body.to_string(),
    }
}
