//! Asana REST client implementing [`TaskService`].
//!
//! A thin wrapper over `reqwest`: one request per verb, `{"data": ...}`
//! envelopes unwrapped, offset pagination followed to the end. Status codes
//! are categorized by [`TrackerError::from_status`]; no retries happen here.

use std::collections::BTreeMap;
use std::time::Duration;

use reqwest::{Method, RequestBuilder, multipart};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::{debug, trace};

use crate::types::{ActivityId, AttachmentId, FieldId, OptionId, ProjectId, RemoteTaskId};

use super::{
    ActivityEntry, Attachment, AttachmentUpload, CustomField, FieldOption, FieldValue, NewTask,
    RemoteTask, Result, TaskFilter, TaskService, TaskUpdate, TrackerError,
};

/// Fields requested for every task read.
const TASK_FIELDS: &str = "name,permalink_url,completed,notes,custom_fields.gid,\
custom_fields.resource_subtype,custom_fields.text_value,custom_fields.enum_value.gid,\
custom_fields.multi_enum_values.gid";

/// Page size for list endpoints.
const PAGE_LIMIT: &str = "100";

/// Connection settings for [`AsanaClient`].
#[derive(Debug, Clone)]
pub struct AsanaConfig {
    pub api_base: String,
    pub token: String,
    /// Enables the workspace search endpoint for exact field lookups.
    /// Without it, field searches page through the project instead.
    pub workspace: Option<String>,
    pub request_timeout: Duration,
}

impl AsanaConfig {
    pub const DEFAULT_API_BASE: &'static str = "https://app.asana.com/api/1.0";

    pub fn new(token: impl Into<String>) -> Self {
        AsanaConfig {
            api_base: Self::DEFAULT_API_BASE.to_string(),
            token: token.into(),
            workspace: None,
            request_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    pub fn with_workspace(mut self, workspace: Option<String>) -> Self {
        self.workspace = workspace;
        self
    }
}

/// HTTP client for the Asana API.
#[derive(Clone)]
pub struct AsanaClient {
    http: reqwest::Client,
    api_base: String,
    workspace: Option<String>,
}

impl std::fmt::Debug for AsanaClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsanaClient")
            .field("api_base", &self.api_base)
            .field("workspace", &self.workspace)
            .finish_non_exhaustive()
    }
}

// ─── Wire types ───────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct DataEnvelope<T> {
    data: T,
}

#[derive(Debug, Deserialize)]
struct PageEnvelope<T> {
    data: Vec<T>,
    next_page: Option<NextPage>,
}

#[derive(Debug, Deserialize)]
struct NextPage {
    offset: String,
}

#[derive(Debug, Deserialize)]
struct RawTask {
    gid: String,
    name: Option<String>,
    permalink_url: Option<String>,
    completed: Option<bool>,
    notes: Option<String>,
    #[serde(default)]
    custom_fields: Vec<RawFieldValue>,
}

#[derive(Debug, Deserialize)]
struct RawFieldValue {
    gid: String,
    resource_subtype: Option<String>,
    text_value: Option<String>,
    enum_value: Option<RawEnumOption>,
    multi_enum_values: Option<Vec<RawEnumOption>>,
}

#[derive(Debug, Deserialize)]
struct RawEnumOption {
    gid: String,
    name: Option<String>,
    color: Option<String>,
    enabled: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct RawCustomField {
    gid: String,
    #[serde(default)]
    enum_options: Vec<RawEnumOption>,
}

#[derive(Debug, Deserialize)]
struct RawAttachment {
    gid: String,
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawStory {
    gid: String,
    resource_subtype: Option<String>,
    text: Option<String>,
}

impl From<RawTask> for RemoteTask {
    fn from(raw: RawTask) -> Self {
        let custom_fields = raw
            .custom_fields
            .into_iter()
            .filter_map(|field| {
                let value = match field.resource_subtype.as_deref() {
                    Some("text") => field.text_value.map(FieldValue::Text),
                    Some("enum") => field
                        .enum_value
                        .map(|option| FieldValue::Enum(OptionId::new(option.gid))),
                    Some("multi_enum") => field.multi_enum_values.map(|options| {
                        FieldValue::MultiEnum(
                            options.into_iter().map(|o| OptionId::new(o.gid)).collect(),
                        )
                    }),
                    _ => None,
                }?;
                Some((FieldId::new(field.gid), value))
            })
            .collect();

        RemoteTask {
            id: RemoteTaskId::new(raw.gid),
            name: raw.name.unwrap_or_default(),
            permalink: raw.permalink_url.unwrap_or_default(),
            completed: raw.completed.unwrap_or(false),
            notes: raw.notes.unwrap_or_default(),
            custom_fields,
        }
    }
}

impl From<RawEnumOption> for FieldOption {
    fn from(raw: RawEnumOption) -> Self {
        FieldOption {
            option_id: OptionId::new(raw.gid),
            value: raw.name.unwrap_or_default(),
            color: raw.color,
        }
    }
}

fn field_value_json(value: &FieldValue) -> Value {
    match value {
        FieldValue::Text(text) => json!(text),
        FieldValue::Enum(option) => json!(option.as_str()),
        FieldValue::MultiEnum(options) => {
            json!(options.iter().map(OptionId::as_str).collect::<Vec<_>>())
        }
    }
}

fn update_body(update: &TaskUpdate) -> Value {
    let mut data = serde_json::Map::new();
    if let Some(name) = &update.name {
        data.insert("name".into(), json!(name));
    }
    if let Some(html) = &update.html_notes {
        data.insert("html_notes".into(), json!(html));
    }
    if let Some(notes) = &update.notes {
        data.insert("notes".into(), json!(notes));
    }
    if let Some(completed) = update.completed {
        data.insert("completed".into(), json!(completed));
    }
    if !update.custom_fields.is_empty() {
        let fields: BTreeMap<&str, Value> = update
            .custom_fields
            .iter()
            .map(|(id, value)| (id.as_str(), field_value_json(value)))
            .collect();
        data.insert("custom_fields".into(), json!(fields));
    }
    json!({ "data": data })
}

fn matches_text_field(task: &RemoteTask, field: &FieldId, value: &str) -> bool {
    matches!(task.custom_fields.get(field), Some(FieldValue::Text(text)) if text == value)
}

// ─── Client ───────────────────────────────────────────────────────────────────

impl AsanaClient {
    pub fn new(config: AsanaConfig) -> Result<Self> {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::ACCEPT,
            reqwest::header::HeaderValue::from_static("application/json"),
        );
        let auth = format!("Bearer {}", config.token.trim());
        headers.insert(
            reqwest::header::AUTHORIZATION,
            reqwest::header::HeaderValue::from_str(&auth)
                .map_err(|_| TrackerError::permanent("invalid tracker token"))?,
        );

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .user_agent(concat!("issue-mirror/", env!("CARGO_PKG_VERSION")))
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| TrackerError::from_reqwest("failed to build HTTP client", e))?;

        Ok(AsanaClient {
            http,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            workspace: config.workspace,
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.http.request(method, format!("{}{}", self.api_base, path))
    }

    /// Sends a request and unwraps the `data` envelope.
    async fn send<T: DeserializeOwned>(&self, context: &str, request: RequestBuilder) -> Result<T> {
        let response = request
            .send()
            .await
            .map_err(|e| TrackerError::from_reqwest(context, e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            debug!(context, status = status.as_u16(), "Tracker request failed");
            return Err(TrackerError::from_status(status.as_u16(), &body));
        }

        let envelope: DataEnvelope<T> = response
            .json()
            .await
            .map_err(|e| TrackerError::from_reqwest(context, e))?;
        Ok(envelope.data)
    }

    /// Follows `next_page.offset` until the listing is exhausted.
    async fn paginate<T: DeserializeOwned>(
        &self,
        context: &str,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<Vec<T>> {
        let mut items = Vec::new();
        let mut offset: Option<String> = None;

        loop {
            let mut request = self
                .request(Method::GET, path)
                .query(query)
                .query(&[("limit", PAGE_LIMIT)]);
            if let Some(offset) = &offset {
                request = request.query(&[("offset", offset.as_str())]);
            }

            let response = request
                .send()
                .await
                .map_err(|e| TrackerError::from_reqwest(context, e))?;
            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(TrackerError::from_status(status.as_u16(), &body));
            }
            let page: PageEnvelope<T> = response
                .json()
                .await
                .map_err(|e| TrackerError::from_reqwest(context, e))?;

            trace!(context, count = page.data.len(), "Fetched page");
            items.extend(page.data);
            match page.next_page {
                Some(next) => offset = Some(next.offset),
                None => return Ok(items),
            }
        }
    }

    async fn project_tasks(&self, project: &ProjectId) -> Result<Vec<RemoteTask>> {
        let raw: Vec<RawTask> = self
            .paginate(
                "list project tasks",
                &format!("/projects/{}/tasks", project),
                &[("opt_fields", TASK_FIELDS)],
            )
            .await?;
        Ok(raw.into_iter().map(RemoteTask::from).collect())
    }
}

impl TaskService for AsanaClient {
    async fn create_task(&self, task: &NewTask) -> Result<RemoteTask> {
        let body = json!({
            "data": {
                "name": task.name,
                "notes": task.notes,
                "projects": [task.project.as_str()],
            }
        });
        let raw: RawTask = self
            .send(
                "create task",
                self.request(Method::POST, "/tasks")
                    .query(&[("opt_fields", TASK_FIELDS)])
                    .json(&body),
            )
            .await?;
        Ok(raw.into())
    }

    async fn update_task(&self, id: &RemoteTaskId, update: &TaskUpdate) -> Result<RemoteTask> {
        let raw: RawTask = self
            .send(
                "update task",
                self.request(Method::PUT, &format!("/tasks/{}", id))
                    .query(&[("opt_fields", TASK_FIELDS)])
                    .json(&update_body(update)),
            )
            .await?;
        Ok(raw.into())
    }

    async fn get_task(&self, id: &RemoteTaskId) -> Result<Option<RemoteTask>> {
        let result: Result<RawTask> = self
            .send(
                "get task",
                self.request(Method::GET, &format!("/tasks/{}", id))
                    .query(&[("opt_fields", TASK_FIELDS)]),
            )
            .await;
        match result {
            Ok(raw) => Ok(Some(raw.into())),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn search_tasks(
        &self,
        project: &ProjectId,
        filter: &TaskFilter,
    ) -> Result<Vec<RemoteTask>> {
        match (filter, &self.workspace) {
            (TaskFilter::All, _) => self.project_tasks(project).await,
            (TaskFilter::FieldEquals { field, value }, Some(workspace)) => {
                let field_param = format!("custom_fields.{}.value", field);
                let raw: Vec<RawTask> = self
                    .send(
                        "search tasks",
                        self.request(Method::GET, &format!("/workspaces/{}/tasks/search", workspace))
                            .query(&[
                                ("projects.any", project.as_str()),
                                (field_param.as_str(), value.as_str()),
                                ("opt_fields", TASK_FIELDS),
                                ("limit", PAGE_LIMIT),
                            ]),
                    )
                    .await?;
                // The search endpoint matches loosely; keep exact matches only.
                Ok(raw
                    .into_iter()
                    .map(RemoteTask::from)
                    .filter(|task| matches_text_field(task, field, value))
                    .collect())
            }
            (TaskFilter::FieldEquals { field, value }, None) => Ok(self
                .project_tasks(project)
                .await?
                .into_iter()
                .filter(|task| matches_text_field(task, field, value))
                .collect()),
        }
    }

    async fn create_attachment(
        &self,
        task: &RemoteTaskId,
        upload: AttachmentUpload,
    ) -> Result<Attachment> {
        let part = multipart::Part::bytes(upload.bytes)
            .file_name(upload.filename)
            .mime_str(&upload.content_type)
            .map_err(|e| TrackerError::from_reqwest("invalid attachment content type", e))?;
        let form = multipart::Form::new()
            .text("parent", task.as_str().to_string())
            .part("file", part);

        let raw: RawAttachment = self
            .send(
                "create attachment",
                self.request(Method::POST, "/attachments").multipart(form),
            )
            .await?;
        Ok(Attachment {
            id: AttachmentId::new(raw.gid),
            name: raw.name.unwrap_or_default(),
        })
    }

    async fn list_attachments(&self, task: &RemoteTaskId) -> Result<Vec<Attachment>> {
        let raw: Vec<RawAttachment> = self
            .paginate(
                "list attachments",
                "/attachments",
                &[("parent", task.as_str()), ("opt_fields", "name")],
            )
            .await?;
        Ok(raw
            .into_iter()
            .map(|a| Attachment {
                id: AttachmentId::new(a.gid),
                name: a.name.unwrap_or_default(),
            })
            .collect())
    }

    async fn list_activity(&self, task: &RemoteTaskId) -> Result<Vec<ActivityEntry>> {
        let raw: Vec<RawStory> = self
            .paginate(
                "list stories",
                &format!("/tasks/{}/stories", task),
                &[("opt_fields", "resource_subtype,text")],
            )
            .await?;
        Ok(raw
            .into_iter()
            .map(|s| ActivityEntry {
                id: ActivityId::new(s.gid),
                subtype: s.resource_subtype.unwrap_or_default(),
                text: s.text.unwrap_or_default(),
            })
            .collect())
    }

    async fn delete_activity(&self, entry: &ActivityId) -> Result<()> {
        let _: Value = self
            .send(
                "delete story",
                self.request(Method::DELETE, &format!("/stories/{}", entry)),
            )
            .await?;
        Ok(())
    }

    async fn get_field(&self, field: &FieldId) -> Result<CustomField> {
        let raw: RawCustomField = self
            .send(
                "get custom field",
                self.request(Method::GET, &format!("/custom_fields/{}", field))
                    .query(&[(
                        "opt_fields",
                        "enum_options.name,enum_options.color,enum_options.enabled",
                    )]),
            )
            .await?;
        Ok(CustomField {
            id: FieldId::new(raw.gid),
            options: raw
                .enum_options
                .into_iter()
                .filter(|o| o.enabled != Some(false))
                .map(FieldOption::from)
                .collect(),
        })
    }

    async fn create_field_option(
        &self,
        field: &FieldId,
        name: &str,
        color: &str,
    ) -> Result<FieldOption> {
        let body = json!({ "data": { "name": name, "color": color } });
        let raw: RawEnumOption = self
            .send(
                "create enum option",
                self.request(Method::POST, &format!("/custom_fields/{}/enum_options", field))
                    .json(&body),
            )
            .await?;
        Ok(raw.into())
    }
}
