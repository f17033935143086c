//! Mapping a canonical GitHub URL to exactly one tracker task.
//!
//! Lookup order, first hit wins:
//!
//! 1. the hinted id (the coordinator's cache), if the task still exists
//! 2. a search of the project for the task whose source-URL field equals the
//!    canonical URL; without that field, a scan of task notes for the
//!    `Source: <url>` line
//! 3. creation
//!
//! Identity fields (source URL, repository, creator, entity type, labels)
//! are written on every resolution, found or created, so a task that was
//! edited by hand or created before a field existed converges. A field that
//! fails to write is logged and skipped; only creation failures are fatal.

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::config::FieldConfig;
use crate::fields::FieldMapper;
use crate::render::narrative::{is_source_line, source_line};
use crate::tracker::{FieldValue, NewTask, RemoteTask, TaskFilter, TaskService, TaskUpdate, TrackerError};
use crate::types::{
    CanonicalUrl, EntityKind, FieldId, ProjectId, RemoteTaskHandle, RemoteTaskId, SyncEvent,
};

/// Resolution failed.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("looking up task: {0}")]
    Lookup(#[source] TrackerError),

    #[error("creating task: {0}")]
    Create(#[source] TrackerError),
}

/// What identifies the mirrored entity, written to the task's custom fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityAttributes {
    pub task_name: String,
    pub repository: String,
    pub creator: String,
    pub entity_kind: EntityKind,
    pub labels: Vec<String>,
}

impl IdentityAttributes {
    pub fn from_event(event: &SyncEvent) -> Self {
        IdentityAttributes {
            task_name: event.task_name(),
            repository: event.repository.repo.clone(),
            creator: event.author.clone(),
            entity_kind: event.entity_kind,
            labels: event.labels.iter().cloned().collect(),
        }
    }
}

/// A resolved task and whether this resolution created it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub handle: RemoteTaskHandle,
    pub created: bool,
}

pub struct TaskResolver<T> {
    tracker: Arc<T>,
    project: ProjectId,
    fields: FieldConfig,
}

impl<T: TaskService> TaskResolver<T> {
    pub fn new(tracker: Arc<T>, project: ProjectId, fields: FieldConfig) -> Self {
        TaskResolver {
            tracker,
            project,
            fields,
        }
    }

    /// Finds or creates the task mirroring `url`.
    #[instrument(skip(self, attributes), fields(url = %url, hint = ?hint))]
    pub async fn resolve(
        &self,
        url: &CanonicalUrl,
        hint: Option<&RemoteTaskId>,
        attributes: &IdentityAttributes,
    ) -> Result<Resolution, ResolveError> {
        let found = match self.lookup_hint(hint).await? {
            Some(task) => Some(task),
            None => self.search(url).await?,
        };

        let (task, created) = match found {
            Some(task) => (task, false),
            None => {
                let task = self
                    .tracker
                    .create_task(&NewTask {
                        project: self.project.clone(),
                        name: attributes.task_name.clone(),
                        notes: source_line(url),
                    })
                    .await
                    .map_err(ResolveError::Create)?;
                info!(remote_id = %task.id, "Created task");
                (task, true)
            }
        };

        self.write_identity(&task.id, url, attributes).await;

        Ok(Resolution {
            handle: RemoteTaskHandle {
                remote_id: task.id,
                permalink: task.permalink,
            },
            created,
        })
    }

    async fn lookup_hint(&self, hint: Option<&RemoteTaskId>) -> Result<Option<RemoteTask>, ResolveError> {
        let Some(id) = hint else {
            return Ok(None);
        };
        match self.tracker.get_task(id).await {
            Ok(Some(task)) => Ok(Some(task)),
            Ok(None) => {
                info!(remote_id = %id, "Hinted task no longer exists");
                Ok(None)
            }
            Err(e) if e.is_not_found() => {
                info!(remote_id = %id, "Hinted task no longer exists");
                Ok(None)
            }
            Err(e) => Err(ResolveError::Lookup(e)),
        }
    }

    async fn search(&self, url: &CanonicalUrl) -> Result<Option<RemoteTask>, ResolveError> {
        let matches = match &self.fields.source_url {
            Some(field) => {
                let filter = TaskFilter::FieldEquals {
                    field: field.clone(),
                    value: url.as_str().to_string(),
                };
                self.tracker
                    .search_tasks(&self.project, &filter)
                    .await
                    .map_err(ResolveError::Lookup)?
            }
            None => {
                self.tracker
                    .search_tasks(&self.project, &TaskFilter::All)
                    .await
                    .map_err(ResolveError::Lookup)?
                    .into_iter()
                    .filter(|task| task.notes.lines().any(|line| is_source_line(line, url)))
                    .collect()
            }
        };

        if matches.len() > 1 {
            warn!(
                count = matches.len(),
                chosen = %matches[0].id,
                "Several tasks mirror this URL, using the first"
            );
        }
        if let Some(task) = matches.first() {
            debug!(remote_id = %task.id, "Found existing task");
        }
        Ok(matches.into_iter().next())
    }

    /// Writes every configured identity field, one update per field.
    async fn write_identity(&self, task: &RemoteTaskId, url: &CanonicalUrl, attributes: &IdentityAttributes) {
        let mapper = FieldMapper::new(&*self.tracker);

        if let Some(field) = &self.fields.source_url {
            self.write_field(task, field, async {
                Ok(FieldValue::Text(url.as_str().to_string()))
            })
            .await;
        }

        let enums = [
            (&self.fields.repository, attributes.repository.as_str()),
            (&self.fields.creator, attributes.creator.as_str()),
            (&self.fields.entity_type, attributes.entity_kind.label()),
        ];
        for (field, value) in enums {
            let Some(field) = field else {
                continue;
            };
            if value.is_empty() {
                continue;
            }
            self.write_field(task, field, async {
                mapper.resolve_option(field, value).await.map(FieldValue::Enum)
            })
            .await;
        }

        if let Some(field) = &self.fields.labels {
            self.write_field(task, field, async {
                mapper
                    .resolve_multi_option(field, attributes.labels.iter().map(String::as_str))
                    .await
                    .map(FieldValue::MultiEnum)
            })
            .await;
        }
    }

    async fn write_field<F>(&self, task: &RemoteTaskId, field: &FieldId, value: F)
    where
        F: Future<Output = Result<FieldValue, TrackerError>>,
    {
        let result = match value.await {
            Ok(value) => {
                let update = TaskUpdate::default().with_field(field.clone(), value);
                self.tracker.update_task(task, &update).await.map(|_| ())
            }
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            warn!(field = %field, error = %e, "Skipping identity field");
        }
    }
}
