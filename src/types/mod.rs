//! Core domain types for the issue mirror.
//!
//! Identifiers, the canonical inbound event, and the result types shared
//! between the coordinator, orchestrator and HTTP layer.

pub mod event;
pub mod ids;
pub mod task;

pub use event::{
    Comment, EntityKind, EntityState, FileChange, FileChangeStatus, SyncAction, SyncEvent,
};
pub use ids::{
    ActivityId, AttachmentId, CanonicalUrl, DeliveryId, FieldId, OptionId, ProjectId,
    RemoteTaskId, RepoId,
};
pub use task::{
    AttachmentRecord, RemoteTaskHandle, SyncOutcome, SyncResponse, SyncResult, SyncStatus,
};
