//! Per-entity serialization, retry and state caching.
//!
//! Every GitHub issue or pull request gets its own [`EntityCoordinator`],
//! created on demand by the [`CoordinatorRegistry`]. A coordinator runs one
//! delivery at a time, in arrival order, and wraps each run of the
//! [`SyncProcessor`] in bounded retry with backoff.
//!
//! ```text
//!                                  ┌──────────────────────┐
//!                             ┌──► │ coordinator (url A)  │ ──► orchestrator
//! ┌──────────┐   ┌──────────┐ │    └──────────────────────┘
//! │  axum    │──►│ registry │─┤
//! └──────────┘   └──────────┘ │    ┌──────────────────────┐
//!                             └──► │ coordinator (url B)  │ ──► orchestrator
//!                                  └──────────────────────┘
//! ```
//!
//! The last resolved remote task id is the only state a coordinator keeps.
//! It lives in a [`StateStore`] so that a restart does not force a search for
//! every entity.

use std::future::Future;

use crate::orchestrator::SyncError;
use crate::types::{RemoteTaskId, SyncEvent, SyncOutcome};

mod entity;
pub mod registry;
pub mod retry;
pub mod state;


pub use entity::{CoordinatorError, EntityCoordinator};
pub use registry::CoordinatorRegistry;
pub use retry::{AttemptError, RetryConfig, retry_with_backoff};
pub use state::{
    CoordinatorState, FileStateStore, MemoryStateStore, SCHEMA_VERSION, StateStore, StoreError,
};

/// One full sync attempt for an event.
///
/// Implemented by [`crate::orchestrator::SyncOrchestrator`]. Implementations
/// must be idempotent: the coordinator re-runs them after any failure.
pub trait SyncProcessor: Send + Sync + 'static {
    fn process(
        &self,
        event: &SyncEvent,
        hint: Option<&RemoteTaskId>,
    ) -> impl Future<Output = Result<SyncOutcome, SyncError>> + Send;
}
