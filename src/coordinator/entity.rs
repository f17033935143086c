//! The per-entity critical section.

use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::config::CoordinatorConfig;
use crate::orchestrator::SyncError;
use crate::types::{CanonicalUrl, RemoteTaskId, SyncEvent, SyncResponse};

use super::SyncProcessor;
use super::retry::{AttemptError, RetriesExhausted, retry_with_backoff};
use super::state::{CoordinatorState, StateStore};

/// A delivery that could not be synced.
#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("sync of {url} failed after {attempts} attempts: {source}")]
    Exhausted {
        url: CanonicalUrl,
        attempts: u32,
        #[source]
        source: AttemptError<SyncError>,
    },
}

impl CoordinatorError {
    fn exhausted(url: &CanonicalUrl, err: RetriesExhausted<SyncError>) -> Self {
        CoordinatorError::Exhausted {
            url: url.clone(),
            attempts: err.attempts,
            source: err.last_error,
        }
    }
}

/// Serializes and retries sync work for one GitHub entity.
///
/// The tokio mutex around the state is the critical section. It is fair, so
/// deliveries run in the order they reached the coordinator, and every one
/// of them runs: no coalescing.
pub struct EntityCoordinator<P, S> {
    url: CanonicalUrl,
    processor: Arc<P>,
    store: Arc<S>,
    config: CoordinatorConfig,
    /// `None` until the first delivery loads it from the store.
    state: Mutex<Option<CoordinatorState>>,
    last_used: StdMutex<Instant>,
}

impl<P: SyncProcessor, S: StateStore> EntityCoordinator<P, S> {
    pub fn new(
        url: CanonicalUrl,
        processor: Arc<P>,
        store: Arc<S>,
        config: CoordinatorConfig,
    ) -> Self {
        EntityCoordinator {
            url,
            processor,
            store,
            config,
            state: Mutex::new(None),
            last_used: StdMutex::new(Instant::now()),
        }
    }

    pub fn url(&self) -> &CanonicalUrl {
        &self.url
    }

    /// Syncs one delivery for this entity.
    ///
    /// Waits for earlier deliveries, then runs the orchestrator with the
    /// cached remote id as a hint, retrying per the configured schedule. A
    /// changed remote id is persisted before returning.
    #[instrument(skip(self, event), fields(url = %self.url, action = %event.action))]
    pub async fn handle(&self, event: &SyncEvent) -> Result<SyncResponse, CoordinatorError> {
        self.touch();
        let mut guard = self.state.lock().await;
        if guard.is_none() {
            *guard = Some(self.load_state().await);
        }
        let state = guard.get_or_insert_with(CoordinatorState::new);

        // A failed attempt that got as far as resolving hands its task to the
        // next attempt, so a retry never searches for a task it just created.
        let hint = StdMutex::new(state.cached_remote_task_id.clone());
        let processor = &self.processor;
        let result = retry_with_backoff(self.config.retry, self.config.attempt_timeout, |attempt| {
            let hint_slot = &hint;
            let attempt_hint = hint_slot
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone();
            async move {
                debug!(attempt, hint = ?attempt_hint, "Running sync attempt");
                let result = processor.process(event, attempt_hint.as_ref()).await;
                if let Err(e) = &result
                    && let Some(task) = e.task()
                {
                    *hint_slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(task.clone());
                }
                result
            }
        })
        .await;
        self.touch();

        let outcome = result.map_err(|e| CoordinatorError::exhausted(&self.url, e))?;

        if state.record(&outcome.handle.remote_id) {
            info!(
                remote_id = %outcome.handle.remote_id,
                created = outcome.created,
                "Cached remote task id changed"
            );
            if let Err(e) = self.store.save(&self.url, state).await {
                warn!(error = %e, "Failed to persist coordinator state");
            }
        }

        Ok(SyncResponse::from(outcome))
    }

    /// The currently cached remote id, if the state has been loaded.
    pub async fn cached_remote_task_id(&self) -> Option<RemoteTaskId> {
        self.state
            .lock()
            .await
            .as_ref()
            .and_then(|s| s.cached_remote_task_id.clone())
    }

    /// Whether nothing is running and nothing has run for `idle_timeout`.
    pub fn is_idle(&self, now: Instant, idle_timeout: Duration) -> bool {
        let last_used = *self.last_used.lock().unwrap_or_else(PoisonError::into_inner);
        now.saturating_duration_since(last_used) >= idle_timeout && self.state.try_lock().is_ok()
    }

    fn touch(&self) {
        *self.last_used.lock().unwrap_or_else(PoisonError::into_inner) = Instant::now();
    }

    async fn load_state(&self) -> CoordinatorState {
        match self.store.load(&self.url).await {
            Ok(Some(state)) => {
                debug!(cached = ?state.cached_remote_task_id, "Loaded coordinator state");
                state
            }
            Ok(None) => CoordinatorState::new(),
            Err(e) => {
                warn!(error = %e, "Failed to load coordinator state, starting empty");
                CoordinatorState::new()
            }
        }
    }
}
