//! Routing of sync events to per-entity coordinators.
//!
//! The registry creates an [`EntityCoordinator`] the first time a canonical
//! URL is seen and hands every later event for that URL to the same
//! instance. Different entities run fully in parallel; events for one entity
//! are serialized by its coordinator.
//!
//! # Lifecycle
//!
//! Coordinators are cheap but not free, and a busy installation sees an
//! unbounded set of URLs. A background sweeper evicts coordinators that have
//! been idle for `idle_timeout`, provided no caller holds a reference and no
//! sync is in flight. An evicted coordinator reloads its state from the store
//! the next time its URL shows up.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use crate::config::CoordinatorConfig;
use crate::types::{CanonicalUrl, SyncEvent, SyncResponse};

use super::SyncProcessor;
use super::entity::{CoordinatorError, EntityCoordinator};
use super::state::StateStore;

/// Keyed map of lazily created entity coordinators.
pub struct CoordinatorRegistry<P, S> {
    processor: Arc<P>,
    store: Arc<S>,
    config: CoordinatorConfig,
    coordinators: RwLock<HashMap<CanonicalUrl, Arc<EntityCoordinator<P, S>>>>,
    shutdown: CancellationToken,
}

impl<P: SyncProcessor, S: StateStore> CoordinatorRegistry<P, S> {
    pub fn new(processor: Arc<P>, store: Arc<S>, config: CoordinatorConfig) -> Self {
        CoordinatorRegistry {
            processor,
            store,
            config,
            coordinators: RwLock::new(HashMap::new()),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Routes `event` to the coordinator for its canonical URL and waits for
    /// the result.
    #[instrument(skip(self, event), fields(url = %event.canonical_url))]
    pub async fn dispatch(&self, event: &SyncEvent) -> Result<SyncResponse, CoordinatorError> {
        let coordinator = self.get_or_create(&event.canonical_url).await;
        coordinator.handle(event).await
    }

    /// Returns the coordinator for `url`, creating it on first use.
    pub async fn get_or_create(&self, url: &CanonicalUrl) -> Arc<EntityCoordinator<P, S>> {
        {
            let coordinators = self.coordinators.read().await;
            if let Some(coordinator) = coordinators.get(url) {
                return coordinator.clone();
            }
        }

        let mut coordinators = self.coordinators.write().await;

        // Double-check after acquiring write lock
        if let Some(coordinator) = coordinators.get(url) {
            return coordinator.clone();
        }

        debug!(url = %url, "Creating entity coordinator");
        let coordinator = Arc::new(EntityCoordinator::new(
            url.clone(),
            self.processor.clone(),
            self.store.clone(),
            self.config,
        ));
        coordinators.insert(url.clone(), coordinator.clone());
        coordinator
    }

    pub async fn len(&self) -> usize {
        self.coordinators.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.coordinators.read().await.is_empty()
    }

    pub async fn contains(&self, url: &CanonicalUrl) -> bool {
        self.coordinators.read().await.contains_key(url)
    }

    /// Drops coordinators that are idle and unreferenced. Returns how many
    /// were evicted.
    pub async fn evict_idle(&self) -> usize {
        let now = Instant::now();
        let idle_timeout = self.config.idle_timeout;
        let mut coordinators = self.coordinators.write().await;
        let before = coordinators.len();

        // Callers clone under the read lock, so holding the write lock means
        // a strong count of 1 cannot grow until we're done.
        coordinators.retain(|url, coordinator| {
            let evict = Arc::strong_count(coordinator) == 1 && coordinator.is_idle(now, idle_timeout);
            if evict {
                debug!(url = %url, "Evicting idle coordinator");
            }
            !evict
        });

        before - coordinators.len()
    }

    /// Starts the background sweeper. It stops when [`Self::shutdown`] is
    /// called or the shutdown token is cancelled.
    pub fn spawn_sweeper(self: &Arc<Self>) -> JoinHandle<()> {
        let registry = Arc::clone(self);
        let cancel = self.shutdown.child_token();
        let period = self.config.sweep_interval;

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => {
                        let evicted = registry.evict_idle().await;
                        if evicted > 0 {
                            debug!(evicted, "Swept idle coordinators");
                        }
                    }
                }
            }
            debug!("Coordinator sweeper stopped");
        })
    }

    pub fn shutdown(&self) {
        info!("Shutting down coordinator registry");
        self.shutdown.cancel();
    }
}
