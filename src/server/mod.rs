//! HTTP ingestion boundary.
//!
//! # Endpoints
//!
//! - `POST /webhook`: GitHub deliveries, synced before answering
//! - `GET /health`: 200 while the server is running

use std::sync::Arc;

use crate::coordinator::{CoordinatorRegistry, StateStore, SyncProcessor};
use crate::github::ConversationSource;

pub mod health;
pub mod signature;
pub mod webhook;

pub use health::health_handler;
pub use webhook::{WebhookError, webhook_handler};

/// Shared handler state: the coordinator registry, the history source, and
/// the webhook secret.
pub struct AppState<P, S, C> {
    inner: Arc<AppStateInner<P, S, C>>,
}

struct AppStateInner<P, S, C> {
    registry: Arc<CoordinatorRegistry<P, S>>,
    history: Arc<C>,
    webhook_secret: Vec<u8>,
}

// Manual impl: a derive would require the type parameters to be `Clone`.
impl<P, S, C> Clone for AppState<P, S, C> {
    fn clone(&self) -> Self {
        AppState {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<P: SyncProcessor, S: StateStore, C: ConversationSource> AppState<P, S, C> {
    pub fn new(
        registry: Arc<CoordinatorRegistry<P, S>>,
        history: Arc<C>,
        webhook_secret: impl Into<Vec<u8>>,
    ) -> Self {
        AppState {
            inner: Arc::new(AppStateInner {
                registry,
                history,
                webhook_secret: webhook_secret.into(),
            }),
        }
    }

    pub fn registry(&self) -> &Arc<CoordinatorRegistry<P, S>> {
        &self.inner.registry
    }

    pub fn history(&self) -> &C {
        &self.inner.history
    }

    pub fn webhook_secret(&self) -> &[u8] {
        &self.inner.webhook_secret
    }
}

pub fn build_router<P, S, C>(app_state: AppState<P, S, C>) -> axum::Router
where
    P: SyncProcessor,
    S: StateStore,
    C: ConversationSource,
{
    use axum::routing::{get, post};

    axum::Router::new()
        .route("/webhook", post(webhook_handler::<P, S, C>))
        .route("/health", get(health_handler))
        .with_state(app_state)
}
