//! `POST /webhook`: verify, parse, complete, dispatch, answer.
//!
//! The delivery is processed before answering: the response carries the sync
//! result, and a failed sync answers 502 so GitHub records the delivery as
//! failed and it can be redelivered.
//!
//! The sync itself runs on its own task. GitHub stops waiting after about ten
//! seconds and a full retry schedule takes longer; when the connection goes
//! away hyper drops the handler, but the spawned sync keeps going and logs
//! its own outcome.
//!
//! | outcome | status |
//! |---|---|
//! | synced | 200, `{"status": "processed", ...}` |
//! | irrelevant event or action | 200, `{"status": "ignored", ...}` |
//! | missing header, malformed payload | 400 |
//! | bad signature | 401 |
//! | history fetch or sync failed | 502, `{"status": "failed", "error": ...}` |
//! | sync task panicked | 500 |

use std::sync::Arc;

use axum::Json;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;
use tokio::task::JoinError;
use tracing::{debug, info, warn};

use super::AppState;
use super::signature::verify_signature;
use crate::coordinator::{CoordinatorError, StateStore, SyncProcessor};
use crate::github::{self, ConversationSource, HistoryError, Parsed, PayloadError};
use crate::types::{DeliveryId, SyncResponse};

const HEADER_EVENT: &str = "x-github-event";
const HEADER_DELIVERY: &str = "x-github-delivery";
const HEADER_SIGNATURE: &str = "x-hub-signature-256";

#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("missing required header: {0}")]
    MissingHeader(&'static str),

    #[error("invalid signature")]
    InvalidSignature,

    #[error("invalid payload: {0}")]
    Payload(#[from] PayloadError),

    #[error("fetching history: {0}")]
    History(#[from] HistoryError),

    #[error(transparent)]
    Sync(#[from] CoordinatorError),

    #[error("sync task aborted: {0}")]
    Aborted(#[from] JoinError),
}

impl IntoResponse for WebhookError {
    fn into_response(self) -> Response {
        let status = match &self {
            WebhookError::MissingHeader(_) | WebhookError::Payload(_) => StatusCode::BAD_REQUEST,
            WebhookError::InvalidSignature => StatusCode::UNAUTHORIZED,
            WebhookError::History(_) | WebhookError::Sync(_) => StatusCode::BAD_GATEWAY,
            WebhookError::Aborted(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status == StatusCode::BAD_GATEWAY {
            let body = json!({ "status": "failed", "error": self.to_string() });
            return (status, Json(body)).into_response();
        }
        (status, self.to_string()).into_response()
    }
}

pub async fn webhook_handler<P, S, C>(
    State(app_state): State<AppState<P, S, C>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<SyncResponse>, WebhookError>
where
    P: SyncProcessor,
    S: StateStore,
    C: ConversationSource,
{
    let event_name = get_header(&headers, HEADER_EVENT)?;
    let signature = get_header(&headers, HEADER_SIGNATURE)?;
    let delivery = DeliveryId::new(get_header(&headers, HEADER_DELIVERY).unwrap_or_default());

    if !verify_signature(&body, &signature, app_state.webhook_secret()) {
        warn!(delivery = %delivery, "Invalid webhook signature");
        return Err(WebhookError::InvalidSignature);
    }

    let event = match github::parse(&event_name, &body)? {
        Parsed::Event(event) => *event,
        Parsed::Ignored(reason) => {
            debug!(delivery = %delivery, event = %event_name, reason = %reason, "Ignoring delivery");
            return Ok(Json(SyncResponse::ignored(reason)));
        }
    };
    info!(
        delivery = %delivery,
        url = %event.canonical_url,
        action = %event.action,
        "Received delivery"
    );

    let event = github::attach_history(app_state.history(), event)
        .await
        .inspect_err(|e| warn!(delivery = %delivery, error = %e, "History fetch failed"))?;

    let registry = Arc::clone(app_state.registry());
    let sync = tokio::spawn(async move {
        let result = registry.dispatch(&event).await;
        match &result {
            Ok(response) => debug!(
                delivery = %delivery,
                remote_id = ?response.remote_task_id,
                "Sync finished"
            ),
            Err(e) => warn!(delivery = %delivery, error = %e, "Sync failed"),
        }
        result
    });
    let response = sync.await??;
    Ok(Json(response))
}

fn get_header(headers: &HeaderMap, name: &'static str) -> Result<String, WebhookError> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .ok_or(WebhookError::MissingHeader(name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_header_present_and_missing() {
        let mut headers = HeaderMap::new();
        headers.insert(HEADER_EVENT, "issues".parse().unwrap());
        assert_eq!(get_header(&headers, HEADER_EVENT).unwrap(), "issues");
        assert!(matches!(
            get_header(&headers, HEADER_SIGNATURE),
            Err(WebhookError::MissingHeader(HEADER_SIGNATURE))
        ));
    }

    #[test]
    fn error_statuses() {
        let status = |e: WebhookError| e.into_response().status();
        assert_eq!(status(WebhookError::InvalidSignature), StatusCode::UNAUTHORIZED);
        assert_eq!(status(WebhookError::MissingHeader(HEADER_EVENT)), StatusCode::BAD_REQUEST);
        let json_err = serde_json::from_slice::<serde_json::Value>(b"{").unwrap_err();
        assert_eq!(
            status(WebhookError::Payload(PayloadError::Json(json_err))),
            StatusCode::BAD_REQUEST
        );
    }

    #[tokio::test]
    async fn panicked_sync_is_500() {
        let join_err = tokio::spawn(async { Option::<()>::None.expect("sync blew up") })
            .await
            .unwrap_err();
        let response = WebhookError::Aborted(join_err).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
