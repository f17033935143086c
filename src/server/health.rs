//! Liveness probe.
//!
//! Answers 200 whenever the process is accepting connections. It makes no
//! calls to GitHub or the tracker, so it says nothing about whether syncs
//! succeed: failed syncs show up as 502 webhook answers and `Sync failed`
//! warnings in the log.

use axum::http::StatusCode;

/// `GET /health` handler.
///
/// ```text
/// GET /health HTTP/1.1
///
/// HTTP/1.1 200 OK
/// content-type: text/plain; charset=utf-8
///
/// OK
/// ```
pub async fn health_handler() -> (StatusCode, &'static str) {
    (StatusCode::OK, "OK")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn answers_ok() {
        let (status, body) = health_handler().await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "OK");
    }
}
