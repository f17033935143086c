//! Tracker API error types.
//!
//! Errors are categorized so callers can tell the cases they handle locally
//! apart from the ones that only the coordinator's retry loop deals with:
//!
//! - **NotFound** turns a hinted lookup into a search instead of a failure.
//! - **InvalidContent** triggers the orchestrator's plain-text fallback.
//! - **Transient** and **Permanent** both propagate; the coordinator retries
//!   every failure the same way, the kind only shows up in logs.

use std::fmt;
use thiserror::Error;

/// The kind of tracker API error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerErrorKind {
    /// Network failure, HTTP 5xx, or rate limiting (429).
    Transient,

    /// Any other 4xx, or an unexpected response shape.
    Permanent,

    /// HTTP 404: the task, attachment, or field does not exist.
    NotFound,

    /// HTTP 400 rejecting rich-text content as malformed.
    InvalidContent,
}

/// A tracker API error.
#[derive(Debug, Error)]
pub struct TrackerError {
    pub kind: TrackerErrorKind,

    /// The HTTP status code, if the request got that far.
    pub status_code: Option<u16>,

    pub message: String,

    #[source]
    pub source: Option<reqwest::Error>,
}

impl fmt::Display for TrackerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status_code {
            Some(code) => write!(f, "tracker API error (HTTP {}): {}", code, self.message),
            None => write!(f, "tracker API error: {}", self.message),
        }
    }
}

impl TrackerError {
    fn without_source(kind: TrackerErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            status_code: None,
            message: message.into(),
            source: None,
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::without_source(TrackerErrorKind::Transient, message)
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self::without_source(TrackerErrorKind::Permanent, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::without_source(TrackerErrorKind::NotFound, message)
    }

    pub fn invalid_content(message: impl Into<String>) -> Self {
        Self::without_source(TrackerErrorKind::InvalidContent, message)
    }

    pub fn is_not_found(&self) -> bool {
        self.kind == TrackerErrorKind::NotFound
    }

    pub fn is_invalid_content(&self) -> bool {
        self.kind == TrackerErrorKind::InvalidContent
    }

    /// Categorizes a non-success HTTP response.
    ///
    /// `body` is the raw response text; the tracker reports rich-text
    /// validation failures as a 400 whose message mentions the XML/HTML.
    pub fn from_status(status: u16, body: &str) -> Self {
        let kind = match status {
            404 => TrackerErrorKind::NotFound,
            400 if is_content_rejection(body) => TrackerErrorKind::InvalidContent,
            429 => TrackerErrorKind::Transient,
            code if (500..600).contains(&code) => TrackerErrorKind::Transient,
            _ => TrackerErrorKind::Permanent,
        };
        Self {
            kind,
            status_code: Some(status),
            message: body.chars().take(500).collect(),
            source: None,
        }
    }

    /// Categorizes a transport-level reqwest error.
    pub fn from_reqwest(context: &str, err: reqwest::Error) -> Self {
        let status_code = err.status().map(|s| s.as_u16());
        let kind = if err.is_timeout() || err.is_connect() || err.is_request() {
            TrackerErrorKind::Transient
        } else if err.is_decode() {
            TrackerErrorKind::Permanent
        } else {
            match status_code {
                Some(404) => TrackerErrorKind::NotFound,
                Some(429) => TrackerErrorKind::Transient,
                Some(code) if (500..600).contains(&code) => TrackerErrorKind::Transient,
                Some(_) => TrackerErrorKind::Permanent,
                None => TrackerErrorKind::Transient,
            }
        };
        Self {
            kind,
            status_code,
            message: format!("{context}: {err}"),
            source: Some(err),
        }
    }
}

/// Checks whether a 400 response body describes rejected rich text.
fn is_content_rejection(body: &str) -> bool {
    let lower = body.to_lowercase();
    lower.contains("xml") || lower.contains("html_notes") || lower.contains("html_text")
}
