//! Webhook payload parsing.
//!
//! Turns an `X-GitHub-Event` name plus raw JSON into a [`SyncEvent`] without
//! conversation history; [`super::attach_history`] fills that in.
//!
//! | event | actions | entity |
//! |---|---|---|
//! | `issues` | opened, edited, closed, reopened | issue |
//! | `pull_request` | opened, edited, closed, reopened | pull request |
//! | `issue_comment` | created | the parent issue or pull request |
//!
//! Anything else parses to [`Parsed::Ignored`]. Malformed JSON for a handled
//! event is an error.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use thiserror::Error;

use crate::types::{CanonicalUrl, EntityKind, EntityState, RepoId, SyncAction, SyncEvent};

#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid field value for {field}: {value}")]
    InvalidField { field: &'static str, value: String },
}

/// The outcome of parsing one delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Parsed {
    Event(Box<SyncEvent>),
    /// Not an event this service mirrors; carries the reason.
    Ignored(String),
}

/// Parses a webhook payload.
pub fn parse(event_name: &str, payload: &[u8]) -> Result<Parsed, PayloadError> {
    match event_name {
        "issues" => {
            let raw: RawIssuesEvent = serde_json::from_slice(payload)?;
            let Some(action) = lifecycle_action(&raw.action) else {
                return Ok(ignored_action(event_name, &raw.action));
            };
            entity_event(EntityKind::Issue, action, raw.issue, raw.repository)
        }
        "pull_request" => {
            let raw: RawPullRequestEvent = serde_json::from_slice(payload)?;
            let Some(action) = lifecycle_action(&raw.action) else {
                return Ok(ignored_action(event_name, &raw.action));
            };
            entity_event(EntityKind::PullRequest, action, raw.pull_request, raw.repository)
        }
        "issue_comment" => {
            let raw: RawIssueCommentEvent = serde_json::from_slice(payload)?;
            if raw.action != "created" {
                return Ok(ignored_action(event_name, &raw.action));
            }
            // Comments on pull requests arrive as issue comments whose issue
            // carries a `pull_request` key.
            let kind = if raw.issue.pull_request.is_some() {
                EntityKind::PullRequest
            } else {
                EntityKind::Issue
            };
            entity_event(kind, SyncAction::CommentCreated, raw.issue, raw.repository)
        }
        other => Ok(Parsed::Ignored(format!("unsupported event: {other}"))),
    }
}

fn lifecycle_action(action: &str) -> Option<SyncAction> {
    match action {
        "opened" => Some(SyncAction::Opened),
        "edited" => Some(SyncAction::Edited),
        "closed" => Some(SyncAction::Closed),
        "reopened" => Some(SyncAction::Reopened),
        _ => None,
    }
}

fn ignored_action(event_name: &str, action: &str) -> Parsed {
    Parsed::Ignored(format!("unsupported action: {event_name}.{action}"))
}

fn entity_event(
    kind: EntityKind,
    action: SyncAction,
    entity: RawEntity,
    repository: RawRepository,
) -> Result<Parsed, PayloadError> {
    let state = match entity.state.as_str() {
        "open" => EntityState::Open,
        "closed" => EntityState::Closed,
        other => {
            return Err(PayloadError::InvalidField {
                field: "state",
                value: other.to_string(),
            });
        }
    };
    if !entity.html_url.starts_with("https://") {
        return Err(PayloadError::InvalidField {
            field: "html_url",
            value: entity.html_url,
        });
    }

    Ok(Parsed::Event(Box::new(SyncEvent {
        entity_kind: kind,
        action,
        canonical_url: CanonicalUrl::new(entity.html_url),
        repository: RepoId::new(repository.owner.login, repository.name),
        number: entity.number,
        title: entity.title,
        body_markdown: entity.body.unwrap_or_default(),
        author: entity.user.login,
        labels: entity.labels.into_iter().map(|l| l.name).collect::<BTreeSet<_>>(),
        state,
        created_at: entity.created_at,
        comments: Vec::new(),
        file_changes: Vec::new(),
    })))
}

// ─── Raw payload structures ───
//
// Only the fields we read. Unknown fields are ignored by serde.

#[derive(Debug, Deserialize)]
struct RawRepository {
    owner: RawUser,
    name: String,
}

#[derive(Debug, Deserialize)]
struct RawUser {
    login: String,
}

#[derive(Debug, Deserialize)]
struct RawLabel {
    name: String,
}

/// The shared shape of `issue` and `pull_request` objects.
#[derive(Debug, Deserialize)]
struct RawEntity {
    number: u64,
    title: String,
    body: Option<String>,
    html_url: String,
    user: RawUser,
    #[serde(default)]
    labels: Vec<RawLabel>,
    state: String,
    created_at: DateTime<Utc>,
    pull_request: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct RawIssuesEvent {
    action: String,
    issue: RawEntity,
    repository: RawRepository,
}

#[derive(Debug, Deserialize)]
struct RawPullRequestEvent {
    action: String,
    pull_request: RawEntity,
    repository: RawRepository,
}

#[derive(Debug, Deserialize)]
struct RawIssueCommentEvent {
    action: String,
    issue: RawEntity,
    repository: RawRepository,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entity(url: &str) -> serde_json::Value {
        json!({
            "number": 7,
            "title": "Widget falls over",
            "body": null,
            "html_url": url,
            "user": { "login": "octocat", "id": 1 },
            "labels": [{ "name": "bug" }, { "name": "ui" }],
            "state": "open",
            "created_at": "2023-11-14T22:13:20Z"
        })
    }

    fn repository() -> serde_json::Value {
        json!({ "owner": { "login": "acme" }, "name": "widgets", "full_name": "acme/widgets" })
    }

    fn event(parsed: Parsed) -> SyncEvent {
        match parsed {
            Parsed::Event(event) => *event,
            Parsed::Ignored(reason) => panic!("ignored: {reason}"),
        }
    }

    #[test]
    fn issue_opened() {
        let payload = json!({
            "action": "opened",
            "issue": entity("https://github.com/acme/widgets/issues/7"),
            "repository": repository(),
        });
        let event = event(parse("issues", payload.to_string().as_bytes()).unwrap());

        assert_eq!(event.entity_kind, EntityKind::Issue);
        assert_eq!(event.action, SyncAction::Opened);
        assert_eq!(event.canonical_url.as_str(), "https://github.com/acme/widgets/issues/7");
        assert_eq!(event.repository, RepoId::new("acme", "widgets"));
        assert_eq!(event.body_markdown, "");
        assert_eq!(event.state, EntityState::Open);
        assert_eq!(event.labels, BTreeSet::from(["bug".into(), "ui".into()]));
        assert_eq!(event.task_name(), "[widgets#7] Widget falls over");
    }

    #[test]
    fn pull_request_closed() {
        let mut pr = entity("https://github.com/acme/widgets/pull/9");
        pr["state"] = json!("closed");
        let payload = json!({ "action": "closed", "pull_request": pr, "repository": repository() });
        let event = event(parse("pull_request", payload.to_string().as_bytes()).unwrap());

        assert_eq!(event.entity_kind, EntityKind::PullRequest);
        assert_eq!(event.action, SyncAction::Closed);
        assert_eq!(event.state, EntityState::Closed);
    }

    #[test]
    fn comment_on_pull_request_targets_the_pull_request() {
        let mut issue = entity("https://github.com/acme/widgets/pull/9");
        issue["pull_request"] = json!({ "url": "https://api.github.com/repos/acme/widgets/pulls/9" });
        let payload = json!({
            "action": "created",
            "issue": issue,
            "comment": { "id": 5, "body": "LGTM", "user": { "login": "hubot" } },
            "repository": repository(),
        });
        let event = event(parse("issue_comment", payload.to_string().as_bytes()).unwrap());

        assert_eq!(event.entity_kind, EntityKind::PullRequest);
        assert_eq!(event.action, SyncAction::CommentCreated);
        assert_eq!(event.canonical_url.as_str(), "https://github.com/acme/widgets/pull/9");
    }

    #[test]
    fn unsupported_events_and_actions_are_ignored() {
        assert_eq!(
            parse("push", b"{}").unwrap(),
            Parsed::Ignored("unsupported event: push".into())
        );

        let payload = json!({
            "action": "labeled",
            "issue": entity("https://github.com/acme/widgets/issues/7"),
            "repository": repository(),
        });
        assert_eq!(
            parse("issues", payload.to_string().as_bytes()).unwrap(),
            Parsed::Ignored("unsupported action: issues.labeled".into())
        );

        let edited_comment = json!({
            "action": "edited",
            "issue": entity("https://github.com/acme/widgets/issues/7"),
            "repository": repository(),
        });
        assert!(matches!(
            parse("issue_comment", edited_comment.to_string().as_bytes()).unwrap(),
            Parsed::Ignored(_)
        ));
    }

    #[test]
    fn malformed_payloads_are_errors() {
        assert!(matches!(parse("issues", b"not json"), Err(PayloadError::Json(_))));
        assert!(matches!(
            parse("issues", br#"{"action": "opened"}"#),
            Err(PayloadError::Json(_))
        ));

        let mut issue = entity("https://github.com/acme/widgets/issues/7");
        issue["state"] = json!("merged");
        let payload = json!({ "action": "opened", "issue": issue, "repository": repository() });
        assert!(matches!(
            parse("issues", payload.to_string().as_bytes()),
            Err(PayloadError::InvalidField { field: "state", .. })
        ));
    }
}
