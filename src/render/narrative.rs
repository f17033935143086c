//! Assembling the markdown narrative for a task description.
//!
//! ```text
//! **Author:** @octocat
//! **Created:** 2023-11-14 14:13 PST / 2023-11-14 22:13 GMT
//! **Source:** <https://github.com/acme/widgets/issues/7>
//!
//! <body>
//!
//! ### Files changed          (pull requests)
//! ...
//!
//! ---
//!
//! ### Conversation           (every action except opened)
//! ...
//! ```
//!
//! The `Source:` line doubles as the marker the resolver's legacy text search
//! looks for. [`is_source_line`] accepts it in every form it can be stored
//! in: the plain line written at creation, the tracker's text rendering of
//! the HTML header, and the raw markdown of the plain-text fallback.

use chrono::{DateTime, Utc};
use chrono_tz::Tz;

use crate::types::{CanonicalUrl, Comment, EntityKind, FileChange, FileChangeStatus, SyncEvent};

const EMPTY_BODY: &str = "*No description provided.*";

const STATUS_ORDER: [FileChangeStatus; 4] = [
    FileChangeStatus::Added,
    FileChangeStatus::Modified,
    FileChangeStatus::Renamed,
    FileChangeStatus::Removed,
];

/// Builds the full markdown narrative for `event`.
pub fn build(event: &SyncEvent, zones: &[Tz; 2]) -> String {
    let mut out = String::new();
    header_block(
        &mut out,
        &event.author,
        event.created_at,
        zones,
        Some(&event.canonical_url),
    );
    push_body(&mut out, &event.body_markdown);

    if event.entity_kind == EntityKind::PullRequest && !event.file_changes.is_empty() {
        file_changes_section(&mut out, &event.file_changes);
    }

    if event.includes_conversation() && !event.comments.is_empty() {
        conversation_section(&mut out, &event.comments, zones);
    }

    out.truncate(out.trim_end().len());
    out
}

/// The plain-text marker line for a canonical URL.
pub fn source_line(url: &CanonicalUrl) -> String {
    format!("Source: {url}")
}

/// Whether a line of task notes marks the task as mirroring `url`.
///
/// Matches `Source: <url>` with or without markdown emphasis on the label
/// and angle brackets around the URL.
pub fn is_source_line(line: &str, url: &CanonicalUrl) -> bool {
    let line = line.trim();
    let rest = match line.strip_prefix("**Source:**") {
        Some(rest) => rest,
        None => match line.strip_prefix("Source:") {
            Some(rest) => rest,
            None => return false,
        },
    };
    let rest = rest.trim();
    let target = rest
        .strip_prefix('<')
        .and_then(|r| r.strip_suffix('>'))
        .unwrap_or(rest);
    target == url.as_str()
}

/// Formats `at` in both display zones: `2023-11-14 14:13 PST / 2023-11-14 22:13 GMT`.
pub fn format_timestamp(at: DateTime<Utc>, zones: &[Tz; 2]) -> String {
    zones
        .iter()
        .map(|tz| at.with_timezone(tz).format("%Y-%m-%d %H:%M %Z").to_string())
        .collect::<Vec<_>>()
        .join(" / ")
}

fn header_block(
    out: &mut String,
    author: &str,
    at: DateTime<Utc>,
    zones: &[Tz; 2],
    source: Option<&CanonicalUrl>,
) {
    out.push_str(&format!("**Author:** @{author}\n"));
    out.push_str(&format!("**Created:** {}\n", format_timestamp(at, zones)));
    if let Some(url) = source {
        out.push_str(&format!("**Source:** <{url}>\n"));
    }
    out.push('\n');
}

fn push_body(out: &mut String, body: &str) {
    let body = body.trim();
    out.push_str(if body.is_empty() { EMPTY_BODY } else { body });
    out.push_str("\n\n");
}

fn file_changes_section(out: &mut String, changes: &[FileChange]) {
    out.push_str(&format!("### Files changed ({})\n\n", changes.len()));
    for status in STATUS_ORDER {
        let group: Vec<&FileChange> = changes.iter().filter(|c| c.status == status).collect();
        if group.is_empty() {
            continue;
        }
        out.push_str(&format!("**{}**\n\n", status.heading()));
        for change in group {
            let path = match &change.previous_path {
                Some(previous) if change.status == FileChangeStatus::Renamed => {
                    format!("`{previous}` → `{}`", change.path)
                }
                _ => format!("`{}`", change.path),
            };
            out.push_str(&format!(
                "- {path} (+{} -{})\n",
                change.additions, change.deletions
            ));
        }
        out.push('\n');
    }
}

fn conversation_section(out: &mut String, comments: &[Comment], zones: &[Tz; 2]) {
    let mut sorted: Vec<&Comment> = comments.iter().collect();
    sorted.sort_by_key(|c| c.created_at);

    out.push_str("---\n\n### Conversation\n\n");
    for comment in sorted {
        header_block(out, &comment.author, comment.created_at, zones, None);
        push_body(out, &comment.body);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_DISPLAY_ZONES;
    use crate::test_utils::{comment, issue_event, ts};
    use crate::types::SyncAction;

    #[test]
    fn timestamp_in_both_zones() {
        assert_eq!(
            format_timestamp(ts(0), &DEFAULT_DISPLAY_ZONES),
            "2023-11-14 14:13 PST / 2023-11-14 22:13 GMT"
        );
    }

    #[test]
    fn header_then_body() {
        let narrative = build(&issue_event(SyncAction::Opened), &DEFAULT_DISPLAY_ZONES);
        let lines: Vec<&str> = narrative.lines().collect();
        assert_eq!(lines[0], "**Author:** @octocat");
        assert!(lines[1].starts_with("**Created:** 2023-11-14"));
        assert_eq!(
            lines[2],
            "**Source:** <https://github.com/acme/widgets/issues/7>"
        );
        assert_eq!(lines[4], "It *falls* over.");
        assert_eq!(lines.len(), 5);
    }

    #[test]
    fn source_line_matches_every_stored_form() {
        let url = CanonicalUrl::new("https://github.com/acme/widgets/issues/7");
        assert!(is_source_line(&source_line(&url), &url));
        assert!(is_source_line("  Source: https://github.com/acme/widgets/issues/7 ", &url));
        assert!(is_source_line("**Source:** <https://github.com/acme/widgets/issues/7>", &url));
        assert!(is_source_line("Source: <https://github.com/acme/widgets/issues/7>", &url));

        let narrative = build(&issue_event(SyncAction::Opened), &DEFAULT_DISPLAY_ZONES);
        assert!(narrative.lines().any(|line| is_source_line(line, &url)));

        assert!(!is_source_line("Source: https://github.com/acme/widgets/issues/70", &url));
        assert!(!is_source_line("See Source: https://github.com/acme/widgets/issues/7", &url));
        assert!(!is_source_line("**Source:** <https://github.com/acme/widgets/issues/7", &url));
    }

    #[test]
    fn empty_body_gets_placeholder() {
        let mut event = issue_event(SyncAction::Opened);
        event.body_markdown = "  \n".into();
        assert!(build(&event, &DEFAULT_DISPLAY_ZONES).ends_with(EMPTY_BODY));
    }

    #[test]
    fn opened_event_omits_conversation() {
        let mut event = issue_event(SyncAction::Opened);
        event.comments = vec![comment("hubot", 10, "first!")];
        assert!(!build(&event, &DEFAULT_DISPLAY_ZONES).contains("first!"));
    }

    #[test]
    fn comments_are_chronological() {
        let mut event = issue_event(SyncAction::CommentCreated);
        event.comments = vec![
            comment("late", 200, "second"),
            comment("early", 100, "first"),
        ];
        let narrative = build(&event, &DEFAULT_DISPLAY_ZONES);
        let first = narrative.find("first").unwrap();
        let second = narrative.find("second").unwrap();
        assert!(first < second);
        assert!(narrative.contains("**Author:** @early"));
        assert!(narrative.contains("### Conversation"));
    }

    #[test]
    fn pull_request_lists_file_changes_by_status() {
        let mut event = issue_event(SyncAction::Edited);
        event.entity_kind = EntityKind::PullRequest;
        event.file_changes = vec![
            FileChange {
                path: "src/gone.rs".into(),
                previous_path: None,
                status: FileChangeStatus::Removed,
                additions: 0,
                deletions: 40,
            },
            FileChange {
                path: "src/new.rs".into(),
                previous_path: None,
                status: FileChangeStatus::Added,
                additions: 12,
                deletions: 0,
            },
            FileChange {
                path: "src/lib2.rs".into(),
                previous_path: Some("src/lib.rs".into()),
                status: FileChangeStatus::Renamed,
                additions: 1,
                deletions: 1,
            },
        ];
        let narrative = build(&event, &DEFAULT_DISPLAY_ZONES);

        assert!(narrative.contains("### Files changed (3)"));
        assert!(narrative.contains("- `src/new.rs` (+12 -0)"));
        assert!(narrative.contains("- `src/lib.rs` → `src/lib2.rs` (+1 -1)"));
        let added = narrative.find("**Added**").unwrap();
        let renamed = narrative.find("**Renamed**").unwrap();
        let deleted = narrative.find("**Deleted**").unwrap();
        assert!(added < renamed && renamed < deleted);
        assert!(!narrative.contains("**Modified**"));
    }

    #[test]
    fn issues_never_list_file_changes() {
        let mut event = issue_event(SyncAction::Edited);
        event.file_changes = vec![FileChange {
            path: "x".into(),
            previous_path: None,
            status: FileChangeStatus::Added,
            additions: 1,
            deletions: 0,
        }];
        assert!(!build(&event, &DEFAULT_DISPLAY_ZONES).contains("Files changed"));
    }
}
