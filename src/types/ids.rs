//! Newtype wrappers for domain identifiers.
//!
//! GitHub-side keys (`CanonicalUrl`, `RepoId`, `DeliveryId`) and tracker-side
//! gids (`RemoteTaskId`, `AttachmentId`, ...) are all strings on the wire. The
//! wrappers keep a task gid from being passed where a field gid is expected.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The stable key of a GitHub issue or pull request: its `html_url`.
///
/// Every event for the same entity carries the same canonical URL, so it is
/// used both as the coordinator key and as the value of the tracker's
/// source-URL field.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CanonicalUrl(pub String);

impl CanonicalUrl {
    pub fn new(url: impl Into<String>) -> Self {
        CanonicalUrl(url.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CanonicalUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for CanonicalUrl {
    fn from(s: &str) -> Self {
        CanonicalUrl(s.to_string())
    }
}

/// A repository identifier (owner/repo format).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RepoId {
    pub owner: String,
    pub repo: String,
}

impl RepoId {
    pub fn new(owner: impl Into<String>, repo: impl Into<String>) -> Self {
        RepoId {
            owner: owner.into(),
            repo: repo.into(),
        }
    }
}

impl fmt::Display for RepoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.repo)
    }
}

/// A GitHub webhook delivery ID (`X-GitHub-Delivery`), used for log correlation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeliveryId(pub String);

impl DeliveryId {
    pub fn new(s: impl Into<String>) -> Self {
        DeliveryId(s.into())
    }
}

impl fmt::Display for DeliveryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

macro_rules! tracker_gid {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(gid: impl Into<String>) -> Self {
                $name(gid.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                $name(s.to_string())
            }
        }
    };
}

tracker_gid!(
    /// A tracker task gid.
    RemoteTaskId
);
tracker_gid!(
    /// A tracker project gid (the collection tasks are created in).
    ProjectId
);
tracker_gid!(
    /// A tracker attachment gid.
    AttachmentId
);
tracker_gid!(
    /// A tracker activity-log (story) gid.
    ActivityId
);
tracker_gid!(
    /// A tracker custom field gid.
    FieldId
);
tracker_gid!(
    /// A tracker enum option gid within a custom field.
    OptionId
);
