//! Service configuration.
//!
//! The core consumes plain structs ([`SyncConfig`], [`CoordinatorConfig`]);
//! only [`AppConfig::from_env`] knows about environment variables. Every
//! custom field id is optional and enabled by presence. The project id is the
//! one hard requirement: without it nothing can be created, so loading fails
//! fast instead of surfacing on the first delivery.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use chrono_tz::Tz;
use thiserror::Error;

use crate::coordinator::RetryConfig;
use crate::tracker::AsanaConfig;
use crate::types::{FieldId, ProjectId};

/// Default zones for the timestamp line of rendered headers.
pub const DEFAULT_DISPLAY_ZONES: [Tz; 2] = [Tz::America__Los_Angeles, Tz::Europe__London];

/// Default pause after uploading images, before the description is final.
const DEFAULT_IMAGE_SETTLE_MS: u64 = 2_000;

const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:3000";
const DEFAULT_STATE_DIR: &str = "./state";

/// Errors from loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required configuration: {0}")]
    Missing(&'static str),

    #[error("invalid value for {var}: {value:?} ({reason})")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

/// Optional custom field ids on the tracker project.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldConfig {
    pub repository: Option<FieldId>,
    pub creator: Option<FieldId>,
    pub source_url: Option<FieldId>,
    pub entity_type: Option<FieldId>,
    pub labels: Option<FieldId>,
}

/// What the orchestrator, resolver and renderer need.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub project: ProjectId,
    pub fields: FieldConfig,
    pub display_zones: [Tz; 2],
    pub image_settle_delay: Duration,
}

impl SyncConfig {
    pub fn new(project: ProjectId) -> Self {
        SyncConfig {
            project,
            fields: FieldConfig::default(),
            display_zones: DEFAULT_DISPLAY_ZONES,
            image_settle_delay: Duration::from_millis(DEFAULT_IMAGE_SETTLE_MS),
        }
    }

    pub fn with_fields(mut self, fields: FieldConfig) -> Self {
        self.fields = fields;
        self
    }

    pub fn with_image_settle_delay(mut self, delay: Duration) -> Self {
        self.image_settle_delay = delay;
        self
    }
}

/// Retry and lifecycle settings for entity coordinators.
#[derive(Debug, Clone, Copy)]
pub struct CoordinatorConfig {
    pub retry: RetryConfig,
    /// Upper bound for one orchestrator attempt.
    pub attempt_timeout: Duration,
    /// Coordinators unused for this long are evicted from the registry.
    pub idle_timeout: Duration,
    /// How often the registry looks for idle coordinators.
    pub sweep_interval: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        CoordinatorConfig {
            retry: RetryConfig::DEFAULT,
            attempt_timeout: Duration::from_secs(120),
            idle_timeout: Duration::from_secs(15 * 60),
            sweep_interval: Duration::from_secs(60),
        }
    }
}

/// Everything the binary needs to start.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub listen_addr: SocketAddr,
    pub state_dir: PathBuf,
    pub webhook_secret: String,
    pub github_token: Option<String>,
    pub asana: AsanaConfig,
    pub sync: SyncConfig,
    pub coordinator: CoordinatorConfig,
}

impl AppConfig {
    /// Loads configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration through an arbitrary key lookup. Empty values
    /// count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let field = |key: &str| get(key).map(FieldId::new);

        let project = get("ASANA_PROJECT_ID")
            .map(ProjectId::new)
            .ok_or(ConfigError::Missing("ASANA_PROJECT_ID"))?;
        let token = get("ASANA_TOKEN").ok_or(ConfigError::Missing("ASANA_TOKEN"))?;
        let webhook_secret =
            get("GITHUB_WEBHOOK_SECRET").ok_or(ConfigError::Missing("GITHUB_WEBHOOK_SECRET"))?;

        let listen_raw = get("ISSUE_MIRROR_LISTEN_ADDR").unwrap_or(DEFAULT_LISTEN_ADDR.into());
        let listen_addr = listen_raw
            .parse()
            .map_err(|e: std::net::AddrParseError| ConfigError::Invalid {
                var: "ISSUE_MIRROR_LISTEN_ADDR",
                value: listen_raw.clone(),
                reason: e.to_string(),
            })?;

        let display_zones = match get("ISSUE_MIRROR_TIMEZONES") {
            Some(raw) => parse_zones(&raw)?,
            None => DEFAULT_DISPLAY_ZONES,
        };

        let fields = FieldConfig {
            repository: field("ASANA_FIELD_REPOSITORY"),
            creator: field("ASANA_FIELD_CREATOR"),
            source_url: field("ASANA_FIELD_SOURCE_URL"),
            entity_type: field("ASANA_FIELD_ENTITY_TYPE"),
            labels: field("ASANA_FIELD_LABELS"),
        };

        let mut sync = SyncConfig::new(project).with_fields(fields);
        sync.display_zones = display_zones;

        Ok(AppConfig {
            listen_addr,
            state_dir: PathBuf::from(get("ISSUE_MIRROR_STATE_DIR").unwrap_or(DEFAULT_STATE_DIR.into())),
            webhook_secret,
            github_token: get("GITHUB_TOKEN"),
            asana: AsanaConfig::new(token).with_workspace(get("ASANA_WORKSPACE_ID")),
            sync,
            coordinator: CoordinatorConfig::default(),
        })
    }
}

fn parse_zones(raw: &str) -> Result<[Tz; 2], ConfigError> {
    let invalid = |reason: String| ConfigError::Invalid {
        var: "ISSUE_MIRROR_TIMEZONES",
        value: raw.to_string(),
        reason,
    };

    let zones = raw
        .split(',')
        .map(|name| name.trim().parse::<Tz>().map_err(|e| invalid(e.to_string())))
        .collect::<Result<Vec<_>, _>>()?;

    match zones.as_slice() {
        [first, second] => Ok([*first, *second]),
        _ => Err(invalid(format!("expected two zones, got {}", zones.len()))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    const REQUIRED: [(&str, &str); 3] = [
        ("ASANA_PROJECT_ID", "1200"),
        ("ASANA_TOKEN", "tok"),
        ("GITHUB_WEBHOOK_SECRET", "s3cret"),
    ];

    #[test]
    fn minimal_config_leaves_fields_unset() {
        let config = AppConfig::from_lookup(lookup(&REQUIRED)).unwrap();
        assert_eq!(config.sync.project, ProjectId::new("1200"));
        assert_eq!(config.sync.fields, FieldConfig::default());
        assert_eq!(config.sync.display_zones, DEFAULT_DISPLAY_ZONES);
        assert_eq!(config.listen_addr.port(), 3000);
        assert!(config.github_token.is_none());
        assert!(config.asana.workspace.is_none());
    }

    #[test]
    fn missing_project_is_fatal() {
        let err = AppConfig::from_lookup(lookup(&REQUIRED[1..])).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("ASANA_PROJECT_ID")));
    }

    #[test]
    fn blank_values_count_as_unset() {
        let mut pairs = REQUIRED.to_vec();
        pairs.push(("ASANA_FIELD_LABELS", "  "));
        pairs.push(("ASANA_FIELD_SOURCE_URL", "555"));
        let config = AppConfig::from_lookup(lookup(&pairs)).unwrap();
        assert!(config.sync.fields.labels.is_none());
        assert_eq!(config.sync.fields.source_url, Some(FieldId::new("555")));
    }

    #[test]
    fn timezones_must_be_a_pair() {
        let mut pairs = REQUIRED.to_vec();
        pairs.push(("ISSUE_MIRROR_TIMEZONES", "UTC, Asia/Tokyo"));
        let config = AppConfig::from_lookup(lookup(&pairs)).unwrap();
        assert_eq!(config.sync.display_zones, [Tz::UTC, Tz::Asia__Tokyo]);

        let mut bad = REQUIRED.to_vec();
        bad.push(("ISSUE_MIRROR_TIMEZONES", "UTC"));
        assert!(matches!(
            AppConfig::from_lookup(lookup(&bad)),
            Err(ConfigError::Invalid { .. })
        ));

        let mut unknown = REQUIRED.to_vec();
        unknown.push(("ISSUE_MIRROR_TIMEZONES", "UTC,Mars/Olympus"));
        assert!(AppConfig::from_lookup(lookup(&unknown)).is_err());
    }
}
