//! Per-entity coordinator state and its persistence.
//!
//! The only thing worth remembering between deliveries is the remote task id
//! the last successful sync resolved to. It is a hint: the resolver verifies
//! it before use, so a lost or stale file only costs one extra search.
//!
//! # File Format
//!
//! [`FileStateStore`] keeps one JSON file per entity under its base directory,
//! named by the SHA-256 hex digest of the canonical URL:
//!
//! ```text
//! <state_dir>/3f2a...9c.json
//! ```
//!
//! Files are written atomically (temp file, fsync, rename, fsync directory) so
//! a crash mid-write leaves either the old state or the new one.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::future::Future;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::types::{CanonicalUrl, RemoteTaskId};

/// Current schema version. Increment when making breaking changes.
pub const SCHEMA_VERSION: u32 = 1;

/// Errors from loading or saving coordinator state.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("schema version mismatch: expected {expected}, got {got}")]
    SchemaMismatch { expected: u32, got: u32 },
}

/// Result type for state store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// What a coordinator remembers about its entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoordinatorState {
    pub schema_version: u32,

    /// The remote task the last successful sync resolved to.
    pub cached_remote_task_id: Option<RemoteTaskId>,

    /// When the cached id last changed.
    pub updated_at: Option<DateTime<Utc>>,
}

impl CoordinatorState {
    pub fn new() -> Self {
        CoordinatorState {
            schema_version: SCHEMA_VERSION,
            cached_remote_task_id: None,
            updated_at: None,
        }
    }

    /// Records a newly resolved remote id. Returns `false` if it was already
    /// the cached one.
    pub fn record(&mut self, remote_id: &RemoteTaskId) -> bool {
        if self.cached_remote_task_id.as_ref() == Some(remote_id) {
            return false;
        }
        self.cached_remote_task_id = Some(remote_id.clone());
        self.updated_at = Some(Utc::now());
        true
    }
}

impl Default for CoordinatorState {
    fn default() -> Self {
        Self::new()
    }
}

/// Durable storage for [`CoordinatorState`], keyed by canonical URL.
pub trait StateStore: Send + Sync + 'static {
    /// Loads the state for `url`; `Ok(None)` if nothing was ever saved.
    fn load(&self, url: &CanonicalUrl)
    -> impl Future<Output = Result<Option<CoordinatorState>>> + Send;

    fn save(
        &self,
        url: &CanonicalUrl,
        state: &CoordinatorState,
    ) -> impl Future<Output = Result<()>> + Send;
}

// ─── File-backed store ───

/// Stores each entity's state as a JSON file in one directory.
#[derive(Debug, Clone)]
pub struct FileStateStore {
    base: PathBuf,
}

impl FileStateStore {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        FileStateStore { base: base.into() }
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    /// Returns the file that holds the state for `url`.
    pub fn path_for(&self, url: &CanonicalUrl) -> PathBuf {
        let digest = Sha256::digest(url.as_str().as_bytes());
        self.base.join(format!("{}.json", hex::encode(digest)))
    }
}

impl StateStore for FileStateStore {
    async fn load(&self, url: &CanonicalUrl) -> Result<Option<CoordinatorState>> {
        let path = self.path_for(url);
        run_blocking(move || try_load_state(&path)).await
    }

    async fn save(&self, url: &CanonicalUrl, state: &CoordinatorState) -> Result<()> {
        let path = self.path_for(url);
        let state = state.clone();
        run_blocking(move || save_state_atomic(&path, &state)).await
    }
}

async fn run_blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| StoreError::Io(io::Error::other(e)))?
}

/// Writes `state` to `path` atomically.
///
/// 1. Write to `<path>.tmp`
/// 2. fsync the temp file
/// 3. Rename to `<path>`
/// 4. fsync the parent directory
pub fn save_state_atomic(path: &Path, state: &CoordinatorState) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let tmp_path = path.with_extension("json.tmp");
    let bytes = serde_json::to_vec_pretty(state)?;

    {
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp_path)?;
        file.write_all(&bytes)?;
        file.sync_all()?;
    }

    std::fs::rename(&tmp_path, path)?;

    if let Some(parent) = path.parent() {
        fsync_dir(parent)?;
    }

    Ok(())
}

/// Loads state from `path`, returning `None` if the file doesn't exist.
///
/// Malformed JSON and schema mismatches are errors.
pub fn try_load_state(path: &Path) -> Result<Option<CoordinatorState>> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let state: CoordinatorState = serde_json::from_slice(&bytes)?;

    if state.schema_version != SCHEMA_VERSION {
        return Err(StoreError::SchemaMismatch {
            expected: SCHEMA_VERSION,
            got: state.schema_version,
        });
    }

    Ok(Some(state))
}

/// Directory entries only survive power loss once the directory itself is
/// synced.
fn fsync_dir(dir_path: &Path) -> io::Result<()> {
    File::open(dir_path)?.sync_all()
}

// ─── In-memory store ───

/// A process-local store, for tests and ephemeral deployments.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    states: Mutex<HashMap<CanonicalUrl, CoordinatorState>>,
    fail_saves: Mutex<bool>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds the store as if a previous process had saved `state`.
    pub fn insert(&self, url: CanonicalUrl, state: CoordinatorState) {
        self.states
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(url, state);
    }

    pub fn get(&self, url: &CanonicalUrl) -> Option<CoordinatorState> {
        self.states
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(url)
            .cloned()
    }

    /// Makes every subsequent save fail with an IO error.
    pub fn set_fail_saves(&self, fail: bool) {
        *self.fail_saves.lock().unwrap_or_else(PoisonError::into_inner) = fail;
    }
}

impl StateStore for MemoryStateStore {
    async fn load(&self, url: &CanonicalUrl) -> Result<Option<CoordinatorState>> {
        Ok(self.get(url))
    }

    async fn save(&self, url: &CanonicalUrl, state: &CoordinatorState) -> Result<()> {
        if *self.fail_saves.lock().unwrap_or_else(PoisonError::into_inner) {
            return Err(StoreError::Io(io::Error::other("injected save failure")));
        }
        self.insert(url.clone(), state.clone());
        Ok(())
    }
}
