//! Durable per-session sequence watermarks.
//!
//! The stream client reads the watermark at attach time and writes it after
//! every accepted event, before the event reaches the timeline.

use crate::config::{self, ConfigError};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

const CURSOR_FILE: &str = "cursors.toml";

#[derive(Debug, Error)]
pub enum CursorError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("serialization error: {0}")]
    Toml(String),
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
}

impl From<toml::de::Error> for CursorError {
    fn from(value: toml::de::Error) -> Self {
        CursorError::Toml(value.to_string())
    }
}

impl From<toml::ser::Error> for CursorError {
    fn from(value: toml::ser::Error) -> Self {
        CursorError::Toml(value.to_string())
    }
}

pub trait CursorStore: Send + Sync {
    /// Last persisted sequence for `session_id`, `0` when none was stored.
    fn load(&self, session_id: &str) -> Result<u64, CursorError>;
    fn store(&self, session_id: &str, seq: u64) -> Result<(), CursorError>;
    fn reset(&self, session_id: &str) -> Result<(), CursorError>;
}

/// Process-local store for tests and ephemeral attaches.
#[derive(Debug, Default)]
pub struct MemoryCursorStore {
    cursors: Mutex<HashMap<String, u64>>,
}

impl MemoryCursorStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CursorStore for MemoryCursorStore {
    fn load(&self, session_id: &str) -> Result<u64, CursorError> {
        Ok(self.cursors.lock().get(session_id).copied().unwrap_or(0))
    }

    fn store(&self, session_id: &str, seq: u64) -> Result<(), CursorError> {
        self.cursors.lock().insert(session_id.to_string(), seq);
        Ok(())
    }

    fn reset(&self, session_id: &str) -> Result<(), CursorError> {
        self.cursors.lock().remove(session_id);
        Ok(())
    }
}

#[derive(Debug, Default, Deserialize)]
struct CursorFile {
    #[serde(default)]
    sessions: BTreeMap<String, u64>,
}

#[derive(Serialize)]
struct CursorFileRef<'a> {
    sessions: &'a BTreeMap<String, u64>,
}

/// TOML-backed store (`~/.rc/cursors.toml` by default).
///
/// A `store` that changes a watermark rewrites the file through a temp file +
/// rename so a crash mid-write leaves the previous watermark intact. Storing
/// the value already on disk does not touch the file.
#[derive(Debug)]
pub struct FileCursorStore {
    path: PathBuf,
    sessions: Mutex<BTreeMap<String, u64>>,
}

impl FileCursorStore {
    pub fn default_path() -> Result<PathBuf, CursorError> {
        Ok(config::state_dir()?.join(CURSOR_FILE))
    }

    pub fn open_default() -> Result<Self, CursorError> {
        Self::open(Self::default_path()?)
    }

    pub fn open(path: impl Into<PathBuf>) -> Result<Self, CursorError> {
        let path = path.into();
        let sessions = if path.exists() {
            let raw = fs::read_to_string(&path)?;
            toml::from_str::<CursorFile>(&raw)?.sessions
        } else {
            BTreeMap::new()
        };
        Ok(Self {
            path,
            sessions: Mutex::new(sessions),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, sessions: &BTreeMap<String, u64>) -> Result<(), CursorError> {
        let body = toml::to_string(&CursorFileRef { sessions })?;
        let tmp = self.path.with_extension("toml.tmp");
        config::write_private(&tmp, body.as_bytes())?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl CursorStore for FileCursorStore {
    fn load(&self, session_id: &str) -> Result<u64, CursorError> {
        Ok(self.sessions.lock().get(session_id).copied().unwrap_or(0))
    }

    fn store(&self, session_id: &str, seq: u64) -> Result<(), CursorError> {
        let mut sessions = self.sessions.lock();
        if sessions.get(session_id) == Some(&seq) {
            return Ok(());
        }
        sessions.insert(session_id.to_string(), seq);
        self.persist(&sessions)
    }

    fn reset(&self, session_id: &str) -> Result<(), CursorError> {
        let mut sessions = self.sessions.lock();
        if sessions.remove(session_id).is_some() {
            self.persist(&sessions)?;
        }
        Ok(())
    }
}
