//! Durable EMA state.
//!
//! The supervisor loads its state once at startup and saves after every
//! committed cycle. A missing file is a cold start, not an error.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use thiserror::Error;
use tracing::debug;

use crate::supervisor::EmaSnapshot;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("state io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("state file {path} is not valid: {source}")]
    Format {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

pub trait EmaStore: Send + Sync {
    fn load(&self) -> Result<EmaSnapshot, StoreError>;
    fn save(&self, snap: &EmaSnapshot) -> Result<(), StoreError>;
}

/// JSON file on local disk. Saves go through a sibling temp file and a rename
/// so a crash mid-write leaves the previous state intact.
#[derive(Clone, Debug)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_err(&self, source: io::Error) -> StoreError {
        StoreError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

impl EmaStore for JsonFileStore {
    fn load(&self) -> Result<EmaSnapshot, StoreError> {
        let bytes = match fs::read(&self.path) {
            Ok(b) => b,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no saved state, cold start");
                return Ok(EmaSnapshot::default());
            }
            Err(e) => return Err(self.io_err(e)),
        };
        serde_json::from_slice(&bytes).map_err(|source| StoreError::Format {
            path: self.path.clone(),
            source,
        })
    }

    fn save(&self, snap: &EmaSnapshot) -> Result<(), StoreError> {
        if let Some(dir) = self.path.parent() {
            if !dir.as_os_str().is_empty() {
                fs::create_dir_all(dir).map_err(|e| self.io_err(e))?;
            }
        }
        let body = serde_json::to_vec_pretty(snap).map_err(|source| StoreError::Format {
            path: self.path.clone(),
            source,
        })?;

        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        {
            let mut f = fs::File::create(&tmp).map_err(|e| self.io_err(e))?;
            f.write_all(&body).map_err(|e| self.io_err(e))?;
            f.sync_all().map_err(|e| self.io_err(e))?;
        }
        fs::rename(&tmp, &self.path).map_err(|e| self.io_err(e))?;
        debug!(path = %self.path.display(), miners = snap.emas.len(), "state saved");
        Ok(())
    }
}

/// In-process store, for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    saved: Mutex<Option<EmaSnapshot>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_saved(&self) -> Option<EmaSnapshot> {
        self.saved.lock().expect("memory store mutex poisoned").clone()
    }
}

impl EmaStore for MemoryStore {
    fn load(&self) -> Result<EmaSnapshot, StoreError> {
        Ok(self.last_saved().unwrap_or_default())
    }

    fn save(&self, snap: &EmaSnapshot) -> Result<(), StoreError> {
        *self.saved.lock().expect("memory store mutex poisoned") = Some(snap.clone());
        Ok(())
    }
}
