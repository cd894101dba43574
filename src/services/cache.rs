//! Time-stamped cache of the last extraction result.
//!
//! Validity is decided from the timestamp and source URL stored inside the
//! file, never from the file's modification time.

use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::Settings;
use crate::models::DocumentRecord;

/// Errors from reading or writing the cache file.
///
/// These never abort a run: a failed load is a miss and a failed save is
/// logged.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Cache I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize cache: {0}")]
    Serialize(#[source] serde_json::Error),

    #[error("Corrupt cache file {path}: {source}")]
    Deserialize {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Cache task did not complete: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// A persisted extraction result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheSnapshot {
    pub source_url: String,
    pub saved_at: DateTime<Utc>,
    /// Full extracted list, before filtering.
    pub documents: Vec<DocumentRecord>,
}

impl CacheSnapshot {
    pub fn new(source_url: impl Into<String>, documents: Vec<DocumentRecord>) -> Self {
        Self {
            source_url: source_url.into(),
            saved_at: Utc::now(),
            documents,
        }
    }

    pub fn is_fresh(&self, now: DateTime<Utc>, expiry: Duration, source_url: &str) -> bool {
        is_fresh(now, self.saved_at, expiry, &self.source_url, source_url)
    }
}

/// Whether a snapshot saved at `saved_at` for `snapshot_url` may be used now.
///
/// A timestamp in the future counts as stale.
pub fn is_fresh(
    now: DateTime<Utc>,
    saved_at: DateTime<Utc>,
    expiry: Duration,
    snapshot_url: &str,
    expected_url: &str,
) -> bool {
    if snapshot_url != expected_url {
        return false;
    }
    match (now - saved_at).to_std() {
        Ok(age) => age < expiry,
        Err(_) => false,
    }
}

/// File-backed snapshot store.
#[derive(Debug, Clone)]
pub struct CacheStore {
    path: PathBuf,
    enabled: bool,
    expiry: Duration,
}

impl CacheStore {
    pub fn new(path: impl Into<PathBuf>, expiry: Duration) -> Self {
        Self {
            path: path.into(),
            enabled: true,
            expiry,
        }
    }

    /// A store whose `load` always misses and whose `save` does nothing.
    pub fn disabled() -> Self {
        Self {
            path: PathBuf::new(),
            enabled: false,
            expiry: Duration::ZERO,
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        if settings.use_cache {
            Self::new(&settings.cache_file, settings.cache_expiry)
        } else {
            Self::disabled()
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Load a usable snapshot for `source_url`, if there is one.
    ///
    /// Missing, corrupt, stale and foreign snapshots are all misses.
    pub fn load(&self, source_url: &str) -> Option<CacheSnapshot> {
        self.load_at(Utc::now(), source_url)
    }

    /// [`CacheStore::load`] with an explicit clock.
    pub fn load_at(&self, now: DateTime<Utc>, source_url: &str) -> Option<CacheSnapshot> {
        if !self.enabled {
            return None;
        }

        let snapshot = match self.read() {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => {
                debug!("No cache file at {}", self.path.display());
                return None;
            }
            Err(e) => {
                warn!("Ignoring cache: {}", e);
                return None;
            }
        };

        if snapshot.source_url != source_url {
            info!("Cache was saved for a different URL, ignoring it");
            return None;
        }
        if !snapshot.is_fresh(now, self.expiry, source_url) {
            info!("Cache expired (saved {})", snapshot.saved_at.to_rfc3339());
            return None;
        }

        info!(
            "Loaded {} documents from cache {}",
            snapshot.documents.len(),
            self.path.display()
        );
        Some(snapshot)
    }

    /// [`CacheStore::load`] on the blocking thread pool.
    pub async fn load_async(&self, source_url: &str) -> Option<CacheSnapshot> {
        if !self.enabled {
            return None;
        }
        let store = self.clone();
        let source_url = source_url.to_string();
        match tokio::task::spawn_blocking(move || store.load(&source_url)).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!("Ignoring cache: {}", CacheError::Task(e));
                None
            }
        }
    }

    /// [`CacheStore::save`] on the blocking thread pool.
    pub async fn save_async(&self, snapshot: &CacheSnapshot) -> Result<(), CacheError> {
        if !self.enabled {
            return Ok(());
        }
        let store = self.clone();
        let snapshot = snapshot.clone();
        tokio::task::spawn_blocking(move || store.save(&snapshot)).await?
    }

    fn read(&self) -> Result<Option<CacheSnapshot>, CacheError> {
        let bytes = match std::fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(CacheError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|source| CacheError::Deserialize {
                path: self.path.clone(),
                source,
            })
    }

    /// Replace the cache file with `snapshot`.
    ///
    /// The snapshot is written to a temporary file in the same directory and
    /// renamed over the old one, so readers never see a partial file.
    pub fn save(&self, snapshot: &CacheSnapshot) -> Result<(), CacheError> {
        if !self.enabled {
            return Ok(());
        }

        let io_err = |source| CacheError::Io {
            path: self.path.clone(),
            source,
        };

        let json = serde_json::to_vec_pretty(snapshot).map_err(CacheError::Serialize)?;

        let parent = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&parent).map_err(io_err)?;

        let mut tmp = tempfile::NamedTempFile::new_in(&parent).map_err(io_err)?;
        tmp.write_all(&json).map_err(io_err)?;
        tmp.as_file().sync_all().map_err(io_err)?;
        tmp.persist(&self.path).map_err(|e| io_err(e.error))?;

        info!(
            "Saved {} documents to cache {}",
            snapshot.documents.len(),
            self.path.display()
        );
        Ok(())
    }
}
