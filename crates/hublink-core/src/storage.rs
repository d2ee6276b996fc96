//! Persistent record of the last paired controller.
//!
//! Stored as a single JSON file so the hub can reconnect to the same
//! controller after a restart.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::types::{Peripheral, PeripheralAddress};

const PAIRING_FILE: &str = "pairing.json";

/// Errors raised while reading or writing the pairing record.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Cannot determine the platform data directory.
    #[error("Cannot determine data directory")]
    NoDataDir,

    /// Reading the record failed.
    #[error("Failed to read {}: {source}", .path.display())]
    ReadError {
        /// File path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Writing the record failed.
    #[error("Failed to write {}: {source}", .path.display())]
    WriteError {
        /// File path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The record exists but is not valid JSON.
    #[error("Failed to parse {}: {source}", .path.display())]
    ParseError {
        /// File path.
        path: PathBuf,
        /// Underlying JSON error.
        #[source]
        source: serde_json::Error,
    },

    /// The record could not be serialized.
    #[error("Failed to serialize pairing record: {0}")]
    SerializeError(#[from] serde_json::Error),

    /// The data directory could not be created.
    #[error("Failed to create directory {}: {source}", .path.display())]
    CreateDirError {
        /// Directory path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

/// Result alias for storage operations.
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// The controller the hub last connected to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairingRecord {
    /// Device address.
    pub address: PeripheralAddress,
    /// Advertised name at pairing time, if any.
    pub name: Option<String>,
    /// When the connection was established.
    pub paired_at_utc: DateTime<Utc>,
}

impl PairingRecord {
    /// Record for `peripheral`, stamped with the current time.
    #[must_use]
    pub fn now(peripheral: &Peripheral) -> Self {
        Self {
            address: peripheral.address,
            name: peripheral.name.clone(),
            paired_at_utc: Utc::now(),
        }
    }
}

/// JSON-file store for the [`PairingRecord`].
#[derive(Debug, Clone)]
pub struct PairingStore {
    data_dir: PathBuf,
}

impl PairingStore {
    /// Store rooted at `data_dir`.
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    /// Store in the platform default location, see [`default_data_dir`].
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NoDataDir`] if no data directory can be found.
    pub fn open_default() -> StorageResult<Self> {
        default_data_dir().map(Self::new)
    }

    /// Path of the record file.
    #[must_use]
    pub fn path(&self) -> PathBuf {
        self.data_dir.join(PAIRING_FILE)
    }

    /// Loads the record. `Ok(None)` when nothing has been paired yet.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(&self) -> StorageResult<Option<PairingRecord>> {
        let path = self.path();
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(StorageError::ReadError { path, source }),
        };
        serde_json::from_str(&content)
            .map(Some)
            .map_err(|source| StorageError::ParseError { path, source })
    }

    /// Replaces the stored record.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory or file cannot be written.
    pub fn save(&self, record: &PairingRecord) -> StorageResult<()> {
        std::fs::create_dir_all(&self.data_dir).map_err(|source| {
            StorageError::CreateDirError {
                path: self.data_dir.clone(),
                source,
            }
        })?;
        let path = self.path();
        let content = serde_json::to_string_pretty(record)?;
        std::fs::write(&path, content).map_err(|source| StorageError::WriteError {
            path: path.clone(),
            source,
        })?;
        debug!(path = %path.display(), address = %record.address, "pairing record saved");
        Ok(())
    }

    /// Removes the stored record. Succeeds when there was none.
    ///
    /// # Errors
    ///
    /// Returns an error if an existing file cannot be removed.
    pub fn clear(&self) -> StorageResult<()> {
        let path = self.path();
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StorageError::WriteError { path, source }),
        }
    }

    /// Directory holding the record.
    #[must_use]
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }
}

/// Default data directory.
///
/// On the hub: `/var/lib/hublink/`.
/// For development: `~/.local/share/hublink/` or the platform equivalent.
///
/// # Errors
///
/// Returns [`StorageError::NoDataDir`] if no home directory can be found.
pub fn default_data_dir() -> StorageResult<PathBuf> {
    #[cfg(target_os = "linux")]
    {
        Ok(PathBuf::from("/var/lib/hublink"))
    }
    #[cfg(not(target_os = "linux"))]
    {
        let dirs =
            directories::ProjectDirs::from("", "", "hublink").ok_or(StorageError::NoDataDir)?;
        Ok(dirs.data_dir().to_path_buf())
    }
}
