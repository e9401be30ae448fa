//! JSON persistence in the `.storage/` directory
//!
//! Each key is one file wrapping its payload with version information:
//!
//! ```json
//! {
//!   "version": 1,
//!   "minor_version": 5,
//!   "key": "core.config_entries",
//!   "data": { ... }
//! }
//! ```

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tracing::debug;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Storage {key} has version {found}, newer than supported {supported}")]
    UnsupportedVersion {
        key: String,
        found: u32,
        supported: u32,
    },
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Versioned wrapper written to disk
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageFile<T> {
    pub version: u32,
    pub minor_version: u32,
    pub key: String,
    pub data: T,
}

/// A payload with a fixed storage key and version
pub trait Storable: Serialize + DeserializeOwned {
    const KEY: &'static str;
    const VERSION: u32;
    const MINOR_VERSION: u32;
}

/// Handle on a `.storage/` directory
#[derive(Debug, Clone)]
pub struct Storage {
    storage_dir: PathBuf,
}

impl Storage {
    /// Storage rooted at `<config_dir>/.storage`
    pub fn new(config_dir: impl AsRef<Path>) -> Self {
        Self {
            storage_dir: config_dir.as_ref().join(".storage"),
        }
    }

    pub fn storage_dir(&self) -> &Path {
        &self.storage_dir
    }

    pub fn file_path(&self, key: &str) -> PathBuf {
        self.storage_dir.join(key)
    }

    /// Load a payload. Returns `None` when nothing was saved yet.
    pub async fn load<T: Storable>(&self) -> StorageResult<Option<StorageFile<T>>> {
        let path = self.file_path(T::KEY);

        let content = match fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("Storage file not found: {}", T::KEY);
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        let file: StorageFile<T> = serde_json::from_str(&content)?;
        if file.version > T::VERSION {
            return Err(StorageError::UnsupportedVersion {
                key: T::KEY.to_string(),
                found: file.version,
                supported: T::VERSION,
            });
        }

        debug!(
            "Loaded storage file: {} (v{}.{})",
            T::KEY,
            file.version,
            file.minor_version
        );
        Ok(Some(file))
    }

    /// Save a payload.
    ///
    /// Writes to a temp file first, then renames over the real one.
    pub async fn save<T: Storable>(&self, data: &T) -> StorageResult<()> {
        fs::create_dir_all(&self.storage_dir).await?;

        let file = StorageFile {
            version: T::VERSION,
            minor_version: T::MINOR_VERSION,
            key: T::KEY.to_string(),
            data,
        };
        let content = serde_json::to_string_pretty(&file)?;

        let path = self.file_path(T::KEY);
        let temp_path = self.file_path(&format!("{}.tmp", T::KEY));
        fs::write(&temp_path, &content).await?;
        fs::rename(&temp_path, &path).await?;

        debug!("Saved storage file: {}", T::KEY);
        Ok(())
    }
}
