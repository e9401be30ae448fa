//! Integration hooks used by the config entries manager

use async_trait::async_trait;
use thiserror::Error;

use crate::entry::{ConfigEntry, ConfigEntryUpdate};

/// Why an integration could not set up (or unload, or migrate) an entry
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SetupError {
    /// The device is not reachable yet; the entry goes to `SetupRetry`
    #[error("not ready: {0}")]
    NotReady(String),

    /// Stored credentials were rejected; the entry needs re-authentication
    #[error("authentication failed: {0}")]
    AuthFailed(String),

    #[error("{0}")]
    Failed(String),
}

/// What a config-entry based integration provides to the manager.
///
/// `version`/`minor_version` is the data schema the integration currently
/// writes. Entries stored with an older version are passed through
/// [`Integration::async_migrate_entry`] before setup.
#[async_trait]
pub trait Integration: Send + Sync {
    fn domain(&self) -> &str;

    fn version(&self) -> u32 {
        1
    }

    fn minor_version(&self) -> u32 {
        1
    }

    async fn async_setup_entry(&self, entry: &ConfigEntry) -> Result<(), SetupError>;

    /// Returns `false` when the integration could not release the entry
    async fn async_unload_entry(&self, _entry: &ConfigEntry) -> Result<bool, SetupError> {
        Ok(true)
    }

    /// Upgrade an entry written by an older version.
    ///
    /// `Ok(None)` leaves the entry as it is.
    async fn async_migrate_entry(
        &self,
        _entry: &ConfigEntry,
    ) -> Result<Option<ConfigEntryUpdate>, SetupError> {
        Ok(None)
    }

    /// Whether an options update of a loaded entry should reload it
    fn reload_on_update(&self) -> bool {
        false
    }
}
