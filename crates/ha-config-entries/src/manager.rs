//! Config Entries Manager
//!
//! Owns every config entry: persistence, the per-domain unique id index and
//! the setup/unload/reload/migrate lifecycle driven through [`Integration`].

use std::collections::HashSet;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::entry::{ConfigEntry, ConfigEntryState, ConfigEntryUpdate};
use crate::integration::{Integration, SetupError};
use crate::state_machine::InvalidTransition;
use crate::storage::{Storable, Storage, StorageError, StorageResult};

/// Storage key for config entries
pub const STORAGE_KEY: &str = "core.config_entries";
/// Current storage version
pub const STORAGE_VERSION: u32 = 1;
/// Current minor version
pub const STORAGE_MINOR_VERSION: u32 = 5;

/// Config entries errors
#[derive(Debug, Error)]
pub enum ConfigEntriesError {
    #[error("Entry not found: {0}")]
    NotFound(String),

    #[error("Entry already exists for domain {domain} with unique_id {unique_id}")]
    AlreadyExists { domain: String, unique_id: String },

    #[error("Cannot unload entry in state {0:?}")]
    CannotUnload(ConfigEntryState),

    #[error("Unload of entry {0} failed")]
    UnloadFailed(String),

    #[error("Setup failed: {0}")]
    SetupFailed(#[from] SetupError),

    #[error("Migration of entry {entry_id} failed: {reason}")]
    MigrationFailed { entry_id: String, reason: String },

    #[error(transparent)]
    InvalidState(#[from] InvalidTransition),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

pub type ConfigEntriesResult<T> = Result<T, ConfigEntriesError>;

/// Config entries data for storage
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigEntriesData {
    pub entries: Vec<ConfigEntry>,
}

impl Storable for ConfigEntriesData {
    const KEY: &'static str = STORAGE_KEY;
    const VERSION: u32 = STORAGE_VERSION;
    const MINOR_VERSION: u32 = STORAGE_MINOR_VERSION;
}

/// Config Entries Manager
pub struct ConfigEntries {
    storage: Arc<Storage>,

    /// Primary index: entry_id -> ConfigEntry
    entries: DashMap<String, ConfigEntry>,

    /// Index: domain -> set of entry_ids
    by_domain: DashMap<String, HashSet<String>>,

    /// Index: (domain, unique_id) -> entry_id
    by_unique_id: DashMap<(String, String), String>,

    /// Serializes setup/unload across entries
    setup_lock: Mutex<()>,

    /// Registered integrations by domain
    integrations: DashMap<String, Arc<dyn Integration>>,
}

impl ConfigEntries {
    pub fn new(storage: Arc<Storage>) -> Self {
        Self {
            storage,
            entries: DashMap::new(),
            by_domain: DashMap::new(),
            by_unique_id: DashMap::new(),
            setup_lock: Mutex::new(()),
            integrations: DashMap::new(),
        }
    }

    /// Load entries from storage
    pub async fn load(&self) -> StorageResult<()> {
        if let Some(file) = self.storage.load::<ConfigEntriesData>().await? {
            info!(
                "Loading {} config entries from storage (v{}.{})",
                file.data.entries.len(),
                file.version,
                file.minor_version
            );

            for entry in file.data.entries {
                self.index_entry(entry);
            }
        }
        Ok(())
    }

    /// Save entries to storage
    pub async fn save(&self) -> StorageResult<()> {
        let data = ConfigEntriesData {
            entries: self.iter().collect(),
        };
        self.storage.save(&data).await?;
        debug!("Saved {} config entries to storage", data.entries.len());
        Ok(())
    }

    fn index_entry(&self, entry: ConfigEntry) {
        self.by_domain
            .entry(entry.domain.clone())
            .or_default()
            .insert(entry.entry_id.clone());

        if let Some(ref unique_id) = entry.unique_id {
            self.by_unique_id.insert(
                (entry.domain.clone(), unique_id.clone()),
                entry.entry_id.clone(),
            );
        }

        self.entries.insert(entry.entry_id.clone(), entry);
    }

    fn unindex_entry(&self, entry: &ConfigEntry) {
        if let Some(mut ids) = self.by_domain.get_mut(&entry.domain) {
            ids.remove(&entry.entry_id);
        }

        if let Some(ref unique_id) = entry.unique_id {
            self.by_unique_id
                .remove(&(entry.domain.clone(), unique_id.clone()));
        }

        self.entries.remove(&entry.entry_id);
    }

    /// Register the integration that sets up entries of its domain
    pub fn register_integration(&self, integration: Arc<dyn Integration>) {
        let domain = integration.domain().to_string();
        debug!("Registered integration for domain: {}", domain);
        self.integrations.insert(domain, integration);
    }

    fn integration(&self, domain: &str) -> Option<Arc<dyn Integration>> {
        self.integrations.get(domain).map(|i| i.value().clone())
    }

    pub fn get(&self, entry_id: &str) -> Option<ConfigEntry> {
        self.entries.get(entry_id).map(|r| r.value().clone())
    }

    pub fn get_by_domain(&self, domain: &str) -> Vec<ConfigEntry> {
        self.by_domain
            .get(domain)
            .map(|ids| ids.iter().filter_map(|id| self.get(id)).collect())
            .unwrap_or_default()
    }

    pub fn get_by_unique_id(&self, domain: &str, unique_id: &str) -> Option<ConfigEntry> {
        let entry_id = self
            .by_unique_id
            .get(&(domain.to_string(), unique_id.to_string()))?
            .value()
            .clone();
        self.get(&entry_id)
    }

    /// Add a new config entry.
    ///
    /// Fails without touching storage if another entry of the same domain
    /// already claims the unique id. A failed save releases the entry and
    /// its unique id again.
    pub async fn add(&self, entry: ConfigEntry) -> ConfigEntriesResult<ConfigEntry> {
        if let Some(ref unique_id) = entry.unique_id {
            match self
                .by_unique_id
                .entry((entry.domain.clone(), unique_id.clone()))
            {
                Entry::Occupied(_) => {
                    return Err(ConfigEntriesError::AlreadyExists {
                        domain: entry.domain.clone(),
                        unique_id: unique_id.clone(),
                    });
                }
                Entry::Vacant(slot) => {
                    slot.insert(entry.entry_id.clone());
                }
            }
        }

        self.index_entry(entry.clone());
        if let Err(err) = self.save().await {
            self.unindex_entry(&entry);
            return Err(err.into());
        }

        info!(
            "Added config entry: {} ({}) [{}]",
            entry.title, entry.domain, entry.entry_id
        );

        Ok(entry)
    }

    /// Update an entry.
    ///
    /// A changed options mapping reloads a loaded entry when its integration
    /// asks for it.
    pub async fn update(
        &self,
        entry_id: &str,
        update: ConfigEntryUpdate,
    ) -> ConfigEntriesResult<ConfigEntry> {
        let options_given = update.options.is_some();
        let (updated, changed) = self.apply_update(entry_id, update).await?;

        let wants_reload = self
            .integration(&updated.domain)
            .is_some_and(|i| i.reload_on_update());
        if changed && options_given && updated.is_loaded() && wants_reload {
            debug!("Options of {} changed, reloading", entry_id);
            self.reload(entry_id).await?;
        }

        Ok(self.get(entry_id).unwrap_or(updated))
    }

    async fn apply_update(
        &self,
        entry_id: &str,
        update: ConfigEntryUpdate,
    ) -> ConfigEntriesResult<(ConfigEntry, bool)> {
        let (previous, updated, changed) = {
            let mut entry = self
                .entries
                .get_mut(entry_id)
                .ok_or_else(|| ConfigEntriesError::NotFound(entry_id.to_string()))?;
            let previous = entry.clone();
            let changed = update.apply_to(&mut entry);
            (previous, entry.clone(), changed)
        };

        if changed {
            if let Err(err) = self.save().await {
                self.restore(previous);
                return Err(err.into());
            }
            debug!("Updated config entry: {}", entry_id);
        }
        Ok((updated, changed))
    }

    /// Put back the stored fields of an entry, keeping its lifecycle state
    fn restore(&self, previous: ConfigEntry) {
        if let Some(mut entry) = self.entries.get_mut(&previous.entry_id) {
            let (state, reason) = (entry.state, entry.reason.take());
            *entry = previous;
            entry.state = state;
            entry.reason = reason;
        }
    }

    /// Remove an entry, unloading it first
    pub async fn remove(&self, entry_id: &str) -> ConfigEntriesResult<ConfigEntry> {
        let _lock = self.setup_lock.lock().await;

        let entry = self
            .get(entry_id)
            .ok_or_else(|| ConfigEntriesError::NotFound(entry_id.to_string()))?;

        if entry.state.is_recoverable() {
            self.unload_locked(entry_id).await?;
        }

        self.unindex_entry(&entry);
        if let Err(err) = self.save().await {
            self.index_entry(entry);
            return Err(err.into());
        }

        info!(
            "Removed config entry: {} ({}) [{}]",
            entry.title, entry.domain, entry_id
        );

        Ok(entry)
    }

    fn transition(
        &self,
        entry_id: &str,
        state: ConfigEntryState,
        reason: Option<String>,
    ) -> ConfigEntriesResult<()> {
        let mut entry = self
            .entries
            .get_mut(entry_id)
            .ok_or_else(|| ConfigEntriesError::NotFound(entry_id.to_string()))?;
        entry.try_set_state(state, reason)?;
        debug!("Entry {} state changed to {:?}", entry_id, state);
        Ok(())
    }

    /// Set up an entry through its integration
    pub async fn setup(&self, entry_id: &str) -> ConfigEntriesResult<()> {
        let _lock = self.setup_lock.lock().await;
        self.setup_locked(entry_id).await
    }

    async fn setup_locked(&self, entry_id: &str) -> ConfigEntriesResult<()> {
        let entry = self
            .get(entry_id)
            .ok_or_else(|| ConfigEntriesError::NotFound(entry_id.to_string()))?;

        if entry.is_disabled() {
            debug!("Skipping setup for disabled entry: {}", entry_id);
            return Ok(());
        }

        self.transition(entry_id, ConfigEntryState::SetupInProgress, None)?;

        let Some(integration) = self.integration(&entry.domain) else {
            self.transition(entry_id, ConfigEntryState::Loaded, None)?;
            debug!(
                "No integration for domain {}, marking as loaded",
                entry.domain
            );
            return Ok(());
        };

        let entry = match self.migrate(integration.as_ref(), entry).await {
            Ok(entry) => entry,
            Err(reason) => {
                warn!("Migration failed for entry {}: {}", entry_id, reason);
                self.transition(
                    entry_id,
                    ConfigEntryState::MigrationError,
                    Some(reason.clone()),
                )?;
                return Err(ConfigEntriesError::MigrationFailed {
                    entry_id: entry_id.to_string(),
                    reason,
                });
            }
        };

        match integration.async_setup_entry(&entry).await {
            Ok(()) => {
                self.transition(entry_id, ConfigEntryState::Loaded, None)?;
                info!("Setup completed for entry: {} ({})", entry.title, entry_id);
                Ok(())
            }
            Err(err) => {
                let state = match err {
                    SetupError::NotReady(_) => ConfigEntryState::SetupRetry,
                    SetupError::AuthFailed(_) | SetupError::Failed(_) => {
                        ConfigEntryState::SetupError
                    }
                };
                warn!("Setup failed for entry {}: {}", entry_id, err);
                self.transition(entry_id, state, Some(err.to_string()))?;
                Err(err.into())
            }
        }
    }

    /// Bring an entry up to the integration's version.
    ///
    /// Returns the (possibly updated) entry, or the failure reason.
    async fn migrate(
        &self,
        integration: &dyn Integration,
        entry: ConfigEntry,
    ) -> Result<ConfigEntry, String> {
        let current = (entry.version, entry.minor_version);
        let target = (integration.version(), integration.minor_version());

        if current == target {
            return Ok(entry);
        }
        if entry.version > integration.version() {
            return Err(format!(
                "entry version {}.{} is newer than supported {}.{}",
                current.0, current.1, target.0, target.1
            ));
        }

        match integration.async_migrate_entry(&entry).await {
            Ok(Some(update)) => self
                .apply_update(&entry.entry_id, update)
                .await
                .map(|(entry, _)| entry)
                .map_err(|e| e.to_string()),
            Ok(None) => Ok(entry),
            Err(e) => Err(e.to_string()),
        }
    }

    /// Unload an entry.
    ///
    /// Returns `false` when the integration failed to release it, which
    /// leaves the entry in `FailedUnload`.
    pub async fn unload(&self, entry_id: &str) -> ConfigEntriesResult<bool> {
        let _lock = self.setup_lock.lock().await;
        self.unload_locked(entry_id).await
    }

    async fn unload_locked(&self, entry_id: &str) -> ConfigEntriesResult<bool> {
        let entry = self
            .get(entry_id)
            .ok_or_else(|| ConfigEntriesError::NotFound(entry_id.to_string()))?;

        match entry.state {
            ConfigEntryState::NotLoaded => return Ok(true),
            state if !state.is_recoverable() => {
                return Err(ConfigEntriesError::CannotUnload(state));
            }
            _ => {}
        }

        let was_loaded = entry.is_loaded();
        self.transition(entry_id, ConfigEntryState::UnloadInProgress, None)?;

        let integration = match self.integration(&entry.domain) {
            Some(integration) if was_loaded => integration,
            _ => {
                self.transition(entry_id, ConfigEntryState::NotLoaded, None)?;
                return Ok(true);
            }
        };

        match integration.async_unload_entry(&entry).await {
            Ok(true) => {
                self.transition(entry_id, ConfigEntryState::NotLoaded, None)?;
                info!("Unloaded entry: {} ({})", entry.title, entry_id);
                Ok(true)
            }
            Ok(false) => {
                self.transition(entry_id, ConfigEntryState::FailedUnload, None)?;
                warn!("Integration refused to unload entry {}", entry_id);
                Ok(false)
            }
            Err(err) => {
                warn!("Unload failed for entry {}: {}", entry_id, err);
                self.transition(
                    entry_id,
                    ConfigEntryState::FailedUnload,
                    Some(err.to_string()),
                )?;
                Ok(false)
            }
        }
    }

    /// Reload an entry (unload + setup)
    pub async fn reload(&self, entry_id: &str) -> ConfigEntriesResult<()> {
        let _lock = self.setup_lock.lock().await;

        if !self.unload_locked(entry_id).await? {
            return Err(ConfigEntriesError::UnloadFailed(entry_id.to_string()));
        }
        self.setup_locked(entry_id).await
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = ConfigEntry> + '_ {
        self.entries.iter().map(|r| r.value().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::{ConfigData, ConfigEntrySource};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex as StdMutex;
    use tempfile::TempDir;

    fn create_test_manager() -> (TempDir, ConfigEntries) {
        let temp_dir = TempDir::new().unwrap();
        let storage = Arc::new(Storage::new(temp_dir.path()));
        let manager = ConfigEntries::new(storage);
        (temp_dir, manager)
    }

    /// Integration that records calls and fails setup on demand
    #[derive(Default)]
    struct Recorder {
        calls: StdMutex<Vec<String>>,
        setup_error: StdMutex<Option<SetupError>>,
        unload_ok: StdMutex<Option<bool>>,
    }

    impl Recorder {
        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Integration for Recorder {
        fn domain(&self) -> &str {
            "recorder"
        }

        fn version(&self) -> u32 {
            2
        }

        fn minor_version(&self) -> u32 {
            0
        }

        async fn async_setup_entry(&self, entry: &ConfigEntry) -> Result<(), SetupError> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("setup v{}", entry.version));
            match self.setup_error.lock().unwrap().clone() {
                Some(err) => Err(err),
                None => Ok(()),
            }
        }

        async fn async_unload_entry(&self, _entry: &ConfigEntry) -> Result<bool, SetupError> {
            self.calls.lock().unwrap().push("unload".to_string());
            Ok(self.unload_ok.lock().unwrap().unwrap_or(true))
        }

        async fn async_migrate_entry(
            &self,
            entry: &ConfigEntry,
        ) -> Result<Option<ConfigEntryUpdate>, SetupError> {
            self.calls.lock().unwrap().push("migrate".to_string());
            let mut data = entry.data.clone();
            data.insert("migrated".to_string(), json!(true));
            Ok(Some(ConfigEntryUpdate::new().data(data).version(2, 0)))
        }

        fn reload_on_update(&self) -> bool {
            true
        }
    }

    fn with_recorder(manager: &ConfigEntries) -> Arc<Recorder> {
        let recorder = Arc::new(Recorder::default());
        manager.register_integration(recorder.clone());
        recorder
    }

    #[tokio::test]
    async fn test_add_entry() {
        let (_dir, manager) = create_test_manager();

        let entry = ConfigEntry::new("airvisual_pro", "10.0.0.5").with_unique_id("SN123");

        let added = manager.add(entry).await.unwrap();
        assert_eq!(added.domain, "airvisual_pro");
        assert_eq!(manager.len(), 1);
        assert!(manager.get_by_unique_id("airvisual_pro", "SN123").is_some());
    }

    #[tokio::test]
    async fn test_duplicate_unique_id_rejected() {
        let (_dir, manager) = create_test_manager();

        let first = ConfigEntry::new("airvisual_pro", "Pro 1").with_unique_id("same-id");
        let second = ConfigEntry::new("airvisual_pro", "Pro 2").with_unique_id("same-id");

        let first = manager.add(first).await.unwrap();
        let result = manager.add(second).await;

        assert!(matches!(
            result,
            Err(ConfigEntriesError::AlreadyExists { .. })
        ));
        assert_eq!(manager.len(), 1);
        assert_eq!(
            manager
                .get_by_unique_id("airvisual_pro", "same-id")
                .unwrap()
                .entry_id,
            first.entry_id
        );
    }

    #[tokio::test]
    async fn test_same_unique_id_other_domain_allowed() {
        let (_dir, manager) = create_test_manager();

        manager
            .add(ConfigEntry::new("airvisual_pro", "Pro").with_unique_id("1"))
            .await
            .unwrap();
        manager
            .add(ConfigEntry::new("nzbget", "NZBGet").with_unique_id("1"))
            .await
            .unwrap();

        assert_eq!(manager.get_by_domain("nzbget").len(), 1);
        assert_eq!(manager.get_by_domain("airvisual_pro").len(), 1);
    }

    #[tokio::test]
    async fn test_update_entry() {
        let (_dir, manager) = create_test_manager();

        let entry = manager
            .add(ConfigEntry::new("nzbget", "Old Name"))
            .await
            .unwrap();

        let updated = manager
            .update(&entry.entry_id, ConfigEntryUpdate::new().title("New Name"))
            .await
            .unwrap();

        assert_eq!(updated.title, "New Name");
    }

    #[tokio::test]
    async fn test_update_missing_entry() {
        let (_dir, manager) = create_test_manager();

        let result = manager
            .update("missing", ConfigEntryUpdate::new().title("x"))
            .await;
        assert!(matches!(result, Err(ConfigEntriesError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_remove_entry_unloads_first() {
        let (_dir, manager) = create_test_manager();
        let recorder = with_recorder(&manager);

        let entry = manager
            .add(ConfigEntry::new("recorder", "Test").with_version(2, 0))
            .await
            .unwrap();
        manager.setup(&entry.entry_id).await.unwrap();

        manager.remove(&entry.entry_id).await.unwrap();
        assert_eq!(manager.len(), 0);
        assert_eq!(recorder.calls(), vec!["setup v2", "unload"]);
    }

    #[tokio::test]
    async fn test_setup_without_integration_marks_loaded() {
        let (_dir, manager) = create_test_manager();

        let entry = manager.add(ConfigEntry::new("hue", "Test")).await.unwrap();
        manager.setup(&entry.entry_id).await.unwrap();
        assert!(manager.get(&entry.entry_id).unwrap().is_loaded());

        assert!(manager.unload(&entry.entry_id).await.unwrap());
        assert_eq!(
            manager.get(&entry.entry_id).unwrap().state,
            ConfigEntryState::NotLoaded
        );
    }

    #[tokio::test]
    async fn test_setup_twice_rejected() {
        let (_dir, manager) = create_test_manager();

        let entry = manager.add(ConfigEntry::new("hue", "Test")).await.unwrap();
        manager.setup(&entry.entry_id).await.unwrap();

        let result = manager.setup(&entry.entry_id).await;
        assert!(matches!(result, Err(ConfigEntriesError::InvalidState(_))));
    }

    #[tokio::test]
    async fn test_setup_migrates_old_entry() {
        let (_dir, manager) = create_test_manager();
        let recorder = with_recorder(&manager);

        let entry = manager
            .add(ConfigEntry::new("recorder", "Test"))
            .await
            .unwrap();
        manager.setup(&entry.entry_id).await.unwrap();

        let stored = manager.get(&entry.entry_id).unwrap();
        assert_eq!((stored.version, stored.minor_version), (2, 0));
        assert_eq!(stored.data.get("migrated"), Some(&json!(true)));
        assert_eq!(recorder.calls(), vec!["migrate", "setup v2"]);
    }

    #[tokio::test]
    async fn test_newer_entry_version_is_migration_error() {
        let (_dir, manager) = create_test_manager();
        let recorder = with_recorder(&manager);

        let entry = manager
            .add(ConfigEntry::new("recorder", "Test").with_version(3, 0))
            .await
            .unwrap();
        let result = manager.setup(&entry.entry_id).await;

        assert!(matches!(
            result,
            Err(ConfigEntriesError::MigrationFailed { .. })
        ));
        assert_eq!(
            manager.get(&entry.entry_id).unwrap().state,
            ConfigEntryState::MigrationError
        );
        assert!(recorder.calls().is_empty());
    }

    #[tokio::test]
    async fn test_setup_not_ready_goes_to_retry() {
        let (_dir, manager) = create_test_manager();
        let recorder = with_recorder(&manager);
        *recorder.setup_error.lock().unwrap() = Some(SetupError::NotReady("offline".into()));

        let entry = manager
            .add(ConfigEntry::new("recorder", "Test").with_version(2, 0))
            .await
            .unwrap();
        let result = manager.setup(&entry.entry_id).await;

        assert!(matches!(result, Err(ConfigEntriesError::SetupFailed(_))));
        let stored = manager.get(&entry.entry_id).unwrap();
        assert_eq!(stored.state, ConfigEntryState::SetupRetry);
        assert_eq!(stored.reason.as_deref(), Some("not ready: offline"));

        // A later attempt may succeed
        *recorder.setup_error.lock().unwrap() = None;
        manager.setup(&entry.entry_id).await.unwrap();
        assert!(manager.get(&entry.entry_id).unwrap().is_loaded());
    }

    #[tokio::test]
    async fn test_setup_auth_failure() {
        let (_dir, manager) = create_test_manager();
        let recorder = with_recorder(&manager);
        *recorder.setup_error.lock().unwrap() =
            Some(SetupError::AuthFailed("bad password".into()));

        let entry = manager
            .add(ConfigEntry::new("recorder", "Test").with_version(2, 0))
            .await
            .unwrap();
        assert!(manager.setup(&entry.entry_id).await.is_err());
        assert_eq!(
            manager.get(&entry.entry_id).unwrap().state,
            ConfigEntryState::SetupError
        );
    }

    #[tokio::test]
    async fn test_failed_unload() {
        let (_dir, manager) = create_test_manager();
        let recorder = with_recorder(&manager);
        *recorder.unload_ok.lock().unwrap() = Some(false);

        let entry = manager
            .add(ConfigEntry::new("recorder", "Test").with_version(2, 0))
            .await
            .unwrap();
        manager.setup(&entry.entry_id).await.unwrap();

        let result = manager.reload(&entry.entry_id).await;
        assert!(matches!(result, Err(ConfigEntriesError::UnloadFailed(_))));
        assert_eq!(
            manager.get(&entry.entry_id).unwrap().state,
            ConfigEntryState::FailedUnload
        );
        assert!(matches!(
            manager.unload(&entry.entry_id).await,
            Err(ConfigEntriesError::CannotUnload(ConfigEntryState::FailedUnload))
        ));
    }

    #[tokio::test]
    async fn test_reload_not_loaded_entry_sets_up() {
        let (_dir, manager) = create_test_manager();
        let recorder = with_recorder(&manager);

        let entry = manager
            .add(ConfigEntry::new("recorder", "Test").with_version(2, 0))
            .await
            .unwrap();
        manager.reload(&entry.entry_id).await.unwrap();

        assert!(manager.get(&entry.entry_id).unwrap().is_loaded());
        assert_eq!(recorder.calls(), vec!["setup v2"]);
    }

    #[tokio::test]
    async fn test_options_update_reloads_loaded_entry() {
        let (_dir, manager) = create_test_manager();
        let recorder = with_recorder(&manager);

        let entry = manager
            .add(ConfigEntry::new("recorder", "Test").with_version(2, 0))
            .await
            .unwrap();
        manager.setup(&entry.entry_id).await.unwrap();

        let options = ConfigData::from([("scan_interval".to_string(), json!(30))]);
        let updated = manager
            .update(&entry.entry_id, ConfigEntryUpdate::new().options(options))
            .await
            .unwrap();

        assert!(updated.is_loaded());
        assert_eq!(recorder.calls(), vec!["setup v2", "unload", "setup v2"]);
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let storage = Arc::new(Storage::new(temp_dir.path()));

        {
            let manager = ConfigEntries::new(storage.clone());
            manager
                .add(
                    ConfigEntry::new("airvisual_pro", "10.0.0.5")
                        .with_unique_id("SN123")
                        .with_source(ConfigEntrySource::Import),
                )
                .await
                .unwrap();
        }

        {
            let manager = ConfigEntries::new(storage);
            manager.load().await.unwrap();

            assert_eq!(manager.len(), 1);
            let entry = manager.get_by_unique_id("airvisual_pro", "SN123").unwrap();
            assert_eq!(entry.title, "10.0.0.5");
            assert_eq!(entry.source, ConfigEntrySource::Import);
            assert_eq!(entry.state, ConfigEntryState::NotLoaded);
        }
    }

    /// Replace the `.storage` directory with a plain file so saves fail
    fn break_storage(dir: &TempDir) {
        let path = dir.path().join(".storage");
        if path.is_dir() {
            std::fs::remove_dir_all(&path).unwrap();
        }
        std::fs::write(&path, "not a directory").unwrap();
    }

    #[tokio::test]
    async fn test_failed_save_releases_unique_id() {
        let (dir, manager) = create_test_manager();
        break_storage(&dir);

        let result = manager
            .add(ConfigEntry::new("airvisual_pro", "10.0.0.5").with_unique_id("SN123"))
            .await;

        assert!(matches!(result, Err(ConfigEntriesError::Storage(_))));
        assert!(manager.is_empty());
        assert!(manager.get_by_unique_id("airvisual_pro", "SN123").is_none());
        assert!(manager.get_by_domain("airvisual_pro").is_empty());

        std::fs::remove_file(dir.path().join(".storage")).unwrap();
        manager
            .add(ConfigEntry::new("airvisual_pro", "10.0.0.5").with_unique_id("SN123"))
            .await
            .unwrap();
        assert_eq!(manager.len(), 1);
    }

    #[tokio::test]
    async fn test_failed_save_keeps_previous_entry() {
        let (dir, manager) = create_test_manager();
        let entry = manager
            .add(
                ConfigEntry::new("airvisual_pro", "10.0.0.5")
                    .with_unique_id("SN123")
                    .with_data(ConfigData::from([("password".to_string(), json!("old"))])),
            )
            .await
            .unwrap();
        break_storage(&dir);

        let result = manager
            .update(
                &entry.entry_id,
                ConfigEntryUpdate::new()
                    .data_updates(ConfigData::from([("password".to_string(), json!("new"))])),
            )
            .await;
        assert!(matches!(result, Err(ConfigEntriesError::Storage(_))));
        let stored = manager.get(&entry.entry_id).unwrap();
        assert_eq!(stored.data_str("password"), Some("old"));
        assert_eq!(stored.modified_at, entry.modified_at);

        assert!(manager.remove(&entry.entry_id).await.is_err());
        assert_eq!(
            manager
                .get_by_unique_id("airvisual_pro", "SN123")
                .map(|e| e.entry_id),
            Some(entry.entry_id)
        );
    }
}
