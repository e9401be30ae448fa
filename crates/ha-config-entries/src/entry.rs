//! Config Entry types
//!
//! A ConfigEntry is one configured instance of an integration: the data a
//! config flow collected, the device identity it was created for, and the
//! schema version the data is written in.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::state_machine::InvalidTransition;

/// Key/value data stored in an entry (and submitted to flows)
pub type ConfigData = HashMap<String, serde_json::Value>;

/// Config entry lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConfigEntryState {
    /// Initial state, not yet set up
    #[default]
    NotLoaded,
    /// Currently being set up (non-recoverable)
    SetupInProgress,
    /// Successfully set up (recoverable)
    Loaded,
    /// Setup failed (recoverable)
    SetupError,
    /// Device not ready yet, setup may be retried (recoverable)
    SetupRetry,
    /// Version migration failed (not recoverable)
    MigrationError,
    /// Currently unloading (non-recoverable)
    UnloadInProgress,
    /// Unload failed (not recoverable)
    FailedUnload,
}

impl ConfigEntryState {
    /// Check if the entry can be unloaded/reloaded from this state
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ConfigEntryState::Loaded
                | ConfigEntryState::SetupError
                | ConfigEntryState::SetupRetry
                | ConfigEntryState::NotLoaded
        )
    }
}

/// How the entry came to exist
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConfigEntrySource {
    /// Configured through the UI
    #[default]
    User,
    /// Imported from YAML
    Import,
    /// Re-authentication of an existing entry
    Reauth,
}

impl ConfigEntrySource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfigEntrySource::User => "user",
            ConfigEntrySource::Import => "import",
            ConfigEntrySource::Reauth => "reauth",
        }
    }
}

/// Reason an entry was disabled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigEntryDisabledBy {
    /// Disabled by the user
    User,
}

/// A configuration entry for an integration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigEntry {
    /// Unique identifier (ULID)
    pub entry_id: String,

    /// Integration domain (e.g., "airvisual_pro", "nzbget")
    pub domain: String,

    /// Human-readable display name
    pub title: String,

    /// Connection data collected by the config flow
    #[serde(default)]
    pub data: ConfigData,

    /// User-configurable options
    #[serde(default)]
    pub options: ConfigData,

    /// Major schema version of `data`
    #[serde(default = "default_version")]
    pub version: u32,

    /// Minor schema version of `data`
    #[serde(default = "default_minor_version")]
    pub minor_version: u32,

    /// Device identity, unique per domain
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unique_id: Option<String>,

    #[serde(default)]
    pub source: ConfigEntrySource,

    /// Current lifecycle state (not persisted)
    #[serde(skip, default)]
    pub state: ConfigEntryState,

    /// Human-readable explanation for failed states
    #[serde(skip, default)]
    pub reason: Option<String>,

    /// What disabled this entry
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disabled_by: Option<ConfigEntryDisabledBy>,

    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,

    #[serde(default = "Utc::now")]
    pub modified_at: DateTime<Utc>,
}

fn default_version() -> u32 {
    1
}

fn default_minor_version() -> u32 {
    1
}

impl ConfigEntry {
    /// Create a new config entry
    pub fn new(domain: impl Into<String>, title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            entry_id: ulid::Ulid::new().to_string(),
            domain: domain.into(),
            title: title.into(),
            data: ConfigData::new(),
            options: ConfigData::new(),
            version: 1,
            minor_version: 1,
            unique_id: None,
            source: ConfigEntrySource::User,
            state: ConfigEntryState::NotLoaded,
            reason: None,
            disabled_by: None,
            created_at: now,
            modified_at: now,
        }
    }

    pub fn with_data(mut self, data: ConfigData) -> Self {
        self.data = data;
        self
    }

    pub fn with_options(mut self, options: ConfigData) -> Self {
        self.options = options;
        self
    }

    pub fn with_unique_id(mut self, unique_id: impl Into<String>) -> Self {
        self.unique_id = Some(unique_id.into());
        self
    }

    pub fn with_source(mut self, source: ConfigEntrySource) -> Self {
        self.source = source;
        self
    }

    pub fn with_version(mut self, version: u32, minor_version: u32) -> Self {
        self.version = version;
        self.minor_version = minor_version;
        self
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled_by.is_some()
    }

    pub fn is_loaded(&self) -> bool {
        self.state == ConfigEntryState::Loaded
    }

    /// String value of a data key
    pub fn data_str(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(|v| v.as_str())
    }

    /// Attempt to transition to a new state with validation.
    ///
    /// On success, updates the state and reason fields.
    pub fn try_set_state(
        &mut self,
        new_state: ConfigEntryState,
        reason: Option<String>,
    ) -> Result<(), InvalidTransition> {
        self.state = self.state.try_transition(new_state)?;
        self.reason = reason;
        Ok(())
    }
}

/// Partial update of a config entry
#[derive(Debug, Default, Clone)]
pub struct ConfigEntryUpdate {
    pub title: Option<String>,
    /// Replaces `data` entirely
    pub data: Option<ConfigData>,
    /// Merged key by key into `data`
    pub data_updates: Option<ConfigData>,
    pub options: Option<ConfigData>,
    pub version: Option<u32>,
    pub minor_version: Option<u32>,
}

impl ConfigEntryUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn data(mut self, data: ConfigData) -> Self {
        self.data = Some(data);
        self
    }

    pub fn data_updates(mut self, updates: ConfigData) -> Self {
        self.data_updates = Some(updates);
        self
    }

    pub fn options(mut self, options: ConfigData) -> Self {
        self.options = Some(options);
        self
    }

    pub fn version(mut self, version: u32, minor_version: u32) -> Self {
        self.version = Some(version);
        self.minor_version = Some(minor_version);
        self
    }

    /// Apply to an entry. Returns whether anything changed.
    pub(crate) fn apply_to(self, entry: &mut ConfigEntry) -> bool {
        let before = (
            entry.title.clone(),
            entry.data.clone(),
            entry.options.clone(),
            entry.version,
            entry.minor_version,
        );

        if let Some(title) = self.title {
            entry.title = title;
        }
        if let Some(data) = self.data {
            entry.data = data;
        }
        if let Some(updates) = self.data_updates {
            entry.data.extend(updates);
        }
        if let Some(options) = self.options {
            entry.options = options;
        }
        if let Some(version) = self.version {
            entry.version = version;
        }
        if let Some(minor_version) = self.minor_version {
            entry.minor_version = minor_version;
        }

        let changed = before
            != (
                entry.title.clone(),
                entry.data.clone(),
                entry.options.clone(),
                entry.version,
                entry.minor_version,
            );
        if changed {
            entry.modified_at = Utc::now();
        }
        changed
    }
}
