//! NZBGet
//!
//! Each config entry holds the connection data of one NZBGet server. Setup
//! opens a client and (re)binds the domain services to it. Unloading an
//! entry rebinds them to a client that is still loaded, or removes them
//! with the last entry.

mod client;
mod services;

pub use client::{HttpConnector, NzbGetApi, NzbGetClient, NzbGetConnector, NzbGetError};
pub use services::register_services;

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use ha_config_entries::{ConfigData, ConfigEntry, ConfigEntryUpdate, Integration, SetupError};
use ha_service_registry::SharedServiceRegistry;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info};

pub const DOMAIN: &str = "nzbget";

pub const ATTR_SPEED: &str = "speed";
pub const DEFAULT_SPEED_LIMIT: u64 = 1000;

pub const SERVICE_PAUSE: &str = "pause";
pub const SERVICE_RESUME: &str = "resume";
pub const SERVICE_SET_SPEED: &str = "set_speed";

pub const CONF_PATH: &str = "path";
pub const DEFAULT_URL_BASE: &str = "/";
pub const DEFAULT_PORT: u16 = 6789;

/// Connection data stored in an entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NzbGetConfig {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub ssl: bool,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_path")]
    pub path: String,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_path() -> String {
    DEFAULT_URL_BASE.to_string()
}

impl NzbGetConfig {
    pub fn from_data(data: &ConfigData) -> Result<Self, serde_json::Error> {
        let object = data.clone().into_iter().collect();
        serde_json::from_value(Value::Object(object))
    }
}

/// The `nzbget` integration
pub struct NzbGet {
    services: SharedServiceRegistry,
    connector: Arc<dyn NzbGetConnector>,
    /// Clients of loaded entries by entry id
    clients: DashMap<String, Arc<dyn NzbGetApi>>,
}

impl NzbGet {
    pub fn new(services: SharedServiceRegistry, connector: Arc<dyn NzbGetConnector>) -> Self {
        Self {
            services,
            connector,
            clients: DashMap::new(),
        }
    }

    pub fn client(&self, entry_id: &str) -> Option<Arc<dyn NzbGetApi>> {
        self.clients.get(entry_id).map(|c| c.value().clone())
    }

    pub fn loaded_entries(&self) -> usize {
        self.clients.len()
    }
}

#[async_trait]
impl Integration for NzbGet {
    fn domain(&self) -> &str {
        DOMAIN
    }

    fn version(&self) -> u32 {
        2
    }

    fn minor_version(&self) -> u32 {
        0
    }

    async fn async_setup_entry(&self, entry: &ConfigEntry) -> Result<(), SetupError> {
        let config = NzbGetConfig::from_data(&entry.data)
            .map_err(|e| SetupError::Failed(format!("invalid entry data: {}", e)))?;

        let client = self
            .connector
            .connect(&config)
            .await
            .map_err(|e| match e {
                NzbGetError::Unauthorized => SetupError::AuthFailed(e.to_string()),
                other => SetupError::NotReady(other.to_string()),
            })?;

        self.clients.insert(entry.entry_id.clone(), client.clone());
        register_services(&self.services, client).map_err(|e| SetupError::Failed(e.to_string()))?;

        info!("NZBGet {}:{} set up", config.host, config.port);
        Ok(())
    }

    async fn async_unload_entry(&self, entry: &ConfigEntry) -> Result<bool, SetupError> {
        self.clients.remove(&entry.entry_id);

        let remaining = self.clients.iter().next().map(|c| c.value().clone());
        match remaining {
            Some(client) => register_services(&self.services, client)
                .map_err(|e| SetupError::Failed(e.to_string()))?,
            None => {
                let removed = self.services.unregister_domain(DOMAIN);
                debug!("Last NZBGet entry unloaded, removed {} services", removed);
            }
        }
        Ok(true)
    }

    async fn async_migrate_entry(
        &self,
        entry: &ConfigEntry,
    ) -> Result<Option<ConfigEntryUpdate>, SetupError> {
        debug!(
            "Migrating configuration from version {}.{}",
            entry.version, entry.minor_version
        );

        if entry.version != 1 {
            return Ok(None);
        }

        let mut data = entry.data.clone();
        data.insert(CONF_PATH.to_string(), json!(DEFAULT_URL_BASE));

        debug!("Migration to configuration version 2.0 successful");
        Ok(Some(ConfigEntryUpdate::new().data(data).version(2, 0)))
    }

    fn reload_on_update(&self) -> bool {
        true
    }
}
