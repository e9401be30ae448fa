//! Fakes shared by the integration tests
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use ha_config_entries::{ConfigEntries, FlowManager, Storage};
use ha_integrations::airvisual_pro::{NodeConnection, NodeConnector, NodeError, NodeMeasurements};
use ha_integrations::nzbget::{NzbGetApi, NzbGetConfig, NzbGetConnector, NzbGetError};
use tempfile::TempDir;

pub fn config_entries() -> (TempDir, Arc<ConfigEntries>) {
    let temp_dir = TempDir::new().unwrap();
    let storage = Arc::new(Storage::new(temp_dir.path()));
    (temp_dir, Arc::new(ConfigEntries::new(storage)))
}

pub fn flow_manager(entries: &Arc<ConfigEntries>) -> FlowManager {
    FlowManager::new(entries.clone())
}

// =============================================================================
// AirVisual Pro
// =============================================================================

#[derive(Debug, Clone)]
pub enum NodeBehavior {
    /// Accepts `password` and reports `serial`
    Online { password: String, serial: String },
    /// Node answers with an error of its own
    Faulty,
    /// Measurements come back without a serial number
    Anonymous { password: String },
}

/// Nodes by IP address; unknown addresses are unreachable
#[derive(Default)]
pub struct FakeNodes {
    nodes: Mutex<HashMap<String, NodeBehavior>>,
    connects: Arc<AtomicUsize>,
    disconnects: Arc<AtomicUsize>,
}

impl FakeNodes {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add(&self, ip_address: &str, behavior: NodeBehavior) {
        self.nodes
            .lock()
            .unwrap()
            .insert(ip_address.to_string(), behavior);
    }

    pub fn online(&self, ip_address: &str, password: &str, serial: &str) {
        self.add(
            ip_address,
            NodeBehavior::Online {
                password: password.to_string(),
                serial: serial.to_string(),
            },
        );
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }
}

impl NodeConnector for FakeNodes {
    fn node(&self, ip_address: &str, password: &str) -> Box<dyn NodeConnection> {
        Box::new(FakeNode {
            ip_address: ip_address.to_string(),
            password: password.to_string(),
            behavior: self.nodes.lock().unwrap().get(ip_address).cloned(),
            connects: self.connects.clone(),
            disconnects: self.disconnects.clone(),
        })
    }
}

struct FakeNode {
    ip_address: String,
    password: String,
    behavior: Option<NodeBehavior>,
    connects: Arc<AtomicUsize>,
    disconnects: Arc<AtomicUsize>,
}

#[async_trait]
impl NodeConnection for FakeNode {
    async fn connect(&mut self) -> Result<(), NodeError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        match &self.behavior {
            None => Err(NodeError::Connection(format!(
                "no route to {}",
                self.ip_address
            ))),
            Some(NodeBehavior::Online { password, .. })
            | Some(NodeBehavior::Anonymous { password })
                if *password != self.password =>
            {
                Err(NodeError::InvalidAuthentication("wrong password".to_string()))
            }
            Some(_) => Ok(()),
        }
    }

    async fn latest_measurements(&mut self) -> Result<NodeMeasurements, NodeError> {
        match &self.behavior {
            Some(NodeBehavior::Online { serial, .. }) => Ok(NodeMeasurements {
                serial_number: Some(serial.clone()),
                ..Default::default()
            }),
            Some(NodeBehavior::Anonymous { .. }) => Ok(NodeMeasurements::default()),
            Some(NodeBehavior::Faulty) => Err(NodeError::Pro("samba share unavailable".to_string())),
            None => Err(NodeError::Connection("not connected".to_string())),
        }
    }

    async fn disconnect(&mut self) -> Result<(), NodeError> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// =============================================================================
// NZBGet
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerMode {
    Up,
    Down,
    Unauthorized,
}

/// Server side of the fake: records every command it receives
pub struct FakeNzbGet {
    mode: Mutex<ServerMode>,
    commands: Mutex<Vec<String>>,
    /// Host of the client that sent each command
    senders: Mutex<Vec<String>>,
    configs: Mutex<Vec<NzbGetConfig>>,
}

impl FakeNzbGet {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            mode: Mutex::new(ServerMode::Up),
            commands: Mutex::new(Vec::new()),
            senders: Mutex::new(Vec::new()),
            configs: Mutex::new(Vec::new()),
        })
    }

    pub fn set_mode(&self, mode: ServerMode) {
        *self.mode.lock().unwrap() = mode;
    }

    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }

    pub fn senders(&self) -> Vec<String> {
        self.senders.lock().unwrap().clone()
    }

    /// Configs passed to `connect`, in order
    pub fn configs(&self) -> Vec<NzbGetConfig> {
        self.configs.lock().unwrap().clone()
    }

    fn record(&self, host: &str, command: String) {
        self.commands.lock().unwrap().push(command);
        self.senders.lock().unwrap().push(host.to_string());
    }
}

/// Connector handing out clients that talk to one [`FakeNzbGet`]
pub struct FakeNzbGetConnector(pub Arc<FakeNzbGet>);

#[async_trait]
impl NzbGetConnector for FakeNzbGetConnector {
    async fn connect(&self, config: &NzbGetConfig) -> Result<Arc<dyn NzbGetApi>, NzbGetError> {
        self.0.configs.lock().unwrap().push(config.clone());
        let client = FakeClient {
            server: self.0.clone(),
            host: config.host.clone(),
        };
        client.version().await?;
        Ok(Arc::new(client))
    }
}

struct FakeClient {
    server: Arc<FakeNzbGet>,
    host: String,
}

#[async_trait]
impl NzbGetApi for FakeClient {
    async fn version(&self) -> Result<String, NzbGetError> {
        match *self.server.mode.lock().unwrap() {
            ServerMode::Up => Ok("21.1".to_string()),
            ServerMode::Down => Err(NzbGetError::Rejected("version".to_string())),
            ServerMode::Unauthorized => Err(NzbGetError::Unauthorized),
        }
    }

    async fn pause_download(&self) -> Result<(), NzbGetError> {
        self.server.record(&self.host, "pausedownload".to_string());
        Ok(())
    }

    async fn resume_download(&self) -> Result<(), NzbGetError> {
        self.server.record(&self.host, "resumedownload".to_string());
        Ok(())
    }

    async fn rate(&self, limit: u64) -> Result<(), NzbGetError> {
        self.server.record(&self.host, format!("rate({})", limit));
        Ok(())
    }
}
