//! Connection to an AirVisual Pro node
//!
//! The node is reached over the local network with its IP address and the
//! password shown on the device. Transports implement [`NodeConnector`];
//! the flow only depends on these traits.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value};
use thiserror::Error;

/// Failures reported by a node
#[derive(Debug, Error)]
pub enum NodeError {
    #[error("invalid authentication: {0}")]
    InvalidAuthentication(String),

    #[error("connection failed: {0}")]
    Connection(String),

    /// Error raised by the node itself
    #[error("node error: {0}")]
    Pro(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Latest measurement payload of a node
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NodeMeasurements {
    #[serde(default)]
    pub serial_number: Option<String>,
    #[serde(flatten)]
    pub values: Map<String, Value>,
}

/// An open (or about to be opened) session with one node
#[async_trait]
pub trait NodeConnection: Send {
    async fn connect(&mut self) -> Result<(), NodeError>;

    async fn latest_measurements(&mut self) -> Result<NodeMeasurements, NodeError>;

    /// Must be safe to call when `connect` failed or was never called
    async fn disconnect(&mut self) -> Result<(), NodeError>;
}

/// Creates node sessions
pub trait NodeConnector: Send + Sync {
    fn node(&self, ip_address: &str, password: &str) -> Box<dyn NodeConnection>;
}
