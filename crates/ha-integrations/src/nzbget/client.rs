//! NZBGet JSON-RPC client

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::debug;

use super::NzbGetConfig;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum NzbGetError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid username or password")]
    Unauthorized,

    #[error("{method} failed: {message}")]
    Rpc { method: String, message: String },

    #[error("{0} was refused by the server")]
    Rejected(String),
}

/// Commands the integration sends to an NZBGet server
#[async_trait]
pub trait NzbGetApi: Send + Sync {
    /// Server version, used as a connectivity check
    async fn version(&self) -> Result<String, NzbGetError>;

    async fn pause_download(&self) -> Result<(), NzbGetError>;

    async fn resume_download(&self) -> Result<(), NzbGetError>;

    /// Limit the download rate in KB/s, 0 removes the limit
    async fn rate(&self, limit: u64) -> Result<(), NzbGetError>;
}

/// Opens clients for config entries
#[async_trait]
pub trait NzbGetConnector: Send + Sync {
    async fn connect(&self, config: &NzbGetConfig) -> Result<Arc<dyn NzbGetApi>, NzbGetError>;
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcFault>,
}

#[derive(Debug, Deserialize)]
struct RpcFault {
    #[serde(default)]
    message: String,
}

/// Client for one NZBGet server
#[derive(Debug, Clone)]
pub struct NzbGetClient {
    http: reqwest::Client,
    url: String,
    username: Option<String>,
    password: Option<String>,
}

impl NzbGetClient {
    pub fn new(config: &NzbGetConfig) -> Result<Self, NzbGetError> {
        let http = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            http,
            url: rpc_url(config),
            username: config.username.clone(),
            password: config.password.clone(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value, NzbGetError> {
        debug!(method, url = %self.url, "NZBGet request");

        let mut request = self
            .http
            .post(&self.url)
            .json(&json!({"method": method, "params": params}));
        if let Some(username) = &self.username {
            request = request.basic_auth(username, self.password.as_ref());
        }

        let response = request.send().await?;
        if response.status() == StatusCode::UNAUTHORIZED {
            return Err(NzbGetError::Unauthorized);
        }
        let body: RpcResponse = response.error_for_status()?.json().await?;

        if let Some(fault) = body.error {
            return Err(NzbGetError::Rpc {
                method: method.to_string(),
                message: fault.message,
            });
        }
        Ok(body.result.unwrap_or(Value::Null))
    }

    /// Commands answer `true` when the server accepted them
    async fn command(&self, method: &str, params: Value) -> Result<(), NzbGetError> {
        match self.call(method, params).await? {
            Value::Bool(true) => Ok(()),
            _ => Err(NzbGetError::Rejected(method.to_string())),
        }
    }
}

#[async_trait]
impl NzbGetApi for NzbGetClient {
    async fn version(&self) -> Result<String, NzbGetError> {
        let result = self.call("version", json!([])).await?;
        Ok(result.as_str().unwrap_or_default().to_string())
    }

    async fn pause_download(&self) -> Result<(), NzbGetError> {
        self.command("pausedownload", json!([])).await
    }

    async fn resume_download(&self) -> Result<(), NzbGetError> {
        self.command("resumedownload", json!([])).await
    }

    async fn rate(&self, limit: u64) -> Result<(), NzbGetError> {
        self.command("rate", json!([limit])).await
    }
}

/// Builds [`NzbGetClient`]s and checks that the server answers
#[derive(Debug, Clone, Copy, Default)]
pub struct HttpConnector;

#[async_trait]
impl NzbGetConnector for HttpConnector {
    async fn connect(&self, config: &NzbGetConfig) -> Result<Arc<dyn NzbGetApi>, NzbGetError> {
        let client = NzbGetClient::new(config)?;
        let version = client.version().await?;
        debug!("Connected to NZBGet {} at {}", version, client.url());
        Ok(Arc::new(client))
    }
}

fn rpc_url(config: &NzbGetConfig) -> String {
    let scheme = if config.ssl { "https" } else { "http" };
    let path = config.path.trim_matches('/');
    if path.is_empty() {
        format!("{}://{}:{}/jsonrpc", scheme, config.host, config.port)
    } else {
        format!("{}://{}:{}/{}/jsonrpc", scheme, config.host, config.port, path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(path: &str, ssl: bool) -> NzbGetConfig {
        NzbGetConfig {
            host: "nzb.local".to_string(),
            port: 6789,
            ssl,
            username: None,
            password: None,
            path: path.to_string(),
        }
    }

    #[test]
    fn test_rpc_url() {
        assert_eq!(rpc_url(&config("/", false)), "http://nzb.local:6789/jsonrpc");
        assert_eq!(
            rpc_url(&config("/nzbget/", true)),
            "https://nzb.local:6789/nzbget/jsonrpc"
        );
        assert_eq!(
            rpc_url(&config("nzbget", false)),
            "http://nzb.local:6789/nzbget/jsonrpc"
        );
    }

    #[test]
    fn test_rpc_fault_parsing() {
        let body: RpcResponse = serde_json::from_value(json!({
            "version": "1.1",
            "error": {"name": "JSONRPCError", "code": 1, "message": "Invalid procedure"}
        }))
        .unwrap();
        assert!(body.result.is_none());
        assert_eq!(body.error.unwrap().message, "Invalid procedure");
    }
}
