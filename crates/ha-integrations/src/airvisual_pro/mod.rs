//! AirVisual Pro
//!
//! Onboarding of AirVisual Pro monitors. Entries are created by the
//! [`AirVisualProFlow`] from the UI, from an `airvisual_pro:` YAML block, or
//! updated in place by re-authentication.

mod config_flow;
mod node;

pub use config_flow::{
    step_reauth_schema, step_user_schema, validate_credentials, AirVisualProFlow,
    ValidationResult, ERROR_CANNOT_CONNECT, ERROR_INVALID_AUTH, ERROR_UNKNOWN, STEP_IMPORT,
    STEP_REAUTH, STEP_REAUTH_CONFIRM, STEP_USER,
};
pub use node::{NodeConnection, NodeConnector, NodeError, NodeMeasurements};

use std::sync::Arc;

use ha_config_entries::{ConfigData, ConfigFlow, FlowError, FlowInit, FlowManager, FlowResult};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};

pub const DOMAIN: &str = "airvisual_pro";

pub const CONF_IP_ADDRESS: &str = "ip_address";
pub const CONF_PASSWORD: &str = "password";

/// One node from the `airvisual_pro:` YAML block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AirVisualProImportConfig {
    pub ip_address: String,
    pub password: String,
}

impl AirVisualProImportConfig {
    /// Parse the body of an `airvisual_pro:` block (a list of nodes)
    pub fn from_yaml(yaml: &str) -> Result<Vec<Self>, serde_yaml::Error> {
        serde_yaml::from_str(yaml)
    }

    fn to_data(&self) -> ConfigData {
        ConfigData::from([
            (CONF_IP_ADDRESS.to_string(), json!(self.ip_address)),
            (CONF_PASSWORD.to_string(), json!(self.password)),
        ])
    }
}

/// Register the config flow of the domain
pub fn register(flows: &FlowManager, connector: Arc<dyn NodeConnector>) {
    flows.register(
        DOMAIN,
        Arc::new(move || Box::new(AirVisualProFlow::new(connector.clone())) as Box<dyn ConfigFlow>),
    );
}

/// Start one import flow per configured node
pub async fn async_import_from_yaml(
    flows: &FlowManager,
    configs: &[AirVisualProImportConfig],
) -> Vec<Result<FlowResult, FlowError>> {
    let mut results = Vec::with_capacity(configs.len());

    for config in configs {
        let result = flows
            .async_init(DOMAIN, FlowInit::Import(config.to_data()))
            .await;

        match &result {
            Ok(flow) if flow.is_create_entry() => {
                info!("Imported AirVisual Pro at {}", config.ip_address)
            }
            Ok(flow) if flow.is_abort() => info!(
                "Skipped import of AirVisual Pro at {}: {}",
                config.ip_address,
                flow.reason.as_deref().unwrap_or_default()
            ),
            Ok(_) => warn!(
                "Import of AirVisual Pro at {} needs user input",
                config.ip_address
            ),
            Err(err) => warn!(
                "Import of AirVisual Pro at {} failed: {}",
                config.ip_address, err
            ),
        }
        results.push(result);
    }

    results
}
