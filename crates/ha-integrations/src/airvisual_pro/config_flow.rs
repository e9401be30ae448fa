//! AirVisual Pro config flow
//!
//! Collects the node's IP address and password, checks them against the
//! device and creates an entry keyed by the device serial number. The same
//! validation backs the import path and re-authentication.

use std::mem;
use std::sync::Arc;

use anyhow::anyhow;
use async_trait::async_trait;
use ha_config_entries::{
    ConfigData, ConfigFlow, DataSchema, FieldType, FlowContext, FlowError, FlowErrors, FlowResult,
};
use serde_json::json;
use tracing::{debug, error, warn};

use super::node::{NodeConnection, NodeConnector, NodeError};
use super::{CONF_IP_ADDRESS, CONF_PASSWORD};

pub const STEP_USER: &str = "user";
pub const STEP_IMPORT: &str = "import";
pub const STEP_REAUTH: &str = "reauth";
pub const STEP_REAUTH_CONFIRM: &str = "reauth_confirm";

pub const ERROR_INVALID_AUTH: &str = "invalid_auth";
pub const ERROR_CANNOT_CONNECT: &str = "cannot_connect";
pub const ERROR_UNKNOWN: &str = "unknown";

/// Form of the `user` step
pub fn step_user_schema() -> DataSchema {
    DataSchema::new()
        .required(CONF_IP_ADDRESS, FieldType::String)
        .required(CONF_PASSWORD, FieldType::String)
}

/// Form of the `reauth_confirm` step
pub fn step_reauth_schema() -> DataSchema {
    DataSchema::new().required(CONF_PASSWORD, FieldType::String)
}

/// Outcome of a credential check.
///
/// Either `serial_number` is set or `errors` holds a `base` error key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationResult {
    pub serial_number: Option<String>,
    pub errors: FlowErrors,
}

impl ValidationResult {
    fn valid(serial_number: String) -> Self {
        Self {
            serial_number: Some(serial_number),
            errors: FlowErrors::new(),
        }
    }

    fn error(key: &str) -> Self {
        Self {
            serial_number: None,
            errors: FlowErrors::from([("base".to_string(), key.to_string())]),
        }
    }
}

/// Connect to the node, read its serial number and disconnect.
///
/// The node is disconnected on every path; a failing disconnect is only
/// logged.
pub async fn validate_credentials(
    connector: &dyn NodeConnector,
    ip_address: &str,
    password: &str,
) -> ValidationResult {
    let mut node = connector.node(ip_address, password);
    let outcome = read_serial_number(node.as_mut()).await;

    if let Err(err) = node.disconnect().await {
        warn!("Failed to disconnect from Pro at {}: {}", ip_address, err);
    }

    match outcome {
        Ok(serial_number) => ValidationResult::valid(serial_number),
        Err(NodeError::InvalidAuthentication(err)) => {
            error!("Invalid password for Pro at IP address {}: {}", ip_address, err);
            ValidationResult::error(ERROR_INVALID_AUTH)
        }
        Err(NodeError::Connection(err)) => {
            error!("Cannot connect to Pro at IP address {}: {}", ip_address, err);
            ValidationResult::error(ERROR_CANNOT_CONNECT)
        }
        Err(NodeError::Pro(err)) => {
            error!("Unknown Pro error while connecting to {}: {}", ip_address, err);
            ValidationResult::error(ERROR_UNKNOWN)
        }
        Err(NodeError::Other(err)) => {
            error!("Unknown error while connecting to {}: {:?}", ip_address, err);
            ValidationResult::error(ERROR_UNKNOWN)
        }
    }
}

async fn read_serial_number(node: &mut dyn NodeConnection) -> Result<String, NodeError> {
    node.connect().await?;
    let measurements = node.latest_measurements().await?;
    measurements
        .serial_number
        .ok_or_else(|| NodeError::Other(anyhow!("measurements carry no serial number")))
}

/// Where a flow instance stands between steps
#[derive(Debug, Default)]
enum FlowState {
    #[default]
    Start,
    AwaitingUserInput,
    AwaitingReauthInput {
        ip_address: String,
    },
    Validating,
    Done,
    Aborted,
}

impl FlowState {
    /// A validation in flight or a finished flow takes no further steps
    fn accepts_steps(&self) -> bool {
        !matches!(
            self,
            FlowState::Validating | FlowState::Done | FlowState::Aborted
        )
    }
}

/// IP address and password of a node
#[derive(Debug, Clone)]
struct ConnectionParams {
    ip_address: String,
    password: String,
}

impl ConnectionParams {
    fn from_input(input: &ConfigData) -> Result<Self, FlowError> {
        Ok(Self {
            ip_address: string_field(input, CONF_IP_ADDRESS)?,
            password: string_field(input, CONF_PASSWORD)?,
        })
    }

    fn into_data(self) -> ConfigData {
        ConfigData::from([
            (CONF_IP_ADDRESS.to_string(), json!(self.ip_address)),
            (CONF_PASSWORD.to_string(), json!(self.password)),
        ])
    }
}

fn string_field(input: &ConfigData, key: &str) -> Result<String, FlowError> {
    input
        .get(key)
        .and_then(|v| v.as_str())
        .map(String::from)
        .ok_or_else(|| FlowError::InvalidInput(format!("{} must be a string", key)))
}

/// Config flow of the `airvisual_pro` domain
pub struct AirVisualProFlow {
    connector: Arc<dyn NodeConnector>,
    state: FlowState,
}

impl AirVisualProFlow {
    pub fn new(connector: Arc<dyn NodeConnector>) -> Self {
        Self {
            connector,
            state: FlowState::Start,
        }
    }

    async fn async_step_user(
        &mut self,
        ctx: &mut FlowContext,
        user_input: Option<ConfigData>,
    ) -> Result<FlowResult, FlowError> {
        let Some(input) = user_input.filter(|input| !input.is_empty()) else {
            self.state = FlowState::AwaitingUserInput;
            return Ok(ctx.show_form(STEP_USER, step_user_schema(), FlowErrors::new()));
        };

        let params = ConnectionParams::from_input(&input)?;
        self.state = FlowState::Validating;
        let validation =
            validate_credentials(self.connector.as_ref(), &params.ip_address, &params.password)
                .await;

        let serial_number = match validation.serial_number {
            Some(serial_number) if validation.errors.is_empty() => serial_number,
            _ => {
                self.state = FlowState::AwaitingUserInput;
                return Ok(ctx.show_form(STEP_USER, step_user_schema(), validation.errors));
            }
        };

        ctx.set_unique_id(serial_number);
        if let Err(err) = ctx.abort_if_unique_id_configured() {
            self.state = FlowState::Aborted;
            return Err(err);
        }

        self.state = FlowState::Done;
        let title = params.ip_address.clone();
        Ok(ctx.create_entry(title, params.into_data()))
    }

    fn async_step_reauth(
        &mut self,
        ctx: &mut FlowContext,
        entry_data: Option<ConfigData>,
    ) -> Result<FlowResult, FlowError> {
        let entry_data = entry_data.unwrap_or_default();
        let ip_address = string_field(&entry_data, CONF_IP_ADDRESS)?;

        debug!(flow_id = %ctx.flow_id, ip_address, "Re-authenticating Pro");
        self.state = FlowState::AwaitingReauthInput { ip_address };
        Ok(ctx.show_form(STEP_REAUTH_CONFIRM, step_reauth_schema(), FlowErrors::new()))
    }

    async fn async_step_reauth_confirm(
        &mut self,
        ctx: &mut FlowContext,
        user_input: Option<ConfigData>,
    ) -> Result<FlowResult, FlowError> {
        let FlowState::AwaitingReauthInput { ip_address } = mem::take(&mut self.state) else {
            return Err(FlowError::UnknownStep {
                handler: ctx.handler.clone(),
                step_id: STEP_REAUTH_CONFIRM.to_string(),
            });
        };

        let Some(input) = user_input else {
            self.state = FlowState::AwaitingReauthInput { ip_address };
            return Ok(ctx.show_form(STEP_REAUTH_CONFIRM, step_reauth_schema(), FlowErrors::new()));
        };

        let password = string_field(&input, CONF_PASSWORD)?;
        self.state = FlowState::Validating;
        let validation =
            validate_credentials(self.connector.as_ref(), &ip_address, &password).await;

        if !validation.errors.is_empty() {
            self.state = FlowState::AwaitingReauthInput { ip_address };
            return Ok(ctx.show_form(STEP_REAUTH_CONFIRM, step_reauth_schema(), validation.errors));
        }

        let entry = ctx.reauth_entry()?;
        self.state = FlowState::Done;
        ctx.update_reload_and_abort(&entry, input).await
    }
}

#[async_trait]
impl ConfigFlow for AirVisualProFlow {
    async fn async_step(
        &mut self,
        ctx: &mut FlowContext,
        step_id: &str,
        user_input: Option<ConfigData>,
    ) -> Result<FlowResult, FlowError> {
        if !self.state.accepts_steps() {
            debug!(flow_id = %ctx.flow_id, state = ?self.state, "Step on finished flow");
            return Err(FlowError::UnknownFlow(ctx.flow_id.clone()));
        }

        match step_id {
            // Imported configs go through the same validation as the form
            STEP_USER | STEP_IMPORT => self.async_step_user(ctx, user_input).await,
            STEP_REAUTH => self.async_step_reauth(ctx, user_input),
            STEP_REAUTH_CONFIRM => self.async_step_reauth_confirm(ctx, user_input).await,
            other => Err(FlowError::UnknownStep {
                handler: ctx.handler.clone(),
                step_id: other.to_string(),
            }),
        }
    }
}
