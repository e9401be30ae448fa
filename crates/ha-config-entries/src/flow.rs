//! Config flows
//!
//! A config flow is a short wizard that ends in a new config entry, an
//! update of an existing one, or an abort. Integrations implement
//! [`ConfigFlow`]; each step receives the [`FlowContext`] of its flow and
//! returns a [`FlowResult`] telling the host what to do next.
//!
//! Aborting from deep inside a step is done by returning
//! `Err(FlowError::Abort(reason))`; the [`FlowManager`](crate::FlowManager)
//! turns it into an abort result.

use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

use crate::entry::{ConfigData, ConfigEntry, ConfigEntrySource, ConfigEntryUpdate};
use crate::manager::{ConfigEntries, ConfigEntriesError, ConfigEntriesResult};
use crate::schema::DataSchema;

/// Field name -> error key, rendered next to the form
pub type FlowErrors = HashMap<String, String>;

/// Abort reason when the flow's unique id belongs to an existing entry
pub const ABORT_ALREADY_CONFIGURED: &str = "already_configured";
/// Abort reason when an equivalent flow is already running
pub const ABORT_ALREADY_IN_PROGRESS: &str = "already_in_progress";
/// Abort reason after a successful re-authentication
pub const ABORT_REAUTH_SUCCESSFUL: &str = "reauth_successful";

#[derive(Debug, Error)]
pub enum FlowError {
    /// The flow ends with an abort result carrying this reason
    #[error("flow aborted: {0}")]
    Abort(String),

    #[error("no config flow registered for {0}")]
    UnknownHandler(String),

    #[error("unknown flow: {0}")]
    UnknownFlow(String),

    #[error("flow {handler} has no step {step_id}")]
    UnknownStep { handler: String, step_id: String },

    #[error("user input malformed: {0}")]
    InvalidInput(String),

    /// A step showed a form whose schema does not compile
    #[error("{0}")]
    InvalidForm(String),

    #[error("config entry not found: {0}")]
    EntryNotFound(String),

    #[error(transparent)]
    Store(#[from] ConfigEntriesError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowResultType {
    Form,
    CreateEntry,
    Abort,
}

/// Outcome of one flow step
#[derive(Debug, Clone, Serialize)]
pub struct FlowResult {
    pub flow_id: String,
    /// Integration domain
    pub handler: String,
    #[serde(rename = "type")]
    pub result_type: FlowResultType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step_id: Option<String>,
    /// Always present, empty if the result has no form
    pub data_schema: DataSchema,
    pub errors: Option<FlowErrors>,
    pub description_placeholders: Option<HashMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Entry data (create_entry only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<ConfigData>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub minor_version: Option<u32>,
    /// Id of the entry created by a create_entry result
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
}

impl FlowResult {
    fn new(ctx: &FlowContext, result_type: FlowResultType) -> Self {
        Self {
            flow_id: ctx.flow_id.clone(),
            handler: ctx.handler.clone(),
            result_type,
            step_id: None,
            data_schema: DataSchema::new(),
            errors: None,
            description_placeholders: None,
            title: None,
            reason: None,
            data: None,
            version: None,
            minor_version: None,
            result: None,
        }
    }

    pub fn is_form(&self) -> bool {
        self.result_type == FlowResultType::Form
    }

    pub fn is_abort(&self) -> bool {
        self.result_type == FlowResultType::Abort
    }

    pub fn is_create_entry(&self) -> bool {
        self.result_type == FlowResultType::CreateEntry
    }

    /// Error key for a field (`"base"` for form-wide errors)
    pub fn error(&self, field: &str) -> Option<&str> {
        self.errors.as_ref()?.get(field).map(String::as_str)
    }
}

/// Where flows persist and look up config entries
#[async_trait]
pub trait ConfigStore: Send + Sync {
    fn entry(&self, entry_id: &str) -> Option<ConfigEntry>;

    fn entry_by_unique_id(&self, domain: &str, unique_id: &str) -> Option<ConfigEntry>;

    /// Persist a new entry and set it up
    async fn add_entry(&self, entry: ConfigEntry) -> ConfigEntriesResult<ConfigEntry>;

    async fn update_entry(
        &self,
        entry_id: &str,
        update: ConfigEntryUpdate,
    ) -> ConfigEntriesResult<ConfigEntry>;

    async fn reload_entry(&self, entry_id: &str) -> ConfigEntriesResult<()>;
}

#[async_trait]
impl ConfigStore for ConfigEntries {
    fn entry(&self, entry_id: &str) -> Option<ConfigEntry> {
        self.get(entry_id)
    }

    fn entry_by_unique_id(&self, domain: &str, unique_id: &str) -> Option<ConfigEntry> {
        self.get_by_unique_id(domain, unique_id)
    }

    async fn add_entry(&self, entry: ConfigEntry) -> ConfigEntriesResult<ConfigEntry> {
        let entry = self.add(entry).await?;
        // The entry exists even when the device is not ready yet
        if let Err(err) = self.setup(&entry.entry_id).await {
            warn!("Setup of new entry {} failed: {}", entry.entry_id, err);
        }
        Ok(self.get(&entry.entry_id).unwrap_or(entry))
    }

    async fn update_entry(
        &self,
        entry_id: &str,
        update: ConfigEntryUpdate,
    ) -> ConfigEntriesResult<ConfigEntry> {
        self.update(entry_id, update).await
    }

    async fn reload_entry(&self, entry_id: &str) -> ConfigEntriesResult<()> {
        self.reload(entry_id).await
    }
}

/// Per-flow state kept by the manager between steps
pub struct FlowContext {
    pub flow_id: String,
    /// Integration domain
    pub handler: String,
    pub source: ConfigEntrySource,
    unique_id: Option<String>,
    entry_id: Option<String>,
    store: Arc<dyn ConfigStore>,
}

impl FlowContext {
    pub fn new(
        flow_id: impl Into<String>,
        handler: impl Into<String>,
        source: ConfigEntrySource,
        store: Arc<dyn ConfigStore>,
    ) -> Self {
        Self {
            flow_id: flow_id.into(),
            handler: handler.into(),
            source,
            unique_id: None,
            entry_id: None,
            store,
        }
    }

    /// Bind the flow to an existing entry (re-authentication)
    pub fn with_entry_id(mut self, entry_id: impl Into<String>) -> Self {
        self.entry_id = Some(entry_id.into());
        self
    }

    pub fn unique_id(&self) -> Option<&str> {
        self.unique_id.as_deref()
    }

    pub fn entry_id(&self) -> Option<&str> {
        self.entry_id.as_deref()
    }

    /// Identity the created entry will carry
    pub fn set_unique_id(&mut self, unique_id: impl Into<String>) {
        self.unique_id = Some(unique_id.into());
    }

    /// Abort with `already_configured` when an entry of this domain already
    /// has the flow's unique id. Never touches the store.
    pub fn abort_if_unique_id_configured(&self) -> Result<(), FlowError> {
        let Some(unique_id) = self.unique_id.as_deref() else {
            return Ok(());
        };

        if self
            .store
            .entry_by_unique_id(&self.handler, unique_id)
            .is_some()
        {
            debug!(
                flow_id = %self.flow_id,
                unique_id, "Unique id already configured"
            );
            return Err(FlowError::Abort(ABORT_ALREADY_CONFIGURED.to_string()));
        }
        Ok(())
    }

    /// The entry a reauth flow was started for
    pub fn reauth_entry(&self) -> Result<ConfigEntry, FlowError> {
        let entry_id = self
            .entry_id
            .as_deref()
            .ok_or_else(|| FlowError::EntryNotFound(format!("flow {}", self.flow_id)))?;
        self.store
            .entry(entry_id)
            .ok_or_else(|| FlowError::EntryNotFound(entry_id.to_string()))
    }

    pub fn show_form(
        &self,
        step_id: impl Into<String>,
        data_schema: DataSchema,
        errors: FlowErrors,
    ) -> FlowResult {
        let mut result = FlowResult::new(self, FlowResultType::Form);
        result.step_id = Some(step_id.into());
        result.data_schema = data_schema;
        result.errors = (!errors.is_empty()).then_some(errors);
        result
    }

    pub fn create_entry(&self, title: impl Into<String>, data: ConfigData) -> FlowResult {
        let mut result = FlowResult::new(self, FlowResultType::CreateEntry);
        result.title = Some(title.into());
        result.data = Some(data);
        result
    }

    pub fn abort(&self, reason: impl Into<String>) -> FlowResult {
        let mut result = FlowResult::new(self, FlowResultType::Abort);
        result.reason = Some(reason.into());
        result
    }

    /// Merge `data_updates` into an entry, reload it and finish the flow
    /// with `reauth_successful`. A failed reload is logged; the update
    /// stays.
    pub async fn update_reload_and_abort(
        &self,
        entry: &ConfigEntry,
        data_updates: ConfigData,
    ) -> Result<FlowResult, FlowError> {
        self.store
            .update_entry(
                &entry.entry_id,
                ConfigEntryUpdate::new().data_updates(data_updates),
            )
            .await?;

        if let Err(err) = self.store.reload_entry(&entry.entry_id).await {
            warn!("Reload of entry {} failed: {}", entry.entry_id, err);
        }

        Ok(self.abort(ABORT_REAUTH_SUCCESSFUL))
    }
}

/// A config flow implementation.
///
/// The manager calls [`ConfigFlow::async_step`] with the step id of the
/// form that was last shown, or with the source's entry step (`user`,
/// `import`, `reauth`) when the flow starts.
#[async_trait]
pub trait ConfigFlow: Send {
    /// Version written into created entries
    fn version(&self) -> u32 {
        1
    }

    fn minor_version(&self) -> u32 {
        1
    }

    async fn async_step(
        &mut self,
        ctx: &mut FlowContext,
        step_id: &str,
        user_input: Option<ConfigData>,
    ) -> Result<FlowResult, FlowError>;
}
