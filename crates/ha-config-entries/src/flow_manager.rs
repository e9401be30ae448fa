//! Config Flow Manager
//!
//! Starts flows, keeps suspended ones between submissions and finishes
//! them. A flow is taken out of the active map while one of its steps runs
//! and is put back only when the step shows another form, so every flow
//! instance is driven by at most one step at a time.

use dashmap::DashMap;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};
use ulid::Ulid;

use crate::entry::{ConfigData, ConfigEntry, ConfigEntrySource};
use crate::flow::{
    ConfigFlow, ConfigStore, FlowContext, FlowError, FlowResult, FlowResultType,
    ABORT_ALREADY_CONFIGURED, ABORT_ALREADY_IN_PROGRESS,
};
use crate::manager::ConfigEntriesError;
use crate::schema::FormValidator;

/// Creates a fresh flow instance for a domain
pub type FlowFactory = Arc<dyn Fn() -> Box<dyn ConfigFlow> + Send + Sync + 'static>;

/// How a flow is started
#[derive(Debug, Clone)]
pub enum FlowInit {
    /// Started from the UI, first step shows a form
    User,
    /// Started with pre-filled data (YAML import)
    Import(ConfigData),
    /// Re-collect credentials of an existing entry
    Reauth { entry_id: String },
}

impl FlowInit {
    fn source(&self) -> ConfigEntrySource {
        match self {
            FlowInit::User => ConfigEntrySource::User,
            FlowInit::Import(_) => ConfigEntrySource::Import,
            FlowInit::Reauth { .. } => ConfigEntrySource::Reauth,
        }
    }
}

/// A suspended flow as listed by [`FlowManager::async_progress`]
#[derive(Debug, Clone, Serialize)]
pub struct FlowSummary {
    pub flow_id: String,
    pub handler: String,
    pub step_id: String,
    pub source: ConfigEntrySource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unique_id: Option<String>,
}

struct ActiveFlow {
    flow: Box<dyn ConfigFlow>,
    context: FlowContext,
    /// Step of the form that was last shown
    step_id: String,
    /// Compiled schema of that form
    validator: FormValidator,
}

/// Drives config flows for all registered domains
pub struct FlowManager {
    store: Arc<dyn ConfigStore>,
    handlers: DashMap<String, FlowFactory>,
    flows: Mutex<HashMap<String, ActiveFlow>>,
}

impl FlowManager {
    pub fn new(store: Arc<dyn ConfigStore>) -> Self {
        Self {
            store,
            handlers: DashMap::new(),
            flows: Mutex::new(HashMap::new()),
        }
    }

    /// Register the flow of a domain
    pub fn register(&self, domain: impl Into<String>, factory: FlowFactory) {
        let domain = domain.into();
        debug!("Registered config flow for domain: {}", domain);
        self.handlers.insert(domain, factory);
    }

    /// Start a flow
    pub async fn async_init(&self, domain: &str, init: FlowInit) -> Result<FlowResult, FlowError> {
        let factory = self
            .handlers
            .get(domain)
            .map(|f| f.value().clone())
            .ok_or_else(|| FlowError::UnknownHandler(domain.to_string()))?;

        let flow_id = Ulid::new().to_string();
        let mut context = FlowContext::new(&flow_id, domain, init.source(), self.store.clone());

        let (step_id, input) = match init {
            FlowInit::User => ("user", None),
            FlowInit::Import(data) => ("import", Some(data)),
            FlowInit::Reauth { entry_id } => {
                let entry = self.reauth_target(domain, &entry_id)?;
                if self.reauth_in_progress(&entry_id).await {
                    debug!("Reauth for entry {} already in progress", entry_id);
                    return Ok(context.abort(ABORT_ALREADY_IN_PROGRESS));
                }
                context = context.with_entry_id(entry_id);
                ("reauth", Some(entry.data))
            }
        };

        debug!(flow_id = %flow_id, domain, step_id, "Starting config flow");
        self.run_step(factory(), context, step_id, input).await
    }

    /// Start re-authentication of an entry
    pub async fn async_start_reauth(&self, entry_id: &str) -> Result<FlowResult, FlowError> {
        let entry = self
            .store
            .entry(entry_id)
            .ok_or_else(|| FlowError::EntryNotFound(entry_id.to_string()))?;

        self.async_init(
            &entry.domain,
            FlowInit::Reauth {
                entry_id: entry.entry_id.clone(),
            },
        )
        .await
    }

    /// Resume a suspended flow with a form submission.
    ///
    /// Input that does not match the schema of the shown form is rejected
    /// with [`FlowError::InvalidInput`]; the flow stays where it was.
    pub async fn async_configure(
        &self,
        flow_id: &str,
        user_input: Option<ConfigData>,
    ) -> Result<FlowResult, FlowError> {
        let active = self
            .flows
            .lock()
            .await
            .remove(flow_id)
            .ok_or_else(|| FlowError::UnknownFlow(flow_id.to_string()))?;

        let user_input = match user_input {
            Some(input) => match active.validator.validate(&input) {
                Ok(validated) => Some(validated),
                Err(err) => {
                    debug!(flow_id, "Rejected user input: {}", err);
                    self.flows.lock().await.insert(flow_id.to_string(), active);
                    return Err(FlowError::InvalidInput(err.to_string()));
                }
            },
            None => None,
        };

        let ActiveFlow {
            flow,
            context,
            step_id,
            ..
        } = active;
        self.run_step(flow, context, &step_id, user_input).await
    }

    /// Drop a suspended flow
    pub async fn async_abort(&self, flow_id: &str) -> Result<(), FlowError> {
        self.flows
            .lock()
            .await
            .remove(flow_id)
            .map(|_| debug!(flow_id, "Config flow aborted"))
            .ok_or_else(|| FlowError::UnknownFlow(flow_id.to_string()))
    }

    /// Suspended flows
    pub async fn async_progress(&self) -> Vec<FlowSummary> {
        self.flows
            .lock()
            .await
            .values()
            .map(|active| FlowSummary {
                flow_id: active.context.flow_id.clone(),
                handler: active.context.handler.clone(),
                step_id: active.step_id.clone(),
                source: active.context.source,
                unique_id: active.context.unique_id().map(String::from),
            })
            .collect()
    }

    fn reauth_target(&self, domain: &str, entry_id: &str) -> Result<ConfigEntry, FlowError> {
        self.store
            .entry(entry_id)
            .filter(|entry| entry.domain == domain)
            .ok_or_else(|| FlowError::EntryNotFound(entry_id.to_string()))
    }

    async fn reauth_in_progress(&self, entry_id: &str) -> bool {
        self.flows.lock().await.values().any(|active| {
            active.context.source == ConfigEntrySource::Reauth
                && active.context.entry_id() == Some(entry_id)
        })
    }

    async fn run_step(
        &self,
        mut flow: Box<dyn ConfigFlow>,
        mut context: FlowContext,
        step_id: &str,
        user_input: Option<ConfigData>,
    ) -> Result<FlowResult, FlowError> {
        let result = match flow.async_step(&mut context, step_id, user_input).await {
            Ok(result) => result,
            Err(FlowError::Abort(reason)) => context.abort(reason),
            Err(err) => return Err(err),
        };

        match result.result_type {
            FlowResultType::Form => {
                let validator = result
                    .data_schema
                    .compile()
                    .map_err(|e| FlowError::InvalidForm(e.to_string()))?;
                let active = ActiveFlow {
                    step_id: result.step_id.clone().unwrap_or_default(),
                    validator,
                    flow,
                    context,
                };
                self.flows
                    .lock()
                    .await
                    .insert(result.flow_id.clone(), active);
                Ok(result)
            }
            FlowResultType::CreateEntry => {
                let version = (flow.version(), flow.minor_version());
                drop(flow);
                self.finish_create(version, &context, result).await
            }
            FlowResultType::Abort => {
                debug!(
                    flow_id = %result.flow_id,
                    reason = result.reason.as_deref().unwrap_or_default(),
                    "Config flow finished with abort"
                );
                Ok(result)
            }
        }
    }

    async fn finish_create(
        &self,
        (version, minor_version): (u32, u32),
        context: &FlowContext,
        mut result: FlowResult,
    ) -> Result<FlowResult, FlowError> {
        let mut entry = ConfigEntry::new(&context.handler, result.title.clone().unwrap_or_default())
            .with_data(result.data.clone().unwrap_or_default())
            .with_source(context.source)
            .with_version(version, minor_version);
        if let Some(unique_id) = context.unique_id() {
            entry = entry.with_unique_id(unique_id);
        }

        match self.store.add_entry(entry).await {
            Ok(entry) => {
                info!(
                    "Config flow {} created entry {} ({})",
                    context.flow_id, entry.entry_id, entry.title
                );
                result.version = Some(entry.version);
                result.minor_version = Some(entry.minor_version);
                result.result = Some(entry.entry_id);
                Ok(result)
            }
            Err(ConfigEntriesError::AlreadyExists { .. }) => {
                Ok(context.abort(ABORT_ALREADY_CONFIGURED))
            }
            Err(err) => Err(err.into()),
        }
    }
}
