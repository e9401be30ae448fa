//! Config Entries
//!
//! Config entries are the persisted instances of integrations. This crate
//! holds the entries themselves, their lifecycle (setup, unload, reload,
//! migration) and the config flows that create and re-authenticate them.
//!
//! # Key Types
//!
//! - [`ConfigEntry`] - A single integration configuration
//! - [`ConfigEntries`] - Manager for all config entries
//! - [`Integration`] - Setup/unload/migrate hooks of an integration
//! - [`ConfigFlow`] - A config flow implementation
//! - [`FlowManager`] - Starts, resumes and finishes config flows
//!
//! # Storage
//!
//! Config entries are persisted in `.storage/core.config_entries` with
//! version tracking.

pub mod entry;
pub mod flow;
pub mod flow_manager;
pub mod integration;
pub mod manager;
pub mod schema;
pub mod state_machine;
pub mod storage;

pub use entry::{
    ConfigData, ConfigEntry, ConfigEntryDisabledBy, ConfigEntrySource, ConfigEntryState,
    ConfigEntryUpdate,
};

pub use flow::{
    ConfigFlow, ConfigStore, FlowContext, FlowError, FlowErrors, FlowResult, FlowResultType,
    ABORT_ALREADY_CONFIGURED, ABORT_ALREADY_IN_PROGRESS, ABORT_REAUTH_SUCCESSFUL,
};

pub use flow_manager::{FlowFactory, FlowInit, FlowManager, FlowSummary};

pub use integration::{Integration, SetupError};

pub use manager::{
    ConfigEntries, ConfigEntriesData, ConfigEntriesError, ConfigEntriesResult, STORAGE_KEY,
    STORAGE_MINOR_VERSION, STORAGE_VERSION,
};

pub use schema::{DataSchema, FieldType, FormField, FormValidator, SchemaError};

pub use state_machine::InvalidTransition;

pub use storage::{Storable, Storage, StorageError, StorageFile, StorageResult};
