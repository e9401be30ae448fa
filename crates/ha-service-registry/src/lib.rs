//! Service registry with async handlers
//!
//! Integrations register services (`nzbget.pause`, `nzbget.set_speed`, ...)
//! together with an optional JSON schema for the call data. The registry
//! fills in schema defaults, validates the data and routes the call to the
//! handler. Handlers forward commands; the only thing they hand back is
//! success or failure.

use dashmap::DashMap;
use ha_core::{Context, ServiceCall};
use jsonschema::JSONSchema;
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, instrument, warn};

/// Result type for service calls
pub type ServiceResult = Result<(), ServiceError>;

/// Future type for async service handlers
pub type ServiceFuture = Pin<Box<dyn Future<Output = ServiceResult> + Send>>;

/// Service handler function type
pub type ServiceHandler = Arc<dyn Fn(ServiceCall) -> ServiceFuture + Send + Sync>;

/// Errors that can occur when working with services
#[derive(Debug, Clone, Error)]
pub enum ServiceError {
    #[error("service not found: {domain}.{service}")]
    NotFound { domain: String, service: String },

    #[error("service call failed: {0}")]
    CallFailed(String),

    #[error("invalid service data: {0}")]
    InvalidData(String),

    #[error("invalid schema for {domain}.{service}: {reason}")]
    InvalidSchema {
        domain: String,
        service: String,
        reason: String,
    },
}

/// Information about a registered service
#[derive(Debug, Clone)]
pub struct ServiceDescription {
    pub domain: String,
    pub service: String,
    /// Human-readable name
    pub name: Option<String>,
    pub description: Option<String>,
    /// JSON schema for the call data
    pub schema: Option<Value>,
}

impl ServiceDescription {
    pub fn new(domain: impl Into<String>, service: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            service: service.into(),
            name: None,
            description: None,
            schema: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_schema(mut self, schema: Value) -> Self {
        self.schema = Some(schema);
        self
    }
}

struct RegisteredService {
    handler: ServiceHandler,
    validator: Option<Arc<JSONSchema>>,
    description: ServiceDescription,
}

/// All registered services, keyed by `domain.service`
pub struct ServiceRegistry {
    services: DashMap<String, RegisteredService>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self {
            services: DashMap::new(),
        }
    }

    /// Register a service without metadata besides its schema.
    ///
    /// Registering the same `domain.service` again replaces the handler.
    pub fn register<F, Fut>(
        &self,
        domain: impl Into<String>,
        service: impl Into<String>,
        handler: F,
        schema: Option<Value>,
    ) -> Result<(), ServiceError>
    where
        F: Fn(ServiceCall) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ServiceResult> + Send + 'static,
    {
        let mut description = ServiceDescription::new(domain, service);
        description.schema = schema;
        self.register_with_description(description, handler)
    }

    /// Register a service with full description
    #[instrument(skip_all, fields(domain = %description.domain, service = %description.service))]
    pub fn register_with_description<F, Fut>(
        &self,
        description: ServiceDescription,
        handler: F,
    ) -> Result<(), ServiceError>
    where
        F: Fn(ServiceCall) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ServiceResult> + Send + 'static,
    {
        let validator = match &description.schema {
            Some(schema) => Some(Arc::new(JSONSchema::compile(schema).map_err(|e| {
                ServiceError::InvalidSchema {
                    domain: description.domain.clone(),
                    service: description.service.clone(),
                    reason: e.to_string(),
                }
            })?)),
            None => None,
        };

        let key = service_key(&description.domain, &description.service);
        let handler: ServiceHandler =
            Arc::new(move |call| Box::pin(handler(call)) as ServiceFuture);

        debug!("Registering service");
        self.services.insert(
            key,
            RegisteredService {
                handler,
                validator,
                description,
            },
        );
        Ok(())
    }

    /// Call a service.
    ///
    /// `data` may be `null`, which is treated as an empty object. Missing
    /// keys that have a `default` in the schema's top-level `properties`
    /// are filled in before validation.
    #[instrument(skip(self, data, context))]
    pub async fn call(
        &self,
        domain: &str,
        service: &str,
        data: Value,
        context: Context,
    ) -> ServiceResult {
        let key = service_key(domain, service);

        let registered = self.services.get(&key).ok_or_else(|| {
            warn!("Service not found");
            ServiceError::NotFound {
                domain: domain.to_string(),
                service: service.to_string(),
            }
        })?;

        let handler = registered.handler.clone();
        let validator = registered.validator.clone();
        let schema = registered.description.schema.clone();
        drop(registered); // Release the map guard before awaiting the handler

        let mut data = match data {
            Value::Null => Value::Object(Default::default()),
            other => other,
        };
        if let Some(schema) = &schema {
            apply_defaults(schema, &mut data);
        }
        if let Some(validator) = &validator {
            validate(validator, &data)?;
        }

        debug!("Calling service");
        handler(ServiceCall::new(domain, service, data, context)).await
    }

    pub fn has_service(&self, domain: &str, service: &str) -> bool {
        self.services.contains_key(&service_key(domain, service))
    }

    pub fn get_service(&self, domain: &str, service: &str) -> Option<ServiceDescription> {
        self.services
            .get(&service_key(domain, service))
            .map(|s| s.description.clone())
    }

    /// All services of a domain
    pub fn domain_services(&self, domain: &str) -> Vec<ServiceDescription> {
        self.services
            .iter()
            .filter(|s| s.description.domain == domain)
            .map(|s| s.description.clone())
            .collect()
    }

    #[instrument(skip(self))]
    pub fn unregister(&self, domain: &str, service: &str) -> bool {
        let removed = self.services.remove(&service_key(domain, service)).is_some();
        if removed {
            debug!("Unregistered service");
        }
        removed
    }

    /// Unregister every service of a domain, returning how many were removed
    #[instrument(skip(self))]
    pub fn unregister_domain(&self, domain: &str) -> usize {
        let before = self.services.len();
        self.services.retain(|_, s| s.description.domain != domain);
        let count = before - self.services.len();

        debug!(count, "Unregistered domain services");
        count
    }

    pub fn service_count(&self) -> usize {
        self.services.len()
    }
}

impl Default for ServiceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Thread-safe wrapper for ServiceRegistry
pub type SharedServiceRegistry = Arc<ServiceRegistry>;

fn service_key(domain: &str, service: &str) -> String {
    format!("{}.{}", domain, service)
}

fn apply_defaults(schema: &Value, data: &mut Value) {
    let (Some(properties), Some(data)) = (
        schema.get("properties").and_then(Value::as_object),
        data.as_object_mut(),
    ) else {
        return;
    };

    for (key, property) in properties {
        if let Some(default) = property.get("default") {
            data.entry(key.clone()).or_insert_with(|| default.clone());
        }
    }
}

fn validate(validator: &JSONSchema, data: &Value) -> ServiceResult {
    validator.validate(data).map_err(|errors| {
        let messages: Vec<String> = errors
            .map(|e| {
                let path = e.instance_path.to_string();
                if path.is_empty() {
                    e.to_string()
                } else {
                    format!("{}: {}", path, e)
                }
            })
            .collect();
        ServiceError::InvalidData(messages.join("; "))
    })
}
