//! NZBGet services

use std::sync::Arc;

use ha_core::ServiceCall;
use ha_service_registry::{ServiceDescription, ServiceError, ServiceRegistry};
use serde_json::{json, Value};
use tracing::debug;

use super::client::{NzbGetApi, NzbGetError};
use super::{ATTR_SPEED, DEFAULT_SPEED_LIMIT, DOMAIN, SERVICE_PAUSE, SERVICE_RESUME, SERVICE_SET_SPEED};

fn no_data_schema() -> Value {
    json!({
        "type": "object",
        "additionalProperties": false
    })
}

fn speed_limit_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            ATTR_SPEED: {
                "type": "integer",
                "minimum": 0,
                "default": DEFAULT_SPEED_LIMIT
            }
        },
        "additionalProperties": false
    })
}

fn call_failed(err: NzbGetError) -> ServiceError {
    ServiceError::CallFailed(err.to_string())
}

/// Register `pause`, `resume` and `set_speed` bound to `api`.
///
/// Registering again rebinds the services to the newer client.
pub fn register_services(
    services: &ServiceRegistry,
    api: Arc<dyn NzbGetApi>,
) -> Result<(), ServiceError> {
    let client = api.clone();
    services.register_with_description(
        ServiceDescription::new(DOMAIN, SERVICE_PAUSE)
            .with_name("Pause")
            .with_description("Pause downloads")
            .with_schema(no_data_schema()),
        move |_call: ServiceCall| {
            let client = client.clone();
            async move { client.pause_download().await.map_err(call_failed) }
        },
    )?;

    let client = api.clone();
    services.register_with_description(
        ServiceDescription::new(DOMAIN, SERVICE_RESUME)
            .with_name("Resume")
            .with_description("Resume downloads")
            .with_schema(no_data_schema()),
        move |_call: ServiceCall| {
            let client = client.clone();
            async move { client.resume_download().await.map_err(call_failed) }
        },
    )?;

    let client = api;
    services.register_with_description(
        ServiceDescription::new(DOMAIN, SERVICE_SET_SPEED)
            .with_name("Set speed")
            .with_description("Set the download speed limit in KB/s")
            .with_schema(speed_limit_schema()),
        move |call: ServiceCall| {
            let client = client.clone();
            async move {
                let speed: u64 = call
                    .get(ATTR_SPEED)
                    .ok_or_else(|| ServiceError::InvalidData(format!("{} missing", ATTR_SPEED)))?;
                client.rate(speed).await.map_err(call_failed)
            }
        },
    )?;

    debug!("NZBGet services registered");
    Ok(())
}
