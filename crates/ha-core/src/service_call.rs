//! Service call type

use crate::Context;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// A request to run `domain.service` with some data.
///
/// By the time a handler sees a call, its data has already been validated
/// against the service schema and schema defaults have been filled in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceCall {
    /// Integration domain (e.g. "nzbget")
    pub domain: String,

    /// Service name (e.g. "set_speed")
    pub service: String,

    /// Call data, always a JSON object
    pub data: serde_json::Value,

    pub context: Context,
}

impl ServiceCall {
    pub fn new(
        domain: impl Into<String>,
        service: impl Into<String>,
        data: serde_json::Value,
        context: Context,
    ) -> Self {
        Self {
            domain: domain.into(),
            service: service.into(),
            data,
            context,
        }
    }

    /// `domain.service`
    pub fn service_id(&self) -> String {
        format!("{}.{}", self.domain, self.service)
    }

    /// Typed value of a data key, `None` when missing or of the wrong type
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.data
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }
}
