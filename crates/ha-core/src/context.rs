//! Call context

use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Identifies who triggered a service call and what caused it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Context {
    /// ULID of this context
    pub id: String,

    /// User that initiated the call, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,

    /// Context this one was derived from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
}

impl Context {
    pub fn new() -> Self {
        Self {
            id: Ulid::new().to_string(),
            user_id: None,
            parent_id: None,
        }
    }

    /// Context for a call made on behalf of a user
    pub fn with_user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            ..Self::new()
        }
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}
