//! Core types shared by the hub crates
//!
//! Currently the service-call types: [`ServiceCall`] and the [`Context`]
//! that travels with it.

mod context;
mod service_call;

pub use context::Context;
pub use service_call::ServiceCall;
