//! Infrastructure adapters for application ports.

#![forbid(unsafe_code)]

mod arm_rest_client;
mod in_memory_authorization_api;

pub use arm_rest_client::ArmRestClient;
pub use in_memory_authorization_api::{BUILTIN_ROLES, FaultPoint, InMemoryAuthorizationApi};
