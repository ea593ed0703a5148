//! Application services and ports for RBAC reconciliation.

#![forbid(unsafe_code)]

mod authorization_ports;
mod error_classifier;
mod named_locks;
mod pim_assignment_service;
mod policy_rule_merger;
mod policy_service;
mod policy_state;
mod poll_loop;
mod reconcile_settings;
mod role_assignment_service;

#[cfg(test)]
mod test_fixtures;

pub use authorization_ports::{
    PimSchedulesApi, RoleAssignmentsApi, RoleDefinitionsApi, RoleManagementPoliciesApi,
};
pub use error_classifier::{
    ClassificationContext, ClassifiedError, ErrorClass, OperationIntent, classify,
};
pub use named_locks::NamedLockRegistry;
pub use pim_assignment_service::PimAssignmentService;
pub use policy_rule_merger::{feeding_paths, merge_policy_rules};
pub use policy_service::PolicyService;
pub use policy_state::{PolicyState, flatten_policy_rules};
pub use poll_loop::{PollSpec, ResourceState, poll_until};
pub use reconcile_settings::ReconcileSettings;
pub use role_assignment_service::RoleAssignmentService;
