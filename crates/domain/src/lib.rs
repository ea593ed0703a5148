//! Domain entities and invariants for Azure RBAC objects.

#![forbid(unsafe_code)]

mod change_set;
mod iso_duration;
mod pim;
mod policy;
mod policy_config;
mod policy_rule;
mod role_assignment;

pub use change_set::ChangeSet;
pub use iso_duration::IsoDuration;
pub use pim::{
    Expiration, MemberType, PimAssignment, PimAssignmentId, PimAssignmentInput,
    PimAssignmentKind, Schedule, ScheduleFilter, ScheduleInput, ScheduleInstance,
    ScheduleRequest, ScheduleRequestType, Ticket, odata_literal, select_direct_instance,
};
pub use policy::{PolicyAssignment, RoleManagementPolicy, ScopedPolicyId};
pub use policy_config::{
    ActivationRules, ActiveAssignmentRules, ApprovalStageConfig, ApproverConfig,
    EligibleAssignmentRules, ExpireAfter, NotificationLevel, NotificationRules,
    NotificationSettings, NotificationTargets, PolicyConfig,
};
pub use policy_rule::{
    ApprovalRule, ApprovalSettings, ApprovalStage, Approver, ApproverType,
    AuthenticationContextRule, EnabledRule, EnablementRule, ExpirationRule, NotificationRule,
    PolicyRule, PolicyRuleStore, RecipientType, RuleCaller, RuleEnvelope, RuleId, RuleKind,
    RuleLevel,
};
pub use role_assignment::{
    DEFAULT_CONDITION_VERSION, PrincipalType, RoleAssignment, RoleAssignmentDefinition,
    RoleAssignmentId, RoleAssignmentInput, RoleAssignmentProperties, RoleDefinition,
    RoleReference, ScopeKind,
};
