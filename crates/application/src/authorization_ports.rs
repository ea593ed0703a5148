use async_trait::async_trait;
use azrbac_core::ApiResult;
use azrbac_domain::{
    PimAssignmentKind, PolicyAssignment, PolicyRule, RoleAssignment, RoleAssignmentId,
    RoleAssignmentProperties, RoleDefinition, RoleManagementPolicy, ScheduleFilter,
    ScheduleInstance, ScheduleRequest, ScopedPolicyId,
};

/// Role assignment endpoints.
#[async_trait]
pub trait RoleAssignmentsApi: Send + Sync {
    /// Creates a role assignment with the given identity.
    async fn create_role_assignment(
        &self,
        id: &RoleAssignmentId,
        properties: &RoleAssignmentProperties,
    ) -> ApiResult<RoleAssignment>;

    /// Gets a role assignment. A missing assignment is a 404 error.
    async fn get_role_assignment(&self, id: &RoleAssignmentId) -> ApiResult<RoleAssignment>;

    /// Deletes a role assignment.
    async fn delete_role_assignment(&self, id: &RoleAssignmentId) -> ApiResult<()>;
}

/// Role definition endpoints.
#[async_trait]
pub trait RoleDefinitionsApi: Send + Sync {
    /// Gets a role definition by its fully qualified id.
    async fn get_role_definition(&self, role_definition_id: &str) -> ApiResult<RoleDefinition>;

    /// Finds role definitions visible at `scope` with the given display name.
    async fn find_role_definitions_by_name(
        &self,
        scope: &str,
        role_name: &str,
    ) -> ApiResult<Vec<RoleDefinition>>;
}

/// PIM schedule request and instance endpoints for both assignment kinds.
#[async_trait]
pub trait PimSchedulesApi: Send + Sync {
    /// Submits a schedule request and returns the stored request.
    async fn create_schedule_request(
        &self,
        kind: PimAssignmentKind,
        request: &ScheduleRequest,
    ) -> ApiResult<ScheduleRequest>;

    /// Lists schedule instances at `scope` matching the filter.
    async fn list_schedule_instances(
        &self,
        kind: PimAssignmentKind,
        scope: &str,
        filter: &ScheduleFilter,
    ) -> ApiResult<Vec<ScheduleInstance>>;

    /// Lists schedule requests at `scope` matching the filter.
    async fn list_schedule_requests(
        &self,
        kind: PimAssignmentKind,
        scope: &str,
        filter: &ScheduleFilter,
    ) -> ApiResult<Vec<ScheduleRequest>>;
}

/// Role management policy endpoints.
#[async_trait]
pub trait RoleManagementPoliciesApi: Send + Sync {
    /// Gets a policy with its full rule list.
    async fn get_policy(&self, id: &ScopedPolicyId) -> ApiResult<RoleManagementPolicy>;

    /// Replaces the policy's rules.
    async fn update_policy(
        &self,
        id: &ScopedPolicyId,
        rules: &[PolicyRule],
    ) -> ApiResult<RoleManagementPolicy>;

    /// Lists policy assignments at `scope`.
    async fn list_policy_assignments(&self, scope: &str) -> ApiResult<Vec<PolicyAssignment>>;
}
