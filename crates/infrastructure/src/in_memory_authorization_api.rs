use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use azrbac_application::{
    PimSchedulesApi, RoleAssignmentsApi, RoleDefinitionsApi, RoleManagementPoliciesApi,
};
use azrbac_core::{ApiError, ApiResult};
use azrbac_domain::{
    Expiration, MemberType, PimAssignmentKind, PolicyAssignment, PolicyRule, RoleAssignment,
    RoleAssignmentId, RoleAssignmentProperties, RoleDefinition, RoleManagementPolicy,
    ScheduleFilter, ScheduleInstance, ScheduleRequest, ScheduleRequestType, ScopeKind,
    ScopedPolicyId,
};
use chrono::Utc;
use http::StatusCode;
use tokio::sync::RwLock;
use uuid::Uuid;

mod default_rules;

use default_rules::default_policy_rules;

/// Built-in role definitions known to the simulation, as `(guid, roleName)`.
pub const BUILTIN_ROLES: [(&str, &str); 3] = [
    ("acdd72a7-3385-48ef-bd42-f606fba81ae7", "Reader"),
    ("b24988ac-6180-42a0-ab88-20f7382dd24c", "Contributor"),
    ("8e3af657-a8ff-443c-a75c-2fe8c4bcb635", "Owner"),
];

/// Call sites where [`InMemoryAuthorizationApi::inject_fault`] can queue errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultPoint {
    /// `create_role_assignment`.
    CreateRoleAssignment,
    /// `get_role_assignment`.
    GetRoleAssignment,
    /// `delete_role_assignment`.
    DeleteRoleAssignment,
    /// `create_schedule_request`.
    CreateScheduleRequest,
    /// `list_schedule_instances`.
    ListScheduleInstances,
    /// `update_policy`.
    UpdatePolicy,
}

#[derive(Debug, Clone)]
struct StoredAssignment {
    assignment: RoleAssignment,
    lagging_reads: u32,
    deleted: bool,
}

#[derive(Debug, Clone)]
struct StoredInstance {
    kind: PimAssignmentKind,
    instance: ScheduleInstance,
    lagging_reads: u32,
}

#[derive(Debug, Default)]
struct SimulationState {
    role_assignments: HashMap<String, StoredAssignment>,
    schedule_instances: Vec<StoredInstance>,
    schedule_requests: Vec<(PimAssignmentKind, ScheduleRequest)>,
    policies: HashMap<String, RoleManagementPolicy>,
    policy_assignments: Vec<PolicyAssignment>,
    faults: HashMap<FaultPoint, VecDeque<ApiError>>,
    policy_updates: u32,
}

impl SimulationState {
    fn take_fault(&mut self, point: FaultPoint) -> ApiResult<()> {
        match self.faults.get_mut(&point).and_then(VecDeque::pop_front) {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

/// Eventually consistent in-process stand-in for the ARM authorization APIs.
///
/// Writes become visible to reads only after `visibility_lag` reads, and
/// deletes stay visible for the same number of reads. Every scope gets one
/// role management policy per built-in role on first use.
#[derive(Debug, Default)]
pub struct InMemoryAuthorizationApi {
    state: RwLock<SimulationState>,
    visibility_lag: u32,
}

impl InMemoryAuthorizationApi {
    /// Creates a simulation where writes are visible immediately.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a simulation that hides writes from the next `reads` reads.
    #[must_use]
    pub fn with_visibility_lag(reads: u32) -> Self {
        Self {
            state: RwLock::new(SimulationState::default()),
            visibility_lag: reads,
        }
    }

    /// Queues an error returned by the next call at `point`.
    pub async fn inject_fault(&self, point: FaultPoint, error: ApiError) {
        self.state
            .write()
            .await
            .faults
            .entry(point)
            .or_default()
            .push_back(error);
    }

    /// Adds an existing schedule instance, visible immediately.
    pub async fn seed_schedule_instance(&self, kind: PimAssignmentKind, instance: ScheduleInstance) {
        self.state
            .write()
            .await
            .schedule_instances
            .push(StoredInstance {
                kind,
                instance,
                lagging_reads: 0,
            });
    }

    /// Returns how many policy updates were accepted.
    pub async fn policy_update_count(&self) -> u32 {
        self.state.read().await.policy_updates
    }
}

fn assignment_key(id: &RoleAssignmentId) -> String {
    id.to_string().to_ascii_lowercase()
}

fn policy_key(id: &ScopedPolicyId) -> String {
    id.to_string().to_ascii_lowercase()
}

fn builtin_role(guid: &str) -> Option<(&'static str, &'static str)> {
    BUILTIN_ROLES
        .into_iter()
        .find(|(builtin, _)| builtin.eq_ignore_ascii_case(guid))
}

fn schedule_segment(kind: PimAssignmentKind) -> &'static str {
    match kind {
        PimAssignmentKind::Active => "roleAssignmentSchedule",
        PimAssignmentKind::Eligible => "roleEligibilitySchedule",
    }
}

fn bad_request(code: &str, message: impl Into<String>) -> ApiError {
    ApiError::new(StatusCode::BAD_REQUEST, Some(code.to_owned()), message)
}

/// True when `scope` equals `ancestor` or lies below it.
fn is_within(scope: &str, ancestor: &str) -> bool {
    let scope = scope.to_ascii_lowercase();
    let ancestor = ancestor.trim_end_matches('/').to_ascii_lowercase();
    ancestor.is_empty()
        || scope == ancestor
        || scope
            .strip_prefix(ancestor.as_str())
            .is_some_and(|rest| rest.starts_with('/'))
}

fn matches_filter(principal_id: &str, role_definition_id: &str, filter: &ScheduleFilter) -> bool {
    principal_id.eq_ignore_ascii_case(&filter.principal_id)
        && role_definition_id.eq_ignore_ascii_case(&filter.role_definition_id)
}

#[async_trait]
impl RoleAssignmentsApi for InMemoryAuthorizationApi {
    async fn create_role_assignment(
        &self,
        id: &RoleAssignmentId,
        properties: &RoleAssignmentProperties,
    ) -> ApiResult<RoleAssignment> {
        let mut state = self.state.write().await;
        state.take_fault(FaultPoint::CreateRoleAssignment)?;

        if Uuid::parse_str(properties.principal_id.as_str()).is_err() {
            return Err(bad_request(
                "InvalidPrincipalId",
                format!("principal id '{}' is not a valid object id", properties.principal_id),
            ));
        }

        let role_guid = RoleDefinition::guid_from_id(properties.role_definition_id.as_str())
            .unwrap_or_default();
        if builtin_role(role_guid).is_none() {
            return Err(bad_request(
                "RoleDefinitionDoesNotExist",
                format!(
                    "role definition '{}' does not exist",
                    properties.role_definition_id
                ),
            ));
        }

        let key = assignment_key(id);
        if let Some(existing) = state.role_assignments.get(&key)
            && !existing.deleted
        {
            if existing.assignment.properties == *properties {
                return Ok(existing.assignment.clone());
            }
            return Err(ApiError::new(
                StatusCode::CONFLICT,
                Some("RoleAssignmentExists".to_owned()),
                format!("the role assignment {id} already exists"),
            ));
        }

        let assignment = RoleAssignment {
            id: id.clone(),
            properties: properties.clone(),
            role_definition_name: None,
        };
        state.role_assignments.insert(
            key,
            StoredAssignment {
                assignment: assignment.clone(),
                lagging_reads: self.visibility_lag,
                deleted: false,
            },
        );

        Ok(assignment)
    }

    async fn get_role_assignment(&self, id: &RoleAssignmentId) -> ApiResult<RoleAssignment> {
        let mut state = self.state.write().await;
        state.take_fault(FaultPoint::GetRoleAssignment)?;

        let key = assignment_key(id);
        let not_found = || {
            ApiError::not_found(
                "RoleAssignmentNotFound",
                format!("the role assignment {id} is not found"),
            )
        };
        let Some(stored) = state.role_assignments.get_mut(&key) else {
            return Err(not_found());
        };

        if stored.lagging_reads > 0 {
            stored.lagging_reads -= 1;
            return if stored.deleted {
                Ok(stored.assignment.clone())
            } else {
                Err(not_found())
            };
        }

        if stored.deleted {
            state.role_assignments.remove(&key);
            return Err(not_found());
        }

        Ok(stored.assignment.clone())
    }

    async fn delete_role_assignment(&self, id: &RoleAssignmentId) -> ApiResult<()> {
        let mut state = self.state.write().await;
        state.take_fault(FaultPoint::DeleteRoleAssignment)?;

        match state.role_assignments.get_mut(&assignment_key(id)) {
            Some(stored) if !stored.deleted => {
                stored.deleted = true;
                stored.lagging_reads = self.visibility_lag;
                Ok(())
            }
            _ => Err(ApiError::not_found(
                "RoleAssignmentDoesNotExist",
                "The role assignment does not exist.",
            )),
        }
    }
}

#[async_trait]
impl RoleDefinitionsApi for InMemoryAuthorizationApi {
    async fn get_role_definition(&self, role_definition_id: &str) -> ApiResult<RoleDefinition> {
        RoleDefinition::guid_from_id(role_definition_id)
            .and_then(builtin_role)
            .map(|(guid, role_name)| RoleDefinition {
                id: role_definition_id.to_owned(),
                name: guid.to_owned(),
                role_name: role_name.to_owned(),
            })
            .ok_or_else(|| {
                ApiError::not_found(
                    "RoleDefinitionDoesNotExist",
                    format!("the role definition '{role_definition_id}' does not exist"),
                )
            })
    }

    async fn find_role_definitions_by_name(
        &self,
        scope: &str,
        role_name: &str,
    ) -> ApiResult<Vec<RoleDefinition>> {
        let lookup_scope = ScopeKind::role_definition_scope_of(scope)
            .map_err(|error| ApiError::new(StatusCode::BAD_REQUEST, None, error.to_string()))?;
        Ok(BUILTIN_ROLES
            .into_iter()
            .filter(|(_, name)| *name == role_name)
            .map(|(guid, name)| RoleDefinition {
                id: RoleDefinition::scoped_id(lookup_scope, guid),
                name: guid.to_owned(),
                role_name: name.to_owned(),
            })
            .collect())
    }
}

#[async_trait]
impl PimSchedulesApi for InMemoryAuthorizationApi {
    async fn create_schedule_request(
        &self,
        kind: PimAssignmentKind,
        request: &ScheduleRequest,
    ) -> ApiResult<ScheduleRequest> {
        let mut state = self.state.write().await;
        state.take_fault(FaultPoint::CreateScheduleRequest)?;

        let is_target = |stored: &StoredInstance| {
            stored.kind == kind
                && stored.instance.member_type == MemberType::Direct
                && stored.instance.scope.eq_ignore_ascii_case(&request.scope)
                && stored.instance.principal_id.eq_ignore_ascii_case(&request.principal_id)
                && stored
                    .instance
                    .role_definition_id
                    .eq_ignore_ascii_case(&request.role_definition_id)
        };

        let now = Utc::now();
        match request.request_type {
            ScheduleRequestType::AdminAssign => {
                if state.schedule_instances.iter().any(is_target) {
                    return Err(bad_request(
                        "RoleAssignmentExists",
                        "The role assignment already exists.",
                    ));
                }

                let end_date_time = request.schedule.as_ref().and_then(|schedule| {
                    match &schedule.expiration {
                        Expiration::NoExpiration => None,
                        Expiration::AfterDuration { duration } => {
                            let seconds = i64::try_from(duration.total_seconds()).ok()?;
                            Some(schedule.start_date_time + chrono::Duration::seconds(seconds))
                        }
                        Expiration::AfterDateTime { end_date_time } => {
                            Some(*end_date_time)
                        }
                    }
                });

                state.schedule_instances.push(StoredInstance {
                    kind,
                    instance: ScheduleInstance {
                        id: format!(
                            "{}/providers/Microsoft.Authorization/{}Instances/{}",
                            request.scope,
                            schedule_segment(kind),
                            Uuid::new_v4()
                        ),
                        scope: request.scope.clone(),
                        role_definition_id: request.role_definition_id.clone(),
                        principal_id: request.principal_id.clone(),
                        member_type: MemberType::Direct,
                        start_date_time: request
                            .schedule
                            .as_ref()
                            .map(|schedule| schedule.start_date_time),
                        end_date_time,
                    },
                    lagging_reads: self.visibility_lag,
                });
            }
            ScheduleRequestType::AdminRemove => {
                if !state.schedule_instances.iter().any(is_target) {
                    return Err(bad_request(
                        "RoleAssignmentDoesNotExist",
                        "The role assignment does not exist.",
                    ));
                }
                state.schedule_instances.retain(|stored| !is_target(stored));
            }
            ScheduleRequestType::Other => {
                return Err(bad_request(
                    "InvalidRequestType",
                    "only AdminAssign and AdminRemove requests are supported",
                ));
            }
        }

        let stored = ScheduleRequest {
            id: format!(
                "{}/providers/Microsoft.Authorization/{}Requests/{}",
                request.scope,
                schedule_segment(kind),
                Uuid::new_v4()
            ),
            created_on: Some(now),
            ..request.clone()
        };
        state.schedule_requests.push((kind, stored.clone()));

        Ok(stored)
    }

    async fn list_schedule_instances(
        &self,
        kind: PimAssignmentKind,
        scope: &str,
        filter: &ScheduleFilter,
    ) -> ApiResult<Vec<ScheduleInstance>> {
        let mut state = self.state.write().await;
        state.take_fault(FaultPoint::ListScheduleInstances)?;

        let mut visible = Vec::new();
        for stored in &mut state.schedule_instances {
            if stored.kind != kind
                || !is_within(scope, stored.instance.scope.as_str())
                || !matches_filter(
                    &stored.instance.principal_id,
                    &stored.instance.role_definition_id,
                    filter,
                )
            {
                continue;
            }

            if stored.lagging_reads > 0 {
                stored.lagging_reads -= 1;
                continue;
            }

            let mut instance = stored.instance.clone();
            if !instance.scope.eq_ignore_ascii_case(scope) {
                instance.member_type = MemberType::Inherited;
            }
            visible.push(instance);
        }

        Ok(visible)
    }

    async fn list_schedule_requests(
        &self,
        kind: PimAssignmentKind,
        scope: &str,
        filter: &ScheduleFilter,
    ) -> ApiResult<Vec<ScheduleRequest>> {
        let state = self.state.read().await;
        Ok(state
            .schedule_requests
            .iter()
            .filter(|(stored_kind, request)| {
                *stored_kind == kind
                    && request.scope.eq_ignore_ascii_case(scope)
                    && matches_filter(&request.principal_id, &request.role_definition_id, filter)
            })
            .map(|(_, request)| request.clone())
            .collect())
    }
}

#[async_trait]
impl RoleManagementPoliciesApi for InMemoryAuthorizationApi {
    async fn get_policy(&self, id: &ScopedPolicyId) -> ApiResult<RoleManagementPolicy> {
        self.state
            .read()
            .await
            .policies
            .get(&policy_key(id))
            .cloned()
            .ok_or_else(|| {
                ApiError::not_found(
                    "RoleManagementPolicyNotFound",
                    format!("the role management policy {id} is not found"),
                )
            })
    }

    async fn update_policy(
        &self,
        id: &ScopedPolicyId,
        rules: &[PolicyRule],
    ) -> ApiResult<RoleManagementPolicy> {
        let mut state = self.state.write().await;
        state.take_fault(FaultPoint::UpdatePolicy)?;

        let Some(policy) = state.policies.get_mut(&policy_key(id)) else {
            return Err(ApiError::not_found(
                "RoleManagementPolicyNotFound",
                format!("the role management policy {id} is not found"),
            ));
        };

        let known = policy
            .rules
            .iter()
            .filter_map(PolicyRule::key)
            .collect::<Vec<_>>();
        if let Some(unknown) = rules
            .iter()
            .filter_map(PolicyRule::key)
            .find(|key| !known.contains(key))
        {
            return Err(bad_request(
                "InvalidPolicyRule",
                format!("policy rule '{unknown}' is not defined for this policy"),
            ));
        }

        policy.rules = rules.to_vec();
        let updated = policy.clone();
        state.policy_updates += 1;

        Ok(updated)
    }

    async fn list_policy_assignments(&self, scope: &str) -> ApiResult<Vec<PolicyAssignment>> {
        let mut state = self.state.write().await;

        for (guid, role_name) in BUILTIN_ROLES {
            let role_definition_id = RoleDefinition::scoped_id(scope, guid);
            let provisioned = state.policy_assignments.iter().any(|assignment| {
                assignment.scope.eq_ignore_ascii_case(scope)
                    && assignment
                        .role_definition_id
                        .eq_ignore_ascii_case(&role_definition_id)
            });
            if provisioned {
                continue;
            }

            let id = ScopedPolicyId::new(scope, Uuid::new_v4().to_string())
                .map_err(|error| bad_request("InvalidScope", error.to_string()))?;
            state.policies.insert(
                policy_key(&id),
                RoleManagementPolicy {
                    id: id.clone(),
                    display_name: Some(role_name.to_owned()),
                    description: None,
                    rules: default_policy_rules(),
                },
            );
            state.policy_assignments.push(PolicyAssignment {
                scope: scope.to_owned(),
                role_definition_id,
                policy_id: id.to_string(),
            });
        }

        Ok(state
            .policy_assignments
            .iter()
            .filter(|assignment| assignment.scope.eq_ignore_ascii_case(scope))
            .cloned()
            .collect())
    }
}
