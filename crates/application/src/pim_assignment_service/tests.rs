use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use azrbac_core::{ApiError, ApiResult, AppError};
use azrbac_domain::{
    Expiration, IsoDuration, MemberType, PimAssignmentId, PimAssignmentInput, PimAssignmentKind,
    ScheduleFilter, ScheduleInput, ScheduleInstance, ScheduleRequest, ScheduleRequestType, Ticket,
};
use chrono::Utc;
use http::StatusCode;
use tokio::sync::Mutex;

use crate::authorization_ports::PimSchedulesApi;
use crate::reconcile_settings::ReconcileSettings;
use crate::test_fixtures::{READER_ROLE_ID, SCOPE};

use super::PimAssignmentService;

const PRINCIPAL_ID: &str = "9d1b3c52-7b8e-4d62-8f0a-2e3c4d5e6f70";
const MANAGEMENT_GROUP: &str = "/providers/Microsoft.Management/managementGroups/platform";

#[derive(Default)]
struct FakeSchedulesState {
    instances: Vec<ScheduleInstance>,
    requests: Vec<ScheduleRequest>,
    create_errors: VecDeque<ApiError>,
    blank_request_ids: bool,
    create_calls: u32,
}

#[derive(Default)]
struct FakeSchedules {
    state: Mutex<FakeSchedulesState>,
}

impl FakeSchedules {
    async fn seed_instance(&self, scope: &str, member_type: MemberType) {
        let mut state = self.state.lock().await;
        let index = state.instances.len();
        state.instances.push(instance(scope, member_type, index));
    }
}

fn instance(scope: &str, member_type: MemberType, index: usize) -> ScheduleInstance {
    ScheduleInstance {
        id: format!("{scope}/providers/Microsoft.Authorization/roleAssignmentScheduleInstances/{index}"),
        scope: scope.to_owned(),
        role_definition_id: READER_ROLE_ID.to_owned(),
        principal_id: PRINCIPAL_ID.to_owned(),
        member_type,
        start_date_time: Some(Utc::now()),
        end_date_time: None,
    }
}

fn matches_filter(principal_id: &str, role_definition_id: &str, filter: &ScheduleFilter) -> bool {
    principal_id == filter.principal_id
        && role_definition_id.eq_ignore_ascii_case(&filter.role_definition_id)
}

#[async_trait]
impl PimSchedulesApi for FakeSchedules {
    async fn create_schedule_request(
        &self,
        _kind: PimAssignmentKind,
        request: &ScheduleRequest,
    ) -> ApiResult<ScheduleRequest> {
        let mut state = self.state.lock().await;
        state.create_calls += 1;
        if let Some(error) = state.create_errors.pop_front() {
            return Err(error);
        }

        let is_target = |instance: &ScheduleInstance| {
            instance.member_type == MemberType::Direct
                && instance.scope == request.scope
                && instance.principal_id == request.principal_id
        };

        match request.request_type {
            ScheduleRequestType::AdminAssign => {
                let index = state.instances.len();
                state
                    .instances
                    .push(instance(&request.scope, MemberType::Direct, index));
            }
            ScheduleRequestType::AdminRemove => {
                if !state.instances.iter().any(is_target) {
                    return Err(ApiError::new(
                        StatusCode::BAD_REQUEST,
                        Some("RoleAssignmentDoesNotExist".to_owned()),
                        "The Role assignment does not exist.",
                    ));
                }
                state.instances.retain(|instance| !is_target(instance));
            }
            ScheduleRequestType::Other => {}
        }

        let stored = ScheduleRequest {
            id: if state.blank_request_ids {
                String::new()
            } else {
                format!("request-{}", state.create_calls)
            },
            created_on: Some(Utc::now()),
            ..request.clone()
        };
        state.requests.push(stored.clone());
        Ok(stored)
    }

    async fn list_schedule_instances(
        &self,
        _kind: PimAssignmentKind,
        _scope: &str,
        filter: &ScheduleFilter,
    ) -> ApiResult<Vec<ScheduleInstance>> {
        let state = self.state.lock().await;
        Ok(state
            .instances
            .iter()
            .filter(|instance| {
                matches_filter(&instance.principal_id, &instance.role_definition_id, filter)
            })
            .cloned()
            .collect())
    }

    async fn list_schedule_requests(
        &self,
        _kind: PimAssignmentKind,
        _scope: &str,
        filter: &ScheduleFilter,
    ) -> ApiResult<Vec<ScheduleRequest>> {
        let state = self.state.lock().await;
        Ok(state
            .requests
            .iter()
            .filter(|request| {
                matches_filter(&request.principal_id, &request.role_definition_id, filter)
            })
            .cloned()
            .collect())
    }
}

fn service(schedules: Arc<FakeSchedules>) -> PimAssignmentService {
    PimAssignmentService::new(
        schedules,
        PimAssignmentKind::Eligible,
        ReconcileSettings::default(),
    )
}

fn input() -> PimAssignmentInput {
    PimAssignmentInput {
        scope: SCOPE.to_owned(),
        role_definition_id: READER_ROLE_ID.to_owned(),
        principal_id: PRINCIPAL_ID.to_owned(),
        schedule: ScheduleInput {
            duration_hours: Some(8),
            ..ScheduleInput::default()
        },
        justification: Some("  on-call rotation ".to_owned()),
        ticket: Some(Ticket {
            number: Some("CHG-1042".to_owned()),
            system: Some("ServiceNow".to_owned()),
        }),
    }
}

fn assignment_id() -> PimAssignmentId {
    PimAssignmentId::new(SCOPE, READER_ROLE_ID, PRINCIPAL_ID).unwrap_or_else(|_| unreachable!())
}

#[tokio::test(start_paused = true)]
async fn create_reads_back_direct_instance_and_schedule() {
    let schedules = Arc::new(FakeSchedules::default());
    schedules
        .seed_instance(MANAGEMENT_GROUP, MemberType::Inherited)
        .await;
    schedules.seed_instance(SCOPE, MemberType::Group).await;
    let service = service(schedules.clone());

    let created = service.create(input()).await;
    assert!(created.is_ok());
    let created = created.unwrap_or_else(|_| unreachable!());

    assert_eq!(created.id, assignment_id());
    assert_eq!(created.kind, PimAssignmentKind::Eligible);
    assert_eq!(created.instance.member_type, MemberType::Direct);
    assert_eq!(created.instance.scope, SCOPE);
    assert_eq!(created.justification.as_deref(), Some("on-call rotation"));
    assert_eq!(
        created.ticket.and_then(|ticket| ticket.number).as_deref(),
        Some("CHG-1042")
    );

    let schedule = created.schedule.unwrap_or_default();
    assert_eq!(schedule.duration_hours, Some(8));
    assert_eq!(schedule.duration_days, None);
    assert_eq!(schedule.end_date_time, None);

    let state = schedules.state.lock().await;
    let submitted = state
        .requests
        .first()
        .and_then(|request| request.schedule.as_ref())
        .map(|schedule| schedule.expiration.clone());
    assert_eq!(
        submitted,
        Some(Expiration::AfterDuration {
            duration: "PT8H".parse::<IsoDuration>().unwrap_or_else(|_| unreachable!()),
        })
    );
}

#[tokio::test(start_paused = true)]
async fn inherited_and_group_instances_are_not_the_assignment() {
    let schedules = Arc::new(FakeSchedules::default());
    schedules
        .seed_instance(MANAGEMENT_GROUP, MemberType::Inherited)
        .await;
    schedules.seed_instance(SCOPE, MemberType::Group).await;
    let service = service(schedules);

    let result = service.read(&assignment_id()).await;
    assert!(matches!(result, Ok(None)));
}

#[tokio::test(start_paused = true)]
async fn create_fails_when_direct_instance_already_exists() {
    let schedules = Arc::new(FakeSchedules::default());
    schedules.seed_instance(SCOPE, MemberType::Direct).await;
    let service = service(schedules.clone());

    let result = service.create(input()).await;
    let Err(error) = result else {
        unreachable!();
    };
    assert!(matches!(error.root(), AppError::Conflict(message) if message.contains("imported")));
    assert_eq!(schedules.state.lock().await.create_calls, 0);
}

#[tokio::test(start_paused = true)]
async fn active_duration_too_short_is_retried() {
    let schedules = Arc::new(FakeSchedules::default());
    schedules
        .state
        .lock()
        .await
        .create_errors
        .push_back(ApiError::new(
            StatusCode::BAD_REQUEST,
            Some("ActiveDurationTooShort".to_owned()),
            "The role assignment schedule duration is too short.",
        ));
    let service = service(schedules.clone());

    let created = service.create(input()).await;
    assert!(created.is_ok());
    assert_eq!(schedules.state.lock().await.create_calls, 2);
}

#[tokio::test(start_paused = true)]
async fn unreplicated_principal_is_retried_during_create() {
    let schedules = Arc::new(FakeSchedules::default());
    {
        let mut state = schedules.state.lock().await;
        state.create_errors.push_back(ApiError::new(
            StatusCode::BAD_REQUEST,
            Some("SubjectNotFound".to_owned()),
            "The subject is not found in the directory.",
        ));
        state.create_errors.push_back(ApiError::new(
            StatusCode::BAD_REQUEST,
            Some("PrincipalNotFound".to_owned()),
            "Principal does not exist in the directory.",
        ));
    }
    let service = service(schedules.clone());

    let created = service.create(input()).await;
    assert!(created.is_ok());
    assert_eq!(
        created
            .unwrap_or_else(|_| unreachable!())
            .instance
            .member_type,
        MemberType::Direct
    );
    assert_eq!(schedules.state.lock().await.create_calls, 3);
}

#[tokio::test(start_paused = true)]
async fn blank_request_id_fails_creation() {
    let schedules = Arc::new(FakeSchedules::default());
    schedules.state.lock().await.blank_request_ids = true;
    let service = service(schedules);

    let result = service.create(input()).await;
    let Err(error) = result else {
        unreachable!();
    };
    assert!(error.is_deadline_exceeded());
    assert!(matches!(
        error.root(),
        AppError::DeadlineExceeded { purpose, .. } if purpose.contains("request id")
    ));
}

#[tokio::test(start_paused = true)]
async fn end_date_and_duration_together_are_rejected_before_any_call() {
    let schedules = Arc::new(FakeSchedules::default());
    let service = service(schedules.clone());
    let mut value = input();
    value.schedule.end_date_time = Some(Utc::now() + chrono::Duration::days(1));

    let result = service.create(value).await;
    assert!(matches!(result, Err(AppError::Validation(_))));
    assert_eq!(schedules.state.lock().await.create_calls, 0);
}

#[tokio::test(start_paused = true)]
async fn delete_removes_direct_instance_and_tolerates_missing() {
    let schedules = Arc::new(FakeSchedules::default());
    schedules
        .seed_instance(MANAGEMENT_GROUP, MemberType::Inherited)
        .await;
    let service = service(schedules.clone());
    let created = service
        .create(input())
        .await
        .unwrap_or_else(|_| unreachable!());

    assert!(service.delete(&created.id).await.is_ok());
    assert!(matches!(service.read(&created.id).await, Ok(None)));
    assert_eq!(schedules.state.lock().await.instances.len(), 1);

    assert!(service.delete(&created.id).await.is_ok());
}
