use std::sync::Arc;

use azrbac_core::{ApiError, AppError, AppResult};
use azrbac_domain::{
    PimAssignment, PimAssignmentId, PimAssignmentInput, PimAssignmentKind, ScheduleInput,
    ScheduleInstance, ScheduleRequest, ScheduleRequestType, select_direct_instance,
};
use chrono::Utc;
use tokio::time::Instant;
use tracing::info;

use crate::authorization_ports::PimSchedulesApi;
use crate::error_classifier::{ClassificationContext, ClassifiedError, ErrorClass, OperationIntent};
use crate::poll_loop::{PollSpec, ResourceState, poll_until};
use crate::reconcile_settings::ReconcileSettings;

/// Create, read and delete of PIM active or eligible assignments.
///
/// Mutations go through schedule requests; the durable grant is the `Direct`
/// schedule instance for the `(scope, roleDefinitionId, principalId)` triple.
#[derive(Clone)]
pub struct PimAssignmentService {
    schedules: Arc<dyn PimSchedulesApi>,
    kind: PimAssignmentKind,
    settings: ReconcileSettings,
}

impl PimAssignmentService {
    /// Creates a service for one assignment kind.
    #[must_use]
    pub fn new(
        schedules: Arc<dyn PimSchedulesApi>,
        kind: PimAssignmentKind,
        settings: ReconcileSettings,
    ) -> Self {
        Self {
            schedules,
            kind,
            settings,
        }
    }

    /// Returns the assignment kind this service manages.
    #[must_use]
    pub fn kind(&self) -> PimAssignmentKind {
        self.kind
    }

    /// Submits an assign request and waits until the direct instance is
    /// consistently listed.
    pub async fn create(&self, input: PimAssignmentInput) -> AppResult<PimAssignment> {
        let id = input.id()?;
        let request = input.to_request(Utc::now())?;
        let deadline = Instant::now() + self.settings.create_timeout;

        self.create_within(&id, &request, deadline)
            .await
            .map_err(|error| error.in_operation("creating", &id))?;
        info!(pim_assignment_id = %id, kind = %self.kind, "PIM assignment created");

        self.read(&id).await?.ok_or_else(|| {
            AppError::NotFound(format!(
                "{} assignment {id} disappeared right after creation",
                self.kind
            ))
        })
    }

    async fn create_within(
        &self,
        id: &PimAssignmentId,
        request: &ScheduleRequest,
        deadline: Instant,
    ) -> AppResult<()> {
        if self.find_direct_instance(id).await?.is_some() {
            return Err(AppError::Conflict(format!(
                "a {} assignment with id {id} already exists - to be managed via this resource it needs to be imported",
                self.kind
            )));
        }

        let schedules = &self.schedules;
        let kind = self.kind;
        let context = &ClassificationContext::for_intent(OperationIntent::Create);

        let created = poll_until(
            PollSpec::new(
                "waiting for schedule request to become created",
                vec![ResourceState::Pending],
                ResourceState::Created,
                self.settings.poll_interval,
                deadline,
            ),
            move || async move {
                schedules
                    .create_schedule_request(kind, request)
                    .await
                    .map(|created| (ResourceState::Created, created))
                    .map_err(|error| ClassifiedError::from_api(error, context))
            },
        )
        .await?;

        let created = &created;
        let check_deadline = Instant::now() + self.settings.poll_interval;
        poll_until(
            PollSpec::new(
                "waiting for schedule request id to become created",
                vec![ResourceState::Missing],
                ResourceState::Created,
                self.settings.poll_interval,
                check_deadline.min(deadline),
            ),
            move || async move {
                let state = if created.id.trim().is_empty() {
                    ResourceState::Missing
                } else {
                    ResourceState::Created
                };
                Ok::<_, ClassifiedError>((state, ()))
            },
        )
        .await?;

        poll_until(
            PollSpec::new(
                "waiting for assignment to become found",
                vec![ResourceState::Missing],
                ResourceState::Found,
                self.settings.poll_interval,
                deadline,
            )
            .continuous(self.settings.visibility_occurrences),
            move || async move {
                list_direct_instance(&**schedules, kind, id)
                    .await
                    .map(|instance| match instance {
                        Some(_) => (ResourceState::Found, ()),
                        None => (ResourceState::Missing, ()),
                    })
                    .map_err(read_error)
            },
        )
        .await
    }

    /// Reads the direct instance and the request that produced it.
    /// A missing assignment is `Ok(None)`.
    pub async fn read(&self, id: &PimAssignmentId) -> AppResult<Option<PimAssignment>> {
        let Some(instance) = self
            .find_direct_instance(id)
            .await
            .map_err(|error| error.in_operation("reading", id))?
        else {
            return Ok(None);
        };

        let request = self
            .latest_assign_request(id)
            .await
            .map_err(|error| error.in_operation("reading", id))?;

        let (schedule, justification, ticket) = match request {
            Some(request) => (
                request.schedule.as_ref().map(ScheduleInput::from_schedule),
                request.justification,
                request.ticket,
            ),
            None => (None, None, None),
        };

        Ok(Some(PimAssignment {
            id: id.clone(),
            kind: self.kind,
            instance,
            schedule,
            justification,
            ticket,
        }))
    }

    /// Submits a remove request and waits until the direct instance is gone.
    /// Removing an assignment that does not exist succeeds.
    pub async fn delete(&self, id: &PimAssignmentId) -> AppResult<()> {
        let deadline = Instant::now() + self.settings.delete_timeout;
        let schedules = &self.schedules;
        let kind = self.kind;
        let request = &ScheduleRequest::removal(id);
        let context = &ClassificationContext::for_intent(OperationIntent::Delete);

        poll_until(
            PollSpec::new(
                "waiting for removal request to become deleted",
                vec![ResourceState::Pending],
                ResourceState::Deleted,
                self.settings.poll_interval,
                deadline,
            ),
            move || async move {
                match schedules.create_schedule_request(kind, request).await {
                    Ok(_) => Ok((ResourceState::Deleted, ())),
                    Err(error) => {
                        let classified = ClassifiedError::from_api(error, context);
                        if classified.class == ErrorClass::Ignorable {
                            Ok((ResourceState::Deleted, ()))
                        } else {
                            Err(classified)
                        }
                    }
                }
            },
        )
        .await
        .map_err(|error| error.in_operation("deleting", id))?;

        poll_until(
            PollSpec::new(
                "waiting for assignment to become missing",
                vec![ResourceState::Found],
                ResourceState::Missing,
                self.settings.poll_interval,
                deadline,
            ),
            move || async move {
                list_direct_instance(&**schedules, kind, id)
                    .await
                    .map(|instance| match instance {
                        Some(_) => (ResourceState::Found, ()),
                        None => (ResourceState::Missing, ()),
                    })
                    .map_err(read_error)
            },
        )
        .await
        .map_err(|error| error.in_operation("deleting", id))?;

        info!(pim_assignment_id = %id, kind = %self.kind, "PIM assignment deleted");
        Ok(())
    }

    async fn find_direct_instance(&self, id: &PimAssignmentId) -> AppResult<Option<ScheduleInstance>> {
        let deadline = Instant::now() + self.settings.read_timeout;
        let schedules = &self.schedules;
        let kind = self.kind;

        poll_until(
            PollSpec::new(
                "waiting for schedule instances to become readable",
                vec![ResourceState::Pending],
                ResourceState::Ready,
                self.settings.poll_interval,
                deadline,
            ),
            move || async move {
                list_direct_instance(&**schedules, kind, id)
                    .await
                    .map(|instance| (ResourceState::Ready, instance))
                    .map_err(read_error)
            },
        )
        .await
    }

    async fn latest_assign_request(&self, id: &PimAssignmentId) -> AppResult<Option<ScheduleRequest>> {
        let requests = match self
            .schedules
            .list_schedule_requests(self.kind, id.scope(), &id.filter())
            .await
        {
            Ok(requests) => requests,
            Err(error) if error.is_not_found() => return Ok(None),
            Err(error) => return Err(error.into()),
        };

        Ok(requests
            .into_iter()
            .filter(|request| {
                request.request_type == ScheduleRequestType::AdminAssign
                    && request.scope.eq_ignore_ascii_case(id.scope())
            })
            .max_by_key(|request| request.created_on))
    }
}

async fn list_direct_instance(
    schedules: &dyn PimSchedulesApi,
    kind: PimAssignmentKind,
    id: &PimAssignmentId,
) -> Result<Option<ScheduleInstance>, ApiError> {
    let instances = match schedules
        .list_schedule_instances(kind, id.scope(), &id.filter())
        .await
    {
        Ok(instances) => instances,
        Err(error) if error.is_not_found() => return Ok(None),
        Err(error) => return Err(error),
    };

    Ok(select_direct_instance(&instances, id.scope()).cloned())
}

fn read_error(error: ApiError) -> ClassifiedError {
    ClassifiedError::from_api(error, &ClassificationContext::for_intent(OperationIntent::Read))
}

#[cfg(test)]
mod tests;
