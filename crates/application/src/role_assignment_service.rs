use std::sync::Arc;

use azrbac_core::{ApiError, AppError, AppResult};
use azrbac_domain::{
    RoleAssignment, RoleAssignmentDefinition, RoleAssignmentId, RoleAssignmentInput,
    RoleReference,
};
use tokio::time::Instant;
use tracing::info;

use crate::authorization_ports::{RoleAssignmentsApi, RoleDefinitionsApi};
use crate::error_classifier::{ClassificationContext, ClassifiedError, ErrorClass, OperationIntent};
use crate::poll_loop::{PollSpec, ResourceState, poll_until};
use crate::reconcile_settings::ReconcileSettings;

/// Create, read and delete of plain role assignments against an eventually
/// consistent API.
#[derive(Clone)]
pub struct RoleAssignmentService {
    assignments: Arc<dyn RoleAssignmentsApi>,
    definitions: Arc<dyn RoleDefinitionsApi>,
    settings: ReconcileSettings,
}

impl RoleAssignmentService {
    /// Creates a role assignment service.
    #[must_use]
    pub fn new(
        assignments: Arc<dyn RoleAssignmentsApi>,
        definitions: Arc<dyn RoleDefinitionsApi>,
        settings: ReconcileSettings,
    ) -> Self {
        Self {
            assignments,
            definitions,
            settings,
        }
    }

    /// Creates the assignment and waits until reads consistently see it.
    pub async fn create(&self, input: RoleAssignmentInput) -> AppResult<RoleAssignment> {
        let definition = RoleAssignmentDefinition::new(input)?;
        let id = definition.id().clone();
        let deadline = Instant::now() + self.settings.create_timeout;

        self.create_within(&definition, deadline)
            .await
            .map_err(|error| error.in_operation("creating", &id))?;
        info!(role_assignment_id = %id, "role assignment created");

        self.read(&id).await?.ok_or_else(|| {
            AppError::NotFound(format!(
                "role assignment {id} disappeared right after creation"
            ))
        })
    }

    async fn create_within(
        &self,
        definition: &RoleAssignmentDefinition,
        deadline: Instant,
    ) -> AppResult<()> {
        let id = definition.id();
        let role_definition_id = self.resolve_role(definition).await?;
        self.ensure_absent(id).await?;

        let properties = definition.properties(role_definition_id);
        let context = ClassificationContext {
            intent: OperationIntent::Create,
            cross_tenant_retry: definition.allows_cross_tenant_retry(),
        };
        let assignments = &self.assignments;
        let properties = &properties;
        let context = &context;

        poll_until(
            PollSpec::new(
                "waiting for role assignment to become created",
                vec![ResourceState::Pending],
                ResourceState::Created,
                self.settings.poll_interval,
                deadline,
            ),
            move || async move {
                assignments
                    .create_role_assignment(id, properties)
                    .await
                    .map(|created| (ResourceState::Created, created))
                    .map_err(|error| ClassifiedError::from_api(error, context))
            },
        )
        .await?;

        poll_until(
            PollSpec::new(
                "waiting for role assignment to become ready",
                vec![ResourceState::Pending],
                ResourceState::Ready,
                self.settings.poll_interval,
                deadline,
            )
            .continuous(self.settings.visibility_occurrences),
            move || async move {
                match assignments.get_role_assignment(id).await {
                    Ok(_) => Ok((ResourceState::Ready, ())),
                    Err(error) if error.is_not_found() => Ok((ResourceState::Pending, ())),
                    Err(error) => Err(read_error(error)),
                }
            },
        )
        .await
    }

    /// Reads the assignment. A missing assignment is `Ok(None)`.
    pub async fn read(&self, id: &RoleAssignmentId) -> AppResult<Option<RoleAssignment>> {
        let deadline = Instant::now() + self.settings.read_timeout;
        let assignments = &self.assignments;

        let assignment = poll_until(
            PollSpec::new(
                "waiting for role assignment to become readable",
                vec![ResourceState::Pending],
                ResourceState::Ready,
                self.settings.poll_interval,
                deadline,
            ),
            move || async move {
                match assignments.get_role_assignment(id).await {
                    Ok(assignment) => Ok((ResourceState::Ready, Some(assignment))),
                    Err(error) if error.is_not_found() => Ok((ResourceState::Ready, None)),
                    Err(error) => Err(read_error(error)),
                }
            },
        )
        .await
        .map_err(|error| error.in_operation("reading", id))?;

        let Some(assignment) = assignment else {
            return Ok(None);
        };

        let role_definition_name = match self
            .definitions
            .get_role_definition(assignment.properties.role_definition_id.as_str())
            .await
        {
            Ok(definition) => Some(definition.role_name),
            Err(error) if error.is_not_found() => None,
            Err(error) => return Err(AppError::from(error).in_operation("reading", id)),
        };

        Ok(Some(
            RoleAssignment {
                role_definition_name,
                ..assignment
            }
            .with_read_defaults(),
        ))
    }

    /// Deletes the assignment and waits until reads stop seeing it.
    /// Deleting an assignment that does not exist succeeds.
    pub async fn delete(&self, id: &RoleAssignmentId) -> AppResult<()> {
        let deadline = Instant::now() + self.settings.delete_timeout;
        let assignments = &self.assignments;
        let context = &ClassificationContext::for_intent(OperationIntent::Delete);

        poll_until(
            PollSpec::new(
                "waiting for role assignment to become deleted",
                vec![ResourceState::Pending],
                ResourceState::Deleted,
                self.settings.poll_interval,
                deadline,
            ),
            move || async move {
                match assignments.delete_role_assignment(id).await {
                    Ok(()) => Ok((ResourceState::Deleted, ())),
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
                "waiting for role assignment to become missing",
                vec![ResourceState::Found],
                ResourceState::Missing,
                self.settings.poll_interval,
                deadline,
            ),
            move || async move {
                match assignments.get_role_assignment(id).await {
                    Ok(_) => Ok((ResourceState::Found, ())),
                    Err(error) if error.is_not_found() => Ok((ResourceState::Missing, ())),
                    Err(error) => Err(read_error(error)),
                }
            },
        )
        .await
        .map_err(|error| error.in_operation("deleting", id))?;

        info!(role_assignment_id = %id, "role assignment deleted");
        Ok(())
    }

    async fn resolve_role(&self, definition: &RoleAssignmentDefinition) -> AppResult<String> {
        let role_name = match definition.role() {
            RoleReference::Id(role_definition_id) => return Ok(role_definition_id.clone()),
            RoleReference::Name(role_name) => role_name,
        };

        let scope = definition.id().scope();
        let matches = self
            .definitions
            .find_role_definitions_by_name(scope, role_name.as_str())
            .await?;

        matches
            .into_iter()
            .next()
            .map(|role| role.id)
            .ok_or_else(|| {
                AppError::Validation(format!(
                    "role definition named '{role_name}' was not found at scope '{scope}'"
                ))
            })
    }

    async fn ensure_absent(&self, id: &RoleAssignmentId) -> AppResult<()> {
        match self.assignments.get_role_assignment(id).await {
            Ok(_) => Err(AppError::Conflict(format!(
                "a role assignment with id {id} already exists - to be managed via this resource it needs to be imported"
            ))),
            Err(error) if error.is_not_found() => Ok(()),
            Err(error) => Err(error.into()),
        }
    }
}

fn read_error(error: ApiError) -> ClassifiedError {
    ClassifiedError::from_api(error, &ClassificationContext::for_intent(OperationIntent::Read))
}
