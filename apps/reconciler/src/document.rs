use std::fmt::{Display, Formatter};
use std::sync::Arc;

use azrbac_application::{
    NamedLockRegistry, PimAssignmentService, PimSchedulesApi, PolicyService, ReconcileSettings,
    RoleAssignmentService, RoleAssignmentsApi, RoleDefinitionsApi, RoleManagementPoliciesApi,
};
use azrbac_core::{AppError, AppResult};
use azrbac_domain::{
    ChangeSet, PimAssignmentInput, PimAssignmentKind, PolicyConfig, RoleAssignmentId,
    RoleAssignmentInput,
};
use serde::Deserialize;
use tracing::info;

/// Desired-state document: `{"resources": [...]}`.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DesiredStateDocument {
    pub resources: Vec<DesiredResource>,
}

impl DesiredStateDocument {
    pub fn parse(raw: &str) -> AppResult<Self> {
        serde_json::from_str(raw).map_err(|error| {
            AppError::Validation(format!("invalid desired state document: {error}"))
        })
    }
}

/// Whether the entry should exist remotely.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Ensure {
    #[default]
    Present,
    Absent,
}

/// One reconcilable entry, tagged by `kind`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DesiredResource {
    RoleAssignment {
        #[serde(default)]
        ensure: Ensure,
        properties: RoleAssignmentInput,
    },
    PimActiveAssignment {
        #[serde(default)]
        ensure: Ensure,
        properties: PimAssignmentInput,
    },
    PimEligibleAssignment {
        #[serde(default)]
        ensure: Ensure,
        properties: PimAssignmentInput,
    },
    RoleManagementPolicy {
        #[serde(default)]
        ensure: Ensure,
        properties: PolicyConfig,
    },
}

impl DesiredResource {
    /// Short label used in logs and the run summary.
    pub fn label(&self) -> String {
        match self {
            Self::RoleAssignment { properties, .. } => format!(
                "role_assignment {}/{}",
                properties.scope,
                properties.name.map(|name| name.to_string()).unwrap_or_default()
            ),
            Self::PimActiveAssignment { properties, .. } => {
                format!("pim_active_assignment {}|{}", properties.scope, properties.principal_id)
            }
            Self::PimEligibleAssignment { properties, .. } => {
                format!("pim_eligible_assignment {}|{}", properties.scope, properties.principal_id)
            }
            Self::RoleManagementPolicy { properties, .. } => format!(
                "role_management_policy {}|{}",
                properties.scope, properties.role_definition_id
            ),
        }
    }
}

/// What applying one entry did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Created,
    Updated,
    Deleted,
    Unchanged,
    Forgotten,
}

impl Display for Outcome {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        formatter.write_str(match self {
            Self::Created => "created",
            Self::Updated => "updated",
            Self::Deleted => "deleted",
            Self::Unchanged => "unchanged",
            Self::Forgotten => "forgotten",
        })
    }
}

/// Applies document entries through the reconciliation services.
#[derive(Clone)]
pub struct Reconciler {
    role_assignments: RoleAssignmentService,
    active_assignments: PimAssignmentService,
    eligible_assignments: PimAssignmentService,
    policies: PolicyService,
}

impl Reconciler {
    /// Wires every service to one API implementation.
    pub fn new<Api>(api: Arc<Api>, settings: ReconcileSettings) -> Self
    where
        Api: RoleAssignmentsApi
            + RoleDefinitionsApi
            + PimSchedulesApi
            + RoleManagementPoliciesApi
            + 'static,
    {
        Self {
            role_assignments: RoleAssignmentService::new(api.clone(), api.clone(), settings),
            active_assignments: PimAssignmentService::new(
                api.clone(),
                PimAssignmentKind::Active,
                settings,
            ),
            eligible_assignments: PimAssignmentService::new(
                api.clone(),
                PimAssignmentKind::Eligible,
                settings,
            ),
            policies: PolicyService::new(api, Arc::new(NamedLockRegistry::new()), settings),
        }
    }

    pub async fn apply(&self, resource: DesiredResource) -> AppResult<Outcome> {
        match resource {
            DesiredResource::RoleAssignment { ensure, properties } => {
                self.apply_role_assignment(ensure, properties).await
            }
            DesiredResource::PimActiveAssignment { ensure, properties } => {
                apply_pim_assignment(&self.active_assignments, ensure, properties).await
            }
            DesiredResource::PimEligibleAssignment { ensure, properties } => {
                apply_pim_assignment(&self.eligible_assignments, ensure, properties).await
            }
            DesiredResource::RoleManagementPolicy { ensure, properties } => {
                self.apply_policy(ensure, properties).await
            }
        }
    }

    async fn apply_role_assignment(
        &self,
        ensure: Ensure,
        properties: RoleAssignmentInput,
    ) -> AppResult<Outcome> {
        // Without a stable name every run would create another assignment.
        let name = properties.name.ok_or_else(|| {
            AppError::Validation(format!(
                "role assignment at '{}' needs a name to be reconciled",
                properties.scope
            ))
        })?;
        let id = RoleAssignmentId::new(properties.scope.clone(), name, properties.tenant_id)?;
        let current = self.role_assignments.read(&id).await?;

        match (ensure, current) {
            (Ensure::Present, Some(_)) => Ok(Outcome::Unchanged),
            (Ensure::Present, None) => {
                self.role_assignments.create(properties).await?;
                Ok(Outcome::Created)
            }
            (Ensure::Absent, Some(_)) => {
                self.role_assignments.delete(&id).await?;
                Ok(Outcome::Deleted)
            }
            (Ensure::Absent, None) => Ok(Outcome::Unchanged),
        }
    }

    async fn apply_policy(&self, ensure: Ensure, properties: PolicyConfig) -> AppResult<Outcome> {
        if ensure == Ensure::Absent {
            self.policies
                .delete(&properties.scope, &properties.role_definition_id)
                .await?;
            return Ok(Outcome::Forgotten);
        }

        let Some(current) = self
            .policies
            .read(&properties.scope, &properties.role_definition_id)
            .await?
        else {
            return Err(AppError::NotFound(format!(
                "no role management policy is assigned to role '{}' at scope '{}'",
                properties.role_definition_id, properties.scope
            )));
        };

        let changes = ChangeSet::between(&current.config, &properties)?;
        if changes.is_empty() {
            return Ok(Outcome::Unchanged);
        }

        info!(
            policy_id = %current.id,
            changed = ?changes.paths().collect::<Vec<_>>(),
            "updating role management policy"
        );
        self.policies.update(&properties, &changes).await?;
        Ok(Outcome::Updated)
    }
}

async fn apply_pim_assignment(
    service: &PimAssignmentService,
    ensure: Ensure,
    properties: PimAssignmentInput,
) -> AppResult<Outcome> {
    let id = properties.id()?;
    let current = service.read(&id).await?;

    match (ensure, current) {
        (Ensure::Present, Some(_)) => Ok(Outcome::Unchanged),
        (Ensure::Present, None) => {
            service.create(properties).await?;
            Ok(Outcome::Created)
        }
        (Ensure::Absent, Some(_)) => {
            service.delete(&id).await?;
            Ok(Outcome::Deleted)
        }
        (Ensure::Absent, None) => Ok(Outcome::Unchanged),
    }
}

#[cfg(test)]
mod tests;
