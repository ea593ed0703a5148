use std::sync::Arc;

use azrbac_core::{AppError, AppResult};
use azrbac_domain::{ChangeSet, PolicyConfig, PolicyRuleStore, RoleManagementPolicy, ScopedPolicyId};
use tokio::time::Instant;
use tracing::info;

use crate::authorization_ports::RoleManagementPoliciesApi;
use crate::error_classifier::{ClassificationContext, ClassifiedError, OperationIntent};
use crate::named_locks::NamedLockRegistry;
use crate::policy_rule_merger::merge_policy_rules;
use crate::policy_state::{PolicyState, flatten_policy_rules};
use crate::poll_loop::{PollSpec, ResourceState, poll_until};
use crate::reconcile_settings::ReconcileSettings;

/// Manages the role management policy Azure keeps for each
/// `(scope, roleDefinitionId)` pair.
///
/// Policies cannot be created or deleted. Create and update rewrite rule
/// values in place; delete only stops managing the policy.
#[derive(Clone)]
pub struct PolicyService {
    policies: Arc<dyn RoleManagementPoliciesApi>,
    locks: Arc<NamedLockRegistry>,
    settings: ReconcileSettings,
}

impl PolicyService {
    /// Creates a policy service sharing `locks` with other writers in the process.
    #[must_use]
    pub fn new(
        policies: Arc<dyn RoleManagementPoliciesApi>,
        locks: Arc<NamedLockRegistry>,
        settings: ReconcileSettings,
    ) -> Self {
        Self {
            policies,
            locks,
            settings,
        }
    }

    /// Finds the policy assigned to the role at the scope.
    pub async fn resolve_policy_id(
        &self,
        scope: &str,
        role_definition_id: &str,
    ) -> AppResult<Option<ScopedPolicyId>> {
        let assignments = match self.policies.list_policy_assignments(scope).await {
            Ok(assignments) => assignments,
            Err(error) if error.is_not_found() => return Ok(None),
            Err(error) => return Err(error.into()),
        };

        assignments
            .into_iter()
            .find(|assignment| {
                assignment
                    .role_definition_id
                    .eq_ignore_ascii_case(role_definition_id)
            })
            .map(|assignment| assignment.policy_id.parse::<ScopedPolicyId>())
            .transpose()
    }

    /// Applies every configured leaf to the policy.
    pub async fn create(&self, config: &PolicyConfig) -> AppResult<PolicyState> {
        let changes = ChangeSet::for_config(config)?;
        self.update(config, &changes).await
    }

    /// Reads the policy. Returns `Ok(None)` when no policy is assigned.
    pub async fn read(
        &self,
        scope: &str,
        role_definition_id: &str,
    ) -> AppResult<Option<PolicyState>> {
        let key = format!("{scope}|{role_definition_id}");
        let Some(id) = self
            .resolve_policy_id(scope, role_definition_id)
            .await
            .map_err(|error| error.in_operation("reading", &key))?
        else {
            return Ok(None);
        };

        let policy = match self.policies.get_policy(&id).await {
            Ok(policy) => policy,
            Err(error) if error.is_not_found() => return Ok(None),
            Err(error) => return Err(AppError::from(error).in_operation("reading", &key)),
        };

        policy_state(scope, role_definition_id, policy)
            .map(Some)
            .map_err(|error| error.in_operation("reading", &key))
    }

    /// Rewrites the rules fed by `changes` and submits the full rule list in
    /// one update, serialized per `(scope, roleDefinitionId)`.
    pub async fn update(&self, config: &PolicyConfig, changes: &ChangeSet) -> AppResult<PolicyState> {
        let key = config.key();
        config
            .validate()
            .map_err(|error| error.in_operation("updating", &key))?;

        let deadline = Instant::now() + self.settings.update_timeout;
        // Role ids match case-insensitively, so the lock must too.
        let lock_key = key.to_ascii_lowercase();
        let _guard = tokio::time::timeout_at(deadline, self.locks.lock(lock_key.as_str()))
            .await
            .map_err(|_| {
                AppError::DeadlineExceeded {
                    purpose: "waiting for policy lock to become free".to_owned(),
                    last_state: None,
                    last_error: None,
                }
                .in_operation("updating", &key)
            })?;

        self.update_locked(config, changes, deadline)
            .await
            .map_err(|error| error.in_operation("updating", &key))
    }

    async fn update_locked(
        &self,
        config: &PolicyConfig,
        changes: &ChangeSet,
        deadline: Instant,
    ) -> AppResult<PolicyState> {
        let scope = config.scope.as_str();
        let role_definition_id = config.role_definition_id.as_str();
        let id = self
            .resolve_policy_id(scope, role_definition_id)
            .await?
            .ok_or_else(|| {
                AppError::NotFound(format!(
                    "no role management policy is assigned for role '{role_definition_id}' at scope '{scope}'"
                ))
            })?;

        let policy = self.policies.get_policy(&id).await?;
        if changes.is_empty() {
            return policy_state(scope, role_definition_id, policy);
        }

        let store = PolicyRuleStore::from_rules(policy.rules)?;
        let rules = merge_policy_rules(&store, config, changes)?;

        let policies = &self.policies;
        let id = &id;
        let rules = rules.as_slice();
        let context = &ClassificationContext::for_intent(OperationIntent::Create);
        let updated = poll_until(
            PollSpec::new(
                "waiting for policy update to become ready",
                vec![ResourceState::Pending],
                ResourceState::Ready,
                self.settings.poll_interval,
                deadline,
            ),
            move || async move {
                policies
                    .update_policy(id, rules)
                    .await
                    .map(|updated| (ResourceState::Ready, updated))
                    .map_err(|error| ClassifiedError::from_api(error, context))
            },
        )
        .await?;

        info!(
            policy_id = %id,
            changed_paths = changes.paths().count(),
            "role management policy updated"
        );
        policy_state(scope, role_definition_id, updated)
    }

    /// Stops managing the policy. Azure keeps it with its current rules.
    pub async fn delete(&self, scope: &str, role_definition_id: &str) -> AppResult<()> {
        info!(
            scope,
            role_definition_id,
            "role management policy removed from management; remote rules are left unchanged"
        );
        Ok(())
    }
}

fn policy_state(
    scope: &str,
    role_definition_id: &str,
    policy: RoleManagementPolicy,
) -> AppResult<PolicyState> {
    let store = PolicyRuleStore::from_rules(policy.rules)?;
    Ok(PolicyState {
        id: policy.id,
        display_name: policy.display_name,
        description: policy.description,
        config: flatten_policy_rules(scope, role_definition_id, &store),
    })
}

#[cfg(test)]
mod tests;
