use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use azrbac_core::{ApiError, ApiResult, AppError};
use azrbac_domain::{
    ActivationRules, ActiveAssignmentRules, ApprovalStageConfig, ApproverConfig, ApproverType,
    ChangeSet, ExpireAfter, PolicyAssignment, PolicyConfig, PolicyRule, RoleManagementPolicy,
    ScopedPolicyId,
};
use tokio::sync::Mutex;

use crate::authorization_ports::RoleManagementPoliciesApi;
use crate::named_locks::NamedLockRegistry;
use crate::reconcile_settings::ReconcileSettings;
use crate::test_fixtures::{READER_ROLE_ID, SCOPE, default_policy, policy_id};

use super::PolicyService;

#[derive(Default)]
struct Calls {
    list: u32,
    get: u32,
    update: u32,
    in_flight: u32,
    max_in_flight: u32,
}

struct FakePolicies {
    policy: Mutex<RoleManagementPolicy>,
    assigned: bool,
    update_latency: Duration,
    calls: Mutex<Calls>,
}

impl FakePolicies {
    fn new() -> Self {
        Self {
            policy: Mutex::new(default_policy()),
            assigned: true,
            update_latency: Duration::from_secs(2),
            calls: Mutex::new(Calls::default()),
        }
    }

    fn unassigned() -> Self {
        Self {
            assigned: false,
            ..Self::new()
        }
    }
}

#[async_trait]
impl RoleManagementPoliciesApi for FakePolicies {
    async fn get_policy(&self, id: &ScopedPolicyId) -> ApiResult<RoleManagementPolicy> {
        {
            let mut calls = self.calls.lock().await;
            calls.get += 1;
            calls.in_flight += 1;
            calls.max_in_flight = calls.max_in_flight.max(calls.in_flight);
        }

        let policy = self.policy.lock().await;
        if policy.id != *id {
            return Err(ApiError::not_found(
                "RoleManagementPolicyNotFound",
                format!("policy {id} was not found"),
            ));
        }
        Ok(policy.clone())
    }

    async fn update_policy(
        &self,
        id: &ScopedPolicyId,
        rules: &[PolicyRule],
    ) -> ApiResult<RoleManagementPolicy> {
        tokio::time::sleep(self.update_latency).await;

        let mut calls = self.calls.lock().await;
        calls.update += 1;
        calls.in_flight = calls.in_flight.saturating_sub(1);

        let mut policy = self.policy.lock().await;
        if policy.id != *id {
            return Err(ApiError::not_found(
                "RoleManagementPolicyNotFound",
                format!("policy {id} was not found"),
            ));
        }
        policy.rules = rules.to_vec();
        Ok(policy.clone())
    }

    async fn list_policy_assignments(&self, scope: &str) -> ApiResult<Vec<PolicyAssignment>> {
        self.calls.lock().await.list += 1;
        if !self.assigned {
            return Ok(Vec::new());
        }

        Ok(vec![PolicyAssignment {
            scope: scope.to_owned(),
            role_definition_id: READER_ROLE_ID.to_uppercase(),
            policy_id: policy_id().to_string(),
        }])
    }
}

fn service(policies: Arc<FakePolicies>) -> PolicyService {
    PolicyService::new(
        policies,
        Arc::new(NamedLockRegistry::new()),
        ReconcileSettings::default(),
    )
}

fn config() -> PolicyConfig {
    PolicyConfig {
        scope: SCOPE.to_owned(),
        role_definition_id: READER_ROLE_ID.to_owned(),
        ..PolicyConfig::default()
    }
}

#[tokio::test(start_paused = true)]
async fn read_flattens_rules_into_configuration() {
    let service = service(Arc::new(FakePolicies::new()));

    let state = service.read(SCOPE, READER_ROLE_ID).await;
    assert!(state.is_ok());
    let Some(state) = state.unwrap_or_default() else {
        unreachable!();
    };

    assert_eq!(state.id, policy_id());
    assert_eq!(state.display_name.as_deref(), Some("Reader"));

    let active = state.config.active_assignment_rules.unwrap_or_default();
    assert_eq!(active.allow_permanent, Some(false));
    assert_eq!(
        active.expire_after,
        Some(ExpireAfter {
            days: Some(180),
            hours: None,
        })
    );
    assert_eq!(active.require_justification, Some(true));
    assert_eq!(active.require_ticket_info, Some(false));

    let activation = state.config.activation_rules.unwrap_or_default();
    assert_eq!(
        activation.maximum_duration.map(|duration| duration.to_string()),
        Some("PT8H".to_owned())
    );
    assert_eq!(activation.require_approval, Some(false));
    assert_eq!(
        activation.required_conditional_access_authentication_context,
        None
    );

    let eligible = state.config.eligible_assignment_rules.unwrap_or_default();
    assert_eq!(eligible.allow_permanent, Some(true));
    assert_eq!(eligible.expire_after, None);
}

#[tokio::test(start_paused = true)]
async fn read_without_policy_assignment_is_none() {
    let policies = Arc::new(FakePolicies::unassigned());
    let service = service(policies.clone());

    let state = service.read(SCOPE, READER_ROLE_ID).await;
    assert!(matches!(state, Ok(None)));
    assert_eq!(policies.calls.lock().await.get, 0);
}

#[tokio::test(start_paused = true)]
async fn invalid_configuration_is_rejected_before_any_call() {
    let policies = Arc::new(FakePolicies::new());
    let service = service(policies.clone());
    let mut value = config();
    value.active_assignment_rules = Some(ActiveAssignmentRules {
        allow_permanent: Some(false),
        expire_after: Some(ExpireAfter {
            days: Some(0),
            hours: Some(0),
        }),
        ..ActiveAssignmentRules::default()
    });

    let result = service.create(&value).await;
    let Err(error) = result else {
        unreachable!();
    };
    assert!(matches!(error.root(), AppError::Validation(_)));

    let calls = policies.calls.lock().await;
    assert_eq!((calls.list, calls.get, calls.update), (0, 0, 0));
}

#[tokio::test(start_paused = true)]
async fn update_rewrites_only_changed_rules() {
    let policies = Arc::new(FakePolicies::new());
    let service = service(policies.clone());
    let mut value = config();
    value.active_assignment_rules = Some(ActiveAssignmentRules {
        expire_after: Some(ExpireAfter {
            days: Some(30),
            hours: None,
        }),
        ..ActiveAssignmentRules::default()
    });

    let prior = service
        .read(SCOPE, READER_ROLE_ID)
        .await
        .unwrap_or_default()
        .map(|state| state.config)
        .unwrap_or_default();
    let changes = ChangeSet::between(&prior, &value).unwrap_or_default();
    assert_eq!(
        changes.paths().collect::<Vec<_>>(),
        vec!["active_assignment_rules.expire_after.days"]
    );

    let updated = service.update(&value, &changes).await;
    assert!(updated.is_ok());
    let updated = updated.unwrap_or_else(|_| unreachable!());
    assert_eq!(
        updated
            .config
            .active_assignment_rules
            .and_then(|rules| rules.expire_after),
        Some(ExpireAfter {
            days: Some(30),
            hours: None,
        })
    );

    let before = default_policy().rules;
    let after = policies.policy.lock().await.rules.clone();
    assert_eq!(after.len(), before.len());
    let changed = before
        .iter()
        .zip(&after)
        .filter(|(old, new)| old != new)
        .filter_map(|(old, _)| old.key())
        .collect::<Vec<_>>();
    assert_eq!(changed, vec!["Expiration_Admin_Assignment".to_owned()]);
}

#[tokio::test(start_paused = true)]
async fn empty_change_set_skips_the_update_call() {
    let policies = Arc::new(FakePolicies::new());
    let service = service(policies.clone());

    let state = service.update(&config(), &ChangeSet::new()).await;
    assert!(state.is_ok());
    assert_eq!(policies.calls.lock().await.update, 0);
}

#[tokio::test(start_paused = true)]
async fn concurrent_updates_for_the_same_policy_are_serialized() {
    let policies = Arc::new(FakePolicies::new());
    let service = service(policies.clone());

    let mut expiry = config();
    expiry.active_assignment_rules = Some(ActiveAssignmentRules {
        expire_after: Some(ExpireAfter {
            days: Some(90),
            hours: None,
        }),
        ..ActiveAssignmentRules::default()
    });
    let mut approval = config();
    approval.activation_rules = Some(ActivationRules {
        require_approval: Some(true),
        approval_stage: Some(ApprovalStageConfig {
            primary_approvers: BTreeSet::from([ApproverConfig {
                object_id: "0f1e2d3c-4b5a-4978-8695-a4b3c2d1e0f9".to_owned(),
                approver_type: ApproverType::User,
            }]),
        }),
        ..ActivationRules::default()
    });

    let first = {
        let service = service.clone();
        tokio::spawn(async move { service.create(&expiry).await })
    };
    let second = {
        let service = service.clone();
        tokio::spawn(async move { service.create(&approval).await })
    };

    let first = first.await.unwrap_or_else(|_| unreachable!());
    let second = second.await.unwrap_or_else(|_| unreachable!());
    assert!(first.is_ok());
    assert!(second.is_ok());

    let calls = policies.calls.lock().await;
    assert_eq!(calls.update, 2);
    assert_eq!(calls.max_in_flight, 1);
    drop(calls);

    let state = service
        .read(SCOPE, READER_ROLE_ID)
        .await
        .unwrap_or_default()
        .map(|state| state.config)
        .unwrap_or_default();
    assert_eq!(
        state
            .active_assignment_rules
            .and_then(|rules| rules.expire_after),
        Some(ExpireAfter {
            days: Some(90),
            hours: None,
        })
    );
    assert_eq!(
        state.activation_rules.and_then(|rules| rules.require_approval),
        Some(true)
    );
}

#[tokio::test(start_paused = true)]
async fn role_id_case_does_not_split_the_policy_lock() {
    let policies = Arc::new(FakePolicies::new());
    let service = service(policies.clone());
    let justification = |role_definition_id: String, required| PolicyConfig {
        role_definition_id,
        activation_rules: Some(ActivationRules {
            require_justification: Some(required),
            ..ActivationRules::default()
        }),
        ..config()
    };

    let lower = {
        let service = service.clone();
        let value = justification(READER_ROLE_ID.to_owned(), false);
        tokio::spawn(async move { service.create(&value).await })
    };
    let upper = {
        let service = service.clone();
        let value = justification(READER_ROLE_ID.to_uppercase(), true);
        tokio::spawn(async move { service.create(&value).await })
    };

    assert!(lower.await.unwrap_or_else(|_| unreachable!()).is_ok());
    assert!(upper.await.unwrap_or_else(|_| unreachable!()).is_ok());

    let calls = policies.calls.lock().await;
    assert_eq!(calls.update, 2);
    assert_eq!(calls.max_in_flight, 1);
}

#[tokio::test(start_paused = true)]
async fn update_without_assigned_policy_is_not_found() {
    let service = service(Arc::new(FakePolicies::unassigned()));
    let mut value = config();
    value.activation_rules = Some(ActivationRules {
        require_justification: Some(false),
        ..ActivationRules::default()
    });

    let result = service.create(&value).await;
    let Err(error) = result else {
        unreachable!();
    };
    assert!(matches!(error.root(), AppError::NotFound(_)));
}

#[tokio::test(start_paused = true)]
async fn delete_leaves_remote_policy_untouched() {
    let policies = Arc::new(FakePolicies::new());
    let service = service(policies.clone());

    assert!(service.delete(SCOPE, READER_ROLE_ID).await.is_ok());
    let calls = policies.calls.lock().await;
    assert_eq!((calls.list, calls.get, calls.update), (0, 0, 0));
}
