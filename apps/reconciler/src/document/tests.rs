use std::sync::Arc;

use azrbac_application::ReconcileSettings;
use azrbac_core::AppError;
use azrbac_infrastructure::InMemoryAuthorizationApi;
use serde_json::json;

use super::{DesiredResource, DesiredStateDocument, Ensure, Outcome, Reconciler};

const SCOPE: &str = "/subscriptions/00000000-0000-0000-0000-000000000001";
const READER_ROLE_ID: &str = "/subscriptions/00000000-0000-0000-0000-000000000001/providers/Microsoft.Authorization/roleDefinitions/acdd72a7-3385-48ef-bd42-f606fba81ae7";
const PRINCIPAL_ID: &str = "6f9d3c2e-1b4a-4e8f-9c7d-2a1b3c4d5e6f";
const ASSIGNMENT_NAME: &str = "9c1e4a7b-2d3f-4e5a-8b6c-7d8e9f0a1b2c";

fn reconciler(api: Arc<InMemoryAuthorizationApi>) -> Reconciler {
    Reconciler::new(api, ReconcileSettings::default())
}

fn resource(value: serde_json::Value) -> DesiredResource {
    serde_json::from_value(value).unwrap_or_else(|_| unreachable!())
}

fn role_assignment(ensure: &str) -> DesiredResource {
    resource(json!({
        "kind": "role_assignment",
        "ensure": ensure,
        "properties": {
            "scope": SCOPE,
            "name": ASSIGNMENT_NAME,
            "role_definition_name": "Reader",
            "principal_id": PRINCIPAL_ID
        }
    }))
}

#[test]
fn document_entries_default_to_present() {
    let document = DesiredStateDocument::parse(
        &json!({
            "resources": [
                {"kind": "pim_eligible_assignment", "properties": {
                    "scope": SCOPE,
                    "role_definition_id": READER_ROLE_ID,
                    "principal_id": PRINCIPAL_ID,
                    "schedule": {"duration_days": 90}
                }},
                {"kind": "role_management_policy", "ensure": "absent", "properties": {
                    "scope": SCOPE,
                    "role_definition_id": READER_ROLE_ID
                }}
            ]
        })
        .to_string(),
    );
    assert!(document.is_ok());
    let document = document.unwrap_or_else(|_| unreachable!());

    assert!(matches!(
        &document.resources[0],
        DesiredResource::PimEligibleAssignment { ensure: Ensure::Present, properties }
            if properties.schedule.duration_days == Some(90)
    ));
    assert!(matches!(
        &document.resources[1],
        DesiredResource::RoleManagementPolicy { ensure: Ensure::Absent, .. }
    ));
}

#[test]
fn unknown_kinds_and_policy_fields_are_rejected() {
    let unknown_kind = DesiredStateDocument::parse(r#"{"resources": [{"kind": "deny_assignment", "properties": {}}]}"#);
    assert!(matches!(unknown_kind, Err(AppError::Validation(_))));

    let misspelled = DesiredStateDocument::parse(
        &json!({
            "resources": [{"kind": "role_management_policy", "properties": {
                "scope": SCOPE,
                "role_definition_id": READER_ROLE_ID,
                "activation_rule": {}
            }}]
        })
        .to_string(),
    );
    assert!(matches!(misspelled, Err(AppError::Validation(_))));
}

#[tokio::test(start_paused = true)]
async fn role_assignment_is_created_once_then_removed() {
    let reconciler = reconciler(Arc::new(InMemoryAuthorizationApi::with_visibility_lag(2)));

    let outcomes = [
        reconciler.apply(role_assignment("present")).await,
        reconciler.apply(role_assignment("present")).await,
        reconciler.apply(role_assignment("absent")).await,
        reconciler.apply(role_assignment("absent")).await,
    ]
    .map(|outcome| outcome.unwrap_or_else(|_| unreachable!()));

    assert_eq!(
        outcomes,
        [
            Outcome::Created,
            Outcome::Unchanged,
            Outcome::Deleted,
            Outcome::Unchanged,
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn role_assignment_without_name_is_rejected() {
    let reconciler = reconciler(Arc::new(InMemoryAuthorizationApi::new()));
    let entry = resource(json!({
        "kind": "role_assignment",
        "properties": {"scope": SCOPE, "role_definition_name": "Reader", "principal_id": PRINCIPAL_ID}
    }));

    let result = reconciler.apply(entry).await;
    assert!(matches!(result, Err(AppError::Validation(message)) if message.contains("needs a name")));
}

#[tokio::test(start_paused = true)]
async fn pim_active_assignment_round_trips_through_document() {
    let reconciler = reconciler(Arc::new(InMemoryAuthorizationApi::with_visibility_lag(1)));
    let entry = |ensure: &str| {
        resource(json!({
            "kind": "pim_active_assignment",
            "ensure": ensure,
            "properties": {
                "scope": SCOPE,
                "role_definition_id": READER_ROLE_ID,
                "principal_id": PRINCIPAL_ID,
                "schedule": {"duration_hours": 4},
                "justification": "incident 4471"
            }
        }))
    };

    assert!(matches!(reconciler.apply(entry("present")).await, Ok(Outcome::Created)));
    assert!(matches!(reconciler.apply(entry("present")).await, Ok(Outcome::Unchanged)));
    assert!(matches!(reconciler.apply(entry("absent")).await, Ok(Outcome::Deleted)));
}

#[tokio::test(start_paused = true)]
async fn policy_is_updated_only_when_it_drifts() {
    let api = Arc::new(InMemoryAuthorizationApi::new());
    let reconciler = reconciler(api.clone());
    let entry = || {
        resource(json!({
            "kind": "role_management_policy",
            "properties": {
                "scope": SCOPE,
                "role_definition_id": READER_ROLE_ID,
                "activation_rules": {"require_justification": false}
            }
        }))
    };

    assert!(matches!(reconciler.apply(entry()).await, Ok(Outcome::Updated)));
    assert!(matches!(reconciler.apply(entry()).await, Ok(Outcome::Unchanged)));
    assert_eq!(api.policy_update_count().await, 1);

    let forget = resource(json!({
        "kind": "role_management_policy",
        "ensure": "absent",
        "properties": {"scope": SCOPE, "role_definition_id": READER_ROLE_ID}
    }));
    assert!(matches!(reconciler.apply(forget).await, Ok(Outcome::Forgotten)));
    assert_eq!(api.policy_update_count().await, 1);
}

#[tokio::test(start_paused = true)]
async fn policy_with_zero_hour_expiry_converges() {
    let api = Arc::new(InMemoryAuthorizationApi::new());
    let reconciler = reconciler(api.clone());
    let entry = || {
        resource(json!({
            "kind": "role_management_policy",
            "properties": {
                "scope": SCOPE,
                "role_definition_id": READER_ROLE_ID,
                "active_assignment_rules": {"expire_after": {"days": 30, "hours": 0}}
            }
        }))
    };

    assert!(matches!(reconciler.apply(entry()).await, Ok(Outcome::Updated)));
    assert!(matches!(reconciler.apply(entry()).await, Ok(Outcome::Unchanged)));
    assert_eq!(api.policy_update_count().await, 1);
}
