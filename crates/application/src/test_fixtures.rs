use azrbac_domain::{PolicyRule, RoleManagementPolicy, ScopedPolicyId};
use serde_json::{Value, json};

pub const SCOPE: &str = "/subscriptions/00000000-0000-0000-0000-000000000001";
pub const READER_ROLE_ID: &str = "/subscriptions/00000000-0000-0000-0000-000000000001/providers/Microsoft.Authorization/roleDefinitions/acdd72a7-3385-48ef-bd42-f606fba81ae7";
pub const POLICY_NAME: &str = "2b9fbc4a-4c4a-4b6e-9a52-0c7f4a1e3d21";

fn target(caller: &str, level: &str) -> Value {
    json!({
        "caller": caller,
        "operations": ["All"],
        "level": level,
        "targetObjects": null,
        "inheritableSettings": null,
        "enforcedSettings": null
    })
}

fn expiration(id: &str, caller: &str, level: &str, required: bool, maximum: &str) -> Value {
    json!({
        "id": id,
        "ruleType": "RoleManagementPolicyExpirationRule",
        "isExpirationRequired": required,
        "maximumDuration": maximum,
        "target": target(caller, level)
    })
}

fn enablement(id: &str, caller: &str, level: &str, rules: &[&str]) -> Value {
    json!({
        "id": id,
        "ruleType": "RoleManagementPolicyEnablementRule",
        "enabledRules": rules,
        "target": target(caller, level)
    })
}

fn notification(id: &str, recipient: &str, caller: &str, level: &str) -> Value {
    json!({
        "id": id,
        "ruleType": "RoleManagementPolicyNotificationRule",
        "notificationType": "Email",
        "recipientType": recipient,
        "isDefaultRecipientsEnabled": true,
        "notificationLevel": "All",
        "notificationRecipients": [],
        "target": target(caller, level)
    })
}

/// Rules of a freshly provisioned policy, in the order Azure returns them.
pub fn default_rules_json() -> Vec<Value> {
    vec![
        expiration("Expiration_Admin_Eligibility", "Admin", "Eligibility", false, "P365D"),
        enablement("Enablement_Admin_Eligibility", "Admin", "Eligibility", &[]),
        notification("Notification_Admin_Admin_Eligibility", "Admin", "Admin", "Eligibility"),
        notification("Notification_Requestor_Admin_Eligibility", "Requestor", "Admin", "Eligibility"),
        notification("Notification_Approver_Admin_Eligibility", "Approver", "Admin", "Eligibility"),
        expiration("Expiration_Admin_Assignment", "Admin", "Assignment", true, "P180D"),
        enablement(
            "Enablement_Admin_Assignment",
            "Admin",
            "Assignment",
            &["Justification", "MultiFactorAuthentication"],
        ),
        notification("Notification_Admin_Admin_Assignment", "Admin", "Admin", "Assignment"),
        notification("Notification_Requestor_Admin_Assignment", "Requestor", "Admin", "Assignment"),
        notification("Notification_Approver_Admin_Assignment", "Approver", "Admin", "Assignment"),
        expiration("Expiration_EndUser_Assignment", "EndUser", "Assignment", true, "PT8H"),
        enablement(
            "Enablement_EndUser_Assignment",
            "EndUser",
            "Assignment",
            &["MultiFactorAuthentication", "Justification"],
        ),
        json!({
            "id": "Approval_EndUser_Assignment",
            "ruleType": "RoleManagementPolicyApprovalRule",
            "setting": {
                "isApprovalRequired": false,
                "isApprovalRequiredForExtension": false,
                "isRequestorJustificationRequired": true,
                "approvalMode": "SingleStage",
                "approvalStages": [{
                    "approvalStageTimeOutInDays": 1,
                    "isApproverJustificationRequired": true,
                    "escalationTimeInMinutes": 0,
                    "isEscalationEnabled": false,
                    "primaryApprovers": []
                }]
            },
            "target": target("EndUser", "Assignment")
        }),
        json!({
            "id": "AuthenticationContext_EndUser_Assignment",
            "ruleType": "RoleManagementPolicyAuthenticationContextRule",
            "isEnabled": false,
            "claimValue": "",
            "target": target("EndUser", "Assignment")
        }),
        notification("Notification_Admin_EndUser_Assignment", "Admin", "EndUser", "Assignment"),
        notification("Notification_Requestor_EndUser_Assignment", "Requestor", "EndUser", "Assignment"),
        notification("Notification_Approver_EndUser_Assignment", "Approver", "EndUser", "Assignment"),
    ]
}

pub fn default_rules() -> Vec<PolicyRule> {
    default_rules_json()
        .into_iter()
        .map(|value| serde_json::from_value(value).unwrap_or_else(|_| unreachable!()))
        .collect()
}

pub fn policy_id() -> ScopedPolicyId {
    ScopedPolicyId::new(SCOPE, POLICY_NAME).unwrap_or_else(|_| unreachable!())
}

pub fn default_policy() -> RoleManagementPolicy {
    RoleManagementPolicy {
        id: policy_id(),
        display_name: Some("Reader".to_owned()),
        description: None,
        rules: default_rules(),
    }
}
