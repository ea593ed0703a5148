use azrbac_domain::PolicyRule;
use serde_json::{Value, json};

const LEVELS: [(&str, &str); 3] = [
    ("Admin", "Eligibility"),
    ("Admin", "Assignment"),
    ("EndUser", "Assignment"),
];

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

fn notifications(caller: &str, level: &str) -> impl Iterator<Item = Value> {
    ["Admin", "Requestor", "Approver"].into_iter().map(move |recipient| {
        json!({
            "id": format!("Notification_{recipient}_{caller}_{level}"),
            "ruleType": "RoleManagementPolicyNotificationRule",
            "notificationType": "Email",
            "recipientType": recipient,
            "isDefaultRecipientsEnabled": true,
            "notificationLevel": "All",
            "notificationRecipients": [],
            "target": target(caller, level)
        })
    })
}

fn level_rules(caller: &str, level: &str) -> Vec<Value> {
    let (required, maximum, enabled) = match (caller, level) {
        ("Admin", "Eligibility") => (false, "P365D", json!([])),
        ("Admin", _) => (true, "P180D", json!(["Justification"])),
        _ => (true, "PT8H", json!(["MultiFactorAuthentication", "Justification"])),
    };

    let mut rules = vec![
        json!({
            "id": format!("Expiration_{caller}_{level}"),
            "ruleType": "RoleManagementPolicyExpirationRule",
            "isExpirationRequired": required,
            "maximumDuration": maximum,
            "target": target(caller, level)
        }),
        json!({
            "id": format!("Enablement_{caller}_{level}"),
            "ruleType": "RoleManagementPolicyEnablementRule",
            "enabledRules": enabled,
            "target": target(caller, level)
        }),
    ];

    if caller == "EndUser" {
        rules.push(json!({
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
            "target": target(caller, level)
        }));
        rules.push(json!({
            "id": "AuthenticationContext_EndUser_Assignment",
            "ruleType": "RoleManagementPolicyAuthenticationContextRule",
            "isEnabled": false,
            "claimValue": "",
            "target": target(caller, level)
        }));
    }

    rules.extend(notifications(caller, level));
    rules
}

/// Rules of a freshly provisioned policy, in the order ARM lists them.
pub(super) fn default_policy_rules() -> Vec<PolicyRule> {
    LEVELS
        .into_iter()
        .flat_map(|(caller, level)| level_rules(caller, level))
        .filter_map(|value| serde_json::from_value(value).ok())
        .collect()
}
