use std::collections::BTreeSet;

use azrbac_domain::{
    ActivationRules, ActiveAssignmentRules, ApprovalStageConfig, ApproverConfig, ApproverType,
    EligibleAssignmentRules, EnabledRule, ExpireAfter, IsoDuration, NotificationLevel,
    NotificationRules, NotificationSettings, NotificationTargets, PolicyConfig, PolicyRuleStore,
    RuleId, ScopedPolicyId,
};

/// Observed policy, flattened into the configuration shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyState {
    /// Scoped policy id.
    pub id: ScopedPolicyId,
    /// Display name.
    pub display_name: Option<String>,
    /// Description.
    pub description: Option<String>,
    /// Current rule values.
    pub config: PolicyConfig,
}

/// Flattens a rule store into a fully populated configuration.
#[must_use]
pub fn flatten_policy_rules(
    scope: &str,
    role_definition_id: &str,
    store: &PolicyRuleStore,
) -> PolicyConfig {
    let (eligible_permanent, eligible_expiry) =
        flatten_expiration(store, RuleId::EXPIRATION_ADMIN_ELIGIBILITY);
    let (active_permanent, active_expiry) =
        flatten_expiration(store, RuleId::EXPIRATION_ADMIN_ASSIGNMENT);
    let admin_enablement = |rule: EnabledRule| enabled(store, RuleId::ENABLEMENT_ADMIN_ASSIGNMENT, &rule);
    let user_enablement =
        |rule: EnabledRule| enabled(store, RuleId::ENABLEMENT_END_USER_ASSIGNMENT, &rule);

    PolicyConfig {
        scope: scope.to_owned(),
        role_definition_id: role_definition_id.to_owned(),
        eligible_assignment_rules: Some(EligibleAssignmentRules {
            allow_permanent: eligible_permanent,
            expire_after: eligible_expiry,
        }),
        active_assignment_rules: Some(ActiveAssignmentRules {
            allow_permanent: active_permanent,
            expire_after: active_expiry,
            require_multifactor_authentication: admin_enablement(
                EnabledRule::MultiFactorAuthentication,
            ),
            require_justification: admin_enablement(EnabledRule::Justification),
            require_ticket_info: admin_enablement(EnabledRule::Ticketing),
        }),
        activation_rules: Some(ActivationRules {
            maximum_duration: store
                .expiration(RuleId::EXPIRATION_END_USER_ASSIGNMENT)
                .and_then(|rule| rule.settings.maximum_duration.as_deref())
                .and_then(|value| value.parse::<IsoDuration>().ok()),
            require_approval: store
                .approval()
                .and_then(|rule| rule.settings.setting.as_ref())
                .and_then(|setting| setting.is_approval_required),
            approval_stage: flatten_approval_stage(store),
            required_conditional_access_authentication_context: store
                .authentication_context()
                .filter(|rule| rule.settings.is_enabled == Some(true))
                .and_then(|rule| rule.settings.claim_value.clone()),
            require_multifactor_authentication: user_enablement(
                EnabledRule::MultiFactorAuthentication,
            ),
            require_justification: user_enablement(EnabledRule::Justification),
            require_ticket_info: user_enablement(EnabledRule::Ticketing),
        }),
        notification_rules: Some(NotificationRules {
            eligible_assignments: Some(notification_targets(
                store,
                [
                    RuleId::NOTIFICATION_ADMIN_ADMIN_ELIGIBILITY,
                    RuleId::NOTIFICATION_APPROVER_ADMIN_ELIGIBILITY,
                    RuleId::NOTIFICATION_REQUESTOR_ADMIN_ELIGIBILITY,
                ],
            )),
            active_assignments: Some(notification_targets(
                store,
                [
                    RuleId::NOTIFICATION_ADMIN_ADMIN_ASSIGNMENT,
                    RuleId::NOTIFICATION_APPROVER_ADMIN_ASSIGNMENT,
                    RuleId::NOTIFICATION_REQUESTOR_ADMIN_ASSIGNMENT,
                ],
            )),
            eligible_activations: Some(notification_targets(
                store,
                [
                    RuleId::NOTIFICATION_ADMIN_END_USER_ASSIGNMENT,
                    RuleId::NOTIFICATION_APPROVER_END_USER_ASSIGNMENT,
                    RuleId::NOTIFICATION_REQUESTOR_END_USER_ASSIGNMENT,
                ],
            )),
        }),
    }
}

fn flatten_expiration(store: &PolicyRuleStore, id: RuleId) -> (Option<bool>, Option<ExpireAfter>) {
    let Some(rule) = store.expiration(id) else {
        return (None, None);
    };

    let allow_permanent = rule.settings.is_expiration_required.map(|required| !required);
    if allow_permanent == Some(true) {
        return (allow_permanent, None);
    }

    let expire_after = rule
        .settings
        .maximum_duration
        .as_deref()
        .and_then(|value| value.parse::<IsoDuration>().ok())
        .map(|duration| ExpireAfter {
            days: (duration.days() > 0).then_some(duration.days()),
            hours: (duration.hours() > 0).then_some(duration.hours()),
        });

    (allow_permanent, expire_after)
}

fn enabled(store: &PolicyRuleStore, id: RuleId, rule: &EnabledRule) -> Option<bool> {
    store
        .enablement(id)
        .map(|enablement| enablement.settings.contains(rule))
}

fn flatten_approval_stage(store: &PolicyRuleStore) -> Option<ApprovalStageConfig> {
    let approvers = store
        .approval()?
        .settings
        .setting
        .as_ref()?
        .approval_stages
        .as_ref()?
        .first()?
        .primary_approvers
        .as_ref()?;

    Some(ApprovalStageConfig {
        primary_approvers: approvers
            .iter()
            .map(|approver| ApproverConfig {
                object_id: approver.id.clone(),
                approver_type: approver.user_type.clone().unwrap_or(ApproverType::User),
            })
            .collect::<BTreeSet<_>>(),
    })
}

fn notification_targets(store: &PolicyRuleStore, [admin, approver, requestor]: [RuleId; 3]) -> NotificationTargets {
    NotificationTargets {
        admin_notifications: notification_settings(store, admin),
        approver_notifications: notification_settings(store, approver),
        assignee_notifications: notification_settings(store, requestor),
    }
}

fn notification_settings(store: &PolicyRuleStore, id: RuleId) -> Option<NotificationSettings> {
    let rule = store.notification(id)?;
    Some(NotificationSettings {
        notification_level: rule
            .settings
            .notification_level
            .as_deref()
            .and_then(NotificationLevel::parse),
        default_recipients: rule.settings.is_default_recipients_enabled,
        additional_recipients: if id.uses_reduced_notification_shape() {
            None
        } else {
            rule.settings
                .notification_recipients
                .as_ref()
                .map(|recipients| recipients.iter().cloned().collect())
        },
    })
}
