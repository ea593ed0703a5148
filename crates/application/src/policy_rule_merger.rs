use azrbac_core::{AppError, AppResult};
use azrbac_domain::{
    ActivationRules, ApprovalRule, Approver, ChangeSet, EnabledRule,
    EnablementRule, ExpirationRule, ExpireAfter, IsoDuration, NotificationRule,
    NotificationSettings, PolicyConfig, PolicyRule, PolicyRuleStore, RecipientType, RuleCaller,
    RuleEnvelope, RuleId, RuleKind, RuleLevel,
};
use serde_json::Map;

const ELIGIBLE_ASSIGNMENT_RULES: &str = "eligible_assignment_rules";
const ACTIVE_ASSIGNMENT_RULES: &str = "active_assignment_rules";
const ACTIVATION_RULES: &str = "activation_rules";
const AUTHENTICATION_CONTEXT: &str =
    "activation_rules.required_conditional_access_authentication_context";

/// Produces the full rule list to submit for `config`.
///
/// Rules none of whose configuration fields appear in `changes` are returned
/// unchanged. Touched rules keep their id, type, target and unmodelled fields
/// and take only the changed leaves from `config`. Rules are never added or
/// removed, and API order is kept.
pub fn merge_policy_rules(
    store: &PolicyRuleStore,
    config: &PolicyConfig,
    changes: &ChangeSet,
) -> AppResult<Vec<PolicyRule>> {
    for id in RuleId::ALL {
        if is_touched(id, changes) {
            store.require(id)?;
        }
    }

    store
        .iter()
        .map(|rule| match rule.rule_id() {
            Some(id) if is_touched(id, changes) => merge_rule(rule, config, changes),
            _ => Ok(rule.clone()),
        })
        .collect()
}

/// Returns the configuration paths whose changes affect `id`.
#[must_use]
pub fn feeding_paths(id: RuleId) -> Vec<String> {
    match id.kind() {
        RuleKind::Expiration => match assignment_rules_prefix(id) {
            Some(prefix) => owned(&[
                format!("{prefix}.allow_permanent").as_str(),
                format!("{prefix}.expire_after").as_str(),
            ]),
            None => owned(&["activation_rules.maximum_duration"]),
        },
        RuleKind::Enablement => match (id.caller(), id.level()) {
            (RuleCaller::Admin, RuleLevel::Assignment) => owned(&[
                "active_assignment_rules.require_multifactor_authentication",
                "active_assignment_rules.require_justification",
                "active_assignment_rules.require_ticket_info",
            ]),
            (RuleCaller::EndUser, _) => owned(&[
                "activation_rules.require_multifactor_authentication",
                "activation_rules.require_justification",
                "activation_rules.require_ticket_info",
                AUTHENTICATION_CONTEXT,
            ]),
            _ => Vec::new(),
        },
        RuleKind::Approval => owned(&[
            "activation_rules.require_approval",
            "activation_rules.approval_stage",
        ]),
        RuleKind::AuthenticationContext => owned(&[AUTHENTICATION_CONTEXT]),
        RuleKind::Notification => notification_path(id).into_iter().collect(),
    }
}

fn owned(paths: &[&str]) -> Vec<String> {
    paths.iter().map(|path| (*path).to_owned()).collect()
}

fn is_touched(id: RuleId, changes: &ChangeSet) -> bool {
    feeding_paths(id)
        .iter()
        .any(|path| changes.touches(path.as_str()))
}

fn assignment_rules_prefix(id: RuleId) -> Option<&'static str> {
    match (id.caller(), id.level()) {
        (RuleCaller::Admin, RuleLevel::Eligibility) => Some(ELIGIBLE_ASSIGNMENT_RULES),
        (RuleCaller::Admin, RuleLevel::Assignment) => Some(ACTIVE_ASSIGNMENT_RULES),
        (RuleCaller::EndUser, _) => None,
    }
}

fn notification_path(id: RuleId) -> Option<String> {
    let event = match (id.caller(), id.level()) {
        (RuleCaller::Admin, RuleLevel::Eligibility) => "eligible_assignments",
        (RuleCaller::Admin, RuleLevel::Assignment) => "active_assignments",
        (RuleCaller::EndUser, RuleLevel::Assignment) => "eligible_activations",
        (RuleCaller::EndUser, RuleLevel::Eligibility) => return None,
    };
    let audience = match id.recipient()? {
        RecipientType::Admin => "admin_notifications",
        RecipientType::Approver => "approver_notifications",
        RecipientType::Requestor => "assignee_notifications",
    };

    Some(format!("notification_rules.{event}.{audience}"))
}

fn merge_rule(rule: &PolicyRule, config: &PolicyConfig, changes: &ChangeSet) -> AppResult<PolicyRule> {
    Ok(match rule {
        PolicyRule::Expiration(existing) => {
            PolicyRule::Expiration(merge_expiration(existing, config, changes)?)
        }
        PolicyRule::Enablement(existing) => {
            PolicyRule::Enablement(merge_enablement(existing, config, changes))
        }
        PolicyRule::Approval(existing) => {
            PolicyRule::Approval(merge_approval(existing, config, changes)?)
        }
        PolicyRule::AuthenticationContext(existing) => {
            let mut merged = existing.clone();
            if changes.touches(AUTHENTICATION_CONTEXT) {
                let claim = config
                    .activation_rules
                    .as_ref()
                    .and_then(|rules| rules.required_conditional_access_authentication_context.clone());
                merged.settings.is_enabled = Some(claim.is_some());
                if claim.is_some() {
                    merged.settings.claim_value = claim;
                }
            }
            PolicyRule::AuthenticationContext(merged)
        }
        PolicyRule::Notification(existing) => {
            PolicyRule::Notification(merge_notification(existing, config, changes))
        }
        PolicyRule::Unrecognized(_) => rule.clone(),
    })
}

fn merge_expiration(
    existing: &RuleEnvelope<ExpirationRule>,
    config: &PolicyConfig,
    changes: &ChangeSet,
) -> AppResult<RuleEnvelope<ExpirationRule>> {
    let mut merged = existing.clone();

    let Some(prefix) = assignment_rules_prefix(existing.id) else {
        let path = "activation_rules.maximum_duration";
        if changes.touches(path)
            && let Some(maximum_duration) = activation(config).and_then(|rules| rules.maximum_duration)
        {
            merged.settings.maximum_duration = Some(maximum_duration.to_string());
        }
        return Ok(merged);
    };

    let (allow_permanent, expire_after) = assignment_expiry(config, prefix);
    let allow_permanent = allow_permanent
        .filter(|_| changes.touches(format!("{prefix}.allow_permanent").as_str()));
    let duration = expire_after
        .filter(|_| changes.touches(format!("{prefix}.expire_after").as_str()))
        .map(|value| value.to_duration())
        .filter(|value| !value.is_zero());

    match allow_permanent {
        Some(true) => {
            merged.settings.is_expiration_required = Some(false);
            merged.settings.maximum_duration = None;
        }
        Some(false) => {
            let prior = existing
                .settings
                .maximum_duration
                .clone()
                .filter(|value| is_positive_duration(value));
            let maximum_duration = duration.map(|value| value.to_string()).or(prior).ok_or_else(|| {
                AppError::Validation(format!(
                    "{prefix}.expire_after must be set to a positive duration when allow_permanent is false"
                ))
            })?;

            merged.settings.is_expiration_required = Some(true);
            merged.settings.maximum_duration = Some(maximum_duration);
        }
        None => {
            if let Some(duration) = duration {
                merged.settings.maximum_duration = Some(duration.to_string());
            }
        }
    }

    Ok(merged)
}

fn merge_enablement(
    existing: &RuleEnvelope<EnablementRule>,
    config: &PolicyConfig,
    changes: &ChangeSet,
) -> RuleEnvelope<EnablementRule> {
    let mut merged = existing.clone();
    let (prefix, mfa, justification, ticket_info, authentication_context) =
        match (existing.id.caller(), existing.id.level()) {
            (RuleCaller::Admin, RuleLevel::Assignment) => {
                let rules = config.active_assignment_rules.as_ref();
                (
                    ACTIVE_ASSIGNMENT_RULES,
                    rules.and_then(|rules| rules.require_multifactor_authentication),
                    rules.and_then(|rules| rules.require_justification),
                    rules.and_then(|rules| rules.require_ticket_info),
                    None,
                )
            }
            (RuleCaller::EndUser, _) => {
                let rules = activation(config);
                (
                    ACTIVATION_RULES,
                    rules.and_then(|rules| rules.require_multifactor_authentication),
                    rules.and_then(|rules| rules.require_justification),
                    rules.and_then(|rules| rules.require_ticket_info),
                    rules.and_then(|rules| {
                        rules
                            .required_conditional_access_authentication_context
                            .as_ref()
                    }),
                )
            }
            _ => return merged,
        };

    let mut enabled = merged.settings.enabled_rules.take().unwrap_or_default();
    let mut apply = |leaf: &str, rule: EnabledRule, wanted: Option<bool>| {
        let Some(wanted) = wanted else {
            return;
        };
        if !changes.touches(format!("{prefix}.{leaf}").as_str()) {
            return;
        }

        let present = enabled.contains(&rule);
        if wanted && !present {
            enabled.push(rule);
        } else if !wanted && present {
            enabled.retain(|existing| *existing != rule);
        }
    };

    apply(
        "require_multifactor_authentication",
        EnabledRule::MultiFactorAuthentication,
        mfa,
    );
    apply("require_justification", EnabledRule::Justification, justification);
    apply("require_ticket_info", EnabledRule::Ticketing, ticket_info);

    // conditional access replaces MFA on activation
    if authentication_context.is_some() && changes.touches(AUTHENTICATION_CONTEXT) {
        enabled.retain(|existing| *existing != EnabledRule::MultiFactorAuthentication);
    }

    if !enabled.is_empty() || existing.settings.enabled_rules.is_some() {
        merged.settings.enabled_rules = Some(enabled);
    }

    merged
}

fn merge_approval(
    existing: &RuleEnvelope<ApprovalRule>,
    config: &PolicyConfig,
    changes: &ChangeSet,
) -> AppResult<RuleEnvelope<ApprovalRule>> {
    let mut merged = existing.clone();
    let rules = activation(config);
    let mut setting = merged.settings.setting.take().unwrap_or_default();

    if changes.touches("activation_rules.require_approval")
        && let Some(required) = rules.and_then(|rules| rules.require_approval)
    {
        setting.is_approval_required = Some(required);
    }

    if changes.touches("activation_rules.approval_stage")
        && let Some(stage) = rules.and_then(|rules| rules.approval_stage.as_ref())
    {
        // The configured stage replaces every remote stage.
        let mut first = setting
            .approval_stages
            .take()
            .and_then(|stages| stages.into_iter().next())
            .unwrap_or_default();
        let previous = first.primary_approvers.take().unwrap_or_default();
        let approvers = stage
            .primary_approvers
            .iter()
            .map(|approver| Approver {
                id: approver.object_id.clone(),
                user_type: Some(approver.approver_type.clone()),
                extra: previous
                    .iter()
                    .find(|existing| existing.id.eq_ignore_ascii_case(&approver.object_id))
                    .map(|existing| existing.extra.clone())
                    .unwrap_or_else(Map::new),
            })
            .collect::<Vec<_>>();

        first.primary_approvers = Some(approvers);
        setting.approval_stages = Some(vec![first]);
    }

    let has_approvers = setting
        .approval_stages
        .as_ref()
        .and_then(|stages| stages.first())
        .and_then(|stage| stage.primary_approvers.as_ref())
        .is_some_and(|approvers| !approvers.is_empty());
    if setting.is_approval_required == Some(true) && !has_approvers {
        return Err(AppError::Validation(
            "activation_rules.require_approval is true but the approval stage has no primary approvers"
                .to_owned(),
        ));
    }

    merged.settings.setting = Some(setting);
    Ok(merged)
}

fn merge_notification(
    existing: &RuleEnvelope<NotificationRule>,
    config: &PolicyConfig,
    changes: &ChangeSet,
) -> RuleEnvelope<NotificationRule> {
    let mut merged = existing.clone();
    let Some(path) = notification_path(existing.id) else {
        return merged;
    };
    let Some(settings) = notification_settings(config, existing.id) else {
        return merged;
    };
    let touched = |leaf: &str| changes.touches(format!("{path}.{leaf}").as_str());

    if touched("notification_level")
        && let Some(level) = settings.notification_level
    {
        merged.settings.notification_level = Some(level.as_str().to_owned());
    }

    if touched("default_recipients")
        && let Some(enabled) = settings.default_recipients
    {
        merged.settings.is_default_recipients_enabled = Some(enabled);
    }

    if !existing.id.uses_reduced_notification_shape()
        && touched("additional_recipients")
        && let Some(recipients) = &settings.additional_recipients
    {
        merged.settings.notification_recipients = Some(recipients.iter().cloned().collect());
    }

    merged
}

fn activation(config: &PolicyConfig) -> Option<&ActivationRules> {
    config.activation_rules.as_ref()
}

fn assignment_expiry(config: &PolicyConfig, prefix: &str) -> (Option<bool>, Option<ExpireAfter>) {
    if prefix == ELIGIBLE_ASSIGNMENT_RULES {
        config
            .eligible_assignment_rules
            .as_ref()
            .map_or((None, None), |rules| (rules.allow_permanent, rules.expire_after))
    } else {
        config
            .active_assignment_rules
            .as_ref()
            .map_or((None, None), |rules| (rules.allow_permanent, rules.expire_after))
    }
}

fn notification_settings(config: &PolicyConfig, id: RuleId) -> Option<&NotificationSettings> {
    let rules = config.notification_rules.as_ref()?;
    let targets = match (id.caller(), id.level()) {
        (RuleCaller::Admin, RuleLevel::Eligibility) => rules.eligible_assignments.as_ref(),
        (RuleCaller::Admin, RuleLevel::Assignment) => rules.active_assignments.as_ref(),
        (RuleCaller::EndUser, _) => rules.eligible_activations.as_ref(),
    }?;

    match id.recipient()? {
        RecipientType::Admin => targets.admin_notifications.as_ref(),
        RecipientType::Approver => targets.approver_notifications.as_ref(),
        RecipientType::Requestor => targets.assignee_notifications.as_ref(),
    }
}

fn is_positive_duration(value: &str) -> bool {
    value
        .parse::<IsoDuration>()
        .map_or(!value.trim().is_empty(), |duration| !duration.is_zero())
}
