use std::collections::BTreeSet;

use azrbac_core::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::iso_duration::IsoDuration;
use crate::policy_rule::ApproverType;
use crate::role_assignment::{RoleDefinition, ScopeKind};

/// Longest activation window the API accepts, in seconds.
const MAX_ACTIVATION_SECONDS: u64 = 24 * 3_600;
/// Activation windows are configured in half-hour steps.
const ACTIVATION_STEP_SECONDS: u64 = 30 * 60;
/// Longest assignment expiry the API accepts, in days.
const MAX_EXPIRE_AFTER_DAYS: u32 = 365;

/// Flat, partially specified configuration of a role management policy.
///
/// Every leaf is optional; an absent leaf keeps whatever the API holds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PolicyConfig {
    /// Scope the policy applies to.
    pub scope: String,
    /// Role definition the policy governs.
    pub role_definition_id: String,
    /// Admin-made eligible assignment rules.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eligible_assignment_rules: Option<EligibleAssignmentRules>,
    /// Admin-made active assignment rules.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_assignment_rules: Option<ActiveAssignmentRules>,
    /// End-user activation rules.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activation_rules: Option<ActivationRules>,
    /// Notification rules.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notification_rules: Option<NotificationRules>,
}

/// Days and hours after which an assignment expires.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExpireAfter {
    /// Whole days.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub days: Option<u32>,
    /// Whole hours.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hours: Option<u32>,
}

impl ExpireAfter {
    /// Returns the configured length.
    #[must_use]
    pub fn to_duration(&self) -> IsoDuration {
        IsoDuration::from_days_and_hours(
            self.days.unwrap_or_default(),
            self.hours.unwrap_or_default(),
        )
    }
}

/// Eligible assignment rules.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EligibleAssignmentRules {
    /// Whether assignments may be permanent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow_permanent: Option<bool>,
    /// Required expiry when not permanent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expire_after: Option<ExpireAfter>,
}

/// Active assignment rules.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ActiveAssignmentRules {
    /// Whether assignments may be permanent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow_permanent: Option<bool>,
    /// Required expiry when not permanent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expire_after: Option<ExpireAfter>,
    /// Require MFA on assignment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub require_multifactor_authentication: Option<bool>,
    /// Require justification on assignment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub require_justification: Option<bool>,
    /// Require ticket information on assignment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub require_ticket_info: Option<bool>,
}

/// Approver configured for activation approval.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ApproverConfig {
    /// Object id of the user or group.
    pub object_id: String,
    /// `User` or `Group`.
    #[serde(rename = "type")]
    pub approver_type: ApproverType,
}

/// Single approval stage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ApprovalStageConfig {
    /// Primary approvers.
    #[serde(default)]
    pub primary_approvers: BTreeSet<ApproverConfig>,
}

/// Activation rules.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ActivationRules {
    /// Longest activation window.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maximum_duration: Option<IsoDuration>,
    /// Whether activation requires approval.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub require_approval: Option<bool>,
    /// Approval stage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approval_stage: Option<ApprovalStageConfig>,
    /// Conditional access authentication context claim.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required_conditional_access_authentication_context: Option<String>,
    /// Require MFA on activation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub require_multifactor_authentication: Option<bool>,
    /// Require justification on activation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub require_justification: Option<bool>,
    /// Require ticket information on activation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub require_ticket_info: Option<bool>,
}

/// Notification severity filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NotificationLevel {
    /// Every notification.
    All,
    /// Critical notifications only.
    Critical,
}

impl NotificationLevel {
    /// Returns the wire value.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::All => "All",
            Self::Critical => "Critical",
        }
    }

    /// Parses the wire value.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "All" => Some(Self::All),
            "Critical" => Some(Self::Critical),
            _ => None,
        }
    }
}

/// Settings for one notification audience.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NotificationSettings {
    /// Severity filter.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notification_level: Option<NotificationLevel>,
    /// Whether default recipients are notified.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_recipients: Option<bool>,
    /// Extra recipient addresses.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub additional_recipients: Option<BTreeSet<String>>,
}

/// Notification settings for the three audiences of one event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NotificationTargets {
    /// Administrators.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admin_notifications: Option<NotificationSettings>,
    /// Approvers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approver_notifications: Option<NotificationSettings>,
    /// The assignee or requestor.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignee_notifications: Option<NotificationSettings>,
}

/// Notification settings per event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NotificationRules {
    /// A principal is made eligible.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eligible_assignments: Option<NotificationTargets>,
    /// A principal is made active.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_assignments: Option<NotificationTargets>,
    /// An eligible principal activates.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eligible_activations: Option<NotificationTargets>,
}

impl PolicyConfig {
    /// Returns the lock and identity key `{scope}|{roleDefinitionId}`.
    #[must_use]
    pub fn key(&self) -> String {
        format!("{}|{}", self.scope, self.role_definition_id)
    }

    /// Rejects configurations the API would refuse, before any call is made.
    pub fn validate(&self) -> AppResult<()> {
        ScopeKind::classify(self.scope.as_str())?;
        validate_role_definition_id(self.scope.as_str(), self.role_definition_id.as_str())?;

        if let Some(rules) = &self.eligible_assignment_rules {
            validate_expiry(
                "eligible_assignment_rules",
                rules.allow_permanent,
                rules.expire_after,
            )?;
        }

        if let Some(rules) = &self.active_assignment_rules {
            validate_expiry(
                "active_assignment_rules",
                rules.allow_permanent,
                rules.expire_after,
            )?;
        }

        if let Some(rules) = &self.activation_rules {
            validate_activation(rules)?;
        }

        if let Some(settings) = self
            .notification_rules
            .as_ref()
            .and_then(|rules| rules.eligible_activations.as_ref())
            .and_then(|targets| targets.approver_notifications.as_ref())
            && settings.additional_recipients.is_some()
        {
            return Err(AppError::Validation(
                "notification_rules.eligible_activations.approver_notifications does not support additional_recipients"
                    .to_owned(),
            ));
        }

        Ok(())
    }
}

fn validate_role_definition_id(scope: &str, role_definition_id: &str) -> AppResult<()> {
    let guid = RoleDefinition::guid_from_id(role_definition_id).ok_or_else(|| {
        AppError::Validation(format!(
            "role_definition_id '{role_definition_id}' is not a role definition id"
        ))
    })?;
    Uuid::parse_str(guid).map_err(|error| {
        AppError::Validation(format!(
            "role_definition_id '{role_definition_id}' does not end in a UUID: {error}"
        ))
    })?;

    let scoped = role_definition_id
        .get(.."/subscriptions/".len())
        .is_some_and(|head| head.eq_ignore_ascii_case("/subscriptions/"));
    let subscription_scope = scope
        .get(.."/subscriptions/".len())
        .is_some_and(|head| head.eq_ignore_ascii_case("/subscriptions/"));
    if subscription_scope && !scoped {
        return Err(AppError::Validation(format!(
            "role_definition_id must be scoped to a subscription when scope is '{scope}', e.g. /subscriptions/<id>/providers/Microsoft.Authorization/roleDefinitions/<guid>"
        )));
    }

    Ok(())
}

fn validate_expiry(
    path: &str,
    allow_permanent: Option<bool>,
    expire_after: Option<ExpireAfter>,
) -> AppResult<()> {
    let Some(expire_after) = expire_after else {
        return Ok(());
    };

    let duration = expire_after.to_duration();
    if expire_after.days.unwrap_or_default() > MAX_EXPIRE_AFTER_DAYS {
        return Err(AppError::Validation(format!(
            "{path}.expire_after.days must be at most {MAX_EXPIRE_AFTER_DAYS}"
        )));
    }

    match allow_permanent {
        Some(false) if duration.is_zero() => Err(AppError::Validation(format!(
            "{path}.expire_after must be greater than zero when allow_permanent is false"
        ))),
        Some(true) if !duration.is_zero() => Err(AppError::Validation(format!(
            "{path}.expire_after cannot be set when allow_permanent is true"
        ))),
        _ => Ok(()),
    }
}

fn validate_activation(rules: &ActivationRules) -> AppResult<()> {
    if let Some(maximum_duration) = rules.maximum_duration {
        let seconds = maximum_duration.total_seconds();
        if seconds == 0
            || seconds > MAX_ACTIVATION_SECONDS
            || seconds % ACTIVATION_STEP_SECONDS != 0
        {
            return Err(AppError::Validation(format!(
                "activation_rules.maximum_duration '{maximum_duration}' must be between PT30M and P1D in 30 minute steps"
            )));
        }
    }

    if let Some(context) = &rules.required_conditional_access_authentication_context {
        if context.trim().is_empty() {
            return Err(AppError::Validation(
                "activation_rules.required_conditional_access_authentication_context must not be empty"
                    .to_owned(),
            ));
        }

        if rules.require_multifactor_authentication == Some(true) {
            return Err(AppError::Validation(
                "activation_rules.require_multifactor_authentication conflicts with required_conditional_access_authentication_context"
                    .to_owned(),
            ));
        }
    }

    let approvers = rules
        .approval_stage
        .as_ref()
        .map(|stage| &stage.primary_approvers);
    if rules.require_approval == Some(true) && approvers.is_none_or(BTreeSet::is_empty) {
        return Err(AppError::Validation(
            "activation_rules.approval_stage needs at least one primary approver when require_approval is true"
                .to_owned(),
        ));
    }

    for approver in approvers.into_iter().flatten() {
        Uuid::parse_str(approver.object_id.as_str()).map_err(|error| {
            AppError::Validation(format!(
                "approver object_id '{}' is not a UUID: {error}",
                approver.object_id
            ))
        })?;

        if let ApproverType::Other(value) = &approver.approver_type {
            return Err(AppError::Validation(format!(
                "approver type '{value}' must be User or Group"
            )));
        }
    }

    Ok(())
}
