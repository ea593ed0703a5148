use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

use azrbac_core::{AppError, AppResult};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

/// Rule family, the first segment of a rule id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RuleKind {
    /// Maximum grant or activation length.
    Expiration,
    /// Requirements such as MFA or justification.
    Enablement,
    /// Activation approval stages.
    Approval,
    /// Conditional access authentication context on activation.
    AuthenticationContext,
    /// Email notification settings.
    Notification,
}

impl RuleKind {
    /// Returns stable wire label.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Expiration => "Expiration",
            Self::Enablement => "Enablement",
            Self::Approval => "Approval",
            Self::AuthenticationContext => "AuthenticationContext",
            Self::Notification => "Notification",
        }
    }
}

/// Who performs the operation the rule governs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RuleCaller {
    /// Administrator making an assignment.
    Admin,
    /// Principal activating an eligible assignment.
    EndUser,
}

impl RuleCaller {
    /// Returns stable wire label.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Admin => "Admin",
            Self::EndUser => "EndUser",
        }
    }
}

/// Assignment level the rule governs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RuleLevel {
    /// Eligible assignments.
    Eligibility,
    /// Active assignments.
    Assignment,
}

impl RuleLevel {
    /// Returns stable wire label.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Eligibility => "Eligibility",
            Self::Assignment => "Assignment",
        }
    }
}

/// Notification audience.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RecipientType {
    /// Administrators.
    Admin,
    /// The principal receiving or activating the role.
    Requestor,
    /// Configured approvers.
    Approver,
}

impl RecipientType {
    /// Returns stable wire label.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Admin => "Admin",
            Self::Requestor => "Requestor",
            Self::Approver => "Approver",
        }
    }
}

/// Synthetic rule identifier such as `Expiration_Admin_Eligibility` or
/// `Notification_Approver_EndUser_Assignment`.
///
/// Only the ids in [`RuleId::ALL`] parse; anything else is an unrecognized rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RuleId {
    kind: RuleKind,
    recipient: Option<RecipientType>,
    caller: RuleCaller,
    level: RuleLevel,
}

impl RuleId {
    const fn plain(kind: RuleKind, caller: RuleCaller, level: RuleLevel) -> Self {
        Self {
            kind,
            recipient: None,
            caller,
            level,
        }
    }

    const fn notification(recipient: RecipientType, caller: RuleCaller, level: RuleLevel) -> Self {
        Self {
            kind: RuleKind::Notification,
            recipient: Some(recipient),
            caller,
            level,
        }
    }

    /// `Expiration_Admin_Eligibility`
    pub const EXPIRATION_ADMIN_ELIGIBILITY: Self =
        Self::plain(RuleKind::Expiration, RuleCaller::Admin, RuleLevel::Eligibility);
    /// `Expiration_Admin_Assignment`
    pub const EXPIRATION_ADMIN_ASSIGNMENT: Self =
        Self::plain(RuleKind::Expiration, RuleCaller::Admin, RuleLevel::Assignment);
    /// `Expiration_EndUser_Assignment`
    pub const EXPIRATION_END_USER_ASSIGNMENT: Self =
        Self::plain(RuleKind::Expiration, RuleCaller::EndUser, RuleLevel::Assignment);
    /// `Enablement_Admin_Eligibility`
    pub const ENABLEMENT_ADMIN_ELIGIBILITY: Self =
        Self::plain(RuleKind::Enablement, RuleCaller::Admin, RuleLevel::Eligibility);
    /// `Enablement_Admin_Assignment`
    pub const ENABLEMENT_ADMIN_ASSIGNMENT: Self =
        Self::plain(RuleKind::Enablement, RuleCaller::Admin, RuleLevel::Assignment);
    /// `Enablement_EndUser_Assignment`
    pub const ENABLEMENT_END_USER_ASSIGNMENT: Self =
        Self::plain(RuleKind::Enablement, RuleCaller::EndUser, RuleLevel::Assignment);
    /// `Approval_EndUser_Assignment`
    pub const APPROVAL_END_USER_ASSIGNMENT: Self =
        Self::plain(RuleKind::Approval, RuleCaller::EndUser, RuleLevel::Assignment);
    /// `AuthenticationContext_EndUser_Assignment`
    pub const AUTHENTICATION_CONTEXT_END_USER_ASSIGNMENT: Self = Self::plain(
        RuleKind::AuthenticationContext,
        RuleCaller::EndUser,
        RuleLevel::Assignment,
    );
    /// `Notification_Admin_Admin_Eligibility`
    pub const NOTIFICATION_ADMIN_ADMIN_ELIGIBILITY: Self =
        Self::notification(RecipientType::Admin, RuleCaller::Admin, RuleLevel::Eligibility);
    /// `Notification_Admin_Admin_Assignment`
    pub const NOTIFICATION_ADMIN_ADMIN_ASSIGNMENT: Self =
        Self::notification(RecipientType::Admin, RuleCaller::Admin, RuleLevel::Assignment);
    /// `Notification_Admin_EndUser_Assignment`
    pub const NOTIFICATION_ADMIN_END_USER_ASSIGNMENT: Self =
        Self::notification(RecipientType::Admin, RuleCaller::EndUser, RuleLevel::Assignment);
    /// `Notification_Approver_Admin_Eligibility`
    pub const NOTIFICATION_APPROVER_ADMIN_ELIGIBILITY: Self =
        Self::notification(RecipientType::Approver, RuleCaller::Admin, RuleLevel::Eligibility);
    /// `Notification_Approver_Admin_Assignment`
    pub const NOTIFICATION_APPROVER_ADMIN_ASSIGNMENT: Self =
        Self::notification(RecipientType::Approver, RuleCaller::Admin, RuleLevel::Assignment);
    /// `Notification_Approver_EndUser_Assignment`
    pub const NOTIFICATION_APPROVER_END_USER_ASSIGNMENT: Self =
        Self::notification(RecipientType::Approver, RuleCaller::EndUser, RuleLevel::Assignment);
    /// `Notification_Requestor_Admin_Eligibility`
    pub const NOTIFICATION_REQUESTOR_ADMIN_ELIGIBILITY: Self =
        Self::notification(RecipientType::Requestor, RuleCaller::Admin, RuleLevel::Eligibility);
    /// `Notification_Requestor_Admin_Assignment`
    pub const NOTIFICATION_REQUESTOR_ADMIN_ASSIGNMENT: Self =
        Self::notification(RecipientType::Requestor, RuleCaller::Admin, RuleLevel::Assignment);
    /// `Notification_Requestor_EndUser_Assignment`
    pub const NOTIFICATION_REQUESTOR_END_USER_ASSIGNMENT: Self = Self::notification(
        RecipientType::Requestor,
        RuleCaller::EndUser,
        RuleLevel::Assignment,
    );

    /// Every rule id the engine understands.
    pub const ALL: [Self; 17] = [
        Self::EXPIRATION_ADMIN_ELIGIBILITY,
        Self::EXPIRATION_ADMIN_ASSIGNMENT,
        Self::EXPIRATION_END_USER_ASSIGNMENT,
        Self::ENABLEMENT_ADMIN_ELIGIBILITY,
        Self::ENABLEMENT_ADMIN_ASSIGNMENT,
        Self::ENABLEMENT_END_USER_ASSIGNMENT,
        Self::APPROVAL_END_USER_ASSIGNMENT,
        Self::AUTHENTICATION_CONTEXT_END_USER_ASSIGNMENT,
        Self::NOTIFICATION_ADMIN_ADMIN_ELIGIBILITY,
        Self::NOTIFICATION_ADMIN_ADMIN_ASSIGNMENT,
        Self::NOTIFICATION_ADMIN_END_USER_ASSIGNMENT,
        Self::NOTIFICATION_APPROVER_ADMIN_ELIGIBILITY,
        Self::NOTIFICATION_APPROVER_ADMIN_ASSIGNMENT,
        Self::NOTIFICATION_APPROVER_END_USER_ASSIGNMENT,
        Self::NOTIFICATION_REQUESTOR_ADMIN_ELIGIBILITY,
        Self::NOTIFICATION_REQUESTOR_ADMIN_ASSIGNMENT,
        Self::NOTIFICATION_REQUESTOR_END_USER_ASSIGNMENT,
    ];

    /// Returns the rule family.
    #[must_use]
    pub fn kind(&self) -> RuleKind {
        self.kind
    }

    /// Returns the notification audience for notification rules.
    #[must_use]
    pub fn recipient(&self) -> Option<RecipientType> {
        self.recipient
    }

    /// Returns the caller segment.
    #[must_use]
    pub fn caller(&self) -> RuleCaller {
        self.caller
    }

    /// Returns the level segment.
    #[must_use]
    pub fn level(&self) -> RuleLevel {
        self.level
    }

    /// Returns true for the notification rule whose payload omits
    /// `notificationRecipients` when merged.
    #[must_use]
    pub fn uses_reduced_notification_shape(&self) -> bool {
        *self == Self::NOTIFICATION_APPROVER_END_USER_ASSIGNMENT
    }
}

impl Display for RuleId {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        formatter.write_str(self.kind.as_str())?;
        if let Some(recipient) = self.recipient {
            write!(formatter, "_{}", recipient.as_str())?;
        }

        write!(
            formatter,
            "_{}_{}",
            self.caller.as_str(),
            self.level.as_str()
        )
    }
}

impl FromStr for RuleId {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|candidate| candidate.to_string() == value)
            .ok_or_else(|| AppError::Validation(format!("unknown policy rule id '{value}'")))
    }
}

impl TryFrom<String> for RuleId {
    type Error = AppError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<RuleId> for String {
    fn from(value: RuleId) -> Self {
        value.to_string()
    }
}

/// Fields shared by every rule, wrapped around the kind-specific settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleEnvelope<T> {
    /// Rule id.
    pub id: RuleId,
    /// Polymorphic type discriminator sent by the API.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule_type: Option<String>,
    /// Caller/operation target block, carried verbatim.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<Value>,
    /// Kind-specific settings.
    #[serde(flatten)]
    pub settings: T,
}

/// `RoleManagementPolicyExpirationRule` settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpirationRule {
    /// Whether grants must expire.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_expiration_required: Option<bool>,
    /// ISO-8601 maximum length.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maximum_duration: Option<String>,
    /// Fields this engine does not model.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Requirement enforced by an enablement rule.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EnabledRule {
    /// Justification text is required.
    Justification,
    /// Multi-factor authentication is required.
    MultiFactorAuthentication,
    /// Ticket information is required.
    Ticketing,
    /// Requirement not modelled here.
    #[serde(untagged)]
    Other(String),
}

/// `RoleManagementPolicyEnablementRule` settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnablementRule {
    /// Enabled requirements in API order.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled_rules: Option<Vec<EnabledRule>>,
    /// Fields this engine does not model.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl EnablementRule {
    /// Returns true when the requirement is enabled.
    #[must_use]
    pub fn contains(&self, rule: &EnabledRule) -> bool {
        self.enabled_rules
            .as_ref()
            .is_some_and(|rules| rules.contains(rule))
    }
}

/// Approver object kind.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ApproverType {
    /// Single user.
    User,
    /// Group of users.
    Group,
    /// Kind not modelled here.
    #[serde(untagged)]
    Other(String),
}

/// Approver entry in an approval stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Approver {
    /// Object id.
    pub id: String,
    /// Object kind.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_type: Option<ApproverType>,
    /// Fields this engine does not model.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One approval stage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalStage {
    /// Primary approvers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary_approvers: Option<Vec<Approver>>,
    /// Fields this engine does not model, such as stage timeouts.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Approval setting block.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalSettings {
    /// Whether activation requires approval.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_approval_required: Option<bool>,
    /// Approval stages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approval_stages: Option<Vec<ApprovalStage>>,
    /// Fields this engine does not model.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// `RoleManagementPolicyApprovalRule` settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalRule {
    /// Approval setting block.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub setting: Option<ApprovalSettings>,
    /// Fields this engine does not model.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// `RoleManagementPolicyAuthenticationContextRule` settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticationContextRule {
    /// Whether an authentication context is required.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_enabled: Option<bool>,
    /// Authentication context claim value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claim_value: Option<String>,
    /// Fields this engine does not model.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// `RoleManagementPolicyNotificationRule` settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationRule {
    /// Delivery channel, `Email` in practice.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notification_type: Option<String>,
    /// Audience label.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient_type: Option<String>,
    /// `All` or `Critical`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notification_level: Option<String>,
    /// Whether default recipients are notified.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_default_recipients_enabled: Option<bool>,
    /// Additional recipient addresses.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notification_recipients: Option<Vec<String>>,
    /// Fields this engine does not model.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One role management policy rule.
///
/// Known ids deserialize into their typed variant. Rules with other ids are
/// carried as raw JSON objects so they round-trip untouched.
#[derive(Debug, Clone, PartialEq)]
pub enum PolicyRule {
    /// Expiration rule.
    Expiration(RuleEnvelope<ExpirationRule>),
    /// Enablement rule.
    Enablement(RuleEnvelope<EnablementRule>),
    /// Approval rule.
    Approval(RuleEnvelope<ApprovalRule>),
    /// Authentication context rule.
    AuthenticationContext(RuleEnvelope<AuthenticationContextRule>),
    /// Notification rule.
    Notification(RuleEnvelope<NotificationRule>),
    /// Rule with an id outside the known registry.
    Unrecognized(Map<String, Value>),
}

impl PolicyRule {
    /// Returns the typed id for known rules.
    #[must_use]
    pub fn rule_id(&self) -> Option<RuleId> {
        match self {
            Self::Expiration(rule) => Some(rule.id),
            Self::Enablement(rule) => Some(rule.id),
            Self::Approval(rule) => Some(rule.id),
            Self::AuthenticationContext(rule) => Some(rule.id),
            Self::Notification(rule) => Some(rule.id),
            Self::Unrecognized(_) => None,
        }
    }

    /// Returns the raw id string, if the rule carries one.
    #[must_use]
    pub fn key(&self) -> Option<String> {
        match self {
            Self::Unrecognized(fields) => fields
                .get("id")
                .and_then(Value::as_str)
                .map(ToOwned::to_owned),
            known => known.rule_id().map(|id| id.to_string()),
        }
    }

    fn from_json(value: Value) -> Result<Self, serde_json::Error> {
        let Value::Object(fields) = value else {
            return Err(serde_json::Error::custom("policy rule must be a JSON object"));
        };

        let Some(id) = fields
            .get("id")
            .and_then(Value::as_str)
            .and_then(|id| id.parse::<RuleId>().ok())
        else {
            return Ok(Self::Unrecognized(fields));
        };

        let value = Value::Object(fields);
        Ok(match id.kind() {
            RuleKind::Expiration => Self::Expiration(serde_json::from_value(value)?),
            RuleKind::Enablement => Self::Enablement(serde_json::from_value(value)?),
            RuleKind::Approval => Self::Approval(serde_json::from_value(value)?),
            RuleKind::AuthenticationContext => {
                Self::AuthenticationContext(serde_json::from_value(value)?)
            }
            RuleKind::Notification => Self::Notification(serde_json::from_value(value)?),
        })
    }
}

impl Serialize for PolicyRule {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Expiration(rule) => rule.serialize(serializer),
            Self::Enablement(rule) => rule.serialize(serializer),
            Self::Approval(rule) => rule.serialize(serializer),
            Self::AuthenticationContext(rule) => rule.serialize(serializer),
            Self::Notification(rule) => rule.serialize(serializer),
            Self::Unrecognized(fields) => fields.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for PolicyRule {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Self::from_json(value).map_err(D::Error::custom)
    }
}

/// Rules of one policy keyed by id, in the order the API returned them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PolicyRuleStore {
    rules: Vec<PolicyRule>,
    index: HashMap<String, usize>,
}

impl PolicyRuleStore {
    /// Builds the store from a `Get` response. Duplicate ids violate the API
    /// contract and are rejected.
    pub fn from_rules(rules: Vec<PolicyRule>) -> AppResult<Self> {
        let mut index = HashMap::with_capacity(rules.len());
        for (position, rule) in rules.iter().enumerate() {
            let Some(key) = rule.key() else {
                continue;
            };

            if index.insert(key.clone(), position).is_some() {
                return Err(AppError::Internal(format!(
                    "policy response contains rule id '{key}' more than once"
                )));
            }
        }

        Ok(Self { rules, index })
    }

    /// Returns the rule with the given id.
    #[must_use]
    pub fn lookup(&self, id: RuleId) -> Option<&PolicyRule> {
        self.index
            .get(id.to_string().as_str())
            .and_then(|position| self.rules.get(*position))
    }

    /// Returns the rule with the given id, failing when the API omitted it.
    pub fn require(&self, id: RuleId) -> AppResult<&PolicyRule> {
        self.lookup(id).ok_or_else(|| {
            AppError::Internal(format!("policy response is missing rule '{id}'"))
        })
    }

    /// Returns a known expiration rule.
    #[must_use]
    pub fn expiration(&self, id: RuleId) -> Option<&RuleEnvelope<ExpirationRule>> {
        match self.lookup(id)? {
            PolicyRule::Expiration(rule) => Some(rule),
            _ => None,
        }
    }

    /// Returns a known enablement rule.
    #[must_use]
    pub fn enablement(&self, id: RuleId) -> Option<&RuleEnvelope<EnablementRule>> {
        match self.lookup(id)? {
            PolicyRule::Enablement(rule) => Some(rule),
            _ => None,
        }
    }

    /// Returns the approval rule.
    #[must_use]
    pub fn approval(&self) -> Option<&RuleEnvelope<ApprovalRule>> {
        match self.lookup(RuleId::APPROVAL_END_USER_ASSIGNMENT)? {
            PolicyRule::Approval(rule) => Some(rule),
            _ => None,
        }
    }

    /// Returns the authentication context rule.
    #[must_use]
    pub fn authentication_context(&self) -> Option<&RuleEnvelope<AuthenticationContextRule>> {
        match self.lookup(RuleId::AUTHENTICATION_CONTEXT_END_USER_ASSIGNMENT)? {
            PolicyRule::AuthenticationContext(rule) => Some(rule),
            _ => None,
        }
    }

    /// Returns a known notification rule.
    #[must_use]
    pub fn notification(&self, id: RuleId) -> Option<&RuleEnvelope<NotificationRule>> {
        match self.lookup(id)? {
            PolicyRule::Notification(rule) => Some(rule),
            _ => None,
        }
    }

    /// Iterates rules in API order.
    pub fn iter(&self) -> impl Iterator<Item = &PolicyRule> {
        self.rules.iter()
    }

    /// Returns the number of rules.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Returns true when the policy has no rules.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn every_known_id_round_trips_through_text() {
        for id in RuleId::ALL {
            let text = id.to_string();
            assert_eq!(text.parse::<RuleId>().ok(), Some(id), "{text}");
        }
        assert_eq!(
            RuleId::NOTIFICATION_APPROVER_END_USER_ASSIGNMENT.to_string(),
            "Notification_Approver_EndUser_Assignment"
        );
        assert!("Approval_Admin_Eligibility".parse::<RuleId>().is_err());
    }

    #[test]
    fn approval_rule_keeps_unknown_fields() {
        let raw = json!({
            "id": "Approval_EndUser_Assignment",
            "ruleType": "RoleManagementPolicyApprovalRule",
            "setting": {
                "isApprovalRequired": true,
                "selectionMode": "NoApproval",
                "approvalStages": [{
                    "approvalStageTimeOutInDays": 1,
                    "primaryApprovers": [{"id": "a1", "userType": "User", "isBackup": false}]
                }]
            },
            "target": {"caller": "EndUser", "operations": ["All"]}
        });

        let rule = serde_json::from_value::<PolicyRule>(raw.clone());
        assert!(rule.is_ok());
        let rule = rule.unwrap_or_else(|_| unreachable!());
        let PolicyRule::Approval(approval) = &rule else {
            unreachable!();
        };
        assert_eq!(approval.rule_type.as_deref(), Some("RoleManagementPolicyApprovalRule"));

        let back = serde_json::to_value(&rule).unwrap_or_default();
        assert_eq!(back, raw);
    }

    #[test]
    fn unknown_ids_are_carried_opaquely() {
        let raw = json!({"id": "Future_Rule", "ruleType": "Something", "x": [1, 2]});
        let rule = serde_json::from_value::<PolicyRule>(raw.clone());
        assert!(matches!(rule, Ok(PolicyRule::Unrecognized(_))));
        let rule = rule.unwrap_or_else(|_| unreachable!());
        assert_eq!(rule.key().as_deref(), Some("Future_Rule"));
        assert_eq!(serde_json::to_value(&rule).unwrap_or_default(), raw);
    }

    #[test]
    fn store_rejects_duplicate_ids() {
        let rule = serde_json::from_value::<PolicyRule>(json!({
            "id": "Expiration_Admin_Eligibility",
            "isExpirationRequired": true,
            "maximumDuration": "P180D"
        }))
        .unwrap_or_else(|_| unreachable!());

        let store = PolicyRuleStore::from_rules(vec![rule.clone(), rule]);
        assert!(matches!(store, Err(AppError::Internal(_))));
    }

    #[test]
    fn store_looks_up_by_id_and_requires_presence() {
        let rule = serde_json::from_value::<PolicyRule>(json!({
            "id": "Expiration_Admin_Eligibility",
            "isExpirationRequired": true,
            "maximumDuration": "P180D"
        }))
        .unwrap_or_else(|_| unreachable!());
        let store = PolicyRuleStore::from_rules(vec![rule]).unwrap_or_default();

        let expiration = store.expiration(RuleId::EXPIRATION_ADMIN_ELIGIBILITY);
        assert_eq!(
            expiration.and_then(|rule| rule.settings.maximum_duration.as_deref()),
            Some("P180D")
        );
        assert!(store.lookup(RuleId::EXPIRATION_ADMIN_ASSIGNMENT).is_none());
        assert!(matches!(
            store.require(RuleId::EXPIRATION_ADMIN_ASSIGNMENT),
            Err(AppError::Internal(_))
        ));
    }

    #[test]
    fn enablement_rules_parse_unknown_requirements() {
        let rule = serde_json::from_value::<PolicyRule>(json!({
            "id": "Enablement_EndUser_Assignment",
            "enabledRules": ["MultiFactorAuthentication", "Justification", "FutureCheck"]
        }));
        let Ok(PolicyRule::Enablement(rule)) = rule else {
            unreachable!();
        };
        assert!(rule.settings.contains(&EnabledRule::Justification));
        assert!(rule.settings.contains(&EnabledRule::Other("FutureCheck".to_owned())));
        assert!(!rule.settings.contains(&EnabledRule::Ticketing));
    }
}
