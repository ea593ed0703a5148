use azrbac_domain::{
    Expiration, IsoDuration, MemberType, PolicyAssignment, PolicyRule, RoleAssignment,
    RoleAssignmentId, RoleAssignmentProperties, RoleDefinition, RoleManagementPolicy, Schedule,
    ScheduleInstance, ScheduleRequest, ScheduleRequestType, ScopedPolicyId, Ticket,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub(crate) struct ErrorEnvelope {
    pub error: ErrorBody,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ErrorBody {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ListEnvelope<T> {
    #[serde(default = "Vec::new")]
    pub value: Vec<T>,
    #[serde(default)]
    pub next_link: Option<String>,
}

#[derive(Debug, Serialize)]
pub(crate) struct PropertiesBody<'a, T> {
    pub properties: &'a T,
}

#[derive(Debug, Serialize)]
pub(crate) struct PolicyRulesBody<'a> {
    pub rules: &'a [PolicyRule],
}

#[derive(Debug, Deserialize)]
pub(crate) struct RoleAssignmentResource {
    pub properties: RoleAssignmentProperties,
}

impl RoleAssignmentResource {
    pub fn into_assignment(self, id: &RoleAssignmentId) -> RoleAssignment {
        RoleAssignment {
            id: id.clone(),
            properties: self.properties,
            role_definition_name: None,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RoleDefinitionProperties {
    pub role_name: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RoleDefinitionResource {
    pub id: String,
    pub name: String,
    pub properties: RoleDefinitionProperties,
}

impl From<RoleDefinitionResource> for RoleDefinition {
    fn from(resource: RoleDefinitionResource) -> Self {
        Self {
            id: resource.id,
            name: resource.name,
            role_name: resource.properties.role_name,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct TicketInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ticket_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ticket_system: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ExpirationInfo {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ScheduleInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_date_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiration: Option<ExpirationInfo>,
}

impl ScheduleInfo {
    fn from_schedule(schedule: &Schedule) -> Self {
        let expiration = match &schedule.expiration {
            Expiration::NoExpiration => ExpirationInfo {
                kind: Some("NoExpiration".to_owned()),
                duration: None,
                end_date_time: None,
            },
            Expiration::AfterDuration { duration } => ExpirationInfo {
                kind: Some("AfterDuration".to_owned()),
                duration: Some(duration.to_string()),
                end_date_time: None,
            },
            Expiration::AfterDateTime { end_date_time } => ExpirationInfo {
                kind: Some("AfterDateTime".to_owned()),
                duration: None,
                end_date_time: Some(*end_date_time),
            },
        };

        Self {
            start_date_time: Some(schedule.start_date_time),
            expiration: Some(expiration),
        }
    }

    /// Returns `None` when the stored schedule is incomplete or unparseable.
    fn to_schedule(&self) -> Option<Schedule> {
        let start_date_time = self.start_date_time?;
        let expiration = match &self.expiration {
            None => Expiration::NoExpiration,
            Some(info) => match info.kind.as_deref() {
                None | Some("NoExpiration") => Expiration::NoExpiration,
                Some("AfterDuration") => Expiration::AfterDuration {
                    duration: info.duration.as_deref()?.parse::<IsoDuration>().ok()?,
                },
                Some("AfterDateTime") => Expiration::AfterDateTime {
                    end_date_time: info.end_date_time?,
                },
                Some(_) => return None,
            },
        };

        Some(Schedule {
            start_date_time,
            expiration,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ScheduleRequestProperties {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(default)]
    pub principal_id: String,
    #[serde(default)]
    pub role_definition_id: String,
    pub request_type: ScheduleRequestType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub justification: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ticket_info: Option<TicketInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule_info: Option<ScheduleInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_on: Option<DateTime<Utc>>,
}

impl ScheduleRequestProperties {
    pub fn from_request(request: &ScheduleRequest) -> Self {
        Self {
            scope: None,
            principal_id: request.principal_id.clone(),
            role_definition_id: request.role_definition_id.clone(),
            request_type: request.request_type,
            justification: request.justification.clone(),
            ticket_info: request.ticket.as_ref().map(|ticket| TicketInfo {
                ticket_number: ticket.number.clone(),
                ticket_system: ticket.system.clone(),
            }),
            schedule_info: request.schedule.as_ref().map(ScheduleInfo::from_schedule),
            created_on: None,
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct ScheduleRequestResource {
    #[serde(default)]
    pub id: Option<String>,
    pub properties: ScheduleRequestProperties,
}

impl ScheduleRequestResource {
    pub fn into_request(self, fallback_scope: &str) -> ScheduleRequest {
        let properties = self.properties;
        ScheduleRequest {
            id: self.id.unwrap_or_default(),
            scope: properties
                .scope
                .unwrap_or_else(|| fallback_scope.to_owned()),
            role_definition_id: properties.role_definition_id,
            principal_id: properties.principal_id,
            request_type: properties.request_type,
            schedule: properties
                .schedule_info
                .as_ref()
                .and_then(ScheduleInfo::to_schedule),
            justification: properties.justification,
            ticket: properties.ticket_info.map(|ticket| Ticket {
                number: ticket.ticket_number,
                system: ticket.ticket_system,
            }),
            created_on: properties.created_on,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ScheduleInstanceProperties {
    #[serde(default)]
    pub scope: String,
    #[serde(default)]
    pub role_definition_id: String,
    #[serde(default)]
    pub principal_id: String,
    pub member_type: MemberType,
    #[serde(default)]
    pub start_date_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_date_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ScheduleInstanceResource {
    pub id: String,
    pub properties: ScheduleInstanceProperties,
}

impl From<ScheduleInstanceResource> for ScheduleInstance {
    fn from(resource: ScheduleInstanceResource) -> Self {
        let properties = resource.properties;
        Self {
            id: resource.id,
            scope: properties.scope,
            role_definition_id: properties.role_definition_id,
            principal_id: properties.principal_id,
            member_type: properties.member_type,
            start_date_time: properties.start_date_time,
            end_date_time: properties.end_date_time,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct PolicyProperties {
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub rules: Vec<PolicyRule>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct PolicyResource {
    pub properties: PolicyProperties,
}

impl PolicyResource {
    pub fn into_policy(self, id: &ScopedPolicyId) -> RoleManagementPolicy {
        RoleManagementPolicy {
            id: id.clone(),
            display_name: self.properties.display_name,
            description: self.properties.description,
            rules: self.properties.rules,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct PolicyAssignmentProperties {
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub role_definition_id: Option<String>,
    #[serde(default)]
    pub policy_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct PolicyAssignmentResource {
    pub properties: PolicyAssignmentProperties,
}

impl PolicyAssignmentResource {
    /// Drops assignments missing any of the binding fields.
    pub fn into_assignment(self) -> Option<PolicyAssignment> {
        let properties = self.properties;
        Some(PolicyAssignment {
            scope: properties.scope?,
            role_definition_id: properties.role_definition_id?,
            policy_id: properties.policy_id?,
        })
    }
}
