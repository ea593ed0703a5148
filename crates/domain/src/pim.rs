use std::fmt::{Display, Formatter};
use std::str::FromStr;

use azrbac_core::{AppError, AppResult, NonEmptyString};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::iso_duration::IsoDuration;
use crate::role_assignment::ScopeKind;

/// PIM assignment flavor; each has its own schedule request and instance APIs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PimAssignmentKind {
    /// Role is active for the schedule window.
    Active,
    /// Principal may activate the role during the schedule window.
    Eligible,
}

impl PimAssignmentKind {
    /// Returns stable kind label.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Eligible => "eligible",
        }
    }
}

impl Display for PimAssignmentKind {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// Schedule request intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScheduleRequestType {
    /// Administrator grants the role.
    AdminAssign,
    /// Administrator revokes the role.
    AdminRemove,
    /// Any other request type, such as self activation.
    #[serde(other)]
    Other,
}

/// How an instance relates to the queried scope.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MemberType {
    /// Assigned explicitly at the scope.
    Direct,
    /// Inherited from a parent scope.
    Inherited,
    /// Granted through group membership.
    Group,
    /// Unrecognized member type.
    #[serde(untagged)]
    Other(String),
}

/// Schedule expiration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Expiration {
    /// Grant never expires.
    NoExpiration,
    /// Grant expires after an ISO-8601 duration.
    AfterDuration {
        /// Grant length.
        duration: IsoDuration,
    },
    /// Grant expires at a point in time.
    AfterDateTime {
        /// Expiry timestamp.
        end_date_time: DateTime<Utc>,
    },
}

/// Grant window submitted with a schedule request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schedule {
    /// Start of the window.
    pub start_date_time: DateTime<Utc>,
    /// End of the window.
    pub expiration: Expiration,
}

/// Change ticket reference.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticket {
    /// Ticket number.
    #[serde(default)]
    pub number: Option<String>,
    /// Ticketing system name.
    #[serde(default)]
    pub system: Option<String>,
}

/// Stable identity of a PIM assignment as `{scope}|{roleDefinitionId}|{principalId}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PimAssignmentId {
    scope: String,
    role_definition_id: String,
    principal_id: String,
}

impl PimAssignmentId {
    /// Creates a validated identity.
    pub fn new(
        scope: impl Into<String>,
        role_definition_id: impl Into<String>,
        principal_id: impl Into<String>,
    ) -> AppResult<Self> {
        let scope = NonEmptyString::new(scope)?;
        ScopeKind::classify(scope.as_str())?;
        let role_definition_id = NonEmptyString::new(role_definition_id)?;
        let principal_id = NonEmptyString::new(principal_id)?;

        for part in [&scope, &role_definition_id, &principal_id] {
            if part.as_str().contains('|') {
                return Err(AppError::Validation(format!(
                    "PIM assignment id component '{part}' must not contain '|'"
                )));
            }
        }

        Ok(Self {
            scope: scope.into(),
            role_definition_id: role_definition_id.into(),
            principal_id: principal_id.into(),
        })
    }

    /// Returns the assignment scope.
    #[must_use]
    pub fn scope(&self) -> &str {
        self.scope.as_str()
    }

    /// Returns the role definition id.
    #[must_use]
    pub fn role_definition_id(&self) -> &str {
        self.role_definition_id.as_str()
    }

    /// Returns the principal object id.
    #[must_use]
    pub fn principal_id(&self) -> &str {
        self.principal_id.as_str()
    }

    /// Returns the list filter selecting this triple's instances and requests.
    #[must_use]
    pub fn filter(&self) -> ScheduleFilter {
        ScheduleFilter {
            principal_id: self.principal_id.clone(),
            role_definition_id: self.role_definition_id.clone(),
        }
    }
}

impl Display for PimAssignmentId {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            formatter,
            "{}|{}|{}",
            self.scope, self.role_definition_id, self.principal_id
        )
    }
}

impl FromStr for PimAssignmentId {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let parts = value.split('|').collect::<Vec<_>>();
        let [scope, role_definition_id, principal_id] = parts.as_slice() else {
            return Err(AppError::Validation(format!(
                "PIM assignment id '{value}' must have the form scope|roleDefinitionId|principalId"
            )));
        };

        Self::new(*scope, *role_definition_id, *principal_id)
    }
}

/// `$filter` for schedule instance and request list calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleFilter {
    /// Principal object id.
    pub principal_id: String,
    /// Role definition id.
    pub role_definition_id: String,
}

impl ScheduleFilter {
    /// Renders the OData filter expression.
    #[must_use]
    pub fn to_odata(&self) -> String {
        format!(
            "principalId eq {} and roleDefinitionId eq {}",
            odata_literal(&self.principal_id),
            odata_literal(&self.role_definition_id)
        )
    }
}

/// Quotes a value for use inside an OData string literal.
#[must_use]
pub fn odata_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Mutation intent sent to the schedule request API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleRequest {
    /// Server-assigned or caller-chosen request id; empty before submission.
    pub id: String,
    /// Scope of the grant.
    pub scope: String,
    /// Role definition id.
    pub role_definition_id: String,
    /// Principal object id.
    pub principal_id: String,
    /// Assign or remove.
    pub request_type: ScheduleRequestType,
    /// Grant window, absent on removals.
    pub schedule: Option<Schedule>,
    /// Justification text.
    pub justification: Option<String>,
    /// Ticket reference.
    pub ticket: Option<Ticket>,
    /// Submission time reported by the API.
    pub created_on: Option<DateTime<Utc>>,
}

impl ScheduleRequest {
    /// Builds a removal request for an existing assignment.
    #[must_use]
    pub fn removal(id: &PimAssignmentId) -> Self {
        Self {
            id: String::new(),
            scope: id.scope().to_owned(),
            role_definition_id: id.role_definition_id().to_owned(),
            principal_id: id.principal_id().to_owned(),
            request_type: ScheduleRequestType::AdminRemove,
            schedule: None,
            justification: None,
            ticket: None,
            created_on: None,
        }
    }
}

/// Durable grant produced by a schedule request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleInstance {
    /// Instance resource id.
    pub id: String,
    /// Scope of the grant.
    pub scope: String,
    /// Role definition id.
    pub role_definition_id: String,
    /// Principal object id.
    pub principal_id: String,
    /// Relationship to the queried scope.
    pub member_type: MemberType,
    /// Start of the window.
    pub start_date_time: Option<DateTime<Utc>>,
    /// End of the window.
    pub end_date_time: Option<DateTime<Utc>>,
}

/// Picks the directly assigned instance, preferring an exact scope match.
///
/// Inherited and group-derived instances are never returned.
#[must_use]
pub fn select_direct_instance<'a>(
    instances: &'a [ScheduleInstance],
    scope: &str,
) -> Option<&'a ScheduleInstance> {
    let mut direct = instances
        .iter()
        .filter(|instance| instance.member_type == MemberType::Direct);
    let first = direct.next()?;
    if first.scope.eq_ignore_ascii_case(scope) {
        return Some(first);
    }

    direct
        .find(|instance| instance.scope.eq_ignore_ascii_case(scope))
        .or(Some(first))
}

/// Caller supplied schedule for a PIM assignment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleInput {
    /// Start of the window; defaults to the submission time.
    #[serde(default)]
    pub start_date_time: Option<DateTime<Utc>>,
    /// Days until expiry. Mutually exclusive with `end_date_time`.
    #[serde(default)]
    pub duration_days: Option<u32>,
    /// Hours until expiry. Mutually exclusive with `end_date_time`.
    #[serde(default)]
    pub duration_hours: Option<u32>,
    /// Expiry timestamp.
    #[serde(default)]
    pub end_date_time: Option<DateTime<Utc>>,
}

impl ScheduleInput {
    /// Resolves the input into a concrete schedule.
    pub fn to_schedule(&self, now: DateTime<Utc>) -> AppResult<Schedule> {
        let has_duration = self.duration_days.is_some() || self.duration_hours.is_some();
        let expiration = match (has_duration, self.end_date_time) {
            (true, Some(_)) => {
                return Err(AppError::Validation(
                    "duration_days/duration_hours and end_date_time are mutually exclusive"
                        .to_owned(),
                ));
            }
            (true, None) => {
                let duration = IsoDuration::from_days_and_hours(
                    self.duration_days.unwrap_or_default(),
                    self.duration_hours.unwrap_or_default(),
                );
                if duration.is_zero() {
                    return Err(AppError::Validation(
                        "schedule duration must be greater than zero".to_owned(),
                    ));
                }
                Expiration::AfterDuration { duration }
            }
            (false, Some(end_date_time)) => Expiration::AfterDateTime { end_date_time },
            (false, None) => Expiration::NoExpiration,
        };

        let start_date_time = self.start_date_time.unwrap_or(now);
        if let Expiration::AfterDateTime { end_date_time } = &expiration
            && *end_date_time <= start_date_time
        {
            return Err(AppError::Validation(
                "end_date_time must be after start_date_time".to_owned(),
            ));
        }

        Ok(Schedule {
            start_date_time,
            expiration,
        })
    }

    /// Rebuilds caller input from a stored schedule.
    #[must_use]
    pub fn from_schedule(schedule: &Schedule) -> Self {
        let mut input = Self {
            start_date_time: Some(schedule.start_date_time),
            ..Self::default()
        };

        match &schedule.expiration {
            Expiration::NoExpiration => {}
            Expiration::AfterDuration { duration } => {
                input.duration_days = (duration.days() > 0).then_some(duration.days());
                input.duration_hours = (duration.hours() > 0).then_some(duration.hours());
            }
            Expiration::AfterDateTime { end_date_time } => {
                input.end_date_time = Some(*end_date_time);
            }
        }

        input
    }
}

/// Caller supplied input for a PIM assignment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PimAssignmentInput {
    /// Scope of the grant.
    pub scope: String,
    /// Role definition id.
    pub role_definition_id: String,
    /// Principal object id.
    pub principal_id: String,
    /// Grant window.
    #[serde(default)]
    pub schedule: ScheduleInput,
    /// Justification text.
    #[serde(default)]
    pub justification: Option<String>,
    /// Ticket reference.
    #[serde(default)]
    pub ticket: Option<Ticket>,
}

impl PimAssignmentInput {
    /// Returns the assignment identity.
    pub fn id(&self) -> AppResult<PimAssignmentId> {
        PimAssignmentId::new(
            self.scope.as_str(),
            self.role_definition_id.as_str(),
            self.principal_id.as_str(),
        )
    }

    /// Builds the assign request for this input.
    pub fn to_request(&self, now: DateTime<Utc>) -> AppResult<ScheduleRequest> {
        let id = self.id()?;
        Ok(ScheduleRequest {
            id: String::new(),
            scope: id.scope().to_owned(),
            role_definition_id: id.role_definition_id().to_owned(),
            principal_id: id.principal_id().to_owned(),
            request_type: ScheduleRequestType::AdminAssign,
            schedule: Some(self.schedule.to_schedule(now)?),
            justification: self
                .justification
                .as_ref()
                .map(|value| value.trim().to_owned())
                .filter(|value| !value.is_empty()),
            ticket: self.ticket.clone(),
            created_on: None,
        })
    }
}

/// Observed PIM assignment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PimAssignment {
    /// Assignment identity.
    pub id: PimAssignmentId,
    /// Assignment flavor.
    pub kind: PimAssignmentKind,
    /// Direct instance backing the grant.
    pub instance: ScheduleInstance,
    /// Schedule recovered from the latest assign request.
    pub schedule: Option<ScheduleInput>,
    /// Justification from the latest assign request.
    pub justification: Option<String>,
    /// Ticket from the latest assign request.
    pub ticket: Option<Ticket>,
}
