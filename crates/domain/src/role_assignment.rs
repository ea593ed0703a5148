use std::fmt::{Display, Formatter};
use std::str::FromStr;

use azrbac_core::{AppError, AppResult, NonEmptyString, TenantId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Condition language version applied when a condition is supplied alone.
pub const DEFAULT_CONDITION_VERSION: &str = "2.0";

const ROLE_ASSIGNMENTS_SEGMENT: &str = "/providers/Microsoft.Authorization/roleAssignments/";
const ROLE_DEFINITIONS_SEGMENT: &str = "/providers/Microsoft.Authorization/roleDefinitions/";
const MANAGEMENT_GROUP_PREFIX: &str = "/providers/Microsoft.Management/managementGroups/";
const MARKETPLACE_SCOPE: &str = "/providers/Microsoft.Marketplace";

/// Principal kind recorded on a role assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PrincipalType {
    /// Azure AD user.
    User,
    /// Azure AD group.
    Group,
    /// Service principal or managed identity.
    ServicePrincipal,
    /// Foreign group from another tenant.
    ForeignGroup,
    /// Device object.
    Device,
}

impl PrincipalType {
    /// Returns the wire value.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "User",
            Self::Group => "Group",
            Self::ServicePrincipal => "ServicePrincipal",
            Self::ForeignGroup => "ForeignGroup",
            Self::Device => "Device",
        }
    }
}

impl FromStr for PrincipalType {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "User" => Ok(Self::User),
            "Group" => Ok(Self::Group),
            "ServicePrincipal" => Ok(Self::ServicePrincipal),
            "ForeignGroup" => Ok(Self::ForeignGroup),
            "Device" => Ok(Self::Device),
            _ => Err(AppError::Validation(format!(
                "unknown principal type '{value}'"
            ))),
        }
    }
}

/// Shape of an ARM scope, which selects the API variant to call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScopeKind {
    /// Subscription, resource group or resource.
    ResourceTree,
    /// Management group.
    ManagementGroup,
    /// Bare tenant root `/`.
    Tenant,
    /// Marketplace scope, served by a separate API.
    Marketplace,
}

impl ScopeKind {
    /// Classifies a scope path, rejecting shapes the API does not accept.
    pub fn classify(scope: &str) -> AppResult<Self> {
        if scope == "/" {
            return Ok(Self::Tenant);
        }

        if starts_with_ignore_case(scope, "/subscriptions/") && scope.len() > "/subscriptions/".len()
        {
            return Ok(Self::ResourceTree);
        }

        if starts_with_ignore_case(scope, MANAGEMENT_GROUP_PREFIX)
            && scope.len() > MANAGEMENT_GROUP_PREFIX.len()
        {
            return Ok(Self::ManagementGroup);
        }

        if starts_with_ignore_case(scope, MARKETPLACE_SCOPE) {
            return Ok(Self::Marketplace);
        }

        Err(AppError::Validation(format!(
            "scope '{scope}' is not a subscription, resource group, resource, management group, tenant or marketplace scope"
        )))
    }

    /// Returns the scope at which role definitions for `scope` are listed.
    ///
    /// Marketplace roles are tenant-level definitions, so their lookups go to `/`.
    #[must_use]
    pub fn role_definition_scope(self, scope: &str) -> &str {
        match self {
            Self::Marketplace => "/",
            Self::ResourceTree | Self::ManagementGroup | Self::Tenant => scope,
        }
    }

    /// Classifies `scope` and returns where its role definitions are listed.
    pub fn role_definition_scope_of(scope: &str) -> AppResult<&str> {
        Ok(Self::classify(scope)?.role_definition_scope(scope))
    }
}

/// Composite identity of a role assignment.
///
/// Formatted as `{scope}/providers/Microsoft.Authorization/roleAssignments/{name}`
/// with an optional `|{tenantId}` suffix for cross-tenant assignments.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RoleAssignmentId {
    scope: String,
    kind: ScopeKind,
    name: Uuid,
    tenant_id: Option<TenantId>,
}

impl RoleAssignmentId {
    /// Creates an identity after validating the scope shape.
    pub fn new(scope: impl Into<String>, name: Uuid, tenant_id: Option<TenantId>) -> AppResult<Self> {
        let scope = normalize_scope(scope.into())?;
        let kind = ScopeKind::classify(scope.as_str())?;

        Ok(Self {
            scope,
            kind,
            name,
            tenant_id,
        })
    }

    /// Returns the assignment scope.
    #[must_use]
    pub fn scope(&self) -> &str {
        self.scope.as_str()
    }

    /// Returns the assignment name.
    #[must_use]
    pub fn name(&self) -> Uuid {
        self.name
    }

    /// Returns the foreign tenant, if any.
    #[must_use]
    pub fn tenant_id(&self) -> Option<TenantId> {
        self.tenant_id
    }

    /// Returns the scope kind.
    #[must_use]
    pub fn scope_kind(&self) -> ScopeKind {
        self.kind
    }

    /// Returns the ARM resource path without the tenant suffix.
    #[must_use]
    pub fn resource_path(&self) -> String {
        format!(
            "{}{ROLE_ASSIGNMENTS_SEGMENT}{}",
            scope_prefix(self.scope.as_str()),
            self.name
        )
    }
}

impl Display for RoleAssignmentId {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        formatter.write_str(self.resource_path().as_str())?;
        if let Some(tenant_id) = self.tenant_id {
            write!(formatter, "|{tenant_id}")?;
        }

        Ok(())
    }
}

impl FromStr for RoleAssignmentId {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let (path, tenant_id) = match value.rsplit_once('|') {
            Some((path, tenant)) => (path, Some(tenant.parse::<TenantId>()?)),
            None => (value, None),
        };

        let position = rfind_ignore_case(path, ROLE_ASSIGNMENTS_SEGMENT).ok_or_else(|| {
            AppError::Validation(format!(
                "role assignment id '{value}' does not contain '{ROLE_ASSIGNMENTS_SEGMENT}'"
            ))
        })?;

        let scope = &path[..position];
        let name = &path[position + ROLE_ASSIGNMENTS_SEGMENT.len()..];
        if name.is_empty() || name.contains('/') {
            return Err(AppError::Validation(format!(
                "role assignment id '{value}' has no assignment name"
            )));
        }

        let name = Uuid::parse_str(name).map_err(|error| {
            AppError::Validation(format!(
                "role assignment name '{name}' is not a UUID: {error}"
            ))
        })?;
        let scope = if scope.is_empty() { "/" } else { scope };

        Self::new(scope, name, tenant_id)
    }
}

/// How a create request names the role to grant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoleReference {
    /// Fully qualified role definition id.
    Id(String),
    /// Role display name such as `Reader`, resolved at the assignment scope.
    Name(NonEmptyString),
}

/// Caller supplied input for a plain role assignment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleAssignmentInput {
    /// Scope the role is granted at.
    pub scope: String,
    /// Assignment name; a new UUID is generated when absent.
    #[serde(default)]
    pub name: Option<Uuid>,
    /// Role definition id. Mutually exclusive with `role_definition_name`.
    #[serde(default)]
    pub role_definition_id: Option<String>,
    /// Role display name. Mutually exclusive with `role_definition_id`.
    #[serde(default)]
    pub role_definition_name: Option<String>,
    /// Object id of the principal receiving the role.
    pub principal_id: String,
    /// Optional principal kind.
    #[serde(default)]
    pub principal_type: Option<PrincipalType>,
    /// Foreign tenant for cross-tenant assignments.
    #[serde(default)]
    pub tenant_id: Option<TenantId>,
    /// ABAC condition expression.
    #[serde(default)]
    pub condition: Option<String>,
    /// ABAC condition language version.
    #[serde(default)]
    pub condition_version: Option<String>,
    /// Delegated managed identity for cross-tenant grants.
    #[serde(default)]
    pub delegated_managed_identity_resource_id: Option<String>,
    /// Free text description.
    #[serde(default)]
    pub description: Option<String>,
    /// Treats the principal as a service principal that may not have replicated yet.
    #[serde(default)]
    pub skip_service_principal_aad_check: bool,
}

/// Validated create request for a plain role assignment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleAssignmentDefinition {
    id: RoleAssignmentId,
    role: RoleReference,
    principal_id: NonEmptyString,
    principal_type: Option<PrincipalType>,
    condition: Option<String>,
    condition_version: Option<String>,
    delegated_managed_identity_resource_id: Option<String>,
    description: Option<String>,
    skip_service_principal_aad_check: bool,
}

impl RoleAssignmentDefinition {
    /// Validates input and fills defaults.
    pub fn new(input: RoleAssignmentInput) -> AppResult<Self> {
        let RoleAssignmentInput {
            scope,
            name,
            role_definition_id,
            role_definition_name,
            principal_id,
            principal_type,
            tenant_id,
            condition,
            condition_version,
            delegated_managed_identity_resource_id,
            description,
            skip_service_principal_aad_check,
        } = input;

        let role = match (non_blank(role_definition_id), non_blank(role_definition_name)) {
            (Some(id), None) => RoleReference::Id(id),
            (None, Some(name)) => RoleReference::Name(NonEmptyString::new(name)?),
            (Some(_), Some(_)) => {
                return Err(AppError::Validation(
                    "only one of role_definition_id and role_definition_name may be set"
                        .to_owned(),
                ));
            }
            (None, None) => {
                return Err(AppError::Validation(
                    "one of role_definition_id or role_definition_name is required".to_owned(),
                ));
            }
        };

        let condition = non_blank(condition);
        let condition_version = match (condition.as_ref(), non_blank(condition_version)) {
            (Some(_), Some(version)) => Some(version),
            (Some(_), None) => Some(DEFAULT_CONDITION_VERSION.to_owned()),
            (None, Some(_)) => {
                return Err(AppError::Validation(
                    "condition_version requires condition to be set".to_owned(),
                ));
            }
            (None, None) => None,
        };

        let principal_type = match principal_type {
            None if skip_service_principal_aad_check => Some(PrincipalType::ServicePrincipal),
            other => other,
        };

        Ok(Self {
            id: RoleAssignmentId::new(scope, name.unwrap_or_else(Uuid::new_v4), tenant_id)?,
            role,
            principal_id: NonEmptyString::new(principal_id)?,
            principal_type,
            condition,
            condition_version,
            delegated_managed_identity_resource_id: non_blank(
                delegated_managed_identity_resource_id,
            ),
            description: non_blank(description),
            skip_service_principal_aad_check,
        })
    }

    /// Returns the assignment identity.
    #[must_use]
    pub fn id(&self) -> &RoleAssignmentId {
        &self.id
    }

    /// Returns the role reference.
    #[must_use]
    pub fn role(&self) -> &RoleReference {
        &self.role
    }

    /// Returns the principal object id.
    #[must_use]
    pub fn principal_id(&self) -> &NonEmptyString {
        &self.principal_id
    }

    /// Returns true when create may retry cross-tenant authorization failures.
    #[must_use]
    pub fn allows_cross_tenant_retry(&self) -> bool {
        self.delegated_managed_identity_resource_id.is_some() && self.skip_service_principal_aad_check
    }

    /// Returns true when principal replication lag is expected.
    #[must_use]
    pub fn skip_service_principal_aad_check(&self) -> bool {
        self.skip_service_principal_aad_check
    }

    /// Builds the properties to submit once the role id is known.
    #[must_use]
    pub fn properties(&self, role_definition_id: impl Into<String>) -> RoleAssignmentProperties {
        RoleAssignmentProperties {
            role_definition_id: role_definition_id.into(),
            principal_id: self.principal_id.as_str().to_owned(),
            principal_type: self.principal_type,
            condition: self.condition.clone(),
            condition_version: self.condition_version.clone(),
            delegated_managed_identity_resource_id: self
                .delegated_managed_identity_resource_id
                .clone(),
            description: self.description.clone(),
        }
    }
}

/// Writable role assignment properties.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleAssignmentProperties {
    /// Fully qualified role definition id.
    pub role_definition_id: String,
    /// Principal object id.
    pub principal_id: String,
    /// Principal kind.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub principal_type: Option<PrincipalType>,
    /// ABAC condition.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    /// ABAC condition version.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition_version: Option<String>,
    /// Delegated managed identity resource id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delegated_managed_identity_resource_id: Option<String>,
    /// Description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Observed role assignment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleAssignment {
    /// Assignment identity.
    pub id: RoleAssignmentId,
    /// Stored properties.
    pub properties: RoleAssignmentProperties,
    /// Display name of the granted role, filled on read.
    pub role_definition_name: Option<String>,
}

impl RoleAssignment {
    /// Applies read-side defaults such as the implicit condition version.
    #[must_use]
    pub fn with_read_defaults(mut self) -> Self {
        if self.properties.condition.is_some() && self.properties.condition_version.is_none() {
            self.properties.condition_version = Some(DEFAULT_CONDITION_VERSION.to_owned());
        }

        self
    }
}

/// Role definition summary used for name resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleDefinition {
    /// Fully qualified role definition id.
    pub id: String,
    /// Role definition GUID.
    pub name: String,
    /// Display name such as `Reader`.
    pub role_name: String,
}

impl RoleDefinition {
    /// Returns the role definition GUID taken from the id's last segment.
    #[must_use]
    pub fn guid_from_id(id: &str) -> Option<&str> {
        rfind_ignore_case(id, ROLE_DEFINITIONS_SEGMENT)
            .map(|position| &id[position + ROLE_DEFINITIONS_SEGMENT.len()..])
            .filter(|guid| !guid.is_empty() && !guid.contains('/'))
    }

    /// Formats a role definition id under a scope.
    #[must_use]
    pub fn scoped_id(scope: &str, guid: &str) -> String {
        format!("{}{ROLE_DEFINITIONS_SEGMENT}{guid}", scope_prefix(scope))
    }
}

fn normalize_scope(scope: String) -> AppResult<String> {
    let trimmed = scope.trim();
    if trimmed.is_empty() {
        return Err(AppError::Validation("scope must not be empty".to_owned()));
    }

    if trimmed == "/" {
        return Ok(trimmed.to_owned());
    }

    Ok(trimmed.trim_end_matches('/').to_owned())
}

fn scope_prefix(scope: &str) -> &str {
    if scope == "/" { "" } else { scope }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.and_then(|value| {
        let trimmed = value.trim().to_owned();
        (!trimmed.is_empty()).then_some(trimmed)
    })
}

fn starts_with_ignore_case(value: &str, prefix: &str) -> bool {
    value
        .get(..prefix.len())
        .is_some_and(|head| head.eq_ignore_ascii_case(prefix))
}

/// Finds the last ASCII case-insensitive occurrence of `needle`.
pub(crate) fn rfind_ignore_case(haystack: &str, needle: &str) -> Option<usize> {
    haystack
        .to_ascii_lowercase()
        .rfind(needle.to_ascii_lowercase().as_str())
}
