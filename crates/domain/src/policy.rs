use std::fmt::{Display, Formatter};
use std::str::FromStr;

use azrbac_core::{AppError, AppResult};

use crate::policy_rule::PolicyRule;
use crate::role_assignment::{ScopeKind, rfind_ignore_case};

const POLICIES_SEGMENT: &str = "/providers/Microsoft.Authorization/roleManagementPolicies/";

/// Role management policy as returned by `Get`.
#[derive(Debug, Clone, PartialEq)]
pub struct RoleManagementPolicy {
    /// Scoped policy id.
    pub id: ScopedPolicyId,
    /// Display name.
    pub display_name: Option<String>,
    /// Description.
    pub description: Option<String>,
    /// Rules in API order.
    pub rules: Vec<PolicyRule>,
}

/// Binding of a policy to a role definition at a scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyAssignment {
    /// Scope of the binding.
    pub scope: String,
    /// Role definition the policy governs.
    pub role_definition_id: String,
    /// Fully qualified policy id.
    pub policy_id: String,
}

/// Policy id `{scope}/providers/Microsoft.Authorization/roleManagementPolicies/{name}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ScopedPolicyId {
    scope: String,
    name: String,
}

impl ScopedPolicyId {
    /// Creates an id after validating the scope shape.
    pub fn new(scope: impl Into<String>, name: impl Into<String>) -> AppResult<Self> {
        let scope = scope.into();
        let name = name.into();
        ScopeKind::classify(scope.as_str())?;
        if name.trim().is_empty() || name.contains('/') {
            return Err(AppError::Validation(format!(
                "policy name '{name}' must be a single non-empty path segment"
            )));
        }

        Ok(Self { scope, name })
    }

    /// Returns the policy scope.
    #[must_use]
    pub fn scope(&self) -> &str {
        self.scope.as_str()
    }

    /// Returns the policy name.
    #[must_use]
    pub fn name(&self) -> &str {
        self.name.as_str()
    }
}

impl Display for ScopedPolicyId {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        let scope = if self.scope == "/" { "" } else { self.scope.as_str() };
        write!(formatter, "{scope}{POLICIES_SEGMENT}{}", self.name)
    }
}

impl FromStr for ScopedPolicyId {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let position = rfind_ignore_case(value, POLICIES_SEGMENT).ok_or_else(|| {
            AppError::Validation(format!(
                "'{value}' is not a role management policy id"
            ))
        })?;

        let scope = &value[..position];
        let scope = if scope.is_empty() { "/" } else { scope };
        Self::new(scope, &value[position + POLICIES_SEGMENT.len()..])
    }
}
