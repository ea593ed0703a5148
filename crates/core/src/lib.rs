//! Shared primitives for all Rust crates in azrbac.

#![forbid(unsafe_code)]

/// Typed errors returned by the Azure Resource Manager API.
pub mod api_error;

use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub use api_error::{ApiError, ApiResult};

/// Result type used across azrbac crates.
pub type AppResult<T> = Result<T, AppError>;

/// A validated non-empty UTF-8 string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NonEmptyString(String);

impl NonEmptyString {
    /// Creates a validated non-empty string.
    pub fn new(value: impl Into<String>) -> AppResult<Self> {
        let value = value.into();
        if value.trim().is_empty() {
            return Err(AppError::Validation(
                "value must not be empty or whitespace".to_owned(),
            ));
        }

        Ok(Self(value))
    }

    /// Returns the underlying string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl TryFrom<String> for NonEmptyString {
    type Error = AppError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<NonEmptyString> for String {
    fn from(value: NonEmptyString) -> Self {
        value.0
    }
}

impl Display for NonEmptyString {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        formatter.write_str(self.0.as_str())
    }
}

/// Azure AD tenant identifier attached to cross-tenant role assignments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TenantId(Uuid);

impl TenantId {
    /// Creates a tenant identifier from an existing UUID value.
    #[must_use]
    pub fn from_uuid(value: Uuid) -> Self {
        Self(value)
    }

    /// Returns the underlying UUID value.
    #[must_use]
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl FromStr for TenantId {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(value.trim())
            .map(Self)
            .map_err(|error| AppError::Validation(format!("invalid tenant id '{value}': {error}")))
    }
}

impl Display for TenantId {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        write!(formatter, "{}", self.0)
    }
}

/// Common application error categories.
#[derive(Debug, Error)]
pub enum AppError {
    /// Invalid input or violated invariant.
    #[error("validation error: {0}")]
    Validation(String),

    /// Requested resource does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Write operation conflicts with existing state.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Internal unexpected error, including violated API contracts.
    #[error("internal error: {0}")]
    Internal(String),

    /// Remote API call failed with a non-retryable error.
    #[error("remote API error: {0}")]
    Remote(#[from] ApiError),

    /// A poll loop ran out of time before reaching its target state.
    #[error(
        "timed out {purpose} (last state: {}, last error: {})",
        .last_state.as_deref().unwrap_or("none"),
        .last_error.as_deref().unwrap_or("none")
    )]
    DeadlineExceeded {
        /// Human readable purpose of the wait.
        purpose: String,
        /// Last state reported by the probe.
        last_state: Option<String>,
        /// Errors observed while polling, oldest first.
        last_error: Option<String>,
    },

    /// A probe reported a state that is neither pending nor the target.
    #[error("unexpected state '{state}' {purpose} (expected one of: {expected})")]
    UnexpectedState {
        /// Human readable purpose of the wait.
        purpose: String,
        /// Observed state label.
        state: String,
        /// Comma separated list of acceptable states.
        expected: String,
    },

    /// Failure annotated with the operation phase and the resource identity.
    #[error("{phase} {resource}: {source}")]
    Operation {
        /// Operation phase such as `creating` or `deleting`.
        phase: String,
        /// Stable identity of the resource being reconciled.
        resource: String,
        /// Underlying failure.
        source: Box<AppError>,
    },
}

impl AppError {
    /// Annotates an error with the operation phase and resource identity.
    #[must_use]
    pub fn in_operation(self, phase: impl Into<String>, resource: impl Display) -> Self {
        Self::Operation {
            phase: phase.into(),
            resource: resource.to_string(),
            source: Box::new(self),
        }
    }

    /// Returns the innermost error, skipping operation annotations.
    #[must_use]
    pub fn root(&self) -> &AppError {
        match self {
            Self::Operation { source, .. } => source.root(),
            other => other,
        }
    }

    /// Returns true when the root cause is a poll deadline.
    #[must_use]
    pub fn is_deadline_exceeded(&self) -> bool {
        matches!(self.root(), Self::DeadlineExceeded { .. })
    }
}
