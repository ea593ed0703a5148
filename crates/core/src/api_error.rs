use std::fmt::{Display, Formatter};

use http::StatusCode;

/// Result type returned by API client ports.
pub type ApiResult<T> = Result<T, ApiError>;

/// Error returned by an Azure Resource Manager call.
///
/// Carries the HTTP status when a response was received, the ARM error code
/// from the `{"error": {"code": ...}}` body when present, and the message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    status: Option<StatusCode>,
    code: Option<String>,
    message: String,
}

impl ApiError {
    /// Creates an error for a received non-success response.
    #[must_use]
    pub fn new(status: StatusCode, code: Option<String>, message: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            code,
            message: message.into(),
        }
    }

    /// Creates an error for a request that never produced a response.
    #[must_use]
    pub fn transport(message: impl Into<String>) -> Self {
        Self {
            status: None,
            code: None,
            message: message.into(),
        }
    }

    /// Creates a 404 error with the given ARM error code.
    #[must_use]
    pub fn not_found(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, Some(code.into()), message)
    }

    /// Returns the HTTP status, if a response was received.
    #[must_use]
    pub fn status(&self) -> Option<StatusCode> {
        self.status
    }

    /// Returns the ARM error code, if the body carried one.
    #[must_use]
    pub fn code(&self) -> Option<&str> {
        self.code.as_deref()
    }

    /// Returns the error message.
    #[must_use]
    pub fn message(&self) -> &str {
        self.message.as_str()
    }

    /// Returns true when the response status was 404.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        self.status == Some(StatusCode::NOT_FOUND)
    }

    /// Returns true when the ARM error code matches, ignoring ASCII case.
    #[must_use]
    pub fn has_code(&self, code: &str) -> bool {
        self.code
            .as_deref()
            .is_some_and(|value| value.eq_ignore_ascii_case(code))
    }
}

impl Display for ApiError {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        match (self.status, self.code.as_deref()) {
            (Some(status), Some(code)) => write!(
                formatter,
                "status {} ({code}): {}",
                status.as_u16(),
                self.message
            ),
            (Some(status), None) => {
                write!(formatter, "status {}: {}", status.as_u16(), self.message)
            }
            (None, _) => write!(formatter, "transport error: {}", self.message),
        }
    }
}

impl std::error::Error for ApiError {}
