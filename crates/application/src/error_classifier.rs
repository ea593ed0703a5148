use azrbac_core::{ApiError, AppError};
use tracing::warn;

/// How a poll loop should treat a failed API call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Transient or replication lag; poll again.
    Retryable,
    /// Abort the operation.
    Fatal,
    /// The intent is already satisfied.
    Ignorable,
}

/// What the failed call was trying to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationIntent {
    /// Mutating create or assign.
    Create,
    /// Visibility or state read.
    Read,
    /// Delete or remove.
    Delete,
}

/// Inputs that change the verdict besides the error itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClassificationContext {
    /// Operation intent.
    pub intent: OperationIntent,
    /// Whether `LinkedAuthorizationFailed` may be waited out.
    pub cross_tenant_retry: bool,
}

impl ClassificationContext {
    /// Context for an intent without cross-tenant retry.
    #[must_use]
    pub fn for_intent(intent: OperationIntent) -> Self {
        Self {
            intent,
            cross_tenant_retry: false,
        }
    }
}

/// Error carrying the classification the poll loop acts on.
#[derive(Debug)]
pub struct ClassifiedError {
    /// Verdict.
    pub class: ErrorClass,
    /// Underlying failure.
    pub error: AppError,
}

impl ClassifiedError {
    /// Classifies an API error for the given context.
    #[must_use]
    pub fn from_api(error: ApiError, context: &ClassificationContext) -> Self {
        let class = classify(&error, context);
        if class == ErrorClass::Retryable {
            warn!(
                status = ?error.status(),
                code = error.code().unwrap_or("none"),
                "retryable API error: {}",
                error.message()
            );
        }

        Self {
            class,
            error: AppError::Remote(error),
        }
    }

    /// Wraps a failure that must abort the loop.
    #[must_use]
    pub fn fatal(error: AppError) -> Self {
        Self {
            class: ErrorClass::Fatal,
            error,
        }
    }
}

const PRINCIPAL_NOT_FOUND: &str = "PrincipalNotFound";
const SUBJECT_NOT_FOUND: &str = "SubjectNotFound";
const ACTIVE_DURATION_TOO_SHORT: &str = "ActiveDurationTooShort";
const ROLE_ASSIGNMENT_DOES_NOT_EXIST: &str = "RoleAssignmentDoesNotExist";
const LINKED_AUTHORIZATION_FAILED: &str = "LinkedAuthorizationFailed";

/// Maps an API error to a verdict. Evaluated on every attempt.
#[must_use]
pub fn classify(error: &ApiError, context: &ClassificationContext) -> ErrorClass {
    let status = error.status().map(|status| status.as_u16());

    if matches!(status, Some(429)) || status.is_some_and(|status| (500..600).contains(&status)) {
        return ErrorClass::Retryable;
    }

    if context.intent == OperationIntent::Delete
        && (error.has_code(ROLE_ASSIGNMENT_DOES_NOT_EXIST) || error.is_not_found())
    {
        return ErrorClass::Ignorable;
    }

    if error.has_code(PRINCIPAL_NOT_FOUND)
        || (status == Some(400) && error.message().contains(PRINCIPAL_NOT_FOUND))
    {
        return ErrorClass::Retryable;
    }

    if error.has_code(SUBJECT_NOT_FOUND) || error.has_code(ACTIVE_DURATION_TOO_SHORT) {
        return ErrorClass::Retryable;
    }

    if context.cross_tenant_retry
        && status == Some(403)
        && error.has_code(LINKED_AUTHORIZATION_FAILED)
    {
        return ErrorClass::Retryable;
    }

    ErrorClass::Fatal
}

#[cfg(test)]
mod tests {
    use azrbac_core::ApiError;
    use http::StatusCode;

    use super::*;

    fn error(status: StatusCode, code: &str) -> ApiError {
        ApiError::new(status, Some(code.to_owned()), "message")
    }

    fn create() -> ClassificationContext {
        ClassificationContext::for_intent(OperationIntent::Create)
    }

    #[test]
    fn replication_errors_are_retryable() {
        assert_eq!(
            classify(&error(StatusCode::BAD_REQUEST, "ActiveDurationTooShort"), &create()),
            ErrorClass::Retryable
        );
        assert_eq!(
            classify(&error(StatusCode::BAD_REQUEST, "SubjectNotFound"), &create()),
            ErrorClass::Retryable
        );
        assert_eq!(
            classify(&error(StatusCode::BAD_REQUEST, "PrincipalNotFound"), &create()),
            ErrorClass::Retryable
        );
    }

    #[test]
    fn principal_not_found_in_message_is_retryable_on_bad_request() {
        let message_only = ApiError::new(
            StatusCode::BAD_REQUEST,
            None,
            "Principal abc does not exist in the directory: PrincipalNotFound",
        );
        assert_eq!(classify(&message_only, &create()), ErrorClass::Retryable);

        let forbidden = ApiError::new(StatusCode::FORBIDDEN, None, "PrincipalNotFound");
        assert_eq!(classify(&forbidden, &create()), ErrorClass::Fatal);
    }

    #[test]
    fn throttling_and_server_errors_are_retryable() {
        for status in [
            StatusCode::TOO_MANY_REQUESTS,
            StatusCode::INTERNAL_SERVER_ERROR,
            StatusCode::SERVICE_UNAVAILABLE,
        ] {
            let api_error = ApiError::new(status, None, "busy");
            assert_eq!(classify(&api_error, &create()), ErrorClass::Retryable);
        }
    }

    #[test]
    fn missing_assignment_on_delete_is_ignorable() {
        let delete = ClassificationContext::for_intent(OperationIntent::Delete);
        assert_eq!(
            classify(&error(StatusCode::BAD_REQUEST, "RoleAssignmentDoesNotExist"), &delete),
            ErrorClass::Ignorable
        );
        assert_eq!(
            classify(&error(StatusCode::NOT_FOUND, "RoleAssignmentNotFound"), &delete),
            ErrorClass::Ignorable
        );
        assert_eq!(
            classify(&error(StatusCode::BAD_REQUEST, "RoleAssignmentDoesNotExist"), &create()),
            ErrorClass::Fatal
        );
    }

    #[test]
    fn linked_authorization_failure_needs_cross_tenant_opt_in() {
        let api_error = error(StatusCode::FORBIDDEN, "LinkedAuthorizationFailed");
        assert_eq!(classify(&api_error, &create()), ErrorClass::Fatal);

        let opted_in = ClassificationContext {
            intent: OperationIntent::Create,
            cross_tenant_retry: true,
        };
        assert_eq!(classify(&api_error, &opted_in), ErrorClass::Retryable);
    }

    #[test]
    fn other_errors_are_fatal() {
        assert_eq!(
            classify(&error(StatusCode::BAD_REQUEST, "InvalidRoleDefinitionId"), &create()),
            ErrorClass::Fatal
        );
        assert_eq!(
            classify(&ApiError::transport("connection reset"), &create()),
            ErrorClass::Fatal
        );
    }
}
