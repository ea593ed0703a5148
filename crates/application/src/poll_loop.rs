use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use azrbac_core::{AppError, AppResult};
use tokio::time::Instant;
use tracing::debug;

use crate::error_classifier::{ClassifiedError, ErrorClass};

/// State reported by a reconciliation probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceState {
    /// Not yet in the wanted state.
    Pending,
    /// Readable and consistent.
    Ready,
    /// Not visible.
    Missing,
    /// Mutation accepted.
    Created,
    /// Visible.
    Found,
    /// Removal accepted.
    Deleted,
}

impl ResourceState {
    /// Returns stable state label.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Ready => "ready",
            Self::Missing => "missing",
            Self::Created => "created",
            Self::Found => "found",
            Self::Deleted => "deleted",
        }
    }
}

impl Display for ResourceState {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// Parameters of one bounded wait.
#[derive(Debug, Clone)]
pub struct PollSpec<S> {
    /// Human readable purpose, used in failure messages.
    pub purpose: String,
    /// States that mean "keep polling".
    pub pending: Vec<S>,
    /// State that ends the wait.
    pub target: S,
    /// Fixed delay between probes.
    pub interval: Duration,
    /// Point after which the wait fails.
    pub deadline: Instant,
    /// Consecutive target observations required.
    pub continuous_occurrences: u32,
}

impl<S> PollSpec<S> {
    /// Creates a spec that succeeds on the first target observation.
    #[must_use]
    pub fn new(
        purpose: impl Into<String>,
        pending: Vec<S>,
        target: S,
        interval: Duration,
        deadline: Instant,
    ) -> Self {
        Self {
            purpose: purpose.into(),
            pending,
            target,
            interval,
            deadline,
            continuous_occurrences: 1,
        }
    }

    /// Requires `occurrences` consecutive target observations.
    #[must_use]
    pub fn continuous(mut self, occurrences: u32) -> Self {
        self.continuous_occurrences = occurrences.max(1);
        self
    }
}

/// Invokes `probe` until it reports the target state for the required number
/// of consecutive polls, the deadline passes, or a fatal error occurs.
///
/// Retryable and ignorable errors count as pending and reset the streak. The
/// value returned with the final target observation is the result.
pub async fn poll_until<S, T, F, Fut>(spec: PollSpec<S>, mut probe: F) -> AppResult<T>
where
    S: Copy + PartialEq + Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<(S, T), ClassifiedError>>,
{
    let required = spec.continuous_occurrences.max(1);
    let mut streak = 0_u32;
    let mut attempt = 0_u32;
    let mut last_state: Option<S> = None;
    let mut errors: Vec<String> = Vec::new();

    loop {
        let now = Instant::now();
        if now >= spec.deadline {
            return Err(AppError::DeadlineExceeded {
                purpose: spec.purpose,
                last_state: last_state.map(|state| state.to_string()),
                last_error: (!errors.is_empty()).then(|| errors.join("; ")),
            });
        }

        attempt += 1;
        match probe().await {
            Ok((state, value)) => {
                debug!(purpose = %spec.purpose, attempt, state = %state, "poll attempt");
                last_state = Some(state);

                if state == spec.target {
                    streak += 1;
                    if streak >= required {
                        return Ok(value);
                    }
                } else if spec.pending.contains(&state) {
                    streak = 0;
                } else {
                    let mut expected = spec
                        .pending
                        .iter()
                        .map(ToString::to_string)
                        .collect::<Vec<_>>();
                    expected.push(spec.target.to_string());

                    return Err(AppError::UnexpectedState {
                        purpose: spec.purpose,
                        state: state.to_string(),
                        expected: expected.join(", "),
                    });
                }
            }
            Err(ClassifiedError {
                class: ErrorClass::Fatal,
                error,
            }) => return Err(error),
            Err(ClassifiedError { class, error }) => {
                debug!(purpose = %spec.purpose, attempt, class = ?class, "poll attempt failed: {error}");
                streak = 0;
                let message = error.to_string();
                if !errors.contains(&message) {
                    errors.push(message);
                }
            }
        }

        let remaining = spec.deadline.saturating_duration_since(Instant::now());
        tokio::time::sleep(spec.interval.min(remaining)).await;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use azrbac_core::ApiError;
    use http::StatusCode;

    use super::*;
    use crate::error_classifier::{ClassificationContext, OperationIntent};

    const INTERVAL: Duration = Duration::from_secs(5);

    fn spec(deadline: Instant) -> PollSpec<ResourceState> {
        PollSpec::new(
            "waiting for x to become found",
            vec![ResourceState::Missing],
            ResourceState::Found,
            INTERVAL,
            deadline,
        )
    }

    fn retryable() -> ClassifiedError {
        ClassifiedError::from_api(
            ApiError::new(StatusCode::BAD_REQUEST, Some("SubjectNotFound".to_owned()), "lag"),
            &ClassificationContext::for_intent(OperationIntent::Create),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn past_deadline_fails_without_probing_twice() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let deadline = Instant::now() - Duration::from_secs(1);

        let result = poll_until(spec(deadline), || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, ClassifiedError>((ResourceState::Found, ())) }
        })
        .await;

        assert!(matches!(result, Err(AppError::DeadlineExceeded { .. })));
        assert!(calls.load(Ordering::SeqCst) <= 1);
    }

    #[tokio::test(start_paused = true)]
    async fn pending_then_target_succeeds() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let result = poll_until(spec(Instant::now() + Duration::from_secs(60)), || {
            let call = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                let state = if call < 2 {
                    ResourceState::Missing
                } else {
                    ResourceState::Found
                };
                Ok::<_, ClassifiedError>((state, call))
            }
        })
        .await;

        assert_eq!(result.ok(), Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn continuous_occurrences_reset_on_pending() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let sequence = [
            ResourceState::Found,
            ResourceState::Found,
            ResourceState::Missing,
            ResourceState::Found,
            ResourceState::Found,
            ResourceState::Found,
        ];

        let result = poll_until(
            spec(Instant::now() + Duration::from_secs(300)).continuous(3),
            || {
                let call = counter.fetch_add(1, Ordering::SeqCst) as usize;
                let state = sequence.get(call).copied().unwrap_or(ResourceState::Found);
                async move { Ok::<_, ClassifiedError>((state, ())) }
            },
        )
        .await;

        assert!(result.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn fatal_error_returns_immediately() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let result = poll_until(spec(Instant::now() + Duration::from_secs(60)), || {
            counter.fetch_add(1, Ordering::SeqCst);
            async {
                Err::<(ResourceState, ()), _>(ClassifiedError::fatal(AppError::Validation(
                    "bad".to_owned(),
                )))
            }
        })
        .await;

        assert!(matches!(result, Err(AppError::Validation(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_reports_last_state_and_errors() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let result = poll_until(spec(Instant::now() + Duration::from_secs(20)), || {
            let call = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if call % 2 == 0 {
                    Ok((ResourceState::Missing, ()))
                } else {
                    Err(retryable())
                }
            }
        })
        .await;

        let Err(AppError::DeadlineExceeded {
            last_state,
            last_error,
            ..
        }) = result
        else {
            unreachable!();
        };
        assert_eq!(last_state.as_deref(), Some("missing"));
        assert!(last_error.unwrap_or_default().contains("SubjectNotFound"));
    }

    #[tokio::test(start_paused = true)]
    async fn unexpected_state_fails() {
        let result = poll_until(spec(Instant::now() + Duration::from_secs(60)), || async {
            Ok::<_, ClassifiedError>((ResourceState::Deleted, ()))
        })
        .await;

        assert!(matches!(
            result,
            Err(AppError::UnexpectedState { state, .. }) if state == "deleted"
        ));
    }
}
