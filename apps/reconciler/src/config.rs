use std::env;
use std::path::PathBuf;
use std::time::Duration;

use azrbac_application::ReconcileSettings;
use azrbac_core::{AppError, AppResult};
use tracing_subscriber::EnvFilter;

const DEFAULT_ARM_ENDPOINT: &str = "https://management.azure.com";

#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    pub access_token: String,
    pub arm_endpoint: String,
    pub desired_state_path: PathBuf,
    pub http_timeout: Duration,
    pub settings: ReconcileSettings,
}

impl ReconcilerConfig {
    pub fn load() -> AppResult<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Builds the configuration from any variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> AppResult<Self> {
        let access_token = required_non_empty(&lookup, "AZURE_ACCESS_TOKEN")?;
        let arm_endpoint = lookup("ARM_ENDPOINT")
            .map(|value| value.trim().trim_end_matches('/').to_owned())
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| DEFAULT_ARM_ENDPOINT.to_owned());
        let desired_state_path = PathBuf::from(required_non_empty(&lookup, "DESIRED_STATE_PATH")?);

        let poll_interval_ms = positive_u64(&lookup, "RECONCILER_POLL_INTERVAL_MS", 5_000)?;
        let create_timeout_secs = positive_u64(&lookup, "RECONCILER_CREATE_TIMEOUT_SECS", 1_800)?;
        let read_timeout_secs = positive_u64(&lookup, "RECONCILER_READ_TIMEOUT_SECS", 300)?;
        let delete_timeout_secs = positive_u64(&lookup, "RECONCILER_DELETE_TIMEOUT_SECS", 1_800)?;
        let visibility_occurrences = positive_u64(&lookup, "RECONCILER_VISIBILITY_OCCURRENCES", 5)?;
        let http_timeout_secs = positive_u64(&lookup, "RECONCILER_HTTP_TIMEOUT_SECS", 60)?;

        let visibility_occurrences = u32::try_from(visibility_occurrences).map_err(|_| {
            AppError::Validation(format!(
                "RECONCILER_VISIBILITY_OCCURRENCES value {visibility_occurrences} is too large"
            ))
        })?;

        Ok(Self {
            access_token,
            arm_endpoint,
            desired_state_path,
            http_timeout: Duration::from_secs(http_timeout_secs),
            settings: ReconcileSettings {
                poll_interval: Duration::from_millis(poll_interval_ms),
                create_timeout: Duration::from_secs(create_timeout_secs),
                read_timeout: Duration::from_secs(read_timeout_secs),
                update_timeout: Duration::from_secs(create_timeout_secs),
                delete_timeout: Duration::from_secs(delete_timeout_secs),
                visibility_occurrences,
            },
        })
    }
}

pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .init();
}

fn required_non_empty(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> AppResult<String> {
    let value = lookup(name).ok_or_else(|| AppError::Validation(format!("{name} is required")))?;
    if value.trim().is_empty() {
        return Err(AppError::Validation(format!("{name} must not be empty")));
    }

    Ok(value.trim().to_owned())
}

fn positive_u64(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
    default: u64,
) -> AppResult<u64> {
    let value = match lookup(name) {
        Some(value) => value.trim().parse::<u64>().map_err(|error| {
            AppError::Validation(format!("invalid {name} value '{value}': {error}"))
        })?,
        None => default,
    };

    if value == 0 {
        return Err(AppError::Validation(format!(
            "{name} must be greater than zero"
        )));
    }

    Ok(value)
}
