//! Azure RBAC desired-state reconciler.

#![forbid(unsafe_code)]

mod config;
mod document;

use std::sync::Arc;

use azrbac_core::{AppError, AppResult};
use azrbac_infrastructure::ArmRestClient;
use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::config::{ReconcilerConfig, init_tracing};
use crate::document::{DesiredStateDocument, Outcome, Reconciler};

#[tokio::main]
async fn main() -> Result<(), AppError> {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = ReconcilerConfig::load()?;
    let raw = std::fs::read_to_string(&config.desired_state_path).map_err(|error| {
        AppError::Validation(format!(
            "failed to read desired state from '{}': {error}",
            config.desired_state_path.display()
        ))
    })?;
    let document = DesiredStateDocument::parse(raw.as_str())?;

    let http_client = reqwest::Client::builder()
        .timeout(config.http_timeout)
        .build()
        .map_err(|error| AppError::Internal(format!("failed to build HTTP client: {error}")))?;
    let api = Arc::new(ArmRestClient::new(
        http_client,
        config.arm_endpoint.as_str(),
        config.access_token.as_str(),
    )?);
    let reconciler = Reconciler::new(api, config.settings);

    info!(
        arm_endpoint = %config.arm_endpoint,
        resources = document.resources.len(),
        poll_interval_ms = config.settings.poll_interval.as_millis(),
        "azrbac-reconciler started"
    );

    let failed = apply_all(&reconciler, document).await;
    if failed > 0 {
        return Err(AppError::Internal(format!(
            "{failed} desired state entries failed to reconcile"
        )));
    }

    Ok(())
}

/// Applies every entry concurrently and returns how many failed.
async fn apply_all(reconciler: &Reconciler, document: DesiredStateDocument) -> usize {
    let mut tasks = JoinSet::new();
    for resource in document.resources {
        let reconciler = reconciler.clone();
        tasks.spawn(async move {
            let label = resource.label();
            let result: AppResult<Outcome> = reconciler.apply(resource).await;
            (label, result)
        });
    }

    let mut applied = 0_usize;
    let mut unchanged = 0_usize;
    let mut failed = 0_usize;
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((label, Ok(Outcome::Unchanged))) => {
                unchanged = unchanged.saturating_add(1);
                info!(resource = %label, "already in desired state");
            }
            Ok((label, Ok(outcome))) => {
                applied = applied.saturating_add(1);
                info!(resource = %label, outcome = %outcome, "reconciled");
            }
            Ok((label, Err(error))) => {
                failed = failed.saturating_add(1);
                warn!(resource = %label, error = %error, "reconcile failed");
            }
            Err(error) => {
                failed = failed.saturating_add(1);
                warn!(error = %error, "reconcile task aborted");
            }
        }
    }

    info!(applied, unchanged, failed, "reconcile run finished");
    failed
}
