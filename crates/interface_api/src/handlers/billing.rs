//! Billing handlers

use axum::{
    extract::{Path, State},
    Json,
};
use tracing::info;

use core_kernel::UserId;
use domain_billing::{BillingRunReport, BillingStats};

use crate::scheduler::RunTrigger;
use crate::{error::ApiError, AppState};

/// Current-month invoice figures for a lessee
pub async fn get_stats(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<BillingStats>, ApiError> {
    let user_id: UserId = user_id
        .parse()
        .map_err(|_| ApiError::BadRequest(format!("invalid user id: {}", user_id)))?;

    let stats = state.runner.engine().get_billing_stats(user_id).await?;
    Ok(Json(stats))
}

/// Executes one billing run now and returns its report
pub async fn trigger_run(State(state): State<AppState>) -> Result<Json<BillingRunReport>, ApiError> {
    info!("Manual billing run requested");
    let report = state.runner.run_once(RunTrigger::Manual).await?;
    Ok(Json(report))
}
