//! Per-Diem Billing Service
//!
//! Wires the billing engine to PostgreSQL and the HTTP payment gateway, runs
//! it on a schedule and exposes a small HTTP surface:
//!
//! - `GET  /health`, `GET /health/ready`
//! - `GET  /api/v1/billing/stats/:user_id`
//! - `POST /api/v1/billing/runs`
//!
//! # Example
//!
//! ```rust,ignore
//! use interface_api::{create_router, AppState};
//!
//! let app = create_router(AppState { runner, ledger_health });
//! axum::serve(listener, app).await?;
//! ```

pub mod config;
pub mod error;
pub mod gateway;
pub mod scheduler;
pub mod handlers;

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use core_kernel::HealthCheckable;

use crate::handlers::{billing, health};
use crate::scheduler::BillingRunner;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub runner: Arc<BillingRunner>,
    /// Probed by the readiness endpoint
    pub ledger_health: Arc<dyn HealthCheckable>,
}

/// Creates the service router
pub fn create_router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/health", get(health::health_check))
        .route("/health/ready", get(health::readiness_check));

    let billing_routes = Router::new()
        .route("/stats/:user_id", get(billing::get_stats))
        .route("/runs", post(billing::trigger_run));

    Router::new()
        .merge(public_routes)
        .nest("/api/v1/billing", billing_routes)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}
