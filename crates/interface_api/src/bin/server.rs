//! Per-diem billing service binary
//!
//! ```bash
//! BILLING_DATABASE_URL=postgres://localhost/perdiem \
//! BILLING_GATEWAY_BASE_URL=https://pay.example.com \
//! BILLING_GATEWAY_API_KEY=sk_live_... \
//! cargo run --bin perdiem-billing
//! ```
//!
//! See [`interface_api::config::AppConfig`] for every setting.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use core_kernel::SystemClock;
use domain_billing::PerDiemBillingEngine;
use infra_db::{create_pool, run_migrations, PostgresLedgerStore};
use interface_api::config::AppConfig;
use interface_api::gateway::{GatewayConfig, HttpPaymentGateway};
use interface_api::scheduler::{run_scheduler, BillingRunner};
use interface_api::{create_router, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = AppConfig::from_env().context("invalid BILLING_* configuration")?;
    init_tracing(&config.log_level, config.log_json);

    tracing::info!(
        host = %config.host,
        port = config.port,
        interval_secs = config.run_interval_secs,
        "Starting per-diem billing service"
    );

    let policy = config.billing.to_policy().context("invalid billing policy")?;

    let pool = create_pool(config.database()).await?;
    if !config.migrations_dir.is_empty() {
        run_migrations(&pool, &config.migrations_dir).await?;
    }

    let store = Arc::new(PostgresLedgerStore::new(pool));
    let gateway = Arc::new(HttpPaymentGateway::new(GatewayConfig {
        base_url: config.gateway_base_url.clone(),
        api_key: config.gateway_api_key.clone(),
        timeout: Duration::from_secs(config.gateway_timeout_secs),
    })?);

    let engine = PerDiemBillingEngine::new(store.clone(), gateway, Arc::new(SystemClock), policy)?;
    let runner = Arc::new(BillingRunner::new(Arc::new(engine)));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let scheduler = tokio::spawn(run_scheduler(
        runner.clone(),
        config.run_interval(),
        config.run_on_startup,
        wait_for(shutdown_rx),
    ));

    let app = create_router(AppState {
        runner,
        ledger_health: store,
    });

    let addr: SocketAddr = config.server_addr().parse()?;
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, "Server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            let _ = shutdown_tx.send(true);
        })
        .await?;

    scheduler.await?;
    tracing::info!("Shutdown complete");
    Ok(())
}

fn init_tracing(log_level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .init();
    }
}

async fn wait_for(mut rx: watch::Receiver<bool>) {
    while !*rx.borrow() {
        if rx.changed().await.is_err() {
            break;
        }
    }
}

/// Waits for Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl+C, shutting down"),
        _ = terminate => tracing::info!("Received SIGTERM, shutting down"),
    }
}
