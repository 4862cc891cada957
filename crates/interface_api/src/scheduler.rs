//! Recurring billing runs
//!
//! The scheduler and the manual trigger endpoint share one [`BillingRunner`],
//! whose mutex keeps two runs from overlapping.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, instrument};

use domain_billing::{BillingError, BillingRunReport, PerDiemBillingEngine};

/// What started a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunTrigger {
    Startup,
    Scheduled,
    Manual,
}

impl fmt::Display for RunTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RunTrigger::Startup => "startup",
            RunTrigger::Scheduled => "scheduled",
            RunTrigger::Manual => "manual",
        })
    }
}

/// Serialises billing runs over a shared engine
pub struct BillingRunner {
    engine: Arc<PerDiemBillingEngine>,
    running: Mutex<()>,
}

impl BillingRunner {
    pub fn new(engine: Arc<PerDiemBillingEngine>) -> Self {
        Self {
            engine,
            running: Mutex::new(()),
        }
    }

    pub fn engine(&self) -> &PerDiemBillingEngine {
        &self.engine
    }

    /// Executes one billing cycle, waiting for any run already in progress
    #[instrument(skip(self), fields(trigger = %trigger))]
    pub async fn run_once(&self, trigger: RunTrigger) -> Result<BillingRunReport, BillingError> {
        let _running = self.running.lock().await;
        self.engine.process_automated_billing().await
    }

    async fn run_logged(&self, trigger: RunTrigger) {
        match self.run_once(trigger).await {
            Ok(report) => info!(
                trigger = %trigger,
                invoices_created = report.invoices_created,
                payments_succeeded = report.payments_succeeded,
                contract_errors = report.contract_errors,
                "Billing run finished"
            ),
            // The next tick tries again
            Err(e) => error!(trigger = %trigger, error = %e, "Billing run aborted"),
        }
    }
}

/// Runs billing every `every` until `shutdown` resolves
///
/// Missed ticks are skipped rather than replayed. A run in progress when
/// shutdown is requested is allowed to finish.
pub async fn run_scheduler<F>(
    runner: Arc<BillingRunner>,
    every: Duration,
    run_on_startup: bool,
    shutdown: F,
) where
    F: Future<Output = ()>,
{
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // The first tick fires immediately
    ticker.tick().await;

    info!(interval_secs = every.as_secs(), run_on_startup, "Billing scheduler started");

    if run_on_startup {
        runner.run_logged(RunTrigger::Startup).await;
    }

    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("Billing scheduler stopping");
                break;
            }
            _ = ticker.tick() => {
                runner.run_logged(RunTrigger::Scheduled).await;
            }
        }
    }
}
