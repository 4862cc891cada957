//! Outcomes of a billing run

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Where an invoice stands after a collection step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CollectionOutcome {
    Paid,
    RetryScheduled { next_retry_at: DateTime<Utc> },
    /// Retries exhausted; `dunning_opened` is false when a campaign at this
    /// stage or beyond already existed
    Failed { dunning_opened: bool },
    /// No default active method; no charge attempted
    AwaitingPaymentMethod { dunning_opened: bool },
}

/// Result of billing one overdue contract
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ContractBillingOutcome {
    /// Every container was returned since discovery
    NothingOutstanding,
    /// The free period has not run out yet
    NotYetOverdue,
    /// Today's invoice already exists
    AlreadyBilled,
    Invoiced {
        invoice_number: String,
        collection: CollectionOutcome,
    },
}

/// Tally of one retry sweep
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrySweep {
    pub due: usize,
    pub outcomes: Vec<CollectionOutcome>,
    pub skipped_without_payment_method: usize,
    pub errors: usize,
}

/// Counts gathered over one `process_automated_billing` call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillingRunReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub contracts_discovered: usize,
    pub invoices_created: usize,
    pub already_billed: usize,
    pub payments_succeeded: usize,
    pub payments_failed: usize,
    pub retries_scheduled: usize,
    pub invoices_failed: usize,
    pub dunning_campaigns_opened: usize,
    pub retries_attempted: usize,
    pub retries_skipped_without_payment_method: usize,
    pub contract_errors: usize,
    pub retry_errors: usize,
}

impl BillingRunReport {
    pub fn started(at: DateTime<Utc>) -> Self {
        Self {
            started_at: at,
            finished_at: at,
            contracts_discovered: 0,
            invoices_created: 0,
            already_billed: 0,
            payments_succeeded: 0,
            payments_failed: 0,
            retries_scheduled: 0,
            invoices_failed: 0,
            dunning_campaigns_opened: 0,
            retries_attempted: 0,
            retries_skipped_without_payment_method: 0,
            contract_errors: 0,
            retry_errors: 0,
        }
    }

    pub fn record_contract(&mut self, outcome: &ContractBillingOutcome) {
        match outcome {
            ContractBillingOutcome::NothingOutstanding | ContractBillingOutcome::NotYetOverdue => {}
            ContractBillingOutcome::AlreadyBilled => self.already_billed += 1,
            ContractBillingOutcome::Invoiced { collection, .. } => {
                self.invoices_created += 1;
                self.record_collection(collection);
            }
        }
    }

    pub fn record_collection(&mut self, outcome: &CollectionOutcome) {
        match *outcome {
            CollectionOutcome::Paid => self.payments_succeeded += 1,
            CollectionOutcome::RetryScheduled { .. } => {
                self.payments_failed += 1;
                self.retries_scheduled += 1;
            }
            CollectionOutcome::Failed { dunning_opened } => {
                self.payments_failed += 1;
                self.invoices_failed += 1;
                if dunning_opened {
                    self.dunning_campaigns_opened += 1;
                }
            }
            CollectionOutcome::AwaitingPaymentMethod { dunning_opened } => {
                if dunning_opened {
                    self.dunning_campaigns_opened += 1;
                }
            }
        }
    }

    pub fn record_retry_sweep(&mut self, sweep: &RetrySweep) {
        self.retries_attempted += sweep.outcomes.len();
        self.retries_skipped_without_payment_method += sweep.skipped_without_payment_method;
        self.retry_errors += sweep.errors;
        for outcome in &sweep.outcomes {
            self.record_collection(outcome);
        }
    }

    /// Whether any contract or retry hit an error during the run
    pub fn had_errors(&self) -> bool {
        self.contract_errors > 0 || self.retry_errors > 0
    }
}
