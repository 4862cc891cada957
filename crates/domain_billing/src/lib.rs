//! Per-Diem Billing Domain
//!
//! Bills lessees one day of per-diem at a time for every container held past
//! its contract's free period, collects automatically against the lessee's
//! default payment method, retries failed charges on a bounded schedule and
//! escalates uncollectable invoices into dunning.
//!
//! # Invoice Lifecycle
//!
//! ```text
//! Pending --(charge ok)----------> Paid
//! Pending --(fail, retries left)--> Pending (retry due at next_retry_at)
//! Pending --(fail, none left)-----> Failed + warning campaign
//! ```
//!
//! A lessee without a default active payment method gets a pending invoice,
//! no charge attempt, and a reminder campaign.
//!
//! # Example
//!
//! ```rust,ignore
//! use domain_billing::{PerDiemBillingEngine, BillingPolicy};
//!
//! let engine = PerDiemBillingEngine::new(store, gateway, clock, BillingPolicy::default())?;
//! let report = engine.process_automated_billing().await?;
//! let stats = engine.get_billing_stats(user_id).await?;
//! ```

pub mod invoice;
pub mod payment;
pub mod dunning;
pub mod policy;
pub mod ports;
pub mod report;
pub mod stats;
pub mod engine;
pub mod error;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

pub use invoice::{PerDiemInvoice, PerDiemInvoiceItem, InvoiceStatus, FailureOutcome, invoice_number_for};
pub use payment::{PaymentMethod, PaymentMethodType, PaymentAttempt, AttemptStatus};
pub use dunning::{DunningCampaign, CampaignType, CampaignStatus};
pub use policy::BillingPolicy;
pub use ports::{LedgerStore, PaymentGateway, ChargeRequest, ChargeOutcome};
pub use report::{BillingRunReport, CollectionOutcome, ContractBillingOutcome, RetrySweep};
pub use stats::BillingStats;
pub use engine::PerDiemBillingEngine;
pub use error::BillingError;
