//! Billing Ports
//!
//! The engine reaches storage and the payment provider only through these
//! traits. Adapters:
//!
//! - **PostgresLedgerStore** (infra_db): the production ledger
//! - **HttpPaymentGateway** (interface_api): the production charge API
//! - **InMemoryLedgerStore** / **ScriptedGateway** (`mock`): tests
//!
//! ```rust,ignore
//! let engine = PerDiemBillingEngine::new(
//!     Arc::new(PostgresLedgerStore::new(pool)),
//!     Arc::new(HttpPaymentGateway::new(gateway_config)?),
//!     Arc::new(SystemClock),
//!     policy,
//! )?;
//! let report = engine.process_automated_billing().await?;
//! ```

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use core_kernel::{
    ContractId, DomainPort, InvoiceId, Money, PaymentMethodId, PortError, UserId,
};
use domain_leasing::{ContractContainer, LeasingContract};

use crate::dunning::DunningCampaign;
use crate::invoice::{PerDiemInvoice, PerDiemInvoiceItem};
use crate::payment::{PaymentAttempt, PaymentMethod};

/// Durable store of contracts, invoices, attempts and campaigns
#[async_trait]
pub trait LedgerStore: DomainPort {
    /// Joined rows of active contracts past their free period with every
    /// container that is picked up and not returned
    async fn find_overdue_contracts_with_unreturned_containers(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<(LeasingContract, ContractContainer)>, PortError>;

    /// Live set of the contract's picked-up, unreturned containers
    async fn find_unreturned_containers(
        &self,
        contract_id: ContractId,
    ) -> Result<Vec<ContractContainer>, PortError>;

    async fn find_invoice_for_contract_on_date(
        &self,
        contract_id: ContractId,
        billing_date: NaiveDate,
    ) -> Result<Option<PerDiemInvoice>, PortError>;

    /// The lessee's default active method; the newest one if several qualify
    async fn find_default_active_payment_method(
        &self,
        user_id: UserId,
    ) -> Result<Option<PaymentMethod>, PortError>;

    /// Persists an invoice and its items atomically
    ///
    /// Returns `PortError::Conflict` when the contract already has an
    /// invoice for the billing date or the invoice number is taken.
    async fn insert_invoice(
        &self,
        invoice: &PerDiemInvoice,
        items: &[PerDiemInvoiceItem],
    ) -> Result<(), PortError>;

    async fn update_invoice(&self, invoice: &PerDiemInvoice) -> Result<(), PortError>;

    async fn insert_payment_attempt(&self, attempt: &PaymentAttempt) -> Result<(), PortError>;

    async fn update_payment_attempt(&self, attempt: &PaymentAttempt) -> Result<(), PortError>;

    async fn insert_dunning_campaign(&self, campaign: &DunningCampaign) -> Result<(), PortError>;

    /// Pending invoices whose retry is due and whose budget is not spent
    async fn find_retriable_invoices(
        &self,
        now: DateTime<Utc>,
        max_retry_attempts: u32,
    ) -> Result<Vec<PerDiemInvoice>, PortError>;

    async fn find_payment_method(
        &self,
        id: PaymentMethodId,
    ) -> Result<Option<PaymentMethod>, PortError>;

    /// Invoices billed on `[month_start, next_month_start)`
    async fn find_invoices_for_user_in_month(
        &self,
        user_id: UserId,
        month_start: NaiveDate,
        next_month_start: NaiveDate,
    ) -> Result<Vec<PerDiemInvoice>, PortError>;

    async fn find_invoice(&self, id: InvoiceId) -> Result<Option<PerDiemInvoice>, PortError>;

    async fn find_invoice_items(
        &self,
        invoice_id: InvoiceId,
    ) -> Result<Vec<PerDiemInvoiceItem>, PortError>;

    /// Attempts ordered by attempt number
    async fn find_payment_attempts(
        &self,
        invoice_id: InvoiceId,
    ) -> Result<Vec<PaymentAttempt>, PortError>;

    async fn find_dunning_campaigns(
        &self,
        invoice_id: InvoiceId,
    ) -> Result<Vec<DunningCampaign>, PortError>;
}

/// A charge the gateway is asked to make
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChargeRequest {
    /// Token or identifier of the stored instrument
    pub payment_method_ref: String,
    pub amount: Money,
    /// Stable per attempt so retried HTTP calls are not double-charged
    pub idempotency_key: String,
}

/// What the gateway said about a charge
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChargeOutcome {
    pub success: bool,
    pub transaction_ref: Option<String>,
    pub failure_reason: Option<String>,
    /// Raw payload kept for the attempt's audit trail
    pub raw_response: Option<String>,
}

impl ChargeOutcome {
    pub fn approved(transaction_ref: impl Into<String>) -> Self {
        Self {
            success: true,
            transaction_ref: Some(transaction_ref.into()),
            failure_reason: None,
            raw_response: None,
        }
    }

    pub fn declined(reason: impl Into<String>) -> Self {
        Self {
            success: false,
            transaction_ref: None,
            failure_reason: Some(reason.into()),
            raw_response: None,
        }
    }
}

/// Payment provider capable of charging a stored instrument
///
/// An `Err` is treated by the engine exactly like a declined charge.
#[async_trait]
pub trait PaymentGateway: DomainPort {
    async fn charge(&self, request: &ChargeRequest) -> Result<ChargeOutcome, PortError>;
}
