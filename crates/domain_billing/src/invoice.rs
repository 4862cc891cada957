//! Per-diem invoices
//!
//! One invoice bills one day's accrual for every container of a contract
//! that is still outstanding on the billing date.
//!
//! # Status Machine
//!
//! ```text
//! Pending --(charge ok)--------------------------> Paid    [terminal]
//! Pending --(charge failed, retries < max)-------> Pending (next_retry_at set)
//! Pending --(charge failed, retries reach max)---> Failed  [terminal]
//! ```

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use core_kernel::{
    ContractId, InvoiceId, InvoiceItemId, Money, PaymentMethodId, UserId,
};
use domain_leasing::{ContractContainer, LeasingContract};

use crate::error::BillingError;
use crate::policy::BillingPolicy;

/// Days billed by a single invoice
pub const DAYS_PER_INVOICE: u32 = 1;

/// Invoice status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    /// Awaiting collection, possibly with a retry scheduled
    Pending,
    /// Collected
    Paid,
    /// Automatic collection exhausted
    Failed,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::Pending => "pending",
            InvoiceStatus::Paid => "paid",
            InvoiceStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, InvoiceStatus::Pending)
    }
}

impl fmt::Display for InvoiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InvoiceStatus {
    type Err = BillingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(InvoiceStatus::Pending),
            "paid" => Ok(InvoiceStatus::Paid),
            "failed" => Ok(InvoiceStatus::Failed),
            other => Err(BillingError::UnknownStatus(other.to_string())),
        }
    }
}

/// Result of recording a failed collection on an invoice
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOutcome {
    /// Another attempt is due at the given instant
    RetryScheduled { next_retry_at: DateTime<Utc> },
    /// The retry budget is spent; the invoice is now failed
    Exhausted,
}

/// One day's per-diem charge for a contract
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerDiemInvoice {
    /// Unique identifier
    pub id: InvoiceId,
    /// Lessee being billed
    pub user_id: UserId,
    /// Contract whose containers are billed
    pub contract_id: ContractId,
    /// `PD-{contract_number}-{YYYYMMDD}`
    pub invoice_number: String,
    /// Local calendar day being billed
    pub billing_date: NaiveDate,
    /// Day after the billing date
    pub due_date: NaiveDate,
    /// `container_count * per_diem_rate`
    pub total_amount: Money,
    /// Daily rate per container
    pub per_diem_rate: Money,
    /// Days covered by this invoice; always one
    pub days_overdue: u32,
    /// Outstanding containers billed
    pub container_count: u32,
    /// Status
    pub status: InvoiceStatus,
    /// Method charged, when the lessee has one
    pub payment_method_id: Option<PaymentMethodId>,
    /// Failed attempts so far
    pub retry_count: u32,
    /// When the next attempt is due
    pub next_retry_at: Option<DateTime<Utc>>,
    /// Reason given for the most recent failure
    pub last_failure_reason: Option<String>,
    /// When collection succeeded
    pub paid_at: Option<DateTime<Utc>>,
    /// Created timestamp
    pub created_at: DateTime<Utc>,
    /// Updated timestamp
    pub updated_at: DateTime<Utc>,
}

/// Builds the invoice number for a contract and billing day
pub fn invoice_number_for(contract_number: &str, billing_date: NaiveDate) -> String {
    format!("PD-{}-{}", contract_number, billing_date.format("%Y%m%d"))
}

impl PerDiemInvoice {
    /// Drafts the invoice and its line items for the outstanding containers
    ///
    /// Each container contributes exactly one day at `rate`. The returned
    /// invoice is pending and has not been persisted.
    pub fn for_outstanding_containers(
        contract: &LeasingContract,
        containers: &[ContractContainer],
        rate: Money,
        billing_date: NaiveDate,
        payment_method_id: Option<PaymentMethodId>,
        now: DateTime<Utc>,
    ) -> Result<(Self, Vec<PerDiemInvoiceItem>), BillingError> {
        if !rate.is_positive() {
            return Err(BillingError::InvalidRate(format!(
                "{} for contract {}",
                rate, contract.contract_number
            )));
        }

        let id = InvoiceId::new_v7();
        let items: Vec<PerDiemInvoiceItem> = containers
            .iter()
            .map(|container| PerDiemInvoiceItem::one_day(id, container, rate))
            .collect();

        let invoice_number = invoice_number_for(&contract.contract_number, billing_date);
        let container_count = u32::try_from(items.len()).map_err(|_| BillingError::Inconsistent {
            invoice_number: invoice_number.clone(),
            detail: format!("{} containers exceed the countable range", items.len()),
        })?;
        let total_amount = Money::sum(items.iter().map(|i| &i.line_amount), rate.currency())?;

        let invoice = Self {
            id,
            user_id: contract.user_id,
            contract_id: contract.id,
            invoice_number,
            billing_date,
            due_date: billing_date + Duration::days(1),
            total_amount,
            per_diem_rate: rate,
            days_overdue: DAYS_PER_INVOICE,
            container_count,
            status: InvoiceStatus::Pending,
            payment_method_id,
            retry_count: 0,
            next_retry_at: None,
            last_failure_reason: None,
            paid_at: None,
            created_at: now,
            updated_at: now,
        };

        invoice.verify_items(&items)?;
        Ok((invoice, items))
    }

    /// Attempt number the next gateway call will carry
    pub fn next_attempt_number(&self) -> u32 {
        self.retry_count + 1
    }

    /// Whether the retry sweep should pick this invoice up at `now`
    pub fn is_due_for_retry(&self, now: DateTime<Utc>, policy: &BillingPolicy) -> bool {
        self.status == InvoiceStatus::Pending
            && policy.allows_retry(self.retry_count)
            && self.next_retry_at.is_some_and(|due| due < now)
    }

    /// Rejects any collection on an invoice that already reached a terminal state
    pub fn ensure_collectable(&self) -> Result<(), BillingError> {
        if self.status.is_terminal() {
            return Err(BillingError::transition(self.status, InvoiceStatus::Paid));
        }
        Ok(())
    }

    /// Marks the invoice as collected
    pub fn mark_paid(&mut self, now: DateTime<Utc>) -> Result<(), BillingError> {
        self.ensure_collectable()?;
        self.status = InvoiceStatus::Paid;
        self.paid_at = Some(now);
        self.next_retry_at = None;
        self.updated_at = now;
        Ok(())
    }

    /// Records a failed collection and decides whether another attempt follows
    pub fn record_failure(
        &mut self,
        reason: &str,
        policy: &BillingPolicy,
        now: DateTime<Utc>,
    ) -> Result<FailureOutcome, BillingError> {
        if self.status.is_terminal() {
            return Err(BillingError::transition(self.status, InvoiceStatus::Failed));
        }

        let failures = self.retry_count + 1;
        let next_retry_at = if policy.allows_retry(failures) {
            let next = now.checked_add_signed(policy.retry_delay(failures)).ok_or_else(|| {
                BillingError::InvalidPolicy(format!("retry after {} failures is out of range", failures))
            })?;
            Some(next)
        } else {
            None
        };

        self.retry_count = failures;
        self.last_failure_reason = Some(reason.to_string());
        self.updated_at = now;

        if let Some(next_retry_at) = next_retry_at {
            self.next_retry_at = Some(next_retry_at);
            Ok(FailureOutcome::RetryScheduled { next_retry_at })
        } else {
            self.status = InvoiceStatus::Failed;
            self.next_retry_at = None;
            Ok(FailureOutcome::Exhausted)
        }
    }

    /// Checks that the items add up to this invoice's totals
    pub fn verify_items(&self, items: &[PerDiemInvoiceItem]) -> Result<(), BillingError> {
        let inconsistent = |detail: String| BillingError::Inconsistent {
            invoice_number: self.invoice_number.clone(),
            detail,
        };

        if items.iter().any(|i| i.invoice_id != self.id) {
            return Err(inconsistent("item belongs to another invoice".to_string()));
        }
        let item_sum = Money::sum(items.iter().map(|i| &i.line_amount), self.total_amount.currency())?;
        if item_sum != self.total_amount {
            return Err(inconsistent(format!(
                "items sum to {} but total is {}",
                item_sum, self.total_amount
            )));
        }
        if self.per_diem_rate.times(self.container_count) != self.total_amount {
            return Err(inconsistent(format!(
                "{} containers at {} is not {}",
                self.container_count, self.per_diem_rate, self.total_amount
            )));
        }
        Ok(())
    }
}

/// One container's line on a per-diem invoice
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerDiemInvoiceItem {
    pub id: InvoiceItemId,
    pub invoice_id: InvoiceId,
    pub container_number: String,
    pub container_type: String,
    pub days_overdue: u32,
    pub per_diem_rate: Money,
    pub line_amount: Money,
}

impl PerDiemInvoiceItem {
    fn one_day(invoice_id: InvoiceId, container: &ContractContainer, rate: Money) -> Self {
        Self {
            id: InvoiceItemId::new_v7(),
            invoice_id,
            container_number: container.container_number.clone(),
            container_type: container.container_type.clone(),
            days_overdue: DAYS_PER_INVOICE,
            per_diem_rate: rate,
            line_amount: rate.times(DAYS_PER_INVOICE),
        }
    }
}
