//! Payment methods and gateway attempts

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use core_kernel::{InvoiceId, Money, PaymentAttemptId, PaymentMethodId, UserId};

use crate::error::BillingError;
use crate::invoice::PerDiemInvoice;

/// Kind of stored payment instrument
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethodType {
    Card,
    BankAccount,
    Paypal,
}

impl PaymentMethodType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethodType::Card => "card",
            PaymentMethodType::BankAccount => "bank_account",
            PaymentMethodType::Paypal => "paypal",
        }
    }
}

impl FromStr for PaymentMethodType {
    type Err = BillingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "card" => Ok(PaymentMethodType::Card),
            "bank_account" => Ok(PaymentMethodType::BankAccount),
            "paypal" => Ok(PaymentMethodType::Paypal),
            other => Err(BillingError::UnknownStatus(other.to_string())),
        }
    }
}

/// A lessee's stored payment instrument
///
/// Owned by account management; billing only reads it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentMethod {
    pub id: PaymentMethodId,
    pub user_id: UserId,
    pub method_type: PaymentMethodType,
    pub is_default: bool,
    pub is_active: bool,
    /// Gateway-side token for the instrument
    pub gateway_token: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl PaymentMethod {
    /// Reference the gateway charges against
    ///
    /// Falls back to our own identifier when no token was vaulted.
    pub fn gateway_reference(&self) -> String {
        self.gateway_token
            .clone()
            .unwrap_or_else(|| self.id.to_string())
    }

    /// Whether this method may be used for an automatic charge
    pub fn is_chargeable(&self) -> bool {
        self.is_active
    }
}

/// Status of a single gateway call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    /// Recorded, gateway has not answered yet
    Pending,
    Success,
    Failed,
}

impl AttemptStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptStatus::Pending => "pending",
            AttemptStatus::Success => "success",
            AttemptStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for AttemptStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AttemptStatus {
    type Err = BillingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(AttemptStatus::Pending),
            "success" => Ok(AttemptStatus::Success),
            "failed" => Ok(AttemptStatus::Failed),
            other => Err(BillingError::UnknownStatus(other.to_string())),
        }
    }
}

/// One gateway call on behalf of an invoice
///
/// Persisted as `Pending` before the gateway is called so that a crash
/// mid-call still leaves a trace of the attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentAttempt {
    pub id: PaymentAttemptId,
    pub invoice_id: InvoiceId,
    pub payment_method_id: PaymentMethodId,
    /// 1-based, strictly increasing per invoice
    pub attempt_number: u32,
    pub amount: Money,
    pub status: AttemptStatus,
    /// Raw gateway payload, when one was returned
    pub gateway_response: Option<String>,
    pub gateway_transaction_id: Option<String>,
    pub failure_reason: Option<String>,
    pub attempted_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl PaymentAttempt {
    /// Opens the next attempt for `invoice`
    pub fn begin(
        invoice: &PerDiemInvoice,
        payment_method_id: PaymentMethodId,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: PaymentAttemptId::new_v7(),
            invoice_id: invoice.id,
            payment_method_id,
            attempt_number: invoice.next_attempt_number(),
            amount: invoice.total_amount,
            status: AttemptStatus::Pending,
            gateway_response: None,
            gateway_transaction_id: None,
            failure_reason: None,
            attempted_at: now,
            completed_at: None,
        }
    }

    /// Key sent to the gateway so a replayed call cannot charge twice
    pub fn idempotency_key(&self, invoice_number: &str) -> String {
        format!("{}-{}", invoice_number, self.attempt_number)
    }

    /// Records the gateway's approval
    pub fn succeed(
        &mut self,
        transaction_id: Option<String>,
        gateway_response: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<(), BillingError> {
        self.ensure_open(AttemptStatus::Success)?;
        self.status = AttemptStatus::Success;
        self.gateway_transaction_id = transaction_id;
        self.gateway_response = gateway_response;
        self.completed_at = Some(now);
        Ok(())
    }

    /// Records a decline or a failed call
    pub fn fail(&mut self, reason: &str, now: DateTime<Utc>) -> Result<(), BillingError> {
        self.ensure_open(AttemptStatus::Failed)?;
        self.status = AttemptStatus::Failed;
        self.failure_reason = Some(reason.to_string());
        self.completed_at = Some(now);
        Ok(())
    }

    fn ensure_open(&self, target: AttemptStatus) -> Result<(), BillingError> {
        if self.status != AttemptStatus::Pending {
            return Err(BillingError::transition(self.status, target));
        }
        Ok(())
    }
}
