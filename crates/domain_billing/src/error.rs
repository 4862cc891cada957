//! Billing domain errors

use thiserror::Error;

use core_kernel::{MoneyError, PortError, TemporalError};
use domain_leasing::LeasingError;

/// Errors that can occur in the billing domain
#[derive(Debug, Error)]
pub enum BillingError {
    /// Ledger store or payment gateway failure
    #[error(transparent)]
    Port(#[from] PortError),

    /// Invoice or attempt moved out of a state it may not leave
    #[error("Invalid status transition from {from} to {to}")]
    InvalidStatusTransition { from: String, to: String },

    /// Stored status string with no matching variant
    #[error("Unknown status: {0}")]
    UnknownStatus(String),

    /// A per-diem rate that cannot be billed
    #[error("Invalid per-diem rate: {0}")]
    InvalidRate(String),

    /// Billing policy values that cannot be applied
    #[error("Invalid billing policy: {0}")]
    InvalidPolicy(String),

    /// Invoice totals that do not reconcile with their items
    #[error("Invoice {invoice_number} does not reconcile: {detail}")]
    Inconsistent { invoice_number: String, detail: String },

    #[error(transparent)]
    Money(#[from] MoneyError),

    #[error(transparent)]
    Temporal(#[from] TemporalError),

    #[error(transparent)]
    Leasing(#[from] LeasingError),
}

impl BillingError {
    pub(crate) fn transition(from: impl ToString, to: impl ToString) -> Self {
        BillingError::InvalidStatusTransition {
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    /// Whether this error came from an adapter reporting a transient fault
    pub fn is_transient(&self) -> bool {
        matches!(self, BillingError::Port(e) if e.is_transient())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kernel_errors_convert() {
        let money: BillingError = MoneyError::UnknownCurrency("XXX".to_string()).into();
        assert!(matches!(money, BillingError::Money(_)));
        assert!(money.to_string().contains("XXX"));

        let zone: BillingError = TemporalError::UnknownTimezone("Nowhere/City".to_string()).into();
        assert!(matches!(zone, BillingError::Temporal(_)));
        assert!(!zone.is_transient());
    }

    #[test]
    fn test_only_transient_port_errors_are_transient() {
        assert!(BillingError::from(PortError::connection("db down")).is_transient());
        assert!(!BillingError::from(PortError::conflict("billed")).is_transient());
        assert!(!BillingError::InvalidPolicy("x".to_string()).is_transient());
    }
}
