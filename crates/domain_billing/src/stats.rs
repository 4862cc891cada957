//! Monthly billing statistics per lessee

use serde::{Deserialize, Serialize};

use core_kernel::{Currency, Money, MoneyError};

use crate::invoice::{InvoiceStatus, PerDiemInvoice};

/// Current-month totals for one lessee
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BillingStats {
    pub total_invoices_this_month: usize,
    pub total_amount_this_month: Money,
    pub paid_invoices: usize,
    pub pending_invoices: usize,
    pub failed_invoices: usize,
}

impl BillingStats {
    /// Aggregates invoices, all of which must be in `currency`
    pub fn from_invoices(invoices: &[PerDiemInvoice], currency: Currency) -> Result<Self, MoneyError> {
        let count = |status: InvoiceStatus| invoices.iter().filter(|i| i.status == status).count();

        Ok(Self {
            total_invoices_this_month: invoices.len(),
            total_amount_this_month: Money::sum(invoices.iter().map(|i| &i.total_amount), currency)?,
            paid_invoices: count(InvoiceStatus::Paid),
            pending_invoices: count(InvoiceStatus::Pending),
            failed_invoices: count(InvoiceStatus::Failed),
        })
    }
}
