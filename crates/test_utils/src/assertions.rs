//! Custom Test Assertions
//!
//! Invariant checks for invoices, items and attempts with messages that name
//! the invoice involved.

use rust_decimal::Decimal;

use core_kernel::Money;
use domain_billing::{AttemptStatus, InvoiceStatus, PaymentAttempt, PerDiemInvoice, PerDiemInvoiceItem};

/// Asserts that two Money values are equal in amount and currency
pub fn assert_money_eq(actual: &Money, expected: &Money) {
    assert_eq!(
        actual.currency(),
        expected.currency(),
        "Currency mismatch: actual={}, expected={}",
        actual.currency(),
        expected.currency()
    );
    assert_eq!(
        actual.amount(),
        expected.amount(),
        "Amount mismatch: actual={}, expected={}",
        actual,
        expected
    );
}

/// Asserts the invoice agrees with its own items
///
/// - one item per billed container, each for one day at the invoice rate
/// - item amounts sum to the invoice total
/// - total is `container_count * per_diem_rate`
/// - due the day after billing
/// - paid exactly when `paid_at` is set
pub fn assert_invoice_consistent(invoice: &PerDiemInvoice, items: &[PerDiemInvoiceItem]) {
    let own: Vec<&PerDiemInvoiceItem> = items.iter().filter(|i| i.invoice_id == invoice.id).collect();

    assert_eq!(
        own.len(),
        invoice.container_count as usize,
        "{}: {} items for {} containers",
        invoice.invoice_number,
        own.len(),
        invoice.container_count
    );

    let mut sum = Decimal::ZERO;
    for item in &own {
        assert_eq!(item.days_overdue, 1, "{}: item {} covers {} days", invoice.invoice_number, item.container_number, item.days_overdue);
        assert_money_eq(&item.per_diem_rate, &invoice.per_diem_rate);
        assert_money_eq(&item.line_amount, &item.per_diem_rate);
        sum += item.line_amount.amount();
    }

    assert_eq!(
        sum,
        invoice.total_amount.amount(),
        "{}: items sum to {} but total is {}",
        invoice.invoice_number,
        sum,
        invoice.total_amount
    );
    assert_money_eq(
        &invoice.total_amount,
        &invoice.per_diem_rate.times(invoice.container_count),
    );
    assert_eq!(invoice.days_overdue, 1);
    assert_eq!(invoice.due_date, invoice.billing_date + chrono::Duration::days(1));
    assert_eq!(
        invoice.status == InvoiceStatus::Paid,
        invoice.paid_at.is_some(),
        "{}: status {} with paid_at {:?}",
        invoice.invoice_number,
        invoice.status,
        invoice.paid_at
    );
}

/// Asserts attempts for one invoice are numbered 1, 2, 3, ... and settled
pub fn assert_attempts_sequential(attempts: &[PaymentAttempt]) {
    for (index, attempt) in attempts.iter().enumerate() {
        assert_eq!(
            attempt.attempt_number as usize,
            index + 1,
            "attempt {} out of sequence",
            attempt.id
        );
        assert_ne!(attempt.status, AttemptStatus::Pending, "attempt {} left pending", attempt.attempt_number);
        assert!(attempt.completed_at.is_some());
    }
}

/// Asserts an invoice ended up in `expected` with `retries` failures recorded
pub fn assert_invoice_state(invoice: &PerDiemInvoice, expected: InvoiceStatus, retries: u32) {
    assert_eq!(
        invoice.status, expected,
        "{}: expected {}, got {}",
        invoice.invoice_number, expected, invoice.status
    );
    assert_eq!(
        invoice.retry_count, retries,
        "{}: expected {} retries, got {}",
        invoice.invoice_number, retries, invoice.retry_count
    );
}
