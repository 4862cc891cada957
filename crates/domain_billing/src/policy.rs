//! Billing policy constants
//!
//! Collected in one value so the scheduler can load them from configuration
//! while tests construct them directly.

use chrono::Duration;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use core_kernel::{Currency, Money, Timezone};
use domain_leasing::LeasingContract;

use crate::error::BillingError;

/// Maximum automatic payment attempts per invoice
pub const DEFAULT_MAX_RETRY_ATTEMPTS: u32 = 3;

/// Longest wait between two automatic attempts, whatever the backoff
pub const MAX_RETRY_DELAY_DAYS: i64 = 30;

/// Daily rate charged when a contract carries no usable rate
pub const DEFAULT_PER_DIEM_RATE: Decimal = dec!(25.00);

/// Policy applied by the billing engine
#[derive(Debug, Clone, PartialEq)]
pub struct BillingPolicy {
    /// Attempts after which an invoice is failed and escalated
    pub max_retry_attempts: u32,
    /// Delay before the first retry
    pub retry_interval: Duration,
    /// Growth factor applied to the delay on every further failure
    pub backoff_multiplier: Decimal,
    /// Fallback daily rate per container
    pub default_per_diem_rate: Decimal,
    /// Currency invoices are raised in
    pub currency: Currency,
    /// Zone in which billing days and months are evaluated
    pub timezone: Timezone,
    /// Delay until a new dunning campaign's first action
    pub dunning_follow_up: Duration,
}

impl Default for BillingPolicy {
    fn default() -> Self {
        Self {
            max_retry_attempts: DEFAULT_MAX_RETRY_ATTEMPTS,
            retry_interval: Duration::hours(24),
            backoff_multiplier: Decimal::ONE,
            default_per_diem_rate: DEFAULT_PER_DIEM_RATE,
            currency: Currency::USD,
            timezone: Timezone::default(),
            dunning_follow_up: Duration::hours(24),
        }
    }
}

impl BillingPolicy {
    /// Checks that the policy can drive the engine
    pub fn validate(&self) -> Result<(), BillingError> {
        if self.max_retry_attempts == 0 {
            return Err(BillingError::InvalidPolicy(
                "max_retry_attempts must be at least 1".to_string(),
            ));
        }
        if self.retry_interval <= Duration::zero() {
            return Err(BillingError::InvalidPolicy(
                "retry_interval must be positive".to_string(),
            ));
        }
        if self.retry_interval > Duration::days(MAX_RETRY_DELAY_DAYS) {
            return Err(BillingError::InvalidPolicy(format!(
                "retry_interval exceeds {} days",
                MAX_RETRY_DELAY_DAYS
            )));
        }
        if self.backoff_multiplier < Decimal::ONE {
            return Err(BillingError::InvalidPolicy(format!(
                "backoff_multiplier {} is below 1",
                self.backoff_multiplier
            )));
        }
        if self.default_per_diem_rate <= Decimal::ZERO {
            return Err(BillingError::InvalidRate(format!(
                "default per-diem rate {} is not positive",
                self.default_per_diem_rate
            )));
        }
        Ok(())
    }

    /// Delay before the next attempt once `failures` attempts have failed
    ///
    /// `retry_interval * backoff_multiplier^(failures - 1)`, capped at
    /// [`MAX_RETRY_DELAY_DAYS`].
    pub fn retry_delay(&self, failures: u32) -> Duration {
        let cap = Duration::days(MAX_RETRY_DELAY_DAYS);
        let base = Decimal::from(self.retry_interval.num_seconds());
        let factor = (1..failures.max(1)).fold(Decimal::ONE, |acc, _| {
            acc.checked_mul(self.backoff_multiplier).unwrap_or(Decimal::MAX)
        });
        base.checked_mul(factor)
            .and_then(|s| s.round().to_i64())
            .and_then(Duration::try_seconds)
            .map_or(cap, |delay| delay.min(cap))
    }

    /// Daily rate per container for `contract`, in the policy currency
    pub fn per_diem_rate_for(&self, contract: &LeasingContract) -> Money {
        Money::new(
            contract.effective_per_diem_rate(self.default_per_diem_rate),
            self.currency,
        )
    }

    /// Whether an invoice with `retry_count` failures may be attempted again
    pub fn allows_retry(&self, retry_count: u32) -> bool {
        retry_count < self.max_retry_attempts
    }
}
