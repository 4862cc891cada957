//! Pre-built Test Fixtures
//!
//! Fixed instants and amounts used across the suite, ISO 6346 container
//! numbers, and [`BillingHarness`], an engine wired to the in-memory ledger,
//! a scripted gateway and a manual clock.

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use once_cell::sync::Lazy;
use rust_decimal_macros::dec;

use core_kernel::{Currency, ManualClock, Money};
use domain_billing::mock::{InMemoryLedgerStore, ScriptedGateway};
use domain_billing::{BillingPolicy, PaymentMethod, PerDiemBillingEngine};
use domain_leasing::{ContractContainer, LeasingContract};

/// 06:00 UTC on the reference billing day
pub static BILLING_INSTANT: Lazy<DateTime<Utc>> =
    Lazy::new(|| Utc.with_ymd_and_hms(2024, 7, 10, 6, 0, 0).single().unwrap_or_default());

/// Fixture for instants and dates
pub struct TemporalFixtures;

impl TemporalFixtures {
    /// The instant every harness clock starts at
    pub fn billing_instant() -> DateTime<Utc> {
        *BILLING_INSTANT
    }

    /// Local date of [`Self::billing_instant`] in UTC
    pub fn billing_date() -> NaiveDate {
        BILLING_INSTANT.date_naive()
    }
}

/// Fixture for Money test data
pub struct MoneyFixtures;

impl MoneyFixtures {
    pub fn usd(amount: rust_decimal::Decimal) -> Money {
        Money::new(amount, Currency::USD)
    }

    /// The rate from the two-container walkthrough
    pub fn usd_5() -> Money {
        Money::new(dec!(5.00), Currency::USD)
    }

    pub fn usd_zero() -> Money {
        Money::zero(Currency::USD)
    }
}

fn letter_value(c: char) -> u32 {
    // A=10, skipping multiples of eleven
    let mut value = 10;
    for _ in 'A'..c {
        value += 1;
        if value % 11 == 0 {
            value += 1;
        }
    }
    value
}

/// ISO 6346 check digit for the first ten characters of a container number
pub fn iso6346_check_digit(prefix: &str) -> Option<u32> {
    if prefix.len() != 10 {
        return None;
    }
    let mut sum = 0u32;
    for (i, c) in prefix.chars().enumerate() {
        let value = if i < 4 {
            if !c.is_ascii_uppercase() {
                return None;
            }
            letter_value(c)
        } else {
            c.to_digit(10)?
        };
        sum += value << i;
    }
    Some(sum % 11 % 10)
}

/// A valid container number for a four-letter owner code and serial
///
/// ```rust
/// assert_eq!(test_utils::container_number("CSQU", 305438), "CSQU3054383");
/// ```
pub fn container_number(owner: &str, serial: u32) -> String {
    let prefix = format!("{}{:06}", owner, serial % 1_000_000);
    let check = iso6346_check_digit(&prefix).unwrap_or(0);
    format!("{}{}", prefix, check)
}

/// Billing engine over in-memory adapters
pub struct BillingHarness {
    pub store: InMemoryLedgerStore,
    pub gateway: ScriptedGateway,
    pub clock: Arc<ManualClock>,
    pub engine: PerDiemBillingEngine,
}

impl BillingHarness {
    /// Default policy, approving gateway, clock at [`BILLING_INSTANT`]
    pub fn new() -> Self {
        Self::with(ScriptedGateway::approving(), BillingPolicy::default())
    }

    pub fn with_gateway(gateway: ScriptedGateway) -> Self {
        Self::with(gateway, BillingPolicy::default())
    }

    /// # Panics
    ///
    /// Panics if `policy` does not validate
    pub fn with(gateway: ScriptedGateway, policy: BillingPolicy) -> Self {
        let store = InMemoryLedgerStore::new();
        let clock = Arc::new(ManualClock::new(TemporalFixtures::billing_instant()));
        let engine = PerDiemBillingEngine::new(
            Arc::new(store.clone()),
            Arc::new(gateway.clone()),
            clock.clone(),
            policy,
        )
        .unwrap_or_else(|e| panic!("invalid test policy: {}", e));

        Self {
            store,
            gateway,
            clock,
            engine,
        }
    }

    /// Stores a contract together with its containers
    pub async fn seed(&self, contract: LeasingContract, containers: Vec<ContractContainer>) {
        for container in containers {
            self.store.add_container(container).await;
        }
        self.store.add_contract(contract).await;
    }

    pub async fn seed_method(&self, method: PaymentMethod) {
        self.store.add_payment_method(method).await;
    }

    /// Moves the clock forward by whole days
    pub fn advance_days(&self, days: i64) {
        self.clock.advance(chrono::Duration::days(days));
    }
}

impl Default for BillingHarness {
    fn default() -> Self {
        Self::new()
    }
}
