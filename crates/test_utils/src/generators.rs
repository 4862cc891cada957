//! Property-Based Test Generators
//!
//! proptest strategies for billing inputs, and `fake` helpers for
//! realistic-looking reference data.

use chrono::Duration;
use fake::faker::address::en::CityName;
use fake::Fake;
use proptest::prelude::*;
use rust_decimal::Decimal;

use core_kernel::Currency;
use domain_leasing::{ContractContainer, LeasingContract};

use crate::builders::{ContainerBuilder, ContractBuilder};
use crate::fixtures::{container_number, TemporalFixtures};

/// Currencies invoices may be raised in
pub fn currency_strategy() -> impl Strategy<Value = Currency> {
    prop_oneof![
        Just(Currency::USD),
        Just(Currency::EUR),
        Just(Currency::GBP),
        Just(Currency::SGD),
        Just(Currency::CNY),
    ]
}

/// Positive daily rates between 0.01 and 500.00
pub fn per_diem_rate_strategy() -> impl Strategy<Value = Decimal> {
    (1i64..=50_000i64).prop_map(|cents| Decimal::new(cents, 2))
}

/// Rates a contract may carry, including missing and unusable ones
pub fn stored_rate_strategy() -> impl Strategy<Value = Option<Decimal>> {
    prop_oneof![
        3 => per_diem_rate_strategy().prop_map(Some),
        1 => Just(None),
        1 => Just(Some(Decimal::ZERO)),
        1 => (1i64..10_000i64).prop_map(|c| Some(Decimal::new(-c, 2))),
    ]
}

/// Valid ISO 6346 container numbers
pub fn container_number_strategy() -> impl Strategy<Value = String> {
    ("[A-Z]{3}", 0u32..1_000_000u32)
        .prop_map(|(owner, serial)| container_number(&format!("{}U", owner), serial))
}

/// An overdue contract with `1..=max` outstanding containers
pub fn overdue_contract_strategy(
    max_containers: u32,
) -> impl Strategy<Value = (LeasingContract, Vec<ContractContainer>)> {
    (stored_rate_strategy(), 1u32..=max_containers, 1i64..60i64).prop_map(
        |(rate, count, days_over)| {
            let contract = ContractBuilder::new()
                .with_rate(rate)
                .with_quantity(count)
                .ending_at(TemporalFixtures::billing_instant() - Duration::hours(days_over * 24 - 1))
                .build();
            let containers = ContainerBuilder::many(&contract, count);
            (contract, containers)
        },
    )
}

/// A made-up depot name
pub fn fake_depot() -> String {
    format!("{} Depot", CityName().fake::<String>())
}

/// A made-up contract number such as `LC-4821-77`
pub fn fake_contract_number() -> String {
    format!("LC-{}-{}", (1000..9999).fake::<u32>(), (10..99).fake::<u32>())
}
