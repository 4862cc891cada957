//! Test Data Builders
//!
//! Builders with defaults so a test names only the fields it cares about.
//! Defaults describe a 40HC lease from Qingdao whose free period ended two
//! days before [`crate::TemporalFixtures::billing_instant`].

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use core_kernel::{ContainerId, ContractId, PaymentMethodId, UserId};
use domain_billing::{PaymentMethod, PaymentMethodType};
use domain_leasing::{ContainerStatus, ContractContainer, ContractStatus, LeasingContract};

use crate::fixtures::{container_number, TemporalFixtures};

/// Builder for `LeasingContract`
#[derive(Debug, Clone)]
pub struct ContractBuilder {
    id: ContractId,
    user_id: UserId,
    contract_number: String,
    container_size: String,
    quantity: u32,
    free_days: u32,
    per_diem_rate: Option<Decimal>,
    end_date: DateTime<Utc>,
    status: ContractStatus,
}

impl Default for ContractBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ContractBuilder {
    pub fn new() -> Self {
        Self {
            id: ContractId::new(),
            user_id: UserId::new(),
            contract_number: "LC-2024-0001".to_string(),
            container_size: "40HC".to_string(),
            quantity: 1,
            free_days: 14,
            per_diem_rate: Some(dec!(5.00)),
            end_date: TemporalFixtures::billing_instant() - Duration::days(2),
            status: ContractStatus::Active,
        }
    }

    pub fn with_user(mut self, user_id: UserId) -> Self {
        self.user_id = user_id;
        self
    }

    pub fn with_number(mut self, number: impl Into<String>) -> Self {
        self.contract_number = number.into();
        self
    }

    pub fn with_quantity(mut self, quantity: u32) -> Self {
        self.quantity = quantity;
        self
    }

    /// `None` leaves the contract without a rate so the policy fallback applies
    pub fn with_rate(mut self, rate: Option<Decimal>) -> Self {
        self.per_diem_rate = rate;
        self
    }

    /// Places the free-day boundary at `end_date`
    pub fn ending_at(mut self, end_date: DateTime<Utc>) -> Self {
        self.end_date = end_date;
        self
    }

    /// Free period still running at the billing instant
    pub fn within_free_period(self) -> Self {
        let end = TemporalFixtures::billing_instant() + Duration::days(3);
        self.ending_at(end)
    }

    pub fn with_status(mut self, status: ContractStatus) -> Self {
        self.status = status;
        self
    }

    pub fn build(self) -> LeasingContract {
        let start_date = self.end_date - Duration::days(i64::from(self.free_days));
        LeasingContract {
            id: self.id,
            user_id: self.user_id,
            contract_number: self.contract_number,
            container_size: self.container_size,
            quantity: self.quantity,
            free_days: self.free_days,
            per_diem_rate: self.per_diem_rate,
            start_date,
            end_date: self.end_date,
            status: self.status,
            origin: "Qingdao".to_string(),
            destination: "Hamburg".to_string(),
            total_value: dec!(8000),
            created_at: start_date,
            updated_at: start_date,
        }
    }
}

/// Builder for `ContractContainer`
#[derive(Debug, Clone)]
pub struct ContainerBuilder {
    contract_id: ContractId,
    container_number: String,
    container_type: String,
    status: ContainerStatus,
    pickup_date: Option<DateTime<Utc>>,
    return_date: Option<DateTime<Utc>>,
}

impl ContainerBuilder {
    /// Picked-up container on `contract`
    pub fn for_contract(contract: &LeasingContract) -> Self {
        Self {
            contract_id: contract.id,
            container_number: container_number("TGHU", 100_001),
            container_type: contract.container_size.clone(),
            status: ContainerStatus::PickedUp,
            pickup_date: Some(contract.start_date),
            return_date: None,
        }
    }

    pub fn with_number(mut self, number: impl Into<String>) -> Self {
        self.container_number = number.into();
        self
    }

    /// Numbers the container `TGHU` plus `serial`
    pub fn with_serial(self, serial: u32) -> Self {
        self.with_number(container_number("TGHU", serial))
    }

    pub fn in_transit(mut self) -> Self {
        self.status = ContainerStatus::InTransit;
        self
    }

    pub fn returned_at(mut self, at: DateTime<Utc>) -> Self {
        self.status = ContainerStatus::Returned;
        self.return_date = Some(at);
        self
    }

    pub fn build(self) -> ContractContainer {
        ContractContainer {
            id: ContainerId::new(),
            contract_id: self.contract_id,
            container_number: self.container_number,
            container_type: self.container_type,
            pickup_location: "Qingdao Depot".to_string(),
            price: dec!(2000),
            status: self.status,
            pickup_date: self.pickup_date,
            return_date: self.return_date,
            notes: None,
        }
    }

    /// `count` picked-up containers with consecutive serials
    pub fn many(contract: &LeasingContract, count: u32) -> Vec<ContractContainer> {
        (0..count)
            .map(|n| Self::for_contract(contract).with_serial(200_000 + n).build())
            .collect()
    }
}

/// Builder for `PaymentMethod`
#[derive(Debug, Clone)]
pub struct PaymentMethodBuilder {
    user_id: UserId,
    method_type: PaymentMethodType,
    is_default: bool,
    is_active: bool,
    gateway_token: Option<String>,
    created_at: DateTime<Utc>,
}

impl PaymentMethodBuilder {
    /// Default, active card for `user_id`
    pub fn for_user(user_id: UserId) -> Self {
        Self {
            user_id,
            method_type: PaymentMethodType::Card,
            is_default: true,
            is_active: true,
            gateway_token: Some("tok_visa_4242".to_string()),
            created_at: TemporalFixtures::billing_instant() - Duration::days(90),
        }
    }

    pub fn with_type(mut self, method_type: PaymentMethodType) -> Self {
        self.method_type = method_type;
        self
    }

    pub fn not_default(mut self) -> Self {
        self.is_default = false;
        self
    }

    pub fn inactive(mut self) -> Self {
        self.is_active = false;
        self
    }

    pub fn with_token(mut self, token: Option<&str>) -> Self {
        self.gateway_token = token.map(str::to_string);
        self
    }

    pub fn created_at(mut self, at: DateTime<Utc>) -> Self {
        self.created_at = at;
        self
    }

    pub fn build(self) -> PaymentMethod {
        PaymentMethod {
            id: PaymentMethodId::new(),
            user_id: self.user_id,
            method_type: self.method_type,
            is_default: self.is_default,
            is_active: self.is_active,
            gateway_token: self.gateway_token,
            created_at: self.created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_contract_is_overdue_at_billing_instant() {
        let contract = ContractBuilder::new().build();
        assert!(contract.is_past_free_period(TemporalFixtures::billing_instant()));
        assert_eq!(contract.days_overdue_at(TemporalFixtures::billing_instant()), 2);
    }

    #[test]
    fn test_free_period_contract_is_not_overdue() {
        let contract = ContractBuilder::new().within_free_period().build();
        assert!(!contract.is_past_free_period(TemporalFixtures::billing_instant()));
    }

    #[test]
    fn test_many_containers_are_distinct_and_outstanding() {
        let contract = ContractBuilder::new().build();
        let containers = ContainerBuilder::many(&contract, 3);

        assert_eq!(containers.len(), 3);
        assert!(containers.iter().all(|c| c.is_outstanding()));
        assert_ne!(containers[0].container_number, containers[1].container_number);
    }

    #[test]
    fn test_returned_container_is_not_outstanding() {
        let contract = ContractBuilder::new().build();
        let container = ContainerBuilder::for_contract(&contract)
            .returned_at(TemporalFixtures::billing_instant())
            .build();
        assert!(!container.is_outstanding());
    }
}
