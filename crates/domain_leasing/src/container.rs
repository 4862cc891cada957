//! Containers held under a leasing contract

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use core_kernel::{ContainerId, ContractId};
use crate::error::LeasingError;

/// Custody status of a leased container
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerStatus {
    /// Collected by the lessee from the depot
    PickedUp,
    /// Moving between depots
    InTransit,
    /// Back at a depot; terminal
    Returned,
}

impl ContainerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContainerStatus::PickedUp => "picked_up",
            ContainerStatus::InTransit => "in_transit",
            ContainerStatus::Returned => "returned",
        }
    }
}

impl fmt::Display for ContainerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContainerStatus {
    type Err = LeasingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "picked_up" => Ok(ContainerStatus::PickedUp),
            "in_transit" => Ok(ContainerStatus::InTransit),
            "returned" => Ok(ContainerStatus::Returned),
            other => Err(LeasingError::UnknownStatus(other.to_string())),
        }
    }
}

/// One physical container tied to a contract
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractContainer {
    pub id: ContainerId,
    pub contract_id: ContractId,
    /// ISO 6346 number, e.g. "MSCU1234565"
    pub container_number: String,
    pub container_type: String,
    pub pickup_location: String,
    pub price: Decimal,
    pub status: ContainerStatus,
    pub pickup_date: Option<DateTime<Utc>>,
    /// Set when returned; `None` while outstanding
    pub return_date: Option<DateTime<Utc>>,
    pub notes: Option<String>,
}

impl ContractContainer {
    /// Records a container collected by the lessee at `picked_up_at`
    pub fn picked_up(
        contract_id: ContractId,
        container_number: impl Into<String>,
        container_type: impl Into<String>,
        pickup_location: impl Into<String>,
        price: Decimal,
        picked_up_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: ContainerId::new_v7(),
            contract_id,
            container_number: container_number.into(),
            container_type: container_type.into(),
            pickup_location: pickup_location.into(),
            price,
            status: ContainerStatus::PickedUp,
            pickup_date: Some(picked_up_at),
            return_date: None,
            notes: None,
        }
    }

    /// Whether this container is still in the lessee's custody
    ///
    /// Only outstanding containers accrue per-diem.
    pub fn is_outstanding(&self) -> bool {
        self.status == ContainerStatus::PickedUp && self.return_date.is_none()
    }

    /// Records the container's return; stops all future billing
    pub fn mark_returned(&mut self, at: DateTime<Utc>) -> Result<(), LeasingError> {
        if self.status == ContainerStatus::Returned {
            return Err(LeasingError::InvalidStatusTransition {
                from: self.status.to_string(),
                to: ContainerStatus::Returned.to_string(),
            });
        }
        self.status = ContainerStatus::Returned;
        self.return_date = Some(at);
        Ok(())
    }

    /// Marks the container as moving between depots
    pub fn mark_in_transit(&mut self) -> Result<(), LeasingError> {
        if self.status != ContainerStatus::PickedUp {
            return Err(LeasingError::InvalidStatusTransition {
                from: self.status.to_string(),
                to: ContainerStatus::InTransit.to_string(),
            });
        }
        self.status = ContainerStatus::InTransit;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn container() -> ContractContainer {
        ContractContainer::picked_up(
            ContractId::new(),
            "MSCU1234565",
            "40HC",
            "Yantian Depot",
            dec!(2100),
            Utc.with_ymd_and_hms(2024, 1, 2, 9, 0, 0).unwrap(),
        )
    }

    #[test]
    fn test_picked_up_is_outstanding() {
        assert!(container().is_outstanding());
    }

    #[test]
    fn test_returned_is_not_outstanding() {
        let mut c = container();
        c.mark_returned(Utc.with_ymd_and_hms(2024, 2, 1, 9, 0, 0).unwrap()).unwrap();
        assert!(!c.is_outstanding());
        assert!(c.mark_returned(Utc::now()).is_err());
    }

    #[test]
    fn test_in_transit_is_not_outstanding() {
        let mut c = container();
        c.mark_in_transit().unwrap();
        assert!(!c.is_outstanding());
    }

    #[test]
    fn test_status_string_roundtrip() {
        for status in [ContainerStatus::PickedUp, ContainerStatus::InTransit, ContainerStatus::Returned] {
            assert_eq!(status.as_str().parse::<ContainerStatus>().unwrap(), status);
        }
    }
}
