//! Leasing contract aggregate

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use core_kernel::temporal::days_elapsed_ceil;
use core_kernel::{ContractId, UserId};
use crate::error::LeasingError;

/// Contract status
///
/// Transitions out of `Active` are driven by account management, never by
/// billing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContractStatus {
    Active,
    Expired,
    Terminated,
}

impl ContractStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContractStatus::Active => "active",
            ContractStatus::Expired => "expired",
            ContractStatus::Terminated => "terminated",
        }
    }
}

impl fmt::Display for ContractStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContractStatus {
    type Err = LeasingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(ContractStatus::Active),
            "expired" => Ok(ContractStatus::Expired),
            "terminated" => Ok(ContractStatus::Terminated),
            other => Err(LeasingError::UnknownStatus(other.to_string())),
        }
    }
}

/// A lease of `quantity` containers with a free-use period
///
/// `end_date` is the free-day boundary (`start_date + free_days`), not the
/// date the lease stops. Per-diem accrues on outstanding containers from
/// that instant onward.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeasingContract {
    /// Unique identifier
    pub id: ContractId,
    /// Lessee
    pub user_id: UserId,
    /// Human-readable contract number, unique across contracts
    pub contract_number: String,
    /// Container size, e.g. "40HC"
    pub container_size: String,
    /// Number of containers leased
    pub quantity: u32,
    /// Days of free use after start
    pub free_days: u32,
    /// Daily charge per outstanding container; `None` when never set
    pub per_diem_rate: Option<Decimal>,
    /// Lease start
    pub start_date: DateTime<Utc>,
    /// Free-day boundary
    pub end_date: DateTime<Utc>,
    /// Status
    pub status: ContractStatus,
    /// Pickup region
    pub origin: String,
    /// Drop-off region
    pub destination: String,
    /// Agreed contract value
    pub total_value: Decimal,
    /// Created timestamp
    pub created_at: DateTime<Utc>,
    /// Updated timestamp
    pub updated_at: DateTime<Utc>,
}

impl LeasingContract {
    /// Creates an active contract whose free period starts at `start_date`
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        user_id: UserId,
        contract_number: impl Into<String>,
        container_size: impl Into<String>,
        quantity: u32,
        free_days: u32,
        per_diem_rate: Option<Decimal>,
        start_date: DateTime<Utc>,
        origin: impl Into<String>,
        destination: impl Into<String>,
        total_value: Decimal,
    ) -> Result<Self, LeasingError> {
        let contract_number = contract_number.into();
        if contract_number.trim().is_empty() {
            return Err(LeasingError::InvalidContract("contract number is empty".to_string()));
        }
        if quantity == 0 {
            return Err(LeasingError::InvalidContract(format!(
                "contract {} leases zero containers",
                contract_number
            )));
        }

        Ok(Self {
            id: ContractId::new_v7(),
            user_id,
            contract_number,
            container_size: container_size.into(),
            quantity,
            free_days,
            per_diem_rate,
            start_date,
            end_date: start_date + Duration::days(i64::from(free_days)),
            status: ContractStatus::Active,
            origin: origin.into(),
            destination: destination.into(),
            total_value,
            created_at: start_date,
            updated_at: start_date,
        })
    }

    /// Whether per-diem may accrue on this contract at `now`
    pub fn is_past_free_period(&self, now: DateTime<Utc>) -> bool {
        self.status == ContractStatus::Active && self.end_date < now
    }

    /// Days since the free period ended, a partial day counting as one
    ///
    /// Zero or negative while still inside the free period.
    pub fn days_overdue_at(&self, now: DateTime<Utc>) -> i64 {
        days_elapsed_ceil(self.end_date, now)
    }

    /// The contract's rate if it is a positive number, otherwise `fallback`
    pub fn effective_per_diem_rate(&self, fallback: Decimal) -> Decimal {
        match self.per_diem_rate {
            Some(rate) if rate > Decimal::ZERO => rate,
            _ => fallback,
        }
    }

    /// Ends the lease early
    pub fn terminate(&mut self, at: DateTime<Utc>) -> Result<(), LeasingError> {
        self.transition(ContractStatus::Terminated, at)
    }

    /// Marks the lease as run to completion
    pub fn expire(&mut self, at: DateTime<Utc>) -> Result<(), LeasingError> {
        self.transition(ContractStatus::Expired, at)
    }

    fn transition(&mut self, target: ContractStatus, at: DateTime<Utc>) -> Result<(), LeasingError> {
        if self.status != ContractStatus::Active {
            return Err(LeasingError::InvalidStatusTransition {
                from: self.status.to_string(),
                to: target.to_string(),
            });
        }
        self.status = target;
        self.updated_at = at;
        Ok(())
    }
}
