//! Core Kernel - Foundational types for the per-diem billing system
//!
//! This crate provides the building blocks shared by the leasing and billing domains:
//! - Money types with precise decimal arithmetic
//! - Strongly-typed identifiers for contracts, containers, invoices and payments
//! - An injectable clock and the billing timezone used to derive calendar days
//! - Port infrastructure (errors, health checks) for storage and gateway adapters

pub mod money;
pub mod temporal;
pub mod identifiers;
pub mod ports;

pub use money::{Money, Currency, MoneyError};
pub use temporal::{Clock, SystemClock, ManualClock, Timezone, TemporalError};
pub use identifiers::{
    UserId, ContractId, ContainerId, InvoiceId, InvoiceItemId,
    PaymentMethodId, PaymentAttemptId, DunningCampaignId,
};
pub use ports::{PortError, DomainPort, HealthCheckable, HealthCheckResult, AdapterHealth};
