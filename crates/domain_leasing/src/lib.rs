//! Container Leasing Domain
//!
//! A leasing contract grants a lessee N containers with a number of free days.
//! Once the free period ends, every container still in the lessee's custody
//! accrues a per-diem charge until it is returned.
//!
//! # Container Custody
//!
//! ```text
//! PickedUp <-> InTransit
//!    |           |
//!    +--> Returned <--+
//! ```
//!
//! Only `PickedUp` containers without a return date are billable, and only
//! when their contract is `Active` and past its free-day boundary.

pub mod contract;
pub mod container;
pub mod overdue;
pub mod error;

pub use contract::{LeasingContract, ContractStatus};
pub use container::{ContractContainer, ContainerStatus};
pub use overdue::{OverdueContract, group_by_contract};
pub use error::LeasingError;
