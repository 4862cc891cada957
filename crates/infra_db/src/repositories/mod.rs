//! Repositories over the ledger tables
//!
//! Each repository owns its SQL and its row types. Rows carry plain column
//! values; conversion to domain types happens in the adapters.

pub mod leasing;
pub mod per_diem;

pub use leasing::LeasingRepository;
pub use per_diem::PerDiemRepository;
