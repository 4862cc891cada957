//! Test Utilities Crate
//!
//! Shared test infrastructure for the per-diem billing workspace.
//!
//! # Modules
//!
//! - `fixtures`: fixed instants, amounts and a ready-wired engine harness
//! - `builders`: builders for contracts, containers and payment methods
//! - `database`: PostgreSQL test containers with the ledger schema applied
//! - `assertions`: invoice and attempt invariants
//! - `generators`: proptest strategies and fake data

pub mod fixtures;
pub mod builders;
pub mod database;
pub mod assertions;
pub mod generators;

pub use fixtures::*;
pub use builders::*;
pub use database::*;
pub use assertions::*;
pub use generators::*;
