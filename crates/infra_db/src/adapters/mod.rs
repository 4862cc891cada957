//! Domain Adapters
//!
//! Port implementations backed by PostgreSQL. Each adapter implements a
//! domain port trait, converts row types to domain models and maps
//! `DatabaseError` into `PortError`.

pub mod ledger;

pub use ledger::PostgresLedgerStore;
