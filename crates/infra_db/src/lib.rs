//! Infrastructure Database Layer
//!
//! PostgreSQL storage for the per-diem billing ledger using SQLx.
//!
//! # Layout
//!
//! - [`pool`]: connection pool settings and migrations
//! - [`repositories`]: SQL and row types per table group
//! - [`adapters`]: `LedgerStore` implementation over the repositories
//!
//! # Example
//!
//! ```rust,ignore
//! use infra_db::{create_pool, run_migrations, DatabaseConfig, PostgresLedgerStore};
//!
//! let pool = create_pool(DatabaseConfig::new("postgres://localhost/perdiem")).await?;
//! run_migrations(&pool, "migrations").await?;
//! let store = PostgresLedgerStore::new(pool);
//! ```

pub mod pool;
pub mod error;
pub mod repositories;
pub mod adapters;

pub use pool::{create_pool, create_pool_from_url, run_migrations, DatabaseConfig, DatabasePool, DEFAULT_MIGRATIONS_DIR};
pub use error::DatabaseError;
pub use adapters::PostgresLedgerStore;
