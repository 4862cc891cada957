//! Ports and Adapters Infrastructure
//!
//! The billing engine talks to two collaborators it does not own: the ledger
//! store (contracts, containers, invoices, attempts, dunning) and the payment
//! gateway. Each is a port trait defined in `domain_billing`; this module holds
//! the pieces every port shares.
//!
//! ```text
//!            PerDiemBillingEngine
//!               │            │
//!        LedgerStore     PaymentGateway      (port traits)
//!          ▲      ▲            ▲
//!   Postgres   InMemory   HttpPaymentGateway (adapters)
//! ```

use std::fmt;
use thiserror::Error;
use serde::{Deserialize, Serialize};

/// Failure reported by a ledger or gateway adapter
///
/// The engine only distinguishes a few classes: `Conflict` on invoice
/// insert means the day is already billed, transient errors surface as 503
/// on the HTTP surface, and any gateway error counts as a declined charge.
#[derive(Debug, Error)]
pub enum PortError {
    /// Row or remote object does not exist
    #[error("Not found: {entity_type} with id {id}")]
    NotFound {
        entity_type: String,
        id: String,
    },

    /// The adapter refused the input
    #[error("Validation error: {message}")]
    Validation {
        message: String,
    },

    /// Unique constraint hit, e.g. a second invoice for one contract-day
    #[error("Conflict: {message}")]
    Conflict {
        message: String,
    },

    /// Database or gateway unreachable
    #[error("Connection error: {message}")]
    Connection {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Timeout after {duration_ms}ms: {operation}")]
    Timeout {
        operation: String,
        duration_ms: u64,
    },

    /// Gateway rejected our credentials
    #[error("Unauthorized: {message}")]
    Unauthorized {
        message: String,
    },

    #[error("Rate limited: retry after {retry_after_secs}s")]
    RateLimited {
        retry_after_secs: u64,
    },

    /// Gateway answered with a 5xx
    #[error("Service unavailable: {service}")]
    ServiceUnavailable {
        service: String,
    },

    /// Stored or received data could not be mapped onto domain types
    #[error("Transformation error: {message}")]
    Transformation {
        message: String,
    },

    #[error("Internal error: {message}")]
    Internal {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl PortError {
    pub fn not_found(entity_type: impl Into<String>, id: impl fmt::Display) -> Self {
        PortError::NotFound {
            entity_type: entity_type.into(),
            id: id.to_string(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        PortError::Validation {
            message: message.into(),
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        PortError::Conflict {
            message: message.into(),
        }
    }

    pub fn connection(message: impl Into<String>) -> Self {
        PortError::Connection {
            message: message.into(),
            source: None,
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        PortError::Internal {
            message: message.into(),
            source: None,
        }
    }

    /// Failures worth trying again later, as opposed to bad input or bad data
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            PortError::Connection { .. }
                | PortError::Timeout { .. }
                | PortError::RateLimited { .. }
                | PortError::ServiceUnavailable { .. }
        )
    }

    /// Returns true if the write was rejected because the row already exists
    pub fn is_conflict(&self) -> bool {
        matches!(self, PortError::Conflict { .. })
    }
}

/// Supertrait of every port so adapters can sit behind `Arc<dyn _>` in async code
pub trait DomainPort: Send + Sync + 'static {}

/// Health status for an adapter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdapterHealth {
    Healthy,
    /// Reachable but answering oddly, e.g. a non-2xx health check
    Degraded,
    Unhealthy,
}

/// Outcome of one readiness check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckResult {
    /// e.g. "postgres-ledger-store"
    pub adapter_id: String,
    pub status: AdapterHealth,
    pub latency_ms: u64,
    pub message: Option<String>,
    pub checked_at: chrono::DateTime<chrono::Utc>,
}

/// Adapters the readiness endpoint can query
#[async_trait::async_trait]
pub trait HealthCheckable: Send + Sync {
    async fn health_check(&self) -> HealthCheckResult;
}
