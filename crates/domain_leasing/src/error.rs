//! Leasing domain errors

use thiserror::Error;

/// Errors that can occur in the leasing domain
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LeasingError {
    #[error("Invalid status transition from {from} to {to}")]
    InvalidStatusTransition { from: String, to: String },

    #[error("Invalid contract: {0}")]
    InvalidContract(String),

    #[error("Unknown status: {0}")]
    UnknownStatus(String),
}
