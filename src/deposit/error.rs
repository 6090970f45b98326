//! Deposit Matcher error types.
//!
//! `ExternalUnavailable` is transient: it aborts the current run without
//! touching any intent and is retried on the next scheduled cycle.

use thiserror::Error;

use crate::ledger::LedgerError;

#[derive(Error, Debug, Clone)]
pub enum DepositError {
    #[error("Indexer unavailable: {0}")]
    ExternalUnavailable(String),

    #[error("Invalid intent: {0}")]
    InvalidIntent(String),

    #[error("Ledger error: {0}")]
    Ledger(String),

    #[error("Database error: {0}")]
    Database(String),
}

impl DepositError {
    pub fn code(&self) -> &'static str {
        match self {
            DepositError::ExternalUnavailable(_) => "EXTERNAL_UNAVAILABLE",
            DepositError::InvalidIntent(_) => "INVALID_INTENT",
            DepositError::Ledger(_) => "LEDGER_ERROR",
            DepositError::Database(_) => "DATABASE_ERROR",
        }
    }

    pub fn http_status(&self) -> u16 {
        match self {
            DepositError::InvalidIntent(_) => 400,
            DepositError::ExternalUnavailable(_) => 503,
            DepositError::Ledger(_) | DepositError::Database(_) => 500,
        }
    }
}

impl From<sqlx::Error> for DepositError {
    fn from(e: sqlx::Error) -> Self {
        DepositError::Database(e.to_string())
    }
}

impl From<LedgerError> for DepositError {
    fn from(e: LedgerError) -> Self {
        DepositError::Ledger(e.to_string())
    }
}

impl From<reqwest::Error> for DepositError {
    fn from(e: reqwest::Error) -> Self {
        DepositError::ExternalUnavailable(e.to_string())
    }
}
