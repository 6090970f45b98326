//! Settlement error types.

use thiserror::Error;

use crate::ledger::LedgerError;

#[derive(Error, Debug, Clone)]
pub enum SettlementError {
    // === Validation Errors (rejected before any mutation) ===
    #[error("User not authenticated")]
    Unauthorized,

    #[error("Amount must be greater than zero")]
    InvalidAmount,

    #[error("Invalid destination address")]
    InvalidAddress,

    // === Balance Errors ===
    #[error("Insufficient funds")]
    InsufficientFunds,

    // === External Errors (post-debit: trigger compensation) ===
    #[error("Price feed unavailable: {0}")]
    PriceFeedUnavailable(String),

    #[error("Broadcast failed: {0}")]
    Broadcast(String),

    #[error("Confirmation timed out")]
    ConfirmationTimeout,

    /// The compensating credit itself failed. Non-self-healing: the row stays
    /// in ROLLING_BACK for the recovery sweep and operators are alerted.
    #[error("Compensation failed: {0}")]
    CompensationFailed(String),

    // === System Errors ===
    #[error("Settlement not found: {0}")]
    NotFound(String),

    #[error("Database error: {0}")]
    Database(String),
}

impl SettlementError {
    pub fn code(&self) -> &'static str {
        match self {
            SettlementError::Unauthorized => "UNAUTHORIZED",
            SettlementError::InvalidAmount => "INVALID_AMOUNT",
            SettlementError::InvalidAddress => "INVALID_ADDRESS",
            SettlementError::InsufficientFunds => "INSUFFICIENT_FUNDS",
            SettlementError::PriceFeedUnavailable(_) => "PRICE_FEED_UNAVAILABLE",
            SettlementError::Broadcast(_) => "BROADCAST_FAILED",
            SettlementError::ConfirmationTimeout => "CONFIRMATION_TIMEOUT",
            SettlementError::CompensationFailed(_) => "COMPENSATION_FAILED",
            SettlementError::NotFound(_) => "SETTLEMENT_NOT_FOUND",
            SettlementError::Database(_) => "DATABASE_ERROR",
        }
    }

    pub fn http_status(&self) -> u16 {
        match self {
            SettlementError::Unauthorized => 401,
            SettlementError::InvalidAmount | SettlementError::InvalidAddress => 400,
            SettlementError::InsufficientFunds => 422,
            SettlementError::NotFound(_) => 404,
            SettlementError::PriceFeedUnavailable(_) => 503,
            SettlementError::Broadcast(_)
            | SettlementError::ConfirmationTimeout
            | SettlementError::CompensationFailed(_)
            | SettlementError::Database(_) => 500,
        }
    }
}

impl From<sqlx::Error> for SettlementError {
    fn from(e: sqlx::Error) -> Self {
        SettlementError::Database(e.to_string())
    }
}

impl From<LedgerError> for SettlementError {
    fn from(e: LedgerError) -> Self {
        match e {
            LedgerError::InsufficientFunds => SettlementError::InsufficientFunds,
            LedgerError::InvalidAmount => SettlementError::InvalidAmount,
            LedgerError::Database(msg) => SettlementError::Database(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_status() {
        assert_eq!(SettlementError::InvalidAddress.http_status(), 400);
        assert_eq!(SettlementError::InsufficientFunds.http_status(), 422);
        assert_eq!(SettlementError::ConfirmationTimeout.http_status(), 500);
        assert_eq!(
            SettlementError::PriceFeedUnavailable("x".into()).http_status(),
            503
        );
    }
}
