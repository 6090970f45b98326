//! Transfer Error Types

use thiserror::Error;

use crate::ledger::LedgerError;

/// Transfer error types
///
/// Error codes are stable strings for consistent API responses.
#[derive(Error, Debug, Clone)]
pub enum TransferError {
    // === Validation Errors ===
    #[error("User not authenticated")]
    Unauthorized,

    #[error("Sender and receiver cannot be the same")]
    SameAccount,

    #[error("Amount must be greater than zero")]
    InvalidAmount,

    // === Balance Errors ===
    #[error("Insufficient funds")]
    InsufficientFunds,

    // === System Errors ===
    #[error("Ledger error: {0}")]
    Ledger(String),
}

impl TransferError {
    /// Get the error code for API responses
    pub fn code(&self) -> &'static str {
        match self {
            TransferError::Unauthorized => "UNAUTHORIZED",
            TransferError::SameAccount => "SAME_ACCOUNT",
            TransferError::InvalidAmount => "INVALID_AMOUNT",
            TransferError::InsufficientFunds => "INSUFFICIENT_FUNDS",
            TransferError::Ledger(_) => "LEDGER_ERROR",
        }
    }

    /// Get HTTP status code suggestion
    pub fn http_status(&self) -> u16 {
        match self {
            TransferError::Unauthorized => 401,
            TransferError::SameAccount | TransferError::InvalidAmount => 400,
            TransferError::InsufficientFunds => 422,
            TransferError::Ledger(_) => 500,
        }
    }
}

impl From<LedgerError> for TransferError {
    fn from(e: LedgerError) -> Self {
        match e {
            LedgerError::InsufficientFunds => TransferError::InsufficientFunds,
            LedgerError::InvalidAmount => TransferError::InvalidAmount,
            LedgerError::Database(msg) => TransferError::Ledger(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(TransferError::SameAccount.code(), "SAME_ACCOUNT");
        assert_eq!(
            TransferError::InsufficientFunds.code(),
            "INSUFFICIENT_FUNDS"
        );
    }

    #[test]
    fn test_http_status() {
        assert_eq!(TransferError::Unauthorized.http_status(), 401);
        assert_eq!(TransferError::InvalidAmount.http_status(), 400);
        assert_eq!(TransferError::InsufficientFunds.http_status(), 422);
        assert_eq!(TransferError::Ledger("x".into()).http_status(), 500);
    }

    #[test]
    fn test_from_ledger_error() {
        assert!(matches!(
            TransferError::from(LedgerError::InsufficientFunds),
            TransferError::InsufficientFunds
        ));
    }
}
