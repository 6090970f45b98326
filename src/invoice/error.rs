//! Webhook processor error types.
//!
//! HTTP mapping matters here: the gateway retries on any non-2xx response, so
//! post-verification processing failures must be 5xx and replays must be 200.

use thiserror::Error;

use crate::ledger::LedgerError;

#[derive(Error, Debug, Clone)]
pub enum InvoiceError {
    #[error("Invalid signature")]
    SignatureInvalid,

    #[error("Unknown order number: {0}")]
    UnknownInvoice(String),

    #[error("Malformed payload: {0}")]
    Malformed(String),

    #[error("Invalid amount")]
    InvalidAmount,

    #[error("Ledger error: {0}")]
    Ledger(String),

    #[error("Database error: {0}")]
    Database(String),
}

impl InvoiceError {
    pub fn code(&self) -> &'static str {
        match self {
            InvoiceError::SignatureInvalid => "SIGNATURE_INVALID",
            InvoiceError::UnknownInvoice(_) => "UNKNOWN_INVOICE",
            InvoiceError::Malformed(_) => "MALFORMED_PAYLOAD",
            InvoiceError::InvalidAmount => "INVALID_AMOUNT",
            InvoiceError::Ledger(_) => "LEDGER_ERROR",
            InvoiceError::Database(_) => "DATABASE_ERROR",
        }
    }

    pub fn http_status(&self) -> u16 {
        match self {
            InvoiceError::SignatureInvalid => 401,
            InvoiceError::UnknownInvoice(_) => 404,
            InvoiceError::Malformed(_) => 422,
            InvoiceError::InvalidAmount => 400,
            InvoiceError::Ledger(_) | InvoiceError::Database(_) => 500,
        }
    }
}

impl From<sqlx::Error> for InvoiceError {
    fn from(e: sqlx::Error) -> Self {
        InvoiceError::Database(e.to_string())
    }
}

impl From<LedgerError> for InvoiceError {
    fn from(e: LedgerError) -> Self {
        InvoiceError::Ledger(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_status_mapping() {
        assert_eq!(InvoiceError::SignatureInvalid.http_status(), 401);
        assert_eq!(InvoiceError::UnknownInvoice("x".into()).http_status(), 404);
        assert_eq!(InvoiceError::Malformed("x".into()).http_status(), 422);
        assert_eq!(InvoiceError::Ledger("x".into()).http_status(), 500);
    }
}
