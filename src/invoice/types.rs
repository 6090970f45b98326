//! Gateway invoice types.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::ledger::UserId;

/// Invoice lifecycle status, driven exclusively by signature-verified
/// webhook events after creation. Stored as TEXT.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvoiceStatus {
    New,
    Pending,
    Completed,
    Expired,
    Cancelled,
    Error,
    Failed,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::New => "new",
            InvoiceStatus::Pending => "pending",
            InvoiceStatus::Completed => "completed",
            InvoiceStatus::Expired => "expired",
            InvoiceStatus::Cancelled => "cancelled",
            InvoiceStatus::Error => "error",
            InvoiceStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "new" => Some(InvoiceStatus::New),
            "pending" => Some(InvoiceStatus::Pending),
            "completed" => Some(InvoiceStatus::Completed),
            "expired" => Some(InvoiceStatus::Expired),
            "cancelled" => Some(InvoiceStatus::Cancelled),
            "error" => Some(InvoiceStatus::Error),
            "failed" => Some(InvoiceStatus::Failed),
            _ => None,
        }
    }

    /// Terminal states: completed, expired, cancelled, failed.
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            InvoiceStatus::Completed
                | InvoiceStatus::Expired
                | InvoiceStatus::Cancelled
                | InvoiceStatus::Failed
        )
    }

    /// Statuses a webhook may report that end the invoice without payment.
    #[inline]
    pub fn is_terminal_failure(&self) -> bool {
        matches!(
            self,
            InvoiceStatus::Expired
                | InvoiceStatus::Cancelled
                | InvoiceStatus::Error
                | InvoiceStatus::Failed
        )
    }
}

impl fmt::Display for InvoiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct GatewayInvoice {
    /// Caller-facing idempotency key.
    pub order_number: String,
    pub user_id: UserId,
    pub amount_usd: Decimal,
    pub status: InvoiceStatus,
    /// Gateway-side transaction id, set by the completing webhook.
    pub txn_id: Option<String>,
    /// Raw payload of the last applied webhook, for audit.
    pub raw_payload: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
