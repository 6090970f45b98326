//! Deposit intent types.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use crate::ledger::UserId;

/// Client-declared expectation of an incoming on-chain deposit.
///
/// Created before the client initiates the on-chain send; mutated only by the
/// matcher. Terminal once `processed_tx_hash` is set or `attempts` reaches the
/// ceiling. Never deleted (audit retention).
#[derive(Debug, Clone, Serialize)]
pub struct PendingDepositIntent {
    pub id: i64,
    pub user_id: UserId,
    /// Client-supplied idempotency key for intent creation.
    pub session_id: String,
    pub amount_usd: Decimal,
    pub sender_address: String,
    /// Exact expected on-chain value in native units (nanotons).
    pub expected_native_value: i64,
    pub attempts: i32,
    pub processed_tx_hash: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl PendingDepositIntent {
    pub fn is_processed(&self) -> bool {
        self.processed_tx_hash.is_some()
    }
}

/// Fields the client supplies when declaring an intent.
#[derive(Debug, Clone)]
pub struct NewDepositIntent {
    pub user_id: UserId,
    pub session_id: String,
    pub amount_usd: Decimal,
    pub sender_address: String,
    pub expected_native_value: i64,
}
