//! Settlement record types.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use super::state::SettlementState;
use crate::ledger::UserId;

#[derive(Debug, Clone)]
pub struct SettlementRequest {
    pub user_id: UserId,
    pub amount_usd: Decimal,
    pub destination: String,
    /// Client-supplied idempotency key; a duplicate returns the existing
    /// settlement instead of debiting twice.
    pub cid: Option<String>,
}

/// Durable row backing the FSM. One row per outbound send.
#[derive(Debug, Clone, Serialize)]
pub struct SettlementRecord {
    pub id: String,
    pub cid: Option<String>,
    pub user_id: UserId,
    pub amount_usd: Decimal,
    /// Exactly what was taken from the wallet; compensation refunds this
    /// value, never a recomputed conversion.
    pub debited_amount: Option<Decimal>,
    pub destination: String,
    /// Converted amount in native units including the network fee.
    pub native_amount: Option<i64>,
    /// Custodial account sequence number snapshotted before submission.
    pub pre_seq: Option<i64>,
    /// Submission reference returned by the network RPC.
    pub tx_hash: Option<String>,
    pub state: SettlementState,
    pub error: Option<String>,
    pub retry_count: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SettlementRecord {
    pub fn new(req: &SettlementRequest) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            cid: req.cid.clone(),
            user_id: req.user_id,
            amount_usd: req.amount_usd,
            debited_amount: None,
            destination: req.destination.clone(),
            native_amount: None,
            pre_seq: None,
            tx_hash: None,
            state: SettlementState::Requested,
            error: None,
            retry_count: 0,
            created_at: now,
            updated_at: now,
        }
    }
}
