//! Durable storage for settlement rows.
//!
//! Every state transition goes through `update_state_if`, a compare-and-swap
//! on the current state. `rows_affected == 0` means another writer (the
//! recovery sweep, usually) got there first, and the caller must stand down.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use dashmap::DashMap;
use rust_decimal::Decimal;
use sqlx::postgres::PgPool;
use sqlx::Row;

use super::error::SettlementError;
use super::state::SettlementState;
use super::types::SettlementRecord;

#[async_trait]
pub trait SettlementStore: Send + Sync {
    async fn create(&self, record: &SettlementRecord) -> Result<(), SettlementError>;

    async fn get(&self, id: &str) -> Result<Option<SettlementRecord>, SettlementError>;

    async fn get_by_cid(&self, cid: &str) -> Result<Option<SettlementRecord>, SettlementError>;

    /// CAS state transition. Returns false if the row is no longer in
    /// `expected`.
    async fn update_state_if(
        &self,
        id: &str,
        expected: SettlementState,
        new: SettlementState,
    ) -> Result<bool, SettlementError>;

    /// REQUESTED → DEBITED and the recorded debit amount, in one write.
    async fn mark_debited(&self, id: &str, amount: Decimal) -> Result<bool, SettlementError>;

    async fn set_broadcast_fields(
        &self,
        id: &str,
        native_amount: i64,
        pre_seq: i64,
    ) -> Result<(), SettlementError>;

    async fn set_tx_hash(&self, id: &str, tx_hash: &str) -> Result<(), SettlementError>;

    async fn set_error(&self, id: &str, error: &str) -> Result<(), SettlementError>;

    async fn increment_retry(&self, id: &str) -> Result<(), SettlementError>;

    /// Non-terminal rows whose `updated_at` is older than `threshold_secs`.
    async fn find_stale(
        &self,
        threshold_secs: i64,
        limit: i64,
    ) -> Result<Vec<SettlementRecord>, SettlementError>;
}

// ============================================================================
// Postgres implementation
// ============================================================================

pub struct PgSettlementStore {
    pool: PgPool,
}

impl PgSettlementStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_record(row: &sqlx::postgres::PgRow) -> Result<SettlementRecord, SettlementError> {
        let state_id: i16 = row.get("state");
        let state = SettlementState::from_id(state_id)
            .ok_or_else(|| SettlementError::Database(format!("unknown state id {state_id}")))?;
        Ok(SettlementRecord {
            id: row.get("id"),
            cid: row.get("cid"),
            user_id: row.get("user_id"),
            amount_usd: row.get("amount_usd"),
            debited_amount: row.get("debited_amount"),
            destination: row.get("destination"),
            native_amount: row.get("native_amount"),
            pre_seq: row.get("pre_seq"),
            tx_hash: row.get("tx_hash"),
            state,
            error: row.get("error"),
            retry_count: row.get("retry_count"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
    }
}

#[async_trait]
impl SettlementStore for PgSettlementStore {
    async fn create(&self, record: &SettlementRecord) -> Result<(), SettlementError> {
        sqlx::query(
            r#"
            INSERT INTO outbound_settlements_tb
              (id, cid, user_id, amount_usd, destination, state,
               retry_count, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(&record.id)
        .bind(&record.cid)
        .bind(record.user_id)
        .bind(record.amount_usd)
        .bind(&record.destination)
        .bind(record.state.id())
        .bind(record.retry_count)
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<SettlementRecord>, SettlementError> {
        let row = sqlx::query("SELECT * FROM outbound_settlements_tb WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_record).transpose()
    }

    async fn get_by_cid(&self, cid: &str) -> Result<Option<SettlementRecord>, SettlementError> {
        let row = sqlx::query("SELECT * FROM outbound_settlements_tb WHERE cid = $1")
            .bind(cid)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_record).transpose()
    }

    async fn update_state_if(
        &self,
        id: &str,
        expected: SettlementState,
        new: SettlementState,
    ) -> Result<bool, SettlementError> {
        let result = sqlx::query(
            r#"
            UPDATE outbound_settlements_tb
            SET state = $1, updated_at = NOW()
            WHERE id = $2 AND state = $3
            "#,
        )
        .bind(new.id())
        .bind(id)
        .bind(expected.id())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn mark_debited(&self, id: &str, amount: Decimal) -> Result<bool, SettlementError> {
        let result = sqlx::query(
            r#"
            UPDATE outbound_settlements_tb
            SET state = $1, debited_amount = $2, updated_at = NOW()
            WHERE id = $3 AND state = $4
            "#,
        )
        .bind(SettlementState::Debited.id())
        .bind(amount)
        .bind(id)
        .bind(SettlementState::Requested.id())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn set_broadcast_fields(
        &self,
        id: &str,
        native_amount: i64,
        pre_seq: i64,
    ) -> Result<(), SettlementError> {
        sqlx::query(
            r#"
            UPDATE outbound_settlements_tb
            SET native_amount = $1, pre_seq = $2, updated_at = NOW()
            WHERE id = $3
            "#,
        )
        .bind(native_amount)
        .bind(pre_seq)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_tx_hash(&self, id: &str, tx_hash: &str) -> Result<(), SettlementError> {
        sqlx::query(
            "UPDATE outbound_settlements_tb SET tx_hash = $1, updated_at = NOW() WHERE id = $2",
        )
        .bind(tx_hash)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_error(&self, id: &str, error: &str) -> Result<(), SettlementError> {
        sqlx::query(
            "UPDATE outbound_settlements_tb SET error = $1, updated_at = NOW() WHERE id = $2",
        )
        .bind(error)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn increment_retry(&self, id: &str) -> Result<(), SettlementError> {
        sqlx::query(
            r#"
            UPDATE outbound_settlements_tb
            SET retry_count = retry_count + 1, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_stale(
        &self,
        threshold_secs: i64,
        limit: i64,
    ) -> Result<Vec<SettlementRecord>, SettlementError> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM outbound_settlements_tb
            WHERE state NOT IN ($1, $2)
              AND updated_at < NOW() - make_interval(secs => $3::double precision)
            ORDER BY updated_at ASC
            LIMIT $4
            "#,
        )
        .bind(SettlementState::Confirmed.id())
        .bind(SettlementState::FailedRolledBack.id())
        .bind(threshold_secs)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::row_to_record).collect()
    }
}

// ============================================================================
// In-memory implementation
// ============================================================================

/// In-memory store used by the mock wiring and by tests.
#[derive(Default)]
pub struct MemSettlementStore {
    rows: DashMap<String, SettlementRecord>,
}

impl MemSettlementStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Test helper: rewind `updated_at` so a row looks stale to the sweep.
    pub fn backdate(&self, id: &str, secs: i64) {
        if let Some(mut row) = self.rows.get_mut(id) {
            row.updated_at -= Duration::seconds(secs);
        }
    }
}

#[async_trait]
impl SettlementStore for MemSettlementStore {
    async fn create(&self, record: &SettlementRecord) -> Result<(), SettlementError> {
        self.rows.insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<SettlementRecord>, SettlementError> {
        Ok(self.rows.get(id).map(|r| r.clone()))
    }

    async fn get_by_cid(&self, cid: &str) -> Result<Option<SettlementRecord>, SettlementError> {
        Ok(self
            .rows
            .iter()
            .find(|r| r.cid.as_deref() == Some(cid))
            .map(|r| r.clone()))
    }

    async fn update_state_if(
        &self,
        id: &str,
        expected: SettlementState,
        new: SettlementState,
    ) -> Result<bool, SettlementError> {
        match self.rows.get_mut(id) {
            Some(mut row) if row.state == expected => {
                row.state = new;
                row.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mark_debited(&self, id: &str, amount: Decimal) -> Result<bool, SettlementError> {
        match self.rows.get_mut(id) {
            Some(mut row) if row.state == SettlementState::Requested => {
                row.state = SettlementState::Debited;
                row.debited_amount = Some(amount);
                row.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn set_broadcast_fields(
        &self,
        id: &str,
        native_amount: i64,
        pre_seq: i64,
    ) -> Result<(), SettlementError> {
        if let Some(mut row) = self.rows.get_mut(id) {
            row.native_amount = Some(native_amount);
            row.pre_seq = Some(pre_seq);
            row.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn set_tx_hash(&self, id: &str, tx_hash: &str) -> Result<(), SettlementError> {
        if let Some(mut row) = self.rows.get_mut(id) {
            row.tx_hash = Some(tx_hash.to_string());
            row.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn set_error(&self, id: &str, error: &str) -> Result<(), SettlementError> {
        if let Some(mut row) = self.rows.get_mut(id) {
            row.error = Some(error.to_string());
            row.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn increment_retry(&self, id: &str) -> Result<(), SettlementError> {
        if let Some(mut row) = self.rows.get_mut(id) {
            row.retry_count += 1;
            row.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn find_stale(
        &self,
        threshold_secs: i64,
        limit: i64,
    ) -> Result<Vec<SettlementRecord>, SettlementError> {
        let cutoff = Utc::now() - Duration::seconds(threshold_secs);
        let mut stale: Vec<SettlementRecord> = self
            .rows
            .iter()
            .filter(|r| !r.state.is_terminal() && r.updated_at < cutoff)
            .map(|r| r.clone())
            .collect();
        stale.sort_by(|a, b| a.updated_at.cmp(&b.updated_at));
        stale.truncate(limit as usize);
        Ok(stale)
    }
}
