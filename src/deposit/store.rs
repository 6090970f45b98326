//! Intent persistence.
//!
//! All state updates that matter for idempotency are CAS-style conditional
//! writes reported through `rows_affected`, so concurrent runs and crashed
//! runs can never double-apply.

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use sqlx::{PgPool, Row};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::time::Duration;

use super::error::DepositError;
use super::types::{NewDepositIntent, PendingDepositIntent};

#[async_trait]
pub trait IntentStore: Send + Sync {
    /// Create an intent, idempotent on `session_id`: a duplicate declaration
    /// returns the existing row untouched.
    async fn create(&self, intent: NewDepositIntent)
    -> Result<PendingDepositIntent, DepositError>;

    /// Pending intents (`attempts < max_attempts`, unprocessed), oldest first.
    async fn load_pending(
        &self,
        max_attempts: i32,
        limit: u32,
    ) -> Result<Vec<PendingDepositIntent>, DepositError>;

    /// Claim a transaction for an intent: CAS `processed_tx_hash` from NULL.
    /// Returns false if the intent was already claimed or the hash is already
    /// consumed by another intent.
    async fn claim(&self, intent_id: i64, tx_hash: &str) -> Result<bool, DepositError>;

    /// Release a claim after a failed credit so the next run retries.
    async fn unclaim(&self, intent_id: i64) -> Result<(), DepositError>;

    async fn increment_attempts(&self, intent_id: i64) -> Result<(), DepositError>;

    /// Acquire the single matcher lease if free or expired.
    async fn acquire_lease(&self, holder: &str, ttl: Duration) -> Result<bool, DepositError>;

    /// Release the lease if still held by `holder`.
    async fn release_lease(&self, holder: &str) -> Result<(), DepositError>;

    async fn get(&self, intent_id: i64) -> Result<Option<PendingDepositIntent>, DepositError>;
}

// === PostgreSQL implementation ===

pub struct PgIntentStore {
    pool: PgPool,
}

impl PgIntentStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_intent(row: &sqlx::postgres::PgRow) -> PendingDepositIntent {
        PendingDepositIntent {
            id: row.get("id"),
            user_id: row.get("user_id"),
            session_id: row.get("session_id"),
            amount_usd: row.get("amount_usd"),
            sender_address: row.get("sender_address"),
            expected_native_value: row.get("expected_native_value"),
            attempts: row.get("attempts"),
            processed_tx_hash: row.get("processed_tx_hash"),
            created_at: row.get("created_at"),
        }
    }
}

#[async_trait]
impl IntentStore for PgIntentStore {
    async fn create(
        &self,
        intent: NewDepositIntent,
    ) -> Result<PendingDepositIntent, DepositError> {
        // Insert-or-return keyed on session_id. The DO UPDATE on a no-op
        // column makes RETURNING yield the existing row on conflict.
        let row = sqlx::query(
            r#"
            INSERT INTO deposit_intents_tb
                (user_id, session_id, amount_usd, sender_address, expected_native_value, attempts, created_at)
            VALUES ($1, $2, $3, $4, $5, 0, NOW())
            ON CONFLICT (session_id) DO UPDATE SET session_id = EXCLUDED.session_id
            RETURNING id, user_id, session_id, amount_usd, sender_address,
                      expected_native_value, attempts, processed_tx_hash, created_at
            "#,
        )
        .bind(intent.user_id)
        .bind(&intent.session_id)
        .bind(intent.amount_usd)
        .bind(&intent.sender_address)
        .bind(intent.expected_native_value)
        .fetch_one(&self.pool)
        .await?;

        Ok(Self::row_to_intent(&row))
    }

    async fn load_pending(
        &self,
        max_attempts: i32,
        limit: u32,
    ) -> Result<Vec<PendingDepositIntent>, DepositError> {
        let rows = sqlx::query(
            r#"
            SELECT id, user_id, session_id, amount_usd, sender_address,
                   expected_native_value, attempts, processed_tx_hash, created_at
            FROM deposit_intents_tb
            WHERE attempts < $1 AND processed_tx_hash IS NULL
            ORDER BY created_at ASC
            LIMIT $2
            "#,
        )
        .bind(max_attempts)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(Self::row_to_intent).collect())
    }

    async fn claim(&self, intent_id: i64, tx_hash: &str) -> Result<bool, DepositError> {
        // The partial unique index on processed_tx_hash turns a cross-intent
        // double claim into a constraint violation, reported as not-claimed.
        let result = sqlx::query(
            r#"
            UPDATE deposit_intents_tb
            SET processed_tx_hash = $1
            WHERE id = $2 AND processed_tx_hash IS NULL
            "#,
        )
        .bind(tx_hash)
        .bind(intent_id)
        .execute(&self.pool)
        .await;

        match result {
            Ok(r) => Ok(r.rows_affected() > 0),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn unclaim(&self, intent_id: i64) -> Result<(), DepositError> {
        sqlx::query("UPDATE deposit_intents_tb SET processed_tx_hash = NULL WHERE id = $1")
            .bind(intent_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn increment_attempts(&self, intent_id: i64) -> Result<(), DepositError> {
        sqlx::query("UPDATE deposit_intents_tb SET attempts = attempts + 1 WHERE id = $1")
            .bind(intent_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn acquire_lease(&self, holder: &str, ttl: Duration) -> Result<bool, DepositError> {
        let result = sqlx::query(
            r#"
            INSERT INTO matcher_lease_tb (lease_key, holder, expires_at)
            VALUES ('deposit_matcher', $1, NOW() + INTERVAL '1 second' * $2)
            ON CONFLICT (lease_key) DO UPDATE
            SET holder = EXCLUDED.holder, expires_at = EXCLUDED.expires_at
            WHERE matcher_lease_tb.expires_at < NOW()
               OR matcher_lease_tb.holder = EXCLUDED.holder
            "#,
        )
        .bind(holder)
        .bind(ttl.as_secs() as i64)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn release_lease(&self, holder: &str) -> Result<(), DepositError> {
        sqlx::query(
            "UPDATE matcher_lease_tb SET expires_at = NOW() WHERE lease_key = 'deposit_matcher' AND holder = $1",
        )
        .bind(holder)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, intent_id: i64) -> Result<Option<PendingDepositIntent>, DepositError> {
        let row = sqlx::query(
            r#"
            SELECT id, user_id, session_id, amount_usd, sender_address,
                   expected_native_value, attempts, processed_tx_hash, created_at
            FROM deposit_intents_tb
            WHERE id = $1
            "#,
        )
        .bind(intent_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(Self::row_to_intent))
    }
}

// === In-memory implementation ===

struct MemLease {
    holder: String,
    expires_at: chrono::DateTime<Utc>,
}

#[derive(Default)]
pub struct MemIntentStore {
    intents: DashMap<i64, PendingDepositIntent>,
    next_id: AtomicI64,
    lease: Mutex<Option<MemLease>>,
    fail_release: AtomicBool,
}

impl MemIntentStore {
    pub fn new() -> Self {
        Self {
            intents: DashMap::new(),
            next_id: AtomicI64::new(1),
            lease: Mutex::new(None),
            fail_release: AtomicBool::new(false),
        }
    }

    /// Make `release_lease` fail, for exercising the release error path.
    pub fn set_fail_release(&self, fail: bool) {
        self.fail_release.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl IntentStore for MemIntentStore {
    async fn create(
        &self,
        intent: NewDepositIntent,
    ) -> Result<PendingDepositIntent, DepositError> {
        if let Some(existing) = self
            .intents
            .iter()
            .find(|e| e.value().session_id == intent.session_id)
        {
            return Ok(existing.value().clone());
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let row = PendingDepositIntent {
            id,
            user_id: intent.user_id,
            session_id: intent.session_id,
            amount_usd: intent.amount_usd,
            sender_address: intent.sender_address,
            expected_native_value: intent.expected_native_value,
            attempts: 0,
            processed_tx_hash: None,
            created_at: Utc::now(),
        };
        self.intents.insert(id, row.clone());
        Ok(row)
    }

    async fn load_pending(
        &self,
        max_attempts: i32,
        limit: u32,
    ) -> Result<Vec<PendingDepositIntent>, DepositError> {
        let mut pending: Vec<PendingDepositIntent> = self
            .intents
            .iter()
            .map(|e| e.value().clone())
            .filter(|i| i.attempts < max_attempts && i.processed_tx_hash.is_none())
            .collect();
        pending.sort_by_key(|i| (i.created_at, i.id));
        pending.truncate(limit as usize);
        Ok(pending)
    }

    async fn claim(&self, intent_id: i64, tx_hash: &str) -> Result<bool, DepositError> {
        let already_consumed = self
            .intents
            .iter()
            .any(|e| e.value().processed_tx_hash.as_deref() == Some(tx_hash));
        if already_consumed {
            return Ok(false);
        }

        match self.intents.get_mut(&intent_id) {
            Some(mut entry) if entry.processed_tx_hash.is_none() => {
                entry.processed_tx_hash = Some(tx_hash.to_string());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn unclaim(&self, intent_id: i64) -> Result<(), DepositError> {
        if let Some(mut entry) = self.intents.get_mut(&intent_id) {
            entry.processed_tx_hash = None;
        }
        Ok(())
    }

    async fn increment_attempts(&self, intent_id: i64) -> Result<(), DepositError> {
        if let Some(mut entry) = self.intents.get_mut(&intent_id) {
            entry.attempts += 1;
        }
        Ok(())
    }

    async fn acquire_lease(&self, holder: &str, ttl: Duration) -> Result<bool, DepositError> {
        let mut lease = self.lease.lock().unwrap();
        let now = Utc::now();
        match lease.as_ref() {
            Some(l) if l.expires_at > now && l.holder != holder => Ok(false),
            _ => {
                *lease = Some(MemLease {
                    holder: holder.to_string(),
                    expires_at: now + ChronoDuration::seconds(ttl.as_secs() as i64),
                });
                Ok(true)
            }
        }
    }

    async fn release_lease(&self, holder: &str) -> Result<(), DepositError> {
        if self.fail_release.load(Ordering::SeqCst) {
            return Err(DepositError::Database("lease release failed".to_string()));
        }
        let mut lease = self.lease.lock().unwrap();
        if let Some(l) = lease.as_ref()
            && l.holder == holder
        {
            *lease = None;
        }
        Ok(())
    }

    async fn get(&self, intent_id: i64) -> Result<Option<PendingDepositIntent>, DepositError> {
        Ok(self.intents.get(&intent_id).map(|e| e.value().clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    fn new_intent(session_id: &str) -> NewDepositIntent {
        NewDepositIntent {
            user_id: 1,
            session_id: session_id.to_string(),
            amount_usd: Decimal::new(500, 2),
            sender_address: "EQabc".to_string(),
            expected_native_value: 1_000_000_000,
        }
    }

    #[tokio::test]
    async fn test_create_idempotent_on_session_id() {
        let store = MemIntentStore::new();
        let first = store.create(new_intent("s1")).await.unwrap();
        let second = store.create(new_intent("s1")).await.unwrap();
        assert_eq!(first.id, second.id);
    }

    #[tokio::test]
    async fn test_claim_is_exclusive() {
        let store = MemIntentStore::new();
        let intent = store.create(new_intent("s1")).await.unwrap();

        assert!(store.claim(intent.id, "tx1").await.unwrap());
        assert!(!store.claim(intent.id, "tx2").await.unwrap());

        let other = store.create(new_intent("s2")).await.unwrap();
        // tx1 already consumed globally
        assert!(!store.claim(other.id, "tx1").await.unwrap());
    }

    #[tokio::test]
    async fn test_unclaim_reopens_intent() {
        let store = MemIntentStore::new();
        let intent = store.create(new_intent("s1")).await.unwrap();
        assert!(store.claim(intent.id, "tx1").await.unwrap());
        store.unclaim(intent.id).await.unwrap();
        assert!(store.claim(intent.id, "tx1").await.unwrap());
    }

    #[tokio::test]
    async fn test_lease_mutual_exclusion() {
        let store = MemIntentStore::new();
        let ttl = Duration::from_secs(30);

        assert!(store.acquire_lease("a", ttl).await.unwrap());
        assert!(!store.acquire_lease("b", ttl).await.unwrap());
        // Re-entrant for the same holder
        assert!(store.acquire_lease("a", ttl).await.unwrap());

        store.release_lease("a").await.unwrap();
        assert!(store.acquire_lease("b", ttl).await.unwrap());
    }

    #[tokio::test]
    async fn test_load_pending_excludes_exhausted_and_processed() {
        let store = MemIntentStore::new();
        let a = store.create(new_intent("s1")).await.unwrap();
        let b = store.create(new_intent("s2")).await.unwrap();
        let c = store.create(new_intent("s3")).await.unwrap();

        store.claim(a.id, "tx1").await.unwrap();
        for _ in 0..5 {
            store.increment_attempts(b.id).await.unwrap();
        }

        let pending = store.load_pending(5, 100).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, c.id);
    }
}
