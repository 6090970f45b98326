//! PostgreSQL Ledger Store
//!
//! Atomicity comes from single conditional UPDATE statements; the sufficiency
//! check lives in the WHERE clause, so a concurrent debit can never observe a
//! stale balance. Transfers lock both rows in ascending key order.

use sqlx::{PgPool, Row};

use super::store::{AccountRef, LedgerError, LedgerStore, OperationKind, UserId, WalletOperation};
use async_trait::async_trait;
use rust_decimal::Decimal;

pub struct PgLedgerStore {
    pool: PgPool,
}

impl PgLedgerStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LedgerStore for PgLedgerStore {
    async fn atomic_credit(
        &self,
        account: AccountRef,
        amount: Decimal,
    ) -> Result<Decimal, LedgerError> {
        if amount <= Decimal::ZERO {
            return Err(LedgerError::InvalidAmount);
        }

        let new_balance = sqlx::query_scalar::<_, Decimal>(
            r#"
            INSERT INTO balances_tb (user_id, balance_kind, available, version)
            VALUES ($1, $2, $3, 1)
            ON CONFLICT (user_id, balance_kind)
            DO UPDATE SET available = balances_tb.available + EXCLUDED.available,
                          version = balances_tb.version + 1
            RETURNING available
            "#,
        )
        .bind(account.user_id)
        .bind(account.balance.id())
        .bind(amount)
        .fetch_one(&self.pool)
        .await?;

        Ok(new_balance)
    }

    async fn atomic_debit_if_sufficient(
        &self,
        account: AccountRef,
        amount: Decimal,
    ) -> Result<Decimal, LedgerError> {
        if amount <= Decimal::ZERO {
            return Err(LedgerError::InvalidAmount);
        }

        let row = sqlx::query(
            r#"
            UPDATE balances_tb
            SET available = available - $1, version = version + 1
            WHERE user_id = $2 AND balance_kind = $3 AND available >= $1
            RETURNING available
            "#,
        )
        .bind(amount)
        .bind(account.user_id)
        .bind(account.balance.id())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(row.get::<Decimal, _>("available")),
            None => Err(LedgerError::InsufficientFunds),
        }
    }

    async fn atomic_transfer(
        &self,
        from: AccountRef,
        to: AccountRef,
        amount: Decimal,
    ) -> Result<(Decimal, Decimal), LedgerError> {
        if amount <= Decimal::ZERO {
            return Err(LedgerError::InvalidAmount);
        }

        let mut tx = self.pool.begin().await?;

        // Lock both rows in ascending key order so two opposing transfers
        // cannot deadlock each other.
        let mut keys = [
            (from.user_id, from.balance.id()),
            (to.user_id, to.balance.id()),
        ];
        keys.sort();
        for (user_id, kind) in keys {
            sqlx::query(
                "SELECT 1 FROM balances_tb WHERE user_id = $1 AND balance_kind = $2 FOR UPDATE",
            )
            .bind(user_id)
            .bind(kind)
            .fetch_optional(&mut *tx)
            .await?;
        }

        let debited = sqlx::query(
            r#"
            UPDATE balances_tb
            SET available = available - $1, version = version + 1
            WHERE user_id = $2 AND balance_kind = $3 AND available >= $1
            RETURNING available
            "#,
        )
        .bind(amount)
        .bind(from.user_id)
        .bind(from.balance.id())
        .fetch_optional(&mut *tx)
        .await?;

        let Some(debited) = debited else {
            tx.rollback().await?;
            return Err(LedgerError::InsufficientFunds);
        };

        let credited = sqlx::query_scalar::<_, Decimal>(
            r#"
            INSERT INTO balances_tb (user_id, balance_kind, available, version)
            VALUES ($1, $2, $3, 1)
            ON CONFLICT (user_id, balance_kind)
            DO UPDATE SET available = balances_tb.available + EXCLUDED.available,
                          version = balances_tb.version + 1
            RETURNING available
            "#,
        )
        .bind(to.user_id)
        .bind(to.balance.id())
        .bind(amount)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok((debited.get::<Decimal, _>("available"), credited))
    }

    async fn append_operation(&self, entry: WalletOperation) -> Result<(), LedgerError> {
        sqlx::query(
            r#"
            INSERT INTO wallet_operations_tb (user_id, amount, kind, description, tx_hash, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(entry.user_id)
        .bind(entry.amount)
        .bind(entry.kind.as_str())
        .bind(&entry.description)
        .bind(&entry.tx_hash)
        .bind(entry.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn recent_operations(
        &self,
        user_id: UserId,
        limit: u32,
    ) -> Result<Vec<WalletOperation>, LedgerError> {
        let rows = sqlx::query(
            r#"
            SELECT user_id, amount, kind, description, tx_hash, created_at
            FROM wallet_operations_tb
            WHERE user_id = $1
            ORDER BY created_at DESC
            LIMIT $2
            "#,
        )
        .bind(user_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut entries = Vec::with_capacity(rows.len());
        for row in rows {
            let kind_str: String = row.get("kind");
            let kind = OperationKind::parse(&kind_str)
                .ok_or_else(|| LedgerError::Database(format!("Invalid op kind: {}", kind_str)))?;
            entries.push(WalletOperation {
                user_id: row.get("user_id"),
                amount: row.get("amount"),
                kind,
                description: row.get("description"),
                tx_hash: row.get("tx_hash"),
                created_at: row.get("created_at"),
            });
        }

        Ok(entries)
    }
}
