//! Invoice persistence.
//!
//! `complete_if_not_completed` is the heart of the module: a conditional
//! update whose rows_affected result is the webhook idempotency guard.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use rust_decimal::Decimal;
use sqlx::{PgPool, Row};

use super::error::InvoiceError;
use super::types::{GatewayInvoice, InvoiceStatus};
use crate::ledger::UserId;

#[async_trait]
pub trait InvoiceStore: Send + Sync {
    /// Create a new invoice with a freshly allocated order number.
    async fn create(
        &self,
        user_id: UserId,
        amount_usd: Decimal,
    ) -> Result<GatewayInvoice, InvoiceError>;

    async fn get(&self, order_number: &str) -> Result<Option<GatewayInvoice>, InvoiceError>;

    /// The idempotency guard: set status to `completed` only if it is not
    /// already `completed`. Returns whether this call won the transition.
    async fn complete_if_not_completed(
        &self,
        order_number: &str,
        txn_id: Option<&str>,
        raw_payload: &serde_json::Value,
    ) -> Result<bool, InvoiceError>;

    /// Compensating revert used when the credit after a won guard fails, so
    /// the gateway's retry can take the guard again.
    async fn reopen_completed(&self, order_number: &str) -> Result<(), InvoiceError>;

    /// Record a terminal failure status. No balance mutation ever follows.
    async fn mark_failed(
        &self,
        order_number: &str,
        status: InvoiceStatus,
        raw_payload: &serde_json::Value,
    ) -> Result<(), InvoiceError>;
}

// === PostgreSQL implementation ===

pub struct PgInvoiceStore {
    pool: PgPool,
}

impl PgInvoiceStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_invoice(row: &sqlx::postgres::PgRow) -> Result<GatewayInvoice, InvoiceError> {
        let status_str: String = row.get("status");
        let status = InvoiceStatus::parse(&status_str)
            .ok_or_else(|| InvoiceError::Database(format!("Invalid status: {}", status_str)))?;
        Ok(GatewayInvoice {
            order_number: row.get("order_number"),
            user_id: row.get("user_id"),
            amount_usd: row.get("amount_usd"),
            status,
            txn_id: row.get("txn_id"),
            raw_payload: row.get("raw_payload"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
    }
}

#[async_trait]
impl InvoiceStore for PgInvoiceStore {
    async fn create(
        &self,
        user_id: UserId,
        amount_usd: Decimal,
    ) -> Result<GatewayInvoice, InvoiceError> {
        let order_number = uuid::Uuid::new_v4().to_string();
        let row = sqlx::query(
            r#"
            INSERT INTO gateway_invoices_tb (order_number, user_id, amount_usd, status, created_at, updated_at)
            VALUES ($1, $2, $3, 'new', NOW(), NOW())
            RETURNING order_number, user_id, amount_usd, status, txn_id, raw_payload, created_at, updated_at
            "#,
        )
        .bind(&order_number)
        .bind(user_id)
        .bind(amount_usd)
        .fetch_one(&self.pool)
        .await?;

        Self::row_to_invoice(&row)
    }

    async fn get(&self, order_number: &str) -> Result<Option<GatewayInvoice>, InvoiceError> {
        let row = sqlx::query(
            r#"
            SELECT order_number, user_id, amount_usd, status, txn_id, raw_payload, created_at, updated_at
            FROM gateway_invoices_tb
            WHERE order_number = $1
            "#,
        )
        .bind(order_number)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_invoice).transpose()
    }

    async fn complete_if_not_completed(
        &self,
        order_number: &str,
        txn_id: Option<&str>,
        raw_payload: &serde_json::Value,
    ) -> Result<bool, InvoiceError> {
        let result = sqlx::query(
            r#"
            UPDATE gateway_invoices_tb
            SET status = 'completed', txn_id = $1, raw_payload = $2, updated_at = NOW()
            WHERE order_number = $3 AND status != 'completed'
            "#,
        )
        .bind(txn_id)
        .bind(raw_payload)
        .bind(order_number)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn reopen_completed(&self, order_number: &str) -> Result<(), InvoiceError> {
        sqlx::query(
            r#"
            UPDATE gateway_invoices_tb
            SET status = 'pending', updated_at = NOW()
            WHERE order_number = $1 AND status = 'completed'
            "#,
        )
        .bind(order_number)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_failed(
        &self,
        order_number: &str,
        status: InvoiceStatus,
        raw_payload: &serde_json::Value,
    ) -> Result<(), InvoiceError> {
        sqlx::query(
            r#"
            UPDATE gateway_invoices_tb
            SET status = $1, raw_payload = $2, updated_at = NOW()
            WHERE order_number = $3 AND status != 'completed'
            "#,
        )
        .bind(status.as_str())
        .bind(raw_payload)
        .bind(order_number)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

// === In-memory implementation ===

#[derive(Default)]
pub struct MemInvoiceStore {
    invoices: DashMap<String, GatewayInvoice>,
}

impl MemInvoiceStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl InvoiceStore for MemInvoiceStore {
    async fn create(
        &self,
        user_id: UserId,
        amount_usd: Decimal,
    ) -> Result<GatewayInvoice, InvoiceError> {
        let now = Utc::now();
        let invoice = GatewayInvoice {
            order_number: uuid::Uuid::new_v4().to_string(),
            user_id,
            amount_usd,
            status: InvoiceStatus::New,
            txn_id: None,
            raw_payload: None,
            created_at: now,
            updated_at: now,
        };
        self.invoices
            .insert(invoice.order_number.clone(), invoice.clone());
        Ok(invoice)
    }

    async fn get(&self, order_number: &str) -> Result<Option<GatewayInvoice>, InvoiceError> {
        Ok(self.invoices.get(order_number).map(|e| e.value().clone()))
    }

    async fn complete_if_not_completed(
        &self,
        order_number: &str,
        txn_id: Option<&str>,
        raw_payload: &serde_json::Value,
    ) -> Result<bool, InvoiceError> {
        match self.invoices.get_mut(order_number) {
            Some(mut entry) if entry.status != InvoiceStatus::Completed => {
                entry.status = InvoiceStatus::Completed;
                entry.txn_id = txn_id.map(str::to_string);
                entry.raw_payload = Some(raw_payload.clone());
                entry.updated_at = Utc::now();
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Ok(false),
        }
    }

    async fn reopen_completed(&self, order_number: &str) -> Result<(), InvoiceError> {
        if let Some(mut entry) = self.invoices.get_mut(order_number)
            && entry.status == InvoiceStatus::Completed
        {
            entry.status = InvoiceStatus::Pending;
            entry.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn mark_failed(
        &self,
        order_number: &str,
        status: InvoiceStatus,
        raw_payload: &serde_json::Value,
    ) -> Result<(), InvoiceError> {
        if let Some(mut entry) = self.invoices.get_mut(order_number)
            && entry.status != InvoiceStatus::Completed
        {
            entry.status = status;
            entry.raw_payload = Some(raw_payload.clone());
            entry.updated_at = Utc::now();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_completion_guard_wins_once() {
        let store = MemInvoiceStore::new();
        let invoice = store.create(1, Decimal::new(500, 2)).await.unwrap();
        let payload = json!({"status": "completed"});

        assert!(
            store
                .complete_if_not_completed(&invoice.order_number, Some("gw-1"), &payload)
                .await
                .unwrap()
        );
        assert!(
            !store
                .complete_if_not_completed(&invoice.order_number, Some("gw-1"), &payload)
                .await
                .unwrap()
        );

        let row = store.get(&invoice.order_number).await.unwrap().unwrap();
        assert_eq!(row.status, InvoiceStatus::Completed);
        assert_eq!(row.txn_id.as_deref(), Some("gw-1"));
    }

    #[tokio::test]
    async fn test_mark_failed_never_downgrades_completed() {
        let store = MemInvoiceStore::new();
        let invoice = store.create(1, Decimal::new(500, 2)).await.unwrap();
        let payload = json!({"status": "completed"});

        store
            .complete_if_not_completed(&invoice.order_number, None, &payload)
            .await
            .unwrap();
        store
            .mark_failed(&invoice.order_number, InvoiceStatus::Expired, &payload)
            .await
            .unwrap();

        let row = store.get(&invoice.order_number).await.unwrap().unwrap();
        assert_eq!(row.status, InvoiceStatus::Completed);
    }

    #[tokio::test]
    async fn test_reopen_allows_guard_retry() {
        let store = MemInvoiceStore::new();
        let invoice = store.create(1, Decimal::new(500, 2)).await.unwrap();
        let payload = json!({"status": "completed"});

        store
            .complete_if_not_completed(&invoice.order_number, None, &payload)
            .await
            .unwrap();
        store.reopen_completed(&invoice.order_number).await.unwrap();
        assert!(
            store
                .complete_if_not_completed(&invoice.order_number, None, &payload)
                .await
                .unwrap()
        );
    }
}
