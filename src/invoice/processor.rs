//! Webhook Processor
//!
//! Order of operations is fixed: verify signature, parse, look up, take the
//! guard, credit. Anything after verification that fails maps to a 5xx so the
//! gateway retries; the guard makes those retries safe to replay.

use std::sync::Arc;
use tracing::{error, info, warn};

use super::error::InvoiceError;
use super::signature;
use super::store::InvoiceStore;
use super::types::InvoiceStatus;
use crate::ledger::{AccountRef, LedgerStore, OperationKind, WalletOperation};
use serde_json::Value;

/// What a verified delivery did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookOutcome {
    /// The guard was won and the wallet credited.
    Completed,
    /// Duplicate delivery of a completed invoice; nothing changed.
    Replay,
    /// Terminal failure status recorded; no credit.
    MarkedFailed,
    /// Non-terminal status (new/pending); recorded nothing.
    Ignored,
}

pub struct WebhookProcessor {
    store: Arc<dyn InvoiceStore>,
    ledger: Arc<dyn LedgerStore>,
    secret: String,
}

impl WebhookProcessor {
    pub fn new(store: Arc<dyn InvoiceStore>, ledger: Arc<dyn LedgerStore>, secret: String) -> Self {
        Self {
            store,
            ledger,
            secret,
        }
    }

    /// Apply one webhook delivery.
    pub async fn handle(&self, payload: Value) -> Result<WebhookOutcome, InvoiceError> {
        let fields = signature::verify_payload(&payload, &self.secret)?;

        let order_number = fields
            .get("order_number")
            .and_then(Value::as_str)
            .ok_or_else(|| InvoiceError::Malformed("missing order_number".into()))?
            .to_string();
        let status_str = fields
            .get("status")
            .and_then(Value::as_str)
            .ok_or_else(|| InvoiceError::Malformed("missing status".into()))?;
        let status = InvoiceStatus::parse(status_str)
            .ok_or_else(|| InvoiceError::Malformed(format!("unknown status: {}", status_str)))?;
        let txn_id = fields.get("txn_id").and_then(Value::as_str);

        match status {
            InvoiceStatus::Completed => {
                self.handle_completed(&order_number, txn_id, &payload).await
            }
            s if s.is_terminal_failure() => {
                // No balance mutation, no retry.
                if self.store.get(&order_number).await?.is_none() {
                    return Err(InvoiceError::UnknownInvoice(order_number));
                }
                self.store.mark_failed(&order_number, s, &payload).await?;
                info!(order_number = %order_number, status = %s, "Invoice marked terminal-failed");
                Ok(WebhookOutcome::MarkedFailed)
            }
            _ => Ok(WebhookOutcome::Ignored),
        }
    }

    async fn handle_completed(
        &self,
        order_number: &str,
        txn_id: Option<&str>,
        payload: &Value,
    ) -> Result<WebhookOutcome, InvoiceError> {
        let Some(invoice) = self.store.get(order_number).await? else {
            return Err(InvoiceError::UnknownInvoice(order_number.to_string()));
        };

        // The conditional update IS the idempotency guard. The credit happens
        // only when this call wins the status transition.
        if !self
            .store
            .complete_if_not_completed(order_number, txn_id, payload)
            .await?
        {
            info!(order_number = %order_number, "Duplicate completed delivery (no-op)");
            return Ok(WebhookOutcome::Replay);
        }

        match self
            .ledger
            .atomic_credit(AccountRef::wallet(invoice.user_id), invoice.amount_usd)
            .await
        {
            Ok(new_balance) => {
                info!(
                    order_number = %order_number,
                    user_id = invoice.user_id,
                    amount = %invoice.amount_usd,
                    new_balance = %new_balance,
                    "Invoice completed and credited"
                );

                let mut entry = WalletOperation::new(
                    invoice.user_id,
                    invoice.amount_usd,
                    OperationKind::Deposit,
                    format!("gateway invoice {}", order_number),
                );
                if let Some(txn_id) = txn_id {
                    entry = entry.with_tx_hash(txn_id);
                }
                if let Err(e) = self.ledger.append_operation(entry).await {
                    warn!(order_number = %order_number, error = %e, "Journal append failed for invoice");
                }

                Ok(WebhookOutcome::Completed)
            }
            Err(e) => {
                // Surrender the guard so the gateway's retry can credit.
                error!(
                    order_number = %order_number,
                    user_id = invoice.user_id,
                    error = %e,
                    "Credit failed after winning completion guard; reopening invoice"
                );
                self.store.reopen_completed(order_number).await?;
                Err(e.into())
            }
        }
    }
}
