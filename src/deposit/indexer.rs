//! Blockchain indexer client.
//!
//! One bounded call per matcher run fetches the recent incoming transactions
//! for the platform's receiving address.

use async_trait::async_trait;
use serde::Deserialize;
use std::fmt::Debug;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use super::error::DepositError;

/// An incoming transaction as reported by the indexer.
#[derive(Debug, Clone)]
pub struct IndexedTx {
    pub hash: String,
    pub from: String,
    /// Value in native units (nanotons).
    pub value: i64,
}

#[async_trait]
pub trait ChainIndexer: Send + Sync + Debug {
    /// Fetch up to `limit` recent incoming transactions for `address`.
    async fn recent_transactions(
        &self,
        address: &str,
        limit: u32,
    ) -> Result<Vec<IndexedTx>, DepositError>;
}

// === HTTP implementation (TON-style indexer API) ===

#[derive(Debug, Deserialize)]
struct TxListResponse {
    ok: bool,
    #[serde(default)]
    result: Vec<RawTx>,
}

#[derive(Debug, Deserialize)]
struct RawTx {
    transaction_id: RawTxId,
    in_msg: Option<RawInMsg>,
}

#[derive(Debug, Deserialize)]
struct RawTxId {
    hash: String,
}

#[derive(Debug, Deserialize)]
struct RawInMsg {
    #[serde(default)]
    source: String,
    #[serde(default)]
    value: String,
}

#[derive(Debug)]
pub struct HttpChainIndexer {
    http: reqwest::Client,
    base_url: String,
}

impl HttpChainIndexer {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl ChainIndexer for HttpChainIndexer {
    async fn recent_transactions(
        &self,
        address: &str,
        limit: u32,
    ) -> Result<Vec<IndexedTx>, DepositError> {
        let url = format!("{}/getTransactions", self.base_url);
        let resp = self
            .http
            .get(&url)
            .query(&[("address", address), ("limit", &limit.to_string())])
            .send()
            .await?
            .error_for_status()?
            .json::<TxListResponse>()
            .await?;

        if !resp.ok {
            return Err(DepositError::ExternalUnavailable(
                "indexer returned ok=false".to_string(),
            ));
        }

        let mut txs = Vec::with_capacity(resp.result.len());
        for raw in resp.result {
            // Outgoing and system transactions have no inbound message.
            let Some(in_msg) = raw.in_msg else { continue };
            if in_msg.source.is_empty() {
                continue;
            }
            let Ok(value) = in_msg.value.parse::<i64>() else {
                tracing::warn!(
                    tx_hash = %raw.transaction_id.hash,
                    value = %in_msg.value,
                    "Skipping transaction with unparsable value"
                );
                continue;
            };
            txs.push(IndexedTx {
                hash: raw.transaction_id.hash,
                from: in_msg.source,
                value,
            });
        }

        Ok(txs)
    }
}

// === Mock implementation ===

/// Mock indexer for tests and mock-mode wiring.
#[derive(Debug, Default)]
pub struct MockChainIndexer {
    txs: Mutex<Vec<IndexedTx>>,
    unavailable: AtomicBool,
}

impl MockChainIndexer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_tx(&self, tx: IndexedTx) {
        self.txs.lock().unwrap().push(tx);
    }

    pub fn set_unavailable(&self, down: bool) {
        self.unavailable.store(down, Ordering::SeqCst);
    }
}

#[async_trait]
impl ChainIndexer for MockChainIndexer {
    async fn recent_transactions(
        &self,
        _address: &str,
        limit: u32,
    ) -> Result<Vec<IndexedTx>, DepositError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(DepositError::ExternalUnavailable(
                "mock indexer down".to_string(),
            ));
        }
        let txs = self.txs.lock().unwrap();
        Ok(txs.iter().take(limit as usize).cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_indexer_window_limit() {
        let indexer = MockChainIndexer::new();
        for i in 0..5 {
            indexer.push_tx(IndexedTx {
                hash: format!("h{}", i),
                from: "EQsender".to_string(),
                value: 100 + i,
            });
        }

        let txs = indexer.recent_transactions("EQplatform", 3).await.unwrap();
        assert_eq!(txs.len(), 3);
    }

    #[tokio::test]
    async fn test_mock_indexer_unavailable() {
        let indexer = MockChainIndexer::new();
        indexer.set_unavailable(true);
        let err = indexer
            .recent_transactions("EQplatform", 10)
            .await
            .unwrap_err();
        assert!(matches!(err, DepositError::ExternalUnavailable(_)));
    }
}
