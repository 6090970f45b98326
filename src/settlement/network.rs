//! External collaborators for outbound settlement: the USD price feed and the
//! custodial network RPC.
//!
//! Both are traits so the broadcaster can be driven by mocks in tests and in
//! `mock-api` deployments. The HTTP network client keeps a fallback endpoint
//! and retries unreachable calls against it before giving up.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::warn;

use super::error::SettlementError;

// ============================================================================
// Price feed
// ============================================================================

#[async_trait]
pub trait PriceFeed: Send + Sync {
    /// Current USD price of one native unit of the settlement asset.
    async fn usd_rate(&self) -> Result<Decimal, SettlementError>;
}

#[derive(Deserialize)]
struct RateResponse {
    usd: Decimal,
}

pub struct HttpPriceFeed {
    client: reqwest::Client,
    url: String,
}

impl HttpPriceFeed {
    pub fn new(url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            url,
        }
    }
}

#[async_trait]
impl PriceFeed for HttpPriceFeed {
    async fn usd_rate(&self) -> Result<Decimal, SettlementError> {
        let resp = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| SettlementError::PriceFeedUnavailable(e.to_string()))?;
        let body: RateResponse = resp
            .json()
            .await
            .map_err(|e| SettlementError::PriceFeedUnavailable(e.to_string()))?;
        if body.usd <= Decimal::ZERO {
            return Err(SettlementError::PriceFeedUnavailable(format!(
                "non-positive rate: {}",
                body.usd
            )));
        }
        Ok(body.usd)
    }
}

/// Fixed-rate feed for tests and mock deployments.
pub struct MockPriceFeed {
    rate: Decimal,
    unavailable: AtomicBool,
}

impl MockPriceFeed {
    pub fn new(rate: Decimal) -> Self {
        Self {
            rate,
            unavailable: AtomicBool::new(false),
        }
    }

    pub fn set_unavailable(&self, down: bool) {
        self.unavailable.store(down, Ordering::SeqCst);
    }
}

#[async_trait]
impl PriceFeed for MockPriceFeed {
    async fn usd_rate(&self) -> Result<Decimal, SettlementError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(SettlementError::PriceFeedUnavailable(
                "mock feed down".to_string(),
            ));
        }
        Ok(self.rate)
    }
}

// ============================================================================
// Custodial network RPC
// ============================================================================

#[async_trait]
pub trait CustodialNetwork: Send + Sync {
    /// Sequence number of the custodial sending account. Increments exactly
    /// once per accepted outbound transfer, which is what makes it usable as
    /// a confirmation signal.
    async fn sequence_number(&self) -> Result<i64, SettlementError>;

    /// Submit a transfer of `native_amount` units to `destination`. Returns
    /// the submission reference. Acceptance here does NOT mean the transfer
    /// landed; confirmation is by sequence-number movement.
    async fn submit_transfer(
        &self,
        destination: &str,
        native_amount: i64,
    ) -> Result<String, SettlementError>;

    fn validate_address(&self, address: &str) -> bool;
}

#[derive(Deserialize)]
struct SeqResponse {
    seqno: i64,
}

#[derive(Deserialize)]
struct SubmitResponse {
    tx_hash: String,
}

#[derive(serde::Serialize)]
struct SubmitRequest<'a> {
    destination: &'a str,
    amount: i64,
    signing_key: &'a str,
}

pub struct HttpCustodialNetwork {
    client: reqwest::Client,
    primary: String,
    fallback: Option<String>,
    signing_key: String,
}

impl HttpCustodialNetwork {
    pub fn new(primary: String, fallback: Option<String>, signing_key: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            primary,
            fallback,
            signing_key,
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
    ) -> Result<T, SettlementError> {
        match self.fetch_from(&self.primary, path).await {
            Ok(v) => Ok(v),
            Err(primary_err) => match &self.fallback {
                Some(fallback) => {
                    warn!(error = %primary_err, "primary RPC failed, trying fallback");
                    self.fetch_from(fallback, path).await
                }
                None => Err(primary_err),
            },
        }
    }

    async fn fetch_from<T: serde::de::DeserializeOwned>(
        &self,
        base: &str,
        path: &str,
    ) -> Result<T, SettlementError> {
        let resp = self
            .client
            .get(format!("{base}{path}"))
            .send()
            .await
            .map_err(|e| SettlementError::Broadcast(e.to_string()))?;
        resp.json()
            .await
            .map_err(|e| SettlementError::Broadcast(e.to_string()))
    }
}

#[async_trait]
impl CustodialNetwork for HttpCustodialNetwork {
    async fn sequence_number(&self) -> Result<i64, SettlementError> {
        let resp: SeqResponse = self.get_json("/wallet/seqno").await?;
        Ok(resp.seqno)
    }

    async fn submit_transfer(
        &self,
        destination: &str,
        native_amount: i64,
    ) -> Result<String, SettlementError> {
        let body = SubmitRequest {
            destination,
            amount: native_amount,
            signing_key: &self.signing_key,
        };
        let resp = self
            .client
            .post(format!("{}/wallet/transfer", self.primary))
            .json(&body)
            .send()
            .await
            .map_err(|e| SettlementError::Broadcast(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(SettlementError::Broadcast(format!(
                "transfer rejected: HTTP {}",
                resp.status()
            )));
        }
        let parsed: SubmitResponse = resp
            .json()
            .await
            .map_err(|e| SettlementError::Broadcast(e.to_string()))?;
        Ok(parsed.tx_hash)
    }

    fn validate_address(&self, address: &str) -> bool {
        is_plausible_address(address)
    }
}

fn is_plausible_address(address: &str) -> bool {
    address.len() == 48 && (address.starts_with("EQ") || address.starts_with("UQ"))
}

/// Scriptable network for tests: the sequence number is a plain counter and
/// the failure points can be toggled per call site.
pub struct MockCustodialNetwork {
    seq: AtomicI64,
    fail_submit: AtomicBool,
    fail_seq: AtomicBool,
    advance_on_submit: AtomicBool,
    submitted: std::sync::Mutex<Vec<(String, i64)>>,
}

impl MockCustodialNetwork {
    pub fn new() -> Self {
        Self {
            seq: AtomicI64::new(100),
            fail_submit: AtomicBool::new(false),
            fail_seq: AtomicBool::new(false),
            advance_on_submit: AtomicBool::new(true),
            submitted: std::sync::Mutex::new(Vec::new()),
        }
    }

    pub fn set_fail_submit(&self, fail: bool) {
        self.fail_submit.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_seq(&self, fail: bool) {
        self.fail_seq.store(fail, Ordering::SeqCst);
    }

    /// When false the sequence number never moves after submission, which
    /// forces a confirmation timeout.
    pub fn set_advance_on_submit(&self, advance: bool) {
        self.advance_on_submit.store(advance, Ordering::SeqCst);
    }

    pub fn advance_sequence(&self) {
        self.seq.fetch_add(1, Ordering::SeqCst);
    }

    pub fn submitted(&self) -> Vec<(String, i64)> {
        self.submitted.lock().unwrap().clone()
    }
}

impl Default for MockCustodialNetwork {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CustodialNetwork for MockCustodialNetwork {
    async fn sequence_number(&self) -> Result<i64, SettlementError> {
        if self.fail_seq.load(Ordering::SeqCst) {
            return Err(SettlementError::Broadcast("mock seqno down".to_string()));
        }
        Ok(self.seq.load(Ordering::SeqCst))
    }

    async fn submit_transfer(
        &self,
        destination: &str,
        native_amount: i64,
    ) -> Result<String, SettlementError> {
        if self.fail_submit.load(Ordering::SeqCst) {
            return Err(SettlementError::Broadcast("mock submit down".to_string()));
        }
        self.submitted
            .lock()
            .unwrap()
            .push((destination.to_string(), native_amount));
        if self.advance_on_submit.load(Ordering::SeqCst) {
            self.seq.fetch_add(1, Ordering::SeqCst);
        }
        Ok(format!("mocktx-{}", self.seq.load(Ordering::SeqCst)))
    }

    fn validate_address(&self, address: &str) -> bool {
        is_plausible_address(address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_validation() {
        assert!(is_plausible_address(
            "EQDrjaLahLkMB-hMCmkzOyBuHJ139ZUYmPHu6RRBKnbdLIYI"
        ));
        assert!(is_plausible_address(
            "UQDrjaLahLkMB-hMCmkzOyBuHJ139ZUYmPHu6RRBKnbdLNvN"
        ));
        assert!(!is_plausible_address("EQshort"));
        assert!(!is_plausible_address(
            "XXDrjaLahLkMB-hMCmkzOyBuHJ139ZUYmPHu6RRBKnbdLIYI"
        ));
    }

    #[tokio::test]
    async fn test_mock_network_sequence_moves_on_submit() {
        let net = MockCustodialNetwork::new();
        let before = net.sequence_number().await.unwrap();
        net.submit_transfer("EQdest", 1_000_000_000).await.unwrap();
        let after = net.sequence_number().await.unwrap();
        assert_eq!(after, before + 1);
        assert_eq!(net.submitted().len(), 1);
    }
}
