//! Outbound settlement flow: validate, debit, broadcast, confirm, and
//! compensate on failure.

use std::sync::Arc;
use std::time::Duration;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use tracing::{error, info, warn};

use crate::ledger::{AccountRef, LedgerStore, OperationKind, WalletOperation};

use super::error::SettlementError;
use super::network::{CustodialNetwork, PriceFeed};
use super::state::SettlementState;
use super::store::SettlementStore;
use super::types::{SettlementRecord, SettlementRequest};

const NANO_PER_UNIT: i64 = 1_000_000_000;

#[derive(Debug, Clone)]
pub struct BroadcasterConfig {
    /// Flat network fee added on top of the converted amount, in native
    /// nano-units.
    pub network_fee_native: i64,
    /// Delay between confirmation polls.
    pub confirm_interval: Duration,
    /// Polls before the send is declared timed out and compensated.
    pub confirm_max_attempts: u32,
}

impl Default for BroadcasterConfig {
    fn default() -> Self {
        Self {
            network_fee_native: 10_000_000,
            confirm_interval: Duration::from_millis(3000),
            confirm_max_attempts: 20,
        }
    }
}

pub struct SettlementBroadcaster {
    store: Arc<dyn SettlementStore>,
    ledger: Arc<dyn LedgerStore>,
    price_feed: Arc<dyn PriceFeed>,
    network: Arc<dyn CustodialNetwork>,
    config: BroadcasterConfig,
}

impl SettlementBroadcaster {
    pub fn new(
        store: Arc<dyn SettlementStore>,
        ledger: Arc<dyn LedgerStore>,
        price_feed: Arc<dyn PriceFeed>,
        network: Arc<dyn CustodialNetwork>,
        config: BroadcasterConfig,
    ) -> Self {
        Self {
            store,
            ledger,
            price_feed,
            network,
            config,
        }
    }

    /// Full settlement flow. Returns the terminal record: CONFIRMED on
    /// success, or the error after compensation has restored the wallet.
    pub async fn submit(
        &self,
        req: SettlementRequest,
    ) -> Result<SettlementRecord, SettlementError> {
        // Validation rejects before any row or balance is touched.
        if req.user_id <= 0 {
            return Err(SettlementError::Unauthorized);
        }
        if req.amount_usd <= Decimal::ZERO {
            return Err(SettlementError::InvalidAmount);
        }
        if !self.network.validate_address(&req.destination) {
            return Err(SettlementError::InvalidAddress);
        }

        // Client idempotency key: a replayed request returns the existing
        // settlement instead of debiting twice.
        if let Some(cid) = &req.cid {
            if let Some(existing) = self.store.get_by_cid(cid).await? {
                info!(settlement_id = %existing.id, cid = %cid, "duplicate cid, returning existing settlement");
                return Ok(existing);
            }
        }

        let record = SettlementRecord::new(&req);
        self.store.create(&record).await?;
        info!(settlement_id = %record.id, user_id = req.user_id,
              amount_usd = %req.amount_usd, "settlement requested");

        // Debit first. Insufficient funds is a terminal reject with nothing
        // to compensate.
        let wallet = AccountRef::wallet(req.user_id);
        match self
            .ledger
            .atomic_debit_if_sufficient(wallet, req.amount_usd)
            .await
        {
            Ok(_) => {}
            Err(e) => {
                self.store.set_error(&record.id, &e.to_string()).await?;
                self.store
                    .update_state_if(
                        &record.id,
                        SettlementState::Requested,
                        SettlementState::FailedRolledBack,
                    )
                    .await?;
                return Err(e.into());
            }
        }

        // Persist the debit before any external call. If this write fails we
        // are in the one window the recovery sweep cannot see, so refund
        // immediately.
        if !self
            .store
            .mark_debited(&record.id, req.amount_usd)
            .await
            .unwrap_or(false)
        {
            error!(settlement_id = %record.id, "failed to persist debit, refunding");
            self.ledger.atomic_credit(wallet, req.amount_usd).await?;
            return Err(SettlementError::Database(
                "could not persist debit state".to_string(),
            ));
        }

        match self.drive(&record.id, &req, req.amount_usd).await {
            Ok(rec) => Ok(rec),
            Err(e) => {
                self.compensate(&record.id, req.user_id, req.amount_usd, &e, false)
                    .await?;
                Err(e)
            }
        }
    }

    /// Everything after the debit is persisted: convert, broadcast, confirm.
    /// Any error here is compensated by the caller.
    async fn drive(
        &self,
        id: &str,
        req: &SettlementRequest,
        debited: Decimal,
    ) -> Result<SettlementRecord, SettlementError> {
        if !self
            .store
            .update_state_if(id, SettlementState::Debited, SettlementState::Broadcasting)
            .await?
        {
            // The recovery sweep already owns this row.
            return Err(SettlementError::Database(
                "settlement taken over by recovery".to_string(),
            ));
        }

        let rate = self.price_feed.usd_rate().await?;
        let native_amount = usd_to_native(debited, rate, self.config.network_fee_native)?;

        // Sequence snapshot must precede submission or the confirmation
        // signal is meaningless.
        let pre_seq = self.network.sequence_number().await?;
        self.store
            .set_broadcast_fields(id, native_amount, pre_seq)
            .await?;

        let tx_hash = self
            .network
            .submit_transfer(&req.destination, native_amount)
            .await?;
        self.store.set_tx_hash(id, &tx_hash).await?;
        info!(settlement_id = %id, tx_hash = %tx_hash, native_amount,
              pre_seq, "settlement broadcast");

        if !self
            .store
            .update_state_if(id, SettlementState::Broadcasting, SettlementState::Confirming)
            .await?
        {
            return Err(SettlementError::Database(
                "settlement taken over by recovery".to_string(),
            ));
        }

        self.await_confirmation(pre_seq).await?;

        self.finalize_confirmed(id, req.user_id, debited, &tx_hash)
            .await
    }

    /// Poll the custodial account sequence number until it moves past the
    /// pre-submission snapshot.
    async fn await_confirmation(&self, pre_seq: i64) -> Result<(), SettlementError> {
        for attempt in 0..self.config.confirm_max_attempts {
            if attempt > 0 {
                tokio::time::sleep(self.config.confirm_interval).await;
            }
            match self.network.sequence_number().await {
                Ok(seq) if seq != pre_seq => return Ok(()),
                Ok(_) => {}
                // Transient poll failures use up attempts but do not abort
                // the wait.
                Err(e) => warn!(error = %e, attempt, "confirmation poll failed"),
            }
        }
        Err(SettlementError::ConfirmationTimeout)
    }

    async fn finalize_confirmed(
        &self,
        id: &str,
        user_id: i64,
        debited: Decimal,
        tx_hash: &str,
    ) -> Result<SettlementRecord, SettlementError> {
        let entry = WalletOperation::new(
            user_id,
            -debited,
            OperationKind::Send,
            format!("outbound settlement {id}"),
        )
        .with_tx_hash(tx_hash);
        if let Err(e) = self.ledger.append_operation(entry).await {
            warn!(settlement_id = %id, error = %e, "journal append failed for confirmed settlement");
        }

        self.store
            .update_state_if(id, SettlementState::Confirming, SettlementState::Confirmed)
            .await?;
        info!(settlement_id = %id, "settlement confirmed");

        self.store
            .get(id)
            .await?
            .ok_or_else(|| SettlementError::NotFound(id.to_string()))
    }

    /// Refund exactly what was debited and park the row terminally. A failed
    /// refund leaves the row in ROLLING_BACK so the recovery sweep retries.
    ///
    /// The credit is only issued by whoever wins the CAS into ROLLING_BACK
    /// (or, with `retry_rollback`, by the sweep retrying a stuck refund), so
    /// a crashed submitter and the sweep never refund the same row twice.
    async fn compensate(
        &self,
        id: &str,
        user_id: i64,
        debited: Decimal,
        cause: &SettlementError,
        retry_rollback: bool,
    ) -> Result<(), SettlementError> {
        warn!(settlement_id = %id, error = %cause, "settlement failed, compensating");
        self.store.set_error(id, &cause.to_string()).await?;

        // From whichever in-flight state the failure hit.
        let mut owned = false;
        for from in [
            SettlementState::Debited,
            SettlementState::Broadcasting,
            SettlementState::Confirming,
        ] {
            if self
                .store
                .update_state_if(id, from, SettlementState::RollingBack)
                .await?
            {
                owned = true;
                break;
            }
        }
        if !owned {
            let still_rolling_back = matches!(
                self.store.get(id).await?,
                Some(row) if row.state == SettlementState::RollingBack
            );
            if !(retry_rollback && still_rolling_back) {
                warn!(settlement_id = %id, "rollback owned by another writer, skipping refund");
                return Ok(());
            }
        }

        match self
            .ledger
            .atomic_credit(AccountRef::wallet(user_id), debited)
            .await
        {
            Ok(_) => {
                let entry = WalletOperation::new(
                    user_id,
                    debited,
                    OperationKind::SendFailed,
                    format!("settlement {id} refund: {cause}"),
                );
                if let Err(e) = self.ledger.append_operation(entry).await {
                    warn!(settlement_id = %id, error = %e, "journal append failed for refund");
                }
                self.store
                    .update_state_if(
                        id,
                        SettlementState::RollingBack,
                        SettlementState::FailedRolledBack,
                    )
                    .await?;
                info!(settlement_id = %id, amount = %debited, "settlement compensated");
                Ok(())
            }
            Err(e) => {
                error!(settlement_id = %id, amount = %debited, error = %e,
                       "COMPENSATION FAILED, row left in rolling_back for recovery");
                Err(SettlementError::CompensationFailed(e.to_string()))
            }
        }
    }

    /// Drive one stale row to a terminal state. Called by the recovery
    /// worker; safe to call concurrently with a crashed submitter because
    /// every transition is a CAS.
    pub async fn recover(&self, record: &SettlementRecord) -> Result<(), SettlementError> {
        self.store.increment_retry(&record.id).await?;
        match record.state {
            // Crashed before the debit was persisted; nothing to refund.
            SettlementState::Requested => {
                self.store
                    .set_error(&record.id, "stale before debit")
                    .await?;
                self.store
                    .update_state_if(
                        &record.id,
                        SettlementState::Requested,
                        SettlementState::FailedRolledBack,
                    )
                    .await?;
                Ok(())
            }
            // Debited but never broadcast, or a refund that did not finish.
            SettlementState::Debited | SettlementState::RollingBack => {
                self.recover_refund(record).await
            }
            // Possibly broadcast. One conservative probe: a moved sequence
            // number means the transfer landed, otherwise refund.
            SettlementState::Broadcasting | SettlementState::Confirming => {
                match (record.pre_seq, self.network.sequence_number().await) {
                    (Some(pre_seq), Ok(now)) if now != pre_seq => {
                        info!(settlement_id = %record.id, pre_seq, seq = now,
                              "stale settlement confirmed by sequence probe");
                        let debited = record
                            .debited_amount
                            .ok_or_else(|| {
                                SettlementError::Database("confirming row missing debit".into())
                            })?;
                        // Skip Broadcasting rows straight through Confirming.
                        self.store
                            .update_state_if(
                                &record.id,
                                SettlementState::Broadcasting,
                                SettlementState::Confirming,
                            )
                            .await?;
                        let tx_hash = record.tx_hash.clone().unwrap_or_default();
                        self.finalize_confirmed(&record.id, record.user_id, debited, &tx_hash)
                            .await?;
                        Ok(())
                    }
                    _ => self.recover_refund(record).await,
                }
            }
            SettlementState::Confirmed | SettlementState::FailedRolledBack => Ok(()),
        }
    }

    async fn recover_refund(&self, record: &SettlementRecord) -> Result<(), SettlementError> {
        let debited = record.debited_amount.ok_or_else(|| {
            SettlementError::Database(format!("row {} in {} without debit", record.id, record.state))
        })?;
        let cause = SettlementError::Broadcast(format!(
            "recovery sweep rolled back stale {} settlement",
            record.state
        ));
        self.compensate(&record.id, record.user_id, debited, &cause, true)
            .await
    }
}

/// USD amount to native nano-units at `rate` USD per whole native unit, plus
/// the flat network fee.
fn usd_to_native(
    amount_usd: Decimal,
    rate: Decimal,
    fee_native: i64,
) -> Result<i64, SettlementError> {
    let units = amount_usd / rate;
    let nanos = (units * Decimal::from(NANO_PER_UNIT)).round();
    let nanos = nanos
        .to_i64()
        .ok_or_else(|| SettlementError::InvalidAmount)?;
    if nanos <= 0 {
        return Err(SettlementError::InvalidAmount);
    }
    Ok(nanos + fee_native)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::MemLedgerStore;
    use crate::settlement::network::{MockCustodialNetwork, MockPriceFeed};
    use crate::settlement::store::MemSettlementStore;

    struct Fixture {
        store: Arc<MemSettlementStore>,
        ledger: Arc<MemLedgerStore>,
        feed: Arc<MockPriceFeed>,
        network: Arc<MockCustodialNetwork>,
        broadcaster: SettlementBroadcaster,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemSettlementStore::new());
        let ledger = Arc::new(MemLedgerStore::new());
        let feed = Arc::new(MockPriceFeed::new(Decimal::new(500, 2)));
        let network = Arc::new(MockCustodialNetwork::new());
        let broadcaster = SettlementBroadcaster::new(
            store.clone(),
            ledger.clone(),
            feed.clone(),
            network.clone(),
            BroadcasterConfig {
                network_fee_native: 10_000_000,
                confirm_interval: Duration::from_millis(1),
                confirm_max_attempts: 3,
            },
        );
        Fixture {
            store,
            ledger,
            feed,
            network,
            broadcaster,
        }
    }

    fn request(amount: Decimal) -> SettlementRequest {
        SettlementRequest {
            user_id: 7,
            amount_usd: amount,
            destination: "EQDrjaLahLkMB-hMCmkzOyBuHJ139ZUYmPHu6RRBKnbdLIYI".to_string(),
            cid: None,
        }
    }

    #[tokio::test]
    async fn test_success_path() {
        let f = fixture();
        f.ledger
            .set_balance(AccountRef::wallet(7), Decimal::new(10000, 2));

        let rec = f
            .broadcaster
            .submit(request(Decimal::new(2500, 2)))
            .await
            .unwrap();

        assert_eq!(rec.state, SettlementState::Confirmed);
        assert!(rec.tx_hash.is_some());
        // 25 USD at 5 USD/unit = 5 units = 5e9 nanos, plus the fee.
        assert_eq!(rec.native_amount, Some(5_000_000_000 + 10_000_000));
        assert_eq!(
            f.ledger.balance_of(AccountRef::wallet(7)),
            Decimal::new(7500, 2)
        );
        let sends: Vec<_> = f
            .ledger
            .journal()
            .into_iter()
            .filter(|op| op.kind == OperationKind::Send)
            .collect();
        assert_eq!(sends.len(), 1);
        assert_eq!(sends[0].amount, Decimal::new(-2500, 2));
    }

    #[tokio::test]
    async fn test_insufficient_funds_rejects_without_mutation() {
        let f = fixture();
        f.ledger
            .set_balance(AccountRef::wallet(7), Decimal::new(1000, 2));

        let err = f
            .broadcaster
            .submit(request(Decimal::new(2500, 2)))
            .await
            .unwrap_err();

        assert!(matches!(err, SettlementError::InsufficientFunds));
        assert_eq!(
            f.ledger.balance_of(AccountRef::wallet(7)),
            Decimal::new(1000, 2)
        );
        assert!(f.network.submitted().is_empty());
        assert!(f.ledger.journal().is_empty());
    }

    #[tokio::test]
    async fn test_validation_rejects_before_any_row() {
        let f = fixture();
        f.ledger
            .set_balance(AccountRef::wallet(7), Decimal::new(10000, 2));

        let mut bad_addr = request(Decimal::new(2500, 2));
        bad_addr.destination = "not-an-address".to_string();
        assert!(matches!(
            f.broadcaster.submit(bad_addr).await.unwrap_err(),
            SettlementError::InvalidAddress
        ));

        assert!(matches!(
            f.broadcaster.submit(request(Decimal::ZERO)).await.unwrap_err(),
            SettlementError::InvalidAmount
        ));

        let mut anon = request(Decimal::new(2500, 2));
        anon.user_id = 0;
        assert!(matches!(
            f.broadcaster.submit(anon).await.unwrap_err(),
            SettlementError::Unauthorized
        ));

        assert_eq!(
            f.ledger.balance_of(AccountRef::wallet(7)),
            Decimal::new(10000, 2)
        );
    }

    #[tokio::test]
    async fn test_confirmation_timeout_restores_exact_balance() {
        let f = fixture();
        f.ledger
            .set_balance(AccountRef::wallet(7), Decimal::new(10000, 2));
        f.network.set_advance_on_submit(false);

        let err = f
            .broadcaster
            .submit(request(Decimal::new(2500, 2)))
            .await
            .unwrap_err();

        assert!(matches!(err, SettlementError::ConfirmationTimeout));
        assert_eq!(
            f.ledger.balance_of(AccountRef::wallet(7)),
            Decimal::new(10000, 2)
        );
        let rows = f.store.find_stale(0, 10).await.unwrap();
        assert!(rows.is_empty(), "timed-out row must be terminal");
        let refunds: Vec<_> = f
            .ledger
            .journal()
            .into_iter()
            .filter(|op| op.kind == OperationKind::SendFailed)
            .collect();
        assert_eq!(refunds.len(), 1);
        assert_eq!(refunds[0].amount, Decimal::new(2500, 2));
    }

    #[tokio::test]
    async fn test_broadcast_failure_compensates() {
        let f = fixture();
        f.ledger
            .set_balance(AccountRef::wallet(7), Decimal::new(10000, 2));
        f.network.set_fail_submit(true);

        let err = f
            .broadcaster
            .submit(request(Decimal::new(2500, 2)))
            .await
            .unwrap_err();

        assert!(matches!(err, SettlementError::Broadcast(_)));
        assert_eq!(
            f.ledger.balance_of(AccountRef::wallet(7)),
            Decimal::new(10000, 2)
        );
    }

    #[tokio::test]
    async fn test_price_feed_down_compensates() {
        let f = fixture();
        f.ledger
            .set_balance(AccountRef::wallet(7), Decimal::new(10000, 2));
        f.feed.set_unavailable(true);

        let err = f
            .broadcaster
            .submit(request(Decimal::new(2500, 2)))
            .await
            .unwrap_err();

        assert!(matches!(err, SettlementError::PriceFeedUnavailable(_)));
        assert_eq!(
            f.ledger.balance_of(AccountRef::wallet(7)),
            Decimal::new(10000, 2)
        );
        assert!(f.network.submitted().is_empty());
    }

    #[tokio::test]
    async fn test_cid_dedupe_returns_existing() {
        let f = fixture();
        f.ledger
            .set_balance(AccountRef::wallet(7), Decimal::new(10000, 2));

        let mut req = request(Decimal::new(2500, 2));
        req.cid = Some("idem-key-1".to_string());
        let first = f.broadcaster.submit(req.clone()).await.unwrap();
        let second = f.broadcaster.submit(req).await.unwrap();

        assert_eq!(first.id, second.id);
        // Only one debit happened.
        assert_eq!(
            f.ledger.balance_of(AccountRef::wallet(7)),
            Decimal::new(7500, 2)
        );
    }

    #[tokio::test]
    async fn test_recover_stale_debited_refunds() {
        let f = fixture();
        f.ledger
            .set_balance(AccountRef::wallet(7), Decimal::new(10000, 2));

        // Simulate a crash right after the debit was persisted.
        let req = request(Decimal::new(4000, 2));
        let rec = SettlementRecord::new(&req);
        f.store.create(&rec).await.unwrap();
        f.ledger
            .atomic_debit_if_sufficient(AccountRef::wallet(7), req.amount_usd)
            .await
            .unwrap();
        f.store.mark_debited(&rec.id, req.amount_usd).await.unwrap();
        f.store.backdate(&rec.id, 600);

        let stale = f.store.find_stale(300, 10).await.unwrap();
        assert_eq!(stale.len(), 1);
        f.broadcaster.recover(&stale[0]).await.unwrap();

        assert_eq!(
            f.ledger.balance_of(AccountRef::wallet(7)),
            Decimal::new(10000, 2)
        );
        let row = f.store.get(&rec.id).await.unwrap().unwrap();
        assert_eq!(row.state, SettlementState::FailedRolledBack);
        assert_eq!(row.retry_count, 1);
    }

    #[tokio::test]
    async fn test_recover_confirming_with_moved_sequence_confirms() {
        let f = fixture();
        f.ledger
            .set_balance(AccountRef::wallet(7), Decimal::new(10000, 2));

        // Crash after broadcast, before the confirm loop finished. The
        // sequence has moved, so the transfer actually landed.
        let req = request(Decimal::new(2500, 2));
        let rec = SettlementRecord::new(&req);
        f.store.create(&rec).await.unwrap();
        f.ledger
            .atomic_debit_if_sufficient(AccountRef::wallet(7), req.amount_usd)
            .await
            .unwrap();
        f.store.mark_debited(&rec.id, req.amount_usd).await.unwrap();
        f.store
            .update_state_if(&rec.id, SettlementState::Debited, SettlementState::Broadcasting)
            .await
            .unwrap();
        let pre_seq = f.network.sequence_number().await.unwrap();
        f.store
            .set_broadcast_fields(&rec.id, 5_010_000_000, pre_seq)
            .await
            .unwrap();
        f.store.set_tx_hash(&rec.id, "tx-abc").await.unwrap();
        f.network.advance_sequence();
        f.store.backdate(&rec.id, 600);

        let stale = f.store.find_stale(300, 10).await.unwrap();
        f.broadcaster.recover(&stale[0]).await.unwrap();

        let row = f.store.get(&rec.id).await.unwrap().unwrap();
        assert_eq!(row.state, SettlementState::Confirmed);
        // Confirmed means the debit stands.
        assert_eq!(
            f.ledger.balance_of(AccountRef::wallet(7)),
            Decimal::new(7500, 2)
        );
    }

    #[tokio::test]
    async fn test_recover_broadcasting_without_sequence_motion_refunds() {
        let f = fixture();
        f.ledger
            .set_balance(AccountRef::wallet(7), Decimal::new(10000, 2));

        let req = request(Decimal::new(2500, 2));
        let rec = SettlementRecord::new(&req);
        f.store.create(&rec).await.unwrap();
        f.ledger
            .atomic_debit_if_sufficient(AccountRef::wallet(7), req.amount_usd)
            .await
            .unwrap();
        f.store.mark_debited(&rec.id, req.amount_usd).await.unwrap();
        f.store
            .update_state_if(&rec.id, SettlementState::Debited, SettlementState::Broadcasting)
            .await
            .unwrap();
        let pre_seq = f.network.sequence_number().await.unwrap();
        f.store
            .set_broadcast_fields(&rec.id, 5_010_000_000, pre_seq)
            .await
            .unwrap();
        f.store.backdate(&rec.id, 600);

        let stale = f.store.find_stale(300, 10).await.unwrap();
        f.broadcaster.recover(&stale[0]).await.unwrap();

        let row = f.store.get(&rec.id).await.unwrap().unwrap();
        assert_eq!(row.state, SettlementState::FailedRolledBack);
        assert_eq!(
            f.ledger.balance_of(AccountRef::wallet(7)),
            Decimal::new(10000, 2)
        );
    }

    #[test]
    fn test_usd_to_native_rounding() {
        let rate = Decimal::new(500, 2);
        assert_eq!(
            usd_to_native(Decimal::new(2500, 2), rate, 0).unwrap(),
            5_000_000_000
        );
        // 0.01 USD at 5 USD/unit = 0.002 units = 2_000_000 nanos.
        assert_eq!(
            usd_to_native(Decimal::new(1, 2), rate, 0).unwrap(),
            2_000_000
        );
        assert!(usd_to_native(Decimal::ZERO, rate, 0).is_err());
    }
}
