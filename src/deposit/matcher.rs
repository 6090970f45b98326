//! Deposit Matcher job.
//!
//! One run: take the lease, load pending intents oldest first, fetch one
//! bounded window of recent transactions, match, claim, credit. A failure on
//! one intent never aborts the batch; an indexer failure aborts the whole run
//! without incrementing any attempts.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::error::DepositError;
use super::indexer::{ChainIndexer, IndexedTx};
use super::store::IntentStore;
use super::types::PendingDepositIntent;
use crate::ledger::{AccountRef, LedgerStore, OperationKind, WalletOperation};

#[derive(Debug, Clone)]
pub struct MatcherConfig {
    /// The platform's receiving address on the external network.
    pub receive_address: String,
    /// Attempt ceiling after which an intent is abandoned.
    pub max_attempts: i32,
    /// Size of the shared transaction window fetched per run.
    pub window_limit: u32,
    /// How often a run is scheduled.
    pub poll_interval: Duration,
    /// Lease TTL; must exceed the expected run duration.
    pub lease_ttl: Duration,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            receive_address: String::new(),
            max_attempts: 20,
            window_limit: 100,
            poll_interval: Duration::from_secs(60),
            lease_ttl: Duration::from_secs(50),
        }
    }
}

/// Summary of one matcher run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunOutcome {
    pub matched: usize,
    pub unmatched: usize,
    pub skipped: bool,
}

pub struct DepositMatcher {
    store: Arc<dyn IntentStore>,
    indexer: Arc<dyn ChainIndexer>,
    ledger: Arc<dyn LedgerStore>,
    config: MatcherConfig,
    holder: String,
}

impl DepositMatcher {
    pub fn new(
        store: Arc<dyn IntentStore>,
        indexer: Arc<dyn ChainIndexer>,
        ledger: Arc<dyn LedgerStore>,
        config: MatcherConfig,
    ) -> Self {
        Self {
            store,
            indexer,
            ledger,
            config,
            holder: uuid::Uuid::new_v4().to_string(),
        }
    }

    /// Run the scheduler loop forever.
    pub async fn run(&self) -> ! {
        info!(
            poll_interval_secs = self.config.poll_interval.as_secs(),
            receive_address = %self.config.receive_address,
            "Starting deposit matcher"
        );

        loop {
            match self.run_once().await {
                Ok(outcome) if outcome.skipped => {
                    debug!("Matcher run skipped (lease held elsewhere)");
                }
                Ok(outcome) => {
                    if outcome.matched > 0 {
                        info!(
                            matched = outcome.matched,
                            unmatched = outcome.unmatched,
                            "Matcher run complete"
                        );
                    }
                }
                Err(DepositError::ExternalUnavailable(msg)) => {
                    // Transient: retried next cycle, no attempts counted.
                    warn!(error = %msg, "Indexer unavailable, run aborted");
                }
                Err(e) => {
                    error!(error = %e, "Matcher run failed");
                }
            }

            tokio::time::sleep(self.config.poll_interval).await;
        }
    }

    /// Execute a single reconciliation run.
    pub async fn run_once(&self) -> Result<RunOutcome, DepositError> {
        if !self
            .store
            .acquire_lease(&self.holder, self.config.lease_ttl)
            .await?
        {
            return Ok(RunOutcome {
                skipped: true,
                ..Default::default()
            });
        }

        let result = self.reconcile().await;
        // The lease expires at its ttl regardless, so a failed release must
        // not replace the run outcome.
        if let Err(e) = self.store.release_lease(&self.holder).await {
            warn!(holder = %self.holder, error = %e, "Failed to release matcher lease");
        }
        result
    }

    async fn reconcile(&self) -> Result<RunOutcome, DepositError> {
        let intents = self
            .store
            .load_pending(self.config.max_attempts, self.config.window_limit)
            .await?;
        if intents.is_empty() {
            return Ok(RunOutcome::default());
        }

        // One batched external call per run, shared across all intents.
        let window = self
            .indexer
            .recent_transactions(&self.config.receive_address, self.config.window_limit)
            .await?;

        let mut consumed: HashSet<String> = HashSet::new();
        let mut outcome = RunOutcome::default();

        for intent in &intents {
            match self.process_intent(intent, &window, &mut consumed).await {
                Ok(true) => outcome.matched += 1,
                Ok(false) => outcome.unmatched += 1,
                Err(e) => {
                    // One bad intent must not starve the rest of the batch.
                    error!(
                        intent_id = intent.id,
                        user_id = intent.user_id,
                        error = %e,
                        "Failed to process intent"
                    );
                }
            }
        }

        Ok(outcome)
    }

    /// Match one intent against the window. Returns whether it was credited.
    async fn process_intent(
        &self,
        intent: &PendingDepositIntent,
        window: &[IndexedTx],
        consumed: &mut HashSet<String>,
    ) -> Result<bool, DepositError> {
        // A transaction can match here yet already be claimed by another
        // intent in a previous run. Losing the claim rules out that one
        // candidate, not the whole window, so keep scanning.
        let tx = loop {
            let matched = window.iter().find(|tx| {
                !consumed.contains(&tx.hash)
                    && tx.from.eq_ignore_ascii_case(&intent.sender_address)
                    && tx.value == intent.expected_native_value
            });

            let Some(tx) = matched else {
                self.store.increment_attempts(intent.id).await?;
                if intent.attempts + 1 >= self.config.max_attempts {
                    warn!(
                        intent_id = intent.id,
                        user_id = intent.user_id,
                        "Intent abandoned after attempt ceiling"
                    );
                }
                return Ok(false);
            };

            // Claim first: the CAS on processed_tx_hash is the idempotency guard.
            // A crash after the claim means a retried missed credit at worst,
            // never a double credit.
            if self.store.claim(intent.id, &tx.hash).await? {
                break tx;
            }
            debug!(
                intent_id = intent.id,
                tx_hash = %tx.hash,
                "Claim lost (already consumed), trying next candidate"
            );
            consumed.insert(tx.hash.clone());
        };
        consumed.insert(tx.hash.clone());

        match self
            .ledger
            .atomic_credit(AccountRef::wallet(intent.user_id), intent.amount_usd)
            .await
        {
            Ok(new_balance) => {
                info!(
                    intent_id = intent.id,
                    user_id = intent.user_id,
                    amount = %intent.amount_usd,
                    tx_hash = %tx.hash,
                    new_balance = %new_balance,
                    "Deposit matched and credited"
                );

                let entry = WalletOperation::new(
                    intent.user_id,
                    intent.amount_usd,
                    OperationKind::Deposit,
                    format!("on-chain deposit from {}", intent.sender_address),
                )
                .with_tx_hash(tx.hash.clone());
                if let Err(e) = self.ledger.append_operation(entry).await {
                    warn!(intent_id = intent.id, error = %e, "Journal append failed for deposit");
                }

                Ok(true)
            }
            Err(e) => {
                // Give the claim back so the next run retries the credit.
                self.store.unclaim(intent.id).await?;
                consumed.remove(&tx.hash);
                Err(e.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deposit::indexer::MockChainIndexer;
    use crate::deposit::store::MemIntentStore;
    use crate::deposit::types::NewDepositIntent;
    use crate::ledger::MemLedgerStore;
    use rust_decimal::Decimal;

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    struct Fixture {
        store: Arc<MemIntentStore>,
        indexer: Arc<MockChainIndexer>,
        ledger: Arc<MemLedgerStore>,
        matcher: DepositMatcher,
    }

    fn fixture(max_attempts: i32) -> Fixture {
        let store = Arc::new(MemIntentStore::new());
        let indexer = Arc::new(MockChainIndexer::new());
        let ledger = Arc::new(MemLedgerStore::new());
        let matcher = DepositMatcher::new(
            store.clone(),
            indexer.clone(),
            ledger.clone(),
            MatcherConfig {
                receive_address: "EQplatform".to_string(),
                max_attempts,
                ..Default::default()
            },
        );
        Fixture {
            store,
            indexer,
            ledger,
            matcher,
        }
    }

    fn intent(session_id: &str, sender: &str, value: i64, usd: &str) -> NewDepositIntent {
        NewDepositIntent {
            user_id: 1,
            session_id: session_id.to_string(),
            amount_usd: usd.parse().unwrap(),
            sender_address: sender.to_string(),
            expected_native_value: value,
        }
    }

    #[tokio::test]
    async fn test_match_credits_and_marks_intent() {
        let f = fixture(5);
        let created = f
            .store
            .create(intent("s1", "EQabc", 1_000_000_000, "5.00"))
            .await
            .unwrap();
        f.indexer.push_tx(IndexedTx {
            hash: "txA".to_string(),
            from: "EQabc".to_string(),
            value: 1_000_000_000,
        });

        let outcome = f.matcher.run_once().await.unwrap();
        assert_eq!(outcome.matched, 1);

        assert_eq!(f.ledger.balance_of(AccountRef::wallet(1)), dec("5.00"));
        let row = f.store.get(created.id).await.unwrap().unwrap();
        assert_eq!(row.processed_tx_hash.as_deref(), Some("txA"));
    }

    #[tokio::test]
    async fn test_rerun_over_unchanged_window_credits_once() {
        let f = fixture(5);
        f.store
            .create(intent("s1", "EQabc", 1_000_000_000, "5.00"))
            .await
            .unwrap();
        f.indexer.push_tx(IndexedTx {
            hash: "txA".to_string(),
            from: "EQabc".to_string(),
            value: 1_000_000_000,
        });

        f.matcher.run_once().await.unwrap();
        f.matcher.run_once().await.unwrap();

        assert_eq!(f.ledger.balance_of(AccountRef::wallet(1)), dec("5.00"));
    }

    #[tokio::test]
    async fn test_sender_match_is_case_insensitive() {
        let f = fixture(5);
        f.store
            .create(intent("s1", "eqABC", 42, "1.00"))
            .await
            .unwrap();
        f.indexer.push_tx(IndexedTx {
            hash: "txA".to_string(),
            from: "EQabc".to_string(),
            value: 42,
        });

        let outcome = f.matcher.run_once().await.unwrap();
        assert_eq!(outcome.matched, 1);
    }

    #[tokio::test]
    async fn test_value_must_match_exactly() {
        let f = fixture(5);
        f.store
            .create(intent("s1", "EQabc", 1_000_000_000, "5.00"))
            .await
            .unwrap();
        f.indexer.push_tx(IndexedTx {
            hash: "txA".to_string(),
            from: "EQabc".to_string(),
            value: 999_999_999,
        });

        let outcome = f.matcher.run_once().await.unwrap();
        assert_eq!(outcome.matched, 0);
        assert_eq!(outcome.unmatched, 1);
        assert_eq!(f.ledger.balance_of(AccountRef::wallet(1)), Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_two_identical_intents_consume_distinct_txs_oldest_first() {
        let f = fixture(5);
        let first = f
            .store
            .create(intent("s1", "EQabc", 100, "2.00"))
            .await
            .unwrap();
        let second = f
            .store
            .create(intent("s2", "EQabc", 100, "2.00"))
            .await
            .unwrap();

        // Only one matching transaction on chain.
        f.indexer.push_tx(IndexedTx {
            hash: "txA".to_string(),
            from: "EQabc".to_string(),
            value: 100,
        });

        let outcome = f.matcher.run_once().await.unwrap();
        assert_eq!(outcome.matched, 1);
        assert_eq!(f.ledger.balance_of(AccountRef::wallet(1)), dec("2.00"));

        let first = f.store.get(first.id).await.unwrap().unwrap();
        let second = f.store.get(second.id).await.unwrap().unwrap();
        assert!(first.is_processed());
        assert!(!second.is_processed());

        // Second matching transaction arrives later.
        f.indexer.push_tx(IndexedTx {
            hash: "txB".to_string(),
            from: "EQabc".to_string(),
            value: 100,
        });
        f.matcher.run_once().await.unwrap();
        assert_eq!(f.ledger.balance_of(AccountRef::wallet(1)), dec("4.00"));
    }

    #[tokio::test]
    async fn test_lost_claim_falls_through_to_next_candidate() {
        let f = fixture(5);
        // txA was consumed by an earlier run for another session.
        let earlier = f
            .store
            .create(intent("s0", "EQabc", 100, "2.00"))
            .await
            .unwrap();
        assert!(f.store.claim(earlier.id, "txA").await.unwrap());

        let pending = f
            .store
            .create(intent("s1", "EQabc", 100, "2.00"))
            .await
            .unwrap();
        f.indexer.push_tx(IndexedTx {
            hash: "txA".to_string(),
            from: "EQabc".to_string(),
            value: 100,
        });
        f.indexer.push_tx(IndexedTx {
            hash: "txB".to_string(),
            from: "EQabc".to_string(),
            value: 100,
        });

        let outcome = f.matcher.run_once().await.unwrap();
        assert_eq!(outcome.matched, 1);

        let row = f.store.get(pending.id).await.unwrap().unwrap();
        assert_eq!(row.processed_tx_hash.as_deref(), Some("txB"));
        assert_eq!(row.attempts, 0);
    }

    #[tokio::test]
    async fn test_indexer_down_aborts_without_counting_attempts() {
        let f = fixture(5);
        let created = f
            .store
            .create(intent("s1", "EQabc", 100, "2.00"))
            .await
            .unwrap();
        f.indexer.set_unavailable(true);

        let err = f.matcher.run_once().await.unwrap_err();
        assert!(matches!(err, DepositError::ExternalUnavailable(_)));

        let row = f.store.get(created.id).await.unwrap().unwrap();
        assert_eq!(row.attempts, 0);

        // Lease must have been released despite the abort.
        f.indexer.set_unavailable(false);
        let outcome = f.matcher.run_once().await.unwrap();
        assert!(!outcome.skipped);
    }

    #[tokio::test]
    async fn test_release_failure_preserves_run_outcome() {
        let f = fixture(5);
        f.store
            .create(intent("s1", "EQabc", 100, "2.00"))
            .await
            .unwrap();
        f.indexer.push_tx(IndexedTx {
            hash: "txA".to_string(),
            from: "EQabc".to_string(),
            value: 100,
        });
        f.store.set_fail_release(true);

        let outcome = f.matcher.run_once().await.unwrap();
        assert_eq!(outcome.matched, 1);
        assert_eq!(f.ledger.balance_of(AccountRef::wallet(1)), dec("2.00"));
    }

    #[tokio::test]
    async fn test_attempt_ceiling_abandons_intent() {
        let f = fixture(2);
        let created = f
            .store
            .create(intent("s1", "EQabc", 100, "2.00"))
            .await
            .unwrap();

        f.matcher.run_once().await.unwrap();
        f.matcher.run_once().await.unwrap();
        // Ceiling reached; further runs no longer see the intent.
        let outcome = f.matcher.run_once().await.unwrap();
        assert_eq!(outcome.matched + outcome.unmatched, 0);

        let row = f.store.get(created.id).await.unwrap().unwrap();
        assert_eq!(row.attempts, 2);
        assert!(!row.is_processed());
    }
}
