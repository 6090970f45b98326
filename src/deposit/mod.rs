//! Deposit Matcher
//!
//! Reconciles client-declared deposit intents against transactions observed
//! by a blockchain indexer and credits the wallet balance on a match.
//!
//! # Safety Invariants
//!
//! 1. **One run at a time**: a keyed lease with expiry guards the whole run;
//!    the attempts counter is never used for mutual exclusion.
//! 2. **Claim-before-credit**: the CAS on `processed_tx_hash` is the
//!    idempotency guard; the ledger credit only happens after the claim lands.
//! 3. **Each transaction consumed at most once**: per run via an in-run set,
//!    across runs via the unique index on the claimed hash. Oldest intent wins.
//! 4. **Indexer down aborts the run**: transient, nothing is counted against
//!    any intent.

pub mod api;
pub mod error;
pub mod indexer;
pub mod matcher;
pub mod store;
pub mod types;

pub use error::DepositError;
pub use indexer::{ChainIndexer, HttpChainIndexer, IndexedTx, MockChainIndexer};
pub use matcher::{DepositMatcher, MatcherConfig, RunOutcome};
pub use store::{IntentStore, MemIntentStore, PgIntentStore};
pub use types::{NewDepositIntent, PendingDepositIntent};
