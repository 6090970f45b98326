//! Outbound Settlement Broadcaster
//!
//! Debits the wallet, broadcasts a transfer to the external network, waits for
//! confirmation, and compensates the ledger if anything fails after the debit.
//! There is no two-phase commit between the ledger and the network; the only
//! consistency mechanism is the compensation pattern over a durably persisted
//! state machine.
//!
//! # State Machine
//!
//! ```text
//! REQUESTED → DEBITED → BROADCASTING → CONFIRMING → CONFIRMED
//!     |           |           |             |
//!     +-----------+-----------+-------------+--→ ROLLING_BACK → FAILED_ROLLED_BACK
//! ```
//!
//! # Safety Invariants
//!
//! 1. **Persist-before-call**: every transition is CAS-written to the store
//!    before the external call it gates.
//! 2. **Compensate exactly the debited amount**: the refund uses the recorded
//!    `debited_amount`, never a recomputed conversion.
//! 3. **Every DEBITED row terminates**: the recovery sweep drives any row
//!    stuck past the stale threshold to CONFIRMED or FAILED_ROLLED_BACK.
//! 4. **No cancellation after broadcast**: confirmation timeout is the only
//!    non-success exit.

pub mod api;
pub mod broadcaster;
pub mod error;
pub mod network;
pub mod state;
pub mod store;
pub mod types;
pub mod worker;

pub use broadcaster::{BroadcasterConfig, SettlementBroadcaster};
pub use error::SettlementError;
pub use network::{
    CustodialNetwork, HttpCustodialNetwork, HttpPriceFeed, MockCustodialNetwork, MockPriceFeed,
    PriceFeed,
};
pub use state::SettlementState;
pub use store::{MemSettlementStore, PgSettlementStore, SettlementStore};
pub use types::{SettlementRecord, SettlementRequest};
pub use worker::{RecoveryWorker, WorkerConfig};
