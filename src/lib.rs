//! settlecore - ledger and external-settlement reconciliation.
//!
//! Keeps an authoritative per-user balance store consistent with three
//! external money rails that offer no transactions and no exactly-once
//! delivery:
//!
//! - an append-only blockchain observed through an indexer (deposits),
//! - a payment gateway pushing signed webhooks (invoice top-ups),
//! - a custodial network accepting outbound transfers (settlements).
//!
//! Every module supplies its own idempotency on top of the four atomic
//! ledger primitives: deposit intents claim a tx hash before crediting,
//! webhooks win a conditional completion update before crediting, and
//! outbound settlements run a persisted state machine with compensation.

pub mod config;
pub mod deposit;
pub mod gateway;
pub mod invoice;
pub mod ledger;
pub mod logging;
pub mod settlement;
pub mod transfer;

pub use config::AppConfig;
pub use gateway::{ApiResponse, AppState};
