//! Ledger Store - Authoritative per-user balance store
//!
//! Every balance mutation in the system funnels through the four atomic
//! primitives defined here. None of the primitives is idempotent by itself;
//! each caller supplies idempotency via its own keyed state (deposit intents,
//! invoice order numbers, settlement ids).
//!
//! # Safety Invariants
//!
//! 1. **No read-then-write**: insufficiency is checked inside the same atomic
//!    operation as the decrement, never as a separate read.
//! 2. **Never negative**: a balance can only reach zero, not cross it.
//! 3. **Journal is non-authoritative**: `append_operation` is best-effort;
//!    a journal failure must not fail the balance mutation.

pub mod api;
pub mod mem;
pub mod pg;
pub mod store;

pub use mem::MemLedgerStore;
pub use pg::PgLedgerStore;
pub use store::{
    AccountRef, BalanceKind, LedgerError, LedgerStore, OperationKind, UserId, WalletOperation,
};
