//! Internal Transfer Coordinator
//!
//! Atomic transfers that touch no external system: peer-to-peer between two
//! users' wallets, and wallet -> core reinvestment for one user. The
//! all-or-nothing guarantee comes from a single `atomic_transfer` call;
//! insufficiency is checked inside the same atomic operation as the decrement,
//! never as a separate read-then-write.

pub mod api;
pub mod coordinator;
pub mod error;

pub use coordinator::{TransferCoordinator, TransferReceipt, TransferRequest, TransferTarget};
pub use error::TransferError;
