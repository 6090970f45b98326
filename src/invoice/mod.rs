//! Gateway Webhook Processor
//!
//! Applies externally pushed invoice-lifecycle events exactly once. The
//! signature is verified before anything else touches state; the conditional
//! update to `completed` is the idempotency guard, and the wallet credit only
//! happens when that update reports a changed row. A replayed delivery is a
//! silent no-op, not an error.

pub mod api;
pub mod error;
pub mod processor;
pub mod signature;
pub mod store;
pub mod types;

pub use error::InvoiceError;
pub use processor::{WebhookOutcome, WebhookProcessor};
pub use store::{InvoiceStore, MemInvoiceStore, PgInvoiceStore};
pub use types::{GatewayInvoice, InvoiceStatus};
