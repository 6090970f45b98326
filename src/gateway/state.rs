//! Shared handler state.

use std::sync::Arc;

use crate::deposit::IntentStore;
use crate::invoice::{InvoiceStore, WebhookProcessor};
use crate::ledger::LedgerStore;
use crate::settlement::{SettlementBroadcaster, SettlementStore};
use crate::transfer::TransferCoordinator;

/// Everything the HTTP handlers need, behind Arcs so the router clones are
/// cheap.
#[derive(Clone)]
pub struct AppState {
    pub ledger: Arc<dyn LedgerStore>,
    pub transfers: Arc<TransferCoordinator>,
    pub intents: Arc<dyn IntentStore>,
    pub invoices: Arc<dyn InvoiceStore>,
    pub webhooks: Arc<WebhookProcessor>,
    pub broadcaster: Arc<SettlementBroadcaster>,
    pub settlements: Arc<dyn SettlementStore>,
}
