//! Transfer Coordinator
//!
//! Validates a transfer request and executes it through exactly one
//! `atomic_transfer` call, then appends one debit and one credit journal row.

use std::sync::Arc;
use tracing::{info, warn};

use super::error::TransferError;
use crate::ledger::{AccountRef, LedgerStore, OperationKind, UserId, WalletOperation};
use rust_decimal::Decimal;

/// Where the transferred funds land.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferTarget {
    /// Another user's wallet balance.
    PeerWallet(UserId),
    /// The sender's own core (reinvestment) balance.
    OwnCore,
}

#[derive(Debug, Clone)]
pub struct TransferRequest {
    pub sender_id: UserId,
    pub target: TransferTarget,
    pub amount: Decimal,
    pub memo: Option<String>,
}

#[derive(Debug, Clone)]
pub struct TransferReceipt {
    pub sender_balance: Decimal,
    pub receiver_balance: Decimal,
}

pub struct TransferCoordinator {
    ledger: Arc<dyn LedgerStore>,
}

impl TransferCoordinator {
    pub fn new(ledger: Arc<dyn LedgerStore>) -> Self {
        Self { ledger }
    }

    /// Execute an internal transfer.
    ///
    /// All-or-nothing: the sufficiency check and both balance mutations land
    /// in one atomic ledger call. On success exactly two journal rows are
    /// appended (journal failure is logged, never surfaced).
    pub async fn transfer(&self, req: TransferRequest) -> Result<TransferReceipt, TransferError> {
        if req.sender_id <= 0 {
            return Err(TransferError::Unauthorized);
        }
        if req.amount <= Decimal::ZERO {
            return Err(TransferError::InvalidAmount);
        }

        let from = AccountRef::wallet(req.sender_id);
        let to = match req.target {
            TransferTarget::PeerWallet(receiver_id) => {
                if receiver_id == req.sender_id {
                    return Err(TransferError::SameAccount);
                }
                AccountRef::wallet(receiver_id)
            }
            TransferTarget::OwnCore => AccountRef::core(req.sender_id),
        };

        let (sender_balance, receiver_balance) =
            self.ledger.atomic_transfer(from, to, req.amount).await?;

        info!(
            sender = req.sender_id,
            target = %to,
            amount = %req.amount,
            "Transfer committed"
        );

        let memo = req.memo.as_deref().unwrap_or("");
        let out = WalletOperation::new(
            req.sender_id,
            -req.amount,
            OperationKind::TransferOut,
            format!("transfer to {}: {}", to, memo),
        );
        let into = WalletOperation::new(
            to.user_id,
            req.amount,
            OperationKind::TransferIn,
            format!("transfer from {}: {}", from, memo),
        );
        for entry in [out, into] {
            if let Err(e) = self.ledger.append_operation(entry).await {
                warn!(error = %e, "Journal append failed after committed transfer");
            }
        }

        Ok(TransferReceipt {
            sender_balance,
            receiver_balance,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::MemLedgerStore;

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    fn coordinator() -> (Arc<MemLedgerStore>, TransferCoordinator) {
        let ledger = Arc::new(MemLedgerStore::new());
        let coordinator = TransferCoordinator::new(ledger.clone());
        (ledger, coordinator)
    }

    #[tokio::test]
    async fn test_p2p_transfer_scenario() {
        // A has 100.00, B has 10.00; A transfers 40.00 to B.
        let (ledger, coordinator) = coordinator();
        ledger.set_balance(AccountRef::wallet(1), dec("100.00"));
        ledger.set_balance(AccountRef::wallet(2), dec("10.00"));

        let receipt = coordinator
            .transfer(TransferRequest {
                sender_id: 1,
                target: TransferTarget::PeerWallet(2),
                amount: dec("40.00"),
                memo: Some("thanks".into()),
            })
            .await
            .unwrap();

        assert_eq!(receipt.sender_balance, dec("60.00"));
        assert_eq!(receipt.receiver_balance, dec("50.00"));

        let journal = ledger.journal();
        assert_eq!(journal.len(), 2);
        assert_eq!(journal[0].amount, dec("-40.00"));
        assert_eq!(journal[0].kind, OperationKind::TransferOut);
        assert_eq!(journal[1].amount, dec("40.00"));
        assert_eq!(journal[1].kind, OperationKind::TransferIn);
    }

    #[tokio::test]
    async fn test_wallet_to_core() {
        let (ledger, coordinator) = coordinator();
        ledger.set_balance(AccountRef::wallet(5), dec("30.00"));

        let receipt = coordinator
            .transfer(TransferRequest {
                sender_id: 5,
                target: TransferTarget::OwnCore,
                amount: dec("12.00"),
                memo: None,
            })
            .await
            .unwrap();

        assert_eq!(receipt.sender_balance, dec("18.00"));
        assert_eq!(receipt.receiver_balance, dec("12.00"));
        assert_eq!(ledger.balance_of(AccountRef::core(5)), dec("12.00"));
    }

    #[tokio::test]
    async fn test_validation_rejects_before_mutation() {
        let (ledger, coordinator) = coordinator();
        ledger.set_balance(AccountRef::wallet(1), dec("10.00"));

        let err = coordinator
            .transfer(TransferRequest {
                sender_id: 1,
                target: TransferTarget::PeerWallet(1),
                amount: dec("5.00"),
                memo: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::SameAccount));

        let err = coordinator
            .transfer(TransferRequest {
                sender_id: 1,
                target: TransferTarget::PeerWallet(2),
                amount: Decimal::ZERO,
                memo: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::InvalidAmount));

        let err = coordinator
            .transfer(TransferRequest {
                sender_id: 0,
                target: TransferTarget::PeerWallet(2),
                amount: dec("5.00"),
                memo: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::Unauthorized));

        assert_eq!(ledger.balance_of(AccountRef::wallet(1)), dec("10.00"));
        assert!(ledger.journal().is_empty());
    }

    #[tokio::test]
    async fn test_insufficient_funds_no_partial_effect() {
        let (ledger, coordinator) = coordinator();
        ledger.set_balance(AccountRef::wallet(1), dec("10.00"));

        let err = coordinator
            .transfer(TransferRequest {
                sender_id: 1,
                target: TransferTarget::PeerWallet(2),
                amount: dec("10.01"),
                memo: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::InsufficientFunds));
        assert_eq!(ledger.balance_of(AccountRef::wallet(1)), dec("10.00"));
        assert_eq!(ledger.balance_of(AccountRef::wallet(2)), Decimal::ZERO);
        assert!(ledger.journal().is_empty());
    }
}
