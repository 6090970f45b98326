//! In-memory Ledger Store
//!
//! Same semantics as the PostgreSQL store, backed by a single mutex so every
//! primitive is one critical section. Used by tests and mock-mode wiring.

use std::collections::HashMap;
use std::sync::Mutex;

use super::store::{AccountRef, LedgerError, LedgerStore, UserId, WalletOperation};
use async_trait::async_trait;
use rust_decimal::Decimal;

#[derive(Default)]
struct MemInner {
    balances: HashMap<(UserId, i16), Decimal>,
    journal: Vec<WalletOperation>,
}

#[derive(Default)]
pub struct MemLedgerStore {
    inner: Mutex<MemInner>,
}

impl MemLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Test helper: seed a balance directly.
    pub fn set_balance(&self, account: AccountRef, amount: Decimal) {
        let mut inner = self.inner.lock().unwrap();
        inner
            .balances
            .insert((account.user_id, account.balance.id()), amount);
    }

    /// Test helper: read a balance without going through a primitive.
    pub fn balance_of(&self, account: AccountRef) -> Decimal {
        let inner = self.inner.lock().unwrap();
        inner
            .balances
            .get(&(account.user_id, account.balance.id()))
            .copied()
            .unwrap_or(Decimal::ZERO)
    }

    /// Test helper: snapshot of the journal.
    pub fn journal(&self) -> Vec<WalletOperation> {
        self.inner.lock().unwrap().journal.clone()
    }
}

#[async_trait]
impl LedgerStore for MemLedgerStore {
    async fn atomic_credit(
        &self,
        account: AccountRef,
        amount: Decimal,
    ) -> Result<Decimal, LedgerError> {
        if amount <= Decimal::ZERO {
            return Err(LedgerError::InvalidAmount);
        }

        let mut inner = self.inner.lock().unwrap();
        let balance = inner
            .balances
            .entry((account.user_id, account.balance.id()))
            .or_insert(Decimal::ZERO);
        *balance += amount;
        Ok(*balance)
    }

    async fn atomic_debit_if_sufficient(
        &self,
        account: AccountRef,
        amount: Decimal,
    ) -> Result<Decimal, LedgerError> {
        if amount <= Decimal::ZERO {
            return Err(LedgerError::InvalidAmount);
        }

        let mut inner = self.inner.lock().unwrap();
        let key = (account.user_id, account.balance.id());
        let current = inner.balances.get(&key).copied().unwrap_or(Decimal::ZERO);
        if current < amount {
            return Err(LedgerError::InsufficientFunds);
        }
        let new_balance = current - amount;
        inner.balances.insert(key, new_balance);
        Ok(new_balance)
    }

    async fn atomic_transfer(
        &self,
        from: AccountRef,
        to: AccountRef,
        amount: Decimal,
    ) -> Result<(Decimal, Decimal), LedgerError> {
        if amount <= Decimal::ZERO {
            return Err(LedgerError::InvalidAmount);
        }

        let mut inner = self.inner.lock().unwrap();
        let from_key = (from.user_id, from.balance.id());
        let to_key = (to.user_id, to.balance.id());

        let from_balance = inner
            .balances
            .get(&from_key)
            .copied()
            .unwrap_or(Decimal::ZERO);
        if from_balance < amount {
            return Err(LedgerError::InsufficientFunds);
        }

        let new_from = from_balance - amount;
        inner.balances.insert(from_key, new_from);
        let new_to = {
            let to_balance = inner.balances.entry(to_key).or_insert(Decimal::ZERO);
            *to_balance += amount;
            *to_balance
        };

        Ok((new_from, new_to))
    }

    async fn append_operation(&self, entry: WalletOperation) -> Result<(), LedgerError> {
        self.inner.lock().unwrap().journal.push(entry);
        Ok(())
    }

    async fn recent_operations(
        &self,
        user_id: UserId,
        limit: u32,
    ) -> Result<Vec<WalletOperation>, LedgerError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .journal
            .iter()
            .rev()
            .filter(|op| op.user_id == user_id)
            .take(limit as usize)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::store::OperationKind;

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    #[tokio::test]
    async fn test_credit_and_debit() {
        let ledger = MemLedgerStore::new();
        let acct = AccountRef::wallet(1);

        let balance = ledger.atomic_credit(acct, dec("10.00")).await.unwrap();
        assert_eq!(balance, dec("10.00"));

        let balance = ledger
            .atomic_debit_if_sufficient(acct, dec("4.50"))
            .await
            .unwrap();
        assert_eq!(balance, dec("5.50"));
    }

    #[tokio::test]
    async fn test_debit_exact_balance_reaches_zero() {
        let ledger = MemLedgerStore::new();
        let acct = AccountRef::wallet(1);
        ledger.set_balance(acct, dec("7.25"));

        let balance = ledger
            .atomic_debit_if_sufficient(acct, dec("7.25"))
            .await
            .unwrap();
        assert_eq!(balance, Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_debit_over_balance_leaves_balance_unchanged() {
        let ledger = MemLedgerStore::new();
        let acct = AccountRef::wallet(1);
        ledger.set_balance(acct, dec("7.25"));

        let err = ledger
            .atomic_debit_if_sufficient(acct, dec("7.26"))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientFunds));
        assert_eq!(ledger.balance_of(acct), dec("7.25"));
    }

    #[tokio::test]
    async fn test_transfer_all_or_nothing() {
        let ledger = MemLedgerStore::new();
        let a = AccountRef::wallet(1);
        let b = AccountRef::wallet(2);
        ledger.set_balance(a, dec("3.00"));

        let err = ledger.atomic_transfer(a, b, dec("3.01")).await.unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientFunds));
        assert_eq!(ledger.balance_of(a), dec("3.00"));
        assert_eq!(ledger.balance_of(b), Decimal::ZERO);

        let (new_a, new_b) = ledger.atomic_transfer(a, b, dec("3.00")).await.unwrap();
        assert_eq!(new_a, Decimal::ZERO);
        assert_eq!(new_b, dec("3.00"));
    }

    #[tokio::test]
    async fn test_wallet_to_core_same_user() {
        let ledger = MemLedgerStore::new();
        ledger.set_balance(AccountRef::wallet(9), dec("20.00"));

        let (wallet, core) = ledger
            .atomic_transfer(AccountRef::wallet(9), AccountRef::core(9), dec("8.00"))
            .await
            .unwrap();
        assert_eq!(wallet, dec("12.00"));
        assert_eq!(core, dec("8.00"));
    }

    #[tokio::test]
    async fn test_invalid_amounts_rejected() {
        let ledger = MemLedgerStore::new();
        let acct = AccountRef::wallet(1);

        assert!(matches!(
            ledger.atomic_credit(acct, Decimal::ZERO).await,
            Err(LedgerError::InvalidAmount)
        ));
        assert!(matches!(
            ledger.atomic_debit_if_sufficient(acct, dec("-1")).await,
            Err(LedgerError::InvalidAmount)
        ));
    }

    #[tokio::test]
    async fn test_journal_read_back_newest_first() {
        let ledger = MemLedgerStore::new();
        for i in 1..=3 {
            ledger
                .append_operation(WalletOperation::new(
                    1,
                    Decimal::from(i),
                    OperationKind::Deposit,
                    format!("entry {}", i),
                ))
                .await
                .unwrap();
        }

        let ops = ledger.recent_operations(1, 2).await.unwrap();
        assert_eq!(ops.len(), 2);
        assert_eq!(ops[0].amount, Decimal::from(3));
        assert_eq!(ops[1].amount, Decimal::from(2));
    }
}
