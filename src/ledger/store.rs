//! Ledger Store contract and journal types.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

pub type UserId = i64;

/// Which of a user's two balances an operation touches.
///
/// `Wallet` is the spendable balance; `Core` is the secondary
/// reinvestment balance. IDs are stored as SMALLINT.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BalanceKind {
    #[default]
    Wallet = 1,
    Core = 2,
}

impl BalanceKind {
    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            1 => Some(BalanceKind::Wallet),
            2 => Some(BalanceKind::Core),
            _ => None,
        }
    }
}

impl fmt::Display for BalanceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BalanceKind::Wallet => write!(f, "wallet"),
            BalanceKind::Core => write!(f, "core"),
        }
    }
}

impl FromStr for BalanceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "wallet" | "1" => Ok(BalanceKind::Wallet),
            "core" | "2" => Ok(BalanceKind::Core),
            _ => Err(format!("Invalid balance kind: {}", s)),
        }
    }
}

/// A single balance slot: one user, one balance kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AccountRef {
    pub user_id: UserId,
    pub balance: BalanceKind,
}

impl AccountRef {
    pub fn wallet(user_id: UserId) -> Self {
        Self {
            user_id,
            balance: BalanceKind::Wallet,
        }
    }

    pub fn core(user_id: UserId) -> Self {
        Self {
            user_id,
            balance: BalanceKind::Core,
        }
    }
}

impl fmt::Display for AccountRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.user_id, self.balance)
    }
}

/// Journal entry kind. Stored as TEXT.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Deposit,
    Withdraw,
    TransferIn,
    TransferOut,
    Send,
    SendFailed,
    Debit,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Deposit => "deposit",
            OperationKind::Withdraw => "withdraw",
            OperationKind::TransferIn => "transfer_in",
            OperationKind::TransferOut => "transfer_out",
            OperationKind::Send => "send",
            OperationKind::SendFailed => "send_failed",
            OperationKind::Debit => "debit",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "deposit" => Some(OperationKind::Deposit),
            "withdraw" => Some(OperationKind::Withdraw),
            "transfer_in" => Some(OperationKind::TransferIn),
            "transfer_out" => Some(OperationKind::TransferOut),
            "send" => Some(OperationKind::Send),
            "send_failed" => Some(OperationKind::SendFailed),
            "debit" => Some(OperationKind::Debit),
            _ => None,
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Append-only journal row. The signed `amount` records the direction of the
/// movement; the authoritative state is always the account balance.
#[derive(Debug, Clone, Serialize)]
pub struct WalletOperation {
    pub user_id: UserId,
    pub amount: Decimal,
    pub kind: OperationKind,
    pub description: String,
    pub tx_hash: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl WalletOperation {
    pub fn new(
        user_id: UserId,
        amount: Decimal,
        kind: OperationKind,
        description: impl Into<String>,
    ) -> Self {
        Self {
            user_id,
            amount,
            kind,
            description: description.into(),
            tx_hash: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_tx_hash(mut self, tx_hash: impl Into<String>) -> Self {
        self.tx_hash = Some(tx_hash.into());
        self
    }
}

/// Ledger error types
#[derive(Error, Debug, Clone)]
pub enum LedgerError {
    #[error("Insufficient funds")]
    InsufficientFunds,

    #[error("Amount must be greater than zero")]
    InvalidAmount,

    #[error("Database error: {0}")]
    Database(String),
}

impl From<sqlx::Error> for LedgerError {
    fn from(e: sqlx::Error) -> Self {
        LedgerError::Database(e.to_string())
    }
}

/// The consumed Ledger Store contract.
///
/// Each primitive is a single atomic server-side operation. Callers never
/// read a balance and later write it outside one of these calls.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Credit `amount` to an account, creating the balance row if absent.
    /// Returns the new balance.
    async fn atomic_credit(
        &self,
        account: AccountRef,
        amount: Decimal,
    ) -> Result<Decimal, LedgerError>;

    /// Debit `amount` only if the balance covers it. The sufficiency check and
    /// the decrement happen in one atomic operation. Returns the new balance.
    async fn atomic_debit_if_sufficient(
        &self,
        account: AccountRef,
        amount: Decimal,
    ) -> Result<Decimal, LedgerError>;

    /// All-or-nothing move between two accounts. Returns (new_from, new_to).
    async fn atomic_transfer(
        &self,
        from: AccountRef,
        to: AccountRef,
        amount: Decimal,
    ) -> Result<(Decimal, Decimal), LedgerError>;

    /// Best-effort audit insert. Callers log failures and move on; this must
    /// never fail a balance mutation that already committed.
    async fn append_operation(&self, entry: WalletOperation) -> Result<(), LedgerError>;

    /// Journal read-back for audit listing, newest first.
    async fn recent_operations(
        &self,
        user_id: UserId,
        limit: u32,
    ) -> Result<Vec<WalletOperation>, LedgerError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_balance_kind_roundtrip() {
        for kind in [BalanceKind::Wallet, BalanceKind::Core] {
            assert_eq!(BalanceKind::from_id(kind.id()), Some(kind));
        }
        assert_eq!(BalanceKind::from_id(99), None);
    }

    #[test]
    fn test_balance_kind_parse() {
        assert_eq!("wallet".parse::<BalanceKind>().unwrap(), BalanceKind::Wallet);
        assert_eq!("CORE".parse::<BalanceKind>().unwrap(), BalanceKind::Core);
        assert!("margin".parse::<BalanceKind>().is_err());
    }

    #[test]
    fn test_operation_kind_roundtrip() {
        let kinds = [
            OperationKind::Deposit,
            OperationKind::Withdraw,
            OperationKind::TransferIn,
            OperationKind::TransferOut,
            OperationKind::Send,
            OperationKind::SendFailed,
            OperationKind::Debit,
        ];
        for kind in kinds {
            assert_eq!(OperationKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(OperationKind::parse("unknown"), None);
    }

    #[test]
    fn test_account_ref_display() {
        assert_eq!(AccountRef::wallet(7).to_string(), "7/wallet");
        assert_eq!(AccountRef::core(7).to_string(), "7/core");
    }
}
