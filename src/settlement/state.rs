//! Settlement FSM state definitions.
//!
//! State IDs are stored as SMALLINT. Terminal states: CONFIRMED (40),
//! FAILED_ROLLED_BACK (-30).

use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(i16)]
pub enum SettlementState {
    /// Request validated and recorded; nothing debited yet.
    Requested = 0,

    /// Wallet debited - funds are IN-FLIGHT.
    /// Must eventually reach CONFIRMED or FAILED_ROLLED_BACK.
    Debited = 10,

    /// Conversion, sequence snapshot and submission in progress.
    Broadcasting = 20,

    /// Submitted; polling the custodial sequence number.
    Confirming = 30,

    /// Terminal: transfer confirmed on the external network.
    Confirmed = 40,

    /// Compensating credit in progress.
    RollingBack = -20,

    /// Terminal: wallet restored to its pre-debit value.
    FailedRolledBack = -30,
}

impl SettlementState {
    /// No more transitions possible.
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SettlementState::Confirmed | SettlementState::FailedRolledBack
        )
    }

    /// Funds debited but not yet resolved either way.
    #[inline]
    pub fn is_in_flight(&self) -> bool {
        matches!(
            self,
            SettlementState::Debited
                | SettlementState::Broadcasting
                | SettlementState::Confirming
                | SettlementState::RollingBack
        )
    }

    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            0 => Some(SettlementState::Requested),
            10 => Some(SettlementState::Debited),
            20 => Some(SettlementState::Broadcasting),
            30 => Some(SettlementState::Confirming),
            40 => Some(SettlementState::Confirmed),
            -20 => Some(SettlementState::RollingBack),
            -30 => Some(SettlementState::FailedRolledBack),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SettlementState::Requested => "REQUESTED",
            SettlementState::Debited => "DEBITED",
            SettlementState::Broadcasting => "BROADCASTING",
            SettlementState::Confirming => "CONFIRMING",
            SettlementState::Confirmed => "CONFIRMED",
            SettlementState::RollingBack => "ROLLING_BACK",
            SettlementState::FailedRolledBack => "FAILED_ROLLED_BACK",
        }
    }
}

impl fmt::Display for SettlementState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<i16> for SettlementState {
    type Error = ();

    fn try_from(value: i16) -> Result<Self, Self::Error> {
        SettlementState::from_id(value).ok_or(())
    }
}
