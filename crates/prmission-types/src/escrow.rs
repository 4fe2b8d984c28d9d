//! Escrow types for Prmission
//!
//! An Escrow locks an agent's funds against exactly one Permission until an
//! outcome is reported, the dispute window elapses, and the funds are split.

use crate::{AccountId, AgentIdentityId, Amount, EscrowId, PermissionId};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// State of an escrow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EscrowStatus {
    /// Funds locked, no outcome yet
    Funded,
    /// Outcome reported, dispute window running
    OutcomeReported,
    /// Frozen until the owner resolves or refunds
    Disputed,
    Settled,
    Refunded,
}

impl EscrowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Funded => "funded",
            Self::OutcomeReported => "outcome_reported",
            Self::Disputed => "disputed",
            Self::Settled => "settled",
            Self::Refunded => "refunded",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Settled | Self::Refunded)
    }
}

impl fmt::Display for EscrowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A funded engagement against a permission
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Escrow {
    pub id: EscrowId,
    pub permission_id: PermissionId,
    /// The agent who deposited the funds
    pub depositor: AccountId,
    /// External identity presented at deposit time
    pub agent_identity: Option<AgentIdentityId>,
    /// Escrowed principal. The only basis for payouts.
    pub amount: Amount,
    /// Reported result, capped at `amount`
    pub outcome_value: Amount,
    pub outcome_type: String,
    pub outcome_detail: String,
    pub outcome_reported_at: Option<DateTime<Utc>>,
    pub status: EscrowStatus,
    pub dispute_reason: Option<String>,
    pub disputed_by: Option<AccountId>,
    pub created_at: DateTime<Utc>,
}

impl Escrow {
    /// End of the dispute window, once an outcome has been reported
    pub fn dispute_window_end(&self, window: Duration) -> Option<DateTime<Utc>> {
        self.outcome_reported_at.map(|at| at + window)
    }
}

/// Two-way split of an escrow plus protocol fee
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscrowSettlement {
    pub grantor_share: Amount,
    pub protocol_fee: Amount,
    /// Remainder, absorbs rounding dust
    pub depositor_refund: Amount,
}

impl EscrowSettlement {
    pub fn total(&self) -> Option<Amount> {
        self.grantor_share
            .checked_add(self.protocol_fee)?
            .checked_add(self.depositor_refund)
    }
}
