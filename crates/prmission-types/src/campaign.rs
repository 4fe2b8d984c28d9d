//! Campaign types for Prmission
//!
//! A Campaign escrows a brand's budget for a creator and splits it five ways
//! at fixed percentages: creator, manager, referral, protocol, and the brand
//! refund as remainder.

use crate::{AccountId, AgentIdentityId, Amount, Bps, CampaignId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// State of a campaign
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CampaignStatus {
    Active,
    OutcomeReported,
    Settled,
    Disputed,
    Refunded,
}

impl CampaignStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::OutcomeReported => "outcome_reported",
            Self::Settled => "settled",
            Self::Disputed => "disputed",
            Self::Refunded => "refunded",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Settled | Self::Refunded)
    }
}

impl fmt::Display for CampaignStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A funded brand/creator engagement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Campaign {
    pub id: CampaignId,
    pub brand: AccountId,
    pub creator: AccountId,
    pub category: String,
    pub content_type: String,
    pub escrow_amount: Amount,
    pub creator_bps: Bps,
    pub manager_bps: Bps,
    pub manager: Option<AccountId>,
    /// Copied from the creator's profile at creation
    pub referral_bps: Bps,
    pub referral: Option<AccountId>,
    /// Protocol fee rate in force when the campaign was created
    pub protocol_bps: Bps,
    /// Free-form magnitude (impressions, clicks...). Never a payout basis.
    pub outcome_value: u128,
    pub metadata: String,
    pub status: CampaignStatus,
    pub disputed_by: Option<AccountId>,
    pub created_at: DateTime<Utc>,
    pub outcome_at: Option<DateTime<Utc>>,
}

/// Parameters of a new campaign
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewCampaign {
    pub creator: AccountId,
    pub category: String,
    pub content_type: String,
    pub escrow_amount: Amount,
    pub creator_bps: Bps,
    pub manager_bps: Bps,
    pub manager: Option<AccountId>,
    /// Brand's external identity, checked when identity enforcement is on
    pub brand_identity: Option<AgentIdentityId>,
}

/// Five-way split of a campaign escrow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignSettlement {
    pub creator_share: Amount,
    pub manager_share: Amount,
    pub referral_share: Amount,
    pub protocol_fee: Amount,
    /// Remainder, absorbs rounding dust and unallocated basis points
    pub brand_refund: Amount,
}

impl CampaignSettlement {
    pub fn total(&self) -> Option<Amount> {
        self.creator_share
            .checked_add(self.manager_share)?
            .checked_add(self.referral_share)?
            .checked_add(self.protocol_fee)?
            .checked_add(self.brand_refund)
    }
}
