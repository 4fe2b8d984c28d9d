//! Creator profile types
//!
//! Profiles belong to the external creator registry. The campaign ledger reads
//! them and reports completed campaigns back; it never owns them.

use crate::{AccountId, Amount, Bps};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A creator's published media kit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatorProfile {
    pub wallet: AccountId,
    pub handle: String,
    pub category: String,
    pub follower_count: u64,
    pub engagement_rate_bps: Bps,
    /// Minimum escrow accepted for a campaign
    pub floor_price: Amount,
    pub referral_bps: Bps,
    pub referral_address: Option<AccountId>,
    pub content_rules: String,
    pub available: bool,
    pub total_campaigns: u64,
    pub total_earned: Amount,
    pub registered_at: DateTime<Utc>,
}

/// Registration request for a creator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatorRegistration {
    pub handle: String,
    pub category: String,
    pub follower_count: u64,
    pub engagement_rate_bps: Bps,
    pub floor_price: Amount,
    pub referral_bps: Bps,
    pub referral_address: Option<AccountId>,
    pub content_rules: String,
}
