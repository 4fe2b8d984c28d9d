//! Domain events emitted by protocol operations
//!
//! Events are returned in order alongside each mutation result so indexers
//! and dashboards can observe the protocol without a coupled transport.

use crate::{
    AccountId, AgentIdentityId, AgentScope, Amount, AssetId, Bps, CampaignId, CampaignSettlement,
    EscrowId, EscrowSettlement, PermissionId,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Protocol-wide events
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ProtocolEvent {
    PermissionGranted {
        permission_id: PermissionId,
        grantor: AccountId,
        agent: AgentScope,
        data_category: String,
        purpose: String,
        compensation_bps: Bps,
        upfront_fee: Amount,
        valid_until: DateTime<Utc>,
    },

    PermissionRevoked {
        permission_id: PermissionId,
        grantor: AccountId,
        timestamp: DateTime<Utc>,
    },

    PermissionExpired {
        permission_id: PermissionId,
        timestamp: DateTime<Utc>,
    },

    EscrowDeposited {
        escrow_id: EscrowId,
        permission_id: PermissionId,
        depositor: AccountId,
        agent_identity: Option<AgentIdentityId>,
        amount: Amount,
    },

    UpfrontFeePaid {
        permission_id: PermissionId,
        grantor: AccountId,
        amount: Amount,
    },

    OutcomeReported {
        escrow_id: EscrowId,
        outcome_value: Amount,
        outcome_type: String,
        dispute_window_end: DateTime<Utc>,
    },

    SettlementDisputed {
        escrow_id: EscrowId,
        disputed_by: AccountId,
        reason: String,
    },

    SettlementCompleted {
        escrow_id: EscrowId,
        settlement: EscrowSettlement,
    },

    DisputeResolved {
        escrow_id: EscrowId,
        grantor_bps: Bps,
        settlement: EscrowSettlement,
    },

    EscrowRefunded {
        escrow_id: EscrowId,
        depositor: AccountId,
        amount: Amount,
    },

    CampaignCreated {
        campaign_id: CampaignId,
        brand: AccountId,
        creator: AccountId,
        escrow_amount: Amount,
    },

    CampaignOutcomeReported {
        campaign_id: CampaignId,
        outcome_value: u128,
        dispute_window_end: DateTime<Utc>,
    },

    CampaignSettled {
        campaign_id: CampaignId,
        settlement: CampaignSettlement,
    },

    CampaignDisputed {
        campaign_id: CampaignId,
        disputed_by: AccountId,
    },

    CampaignRefunded {
        campaign_id: CampaignId,
        brand: AccountId,
        amount: Amount,
    },

    Paused {
        by: AccountId,
    },

    Unpaused {
        by: AccountId,
    },

    TreasuryUpdated {
        treasury: AccountId,
    },

    TrustPolicyUpdated {
        identity_enforced: bool,
        reputation_enforced: bool,
        min_reputation_score: i128,
    },

    TrustedReviewersUpdated {
        count: usize,
    },

    /// `configured` is false when the oracle was cleared
    IdentityRegistryUpdated {
        configured: bool,
    },

    ReputationRegistryUpdated {
        configured: bool,
    },

    TokensRescued {
        asset: AssetId,
        amount: Amount,
        to: AccountId,
    },
}

/// The result of a mutating operation together with the events it emitted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Applied<T> {
    pub value: T,
    pub events: Vec<ProtocolEvent>,
}

impl<T> Applied<T> {
    pub fn new(value: T, events: Vec<ProtocolEvent>) -> Self {
        Self { value, events }
    }

    pub fn single(value: T, event: ProtocolEvent) -> Self {
        Self {
            value,
            events: vec![event],
        }
    }

    pub fn into_value(self) -> T {
        self.value
    }
}
