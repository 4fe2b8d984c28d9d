//! Error types for Prmission
//!
//! Every failure is detected before any state is mutated. Callers branch on
//! [`ProtocolError::kind`] rather than on message text.

use thiserror::Error;

/// Result type for Prmission operations
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Coarse classification of a [`ProtocolError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Malformed or out-of-range input
    Validation,
    /// Caller is not allowed to perform the operation
    Authorization,
    /// Identity or reputation check failed
    Trust,
    /// Operation attempted outside its time window
    Temporal,
    /// Record is in the wrong lifecycle state
    State,
    /// Referenced record does not exist
    NotFound,
    /// Funds movement rejected by the ledger
    Funds,
    /// Storage, oracle or configuration failure
    Infrastructure,
}

/// Prmission error types
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    // ========================================================================
    // Validation
    // ========================================================================
    #[error("Data category must not be empty")]
    EmptyCategory,

    #[error("Compensation {requested} bps exceeds maximum {max} bps")]
    CompensationTooHigh { requested: u16, max: u16 },

    #[error("Basis points {bps} exceed 10000")]
    InvalidBps { bps: u16 },

    #[error("Split of {total} bps exceeds 10000")]
    SplitExceedsTotal { total: u32 },

    #[error("Amount must be greater than zero")]
    ZeroValue,

    #[error("Invalid amount: {input}")]
    InvalidAmount { input: String },

    #[error("Invalid address: {reason}")]
    InvalidAddress { reason: String },

    #[error("Too many trusted reviewers: {count} (max {max})")]
    TooManyReviewers { count: usize, max: usize },

    #[error("Escrow amount {offered} is below creator floor price {floor}")]
    BelowCreatorFloorPrice { offered: u128, floor: u128 },

    #[error("Invalid creator profile: {reason}")]
    InvalidCreatorProfile { reason: String },

    #[error("Cannot rescue the payment token")]
    CannotRescuePaymentToken,

    #[error("Arithmetic overflow")]
    ArithmeticOverflow,

    // ========================================================================
    // Authorization
    // ========================================================================
    #[error("Caller is not the grantor of permission {permission_id}")]
    NotYourPermission { permission_id: String },

    #[error("Caller {caller} is not authorized under permission {permission_id}")]
    NotAuthorizedMerchant { permission_id: String, caller: String },

    #[error("Caller is not authorized to settle {record_id}")]
    NotAuthorizedToSettle { record_id: String },

    #[error("Caller is neither owner nor wallet of agent {agent_id}")]
    NotAgentOwnerOrWallet { agent_id: String },

    #[error("Caller is not the depositor of escrow {escrow_id}")]
    NotYourEscrow { escrow_id: String },

    #[error("Caller is not a party to escrow {escrow_id}")]
    NotEscrowParty { escrow_id: String },

    #[error("Caller is not the brand of campaign {campaign_id}")]
    NotCampaignBrand { campaign_id: String },

    #[error("Caller is not a party to campaign {campaign_id}")]
    NotCampaignParty { campaign_id: String },

    #[error("Caller is not the protocol owner")]
    NotOwner,

    // ========================================================================
    // Trust
    // ========================================================================
    #[error("Agent {agent_id} is not registered")]
    AgentNotRegistered { agent_id: String },

    #[error("An agent identity is required")]
    AgentIdRequired,

    #[error("Agent {agent_id} has no reputation")]
    AgentHasNoReputation { agent_id: String },

    #[error("Agent {agent_id} reputation {score} is below minimum {minimum}")]
    AgentBelowMinimumReputation {
        agent_id: String,
        score: i128,
        minimum: i128,
    },

    // ========================================================================
    // Temporal
    // ========================================================================
    #[error("Permission {permission_id} expired at {expired_at}")]
    PermissionExpired {
        permission_id: String,
        expired_at: String,
    },

    #[error("Dispute window for {record_id} is still open until {closes_at}")]
    DisputeWindowStillOpen { record_id: String, closes_at: String },

    #[error("Dispute window for {record_id} closed at {closed_at}")]
    DisputeWindowClosed { record_id: String, closed_at: String },

    #[error("Escrow {escrow_id} is not refundable")]
    NotRefundable { escrow_id: String },

    #[error("Permission {permission_id} has not expired")]
    NotExpired { permission_id: String },

    // ========================================================================
    // State
    // ========================================================================
    #[error("Permission {permission_id} is not active")]
    PermissionNotActive { permission_id: String },

    #[error("Escrow {escrow_id} is {status}, expected {expected}")]
    InvalidEscrowState {
        escrow_id: String,
        status: String,
        expected: String,
    },

    #[error("Campaign {campaign_id} is {status}, expected {expected}")]
    InvalidCampaignState {
        campaign_id: String,
        status: String,
        expected: String,
    },

    #[error("{record_id} is not disputed")]
    NotDisputed { record_id: String },

    #[error("Protocol is paused")]
    Paused,

    #[error("Creator {creator} is not accepting campaigns")]
    CreatorUnavailable { creator: String },

    // ========================================================================
    // Not found
    // ========================================================================
    #[error("Permission {permission_id} not found")]
    PermissionNotFound { permission_id: String },

    #[error("Escrow {escrow_id} not found")]
    EscrowNotFound { escrow_id: String },

    #[error("Campaign {campaign_id} not found")]
    CampaignNotFound { campaign_id: String },

    #[error("Creator {creator} is not registered")]
    CreatorNotRegistered { creator: String },

    // ========================================================================
    // Funds
    // ========================================================================
    #[error("Insufficient funds in {account}: requested {requested}, available {available}")]
    InsufficientFunds {
        account: String,
        requested: u128,
        available: u128,
    },

    #[error("Insufficient allowance from {owner} to {spender}: requested {requested}, approved {approved}")]
    InsufficientAllowance {
        owner: String,
        spender: String,
        requested: u128,
        approved: u128,
    },

    // ========================================================================
    // Infrastructure
    // ========================================================================
    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    #[error("Storage error: {message}")]
    Storage { message: String },

    #[error("Oracle unavailable: {message}")]
    OracleUnavailable { message: String },
}

impl ProtocolError {
    pub fn kind(&self) -> ErrorKind {
        use ProtocolError::*;
        match self {
            EmptyCategory
            | CompensationTooHigh { .. }
            | InvalidBps { .. }
            | SplitExceedsTotal { .. }
            | ZeroValue
            | InvalidAmount { .. }
            | InvalidAddress { .. }
            | TooManyReviewers { .. }
            | BelowCreatorFloorPrice { .. }
            | InvalidCreatorProfile { .. }
            | CannotRescuePaymentToken
            | ArithmeticOverflow => ErrorKind::Validation,

            NotYourPermission { .. }
            | NotAuthorizedMerchant { .. }
            | NotAuthorizedToSettle { .. }
            | NotAgentOwnerOrWallet { .. }
            | NotYourEscrow { .. }
            | NotEscrowParty { .. }
            | NotCampaignBrand { .. }
            | NotCampaignParty { .. }
            | NotOwner => ErrorKind::Authorization,

            AgentNotRegistered { .. }
            | AgentIdRequired
            | AgentHasNoReputation { .. }
            | AgentBelowMinimumReputation { .. } => ErrorKind::Trust,

            PermissionExpired { .. }
            | DisputeWindowStillOpen { .. }
            | DisputeWindowClosed { .. }
            | NotRefundable { .. }
            | NotExpired { .. } => ErrorKind::Temporal,

            PermissionNotActive { .. }
            | InvalidEscrowState { .. }
            | InvalidCampaignState { .. }
            | NotDisputed { .. }
            | Paused
            | CreatorUnavailable { .. } => ErrorKind::State,

            PermissionNotFound { .. }
            | EscrowNotFound { .. }
            | CampaignNotFound { .. }
            | CreatorNotRegistered { .. } => ErrorKind::NotFound,

            InsufficientFunds { .. } | InsufficientAllowance { .. } => ErrorKind::Funds,

            InvalidConfig { .. } | Storage { .. } | OracleUnavailable { .. } => {
                ErrorKind::Infrastructure
            }
        }
    }
}
