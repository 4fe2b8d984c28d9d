//! Prmission Allocator - Basis-point splitting with an explicit remainder
//!
//! This is a **pure function crate**: no state, no ledgers, no transfers.
//!
//! - Input: a total amount and an ordered list of `(recipient, bps)` weights
//! - Output: one share per weight plus a remainder share
//!
//! Each weighted share is `floor(total * bps / 10000)` in integer arithmetic.
//! The remainder recipient receives `total - sum(shares)`, so the split is
//! exactly conservative: no dust is created or destroyed. The remainder
//! recipient is always the party who absorbs rounding; no other rounding
//! policy is supported.

use prmission_types::{
    Amount, Bps, CampaignSettlement, EscrowSettlement, ProtocolError, BPS_DENOMINATOR,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Allocation errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AllocationError {
    #[error("Weights sum to {total} bps, exceeding 10000")]
    InvalidWeights { total: u32 },

    #[error("Arithmetic overflow while allocating {total}")]
    Overflow { total: u128 },
}

impl From<AllocationError> for ProtocolError {
    fn from(e: AllocationError) -> Self {
        match e {
            AllocationError::InvalidWeights { total } => ProtocolError::SplitExceedsTotal { total },
            AllocationError::Overflow { .. } => ProtocolError::ArithmeticOverflow,
        }
    }
}

pub type AllocationResult<T> = Result<T, AllocationError>;

/// One recipient's portion of an allocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Share<R> {
    pub recipient: R,
    pub amount: Amount,
}

/// The full result of an allocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allocation<R> {
    /// Weighted shares, in the order the weights were supplied
    pub shares: Vec<Share<R>>,
    pub remainder: Share<R>,
}

impl<R: PartialEq> Allocation<R> {
    /// Everything allocated to `recipient`, including the remainder
    pub fn amount_for(&self, recipient: &R) -> Amount {
        self.shares
            .iter()
            .chain(std::iter::once(&self.remainder))
            .filter(|s| &s.recipient == recipient)
            .fold(Amount::ZERO, |acc, s| Amount(acc.0 + s.amount.0))
    }
}

impl<R> Allocation<R> {
    pub fn total(&self) -> Amount {
        self.shares
            .iter()
            .fold(self.remainder.amount, |acc, s| Amount(acc.0 + s.amount.0))
    }
}

/// Split `total` by basis-point weights, giving the remainder to `remainder_to`
pub fn allocate<R>(
    total: Amount,
    weights: Vec<(R, Bps)>,
    remainder_to: R,
) -> AllocationResult<Allocation<R>> {
    let weight_sum: u32 = weights.iter().map(|(_, bps)| bps.0 as u32).sum();
    if weight_sum > BPS_DENOMINATOR as u32 {
        return Err(AllocationError::InvalidWeights { total: weight_sum });
    }

    let overflow = || AllocationError::Overflow { total: total.0 };

    let mut allocated: u128 = 0;
    let mut shares = Vec::with_capacity(weights.len());
    for (recipient, bps) in weights {
        let amount = total.mul_bps(bps).map_err(|_| overflow())?;
        allocated = allocated.checked_add(amount.0).ok_or_else(overflow)?;
        shares.push(Share { recipient, amount });
    }

    let remainder = total.0.checked_sub(allocated).ok_or_else(overflow)?;

    Ok(Allocation {
        shares,
        remainder: Share {
            recipient: remainder_to,
            amount: Amount(remainder),
        },
    })
}

/// Payees of a permission escrow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EscrowRole {
    Grantor,
    Protocol,
    Depositor,
}

/// Payees of a campaign
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CampaignRole {
    Creator,
    Manager,
    Referral,
    Protocol,
    Brand,
}

/// Normal escrow settlement: grantor and protocol by rate, depositor refunded the rest
pub fn escrow_settlement(
    amount: Amount,
    compensation_bps: Bps,
    protocol_bps: Bps,
) -> AllocationResult<EscrowSettlement> {
    let allocation = allocate(
        amount,
        vec![
            (EscrowRole::Grantor, compensation_bps),
            (EscrowRole::Protocol, protocol_bps),
        ],
        EscrowRole::Depositor,
    )?;

    Ok(EscrowSettlement {
        grantor_share: allocation.amount_for(&EscrowRole::Grantor),
        protocol_fee: allocation.amount_for(&EscrowRole::Protocol),
        depositor_refund: allocation.amount_for(&EscrowRole::Depositor),
    })
}

/// Dispute resolution: the protocol fee comes off the top, then the
/// distributable remainder is split `grantor_bps` / `10000 - grantor_bps`
pub fn dispute_resolution(
    amount: Amount,
    grantor_bps: Bps,
    protocol_bps: Bps,
) -> AllocationResult<EscrowSettlement> {
    let fee = allocate(
        amount,
        vec![(EscrowRole::Protocol, protocol_bps)],
        EscrowRole::Depositor,
    )?;
    let protocol_fee = fee.amount_for(&EscrowRole::Protocol);
    let distributable = fee.remainder.amount;

    let split = allocate(
        distributable,
        vec![(EscrowRole::Grantor, grantor_bps)],
        EscrowRole::Depositor,
    )?;

    Ok(EscrowSettlement {
        grantor_share: split.amount_for(&EscrowRole::Grantor),
        protocol_fee,
        depositor_refund: split.amount_for(&EscrowRole::Depositor),
    })
}

/// Campaign settlement: four fixed-rate payees, brand refunded the rest
pub fn campaign_settlement(
    amount: Amount,
    creator_bps: Bps,
    manager_bps: Bps,
    referral_bps: Bps,
    protocol_bps: Bps,
) -> AllocationResult<CampaignSettlement> {
    let allocation = allocate(
        amount,
        vec![
            (CampaignRole::Creator, creator_bps),
            (CampaignRole::Manager, manager_bps),
            (CampaignRole::Referral, referral_bps),
            (CampaignRole::Protocol, protocol_bps),
        ],
        CampaignRole::Brand,
    )?;

    Ok(CampaignSettlement {
        creator_share: allocation.amount_for(&CampaignRole::Creator),
        manager_share: allocation.amount_for(&CampaignRole::Manager),
        referral_share: allocation.amount_for(&CampaignRole::Referral),
        protocol_fee: allocation.amount_for(&CampaignRole::Protocol),
        brand_refund: allocation.amount_for(&CampaignRole::Brand),
    })
}
