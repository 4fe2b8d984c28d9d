//! Permission types for Prmission
//!
//! A Permission is a grantor's consent for an agent (or any agent) to use a
//! data category for a purpose, in exchange for a compensation rate and an
//! optional upfront fee.

use crate::{AccountId, AgentScope, Amount, Bps, PermissionId};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle status of a permission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PermissionStatus {
    Active,
    Revoked,
    Expired,
}

impl PermissionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Revoked => "revoked",
            Self::Expired => "expired",
        }
    }
}

impl fmt::Display for PermissionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A consent record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permission {
    pub id: PermissionId,
    /// The data owner who granted consent
    pub grantor: AccountId,
    /// Who may deposit against this permission
    pub agent: AgentScope,
    pub data_category: String,
    pub purpose: String,
    /// Grantor's share of each settled escrow
    pub compensation_bps: Bps,
    /// Paid to the grantor at deposit time, outside the escrowed principal
    pub upfront_fee: Amount,
    pub valid_until: DateTime<Utc>,
    /// Stored status. Use [`Permission::effective_status`] for reads.
    pub status: PermissionStatus,
    pub created_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
}

impl Permission {
    /// Expiry is strict: the permission is still usable at `valid_until`
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.valid_until
    }

    /// Stored status with expiry applied lazily
    pub fn effective_status(&self, now: DateTime<Utc>) -> PermissionStatus {
        match self.status {
            PermissionStatus::Active if self.is_expired_at(now) => PermissionStatus::Expired,
            status => status,
        }
    }

    /// When un-reported escrows under this permission become refundable.
    ///
    /// `None` while the permission is still active and unexpired.
    pub fn refundable_from(&self, now: DateTime<Utc>, grace: Duration) -> Option<DateTime<Utc>> {
        match self.effective_status(now) {
            PermissionStatus::Active => None,
            PermissionStatus::Revoked => Some(self.revoked_at.unwrap_or(self.valid_until) + grace),
            PermissionStatus::Expired => Some(self.valid_until + grace),
        }
    }

    /// Read-only access projection for a prospective agent
    pub fn access_for(&self, caller: &AccountId, now: DateTime<Utc>) -> AccessGrant {
        AccessGrant {
            permitted: self.effective_status(now) == PermissionStatus::Active
                && self.agent.admits(caller),
            compensation_bps: self.compensation_bps,
            upfront_fee: self.upfront_fee,
            valid_until: self.valid_until,
        }
    }
}

/// Parameters of a new permission
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrantRequest {
    pub agent: AgentScope,
    pub data_category: String,
    pub purpose: String,
    pub compensation_bps: Bps,
    pub upfront_fee: Amount,
    /// Validity measured from the grant time
    pub valid_for: Duration,
}

impl GrantRequest {
    /// A request open to any agent with no upfront fee
    pub fn open(
        data_category: impl Into<String>,
        purpose: impl Into<String>,
        compensation_bps: Bps,
        valid_for: Duration,
    ) -> Self {
        Self {
            agent: AgentScope::Any,
            data_category: data_category.into(),
            purpose: purpose.into(),
            compensation_bps,
            upfront_fee: Amount::ZERO,
            valid_for,
        }
    }

    pub fn for_agent(mut self, agent: AccountId) -> Self {
        self.agent = AgentScope::Only(agent);
        self
    }

    pub fn with_upfront_fee(mut self, fee: Amount) -> Self {
        self.upfront_fee = fee;
        self
    }
}

/// Result of an access check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessGrant {
    pub permitted: bool,
    pub compensation_bps: Bps,
    pub upfront_fee: Amount,
    pub valid_until: DateTime<Utc>,
}
