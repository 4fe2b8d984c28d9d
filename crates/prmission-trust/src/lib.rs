//! Prmission Trust - Identity and reputation gating for depositors
//!
//! Agents may present a handle in an external identity registry when they
//! fund an escrow. The [`TrustGate`] answers two questions about that handle:
//!
//! - Is the caller the identity's owner or its delegated wallet?
//! - Does the identity carry enough reputation from trusted reviewers?
//!
//! Both registries are external collaborators reached through the
//! [`IdentityRegistry`] and [`ReputationRegistry`] traits. In-memory
//! implementations are provided for tests and local deployments.

pub mod gate;
pub mod memory;

pub use gate::{TrustGate, TrustPolicy, TrustReport};
pub use memory::{InMemoryIdentityRegistry, InMemoryReputationRegistry};

use async_trait::async_trait;
use prmission_types::{AccountId, AgentIdentityId, Result};
use serde::{Deserialize, Serialize};

/// An identity record as resolved from the registry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentIdentity {
    pub id: AgentIdentityId,
    pub owner: AccountId,
    /// Secondary account allowed to act for the identity
    pub wallet: Option<AccountId>,
}

impl AgentIdentity {
    /// Whether `caller` may act as this identity
    pub fn is_controlled_by(&self, caller: &AccountId) -> bool {
        &self.owner == caller || self.wallet.as_ref() == Some(caller)
    }
}

/// Aggregated feedback for one identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReputationSummary {
    pub score: i128,
    pub feedback_count: u64,
}

/// External identity oracle
#[async_trait]
pub trait IdentityRegistry: Send + Sync {
    /// Resolve a handle; `Ok(None)` when it does not exist
    async fn resolve(&self, id: AgentIdentityId) -> Result<Option<AgentIdentity>>;
}

/// External reputation oracle
#[async_trait]
pub trait ReputationRegistry: Send + Sync {
    /// Aggregate feedback from `reviewers` only; `Ok(None)` when the identity
    /// has never been reviewed
    async fn summary(
        &self,
        id: AgentIdentityId,
        reviewers: &[AccountId],
    ) -> Result<Option<ReputationSummary>>;
}
