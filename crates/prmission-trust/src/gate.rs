//! The trust gate
//!
//! Enforcement is two switches evaluated once per operation:
//!
//! | identity | reputation | requirement                                   |
//! |----------|------------|-----------------------------------------------|
//! | off      | any        | none; the presented handle is ignored         |
//! | on       | off        | registered handle controlled by the caller    |
//! | on       | on         | the above, plus reviewed and at the minimum   |
//!
//! Reputation enforcement has no effect while identity enforcement is off.

use std::fmt;
use std::sync::Arc;

use prmission_types::{AccountId, AgentIdentityId, ProtocolError, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{IdentityRegistry, ReputationRegistry};

/// Enforcement switches
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrustPolicy {
    pub identity_enforced: bool,
    pub reputation_enforced: bool,
    pub min_reputation_score: i128,
}

/// Read-only trust projection for a handle and caller
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrustReport {
    pub registered: bool,
    pub authorized: bool,
    /// True when reputation enforcement is off, or the identity has feedback
    /// scoring at least the configured minimum
    pub reputable: bool,
    pub score: i128,
    pub feedback_count: u64,
}

/// Identity and reputation gate over the external registries
#[derive(Clone, Default)]
pub struct TrustGate {
    identity: Option<Arc<dyn IdentityRegistry>>,
    reputation: Option<Arc<dyn ReputationRegistry>>,
    reviewers: Vec<AccountId>,
    policy: TrustPolicy,
}

impl fmt::Debug for TrustGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrustGate")
            .field("identity", &self.identity.is_some())
            .field("reputation", &self.reputation.is_some())
            .field("reviewers", &self.reviewers.len())
            .field("policy", &self.policy)
            .finish()
    }
}

impl TrustGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn policy(&self) -> TrustPolicy {
        self.policy
    }

    pub fn reviewers(&self) -> &[AccountId] {
        &self.reviewers
    }

    pub fn has_identity_registry(&self) -> bool {
        self.identity.is_some()
    }

    pub fn has_reputation_registry(&self) -> bool {
        self.reputation.is_some()
    }

    pub fn set_identity_registry(&mut self, registry: Option<Arc<dyn IdentityRegistry>>) {
        self.identity = registry;
    }

    pub fn set_reputation_registry(&mut self, registry: Option<Arc<dyn ReputationRegistry>>) {
        self.reputation = registry;
    }

    pub fn set_reviewers(&mut self, reviewers: Vec<AccountId>) {
        self.reviewers = reviewers;
    }

    /// Replace the policy, rejecting switches whose registry is missing
    pub fn set_policy(&mut self, policy: TrustPolicy) -> Result<()> {
        if policy.identity_enforced && self.identity.is_none() {
            return Err(ProtocolError::InvalidConfig {
                message: "identity enforcement requires an identity registry".to_string(),
            });
        }
        if policy.reputation_enforced && self.reputation.is_none() {
            return Err(ProtocolError::InvalidConfig {
                message: "reputation enforcement requires a reputation registry".to_string(),
            });
        }
        self.policy = policy;
        Ok(())
    }

    /// Report what the registries say about `id` acting through `caller`
    ///
    /// An unregistered handle reports every flag false.
    pub async fn check_trust(&self, id: AgentIdentityId, caller: &AccountId) -> Result<TrustReport> {
        let Some(identity_registry) = &self.identity else {
            return Ok(TrustReport::default());
        };
        let Some(identity) = identity_registry.resolve(id).await? else {
            return Ok(TrustReport::default());
        };

        let summary = match &self.reputation {
            Some(registry) => registry.summary(id, &self.reviewers).await?,
            None => None,
        };
        let (score, feedback_count) = summary
            .map(|s| (s.score, s.feedback_count))
            .unwrap_or((0, 0));

        let reputable = !self.policy.reputation_enforced
            || (feedback_count > 0 && score >= self.policy.min_reputation_score);

        Ok(TrustReport {
            registered: true,
            authorized: identity.is_controlled_by(caller),
            reputable,
            score,
            feedback_count,
        })
    }

    /// Fail unless `caller` may act under the presented handle
    pub async fn enforce(&self, id: Option<AgentIdentityId>, caller: &AccountId) -> Result<()> {
        let result = match (self.policy.identity_enforced, self.policy.reputation_enforced) {
            (false, _) => Ok(()),
            (true, false) => self.require_identity(id, caller).await.map(|_| ()),
            (true, true) => match self.require_identity(id, caller).await {
                Ok(id) => self.require_reputation(id).await,
                Err(e) => Err(e),
            },
        };

        if let Err(e) = &result {
            debug!(caller = %caller, error = %e, "Trust gate rejected caller");
        }
        result
    }

    async fn require_identity(
        &self,
        id: Option<AgentIdentityId>,
        caller: &AccountId,
    ) -> Result<AgentIdentityId> {
        let id = id
            .filter(|id| id.value() != 0)
            .ok_or(ProtocolError::AgentIdRequired)?;
        let registry = self.identity.as_ref().ok_or_else(|| ProtocolError::InvalidConfig {
            message: "identity registry not configured".to_string(),
        })?;

        let identity = registry
            .resolve(id)
            .await?
            .ok_or_else(|| ProtocolError::AgentNotRegistered {
                agent_id: id.to_string(),
            })?;

        if !identity.is_controlled_by(caller) {
            return Err(ProtocolError::NotAgentOwnerOrWallet {
                agent_id: id.to_string(),
            });
        }
        Ok(id)
    }

    async fn require_reputation(&self, id: AgentIdentityId) -> Result<()> {
        let registry = self.reputation.as_ref().ok_or_else(|| ProtocolError::InvalidConfig {
            message: "reputation registry not configured".to_string(),
        })?;

        let summary = registry
            .summary(id, &self.reviewers)
            .await?
            .filter(|s| s.feedback_count > 0)
            .ok_or_else(|| ProtocolError::AgentHasNoReputation {
                agent_id: id.to_string(),
            })?;

        if summary.score < self.policy.min_reputation_score {
            return Err(ProtocolError::AgentBelowMinimumReputation {
                agent_id: id.to_string(),
                score: summary.score,
                minimum: self.policy.min_reputation_score,
            });
        }
        Ok(())
    }
}
