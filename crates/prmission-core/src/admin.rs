//! Owner-controlled settings shared by both engines
//!
//! Pausing blocks only the operations that bring new funds in (grant,
//! deposit, campaign creation). Everything that moves existing funds toward
//! a terminal state keeps working while paused.

use std::sync::Arc;

use prmission_trust::{IdentityRegistry, ReputationRegistry, TrustGate, TrustPolicy, TrustReport};
use prmission_types::{AccountId, AgentIdentityId, Applied, ProtocolError, ProtocolEvent, Result};
use tokio::sync::RwLock;
use tracing::{debug, info};

struct GovernanceState {
    owner: AccountId,
    treasury: AccountId,
    paused: bool,
    trust: TrustGate,
}

/// Ownership, treasury, pause flag and trust configuration
pub struct Governance {
    state: RwLock<GovernanceState>,
    vault: AccountId,
    max_trusted_reviewers: usize,
}

/// Settings read once at the start of an operation
#[derive(Debug, Clone)]
pub(crate) struct GovernanceSnapshot {
    pub owner: AccountId,
    pub treasury: AccountId,
    pub paused: bool,
    pub trust: TrustGate,
}

impl Governance {
    pub(crate) fn new(
        owner: AccountId,
        treasury: AccountId,
        vault: AccountId,
        max_trusted_reviewers: usize,
    ) -> Result<Self> {
        if owner == vault {
            return Err(ProtocolError::InvalidAddress {
                reason: "owner must differ from the custody account".to_string(),
            });
        }
        check_treasury(&treasury, &vault)?;
        Ok(Self {
            state: RwLock::new(GovernanceState {
                owner,
                treasury,
                paused: false,
                trust: TrustGate::new(),
            }),
            vault,
            max_trusted_reviewers,
        })
    }

    pub(crate) async fn snapshot(&self) -> GovernanceSnapshot {
        let state = self.state.read().await;
        GovernanceSnapshot {
            owner: state.owner.clone(),
            treasury: state.treasury.clone(),
            paused: state.paused,
            trust: state.trust.clone(),
        }
    }

    pub async fn owner(&self) -> AccountId {
        self.state.read().await.owner.clone()
    }

    pub async fn treasury(&self) -> AccountId {
        self.state.read().await.treasury.clone()
    }

    pub async fn is_paused(&self) -> bool {
        self.state.read().await.paused
    }

    pub async fn trust_policy(&self) -> TrustPolicy {
        self.state.read().await.trust.policy()
    }

    pub async fn trusted_reviewers(&self) -> Vec<AccountId> {
        self.state.read().await.trust.reviewers().to_vec()
    }

    pub async fn require_owner(&self, caller: &AccountId) -> Result<()> {
        if &self.state.read().await.owner != caller {
            debug!(caller = %caller, "Rejected owner-only call");
            return Err(ProtocolError::NotOwner);
        }
        Ok(())
    }

    pub async fn pause(&self, caller: &AccountId) -> Result<Applied<()>> {
        self.set_paused(caller, true).await
    }

    pub async fn unpause(&self, caller: &AccountId) -> Result<Applied<()>> {
        self.set_paused(caller, false).await
    }

    async fn set_paused(&self, caller: &AccountId, paused: bool) -> Result<Applied<()>> {
        let mut state = self.owned_state(caller).await?;
        if state.paused == paused {
            return Ok(Applied::new((), Vec::new()));
        }
        state.paused = paused;

        let event = if paused {
            info!("Protocol paused by {}", caller);
            ProtocolEvent::Paused { by: caller.clone() }
        } else {
            info!("Protocol unpaused by {}", caller);
            ProtocolEvent::Unpaused { by: caller.clone() }
        };
        Ok(Applied::single((), event))
    }

    pub async fn set_treasury(&self, caller: &AccountId, treasury: AccountId) -> Result<Applied<()>> {
        check_treasury(&treasury, &self.vault)?;
        let mut state = self.owned_state(caller).await?;
        state.treasury = treasury.clone();
        info!("Treasury set to {}", treasury);
        Ok(Applied::single((), ProtocolEvent::TreasuryUpdated { treasury }))
    }

    /// Replace or clear the identity oracle
    pub async fn set_identity_registry(
        &self,
        caller: &AccountId,
        registry: Option<Arc<dyn IdentityRegistry>>,
    ) -> Result<Applied<()>> {
        let mut state = self.owned_state(caller).await?;
        let configured = registry.is_some();
        let mut trust = state.trust.clone();
        trust.set_identity_registry(registry);
        trust.set_policy(trust.policy())?;
        state.trust = trust;
        info!(configured, "Identity registry updated");
        Ok(Applied::single(
            (),
            ProtocolEvent::IdentityRegistryUpdated { configured },
        ))
    }

    /// Replace or clear the reputation oracle
    pub async fn set_reputation_registry(
        &self,
        caller: &AccountId,
        registry: Option<Arc<dyn ReputationRegistry>>,
    ) -> Result<Applied<()>> {
        let mut state = self.owned_state(caller).await?;
        let configured = registry.is_some();
        let mut trust = state.trust.clone();
        trust.set_reputation_registry(registry);
        trust.set_policy(trust.policy())?;
        state.trust = trust;
        info!(configured, "Reputation registry updated");
        Ok(Applied::single(
            (),
            ProtocolEvent::ReputationRegistryUpdated { configured },
        ))
    }

    pub async fn set_identity_enforcement(
        &self,
        caller: &AccountId,
        enforced: bool,
    ) -> Result<Applied<()>> {
        self.update_policy(caller, |policy| policy.identity_enforced = enforced)
            .await
    }

    pub async fn set_reputation_enforcement(
        &self,
        caller: &AccountId,
        enforced: bool,
        min_score: i128,
    ) -> Result<Applied<()>> {
        self.update_policy(caller, |policy| {
            policy.reputation_enforced = enforced;
            policy.min_reputation_score = min_score;
        })
        .await
    }

    async fn update_policy<F>(&self, caller: &AccountId, change: F) -> Result<Applied<()>>
    where
        F: FnOnce(&mut TrustPolicy),
    {
        let mut state = self.owned_state(caller).await?;
        let mut policy = state.trust.policy();
        change(&mut policy);
        state.trust.set_policy(policy)?;

        info!(
            identity = policy.identity_enforced,
            reputation = policy.reputation_enforced,
            min_score = %policy.min_reputation_score,
            "Trust policy updated"
        );
        Ok(Applied::single(
            (),
            ProtocolEvent::TrustPolicyUpdated {
                identity_enforced: policy.identity_enforced,
                reputation_enforced: policy.reputation_enforced,
                min_reputation_score: policy.min_reputation_score,
            },
        ))
    }

    /// Replace the reviewers whose feedback counts toward reputation
    pub async fn set_trusted_reviewers(
        &self,
        caller: &AccountId,
        reviewers: Vec<AccountId>,
    ) -> Result<Applied<()>> {
        if reviewers.len() > self.max_trusted_reviewers {
            return Err(ProtocolError::TooManyReviewers {
                count: reviewers.len(),
                max: self.max_trusted_reviewers,
            });
        }
        let mut state = self.owned_state(caller).await?;
        let count = reviewers.len();
        state.trust.set_reviewers(reviewers);
        info!("Trusted reviewers updated: {}", count);
        Ok(Applied::single((), ProtocolEvent::TrustedReviewersUpdated { count }))
    }

    /// Read-only trust projection
    pub async fn check_agent_trust(
        &self,
        identity: AgentIdentityId,
        caller: &AccountId,
    ) -> Result<TrustReport> {
        let trust = self.state.read().await.trust.clone();
        trust.check_trust(identity, caller).await
    }

    async fn owned_state(
        &self,
        caller: &AccountId,
    ) -> Result<tokio::sync::RwLockWriteGuard<'_, GovernanceState>> {
        let state = self.state.write().await;
        if &state.owner != caller {
            debug!(caller = %caller, "Rejected owner-only call");
            return Err(ProtocolError::NotOwner);
        }
        Ok(state)
    }
}

fn check_treasury(treasury: &AccountId, vault: &AccountId) -> Result<()> {
    if treasury == vault {
        return Err(ProtocolError::InvalidAddress {
            reason: "treasury must differ from the custody account".to_string(),
        });
    }
    Ok(())
}
