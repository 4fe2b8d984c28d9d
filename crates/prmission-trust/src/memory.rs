//! In-memory oracle implementations

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use prmission_types::{AccountId, AgentIdentityId, ProtocolError, Result};
use tokio::sync::RwLock;
use tracing::info;

use crate::{AgentIdentity, IdentityRegistry, ReputationRegistry, ReputationSummary};

#[derive(Default)]
struct IdentityState {
    identities: HashMap<AgentIdentityId, AgentIdentity>,
    last_id: u64,
}

/// In-memory identity registry
///
/// Handles are assigned sequentially starting at 1; 0 is never a valid handle.
#[derive(Clone, Default)]
pub struct InMemoryIdentityRegistry {
    state: Arc<RwLock<IdentityState>>,
}

impl InMemoryIdentityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new identity owned by `owner`
    pub async fn register(&self, owner: AccountId) -> AgentIdentityId {
        let mut state = self.state.write().await;
        state.last_id += 1;
        let id = AgentIdentityId(state.last_id);
        state.identities.insert(
            id,
            AgentIdentity {
                id,
                owner: owner.clone(),
                wallet: None,
            },
        );
        info!("Registered agent identity {} for {}", id, owner);
        id
    }

    /// Delegate operational control to `wallet` (owner only)
    pub async fn set_wallet(
        &self,
        caller: &AccountId,
        id: AgentIdentityId,
        wallet: AccountId,
    ) -> Result<()> {
        let mut state = self.state.write().await;
        let identity = state
            .identities
            .get_mut(&id)
            .ok_or_else(|| ProtocolError::AgentNotRegistered {
                agent_id: id.to_string(),
            })?;
        if &identity.owner != caller {
            return Err(ProtocolError::NotAgentOwnerOrWallet {
                agent_id: id.to_string(),
            });
        }
        identity.wallet = Some(wallet);
        Ok(())
    }
}

#[async_trait]
impl IdentityRegistry for InMemoryIdentityRegistry {
    async fn resolve(&self, id: AgentIdentityId) -> Result<Option<AgentIdentity>> {
        Ok(self.state.read().await.identities.get(&id).cloned())
    }
}

/// In-memory reputation registry
///
/// Each reviewer holds one score per identity; a new score replaces the
/// reviewer's previous one. The aggregate is the integer mean of the scores
/// given by the requested reviewers.
#[derive(Clone, Default)]
pub struct InMemoryReputationRegistry {
    scores: Arc<RwLock<HashMap<AgentIdentityId, Vec<(AccountId, i128)>>>>,
}

impl InMemoryReputationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `reviewer`'s score for `id`
    pub async fn give_feedback(&self, reviewer: AccountId, id: AgentIdentityId, score: i128) {
        let mut scores = self.scores.write().await;
        let entries = scores.entry(id).or_default();
        match entries.iter_mut().find(|(r, _)| r == &reviewer) {
            Some(entry) => entry.1 = score,
            None => entries.push((reviewer, score)),
        }
    }
}

#[async_trait]
impl ReputationRegistry for InMemoryReputationRegistry {
    async fn summary(
        &self,
        id: AgentIdentityId,
        reviewers: &[AccountId],
    ) -> Result<Option<ReputationSummary>> {
        let scores = self.scores.read().await;
        let Some(entries) = scores.get(&id) else {
            return Ok(None);
        };

        let counted: Vec<i128> = entries
            .iter()
            .filter(|(reviewer, _)| reviewers.contains(reviewer))
            .map(|(_, score)| *score)
            .collect();

        if counted.is_empty() {
            return Ok(Some(ReputationSummary {
                score: 0,
                feedback_count: 0,
            }));
        }

        let sum = counted
            .iter()
            .try_fold(0i128, |acc, s| acc.checked_add(*s))
            .ok_or(ProtocolError::ArithmeticOverflow)?;
        Ok(Some(ReputationSummary {
            score: sum / counted.len() as i128,
            feedback_count: counted.len() as u64,
        }))
    }
}
