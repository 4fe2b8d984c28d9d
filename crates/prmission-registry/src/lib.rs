//! Prmission Registry - Creator profiles consumed by the campaign ledger
//!
//! Creators publish a media kit (category, floor price, referral terms) that
//! brands discover before funding a campaign. The campaign ledger reads a
//! profile through [`CreatorDirectory`] and, after a settlement, reports the
//! creator's earnings back through the same seam.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use prmission_types::{
    AccountId, Amount, Bps, CreatorProfile, CreatorRegistration, ProtocolError,
};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::info;

/// Errors raised by the registry
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Handle must not be empty")]
    EmptyHandle,

    #[error("Category must not be empty")]
    EmptyCategory,

    #[error("Referral {bps} bps exceeds 10000")]
    InvalidReferralBps { bps: u16 },

    #[error("Referral share requires a referral address")]
    MissingReferralAddress,

    #[error("Creator {creator} is not registered")]
    NotRegistered { creator: AccountId },

    #[error("Earnings overflow for {creator}")]
    Overflow { creator: AccountId },
}

impl From<RegistryError> for ProtocolError {
    fn from(e: RegistryError) -> Self {
        match e {
            RegistryError::EmptyHandle => ProtocolError::InvalidCreatorProfile {
                reason: "handle must not be empty".to_string(),
            },
            RegistryError::EmptyCategory => ProtocolError::EmptyCategory,
            RegistryError::InvalidReferralBps { bps } => ProtocolError::InvalidBps { bps },
            RegistryError::MissingReferralAddress => ProtocolError::InvalidAddress {
                reason: "referral share requires a referral address".to_string(),
            },
            RegistryError::NotRegistered { creator } => ProtocolError::CreatorNotRegistered {
                creator: creator.to_string(),
            },
            RegistryError::Overflow { .. } => ProtocolError::ArithmeticOverflow,
        }
    }
}

pub type Result<T> = std::result::Result<T, RegistryError>;

/// Read side plus the single write the campaign ledger performs
#[async_trait]
pub trait CreatorDirectory: Send + Sync {
    async fn get(&self, creator: &AccountId) -> prmission_types::Result<Option<CreatorProfile>>;

    /// Credit a completed campaign to the creator's history
    async fn record_campaign(
        &self,
        creator: &AccountId,
        earned: Amount,
    ) -> prmission_types::Result<()>;
}

#[derive(Default)]
struct RegistryState {
    profiles: HashMap<AccountId, CreatorProfile>,
    /// Registration order, for stable discovery results
    order: Vec<AccountId>,
}

/// In-memory creator registry
#[derive(Clone, Default)]
pub struct InMemoryCreatorRegistry {
    state: Arc<RwLock<RegistryState>>,
}

impl InMemoryCreatorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish or update `wallet`'s media kit
    ///
    /// Re-registering replaces the published terms, keeps the campaign
    /// history and makes the creator available again.
    pub async fn register_as_creator(
        &self,
        wallet: AccountId,
        registration: CreatorRegistration,
    ) -> Result<CreatorProfile> {
        if registration.handle.trim().is_empty() {
            return Err(RegistryError::EmptyHandle);
        }
        if registration.category.trim().is_empty() {
            return Err(RegistryError::EmptyCategory);
        }
        if !registration.referral_bps.is_fraction() {
            return Err(RegistryError::InvalidReferralBps {
                bps: registration.referral_bps.value(),
            });
        }
        if registration.referral_bps > Bps::ZERO && registration.referral_address.is_none() {
            return Err(RegistryError::MissingReferralAddress);
        }

        let mut state = self.state.write().await;
        let (total_campaigns, total_earned, registered_at, is_new) =
            match state.profiles.get(&wallet) {
                Some(p) => (p.total_campaigns, p.total_earned, p.registered_at, false),
                None => (0, Amount::ZERO, Utc::now(), true),
            };
        let profile = CreatorProfile {
            wallet: wallet.clone(),
            handle: registration.handle,
            category: registration.category,
            follower_count: registration.follower_count,
            engagement_rate_bps: registration.engagement_rate_bps,
            floor_price: registration.floor_price,
            referral_bps: registration.referral_bps,
            referral_address: registration.referral_address,
            content_rules: registration.content_rules,
            available: true,
            total_campaigns,
            total_earned,
            registered_at,
        };

        if is_new {
            state.order.push(wallet.clone());
        }
        state.profiles.insert(wallet.clone(), profile.clone());

        info!(
            "Registered creator {} ({}) in {}",
            wallet, profile.handle, profile.category
        );
        Ok(profile)
    }

    pub async fn get_profile(&self, wallet: &AccountId) -> Result<CreatorProfile> {
        self.state
            .read()
            .await
            .profiles
            .get(wallet)
            .cloned()
            .ok_or_else(|| RegistryError::NotRegistered {
                creator: wallet.clone(),
            })
    }

    /// Available creators in `category` whose floor fits `max_floor_price`
    pub async fn list_creators(&self, category: &str, max_floor_price: Amount) -> Vec<AccountId> {
        let state = self.state.read().await;
        state
            .order
            .iter()
            .filter_map(|wallet| state.profiles.get(wallet))
            .filter(|p| p.available && p.category == category && p.floor_price <= max_floor_price)
            .map(|p| p.wallet.clone())
            .collect()
    }

    /// Stop accepting new campaigns
    pub async fn deactivate(&self, wallet: &AccountId) -> Result<()> {
        let mut state = self.state.write().await;
        let profile = state
            .profiles
            .get_mut(wallet)
            .ok_or_else(|| RegistryError::NotRegistered {
                creator: wallet.clone(),
            })?;
        profile.available = false;
        info!("Creator {} deactivated", wallet);
        Ok(())
    }
}

#[async_trait]
impl CreatorDirectory for InMemoryCreatorRegistry {
    async fn get(&self, creator: &AccountId) -> prmission_types::Result<Option<CreatorProfile>> {
        Ok(self.state.read().await.profiles.get(creator).cloned())
    }

    async fn record_campaign(
        &self,
        creator: &AccountId,
        earned: Amount,
    ) -> prmission_types::Result<()> {
        let mut state = self.state.write().await;
        let profile = state
            .profiles
            .get_mut(creator)
            .ok_or_else(|| RegistryError::NotRegistered {
                creator: creator.clone(),
            })?;
        let total_earned = profile
            .total_earned
            .checked_add(earned)
            .ok_or_else(|| RegistryError::Overflow {
                creator: creator.clone(),
            })?;
        profile.total_campaigns += 1;
        profile.total_earned = total_earned;
        info!("Recorded campaign for {}: earned {}", creator, earned);
        Ok(())
    }
}
