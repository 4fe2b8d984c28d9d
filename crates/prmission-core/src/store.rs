//! Record stores
//!
//! Each entity has one authoritative id-to-record mapping. Ids are assigned
//! monotonically and never reused; records are never deleted, only replaced
//! with a later status.

use std::collections::HashMap;

use async_trait::async_trait;
use prmission_types::{
    AccountId, Campaign, CampaignId, Escrow, EscrowId, Permission, PermissionId, ProtocolError,
};
use thiserror::Error;
use tokio::sync::RwLock;

/// Store failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Store unavailable: {message}")]
    Unavailable { message: String },

    #[error("Id space exhausted for {entity}")]
    IdsExhausted { entity: &'static str },
}

impl From<StoreError> for ProtocolError {
    fn from(e: StoreError) -> Self {
        ProtocolError::Storage {
            message: e.to_string(),
        }
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

#[async_trait]
pub trait PermissionStore: Send + Sync {
    /// Reserve the next id
    async fn allocate_permission_id(&self) -> StoreResult<PermissionId>;

    /// The id the next allocation will return
    async fn next_permission_id(&self) -> StoreResult<PermissionId>;

    /// Insert or replace
    async fn put_permission(&self, permission: Permission) -> StoreResult<()>;

    async fn permission(&self, id: PermissionId) -> StoreResult<Option<Permission>>;

    /// A grantor's permissions in grant order
    async fn grantor_permissions(
        &self,
        grantor: &AccountId,
        offset: usize,
        limit: usize,
    ) -> StoreResult<Vec<Permission>>;

    async fn grantor_permission_count(&self, grantor: &AccountId) -> StoreResult<usize>;
}

#[async_trait]
pub trait EscrowStore: Send + Sync {
    async fn allocate_escrow_id(&self) -> StoreResult<EscrowId>;

    async fn next_escrow_id(&self) -> StoreResult<EscrowId>;

    async fn put_escrow(&self, escrow: Escrow) -> StoreResult<()>;

    async fn escrow(&self, id: EscrowId) -> StoreResult<Option<Escrow>>;

    /// Escrows funded against a permission, in deposit order
    async fn permission_escrows(&self, permission_id: PermissionId) -> StoreResult<Vec<EscrowId>>;
}

#[async_trait]
pub trait CampaignStore: Send + Sync {
    async fn allocate_campaign_id(&self) -> StoreResult<CampaignId>;

    async fn next_campaign_id(&self) -> StoreResult<CampaignId>;

    async fn put_campaign(&self, campaign: Campaign) -> StoreResult<()>;

    async fn campaign(&self, id: CampaignId) -> StoreResult<Option<Campaign>>;

    async fn brand_campaigns(&self, brand: &AccountId) -> StoreResult<Vec<CampaignId>>;

    async fn creator_campaigns(&self, creator: &AccountId) -> StoreResult<Vec<CampaignId>>;
}

#[derive(Default)]
struct PermissionTable {
    records: HashMap<PermissionId, Permission>,
    by_grantor: HashMap<AccountId, Vec<PermissionId>>,
    last_id: u64,
}

#[derive(Default)]
struct EscrowTable {
    records: HashMap<EscrowId, Escrow>,
    by_permission: HashMap<PermissionId, Vec<EscrowId>>,
    last_id: u64,
}

#[derive(Default)]
struct CampaignTable {
    records: HashMap<CampaignId, Campaign>,
    by_brand: HashMap<AccountId, Vec<CampaignId>>,
    by_creator: HashMap<AccountId, Vec<CampaignId>>,
    last_id: u64,
}

fn bump(last_id: &mut u64, entity: &'static str) -> StoreResult<u64> {
    *last_id = last_id
        .checked_add(1)
        .ok_or(StoreError::IdsExhausted { entity })?;
    Ok(*last_id)
}

/// In-memory store for all three entities
#[derive(Default)]
pub struct MemoryStore {
    permissions: RwLock<PermissionTable>,
    escrows: RwLock<EscrowTable>,
    campaigns: RwLock<CampaignTable>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PermissionStore for MemoryStore {
    async fn allocate_permission_id(&self) -> StoreResult<PermissionId> {
        let mut table = self.permissions.write().await;
        bump(&mut table.last_id, "permission").map(PermissionId)
    }

    async fn next_permission_id(&self) -> StoreResult<PermissionId> {
        Ok(PermissionId(self.permissions.read().await.last_id + 1))
    }

    async fn put_permission(&self, permission: Permission) -> StoreResult<()> {
        let mut table = self.permissions.write().await;
        let id = permission.id;
        let grantor = permission.grantor.clone();
        if table.records.insert(id, permission).is_none() {
            table.by_grantor.entry(grantor).or_default().push(id);
        }
        Ok(())
    }

    async fn permission(&self, id: PermissionId) -> StoreResult<Option<Permission>> {
        Ok(self.permissions.read().await.records.get(&id).cloned())
    }

    async fn grantor_permissions(
        &self,
        grantor: &AccountId,
        offset: usize,
        limit: usize,
    ) -> StoreResult<Vec<Permission>> {
        let table = self.permissions.read().await;
        let Some(ids) = table.by_grantor.get(grantor) else {
            return Ok(Vec::new());
        };
        Ok(ids
            .iter()
            .skip(offset)
            .take(limit)
            .filter_map(|id| table.records.get(id).cloned())
            .collect())
    }

    async fn grantor_permission_count(&self, grantor: &AccountId) -> StoreResult<usize> {
        Ok(self
            .permissions
            .read()
            .await
            .by_grantor
            .get(grantor)
            .map(Vec::len)
            .unwrap_or(0))
    }
}

#[async_trait]
impl EscrowStore for MemoryStore {
    async fn allocate_escrow_id(&self) -> StoreResult<EscrowId> {
        let mut table = self.escrows.write().await;
        bump(&mut table.last_id, "escrow").map(EscrowId)
    }

    async fn next_escrow_id(&self) -> StoreResult<EscrowId> {
        Ok(EscrowId(self.escrows.read().await.last_id + 1))
    }

    async fn put_escrow(&self, escrow: Escrow) -> StoreResult<()> {
        let mut table = self.escrows.write().await;
        let id = escrow.id;
        let permission_id = escrow.permission_id;
        if table.records.insert(id, escrow).is_none() {
            table.by_permission.entry(permission_id).or_default().push(id);
        }
        Ok(())
    }

    async fn escrow(&self, id: EscrowId) -> StoreResult<Option<Escrow>> {
        Ok(self.escrows.read().await.records.get(&id).cloned())
    }

    async fn permission_escrows(&self, permission_id: PermissionId) -> StoreResult<Vec<EscrowId>> {
        Ok(self
            .escrows
            .read()
            .await
            .by_permission
            .get(&permission_id)
            .cloned()
            .unwrap_or_default())
    }
}

#[async_trait]
impl CampaignStore for MemoryStore {
    async fn allocate_campaign_id(&self) -> StoreResult<CampaignId> {
        let mut table = self.campaigns.write().await;
        bump(&mut table.last_id, "campaign").map(CampaignId)
    }

    async fn next_campaign_id(&self) -> StoreResult<CampaignId> {
        Ok(CampaignId(self.campaigns.read().await.last_id + 1))
    }

    async fn put_campaign(&self, campaign: Campaign) -> StoreResult<()> {
        let mut table = self.campaigns.write().await;
        let id = campaign.id;
        let brand = campaign.brand.clone();
        let creator = campaign.creator.clone();
        if table.records.insert(id, campaign).is_none() {
            table.by_brand.entry(brand).or_default().push(id);
            table.by_creator.entry(creator).or_default().push(id);
        }
        Ok(())
    }

    async fn campaign(&self, id: CampaignId) -> StoreResult<Option<Campaign>> {
        Ok(self.campaigns.read().await.records.get(&id).cloned())
    }

    async fn brand_campaigns(&self, brand: &AccountId) -> StoreResult<Vec<CampaignId>> {
        Ok(self
            .campaigns
            .read()
            .await
            .by_brand
            .get(brand)
            .cloned()
            .unwrap_or_default())
    }

    async fn creator_campaigns(&self, creator: &AccountId) -> StoreResult<Vec<CampaignId>> {
        Ok(self
            .campaigns
            .read()
            .await
            .by_creator
            .get(creator)
            .cloned()
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use prmission_types::{AgentScope, Amount, Bps, PermissionStatus};

    fn permission(id: PermissionId, grantor: &AccountId) -> Permission {
        let now = Utc::now();
        Permission {
            id,
            grantor: grantor.clone(),
            agent: AgentScope::Any,
            data_category: "travel".to_string(),
            purpose: "booking".to_string(),
            compensation_bps: Bps(200),
            upfront_fee: Amount::ZERO,
            valid_until: now + Duration::days(30),
            status: PermissionStatus::Active,
            created_at: now,
            revoked_at: None,
        }
    }

    #[tokio::test]
    async fn test_ids_are_monotonic() {
        let store = MemoryStore::new();
        assert_eq!(store.next_permission_id().await.unwrap(), PermissionId(1));
        assert_eq!(store.allocate_permission_id().await.unwrap(), PermissionId(1));
        assert_eq!(store.allocate_permission_id().await.unwrap(), PermissionId(2));
        assert_eq!(store.next_permission_id().await.unwrap(), PermissionId(3));
        // Escrow ids are independent
        assert_eq!(store.allocate_escrow_id().await.unwrap(), EscrowId(1));
    }

    #[tokio::test]
    async fn test_replace_does_not_duplicate_index() {
        let store = MemoryStore::new();
        let grantor = AccountId::new();
        let id = store.allocate_permission_id().await.unwrap();

        let mut record = permission(id, &grantor);
        store.put_permission(record.clone()).await.unwrap();
        record.status = PermissionStatus::Revoked;
        store.put_permission(record).await.unwrap();

        assert_eq!(store.grantor_permission_count(&grantor).await.unwrap(), 1);
        let stored = store.permission(id).await.unwrap().unwrap();
        assert_eq!(stored.status, PermissionStatus::Revoked);
    }

    #[tokio::test]
    async fn test_grantor_pagination() {
        let store = MemoryStore::new();
        let grantor = AccountId::new();
        for _ in 0..5 {
            let id = store.allocate_permission_id().await.unwrap();
            store.put_permission(permission(id, &grantor)).await.unwrap();
        }

        let page = store.grantor_permissions(&grantor, 1, 2).await.unwrap();
        assert_eq!(
            page.iter().map(|p| p.id).collect::<Vec<_>>(),
            vec![PermissionId(2), PermissionId(3)]
        );
        assert_eq!(store.grantor_permissions(&grantor, 3, 10).await.unwrap().len(), 2);
        assert!(store.grantor_permissions(&grantor, 5, 10).await.unwrap().is_empty());
        assert!(store
            .grantor_permissions(&AccountId::new(), 0, 10)
            .await
            .unwrap()
            .is_empty());
    }
}
