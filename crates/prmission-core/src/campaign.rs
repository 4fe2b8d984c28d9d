//! Campaign Ledger
//!
//! Same lifecycle as an escrow, but the budget is split five ways at rates
//! fixed when the campaign is created: creator, manager, referral, protocol,
//! and the brand refund as remainder. The reported outcome is a free-form
//! magnitude and never a payout basis.

use std::sync::Arc;

use prmission_allocator::campaign_settlement;
use prmission_ledger::{EntryReason, TokenLedger, TransferLeg};
use prmission_registry::CreatorDirectory;
use prmission_trust::TrustReport;
use prmission_types::{
    AccountId, AgentIdentityId, Amount, Applied, AssetId, Bps, Campaign, CampaignId,
    CampaignSettlement, CampaignStatus, NewCampaign, ProtocolError, ProtocolEvent, Result,
    BPS_DENOMINATOR,
};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::admin::Governance;
use crate::clock::{Clock, SystemClock};
use crate::config::ProtocolConfig;
use crate::custody::Custody;
use crate::locks::{RecordKey, RecordLocks};
use crate::protocol::SettlementTotals;
use crate::store::{CampaignStore, MemoryStore};

/// Campaign counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignStats {
    pub total_settled_volume: Amount,
    pub total_protocol_fees: Amount,
    pub next_campaign_id: CampaignId,
}

fn wrong_state(campaign: &Campaign, expected: &str) -> ProtocolError {
    ProtocolError::InvalidCampaignState {
        campaign_id: campaign.id.to_string(),
        status: campaign.status.to_string(),
        expected: expected.to_string(),
    }
}

/// Brand/creator campaigns over one custody account
pub struct CampaignEngine {
    config: ProtocolConfig,
    custody: Custody,
    campaigns: Arc<dyn CampaignStore>,
    creators: Arc<dyn CreatorDirectory>,
    clock: Arc<dyn Clock>,
    locks: RecordLocks,
    governance: Governance,
    totals: Mutex<SettlementTotals>,
}

/// Builder for [`CampaignEngine`]
pub struct CampaignEngineBuilder {
    owner: AccountId,
    treasury: AccountId,
    vault: AccountId,
    ledger: Arc<dyn TokenLedger>,
    creators: Arc<dyn CreatorDirectory>,
    config: ProtocolConfig,
    asset: AssetId,
    clock: Option<Arc<dyn Clock>>,
    campaigns: Option<Arc<dyn CampaignStore>>,
}

impl CampaignEngineBuilder {
    pub fn config(mut self, config: ProtocolConfig) -> Self {
        self.config = config;
        self
    }

    pub fn asset(mut self, asset: AssetId) -> Self {
        self.asset = asset;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn store(mut self, store: Arc<dyn CampaignStore>) -> Self {
        self.campaigns = Some(store);
        self
    }

    pub fn build(self) -> Result<CampaignEngine> {
        self.config.validate()?;
        let governance = Governance::new(
            self.owner,
            self.treasury,
            self.vault.clone(),
            self.config.max_trusted_reviewers,
        )?;

        info!(
            fee_bps = self.config.protocol_fee_bps,
            "Campaign engine initialized for {}",
            self.asset
        );

        Ok(CampaignEngine {
            custody: Custody::new(self.ledger, self.asset, self.vault),
            campaigns: self
                .campaigns
                .unwrap_or_else(|| Arc::new(MemoryStore::new()) as Arc<dyn CampaignStore>),
            creators: self.creators,
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock) as Arc<dyn Clock>),
            locks: RecordLocks::new(),
            governance,
            totals: Mutex::new(SettlementTotals::default()),
            config: self.config,
        })
    }
}

impl CampaignEngine {
    /// Start building an engine; brands approve `vault` on the ledger
    pub fn builder(
        owner: AccountId,
        treasury: AccountId,
        vault: AccountId,
        ledger: Arc<dyn TokenLedger>,
        creators: Arc<dyn CreatorDirectory>,
    ) -> CampaignEngineBuilder {
        CampaignEngineBuilder {
            owner,
            treasury,
            vault,
            ledger,
            creators,
            config: ProtocolConfig::default(),
            asset: AssetId::usdc(),
            clock: None,
            campaigns: None,
        }
    }

    pub fn governance(&self) -> &Governance {
        &self.governance
    }

    pub async fn pause(&self, caller: &AccountId) -> Result<Applied<()>> {
        self.governance.pause(caller).await
    }

    pub async fn unpause(&self, caller: &AccountId) -> Result<Applied<()>> {
        self.governance.unpause(caller).await
    }

    pub async fn check_agent_trust(
        &self,
        identity: AgentIdentityId,
        caller: &AccountId,
    ) -> Result<TrustReport> {
        self.governance.check_agent_trust(identity, caller).await
    }

    /// Fund a campaign for a registered creator
    ///
    /// Referral terms come from the creator's profile, not the brand.
    pub async fn create_campaign(
        &self,
        brand: &AccountId,
        request: NewCampaign,
    ) -> Result<Applied<CampaignId>> {
        let now = self.clock.now();
        let governance = self.governance.snapshot().await;
        if governance.paused {
            return Err(ProtocolError::Paused);
        }
        if request.escrow_amount.is_zero() {
            return Err(ProtocolError::ZeroValue);
        }
        if request.category.is_empty() {
            return Err(ProtocolError::EmptyCategory);
        }

        let profile = self
            .creators
            .get(&request.creator)
            .await?
            .ok_or_else(|| ProtocolError::CreatorNotRegistered {
                creator: request.creator.to_string(),
            })?;
        if !profile.available {
            return Err(ProtocolError::CreatorUnavailable {
                creator: request.creator.to_string(),
            });
        }
        if request.escrow_amount < profile.floor_price {
            return Err(ProtocolError::BelowCreatorFloorPrice {
                offered: request.escrow_amount.raw(),
                floor: profile.floor_price.raw(),
            });
        }
        if request.manager_bps > Bps::ZERO && request.manager.is_none() {
            return Err(ProtocolError::InvalidAddress {
                reason: "manager share requires a manager account".to_string(),
            });
        }
        if profile.referral_bps > Bps::ZERO && profile.referral_address.is_none() {
            return Err(ProtocolError::InvalidAddress {
                reason: "creator profile has a referral share without an address".to_string(),
            });
        }
        let protocol_bps = self.config.protocol_fee();
        let total: u32 = [request.creator_bps, request.manager_bps, profile.referral_bps, protocol_bps]
            .iter()
            .map(|bps| bps.value() as u32)
            .sum();
        if total > BPS_DENOMINATOR as u32 {
            return Err(ProtocolError::SplitExceedsTotal { total });
        }
        governance.trust.enforce(request.brand_identity, brand).await?;

        let receipt = self
            .custody
            .execute(
                vec![self.custody.pull(brand, self.custody.vault(), request.escrow_amount)],
                EntryReason::EscrowLock {
                    record: format!("campaign for {}", request.creator),
                },
            )
            .await?;
        let campaign_id = self
            .custody
            .persist_or_compensate(
                receipt.as_ref(),
                "new campaign".to_string(),
                self.campaigns.allocate_campaign_id(),
            )
            .await?;

        let campaign = Campaign {
            id: campaign_id,
            brand: brand.clone(),
            creator: request.creator.clone(),
            category: request.category,
            content_type: request.content_type,
            escrow_amount: request.escrow_amount,
            creator_bps: request.creator_bps,
            manager_bps: request.manager_bps,
            manager: request.manager,
            referral_bps: profile.referral_bps,
            referral: profile.referral_address,
            protocol_bps,
            outcome_value: 0,
            metadata: String::new(),
            status: CampaignStatus::Active,
            disputed_by: None,
            created_at: now,
            outcome_at: None,
        };
        self.custody
            .persist_or_compensate(
                receipt.as_ref(),
                campaign_id.to_string(),
                self.campaigns.put_campaign(campaign),
            )
            .await?;

        info!(
            campaign = %campaign_id,
            brand = %brand,
            creator = %request.creator,
            "Campaign created with {}",
            request.escrow_amount
        );
        Ok(Applied::single(
            campaign_id,
            ProtocolEvent::CampaignCreated {
                campaign_id,
                brand: brand.clone(),
                creator: request.creator,
                escrow_amount: request.escrow_amount,
            },
        ))
    }

    /// Brand reports the campaign result and opens the dispute window
    pub async fn report_outcome(
        &self,
        caller: &AccountId,
        campaign_id: CampaignId,
        outcome_value: u128,
        metadata: impl Into<String>,
    ) -> Result<Applied<()>> {
        let _guard = self.locks.acquire(RecordKey::Campaign(campaign_id)).await;
        let now = self.clock.now();

        let mut campaign = self.load_campaign(campaign_id).await?;
        if &campaign.brand != caller {
            return Err(ProtocolError::NotCampaignBrand {
                campaign_id: campaign_id.to_string(),
            });
        }
        if !matches!(campaign.status, CampaignStatus::Active | CampaignStatus::OutcomeReported) {
            return Err(wrong_state(&campaign, "active or outcome_reported"));
        }

        campaign.outcome_value = outcome_value;
        campaign.metadata = metadata.into();
        campaign.outcome_at = Some(now);
        campaign.status = CampaignStatus::OutcomeReported;
        self.campaigns.put_campaign(campaign).await?;

        info!(campaign = %campaign_id, outcome_value = %outcome_value, "Campaign outcome reported");
        Ok(Applied::single(
            (),
            ProtocolEvent::CampaignOutcomeReported {
                campaign_id,
                outcome_value,
                dispute_window_end: now + self.config.dispute_window(),
            },
        ))
    }

    /// Brand or creator halts settlement inside the window
    pub async fn dispute(&self, caller: &AccountId, campaign_id: CampaignId) -> Result<Applied<()>> {
        let _guard = self.locks.acquire(RecordKey::Campaign(campaign_id)).await;
        let now = self.clock.now();

        let mut campaign = self.load_campaign(campaign_id).await?;
        if &campaign.brand != caller && &campaign.creator != caller {
            return Err(ProtocolError::NotCampaignParty {
                campaign_id: campaign_id.to_string(),
            });
        }
        let window_end = self.window_end(&campaign)?;
        if now >= window_end {
            return Err(ProtocolError::DisputeWindowClosed {
                record_id: campaign_id.to_string(),
                closed_at: window_end.to_rfc3339(),
            });
        }

        campaign.status = CampaignStatus::Disputed;
        campaign.disputed_by = Some(caller.clone());
        self.campaigns.put_campaign(campaign).await?;

        info!(campaign = %campaign_id, disputed_by = %caller, "Campaign disputed");
        Ok(Applied::single(
            (),
            ProtocolEvent::CampaignDisputed {
                campaign_id,
                disputed_by: caller.clone(),
            },
        ))
    }

    /// Split the budget once the window has elapsed
    pub async fn settle(
        &self,
        caller: &AccountId,
        campaign_id: CampaignId,
    ) -> Result<Applied<CampaignSettlement>> {
        let _guard = self.locks.acquire(RecordKey::Campaign(campaign_id)).await;
        let now = self.clock.now();

        let mut campaign = self.load_campaign(campaign_id).await?;
        let governance = self.governance.snapshot().await;
        if &campaign.brand != caller && &campaign.creator != caller && &governance.owner != caller
        {
            debug!(campaign = %campaign_id, caller = %caller, "Campaign settle rejected");
            return Err(ProtocolError::NotAuthorizedToSettle {
                record_id: campaign_id.to_string(),
            });
        }
        let window_end = self.window_end(&campaign)?;
        if now < window_end {
            return Err(ProtocolError::DisputeWindowStillOpen {
                record_id: campaign_id.to_string(),
                closes_at: window_end.to_rfc3339(),
            });
        }

        let settlement = self.split(&campaign)?;
        self.pay_out(&mut campaign, &governance.treasury, settlement).await?;
        Ok(Applied::single(
            settlement,
            ProtocolEvent::CampaignSettled {
                campaign_id,
                settlement,
            },
        ))
    }

    /// Owner settles a disputed campaign with the standard split
    pub async fn resolve_dispute(
        &self,
        caller: &AccountId,
        campaign_id: CampaignId,
    ) -> Result<Applied<CampaignSettlement>> {
        self.governance.require_owner(caller).await?;
        let _guard = self.locks.acquire(RecordKey::Campaign(campaign_id)).await;

        let mut campaign = self.load_campaign(campaign_id).await?;
        if campaign.status != CampaignStatus::Disputed {
            return Err(ProtocolError::NotDisputed {
                record_id: campaign_id.to_string(),
            });
        }
        let treasury = self.governance.treasury().await;

        let settlement = self.split(&campaign)?;
        self.pay_out(&mut campaign, &treasury, settlement).await?;
        Ok(Applied::single(
            settlement,
            ProtocolEvent::CampaignSettled {
                campaign_id,
                settlement,
            },
        ))
    }

    /// Owner returns a disputed campaign's full budget to the brand
    pub async fn refund_campaign(
        &self,
        caller: &AccountId,
        campaign_id: CampaignId,
    ) -> Result<Applied<Amount>> {
        self.governance.require_owner(caller).await?;
        let _guard = self.locks.acquire(RecordKey::Campaign(campaign_id)).await;

        let mut campaign = self.load_campaign(campaign_id).await?;
        if campaign.status != CampaignStatus::Disputed {
            return Err(ProtocolError::NotDisputed {
                record_id: campaign_id.to_string(),
            });
        }

        let amount = campaign.escrow_amount;
        let brand = campaign.brand.clone();
        let receipt = self
            .custody
            .execute(
                vec![self.custody.payout(&brand, amount)],
                EntryReason::Refund {
                    record: campaign_id.to_string(),
                },
            )
            .await?;
        campaign.status = CampaignStatus::Refunded;
        self.custody
            .persist_or_compensate(
                receipt.as_ref(),
                campaign_id.to_string(),
                self.campaigns.put_campaign(campaign),
            )
            .await?;

        info!(campaign = %campaign_id, brand = %brand, "Campaign refunded: {}", amount);
        Ok(Applied::single(
            amount,
            ProtocolEvent::CampaignRefunded {
                campaign_id,
                brand,
                amount,
            },
        ))
    }

    pub async fn get_campaign(&self, campaign_id: CampaignId) -> Result<Campaign> {
        self.load_campaign(campaign_id).await
    }

    pub async fn brand_campaigns(&self, brand: &AccountId) -> Result<Vec<CampaignId>> {
        Ok(self.campaigns.brand_campaigns(brand).await?)
    }

    pub async fn creator_campaigns(&self, creator: &AccountId) -> Result<Vec<CampaignId>> {
        Ok(self.campaigns.creator_campaigns(creator).await?)
    }

    /// The five-way split settlement would produce, without moving funds
    pub async fn preview_settlement(&self, campaign_id: CampaignId) -> Result<CampaignSettlement> {
        let campaign = self.load_campaign(campaign_id).await?;
        if campaign.status.is_terminal() {
            return Err(wrong_state(&campaign, "a non-terminal status"));
        }
        self.split(&campaign)
    }

    pub async fn stats(&self) -> Result<CampaignStats> {
        let totals = *self.totals.lock().await;
        Ok(CampaignStats {
            total_settled_volume: totals.volume,
            total_protocol_fees: totals.fees,
            next_campaign_id: self.campaigns.next_campaign_id().await?,
        })
    }

    async fn load_campaign(&self, campaign_id: CampaignId) -> Result<Campaign> {
        self.campaigns
            .campaign(campaign_id)
            .await?
            .ok_or_else(|| ProtocolError::CampaignNotFound {
                campaign_id: campaign_id.to_string(),
            })
    }

    fn window_end(&self, campaign: &Campaign) -> Result<chrono::DateTime<chrono::Utc>> {
        match (campaign.status, campaign.outcome_at) {
            (CampaignStatus::OutcomeReported, Some(at)) => Ok(at + self.config.dispute_window()),
            _ => Err(wrong_state(campaign, "outcome_reported")),
        }
    }

    fn split(&self, campaign: &Campaign) -> Result<CampaignSettlement> {
        Ok(campaign_settlement(
            campaign.escrow_amount,
            campaign.creator_bps,
            campaign.manager_bps,
            campaign.referral_bps,
            campaign.protocol_bps,
        )?)
    }

    /// Move the split out of custody, mark settled, credit the creator
    async fn pay_out(
        &self,
        campaign: &mut Campaign,
        treasury: &AccountId,
        settlement: CampaignSettlement,
    ) -> Result<()> {
        let mut legs = vec![self.custody.payout(&campaign.creator, settlement.creator_share)];
        legs.push(self.share_leg(&campaign.manager, settlement.manager_share, "manager")?);
        legs.push(self.share_leg(&campaign.referral, settlement.referral_share, "referral")?);
        legs.push(self.custody.payout(treasury, settlement.protocol_fee));
        legs.push(self.custody.payout(&campaign.brand, settlement.brand_refund));

        let receipt = self
            .custody
            .execute(
                legs,
                EntryReason::Settlement {
                    record: campaign.id.to_string(),
                },
            )
            .await?;
        campaign.status = CampaignStatus::Settled;
        self.custody
            .persist_or_compensate(
                receipt.as_ref(),
                campaign.id.to_string(),
                self.campaigns.put_campaign(campaign.clone()),
            )
            .await?;

        self.totals
            .lock()
            .await
            .record(campaign.escrow_amount, settlement.protocol_fee);

        // Funds have moved; a stale profile total must not undo the settlement.
        if let Err(e) = self
            .creators
            .record_campaign(&campaign.creator, settlement.creator_share)
            .await
        {
            warn!(campaign = %campaign.id, error = %e, "Failed to record campaign on creator profile");
        }

        info!(
            campaign = %campaign.id,
            creator_share = %settlement.creator_share,
            manager_share = %settlement.manager_share,
            referral_share = %settlement.referral_share,
            protocol_fee = %settlement.protocol_fee,
            brand_refund = %settlement.brand_refund,
            "Campaign settled"
        );
        Ok(())
    }

    /// A payout leg to an optional recipient; a zero share needs no recipient
    fn share_leg(
        &self,
        recipient: &Option<AccountId>,
        amount: Amount,
        role: &str,
    ) -> Result<TransferLeg> {
        match recipient {
            Some(account) => Ok(self.custody.payout(account, amount)),
            None if amount.is_zero() => Ok(self.custody.payout(self.custody.vault(), amount)),
            None => Err(ProtocolError::InvalidAddress {
                reason: format!("{} share of {} has no recipient", role, amount),
            }),
        }
    }
}
