//! The permission and escrow protocol
//!
//! `Protocol` owns the Permission Ledger and the Escrow Ledger. Operations
//! are split across `permissions.rs` and `escrow.rs`; this module holds the
//! shared state, construction and the owner surface.

use std::sync::Arc;

use prmission_ledger::TokenLedger;
use prmission_trust::TrustReport;
use prmission_types::{
    AccountId, AgentIdentityId, Amount, Applied, AssetId, EscrowId, PermissionId, ProtocolError,
    ProtocolEvent, Result,
};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::info;

use crate::admin::Governance;
use crate::clock::{Clock, SystemClock};
use crate::config::ProtocolConfig;
use crate::custody::Custody;
use crate::locks::RecordLocks;
use crate::store::{EscrowStore, MemoryStore, PermissionStore};

/// Running settlement totals
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct SettlementTotals {
    pub volume: Amount,
    pub fees: Amount,
}

impl SettlementTotals {
    pub(crate) fn record(&mut self, volume: Amount, fee: Amount) {
        self.volume = Amount(self.volume.0.saturating_add(volume.0));
        self.fees = Amount(self.fees.0.saturating_add(fee.0));
    }
}

/// Protocol-wide counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolStats {
    /// Escrowed principal of every settled or resolved escrow
    pub total_settled_volume: Amount,
    pub total_protocol_fees: Amount,
    pub next_permission_id: PermissionId,
    pub next_escrow_id: EscrowId,
}

/// Permission and escrow ledgers over one custody account
pub struct Protocol {
    pub(crate) config: ProtocolConfig,
    pub(crate) custody: Custody,
    pub(crate) permissions: Arc<dyn PermissionStore>,
    pub(crate) escrows: Arc<dyn EscrowStore>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) locks: RecordLocks,
    pub(crate) governance: Governance,
    pub(crate) totals: Mutex<SettlementTotals>,
}

/// Builder for [`Protocol`]
pub struct ProtocolBuilder {
    owner: AccountId,
    treasury: AccountId,
    vault: AccountId,
    ledger: Arc<dyn TokenLedger>,
    config: ProtocolConfig,
    asset: AssetId,
    clock: Option<Arc<dyn Clock>>,
    permissions: Option<Arc<dyn PermissionStore>>,
    escrows: Option<Arc<dyn EscrowStore>>,
}

impl ProtocolBuilder {
    pub fn config(mut self, config: ProtocolConfig) -> Self {
        self.config = config;
        self
    }

    /// The payment asset (defaults to USDC)
    pub fn asset(mut self, asset: AssetId) -> Self {
        self.asset = asset;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Use one backing store for permissions and escrows
    pub fn store<S>(mut self, store: Arc<S>) -> Self
    where
        S: PermissionStore + EscrowStore + 'static,
    {
        self.permissions = Some(store.clone() as Arc<dyn PermissionStore>);
        self.escrows = Some(store as Arc<dyn EscrowStore>);
        self
    }

    pub fn permission_store(mut self, store: Arc<dyn PermissionStore>) -> Self {
        self.permissions = Some(store);
        self
    }

    pub fn escrow_store(mut self, store: Arc<dyn EscrowStore>) -> Self {
        self.escrows = Some(store);
        self
    }

    pub fn build(self) -> Result<Protocol> {
        self.config.validate()?;
        let governance = Governance::new(
            self.owner,
            self.treasury,
            self.vault.clone(),
            self.config.max_trusted_reviewers,
        )?;

        let (permissions, escrows) = match (self.permissions, self.escrows) {
            (Some(p), Some(e)) => (p, e),
            (p, e) => {
                let memory = Arc::new(MemoryStore::new());
                let p = p.unwrap_or_else(|| memory.clone() as Arc<dyn PermissionStore>);
                let e = e.unwrap_or_else(|| memory as Arc<dyn EscrowStore>);
                (p, e)
            }
        };

        info!(
            fee_bps = self.config.protocol_fee_bps,
            dispute_window_secs = self.config.dispute_window_secs,
            "Protocol initialized for {}",
            self.asset
        );

        Ok(Protocol {
            custody: Custody::new(self.ledger, self.asset, self.vault),
            permissions,
            escrows,
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock) as Arc<dyn Clock>),
            locks: RecordLocks::new(),
            governance,
            totals: Mutex::new(SettlementTotals::default()),
            config: self.config,
        })
    }
}

impl Protocol {
    /// Start building a protocol with the default configuration
    ///
    /// Depositors approve `vault` on the ledger; every escrowed amount is held
    /// there until settlement or refund.
    pub fn builder(
        owner: AccountId,
        treasury: AccountId,
        vault: AccountId,
        ledger: Arc<dyn TokenLedger>,
    ) -> ProtocolBuilder {
        ProtocolBuilder {
            owner,
            treasury,
            vault,
            ledger,
            config: ProtocolConfig::default(),
            asset: AssetId::usdc(),
            clock: None,
            permissions: None,
            escrows: None,
        }
    }

    pub fn config(&self) -> &ProtocolConfig {
        &self.config
    }

    pub fn payment_asset(&self) -> &AssetId {
        self.custody.asset()
    }

    pub fn vault(&self) -> &AccountId {
        self.custody.vault()
    }

    /// Owner surface: pause, treasury, trust configuration
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

    pub async fn stats(&self) -> Result<ProtocolStats> {
        let totals = *self.totals.lock().await;
        Ok(ProtocolStats {
            total_settled_volume: totals.volume,
            total_protocol_fees: totals.fees,
            next_permission_id: self.permissions.next_permission_id().await?,
            next_escrow_id: self.escrows.next_escrow_id().await?,
        })
    }

    /// Return tokens of any other asset sent to custody by mistake
    pub async fn rescue_tokens(
        &self,
        caller: &AccountId,
        asset: AssetId,
        amount: Amount,
    ) -> Result<Applied<()>> {
        self.governance.require_owner(caller).await?;
        if &asset == self.custody.asset() {
            return Err(ProtocolError::CannotRescuePaymentToken);
        }
        if amount.is_zero() {
            return Err(ProtocolError::ZeroValue);
        }

        let treasury = self.governance.treasury().await;
        self.custody.sweep(&asset, &treasury, amount).await?;

        info!("Rescued {} {} to {}", amount, asset, treasury);
        Ok(Applied::single(
            (),
            ProtocolEvent::TokensRescued {
                asset,
                amount,
                to: treasury,
            },
        ))
    }
}
