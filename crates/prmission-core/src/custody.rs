//! Funds held by an engine
//!
//! All escrowed principal sits in one custody account on the ledger. Every
//! operation moves funds as a single batch, then persists its record; if the
//! record cannot be written the batch is reversed.

use std::future::Future;
use std::sync::Arc;

use prmission_ledger::{BatchReceipt, EntryReason, TokenLedger, TransferLeg};
use prmission_types::{AccountId, Amount, AssetId, Result};
use tracing::{error, warn};

use crate::store::StoreResult;

pub(crate) struct Custody {
    ledger: Arc<dyn TokenLedger>,
    asset: AssetId,
    vault: AccountId,
}

impl Custody {
    pub(crate) fn new(ledger: Arc<dyn TokenLedger>, asset: AssetId, vault: AccountId) -> Self {
        Self {
            ledger,
            asset,
            vault,
        }
    }

    pub(crate) fn asset(&self) -> &AssetId {
        &self.asset
    }

    pub(crate) fn vault(&self) -> &AccountId {
        &self.vault
    }

    /// Pull `amount` of the payment asset from `from` on custody's allowance
    pub(crate) fn pull(&self, from: &AccountId, to: &AccountId, amount: Amount) -> TransferLeg {
        TransferLeg::pull(self.vault.clone(), from.clone(), to.clone(), amount)
    }

    /// Pay `amount` out of custody
    pub(crate) fn payout(&self, to: &AccountId, amount: Amount) -> TransferLeg {
        TransferLeg::direct(self.vault.clone(), to.clone(), amount)
    }

    /// Apply the non-zero legs as one batch. `None` when nothing moves.
    pub(crate) async fn execute(
        &self,
        legs: Vec<TransferLeg>,
        reason: EntryReason,
    ) -> Result<Option<BatchReceipt>> {
        let legs: Vec<TransferLeg> = legs.into_iter().filter(|l| !l.amount.is_zero()).collect();
        if legs.is_empty() {
            return Ok(None);
        }
        let receipt = self.ledger.execute_batch(&self.asset, &legs, reason).await?;
        Ok(Some(receipt))
    }

    /// Move a non-payment asset out of custody
    pub(crate) async fn sweep(
        &self,
        asset: &AssetId,
        to: &AccountId,
        amount: Amount,
    ) -> Result<BatchReceipt> {
        let leg = TransferLeg::direct(self.vault.clone(), to.clone(), amount);
        Ok(self.ledger.transfer(asset, leg, EntryReason::Rescue).await?)
    }

    /// Run a store write after a batch, reversing the batch if the write fails
    pub(crate) async fn persist_or_compensate<T, F>(
        &self,
        receipt: Option<&BatchReceipt>,
        record: String,
        persist: F,
    ) -> Result<T>
    where
        F: Future<Output = StoreResult<T>>,
    {
        let e = match persist.await {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };

        if let Some(receipt) = receipt {
            warn!("Persisting {} failed, reversing batch {}: {}", record, receipt.batch_id.0, e);
            self.compensate(receipt, record).await;
        }
        Err(e.into())
    }

    /// Reverse legs are direct, so the ledger must let the engine move funds
    /// back out of payee accounts. A pulled allowance is not restored.
    async fn compensate(&self, receipt: &BatchReceipt, record: String) {
        let reversed: Vec<TransferLeg> = receipt.legs.iter().rev().map(TransferLeg::reversed).collect();
        let reason = EntryReason::Compensation {
            record: record.clone(),
        };
        match self.ledger.execute_batch(&receipt.asset, &reversed, reason).await {
            Ok(undo) => warn!("Batch {} reversed by {} for {}", receipt.batch_id.0, undo.batch_id.0, record),
            Err(e) => error!(
                "Failed to reverse batch {} for {}: {}",
                receipt.batch_id.0, record, e
            ),
        }
    }
}
