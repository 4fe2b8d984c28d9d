//! Prmission Ledger - The funds-transfer primitive
//!
//! The protocol never holds balances itself; it asks a [`TokenLedger`] to move
//! funds. The ledger is:
//! - Asset-scoped (the payment asset plus anything sent by accident)
//! - Allowance-aware (deposits pull from the depositor on their approval)
//! - Batch-atomic (every leg of a batch applies, or none does)
//! - Append-only (entries are never rewritten)
//!
//! # Invariants
//!
//! 1. No negative balances
//! 2. Every entry has a reason
//! 3. A failed batch leaves balances, allowances and entries untouched

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use prmission_types::{AccountId, Amount, AssetId, ProtocolError};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::info;
use uuid::Uuid;

/// Errors that can occur in ledger operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("Insufficient balance in {account}: have {available}, need {required}")]
    InsufficientBalance {
        account: AccountId,
        available: Amount,
        required: Amount,
    },

    #[error("Insufficient allowance from {owner} to {spender}: approved {approved}, need {required}")]
    InsufficientAllowance {
        owner: AccountId,
        spender: AccountId,
        approved: Amount,
        required: Amount,
    },

    #[error("Invalid amount: {message}")]
    InvalidAmount { message: String },

    #[error("Transfer batch is empty")]
    EmptyBatch,
}

impl From<LedgerError> for ProtocolError {
    fn from(e: LedgerError) -> Self {
        match e {
            LedgerError::InsufficientBalance {
                account,
                available,
                required,
            } => ProtocolError::InsufficientFunds {
                account: account.to_string(),
                requested: required.0,
                available: available.0,
            },
            LedgerError::InsufficientAllowance {
                owner,
                spender,
                approved,
                required,
            } => ProtocolError::InsufficientAllowance {
                owner: owner.to_string(),
                spender: spender.to_string(),
                requested: required.0,
                approved: approved.0,
            },
            LedgerError::InvalidAmount { message } => ProtocolError::InvalidAmount { input: message },
            LedgerError::EmptyBatch => ProtocolError::InvalidAmount {
                input: "empty transfer batch".to_string(),
            },
        }
    }
}

pub type Result<T> = std::result::Result<T, LedgerError>;

/// Unique identifier for a ledger entry
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntryId(pub String);

impl EntryId {
    pub fn new() -> Self {
        Self(format!("entry_{}", Uuid::new_v4()))
    }
}

impl Default for EntryId {
    fn default() -> Self {
        Self::new()
    }
}

/// Unique identifier for an applied batch
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BatchId(pub String);

impl BatchId {
    pub fn new() -> Self {
        Self(format!("batch_{}", Uuid::new_v4()))
    }
}

impl Default for BatchId {
    fn default() -> Self {
        Self::new()
    }
}

/// Type of ledger entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryType {
    Credit,
    Debit,
}

/// Reason for a ledger entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryReason {
    /// Supply created outside the protocol
    Mint,
    /// Plain transfer between accounts
    Transfer,
    /// Principal locked into custody, with any upfront fee
    EscrowLock { record: String },
    /// Settlement or dispute resolution payout
    Settlement { record: String },
    /// Full return of escrowed principal
    Refund { record: String },
    /// Accidentally sent tokens returned to the treasury
    Rescue,
    /// Reversal of a batch whose record could not be persisted
    Compensation { record: String },
}

/// One movement within a batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferLeg {
    pub from: AccountId,
    pub to: AccountId,
    pub amount: Amount,
    /// When set, the leg is drawn on `from`'s allowance to this spender
    pub spender: Option<AccountId>,
}

impl TransferLeg {
    /// A transfer made by the owner of `from`
    pub fn direct(from: AccountId, to: AccountId, amount: Amount) -> Self {
        Self {
            from,
            to,
            amount,
            spender: None,
        }
    }

    /// A transfer made by `spender` against `from`'s approval
    pub fn pull(spender: AccountId, from: AccountId, to: AccountId, amount: Amount) -> Self {
        Self {
            from,
            to,
            amount,
            spender: Some(spender),
        }
    }

    /// The leg that undoes this one
    pub fn reversed(&self) -> Self {
        Self::direct(self.to.clone(), self.from.clone(), self.amount)
    }
}

/// A single ledger entry (one side of a double-entry)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub entry_id: EntryId,
    pub batch_id: BatchId,
    pub account: AccountId,
    pub asset: AssetId,
    pub entry_type: EntryType,
    pub amount: Amount,
    pub balance_after: Amount,
    pub reason: EntryReason,
    pub created_at: DateTime<Utc>,
}

/// Proof that a batch was applied
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchReceipt {
    pub batch_id: BatchId,
    pub asset: AssetId,
    pub legs: Vec<TransferLeg>,
    pub applied_at: DateTime<Utc>,
}

/// The funds primitive consumed by the protocol engines
///
/// A direct leg (no `spender`) is applied on the engine's authority, whoever
/// owns `from`. Compensation relies on this: when a record write fails after
/// a batch, the engine submits [`TransferLeg::reversed`] legs, which move
/// funds back out of accounts it does not control (a grantor's upfront fee,
/// a payee's share). An implementation backed by a real token must grant the
/// engine that authority or refuse the reversal as a whole.
#[async_trait]
pub trait TokenLedger: Send + Sync {
    async fn balance(&self, account: &AccountId, asset: &AssetId) -> Amount;

    async fn allowance(&self, owner: &AccountId, spender: &AccountId, asset: &AssetId) -> Amount;

    /// Apply every leg in order, or none of them
    ///
    /// Pull legs consume allowance; direct legs are authorized by the caller.
    async fn execute_batch(
        &self,
        asset: &AssetId,
        legs: &[TransferLeg],
        reason: EntryReason,
    ) -> Result<BatchReceipt>;

    /// Single-leg convenience over [`TokenLedger::execute_batch`]
    async fn transfer(
        &self,
        asset: &AssetId,
        leg: TransferLeg,
        reason: EntryReason,
    ) -> Result<BatchReceipt> {
        self.execute_batch(asset, std::slice::from_ref(&leg), reason)
            .await
    }
}

type BalanceKey = (AccountId, AssetId);
type AllowanceKey = (AccountId, AccountId, AssetId);

#[derive(Default)]
struct LedgerState {
    balances: HashMap<BalanceKey, Amount>,
    allowances: HashMap<AllowanceKey, Amount>,
    entries: Vec<LedgerEntry>,
}

impl LedgerState {
    fn balance(&self, account: &AccountId, asset: &AssetId) -> Amount {
        self.balances
            .get(&(account.clone(), asset.clone()))
            .copied()
            .unwrap_or(Amount::ZERO)
    }
}

/// In-memory ledger
///
/// A single lock covers balances, allowances and entries, so a batch is
/// validated and applied without any other batch interleaving.
#[derive(Clone, Default)]
pub struct InMemoryLedger {
    state: Arc<RwLock<LedgerState>>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create supply in `account`
    pub async fn mint(&self, account: &AccountId, asset: &AssetId, amount: Amount) -> Result<Amount> {
        if amount.is_zero() {
            return Err(LedgerError::InvalidAmount {
                message: "Amount must be greater than zero".to_string(),
            });
        }

        let mut state = self.state.write().await;
        let new_balance = state
            .balance(account, asset)
            .checked_add(amount)
            .ok_or_else(|| LedgerError::InvalidAmount {
                message: "Balance overflow".to_string(),
            })?;
        state
            .balances
            .insert((account.clone(), asset.clone()), new_balance);
        state.entries.push(LedgerEntry {
            entry_id: EntryId::new(),
            batch_id: BatchId::new(),
            account: account.clone(),
            asset: asset.clone(),
            entry_type: EntryType::Credit,
            amount,
            balance_after: new_balance,
            reason: EntryReason::Mint,
            created_at: Utc::now(),
        });
        Ok(new_balance)
    }

    /// Set `owner`'s approval for `spender`, replacing any previous value
    pub async fn approve(&self, owner: &AccountId, spender: &AccountId, asset: &AssetId, amount: Amount) {
        self.state
            .write()
            .await
            .allowances
            .insert((owner.clone(), spender.clone(), asset.clone()), amount);
    }

    /// Get all entries for an account
    pub async fn account_entries(&self, account: &AccountId) -> Vec<LedgerEntry> {
        let state = self.state.read().await;
        state
            .entries
            .iter()
            .filter(|e| &e.account == account)
            .cloned()
            .collect()
    }

    /// Get all entries written by one batch
    pub async fn batch_entries(&self, batch_id: &BatchId) -> Vec<LedgerEntry> {
        let state = self.state.read().await;
        state
            .entries
            .iter()
            .filter(|e| &e.batch_id == batch_id)
            .cloned()
            .collect()
    }

    /// Get the total number of entries
    pub async fn entry_count(&self) -> usize {
        self.state.read().await.entries.len()
    }
}

#[async_trait]
impl TokenLedger for InMemoryLedger {
    async fn balance(&self, account: &AccountId, asset: &AssetId) -> Amount {
        self.state.read().await.balance(account, asset)
    }

    async fn allowance(&self, owner: &AccountId, spender: &AccountId, asset: &AssetId) -> Amount {
        self.state
            .read()
            .await
            .allowances
            .get(&(owner.clone(), spender.clone(), asset.clone()))
            .copied()
            .unwrap_or(Amount::ZERO)
    }

    async fn execute_batch(
        &self,
        asset: &AssetId,
        legs: &[TransferLeg],
        reason: EntryReason,
    ) -> Result<BatchReceipt> {
        if legs.is_empty() {
            return Err(LedgerError::EmptyBatch);
        }

        let mut state = self.state.write().await;

        // Stage every leg against scratch copies; commit only if all pass.
        let mut balances: HashMap<BalanceKey, Amount> = HashMap::new();
        let mut allowances: HashMap<AllowanceKey, Amount> = HashMap::new();
        let mut staged: Vec<(AccountId, EntryType, Amount, Amount)> = Vec::with_capacity(legs.len() * 2);

        for leg in legs {
            if leg.amount.is_zero() {
                return Err(LedgerError::InvalidAmount {
                    message: "Amount must be greater than zero".to_string(),
                });
            }

            if let Some(spender) = &leg.spender {
                let key = (leg.from.clone(), spender.clone(), asset.clone());
                let approved = allowances
                    .get(&key)
                    .copied()
                    .or_else(|| state.allowances.get(&key).copied())
                    .unwrap_or(Amount::ZERO);
                let remaining = approved.checked_sub(leg.amount).ok_or_else(|| {
                    LedgerError::InsufficientAllowance {
                        owner: leg.from.clone(),
                        spender: spender.clone(),
                        approved,
                        required: leg.amount,
                    }
                })?;
                allowances.insert(key, remaining);
            }

            let from_key = (leg.from.clone(), asset.clone());
            let from_balance = balances
                .get(&from_key)
                .copied()
                .unwrap_or_else(|| state.balance(&leg.from, asset));
            let from_after = from_balance.checked_sub(leg.amount).ok_or_else(|| {
                LedgerError::InsufficientBalance {
                    account: leg.from.clone(),
                    available: from_balance,
                    required: leg.amount,
                }
            })?;
            balances.insert(from_key, from_after);
            staged.push((leg.from.clone(), EntryType::Debit, leg.amount, from_after));

            let to_key = (leg.to.clone(), asset.clone());
            let to_balance = balances
                .get(&to_key)
                .copied()
                .unwrap_or_else(|| state.balance(&leg.to, asset));
            let to_after = to_balance
                .checked_add(leg.amount)
                .ok_or_else(|| LedgerError::InvalidAmount {
                    message: "Balance overflow".to_string(),
                })?;
            balances.insert(to_key, to_after);
            staged.push((leg.to.clone(), EntryType::Credit, leg.amount, to_after));
        }

        let batch_id = BatchId::new();
        let applied_at = Utc::now();

        state.balances.extend(balances);
        state.allowances.extend(allowances);
        for (account, entry_type, amount, balance_after) in staged {
            state.entries.push(LedgerEntry {
                entry_id: EntryId::new(),
                batch_id: batch_id.clone(),
                account,
                asset: asset.clone(),
                entry_type,
                amount,
                balance_after,
                reason: reason.clone(),
                created_at: applied_at,
            });
        }

        info!(batch = %batch_id.0, legs = legs.len(), asset = %asset, ?reason, "Ledger batch applied");

        Ok(BatchReceipt {
            batch_id,
            asset: asset.clone(),
            legs: legs.to_vec(),
            applied_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn usdc() -> AssetId {
        AssetId::usdc()
    }

    #[tokio::test]
    async fn test_mint_and_balance() {
        let ledger = InMemoryLedger::new();
        let account = AccountId::new();

        assert_eq!(ledger.balance(&account, &usdc()).await, Amount::ZERO);
        let balance = ledger.mint(&account, &usdc(), Amount::whole(1000)).await.unwrap();
        assert_eq!(balance, Amount::whole(1000));
        assert_eq!(ledger.balance(&account, &usdc()).await, Amount::whole(1000));
    }

    #[tokio::test]
    async fn test_direct_transfer() {
        let ledger = InMemoryLedger::new();
        let from = AccountId::new();
        let to = AccountId::new();
        ledger.mint(&from, &usdc(), Amount::whole(1000)).await.unwrap();

        ledger
            .transfer(
                &usdc(),
                TransferLeg::direct(from.clone(), to.clone(), Amount::whole(400)),
                EntryReason::Transfer,
            )
            .await
            .unwrap();

        assert_eq!(ledger.balance(&from, &usdc()).await, Amount::whole(600));
        assert_eq!(ledger.balance(&to, &usdc()).await, Amount::whole(400));
    }

    #[tokio::test]
    async fn test_no_negative_balance() {
        let ledger = InMemoryLedger::new();
        let from = AccountId::new();
        ledger.mint(&from, &usdc(), Amount::whole(100)).await.unwrap();

        let result = ledger
            .transfer(
                &usdc(),
                TransferLeg::direct(from.clone(), AccountId::new(), Amount::whole(200)),
                EntryReason::Transfer,
            )
            .await;

        assert!(matches!(result, Err(LedgerError::InsufficientBalance { .. })));
    }

    #[tokio::test]
    async fn test_pull_requires_allowance() {
        let ledger = InMemoryLedger::new();
        let owner = AccountId::new();
        let vault = AccountId::new();
        ledger.mint(&owner, &usdc(), Amount::whole(100)).await.unwrap();

        let leg = TransferLeg::pull(vault.clone(), owner.clone(), vault.clone(), Amount::whole(50));
        let result = ledger
            .transfer(&usdc(), leg.clone(), EntryReason::Transfer)
            .await;
        assert!(matches!(result, Err(LedgerError::InsufficientAllowance { .. })));

        ledger.approve(&owner, &vault, &usdc(), Amount::whole(60)).await;
        ledger.transfer(&usdc(), leg, EntryReason::Transfer).await.unwrap();
        assert_eq!(ledger.allowance(&owner, &vault, &usdc()).await, Amount::whole(10));
        assert_eq!(ledger.balance(&vault, &usdc()).await, Amount::whole(50));
    }

    #[tokio::test]
    async fn test_failed_batch_applies_nothing() {
        let ledger = InMemoryLedger::new();
        let vault = AccountId::new();
        let a = AccountId::new();
        let b = AccountId::new();
        ledger.mint(&vault, &usdc(), Amount::whole(100)).await.unwrap();
        let entries_before = ledger.entry_count().await;

        // Second leg overdraws once the first has been staged
        let legs = vec![
            TransferLeg::direct(vault.clone(), a.clone(), Amount::whole(70)),
            TransferLeg::direct(vault.clone(), b.clone(), Amount::whole(40)),
        ];
        let result = ledger
            .execute_batch(&usdc(), &legs, EntryReason::Transfer)
            .await;

        assert!(matches!(result, Err(LedgerError::InsufficientBalance { .. })));
        assert_eq!(ledger.balance(&vault, &usdc()).await, Amount::whole(100));
        assert_eq!(ledger.balance(&a, &usdc()).await, Amount::ZERO);
        assert_eq!(ledger.entry_count().await, entries_before);
    }

    #[tokio::test]
    async fn test_batch_entries_are_linked() {
        let ledger = InMemoryLedger::new();
        let vault = AccountId::new();
        ledger.mint(&vault, &usdc(), Amount::whole(100)).await.unwrap();

        let legs = vec![
            TransferLeg::direct(vault.clone(), AccountId::new(), Amount::whole(30)),
            TransferLeg::direct(vault.clone(), AccountId::new(), Amount::whole(20)),
        ];
        let receipt = ledger
            .execute_batch(
                &usdc(),
                &legs,
                EntryReason::Settlement {
                    record: "escrow_1".to_string(),
                },
            )
            .await
            .unwrap();

        let entries = ledger.batch_entries(&receipt.batch_id).await;
        assert_eq!(entries.len(), 4); // debit + credit per leg
        assert_eq!(ledger.balance(&vault, &usdc()).await, Amount::whole(50));
        assert_eq!(ledger.account_entries(&vault).await.len(), 3);
    }

    #[tokio::test]
    async fn test_reversed_leg_restores_balances() {
        let ledger = InMemoryLedger::new();
        let from = AccountId::new();
        let to = AccountId::new();
        ledger.mint(&from, &usdc(), Amount::whole(10)).await.unwrap();

        let leg = TransferLeg::direct(from.clone(), to.clone(), Amount::whole(4));
        ledger.transfer(&usdc(), leg.clone(), EntryReason::Transfer).await.unwrap();
        ledger
            .transfer(
                &usdc(),
                leg.reversed(),
                EntryReason::Compensation {
                    record: "test".to_string(),
                },
            )
            .await
            .unwrap();

        assert_eq!(ledger.balance(&from, &usdc()).await, Amount::whole(10));
        assert_eq!(ledger.balance(&to, &usdc()).await, Amount::ZERO);
    }

    #[tokio::test]
    async fn test_compensation_moves_third_party_funds() {
        let ledger = InMemoryLedger::new();
        let depositor = AccountId::new();
        let vault = AccountId::new();
        let grantor = AccountId::new();
        ledger.mint(&depositor, &usdc(), Amount::whole(12)).await.unwrap();
        ledger.approve(&depositor, &vault, &usdc(), Amount::whole(12)).await;

        let receipt = ledger
            .execute_batch(
                &usdc(),
                &[
                    TransferLeg::pull(vault.clone(), depositor.clone(), vault.clone(), Amount::whole(10)),
                    TransferLeg::pull(vault.clone(), depositor.clone(), grantor.clone(), Amount::whole(2)),
                ],
                EntryReason::Transfer,
            )
            .await
            .unwrap();

        // The grantor never approved anything; the reversal still applies
        let undo: Vec<TransferLeg> = receipt.legs.iter().rev().map(TransferLeg::reversed).collect();
        assert!(undo.iter().all(|leg| leg.spender.is_none()));
        let reason = EntryReason::Compensation {
            record: "escrow-1".to_string(),
        };
        ledger.execute_batch(&usdc(), &undo, reason).await.unwrap();

        assert_eq!(ledger.balance(&depositor, &usdc()).await, Amount::whole(12));
        assert_eq!(ledger.balance(&grantor, &usdc()).await, Amount::ZERO);
        assert_eq!(ledger.balance(&vault, &usdc()).await, Amount::ZERO);
        // Consumed allowance is not restored
        assert_eq!(ledger.allowance(&depositor, &vault, &usdc()).await, Amount::ZERO);
    }

    #[tokio::test]
    async fn test_compensation_fails_whole_when_funds_moved_on() {
        let ledger = InMemoryLedger::new();
        let vault = AccountId::new();
        let grantor = AccountId::new();
        ledger.mint(&vault, &usdc(), Amount::whole(10)).await.unwrap();

        let fee = TransferLeg::direct(vault.clone(), grantor.clone(), Amount::whole(2));
        ledger.transfer(&usdc(), fee.clone(), EntryReason::Transfer).await.unwrap();
        ledger
            .transfer(
                &usdc(),
                TransferLeg::direct(grantor.clone(), AccountId::new(), Amount::whole(2)),
                EntryReason::Transfer,
            )
            .await
            .unwrap();

        let result = ledger
            .execute_batch(
                &usdc(),
                &[fee.reversed()],
                EntryReason::Compensation {
                    record: "escrow-1".to_string(),
                },
            )
            .await;
        assert!(matches!(result, Err(LedgerError::InsufficientBalance { .. })));
        assert_eq!(ledger.balance(&vault, &usdc()).await, Amount::whole(8));
    }

    #[tokio::test]
    async fn test_empty_batch_is_rejected() {
        let ledger = InMemoryLedger::new();
        let result = ledger.execute_batch(&usdc(), &[], EntryReason::Transfer).await;
        assert_eq!(result, Err(LedgerError::EmptyBatch));
    }
}
