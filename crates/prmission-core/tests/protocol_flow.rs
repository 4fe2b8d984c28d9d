use std::sync::Arc;

use async_trait::async_trait;
use chrono::Duration;

use prmission_core::{EscrowStore, ManualClock, MemoryStore, Protocol, StoreError, StoreResult};
use prmission_ledger::{InMemoryLedger, TokenLedger};
use prmission_trust::{InMemoryIdentityRegistry, InMemoryReputationRegistry};
use prmission_types::{
    AccountId, AgentIdentityId, Amount, AssetId, Bps, Escrow, EscrowId, EscrowStatus,
    GrantRequest, PermissionId, PermissionStatus, ProtocolError, ProtocolEvent,
};

struct Harness {
    protocol: Protocol,
    ledger: InMemoryLedger,
    clock: ManualClock,
    usdc: AssetId,
    owner: AccountId,
    treasury: AccountId,
    vault: AccountId,
    grantor: AccountId,
    agent: AccountId,
}

impl Harness {
    fn new() -> Self {
        Self::with_stores(None)
    }

    fn with_stores(escrows: Option<Arc<dyn EscrowStore>>) -> Self {
        let ledger = InMemoryLedger::new();
        let clock = ManualClock::starting_now();
        let (owner, treasury, vault) = (AccountId::new(), AccountId::new(), AccountId::new());

        let mut builder = Protocol::builder(
            owner.clone(),
            treasury.clone(),
            vault.clone(),
            Arc::new(ledger.clone()),
        )
        .clock(Arc::new(clock.clone()));
        if let Some(escrows) = escrows {
            let memory = Arc::new(MemoryStore::new());
            builder = builder.permission_store(memory).escrow_store(escrows);
        }

        Self {
            protocol: builder.build().unwrap(),
            ledger,
            clock,
            usdc: AssetId::usdc(),
            owner,
            treasury,
            vault,
            grantor: AccountId::new(),
            agent: AccountId::new(),
        }
    }

    /// Mint and approve `tokens` whole USDC for the agent
    async fn fund_agent(&self, tokens: u64) {
        self.ledger
            .mint(&self.agent, &self.usdc, Amount::whole(tokens))
            .await
            .unwrap();
        self.ledger
            .approve(&self.agent, &self.vault, &self.usdc, Amount::whole(tokens))
            .await;
    }

    async fn grant(&self, bps: u16) -> PermissionId {
        self.protocol
            .grant(
                &self.grantor,
                GrantRequest::open("purchase_history", "offers", Bps(bps), Duration::days(30)),
            )
            .await
            .unwrap()
            .value
    }

    async fn deposit(&self, permission_id: PermissionId, tokens: u64) -> EscrowId {
        self.protocol
            .deposit(&self.agent, permission_id, Amount::whole(tokens), None)
            .await
            .unwrap()
            .value
    }

    async fn balance(&self, account: &AccountId) -> Amount {
        self.ledger.balance(account, &self.usdc).await
    }
}

#[tokio::test]
async fn test_reference_settlement() {
    let h = Harness::new();
    h.fund_agent(100).await;

    let pid = h.grant(200).await;
    let eid = h.deposit(pid, 50).await;
    assert_eq!(h.balance(&h.vault).await, Amount::whole(50));

    let reported = h
        .protocol
        .report_outcome(&h.agent, eid, Amount::whole(500), "conversion", "order #1")
        .await
        .unwrap();
    assert_eq!(reported.value, Amount::whole(50));

    h.clock.advance(Duration::hours(24) + Duration::seconds(1));
    let settled = h.protocol.settle(&h.grantor, eid).await.unwrap();

    assert_eq!(settled.value.grantor_share, Amount::whole(1));
    assert_eq!(settled.value.protocol_fee, Amount::new(1_500_000));
    assert_eq!(settled.value.depositor_refund, Amount::new(47_500_000));
    assert_eq!(h.balance(&h.grantor).await, Amount::whole(1));
    assert_eq!(h.balance(&h.treasury).await, Amount::new(1_500_000));
    assert_eq!(h.balance(&h.agent).await, Amount::new(97_500_000));
    assert_eq!(h.balance(&h.vault).await, Amount::ZERO);

    let escrow = h.protocol.get_escrow(eid).await.unwrap();
    assert_eq!(escrow.status, EscrowStatus::Settled);

    let stats = h.protocol.stats().await.unwrap();
    assert_eq!(stats.total_settled_volume, Amount::whole(50));
    assert_eq!(stats.total_protocol_fees, Amount::new(1_500_000));
    assert_eq!(stats.next_permission_id, PermissionId(2));
    assert_eq!(stats.next_escrow_id, EscrowId(2));
}

#[tokio::test]
async fn test_payout_ignores_reported_outcome() {
    let h = Harness::new();
    h.fund_agent(100).await;
    let pid = h.grant(200).await;
    let eid = h.deposit(pid, 50).await;

    // A tiny outcome does not shrink the grantor's share
    h.protocol
        .report_outcome(&h.agent, eid, Amount::new(1), "click", "")
        .await
        .unwrap();
    let preview = h.protocol.preview_settlement(eid).await.unwrap();
    assert_eq!(preview.grantor_share, Amount::whole(1));

    // An inflated claim is capped at the escrowed amount
    let capped = h
        .protocol
        .report_outcome(&h.agent, eid, Amount::whole(1_000_000), "conversion", "")
        .await
        .unwrap();
    assert_eq!(capped.value, Amount::whole(50));
    assert_eq!(
        h.protocol.get_escrow(eid).await.unwrap().outcome_value,
        Amount::whole(50)
    );
}

#[tokio::test]
async fn test_upfront_fee_paid_on_deposit() {
    let h = Harness::new();
    h.fund_agent(100).await;
    let pid = h
        .protocol
        .grant(
            &h.grantor,
            GrantRequest::open("location", "ads", Bps(100), Duration::days(1))
                .for_agent(h.agent.clone())
                .with_upfront_fee(Amount::whole(2)),
        )
        .await
        .unwrap()
        .value;

    let applied = h
        .protocol
        .deposit(&h.agent, pid, Amount::whole(10), None)
        .await
        .unwrap();
    assert_eq!(applied.events.len(), 2);
    assert!(matches!(
        applied.events[1],
        ProtocolEvent::UpfrontFeePaid { amount, .. } if amount == Amount::whole(2)
    ));
    assert_eq!(h.balance(&h.grantor).await, Amount::whole(2));
    assert_eq!(h.balance(&h.agent).await, Amount::whole(88));

    // Scoped permission rejects other agents
    let stranger = AccountId::new();
    assert!(matches!(
        h.protocol.deposit(&stranger, pid, Amount::whole(1), None).await,
        Err(ProtocolError::NotAuthorizedMerchant { .. })
    ));
    assert!(!h.protocol.check_access(pid, &stranger).await.unwrap().permitted);
    assert!(h.protocol.check_access(pid, &h.agent).await.unwrap().permitted);
}

#[tokio::test]
async fn test_deposit_validation() {
    let h = Harness::new();
    h.fund_agent(10).await;
    let pid = h.grant(200).await;

    assert_eq!(
        h.protocol.deposit(&h.agent, pid, Amount::ZERO, None).await,
        Err(ProtocolError::ZeroValue)
    );
    assert!(matches!(
        h.protocol.deposit(&h.agent, PermissionId(99), Amount::whole(1), None).await,
        Err(ProtocolError::PermissionNotFound { .. })
    ));
    // More than the approval: ledger rejects, nothing recorded
    assert!(h
        .protocol
        .deposit(&h.agent, pid, Amount::whole(11), None)
        .await
        .is_err());
    assert!(h.protocol.permission_escrows(pid).await.unwrap().is_empty());
    assert_eq!(h.balance(&h.agent).await, Amount::whole(10));
}

#[tokio::test]
async fn test_grant_validation() {
    let h = Harness::new();
    let too_high = GrantRequest::open("health", "research", Bps(5001), Duration::days(1));
    assert_eq!(
        h.protocol.grant(&h.grantor, too_high).await,
        Err(ProtocolError::CompensationTooHigh {
            requested: 5001,
            max: 5000
        })
    );
    let empty = GrantRequest::open("", "research", Bps(100), Duration::days(1));
    assert_eq!(
        h.protocol.grant(&h.grantor, empty).await,
        Err(ProtocolError::EmptyCategory)
    );
    let max = GrantRequest::open("health", "research", Bps(5000), Duration::days(1));
    assert!(h.protocol.grant(&h.grantor, max).await.is_ok());
}

#[tokio::test]
async fn test_dispute_window_edges() {
    let h = Harness::new();
    h.fund_agent(100).await;
    let pid = h.grant(200).await;
    let first = h.deposit(pid, 10).await;
    let second = h.deposit(pid, 10).await;
    for eid in [first, second] {
        h.protocol
            .report_outcome(&h.agent, eid, Amount::whole(10), "conversion", "")
            .await
            .unwrap();
    }

    h.clock.advance(Duration::seconds(86_399));
    assert!(matches!(
        h.protocol.settle(&h.agent, first).await,
        Err(ProtocolError::DisputeWindowStillOpen { .. })
    ));
    h.protocol
        .dispute(&h.grantor, second, "conversion never happened")
        .await
        .unwrap();

    // Exactly at the window end: settle succeeds, dispute is too late
    h.clock.advance(Duration::seconds(1));
    assert!(matches!(
        h.protocol.dispute(&h.agent, first, "late").await,
        Err(ProtocolError::DisputeWindowClosed { .. })
    ));
    assert!(h.protocol.settle(&h.agent, first).await.is_ok());

    // Disputed escrows cannot be settled normally
    assert!(matches!(
        h.protocol.settle(&h.agent, second).await,
        Err(ProtocolError::InvalidEscrowState { .. })
    ));
}

#[tokio::test]
async fn test_settle_access_control() {
    let h = Harness::new();
    h.fund_agent(10).await;
    let pid = h.grant(200).await;
    let eid = h.deposit(pid, 10).await;
    h.protocol
        .report_outcome(&h.agent, eid, Amount::whole(10), "conversion", "")
        .await
        .unwrap();
    h.clock.advance(Duration::days(1));

    let stranger = AccountId::new();
    assert!(matches!(
        h.protocol.settle(&stranger, eid).await,
        Err(ProtocolError::NotAuthorizedToSettle { .. })
    ));
    assert!(matches!(
        h.protocol.dispute(&stranger, eid, "x").await,
        Err(ProtocolError::NotEscrowParty { .. })
    ));
    assert!(matches!(
        h.protocol
            .report_outcome(&stranger, eid, Amount::whole(1), "x", "")
            .await,
        Err(ProtocolError::NotYourEscrow { .. })
    ));

    h.protocol.settle(&h.owner, eid).await.unwrap();
    assert!(matches!(
        h.protocol.settle(&h.owner, eid).await,
        Err(ProtocolError::InvalidEscrowState { .. })
    ));
}

#[tokio::test]
async fn test_resolve_dispute_splits() {
    for (grantor_bps, grantor_share, depositor_refund) in [
        (10_000, 97_000_000u128, 0u128),
        (5_000, 48_500_000, 48_500_000),
        (0, 0, 97_000_000),
    ] {
        let h = Harness::new();
        h.fund_agent(100).await;
        let pid = h.grant(200).await;
        let eid = h.deposit(pid, 100).await;
        h.protocol
            .report_outcome(&h.agent, eid, Amount::whole(100), "conversion", "")
            .await
            .unwrap();
        h.protocol.dispute(&h.agent, eid, "disagree").await.unwrap();

        assert_eq!(
            h.protocol
                .resolve_dispute(&h.agent, eid, Bps(grantor_bps))
                .await,
            Err(ProtocolError::NotOwner)
        );
        let resolved = h
            .protocol
            .resolve_dispute(&h.owner, eid, Bps(grantor_bps))
            .await
            .unwrap();
        assert_eq!(resolved.value.protocol_fee, Amount::whole(3));
        assert_eq!(resolved.value.grantor_share, Amount::new(grantor_share));
        assert_eq!(resolved.value.depositor_refund, Amount::new(depositor_refund));
        assert_eq!(h.balance(&h.vault).await, Amount::ZERO);
    }
}

#[tokio::test]
async fn test_resolve_dispute_rejects_bad_bps() {
    let h = Harness::new();
    assert_eq!(
        h.protocol
            .resolve_dispute(&h.owner, EscrowId(1), Bps(10_001))
            .await,
        Err(ProtocolError::InvalidBps { bps: 10_001 })
    );
}

#[tokio::test]
async fn test_refund_after_revocation_grace() {
    let h = Harness::new();
    h.fund_agent(10).await;
    let pid = h.grant(200).await;
    let eid = h.deposit(pid, 10).await;

    assert!(matches!(
        h.protocol.refund(&h.agent, eid).await,
        Err(ProtocolError::NotRefundable { .. })
    ));

    let revoked = h.protocol.revoke(&h.grantor, pid).await.unwrap();
    assert_eq!(revoked.value, PermissionStatus::Revoked);

    h.clock.advance(Duration::seconds(59));
    assert!(matches!(
        h.protocol.refund(&h.agent, eid).await,
        Err(ProtocolError::NotRefundable { .. })
    ));

    h.clock.advance(Duration::seconds(1));
    // Anyone may trigger it; the funds still go to the depositor
    let refunded = h.protocol.refund(&AccountId::new(), eid).await.unwrap();
    assert_eq!(refunded.value, Amount::whole(10));
    assert_eq!(h.balance(&h.agent).await, Amount::whole(10));
    assert_eq!(
        h.protocol.get_escrow(eid).await.unwrap().status,
        EscrowStatus::Refunded
    );
}

#[tokio::test]
async fn test_reported_escrow_settles_after_revocation() {
    let h = Harness::new();
    h.fund_agent(100).await;
    let pid = h.grant(200).await;
    let eid = h.deposit(pid, 50).await;

    h.protocol.revoke(&h.grantor, pid).await.unwrap();
    let reported = h
        .protocol
        .report_outcome(&h.agent, eid, Amount::whole(50), "conversion", "")
        .await
        .unwrap();
    assert_eq!(reported.value, Amount::whole(50));

    // Once an outcome is on record the grace refund no longer applies
    h.clock.advance(Duration::seconds(60));
    assert!(matches!(
        h.protocol.refund(&h.agent, eid).await,
        Err(ProtocolError::InvalidEscrowState { .. })
    ));

    h.clock.advance(Duration::hours(24) + Duration::seconds(1));
    let settled = h.protocol.settle(&h.agent, eid).await.unwrap();
    assert_eq!(settled.value.grantor_share, Amount::whole(1));
    assert_eq!(settled.value.protocol_fee, Amount::new(1_500_000));
    assert_eq!(settled.value.depositor_refund, Amount::new(47_500_000));
    assert_eq!(h.balance(&h.grantor).await, Amount::whole(1));
    assert_eq!(h.balance(&h.agent).await, Amount::new(97_500_000));
    assert_eq!(h.balance(&h.vault).await, Amount::ZERO);
}

#[tokio::test]
async fn test_permission_escrows_in_deposit_order() {
    let h = Harness::new();
    h.fund_agent(30).await;
    let pid = h.grant(200).await;
    let other = h.grant(100).await;

    let first = h.deposit(pid, 10).await;
    let unrelated = h.deposit(other, 5).await;
    let second = h.deposit(pid, 10).await;
    let third = h.deposit(pid, 5).await;

    assert_eq!(
        h.protocol.permission_escrows(pid).await.unwrap(),
        vec![first, second, third]
    );
    assert_eq!(
        h.protocol.permission_escrows(other).await.unwrap(),
        vec![unrelated]
    );
}

#[tokio::test]
async fn test_unenforced_identity_not_recorded() {
    let h = Harness::new();
    h.fund_agent(10).await;
    let pid = h.grant(200).await;

    let applied = h
        .protocol
        .deposit(&h.agent, pid, Amount::whole(5), Some(AgentIdentityId(7)))
        .await
        .unwrap();
    assert!(matches!(
        applied.events[0],
        ProtocolEvent::EscrowDeposited { agent_identity: None, .. }
    ));
    let escrow = h.protocol.get_escrow(applied.value).await.unwrap();
    assert_eq!(escrow.agent_identity, None);
}

#[tokio::test]
async fn test_disputed_refund_is_owner_only() {
    let h = Harness::new();
    h.fund_agent(10).await;
    let pid = h.grant(200).await;
    let eid = h.deposit(pid, 10).await;
    h.protocol
        .report_outcome(&h.agent, eid, Amount::whole(10), "conversion", "")
        .await
        .unwrap();
    h.protocol.dispute(&h.grantor, eid, "fraud").await.unwrap();

    assert_eq!(
        h.protocol.refund(&h.agent, eid).await,
        Err(ProtocolError::NotOwner)
    );
    h.protocol.refund(&h.owner, eid).await.unwrap();
    assert_eq!(h.balance(&h.agent).await, Amount::whole(10));
}

#[tokio::test]
async fn test_revoke_after_expiry_records_expired() {
    let h = Harness::new();
    let pid = h
        .protocol
        .grant(
            &h.grantor,
            GrantRequest::open("email", "newsletter", Bps(0), Duration::hours(1)),
        )
        .await
        .unwrap()
        .value;

    assert!(matches!(
        h.protocol.revoke(&AccountId::new(), pid).await,
        Err(ProtocolError::NotYourPermission { .. })
    ));

    h.clock.advance(Duration::hours(2));
    assert_eq!(
        h.protocol.get_permission(pid).await.unwrap().status,
        PermissionStatus::Expired
    );
    let applied = h.protocol.revoke(&h.grantor, pid).await.unwrap();
    assert_eq!(applied.value, PermissionStatus::Expired);
    assert!(matches!(
        applied.events[0],
        ProtocolEvent::PermissionExpired { .. }
    ));
    assert!(matches!(
        h.protocol.revoke(&h.grantor, pid).await,
        Err(ProtocolError::PermissionNotActive { .. })
    ));
}

#[tokio::test]
async fn test_expire_and_sweep() {
    let h = Harness::new();
    let short = h
        .protocol
        .grant(
            &h.grantor,
            GrantRequest::open("email", "newsletter", Bps(0), Duration::hours(1)),
        )
        .await
        .unwrap()
        .value;
    let long = h.grant(100).await;

    assert!(matches!(
        h.protocol.expire_permission(short).await,
        Err(ProtocolError::NotExpired { .. })
    ));

    h.clock.advance(Duration::hours(2));
    let swept = h
        .protocol
        .sweep_expired(&[short, long, PermissionId(42)])
        .await
        .unwrap();
    assert_eq!(swept.value, vec![short]);
    assert_eq!(swept.events.len(), 1);

    // A deposit against the long permission still works
    h.fund_agent(1).await;
    h.deposit(long, 1).await;
    assert!(matches!(
        h.protocol.deposit(&h.agent, short, Amount::whole(1), None).await,
        Err(ProtocolError::PermissionNotActive { .. })
    ));
}

#[tokio::test]
async fn test_deposit_after_validity_rejected() {
    let h = Harness::new();
    h.fund_agent(1).await;
    let pid = h
        .protocol
        .grant(
            &h.grantor,
            GrantRequest::open("email", "newsletter", Bps(0), Duration::hours(1)),
        )
        .await
        .unwrap()
        .value;

    // Still usable exactly at valid_until
    h.clock.advance(Duration::hours(1));
    assert!(h.protocol.check_access(pid, &h.agent).await.unwrap().permitted);

    h.clock.advance(Duration::seconds(1));
    assert!(matches!(
        h.protocol.deposit(&h.agent, pid, Amount::whole(1), None).await,
        Err(ProtocolError::PermissionExpired { .. })
    ));
}

#[tokio::test]
async fn test_grantor_pagination() {
    let h = Harness::new();
    for bps in [100, 200, 300, 400, 500] {
        h.grant(bps).await;
    }
    assert_eq!(h.protocol.grantor_permission_count(&h.grantor).await.unwrap(), 5);

    let page = h.protocol.grantor_permissions(&h.grantor, 1, 2).await.unwrap();
    let ids: Vec<PermissionId> = page.iter().map(|p| p.id).collect();
    assert_eq!(ids, vec![PermissionId(2), PermissionId(3)]);

    let tail = h.protocol.grantor_permissions(&h.grantor, 4, 10).await.unwrap();
    assert_eq!(tail.len(), 1);
    assert!(h
        .protocol
        .grantor_permissions(&h.grantor, 10, 10)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_pause_blocks_new_funds_only() {
    let h = Harness::new();
    h.fund_agent(10).await;
    let pid = h.grant(200).await;
    let eid = h.deposit(pid, 5).await;

    assert_eq!(h.protocol.pause(&h.agent).await, Err(ProtocolError::NotOwner));
    h.protocol.pause(&h.owner).await.unwrap();

    assert_eq!(
        h.protocol
            .grant(
                &h.grantor,
                GrantRequest::open("x", "y", Bps(1), Duration::days(1))
            )
            .await,
        Err(ProtocolError::Paused)
    );
    assert_eq!(
        h.protocol.deposit(&h.agent, pid, Amount::whole(1), None).await,
        Err(ProtocolError::Paused)
    );

    // In-flight escrows keep moving
    h.protocol
        .report_outcome(&h.agent, eid, Amount::whole(5), "conversion", "")
        .await
        .unwrap();
    h.clock.advance(Duration::days(1));
    h.protocol.settle(&h.agent, eid).await.unwrap();

    h.protocol.unpause(&h.owner).await.unwrap();
    h.deposit(pid, 1).await;
}

#[tokio::test]
async fn test_trust_gate_on_deposit() {
    let h = Harness::new();
    h.fund_agent(10).await;
    let pid = h.grant(200).await;

    let identities = Arc::new(InMemoryIdentityRegistry::new());
    let reputation = Arc::new(InMemoryReputationRegistry::new());
    let governance = h.protocol.governance();
    governance
        .set_identity_registry(&h.owner, Some(identities.clone()))
        .await
        .unwrap();
    governance
        .set_reputation_registry(&h.owner, Some(reputation.clone()))
        .await
        .unwrap();
    governance
        .set_identity_enforcement(&h.owner, true)
        .await
        .unwrap();

    assert_eq!(
        h.protocol.deposit(&h.agent, pid, Amount::whole(1), None).await,
        Err(ProtocolError::AgentIdRequired)
    );
    assert_eq!(
        h.protocol
            .deposit(&h.agent, pid, Amount::whole(1), Some(AgentIdentityId(0)))
            .await,
        Err(ProtocolError::AgentIdRequired)
    );
    assert!(matches!(
        h.protocol
            .deposit(&h.agent, pid, Amount::whole(1), Some(AgentIdentityId(7)))
            .await,
        Err(ProtocolError::AgentNotRegistered { .. })
    ));

    let someone_elses = identities.register(AccountId::new()).await;
    assert!(matches!(
        h.protocol
            .deposit(&h.agent, pid, Amount::whole(1), Some(someone_elses))
            .await,
        Err(ProtocolError::NotAgentOwnerOrWallet { .. })
    ));

    let id = identities.register(h.agent.clone()).await;
    h.protocol
        .deposit(&h.agent, pid, Amount::whole(1), Some(id))
        .await
        .unwrap();

    // Reputation: only trusted reviewers count
    let reviewer = AccountId::new();
    governance
        .set_trusted_reviewers(&h.owner, vec![reviewer.clone()])
        .await
        .unwrap();
    governance
        .set_reputation_enforcement(&h.owner, true, 50)
        .await
        .unwrap();
    reputation.give_feedback(AccountId::new(), id, 100).await;
    assert!(matches!(
        h.protocol
            .deposit(&h.agent, pid, Amount::whole(1), Some(id))
            .await,
        Err(ProtocolError::AgentHasNoReputation { .. })
    ));

    reputation.give_feedback(reviewer.clone(), id, 40).await;
    assert!(matches!(
        h.protocol
            .deposit(&h.agent, pid, Amount::whole(1), Some(id))
            .await,
        Err(ProtocolError::AgentBelowMinimumReputation { score: 40, minimum: 50, .. })
    ));

    reputation.give_feedback(reviewer, id, 80).await;
    let report = h.protocol.check_agent_trust(id, &h.agent).await.unwrap();
    assert!(report.registered && report.authorized && report.reputable);
    assert_eq!(report.score, 80);
    h.protocol
        .deposit(&h.agent, pid, Amount::whole(1), Some(id))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_rescue_tokens() {
    let h = Harness::new();
    let stray = AssetId::new("DAI");
    h.ledger
        .mint(&h.vault, &stray, Amount::whole(5))
        .await
        .unwrap();

    assert_eq!(
        h.protocol
            .rescue_tokens(&h.owner, h.usdc.clone(), Amount::whole(1))
            .await,
        Err(ProtocolError::CannotRescuePaymentToken)
    );
    assert_eq!(
        h.protocol
            .rescue_tokens(&h.grantor, stray.clone(), Amount::whole(1))
            .await,
        Err(ProtocolError::NotOwner)
    );

    h.protocol
        .rescue_tokens(&h.owner, stray.clone(), Amount::whole(5))
        .await
        .unwrap();
    assert_eq!(h.ledger.balance(&h.treasury, &stray).await, Amount::whole(5));
}

/// Escrow store whose writes always fail
struct BrokenEscrowStore {
    inner: MemoryStore,
}

#[async_trait]
impl EscrowStore for BrokenEscrowStore {
    async fn allocate_escrow_id(&self) -> StoreResult<EscrowId> {
        self.inner.allocate_escrow_id().await
    }

    async fn next_escrow_id(&self) -> StoreResult<EscrowId> {
        self.inner.next_escrow_id().await
    }

    async fn put_escrow(&self, _escrow: Escrow) -> StoreResult<()> {
        Err(StoreError::Unavailable {
            message: "disk full".to_string(),
        })
    }

    async fn escrow(&self, id: EscrowId) -> StoreResult<Option<Escrow>> {
        self.inner.escrow(id).await
    }

    async fn permission_escrows(&self, permission_id: PermissionId) -> StoreResult<Vec<EscrowId>> {
        self.inner.permission_escrows(permission_id).await
    }
}

#[tokio::test]
async fn test_failed_write_reverses_deposit() {
    let broken = Arc::new(BrokenEscrowStore {
        inner: MemoryStore::new(),
    });
    let h = Harness::with_stores(Some(broken as Arc<dyn EscrowStore>));
    h.fund_agent(10).await;
    let pid = h
        .protocol
        .grant(
            &h.grantor,
            GrantRequest::open("email", "newsletter", Bps(100), Duration::days(1))
                .with_upfront_fee(Amount::whole(1)),
        )
        .await
        .unwrap()
        .value;

    let result = h.protocol.deposit(&h.agent, pid, Amount::whole(4), None).await;
    assert!(matches!(result, Err(ProtocolError::Storage { .. })));

    assert_eq!(h.balance(&h.agent).await, Amount::whole(10));
    assert_eq!(h.balance(&h.vault).await, Amount::ZERO);
    assert_eq!(h.balance(&h.grantor).await, Amount::ZERO);
    assert!(h.protocol.get_permission(pid).await.is_ok());
}

#[tokio::test]
async fn test_events_serialize_with_type_tag() {
    let h = Harness::new();
    let applied = h
        .protocol
        .grant(
            &h.grantor,
            GrantRequest::open("email", "newsletter", Bps(100), Duration::days(1)),
        )
        .await
        .unwrap();
    let json = serde_json::to_value(&applied.events[0]).unwrap();
    assert_eq!(json["type"], "PermissionGranted");
    assert_eq!(json["data_category"], "email");
}
