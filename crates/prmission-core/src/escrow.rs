//! Escrow Ledger operations
//!
//! ```text
//! Funded ──report──▶ OutcomeReported ──settle (window elapsed)──▶ Settled
//!   │                    │
//!   │                    └──dispute (inside window)──▶ Disputed ──resolve──▶ Settled
//!   │                                                     └──refund───▶ Refunded
//!   └──refund (permission revoked/expired, grace elapsed)──▶ Refunded
//! ```
//!
//! Payouts are always sized from the escrowed amount. The reported outcome
//! is recorded for the parties but never enters the split.

use prmission_allocator::{dispute_resolution, escrow_settlement};
use prmission_ledger::EntryReason;
use prmission_types::{
    AccountId, AgentIdentityId, Amount, Applied, Bps, Escrow, EscrowId, EscrowSettlement,
    EscrowStatus, Permission, PermissionId, PermissionStatus, ProtocolError, ProtocolEvent,
    Result,
};
use tracing::{debug, info};

use crate::locks::RecordKey;
use crate::protocol::Protocol;

fn wrong_state(escrow: &Escrow, expected: &str) -> ProtocolError {
    ProtocolError::InvalidEscrowState {
        escrow_id: escrow.id.to_string(),
        status: escrow.status.to_string(),
        expected: expected.to_string(),
    }
}

impl Protocol {
    /// Lock `amount` against a permission and pay its upfront fee
    ///
    /// Principal and fee are pulled from the caller in one batch on the
    /// custody account's allowance.
    pub async fn deposit(
        &self,
        caller: &AccountId,
        permission_id: PermissionId,
        amount: Amount,
        identity: Option<AgentIdentityId>,
    ) -> Result<Applied<EscrowId>> {
        let _guard = self.locks.acquire(RecordKey::Permission(permission_id)).await;
        let now = self.clock.now();

        let permission = self.load_permission(permission_id).await?;
        let governance = self.governance.snapshot().await;
        if governance.paused {
            return Err(ProtocolError::Paused);
        }
        if amount.is_zero() {
            return Err(ProtocolError::ZeroValue);
        }
        if permission.status != PermissionStatus::Active {
            return Err(ProtocolError::PermissionNotActive {
                permission_id: permission_id.to_string(),
            });
        }
        if permission.is_expired_at(now) {
            return Err(ProtocolError::PermissionExpired {
                permission_id: permission_id.to_string(),
                expired_at: permission.valid_until.to_rfc3339(),
            });
        }
        if !permission.agent.admits(caller) {
            debug!(permission = %permission_id, caller = %caller, "Deposit by unauthorized agent");
            return Err(ProtocolError::NotAuthorizedMerchant {
                permission_id: permission_id.to_string(),
                caller: caller.to_string(),
            });
        }
        // The handle is only recorded when the gate actually verified it
        let identity = identity
            .filter(|id| id.value() != 0 && governance.trust.policy().identity_enforced);
        governance.trust.enforce(identity, caller).await?;

        let legs = vec![
            self.custody.pull(caller, self.custody.vault(), amount),
            self.custody.pull(caller, &permission.grantor, permission.upfront_fee),
        ];
        let receipt = self
            .custody
            .execute(
                legs,
                EntryReason::EscrowLock {
                    record: permission_id.to_string(),
                },
            )
            .await?;

        let escrow_id = self
            .custody
            .persist_or_compensate(
                receipt.as_ref(),
                permission_id.to_string(),
                self.escrows.allocate_escrow_id(),
            )
            .await?;
        let escrow = Escrow {
            id: escrow_id,
            permission_id,
            depositor: caller.clone(),
            agent_identity: identity,
            amount,
            outcome_value: Amount::ZERO,
            outcome_type: String::new(),
            outcome_detail: String::new(),
            outcome_reported_at: None,
            status: EscrowStatus::Funded,
            dispute_reason: None,
            disputed_by: None,
            created_at: now,
        };
        self.custody
            .persist_or_compensate(
                receipt.as_ref(),
                escrow_id.to_string(),
                self.escrows.put_escrow(escrow),
            )
            .await?;

        let mut events = vec![ProtocolEvent::EscrowDeposited {
            escrow_id,
            permission_id,
            depositor: caller.clone(),
            agent_identity: identity,
            amount,
        }];
        if !permission.upfront_fee.is_zero() {
            events.push(ProtocolEvent::UpfrontFeePaid {
                permission_id,
                grantor: permission.grantor.clone(),
                amount: permission.upfront_fee,
            });
        }

        info!(
            escrow = %escrow_id,
            permission = %permission_id,
            depositor = %caller,
            "Escrow funded with {}",
            amount
        );
        Ok(Applied::new(escrow_id, events))
    }

    /// Record the outcome of the work and open the dispute window
    ///
    /// Claims above the escrowed amount are capped. Reporting is allowed
    /// after the permission is revoked. Returns the stored outcome value.
    pub async fn report_outcome(
        &self,
        caller: &AccountId,
        escrow_id: EscrowId,
        claimed_value: Amount,
        outcome_type: impl Into<String>,
        outcome_detail: impl Into<String>,
    ) -> Result<Applied<Amount>> {
        let _guard = self.locks.acquire(RecordKey::Escrow(escrow_id)).await;
        let now = self.clock.now();

        let mut escrow = self.load_escrow(escrow_id).await?;
        if &escrow.depositor != caller {
            return Err(ProtocolError::NotYourEscrow {
                escrow_id: escrow_id.to_string(),
            });
        }
        if !matches!(escrow.status, EscrowStatus::Funded | EscrowStatus::OutcomeReported) {
            return Err(wrong_state(&escrow, "funded or outcome_reported"));
        }

        let outcome_value = claimed_value.min(escrow.amount);
        let outcome_type = outcome_type.into();
        escrow.outcome_value = outcome_value;
        escrow.outcome_type = outcome_type.clone();
        escrow.outcome_detail = outcome_detail.into();
        escrow.outcome_reported_at = Some(now);
        escrow.status = EscrowStatus::OutcomeReported;
        let dispute_window_end = now + self.config.dispute_window();
        self.escrows.put_escrow(escrow).await?;

        if outcome_value < claimed_value {
            debug!(escrow = %escrow_id, claimed = %claimed_value, "Outcome claim capped at escrow amount");
        }
        info!(escrow = %escrow_id, "Outcome reported: {} {}", outcome_value, outcome_type);
        Ok(Applied::single(
            outcome_value,
            ProtocolEvent::OutcomeReported {
                escrow_id,
                outcome_value,
                outcome_type,
                dispute_window_end,
            },
        ))
    }

    /// Freeze settlement pending owner review
    pub async fn dispute(
        &self,
        caller: &AccountId,
        escrow_id: EscrowId,
        reason: impl Into<String>,
    ) -> Result<Applied<()>> {
        let _guard = self.locks.acquire(RecordKey::Escrow(escrow_id)).await;
        let now = self.clock.now();

        let mut escrow = self.load_escrow(escrow_id).await?;
        let permission = self.load_permission(escrow.permission_id).await?;
        if &escrow.depositor != caller && &permission.grantor != caller {
            return Err(ProtocolError::NotEscrowParty {
                escrow_id: escrow_id.to_string(),
            });
        }
        let window_end = match (escrow.status, escrow.dispute_window_end(self.config.dispute_window())) {
            (EscrowStatus::OutcomeReported, Some(end)) => end,
            _ => return Err(wrong_state(&escrow, "outcome_reported")),
        };
        if now >= window_end {
            return Err(ProtocolError::DisputeWindowClosed {
                record_id: escrow_id.to_string(),
                closed_at: window_end.to_rfc3339(),
            });
        }

        let reason = reason.into();
        escrow.status = EscrowStatus::Disputed;
        escrow.dispute_reason = Some(reason.clone());
        escrow.disputed_by = Some(caller.clone());
        self.escrows.put_escrow(escrow).await?;

        info!(escrow = %escrow_id, disputed_by = %caller, "Settlement disputed: {}", reason);
        Ok(Applied::single(
            (),
            ProtocolEvent::SettlementDisputed {
                escrow_id,
                disputed_by: caller.clone(),
                reason,
            },
        ))
    }

    /// Pay out an undisputed escrow once its window has elapsed
    pub async fn settle(
        &self,
        caller: &AccountId,
        escrow_id: EscrowId,
    ) -> Result<Applied<EscrowSettlement>> {
        let _guard = self.locks.acquire(RecordKey::Escrow(escrow_id)).await;
        let now = self.clock.now();

        let mut escrow = self.load_escrow(escrow_id).await?;
        let permission = self.load_permission(escrow.permission_id).await?;
        let governance = self.governance.snapshot().await;
        if &escrow.depositor != caller && &permission.grantor != caller && &governance.owner != caller
        {
            debug!(escrow = %escrow_id, caller = %caller, "Settle rejected");
            return Err(ProtocolError::NotAuthorizedToSettle {
                record_id: escrow_id.to_string(),
            });
        }
        let window_end = match (escrow.status, escrow.dispute_window_end(self.config.dispute_window())) {
            (EscrowStatus::OutcomeReported, Some(end)) => end,
            _ => return Err(wrong_state(&escrow, "outcome_reported")),
        };
        if now < window_end {
            return Err(ProtocolError::DisputeWindowStillOpen {
                record_id: escrow_id.to_string(),
                closes_at: window_end.to_rfc3339(),
            });
        }

        let settlement = escrow_settlement(
            escrow.amount,
            permission.compensation_bps,
            self.config.protocol_fee(),
        )?;
        self.pay_out(&mut escrow, &permission, &governance.treasury, settlement)
            .await?;

        info!(
            escrow = %escrow_id,
            grantor_share = %settlement.grantor_share,
            protocol_fee = %settlement.protocol_fee,
            depositor_refund = %settlement.depositor_refund,
            "Escrow settled"
        );
        Ok(Applied::single(
            settlement,
            ProtocolEvent::SettlementCompleted {
                escrow_id,
                settlement,
            },
        ))
    }

    /// Owner decision on a disputed escrow
    ///
    /// The protocol fee comes off the top; `grantor_bps` of the rest goes to
    /// the grantor and the remainder back to the depositor.
    pub async fn resolve_dispute(
        &self,
        caller: &AccountId,
        escrow_id: EscrowId,
        grantor_bps: Bps,
    ) -> Result<Applied<EscrowSettlement>> {
        self.governance.require_owner(caller).await?;
        if !grantor_bps.is_fraction() {
            return Err(ProtocolError::InvalidBps {
                bps: grantor_bps.value(),
            });
        }

        let _guard = self.locks.acquire(RecordKey::Escrow(escrow_id)).await;
        let mut escrow = self.load_escrow(escrow_id).await?;
        if escrow.status != EscrowStatus::Disputed {
            return Err(ProtocolError::NotDisputed {
                record_id: escrow_id.to_string(),
            });
        }
        let permission = self.load_permission(escrow.permission_id).await?;
        let treasury = self.governance.treasury().await;

        let settlement = dispute_resolution(escrow.amount, grantor_bps, self.config.protocol_fee())?;
        self.pay_out(&mut escrow, &permission, &treasury, settlement)
            .await?;

        info!(
            escrow = %escrow_id,
            grantor_bps = grantor_bps.value(),
            grantor_share = %settlement.grantor_share,
            depositor_refund = %settlement.depositor_refund,
            "Dispute resolved"
        );
        Ok(Applied::single(
            settlement,
            ProtocolEvent::DisputeResolved {
                escrow_id,
                grantor_bps,
                settlement,
            },
        ))
    }

    /// Return the full escrowed amount to the depositor
    ///
    /// Disputed escrows are refunded by the owner. Unreported escrows may be
    /// refunded by anyone once their permission is revoked or expired and the
    /// grace period has elapsed; the funds only ever go to the depositor.
    pub async fn refund(&self, caller: &AccountId, escrow_id: EscrowId) -> Result<Applied<Amount>> {
        let _guard = self.locks.acquire(RecordKey::Escrow(escrow_id)).await;
        let now = self.clock.now();

        let mut escrow = self.load_escrow(escrow_id).await?;
        match escrow.status {
            EscrowStatus::Disputed => self.governance.require_owner(caller).await?,
            EscrowStatus::Funded => {
                let permission = self.load_permission(escrow.permission_id).await?;
                let refundable = permission
                    .refundable_from(now, self.config.revocation_grace())
                    .is_some_and(|from| now >= from);
                if !refundable {
                    return Err(ProtocolError::NotRefundable {
                        escrow_id: escrow_id.to_string(),
                    });
                }
            }
            _ => return Err(wrong_state(&escrow, "funded or disputed")),
        }

        let receipt = self
            .custody
            .execute(
                vec![self.custody.payout(&escrow.depositor, escrow.amount)],
                EntryReason::Refund {
                    record: escrow_id.to_string(),
                },
            )
            .await?;
        escrow.status = EscrowStatus::Refunded;
        let depositor = escrow.depositor.clone();
        let amount = escrow.amount;
        self.custody
            .persist_or_compensate(
                receipt.as_ref(),
                escrow_id.to_string(),
                self.escrows.put_escrow(escrow),
            )
            .await?;

        info!(escrow = %escrow_id, depositor = %depositor, "Escrow refunded: {}", amount);
        Ok(Applied::single(
            amount,
            ProtocolEvent::EscrowRefunded {
                escrow_id,
                depositor,
                amount,
            },
        ))
    }

    pub async fn get_escrow(&self, escrow_id: EscrowId) -> Result<Escrow> {
        self.load_escrow(escrow_id).await
    }

    /// Escrows funded against a permission, in deposit order
    pub async fn permission_escrows(&self, permission_id: PermissionId) -> Result<Vec<EscrowId>> {
        Ok(self.escrows.permission_escrows(permission_id).await?)
    }

    /// The split a settlement would produce right now, without moving funds
    pub async fn preview_settlement(&self, escrow_id: EscrowId) -> Result<EscrowSettlement> {
        let escrow = self.load_escrow(escrow_id).await?;
        if escrow.status.is_terminal() {
            return Err(wrong_state(&escrow, "a non-terminal status"));
        }
        let permission = self.load_permission(escrow.permission_id).await?;
        Ok(escrow_settlement(
            escrow.amount,
            permission.compensation_bps,
            self.config.protocol_fee(),
        )?)
    }

    async fn load_escrow(&self, escrow_id: EscrowId) -> Result<Escrow> {
        self.escrows
            .escrow(escrow_id)
            .await?
            .ok_or_else(|| ProtocolError::EscrowNotFound {
                escrow_id: escrow_id.to_string(),
            })
    }

    /// Move a computed split out of custody and mark the escrow settled
    async fn pay_out(
        &self,
        escrow: &mut Escrow,
        permission: &Permission,
        treasury: &AccountId,
        settlement: EscrowSettlement,
    ) -> Result<()> {
        let legs = vec![
            self.custody.payout(&permission.grantor, settlement.grantor_share),
            self.custody.payout(treasury, settlement.protocol_fee),
            self.custody.payout(&escrow.depositor, settlement.depositor_refund),
        ];
        let receipt = self
            .custody
            .execute(
                legs,
                EntryReason::Settlement {
                    record: escrow.id.to_string(),
                },
            )
            .await?;

        escrow.status = EscrowStatus::Settled;
        self.custody
            .persist_or_compensate(
                receipt.as_ref(),
                escrow.id.to_string(),
                self.escrows.put_escrow(escrow.clone()),
            )
            .await?;

        self.totals
            .lock()
            .await
            .record(escrow.amount, settlement.protocol_fee);
        Ok(())
    }
}
