//! Permission Ledger operations

use prmission_types::{
    AccessGrant, AccountId, Applied, ErrorKind, GrantRequest, Permission, PermissionId,
    PermissionStatus, ProtocolError, ProtocolEvent, Result,
};
use tracing::{debug, info};

use crate::locks::RecordKey;
use crate::protocol::Protocol;

impl Protocol {
    /// Record a grantor's consent
    pub async fn grant(
        &self,
        grantor: &AccountId,
        request: GrantRequest,
    ) -> Result<Applied<PermissionId>> {
        let now = self.clock.now();

        if self.governance.is_paused().await {
            return Err(ProtocolError::Paused);
        }
        if request.data_category.is_empty() {
            return Err(ProtocolError::EmptyCategory);
        }
        if request.compensation_bps > self.config.max_compensation() {
            return Err(ProtocolError::CompensationTooHigh {
                requested: request.compensation_bps.value(),
                max: self.config.max_compensation_bps,
            });
        }
        let valid_until = now
            .checked_add_signed(request.valid_for)
            .ok_or(ProtocolError::ArithmeticOverflow)?;

        let id = self.permissions.allocate_permission_id().await?;
        let permission = Permission {
            id,
            grantor: grantor.clone(),
            agent: request.agent,
            data_category: request.data_category,
            purpose: request.purpose,
            compensation_bps: request.compensation_bps,
            upfront_fee: request.upfront_fee,
            valid_until,
            status: PermissionStatus::Active,
            created_at: now,
            revoked_at: None,
        };
        self.permissions.put_permission(permission.clone()).await?;

        info!(
            permission = %id,
            grantor = %grantor,
            compensation_bps = permission.compensation_bps.value(),
            "Permission granted for {}",
            permission.data_category
        );
        Ok(Applied::single(
            id,
            ProtocolEvent::PermissionGranted {
                permission_id: id,
                grantor: permission.grantor,
                agent: permission.agent,
                data_category: permission.data_category,
                purpose: permission.purpose,
                compensation_bps: permission.compensation_bps,
                upfront_fee: permission.upfront_fee,
                valid_until,
            },
        ))
    }

    /// Withdraw consent
    ///
    /// A permission already past its validity is recorded as Expired rather
    /// than Revoked. The returned status is the one recorded.
    pub async fn revoke(
        &self,
        caller: &AccountId,
        permission_id: PermissionId,
    ) -> Result<Applied<PermissionStatus>> {
        let _guard = self.locks.acquire(RecordKey::Permission(permission_id)).await;
        let now = self.clock.now();

        let mut permission = self.load_permission(permission_id).await?;
        if &permission.grantor != caller {
            debug!(permission = %permission_id, caller = %caller, "Revoke rejected");
            return Err(ProtocolError::NotYourPermission {
                permission_id: permission_id.to_string(),
            });
        }
        if permission.status != PermissionStatus::Active {
            return Err(ProtocolError::PermissionNotActive {
                permission_id: permission_id.to_string(),
            });
        }

        let event = if permission.is_expired_at(now) {
            permission.status = PermissionStatus::Expired;
            ProtocolEvent::PermissionExpired {
                permission_id,
                timestamp: now,
            }
        } else {
            permission.status = PermissionStatus::Revoked;
            permission.revoked_at = Some(now);
            ProtocolEvent::PermissionRevoked {
                permission_id,
                grantor: caller.clone(),
                timestamp: now,
            }
        };
        let status = permission.status;
        self.permissions.put_permission(permission).await?;

        info!("Permission {} {}", permission_id, status);
        Ok(Applied::single(status, event))
    }

    /// Read-only access projection for a prospective agent
    pub async fn check_access(
        &self,
        permission_id: PermissionId,
        caller: &AccountId,
    ) -> Result<AccessGrant> {
        let now = self.clock.now();
        let permission = self.load_permission(permission_id).await?;
        Ok(permission.access_for(caller, now))
    }

    /// Fetch a permission with expiry applied to its status
    pub async fn get_permission(&self, permission_id: PermissionId) -> Result<Permission> {
        let now = self.clock.now();
        let mut permission = self.load_permission(permission_id).await?;
        permission.status = permission.effective_status(now);
        Ok(permission)
    }

    /// A page of the grantor's permissions in grant order
    pub async fn grantor_permissions(
        &self,
        grantor: &AccountId,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<Permission>> {
        let now = self.clock.now();
        let mut page = self
            .permissions
            .grantor_permissions(grantor, offset, limit)
            .await?;
        for permission in &mut page {
            permission.status = permission.effective_status(now);
        }
        Ok(page)
    }

    pub async fn grantor_permission_count(&self, grantor: &AccountId) -> Result<usize> {
        Ok(self.permissions.grantor_permission_count(grantor).await?)
    }

    /// Record the expiry of an active permission past its validity
    pub async fn expire_permission(&self, permission_id: PermissionId) -> Result<Applied<()>> {
        let _guard = self.locks.acquire(RecordKey::Permission(permission_id)).await;
        let now = self.clock.now();

        let mut permission = self.load_permission(permission_id).await?;
        if permission.status != PermissionStatus::Active {
            return Err(ProtocolError::PermissionNotActive {
                permission_id: permission_id.to_string(),
            });
        }
        if !permission.is_expired_at(now) {
            return Err(ProtocolError::NotExpired {
                permission_id: permission_id.to_string(),
            });
        }

        permission.status = PermissionStatus::Expired;
        self.permissions.put_permission(permission).await?;

        info!("Permission {} expired", permission_id);
        Ok(Applied::single(
            (),
            ProtocolEvent::PermissionExpired {
                permission_id,
                timestamp: now,
            },
        ))
    }

    /// Expire every eligible permission in `ids`, skipping the rest
    pub async fn sweep_expired(&self, ids: &[PermissionId]) -> Result<Applied<Vec<PermissionId>>> {
        let mut expired = Vec::new();
        let mut events = Vec::new();
        for &id in ids {
            match self.expire_permission(id).await {
                Ok(applied) => {
                    expired.push(id);
                    events.extend(applied.events);
                }
                Err(e) if e.kind() == ErrorKind::Infrastructure => return Err(e),
                Err(e) => debug!(permission = %id, error = %e, "Sweep skipped permission"),
            }
        }
        Ok(Applied::new(expired, events))
    }

    pub(crate) async fn load_permission(&self, permission_id: PermissionId) -> Result<Permission> {
        self.permissions
            .permission(permission_id)
            .await?
            .ok_or_else(|| ProtocolError::PermissionNotFound {
                permission_id: permission_id.to_string(),
            })
    }
}
