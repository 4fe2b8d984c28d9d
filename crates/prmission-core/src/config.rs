//! Protocol configuration

use chrono::Duration;
use prmission_types::{Bps, ProtocolError, Result, BPS_DENOMINATOR};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Hard ceiling on a permission's compensation rate
pub const MAX_COMPENSATION_BPS: u16 = 5000;

/// Protocol constants, fixed for the lifetime of an engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolConfig {
    /// Fee taken by the treasury on every settlement
    pub protocol_fee_bps: u16,
    /// Upper bound on a permission's compensation rate
    pub max_compensation_bps: u16,
    /// Time after an outcome report during which either party may dispute
    pub dispute_window_secs: u64,
    /// Time after revocation or expiry before unreported escrows can be refunded
    pub revocation_grace_secs: u64,
    pub max_trusted_reviewers: usize,
    /// Declared precision of the payment asset
    pub token_decimals: u32,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            protocol_fee_bps: 300,
            max_compensation_bps: MAX_COMPENSATION_BPS,
            dispute_window_secs: 86_400, // 24 hours
            revocation_grace_secs: 60,
            max_trusted_reviewers: 50,
            token_decimals: 6,
        }
    }
}

impl ProtocolConfig {
    /// Load from environment variables (and `.env` if present) over the defaults
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv();

        let defaults = Self::default();
        let config = Self {
            protocol_fee_bps: env_override("PRMISSION_PROTOCOL_FEE_BPS", defaults.protocol_fee_bps)?,
            max_compensation_bps: env_override(
                "PRMISSION_MAX_COMPENSATION_BPS",
                defaults.max_compensation_bps,
            )?,
            dispute_window_secs: env_override(
                "PRMISSION_DISPUTE_WINDOW_SECS",
                defaults.dispute_window_secs,
            )?,
            revocation_grace_secs: env_override(
                "PRMISSION_REVOCATION_GRACE_SECS",
                defaults.revocation_grace_secs,
            )?,
            max_trusted_reviewers: env_override(
                "PRMISSION_MAX_TRUSTED_REVIEWERS",
                defaults.max_trusted_reviewers,
            )?,
            token_decimals: env_override("PRMISSION_TOKEN_DECIMALS", defaults.token_decimals)?,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.protocol_fee_bps > BPS_DENOMINATOR {
            return Err(invalid(format!(
                "protocol fee {} bps exceeds 10000",
                self.protocol_fee_bps
            )));
        }
        if self.max_compensation_bps > MAX_COMPENSATION_BPS {
            return Err(invalid(format!(
                "max compensation {} bps exceeds {}",
                self.max_compensation_bps, MAX_COMPENSATION_BPS
            )));
        }
        if self.max_compensation_bps as u32 + self.protocol_fee_bps as u32 > BPS_DENOMINATOR as u32 {
            return Err(invalid(format!(
                "max compensation {} bps plus protocol fee {} bps exceeds 10000",
                self.max_compensation_bps, self.protocol_fee_bps
            )));
        }
        if self.dispute_window_secs == 0 {
            return Err(invalid("dispute window must be non-zero".to_string()));
        }
        if i64::try_from(self.dispute_window_secs).is_err()
            || i64::try_from(self.revocation_grace_secs).is_err()
        {
            return Err(invalid("durations out of range".to_string()));
        }
        if self.token_decimals > 18 {
            return Err(invalid(format!(
                "token decimals {} exceeds 18",
                self.token_decimals
            )));
        }
        Ok(())
    }

    pub fn protocol_fee(&self) -> Bps {
        Bps(self.protocol_fee_bps)
    }

    pub fn max_compensation(&self) -> Bps {
        Bps(self.max_compensation_bps)
    }

    pub fn dispute_window(&self) -> Duration {
        Duration::seconds(self.dispute_window_secs as i64)
    }

    pub fn revocation_grace(&self) -> Duration {
        Duration::seconds(self.revocation_grace_secs as i64)
    }
}

fn invalid(message: String) -> ProtocolError {
    ProtocolError::InvalidConfig { message }
}

fn env_override<T: FromStr>(key: &str, default: T) -> Result<T> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| invalid(format!("{} has invalid value {:?}", key, raw))),
        Err(_) => Ok(default),
    }
}
