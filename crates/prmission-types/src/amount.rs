//! Fixed-point amounts and basis points
//!
//! Amounts are raw integer units of the payment asset (6 decimals in the
//! reference deployment). Nothing in the protocol touches floating point:
//! every share is computed with integer multiply-then-floor-divide so results
//! match bit for bit across implementations.

use crate::{ProtocolError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Decimal places of the reference payment asset
pub const TOKEN_DECIMALS: u32 = 6;

/// One basis point is 1/10000
pub const BPS_DENOMINATOR: u16 = 10_000;

/// An amount of the payment asset in its smallest unit
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct Amount(pub u128);

impl Amount {
    pub const ZERO: Self = Self(0);

    /// Create from raw units
    pub fn new(raw: u128) -> Self {
        Self(raw)
    }

    pub fn zero() -> Self {
        Self(0)
    }

    /// Create from whole tokens (e.g. `Amount::whole(50)` is 50.000000)
    pub fn whole(tokens: u64) -> Self {
        Self(tokens as u128 * 10u128.pow(TOKEN_DECIMALS))
    }

    pub fn raw(&self) -> u128 {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    pub fn checked_add(self, other: Self) -> Option<Self> {
        self.0.checked_add(other.0).map(Self)
    }

    pub fn checked_sub(self, other: Self) -> Option<Self> {
        self.0.checked_sub(other.0).map(Self)
    }

    /// `floor(self * bps / 10000)`
    pub fn mul_bps(self, bps: Bps) -> Result<Self> {
        let scaled = self
            .0
            .checked_mul(bps.0 as u128)
            .ok_or(ProtocolError::ArithmeticOverflow)?;
        Ok(Self(scaled / BPS_DENOMINATOR as u128))
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let unit = 10u128.pow(TOKEN_DECIMALS);
        write!(
            f,
            "{}.{:0width$}",
            self.0 / unit,
            self.0 % unit,
            width = TOKEN_DECIMALS as usize
        )
    }
}

impl FromStr for Amount {
    type Err = ProtocolError;

    /// Parse a decimal string such as `"47.5"` into raw units
    fn from_str(s: &str) -> Result<Self> {
        let invalid = || ProtocolError::InvalidAmount {
            input: s.to_string(),
        };
        let (int_part, frac_part) = match s.split_once('.') {
            Some((i, f)) => (i, f),
            None => (s, ""),
        };
        if int_part.is_empty() && frac_part.is_empty() {
            return Err(invalid());
        }
        if frac_part.len() > TOKEN_DECIMALS as usize {
            return Err(invalid());
        }
        if !int_part.chars().chain(frac_part.chars()).all(|c| c.is_ascii_digit()) {
            return Err(invalid());
        }

        let whole: u128 = if int_part.is_empty() {
            0
        } else {
            int_part.parse().map_err(|_| invalid())?
        };
        let mut frac: u128 = if frac_part.is_empty() {
            0
        } else {
            frac_part.parse().map_err(|_| invalid())?
        };
        for _ in frac_part.len()..TOKEN_DECIMALS as usize {
            frac *= 10;
        }

        whole
            .checked_mul(10u128.pow(TOKEN_DECIMALS))
            .and_then(|w| w.checked_add(frac))
            .map(Self)
            .ok_or(ProtocolError::ArithmeticOverflow)
    }
}

/// Basis points (1/10000). Not range-checked on construction: callers
/// validate against the bound that applies to them.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct Bps(pub u16);

impl Bps {
    pub const ZERO: Self = Self(0);
    pub const FULL: Self = Self(BPS_DENOMINATOR);

    pub fn new(value: u16) -> Self {
        Self(value)
    }

    pub fn value(&self) -> u16 {
        self.0
    }

    /// Whether this is a valid fraction of a whole (≤ 10000)
    pub fn is_fraction(&self) -> bool {
        self.0 <= BPS_DENOMINATOR
    }

    /// `10000 - self`, saturating at zero
    pub fn complement(&self) -> Self {
        Self(BPS_DENOMINATOR.saturating_sub(self.0))
    }
}

impl fmt::Display for Bps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}bps", self.0)
    }
}
