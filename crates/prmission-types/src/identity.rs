//! Identity types for Prmission
//!
//! Principals (grantors, agents, brands, creators, treasury) are UUID-backed
//! account handles. Records are keyed by monotonically assigned integers that
//! are never reused.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Macro to generate UUID-backed principal types
macro_rules! define_principal_type {
    ($name:ident, $prefix:literal, $doc:literal) => {
        #[doc = $doc]
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Create a new random ID
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Create from an existing UUID
            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Parse from a string (with or without prefix)
            pub fn parse(s: &str) -> Result<Self, uuid::Error> {
                let s = s.strip_prefix(concat!($prefix, "_")).unwrap_or(s);
                Ok(Self(Uuid::parse_str(s)?))
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}_{}", $prefix, self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }
    };
}

/// Macro to generate sequential record ID types
macro_rules! define_record_id {
    ($name:ident, $prefix:literal, $doc:literal) => {
        #[doc = $doc]
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        pub struct $name(pub u64);

        impl $name {
            /// The first ID ever assigned
            pub const FIRST: Self = Self(1);

            pub fn value(&self) -> u64 {
                self.0
            }

            /// The ID assigned after this one
            pub fn next(&self) -> Self {
                Self(self.0 + 1)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}_{}", $prefix, self.0)
            }
        }

        impl From<u64> for $name {
            fn from(value: u64) -> Self {
                Self(value)
            }
        }
    };
}

define_principal_type!(AccountId, "acct", "A principal able to hold funds and call the protocol");

define_record_id!(PermissionId, "perm", "Identifier of a consent record");
define_record_id!(EscrowId, "escrow", "Identifier of a funded engagement against a permission");
define_record_id!(CampaignId, "campaign", "Identifier of a brand/creator campaign");
define_record_id!(AgentIdentityId, "agent", "Handle of an agent in the external identity registry");

/// Identifier of a fungible asset held on the ledger
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AssetId(pub String);

impl AssetId {
    pub fn new(symbol: impl Into<String>) -> Self {
        Self(symbol.into())
    }

    /// The reference payment asset (6 decimals)
    pub fn usdc() -> Self {
        Self("USDC".to_string())
    }
}

impl fmt::Display for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which agents a permission authorizes
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AgentScope {
    /// Any caller may act under the permission
    Any,
    /// Only this account may act under the permission
    Only(AccountId),
}

impl AgentScope {
    pub fn admits(&self, caller: &AccountId) -> bool {
        match self {
            Self::Any => true,
            Self::Only(agent) => agent == caller,
        }
    }
}

impl fmt::Display for AgentScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => write!(f, "any"),
            Self::Only(agent) => write!(f, "{}", agent),
        }
    }
}
