//! Prmission Core - Protocol engines for consent-gated escrow
//!
//! Two engines share one shape: an owner-controlled [`Governance`], a custody
//! account on a [`prmission_ledger::TokenLedger`], a record store, and a
//! [`Clock`].
//!
//! - [`Protocol`]: the Permission Ledger and the Escrow Ledger. A grantor
//!   records consent; a merchant agent escrows a budget under it, reports an
//!   outcome, and after the dispute window the escrow is split between the
//!   grantor, the treasury and the depositor.
//! - [`CampaignEngine`]: brand/creator campaigns with a five-way split at
//!   rates fixed on creation.
//!
//! Every operation validates fully before it mutates anything, and returns
//! its [`prmission_types::ProtocolEvent`]s alongside its result.
//!
//! # Example
//!
//! ```ignore
//! let ledger = Arc::new(InMemoryLedger::new());
//! let protocol = Protocol::builder(owner, treasury, vault, ledger).build()?;
//! let grant = protocol.grant(&grantor, GrantRequest::open("purchase_history", "offers", Bps(200), Duration::days(30))).await?;
//! ```

pub mod admin;
pub mod campaign;
pub mod clock;
pub mod config;
pub mod locks;
pub mod protocol;
pub mod store;

mod custody;
mod escrow;
mod permissions;

pub use admin::Governance;
pub use campaign::{CampaignEngine, CampaignEngineBuilder, CampaignStats};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::ProtocolConfig;
pub use locks::{RecordKey, RecordLocks};
pub use protocol::{Protocol, ProtocolBuilder, ProtocolStats};
pub use store::{CampaignStore, EscrowStore, MemoryStore, PermissionStore, StoreError, StoreResult};
