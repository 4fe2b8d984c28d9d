//! Prmission Types - Canonical domain types for the escrow-and-settlement protocol
//!
//! This crate contains all foundational types for Prmission with zero
//! dependencies on other prmission crates:
//!
//! - Principal and record identifiers
//! - Fixed-point amounts and basis points
//! - Permission, Escrow, Campaign and creator profile records
//! - Domain events and the typed error taxonomy
//!
//! # Invariants
//!
//! 1. Amounts are integers; shares are `floor(amount * bps / 10000)`
//! 2. Payouts are sized from the escrowed amount, never the reported outcome
//! 3. Records are never deleted, only status-transitioned

pub mod identity;
pub mod amount;
pub mod permission;
pub mod escrow;
pub mod campaign;
pub mod creator;
pub mod events;
pub mod error;

pub use identity::*;
pub use amount::*;
pub use permission::*;
pub use escrow::*;
pub use campaign::*;
pub use creator::*;
pub use events::*;
pub use error::*;
