//! Tessera Masternode Registry
//!
//! Tracks the registered voting participants. Governance treats this crate
//! as read-only: a masternode is either active and eligible to vote, or it
//! is not, and every active masternode carries exactly one vote.

pub mod registry;
pub mod types;

pub use registry::MasternodeRegistry;
pub use types::{Masternode, MasternodeId, MasternodeStatus};
