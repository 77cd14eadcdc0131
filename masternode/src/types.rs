//! Masternode type definitions

use serde::{Deserialize, Serialize};

pub type MasternodeId = String;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum MasternodeStatus {
    Registered,
    Active,
    Inactive,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Masternode {
    /// Collateral outpoint string; stable across restarts
    pub id: MasternodeId,
    pub alias: String,
    /// Hex-encoded ed25519 public key votes are verified against
    pub public_key: String,
    pub status: MasternodeStatus,
    /// Height the masternode was registered at
    pub registered_height: u64,
}

impl Masternode {
    pub fn new(id: MasternodeId, alias: String, public_key: String, registered_height: u64) -> Self {
        Masternode {
            id,
            alias,
            public_key,
            status: MasternodeStatus::Registered,
            registered_height,
        }
    }

    pub fn activate(&mut self) {
        self.status = MasternodeStatus::Active;
    }

    pub fn deactivate(&mut self) {
        self.status = MasternodeStatus::Inactive;
    }

    pub fn is_active(&self) -> bool {
        self.status == MasternodeStatus::Active
    }
}
