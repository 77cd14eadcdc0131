//! Masternode registry for tracking all masternodes

use crate::types::*;
use log::debug;
use std::collections::HashMap;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Masternode not found: {0}")]
    NotFound(String),

    #[error("Masternode already registered: {0}")]
    AlreadyRegistered(String),
}

pub struct MasternodeRegistry {
    masternodes: HashMap<MasternodeId, Masternode>,
    by_alias: HashMap<String, MasternodeId>,
}

impl MasternodeRegistry {
    pub fn new() -> Self {
        MasternodeRegistry {
            masternodes: HashMap::new(),
            by_alias: HashMap::new(),
        }
    }

    pub fn register(
        &mut self,
        id: MasternodeId,
        alias: String,
        public_key: String,
        height: u64,
    ) -> Result<(), RegistryError> {
        if self.masternodes.contains_key(&id) {
            return Err(RegistryError::AlreadyRegistered(id));
        }

        debug!("registering masternode {} ({})", alias, id);
        let masternode = Masternode::new(id.clone(), alias.clone(), public_key, height);
        self.masternodes.insert(id.clone(), masternode);
        self.by_alias.insert(alias, id);

        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&Masternode> {
        self.masternodes.get(id)
    }

    pub fn get_by_alias(&self, alias: &str) -> Option<&Masternode> {
        self.by_alias.get(alias).and_then(|id| self.masternodes.get(id))
    }

    /// Public key a masternode's votes must verify against
    pub fn voting_key(&self, id: &str) -> Option<&str> {
        self.masternodes.get(id).map(|mn| mn.public_key.as_str())
    }

    pub fn activate(&mut self, id: &str) -> Result<(), RegistryError> {
        let masternode = self
            .masternodes
            .get_mut(id)
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;
        masternode.activate();
        Ok(())
    }

    pub fn deactivate(&mut self, id: &str) -> Result<(), RegistryError> {
        let masternode = self
            .masternodes
            .get_mut(id)
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;
        masternode.deactivate();
        Ok(())
    }

    pub fn is_active(&self, id: &str) -> bool {
        self.masternodes.get(id).map(|mn| mn.is_active()).unwrap_or(false)
    }

    pub fn get_active_masternodes(&self) -> Vec<&Masternode> {
        self.masternodes.values().filter(|mn| mn.is_active()).collect()
    }

    pub fn count(&self) -> usize {
        self.masternodes.len()
    }

    pub fn active_count(&self) -> usize {
        self.get_active_masternodes().len()
    }
}

impl Default for MasternodeRegistry {
    fn default() -> Self {
        Self::new()
    }
}
