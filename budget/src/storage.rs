//! Sled-based persistence for governance state
//!
//! Three upsert tables keyed by content hash: proposals, votes (composite
//! masternode × proposal key) and finalizations. Writes flush to disk so
//! state survives restart; reorg rollback deletes the affected rows.

use log::info;
use std::path::Path;

use crate::error::{BudgetError, Result};
use crate::finalization::BudgetFinalization;
use crate::manager::{BudgetManager, ReorgRollback};
use crate::proposal::BudgetProposal;
use crate::vote::BudgetVote;

const TREE_PROPOSALS: &str = "proposals";
const TREE_VOTES: &str = "votes";
const TREE_FINALIZATIONS: &str = "finalizations";

pub struct BudgetDb {
    db: sled::Db,
    proposals: sled::Tree,
    votes: sled::Tree,
    finalizations: sled::Tree,
}

fn storage_err(e: sled::Error) -> BudgetError {
    BudgetError::Storage(e.to_string())
}

fn codec_err(e: bincode::Error) -> BudgetError {
    BudgetError::Serialization(e.to_string())
}

fn vote_key(proposal_hash: &str, masternode_id: &str) -> String {
    format!("{}:{}", proposal_hash, masternode_id)
}

impl BudgetDb {
    /// Open or create the database
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let db = sled::open(path).map_err(storage_err)?;
        let proposals = db.open_tree(TREE_PROPOSALS).map_err(storage_err)?;
        let votes = db.open_tree(TREE_VOTES).map_err(storage_err)?;
        let finalizations = db.open_tree(TREE_FINALIZATIONS).map_err(storage_err)?;
        Ok(BudgetDb {
            db,
            proposals,
            votes,
            finalizations,
        })
    }

    pub fn save_proposal(&self, proposal: &BudgetProposal) -> Result<()> {
        let value = bincode::serialize(proposal).map_err(codec_err)?;
        self.proposals
            .insert(proposal.hash().as_bytes(), value)
            .map_err(storage_err)?;
        self.db.flush().map_err(storage_err)?;
        Ok(())
    }

    pub fn delete_proposal(&self, hash: &str) -> Result<()> {
        self.proposals.remove(hash.as_bytes()).map_err(storage_err)?;
        // Dependent votes go with the proposal.
        let doomed: Vec<sled::IVec> = self
            .votes
            .scan_prefix(format!("{}:", hash).as_bytes())
            .keys()
            .collect::<std::result::Result<_, _>>()
            .map_err(storage_err)?;
        for key in doomed {
            self.votes.remove(key).map_err(storage_err)?;
        }
        self.db.flush().map_err(storage_err)?;
        Ok(())
    }

    pub fn save_vote(&self, vote: &BudgetVote) -> Result<()> {
        let value = bincode::serialize(vote).map_err(codec_err)?;
        self.votes
            .insert(
                vote_key(&vote.proposal_hash, &vote.masternode_id).as_bytes(),
                value,
            )
            .map_err(storage_err)?;
        self.db.flush().map_err(storage_err)?;
        Ok(())
    }

    pub fn save_finalization(&self, finalization: &BudgetFinalization) -> Result<()> {
        let value = bincode::serialize(finalization).map_err(codec_err)?;
        self.finalizations
            .insert(finalization.hash.as_bytes(), value)
            .map_err(storage_err)?;
        self.db.flush().map_err(storage_err)?;
        Ok(())
    }

    pub fn delete_finalization(&self, hash: &str) -> Result<()> {
        self.finalizations.remove(hash.as_bytes()).map_err(storage_err)?;
        self.db.flush().map_err(storage_err)?;
        Ok(())
    }

    /// Delete the rows a reorg rollback removed from memory, so an orphaned
    /// proposal cannot come back from disk after a restart
    pub fn apply_rollback(&self, rollback: &ReorgRollback) -> Result<()> {
        for hash in &rollback.proposals {
            self.delete_proposal(hash)?;
        }
        for hash in &rollback.finalizations {
            self.delete_finalization(hash)?;
        }
        Ok(())
    }

    /// Write a manager's entire governance state
    pub fn save_state(&self, manager: &BudgetManager) -> Result<()> {
        for (_, proposal) in manager.store().all() {
            self.save_proposal(proposal)?;
        }
        for vote in manager.ledger().all() {
            self.save_vote(vote)?;
        }
        for finalization in manager.finalizations().all() {
            self.save_finalization(finalization)?;
        }
        Ok(())
    }

    /// Rebuild a manager's state from disk
    pub fn load_into(&self, manager: &mut BudgetManager) -> Result<()> {
        let mut proposals = 0usize;
        for entry in self.proposals.iter() {
            let (_, value) = entry.map_err(storage_err)?;
            let proposal: BudgetProposal = bincode::deserialize(&value).map_err(codec_err)?;
            let (_, store, _, _) = manager.parts_mut();
            store.restore(proposal);
            proposals += 1;
        }

        let mut votes = 0usize;
        for entry in self.votes.iter() {
            let (_, value) = entry.map_err(storage_err)?;
            let vote: BudgetVote = bincode::deserialize(&value).map_err(codec_err)?;
            let (_, _, ledger, _) = manager.parts_mut();
            ledger.restore(vote);
            votes += 1;
        }

        let mut finals = 0usize;
        for entry in self.finalizations.iter() {
            let (_, value) = entry.map_err(storage_err)?;
            let finalization: BudgetFinalization =
                bincode::deserialize(&value).map_err(codec_err)?;
            let (_, _, _, finalizations) = manager.parts_mut();
            finalizations.restore(finalization);
            finals += 1;
        }

        info!(
            "loaded governance state: {} proposals, {} votes, {} finalizations",
            proposals, votes, finals
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::finalization::FinalizationStatus;
    use crate::vote::{VoteLedger, VoteValue};
    use tessera_core::constants::{FEE_COLLECTION_ADDRESS, PROPOSAL_FEE};
    use tessera_core::{BudgetParams, MemoryChain};
    use tessera_crypto::KeyPair;
    use tessera_masternode::MasternodeRegistry;

    fn populated_manager() -> (BudgetManager, String, String) {
        let params = BudgetParams::regtest();
        let mut chain = MemoryChain::new();
        chain.set_height(100);
        chain.confirm_fee_tx("fee-a", PROPOSAL_FEE, FEE_COLLECTION_ADDRESS);
        chain.advance(3);

        let keypair = KeyPair::generate();
        let mut registry = MasternodeRegistry::new();
        registry
            .register("mn1".to_string(), "alias1".to_string(), keypair.public_key_hex(), 100)
            .unwrap();
        registry.activate("mn1").unwrap();

        let mut manager = BudgetManager::new(params);
        let hash = manager
            .submit_proposal(&chain, "a", "https://e.org", 2, 145, "addr-a", 300, "fee-a")
            .unwrap();
        manager.on_new_block(110);
        let vote = BudgetVote::signed(&keypair, "mn1", &hash, VoteValue::Yes, 1000);
        manager.cast_vote(&registry, vote).unwrap();

        chain.set_height(120);
        let fin_hash = manager.suggest_finalization(&chain);
        manager.vote_finalization(&registry, "mn1", &fin_hash, 120).unwrap();

        (manager, hash, fin_hash)
    }

    #[test]
    fn test_state_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let (manager, hash, fin_hash) = populated_manager();

        {
            let db = BudgetDb::open(dir.path()).unwrap();
            db.save_state(&manager).unwrap();
        }

        let db = BudgetDb::open(dir.path()).unwrap();
        let mut restored = BudgetManager::new(BudgetParams::regtest());
        db.load_into(&mut restored).unwrap();

        assert_eq!(restored.store().len(), 1);
        assert!(restored.store().get(&hash).unwrap().established);
        assert_eq!(restored.ledger().tally(&hash).yes, 1);
        assert_eq!(
            restored.finalizations().status(&fin_hash),
            Some((1, FinalizationStatus::Ok))
        );
        // The restored replica projects the same list.
        assert_eq!(restored.projection(120), manager.projection(120));
    }

    #[test]
    fn test_reorg_rollback_does_not_resurrect_on_restart() {
        let dir = tempfile::tempdir().unwrap();
        let (mut manager, hash, fin_hash) = populated_manager();

        let db = BudgetDb::open(dir.path()).unwrap();
        db.save_state(&manager).unwrap();

        // The fee transaction is orphaned; the rollback names every row
        // that has to leave the database too.
        let rollback = manager.on_chain_reorg(&["fee-a".to_string()]);
        assert_eq!(rollback.proposals, vec![hash.clone()]);
        assert_eq!(rollback.finalizations, vec![fin_hash.clone()]);
        db.apply_rollback(&rollback).unwrap();

        let mut restored = BudgetManager::new(BudgetParams::regtest());
        db.load_into(&mut restored).unwrap();
        assert!(restored.store().is_empty());
        assert!(restored.ledger().votes_for(&hash).is_empty());
        assert!(restored.finalizations().get(&fin_hash).is_none());
        assert!(restored.projection(120).is_empty());
    }

    #[test]
    fn test_delete_proposal_removes_votes() {
        let dir = tempfile::tempdir().unwrap();
        let (manager, hash, _) = populated_manager();

        let db = BudgetDb::open(dir.path()).unwrap();
        db.save_state(&manager).unwrap();
        db.delete_proposal(&hash).unwrap();

        let mut restored = BudgetManager::new(BudgetParams::regtest());
        db.load_into(&mut restored).unwrap();
        assert!(restored.store().is_empty());
        let ledger: &VoteLedger = restored.ledger();
        assert!(ledger.votes_for(&hash).is_empty());
    }
}
