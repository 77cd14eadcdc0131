//! Budget finalization
//!
//! A finalization is the concrete ordered payment list for one superblock,
//! identified by the hash of that list. A node only ever votes for the hash
//! it can recompute from its own projection, so a divergent payment set can
//! collect votes but never cross quorum on honest nodes.

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use tessera_core::constants::MAX_FINALIZATION_PAYMENTS;
use tessera_core::BudgetParams;
use tessera_crypto::sha256_hex;
use tessera_masternode::{MasternodeId, MasternodeRegistry};

use crate::error::{BudgetError, Result};
use crate::projection::paid_set;
use crate::proposal::{ProposalHash, ProposalStore};
use crate::vote::VoteLedger;

pub type FinalizationHash = String;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum FinalizationStatus {
    /// Suggested, no votes yet
    Pending,
    /// Collecting votes
    Tallying,
    /// Reached quorum before the deadline; authoritative for its superblock
    Ok,
    /// Deadline passed without quorum; abandoned, never retried
    Expired,
}

impl FinalizationStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, FinalizationStatus::Ok | FinalizationStatus::Expired)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FinalizationStatus::Pending => "Pending",
            FinalizationStatus::Tallying => "Tallying",
            FinalizationStatus::Ok => "OK",
            FinalizationStatus::Expired => "Expired",
        }
    }
}

/// A suggested payment list for the superblock at `block_start`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetFinalization {
    pub hash: FinalizationHash,
    pub block_start: u64,
    /// Ordered as the projection ranked them; order is part of the hash
    pub proposal_hashes: Vec<ProposalHash>,
    /// Masternodes that voted for this hash, with the height they voted at
    pub voters: BTreeMap<MasternodeId, u64>,
    pub status: FinalizationStatus,
}

impl BudgetFinalization {
    pub fn new(block_start: u64, proposal_hashes: Vec<ProposalHash>) -> Self {
        let hash = finalization_hash(block_start, &proposal_hashes);
        BudgetFinalization {
            hash,
            block_start,
            proposal_hashes,
            voters: BTreeMap::new(),
            status: FinalizationStatus::Pending,
        }
    }

    pub fn vote_count(&self) -> usize {
        self.voters.len()
    }
}

/// Content hash over the target height and the ordered proposal list
pub fn finalization_hash(block_start: u64, proposal_hashes: &[ProposalHash]) -> FinalizationHash {
    let preimage = format!("{}|{}", block_start, proposal_hashes.join("|"));
    sha256_hex(preimage.as_bytes())
}

/// Strict majority of the currently active masternodes
pub fn required_votes(active_count: usize) -> usize {
    active_count / 2 + 1
}

/// Tracks every suggested finalization and its votes
#[derive(Debug, Default)]
pub struct BudgetFinalizationManager {
    finalizations: HashMap<FinalizationHash, BudgetFinalization>,
    /// Last finalization each masternode voted for (last-write-wins)
    voter_choice: HashMap<MasternodeId, FinalizationHash>,
    /// First finalization to reach quorum per superblock height
    authoritative: HashMap<u64, FinalizationHash>,
}

impl BudgetFinalizationManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hash this node would accept for the next superblock
    pub fn local_hash(
        store: &ProposalStore,
        ledger: &VoteLedger,
        params: &BudgetParams,
        current_height: u64,
    ) -> FinalizationHash {
        let target = params.next_superblock(current_height);
        finalization_hash(target, &paid_set(store, ledger, params, current_height))
    }

    /// Compute the local projection's paid list, store it as a `Pending`
    /// finalization and return its hash. Idempotent: suggesting the same
    /// list twice returns the same hash without resetting votes.
    pub fn suggest(
        &mut self,
        store: &ProposalStore,
        ledger: &VoteLedger,
        params: &BudgetParams,
        current_height: u64,
    ) -> FinalizationHash {
        let target = params.next_superblock(current_height);
        let list = paid_set(store, ledger, params, current_height);
        let finalization = BudgetFinalization::new(target, list);
        let hash = finalization.hash.clone();

        if !self.finalizations.contains_key(&hash) {
            info!(
                "suggested finalization {} for superblock {} ({} payments)",
                hash,
                target,
                finalization.proposal_hashes.len()
            );
            self.finalizations.insert(hash.clone(), finalization);
        }
        hash
    }

    /// Merge a finalization object received from a peer.
    ///
    /// The hash is recomputed from the carried list; a mislabeled object is
    /// rejected outright. The target must be an actual superblock height and
    /// the payment list is bounded, so a peer cannot grow this map with junk.
    /// Votes are never trusted from the object itself, they arrive
    /// individually through the vote path.
    pub fn insert_remote(
        &mut self,
        params: &BudgetParams,
        block_start: u64,
        proposal_hashes: Vec<ProposalHash>,
    ) -> Result<bool> {
        if !params.is_superblock(block_start) {
            return Err(BudgetError::MalformedFinalization(format!(
                "block start {} is not a superblock height",
                block_start
            )));
        }
        if proposal_hashes.len() > MAX_FINALIZATION_PAYMENTS {
            return Err(BudgetError::MalformedFinalization(format!(
                "payment list exceeds {} entries",
                MAX_FINALIZATION_PAYMENTS
            )));
        }
        let finalization = BudgetFinalization::new(block_start, proposal_hashes);
        if self.finalizations.contains_key(&finalization.hash) {
            return Ok(false);
        }
        debug!("merged remote finalization {}", finalization.hash);
        self.finalizations.insert(finalization.hash.clone(), finalization);
        Ok(true)
    }

    /// Record a masternode's vote for a finalization hash.
    ///
    /// The vote only counts if the hash matches what this node recomputes
    /// from its local projection; a mismatch is reported, not stored. A
    /// later vote from the same masternode for a different hash retracts
    /// the earlier one.
    pub fn record_vote(
        &mut self,
        store: &ProposalStore,
        ledger: &VoteLedger,
        registry: &MasternodeRegistry,
        params: &BudgetParams,
        masternode_id: &str,
        finalization_hash: &str,
        current_height: u64,
    ) -> Result<()> {
        if !registry.is_active(masternode_id) {
            return Err(BudgetError::UnauthorizedVoter(masternode_id.to_string()));
        }

        let local = Self::local_hash(store, ledger, params, current_height);
        if finalization_hash != local {
            warn!(
                "finalization vote from {} for {} differs from local {}",
                masternode_id, finalization_hash, local
            );
            return Err(BudgetError::FinalizationMismatch {
                suggested: finalization_hash.to_string(),
                local,
            });
        }

        // The local node can always reconstruct the matching object.
        if !self.finalizations.contains_key(finalization_hash) {
            self.suggest(store, ledger, params, current_height);
        }

        let target = params.next_superblock(current_height);
        let required = required_votes(registry.active_count());

        // Deadline: quorum must be reached while more than the window
        // remains before the superblock.
        let entry = self
            .finalizations
            .get(finalization_hash)
            .ok_or_else(|| BudgetError::UnknownFinalization(finalization_hash.to_string()))?;
        if entry.status == FinalizationStatus::Expired
            || target.saturating_sub(current_height) <= params.finalization_window_blocks
        {
            return Err(BudgetError::QuorumNotReached {
                votes: entry.vote_count(),
                required,
            });
        }

        // Retract any earlier vote for a different hash.
        if let Some(previous) = self
            .voter_choice
            .insert(masternode_id.to_string(), finalization_hash.to_string())
        {
            if previous != finalization_hash {
                if let Some(old) = self.finalizations.get_mut(&previous) {
                    old.voters.remove(masternode_id);
                    debug!("{} retracted vote for finalization {}", masternode_id, previous);
                }
            }
        }

        let entry = self
            .finalizations
            .get_mut(finalization_hash)
            .ok_or_else(|| BudgetError::UnknownFinalization(finalization_hash.to_string()))?;
        entry.voters.insert(masternode_id.to_string(), current_height);
        if entry.status == FinalizationStatus::Pending {
            entry.status = FinalizationStatus::Tallying;
        }

        if entry.status == FinalizationStatus::Tallying
            && entry.vote_count() >= required
            && !self.authoritative.contains_key(&target)
        {
            entry.status = FinalizationStatus::Ok;
            let votes = entry.vote_count();
            self.authoritative.insert(target, finalization_hash.to_string());
            info!(
                "finalization {} reached quorum ({}/{} votes) for superblock {}",
                finalization_hash, votes, required, target
            );
        }
        Ok(())
    }

    /// Expire non-terminal finalizations whose deadline has passed, and
    /// drop expired ones whose superblock is already behind us
    pub fn expire_stale(&mut self, params: &BudgetParams, current_height: u64) {
        for finalization in self.finalizations.values_mut() {
            if finalization.status.is_terminal() {
                continue;
            }
            if finalization.block_start.saturating_sub(current_height)
                <= params.finalization_window_blocks
            {
                finalization.status = FinalizationStatus::Expired;
                info!(
                    "finalization {} expired with {} votes",
                    finalization.hash,
                    finalization.vote_count()
                );
            }
        }

        let stale: Vec<FinalizationHash> = self
            .finalizations
            .values()
            .filter(|f| f.status == FinalizationStatus::Expired && f.block_start < current_height)
            .map(|f| f.hash.clone())
            .collect();
        for hash in stale {
            self.finalizations.remove(&hash);
            self.voter_choice.retain(|_, choice| *choice != hash);
            debug!("dropped expired finalization {} for a past superblock", hash);
        }
    }

    /// Reinsert a previously persisted finalization, rebuilding the voter
    /// and authority indexes
    pub fn restore(&mut self, finalization: BudgetFinalization) {
        for voter in finalization.voters.keys() {
            self.voter_choice
                .insert(voter.clone(), finalization.hash.clone());
        }
        if finalization.status == FinalizationStatus::Ok {
            self.authoritative
                .insert(finalization.block_start, finalization.hash.clone());
        }
        self.finalizations
            .insert(finalization.hash.clone(), finalization);
    }

    /// The authoritative finalization for the superblock at `block_start`
    pub fn winning(&self, block_start: u64) -> Option<&BudgetFinalization> {
        self.authoritative
            .get(&block_start)
            .and_then(|hash| self.finalizations.get(hash))
            .filter(|f| f.status == FinalizationStatus::Ok)
    }

    pub fn get(&self, hash: &str) -> Option<&BudgetFinalization> {
        self.finalizations.get(hash)
    }

    /// (vote count, status) for a finalization; `None` for unknown hashes
    pub fn status(&self, hash: &str) -> Option<(usize, FinalizationStatus)> {
        self.finalizations
            .get(hash)
            .map(|f| (f.vote_count(), f.status))
    }

    pub fn all(&self) -> impl Iterator<Item = &BudgetFinalization> {
        self.finalizations.values()
    }

    pub fn len(&self) -> usize {
        self.finalizations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.finalizations.is_empty()
    }

    /// Drop finalizations that list a rolled-back proposal. Returns the
    /// dropped hashes so persisted copies can be deleted alongside.
    pub fn purge_proposal(&mut self, proposal_hash: &str) -> Vec<FinalizationHash> {
        let doomed: Vec<FinalizationHash> = self
            .finalizations
            .values()
            .filter(|f| f.proposal_hashes.iter().any(|h| h == proposal_hash))
            .map(|f| f.hash.clone())
            .collect();
        for hash in &doomed {
            if let Some(finalization) = self.finalizations.remove(hash) {
                self.authoritative.retain(|_, v| v != hash);
                self.voter_choice.retain(|_, v| v != hash);
                info!(
                    "finalization {} dropped, listed rolled-back proposal {}",
                    finalization.hash, proposal_hash
                );
            }
        }
        doomed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vote::{BudgetVote, VoteValue};
    use tessera_core::constants::{FEE_COLLECTION_ADDRESS, PROPOSAL_FEE};
    use tessera_core::MemoryChain;
    use tessera_crypto::KeyPair;

    struct Net {
        store: ProposalStore,
        ledger: VoteLedger,
        registry: MasternodeRegistry,
        keys: Vec<KeyPair>,
        params: BudgetParams,
    }

    fn network(masternodes: usize) -> Net {
        let mut registry = MasternodeRegistry::new();
        let mut keys = Vec::new();
        for i in 0..masternodes {
            let keypair = KeyPair::generate();
            let id = format!("mn{}", i + 1);
            registry
                .register(id.clone(), format!("alias{}", i + 1), keypair.public_key_hex(), 100)
                .unwrap();
            registry.activate(&id).unwrap();
            keys.push(keypair);
        }
        Net {
            store: ProposalStore::new(),
            ledger: VoteLedger::new(),
            registry,
            keys,
            params: BudgetParams::regtest(),
        }
    }

    fn add_established(net: &mut Net, name: &str) -> ProposalHash {
        let mut chain = MemoryChain::new();
        chain.set_height(100);
        let fee_tx = format!("fee-{}", name);
        chain.confirm_fee_tx(&fee_tx, PROPOSAL_FEE, FEE_COLLECTION_ADDRESS);
        chain.advance(3);
        let hash = net
            .store
            .submit(&chain, &net.params, name, "https://e.org", 2, 145, name, 300, &fee_tx)
            .unwrap();
        net.store.update_maturity(110, &net.params);
        hash
    }

    fn yes_vote(net: &mut Net, voter: usize, hash: &str) {
        let id = format!("mn{}", voter + 1);
        let vote = BudgetVote::signed(&net.keys[voter], &id, hash, VoteValue::Yes, 1000 + voter as u64);
        net.ledger.cast_vote(&net.store, &net.registry, vote).unwrap();
    }

    #[test]
    fn test_required_votes_majority() {
        assert_eq!(required_votes(1), 1);
        assert_eq!(required_votes(2), 2);
        assert_eq!(required_votes(3), 2);
        assert_eq!(required_votes(10), 6);
    }

    #[test]
    fn test_suggest_is_idempotent() {
        let mut net = network(2);
        let a = add_established(&mut net, "a");
        yes_vote(&mut net, 0, &a);

        let mut mgr = BudgetFinalizationManager::new();
        let h1 = mgr.suggest(&net.store, &net.ledger, &net.params, 120);
        let h2 = mgr.suggest(&net.store, &net.ledger, &net.params, 120);
        assert_eq!(h1, h2);
        assert_eq!(mgr.len(), 1);
        assert_eq!(mgr.status(&h1), Some((0, FinalizationStatus::Pending)));
    }

    #[test]
    fn test_quorum_reaches_ok() {
        let mut net = network(2);
        let a = add_established(&mut net, "a");
        yes_vote(&mut net, 0, &a);
        yes_vote(&mut net, 1, &a);

        let mut mgr = BudgetFinalizationManager::new();
        let hash = mgr.suggest(&net.store, &net.ledger, &net.params, 120);

        mgr.record_vote(&net.store, &net.ledger, &net.registry, &net.params, "mn1", &hash, 120)
            .unwrap();
        assert_eq!(mgr.status(&hash), Some((1, FinalizationStatus::Tallying)));

        mgr.record_vote(&net.store, &net.ledger, &net.registry, &net.params, "mn2", &hash, 121)
            .unwrap();
        assert_eq!(mgr.status(&hash), Some((2, FinalizationStatus::Ok)));
        assert!(mgr.winning(145).is_some());
    }

    #[test]
    fn test_mismatched_hash_never_counts() {
        let mut net = network(2);
        let a = add_established(&mut net, "a");
        yes_vote(&mut net, 0, &a);

        let mut mgr = BudgetFinalizationManager::new();
        let bogus = finalization_hash(145, &["deadbeef".to_string()]);

        for mn in ["mn1", "mn2"] {
            let result = mgr.record_vote(
                &net.store, &net.ledger, &net.registry, &net.params, mn, &bogus, 120,
            );
            assert!(matches!(result, Err(BudgetError::FinalizationMismatch { .. })));
        }
        assert!(mgr.winning(145).is_none());
    }

    #[test]
    fn test_vote_after_deadline_rejected() {
        let mut net = network(2);
        let a = add_established(&mut net, "a");
        yes_vote(&mut net, 0, &a);

        let mut mgr = BudgetFinalizationManager::new();
        // Superblock at 145, window 10: height 135 leaves exactly the
        // window, too late.
        let hash = mgr.suggest(&net.store, &net.ledger, &net.params, 135);
        let result = mgr.record_vote(
            &net.store, &net.ledger, &net.registry, &net.params, "mn1", &hash, 135,
        );
        assert!(matches!(result, Err(BudgetError::QuorumNotReached { .. })));
    }

    #[test]
    fn test_expiry_is_terminal() {
        let mut net = network(2);
        let a = add_established(&mut net, "a");
        yes_vote(&mut net, 0, &a);

        let mut mgr = BudgetFinalizationManager::new();
        let hash = mgr.suggest(&net.store, &net.ledger, &net.params, 120);
        mgr.record_vote(&net.store, &net.ledger, &net.registry, &net.params, "mn1", &hash, 120)
            .unwrap();

        mgr.expire_stale(&net.params, 140);
        assert_eq!(mgr.status(&hash), Some((1, FinalizationStatus::Expired)));
        assert!(mgr.winning(145).is_none());

        // Expired is terminal: a late vote cannot revive it.
        mgr.record_vote(&net.store, &net.ledger, &net.registry, &net.params, "mn2", &hash, 141)
            .unwrap_err();
    }

    #[test]
    fn test_remote_finalization_shape_checked() {
        let params = BudgetParams::regtest();
        let mut mgr = BudgetFinalizationManager::new();

        // Not a superblock height.
        let result = mgr.insert_remote(&params, 144, vec!["aa".to_string()]);
        assert!(matches!(result, Err(BudgetError::MalformedFinalization(_))));

        // Payment list beyond the bound.
        let flood: Vec<ProposalHash> = (0..=MAX_FINALIZATION_PAYMENTS)
            .map(|i| format!("{:064x}", i))
            .collect();
        let result = mgr.insert_remote(&params, 145, flood);
        assert!(matches!(result, Err(BudgetError::MalformedFinalization(_))));
        assert!(mgr.is_empty());

        // A well-formed object merges once.
        assert!(mgr.insert_remote(&params, 145, vec!["aa".to_string()]).unwrap());
        assert!(!mgr.insert_remote(&params, 145, vec!["aa".to_string()]).unwrap());
        assert_eq!(mgr.len(), 1);
    }

    #[test]
    fn test_expired_finalizations_swept_after_superblock() {
        let mut net = network(1);
        let a = add_established(&mut net, "a");
        yes_vote(&mut net, 0, &a);

        let mut mgr = BudgetFinalizationManager::new();
        let hash = mgr.suggest(&net.store, &net.ledger, &net.params, 120);

        mgr.expire_stale(&net.params, 140);
        assert_eq!(mgr.status(&hash), Some((0, FinalizationStatus::Expired)));

        // Still queryable until its superblock passes, then dropped.
        mgr.expire_stale(&net.params, 145);
        assert!(mgr.get(&hash).is_some());
        mgr.expire_stale(&net.params, 146);
        assert!(mgr.get(&hash).is_none());
        assert!(mgr.is_empty());
    }

    #[test]
    fn test_vote_retraction_last_write_wins() {
        let mut net = network(3);
        let a = add_established(&mut net, "a");
        yes_vote(&mut net, 0, &a);

        let mut mgr = BudgetFinalizationManager::new();
        let first = mgr.suggest(&net.store, &net.ledger, &net.params, 120);
        mgr.record_vote(&net.store, &net.ledger, &net.registry, &net.params, "mn1", &first, 120)
            .unwrap();

        // A second yes vote changes the paid set and therefore the local
        // hash; mn1 re-votes for the new one.
        yes_vote(&mut net, 1, &a);
        let b = add_established(&mut net, "b");
        yes_vote(&mut net, 2, &b);
        let second = mgr.suggest(&net.store, &net.ledger, &net.params, 120);
        assert_ne!(first, second);

        mgr.record_vote(&net.store, &net.ledger, &net.registry, &net.params, "mn1", &second, 121)
            .unwrap();
        assert_eq!(mgr.status(&first).unwrap().0, 0, "earlier vote retracted");
        assert_eq!(mgr.status(&second).unwrap().0, 1);
    }

    #[test]
    fn test_unknown_hash_status_is_none() {
        let mgr = BudgetFinalizationManager::new();
        assert!(mgr.status("deadbeef").is_none());
        assert!(mgr.get("deadbeef").is_none());
    }
}
