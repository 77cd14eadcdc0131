//! Gossip merge endpoints
//!
//! Nodes converge by replaying each other's governance objects through
//! these methods. Every one of them is idempotent and safe to replay: they
//! feed the same upsert / last-write-wins rules as local submission, and an
//! already-known object reports `false` instead of failing.

use log::debug;

use tessera_core::ChainView;
use tessera_masternode::MasternodeRegistry;

use crate::error::Result;
use crate::manager::BudgetManager;
use crate::proposal::{BudgetProposal, ProposalHash};
use crate::vote::BudgetVote;

impl BudgetManager {
    /// Merge a proposal received from a peer. Returns false when it was
    /// already known.
    pub fn apply_remote_proposal(
        &mut self,
        chain: &dyn ChainView,
        proposal: BudgetProposal,
    ) -> Result<bool> {
        let (params, store, _, _) = self.parts_mut();
        store.insert_remote(chain, params, proposal)
    }

    /// Merge a vote received from a peer.
    ///
    /// An exact replay of a stored vote is reported as already-known; an
    /// older vote is still rejected as stale, and a newer one replaces the
    /// stored vote exactly as a local cast would.
    pub fn apply_remote_vote(
        &mut self,
        registry: &MasternodeRegistry,
        vote: BudgetVote,
    ) -> Result<bool> {
        if let Some(existing) = self.ledger().get(&vote.proposal_hash, &vote.masternode_id) {
            if existing.timestamp == vote.timestamp && existing.value == vote.value {
                debug!(
                    "replayed vote from {} on {}, already stored",
                    vote.masternode_id, vote.proposal_hash
                );
                return Ok(false);
            }
        }
        self.cast_vote(registry, vote)?;
        Ok(true)
    }

    /// Merge a finalization object received from a peer. Only the carried
    /// list is trusted; votes arrive individually. A list with a bogus
    /// target height or beyond the payment bound is rejected.
    pub fn apply_remote_finalization(
        &mut self,
        block_start: u64,
        proposal_hashes: Vec<ProposalHash>,
    ) -> Result<bool> {
        let (params, _, _, finalizations) = self.parts_mut();
        finalizations.insert_remote(params, block_start, proposal_hashes)
    }

    /// Merge a finalization vote received from a peer. A vote for a hash
    /// this node cannot recompute is rejected as a mismatch, never stored.
    pub fn apply_remote_finalization_vote(
        &mut self,
        registry: &MasternodeRegistry,
        masternode_id: &str,
        finalization_hash: &str,
        current_height: u64,
    ) -> Result<bool> {
        if let Some(finalization) = self.finalizations().get(finalization_hash) {
            if finalization.voters.contains_key(masternode_id) {
                return Ok(false);
            }
        }
        self.vote_finalization(registry, masternode_id, finalization_hash, current_height)?;
        Ok(true)
    }
}
