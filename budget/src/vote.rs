//! Vote ledger
//!
//! Stores at most one vote per (masternode, proposal) pair. A newer vote
//! from the same masternode replaces the stored one; an older or equal
//! timestamp is rejected. Tallies are derived from the stored set, so
//! replaying any permutation of the same votes converges on the same
//! counts.

use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use tessera_crypto::KeyPair;
use tessera_masternode::{MasternodeId, MasternodeRegistry};

use crate::error::{BudgetError, Result};
use crate::proposal::{ProposalHash, ProposalStore};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum VoteValue {
    Yes,
    No,
    Abstain,
}

impl VoteValue {
    pub fn as_str(&self) -> &'static str {
        match self {
            VoteValue::Yes => "yes",
            VoteValue::No => "no",
            VoteValue::Abstain => "abstain",
        }
    }
}

/// A signed vote on a budget proposal
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetVote {
    pub masternode_id: MasternodeId,
    pub proposal_hash: ProposalHash,
    pub value: VoteValue,
    pub timestamp: u64,
    pub signature: Vec<u8>,
}

impl BudgetVote {
    /// Bytes the vote signature commits to
    pub fn signing_payload(
        masternode_id: &str,
        proposal_hash: &str,
        value: VoteValue,
        timestamp: u64,
    ) -> Vec<u8> {
        format!(
            "{}|{}|{}|{}",
            masternode_id,
            proposal_hash,
            value.as_str(),
            timestamp
        )
        .into_bytes()
    }

    /// Build and sign a vote with the masternode's key
    pub fn signed(
        keypair: &KeyPair,
        masternode_id: &str,
        proposal_hash: &str,
        value: VoteValue,
        timestamp: u64,
    ) -> Self {
        let payload = Self::signing_payload(masternode_id, proposal_hash, value, timestamp);
        BudgetVote {
            masternode_id: masternode_id.to_string(),
            proposal_hash: proposal_hash.to_string(),
            value,
            timestamp,
            signature: keypair.sign(&payload),
        }
    }
}

/// Simple per-proposal vote counts, one vote per masternode
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tally {
    pub yes: u64,
    pub no: u64,
    pub abstains: u64,
}

impl Tally {
    /// Net score used for projection ranking
    pub fn net(&self) -> i64 {
        self.yes as i64 - self.no as i64
    }

    /// Yes share of the decided votes
    pub fn ratio(&self) -> f64 {
        let decided = self.yes + self.no;
        if decided == 0 {
            return 0.0;
        }
        self.yes as f64 / decided as f64
    }
}

/// Owns all stored votes, keyed (proposal, masternode)
#[derive(Debug, Default)]
pub struct VoteLedger {
    // BTreeMap per proposal keeps vote listings deterministic
    votes: HashMap<ProposalHash, BTreeMap<MasternodeId, BudgetVote>>,
}

impl VoteLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and upsert a vote.
    ///
    /// The proposal must exist and be established, the voter must be active
    /// in the registry, the signature must verify against the registry key,
    /// and the timestamp must be strictly newer than any stored vote from
    /// the same masternode on the same proposal.
    pub fn cast_vote(
        &mut self,
        store: &ProposalStore,
        registry: &MasternodeRegistry,
        vote: BudgetVote,
    ) -> Result<()> {
        let proposal = store
            .get(&vote.proposal_hash)
            .ok_or_else(|| BudgetError::UnknownProposal(vote.proposal_hash.clone()))?;
        if !proposal.established {
            return Err(BudgetError::ProposalNotEstablished(vote.proposal_hash.clone()));
        }
        if !registry.is_active(&vote.masternode_id) {
            return Err(BudgetError::UnauthorizedVoter(vote.masternode_id.clone()));
        }

        let key = registry
            .voting_key(&vote.masternode_id)
            .ok_or_else(|| BudgetError::UnauthorizedVoter(vote.masternode_id.clone()))?;
        let payload = BudgetVote::signing_payload(
            &vote.masternode_id,
            &vote.proposal_hash,
            vote.value,
            vote.timestamp,
        );
        KeyPair::verify(key, &payload, &vote.signature)
            .map_err(|_| BudgetError::BadSignature(vote.masternode_id.clone()))?;

        let slot = self.votes.entry(vote.proposal_hash.clone()).or_default();
        if let Some(existing) = slot.get(&vote.masternode_id) {
            if vote.timestamp <= existing.timestamp {
                return Err(BudgetError::StaleVote {
                    masternode: vote.masternode_id,
                    proposal: vote.proposal_hash,
                });
            }
        }

        debug!(
            "vote {} from {} on {}",
            vote.value.as_str(),
            vote.masternode_id,
            vote.proposal_hash
        );
        slot.insert(vote.masternode_id.clone(), vote);
        Ok(())
    }

    /// Stored vote for a (proposal, masternode) pair, if any
    pub fn get(&self, proposal_hash: &str, masternode_id: &str) -> Option<&BudgetVote> {
        self.votes.get(proposal_hash)?.get(masternode_id)
    }

    /// Reinsert a previously persisted vote, skipping validation
    pub fn restore(&mut self, vote: BudgetVote) {
        self.votes
            .entry(vote.proposal_hash.clone())
            .or_default()
            .insert(vote.masternode_id.clone(), vote);
    }

    /// Current counts for a proposal; zero for unknown hashes
    pub fn tally(&self, proposal_hash: &str) -> Tally {
        let mut tally = Tally::default();
        if let Some(slot) = self.votes.get(proposal_hash) {
            for vote in slot.values() {
                match vote.value {
                    VoteValue::Yes => tally.yes += 1,
                    VoteValue::No => tally.no += 1,
                    VoteValue::Abstain => tally.abstains += 1,
                }
            }
        }
        tally
    }

    /// Stored votes for a proposal, ordered by masternode id.
    /// Empty for unknown hashes, never an error.
    pub fn votes_for(&self, proposal_hash: &str) -> Vec<&BudgetVote> {
        self.votes
            .get(proposal_hash)
            .map(|slot| slot.values().collect())
            .unwrap_or_default()
    }

    pub fn all(&self) -> impl Iterator<Item = &BudgetVote> {
        self.votes.values().flat_map(|slot| slot.values())
    }

    /// Drop every vote attached to an expired or rolled-back proposal
    pub fn purge_proposal(&mut self, proposal_hash: &str) {
        self.votes.remove(proposal_hash);
    }
}
