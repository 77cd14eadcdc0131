//! Governance command surface
//!
//! Heterogeneous governance calls travel as one tagged command enum and
//! come back as one tagged response enum, dispatched through a single fixed
//! match. Submission failures are returned as rejection responses with the
//! specific reason; they never escape as errors, since every failure in the
//! taxonomy is local to one command.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use tessera_core::{BudgetParams, ChainView};
use tessera_masternode::{MasternodeId, MasternodeRegistry};

use crate::manager::{BudgetManager, FinalizationSummary};
use crate::projection::ProjectedProposal;
use crate::proposal::ProposalHash;
use crate::vote::{BudgetVote, VoteValue};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum GovernanceCommand {
    SubmitProposal {
        name: String,
        url: String,
        cycle_count: u32,
        block_start: u64,
        payment_address: String,
        amount_per_cycle: u64,
        fee_tx: String,
    },
    SubmitVote {
        vote: BudgetVote,
    },
    SuggestFinalization,
    VoteFinalization {
        masternode_id: MasternodeId,
        finalization_hash: String,
    },
    GetBudgetProjection,
    GetProposalInfo {
        proposal_hash: ProposalHash,
    },
    GetFinalizationStatus,
    GetVotes {
        proposal_hash: ProposalHash,
    },
}

/// One record of `GetVotes` output
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VoteRecord {
    pub masternode_id: MasternodeId,
    pub value: VoteValue,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum GovernanceResponse {
    ProposalSubmitted { hash: ProposalHash },
    VoteAccepted,
    FinalizationSuggested { hash: String },
    FinalizationVoteAccepted,
    Projection { proposals: Vec<ProjectedProposal> },
    ProposalInfo { proposals: Vec<ProjectedProposal> },
    FinalizationStatus { finalizations: Vec<FinalizationSummary> },
    Votes { votes: Vec<VoteRecord> },
    Rejected { reason: String },
}

/// One node's governance endpoint: a single budget manager behind a
/// reader-writer lock, so command writes are serialized while projection
/// and status reads run concurrently.
pub struct GovernanceNode {
    manager: RwLock<BudgetManager>,
}

impl GovernanceNode {
    pub fn new(params: BudgetParams) -> Self {
        GovernanceNode {
            manager: RwLock::new(BudgetManager::new(params)),
        }
    }

    /// Serialized access to the manager for block events and gossip merge
    pub fn with_manager<R>(&self, f: impl FnOnce(&mut BudgetManager) -> R) -> R {
        f(&mut self.manager.write())
    }

    pub fn read_manager<R>(&self, f: impl FnOnce(&BudgetManager) -> R) -> R {
        f(&self.manager.read())
    }

    /// Fixed dispatch table over the command surface
    pub fn execute(
        &self,
        chain: &dyn ChainView,
        registry: &MasternodeRegistry,
        command: GovernanceCommand,
    ) -> GovernanceResponse {
        match command {
            GovernanceCommand::SubmitProposal {
                name,
                url,
                cycle_count,
                block_start,
                payment_address,
                amount_per_cycle,
                fee_tx,
            } => {
                let result = self.manager.write().submit_proposal(
                    chain,
                    &name,
                    &url,
                    cycle_count,
                    block_start,
                    &payment_address,
                    amount_per_cycle,
                    &fee_tx,
                );
                match result {
                    Ok(hash) => GovernanceResponse::ProposalSubmitted { hash },
                    Err(e) => GovernanceResponse::Rejected {
                        reason: e.to_string(),
                    },
                }
            }
            GovernanceCommand::SubmitVote { vote } => {
                match self.manager.write().cast_vote(registry, vote) {
                    Ok(()) => GovernanceResponse::VoteAccepted,
                    Err(e) => GovernanceResponse::Rejected {
                        reason: e.to_string(),
                    },
                }
            }
            GovernanceCommand::SuggestFinalization => {
                let hash = self.manager.write().suggest_finalization(chain);
                GovernanceResponse::FinalizationSuggested { hash }
            }
            GovernanceCommand::VoteFinalization {
                masternode_id,
                finalization_hash,
            } => {
                let result = self.manager.write().vote_finalization(
                    registry,
                    &masternode_id,
                    &finalization_hash,
                    chain.tip_height(),
                );
                match result {
                    Ok(()) => GovernanceResponse::FinalizationVoteAccepted,
                    Err(e) => GovernanceResponse::Rejected {
                        reason: e.to_string(),
                    },
                }
            }
            GovernanceCommand::GetBudgetProjection => GovernanceResponse::Projection {
                proposals: self.manager.read().projection(chain.tip_height()),
            },
            GovernanceCommand::GetProposalInfo { proposal_hash } => {
                GovernanceResponse::ProposalInfo {
                    proposals: self
                        .manager
                        .read()
                        .proposal_info(&proposal_hash, chain.tip_height())
                        .into_iter()
                        .collect(),
                }
            }
            GovernanceCommand::GetFinalizationStatus => GovernanceResponse::FinalizationStatus {
                finalizations: self.manager.read().finalization_status(),
            },
            GovernanceCommand::GetVotes { proposal_hash } => {
                let manager = self.manager.read();
                let votes = manager
                    .ledger()
                    .votes_for(&proposal_hash)
                    .into_iter()
                    .map(|v| VoteRecord {
                        masternode_id: v.masternode_id.clone(),
                        value: v.value,
                    })
                    .collect();
                GovernanceResponse::Votes { votes }
            }
        }
    }
}
