//! Tessera Budget Governance
//!
//! The governance consensus engine: masternodes vote on treasury spending
//! proposals, a deterministic projection ranks them under the per-cycle
//! budget cap, finalizations lock the payment list for the next superblock
//! by masternode quorum, and the scheduler pays the winning list when the
//! superblock height arrives. Every node recomputes the same projection
//! from the same gossiped state; that determinism is what the whole
//! subsystem hangs on.

pub mod commands;
pub mod error;
pub mod finalization;
pub mod manager;
pub mod projection;
pub mod proposal;
pub mod scheduler;
pub mod storage;
pub mod sync;
pub mod vote;

pub use commands::{GovernanceCommand, GovernanceNode, GovernanceResponse, VoteRecord};
pub use error::{BudgetError, Result};
pub use finalization::{
    required_votes, BudgetFinalization, BudgetFinalizationManager, FinalizationHash,
    FinalizationStatus,
};
pub use manager::{BudgetManager, FinalizationSummary, ReorgRollback};
pub use projection::{describe, paid_set, project, ProjectedProposal};
pub use proposal::{BudgetProposal, ProposalHash, ProposalStore};
pub use scheduler::{process_block, BudgetPayment};
pub use storage::BudgetDb;
pub use vote::{BudgetVote, Tally, VoteLedger, VoteValue};
