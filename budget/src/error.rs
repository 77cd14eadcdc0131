//! Governance error types
//!
//! Every variant is recoverable: it rejects a single submission or vote and
//! leaves the rest of the governance state untouched.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum BudgetError {
    #[error("Invalid fee transaction: {0}")]
    InvalidFeeTx(String),

    #[error("Duplicate proposal: {0}")]
    DuplicateProposal(String),

    #[error("Malformed proposal: {0}")]
    MalformedProposal(String),

    #[error("Unknown proposal: {0}")]
    UnknownProposal(String),

    #[error("Proposal not established: {0}")]
    ProposalNotEstablished(String),

    #[error("Unauthorized voter: {0}")]
    UnauthorizedVoter(String),

    #[error("Bad signature from {0}")]
    BadSignature(String),

    #[error("Stale vote from {masternode} on {proposal}")]
    StaleVote { masternode: String, proposal: String },

    #[error("Finalization {suggested} does not match local projection {local}")]
    FinalizationMismatch { suggested: String, local: String },

    #[error("Quorum not reached: {votes} of {required} votes")]
    QuorumNotReached { votes: usize, required: usize },

    #[error("Unknown finalization: {0}")]
    UnknownFinalization(String),

    #[error("Malformed finalization: {0}")]
    MalformedFinalization(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

pub type Result<T> = std::result::Result<T, BudgetError>;
