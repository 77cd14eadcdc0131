//! Budget cycle parameters
//!
//! Everything height-driven in governance is derived from these numbers, so
//! that replaying the same block events always yields the same decisions.

use serde::{Deserialize, Serialize};

use crate::constants::COIN;

/// Per-network budget parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetParams {
    /// Blocks between superblocks (one payment cycle)
    pub budget_cycle_blocks: u64,

    /// Blocks a proposal must sit on-chain after its fee confirms before it
    /// is established and eligible for voting
    pub proposal_maturity_blocks: u64,

    /// Confirmations the fee transaction needs before submission is accepted
    pub fee_confirmations: u64,

    /// A finalization must reach quorum while more than this many blocks
    /// remain before its target superblock; afterwards it expires
    pub finalization_window_blocks: u64,

    /// Total amount allotable per cycle across all proposals
    pub total_budget_per_cycle: u64,
}

impl BudgetParams {
    /// Regtest-scale parameters used throughout the test suite
    pub fn regtest() -> Self {
        Self {
            budget_cycle_blocks: 145,
            proposal_maturity_blocks: 6,
            fee_confirmations: 3,
            finalization_window_blocks: 10,
            total_budget_per_cycle: 1_000 * COIN,
        }
    }

    /// Next superblock height strictly after `height`
    pub fn next_superblock(&self, height: u64) -> u64 {
        (height / self.budget_cycle_blocks + 1) * self.budget_cycle_blocks
    }

    /// Whether `height` is a superblock height
    pub fn is_superblock(&self, height: u64) -> bool {
        height > 0 && height % self.budget_cycle_blocks == 0
    }
}

impl Default for BudgetParams {
    fn default() -> Self {
        Self {
            budget_cycle_blocks: 43_200,
            proposal_maturity_blocks: 60,
            fee_confirmations: 6,
            finalization_window_blocks: 864,
            total_budget_per_cycle: 43_200 * COIN,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_superblock() {
        let params = BudgetParams::regtest();
        assert_eq!(params.next_superblock(0), 145);
        assert_eq!(params.next_superblock(144), 145);
        assert_eq!(params.next_superblock(145), 290);
        assert_eq!(params.next_superblock(146), 290);
    }

    #[test]
    fn test_is_superblock() {
        let params = BudgetParams::regtest();
        assert!(!params.is_superblock(0));
        assert!(params.is_superblock(145));
        assert!(params.is_superblock(290));
        assert!(!params.is_superblock(144));
    }
}
