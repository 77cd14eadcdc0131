//! Budget manager
//!
//! Owns the proposal store, vote ledger and finalization manager for one
//! node and drives them from block events. The chain view and masternode
//! registry stay external collaborators passed into each operation, so
//! there is no ambient state.

use log::info;

use tessera_core::{BudgetParams, ChainView};
use tessera_masternode::MasternodeRegistry;

use crate::error::Result;
use crate::finalization::{BudgetFinalizationManager, FinalizationHash, FinalizationStatus};
use crate::projection::{describe, project, ProjectedProposal};
use crate::proposal::{ProposalHash, ProposalStore};
use crate::scheduler::{process_block, BudgetPayment};
use crate::vote::{BudgetVote, VoteLedger};

pub struct BudgetManager {
    params: BudgetParams,
    store: ProposalStore,
    ledger: VoteLedger,
    finalizations: BudgetFinalizationManager,
}

/// Everything a reorg rollback removed from memory. Callers holding a
/// persisted copy of the state delete these rows as well.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReorgRollback {
    pub proposals: Vec<ProposalHash>,
    pub finalizations: Vec<FinalizationHash>,
}

/// Summary row returned by the finalization status query
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq)]
pub struct FinalizationSummary {
    pub hash: FinalizationHash,
    pub block_start: u64,
    pub vote_count: usize,
    pub status: FinalizationStatus,
}

impl BudgetManager {
    pub fn new(params: BudgetParams) -> Self {
        BudgetManager {
            params,
            store: ProposalStore::new(),
            ledger: VoteLedger::new(),
            finalizations: BudgetFinalizationManager::new(),
        }
    }

    pub fn params(&self) -> &BudgetParams {
        &self.params
    }

    pub fn store(&self) -> &ProposalStore {
        &self.store
    }

    pub fn ledger(&self) -> &VoteLedger {
        &self.ledger
    }

    pub fn finalizations(&self) -> &BudgetFinalizationManager {
        &self.finalizations
    }

    #[allow(clippy::too_many_arguments)]
    pub fn submit_proposal(
        &mut self,
        chain: &dyn ChainView,
        name: &str,
        url: &str,
        cycle_count: u32,
        block_start: u64,
        payment_address: &str,
        amount_per_cycle: u64,
        fee_tx: &str,
    ) -> Result<ProposalHash> {
        self.store.submit(
            chain,
            &self.params,
            name,
            url,
            cycle_count,
            block_start,
            payment_address,
            amount_per_cycle,
            fee_tx,
        )
    }

    pub fn cast_vote(&mut self, registry: &MasternodeRegistry, vote: BudgetVote) -> Result<()> {
        self.ledger.cast_vote(&self.store, registry, vote)
    }

    pub fn suggest_finalization(&mut self, chain: &dyn ChainView) -> FinalizationHash {
        self.finalizations
            .suggest(&self.store, &self.ledger, &self.params, chain.tip_height())
    }

    pub fn vote_finalization(
        &mut self,
        registry: &MasternodeRegistry,
        masternode_id: &str,
        finalization_hash: &str,
        current_height: u64,
    ) -> Result<()> {
        self.finalizations.record_vote(
            &self.store,
            &self.ledger,
            registry,
            &self.params,
            masternode_id,
            finalization_hash,
            current_height,
        )
    }

    /// Deterministic ranked/allotment view at the current height
    pub fn projection(&self, current_height: u64) -> Vec<ProjectedProposal> {
        project(&self.store, &self.ledger, &self.params, current_height)
    }

    /// Full projected field set for one proposal, `None` when unknown
    pub fn proposal_info(&self, hash: &str, current_height: u64) -> Option<ProjectedProposal> {
        describe(&self.store, &self.ledger, &self.params, current_height, hash)
    }

    /// Vote-count/status summary of every known finalization, hash-ordered
    pub fn finalization_status(&self) -> Vec<FinalizationSummary> {
        let mut rows: Vec<FinalizationSummary> = self
            .finalizations
            .all()
            .map(|f| FinalizationSummary {
                hash: f.hash.clone(),
                block_start: f.block_start,
                vote_count: f.vote_count(),
                status: f.status,
            })
            .collect();
        rows.sort_by(|a, b| a.hash.cmp(&b.hash));
        rows
    }

    /// New-block pipeline: maturity, validity, finalization deadlines, then
    /// superblock payments.
    pub fn on_new_block(&mut self, height: u64) -> Vec<BudgetPayment> {
        self.store.update_maturity(height, &self.params);
        self.store.update_validity(height, &self.params);

        // Expired proposals take their votes with them.
        let dead: Vec<ProposalHash> = self
            .store
            .all()
            .filter(|(_, p)| !p.valid)
            .map(|(hash, _)| hash.clone())
            .collect();
        for hash in dead {
            self.ledger.purge_proposal(&hash);
        }

        self.finalizations.expire_stale(&self.params, height);
        process_block(&mut self.store, &self.finalizations, &self.params, height)
    }

    /// Roll back state that depended on transactions orphaned by a reorg.
    /// Returns what was removed so persisted rows can be deleted too.
    pub fn on_chain_reorg(&mut self, orphaned_txids: &[String]) -> ReorgRollback {
        let mut rollback = ReorgRollback::default();
        for txid in orphaned_txids {
            if let Some(hash) = self.store.remove_by_fee_tx(txid) {
                info!("reorg: rolling back proposal {}", hash);
                self.ledger.purge_proposal(&hash);
                rollback
                    .finalizations
                    .extend(self.finalizations.purge_proposal(&hash));
                rollback.proposals.push(hash);
            }
        }
        rollback
    }

    pub(crate) fn parts_mut(
        &mut self,
    ) -> (
        &BudgetParams,
        &mut ProposalStore,
        &mut VoteLedger,
        &mut BudgetFinalizationManager,
    ) {
        (
            &self.params,
            &mut self.store,
            &mut self.ledger,
            &mut self.finalizations,
        )
    }
}
