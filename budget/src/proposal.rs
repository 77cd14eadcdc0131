//! Budget proposals and the proposal store
//!
//! A proposal is identified by the hash of its content, so independently
//! gossiped copies of the same request collapse onto one store entry. The
//! funding fee transaction is validated through the chain view but never
//! interpreted beyond amount, destination and confirmation depth.

use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use tessera_core::chain::TxId;
use tessera_core::constants::{
    FEE_COLLECTION_ADDRESS, MAX_PAYMENT_CYCLES, MAX_PROPOSAL_NAME_LEN, MAX_PROPOSAL_URL_LEN,
    PROPOSAL_FEE,
};
use tessera_core::{BudgetParams, ChainView};
use tessera_crypto::sha256_hex;

use crate::error::{BudgetError, Result};

pub type ProposalHash = String;

/// A treasury spending request with a fixed payment schedule
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetProposal {
    pub name: String,
    pub url: String,
    /// Funding fee transaction this proposal was paid for with
    pub fee_tx: TxId,
    /// First superblock height this proposal is paid at
    pub block_start: u64,
    pub total_payment_count: u32,
    pub remaining_payment_count: u32,
    pub payment_address: String,
    pub amount_per_cycle: u64,
    /// Height the fee transaction confirmed at
    pub confirmed_height: u64,
    pub established: bool,
    pub valid: bool,
    pub invalid_reason: String,
}

impl BudgetProposal {
    /// Content hash: derived from the fields that define the request, never
    /// from arrival metadata, so every node computes the same identity.
    pub fn hash(&self) -> ProposalHash {
        hash_proposal_content(
            &self.name,
            &self.url,
            self.total_payment_count,
            self.block_start,
            &self.payment_address,
            self.amount_per_cycle,
        )
    }

    /// Height after the last scheduled payment cycle
    pub fn block_end(&self, cycle_blocks: u64) -> u64 {
        self.block_start
            .saturating_add((self.total_payment_count as u64).saturating_mul(cycle_blocks))
    }

    pub fn total_payment(&self) -> u64 {
        self.amount_per_cycle
            .saturating_mul(self.total_payment_count as u64)
    }

    /// Whether this proposal has a payment scheduled in the cycle containing
    /// the superblock at `height`
    pub fn is_active_at(&self, height: u64, cycle_blocks: u64) -> bool {
        self.remaining_payment_count > 0
            && height >= self.block_start
            && height < self.block_end(cycle_blocks)
    }
}

/// Deterministic content hash shared by local submission and remote merge
pub fn hash_proposal_content(
    name: &str,
    url: &str,
    cycle_count: u32,
    block_start: u64,
    payment_address: &str,
    amount_per_cycle: u64,
) -> ProposalHash {
    let preimage = format!(
        "{}|{}|{}|{}|{}|{}",
        name, url, cycle_count, block_start, payment_address, amount_per_cycle
    );
    sha256_hex(preimage.as_bytes())
}

/// Owns all known proposals, keyed by content hash
#[derive(Debug, Default)]
pub struct ProposalStore {
    proposals: HashMap<ProposalHash, BudgetProposal>,
    /// Fee transactions already attached to a proposal
    fee_index: HashMap<TxId, ProposalHash>,
}

impl ProposalStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Submit a new proposal whose fee transaction has confirmed.
    ///
    /// The proposal enters the store unestablished; it becomes eligible for
    /// voting once the maturity window has elapsed.
    #[allow(clippy::too_many_arguments)]
    pub fn submit(
        &mut self,
        chain: &dyn ChainView,
        params: &BudgetParams,
        name: &str,
        url: &str,
        cycle_count: u32,
        block_start: u64,
        payment_address: &str,
        amount_per_cycle: u64,
        fee_tx: &str,
    ) -> Result<ProposalHash> {
        check_shape(params, name, url, cycle_count, block_start, amount_per_cycle)?;

        let fee = chain
            .get_fee_tx(fee_tx)
            .ok_or_else(|| BudgetError::InvalidFeeTx(format!("{} not found on chain", fee_tx)))?;
        if fee.dest_address != FEE_COLLECTION_ADDRESS {
            return Err(BudgetError::InvalidFeeTx(format!(
                "{} does not pay the fee collection address",
                fee_tx
            )));
        }
        if fee.amount != PROPOSAL_FEE {
            return Err(BudgetError::InvalidFeeTx(format!(
                "{} pays {} instead of the required {}",
                fee_tx, fee.amount, PROPOSAL_FEE
            )));
        }
        if fee.confirmations(chain.tip_height()) < params.fee_confirmations {
            return Err(BudgetError::InvalidFeeTx(format!(
                "{} needs {} confirmations",
                fee_tx, params.fee_confirmations
            )));
        }
        if let Some(existing) = self.fee_index.get(fee_tx) {
            return Err(BudgetError::InvalidFeeTx(format!(
                "{} already funds proposal {}",
                fee_tx, existing
            )));
        }

        let proposal = BudgetProposal {
            name: name.to_string(),
            url: url.to_string(),
            fee_tx: fee_tx.to_string(),
            block_start,
            total_payment_count: cycle_count,
            remaining_payment_count: cycle_count,
            payment_address: payment_address.to_string(),
            amount_per_cycle,
            confirmed_height: fee.confirmed_height,
            established: false,
            valid: true,
            invalid_reason: String::new(),
        };
        let hash = proposal.hash();
        if self.proposals.contains_key(&hash) {
            return Err(BudgetError::DuplicateProposal(hash));
        }

        info!("proposal {} ({}) accepted, pending maturity", name, hash);
        self.fee_index.insert(fee_tx.to_string(), hash.clone());
        self.proposals.insert(hash.clone(), proposal);
        Ok(hash)
    }

    /// Insert an already-validated proposal received from a peer.
    ///
    /// Returns false when the proposal is already known. Replay-safe: the
    /// same object applied twice leaves the store unchanged.
    pub fn insert_remote(
        &mut self,
        chain: &dyn ChainView,
        params: &BudgetParams,
        proposal: BudgetProposal,
    ) -> Result<bool> {
        let hash = proposal.hash();
        if self.proposals.contains_key(&hash) {
            return Ok(false);
        }
        check_shape(
            params,
            &proposal.name,
            &proposal.url,
            proposal.total_payment_count,
            proposal.block_start,
            proposal.amount_per_cycle,
        )?;
        let fee = chain.get_fee_tx(&proposal.fee_tx).ok_or_else(|| {
            BudgetError::InvalidFeeTx(format!("{} not found on chain", proposal.fee_tx))
        })?;
        if fee.dest_address != FEE_COLLECTION_ADDRESS || fee.amount != PROPOSAL_FEE {
            return Err(BudgetError::InvalidFeeTx(proposal.fee_tx.clone()));
        }
        if let Some(existing) = self.fee_index.get(&proposal.fee_tx) {
            return Err(BudgetError::InvalidFeeTx(format!(
                "{} already funds proposal {}",
                proposal.fee_tx, existing
            )));
        }

        debug!("merged remote proposal {} ({})", proposal.name, hash);
        self.fee_index.insert(proposal.fee_tx.clone(), hash.clone());
        self.proposals.insert(hash, proposal);
        Ok(true)
    }

    /// Flip the established flag once the maturity window has elapsed.
    /// Returns whether the proposal is established afterwards.
    pub fn mark_established(
        &mut self,
        hash: &str,
        current_height: u64,
        params: &BudgetParams,
    ) -> Result<bool> {
        let proposal = self
            .proposals
            .get_mut(hash)
            .ok_or_else(|| BudgetError::UnknownProposal(hash.to_string()))?;
        if !proposal.established
            && current_height >= proposal.confirmed_height + params.proposal_maturity_blocks
        {
            proposal.established = true;
            debug!("proposal {} established at height {}", hash, current_height);
        }
        Ok(proposal.established)
    }

    /// Maturity sweep over every stored proposal
    pub fn update_maturity(&mut self, current_height: u64, params: &BudgetParams) {
        for (hash, proposal) in self.proposals.iter_mut() {
            if !proposal.established
                && current_height >= proposal.confirmed_height + params.proposal_maturity_blocks
            {
                proposal.established = true;
                debug!("proposal {} established at height {}", hash, current_height);
            }
        }
    }

    /// Validity sweep: exhausted or expired proposals drop out of future
    /// projections but stay queryable with their invalid reason.
    pub fn update_validity(&mut self, current_height: u64, params: &BudgetParams) {
        for (hash, proposal) in self.proposals.iter_mut() {
            if !proposal.valid {
                continue;
            }
            if proposal.remaining_payment_count == 0 {
                proposal.valid = false;
                proposal.invalid_reason = "no payments remaining".to_string();
                info!("proposal {} exhausted", hash);
            } else if current_height >= proposal.block_end(params.budget_cycle_blocks) {
                proposal.valid = false;
                proposal.invalid_reason = "payment window expired".to_string();
                info!("proposal {} expired at height {}", hash, current_height);
            }
        }
    }

    /// Record one emitted payment. The counter never goes below zero.
    pub fn record_payment(&mut self, hash: &str) -> Result<u32> {
        let proposal = self
            .proposals
            .get_mut(hash)
            .ok_or_else(|| BudgetError::UnknownProposal(hash.to_string()))?;
        proposal.remaining_payment_count = proposal.remaining_payment_count.saturating_sub(1);
        Ok(proposal.remaining_payment_count)
    }

    /// Reinsert a previously persisted proposal, skipping validation
    pub fn restore(&mut self, proposal: BudgetProposal) {
        let hash = proposal.hash();
        self.fee_index.insert(proposal.fee_tx.clone(), hash.clone());
        self.proposals.insert(hash, proposal);
    }

    pub fn get(&self, hash: &str) -> Option<&BudgetProposal> {
        self.proposals.get(hash)
    }

    pub fn contains(&self, hash: &str) -> bool {
        self.proposals.contains_key(hash)
    }

    pub fn all(&self) -> impl Iterator<Item = (&ProposalHash, &BudgetProposal)> {
        self.proposals.iter()
    }

    pub fn list_established(&self) -> Vec<&BudgetProposal> {
        self.proposals.values().filter(|p| p.established).collect()
    }

    pub fn len(&self) -> usize {
        self.proposals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.proposals.is_empty()
    }

    /// Remove the proposal funded by an orphaned fee transaction.
    /// Returns the hash of the removed proposal, if any.
    pub fn remove_by_fee_tx(&mut self, fee_tx: &str) -> Option<ProposalHash> {
        let hash = self.fee_index.remove(fee_tx)?;
        self.proposals.remove(&hash);
        info!("proposal {} rolled back, fee tx {} orphaned", hash, fee_tx);
        Some(hash)
    }
}

fn check_shape(
    params: &BudgetParams,
    name: &str,
    url: &str,
    cycle_count: u32,
    block_start: u64,
    amount_per_cycle: u64,
) -> Result<()> {
    if name.is_empty() || name.len() > MAX_PROPOSAL_NAME_LEN {
        return Err(BudgetError::MalformedProposal(format!(
            "name must be 1..={} characters",
            MAX_PROPOSAL_NAME_LEN
        )));
    }
    if url.is_empty() || url.len() > MAX_PROPOSAL_URL_LEN {
        return Err(BudgetError::MalformedProposal(format!(
            "url must be 1..={} characters",
            MAX_PROPOSAL_URL_LEN
        )));
    }
    if cycle_count < 1 || cycle_count > MAX_PAYMENT_CYCLES {
        return Err(BudgetError::MalformedProposal(format!(
            "cycle count must be 1..={}",
            MAX_PAYMENT_CYCLES
        )));
    }
    if amount_per_cycle == 0 || amount_per_cycle > params.total_budget_per_cycle {
        return Err(BudgetError::MalformedProposal(format!(
            "amount per cycle must be 1..={}",
            params.total_budget_per_cycle
        )));
    }
    if block_start == 0 || block_start % params.budget_cycle_blocks != 0 {
        return Err(BudgetError::MalformedProposal(format!(
            "block start {} is not a superblock height",
            block_start
        )));
    }
    let span = (cycle_count as u64).checked_mul(params.budget_cycle_blocks);
    if span.and_then(|s| block_start.checked_add(s)).is_none() {
        return Err(BudgetError::MalformedProposal(format!(
            "payment window starting at {} does not fit the height range",
            block_start
        )));
    }
    Ok(())
}
