//! Superblock payment scheduler
//!
//! Runs once per new-block event. At a superblock height it pays out the
//! authoritative finalization's list; without one the cycle simply pays
//! nothing and the chain moves on.

use log::{debug, info};
use serde::{Deserialize, Serialize};

use tessera_core::BudgetParams;

use crate::finalization::BudgetFinalizationManager;
use crate::proposal::{ProposalHash, ProposalStore};

/// One emitted budget payment
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BudgetPayment {
    pub proposal_hash: ProposalHash,
    pub address: String,
    pub amount: u64,
}

/// Emit the payment set for the block at `height`.
///
/// Empty unless `height` is a superblock with an `OK` finalization computed
/// for it. Each listed proposal gets exactly one payment and one decrement
/// of its remaining payment count.
pub fn process_block(
    store: &mut ProposalStore,
    finalizations: &BudgetFinalizationManager,
    params: &BudgetParams,
    height: u64,
) -> Vec<BudgetPayment> {
    if !params.is_superblock(height) {
        return Vec::new();
    }

    let winning = match finalizations.winning(height) {
        Some(f) => f,
        None => {
            info!("superblock {} has no OK finalization, paying nothing", height);
            return Vec::new();
        }
    };

    let mut payments = Vec::with_capacity(winning.proposal_hashes.len());
    for hash in &winning.proposal_hashes {
        let (address, amount) = match store.get(hash) {
            Some(p) if p.remaining_payment_count > 0 => {
                (p.payment_address.clone(), p.amount_per_cycle)
            }
            Some(_) => {
                debug!("proposal {} already exhausted, skipping payment", hash);
                continue;
            }
            None => {
                debug!("finalized proposal {} no longer stored, skipping", hash);
                continue;
            }
        };

        let remaining = match store.record_payment(hash) {
            Ok(remaining) => remaining,
            Err(_) => continue,
        };
        info!(
            "superblock {}: paid {} to {} for {} ({} payments left)",
            height, amount, address, hash, remaining
        );
        payments.push(BudgetPayment {
            proposal_hash: hash.clone(),
            address,
            amount,
        });
    }
    payments
}
