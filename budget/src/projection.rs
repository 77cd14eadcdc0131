//! Budget projection
//!
//! Pure, deterministic view over the proposal store and vote ledger. Every
//! node feeding this function byte-identical (proposal, vote) state gets a
//! byte-identical ordered list back; the finalization protocol depends on
//! that.

use serde::{Deserialize, Serialize};

use tessera_core::BudgetParams;

use crate::proposal::{ProposalHash, ProposalStore};
use crate::vote::VoteLedger;

/// One row of the projection, the full field set a budget projection
/// query returns.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProjectedProposal {
    pub name: String,
    pub url: String,
    pub hash: ProposalHash,
    pub fee_tx: String,
    pub block_start: u64,
    pub block_end: u64,
    pub total_payment_count: u32,
    pub remaining_payment_count: u32,
    pub payment_address: String,
    /// Yes share of decided votes
    pub ratio: f64,
    pub yeas: u64,
    pub nays: u64,
    pub abstains: u64,
    pub total_payment: u64,
    pub monthly_payment: u64,
    pub established: bool,
    pub valid: bool,
    /// Why the proposal was invalidated; empty while `valid` is true
    pub invalid_reason: String,
    /// Amount this proposal receives in the cycle if it is in the paid set;
    /// otherwise the projected per-cycle amount, reported for ranking only
    pub allotted: u64,
    /// Running total of allotted amounts up to and including this row
    pub total_budget_allotted: u64,
    /// False when the per-cycle cap excluded this proposal from payment
    pub in_paid_set: bool,
}

/// Rank established, valid proposals and walk the per-cycle budget cap.
///
/// Ordering: net score (yes - no) descending, ties broken by ascending
/// lexicographic proposal hash. Hex hashes make string order equal byte
/// order, so the tie-break is content-derived and arrival-independent.
///
/// The paid set takes proposals in rank order while they carry a positive
/// net score and still fit under the cap; everything else is listed with
/// its projected amount but excluded from payment.
pub fn project(
    store: &ProposalStore,
    ledger: &VoteLedger,
    params: &BudgetParams,
    current_height: u64,
) -> Vec<ProjectedProposal> {
    let target = params.next_superblock(current_height);

    let mut ranked: Vec<(i64, ProposalHash)> = store
        .all()
        .filter(|(_, p)| p.established && p.valid && p.is_active_at(target, params.budget_cycle_blocks))
        .map(|(hash, _)| (ledger.tally(hash).net(), hash.clone()))
        .collect();
    ranked.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)));

    let mut rows = Vec::with_capacity(ranked.len());
    let mut allotted_so_far = 0u64;
    for (net, hash) in ranked {
        let proposal = match store.get(&hash) {
            Some(p) => p,
            None => continue,
        };
        let tally = ledger.tally(&hash);

        let headroom = params.total_budget_per_cycle.saturating_sub(allotted_so_far);
        let fits = net > 0 && proposal.amount_per_cycle <= headroom;
        if fits {
            allotted_so_far = allotted_so_far.saturating_add(proposal.amount_per_cycle);
        }

        rows.push(ProjectedProposal {
            name: proposal.name.clone(),
            url: proposal.url.clone(),
            hash: hash.clone(),
            fee_tx: proposal.fee_tx.clone(),
            block_start: proposal.block_start,
            block_end: proposal.block_end(params.budget_cycle_blocks),
            total_payment_count: proposal.total_payment_count,
            remaining_payment_count: proposal.remaining_payment_count,
            payment_address: proposal.payment_address.clone(),
            ratio: tally.ratio(),
            yeas: tally.yes,
            nays: tally.no,
            abstains: tally.abstains,
            total_payment: proposal.total_payment(),
            monthly_payment: proposal.amount_per_cycle,
            established: proposal.established,
            valid: proposal.valid,
            invalid_reason: proposal.invalid_reason.clone(),
            allotted: proposal.amount_per_cycle,
            total_budget_allotted: allotted_so_far,
            in_paid_set: fits,
        });
    }
    rows
}

/// Projection row for a single proposal, including ones the ranked view
/// excludes (unestablished, invalid, or outside their payment window).
/// Paid-set membership and the running total come from the full projection
/// at the same height; an excluded proposal reports its per-cycle amount
/// with `in_paid_set` false.
pub fn describe(
    store: &ProposalStore,
    ledger: &VoteLedger,
    params: &BudgetParams,
    current_height: u64,
    hash: &str,
) -> Option<ProjectedProposal> {
    if let Some(row) = project(store, ledger, params, current_height)
        .into_iter()
        .find(|row| row.hash == hash)
    {
        return Some(row);
    }

    let proposal = store.get(hash)?;
    let tally = ledger.tally(hash);
    Some(ProjectedProposal {
        name: proposal.name.clone(),
        url: proposal.url.clone(),
        hash: hash.to_string(),
        fee_tx: proposal.fee_tx.clone(),
        block_start: proposal.block_start,
        block_end: proposal.block_end(params.budget_cycle_blocks),
        total_payment_count: proposal.total_payment_count,
        remaining_payment_count: proposal.remaining_payment_count,
        payment_address: proposal.payment_address.clone(),
        ratio: tally.ratio(),
        yeas: tally.yes,
        nays: tally.no,
        abstains: tally.abstains,
        total_payment: proposal.total_payment(),
        monthly_payment: proposal.amount_per_cycle,
        established: proposal.established,
        valid: proposal.valid,
        invalid_reason: proposal.invalid_reason.clone(),
        allotted: proposal.amount_per_cycle,
        total_budget_allotted: 0,
        in_paid_set: false,
    })
}

/// The ordered proposal hashes that actually get paid this cycle
pub fn paid_set(
    store: &ProposalStore,
    ledger: &VoteLedger,
    params: &BudgetParams,
    current_height: u64,
) -> Vec<ProposalHash> {
    project(store, ledger, params, current_height)
        .into_iter()
        .filter(|row| row.in_paid_set)
        .map(|row| row.hash)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vote::{BudgetVote, VoteValue};
    use tessera_core::constants::{FEE_COLLECTION_ADDRESS, PROPOSAL_FEE};
    use tessera_core::MemoryChain;
    use tessera_crypto::KeyPair;
    use tessera_masternode::MasternodeRegistry;

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

    fn add_proposal(net: &mut Net, name: &str, amount: u64) -> ProposalHash {
        let mut chain = MemoryChain::new();
        chain.set_height(100);
        let fee_tx = format!("fee-{}", name);
        chain.confirm_fee_tx(&fee_tx, PROPOSAL_FEE, FEE_COLLECTION_ADDRESS);
        chain.advance(3);
        let hash = net
            .store
            .submit(
                &chain,
                &net.params,
                name,
                &format!("https://e.org/{}", name),
                2,
                145,
                &format!("addr-{}", name),
                amount,
                &fee_tx,
            )
            .unwrap();
        net.store.update_maturity(110, &net.params);
        hash
    }

    fn vote(net: &mut Net, voter: usize, hash: &str, value: VoteValue, timestamp: u64) {
        let id = format!("mn{}", voter + 1);
        let vote = BudgetVote::signed(&net.keys[voter], &id, hash, value, timestamp);
        net.ledger.cast_vote(&net.store, &net.registry, vote).unwrap();
    }

    #[test]
    fn test_ranking_by_net_score() {
        let mut net = network(3);
        let a = add_proposal(&mut net, "a", 300);
        let b = add_proposal(&mut net, "b", 300);

        vote(&mut net, 0, &a, VoteValue::Yes, 1000);
        vote(&mut net, 1, &a, VoteValue::Yes, 1000);
        vote(&mut net, 2, &b, VoteValue::Yes, 1000);

        let rows = project(&net.store, &net.ledger, &net.params, 120);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].hash, a);
        assert_eq!(rows[0].yeas, 2);
        assert_eq!(rows[0].total_budget_allotted, 300);
        assert_eq!(rows[1].hash, b);
        assert_eq!(rows[1].total_budget_allotted, 600);
    }

    #[test]
    fn test_tie_break_by_hash() {
        let mut net = network(1);
        let a = add_proposal(&mut net, "a", 300);
        let b = add_proposal(&mut net, "b", 300);

        // No votes at all: both rank at net score 0, lexicographically
        // smaller hash wins the tie.
        let rows = project(&net.store, &net.ledger, &net.params, 120);
        let mut expected = vec![a, b];
        expected.sort();
        assert_eq!(rows[0].hash, expected[0]);
        assert_eq!(rows[1].hash, expected[1]);
    }

    #[test]
    fn test_budget_cap_exclusion() {
        let mut net = network(2);
        net.params.total_budget_per_cycle = 500;
        let a = add_proposal(&mut net, "a", 300);
        let b = add_proposal(&mut net, "b", 300);

        vote(&mut net, 0, &a, VoteValue::Yes, 1000);
        vote(&mut net, 1, &a, VoteValue::Yes, 1000);
        vote(&mut net, 0, &b, VoteValue::Yes, 1001);

        let rows = project(&net.store, &net.ledger, &net.params, 120);
        assert!(rows[0].in_paid_set);
        // Second proposal would push the total to 600 > 500.
        assert!(!rows[1].in_paid_set);
        assert_eq!(rows[1].allotted, 300, "projected value still reported");
        assert_eq!(rows[1].total_budget_allotted, 300);

        let paid = paid_set(&net.store, &net.ledger, &net.params, 120);
        assert_eq!(paid, vec![a]);
        assert!(!paid.contains(&b));
    }

    #[test]
    fn test_cap_walk_handles_cap_scale_amounts() {
        let mut net = network(2);
        net.params.total_budget_per_cycle = u64::MAX;
        let a = add_proposal(&mut net, "a", u64::MAX);
        let b = add_proposal(&mut net, "b", u64::MAX);

        vote(&mut net, 0, &a, VoteValue::Yes, 1000);
        vote(&mut net, 0, &b, VoteValue::Yes, 1001);
        vote(&mut net, 1, &a, VoteValue::Yes, 1002);

        // Two proposals each the size of the whole cap: the first fills it,
        // the second must fall out of the paid set, with no wraparound in
        // the running totals.
        let rows = project(&net.store, &net.ledger, &net.params, 120);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].hash, a);
        assert!(rows[0].in_paid_set);
        assert_eq!(rows[0].total_budget_allotted, u64::MAX);
        assert!(!rows[1].in_paid_set);
        assert_eq!(rows[1].total_budget_allotted, u64::MAX);
        assert_eq!(paid_set(&net.store, &net.ledger, &net.params, 120), vec![a]);
    }

    #[test]
    fn test_projection_rows_carry_invalid_reason() {
        let mut net = network(1);
        let a = add_proposal(&mut net, "a", 300);
        vote(&mut net, 0, &a, VoteValue::Yes, 1000);

        let rows = project(&net.store, &net.ledger, &net.params, 120);
        assert!(rows[0].valid);
        assert_eq!(rows[0].invalid_reason, "");
    }

    #[test]
    fn test_unsupported_proposal_not_paid() {
        let mut net = network(2);
        let a = add_proposal(&mut net, "a", 300);
        let b = add_proposal(&mut net, "b", 300);

        vote(&mut net, 0, &a, VoteValue::Yes, 1000);
        vote(&mut net, 0, &b, VoteValue::Yes, 1001);
        vote(&mut net, 1, &b, VoteValue::No, 1002);

        // b nets zero: listed, never paid.
        let rows = project(&net.store, &net.ledger, &net.params, 120);
        assert_eq!(rows.len(), 2);
        assert_eq!(paid_set(&net.store, &net.ledger, &net.params, 120), vec![a]);
        assert!(!rows[1].in_paid_set);
    }

    #[test]
    fn test_unestablished_and_invalid_excluded() {
        let mut net = network(1);
        let a = add_proposal(&mut net, "a", 300);

        // Exhaust the proposal and sweep validity.
        net.store.record_payment(&a).unwrap();
        net.store.record_payment(&a).unwrap();
        net.store.update_validity(120, &net.params);

        assert!(project(&net.store, &net.ledger, &net.params, 120).is_empty());
    }

    #[test]
    fn test_describe_covers_excluded_proposals() {
        let mut net = network(1);
        let a = add_proposal(&mut net, "a", 300);
        vote(&mut net, 0, &a, VoteValue::Yes, 1000);

        let row = describe(&net.store, &net.ledger, &net.params, 120, &a).unwrap();
        assert!(row.in_paid_set);
        assert_eq!(row.yeas, 1);

        // Exhaust the proposal: gone from the projection, still queryable.
        net.store.record_payment(&a).unwrap();
        net.store.record_payment(&a).unwrap();
        net.store.update_validity(120, &net.params);
        assert!(project(&net.store, &net.ledger, &net.params, 120).is_empty());

        let row = describe(&net.store, &net.ledger, &net.params, 120, &a).unwrap();
        assert!(!row.valid);
        assert_eq!(row.invalid_reason, "no payments remaining");
        assert!(!row.in_paid_set);
        assert_eq!(row.remaining_payment_count, 0);

        assert!(describe(&net.store, &net.ledger, &net.params, 120, "deadbeef").is_none());
    }

    #[test]
    fn test_projection_is_deterministic() {
        let mut net = network(3);
        let a = add_proposal(&mut net, "a", 300);
        let b = add_proposal(&mut net, "b", 200);
        vote(&mut net, 0, &a, VoteValue::Yes, 1000);
        vote(&mut net, 1, &b, VoteValue::Yes, 1000);
        vote(&mut net, 2, &a, VoteValue::No, 1000);

        let first = project(&net.store, &net.ledger, &net.params, 120);
        for _ in 0..5 {
            assert_eq!(project(&net.store, &net.ledger, &net.params, 120), first);
        }
        // Byte-identical through serialization as well.
        let encoded = serde_json::to_vec(&first).unwrap();
        assert_eq!(serde_json::to_vec(&project(&net.store, &net.ledger, &net.params, 120)).unwrap(), encoded);
    }
}
