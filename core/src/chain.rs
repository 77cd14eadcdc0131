//! Chain-view boundary
//!
//! The governance engine never validates blocks or transactions itself. It
//! reads confirmed fee transactions and the current tip height through
//! `ChainView`, and learns about reorgs through explicit notifications.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub type TxId = String;

/// A confirmed transaction as seen by governance: only the fields needed to
/// validate a proposal fee.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeeTx {
    pub txid: TxId,
    /// Amount paid to the fee collection address
    pub amount: u64,
    pub dest_address: String,
    /// Height the transaction confirmed at
    pub confirmed_height: u64,
}

impl FeeTx {
    pub fn confirmations(&self, tip_height: u64) -> u64 {
        tip_height.saturating_sub(self.confirmed_height) + 1
    }
}

/// Read-only view of the local chain
pub trait ChainView {
    /// Look up a confirmed transaction by id, `None` if unknown or orphaned
    fn get_fee_tx(&self, txid: &str) -> Option<FeeTx>;

    /// Current tip height
    fn tip_height(&self) -> u64;
}

/// In-memory chain view backing a single node (and the test suite)
#[derive(Debug, Clone, Default)]
pub struct MemoryChain {
    txs: HashMap<TxId, FeeTx>,
    height: u64,
}

impl MemoryChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Confirm a fee transaction at the current tip height
    pub fn confirm_fee_tx(&mut self, txid: &str, amount: u64, dest_address: &str) {
        self.txs.insert(
            txid.to_string(),
            FeeTx {
                txid: txid.to_string(),
                amount,
                dest_address: dest_address.to_string(),
                confirmed_height: self.height,
            },
        );
    }

    /// Remove a transaction, as a reorg would
    pub fn orphan_tx(&mut self, txid: &str) -> Option<FeeTx> {
        self.txs.remove(txid)
    }

    pub fn advance(&mut self, blocks: u64) -> u64 {
        self.height += blocks;
        self.height
    }

    pub fn set_height(&mut self, height: u64) {
        self.height = height;
    }
}

impl ChainView for MemoryChain {
    fn get_fee_tx(&self, txid: &str) -> Option<FeeTx> {
        self.txs.get(txid).cloned()
    }

    fn tip_height(&self) -> u64 {
        self.height
    }
}
