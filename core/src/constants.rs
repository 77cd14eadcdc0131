//! Network-wide constants

/// Smallest currency unit (8 decimal places)
pub const COIN: u64 = 100_000_000;

/// Fixed fee a proposal's funding transaction must pay (50 TSA)
pub const PROPOSAL_FEE: u64 = 50 * COIN;

/// Address the proposal fee must be paid to (burn address)
pub const FEE_COLLECTION_ADDRESS: &str = "TSaBurnAddressXXXXXXXXXXXXXXXXXX";

/// Maximum proposal name length
pub const MAX_PROPOSAL_NAME_LEN: usize = 20;

/// Maximum proposal URL length
pub const MAX_PROPOSAL_URL_LEN: usize = 64;

/// Maximum payment cycles a single proposal may request
pub const MAX_PAYMENT_CYCLES: u32 = 6;

/// Maximum proposals a single finalization may list
pub const MAX_FINALIZATION_PAYMENTS: usize = 100;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fee_is_fifty_coins() {
        assert_eq!(PROPOSAL_FEE, 50 * COIN);
    }
}
