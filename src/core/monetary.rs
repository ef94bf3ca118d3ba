//! Monetary constants of the ledger
//!
//! Amounts are whole coins carried as `u64`. The chain owner is credited once in the genesis
//! block; every minted block pays a fixed coinbase to its minter. Stake and validator grants
//! are ordinary payments to [`CHAIN_ADDRESS`], an address nobody holds a key for, so the
//! coins are locked for as long as the chain exists.

/// Index of the genesis block; its transactions are trusted and not validated
pub const GENESIS_BLOCK_INDEX: u64 = 0;

/// Coins credited to the chain owner by the genesis coinbase
pub const OWNER_INIT_AMOUNT: u64 = 1_000;

/// Coins paid to the minter of every non-genesis block
pub const COINBASE_AMOUNT: u64 = 50;

/// Fixed price of the VALIDATOR grant transaction
pub const VALIDATOR_AMOUNT: u64 = 10;

/// Recipient of stake and validator payments
pub const CHAIN_ADDRESS: &str = "chain";

/// Expected coinbase output for the block at `block_index`
pub fn coinbase_amount_for(block_index: u64) -> u64 {
    if block_index == GENESIS_BLOCK_INDEX {
        OWNER_INIT_AMOUNT
    } else {
        COINBASE_AMOUNT
    }
}
