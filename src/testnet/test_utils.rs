//! Test utilities for ledger testing

use crate::core::difficulty::BLOCK_GENERATION_INTERVAL;
use crate::core::{Block, Blockchain, DifficultyAdjustment, MintSettings, Transaction};
use crate::storage::{process_transactions, TransactionPool, UTXOSet};
use crate::wallet::Wallet;

/// Stake the helper chains lock for their minter
pub const TEST_STAKE: u64 = 100;

/// Genesis timestamp of every helper chain
pub const TEST_GENESIS_TIMESTAMP: i64 = 1_700_000_000;

pub fn create_test_wallet() -> Wallet {
    Wallet::new().expect("Failed to create test wallet")
}

/// A genesis-only blockchain owned by `owner`
pub fn create_test_blockchain(owner: &Wallet) -> Blockchain {
    Blockchain::new(owner.get_address(), MintSettings::default())
        .expect("Failed to create test blockchain")
}

/// The UTXO set right after a genesis crediting `owner`
pub fn genesis_utxos(owner: &Wallet) -> UTXOSet {
    let genesis = Block::genesis(owner.get_address(), TEST_GENESIS_TIMESTAMP).unwrap();
    process_transactions(genesis.get_transactions(), &UTXOSet::new(), 0).unwrap()
}

/// A signed transfer from `from`, funded from `utxos` with an empty pool
pub fn signed_transfer(from: &Wallet, to: &str, amount: u64, utxos: &UTXOSet) -> Transaction {
    from.create_transfer(to, amount, utxos, &TransactionPool::new())
        .expect("Failed to build test transfer")
}

/// A valid chain of `length` blocks (at least 1) owned and minted by `owner`.
///
/// Block 1 makes the owner a validator with [`TEST_STAKE`]; later blocks carry only their
/// coinbase. Blocks are spaced exactly one generation interval apart.
pub fn build_chain(owner: &Wallet, length: usize) -> Vec<Block> {
    let genesis = Block::genesis(owner.get_address(), TEST_GENESIS_TIMESTAMP).unwrap();
    let mut utxos = process_transactions(genesis.get_transactions(), &UTXOSet::new(), 0).unwrap();
    let mut chain = vec![genesis];

    while chain.len() < length {
        let tip = &chain[chain.len() - 1];
        let index = tip.get_index() + 1;

        let mut transactions = vec![Transaction::new_coinbase(owner.get_address(), index)];
        if index == 1 {
            let mut pool = TransactionPool::new();
            let validator = owner.create_validator(&utxos, &pool).unwrap();
            pool.add(validator.clone(), &utxos);
            let stake = owner.create_stake(TEST_STAKE, &utxos, &pool).unwrap();
            transactions.push(validator);
            transactions.push(stake);
        }

        let block = Block::new(
            index,
            tip.get_timestamp() + BLOCK_GENERATION_INTERVAL,
            tip.get_hash().to_string(),
            DifficultyAdjustment::next_difficulty(&chain),
            TEST_STAKE,
            owner.get_address().to_string(),
            transactions,
        )
        .unwrap();

        utxos = process_transactions(block.get_transactions(), &utxos, index).unwrap();
        chain.push(block);
    }

    chain
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::chain::replay_chain;

    #[test]
    fn test_create_test_wallets_unique() {
        let a = create_test_wallet();
        let b = create_test_wallet();
        assert_ne!(a.get_address(), b.get_address());
    }

    #[test]
    fn test_build_chain_is_valid() {
        let owner = create_test_wallet();
        for length in [1, 2, 5, 12] {
            let chain = build_chain(&owner, length);
            assert_eq!(chain.len(), length);
            assert!(replay_chain(&chain).is_some(), "length {length}");
        }
    }
}
