// Whole-chain checks used by fork choice. A candidate chain is trusted only after every block
// has been replayed from genesis into a fresh UTXO set.

use crate::core::proof_of_stake::{is_validator, stake_of, validate_stake};
use crate::core::{Block, DifficultyAdjustment};
use crate::storage::{process_transactions, UTXOSet};
use log::debug;
use num_bigint::BigUint;

/// Σ 2^difficulty over all blocks
pub fn accumulated_difficulty(chain: &[Block]) -> BigUint {
    chain
        .iter()
        .map(|block| BigUint::from(1u8) << block.get_difficulty())
        .sum()
}

/// Every block's `previous_hash` names its predecessor
pub fn is_structurally_valid(chain: &[Block]) -> bool {
    chain
        .windows(2)
        .all(|pair| pair[1].get_previous_hash() == pair[0].get_hash())
}

// Consensus rules for a non-genesis block at position `pos`
fn is_valid_minted_block(chain: &[Block], pos: usize) -> bool {
    let block = &chain[pos];
    let parent = &chain[pos - 1];

    let expected = DifficultyAdjustment::next_difficulty(&chain[..pos]);
    if block.get_difficulty() != expected {
        debug!(
            "Block {} has difficulty {}, expected {expected}",
            block.get_index(),
            block.get_difficulty()
        );
        return false;
    }

    let minter = block.get_minter_address();
    if !validate_stake(
        parent.get_hash(),
        minter,
        block.get_timestamp(),
        block.get_minter_balance(),
        block.get_difficulty(),
    ) {
        debug!("Block {} fails the stake proof", block.get_index());
        return false;
    }

    let history = chain[..=pos].iter().flat_map(|b| b.get_transactions());
    if !is_validator(minter, history.clone()) {
        debug!("Block {} minter {minter} is not a validator", block.get_index());
        return false;
    }

    let stake = stake_of(minter, history);
    if stake != block.get_minter_balance() {
        debug!(
            "Block {} claims stake {}, history holds {stake}",
            block.get_index(),
            block.get_minter_balance()
        );
        return false;
    }

    true
}

/// Validate `chain` from genesis and rebuild its UTXO set.
///
/// Checks linkage, index continuity and, for every block after genesis, the expected
/// difficulty, the stake proof and the minter's validator status and stake.
/// `None` as soon as anything fails.
pub fn replay_chain(chain: &[Block]) -> Option<UTXOSet> {
    let genesis = chain.first()?;
    if !genesis.is_genesis() {
        debug!("Chain does not start at genesis");
        return None;
    }
    if !is_structurally_valid(chain) {
        debug!("Chain has a broken hash link");
        return None;
    }

    let mut utxos = UTXOSet::new();
    for (pos, block) in chain.iter().enumerate() {
        if block.get_index() != genesis.get_index() + pos as u64 {
            debug!("Block at position {pos} has index {}", block.get_index());
            return None;
        }
        if pos > 0 && !is_valid_minted_block(chain, pos) {
            return None;
        }
        utxos = process_transactions(block.get_transactions(), &utxos, block.get_index())?;
    }

    Some(utxos)
}
