//! Core ledger functionality
//!
//! This module contains the fundamental components of the ledger: blocks, transactions,
//! difficulty retargeting, proof-of-stake eligibility, whole-chain validation and the
//! `Blockchain` service that ties them together.

pub mod block;
pub mod blockchain;
pub mod chain;
pub mod difficulty;
pub mod monetary;
pub mod proof_of_stake;
pub mod transaction;

pub use block::Block;
pub use blockchain::{Blockchain, MintOutcome, MintSettings};
pub use chain::{accumulated_difficulty, is_structurally_valid, replay_chain};
pub use difficulty::DifficultyAdjustment;
pub use monetary::{
    CHAIN_ADDRESS, COINBASE_AMOUNT, GENESIS_BLOCK_INDEX, OWNER_INIT_AMOUNT, VALIDATOR_AMOUNT,
};
pub use proof_of_stake::{find_block, validate_stake, CancelToken};
pub use transaction::{OutPoint, Transaction, TransactionIn, TransactionKind, TransactionOut};
