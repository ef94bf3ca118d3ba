//! Ledger state held in memory
//!
//! The unspent output set that the chain replays into, and the pool of transactions
//! waiting to be minted.

pub mod memory_pool;
pub mod utxo_set;

pub use memory_pool::TransactionPool;
pub use utxo_set::{
    process_transactions, validate_block_transactions, validate_transaction, UTXOSet,
    UnspentTransactionOut,
};
