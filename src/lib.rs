//! # Stake Chain
//!
//! A proof-of-stake blockchain node with a UTXO ledger and a small TCP peer protocol.
//! Everything lives in memory; a node starts from its own genesis block and adopts any
//! valid chain from its peers that carries at least as much accumulated difficulty.
//!
//! ## How the code is organized
//! - `core/`: blocks, transactions, difficulty, stake eligibility and the [`Blockchain`] service
//! - `storage/`: the UTXO set with its validation rules, and the transaction pool
//! - `wallet/`: ECDSA P-256 keys, coin selection and transaction signing
//! - `network/`: the peer transport and the [`Server`] that ties it to the ledger
//! - `config/`: node settings from TOML and the environment
//! - `utils/`: hashing, signatures, canonical JSON
//! - `cli/`: command-line parsing for the node binary
//!
//! ## Where to start reading
//! 1. `core/blockchain.rs` for minting and fork choice
//! 2. `storage/utxo_set.rs` for what makes a transaction or block valid
//! 3. `network/server.rs` for what each peer message does

pub mod cli;
pub mod config;
pub mod core;
pub mod error;
pub mod network;
pub mod storage;
pub mod utils;
pub mod wallet;

#[cfg(test)]
pub mod testnet;

// Re-export commonly used types for convenience
pub use cli::{Command, Opt};
pub use config::Config;
pub use core::{
    Block, Blockchain, CancelToken, MintOutcome, MintSettings, OutPoint, Transaction,
    TransactionIn, TransactionKind, TransactionOut,
};
pub use error::{BlockchainError, Result};
pub use network::{Message, NodeEvent, P2PNode, Payload, PeerAddr, PeerInfo, Server, WalletInfo};
pub use storage::{TransactionPool, UTXOSet, UnspentTransactionOut};
pub use utils::{current_timestamp, sha256_hex};
pub use wallet::Wallet;
