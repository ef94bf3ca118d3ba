//! Helpers for unit tests: throwaway wallets, genesis UTXO sets and ready-made valid chains.

pub mod test_utils;

pub use test_utils::*;
