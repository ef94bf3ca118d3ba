//! Wallet and transaction building
//!
//! Key handling, coin selection with change, and signing of TRANSFER, STAKE and
//! VALIDATOR transactions.

#[allow(clippy::module_inception)]
pub mod wallet;

pub use wallet::Wallet;
