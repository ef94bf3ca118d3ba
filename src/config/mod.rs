//! Configuration management
//!
//! Node settings are loaded once at startup (defaults, an optional TOML file, then
//! environment overrides) and passed down explicitly.

pub mod settings;

pub use settings::{Config, ConsensusConfig, NodeConfig, WalletConfig};
