use crate::core::MintSettings;
use crate::error::{BlockchainError, Result};
use crate::network::events::PeerAddr;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

static DEFAULT_NODE_HOST: &str = "0.0.0.0";
const DEFAULT_NODE_PORT: u16 = 5000;

const NODE_ADDRESS_KEY: &str = "NODE_ADDRESS";
const OWNER_ADDRESS_KEY: &str = "OWNER_ADDRESS";
const WALLET_KEY_KEY: &str = "WALLET_KEY";
const AUTO_MINT_KEY: &str = "AUTO_MINT";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Interface the listener binds to
    pub host: String,
    /// 0 lets the OS pick
    pub port: u16,
    /// Host peers should dial back; defaults to `host`
    pub advertised_host: Option<String>,
    /// `host:port` of peers to connect to at startup
    pub peers: Vec<String>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        NodeConfig {
            host: DEFAULT_NODE_HOST.to_string(),
            port: DEFAULT_NODE_PORT,
            advertised_host: None,
            peers: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsensusConfig {
    /// Address credited by this node's genesis block; the node wallet when unset
    pub owner_address: Option<String>,
    pub stake_tick_secs: i64,
    pub mint_poll_interval_ms: u64,
    /// Keep minting in the background while the node runs
    pub auto_mint: bool,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        let mint = MintSettings::default();
        ConsensusConfig {
            owner_address: None,
            stake_tick_secs: mint.stake_tick_secs,
            mint_poll_interval_ms: mint.poll_interval.as_millis() as u64,
            auto_mint: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WalletConfig {
    /// Hex PKCS#8 private key; a fresh key is generated when unset
    pub private_key: Option<String>,
}

/// Node configuration: defaults, then an optional TOML file, then the environment
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub node: NodeConfig,
    pub consensus: ConsensusConfig,
    pub wallet: WalletConfig,
}

impl Config {
    /// Build the configuration from `path` (if any) and the process environment
    pub fn load(path: Option<&Path>) -> Result<Config> {
        let mut config = match path {
            Some(path) => Config::from_file(path)?,
            None => Config::default(),
        };
        config.apply_env(|key| env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Config> {
        let text = fs::read_to_string(path).map_err(|e| {
            BlockchainError::Config(format!("Failed to read {}: {e}", path.display()))
        })?;
        Config::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Config> {
        Ok(toml::from_str(text)?)
    }

    /// Override settings from environment-style variables. `lookup` returns a variable's value.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(addr) = lookup(NODE_ADDRESS_KEY) {
            let addr = PeerAddr::parse(&addr)
                .map_err(|e| BlockchainError::Config(format!("{NODE_ADDRESS_KEY}: {e}")))?;
            self.node.host = addr.host;
            self.node.port = addr.port;
        }
        if let Some(owner) = lookup(OWNER_ADDRESS_KEY) {
            self.consensus.owner_address = Some(owner);
        }
        if let Some(key) = lookup(WALLET_KEY_KEY) {
            self.wallet.private_key = Some(key);
        }
        if let Some(flag) = lookup(AUTO_MINT_KEY) {
            self.consensus.auto_mint = parse_flag(&flag)
                .ok_or_else(|| BlockchainError::Config(format!("{AUTO_MINT_KEY}: {flag:?}")))?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.node.host.is_empty() {
            return Err(BlockchainError::Config("node.host is empty".to_string()));
        }
        if self.consensus.stake_tick_secs <= 0 {
            return Err(BlockchainError::Config(
                "consensus.stake_tick_secs must be positive".to_string(),
            ));
        }
        for peer in &self.node.peers {
            PeerAddr::parse(peer)
                .map_err(|e| BlockchainError::Config(format!("node.peers: {e}")))?;
        }
        Ok(())
    }

    pub fn mint_settings(&self) -> MintSettings {
        MintSettings {
            stake_tick_secs: self.consensus.stake_tick_secs,
            poll_interval: Duration::from_millis(self.consensus.mint_poll_interval_ms),
        }
    }

    /// Bootstrap peers, already checked by [`Config::validate`]
    pub fn peer_addrs(&self) -> Vec<PeerAddr> {
        self.node
            .peers
            .iter()
            .filter_map(|peer| PeerAddr::parse(peer).ok())
            .collect()
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.node.host, "0.0.0.0");
        assert_eq!(config.node.port, 5000);
        assert!(!config.consensus.auto_mint);
        assert_eq!(config.mint_settings(), MintSettings::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[node]
port = 5001
peers = ["localhost:5000"]

[consensus]
auto_mint = true
"#
        )
        .unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.node.port, 5001);
        assert_eq!(config.node.host, "0.0.0.0");
        assert_eq!(config.peer_addrs(), vec![PeerAddr::new("localhost", 5000)]);
        assert!(config.consensus.auto_mint);
        assert_eq!(config.consensus.stake_tick_secs, 1);
    }

    #[test]
    fn test_invalid_toml_is_config_error() {
        let err = Config::from_toml("[node]\nport = \"many\"").unwrap_err();
        assert!(matches!(err, BlockchainError::Config(_)));
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = Config::from_file(&dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, BlockchainError::Config(_)));
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("NODE_ADDRESS", "127.0.0.1:6000"),
            ("OWNER_ADDRESS", "abcd"),
            ("AUTO_MINT", "yes"),
        ]);
        let mut config = Config::default();
        config
            .apply_env(|key| vars.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.node.host, "127.0.0.1");
        assert_eq!(config.node.port, 6000);
        assert_eq!(config.consensus.owner_address.as_deref(), Some("abcd"));
        assert!(config.consensus.auto_mint);
        assert_eq!(config.wallet.private_key, None);
    }

    #[test]
    fn test_bad_env_values_rejected() {
        let mut config = Config::default();
        assert!(config
            .apply_env(|key| (key == "NODE_ADDRESS").then(|| "nowhere".to_string()))
            .is_err());
        assert!(config
            .apply_env(|key| (key == "AUTO_MINT").then(|| "maybe".to_string()))
            .is_err());
    }

    #[test]
    fn test_validate_rejects_bad_peers_and_ticks() {
        let mut config = Config::default();
        config.node.peers.push("localhost".to_string());
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.consensus.stake_tick_secs = 0;
        assert!(config.validate().is_err());
    }
}
