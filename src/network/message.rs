use crate::core::{Block, Transaction};
use crate::error::{BlockchainError, Result};
use crate::network::events::Payload;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Application messages exchanged between nodes, tagged by `event`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Message {
    /// Announce a node that accepts connections at `host:port`
    RegisterNode { host: String, port: u16 },
    NewTransaction { transaction: Transaction },
    /// Full chain sent to a peer that just connected
    InitChain { chain: Vec<Block> },
    /// Pool entries are decoded one by one on arrival, so they travel as raw JSON
    InitPool { pool: Vec<Value> },
    /// Full chain after a successful mint
    BlockCreated { chain: Vec<Block> },
}

impl Message {
    pub fn init_pool(transactions: &[Transaction]) -> Result<Message> {
        let pool = transactions
            .iter()
            .map(Transaction::to_value)
            .collect::<Result<Vec<Value>>>()?;
        Ok(Message::InitPool { pool })
    }

    pub fn to_payload(&self) -> Result<Payload> {
        Ok(Payload::Json(serde_json::to_value(self)?))
    }

    pub fn from_payload(payload: &Payload) -> Result<Message> {
        match payload {
            Payload::Json(value) => Ok(serde_json::from_value(value.clone())?),
            Payload::Text(text) => Err(BlockchainError::Network(format!(
                "Expected a JSON message, got text {text:?}"
            ))),
            Payload::Bytes(bytes) => Err(BlockchainError::Network(format!(
                "Expected a JSON message, got {} raw bytes",
                bytes.len()
            ))),
        }
    }
}
