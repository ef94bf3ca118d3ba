use crate::core::monetary::GENESIS_BLOCK_INDEX;
use crate::core::Transaction;
use crate::error::{BlockchainError, Result};
use crate::utils::{canonical_json, sha256_hex};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "BlockData", into = "BlockData")]
pub struct Block {
    index: u64,
    timestamp: i64,
    previous_hash: String,
    difficulty: u32,
    minter_balance: u64,
    minter_address: String,
    transactions: Vec<Transaction>,
    hash: String,
}

/// Wire shape of a block. `hash` is carried along but always recomputed on receipt.
#[derive(Serialize, Deserialize)]
struct BlockData {
    index: u64,
    timestamp: i64,
    previous_hash: String,
    difficulty: u32,
    minter_balance: u64,
    minter_address: String,
    transactions: Vec<Transaction>,
    hash: String,
}

// Everything the hash commits to: all block fields except the hash itself
#[derive(Serialize)]
struct HashInput<'a> {
    index: u64,
    timestamp: i64,
    previous_hash: &'a str,
    difficulty: u32,
    minter_balance: u64,
    minter_address: &'a str,
    transactions: &'a [Transaction],
}

impl TryFrom<BlockData> for Block {
    type Error = BlockchainError;

    fn try_from(data: BlockData) -> Result<Self> {
        let block = Block::new(
            data.index,
            data.timestamp,
            data.previous_hash,
            data.difficulty,
            data.minter_balance,
            data.minter_address,
            data.transactions,
        )?;
        if block.hash != data.hash {
            return Err(BlockchainError::InvalidBlock(format!(
                "Block {} hash mismatch: received {}, computed {}",
                data.index, data.hash, block.hash
            )));
        }
        Ok(block)
    }
}

impl From<Block> for BlockData {
    fn from(block: Block) -> Self {
        BlockData {
            index: block.index,
            timestamp: block.timestamp,
            previous_hash: block.previous_hash,
            difficulty: block.difficulty,
            minter_balance: block.minter_balance,
            minter_address: block.minter_address,
            transactions: block.transactions,
            hash: block.hash,
        }
    }
}

impl Block {
    /// Assemble a block and compute its hash. The fields are fixed from here on.
    pub fn new(
        index: u64,
        timestamp: i64,
        previous_hash: String,
        difficulty: u32,
        minter_balance: u64,
        minter_address: String,
        transactions: Vec<Transaction>,
    ) -> Result<Block> {
        let mut block = Block {
            index,
            timestamp,
            previous_hash,
            difficulty,
            minter_balance,
            minter_address,
            transactions,
            hash: String::new(),
        };
        block.hash = block.calculate_hash()?;
        Ok(block)
    }

    /// The first block: a single coinbase crediting `owner_address` with the initial supply
    pub fn genesis(owner_address: &str, timestamp: i64) -> Result<Block> {
        let coinbase = Transaction::new_coinbase(owner_address, GENESIS_BLOCK_INDEX);
        Block::new(
            GENESIS_BLOCK_INDEX,
            timestamp,
            String::new(),
            0,
            0,
            owner_address.to_string(),
            vec![coinbase],
        )
    }

    /// sha256 hex over the key-sorted JSON of every field but the hash
    pub fn calculate_hash(&self) -> Result<String> {
        let input = HashInput {
            index: self.index,
            timestamp: self.timestamp,
            previous_hash: &self.previous_hash,
            difficulty: self.difficulty,
            minter_balance: self.minter_balance,
            minter_address: &self.minter_address,
            transactions: &self.transactions,
        };
        let json = canonical_json(&input)?;
        Ok(sha256_hex(json.as_bytes()))
    }

    pub fn is_genesis(&self) -> bool {
        self.index == GENESIS_BLOCK_INDEX
    }

    pub fn get_index(&self) -> u64 {
        self.index
    }

    pub fn get_timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn get_previous_hash(&self) -> &str {
        self.previous_hash.as_str()
    }

    pub fn get_difficulty(&self) -> u32 {
        self.difficulty
    }

    pub fn get_minter_balance(&self) -> u64 {
        self.minter_balance
    }

    pub fn get_minter_address(&self) -> &str {
        self.minter_address.as_str()
    }

    pub fn get_transactions(&self) -> &[Transaction] {
        self.transactions.as_slice()
    }

    pub fn get_hash(&self) -> &str {
        self.hash.as_str()
    }

    /// Create a block with an arbitrary timestamp and difficulty (for testing only)
    #[cfg(test)]
    pub fn new_test_block(index: u64, timestamp: i64, difficulty: u32) -> Block {
        let coinbase = Transaction::new_coinbase("test_minter", index);
        Block::new(
            index,
            timestamp,
            "test_prev_hash".to_string(),
            difficulty,
            0,
            "test_minter".to_string(),
            vec![coinbase],
        )
        .unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::monetary::OWNER_INIT_AMOUNT;
    use serde_json::json;

    #[test]
    fn test_genesis_block() {
        let genesis = Block::genesis("owner", 1_700_000_000).unwrap();

        assert!(genesis.is_genesis());
        assert_eq!(genesis.get_previous_hash(), "");
        assert_eq!(genesis.get_difficulty(), 0);
        assert_eq!(genesis.get_minter_balance(), 0);
        assert_eq!(genesis.get_minter_address(), "owner");

        let txs = genesis.get_transactions();
        assert_eq!(txs.len(), 1);
        assert!(txs[0].is_coinbase());
        assert_eq!(txs[0].get_outs()[0].get_address(), "owner");
        assert_eq!(txs[0].get_outs()[0].get_amount(), OWNER_INIT_AMOUNT);
    }

    #[test]
    fn test_hash_is_deterministic() {
        let a = Block::genesis("owner", 42).unwrap();
        let b = Block::genesis("owner", 42).unwrap();
        assert_eq!(a.get_hash(), b.get_hash());
        assert_eq!(a.get_hash(), a.calculate_hash().unwrap());
        assert_eq!(a.get_hash().len(), 64);

        let later = Block::genesis("owner", 43).unwrap();
        assert_ne!(a.get_hash(), later.get_hash());
    }

    #[test]
    fn test_hash_excludes_hash_field() {
        let block = Block::genesis("owner", 42).unwrap();
        let mut value = serde_json::to_value(&block).unwrap();
        value.as_object_mut().unwrap().remove("hash");

        // serde_json objects are key-sorted, so this is the canonical hash input
        assert_eq!(block.get_hash(), sha256_hex(value.to_string().as_bytes()));
    }

    #[test]
    fn test_wire_round_trip_preserves_hash() {
        let block = Block::new_test_block(3, 1_000, 2);
        let json = serde_json::to_string(&block).unwrap();
        let decoded: Block = serde_json::from_str(&json).unwrap();

        assert_eq!(decoded, block);
        assert_eq!(decoded.get_hash(), block.get_hash());
    }

    #[test]
    fn test_tampered_block_is_rejected() {
        let block = Block::new_test_block(3, 1_000, 2);
        let mut value = serde_json::to_value(&block).unwrap();
        value["minter_balance"] = json!(999);

        assert!(serde_json::from_value::<Block>(value).is_err());
    }

    #[test]
    fn test_wire_field_names() {
        let value = serde_json::to_value(Block::genesis("owner", 7).unwrap()).unwrap();
        for field in [
            "index",
            "timestamp",
            "previous_hash",
            "difficulty",
            "minter_balance",
            "minter_address",
            "transactions",
            "hash",
        ] {
            assert!(value.get(field).is_some(), "missing {field}");
        }
    }
}
