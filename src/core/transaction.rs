// Transactions move value by consuming unspent outputs and creating new ones.
// The id is a hash over inputs (without signatures), outputs and kind, so a transaction can be
// built unsigned, hashed once, and then signed input by input over that id.

use crate::core::monetary::coinbase_amount_for;
use crate::error::{BlockchainError, Result};
use crate::utils::{sha256_hex, verify_hex_signature};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};

/// What a transaction is for. Parsing is strict: an unknown kind is a decoding error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TransactionKind {
    Coinbase,
    Stake,
    Validator,
    Transfer,
}

impl TransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::Coinbase => "COINBASE",
            TransactionKind::Stake => "STAKE",
            TransactionKind::Validator => "VALIDATOR",
            TransactionKind::Transfer => "TRANSFER",
        }
    }
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reference to one output of one transaction
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OutPoint {
    pub tx_id: String,
    pub out_index: u64,
}

impl fmt::Display for OutPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.tx_id, self.out_index)
    }
}

/// Spends output `source_out_index` of transaction `source_tx_id`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionIn {
    #[serde(rename = "transaction_out_id")]
    source_tx_id: String,
    #[serde(rename = "transaction_out_index")]
    source_out_index: u64,
    signature: String,
}

impl TransactionIn {
    /// An unsigned input; the signature is filled in once the transaction id is known
    pub fn new(source_tx_id: &str, source_out_index: u64) -> TransactionIn {
        TransactionIn {
            source_tx_id: source_tx_id.to_string(),
            source_out_index,
            signature: String::new(),
        }
    }

    pub fn get_source_tx_id(&self) -> &str {
        self.source_tx_id.as_str()
    }

    pub fn get_source_out_index(&self) -> u64 {
        self.source_out_index
    }

    pub fn get_signature(&self) -> &str {
        self.signature.as_str()
    }

    pub fn outpoint(&self) -> OutPoint {
        OutPoint {
            tx_id: self.source_tx_id.clone(),
            out_index: self.source_out_index,
        }
    }
}

// Identity is the referenced output; the signature does not take part
impl PartialEq for TransactionIn {
    fn eq(&self, other: &Self) -> bool {
        self.source_tx_id == other.source_tx_id && self.source_out_index == other.source_out_index
    }
}

impl Eq for TransactionIn {}

impl Hash for TransactionIn {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.source_tx_id.hash(state);
        self.source_out_index.hash(state);
    }
}

/// Pays `amount` to whoever holds the key for `address`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionOut {
    address: String,
    amount: u64,
}

impl TransactionOut {
    pub fn new(address: &str, amount: u64) -> TransactionOut {
        TransactionOut {
            address: address.to_string(),
            amount,
        }
    }

    pub fn get_address(&self) -> &str {
        self.address.as_str()
    }

    pub fn get_amount(&self) -> u64 {
        self.amount
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "TransactionData", into = "TransactionData")]
pub struct Transaction {
    id: String,
    ins: Vec<TransactionIn>,
    outs: Vec<TransactionOut>,
    kind: TransactionKind,
}

/// Wire shape of a transaction. The transmitted id must match the recomputed one.
#[derive(Serialize, Deserialize)]
struct TransactionData {
    id: String,
    transaction_ins: Vec<TransactionIn>,
    transaction_outs: Vec<TransactionOut>,
    #[serde(rename = "type")]
    kind: TransactionKind,
}

impl TryFrom<TransactionData> for Transaction {
    type Error = BlockchainError;

    fn try_from(data: TransactionData) -> Result<Self> {
        let tx = Transaction::new(data.transaction_ins, data.transaction_outs, data.kind);
        if tx.id != data.id {
            return Err(BlockchainError::Transaction(format!(
                "Transaction id mismatch: received {}, computed {}",
                data.id, tx.id
            )));
        }
        Ok(tx)
    }
}

impl From<Transaction> for TransactionData {
    fn from(tx: Transaction) -> Self {
        TransactionData {
            id: tx.id,
            transaction_ins: tx.ins,
            transaction_outs: tx.outs,
            kind: tx.kind,
        }
    }
}

impl Transaction {
    pub fn new(
        ins: Vec<TransactionIn>,
        outs: Vec<TransactionOut>,
        kind: TransactionKind,
    ) -> Transaction {
        let id = Self::compute_id(&ins, &outs, kind);
        Transaction {
            id,
            ins,
            outs,
            kind,
        }
    }

    /// The single reward transaction of the block at `block_index`
    pub fn new_coinbase(address: &str, block_index: u64) -> Transaction {
        let tx_in = TransactionIn::new("", block_index);
        let tx_out = TransactionOut::new(address, coinbase_amount_for(block_index));
        Transaction::new(vec![tx_in], vec![tx_out], TransactionKind::Coinbase)
    }

    pub fn compute_id(
        ins: &[TransactionIn],
        outs: &[TransactionOut],
        kind: TransactionKind,
    ) -> String {
        let mut content = String::new();
        for tx_in in ins {
            content.push_str(&tx_in.source_tx_id);
            content.push_str(&tx_in.source_out_index.to_string());
        }
        for tx_out in outs {
            content.push_str(&tx_out.address);
            content.push_str(&tx_out.amount.to_string());
        }
        content.push_str(kind.as_str());
        sha256_hex(content.as_bytes())
    }

    /// Attach one signature per input. The id is unaffected.
    pub fn with_signatures(mut self, signatures: Vec<String>) -> Option<Transaction> {
        if signatures.len() != self.ins.len() {
            return None;
        }
        for (tx_in, signature) in self.ins.iter_mut().zip(signatures) {
            tx_in.signature = signature;
        }
        Some(self)
    }

    pub fn is_coinbase(&self) -> bool {
        self.kind == TransactionKind::Coinbase
    }

    /// True when the first input carries a valid signature by `public_key` over the id.
    /// STAKE and VALIDATOR transactions are attributed to their signer this way.
    pub fn is_signed_by(&self, public_key: &str) -> bool {
        self.ins
            .first()
            .map(|tx_in| verify_hex_signature(&self.id, &tx_in.signature, public_key))
            .unwrap_or(false)
    }

    /// Sum of all output amounts, `None` on overflow
    pub fn output_total(&self) -> Option<u64> {
        self.outs
            .iter()
            .try_fold(0u64, |total, out| total.checked_add(out.amount))
    }

    pub fn get_id(&self) -> &str {
        self.id.as_str()
    }

    pub fn get_ins(&self) -> &[TransactionIn] {
        self.ins.as_slice()
    }

    pub fn get_outs(&self) -> &[TransactionOut] {
        self.outs.as_slice()
    }

    pub fn get_kind(&self) -> TransactionKind {
        self.kind
    }

    pub fn to_value(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }

    pub fn from_value(value: serde_json::Value) -> Result<Transaction> {
        Ok(serde_json::from_value(value)?)
    }
}
