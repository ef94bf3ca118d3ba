use crate::core::{OutPoint, Transaction};
use crate::storage::utxo_set::{validate_transaction, UTXOSet};
use log::{debug, warn};
use serde_json::Value;

/// Transactions waiting to be minted, in arrival order, unique by id.
///
/// The pool carries no lock of its own; it lives inside the chain state and is guarded there.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransactionPool {
    inner: Vec<Transaction>,
}

impl TransactionPool {
    pub fn new() -> TransactionPool {
        TransactionPool { inner: vec![] }
    }

    pub fn contains(&self, tx_id: &str) -> bool {
        self.inner.iter().any(|tx| tx.get_id() == tx_id)
    }

    pub fn get(&self, tx_id: &str) -> Option<&Transaction> {
        self.inner.iter().find(|tx| tx.get_id() == tx_id)
    }

    /// True when some pooled transaction already spends `outpoint`
    pub fn spends(&self, outpoint: &OutPoint) -> bool {
        self.inner
            .iter()
            .flat_map(|tx| tx.get_ins())
            .any(|tx_in| &tx_in.outpoint() == outpoint)
    }

    /// `utxos` as it will look once the pooled transactions are minted in order.
    /// Entries that no longer validate are passed over.
    pub fn pending_utxos(&self, utxos: &UTXOSet) -> UTXOSet {
        let mut view = utxos.clone();
        for tx in &self.inner {
            if validate_transaction(tx, &view) {
                view.apply(tx);
            }
        }
        view
    }

    /// Admit `tx` if it validates against the pending view of `utxos`.
    /// Re-adding a pooled id is a no-op that still reports success.
    pub fn add(&mut self, tx: Transaction, utxos: &UTXOSet) -> bool {
        if self.contains(tx.get_id()) {
            return true;
        }
        if tx.is_coinbase() {
            debug!("Refusing coinbase {} in the pool", tx.get_id());
            return false;
        }
        if let Some(tx_in) = tx.get_ins().iter().find(|i| self.spends(&i.outpoint())) {
            debug!(
                "Refusing transaction {}: {} is already spent in the pool",
                tx.get_id(),
                tx_in.outpoint()
            );
            return false;
        }
        if !validate_transaction(&tx, &self.pending_utxos(utxos)) {
            debug!("Refusing invalid transaction {}", tx.get_id());
            return false;
        }

        self.inner.push(tx);
        true
    }

    /// Replace the contents with every entry of `entries` that decodes, in order.
    /// Nothing beyond decoding is checked here; minting re-validates. Returns the new size.
    pub fn replace(&mut self, entries: Vec<Value>) -> usize {
        self.inner.clear();
        for entry in entries {
            match Transaction::from_value(entry) {
                Ok(tx) if !self.contains(tx.get_id()) => self.inner.push(tx),
                Ok(_) => {}
                Err(e) => warn!("Skipping undecodable pool entry: {e}"),
            }
        }
        self.inner.len()
    }

    /// The pooled transactions that still validate in order against `utxos`, without
    /// mutual conflicts
    pub fn revalidated(&self, utxos: &UTXOSet) -> Vec<Transaction> {
        let mut pool = TransactionPool::new();
        for tx in &self.inner {
            if !pool.add(tx.clone(), utxos) {
                debug!("Dropping stale pool transaction {}", tx.get_id());
            }
        }
        pool.inner
    }

    /// Drop the transactions a new block `minted`, then whatever no longer validates against
    /// the post-block `utxos`. Returns how many stay pooled.
    pub fn settle(&mut self, minted: &[Transaction], utxos: &UTXOSet) -> usize {
        self.inner.retain(|tx| !minted.iter().any(|m| m.get_id() == tx.get_id()));
        self.inner = self.revalidated(utxos);
        self.inner.len()
    }

    pub fn get_all(&self) -> &[Transaction] {
        self.inner.as_slice()
    }

    pub fn clear(&mut self) {
        self.inner.clear();
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}
