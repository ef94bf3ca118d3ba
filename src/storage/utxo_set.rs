use crate::core::monetary::{coinbase_amount_for, GENESIS_BLOCK_INDEX};
use crate::core::{OutPoint, Transaction};
use crate::utils::verify_hex_signature;
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// A spendable output: output `out_index` of transaction `tx_id`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnspentTransactionOut {
    tx_id: String,
    out_index: u64,
    address: String,
    amount: u64,
}

impl UnspentTransactionOut {
    pub fn new(tx_id: &str, out_index: u64, address: &str, amount: u64) -> UnspentTransactionOut {
        UnspentTransactionOut {
            tx_id: tx_id.to_string(),
            out_index,
            address: address.to_string(),
            amount,
        }
    }

    pub fn get_tx_id(&self) -> &str {
        self.tx_id.as_str()
    }

    pub fn get_out_index(&self) -> u64 {
        self.out_index
    }

    pub fn get_address(&self) -> &str {
        self.address.as_str()
    }

    pub fn get_amount(&self) -> u64 {
        self.amount
    }

    pub fn outpoint(&self) -> OutPoint {
        OutPoint {
            tx_id: self.tx_id.clone(),
            out_index: self.out_index,
        }
    }

    fn is(&self, outpoint: &OutPoint) -> bool {
        self.tx_id == outpoint.tx_id && self.out_index == outpoint.out_index
    }
}

/// The set of currently spendable outputs, in insertion order.
///
/// Never edited by hand: a set is produced by replaying [`process_transactions`] over blocks.
/// At most one entry exists per `(tx_id, out_index)`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UTXOSet {
    outputs: Vec<UnspentTransactionOut>,
}

impl UTXOSet {
    pub fn new() -> UTXOSet {
        UTXOSet { outputs: vec![] }
    }

    pub fn find(&self, outpoint: &OutPoint) -> Option<&UnspentTransactionOut> {
        self.outputs.iter().find(|utxo| utxo.is(outpoint))
    }

    pub fn iter(&self) -> impl Iterator<Item = &UnspentTransactionOut> {
        self.outputs.iter()
    }

    /// Outputs owned by `address`, in set order
    pub fn owned_by<'a>(
        &'a self,
        address: &'a str,
    ) -> impl Iterator<Item = &'a UnspentTransactionOut> + 'a {
        self.outputs
            .iter()
            .filter(move |utxo| utxo.address == address)
    }

    pub fn balance_of(&self, address: &str) -> u64 {
        self.owned_by(address).map(|utxo| utxo.amount).sum()
    }

    pub fn len(&self) -> usize {
        self.outputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outputs.is_empty()
    }

    // Replaces an existing entry with the same key so the set stays duplicate-free
    fn insert(&mut self, utxo: UnspentTransactionOut) {
        let outpoint = utxo.outpoint();
        match self.outputs.iter_mut().find(|existing| existing.is(&outpoint)) {
            Some(existing) => *existing = utxo,
            None => self.outputs.push(utxo),
        }
    }

    /// Spend the inputs of `tx` and add its outputs, without validating anything
    pub fn apply(&mut self, tx: &Transaction) {
        let consumed: HashSet<OutPoint> = tx.get_ins().iter().map(|i| i.outpoint()).collect();
        self.outputs.retain(|utxo| !consumed.contains(&utxo.outpoint()));

        for (idx, out) in tx.get_outs().iter().enumerate() {
            self.insert(UnspentTransactionOut::new(
                tx.get_id(),
                idx as u64,
                out.get_address(),
                out.get_amount(),
            ));
        }
    }
}

impl FromIterator<UnspentTransactionOut> for UTXOSet {
    fn from_iter<I: IntoIterator<Item = UnspentTransactionOut>>(iter: I) -> Self {
        let mut set = UTXOSet::new();
        for utxo in iter {
            set.insert(utxo);
        }
        set
    }
}

/// Check a non-coinbase transaction against `utxos`.
///
/// Every input must resolve to an unspent output whose owner signed the transaction id,
/// and the resolved input total must equal the output total.
pub fn validate_transaction(tx: &Transaction, utxos: &UTXOSet) -> bool {
    if tx.get_ins().is_empty() {
        debug!("Transaction {} has no inputs", tx.get_id());
        return false;
    }

    let mut input_total = 0u64;
    for tx_in in tx.get_ins() {
        let Some(utxo) = utxos.find(&tx_in.outpoint()) else {
            debug!(
                "Transaction {} references unknown output {}",
                tx.get_id(),
                tx_in.outpoint()
            );
            return false;
        };

        if !verify_hex_signature(tx.get_id(), tx_in.get_signature(), utxo.get_address()) {
            debug!(
                "Transaction {} has an invalid signature for {}",
                tx.get_id(),
                tx_in.outpoint()
            );
            return false;
        }

        input_total = match input_total.checked_add(utxo.get_amount()) {
            Some(total) => total,
            None => return false,
        };
    }

    match tx.output_total() {
        Some(output_total) if output_total == input_total => true,
        Some(output_total) => {
            debug!(
                "Transaction {} is unbalanced: inputs={input_total}, outputs={output_total}",
                tx.get_id()
            );
            false
        }
        None => false,
    }
}

fn validate_coinbase(coinbase: &Transaction, block_index: u64) -> bool {
    let [tx_in] = coinbase.get_ins() else {
        return false;
    };
    let [tx_out] = coinbase.get_outs() else {
        return false;
    };

    tx_in.get_source_tx_id().is_empty()
        && tx_in.get_source_out_index() == block_index
        && tx_out.get_amount() == coinbase_amount_for(block_index)
}

/// Check a whole block's transaction list.
///
/// Exactly one well-formed coinbase and no output spent twice within the block. The other
/// transactions are checked in block order, each against `utxos` as updated by the ones
/// before it, so a transaction may spend an output created earlier in the same block.
pub fn validate_block_transactions(txs: &[Transaction], utxos: &UTXOSet, block_index: u64) -> bool {
    apply_block(txs, utxos, block_index).is_some()
}

fn apply_block(txs: &[Transaction], utxos: &UTXOSet, block_index: u64) -> Option<UTXOSet> {
    let coinbases: Vec<&Transaction> = txs.iter().filter(|tx| tx.is_coinbase()).collect();
    let [coinbase] = coinbases.as_slice() else {
        debug!(
            "Block {block_index} has {} coinbase transactions",
            coinbases.len()
        );
        return None;
    };

    if !validate_coinbase(coinbase, block_index) {
        debug!("Block {block_index} has a malformed coinbase");
        return None;
    }

    let mut referenced = HashSet::new();
    for tx_in in txs.iter().filter(|tx| !tx.is_coinbase()).flat_map(|tx| tx.get_ins()) {
        if !referenced.insert(tx_in.outpoint()) {
            debug!(
                "Block {block_index} spends {} more than once",
                tx_in.outpoint()
            );
            return None;
        }
    }

    let mut view = utxos.clone();
    for tx in txs {
        if !tx.is_coinbase() && !validate_transaction(tx, &view) {
            return None;
        }
        view.apply(tx);
    }
    Some(view)
}

/// Apply a block's transactions to `utxos`, returning the updated set.
///
/// `None` when the transactions do not validate; the genesis index is trusted and skips
/// validation. The input set is never modified.
pub fn process_transactions(
    txs: &[Transaction],
    utxos: &UTXOSet,
    block_index: u64,
) -> Option<UTXOSet> {
    if block_index != GENESIS_BLOCK_INDEX {
        return apply_block(txs, utxos, block_index);
    }

    let mut next = utxos.clone();
    for tx in txs {
        next.apply(tx);
    }
    Some(next)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::monetary::{COINBASE_AMOUNT, OWNER_INIT_AMOUNT};
    use crate::core::{TransactionIn, TransactionKind, TransactionOut};
    use crate::testnet::{genesis_utxos, signed_transfer};
    use crate::wallet::Wallet;

    #[test]
    fn test_genesis_is_trusted() {
        let owner = Wallet::new().unwrap();
        // A genesis with a wrong amount still processes: validation is skipped for index 0
        let odd = Transaction::new(
            vec![TransactionIn::new("", 0)],
            vec![TransactionOut::new(owner.get_address(), 3)],
            TransactionKind::Coinbase,
        );
        let utxos = process_transactions(&[odd], &UTXOSet::new(), GENESIS_BLOCK_INDEX).unwrap();
        assert_eq!(utxos.balance_of(owner.get_address()), 3);
    }

    #[test]
    fn test_process_moves_value() {
        let owner = Wallet::new().unwrap();
        let recipient = Wallet::new().unwrap();
        let utxos = genesis_utxos(&owner);

        let transfer = signed_transfer(&owner, recipient.get_address(), 300, &utxos);
        let coinbase = Transaction::new_coinbase(owner.get_address(), 1);

        let next = process_transactions(&[coinbase, transfer], &utxos, 1).unwrap();
        assert_eq!(next.balance_of(recipient.get_address()), 300);
        assert_eq!(
            next.balance_of(owner.get_address()),
            OWNER_INIT_AMOUNT - 300 + COINBASE_AMOUNT
        );
        // the genesis output is gone, replaced by recipient, change and reward
        assert_eq!(next.len(), 3);
    }

    #[test]
    fn test_processed_set_has_unique_keys() {
        let owner = Wallet::new().unwrap();
        let utxos = genesis_utxos(&owner);
        let coinbase = Transaction::new_coinbase(owner.get_address(), 1);
        let next = process_transactions(&[coinbase], &utxos, 1).unwrap();

        let keys: HashSet<OutPoint> = next.iter().map(|u| u.outpoint()).collect();
        assert_eq!(keys.len(), next.len());
    }

    #[test]
    fn test_insert_replaces_duplicate_key() {
        let set: UTXOSet = vec![
            UnspentTransactionOut::new("tx", 0, "a", 1),
            UnspentTransactionOut::new("tx", 0, "a", 2),
        ]
        .into_iter()
        .collect();
        assert_eq!(set.len(), 1);
        assert_eq!(set.balance_of("a"), 2);
    }

    #[test]
    fn test_validate_transaction_balanced() {
        let owner = Wallet::new().unwrap();
        let utxos = genesis_utxos(&owner);
        let transfer = signed_transfer(&owner, "someone", 10, &utxos);

        assert!(validate_transaction(&transfer, &utxos));
        let resolved: u64 = transfer
            .get_ins()
            .iter()
            .map(|i| utxos.find(&i.outpoint()).unwrap().get_amount())
            .sum();
        assert_eq!(transfer.output_total(), Some(resolved));
    }

    #[test]
    fn test_validate_transaction_unbalanced() {
        let owner = Wallet::new().unwrap();
        let utxos = genesis_utxos(&owner);
        let genesis_out = utxos.iter().next().unwrap().clone();

        let inflated = Transaction::new(
            vec![TransactionIn::new(genesis_out.get_tx_id(), 0)],
            vec![TransactionOut::new("someone", OWNER_INIT_AMOUNT + 1)],
            TransactionKind::Transfer,
        );
        let signature = owner.sign(inflated.get_id()).unwrap();
        let inflated = inflated.with_signatures(vec![signature]).unwrap();

        assert!(!validate_transaction(&inflated, &utxos));
    }

    #[test]
    fn test_validate_transaction_foreign_signature() {
        let owner = Wallet::new().unwrap();
        let thief = Wallet::new().unwrap();
        let utxos = genesis_utxos(&owner);
        let genesis_out = utxos.iter().next().unwrap().clone();

        let theft = Transaction::new(
            vec![TransactionIn::new(genesis_out.get_tx_id(), 0)],
            vec![TransactionOut::new(thief.get_address(), OWNER_INIT_AMOUNT)],
            TransactionKind::Transfer,
        );
        let signature = thief.sign(theft.get_id()).unwrap();
        let theft = theft.with_signatures(vec![signature]).unwrap();

        assert!(!validate_transaction(&theft, &utxos));
    }

    #[test]
    fn test_validate_transaction_unknown_input() {
        let owner = Wallet::new().unwrap();
        let tx = Transaction::new(
            vec![TransactionIn::new("missing", 0)],
            vec![],
            TransactionKind::Transfer,
        );
        assert!(!validate_transaction(&tx, &genesis_utxos(&owner)));
    }

    #[test]
    fn test_two_coinbases_rejected() {
        let owner = Wallet::new().unwrap();
        let utxos = genesis_utxos(&owner);
        let txs = vec![
            Transaction::new_coinbase(owner.get_address(), 1),
            Transaction::new_coinbase("other", 1),
        ];
        assert!(!validate_block_transactions(&txs, &utxos, 1));
        assert!(process_transactions(&txs, &utxos, 1).is_none());
    }

    #[test]
    fn test_missing_coinbase_rejected() {
        let owner = Wallet::new().unwrap();
        let utxos = genesis_utxos(&owner);
        let transfer = signed_transfer(&owner, "someone", 10, &utxos);
        assert!(!validate_block_transactions(&[transfer], &utxos, 1));
    }

    #[test]
    fn test_coinbase_rules() {
        let owner = Wallet::new().unwrap();
        let utxos = genesis_utxos(&owner);

        let wrong_index = Transaction::new_coinbase(owner.get_address(), 2);
        assert!(!validate_block_transactions(&[wrong_index], &utxos, 1));

        let wrong_amount = Transaction::new(
            vec![TransactionIn::new("", 1)],
            vec![TransactionOut::new(owner.get_address(), COINBASE_AMOUNT + 1)],
            TransactionKind::Coinbase,
        );
        assert!(!validate_block_transactions(&[wrong_amount], &utxos, 1));

        let two_outputs = Transaction::new(
            vec![TransactionIn::new("", 1)],
            vec![
                TransactionOut::new(owner.get_address(), COINBASE_AMOUNT),
                TransactionOut::new(owner.get_address(), 0),
            ],
            TransactionKind::Coinbase,
        );
        assert!(!validate_block_transactions(&[two_outputs], &utxos, 1));

        let good = Transaction::new_coinbase(owner.get_address(), 1);
        assert!(validate_block_transactions(&[good], &utxos, 1));
    }

    #[test]
    fn test_double_spend_within_block_rejected() {
        let owner = Wallet::new().unwrap();
        let utxos = genesis_utxos(&owner);
        let first = signed_transfer(&owner, "alice", 10, &utxos);
        let second = signed_transfer(&owner, "bob", 20, &utxos);

        // both are individually valid but spend the same genesis output
        assert!(validate_transaction(&first, &utxos));
        assert!(validate_transaction(&second, &utxos));

        let txs = vec![Transaction::new_coinbase(owner.get_address(), 1), first, second];
        assert!(!validate_block_transactions(&txs, &utxos, 1));
    }

    #[test]
    fn test_failed_processing_leaves_input_untouched() {
        let owner = Wallet::new().unwrap();
        let utxos = genesis_utxos(&owner);
        let before = utxos.clone();
        let txs = vec![
            Transaction::new_coinbase(owner.get_address(), 1),
            Transaction::new_coinbase(owner.get_address(), 1),
        ];
        assert!(process_transactions(&txs, &utxos, 1).is_none());
        assert_eq!(utxos, before);
    }

    #[test]
    fn test_spend_output_created_earlier_in_block() {
        let owner = Wallet::new().unwrap();
        let utxos = genesis_utxos(&owner);
        let first = signed_transfer(&owner, "alice", 10, &utxos);

        // the change output of `first` only exists once `first` is applied
        let mut view = utxos.clone();
        view.apply(&first);
        let second = signed_transfer(&owner, "bob", 20, &view);
        assert!(!validate_transaction(&second, &utxos));

        let coinbase = Transaction::new_coinbase(owner.get_address(), 1);
        let ordered = vec![coinbase.clone(), first.clone(), second.clone()];
        let next = process_transactions(&ordered, &utxos, 1).unwrap();
        assert_eq!(next.balance_of("alice"), 10);
        assert_eq!(next.balance_of("bob"), 20);

        let reversed = vec![coinbase, second, first];
        assert!(!validate_block_transactions(&reversed, &utxos, 1));
    }
}
