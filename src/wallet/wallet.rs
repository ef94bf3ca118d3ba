use crate::core::monetary::{CHAIN_ADDRESS, VALIDATOR_AMOUNT};
use crate::core::proof_of_stake::{is_validator, stake_of};
use crate::core::{Transaction, TransactionIn, TransactionKind, TransactionOut};
use crate::error::{BlockchainError, Result};
use crate::storage::{TransactionPool, UTXOSet, UnspentTransactionOut};
use data_encoding::HEXLOWER;
use log::{debug, error};
use ring::rand::SystemRandom;
use ring::signature::{EcdsaKeyPair, KeyPair, ECDSA_P256_SHA256_FIXED_SIGNING};

/// An ECDSA P-256 key pair. The address is the lowercase hex of the public key.
#[derive(Clone)]
pub struct Wallet {
    pkcs8: Vec<u8>,
    public_key: Vec<u8>,
    address: String,
}

impl std::fmt::Debug for Wallet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // never print key material
        f.debug_struct("Wallet")
            .field("address", &self.address)
            .finish()
    }
}

impl Wallet {
    pub fn new() -> Result<Wallet> {
        let pkcs8 = crate::utils::new_key_pair()?;
        Wallet::from_pkcs8(pkcs8)
    }

    pub fn from_pkcs8(pkcs8: Vec<u8>) -> Result<Wallet> {
        let rng = SystemRandom::new();
        let key_pair =
            EcdsaKeyPair::from_pkcs8(&ECDSA_P256_SHA256_FIXED_SIGNING, pkcs8.as_ref(), &rng)
                .map_err(|e| {
                    BlockchainError::Wallet(format!("Failed to create key pair from PKCS8: {e}"))
                })?;
        let public_key = key_pair.public_key().as_ref().to_vec();
        let address = HEXLOWER.encode(&public_key);
        Ok(Wallet {
            pkcs8,
            public_key,
            address,
        })
    }

    /// Load a wallet from a hex encoded PKCS#8 document
    pub fn from_hex(pkcs8_hex: &str) -> Result<Wallet> {
        let pkcs8 = HEXLOWER
            .decode(pkcs8_hex.trim().to_lowercase().as_bytes())
            .map_err(|e| BlockchainError::Wallet(format!("Invalid private key hex: {e}")))?;
        Wallet::from_pkcs8(pkcs8)
    }

    pub fn get_address(&self) -> &str {
        self.address.as_str()
    }

    pub fn get_public_key(&self) -> &[u8] {
        self.public_key.as_slice()
    }

    pub fn get_pkcs8(&self) -> &[u8] {
        self.pkcs8.as_slice()
    }

    pub fn pkcs8_hex(&self) -> String {
        HEXLOWER.encode(&self.pkcs8)
    }

    /// Hex signature over the UTF-8 bytes of `message`
    pub fn sign(&self, message: &str) -> Result<String> {
        let signature =
            crate::utils::ecdsa_p256_sha256_sign_digest(&self.pkcs8, message.as_bytes())?;
        Ok(HEXLOWER.encode(&signature))
    }

    /// Build and sign a transaction paying `amount` to `recipient`.
    ///
    /// Coins are taken greedily, in set order, from this wallet's outputs as they will stand
    /// once the pool is minted, so nothing a pooled transaction already spends is picked twice.
    /// Leftover value returns to the wallet as change. `None` for a zero amount, insufficient
    /// funds, or when signing fails.
    pub fn create_transaction(
        &self,
        recipient: &str,
        amount: u64,
        utxos: &UTXOSet,
        pool: &TransactionPool,
        kind: TransactionKind,
    ) -> Option<Transaction> {
        if amount == 0 || kind == TransactionKind::Coinbase {
            return None;
        }

        let spendable = pool.pending_utxos(utxos);
        let (selected, leftover) = self.outs_for_amount(&spendable, amount)?;

        let ins: Vec<TransactionIn> = selected
            .iter()
            .map(|utxo| TransactionIn::new(utxo.get_tx_id(), utxo.get_out_index()))
            .collect();
        let outs = Self::create_outs(recipient, amount, self.get_address(), leftover);

        let unsigned = Transaction::new(ins, outs, kind);
        let signatures = self.signatures_for(&unsigned, &spendable)?;
        unsigned.with_signatures(signatures)
    }

    pub fn create_transfer(
        &self,
        recipient: &str,
        amount: u64,
        utxos: &UTXOSet,
        pool: &TransactionPool,
    ) -> Option<Transaction> {
        self.create_transaction(recipient, amount, utxos, pool, TransactionKind::Transfer)
    }

    /// Lock `amount` as stake by paying it to the chain address
    pub fn create_stake(
        &self,
        amount: u64,
        utxos: &UTXOSet,
        pool: &TransactionPool,
    ) -> Option<Transaction> {
        self.create_transaction(CHAIN_ADDRESS, amount, utxos, pool, TransactionKind::Stake)
    }

    /// Buy the right to mint for the fixed validator price
    pub fn create_validator(&self, utxos: &UTXOSet, pool: &TransactionPool) -> Option<Transaction> {
        self.create_transaction(
            CHAIN_ADDRESS,
            VALIDATOR_AMOUNT,
            utxos,
            pool,
            TransactionKind::Validator,
        )
    }

    fn outs_for_amount<'a>(
        &self,
        spendable: &'a UTXOSet,
        amount: u64,
    ) -> Option<(Vec<&'a UnspentTransactionOut>, u64)> {
        let mut selected = vec![];
        let mut collected = 0u64;
        let owned = spendable
            .iter()
            .filter(|utxo| utxo.get_address() == self.get_address());
        for utxo in owned {
            selected.push(utxo);
            collected = collected.checked_add(utxo.get_amount())?;
            if collected >= amount {
                return Some((selected, collected - amount));
            }
        }

        debug!(
            "Insufficient funds for {}: needed {amount}, available {collected}",
            self.get_address()
        );
        None
    }

    fn create_outs(
        recipient: &str,
        amount: u64,
        change_address: &str,
        leftover: u64,
    ) -> Vec<TransactionOut> {
        let mut outs = vec![TransactionOut::new(recipient, amount)];
        if leftover > 0 {
            outs.push(TransactionOut::new(change_address, leftover));
        }
        outs
    }

    // One signature per input, each over the transaction id; every input must be ours
    fn signatures_for(&self, tx: &Transaction, spendable: &UTXOSet) -> Option<Vec<String>> {
        let mut signatures = Vec::with_capacity(tx.get_ins().len());
        for tx_in in tx.get_ins() {
            let utxo = spendable.find(&tx_in.outpoint())?;
            if utxo.get_address() != self.get_address() {
                debug!("Refusing to sign {}: not owned by this wallet", tx_in.outpoint());
                return None;
            }
            match self.sign(tx.get_id()) {
                Ok(signature) => signatures.push(signature),
                Err(e) => {
                    error!("Failed to sign transaction {}: {e}", tx.get_id());
                    return None;
                }
            }
        }
        Some(signatures)
    }

    pub fn account_balance(&self, utxos: &UTXOSet) -> u64 {
        utxos.balance_of(self.get_address())
    }

    pub fn stake_balance<'a, I>(&self, history: I) -> u64
    where
        I: IntoIterator<Item = &'a Transaction>,
    {
        stake_of(self.get_address(), history)
    }

    pub fn can_validate<'a, I>(&self, history: I) -> bool
    where
        I: IntoIterator<Item = &'a Transaction>,
    {
        is_validator(self.get_address(), history)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::monetary::OWNER_INIT_AMOUNT;
    use crate::storage::validate_transaction;
    use crate::testnet::genesis_utxos;

    #[test]
    fn test_address_is_public_key_hex() {
        let wallet = Wallet::new().unwrap();
        assert_eq!(wallet.get_address(), HEXLOWER.encode(wallet.get_public_key()));
        // uncompressed P-256 point
        assert_eq!(wallet.get_public_key().len(), 65);
    }

    #[test]
    fn test_from_hex_restores_wallet() {
        let wallet = Wallet::new().unwrap();
        let restored = Wallet::from_hex(&wallet.pkcs8_hex()).unwrap();
        assert_eq!(restored.get_address(), wallet.get_address());
        assert!(Wallet::from_hex("zz").is_err());
        assert!(Wallet::from_hex("00ff").is_err());
    }

    #[test]
    fn test_genesis_balance() {
        let owner = Wallet::new().unwrap();
        let other = Wallet::new().unwrap();
        let utxos = genesis_utxos(&owner);

        assert_eq!(owner.account_balance(&utxos), OWNER_INIT_AMOUNT);
        assert_eq!(other.account_balance(&utxos), 0);
    }

    #[test]
    fn test_overspend_build_fails() {
        let owner = Wallet::new().unwrap();
        let utxos = genesis_utxos(&owner);
        let pool = TransactionPool::new();

        assert!(owner
            .create_transfer("someone", OWNER_INIT_AMOUNT + 1, &utxos, &pool)
            .is_none());
        assert!(owner.create_transfer("someone", 0, &utxos, &pool).is_none());
        assert!(pool.is_empty());
    }

    #[test]
    fn test_transfer_with_change() {
        let owner = Wallet::new().unwrap();
        let utxos = genesis_utxos(&owner);
        let tx = owner
            .create_transfer("someone", 300, &utxos, &TransactionPool::new())
            .unwrap();

        assert_eq!(tx.get_kind(), TransactionKind::Transfer);
        assert_eq!(tx.get_outs().len(), 2);
        assert_eq!(tx.get_outs()[0], TransactionOut::new("someone", 300));
        assert_eq!(
            tx.get_outs()[1],
            TransactionOut::new(owner.get_address(), OWNER_INIT_AMOUNT - 300)
        );
        assert!(validate_transaction(&tx, &utxos));
    }

    #[test]
    fn test_exact_amount_has_no_change() {
        let owner = Wallet::new().unwrap();
        let utxos = genesis_utxos(&owner);
        let tx = owner
            .create_transfer("someone", OWNER_INIT_AMOUNT, &utxos, &TransactionPool::new())
            .unwrap();
        assert_eq!(tx.get_outs().len(), 1);
    }

    #[test]
    fn test_pooled_utxo_is_excluded() {
        let owner = Wallet::new().unwrap();
        let utxos = genesis_utxos(&owner);
        let mut pool = TransactionPool::new();

        let first = owner.create_transfer("alice", 100, &utxos, &pool).unwrap();
        assert!(pool.add(first.clone(), &utxos));

        // the genesis output is taken; only the pooled change is left to spend
        let second = owner.create_transfer("bob", 100, &utxos, &pool).unwrap();
        let genesis_out = utxos.iter().next().unwrap().outpoint();
        assert!(second.get_ins().iter().all(|i| i.outpoint() != genesis_out));
        assert_eq!(second.get_ins()[0].get_source_tx_id(), first.get_id());

        // more than the pooled change cannot be built
        assert!(owner
            .create_transfer("carol", OWNER_INIT_AMOUNT - 100 + 1, &utxos, &pool)
            .is_none());
    }

    #[test]
    fn test_stake_and_validator_queries() {
        let owner = Wallet::new().unwrap();
        let stranger = Wallet::new().unwrap();
        let utxos = genesis_utxos(&owner);
        let mut pool = TransactionPool::new();

        let validator = owner.create_validator(&utxos, &pool).unwrap();
        assert_eq!(validator.get_outs()[0], TransactionOut::new(CHAIN_ADDRESS, VALIDATOR_AMOUNT));
        pool.add(validator, &utxos);

        let stake = owner.create_stake(40, &utxos, &pool).unwrap();
        pool.add(stake, &utxos);

        assert!(owner.can_validate(pool.get_all()));
        assert_eq!(owner.stake_balance(pool.get_all()), 40);
        assert!(!stranger.can_validate(pool.get_all()));
        assert_eq!(stranger.stake_balance(pool.get_all()), 0);
    }

    #[test]
    fn test_foreign_utxos_are_not_spent() {
        let owner = Wallet::new().unwrap();
        let thief = Wallet::new().unwrap();
        let utxos = genesis_utxos(&owner);

        assert!(thief
            .create_transfer("thief", 1, &utxos, &TransactionPool::new())
            .is_none());

        // a hand-built transaction over the owner's output cannot be signed by the thief
        let genesis_out = utxos.iter().next().unwrap();
        let unsigned = Transaction::new(
            vec![TransactionIn::new(genesis_out.get_tx_id(), 0)],
            vec![TransactionOut::new("thief", OWNER_INIT_AMOUNT)],
            TransactionKind::Transfer,
        );
        assert!(thief.signatures_for(&unsigned, &utxos).is_none());
    }
}
