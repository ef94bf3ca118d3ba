// This is the ledger service every other part of the node talks to.
// Chain, UTXO set and pool live together behind one RwLock so a reader never sees a chain
// whose UTXO set belongs to a different tip. Minting searches for eligibility without the
// lock and only takes the write lock to commit.

use crate::core::chain::{accumulated_difficulty, replay_chain};
use crate::core::proof_of_stake::{find_block, is_validator, stake_of, CancelToken, StakeSearch};
use crate::core::{Block, DifficultyAdjustment, Transaction};
use crate::error::{BlockchainError, Result};
use crate::storage::{process_transactions, TransactionPool, UTXOSet};
use crate::utils::current_timestamp;
use crate::wallet::Wallet;
use log::{debug, info, warn};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

/// How the mint loop samples the clock
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MintSettings {
    /// Width of one stake tick in seconds; block timestamps are tick starts
    pub stake_tick_secs: i64,
    /// Sleep between two clock samples while searching
    pub poll_interval: Duration,
}

impl Default for MintSettings {
    fn default() -> Self {
        MintSettings {
            stake_tick_secs: 1,
            poll_interval: Duration::from_millis(200),
        }
    }
}

/// Result of one mint attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MintOutcome {
    /// The block was appended to the local chain
    Minted(Block),
    /// Minting is not possible right now; the reason is meant for the user
    Refused(String),
    /// The search was cancelled or the tip moved before the block could be committed
    Cancelled,
}

struct ChainState {
    chain: Vec<Block>,
    utxos: UTXOSet,
    pool: TransactionPool,
}

impl ChainState {
    fn tip(&self) -> &Block {
        // the chain always holds at least the genesis block
        &self.chain[self.chain.len() - 1]
    }

    // Chain transactions followed by the pooled ones
    fn history<'a>(
        &'a self,
        pooled: &'a [Transaction],
    ) -> impl Iterator<Item = &'a Transaction> + Clone {
        self.chain
            .iter()
            .flat_map(|block| block.get_transactions())
            .chain(pooled.iter())
    }
}

// A block waiting for its stake proof
struct MintDraft {
    tip: Block,
    difficulty: u32,
    stake: u64,
    transactions: Vec<Transaction>,
}

// Clears the in-progress marker however the mint attempt ends
struct MintGuard<'a> {
    mining: &'a Mutex<Option<CancelToken>>,
}

impl Drop for MintGuard<'_> {
    fn drop(&mut self) {
        *self.mining.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

#[derive(Clone)]
pub struct Blockchain {
    state: Arc<RwLock<ChainState>>,
    mining: Arc<Mutex<Option<CancelToken>>>,
    halted: Arc<AtomicBool>,
    settings: MintSettings,
}

impl Blockchain {
    /// Start a fresh chain whose genesis credits `owner_address`, stamped with the current time
    pub fn new(owner_address: &str, settings: MintSettings) -> Result<Blockchain> {
        let genesis = Block::genesis(owner_address, current_timestamp()?)?;
        info!("Creating genesis block {} for {owner_address}", genesis.get_hash());
        Blockchain::from_chain(vec![genesis], settings)
    }

    /// Adopt an existing chain after replaying it from genesis
    pub fn from_chain(chain: Vec<Block>, settings: MintSettings) -> Result<Blockchain> {
        let utxos = replay_chain(&chain)
            .ok_or_else(|| BlockchainError::InvalidBlock("Chain failed validation".to_string()))?;

        Ok(Blockchain {
            state: Arc::new(RwLock::new(ChainState {
                chain,
                utxos,
                pool: TransactionPool::new(),
            })),
            mining: Arc::new(Mutex::new(None)),
            halted: Arc::new(AtomicBool::new(false)),
            settings,
        })
    }

    // Lock poisoning only means another thread panicked mid-update; the state itself is
    // only ever replaced wholesale, so I keep serving it
    fn read(&self) -> RwLockReadGuard<'_, ChainState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, ChainState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn mining(&self) -> MutexGuard<'_, Option<CancelToken>> {
        self.mining.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get_chain(&self) -> Vec<Block> {
        self.read().chain.clone()
    }

    pub fn get_chain_len(&self) -> usize {
        self.read().chain.len()
    }

    pub fn get_last_block(&self) -> Block {
        self.read().tip().clone()
    }

    pub fn get_genesis_timestamp(&self) -> i64 {
        self.read().chain[0].get_timestamp()
    }

    pub fn get_utxos(&self) -> UTXOSet {
        self.read().utxos.clone()
    }

    pub fn get_pool(&self) -> Vec<Transaction> {
        self.read().pool.get_all().to_vec()
    }

    pub fn get_accumulated_difficulty(&self) -> num_bigint::BigUint {
        accumulated_difficulty(&self.read().chain)
    }

    /// Every transaction on the chain followed by every pooled one
    pub fn transaction_history(&self) -> Vec<Transaction> {
        let state = self.read();
        state.history(state.pool.get_all()).cloned().collect()
    }

    pub fn account_balance(&self, address: &str) -> u64 {
        self.read().utxos.balance_of(address)
    }

    pub fn stake_of(&self, address: &str) -> u64 {
        let state = self.read();
        stake_of(address, state.history(state.pool.get_all()))
    }

    pub fn is_validator(&self, address: &str) -> bool {
        let state = self.read();
        is_validator(address, state.history(state.pool.get_all()))
    }

    /// Admit a transaction received from a peer or a client into the pool
    pub fn add_to_pool(&self, tx: Transaction) -> bool {
        let mut state = self.write();
        let ChainState { utxos, pool, .. } = &mut *state;
        let tx_id = tx.get_id().to_string();
        let added = pool.add(tx, utxos);
        if added {
            debug!("Pooled transaction {tx_id}");
        } else {
            warn!("Rejected transaction {tx_id}");
        }
        added
    }

    /// Build a transaction against the current UTXO set and pool and pool it, all under one
    /// write lock so nothing else can take the same coins in between
    pub fn create_pool_transaction<F>(&self, build: F) -> Option<Transaction>
    where
        F: FnOnce(&UTXOSet, &TransactionPool) -> Option<Transaction>,
    {
        let mut state = self.write();
        let ChainState { utxos, pool, .. } = &mut *state;
        let tx = build(utxos, pool)?;
        if pool.add(tx.clone(), utxos) {
            info!("Created transaction {} ({})", tx.get_id(), tx.get_kind());
            Some(tx)
        } else {
            None
        }
    }

    /// Replace the pool with whatever decodes out of a peer's list
    pub fn replace_pool(&self, entries: Vec<Value>) -> usize {
        let kept = self.write().pool.replace(entries);
        info!("Replaced transaction pool ({kept} transactions)");
        kept
    }

    pub fn is_mining(&self) -> bool {
        self.mining().is_some()
    }

    /// Ask a running mint attempt to stop
    pub fn cancel_mining(&self) {
        if let Some(token) = self.mining().as_ref() {
            token.cancel();
        }
    }

    /// Cancel the running mint attempt and every later one
    pub fn halt_mining(&self) {
        self.halted.store(true, Ordering::SeqCst);
        self.cancel_mining();
    }

    /// Try to mint the next block with `wallet` as minter.
    ///
    /// Blocks until the wallet's stake wins a tick, the attempt is cancelled, or the chain
    /// moves on. Errors are reserved for failures to assemble the block.
    pub fn mint(&self, wallet: &Wallet) -> Result<MintOutcome> {
        let token = {
            let mut mining = self.mining();
            if mining.is_some() {
                return Ok(MintOutcome::Refused(
                    "A block is already being minted".to_string(),
                ));
            }
            // Checked under the marker lock so a concurrent halt either sees the token or
            // is seen here
            if self.halted.load(Ordering::SeqCst) {
                return Ok(MintOutcome::Cancelled);
            }
            let token = CancelToken::new();
            *mining = Some(token.clone());
            token
        };
        let _guard = MintGuard {
            mining: &self.mining,
        };

        let address = wallet.get_address();
        let draft = match self.draft(address) {
            Ok(draft) => draft,
            Err(reason) => return Ok(MintOutcome::Refused(reason)),
        };

        info!(
            "Searching for block {} (difficulty: {}, stake: {})",
            draft.tip.get_index() + 1,
            draft.difficulty,
            draft.stake
        );
        let search = StakeSearch {
            prev_hash: draft.tip.get_hash(),
            address,
            balance: draft.stake,
            difficulty: draft.difficulty,
            tick_secs: self.settings.stake_tick_secs,
            poll_interval: self.settings.poll_interval,
        };
        let Some(timestamp) = find_block(&search, &token) else {
            info!("Mint attempt on block {} cancelled", draft.tip.get_index());
            return Ok(MintOutcome::Cancelled);
        };

        self.commit(draft, address, timestamp)
    }

    // Everything the next block depends on, taken in one consistent snapshot
    fn draft(&self, address: &str) -> std::result::Result<MintDraft, String> {
        let state = self.read();
        let pooled = state.pool.revalidated(&state.utxos);
        let history = state.history(&pooled);

        if !is_validator(address, history.clone()) {
            return Err("This wallet is not a validator".to_string());
        }
        let stake = stake_of(address, history);
        if stake == 0 {
            return Err("This wallet has no stake".to_string());
        }

        let tip = state.tip().clone();
        let difficulty = DifficultyAdjustment::next_difficulty(&state.chain);
        let mut transactions = Vec::with_capacity(pooled.len() + 1);
        transactions.push(Transaction::new_coinbase(address, tip.get_index() + 1));
        transactions.extend(pooled);

        Ok(MintDraft {
            tip,
            difficulty,
            stake,
            transactions,
        })
    }

    fn commit(&self, draft: MintDraft, address: &str, timestamp: i64) -> Result<MintOutcome> {
        let MintDraft {
            tip,
            difficulty,
            stake,
            transactions,
        } = draft;

        let mut state = self.write();
        if state.tip().get_hash() != tip.get_hash() {
            info!("Chain moved on while minting, discarding block");
            return Ok(MintOutcome::Cancelled);
        }

        let block = Block::new(
            tip.get_index() + 1,
            timestamp,
            tip.get_hash().to_string(),
            difficulty,
            stake,
            address.to_string(),
            transactions,
        )?;

        let utxos = process_transactions(block.get_transactions(), &state.utxos, block.get_index())
            .ok_or_else(|| {
                BlockchainError::InvalidBlock(format!(
                    "Minted block {} does not apply to the UTXO set",
                    block.get_index()
                ))
            })?;

        // Transactions pooled during the search stay for the next block
        let ChainState {
            chain,
            utxos: current,
            pool,
        } = &mut *state;
        let kept = pool.settle(block.get_transactions(), &utxos);
        chain.push(block.clone());
        *current = utxos;

        info!(
            "Minted block {} {} with {} transactions ({kept} left in the pool)",
            block.get_index(),
            block.get_hash(),
            block.get_transactions().len()
        );
        Ok(MintOutcome::Minted(block))
    }

    /// Fork choice: adopt `candidate` if it replays cleanly from genesis and carries at least
    /// as much accumulated difficulty as the local chain. The pool is cleared on success.
    pub fn replace_chain(&self, candidate: Vec<Block>) -> bool {
        let Some(utxos) = replay_chain(&candidate) else {
            warn!("Rejected candidate chain of {} blocks: invalid", candidate.len());
            return false;
        };

        let candidate_difficulty = accumulated_difficulty(&candidate);
        if candidate_difficulty < self.get_accumulated_difficulty() {
            info!(
                "Rejected candidate chain of {} blocks: less accumulated difficulty",
                candidate.len()
            );
            return false;
        }

        // A mint in progress would build on the old tip
        self.cancel_mining();

        let mut state = self.write();
        if candidate_difficulty < accumulated_difficulty(&state.chain) {
            info!("Rejected candidate chain: local chain grew meanwhile");
            return false;
        }

        info!(
            "Replacing chain of {} blocks with candidate of {} blocks",
            state.chain.len(),
            candidate.len()
        );
        state.chain = candidate;
        state.utxos = utxos;
        state.pool.clear();
        true
    }
}
