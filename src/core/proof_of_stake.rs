//! Stake-based block eligibility
//!
//! A minter may produce the block after `prev_hash` at a given timestamp when
//! `2^256 * balance / (difficulty + 1) >= uint(sha256(prev_hash + address + timestamp))`.
//! Timestamps advance in coarse ticks, so each tick gives every staker one draw.

use crate::core::monetary::CHAIN_ADDRESS;
use crate::core::{Transaction, TransactionKind};
use crate::utils::{current_timestamp, sha256_digest};
use log::{debug, error};
use num_bigint::BigUint;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Shared flag telling a running [`find_block`] to give up
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> CancelToken {
        CancelToken::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Deterministic eligibility check for `address` holding `balance` stake
pub fn validate_stake(
    prev_hash: &str,
    address: &str,
    timestamp: i64,
    balance: u64,
    difficulty: u32,
) -> bool {
    let target = (BigUint::from(1u8) << 256u32) * BigUint::from(balance)
        / BigUint::from(u64::from(difficulty) + 1);

    let data = format!("{prev_hash}{address}{timestamp}");
    let draw = BigUint::from_bytes_be(&sha256_digest(data.as_bytes()));

    target >= draw
}

/// Round `timestamp` down to the start of its tick
pub fn stake_tick(timestamp: i64, tick_secs: i64) -> i64 {
    if tick_secs <= 1 {
        return timestamp;
    }
    timestamp - timestamp.rem_euclid(tick_secs)
}

/// Parameters of one block search
pub struct StakeSearch<'a> {
    pub prev_hash: &'a str,
    pub address: &'a str,
    pub balance: u64,
    pub difficulty: u32,
    pub tick_secs: i64,
    pub poll_interval: Duration,
}

/// Poll the clock until some tick makes `address` eligible.
///
/// Each distinct tick is evaluated once. Returns the winning tick, or `None` once `cancel`
/// is set or the clock cannot be read.
pub fn find_block(search: &StakeSearch, cancel: &CancelToken) -> Option<i64> {
    let found = search_ticks(search, cancel, |tick| {
        validate_stake(
            search.prev_hash,
            search.address,
            tick,
            search.balance,
            search.difficulty,
        )
    });
    if let Some(tick) = found {
        debug!("Eligible to mint on {} at {tick}", search.prev_hash);
    }
    found
}

// The polling loop behind `find_block`, with the per-tick draw pluggable
fn search_ticks<F>(search: &StakeSearch, cancel: &CancelToken, mut draw: F) -> Option<i64>
where
    F: FnMut(i64) -> bool,
{
    let mut last_checked: Option<i64> = None;

    while !cancel.is_cancelled() {
        let now = match current_timestamp() {
            Ok(now) => now,
            Err(e) => {
                error!("Stopping block search: {e}");
                return None;
            }
        };

        let tick = stake_tick(now, search.tick_secs);
        if last_checked != Some(tick) {
            last_checked = Some(tick);
            if draw(tick) {
                return Some(tick);
            }
        }

        thread::sleep(search.poll_interval);
    }

    None
}

/// Stake locked by `address`: outputs to the chain address of STAKE transactions it signed
pub fn stake_of<'a, I>(address: &str, history: I) -> u64
where
    I: IntoIterator<Item = &'a Transaction>,
{
    history
        .into_iter()
        .filter(|tx| tx.get_kind() == TransactionKind::Stake && tx.is_signed_by(address))
        .flat_map(|tx| tx.get_outs())
        .filter(|out| out.get_address() == CHAIN_ADDRESS)
        .fold(0u64, |total, out| total.saturating_add(out.get_amount()))
}

/// True when `address` signed a VALIDATOR transaction somewhere in `history`
pub fn is_validator<'a, I>(address: &str, history: I) -> bool
where
    I: IntoIterator<Item = &'a Transaction>,
{
    history
        .into_iter()
        .any(|tx| tx.get_kind() == TransactionKind::Validator && tx.is_signed_by(address))
}
