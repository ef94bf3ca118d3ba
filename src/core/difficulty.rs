use crate::core::Block;
use log::info;

// Difficulty adjustment constants
pub const BLOCK_GENERATION_INTERVAL: i64 = 10; // seconds
pub const DIFFICULTY_ADJUSTMENT_INTERVAL: u64 = 10; // blocks

/// Difficulty retargeting for keeping block production near the generation interval
pub struct DifficultyAdjustment;

impl DifficultyAdjustment {
    /// Difficulty the next block on top of `chain` must carry.
    ///
    /// Retargets when the last block's index is a non-zero multiple of the adjustment interval,
    /// otherwise inherits the last block's difficulty. An empty chain yields 0.
    pub fn next_difficulty(chain: &[Block]) -> u32 {
        let Some(last) = chain.last() else {
            return 0;
        };

        let interval = DIFFICULTY_ADJUSTMENT_INTERVAL;
        if last.get_index() == 0 || last.get_index() % interval != 0 {
            return last.get_difficulty();
        }

        // The chain is indexed by position, so this is the block one interval back
        let last_pos = chain.len() - 1;
        let Some(anchor) = last_pos
            .checked_sub(interval as usize)
            .and_then(|pos| chain.get(pos))
        else {
            return last.get_difficulty();
        };

        // Peer timestamps can sit at the ends of the i64 range
        let time_taken = last.get_timestamp().saturating_sub(anchor.get_timestamp());
        let adjusted = Self::adjust_difficulty(last.get_difficulty(), time_taken);
        info!(
            "Difficulty at block {}: {} -> {adjusted} (took {time_taken}s, expected {}s)",
            last.get_index(),
            last.get_difficulty(),
            Self::expected_time_span()
        );
        adjusted
    }

    /// Seconds one adjustment interval is expected to take
    pub fn expected_time_span() -> i64 {
        BLOCK_GENERATION_INTERVAL * DIFFICULTY_ADJUSTMENT_INTERVAL as i64
    }

    fn adjust_difficulty(current_difficulty: u32, time_taken: i64) -> u32 {
        let expected = Self::expected_time_span();
        if time_taken < expected / 2 {
            // Blocks come too fast
            current_difficulty.saturating_add(1)
        } else if time_taken > expected * 2 {
            // Blocks come too slow
            current_difficulty.saturating_sub(1)
        } else {
            current_difficulty
        }
    }
}
