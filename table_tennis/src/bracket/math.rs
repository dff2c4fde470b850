//! Pure bracket arithmetic: power-of-two sizing, per-round match counts and
//! the canonical seeding permutation.
//!
//! Rounds are numbered in play order. Index `0` of every returned vector is
//! round 1, the opening round, and the last index is the final.
//!
//! ## Example
//!
//! ```
//! use table_tennis::bracket::math::{matches_per_round_single, seed_permutation};
//!
//! assert_eq!(matches_per_round_single(5).unwrap(), vec![4, 2, 1]);
//! assert_eq!(seed_permutation(2), vec![(1, 4), (2, 3)]);
//! ```

use serde::{Deserialize, Serialize};

use super::errors::{EngineError, EngineResult};

/// Smallest power of two that is `>= n`, with a floor of 2.
///
/// For `n >= 2` this is exactly the smallest power of two not below `n`.
/// A lone entrant is sized as 2 rather than 1: a one-slot bracket has zero
/// rounds and no match to record a champion in, while a two-slot bracket
/// gives a final against a BYE that resolves on seeding.
///
/// # Errors
///
/// Fails for `n == 0` and when the result would not fit in `u32`.
pub fn round_up_to_power_of_two(n: u32) -> EngineResult<u32> {
    if n == 0 {
        return Err(EngineError::InvariantViolation(
            "cannot size a bracket for zero entrants".to_string(),
        ));
    }
    n.max(2).checked_next_power_of_two().ok_or_else(|| {
        EngineError::InvariantViolation(format!("bracket for {n} entrants is too large"))
    })
}

/// Number of single-elimination rounds
pub fn round_count_single(n: u32) -> EngineResult<u32> {
    Ok(round_up_to_power_of_two(n)?.trailing_zeros())
}

/// Matches in each single-elimination round: `size / 2^r` for round `r`.
pub fn matches_per_round_single(n: u32) -> EngineResult<Vec<u32>> {
    let size = round_up_to_power_of_two(n)?;
    Ok((1..=size.trailing_zeros()).map(|r| size >> r).collect())
}

/// Match counts for a two-bracket format
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundCounts {
    pub winner: Vec<u32>,
    pub loser: Vec<u32>,
}

impl RoundCounts {
    pub fn total(&self) -> u32 {
        self.winner.iter().chain(&self.loser).sum()
    }
}

/// Winner bracket as in single elimination, plus `2W - 3` loser rounds
/// starting at `size / 4` matches and halving after every second round.
pub fn matches_per_round_double(n: u32) -> EngineResult<RoundCounts> {
    let size = round_up_to_power_of_two(n)?;
    let winner = matches_per_round_single(n)?;
    let winner_rounds = winner.len();
    let loser_rounds = (2 * winner_rounds).saturating_sub(3);

    let mut loser = Vec::with_capacity(loser_rounds);
    let mut divisor = 2;
    for round in 1..=loser_rounds {
        loser.push((size / 2) / divisor);
        if round % 2 == 0 {
            divisor *= 2;
        }
    }

    Ok(RoundCounts { winner, loser })
}

/// Double elimination where the semifinal losers play a bronze match.
///
/// The bronze match is an extra match in the last winner round. The
/// loser-bracket round that would have absorbed the semifinal losers is
/// dropped, so the loser final decides 5th place. With a four-entrant field
/// there is no loser bracket left at all.
pub fn matches_per_round_double_final(n: u32) -> EngineResult<RoundCounts> {
    let RoundCounts { mut winner, mut loser } = matches_per_round_double(n)?;
    if winner.len() < 2 {
        return Ok(RoundCounts { winner, loser });
    }

    if let Some(last) = winner.last_mut() {
        *last += 1;
    }
    if loser.len() <= 1 {
        loser.clear();
    } else {
        let feed_in = loser.len() - 2;
        loser.remove(feed_in);
    }
    Ok(RoundCounts { winner, loser })
}

/// Canonical bracket seeding for `2^depth` slots.
///
/// Returns `2^(depth-1)` pairs in round-one position order. Seed 1 meets the
/// weakest seed and the top two seeds can only meet in the final. The lower
/// seed is always first in its pair, so byes land in the second slot.
pub fn seed_permutation(depth: u32) -> Vec<(u32, u32)> {
    if depth == 0 {
        return Vec::new();
    }
    let mut pairs = Vec::with_capacity(1 << (depth - 1));
    branch(1, 1, depth + 1, &mut pairs);
    pairs
}

fn branch(seed: u32, level: u32, limit: u32, out: &mut Vec<(u32, u32)>) {
    let level_sum = (1 << level) + 1;
    if limit == level + 1 {
        out.push((seed, level_sum - seed));
        return;
    }
    // odd seeds keep their half on top, even seeds flip it
    if seed % 2 == 1 {
        branch(seed, level + 1, limit, out);
        branch(level_sum - seed, level + 1, limit, out);
    } else {
        branch(level_sum - seed, level + 1, limit, out);
        branch(seed, level + 1, limit, out);
    }
}
