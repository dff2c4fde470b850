//! Wires every match to the matches its winner and loser play next.
//!
//! Winner and loser brackets are linked by round/position arithmetic. Losers
//! of loser-bracket rounds drop into placement sub-brackets, built here
//! recursively from the topology's range map: a range `[from, to]` wider than
//! two placements becomes a single-elimination bracket whose round-`i`
//! matches carry the range their entrants can still finish in, and every
//! round's losers spawn the next, lower tier. Placement matches are linked by
//! range arithmetic, scanning the matches whose range lies inside the tier's
//! window rather than following stored keys.

use log::{debug, info};

use super::errors::{EngineError, EngineResult};
use super::math;
use super::models::{BracketRange, Match, MatchId, MatchKind, NewMatch};
use super::store::{MatchField, MatchFilter, MatchStore};
use super::topology::{BracketPlan, TournamentTopology};
use crate::tournament::models::TournamentId;

pub struct BracketLinker<'a> {
    store: &'a mut dyn MatchStore,
}

impl<'a> BracketLinker<'a> {
    pub fn new(store: &'a mut dyn MatchStore) -> Self {
        Self { store }
    }

    /// Create placement sub-brackets for every range in the topology.
    pub fn build_placement_brackets(
        &mut self,
        tournament_id: TournamentId,
        topology: &TournamentTopology,
    ) -> EngineResult<usize> {
        let mut created = 0;
        for (&round, &range) in &topology.ranges {
            created += self.create_tier(tournament_id, range, round)?;
        }
        if created > 0 {
            info!("Tournament {tournament_id}: created {created} placement matches");
        }
        Ok(created)
    }

    /// Recursive tier construction for `range`. `parent_round` is the round
    /// whose losers enter this tier; terminal matches sit one round later.
    fn create_tier(
        &mut self,
        tournament_id: TournamentId,
        range: BracketRange,
        parent_round: u32,
    ) -> EngineResult<usize> {
        let upcoming = range.width() / 2;
        if upcoming <= 1 {
            let terminal = NewMatch::new(tournament_id, MatchKind::Placement, parent_round + 1, 1)
                .with_range(range);
            self.store.create_match(terminal)?;
            return Ok(1);
        }

        let rounds = math::matches_per_round_single(upcoming * 2)?;
        let mut created = 0;
        for (index, &count) in rounds.iter().enumerate() {
            let round = index as u32 + 1;
            let tier = BracketRange::new(range.from, range.from + 2 * count - 1);
            for position in 1..=count {
                let new = NewMatch::new(tournament_id, MatchKind::Placement, round, position)
                    .with_range(tier);
                self.store.create_match(new)?;
                created += 1;
            }
            if count >= 2 {
                let lower = BracketRange::new(range.from + count, range.from + 2 * count - 1);
                created += self.create_tier(tournament_id, lower, round)?;
            }
        }
        Ok(created)
    }

    /// Link every bracket in the topology.
    pub fn link(&mut self, tournament_id: TournamentId, topology: &TournamentTopology) -> EngineResult<()> {
        let Some(plan) = &topology.plan else {
            return Ok(());
        };
        self.link_winners(topology, plan)?;
        self.link_losers(tournament_id, topology, plan)?;
        self.link_placements(tournament_id, topology)?;
        debug!("Tournament {tournament_id}: bracket links complete");
        Ok(())
    }

    /// Winner of (r, p) plays (r + 1, ceil(p / 2)). With a loser bracket,
    /// round-one losers drop to loser round 1 at ceil(p / 2) and later
    /// losers to loser round 2(r - 1) at p. Semifinal losers go to the
    /// bronze match when the plan has one.
    fn link_winners(&mut self, topology: &TournamentTopology, plan: &BracketPlan) -> EngineResult<()> {
        let final_round = plan.winner_rounds();
        for (index, ids) in topology.winner.iter().enumerate() {
            let round = index as u32 + 1;
            if round == final_round {
                continue;
            }
            for (slot, &id) in ids.iter().enumerate() {
                let position = slot as u32 + 1;
                let mut fields = vec![MatchField::WinnerNext(
                    topology.winner_match(round + 1, position.div_ceil(2))?,
                )];

                let loser_next = if plan.bronze && round + 1 == final_round {
                    Some(topology.winner_match(final_round, 2)?)
                } else if plan.loser_rounds() == 0 {
                    None
                } else if round == 1 {
                    Some(topology.loser_match(1, position.div_ceil(2))?)
                } else {
                    Some(topology.loser_match(2 * (round - 1), position)?)
                };
                if let Some(next) = loser_next {
                    fields.push(MatchField::LoserNext(next));
                }
                self.store.update_match(id, &fields)?;
            }
        }
        Ok(())
    }

    /// Loser-bracket winners advance to the next loser round at the same
    /// position when that round is a feed-in round (same match count) and at
    /// ceil(p / 2) otherwise. Their losers enter the placement tier of the
    /// round's range.
    fn link_losers(
        &mut self,
        tournament_id: TournamentId,
        topology: &TournamentTopology,
        plan: &BracketPlan,
    ) -> EngineResult<()> {
        let final_round = plan.loser_rounds();
        for (index, ids) in topology.loser.iter().enumerate() {
            let round = index as u32 + 1;
            if round == final_round {
                continue;
            }
            let range = topology.ranges.get(&round).copied().ok_or_else(|| {
                EngineError::InvariantViolation(format!("no placement range for loser round {round}"))
            })?;
            let tier = self
                .store
                .query_matches(tournament_id, &MatchFilter::kind(MatchKind::Placement).range(range))?;
            let feed_in = plan.loser_matches(round + 1) == plan.loser_matches(round);

            for (slot, &id) in ids.iter().enumerate() {
                let position = slot as u32 + 1;
                let next_position = if feed_in { position } else { position.div_ceil(2) };
                let winner_next = topology.loser_match(round + 1, next_position)?;
                let loser_next = placement_entry(&tier, range, position.div_ceil(2))?;
                self.store.update_match(
                    id,
                    &[MatchField::WinnerNext(winner_next), MatchField::LoserNext(loser_next)],
                )?;
            }
        }
        Ok(())
    }

    /// Inside a tier `[a, b]`, winners move on to `[a, b - half]` and losers
    /// to `[a + half, b]`, both at ceil(p / 2). Width-2 matches are terminal.
    fn link_placements(&mut self, tournament_id: TournamentId, topology: &TournamentTopology) -> EngineResult<()> {
        for &window in topology.ranges.values() {
            let tier = self.store.query_matches(
                tournament_id,
                &MatchFilter::kind(MatchKind::Placement).range_within(window),
            )?;
            for m in &tier {
                let Some(range) = m.range else {
                    return Err(EngineError::InvariantViolation(format!(
                        "placement match {} has no range",
                        m.id
                    )));
                };
                if range.is_terminal() {
                    continue;
                }
                let half = range.width() / 2;
                let next_position = m.position.div_ceil(2);
                let winner_range = BracketRange::new(range.from, range.to - half);
                let loser_range = BracketRange::new(range.from + half, range.to);
                let winner_next = find_placement(&tier, winner_range, next_position)?;
                let loser_next = find_placement(&tier, loser_range, next_position)?;
                self.store.update_match(
                    m.id,
                    &[MatchField::WinnerNext(winner_next), MatchField::LoserNext(loser_next)],
                )?;
            }
        }
        Ok(())
    }
}

/// Entry match of a tier: the lone terminal match, or the round-one match at `position`
fn placement_entry(tier: &[Match], range: BracketRange, position: u32) -> EngineResult<MatchId> {
    if let [only] = tier {
        return Ok(only.id);
    }
    find_placement(tier, range, position)
}

fn find_placement(tier: &[Match], range: BracketRange, position: u32) -> EngineResult<MatchId> {
    tier.iter()
        .find(|m| m.range == Some(range) && m.position == position)
        .map(|m| m.id)
        .ok_or_else(|| {
            EngineError::InvariantViolation(format!(
                "no placement match for range {range} position {position}"
            ))
        })
}
