//! Match row construction for every bracket a format needs.

use std::collections::BTreeMap;

use log::{debug, info};
use serde::{Deserialize, Serialize};

use super::errors::{EngineError, EngineResult};
use super::league::Fixture;
use super::math::{self, RoundCounts};
use super::models::{BracketRange, MatchId, MatchKind, NewMatch, Slot};
use super::store::MatchStore;
use crate::tournament::models::{Tournament, TournamentId, TournamentState};

/// Shape of an elimination bracket for a given entrant count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BracketPlan {
    /// Entrant count rounded up to a power of two
    pub size: u32,
    pub counts: RoundCounts,
    /// Last winner round carries a 3rd-place match at position 2
    pub bronze: bool,
    /// Range decided by the loser-bracket final
    pub loser_final: Option<BracketRange>,
}

impl BracketPlan {
    pub fn single(entrants: u32) -> EngineResult<Self> {
        Ok(Self {
            size: math::round_up_to_power_of_two(entrants)?,
            counts: RoundCounts {
                winner: math::matches_per_round_single(entrants)?,
                loser: Vec::new(),
            },
            bronze: false,
            loser_final: None,
        })
    }

    pub fn double(entrants: u32) -> EngineResult<Self> {
        let counts = math::matches_per_round_double(entrants)?;
        let loser_final = (!counts.loser.is_empty()).then_some(BracketRange::BRONZE);
        Ok(Self {
            size: math::round_up_to_power_of_two(entrants)?,
            counts,
            bronze: false,
            loser_final,
        })
    }

    pub fn double_with_bronze(entrants: u32) -> EngineResult<Self> {
        let counts = math::matches_per_round_double_final(entrants)?;
        let bronze = counts.winner.len() >= 2;
        let loser_final = (!counts.loser.is_empty()).then_some(BracketRange::new(5, 6));
        Ok(Self {
            size: math::round_up_to_power_of_two(entrants)?,
            counts,
            bronze,
            loser_final,
        })
    }

    pub fn winner_rounds(&self) -> u32 {
        self.counts.winner.len() as u32
    }

    pub fn loser_rounds(&self) -> u32 {
        self.counts.loser.len() as u32
    }

    pub fn loser_matches(&self, round: u32) -> u32 {
        round
            .checked_sub(1)
            .and_then(|index| self.counts.loser.get(index as usize))
            .copied()
            .unwrap_or(0)
    }

    /// Placement range fed by the losers of each loser-bracket round.
    ///
    /// Walks down from the bottom placement: a round with `m` matches
    /// eliminates `m` entrants, who contest the next `m` placements. The
    /// loser final has no entry because it decides its own range.
    pub fn placement_ranges(&self) -> BTreeMap<u32, BracketRange> {
        let mut ranges = BTreeMap::new();
        let mut last = self.size;
        for round in 1..self.loser_rounds() {
            let eliminated = self.loser_matches(round);
            let until = last + 1 - eliminated;
            ranges.insert(round, BracketRange::new(until, last));
            last = until - 1;
        }
        ranges
    }
}

/// Built match graph for one tournament
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TournamentTopology {
    pub plan: Option<BracketPlan>,
    /// Winner-bracket IDs by `[round - 1][position - 1]`
    pub winner: Vec<Vec<MatchId>>,
    /// Loser-bracket IDs by `[round - 1][position - 1]`
    pub loser: Vec<Vec<MatchId>>,
    /// Loser round to the placement range its losers feed
    pub ranges: BTreeMap<u32, BracketRange>,
    /// League leg IDs in creation order
    pub legs: Vec<MatchId>,
}

impl TournamentTopology {
    pub fn winner_match(&self, round: u32, position: u32) -> EngineResult<MatchId> {
        lookup(&self.winner, "winner", round, position)
    }

    pub fn loser_match(&self, round: u32, position: u32) -> EngineResult<MatchId> {
        lookup(&self.loser, "loser", round, position)
    }

    pub fn match_count(&self) -> usize {
        self.winner.iter().chain(&self.loser).map(Vec::len).sum::<usize>() + self.legs.len()
    }
}

fn lookup(grid: &[Vec<MatchId>], bracket: &str, round: u32, position: u32) -> EngineResult<MatchId> {
    round
        .checked_sub(1)
        .and_then(|r| grid.get(r as usize))
        .and_then(|row| position.checked_sub(1).and_then(|p| row.get(p as usize)))
        .copied()
        .ok_or_else(|| {
            EngineError::InvariantViolation(format!(
                "no {bracket} match at round {round} position {position}"
            ))
        })
}

/// Creates match rows. Runs once per tournament, right after start.
pub struct TopologyBuilder<'a> {
    store: &'a mut dyn MatchStore,
}

impl<'a> TopologyBuilder<'a> {
    pub fn new(store: &'a mut dyn MatchStore) -> Self {
        Self { store }
    }

    /// Create winner and loser bracket rows for `plan`.
    ///
    /// The championship final is labelled `1-2`, the bronze match `3-4` and
    /// the loser final with the plan's loser range.
    ///
    /// # Errors
    ///
    /// Fails with `InvalidState` unless the tournament is `Started`.
    pub fn build_elimination(
        &mut self,
        tournament: &Tournament,
        plan: BracketPlan,
    ) -> EngineResult<TournamentTopology> {
        tournament.require_state(TournamentState::Started)?;

        let winner_rounds = plan.counts.winner.len();
        let mut winner = Vec::with_capacity(winner_rounds);
        for (index, &count) in plan.counts.winner.iter().enumerate() {
            let round = index as u32 + 1;
            let last_round = index + 1 == winner_rounds;
            let mut ids = Vec::with_capacity(count as usize);
            for position in 1..=count {
                let mut new = NewMatch::new(tournament.id, MatchKind::Winner, round, position);
                if last_round {
                    new = new.with_range(if position == 1 {
                        BracketRange::CHAMPIONSHIP
                    } else {
                        BracketRange::BRONZE
                    });
                }
                ids.push(self.store.create_match(new)?);
            }
            winner.push(ids);
        }

        let loser_rounds = plan.counts.loser.len();
        let mut loser = Vec::with_capacity(loser_rounds);
        for (index, &count) in plan.counts.loser.iter().enumerate() {
            let round = index as u32 + 1;
            let mut ids = Vec::with_capacity(count as usize);
            for position in 1..=count {
                let mut new = NewMatch::new(tournament.id, MatchKind::Loser, round, position);
                if let (true, Some(range)) = (index + 1 == loser_rounds, plan.loser_final) {
                    new = new.with_range(range);
                }
                ids.push(self.store.create_match(new)?);
            }
            loser.push(ids);
        }

        self.store
            .update_tournament_state(tournament.id, TournamentState::MatchesCreated)?;

        let topology = TournamentTopology {
            ranges: plan.placement_ranges(),
            plan: Some(plan),
            winner,
            loser,
            legs: Vec::new(),
        };
        info!(
            "Tournament {}: created {} bracket matches",
            tournament.id,
            topology.match_count()
        );
        Ok(topology)
    }

    /// Create the phase-one league legs
    ///
    /// # Errors
    ///
    /// Fails with `InvalidState` unless the tournament is `Started`.
    pub fn build_league(
        &mut self,
        tournament: &Tournament,
        fixtures: &[Fixture],
    ) -> EngineResult<TournamentTopology> {
        tournament.require_state(TournamentState::Started)?;
        let legs = self.create_legs(tournament.id, fixtures)?;
        self.store
            .update_tournament_state(tournament.id, TournamentState::MatchesCreated)?;
        info!("Tournament {}: created {} league legs", tournament.id, legs.len());
        Ok(TournamentTopology {
            legs,
            ..TournamentTopology::default()
        })
    }

    /// Append league legs. Slots are filled immediately since both teams are
    /// known up front.
    pub fn create_legs(
        &mut self,
        tournament_id: TournamentId,
        fixtures: &[Fixture],
    ) -> EngineResult<Vec<MatchId>> {
        fixtures
            .iter()
            .map(|fixture| {
                debug!(
                    "League round {} table {}: {} vs {}",
                    fixture.round, fixture.table, fixture.home, fixture.away
                );
                let new = NewMatch::new(tournament_id, MatchKind::League, fixture.round, fixture.table)
                    .with_slots(Slot::Real(fixture.home), Slot::Real(fixture.away))
                    .scheduled(fixture.game_day, fixture.table, fixture.scheduled_at);
                self.store.create_match(new)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bracket::snapshot::TournamentSnapshot;
    use crate::bracket::store::MatchFilter;
    use crate::tournament::models::TournamentFormat;
    use chrono::Utc;

    fn started(format: TournamentFormat) -> TournamentSnapshot {
        let mut tournament = Tournament::new(1, "Open", format, Utc::now());
        tournament.state = TournamentState::Started;
        TournamentSnapshot::new(tournament, Vec::new(), Vec::new())
    }

    #[test]
    fn test_placement_ranges() {
        let eight = BracketPlan::double(8).unwrap();
        let ranges: Vec<_> = eight.placement_ranges().into_iter().collect();
        assert_eq!(ranges, vec![(1, BracketRange::new(7, 8)), (2, BracketRange::new(5, 6))]);

        let sixteen = BracketPlan::double(16).unwrap();
        let ranges: Vec<_> = sixteen.placement_ranges().into_values().collect();
        assert_eq!(
            ranges,
            vec![
                BracketRange::new(13, 16),
                BracketRange::new(9, 12),
                BracketRange::new(7, 8),
                BracketRange::new(5, 6)
            ]
        );

        let bronze = BracketPlan::double_with_bronze(16).unwrap();
        assert_eq!(bronze.loser_final, Some(BracketRange::new(5, 6)));
        assert_eq!(
            bronze.placement_ranges().into_values().collect::<Vec<_>>(),
            vec![BracketRange::new(13, 16), BracketRange::new(9, 12), BracketRange::new(7, 8)]
        );
    }

    #[test]
    fn test_build_requires_started() {
        let mut snap = started(TournamentFormat::SingleElimination);
        let mut tournament = snap.tournament().clone();
        tournament.state = TournamentState::Created;
        let err = TopologyBuilder::new(&mut snap)
            .build_elimination(&tournament, BracketPlan::single(4).unwrap())
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidState { .. }));
    }

    #[test]
    fn test_build_double_elimination_labels_finals() {
        let mut snap = started(TournamentFormat::DoubleElimination);
        let tournament = snap.tournament().clone();
        let topology = TopologyBuilder::new(&mut snap)
            .build_elimination(&tournament, BracketPlan::double(8).unwrap())
            .unwrap();

        assert_eq!(topology.match_count(), 7 + 5);
        assert_eq!(snap.tournament().state, TournamentState::MatchesCreated);

        let finals = snap
            .query_matches(1, &MatchFilter::all().range(BracketRange::CHAMPIONSHIP))
            .unwrap();
        assert_eq!(finals.len(), 1);
        assert_eq!((finals[0].kind, finals[0].round), (MatchKind::Winner, 3));

        let loser_final = snap
            .query_matches(1, &MatchFilter::kind(MatchKind::Loser).range(BracketRange::BRONZE))
            .unwrap();
        assert_eq!(loser_final.len(), 1);
        assert_eq!(loser_final[0].round, 3);
    }

    #[test]
    fn test_bronze_match_sits_next_to_final() {
        let mut snap = started(TournamentFormat::DoubleEliminationFinal);
        let tournament = snap.tournament().clone();
        let topology = TopologyBuilder::new(&mut snap)
            .build_elimination(&tournament, BracketPlan::double_with_bronze(4).unwrap())
            .unwrap();

        let bronze = snap.get_match(topology.winner_match(2, 2).unwrap()).unwrap();
        assert_eq!(bronze.range, Some(BracketRange::BRONZE));
        assert!(topology.loser.is_empty());
        assert!(topology.winner_match(3, 1).is_err());
    }
}
