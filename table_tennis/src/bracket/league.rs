//! Eight-team round-robin league.
//!
//! Phase one plays a fixed seven-round pairing table between the teams in
//! registration order. Once every phase-one leg is decided the league is
//! regrouped: teams are re-ranked by points and the same table is played
//! again between the re-ranked teams with home and away reversed (rounds
//! 8-14).
//!
//! ## Example
//!
//! ```
//! use table_tennis::bracket::league::session;
//!
//! assert_eq!(session(7), Some((3, 10)));
//! assert_eq!(session(8), Some((3, 13)));
//! assert_eq!(session(14), Some((5, 16)));
//! ```

use std::collections::HashMap;

use chrono::{DateTime, Days, NaiveTime, Utc};
use log::info;
use rand::{Rng, seq::SliceRandom};
use serde::{Deserialize, Serialize};

use super::advancement::{Advancement, AdvancementEngine};
use super::errors::{EngineError, EngineResult};
use super::models::{Match, MatchId, MatchKind, Rubber, Side, Slot};
use super::store::{MatchFilter, MatchStore};
use super::topology::{TopologyBuilder, TournamentTopology};
use crate::tournament::models::{ParticipantId, Team, Tournament, TournamentId, TournamentState};

pub const LEAGUE_TEAMS: usize = 8;
pub const PHASE_ONE_ROUNDS: u32 = 7;
/// Rubbers a side needs to take a leg
pub const RUBBERS_TO_WIN: u32 = 4;

/// Team indices (1-based, by registration order) per round and table
const PAIRINGS: [[(usize, usize); 4]; 7] = [
    [(1, 2), (3, 8), (4, 7), (5, 6)],
    [(1, 6), (5, 7), (4, 8), (2, 3)],
    [(1, 4), (3, 5), (2, 6), (7, 8)],
    [(1, 5), (4, 6), (3, 7), (2, 8)],
    [(1, 3), (2, 4), (5, 8), (6, 7)],
    [(1, 7), (6, 8), (2, 5), (3, 4)],
    [(1, 8), (2, 7), (3, 6), (4, 5)],
];

/// `(game day, hour UTC)` for each of the fourteen rounds. Game days are
/// consecutive calendar days from the tournament start date.
const SESSIONS: [(u32, u32); 14] = [
    (1, 10),
    (1, 13),
    (1, 16),
    (2, 10),
    (2, 13),
    (2, 16),
    (3, 10),
    (3, 13),
    (4, 10),
    (4, 13),
    (4, 16),
    (5, 10),
    (5, 13),
    (5, 16),
];

/// Game day and kick-off hour of a league round
pub fn session(round: u32) -> Option<(u32, u32)> {
    round
        .checked_sub(1)
        .and_then(|index| SESSIONS.get(index as usize))
        .copied()
}

/// A scheduled leg between two teams
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fixture {
    pub round: u32,
    /// Table number, also the position inside the round
    pub table: u32,
    pub home: ParticipantId,
    pub away: ParticipantId,
    pub game_day: u32,
    pub scheduled_at: DateTime<Utc>,
}

impl Fixture {
    fn new(round: u32, table: u32, home: ParticipantId, away: ParticipantId, starts_at: DateTime<Utc>) -> EngineResult<Self> {
        let (game_day, hour) = session(round).ok_or_else(|| {
            EngineError::InvariantViolation(format!("league round {round} has no session"))
        })?;
        let kickoff = NaiveTime::from_hms_opt(hour, 0, 0)
            .ok_or_else(|| EngineError::InvariantViolation(format!("bad kick-off hour {hour}")))?;
        let date = starts_at
            .date_naive()
            .checked_add_days(Days::new(u64::from(game_day - 1)))
            .ok_or_else(|| EngineError::InvariantViolation("league calendar overflows".to_string()))?;
        Ok(Self {
            round,
            table,
            home,
            away,
            game_day,
            scheduled_at: date.and_time(kickoff).and_utc(),
        })
    }
}

/// League table row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Standing {
    pub team: ParticipantId,
    pub name: String,
    pub points: u32,
    pub played: u32,
    pub won: u32,
}

/// Phase-one fixtures for teams in registration order.
///
/// # Errors
///
/// `LeagueSize` unless there are exactly eight teams.
pub fn phase_one_fixtures(teams: &[Team], starts_at: DateTime<Utc>) -> EngineResult<Vec<Fixture>> {
    if teams.len() != LEAGUE_TEAMS {
        return Err(EngineError::LeagueSize {
            expected: LEAGUE_TEAMS,
            actual: teams.len(),
        });
    }
    let mut fixtures = Vec::with_capacity(PAIRINGS.len() * 4);
    for (round, pairs) in (1..).zip(PAIRINGS.iter()) {
        for (table, &(home, away)) in (1..).zip(pairs.iter()) {
            fixtures.push(Fixture::new(
                round,
                table,
                teams[home - 1].id,
                teams[away - 1].id,
                starts_at,
            )?);
        }
    }
    Ok(fixtures)
}

/// Decide a leg from its rubbers: first side to four takes it.
pub fn decide_leg(leg: &Match, rubbers: &[Rubber]) -> EngineResult<Side> {
    if leg.is_decided() {
        return Err(EngineError::AlreadyDecided(leg.id));
    }
    if !leg.is_contested() {
        return Err(EngineError::MatchNotReady(leg.id));
    }
    let (first, second) = rubbers
        .iter()
        .fold((0, 0), |(first, second), rubber| match rubber.winner() {
            Some(Side::First) => (first + 1, second),
            Some(Side::Second) => (first, second + 1),
            None => (first, second),
        });
    if first < RUBBERS_TO_WIN && second < RUBBERS_TO_WIN {
        return Err(EngineError::Undecided(leg.id));
    }
    match first.cmp(&second) {
        std::cmp::Ordering::Greater => Ok(Side::First),
        std::cmp::Ordering::Less => Ok(Side::Second),
        std::cmp::Ordering::Equal => Err(EngineError::Draw(leg.id)),
    }
}

pub struct LeagueScheduler<'a> {
    store: &'a mut dyn MatchStore,
}

impl<'a> LeagueScheduler<'a> {
    pub fn new(store: &'a mut dyn MatchStore) -> Self {
        Self { store }
    }

    /// Create the phase-one legs
    pub fn generate(&mut self, tournament: &Tournament) -> EngineResult<TournamentTopology> {
        let teams = self.store.load_teams(tournament.id)?;
        let fixtures = phase_one_fixtures(&teams, tournament.starts_at)?;
        TopologyBuilder::new(&mut *self.store).build_league(tournament, &fixtures)
    }

    /// League legs already carry both teams, so assigning only opens play.
    pub fn assign(&mut self, tournament_id: TournamentId) -> EngineResult<Advancement> {
        self.store
            .get_tournament(tournament_id)?
            .require_state(TournamentState::MatchesCreated)?;
        self.store
            .update_tournament_state(tournament_id, TournamentState::PlayersAssigned)?;
        Ok(Advancement::default())
    }

    /// Replace the rubbers of a pending leg.
    ///
    /// # Errors
    ///
    /// `InvariantViolation` when the match is not a league leg or a rubber
    /// has no sets.
    pub fn record_rubbers(&mut self, match_id: MatchId, rubbers: &[Rubber]) -> EngineResult<()> {
        let leg = AdvancementEngine::new(&mut *self.store).load_reportable(match_id)?;
        if leg.kind != MatchKind::League {
            return Err(EngineError::InvariantViolation(format!(
                "match {match_id} is not a league leg"
            )));
        }
        if let Some(index) = rubbers.iter().position(|rubber| rubber.sets.is_empty()) {
            return Err(EngineError::InvariantViolation(format!(
                "rubber {} of match {match_id} has no sets",
                index + 1
            )));
        }
        self.store.replace_rubbers(match_id, rubbers)
    }

    /// Decide a leg from its recorded rubbers
    pub fn report_leg(&mut self, match_id: MatchId) -> EngineResult<Advancement> {
        let leg = AdvancementEngine::new(&mut *self.store).load_reportable(match_id)?;
        let rubbers = self.store.load_rubbers(match_id)?;
        let side = decide_leg(&leg, &rubbers)?;
        AdvancementEngine::new(&mut *self.store).advance(leg, side)
    }

    /// Points table: 2 per won leg, 1 per lost one. Ties keep registration
    /// order here; regrouping breaks them randomly.
    pub fn standings(&self, tournament_id: TournamentId) -> EngineResult<Vec<Standing>> {
        let teams = self.store.load_teams(tournament_id)?;
        let mut rows: HashMap<ParticipantId, Standing> = teams
            .iter()
            .map(|team| {
                let row = Standing {
                    team: team.id,
                    name: team.name.clone(),
                    points: 0,
                    played: 0,
                    won: 0,
                };
                (team.id, row)
            })
            .collect();

        let legs = self
            .store
            .query_matches(tournament_id, &MatchFilter::kind(MatchKind::League))?;
        for leg in legs.iter().filter(|leg| leg.is_decided()) {
            let (Some(winner), Some(loser)) = (leg.winner, leg.loser()) else {
                continue;
            };
            for (slot, won) in [(winner, true), (loser, false)] {
                let Some(row) = slot.participant().and_then(|id| rows.get_mut(&id)) else {
                    continue;
                };
                row.played += 1;
                if won {
                    row.won += 1;
                    row.points += 2;
                } else {
                    row.points += 1;
                }
            }
        }

        let mut table: Vec<Standing> = teams
            .iter()
            .filter_map(|team| rows.remove(&team.id))
            .collect();
        table.sort_by(|a, b| b.points.cmp(&a.points));
        Ok(table)
    }

    /// Create the second phase from the phase-one standings.
    ///
    /// # Errors
    ///
    /// `AlreadyRegrouped` when rounds 8-14 exist, `PhaseIncomplete` while a
    /// phase-one leg is pending.
    pub fn regroup<R: Rng + ?Sized>(&mut self, tournament_id: TournamentId, rng: &mut R) -> EngineResult<Vec<MatchId>> {
        let tournament = self.store.get_tournament(tournament_id)?;
        tournament.require_state(TournamentState::PlayersAssigned)?;

        let legs = self
            .store
            .query_matches(tournament_id, &MatchFilter::kind(MatchKind::League))?;
        if legs.iter().any(|leg| leg.round > PHASE_ONE_ROUNDS) {
            return Err(EngineError::AlreadyRegrouped);
        }
        let undecided = legs.iter().filter(|leg| !leg.is_decided()).count();
        if undecided > 0 {
            return Err(EngineError::PhaseIncomplete { undecided });
        }

        let mut standings = self.standings(tournament_id)?;
        standings.shuffle(rng);
        standings.sort_by(|a, b| b.points.cmp(&a.points));
        let ranked: Vec<ParticipantId> = standings.iter().map(|row| row.team).collect();
        if ranked.len() != LEAGUE_TEAMS {
            return Err(EngineError::LeagueSize {
                expected: LEAGUE_TEAMS,
                actual: ranked.len(),
            });
        }

        let played = |home: ParticipantId, away: ParticipantId| {
            legs.iter()
                .any(|leg| leg.slots == [Slot::Real(home), Slot::Real(away)])
        };
        let mut fixtures = Vec::with_capacity(PAIRINGS.len() * 4);
        for (round, pairs) in (PHASE_ONE_ROUNDS + 1..).zip(PAIRINGS.iter()) {
            for (table, &(first, second)) in (1..).zip(pairs.iter()) {
                let (mut home, mut away) = (ranked[second - 1], ranked[first - 1]);
                if played(home, away) {
                    std::mem::swap(&mut home, &mut away);
                }
                fixtures.push(Fixture::new(round, table, home, away, tournament.starts_at)?);
            }
        }

        let created = TopologyBuilder::new(&mut *self.store).create_legs(tournament_id, &fixtures)?;
        info!(
            "Tournament {tournament_id}: regrouped league, {} legs added",
            created.len()
        );
        Ok(created)
    }
}
