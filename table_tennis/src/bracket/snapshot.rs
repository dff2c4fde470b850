//! In-memory [`MatchStore`] over one tournament, with change tracking.
//!
//! Repositories load a snapshot, the engine mutates it, and the repository
//! writes back only what [`ChangeSet`] recorded. If the engine fails halfway
//! the snapshot is simply dropped and nothing reaches the database.

use std::{
    cmp::Reverse,
    collections::{BTreeSet, HashMap},
};

use serde::Serialize;
use uuid::Uuid;

use super::errors::{EngineError, EngineResult, Missing};
use super::models::{Match, MatchId, MatchKind, NewMatch, Rubber, SetScore};
use super::store::{MatchField, MatchFilter, MatchStore};
use crate::tournament::models::{
    Participant, ParticipantId, Team, Tournament, TournamentId, TournamentState,
};

/// What changed since the snapshot was loaded
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    pub tournament: bool,
    pub created: BTreeSet<MatchId>,
    pub updated: BTreeSet<MatchId>,
    pub sets: BTreeSet<MatchId>,
    pub rubbers: BTreeSet<MatchId>,
    pub ratings: BTreeSet<ParticipantId>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        !self.tournament
            && self.created.is_empty()
            && self.updated.is_empty()
            && self.sets.is_empty()
            && self.rubbers.is_empty()
            && self.ratings.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct TournamentSnapshot {
    tournament: Tournament,
    participants: Vec<Participant>,
    teams: Vec<Team>,
    matches: HashMap<MatchId, Match>,
    sets: HashMap<MatchId, Vec<SetScore>>,
    rubbers: HashMap<MatchId, Vec<Rubber>>,
    changes: ChangeSet,
}

/// Serializable read-only view of a snapshot
#[derive(Debug, Clone, Serialize)]
pub struct SnapshotView<'a> {
    pub tournament: &'a Tournament,
    pub participants: &'a [Participant],
    pub teams: &'a [Team],
    pub matches: Vec<&'a Match>,
}

impl TournamentSnapshot {
    /// Start from a tournament and its entrants, with no matches
    pub fn new(tournament: Tournament, mut participants: Vec<Participant>, mut teams: Vec<Team>) -> Self {
        participants.sort_by(|a, b| b.rating.cmp(&a.rating).then(a.id.cmp(&b.id)));
        teams.sort_by_key(|team| team.order);
        Self {
            tournament,
            participants,
            teams,
            matches: HashMap::new(),
            sets: HashMap::new(),
            rubbers: HashMap::new(),
            changes: ChangeSet::default(),
        }
    }

    /// Rehydrate previously persisted rows. No changes are recorded.
    pub fn with_rows(
        mut self,
        matches: Vec<Match>,
        sets: HashMap<MatchId, Vec<SetScore>>,
        rubbers: HashMap<MatchId, Vec<Rubber>>,
    ) -> Self {
        self.matches = matches.into_iter().map(|m| (m.id, m)).collect();
        self.sets = sets;
        self.rubbers = rubbers;
        self
    }

    pub fn tournament(&self) -> &Tournament {
        &self.tournament
    }

    pub fn participants(&self) -> &[Participant] {
        &self.participants
    }

    pub fn teams(&self) -> &[Team] {
        &self.teams
    }

    /// Every match, in query order
    pub fn matches(&self) -> Vec<&Match> {
        let mut all: Vec<&Match> = self.matches.values().collect();
        all.sort_by_key(|m| sort_key(m));
        all
    }

    pub fn sets(&self, id: &MatchId) -> &[SetScore] {
        self.sets.get(id).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn rubbers(&self, id: &MatchId) -> &[Rubber] {
        self.rubbers.get(id).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn changes(&self) -> &ChangeSet {
        &self.changes
    }

    /// Called by repositories after a successful commit
    pub fn mark_committed(&mut self) {
        if !self.changes.is_empty() {
            self.tournament.version += 1;
        }
        self.changes = ChangeSet::default();
    }

    pub fn view(&self) -> SnapshotView<'_> {
        SnapshotView {
            tournament: &self.tournament,
            participants: &self.participants,
            teams: &self.teams,
            matches: self.matches(),
        }
    }

    fn check_tournament(&self, id: TournamentId) -> EngineResult<()> {
        if self.tournament.id != id {
            return Err(EngineError::NotFound(Missing::Tournament(id)));
        }
        Ok(())
    }

    fn match_mut(&mut self, id: MatchId) -> EngineResult<&mut Match> {
        self.matches
            .get_mut(&id)
            .ok_or(EngineError::NotFound(Missing::Match(id)))
    }

    fn ensure_match(&self, id: MatchId) -> EngineResult<()> {
        if !self.matches.contains_key(&id) {
            return Err(EngineError::NotFound(Missing::Match(id)));
        }
        Ok(())
    }
}

type SortKey = (MatchKind, Option<(u32, Reverse<u32>)>, u32, u32);

fn sort_key(m: &Match) -> SortKey {
    (
        m.kind,
        m.range.map(|range| (range.from, Reverse(range.to))),
        m.round,
        m.position,
    )
}

impl MatchStore for TournamentSnapshot {
    fn get_tournament(&self, id: TournamentId) -> EngineResult<Tournament> {
        self.check_tournament(id)?;
        Ok(self.tournament.clone())
    }

    fn update_tournament_state(&mut self, id: TournamentId, state: TournamentState) -> EngineResult<()> {
        self.check_tournament(id)?;
        self.tournament.state = state;
        self.changes.tournament = true;
        Ok(())
    }

    fn mark_ratings_applied(&mut self, id: TournamentId) -> EngineResult<()> {
        self.check_tournament(id)?;
        self.tournament.ratings_applied = true;
        self.changes.tournament = true;
        Ok(())
    }

    fn load_participants(&self, id: TournamentId) -> EngineResult<Vec<Participant>> {
        self.check_tournament(id)?;
        Ok(self.participants.clone())
    }

    fn load_teams(&self, id: TournamentId) -> EngineResult<Vec<Team>> {
        self.check_tournament(id)?;
        Ok(self.teams.clone())
    }

    fn update_participant_rating(&mut self, id: ParticipantId, rating: i32) -> EngineResult<()> {
        let participant = self
            .participants
            .iter_mut()
            .find(|p| p.id == id)
            .ok_or(EngineError::NotFound(Missing::Participant(id)))?;
        participant.rating = rating;
        self.changes.ratings.insert(id);
        Ok(())
    }

    fn create_match(&mut self, new: NewMatch) -> EngineResult<MatchId> {
        self.check_tournament(new.tournament_id)?;
        let id = Uuid::new_v4();
        self.matches.insert(id, new.into_match(id));
        self.changes.created.insert(id);
        Ok(id)
    }

    fn update_match(&mut self, id: MatchId, fields: &[MatchField]) -> EngineResult<()> {
        let m = self.match_mut(id)?;
        for field in fields {
            match *field {
                MatchField::Slot(side, slot) => m.slots[side.index()] = slot,
                MatchField::Winner(winner) => m.winner = Some(winner),
                MatchField::WinnerNext(next) => m.winner_next = Some(next),
                MatchField::LoserNext(next) => m.loser_next = Some(next),
                MatchField::Walkover(walkover) => m.walkover = walkover,
            }
        }
        if !self.changes.created.contains(&id) {
            self.changes.updated.insert(id);
        }
        Ok(())
    }

    fn get_match(&self, id: MatchId) -> EngineResult<Match> {
        self.matches
            .get(&id)
            .cloned()
            .ok_or(EngineError::NotFound(Missing::Match(id)))
    }

    fn query_matches(&self, tournament: TournamentId, filter: &MatchFilter) -> EngineResult<Vec<Match>> {
        self.check_tournament(tournament)?;
        let mut found: Vec<Match> = self
            .matches
            .values()
            .filter(|m| filter.matches(m))
            .cloned()
            .collect();
        found.sort_by_key(sort_key);
        Ok(found)
    }

    fn load_sets(&self, id: MatchId) -> EngineResult<Vec<SetScore>> {
        self.ensure_match(id)?;
        Ok(self.sets(&id).to_vec())
    }

    fn replace_sets(&mut self, id: MatchId, sets: &[SetScore]) -> EngineResult<()> {
        self.ensure_match(id)?;
        self.sets.insert(id, sets.to_vec());
        self.changes.sets.insert(id);
        Ok(())
    }

    fn load_rubbers(&self, id: MatchId) -> EngineResult<Vec<Rubber>> {
        self.ensure_match(id)?;
        Ok(self.rubbers(&id).to_vec())
    }

    fn replace_rubbers(&mut self, id: MatchId, rubbers: &[Rubber]) -> EngineResult<()> {
        self.ensure_match(id)?;
        self.rubbers.insert(id, rubbers.to_vec());
        self.changes.rubbers.insert(id);
        Ok(())
    }
}
