//! Store contract the engine runs against.
//!
//! The engine is synchronous and never touches a database directly. Callers
//! hand it a `&mut dyn MatchStore` that already holds a consistent view of
//! one tournament (see [`TournamentSnapshot`](super::snapshot::TournamentSnapshot))
//! and persist the accumulated changes in a single transaction afterwards.

use super::errors::EngineResult;
use super::models::{BracketRange, Match, MatchId, MatchKind, NewMatch, Rubber, SetScore, Side, Slot};
use crate::tournament::models::{
    Participant, ParticipantId, Team, Tournament, TournamentId, TournamentState,
};

/// A single column update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchField {
    Slot(Side, Slot),
    Winner(Slot),
    WinnerNext(MatchId),
    LoserNext(MatchId),
    Walkover(bool),
}

/// Match query. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MatchFilter {
    pub kind: Option<MatchKind>,
    pub round: Option<u32>,
    pub position: Option<u32>,
    /// Exact range match
    pub range: Option<BracketRange>,
    /// Range lies within this window
    pub range_within: Option<BracketRange>,
    /// Either slot holds this participant or team
    pub entrant: Option<ParticipantId>,
    pub undecided: bool,
}

impl MatchFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn kind(kind: MatchKind) -> Self {
        Self {
            kind: Some(kind),
            ..Self::default()
        }
    }

    pub fn round(mut self, round: u32) -> Self {
        self.round = Some(round);
        self
    }

    pub fn position(mut self, position: u32) -> Self {
        self.position = Some(position);
        self
    }

    pub fn range(mut self, range: BracketRange) -> Self {
        self.range = Some(range);
        self
    }

    pub fn range_within(mut self, window: BracketRange) -> Self {
        self.range_within = Some(window);
        self
    }

    pub fn entrant(mut self, entrant: ParticipantId) -> Self {
        self.entrant = Some(entrant);
        self
    }

    pub fn undecided(mut self) -> Self {
        self.undecided = true;
        self
    }

    pub fn matches(&self, m: &Match) -> bool {
        self.kind.is_none_or(|kind| m.kind == kind)
            && self.round.is_none_or(|round| m.round == round)
            && self.position.is_none_or(|position| m.position == position)
            && self.range.is_none_or(|range| m.range == Some(range))
            && self
                .range_within
                .is_none_or(|window| m.range.is_some_and(|range| window.contains(&range)))
            && self
                .entrant
                .is_none_or(|entrant| m.slots.contains(&Slot::Real(entrant)))
            && (!self.undecided || !m.is_decided())
    }
}

/// Persistence collaborator used by every engine phase.
///
/// `query_matches` returns matches ordered by kind, range, round and position.
pub trait MatchStore {
    fn get_tournament(&self, id: TournamentId) -> EngineResult<Tournament>;

    fn update_tournament_state(&mut self, id: TournamentId, state: TournamentState) -> EngineResult<()>;

    fn mark_ratings_applied(&mut self, id: TournamentId) -> EngineResult<()>;

    /// Registered players, highest rating first
    fn load_participants(&self, id: TournamentId) -> EngineResult<Vec<Participant>>;

    /// League teams in fixture order
    fn load_teams(&self, id: TournamentId) -> EngineResult<Vec<Team>>;

    fn update_participant_rating(&mut self, id: ParticipantId, rating: i32) -> EngineResult<()>;

    fn create_match(&mut self, new: NewMatch) -> EngineResult<MatchId>;

    fn update_match(&mut self, id: MatchId, fields: &[MatchField]) -> EngineResult<()>;

    fn get_match(&self, id: MatchId) -> EngineResult<Match>;

    fn query_matches(&self, tournament: TournamentId, filter: &MatchFilter) -> EngineResult<Vec<Match>>;

    fn load_sets(&self, id: MatchId) -> EngineResult<Vec<SetScore>>;

    fn replace_sets(&mut self, id: MatchId, sets: &[SetScore]) -> EngineResult<()>;

    fn load_rubbers(&self, id: MatchId) -> EngineResult<Vec<Rubber>>;

    fn replace_rubbers(&mut self, id: MatchId, rubbers: &[Rubber]) -> EngineResult<()>;
}
