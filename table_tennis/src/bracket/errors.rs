//! Bracket engine error types.

use std::fmt;
use thiserror::Error;

use super::models::MatchId;
use crate::tournament::models::{ParticipantId, TournamentId, TournamentState};

/// What a failed lookup was looking for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Missing {
    Tournament(TournamentId),
    Match(MatchId),
    Participant(ParticipantId),
    /// No winner-bracket round-one matches to seed into
    RoundOneMatches(TournamentId),
}

impl fmt::Display for Missing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Missing::Tournament(id) => write!(f, "tournament {id}"),
            Missing::Match(id) => write!(f, "match {id}"),
            Missing::Participant(id) => write!(f, "participant {id}"),
            Missing::RoundOneMatches(id) => write!(f, "round-one matches for tournament {id}"),
        }
    }
}

/// Bracket engine errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EngineError {
    /// Operation attempted in the wrong tournament lifecycle state
    #[error("tournament {tournament} is {actual}, expected {expected}")]
    InvalidState {
        tournament: TournamentId,
        expected: TournamentState,
        actual: TournamentState,
    },

    /// Result reported for a match that still has an unfilled slot
    #[error("match {0} is not ready: both slots must be filled")]
    MatchNotReady(MatchId),

    /// League leg whose rubbers do not yet decide it
    #[error("match {0} is undecided: a side needs 4 rubbers")]
    Undecided(MatchId),

    /// Regrouping attempted while phase-one legs are still open
    #[error("{undecided} phase-one legs are still undecided")]
    PhaseIncomplete { undecided: usize },

    #[error("league has already been regrouped")]
    AlreadyRegrouped,

    #[error("match {0} already has a winner")]
    AlreadyDecided(MatchId),

    #[error("match {0} ended in a draw")]
    Draw(MatchId),

    #[error("{0} not found")]
    NotFound(Missing),

    #[error("unsupported tournament type: {0}")]
    UnsupportedFormat(String),

    #[error("need at least {needed} entrants, have {current}")]
    InsufficientEntrants { needed: usize, current: usize },

    #[error("league needs exactly {expected} teams, have {actual}")]
    LeagueSize { expected: usize, actual: usize },

    /// Topology is inconsistent: dangling link, full target slot, bad range
    #[error("bracket invariant violated: {0}")]
    InvariantViolation(String),
}

/// Result type for bracket engine operations
pub type EngineResult<T> = Result<T, EngineError>;
