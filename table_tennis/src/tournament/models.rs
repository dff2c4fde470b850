//! Tournament, participant and team data models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

use crate::bracket::errors::{EngineError, EngineResult};

/// Tournament ID type
pub type TournamentId = i64;

/// Participant ID type
pub type ParticipantId = i64;

/// Tournament lifecycle state.
///
/// States only ever move forward; the derived ordering follows declaration
/// order so `a < b` means `a` comes earlier in the lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TournamentState {
    /// Accepting registrations
    Created,
    /// Registration closed, bracket not generated yet
    Started,
    /// Match rows exist but are not seeded
    MatchesCreated,
    /// Round-one slots are filled and results can be reported
    PlayersAssigned,
    /// Every match has a winner
    Finished,
}

impl TournamentState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TournamentState::Created => "created",
            TournamentState::Started => "started",
            TournamentState::MatchesCreated => "matches_created",
            TournamentState::PlayersAssigned => "players_assigned",
            TournamentState::Finished => "finished",
        }
    }
}

impl fmt::Display for TournamentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TournamentState {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(TournamentState::Created),
            "started" => Ok(TournamentState::Started),
            "matches_created" => Ok(TournamentState::MatchesCreated),
            "players_assigned" => Ok(TournamentState::PlayersAssigned),
            "finished" => Ok(TournamentState::Finished),
            other => Err(EngineError::InvariantViolation(format!(
                "unknown tournament state '{other}'"
            ))),
        }
    }
}

/// Tournament format. Selects the generation and advancement strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TournamentFormat {
    SingleElimination,
    DoubleElimination,
    /// Double elimination where the semifinal losers play a bronze match
    /// instead of dropping into the loser bracket.
    DoubleEliminationFinal,
    /// Fixed 8-team round robin with a regrouping phase.
    League,
}

impl TournamentFormat {
    /// Resolve a stored tournament type string.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::UnsupportedFormat` for unknown types.
    pub fn from_type(tournament_type: &str) -> EngineResult<Self> {
        match tournament_type {
            "single_elimination" => Ok(TournamentFormat::SingleElimination),
            "double_elimination" => Ok(TournamentFormat::DoubleElimination),
            "double_elimination_final" => Ok(TournamentFormat::DoubleEliminationFinal),
            "meistriliiga" | "league" => Ok(TournamentFormat::League),
            other => Err(EngineError::UnsupportedFormat(other.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TournamentFormat::SingleElimination => "single_elimination",
            TournamentFormat::DoubleElimination => "double_elimination",
            TournamentFormat::DoubleEliminationFinal => "double_elimination_final",
            TournamentFormat::League => "meistriliiga",
        }
    }

    /// Whether entrants are teams rather than individual players.
    pub fn is_team_format(&self) -> bool {
        matches!(self, TournamentFormat::League)
    }
}

impl fmt::Display for TournamentFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A tournament row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tournament {
    pub id: TournamentId,
    pub name: String,
    pub format: TournamentFormat,
    pub state: TournamentState,
    /// First game day. League legs are scheduled relative to this.
    pub starts_at: DateTime<Utc>,
    /// Set once the rating pass has run so it never runs twice.
    pub ratings_applied: bool,
    /// Optimistic concurrency token, bumped on every commit.
    pub version: i64,
}

impl Tournament {
    /// Create a tournament in the `Created` state
    pub fn new(
        id: TournamentId,
        name: impl Into<String>,
        format: TournamentFormat,
        starts_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            format,
            state: TournamentState::Created,
            starts_at,
            ratings_applied: false,
            version: 0,
        }
    }

    /// Fail unless the tournament is in `expected`.
    pub fn require_state(&self, expected: TournamentState) -> EngineResult<()> {
        if self.state != expected {
            return Err(EngineError::InvalidState {
                tournament: self.id,
                expected,
                actual: self.state,
            });
        }
        Ok(())
    }
}

/// Input for creating a tournament
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewTournament {
    pub name: String,
    pub format: TournamentFormat,
    pub starts_at: DateTime<Utc>,
}

/// A registered player.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub id: ParticipantId,
    pub name: String,
    /// Rating points; only the rating pass changes this.
    pub rating: i32,
    /// Damping weight used by the rating pass
    pub weight: i32,
    /// Display only
    pub nationality: Option<String>,
}

/// Input for registering a player
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewParticipant {
    pub name: String,
    pub rating: i32,
    pub weight: i32,
    pub nationality: Option<String>,
}

/// A league team. `order` is its index in the fixture table (1-based).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Team {
    pub id: ParticipantId,
    pub name: String,
    pub order: u32,
}
