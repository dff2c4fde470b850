//! Match-level data models shared by every engine phase.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use uuid::Uuid;

use super::errors::{EngineError, EngineResult};
use crate::tournament::models::{ParticipantId, TournamentId};

/// Match ID type
pub type MatchId = Uuid;

/// Which bracket a match belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchKind {
    Winner,
    Loser,
    /// Consolation sub-bracket ranking 5th place and below
    Placement,
    League,
}

impl MatchKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchKind::Winner => "winner",
            MatchKind::Loser => "loser",
            MatchKind::Placement => "placement",
            MatchKind::League => "league",
        }
    }
}

impl FromStr for MatchKind {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "winner" => Ok(MatchKind::Winner),
            "loser" => Ok(MatchKind::Loser),
            "placement" => Ok(MatchKind::Placement),
            "league" => Ok(MatchKind::League),
            other => Err(EngineError::InvariantViolation(format!(
                "unknown match kind '{other}'"
            ))),
        }
    }
}

/// One side of a match.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Slot {
    /// Waiting for a feeder match
    #[default]
    Empty,
    /// No opponent; the other side advances without playing
    Bye,
    Real(ParticipantId),
}

impl Slot {
    pub fn is_empty(&self) -> bool {
        matches!(self, Slot::Empty)
    }

    pub fn is_bye(&self) -> bool {
        matches!(self, Slot::Bye)
    }

    pub fn participant(&self) -> Option<ParticipantId> {
        match self {
            Slot::Real(id) => Some(*id),
            _ => None,
        }
    }
}

/// Index into `Match::slots`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    First,
    Second,
}

impl Side {
    pub fn index(self) -> usize {
        match self {
            Side::First => 0,
            Side::Second => 1,
        }
    }

    pub fn other(self) -> Side {
        match self {
            Side::First => Side::Second,
            Side::Second => Side::First,
        }
    }
}

impl FromStr for Side {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "first" | "1" => Ok(Side::First),
            "second" | "2" => Ok(Side::Second),
            other => Err(EngineError::InvariantViolation(format!(
                "unknown side '{other}'"
            ))),
        }
    }
}

/// Inclusive range of final placements a bracket resolves, e.g. `5-8`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BracketRange {
    pub from: u32,
    pub to: u32,
}

impl BracketRange {
    pub const CHAMPIONSHIP: BracketRange = BracketRange { from: 1, to: 2 };
    pub const BRONZE: BracketRange = BracketRange { from: 3, to: 4 };

    pub fn new(from: u32, to: u32) -> Self {
        Self { from, to }
    }

    /// Number of placements covered
    pub fn width(&self) -> u32 {
        self.to + 1 - self.from
    }

    /// A width-2 range is decided by a single terminal match.
    pub fn is_terminal(&self) -> bool {
        self.width() == 2
    }

    pub fn contains(&self, other: &BracketRange) -> bool {
        other.from >= self.from && other.to <= self.to
    }
}

impl fmt::Display for BracketRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.from, self.to)
    }
}

impl FromStr for BracketRange {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || EngineError::InvariantViolation(format!("malformed bracket range '{s}'"));
        let (from, to) = s.split_once('-').ok_or_else(malformed)?;
        let from: u32 = from.trim().parse().map_err(|_| malformed())?;
        let to: u32 = to.trim().parse().map_err(|_| malformed())?;
        if from == 0 || to <= from {
            return Err(malformed());
        }
        Ok(Self { from, to })
    }
}

/// One played set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetScore {
    pub first: u32,
    pub second: u32,
}

impl SetScore {
    pub fn new(first: u32, second: u32) -> Self {
        Self { first, second }
    }

    /// Side with the strictly greater score, `None` on a tied set
    pub fn winner(&self) -> Option<Side> {
        match self.first.cmp(&self.second) {
            std::cmp::Ordering::Greater => Some(Side::First),
            std::cmp::Ordering::Less => Some(Side::Second),
            std::cmp::Ordering::Equal => None,
        }
    }

    /// Walkover set: 11-0 for `side`
    pub fn walkover(side: Side) -> Self {
        match side {
            Side::First => Self::new(11, 0),
            Side::Second => Self::new(0, 11),
        }
    }
}

impl FromStr for SetScore {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || EngineError::InvariantViolation(format!("malformed set score '{s}'"));
        let (first, second) = s.split_once(['-', ':']).ok_or_else(malformed)?;
        Ok(Self {
            first: first.trim().parse().map_err(|_| malformed())?,
            second: second.trim().parse().map_err(|_| malformed())?,
        })
    }
}

/// Count sets won by each side (ties count for nobody)
pub fn set_wins(sets: &[SetScore]) -> (u32, u32) {
    sets.iter()
        .fold((0, 0), |(first, second), set| match set.winner() {
            Some(Side::First) => (first + 1, second),
            Some(Side::Second) => (first, second + 1),
            None => (first, second),
        })
}

/// One individual game inside a league leg
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rubber {
    pub sets: Vec<SetScore>,
}

impl Rubber {
    /// Side credited with this rubber: more sets won and at least three of them.
    pub fn winner(&self) -> Option<Side> {
        let (first, second) = set_wins(&self.sets);
        if first > second && first >= 3 {
            Some(Side::First)
        } else if second > first && second >= 3 {
            Some(Side::Second)
        } else {
            None
        }
    }
}

/// A match row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Match {
    pub id: MatchId,
    pub tournament_id: TournamentId,
    pub kind: MatchKind,
    /// Play order, 1 is the opening round
    pub round: u32,
    /// 1-based position inside the round
    pub position: u32,
    pub slots: [Slot; 2],
    pub winner: Option<Slot>,
    pub winner_next: Option<MatchId>,
    pub loser_next: Option<MatchId>,
    pub range: Option<BracketRange>,
    pub game_day: Option<u32>,
    pub table: Option<u32>,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub walkover: bool,
}

impl Match {
    pub fn is_decided(&self) -> bool {
        self.winner.is_some()
    }

    /// No onward links: deciding it ends its branch.
    pub fn is_terminal(&self) -> bool {
        self.winner_next.is_none() && self.loser_next.is_none()
    }

    pub fn slot(&self, side: Side) -> Slot {
        self.slots[side.index()]
    }

    /// Slot-1 if empty, else slot-2, else none
    pub fn first_open_slot(&self) -> Option<Side> {
        if self.slots[0].is_empty() {
            Some(Side::First)
        } else if self.slots[1].is_empty() {
            Some(Side::Second)
        } else {
            None
        }
    }

    pub fn has_bye(&self) -> bool {
        self.slots.iter().any(Slot::is_bye)
    }

    /// Both sides are real participants
    pub fn is_contested(&self) -> bool {
        self.slots.iter().all(|slot| matches!(slot, Slot::Real(_)))
    }

    /// Winning side, derived from the stored winner
    pub fn winner_side(&self) -> Option<Side> {
        let winner = self.winner?;
        if self.slots[0] == winner {
            Some(Side::First)
        } else if self.slots[1] == winner {
            Some(Side::Second)
        } else {
            None
        }
    }

    pub fn loser(&self) -> Option<Slot> {
        self.winner_side().map(|side| self.slot(side.other()))
    }
}

/// Fields for a match about to be created. The store assigns the ID.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMatch {
    pub tournament_id: TournamentId,
    pub kind: MatchKind,
    pub round: u32,
    pub position: u32,
    pub slots: [Slot; 2],
    pub range: Option<BracketRange>,
    pub game_day: Option<u32>,
    pub table: Option<u32>,
    pub scheduled_at: Option<DateTime<Utc>>,
}

impl NewMatch {
    pub fn new(tournament_id: TournamentId, kind: MatchKind, round: u32, position: u32) -> Self {
        Self {
            tournament_id,
            kind,
            round,
            position,
            slots: [Slot::Empty; 2],
            range: None,
            game_day: None,
            table: None,
            scheduled_at: None,
        }
    }

    pub fn with_range(mut self, range: BracketRange) -> Self {
        self.range = Some(range);
        self
    }

    pub fn with_slots(mut self, first: Slot, second: Slot) -> Self {
        self.slots = [first, second];
        self
    }

    pub fn scheduled(mut self, game_day: u32, table: u32, at: DateTime<Utc>) -> Self {
        self.game_day = Some(game_day);
        self.table = Some(table);
        self.scheduled_at = Some(at);
        self
    }

    pub fn into_match(self, id: MatchId) -> Match {
        Match {
            id,
            tournament_id: self.tournament_id,
            kind: self.kind,
            round: self.round,
            position: self.position,
            slots: self.slots,
            winner: None,
            winner_next: None,
            loser_next: None,
            range: self.range,
            game_day: self.game_day,
            table: self.table,
            scheduled_at: self.scheduled_at,
            walkover: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bracket_range_parse_and_display() {
        let range: BracketRange = "5-8".parse().unwrap();
        assert_eq!(range, BracketRange::new(5, 8));
        assert_eq!(range.width(), 4);
        assert!(!range.is_terminal());
        assert_eq!(range.to_string(), "5-8");
        assert!(BracketRange::new(5, 6).is_terminal());
    }

    #[test]
    fn test_malformed_bracket_range() {
        for bad in ["", "5", "8-5", "a-b", "0-2", "3-3"] {
            assert!(
                matches!(bad.parse::<BracketRange>(), Err(EngineError::InvariantViolation(_))),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn test_range_containment() {
        let outer = BracketRange::new(9, 16);
        assert!(outer.contains(&BracketRange::new(9, 12)));
        assert!(outer.contains(&BracketRange::new(15, 16)));
        assert!(!outer.contains(&BracketRange::new(7, 10)));
    }

    #[test]
    fn test_set_wins_ignores_tied_sets() {
        let sets = [
            SetScore::new(11, 7),
            SetScore::new(9, 11),
            SetScore::new(10, 10),
            SetScore::new(12, 10),
        ];
        assert_eq!(set_wins(&sets), (2, 1));
    }

    #[test]
    fn test_rubber_needs_three_sets() {
        let short = Rubber {
            sets: vec![SetScore::new(11, 3), SetScore::new(11, 4)],
        };
        assert_eq!(short.winner(), None);

        let full = Rubber {
            sets: vec![
                SetScore::new(11, 3),
                SetScore::new(8, 11),
                SetScore::new(11, 4),
                SetScore::new(11, 9),
            ],
        };
        assert_eq!(full.winner(), Some(Side::First));
    }

    #[test]
    fn test_first_open_slot() {
        let mut m = NewMatch::new(1, MatchKind::Winner, 2, 1).into_match(Uuid::new_v4());
        assert_eq!(m.first_open_slot(), Some(Side::First));
        m.slots[0] = Slot::Real(4);
        assert_eq!(m.first_open_slot(), Some(Side::Second));
        m.slots[1] = Slot::Bye;
        assert_eq!(m.first_open_slot(), None);
        assert!(m.has_bye());
        assert!(!m.is_contested());
    }

    #[test]
    fn test_loser_follows_winner_side() {
        let mut m = NewMatch::new(1, MatchKind::Winner, 1, 1)
            .with_slots(Slot::Real(1), Slot::Real(2))
            .into_match(Uuid::new_v4());
        assert_eq!(m.loser(), None);
        m.winner = Some(Slot::Real(2));
        assert_eq!(m.winner_side(), Some(Side::Second));
        assert_eq!(m.loser(), Some(Slot::Real(1)));
    }

    #[test]
    fn test_set_score_parse() {
        assert_eq!("11-7".parse::<SetScore>().unwrap(), SetScore::new(11, 7));
        assert_eq!("9:11".parse::<SetScore>().unwrap(), SetScore::new(9, 11));
        assert!("eleven".parse::<SetScore>().is_err());
    }
}
