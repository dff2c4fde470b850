//! Tournament bracket engine.
//!
//! This module turns a started tournament into a graph of matches and walks
//! results through it:
//! - Round and seeding arithmetic over power-of-two brackets
//! - Winner, loser and placement bracket construction and linking
//! - Seeding by rating, with byes resolved on the spot
//! - Result reporting, walkovers and completion detection
//! - The eight-team league and its regrouping phase
//! - Rating adjustment once an elimination tournament finishes
//!
//! The engine is synchronous and works on any [`MatchStore`]. The usual store
//! is a [`TournamentSnapshot`] loaded and committed by a repository.
//!
//! ## Example
//!
//! ```
//! use chrono::Utc;
//! use table_tennis::bracket::{self, MatchStore, TournamentSnapshot};
//! use table_tennis::tournament::models::{
//!     Participant, Tournament, TournamentFormat, TournamentState,
//! };
//!
//! let mut tournament = Tournament::new(1, "Club night", TournamentFormat::SingleElimination, Utc::now());
//! tournament.state = TournamentState::Started;
//! let players = (1..=4)
//!     .map(|id| Participant {
//!         id,
//!         name: format!("Player {id}"),
//!         rating: 100 - id as i32,
//!         weight: 10,
//!         nationality: None,
//!     })
//!     .collect();
//!
//! let mut snapshot = TournamentSnapshot::new(tournament, players, Vec::new());
//! let report = bracket::generate(&mut snapshot, 1).unwrap();
//! assert_eq!(report.matches, 3);
//! assert_eq!(snapshot.get_tournament(1).unwrap().state, TournamentState::PlayersAssigned);
//! ```

pub mod advancement;
pub mod errors;
pub mod format;
pub mod league;
pub mod linker;
pub mod math;
pub mod models;
pub mod rating;
pub mod seeding;
pub mod snapshot;
pub mod store;
pub mod topology;

pub use advancement::{Advancement, AdvancementEngine, Placement, final_placements};
pub use errors::{EngineError, EngineResult, Missing};
pub use format::{BracketFormat, FormatStrategy, GenerationReport, generate, report_result, report_walkover};
pub use league::{Fixture, LeagueScheduler, Standing};
pub use models::{BracketRange, Match, MatchId, MatchKind, NewMatch, Rubber, SetScore, Side, Slot};
pub use rating::{RatingCalculator, RatingChange};
pub use snapshot::{ChangeSet, SnapshotView, TournamentSnapshot};
pub use store::{MatchField, MatchFilter, MatchStore};
pub use topology::{BracketPlan, TopologyBuilder, TournamentTopology};
