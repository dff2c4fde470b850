//! # Table Tennis
//!
//! A tournament bracket engine for table-tennis clubs.
//!
//! Given a format and a field of players (or eight league teams), the engine
//! builds every match the tournament will need, links each match to where
//! its winner and loser play next, seeds players by rating, and walks
//! reported results through the graph until every placement is decided.
//!
//! ## Formats
//!
//! - **Single elimination**: one loss and you are out
//! - **Double elimination**: losers drop into a loser bracket; its losers in
//!   turn play placement sub-brackets so every finishing place is decided
//! - **Double elimination with bronze match**: semifinal losers play for 3rd
//! - **League**: eight teams, a fixed round-robin and a regrouped second phase
//!
//! ## Core Modules
//!
//! - [`bracket`]: The synchronous engine, over any [`bracket::MatchStore`]
//! - [`tournament`]: Models and the async [`tournament::TournamentManager`]
//! - [`db`]: PostgreSQL pool and repositories
//!
//! ## Example
//!
//! ```
//! use table_tennis::bracket::math::matches_per_round_double;
//!
//! let counts = matches_per_round_double(8).unwrap();
//! assert_eq!(counts.winner, vec![4, 2, 1]);
//! assert_eq!(counts.loser, vec![2, 2, 1]);
//! ```

/// Bracket construction, seeding and result advancement.
pub mod bracket;
pub use bracket::{EngineError, EngineResult};

/// PostgreSQL persistence.
pub mod db;

/// Tournament models and lifecycle management.
pub mod tournament;
pub use tournament::{TournamentError, TournamentManager, TournamentResult};
