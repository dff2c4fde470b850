//! Tournament lifecycle on top of the bracket engine.
//!
//! This module provides:
//! - Tournament, participant and team models
//! - Registration and start checks
//! - Serialized access per tournament with optimistic commits
//!
//! ## Example
//!
//! ```no_run
//! use chrono::Utc;
//! use std::sync::Arc;
//! use table_tennis::db::{Database, DatabaseConfig, PgTournamentRepository};
//! use table_tennis::tournament::{NewTournament, TournamentFormat, TournamentManager};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let db = Database::new(&DatabaseConfig::from_env()?).await?;
//!     let repository = Arc::new(PgTournamentRepository::new(db.pool().clone()));
//!     let manager = TournamentManager::new(repository);
//!
//!     let tournament = manager
//!         .create_tournament(NewTournament {
//!             name: "Autumn Open".to_string(),
//!             format: TournamentFormat::from_type("double_elimination")?,
//!             starts_at: Utc::now(),
//!         })
//!         .await?;
//!     println!("Created tournament: {}", tournament.id);
//!
//!     Ok(())
//! }
//! ```

pub mod manager;
pub mod models;

pub use manager::{ManagerConfig, TournamentError, TournamentManager, TournamentResult};
pub use models::{
    NewParticipant, NewTournament, Participant, ParticipantId, Team, Tournament, TournamentFormat,
    TournamentId, TournamentState,
};
