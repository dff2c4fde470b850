//! Tournament manager: the async entry point over a repository.
//!
//! Every mutating call takes the tournament's lock, loads a snapshot, runs the
//! engine on it and commits the recorded changes. Engine errors leave the
//! stored tournament untouched because the snapshot is dropped uncommitted.

use log::info;
use rand::{SeedableRng, rngs::StdRng};
use std::{collections::HashMap, sync::Arc, time::Duration};
use thiserror::Error;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

use super::models::{
    NewParticipant, NewTournament, Participant, ParticipantId, Team, Tournament, TournamentFormat,
    TournamentId, TournamentState,
};
use crate::bracket::{
    self, Advancement, EngineError, EngineResult, GenerationReport, LeagueScheduler, MatchId,
    MatchStore, Placement, Rubber, SetScore, Side, Standing, TournamentSnapshot,
    advancement::AdvancementEngine, league::LEAGUE_TEAMS,
};
use crate::db::TournamentRepository;

/// Tournament errors
#[derive(Debug, Error)]
pub enum TournamentError {
    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Tournament {0} was changed concurrently; reload and retry")]
    Conflict(TournamentId),

    #[error("Tournament {0} is busy; try again later")]
    Busy(TournamentId),
}

impl TournamentError {
    /// Get a sanitized error message safe to show to operators and clients
    pub fn client_message(&self) -> String {
        match self {
            // Sanitize database errors - don't expose SQL details
            TournamentError::Database(_) => "Internal server error".to_string(),
            _ => self.to_string(),
        }
    }
}

pub type TournamentResult<T> = Result<T, TournamentError>;

/// Manager settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagerConfig {
    /// How long a call waits for the tournament's lock before giving up
    pub lock_timeout: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            lock_timeout: Duration::from_secs(5),
        }
    }
}

/// Tournament manager
#[derive(Clone)]
pub struct TournamentManager {
    repository: Arc<dyn TournamentRepository>,
    locks: Arc<RwLock<HashMap<TournamentId, Arc<Mutex<()>>>>>,
    config: ManagerConfig,
}

impl TournamentManager {
    /// Create a new tournament manager
    pub fn new(repository: Arc<dyn TournamentRepository>) -> Self {
        Self::with_config(repository, ManagerConfig::default())
    }

    pub fn with_config(repository: Arc<dyn TournamentRepository>, config: ManagerConfig) -> Self {
        Self {
            repository,
            locks: Arc::new(RwLock::new(HashMap::new())),
            config,
        }
    }

    async fn acquire(&self, tournament_id: TournamentId) -> TournamentResult<OwnedMutexGuard<()>> {
        let existing = self.locks.read().await.get(&tournament_id).cloned();
        let lock = match existing {
            Some(lock) => lock,
            None => Arc::clone(self.locks.write().await.entry(tournament_id).or_default()),
        };
        tokio::time::timeout(self.config.lock_timeout, lock.lock_owned())
            .await
            .map_err(|_| TournamentError::Busy(tournament_id))
    }

    /// Unlock and forget the tournament's lock once nobody else holds or
    /// waits on it, so the map only tracks tournaments in use
    async fn release(&self, tournament_id: TournamentId, guard: OwnedMutexGuard<()>) {
        drop(guard);
        let mut locks = self.locks.write().await;
        if locks
            .get(&tournament_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&tournament_id);
        }
    }

    /// Load, run `op`, commit, all under the tournament's lock
    async fn with_snapshot<T, F>(&self, tournament_id: TournamentId, op: F) -> TournamentResult<T>
    where
        F: FnOnce(&mut TournamentSnapshot) -> EngineResult<T> + Send,
    {
        let guard = self.acquire(tournament_id).await?;
        let result = async {
            let mut snapshot = self.repository.load_snapshot(tournament_id).await?;
            let value = op(&mut snapshot)?;
            self.repository.commit(&mut snapshot).await?;
            Ok::<T, TournamentError>(value)
        }
        .await;
        self.release(tournament_id, guard).await;
        result
    }

    /// Create a new tournament
    pub async fn create_tournament(&self, new: NewTournament) -> TournamentResult<Tournament> {
        let tournament = self.repository.create_tournament(&new).await?;
        info!(
            "Created tournament {} '{}' ({})",
            tournament.id, tournament.name, tournament.format
        );
        Ok(tournament)
    }

    async fn open_for_registration(
        &self,
        tournament_id: TournamentId,
        team: bool,
    ) -> TournamentResult<TournamentSnapshot> {
        let snapshot = self.repository.load_snapshot(tournament_id).await?;
        let tournament = snapshot.tournament();
        tournament.require_state(TournamentState::Created)?;
        if tournament.format.is_team_format() != team {
            let kind = if team { "teams" } else { "players" };
            return Err(EngineError::InvariantViolation(format!(
                "{} tournaments do not take {kind}",
                tournament.format
            ))
            .into());
        }
        Ok(snapshot)
    }

    /// Register a new player for a tournament
    pub async fn register_participant(
        &self,
        tournament_id: TournamentId,
        new: NewParticipant,
    ) -> TournamentResult<Participant> {
        let guard = self.acquire(tournament_id).await?;
        let result = async {
            self.open_for_registration(tournament_id, false).await?;
            self.repository.add_participant(tournament_id, &new).await
        }
        .await;
        self.release(tournament_id, guard).await;
        result
    }

    /// Register a player who already has a rating from earlier tournaments
    pub async fn enroll_participant(
        &self,
        tournament_id: TournamentId,
        participant_id: ParticipantId,
    ) -> TournamentResult<Participant> {
        let guard = self.acquire(tournament_id).await?;
        let result = async {
            self.open_for_registration(tournament_id, false).await?;
            self.repository
                .enroll_participant(tournament_id, participant_id)
                .await
        }
        .await;
        self.release(tournament_id, guard).await;
        result
    }

    /// Register a league team
    pub async fn register_team(&self, tournament_id: TournamentId, name: &str) -> TournamentResult<Team> {
        let guard = self.acquire(tournament_id).await?;
        let result = async {
            let snapshot = self.open_for_registration(tournament_id, true).await?;
            let registered = snapshot.teams().len();
            if registered >= LEAGUE_TEAMS {
                return Err(EngineError::LeagueSize {
                    expected: LEAGUE_TEAMS,
                    actual: registered + 1,
                }
                .into());
            }
            self.repository.add_team(tournament_id, name).await
        }
        .await;
        self.release(tournament_id, guard).await;
        result
    }

    /// Close registration
    ///
    /// # Errors
    ///
    /// Elimination formats need at least two players, the league exactly
    /// eight teams.
    pub async fn start_tournament(&self, tournament_id: TournamentId) -> TournamentResult<Tournament> {
        self.with_snapshot(tournament_id, |snapshot| {
            let tournament = snapshot.tournament().clone();
            tournament.require_state(TournamentState::Created)?;
            if tournament.format == TournamentFormat::League {
                let teams = snapshot.teams().len();
                if teams != LEAGUE_TEAMS {
                    return Err(EngineError::LeagueSize {
                        expected: LEAGUE_TEAMS,
                        actual: teams,
                    });
                }
            } else if snapshot.participants().len() < 2 {
                return Err(EngineError::InsufficientEntrants {
                    needed: 2,
                    current: snapshot.participants().len(),
                });
            }
            snapshot.update_tournament_state(tournament.id, TournamentState::Started)?;
            info!("Tournament {} started", tournament.id);
            snapshot.get_tournament(tournament.id)
        })
        .await
    }

    /// Build, link and seed the bracket
    pub async fn generate(&self, tournament_id: TournamentId) -> TournamentResult<GenerationReport> {
        self.with_snapshot(tournament_id, |snapshot| bracket::generate(snapshot, tournament_id))
            .await
    }

    /// Store the sets of a pending match without deciding it
    pub async fn record_sets(
        &self,
        tournament_id: TournamentId,
        match_id: MatchId,
        sets: Vec<SetScore>,
    ) -> TournamentResult<()> {
        self.with_snapshot(tournament_id, |snapshot| {
            AdvancementEngine::new(snapshot).record_sets(match_id, &sets)
        })
        .await
    }

    /// Store the rubbers of a pending league leg without deciding it
    pub async fn record_rubbers(
        &self,
        tournament_id: TournamentId,
        match_id: MatchId,
        rubbers: Vec<Rubber>,
    ) -> TournamentResult<()> {
        self.with_snapshot(tournament_id, |snapshot| {
            LeagueScheduler::new(snapshot).record_rubbers(match_id, &rubbers)
        })
        .await
    }

    /// Decide a match from what was recorded for it
    pub async fn report_result(
        &self,
        tournament_id: TournamentId,
        match_id: MatchId,
    ) -> TournamentResult<Advancement> {
        self.with_snapshot(tournament_id, |snapshot| bracket::report_result(snapshot, match_id))
            .await
    }

    pub async fn report_walkover(
        &self,
        tournament_id: TournamentId,
        match_id: MatchId,
        winner: Side,
    ) -> TournamentResult<Advancement> {
        self.with_snapshot(tournament_id, |snapshot| {
            bracket::report_walkover(snapshot, match_id, winner)
        })
        .await
    }

    /// Regroup the league with an OS-seeded tie-break
    pub async fn regroup(&self, tournament_id: TournamentId) -> TournamentResult<Vec<MatchId>> {
        let mut rng = StdRng::from_os_rng();
        self.with_snapshot(tournament_id, move |snapshot| {
            LeagueScheduler::new(snapshot).regroup(tournament_id, &mut rng)
        })
        .await
    }

    /// Regroup with a reproducible tie-break
    pub async fn regroup_seeded(&self, tournament_id: TournamentId, seed: u64) -> TournamentResult<Vec<MatchId>> {
        let mut rng = StdRng::seed_from_u64(seed);
        self.with_snapshot(tournament_id, move |snapshot| {
            LeagueScheduler::new(snapshot).regroup(tournament_id, &mut rng)
        })
        .await
    }

    pub async fn standings(&self, tournament_id: TournamentId) -> TournamentResult<Vec<Standing>> {
        let mut snapshot = self.repository.load_snapshot(tournament_id).await?;
        Ok(LeagueScheduler::new(&mut snapshot).standings(tournament_id)?)
    }

    pub async fn placements(&self, tournament_id: TournamentId) -> TournamentResult<Vec<Placement>> {
        let snapshot = self.repository.load_snapshot(tournament_id).await?;
        Ok(bracket::final_placements(&snapshot, tournament_id)?)
    }

    /// Current committed state
    pub async fn snapshot(&self, tournament_id: TournamentId) -> TournamentResult<TournamentSnapshot> {
        self.repository.load_snapshot(tournament_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_database_errors_are_sanitized() {
        let err = TournamentError::Database(sqlx::Error::RowNotFound);
        assert_eq!(err.client_message(), "Internal server error");

        let err = TournamentError::Busy(4);
        assert_eq!(err.client_message(), "Tournament 4 is busy; try again later");
    }

    #[test]
    fn test_engine_errors_pass_through() {
        let err: TournamentError = EngineError::AlreadyRegrouped.into();
        assert_eq!(err.client_message(), "league has already been regrouped");
    }

    async fn tracked_locks(manager: &TournamentManager) -> usize {
        manager.locks.read().await.len()
    }

    #[tokio::test]
    async fn test_lock_is_dropped_after_use() {
        let manager = TournamentManager::new(Arc::new(crate::db::MemoryTournamentRepository::new()));
        let guard = manager.acquire(9).await.unwrap();
        assert_eq!(tracked_locks(&manager).await, 1);

        manager.release(9, guard).await;
        assert_eq!(tracked_locks(&manager).await, 0);

        // failures release as well
        assert!(manager.generate(9).await.is_err());
        assert_eq!(tracked_locks(&manager).await, 0);
    }

    #[tokio::test]
    async fn test_waiting_caller_keeps_the_lock() {
        let manager = TournamentManager::new(Arc::new(crate::db::MemoryTournamentRepository::new()));
        let guard = manager.acquire(3).await.unwrap();

        let waiter = {
            let manager = manager.clone();
            tokio::spawn(async move {
                let guard = manager.acquire(3).await.unwrap();
                manager.release(3, guard).await;
            })
        };
        while Arc::strong_count(&manager.locks.read().await[&3]) < 3 {
            tokio::task::yield_now().await;
        }

        manager.release(3, guard).await;
        waiter.await.unwrap();
        assert_eq!(tracked_locks(&manager).await, 0);
    }

    #[tokio::test]
    async fn test_finished_tournament_leaves_no_lock() {
        let manager = TournamentManager::new(Arc::new(crate::db::MemoryTournamentRepository::new()));
        let tournament = manager
            .create_tournament(NewTournament {
                name: "Friday Final".to_string(),
                format: TournamentFormat::SingleElimination,
                starts_at: chrono::Utc::now(),
            })
            .await
            .unwrap();
        for (name, rating) in [("Ada", 120), ("Bo", 110)] {
            let player = NewParticipant {
                name: name.to_string(),
                rating,
                weight: 10,
                nationality: None,
            };
            manager.register_participant(tournament.id, player).await.unwrap();
        }
        manager.start_tournament(tournament.id).await.unwrap();
        manager.generate(tournament.id).await.unwrap();

        let snapshot = manager.snapshot(tournament.id).await.unwrap();
        let final_id = snapshot.matches()[0].id;
        let outcome = manager
            .report_walkover(tournament.id, final_id, Side::First)
            .await
            .unwrap();
        assert!(outcome.finished);
        assert_eq!(tracked_locks(&manager).await, 0);
    }
}
