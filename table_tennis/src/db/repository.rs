//! Tournament persistence.
//!
//! The engine never talks to the database. A repository loads one tournament
//! into a [`TournamentSnapshot`], the engine mutates it, and [`commit`]
//! writes back exactly what the snapshot's change set recorded, in one
//! transaction guarded by the tournament's `version` column.
//!
//! [`commit`]: TournamentRepository::commit

use async_trait::async_trait;
use sqlx::{PgConnection, PgPool, Row, postgres::PgRow};
use std::{collections::HashMap, sync::Arc};
use tokio::sync::Mutex;

use crate::bracket::errors::{EngineError, Missing};
use crate::bracket::models::{BracketRange, Match, MatchId, Rubber, SetScore, Slot};
use crate::bracket::snapshot::TournamentSnapshot;
use crate::bracket::store::MatchStore;
use crate::tournament::manager::{TournamentError, TournamentResult};
use crate::tournament::models::{
    NewParticipant, NewTournament, Participant, ParticipantId, Team, Tournament, TournamentFormat,
    TournamentId, TournamentState,
};

/// Trait for tournament repository operations
#[async_trait]
pub trait TournamentRepository: Send + Sync {
    /// Create a tournament in the `created` state
    async fn create_tournament(&self, new: &NewTournament) -> TournamentResult<Tournament>;

    /// Create a player and enroll them in the tournament
    async fn add_participant(
        &self,
        tournament_id: TournamentId,
        new: &NewParticipant,
    ) -> TournamentResult<Participant>;

    /// Enroll an existing player, keeping their rating
    async fn enroll_participant(
        &self,
        tournament_id: TournamentId,
        participant_id: ParticipantId,
    ) -> TournamentResult<Participant>;

    /// Add a league team; teams are ordered by registration
    async fn add_team(&self, tournament_id: TournamentId, name: &str) -> TournamentResult<Team>;

    /// Load the full state of one tournament
    async fn load_snapshot(&self, tournament_id: TournamentId) -> TournamentResult<TournamentSnapshot>;

    /// Persist the snapshot's pending changes.
    ///
    /// Fails with `Conflict` when somebody else committed since the snapshot
    /// was loaded; nothing is written in that case.
    async fn commit(&self, snapshot: &mut TournamentSnapshot) -> TournamentResult<()>;
}

/// Default PostgreSQL implementation of `TournamentRepository`
pub struct PgTournamentRepository {
    pool: PgPool,
}

impl PgTournamentRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn slot_columns(slot: Slot) -> (Option<ParticipantId>, bool) {
    match slot {
        Slot::Empty => (None, false),
        Slot::Bye => (None, true),
        Slot::Real(id) => (Some(id), false),
    }
}

fn slot_from(entrant: Option<ParticipantId>, bye: bool) -> Slot {
    match (entrant, bye) {
        (Some(id), _) => Slot::Real(id),
        (None, true) => Slot::Bye,
        (None, false) => Slot::Empty,
    }
}

fn unsigned(value: i32, column: &str) -> TournamentResult<u32> {
    u32::try_from(value).map_err(|_| {
        EngineError::InvariantViolation(format!("column {column} holds negative value {value}")).into()
    })
}

fn optional_unsigned(row: &PgRow, column: &str) -> TournamentResult<Option<u32>> {
    row.try_get::<Option<i32>, _>(column)?
        .map(|value| unsigned(value, column))
        .transpose()
}

fn tournament_from_row(row: &PgRow) -> TournamentResult<Tournament> {
    let format: String = row.try_get("format")?;
    let state: String = row.try_get("state")?;
    Ok(Tournament {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        format: TournamentFormat::from_type(&format)?,
        state: state.parse()?,
        starts_at: row.try_get("starts_at")?,
        ratings_applied: row.try_get("ratings_applied")?,
        version: row.try_get("version")?,
    })
}

fn participant_from_row(row: &PgRow) -> TournamentResult<Participant> {
    Ok(Participant {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        rating: row.try_get("rating")?,
        weight: row.try_get("weight")?,
        nationality: row.try_get("nationality")?,
    })
}

fn match_from_row(row: &PgRow) -> TournamentResult<Match> {
    let kind: String = row.try_get("kind")?;
    let decided: bool = row.try_get("decided")?;
    let range = match (optional_unsigned(row, "range_from")?, optional_unsigned(row, "range_to")?) {
        (Some(from), Some(to)) => Some(BracketRange::new(from, to)),
        _ => None,
    };
    Ok(Match {
        id: row.try_get("id")?,
        tournament_id: row.try_get("tournament_id")?,
        kind: kind.parse()?,
        round: unsigned(row.try_get("round")?, "round")?,
        position: unsigned(row.try_get("position")?, "position")?,
        slots: [
            slot_from(row.try_get("first_entrant")?, row.try_get("first_bye")?),
            slot_from(row.try_get("second_entrant")?, row.try_get("second_bye")?),
        ],
        winner: decided
            .then(|| -> TournamentResult<Slot> {
                Ok(slot_from(row.try_get("winner_entrant")?, row.try_get("winner_bye")?))
            })
            .transpose()?,
        winner_next: row.try_get("winner_next")?,
        loser_next: row.try_get("loser_next")?,
        range,
        game_day: optional_unsigned(row, "game_day")?,
        table: optional_unsigned(row, "table_no")?,
        scheduled_at: row.try_get("scheduled_at")?,
        walkover: row.try_get("walkover")?,
    })
}

async fn save_match(conn: &mut PgConnection, m: &Match) -> TournamentResult<()> {
    let (first_entrant, first_bye) = slot_columns(m.slots[0]);
    let (second_entrant, second_bye) = slot_columns(m.slots[1]);
    let (winner_entrant, winner_bye) = slot_columns(m.winner.unwrap_or_default());

    sqlx::query(
        r#"
        INSERT INTO matches (id, tournament_id, kind, round, position,
                             first_entrant, first_bye, second_entrant, second_bye,
                             decided, winner_entrant, winner_bye, winner_next, loser_next,
                             range_from, range_to, game_day, table_no, scheduled_at, walkover)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19, $20)
        ON CONFLICT (id) DO UPDATE SET
            first_entrant = EXCLUDED.first_entrant,
            first_bye = EXCLUDED.first_bye,
            second_entrant = EXCLUDED.second_entrant,
            second_bye = EXCLUDED.second_bye,
            decided = EXCLUDED.decided,
            winner_entrant = EXCLUDED.winner_entrant,
            winner_bye = EXCLUDED.winner_bye,
            winner_next = EXCLUDED.winner_next,
            loser_next = EXCLUDED.loser_next,
            walkover = EXCLUDED.walkover
        "#,
    )
    .bind(m.id)
    .bind(m.tournament_id)
    .bind(m.kind.as_str())
    .bind(m.round as i32)
    .bind(m.position as i32)
    .bind(first_entrant)
    .bind(first_bye)
    .bind(second_entrant)
    .bind(second_bye)
    .bind(m.is_decided())
    .bind(winner_entrant)
    .bind(winner_bye)
    .bind(m.winner_next)
    .bind(m.loser_next)
    .bind(m.range.map(|r| r.from as i32))
    .bind(m.range.map(|r| r.to as i32))
    .bind(m.game_day.map(|d| d as i32))
    .bind(m.table.map(|t| t as i32))
    .bind(m.scheduled_at)
    .bind(m.walkover)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

async fn save_sets(conn: &mut PgConnection, match_id: MatchId, sets: &[SetScore]) -> TournamentResult<()> {
    sqlx::query("DELETE FROM match_sets WHERE match_id = $1")
        .bind(match_id)
        .execute(&mut *conn)
        .await?;
    for (set_no, set) in (1..).zip(sets) {
        sqlx::query(
            "INSERT INTO match_sets (match_id, set_no, first_score, second_score) VALUES ($1, $2, $3, $4)",
        )
        .bind(match_id)
        .bind(set_no as i32)
        .bind(set.first as i32)
        .bind(set.second as i32)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

async fn save_rubbers(conn: &mut PgConnection, match_id: MatchId, rubbers: &[Rubber]) -> TournamentResult<()> {
    sqlx::query("DELETE FROM match_rubbers WHERE match_id = $1")
        .bind(match_id)
        .execute(&mut *conn)
        .await?;
    for (rubber_no, rubber) in (1..).zip(rubbers) {
        for (set_no, set) in (1..).zip(&rubber.sets) {
            sqlx::query(
                "INSERT INTO match_rubbers (match_id, rubber_no, set_no, first_score, second_score)
                 VALUES ($1, $2, $3, $4, $5)",
            )
            .bind(match_id)
            .bind(rubber_no as i32)
            .bind(set_no as i32)
            .bind(set.first as i32)
            .bind(set.second as i32)
            .execute(&mut *conn)
            .await?;
        }
    }
    Ok(())
}

#[async_trait]
impl TournamentRepository for PgTournamentRepository {
    async fn create_tournament(&self, new: &NewTournament) -> TournamentResult<Tournament> {
        let row = sqlx::query(
            r#"
            INSERT INTO tournaments (name, format, state, starts_at)
            VALUES ($1, $2, $3, $4)
            RETURNING id, name, format, state, starts_at, ratings_applied, version
            "#,
        )
        .bind(&new.name)
        .bind(new.format.as_str())
        .bind(TournamentState::Created.as_str())
        .bind(new.starts_at)
        .fetch_one(&self.pool)
        .await?;

        tournament_from_row(&row)
    }

    async fn add_participant(
        &self,
        tournament_id: TournamentId,
        new: &NewParticipant,
    ) -> TournamentResult<Participant> {
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query(
            "INSERT INTO participants (name, rating, weight, nationality) VALUES ($1, $2, $3, $4)
             RETURNING id, name, rating, weight, nationality",
        )
        .bind(&new.name)
        .bind(new.rating)
        .bind(new.weight)
        .bind(&new.nationality)
        .fetch_one(&mut *tx)
        .await?;
        let participant = participant_from_row(&row)?;

        sqlx::query("INSERT INTO tournament_participants (tournament_id, participant_id) VALUES ($1, $2)")
            .bind(tournament_id)
            .bind(participant.id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        Ok(participant)
    }

    async fn enroll_participant(
        &self,
        tournament_id: TournamentId,
        participant_id: ParticipantId,
    ) -> TournamentResult<Participant> {
        let row = sqlx::query("SELECT id, name, rating, weight, nationality FROM participants WHERE id = $1")
            .bind(participant_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(EngineError::NotFound(Missing::Participant(participant_id)))?;

        sqlx::query(
            "INSERT INTO tournament_participants (tournament_id, participant_id) VALUES ($1, $2)
             ON CONFLICT DO NOTHING",
        )
        .bind(tournament_id)
        .bind(participant_id)
        .execute(&self.pool)
        .await?;

        participant_from_row(&row)
    }

    async fn add_team(&self, tournament_id: TournamentId, name: &str) -> TournamentResult<Team> {
        let row = sqlx::query(
            r#"
            INSERT INTO teams (tournament_id, name, team_order)
            SELECT $1, $2, COALESCE(MAX(team_order), 0) + 1 FROM teams WHERE tournament_id = $1
            RETURNING id, name, team_order
            "#,
        )
        .bind(tournament_id)
        .bind(name)
        .fetch_one(&self.pool)
        .await?;

        Ok(Team {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            order: unsigned(row.try_get("team_order")?, "team_order")?,
        })
    }

    async fn load_snapshot(&self, tournament_id: TournamentId) -> TournamentResult<TournamentSnapshot> {
        let row = sqlx::query(
            "SELECT id, name, format, state, starts_at, ratings_applied, version FROM tournaments WHERE id = $1",
        )
        .bind(tournament_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(EngineError::NotFound(Missing::Tournament(tournament_id)))?;
        let tournament = tournament_from_row(&row)?;

        let participants = sqlx::query(
            r#"
            SELECT p.id, p.name, p.rating, p.weight, p.nationality
            FROM participants p
            JOIN tournament_participants tp ON tp.participant_id = p.id
            WHERE tp.tournament_id = $1
            "#,
        )
        .bind(tournament_id)
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(participant_from_row)
        .collect::<TournamentResult<Vec<_>>>()?;

        let teams = sqlx::query("SELECT id, name, team_order FROM teams WHERE tournament_id = $1")
            .bind(tournament_id)
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(|row| -> TournamentResult<Team> {
                Ok(Team {
                    id: row.try_get("id")?,
                    name: row.try_get("name")?,
                    order: unsigned(row.try_get("team_order")?, "team_order")?,
                })
            })
            .collect::<TournamentResult<Vec<_>>>()?;

        let matches = sqlx::query("SELECT * FROM matches WHERE tournament_id = $1")
            .bind(tournament_id)
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(match_from_row)
            .collect::<TournamentResult<Vec<_>>>()?;

        let mut sets: HashMap<MatchId, Vec<SetScore>> = HashMap::new();
        let set_rows = sqlx::query(
            r#"
            SELECT s.match_id, s.first_score, s.second_score
            FROM match_sets s JOIN matches m ON m.id = s.match_id
            WHERE m.tournament_id = $1
            ORDER BY s.match_id, s.set_no
            "#,
        )
        .bind(tournament_id)
        .fetch_all(&self.pool)
        .await?;
        for row in &set_rows {
            let score = SetScore::new(
                unsigned(row.try_get("first_score")?, "first_score")?,
                unsigned(row.try_get("second_score")?, "second_score")?,
            );
            sets.entry(row.try_get("match_id")?).or_default().push(score);
        }

        let mut rubbers: HashMap<MatchId, Vec<Rubber>> = HashMap::new();
        let rubber_rows = sqlx::query(
            r#"
            SELECT r.match_id, r.rubber_no, r.first_score, r.second_score
            FROM match_rubbers r JOIN matches m ON m.id = r.match_id
            WHERE m.tournament_id = $1
            ORDER BY r.match_id, r.rubber_no, r.set_no
            "#,
        )
        .bind(tournament_id)
        .fetch_all(&self.pool)
        .await?;
        let mut current: Option<(MatchId, i32)> = None;
        for row in &rubber_rows {
            let key: (MatchId, i32) = (row.try_get("match_id")?, row.try_get("rubber_no")?);
            let score = SetScore::new(
                unsigned(row.try_get("first_score")?, "first_score")?,
                unsigned(row.try_get("second_score")?, "second_score")?,
            );
            let leg = rubbers.entry(key.0).or_default();
            if current != Some(key) {
                leg.push(Rubber { sets: Vec::new() });
                current = Some(key);
            }
            if let Some(rubber) = leg.last_mut() {
                rubber.sets.push(score);
            }
        }

        Ok(TournamentSnapshot::new(tournament, participants, teams).with_rows(matches, sets, rubbers))
    }

    async fn commit(&self, snapshot: &mut TournamentSnapshot) -> TournamentResult<()> {
        if snapshot.changes().is_empty() {
            return Ok(());
        }
        let tournament = snapshot.tournament().clone();
        let changes = snapshot.changes().clone();

        let mut tx = self.pool.begin().await?;
        let claimed = sqlx::query(
            "UPDATE tournaments SET state = $1, ratings_applied = $2, version = version + 1
             WHERE id = $3 AND version = $4",
        )
        .bind(tournament.state.as_str())
        .bind(tournament.ratings_applied)
        .bind(tournament.id)
        .bind(tournament.version)
        .execute(&mut *tx)
        .await?;
        if claimed.rows_affected() == 0 {
            return Err(TournamentError::Conflict(tournament.id));
        }

        for id in changes.created.iter().chain(&changes.updated) {
            save_match(&mut tx, &snapshot.get_match(*id)?).await?;
        }
        for id in &changes.sets {
            save_sets(&mut tx, *id, snapshot.sets(id)).await?;
        }
        for id in &changes.rubbers {
            save_rubbers(&mut tx, *id, snapshot.rubbers(id)).await?;
        }
        for participant in snapshot
            .participants()
            .iter()
            .filter(|p| changes.ratings.contains(&p.id))
        {
            sqlx::query("UPDATE participants SET rating = $1 WHERE id = $2")
                .bind(participant.rating)
                .bind(participant.id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        snapshot.mark_committed();
        Ok(())
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    next_id: i64,
    tournaments: HashMap<TournamentId, Tournament>,
    participants: HashMap<ParticipantId, Participant>,
    enrolled: HashMap<TournamentId, Vec<ParticipantId>>,
    teams: HashMap<TournamentId, Vec<Team>>,
    matches: HashMap<MatchId, Match>,
    sets: HashMap<MatchId, Vec<SetScore>>,
    rubbers: HashMap<MatchId, Vec<Rubber>>,
}

impl MemoryState {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn tournament(&self, id: TournamentId) -> TournamentResult<&Tournament> {
        self.tournaments
            .get(&id)
            .ok_or_else(|| EngineError::NotFound(Missing::Tournament(id)).into())
    }
}

/// In-process repository with the same commit semantics as the PostgreSQL
/// one, including the version check. Used by tests and dry runs.
#[derive(Clone, Default)]
pub struct MemoryTournamentRepository {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryTournamentRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TournamentRepository for MemoryTournamentRepository {
    async fn create_tournament(&self, new: &NewTournament) -> TournamentResult<Tournament> {
        let mut state = self.state.lock().await;
        let id = state.next_id();
        let tournament = Tournament::new(id, new.name.clone(), new.format, new.starts_at);
        state.tournaments.insert(id, tournament.clone());
        Ok(tournament)
    }

    async fn add_participant(
        &self,
        tournament_id: TournamentId,
        new: &NewParticipant,
    ) -> TournamentResult<Participant> {
        let mut state = self.state.lock().await;
        state.tournament(tournament_id)?;
        let participant = Participant {
            id: state.next_id(),
            name: new.name.clone(),
            rating: new.rating,
            weight: new.weight,
            nationality: new.nationality.clone(),
        };
        state.participants.insert(participant.id, participant.clone());
        state
            .enrolled
            .entry(tournament_id)
            .or_default()
            .push(participant.id);
        Ok(participant)
    }

    async fn enroll_participant(
        &self,
        tournament_id: TournamentId,
        participant_id: ParticipantId,
    ) -> TournamentResult<Participant> {
        let mut state = self.state.lock().await;
        state.tournament(tournament_id)?;
        let participant = state
            .participants
            .get(&participant_id)
            .cloned()
            .ok_or(EngineError::NotFound(Missing::Participant(participant_id)))?;
        let enrolled = state.enrolled.entry(tournament_id).or_default();
        if !enrolled.contains(&participant_id) {
            enrolled.push(participant_id);
        }
        Ok(participant)
    }

    async fn add_team(&self, tournament_id: TournamentId, name: &str) -> TournamentResult<Team> {
        let mut state = self.state.lock().await;
        state.tournament(tournament_id)?;
        let id = state.next_id();
        let teams = state.teams.entry(tournament_id).or_default();
        let team = Team {
            id,
            name: name.to_string(),
            order: teams.len() as u32 + 1,
        };
        teams.push(team.clone());
        Ok(team)
    }

    async fn load_snapshot(&self, tournament_id: TournamentId) -> TournamentResult<TournamentSnapshot> {
        let state = self.state.lock().await;
        let tournament = state.tournament(tournament_id)?.clone();
        let participants = state
            .enrolled
            .get(&tournament_id)
            .into_iter()
            .flatten()
            .filter_map(|id| state.participants.get(id).cloned())
            .collect();
        let teams = state.teams.get(&tournament_id).cloned().unwrap_or_default();
        let matches: Vec<Match> = state
            .matches
            .values()
            .filter(|m| m.tournament_id == tournament_id)
            .cloned()
            .collect();
        let pick = |id: &MatchId| matches.iter().any(|m| m.id == *id);
        let sets = state
            .sets
            .iter()
            .filter(|(id, _)| pick(id))
            .map(|(id, sets)| (*id, sets.clone()))
            .collect();
        let rubbers = state
            .rubbers
            .iter()
            .filter(|(id, _)| pick(id))
            .map(|(id, rubbers)| (*id, rubbers.clone()))
            .collect();

        Ok(TournamentSnapshot::new(tournament, participants, teams).with_rows(matches, sets, rubbers))
    }

    async fn commit(&self, snapshot: &mut TournamentSnapshot) -> TournamentResult<()> {
        if snapshot.changes().is_empty() {
            return Ok(());
        }
        let mut state = self.state.lock().await;
        let loaded = snapshot.tournament();
        if state.tournament(loaded.id)?.version != loaded.version {
            return Err(TournamentError::Conflict(loaded.id));
        }

        let changes = snapshot.changes().clone();
        let mut stored = loaded.clone();
        stored.version += 1;
        state.tournaments.insert(stored.id, stored);
        for id in changes.created.iter().chain(&changes.updated) {
            state.matches.insert(*id, snapshot.get_match(*id)?);
        }
        for id in &changes.sets {
            state.sets.insert(*id, snapshot.sets(id).to_vec());
        }
        for id in &changes.rubbers {
            state.rubbers.insert(*id, snapshot.rubbers(id).to_vec());
        }
        for participant in snapshot.participants() {
            if changes.ratings.contains(&participant.id) {
                state.participants.insert(participant.id, participant.clone());
            }
        }
        drop(state);

        snapshot.mark_committed();
        Ok(())
    }
}
