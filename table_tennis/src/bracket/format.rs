//! Per-format strategy dispatch and the generation pipeline.
//!
//! Every format runs the same pipeline (create matches, create placement
//! brackets, link, assign players) but fills in the phases differently. The
//! strategies are zero-sized and dispatched through [`FormatStrategy`].
//!
//! ## Example
//!
//! ```
//! use table_tennis::bracket::format::FormatStrategy;
//! use table_tennis::tournament::models::TournamentFormat;
//!
//! let format = TournamentFormat::from_type("double_elimination_final").unwrap();
//! assert!(matches!(
//!     FormatStrategy::from(format),
//!     FormatStrategy::DoubleElimination(d) if d.bronze
//! ));
//! ```

use enum_dispatch::enum_dispatch;
use log::info;
use serde::{Deserialize, Serialize};

use super::advancement::{Advancement, AdvancementEngine};
use super::errors::{EngineError, EngineResult};
use super::league::LeagueScheduler;
use super::linker::BracketLinker;
use super::models::{MatchId, MatchKind, Side};
use super::seeding::SeedAssigner;
use super::store::{MatchFilter, MatchStore};
use super::topology::{BracketPlan, TopologyBuilder, TournamentTopology};
use crate::tournament::models::{Tournament, TournamentFormat, TournamentId, TournamentState};

#[enum_dispatch]
pub trait BracketFormat {
    /// Create every match row the format starts with
    fn create_matches(&self, store: &mut dyn MatchStore, tournament: &Tournament) -> EngineResult<TournamentTopology>;

    /// Create sub-brackets derived from the main topology
    fn create_brackets(
        &self,
        _store: &mut dyn MatchStore,
        _tournament: &Tournament,
        _topology: &TournamentTopology,
    ) -> EngineResult<()> {
        Ok(())
    }

    /// Wire winner and loser links
    fn link_matches(
        &self,
        _store: &mut dyn MatchStore,
        _tournament: &Tournament,
        _topology: &TournamentTopology,
    ) -> EngineResult<()> {
        Ok(())
    }

    fn assign_players(&self, store: &mut dyn MatchStore, tournament: &Tournament) -> EngineResult<Advancement>;

    fn report_result(&self, store: &mut dyn MatchStore, match_id: MatchId) -> EngineResult<Advancement>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SingleElimination;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DoubleElimination {
    /// Semifinal losers play for 3rd place instead of dropping down
    pub bronze: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RoundRobinLeague;

fn entrant_count(store: &dyn MatchStore, tournament: &Tournament) -> EngineResult<u32> {
    let count = store.load_participants(tournament.id)?.len();
    u32::try_from(count)
        .map_err(|_| EngineError::InvariantViolation(format!("{count} entrants do not fit a bracket")))
}

impl BracketFormat for SingleElimination {
    fn create_matches(&self, store: &mut dyn MatchStore, tournament: &Tournament) -> EngineResult<TournamentTopology> {
        let plan = BracketPlan::single(entrant_count(store, tournament)?)?;
        TopologyBuilder::new(store).build_elimination(tournament, plan)
    }

    fn link_matches(
        &self,
        store: &mut dyn MatchStore,
        tournament: &Tournament,
        topology: &TournamentTopology,
    ) -> EngineResult<()> {
        BracketLinker::new(store).link(tournament.id, topology)
    }

    fn assign_players(&self, store: &mut dyn MatchStore, tournament: &Tournament) -> EngineResult<Advancement> {
        SeedAssigner::new(store).assign(tournament.id)
    }

    fn report_result(&self, store: &mut dyn MatchStore, match_id: MatchId) -> EngineResult<Advancement> {
        AdvancementEngine::new(store).report_result(match_id)
    }
}

impl BracketFormat for DoubleElimination {
    fn create_matches(&self, store: &mut dyn MatchStore, tournament: &Tournament) -> EngineResult<TournamentTopology> {
        let entrants = entrant_count(store, tournament)?;
        let plan = if self.bronze {
            BracketPlan::double_with_bronze(entrants)?
        } else {
            BracketPlan::double(entrants)?
        };
        TopologyBuilder::new(store).build_elimination(tournament, plan)
    }

    fn create_brackets(
        &self,
        store: &mut dyn MatchStore,
        tournament: &Tournament,
        topology: &TournamentTopology,
    ) -> EngineResult<()> {
        BracketLinker::new(store).build_placement_brackets(tournament.id, topology)?;
        Ok(())
    }

    fn link_matches(
        &self,
        store: &mut dyn MatchStore,
        tournament: &Tournament,
        topology: &TournamentTopology,
    ) -> EngineResult<()> {
        BracketLinker::new(store).link(tournament.id, topology)
    }

    fn assign_players(&self, store: &mut dyn MatchStore, tournament: &Tournament) -> EngineResult<Advancement> {
        SeedAssigner::new(store).assign(tournament.id)
    }

    fn report_result(&self, store: &mut dyn MatchStore, match_id: MatchId) -> EngineResult<Advancement> {
        AdvancementEngine::new(store).report_result(match_id)
    }
}

impl BracketFormat for RoundRobinLeague {
    fn create_matches(&self, store: &mut dyn MatchStore, tournament: &Tournament) -> EngineResult<TournamentTopology> {
        LeagueScheduler::new(store).generate(tournament)
    }

    fn assign_players(&self, store: &mut dyn MatchStore, tournament: &Tournament) -> EngineResult<Advancement> {
        LeagueScheduler::new(store).assign(tournament.id)
    }

    fn report_result(&self, store: &mut dyn MatchStore, match_id: MatchId) -> EngineResult<Advancement> {
        LeagueScheduler::new(store).report_leg(match_id)
    }
}

/// Strategy for one tournament format
#[enum_dispatch(BracketFormat)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatStrategy {
    SingleElimination,
    DoubleElimination,
    RoundRobinLeague,
}

impl From<TournamentFormat> for FormatStrategy {
    fn from(format: TournamentFormat) -> Self {
        match format {
            TournamentFormat::SingleElimination => SingleElimination.into(),
            TournamentFormat::DoubleElimination => DoubleElimination { bronze: false }.into(),
            TournamentFormat::DoubleEliminationFinal => DoubleElimination { bronze: true }.into(),
            TournamentFormat::League => RoundRobinLeague.into(),
        }
    }
}

/// Summary of a generation run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationReport {
    pub tournament: TournamentId,
    pub matches: usize,
    pub placement_matches: usize,
    /// Matches decided by byes while seeding
    pub byes_resolved: usize,
    pub state: TournamentState,
}

/// Build, link and seed a started tournament.
///
/// # Errors
///
/// `InvalidState` unless the tournament is `Started`. Any phase error aborts
/// the run; callers working on a snapshot discard it.
pub fn generate(store: &mut dyn MatchStore, tournament_id: TournamentId) -> EngineResult<GenerationReport> {
    let tournament = store.get_tournament(tournament_id)?;
    tournament.require_state(TournamentState::Started)?;

    let strategy = FormatStrategy::from(tournament.format);
    let topology = strategy.create_matches(store, &tournament)?;
    strategy.create_brackets(store, &tournament, &topology)?;
    strategy.link_matches(store, &tournament, &topology)?;
    let seeded = strategy.assign_players(store, &tournament)?;

    let matches = store.query_matches(tournament_id, &MatchFilter::all())?;
    let report = GenerationReport {
        tournament: tournament_id,
        matches: matches.len(),
        placement_matches: matches
            .iter()
            .filter(|m| m.kind == MatchKind::Placement)
            .count(),
        byes_resolved: seeded.decided.len(),
        state: store.get_tournament(tournament_id)?.state,
    };
    info!(
        "Tournament {tournament_id} generated as {}: {} matches, {} byes resolved",
        tournament.format, report.matches, report.byes_resolved
    );
    Ok(report)
}

/// Report a match result with the rule its format uses
pub fn report_result(store: &mut dyn MatchStore, match_id: MatchId) -> EngineResult<Advancement> {
    let m = store.get_match(match_id)?;
    let format = store.get_tournament(m.tournament_id)?.format;
    FormatStrategy::from(format).report_result(store, match_id)
}

/// Award a match without play
pub fn report_walkover(store: &mut dyn MatchStore, match_id: MatchId, side: Side) -> EngineResult<Advancement> {
    AdvancementEngine::new(store).report_walkover(match_id, side)
}
