//! Seeds participants into round one of the winner bracket.

use log::info;

use super::advancement::{Advancement, AdvancementEngine};
use super::errors::{EngineError, EngineResult, Missing};
use super::math;
use super::models::{MatchKind, Side, Slot};
use super::store::{MatchField, MatchFilter, MatchStore};
use crate::tournament::models::{TournamentId, TournamentState};

pub struct SeedAssigner<'a> {
    store: &'a mut dyn MatchStore,
}

impl<'a> SeedAssigner<'a> {
    pub fn new(store: &'a mut dyn MatchStore) -> Self {
        Self { store }
    }

    /// Place participants by rating into the opening round.
    ///
    /// The `k`-th opener receives the seeds of the `k`-th pair of the seeding
    /// permutation. Seeds beyond the participant count become byes, which are
    /// resolved right away along with anything they unblock.
    ///
    /// # Errors
    ///
    /// `InvalidState` unless matches have been created, `NotFound` when the
    /// winner bracket has no opening round.
    pub fn assign(&mut self, tournament_id: TournamentId) -> EngineResult<Advancement> {
        self.store
            .get_tournament(tournament_id)?
            .require_state(TournamentState::MatchesCreated)?;

        let openers = self.store.query_matches(
            tournament_id,
            &MatchFilter::kind(MatchKind::Winner).round(1),
        )?;
        if openers.is_empty() {
            return Err(EngineError::NotFound(Missing::RoundOneMatches(tournament_id)));
        }

        let participants = self.store.load_participants(tournament_id)?;
        let depth = (openers.len() as u32 * 2).trailing_zeros();
        let pairs = math::seed_permutation(depth);
        let seat = |seed: u32| {
            seed.checked_sub(1)
                .and_then(|index| participants.get(index as usize))
                .map_or(Slot::Bye, |p| Slot::Real(p.id))
        };

        let mut byes = Vec::new();
        for (opener, &(top, bottom)) in openers.iter().zip(&pairs) {
            let (first, second) = (seat(top), seat(bottom));
            self.store.update_match(
                opener.id,
                &[
                    MatchField::Slot(Side::First, first),
                    MatchField::Slot(Side::Second, second),
                ],
            )?;
            if first.is_bye() || second.is_bye() {
                byes.push(opener.id);
            }
        }

        self.store
            .update_tournament_state(tournament_id, TournamentState::PlayersAssigned)?;
        info!(
            "Tournament {tournament_id}: seeded {} participants into {} openers, {} byes",
            participants.len(),
            openers.len(),
            byes.len()
        );

        let mut engine = AdvancementEngine::new(&mut *self.store);
        let mut outcome = Advancement::default();
        engine.resolve_byes(byes, &mut outcome)?;
        outcome.finished = engine.check_completion(tournament_id)?;
        Ok(outcome)
    }
}
