//! Runtime match state machine.
//!
//! A match is `pending` until a winner is written and `decided` afterwards.
//! Deciding a match copies the winner and loser into the first open slot of
//! their next matches, then drains a worklist of touched matches so that any
//! match left facing a bye is decided in the same call. After every call the
//! whole tournament is scanned for completion.

use std::collections::VecDeque;

use log::{debug, info};
use serde::{Deserialize, Serialize};

use super::errors::{EngineError, EngineResult};
use super::league::PHASE_ONE_ROUNDS;
use super::models::{Match, MatchId, MatchKind, SetScore, Side, Slot, set_wins};
use super::rating::RatingCalculator;
use super::store::{MatchField, MatchFilter, MatchStore};
use crate::tournament::models::{ParticipantId, TournamentFormat, TournamentId, TournamentState};

/// Outcome of one reporting or seeding call
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Advancement {
    /// Matches decided by the call in decision order, byes included
    pub decided: Vec<MatchId>,
    /// The call completed the tournament
    pub finished: bool,
}

/// A final ranking entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Placement {
    pub place: u32,
    pub participant: ParticipantId,
}

/// Pick the winning side of a match from its sets.
///
/// A bye loses to anything, and of two byes the first slot wins. Otherwise
/// the side with more strictly-won sets wins.
///
/// # Errors
///
/// `AlreadyDecided`, `MatchNotReady` when a slot is still empty, and `Draw`
/// when both real sides won the same number of sets.
pub fn determine_winner(m: &Match, sets: &[SetScore]) -> EngineResult<Side> {
    if m.is_decided() {
        return Err(EngineError::AlreadyDecided(m.id));
    }
    match m.slots {
        [Slot::Empty, _] | [_, Slot::Empty] => Err(EngineError::MatchNotReady(m.id)),
        [Slot::Bye, Slot::Real(_)] => Ok(Side::Second),
        [Slot::Real(_), Slot::Bye] | [Slot::Bye, Slot::Bye] => Ok(Side::First),
        [Slot::Real(_), Slot::Real(_)] => {
            let (first, second) = set_wins(sets);
            match first.cmp(&second) {
                std::cmp::Ordering::Greater => Ok(Side::First),
                std::cmp::Ordering::Less => Ok(Side::Second),
                std::cmp::Ordering::Equal => Err(EngineError::Draw(m.id)),
            }
        }
    }
}

pub struct AdvancementEngine<'a> {
    store: &'a mut dyn MatchStore,
}

impl<'a> AdvancementEngine<'a> {
    pub fn new(store: &'a mut dyn MatchStore) -> Self {
        Self { store }
    }

    /// Load a match that may take a result: still pending, tournament in play.
    pub fn load_reportable(&self, match_id: MatchId) -> EngineResult<Match> {
        let m = self.store.get_match(match_id)?;
        if m.is_decided() {
            return Err(EngineError::AlreadyDecided(match_id));
        }
        self.store
            .get_tournament(m.tournament_id)?
            .require_state(TournamentState::PlayersAssigned)?;
        Ok(m)
    }

    /// Replace the recorded sets of a pending match
    pub fn record_sets(&mut self, match_id: MatchId, sets: &[SetScore]) -> EngineResult<()> {
        self.load_reportable(match_id)?;
        self.store.replace_sets(match_id, sets)
    }

    /// Decide a match from its recorded sets and advance both sides.
    pub fn report_result(&mut self, match_id: MatchId) -> EngineResult<Advancement> {
        let m = self.load_reportable(match_id)?;
        let sets = self.store.load_sets(match_id)?;
        let side = determine_winner(&m, &sets)?;
        self.advance(m, side)
    }

    /// Award the match to `side` without play: three 11-0 sets are recorded
    /// and the match is flagged as a walkover.
    pub fn report_walkover(&mut self, match_id: MatchId, side: Side) -> EngineResult<Advancement> {
        let m = self.load_reportable(match_id)?;
        if !m.is_contested() {
            return Err(EngineError::MatchNotReady(match_id));
        }
        self.store
            .replace_sets(match_id, &[SetScore::walkover(side); 3])?;
        self.store
            .update_match(match_id, &[MatchField::Walkover(true)])?;
        info!("Match {match_id} awarded by walkover");
        self.advance(m, side)
    }

    /// Write the result of a pending match and cascade it.
    pub fn advance(&mut self, m: Match, side: Side) -> EngineResult<Advancement> {
        let mut outcome = Advancement::default();
        let touched = self.decide(&m, side)?;
        outcome.decided.push(m.id);
        self.resolve_byes(touched, &mut outcome)?;
        outcome.finished = self.check_completion(m.tournament_id)?;
        Ok(outcome)
    }

    /// Drain matches that now face a bye. Each auto-decided match queues the
    /// matches it fed, so whole bye chains settle in one call.
    pub fn resolve_byes(
        &mut self,
        start: impl IntoIterator<Item = MatchId>,
        outcome: &mut Advancement,
    ) -> EngineResult<()> {
        let mut queue: VecDeque<MatchId> = start.into_iter().collect();
        while let Some(id) = queue.pop_front() {
            let m = self.store.get_match(id)?;
            if m.is_decided() {
                continue;
            }
            let side = match m.slots {
                [Slot::Bye, Slot::Real(_)] => Side::Second,
                [Slot::Real(_), Slot::Bye] | [Slot::Bye, Slot::Bye] => Side::First,
                _ => continue,
            };
            debug!("Match {id} decided by bye");
            let touched = self.decide(&m, side)?;
            outcome.decided.push(id);
            queue.extend(touched);
        }
        Ok(())
    }

    fn decide(&mut self, m: &Match, side: Side) -> EngineResult<Vec<MatchId>> {
        let winner = m.slot(side);
        let loser = m.slot(side.other());
        self.store.update_match(m.id, &[MatchField::Winner(winner)])?;
        debug!(
            "Match {} ({} round {} #{}) won by {:?}",
            m.id,
            m.kind.as_str(),
            m.round,
            m.position,
            winner
        );

        let mut touched = Vec::with_capacity(2);
        if let Some(next) = m.winner_next {
            self.place(m.id, next, winner)?;
            touched.push(next);
        }
        if let Some(next) = m.loser_next {
            self.place(m.id, next, loser)?;
            touched.push(next);
        }
        Ok(touched)
    }

    fn place(&mut self, from: MatchId, target: MatchId, entrant: Slot) -> EngineResult<()> {
        let next = self.store.get_match(target).map_err(|_| {
            EngineError::InvariantViolation(format!("match {from} links to missing match {target}"))
        })?;
        let side = next.first_open_slot().ok_or_else(|| {
            EngineError::InvariantViolation(format!("match {target} has no open slot for match {from}"))
        })?;
        self.store
            .update_match(target, &[MatchField::Slot(side, entrant)])
    }

    /// Mark the tournament finished once no match is pending. League
    /// tournaments also need their regrouping legs to exist. Elimination
    /// formats then get their rating pass.
    pub fn check_completion(&mut self, tournament_id: TournamentId) -> EngineResult<bool> {
        let tournament = self.store.get_tournament(tournament_id)?;
        if tournament.state == TournamentState::Finished {
            return Ok(true);
        }

        let pending = self
            .store
            .query_matches(tournament_id, &MatchFilter::all().undecided())?;
        if !pending.is_empty() {
            return Ok(false);
        }

        if tournament.format == TournamentFormat::League {
            let regrouped = self
                .store
                .query_matches(tournament_id, &MatchFilter::kind(MatchKind::League))?
                .iter()
                .any(|leg| leg.round > PHASE_ONE_ROUNDS);
            if !regrouped {
                return Ok(false);
            }
        }

        self.store
            .update_tournament_state(tournament_id, TournamentState::Finished)?;
        info!("Tournament {tournament_id} finished");

        if tournament.format != TournamentFormat::League && !tournament.ratings_applied {
            RatingCalculator::new(&mut *self.store).apply(tournament_id)?;
        }
        Ok(true)
    }
}

/// Final ranking from decided terminal matches: the winner of a `[a, a+1]`
/// match takes place `a`, the loser `a + 1`. Byes are left out.
pub fn final_placements(store: &dyn MatchStore, tournament_id: TournamentId) -> EngineResult<Vec<Placement>> {
    let mut placements = Vec::new();
    for m in store.query_matches(tournament_id, &MatchFilter::all())? {
        let (Some(range), true) = (m.range, m.is_terminal()) else {
            continue;
        };
        if m.kind == MatchKind::League || !range.is_terminal() {
            continue;
        }
        let finishers = [(range.from, m.winner), (range.to, m.loser())];
        for (place, slot) in finishers {
            if let Some(Slot::Real(participant)) = slot {
                placements.push(Placement { place, participant });
            }
        }
    }
    placements.sort_by_key(|p| p.place);
    Ok(placements)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bracket::models::NewMatch;
    use uuid::Uuid;

    fn pending(first: Slot, second: Slot) -> Match {
        NewMatch::new(1, MatchKind::Winner, 1, 1)
            .with_slots(first, second)
            .into_match(Uuid::new_v4())
    }

    #[test]
    fn test_set_majority_wins() {
        let m = pending(Slot::Real(1), Slot::Real(2));
        let sets = [SetScore::new(11, 5), SetScore::new(7, 11), SetScore::new(6, 11)];
        assert_eq!(determine_winner(&m, &sets).unwrap(), Side::Second);
    }

    #[test]
    fn test_draw_is_rejected() {
        let m = pending(Slot::Real(1), Slot::Real(2));
        let sets = [SetScore::new(11, 5), SetScore::new(7, 11)];
        assert_eq!(determine_winner(&m, &sets).unwrap_err(), EngineError::Draw(m.id));
        assert_eq!(determine_winner(&m, &[]).unwrap_err(), EngineError::Draw(m.id));
    }

    #[test]
    fn test_bye_bypasses_sets() {
        let m = pending(Slot::Bye, Slot::Real(2));
        assert_eq!(determine_winner(&m, &[SetScore::new(11, 0)]).unwrap(), Side::Second);
        let both = pending(Slot::Bye, Slot::Bye);
        assert_eq!(determine_winner(&both, &[]).unwrap(), Side::First);
    }

    #[test]
    fn test_empty_slot_is_not_ready() {
        let m = pending(Slot::Real(1), Slot::Empty);
        assert_eq!(determine_winner(&m, &[]).unwrap_err(), EngineError::MatchNotReady(m.id));
    }

    #[test]
    fn test_decided_match_is_rejected() {
        let mut m = pending(Slot::Real(1), Slot::Real(2));
        m.winner = Some(Slot::Real(1));
        assert_eq!(
            determine_winner(&m, &[SetScore::new(11, 2)]).unwrap_err(),
            EngineError::AlreadyDecided(m.id)
        );
    }
}
