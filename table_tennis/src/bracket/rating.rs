//! Rating adjustment after an elimination tournament.
//!
//! Every contested match credits its winner with `Hv` and its loser with
//! `Hk = -Hv`, where `Hv` depends on the rating gap before the tournament:
//!
//! | winner was     | gap    | `Hv`            |
//! |----------------|--------|-----------------|
//! | higher rated   | 0–2    | 2               |
//! | higher rated   | 3–13   | 1               |
//! | higher rated   | 14+    | 0               |
//! | not higher     | any    | `(gap + 5) / 3` |
//!
//! An unrated side (rating 0) makes the match count for nothing. The totals
//! are folded into the rating once per participant:
//! `((Hv - Hk) * 10 + Hv) / max(1, weight + Hv + Hk)`.

use std::collections::HashMap;

use log::{info, warn};
use serde::{Deserialize, Serialize};

use super::errors::{EngineError, EngineResult, Missing};
use super::models::MatchKind;
use super::store::{MatchFilter, MatchStore};
use crate::tournament::models::{ParticipantId, TournamentId};

/// Winner credit for one match, given both prior ratings
pub fn match_credit(winner_rating: i32, loser_rating: i32) -> i32 {
    if winner_rating == 0 || loser_rating == 0 {
        return 0;
    }
    let gap = (winner_rating - loser_rating).abs();
    if winner_rating > loser_rating {
        match gap {
            0..=2 => 2,
            3..=13 => 1,
            _ => 0,
        }
    } else {
        (gap + 5) / 3
    }
}

/// Rating change owed to one participant for `hv` won and `hk` lost credits
pub fn rating_delta(weight: i32, hv: i32, hk: i32) -> i32 {
    ((hv - hk) * 10 + hv) / (weight + hv + hk).max(1)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RatingChange {
    pub participant: ParticipantId,
    pub before: i32,
    pub after: i32,
    pub hv: i32,
    pub hk: i32,
}

#[derive(Debug, Default, Clone, Copy)]
struct Credits {
    hv: i32,
    hk: i32,
}

pub struct RatingCalculator<'a> {
    store: &'a mut dyn MatchStore,
}

impl<'a> RatingCalculator<'a> {
    pub fn new(store: &'a mut dyn MatchStore) -> Self {
        Self { store }
    }

    /// Apply the rating pass. A tournament that already had its pass is
    /// left alone and yields no changes.
    pub fn apply(&mut self, tournament_id: TournamentId) -> EngineResult<Vec<RatingChange>> {
        let tournament = self.store.get_tournament(tournament_id)?;
        if tournament.ratings_applied {
            warn!("Tournament {tournament_id}: ratings already applied, skipping");
            return Ok(Vec::new());
        }

        let participants = self.store.load_participants(tournament_id)?;
        let prior: HashMap<ParticipantId, i32> =
            participants.iter().map(|p| (p.id, p.rating)).collect();
        let rating_of = |id: ParticipantId| {
            prior
                .get(&id)
                .copied()
                .ok_or(EngineError::NotFound(Missing::Participant(id)))
        };

        let mut credits: HashMap<ParticipantId, Credits> = HashMap::new();
        for m in self.store.query_matches(tournament_id, &MatchFilter::all())? {
            if m.kind == MatchKind::League || !m.is_contested() {
                continue;
            }
            let Some(side) = m.winner_side() else {
                continue;
            };
            let (Some(winner), Some(loser)) = (
                m.slot(side).participant(),
                m.slot(side.other()).participant(),
            ) else {
                continue;
            };
            let hv = match_credit(rating_of(winner)?, rating_of(loser)?);
            credits.entry(winner).or_default().hv += hv;
            credits.entry(loser).or_default().hk -= hv;
        }

        let mut changes = Vec::with_capacity(credits.len());
        for participant in &participants {
            let Some(credit) = credits.get(&participant.id) else {
                continue;
            };
            let after = participant.rating + rating_delta(participant.weight, credit.hv, credit.hk);
            if after != participant.rating {
                self.store.update_participant_rating(participant.id, after)?;
            }
            changes.push(RatingChange {
                participant: participant.id,
                before: participant.rating,
                after,
                hv: credit.hv,
                hk: credit.hk,
            });
        }

        self.store.mark_ratings_applied(tournament_id)?;
        info!(
            "Tournament {tournament_id}: ratings adjusted for {} participants",
            changes.len()
        );
        Ok(changes)
    }
}
