//! Integration tests for the eight-team league.
//!
//! Covers phase-one generation, leg reporting from rubbers, the standings
//! table, regrouping and league completion.

use chrono::{TimeZone, Utc};
use rand::{SeedableRng, rngs::StdRng};
use std::collections::HashSet;
use table_tennis::bracket::{
    self, EngineError, LeagueScheduler, Match, MatchFilter, MatchKind, MatchStore, Rubber,
    SetScore, Side, Slot, TournamentSnapshot,
};
use table_tennis::tournament::{Team, Tournament, TournamentFormat, TournamentState};

const TID: i64 = 21;

fn league() -> TournamentSnapshot {
    let starts_at = Utc.with_ymd_and_hms(2026, 3, 7, 9, 0, 0).unwrap();
    let mut tournament = Tournament::new(TID, "Club League", TournamentFormat::League, starts_at);
    tournament.state = TournamentState::Started;
    let teams = (1..=8)
        .map(|order| Team {
            id: 100 + i64::from(order),
            name: format!("Team {order}"),
            order,
        })
        .collect();
    let mut snap = TournamentSnapshot::new(tournament, Vec::new(), teams);
    bracket::generate(&mut snap, TID).unwrap();
    snap
}

fn rubber(winner: Side) -> Rubber {
    let set = match winner {
        Side::First => SetScore::new(11, 6),
        Side::Second => SetScore::new(6, 11),
    };
    Rubber { sets: vec![set; 3] }
}

/// Lower team ID wins 4-1
fn report_leg(snap: &mut TournamentSnapshot, leg: &Match) -> bracket::Advancement {
    let winner = match leg.slots {
        [Slot::Real(home), Slot::Real(away)] if away < home => Side::Second,
        _ => Side::First,
    };
    let mut rubbers = vec![rubber(winner); 4];
    rubbers.insert(1, rubber(winner.other()));
    LeagueScheduler::new(snap).record_rubbers(leg.id, &rubbers).unwrap();
    bracket::report_result(snap, leg.id).unwrap()
}

fn legs(snap: &TournamentSnapshot) -> Vec<Match> {
    snap.query_matches(TID, &MatchFilter::kind(MatchKind::League))
        .unwrap()
}

fn play_pending(snap: &mut TournamentSnapshot) -> bool {
    let mut finished = false;
    for leg in legs(snap).into_iter().filter(|leg| !leg.is_decided()) {
        finished = report_leg(snap, &leg).finished;
    }
    finished
}

#[cfg(test)]
mod league_tests {
    use super::*;

    #[test]
    fn test_phase_one_is_ready_to_play() {
        let snap = league();
        assert_eq!(snap.tournament().state, TournamentState::PlayersAssigned);

        let legs = legs(&snap);
        assert_eq!(legs.len(), 28);
        assert!(legs.iter().all(Match::is_contested));
        assert_eq!(legs[0].slots, [Slot::Real(101), Slot::Real(102)]);
        assert_eq!(
            legs[0].scheduled_at,
            Some(Utc.with_ymd_and_hms(2026, 3, 7, 10, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_leg_needs_a_clear_winner() {
        let mut snap = league();
        let leg = legs(&snap).remove(0);

        LeagueScheduler::new(&mut snap)
            .record_rubbers(leg.id, &vec![rubber(Side::First); 3])
            .unwrap();
        assert_eq!(
            bracket::report_result(&mut snap, leg.id).unwrap_err(),
            EngineError::Undecided(leg.id)
        );

        // two sets each is no rubber at all
        let split = Rubber {
            sets: vec![
                SetScore::new(11, 3),
                SetScore::new(11, 3),
                SetScore::new(3, 11),
                SetScore::new(3, 11),
            ],
        };
        let mut rubbers = vec![rubber(Side::First); 3];
        rubbers.push(split);
        LeagueScheduler::new(&mut snap).record_rubbers(leg.id, &rubbers).unwrap();
        assert_eq!(
            bracket::report_result(&mut snap, leg.id).unwrap_err(),
            EngineError::Undecided(leg.id)
        );

        let mut rubbers = vec![rubber(Side::First); 4];
        rubbers.extend(vec![rubber(Side::Second); 4]);
        LeagueScheduler::new(&mut snap).record_rubbers(leg.id, &rubbers).unwrap();
        assert_eq!(
            bracket::report_result(&mut snap, leg.id).unwrap_err(),
            EngineError::Draw(leg.id)
        );
    }

    #[test]
    fn test_rubber_without_sets_is_rejected() {
        let mut snap = league();
        let leg = legs(&snap).remove(0);
        LeagueScheduler::new(&mut snap)
            .record_rubbers(leg.id, &[rubber(Side::First)])
            .unwrap();

        let rubbers = vec![rubber(Side::First), Rubber { sets: Vec::new() }, rubber(Side::Second)];
        let err = LeagueScheduler::new(&mut snap)
            .record_rubbers(leg.id, &rubbers)
            .unwrap_err();
        assert!(matches!(err, EngineError::InvariantViolation(ref msg) if msg.contains("rubber 2")));

        // earlier rubbers stay in place
        assert_eq!(snap.load_rubbers(leg.id).unwrap(), vec![rubber(Side::First)]);
    }

    #[test]
    fn test_standings_after_phase_one() {
        let mut snap = league();
        assert!(!play_pending(&mut snap));
        assert_eq!(snap.tournament().state, TournamentState::PlayersAssigned);

        let table = LeagueScheduler::new(&mut snap).standings(TID).unwrap();
        let rows: Vec<(i64, u32, u32)> = table.iter().map(|row| (row.team, row.points, row.played)).collect();
        let expected: Vec<(i64, u32, u32)> = (1..=8).map(|order| (100 + order, 15 - order as u32, 7)).collect();
        assert_eq!(rows, expected);
    }

    #[test]
    fn test_regroup_waits_for_phase_one() {
        let mut snap = league();
        let mut rng = StdRng::seed_from_u64(3);
        assert_eq!(
            LeagueScheduler::new(&mut snap).regroup(TID, &mut rng).unwrap_err(),
            EngineError::PhaseIncomplete { undecided: 28 }
        );

        let first = legs(&snap).remove(0);
        report_leg(&mut snap, &first);
        assert_eq!(
            LeagueScheduler::new(&mut snap).regroup(TID, &mut rng).unwrap_err(),
            EngineError::PhaseIncomplete { undecided: 27 }
        );
    }

    #[test]
    fn test_regroup_reverses_home_and_away() {
        let mut snap = league();
        play_pending(&mut snap);
        let phase_one: HashSet<[Slot; 2]> = legs(&snap).iter().map(|leg| leg.slots).collect();

        let mut rng = StdRng::seed_from_u64(3);
        let created = LeagueScheduler::new(&mut snap).regroup(TID, &mut rng).unwrap();
        assert_eq!(created.len(), 28);

        for id in &created {
            let leg = snap.get_match(*id).unwrap();
            assert!((8..=14).contains(&leg.round));
            let [home, away] = leg.slots;
            assert!(!phase_one.contains(&leg.slots), "{home:?} hosted {away:?} twice");
            assert!(phase_one.contains(&[away, home]));
        }

        // ranked 2nd hosts ranked 1st on the first regrouped round
        let opener = snap
            .query_matches(TID, &MatchFilter::kind(MatchKind::League).round(8).position(1))
            .unwrap()
            .remove(0);
        assert_eq!(opener.slots, [Slot::Real(102), Slot::Real(101)]);
        assert_eq!((opener.game_day, opener.table), (Some(3), Some(1)));
        assert_eq!(
            opener.scheduled_at,
            Some(Utc.with_ymd_and_hms(2026, 3, 9, 13, 0, 0).unwrap())
        );

        // game days follow one another, so the closing round is four days in
        let closer = snap
            .query_matches(TID, &MatchFilter::kind(MatchKind::League).round(14).position(4))
            .unwrap()
            .remove(0);
        assert_eq!(closer.game_day, Some(5));
        assert_eq!(
            closer.scheduled_at,
            Some(Utc.with_ymd_and_hms(2026, 3, 11, 16, 0, 0).unwrap())
        );

        assert_eq!(
            LeagueScheduler::new(&mut snap).regroup(TID, &mut rng).unwrap_err(),
            EngineError::AlreadyRegrouped
        );
    }

    #[test]
    fn test_seeded_regroup_is_reproducible() {
        let mut snap = league();
        // every home team wins, leaving ties on points
        for leg in legs(&snap) {
            let mut rubbers = vec![rubber(Side::First); 4];
            rubbers.push(rubber(Side::Second));
            LeagueScheduler::new(&mut snap).record_rubbers(leg.id, &rubbers).unwrap();
            bracket::report_result(&mut snap, leg.id).unwrap();
        }

        let mut other = snap.clone();
        let slots_of = |snap: &TournamentSnapshot, ids: &[bracket::MatchId]| -> Vec<[Slot; 2]> {
            ids.iter().map(|id| snap.get_match(*id).unwrap().slots).collect()
        };
        let a = LeagueScheduler::new(&mut snap)
            .regroup(TID, &mut StdRng::seed_from_u64(42))
            .unwrap();
        let b = LeagueScheduler::new(&mut other)
            .regroup(TID, &mut StdRng::seed_from_u64(42))
            .unwrap();
        assert_eq!(slots_of(&snap, &a), slots_of(&other, &b));
    }

    #[test]
    fn test_league_finishes_after_second_phase() {
        let mut snap = league();
        play_pending(&mut snap);
        LeagueScheduler::new(&mut snap)
            .regroup(TID, &mut StdRng::seed_from_u64(9))
            .unwrap();
        assert_eq!(snap.tournament().state, TournamentState::PlayersAssigned);

        assert!(play_pending(&mut snap));
        let tournament = snap.get_tournament(TID).unwrap();
        assert_eq!(tournament.state, TournamentState::Finished);
        // leagues do not move ratings
        assert!(!tournament.ratings_applied);

        let table = LeagueScheduler::new(&mut snap).standings(TID).unwrap();
        assert!(table.iter().all(|row| row.played == 14));
        assert_eq!(table[0].team, 101);
        assert_eq!(table[0].points, 28);
    }
}
