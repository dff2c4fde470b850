//! Integration tests for elimination brackets.
//!
//! Tests run generation, seeding and result reporting end to end on an
//! in-memory snapshot, including byes, walkovers, placement brackets and the
//! rating pass.

use chrono::Utc;
use std::collections::HashSet;
use table_tennis::bracket::{
    self, Advancement, AdvancementEngine, EngineError, Match, MatchFilter, MatchKind, MatchStore,
    Placement, SetScore, Side, Slot, TournamentSnapshot, final_placements,
};
use table_tennis::tournament::{Participant, Tournament, TournamentFormat, TournamentState};

const TID: i64 = 11;

/// Started tournament whose players are seeded in ID order
fn started(format: TournamentFormat, players: i64) -> TournamentSnapshot {
    let mut tournament = Tournament::new(TID, "Club Cup", format, Utc::now());
    tournament.state = TournamentState::Started;
    let participants = (1..=players)
        .map(|id| Participant {
            id,
            name: format!("Player {id}"),
            rating: 1000 - 10 * id as i32,
            weight: 20,
            nationality: None,
        })
        .collect();
    TournamentSnapshot::new(tournament, participants, Vec::new())
}

fn sets_for(winner: Side) -> Vec<SetScore> {
    let sets = [(11, 7), (11, 9), (8, 11), (11, 4)];
    sets.iter()
        .map(|&(w, l)| match winner {
            Side::First => SetScore::new(w, l),
            Side::Second => SetScore::new(l, w),
        })
        .collect()
}

/// Lower ID is the stronger player
fn favourite(m: &Match) -> Side {
    match m.slots {
        [Slot::Real(first), Slot::Real(second)] if second < first => Side::Second,
        _ => Side::First,
    }
}

fn play(snap: &mut TournamentSnapshot, m: &Match, winner: Side) -> Advancement {
    AdvancementEngine::new(snap)
        .record_sets(m.id, &sets_for(winner))
        .unwrap();
    bracket::report_result(snap, m.id).unwrap()
}

fn ready(snap: &TournamentSnapshot) -> Vec<Match> {
    snap.query_matches(TID, &MatchFilter::all().undecided())
        .unwrap()
        .into_iter()
        .filter(|m| m.is_contested())
        .collect()
}

/// Report every playable match until none is left, favourite always winning
fn play_out(snap: &mut TournamentSnapshot) -> usize {
    let mut played = 0;
    while let Some(m) = ready(snap).into_iter().next() {
        play(snap, &m, favourite(&m));
        played += 1;
        assert!(played < 10_000, "bracket never settles");
    }
    played
}

fn placements(snap: &TournamentSnapshot) -> Vec<Placement> {
    final_placements(snap, TID).unwrap()
}

fn in_order(count: u32) -> Vec<Placement> {
    (1..=count)
        .map(|place| Placement {
            place,
            participant: i64::from(place),
        })
        .collect()
}

#[cfg(test)]
mod elimination_tests {
    use super::*;

    #[test]
    fn test_four_player_single_elimination() {
        let mut snap = started(TournamentFormat::SingleElimination, 4);
        let report = bracket::generate(&mut snap, TID).unwrap();
        assert_eq!(report.matches, 3);
        assert_eq!(report.placement_matches, 0);
        assert_eq!(report.byes_resolved, 0);
        assert_eq!(report.state, TournamentState::PlayersAssigned);

        let semis = snap
            .query_matches(TID, &MatchFilter::kind(MatchKind::Winner).round(1))
            .unwrap();
        assert_eq!(semis[0].slots, [Slot::Real(1), Slot::Real(4)]);
        assert_eq!(semis[1].slots, [Slot::Real(2), Slot::Real(3)]);

        let first = play(&mut snap, &semis[0], Side::First);
        assert_eq!(first.decided, vec![semis[0].id]);
        assert!(!first.finished);
        play(&mut snap, &semis[1], Side::First);

        let final_match = snap.get_match(semis[0].winner_next.unwrap()).unwrap();
        assert_eq!(final_match.slots, [Slot::Real(1), Slot::Real(2)]);
        let last = play(&mut snap, &final_match, Side::Second);
        assert!(last.finished);

        let tournament = snap.get_tournament(TID).unwrap();
        assert_eq!(tournament.state, TournamentState::Finished);
        assert!(tournament.ratings_applied);
        assert_eq!(
            placements(&snap),
            vec![
                Placement { place: 1, participant: 2 },
                Placement { place: 2, participant: 1 },
            ]
        );
    }

    #[test]
    fn test_byes_advance_top_seeds() {
        let mut snap = started(TournamentFormat::SingleElimination, 5);
        let report = bracket::generate(&mut snap, TID).unwrap();
        assert_eq!(report.matches, 7);
        assert_eq!(report.byes_resolved, 3);

        // only 4 vs 5 is playable in the opening round
        let playable = ready(&snap);
        assert_eq!(playable.len(), 2);
        assert_eq!(playable[0].slots, [Slot::Real(4), Slot::Real(5)]);
        assert_eq!(playable[1].slots, [Slot::Real(3), Slot::Real(2)]);

        play_out(&mut snap);
        assert_eq!(snap.tournament().state, TournamentState::Finished);
        assert_eq!(placements(&snap), in_order(2));
    }

    #[test]
    fn test_double_elimination_decides_every_place() {
        let mut snap = started(TournamentFormat::DoubleElimination, 8);
        let report = bracket::generate(&mut snap, TID).unwrap();
        assert_eq!(report.matches, 14);
        assert_eq!(report.placement_matches, 2);

        let played = play_out(&mut snap);
        assert_eq!(played, 14);
        assert_eq!(snap.tournament().state, TournamentState::Finished);
        assert_eq!(placements(&snap), in_order(8));
    }

    #[test]
    fn test_bronze_match_decides_third_place() {
        let mut snap = started(TournamentFormat::DoubleEliminationFinal, 8);
        let report = bracket::generate(&mut snap, TID).unwrap();
        assert_eq!(report.matches, 12);
        assert_eq!(report.placement_matches, 1);

        let finals = snap
            .query_matches(TID, &MatchFilter::kind(MatchKind::Winner).round(3))
            .unwrap();
        assert_eq!(finals.len(), 2);
        assert_eq!(finals[1].range.map(|r| r.to_string()), Some("3-4".to_string()));

        play_out(&mut snap);
        let bronze = snap.get_match(finals[1].id).unwrap();
        assert_eq!(bronze.slots, [Slot::Real(4), Slot::Real(3)]);
        assert_eq!(bronze.winner, Some(Slot::Real(3)));
        assert_eq!(placements(&snap), in_order(8));
    }

    #[test]
    fn test_bye_cascades_into_loser_bracket() {
        let mut snap = started(TournamentFormat::DoubleElimination, 3);
        bracket::generate(&mut snap, TID).unwrap();

        // 1 got a bye; the bye it beat now waits in the loser final
        let loser_final = snap
            .query_matches(TID, &MatchFilter::kind(MatchKind::Loser))
            .unwrap()
            .remove(0);
        assert_eq!(loser_final.slots, [Slot::Bye, Slot::Empty]);

        let opener = ready(&snap).remove(0);
        assert_eq!(opener.slots, [Slot::Real(2), Slot::Real(3)]);
        let outcome = play(&mut snap, &opener, Side::First);
        assert_eq!(outcome.decided, vec![opener.id, loser_final.id]);

        let loser_final = snap.get_match(loser_final.id).unwrap();
        assert_eq!(loser_final.winner, Some(Slot::Real(3)));

        play_out(&mut snap);
        assert_eq!(placements(&snap), in_order(3));
    }

    #[test]
    fn test_every_field_size_completes() {
        let formats = [
            TournamentFormat::SingleElimination,
            TournamentFormat::DoubleElimination,
            TournamentFormat::DoubleEliminationFinal,
        ];
        for format in formats {
            for players in 2..=20 {
                let mut snap = started(format, players);
                bracket::generate(&mut snap, TID).unwrap();
                play_out(&mut snap);

                assert!(
                    snap.query_matches(TID, &MatchFilter::all().undecided())
                        .unwrap()
                        .is_empty(),
                    "{format} with {players} players left matches pending"
                );
                assert_eq!(snap.tournament().state, TournamentState::Finished);

                let placed = placements(&snap);
                assert_eq!(&placed[..2], &in_order(2)[..], "{format} with {players} players");
                let places: HashSet<u32> = placed.iter().map(|p| p.place).collect();
                let people: HashSet<i64> = placed.iter().map(|p| p.participant).collect();
                assert_eq!(places.len(), placed.len());
                assert_eq!(people.len(), placed.len());
                if format != TournamentFormat::SingleElimination {
                    assert_eq!(placed.len(), players as usize, "{format} with {players} players");
                }
            }
        }
    }

    #[test]
    fn test_report_errors() {
        let mut snap = started(TournamentFormat::SingleElimination, 4);
        bracket::generate(&mut snap, TID).unwrap();
        let semis = snap
            .query_matches(TID, &MatchFilter::kind(MatchKind::Winner).round(1))
            .unwrap();
        let final_id = semis[0].winner_next.unwrap();

        assert_eq!(
            bracket::report_result(&mut snap, final_id).unwrap_err(),
            EngineError::MatchNotReady(final_id)
        );

        AdvancementEngine::new(&mut snap)
            .record_sets(semis[0].id, &[SetScore::new(11, 5), SetScore::new(5, 11)])
            .unwrap();
        assert_eq!(
            bracket::report_result(&mut snap, semis[0].id).unwrap_err(),
            EngineError::Draw(semis[0].id)
        );

        play(&mut snap, &semis[0], Side::First);
        assert_eq!(
            bracket::report_result(&mut snap, semis[0].id).unwrap_err(),
            EngineError::AlreadyDecided(semis[0].id)
        );
        assert!(matches!(
            AdvancementEngine::new(&mut snap).record_sets(semis[0].id, &sets_for(Side::Second)),
            Err(EngineError::AlreadyDecided(_))
        ));

        // generation only runs once
        assert!(matches!(
            bracket::generate(&mut snap, TID),
            Err(EngineError::InvalidState { .. })
        ));
    }

    #[test]
    fn test_walkover() {
        let mut snap = started(TournamentFormat::SingleElimination, 4);
        bracket::generate(&mut snap, TID).unwrap();
        let semi = ready(&snap).remove(0);

        let outcome = bracket::report_walkover(&mut snap, semi.id, Side::Second).unwrap();
        assert_eq!(outcome.decided, vec![semi.id]);

        let semi = snap.get_match(semi.id).unwrap();
        assert!(semi.walkover);
        assert_eq!(semi.winner, Some(Slot::Real(4)));
        assert_eq!(snap.sets(&semi.id), &[SetScore::new(0, 11); 3]);

        let final_match = snap.get_match(semi.winner_next.unwrap()).unwrap();
        assert_eq!(final_match.slots, [Slot::Real(4), Slot::Empty]);
        assert_eq!(
            bracket::report_walkover(&mut snap, final_match.id, Side::First).unwrap_err(),
            EngineError::MatchNotReady(final_match.id)
        );
    }

    #[test]
    fn test_ratings_after_close_final() {
        let mut tournament = Tournament::new(TID, "Duel", TournamentFormat::SingleElimination, Utc::now());
        tournament.state = TournamentState::Started;
        let players = vec![
            Participant {
                id: 1,
                name: "Favourite".to_string(),
                rating: 100,
                weight: 10,
                nationality: None,
            },
            Participant {
                id: 2,
                name: "Challenger".to_string(),
                rating: 95,
                weight: 10,
                nationality: None,
            },
        ];
        let mut snap = TournamentSnapshot::new(tournament, players, Vec::new());
        bracket::generate(&mut snap, TID).unwrap();
        let final_match = ready(&snap).remove(0);
        assert!(play(&mut snap, &final_match, Side::First).finished);

        // a 5 point gap credits the favourite 1: winner (11)/(11), loser (10)/(9)
        let ratings: Vec<(i64, i32)> = snap.participants().iter().map(|p| (p.id, p.rating)).collect();
        assert_eq!(ratings, vec![(1, 101), (2, 96)]);
        assert!(snap.tournament().ratings_applied);
    }

    #[test]
    fn test_snapshot_json_keeps_bracket_state() {
        let mut snap = started(TournamentFormat::DoubleElimination, 5);
        bracket::generate(&mut snap, TID).unwrap();
        let opener = ready(&snap).remove(0);
        play(&mut snap, &opener, Side::First);

        let json = serde_json::to_value(snap.view()).unwrap();
        assert_eq!(json["tournament"]["state"], "players_assigned");
        assert_eq!(json["participants"].as_array().unwrap().len(), 5);

        let bye_slots = json["matches"]
            .as_array()
            .unwrap()
            .iter()
            .flat_map(|m| m["slots"].as_array().unwrap().clone())
            .filter(|slot| slot == "bye")
            .count();
        assert!(bye_slots >= 3);

        let decoded: Vec<Match> = serde_json::from_value(json["matches"].clone()).unwrap();
        let stored: Vec<Match> = snap.matches().into_iter().cloned().collect();
        assert_eq!(decoded, stored);

        let decided = decoded.iter().find(|m| m.id == opener.id).unwrap();
        assert_eq!(decided.winner, Some(opener.slots[0]));
    }
}
