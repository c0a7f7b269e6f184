//! Property tests: arbitrary action sequences never corrupt the state.

use conquest_core::*;
use proptest::prelude::*;
use std::collections::BTreeMap;

const PLAYERS: [&str; 3] = ["alice", "bob", "carol"];

fn territory() -> impl Strategy<Value = String> {
    prop::sample::select(vec!["Arafan", "Creer", "Moncton", "Nowhere"]).prop_map(String::from)
}

fn action() -> impl Strategy<Value = GameAction> {
    prop_oneof![
        Just(GameAction::JoinGame {}),
        Just(GameAction::StartGame {}),
        prop::collection::btree_map(territory(), 0u32..6, 0..3)
            .prop_map(|deployments| GameAction::Deploy { deployments }),
        Just(GameAction::EndDeploy {}),
        (territory(), territory()).prop_map(|(from, to)| GameAction::Attack { from, to }),
        (territory(), territory(), 0u32..8)
            .prop_map(|(from, to, troops)| GameAction::Advance { from, to, troops }),
        Just(GameAction::EndAttack {}),
        (territory(), territory(), 0u32..8)
            .prop_map(|(from, to, troops)| GameAction::Reinforce { from, to, troops }),
        Just(GameAction::EndReinforce {}),
    ]
}

fn submission() -> impl Strategy<Value = (&'static str, GameAction)> {
    (prop::sample::select(PLAYERS.to_vec()), action())
}

proptest! {
    #[test]
    fn prop_resolver_is_atomic_and_replayable(
        steps in prop::collection::vec(submission(), 1..120),
        faces in prop::collection::vec(1u8..=6, 1..12),
    ) {
        let map = GameMap::alpha();
        let mut game = GameState::new(&map);
        let mut log = EventLog::new(game.clone());
        let mut dice = LoadedDice::new(faces);

        for (player, action) in steps {
            let before = game.clone();
            match game.apply_action(&map, player, action, &mut dice) {
                Ok(events) => {
                    let mut replayed = before.clone();
                    for event in &events {
                        replayed.apply_event(event).unwrap();
                    }
                    prop_assert_eq!(&replayed, &game);
                    log.append(events);
                }
                Err(_) => {
                    prop_assert_eq!(&before, &game);
                }
            }

            if game.phase != GamePhase::Lobby {
                for state in game.territories.values() {
                    prop_assert!(state.owner.is_some());
                    prop_assert!(state.troops >= 1);
                }
            }
        }

        prop_assert_eq!(log.replay().unwrap(), game);
    }

    #[test]
    fn prop_battle_losses_match_dice_pairs(
        attacker in prop::collection::vec(1u8..=6, 1..=3),
        defender in prop::collection::vec(1u8..=6, 1..=2),
    ) {
        let losses = combat::resolve(&attacker, &defender);
        let pairs = attacker.len().min(defender.len()) as u32;
        prop_assert_eq!(losses.total(), pairs);
        prop_assert!(losses.defender <= defender.len() as u32);
    }

    #[test]
    fn prop_dice_counts_leave_a_garrison(troops in 0u32..100) {
        let dice = combat::attacker_dice(troops);
        prop_assert!(dice <= 3);
        prop_assert!(dice < troops.max(1));
        prop_assert!(combat::defender_dice(troops) <= troops.min(2));
    }

    #[test]
    fn prop_reinforcements_never_below_minimum(
        territories in 0u32..200,
        bonus in 0u32..20,
    ) {
        let granted = reinforcements_for(territories, bonus);
        prop_assert!(granted >= 3 + bonus);
        prop_assert_eq!(granted - bonus, (territories / 3).max(3));
    }
}

#[test]
fn test_deploy_amounts_are_capped_by_reinforcements() {
    let map = GameMap::alpha();
    let mut game = GameState::new(&map);
    let mut dice = LoadedDice::default();
    for player in ["alice", "bob"] {
        game.apply_action(&map, player, GameAction::JoinGame {}, &mut dice)
            .unwrap();
    }
    game.apply_action(&map, "alice", GameAction::StartGame {}, &mut dice)
        .unwrap();

    let err = game
        .apply_action(
            &map,
            "alice",
            GameAction::Deploy {
                deployments: BTreeMap::from([
                    ("Arafan".to_string(), u32::MAX),
                    ("Moncton".to_string(), u32::MAX),
                ]),
            },
            &mut dice,
        )
        .unwrap_err();
    assert!(matches!(err, GameError::InsufficientReinforcements { .. }));
}
