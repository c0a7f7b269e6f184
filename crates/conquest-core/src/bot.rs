//! AI Bot players for Conquest.
//!
//! This module provides different difficulty levels of AI players:
//! - Easy: Random valid moves
//! - Medium: Basic heuristics (stack the front line, only take good fights)
//! - Hard: Medium plus region awareness

use crate::actions::GameAction;
use crate::game::{GamePhase, GameState};
use crate::map::{GameMap, TerritoryId};
use crate::player::PlayerId;
use rand::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Bot difficulty level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BotDifficulty {
    Easy,
    Medium,
    Hard,
}

/// A bot player that can decide on actions
pub struct Bot {
    pub player_id: PlayerId,
    pub difficulty: BotDifficulty,
    rng: StdRng,
}

impl Bot {
    pub fn new(player_id: impl Into<PlayerId>, difficulty: BotDifficulty) -> Self {
        Self {
            player_id: player_id.into(),
            difficulty,
            rng: StdRng::from_entropy(),
        }
    }

    pub fn with_seed(player_id: impl Into<PlayerId>, difficulty: BotDifficulty, seed: u64) -> Self {
        Self {
            player_id: player_id.into(),
            difficulty,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Choose an action from the valid actions
    pub fn choose_action(&mut self, game: &GameState, map: &GameMap) -> Option<GameAction> {
        let valid_actions = game.valid_actions(map, &self.player_id);
        if valid_actions.is_empty() {
            return None;
        }

        match self.difficulty {
            BotDifficulty::Easy => self.choose_easy(&valid_actions),
            BotDifficulty::Medium => self.choose_strategic(game, map, &valid_actions, false),
            BotDifficulty::Hard => self.choose_strategic(game, map, &valid_actions, true),
        }
    }

    /// Easy: Just pick a random valid action
    fn choose_easy(&mut self, actions: &[GameAction]) -> Option<GameAction> {
        actions.choose(&mut self.rng).cloned()
    }

    fn choose_strategic(
        &mut self,
        game: &GameState,
        map: &GameMap,
        actions: &[GameAction],
        regions: bool,
    ) -> Option<GameAction> {
        // Lobby: start as soon as we may, otherwise take a seat
        if actions.contains(&GameAction::StartGame {}) {
            return Some(GameAction::StartGame {});
        }
        if actions.contains(&GameAction::JoinGame {}) {
            return Some(GameAction::JoinGame {});
        }

        match &game.phase {
            GamePhase::Deploy { reinforcements } if *reinforcements > 0 => {
                let target = self.deploy_target(game, map, regions)?;
                Some(GameAction::Deploy {
                    deployments: BTreeMap::from([(target, *reinforcements)]),
                })
            }

            GamePhase::Attack => {
                let best = actions
                    .iter()
                    .filter_map(|action| match action {
                        GameAction::Attack { from, to } => {
                            let score = self.score_attack(game, map, from, to, regions)?;
                            Some((score, action))
                        }
                        _ => None,
                    })
                    .max_by_key(|(score, _)| *score);

                match best {
                    Some((_, attack)) => Some(attack.clone()),
                    None => Some(GameAction::EndAttack {}),
                }
            }

            // Push everything forward; the conquered territory is the new front
            GamePhase::Advance { .. } => actions
                .iter()
                .max_by_key(|a| match a {
                    GameAction::Advance { troops, .. } => *troops,
                    _ => 0,
                })
                .cloned(),

            GamePhase::Reinforce => Some(
                self.consolidate(game, map)
                    .unwrap_or(GameAction::EndReinforce {}),
            ),

            // Deploy with nothing left, or nothing smarter to do
            _ => actions.first().cloned(),
        }
    }

    /// Owned territories with at least one enemy neighbour
    fn frontier<'a>(&self, game: &'a GameState, map: &GameMap) -> Vec<&'a TerritoryId> {
        game.owned_by(&self.player_id)
            .filter(|t| {
                map.neighbours(t)
                    .into_iter()
                    .flatten()
                    .any(|n| game.owner_of(n) != Some(self.player_id.as_str()))
            })
            .collect()
    }

    /// Medium stacks the strongest front-line territory. Hard instead backs
    /// the territory next to the most valuable weak target.
    fn deploy_target(&mut self, game: &GameState, map: &GameMap, regions: bool) -> Option<TerritoryId> {
        let frontier = self.frontier(game, map);

        let best = if regions {
            frontier.iter().max_by_key(|t| {
                map.neighbours(t)
                    .into_iter()
                    .flatten()
                    .filter(|n| game.owner_of(n) != Some(self.player_id.as_str()))
                    .map(|n| self.target_value(game, map, n) - game.troops(n) as i32)
                    .max()
                    .unwrap_or(i32::MIN)
            })
        } else {
            frontier.iter().max_by_key(|t| game.troops(t))
        };

        match best {
            Some(t) => Some((*t).clone()),
            None => game.owned_by(&self.player_id).choose(&mut self.rng).cloned(),
        }
    }

    /// Only fights with a clear troop advantage are worth taking
    fn score_attack(
        &self,
        game: &GameState,
        map: &GameMap,
        from: &str,
        to: &str,
        regions: bool,
    ) -> Option<i32> {
        let attacking = game.troops(from) as i32;
        let defending = game.troops(to) as i32;
        if attacking <= defending + 1 {
            return None;
        }

        let mut score = (attacking - defending) * 2;
        if regions {
            score += self.target_value(game, map, to);
        }
        Some(score)
    }

    /// Value of taking `territory`: region bonuses it would complete for us
    /// or break for someone else
    fn target_value(&self, game: &GameState, map: &GameMap, territory: &str) -> i32 {
        let Some(region) = map.region_of(territory).and_then(|r| map.region(r)) else {
            return 0;
        };

        let missing = region
            .territories
            .iter()
            .filter(|t| game.owner_of(t) != Some(self.player_id.as_str()))
            .count();
        let defender_holds_all = game.owner_of(territory).is_some_and(|owner| {
            region
                .territories
                .iter()
                .all(|t| game.owner_of(t) == Some(owner))
        });

        let bonus = region.bonus as i32;
        match (missing, defender_holds_all) {
            (1, _) => bonus * 3,
            (_, true) => bonus * 2,
            _ => 0,
        }
    }

    /// Move the biggest idle stack behind the lines to the nearest front
    fn consolidate(&self, game: &GameState, map: &GameMap) -> Option<GameAction> {
        let frontier = self.frontier(game, map);
        let (from, troops) = game
            .owned_by(&self.player_id)
            .filter(|t| !frontier.contains(t))
            .map(|t| (t, game.troops(t)))
            .filter(|(_, troops)| *troops > 1)
            .max_by_key(|(_, troops)| *troops)?;

        let distances = map.distances_from(from, u32::MAX);
        let to = frontier
            .iter()
            .filter_map(|t| distances.get(*t).map(|d| (*t, *d)))
            .min_by_key(|(_, d)| *d)?
            .0;

        Some(GameAction::Reinforce {
            from: from.clone(),
            to: to.clone(),
            troops: troops - 1,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::combat::LoadedDice;
    use crate::game::TerritoryState;
    use crate::map::{Region, Territory};

    /// a - b - c - d in a line, with {c, d} worth 4
    fn line_map() -> GameMap {
        let mut territories = BTreeMap::new();
        territories.insert("a".to_string(), Territory::with_neighbours(["b"]));
        territories.insert("b".to_string(), Territory::with_neighbours(["a", "c"]));
        territories.insert("c".to_string(), Territory::with_neighbours(["b", "d"]));
        territories.insert("d".to_string(), Territory::with_neighbours(["c"]));
        let mut regions = BTreeMap::new();
        regions.insert("east".to_string(), Region::new(4, ["c", "d"]));
        GameMap::new("line", territories, regions).unwrap()
    }

    fn game_with(map: &GameMap, board: &[(&str, &str, u32)]) -> GameState {
        let mut game = GameState::new(map);
        let mut dice = LoadedDice::default();
        for name in ["alice", "bob"] {
            game.apply_action(map, name, GameAction::JoinGame {}, &mut dice)
                .unwrap();
        }
        game.apply_action(map, "alice", GameAction::StartGame {}, &mut dice)
            .unwrap();
        for (territory, owner, troops) in board {
            game.territories
                .insert(territory.to_string(), TerritoryState::owned_by(*owner, *troops));
        }
        game
    }

    #[test]
    fn test_bot_creation() {
        let bot = Bot::new("alice", BotDifficulty::Easy);
        assert_eq!(bot.player_id, "alice");
        assert_eq!(bot.difficulty, BotDifficulty::Easy);
    }

    #[test]
    fn test_easy_bot_chooses_valid_action() {
        let map = line_map();
        let game = game_with(&map, &[]);
        let mut bot = Bot::with_seed("alice", BotDifficulty::Easy, 42);

        let action = bot.choose_action(&game, &map).unwrap();
        assert!(game.valid_actions(&map, "alice").contains(&action));
    }

    #[test]
    fn test_bot_waits_for_its_turn() {
        let map = line_map();
        let game = game_with(&map, &[]);
        let mut bot = Bot::with_seed("bob", BotDifficulty::Medium, 1);
        assert_eq!(bot.choose_action(&game, &map), None);
    }

    #[test]
    fn test_medium_bot_deploys_everything_on_the_front() {
        let map = line_map();
        let game = game_with(&map, &[("a", "alice", 9), ("b", "alice", 2), ("c", "bob", 3)]);
        let mut bot = Bot::with_seed("alice", BotDifficulty::Medium, 1);

        let action = bot.choose_action(&game, &map).unwrap();
        // a is behind the lines, so the whole deploy goes to b
        assert_eq!(
            action,
            GameAction::Deploy {
                deployments: BTreeMap::from([("b".to_string(), 3)]),
            }
        );
    }

    #[test]
    fn test_medium_bot_skips_bad_fights() {
        let map = line_map();
        let mut game = game_with(&map, &[("b", "alice", 3), ("c", "bob", 3)]);
        game.phase = GamePhase::Attack;
        let mut bot = Bot::with_seed("alice", BotDifficulty::Medium, 1);

        assert_eq!(bot.choose_action(&game, &map), Some(GameAction::EndAttack {}));

        game.territories
            .insert("b".to_string(), TerritoryState::owned_by("alice", 8));
        assert_eq!(
            bot.choose_action(&game, &map),
            Some(GameAction::Attack {
                from: "b".into(),
                to: "c".into()
            })
        );
    }

    #[test]
    fn test_bot_advances_everything() {
        let map = line_map();
        let mut game = game_with(&map, &[("b", "alice", 6), ("c", "alice", 1)]);
        game.phase = GamePhase::Advance {
            from: "b".into(),
            to: "c".into(),
        };
        let mut bot = Bot::with_seed("alice", BotDifficulty::Medium, 1);

        assert_eq!(
            bot.choose_action(&game, &map),
            Some(GameAction::Advance {
                from: "b".into(),
                to: "c".into(),
                troops: 5
            })
        );
    }

    #[test]
    fn test_medium_bot_moves_idle_troops_forward() {
        let map = line_map();
        let mut game = game_with(
            &map,
            &[("a", "alice", 7), ("b", "alice", 1), ("c", "bob", 3), ("d", "bob", 3)],
        );
        game.phase = GamePhase::Reinforce;
        let mut bot = Bot::with_seed("alice", BotDifficulty::Medium, 1);

        assert_eq!(
            bot.choose_action(&game, &map),
            Some(GameAction::Reinforce {
                from: "a".into(),
                to: "b".into(),
                troops: 6
            })
        );
    }

    #[test]
    fn test_hard_bot_prefers_completing_a_region() {
        let map = line_map();
        // b can hit a (weak, no region) or c (completes east with d)
        let mut game = game_with(
            &map,
            &[("a", "bob", 1), ("b", "alice", 9), ("c", "bob", 3), ("d", "alice", 1)],
        );
        game.phase = GamePhase::Attack;

        let mut medium = Bot::with_seed("alice", BotDifficulty::Medium, 1);
        assert_eq!(
            medium.choose_action(&game, &map),
            Some(GameAction::Attack {
                from: "b".into(),
                to: "a".into()
            })
        );

        let mut hard = Bot::with_seed("alice", BotDifficulty::Hard, 1);
        assert_eq!(
            hard.choose_action(&game, &map),
            Some(GameAction::Attack {
                from: "b".into(),
                to: "c".into()
            })
        );
    }
}
