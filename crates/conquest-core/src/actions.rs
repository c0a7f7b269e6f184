//! Actions that players can take.
//!
//! This module defines all possible actions in the game and the events
//! that result from those actions. Both serialize as externally tagged
//! objects, e.g. `{"attack": {"from": "Arafan", "to": "Creer"}}`.

use crate::game::{GamePhase, GameState};
use crate::map::TerritoryId;
use crate::player::{PlayerColor, PlayerId, PlayerStats};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// All possible actions a player can take
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameAction {
    // ==================== Lobby ====================
    /// Take a seat in a game that has not started
    JoinGame {},
    /// Deal the territories and begin the first turn (host only)
    StartGame {},

    // ==================== Deploy Phase ====================
    /// Place reinforcements on owned territories
    Deploy {
        deployments: BTreeMap<TerritoryId, u32>,
    },
    /// Finish deploying (all reinforcements must be placed)
    EndDeploy {},

    // ==================== Attack Phase ====================
    /// Attack a neighbouring territory
    Attack { from: TerritoryId, to: TerritoryId },
    /// Move troops into a just-conquered territory
    Advance {
        from: TerritoryId,
        to: TerritoryId,
        troops: u32,
    },
    /// Stop attacking and move on to reinforcing
    EndAttack {},

    // ==================== Reinforce Phase ====================
    /// Move troops between two owned territories (ends the turn)
    Reinforce {
        from: TerritoryId,
        to: TerritoryId,
        troops: u32,
    },
    /// End the turn without moving
    EndReinforce {},
}

impl GameAction {
    /// Short name for logging
    pub fn name(&self) -> &'static str {
        match self {
            GameAction::JoinGame {} => "join_game",
            GameAction::StartGame {} => "start_game",
            GameAction::Deploy { .. } => "deploy",
            GameAction::EndDeploy {} => "end_deploy",
            GameAction::Attack { .. } => "attack",
            GameAction::Advance { .. } => "advance",
            GameAction::EndAttack {} => "end_attack",
            GameAction::Reinforce { .. } => "reinforce",
            GameAction::EndReinforce {} => "end_reinforce",
        }
    }
}

/// An action together with the player submitting it, as posted by clients:
/// `{"player": "alice", "deploy": {"deployments": {"Arafan": 3}}}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Submission {
    pub player: PlayerId,
    #[serde(flatten)]
    pub action: GameAction,
}

impl Submission {
    pub fn new(player: impl Into<PlayerId>, action: GameAction) -> Self {
        Self {
            player: player.into(),
            action,
        }
    }
}

/// Events that occur as a result of actions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameEvent {
    /// A player took a seat in the lobby
    PlayerJoined { player: PlayerId, color: PlayerColor },

    /// Troops were placed
    Deploy {
        player: PlayerId,
        deployments: BTreeMap<TerritoryId, u32>,
    },

    /// A round of combat was fought
    Attack {
        player: PlayerId,
        from: TerritoryId,
        to: TerritoryId,
        defender: PlayerId,
        attacker_dice: Vec<u8>,
        defender_dice: Vec<u8>,
        attacker_losses: u32,
        defender_losses: u32,
        conquered: bool,
    },

    /// Troops moved into a conquered territory
    Advance {
        player: PlayerId,
        from: TerritoryId,
        to: TerritoryId,
        troops: u32,
    },

    /// Troops moved between two owned territories
    Reinforce {
        player: PlayerId,
        from: TerritoryId,
        to: TerritoryId,
        troops: u32,
    },

    /// The phase and/or active player changed
    PhaseChanged {
        old_player: Option<PlayerId>,
        new_player: Option<PlayerId>,
        old_phase: GamePhase,
        new_phase: GamePhase,
    },

    /// Derived player stats were recomputed
    StatsChanged {
        updates: BTreeMap<PlayerId, PlayerStats>,
    },

    /// The whole state, replacing whatever the observer had
    Snapshot { state: Box<GameState> },
}

impl GameEvent {
    /// Short name for logging
    pub fn name(&self) -> &'static str {
        match self {
            GameEvent::PlayerJoined { .. } => "player_joined",
            GameEvent::Deploy { .. } => "deploy",
            GameEvent::Attack { .. } => "attack",
            GameEvent::Advance { .. } => "advance",
            GameEvent::Reinforce { .. } => "reinforce",
            GameEvent::PhaseChanged { .. } => "phase_changed",
            GameEvent::StatsChanged { .. } => "stats_changed",
            GameEvent::Snapshot { .. } => "snapshot",
        }
    }

    pub fn snapshot(state: &GameState) -> Self {
        GameEvent::Snapshot {
            state: Box::new(state.clone()),
        }
    }
}

/// An event with its position in a game's event stream. Sequence numbers
/// start at 1 and increase by one per event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequencedEvent {
    pub seq: u64,
    pub event: GameEvent,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_submission_wire_format() {
        let raw = json!({
            "player": "alice",
            "deploy": { "deployments": { "Arafan": 3 } }
        });
        let submission: Submission = serde_json::from_value(raw).unwrap();
        assert_eq!(submission.player, "alice");
        assert!(matches!(
            submission.action,
            GameAction::Deploy { ref deployments } if deployments["Arafan"] == 3
        ));
    }

    #[test]
    fn test_phase_end_actions_are_objects() {
        let raw = json!({ "player": "bob", "end_attack": {} });
        let submission: Submission = serde_json::from_value(raw).unwrap();
        assert_eq!(submission.action, GameAction::EndAttack {});

        let value = serde_json::to_value(&submission).unwrap();
        assert_eq!(value, json!({ "player": "bob", "end_attack": {} }));
    }

    #[test]
    fn test_negative_troops_rejected_at_parse() {
        let raw = json!({
            "player": "alice",
            "deploy": { "deployments": { "Arafan": -2 } }
        });
        assert!(serde_json::from_value::<Submission>(raw).is_err());
    }

    #[test]
    fn test_unknown_action_rejected_at_parse() {
        let raw = json!({ "player": "alice", "surrender": {} });
        assert!(serde_json::from_value::<Submission>(raw).is_err());
    }

    #[test]
    fn test_event_wire_format() {
        let event = GameEvent::Advance {
            player: "alice".into(),
            from: "Arafan".into(),
            to: "Creer".into(),
            troops: 2,
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(
            value,
            json!({ "advance": { "player": "alice", "from": "Arafan", "to": "Creer", "troops": 2 } })
        );
        assert_eq!(event.name(), "advance");
    }
}
