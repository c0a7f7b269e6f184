//! WebAssembly bindings for the Conquest game engine.
//!
//! This module exposes the game engine to JavaScript through wasm-bindgen:
//! [`WasmReplica`] follows a server's event stream, [`WasmGame`] runs a
//! local game against bots.

#[cfg(feature = "wasm")]
use wasm_bindgen::prelude::*;

#[cfg(feature = "wasm")]
use crate::actions::{GameAction, SequencedEvent};
#[cfg(feature = "wasm")]
use crate::bot::{Bot, BotDifficulty};
#[cfg(feature = "wasm")]
use crate::combat::RandomDice;
#[cfg(feature = "wasm")]
use crate::game::GameState;
#[cfg(feature = "wasm")]
use crate::map::GameMap;
#[cfg(feature = "wasm")]
use crate::replay::{Received, Replica};
#[cfg(feature = "wasm")]
use rand::{rngs::StdRng, SeedableRng};

/// Initialize panic hook for better error messages in browser console
#[cfg(feature = "wasm")]
#[wasm_bindgen(start)]
pub fn init() {
    console_error_panic_hook::set_once();
}

#[cfg(feature = "wasm")]
fn parse_difficulty(difficulty: &str) -> BotDifficulty {
    match difficulty {
        "easy" => BotDifficulty::Easy,
        "hard" => BotDifficulty::Hard,
        _ => BotDifficulty::Medium,
    }
}

#[cfg(feature = "wasm")]
fn js_error(context: &str, err: impl std::fmt::Display) -> JsValue {
    JsValue::from_str(&format!("{context}: {err}"))
}

/// Observer-side copy of a server game
#[cfg(feature = "wasm")]
#[wasm_bindgen]
pub struct WasmReplica {
    map: GameMap,
    replica: Replica,
}

#[cfg(feature = "wasm")]
#[wasm_bindgen]
impl WasmReplica {
    /// Create a replica for the given map document
    #[wasm_bindgen(constructor)]
    pub fn new(map_json: &str) -> Result<WasmReplica, JsValue> {
        let map = GameMap::from_json(map_json).map_err(|e| js_error("Invalid map", e))?;
        Ok(WasmReplica {
            map,
            replica: Replica::new(),
        })
    }

    /// Feed one `{seq, event}` message from the watch stream. Returns
    /// "applied", "resynced" or "duplicate"; errors mean a snapshot is needed.
    pub fn receive(&mut self, message_json: &str) -> Result<String, JsValue> {
        let entry: SequencedEvent =
            serde_json::from_str(message_json).map_err(|e| js_error("Invalid event JSON", e))?;

        let received = self
            .replica
            .receive(&entry)
            .map_err(|e| js_error("Out of sync", e))?;
        Ok(match received {
            Received::Applied => "applied",
            Received::Resynced => "resynced",
            Received::Duplicate => "duplicate",
        }
        .to_string())
    }

    /// Replace the state with a `{seq, state}` snapshot
    pub fn resync(&mut self, seq: u64, state_json: &str) -> Result<(), JsValue> {
        let state: GameState =
            serde_json::from_str(state_json).map_err(|e| js_error("Invalid state JSON", e))?;
        self.replica.resync(seq, state);
        Ok(())
    }

    #[wasm_bindgen(js_name = isStale)]
    pub fn is_stale(&self) -> bool {
        self.replica.is_stale()
    }

    #[wasm_bindgen(js_name = lastSeq)]
    pub fn last_seq(&self) -> u64 {
        self.replica.last_seq()
    }

    /// Get the current game state as JSON ("null" before the first snapshot)
    #[wasm_bindgen(js_name = getState)]
    pub fn get_state(&self) -> String {
        serde_json::to_string(&self.replica.state()).unwrap_or_else(|_| "null".to_string())
    }

    /// Get valid actions for a player as JSON array
    #[wasm_bindgen(js_name = getValidActions)]
    pub fn get_valid_actions(&self, player: &str) -> String {
        let actions = self
            .replica
            .state()
            .map(|state| state.valid_actions(&self.map, player))
            .unwrap_or_default();
        serde_json::to_string(&actions).unwrap_or_else(|_| "[]".to_string())
    }
}

/// WASM-exposed local game
#[cfg(feature = "wasm")]
#[wasm_bindgen]
pub struct WasmGame {
    map: GameMap,
    state: GameState,
    dice: RandomDice<StdRng>,
}

#[cfg(feature = "wasm")]
#[wasm_bindgen]
impl WasmGame {
    /// Create a lobby on the given map document
    #[wasm_bindgen(constructor)]
    pub fn new(map_json: &str) -> Result<WasmGame, JsValue> {
        let map = GameMap::from_json(map_json).map_err(|e| js_error("Invalid map", e))?;
        Ok(WasmGame {
            state: GameState::new(&map),
            map,
            dice: RandomDice::new(StdRng::from_entropy()),
        })
    }

    /// Get the current game state as JSON
    #[wasm_bindgen(js_name = getState)]
    pub fn get_state(&self) -> String {
        serde_json::to_string(&self.state).unwrap_or_else(|_| "{}".to_string())
    }

    /// Get the active player, if any
    #[wasm_bindgen(js_name = getActivePlayer)]
    pub fn get_active_player(&self) -> Option<String> {
        self.state.active_player.clone()
    }

    /// Get valid actions for a player as JSON array
    #[wasm_bindgen(js_name = getValidActions)]
    pub fn get_valid_actions(&self, player: &str) -> String {
        let actions = self.state.valid_actions(&self.map, player);
        serde_json::to_string(&actions).unwrap_or_else(|_| "[]".to_string())
    }

    /// Apply an action from JSON, returns events JSON or error
    #[wasm_bindgen(js_name = applyAction)]
    pub fn apply_action(&mut self, player: &str, action_json: &str) -> Result<String, JsValue> {
        let action: GameAction = serde_json::from_str(action_json)
            .map_err(|e| js_error("Invalid action JSON", e))?;

        let events = self
            .state
            .apply_action(&self.map, player, action, &mut self.dice)
            .map_err(|e| js_error("Action failed", e))?;
        serde_json::to_string(&events).map_err(|e| js_error("Serialization error", e))
    }

    #[wasm_bindgen(js_name = isFinished)]
    pub fn is_finished(&self) -> bool {
        self.state.is_finished()
    }

    #[wasm_bindgen(js_name = getWinner)]
    pub fn get_winner(&self) -> Option<String> {
        self.state.winner().map(str::to_string)
    }

    /// Get the action a bot would take for `player`, as JSON ("null" if none)
    #[wasm_bindgen(js_name = getBotAction)]
    pub fn get_bot_action(&self, player: &str, difficulty: &str) -> String {
        let mut bot = Bot::new(player, parse_difficulty(difficulty));
        let action = bot.choose_action(&self.state, &self.map);
        serde_json::to_string(&action).unwrap_or_else(|_| "null".to_string())
    }
}
