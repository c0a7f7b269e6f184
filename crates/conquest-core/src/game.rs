//! Core game state machine.
//!
//! This module contains the `GameState` struct, the phase machine and the
//! action resolver. Resolving an action never touches `self` directly: the
//! resolver validates against the current state, then builds its events on
//! a scratch copy using the same [`GameState::apply_event`] every observer
//! uses, and only commits the copy once every event has applied cleanly.

use crate::actions::{GameAction, GameEvent};
use crate::combat::{self, Dice};
use crate::map::{GameMap, TerritoryId};
use crate::player::{reinforcements_for, Player, PlayerColor, PlayerId, PlayerStats};
use crate::replay::ConsistencyError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::debug;

/// Players needed before the host may start
pub const MIN_PLAYERS: usize = 2;

/// Seats at the table (one per colour)
pub const MAX_PLAYERS: usize = PlayerColor::ALL.len();

/// Troops placed on every territory when the map is dealt
pub const STARTING_TROOPS: u32 = 3;

/// Game phase
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GamePhase {
    /// Waiting for players; nothing has been dealt
    Lobby,

    /// Placing reinforcements
    Deploy {
        /// Troops still to be placed this turn
        reinforcements: u32,
    },

    /// Attacking neighbours
    Attack,

    /// Forced move into a just-conquered territory
    Advance { from: TerritoryId, to: TerritoryId },

    /// One optional move between owned territories
    Reinforce,

    /// Game is over
    Finished { winner: PlayerId },
}

impl GamePhase {
    pub fn name(&self) -> &'static str {
        match self {
            GamePhase::Lobby => "lobby",
            GamePhase::Deploy { .. } => "deploy",
            GamePhase::Attack => "attack",
            GamePhase::Advance { .. } => "advance",
            GamePhase::Reinforce => "reinforce",
            GamePhase::Finished { .. } => "finished",
        }
    }
}

/// Broad classes of [`GameError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorClass {
    /// The player can correct the request and retry
    Validation,
    /// The request named something that does not exist
    Protocol,
    /// The resolver disagreed with its own apply function
    Internal,
}

/// Errors that can occur when applying actions
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum GameError {
    #[error("it is not your turn")]
    NotYourTurn,

    #[error("action does not apply to the '{phase}' phase")]
    WrongPhase { phase: String },

    #[error("territory '{0}' does not belong to you")]
    NotOwner(TerritoryId),

    #[error("territory '{to}' is not reachable from '{from}'")]
    NotNeighbour { from: TerritoryId, to: TerritoryId },

    #[error("not enough troops in territory '{0}'")]
    InsufficientTroops(TerritoryId),

    #[error("{requested} reinforcements requested but only {available} available")]
    InsufficientReinforcements { requested: u64, available: u32 },

    #[error("{0} reinforcements have not been deployed")]
    ReinforcementsRemaining(u32),

    #[error("{troops} troops is out of range {min}..={max}")]
    OutOfRange { troops: u32, min: u32, max: u32 },

    #[error("advance must move from '{from}' to '{to}'")]
    AdvanceMismatch { from: TerritoryId, to: TerritoryId },

    #[error("target territory '{0}' belongs to you")]
    OwnTerritory(TerritoryId),

    #[error("cannot move troops from '{0}' to itself")]
    SameTerritory(TerritoryId),

    #[error("territory '{0}' does not exist")]
    UnknownTerritory(TerritoryId),

    #[error("player '{0}' is not in this game")]
    UnknownPlayer(PlayerId),

    #[error("player '{0}' has already joined")]
    AlreadyJoined(PlayerId),

    #[error("game is full")]
    GameFull,

    #[error("need at least {need} players, have {have}")]
    NotEnoughPlayers { have: usize, need: usize },

    #[error("game is over")]
    GameOver,

    #[error("internal error: {0}")]
    Internal(String),
}

impl GameError {
    pub fn class(&self) -> ErrorClass {
        match self {
            GameError::UnknownTerritory(_) | GameError::UnknownPlayer(_) => ErrorClass::Protocol,
            GameError::Internal(_) => ErrorClass::Internal,
            _ => ErrorClass::Validation,
        }
    }

    fn wrong_phase(phase: &GamePhase) -> Self {
        GameError::WrongPhase {
            phase: phase.name().to_string(),
        }
    }
}

impl From<ConsistencyError> for GameError {
    fn from(err: ConsistencyError) -> Self {
        GameError::Internal(err.to_string())
    }
}

/// Dynamic state of one territory
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerritoryState {
    pub owner: Option<PlayerId>,
    pub troops: u32,
}

impl TerritoryState {
    pub fn owned_by(owner: impl Into<PlayerId>, troops: u32) -> Self {
        Self {
            owner: Some(owner.into()),
            troops,
        }
    }

    pub fn is_owned_by(&self, player: &str) -> bool {
        self.owner.as_deref() == Some(player)
    }
}

/// The complete game state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameState {
    /// Id of the map this game is played on
    pub map: String,
    /// Current game phase
    pub phase: GamePhase,
    /// Player whose turn it is (the host while in the lobby)
    pub active_player: Option<PlayerId>,
    /// All players, in turn order
    pub players: Vec<Player>,
    /// Ownership and troops per territory
    pub territories: BTreeMap<TerritoryId, TerritoryState>,
}

/// Scratch state that events are applied to while an action resolves
struct Transition {
    state: GameState,
    events: Vec<GameEvent>,
}

impl Transition {
    fn new(state: &GameState) -> Self {
        Self {
            state: state.clone(),
            events: Vec::new(),
        }
    }

    fn emit(&mut self, event: GameEvent) -> Result<(), GameError> {
        self.state.apply_event(&event)?;
        self.events.push(event);
        Ok(())
    }

    fn change_phase(
        &mut self,
        new_player: Option<PlayerId>,
        new_phase: GamePhase,
    ) -> Result<(), GameError> {
        let event = GameEvent::PhaseChanged {
            old_player: self.state.active_player.clone(),
            new_player,
            old_phase: self.state.phase.clone(),
            new_phase,
        };
        self.emit(event)
    }

    fn refresh_stats(&mut self, map: &GameMap) -> Result<(), GameError> {
        let updates = self.state.compute_stats(map);
        self.emit(GameEvent::StatsChanged { updates })
    }
}

impl GameState {
    /// Create an empty lobby for the given map
    pub fn new(map: &GameMap) -> Self {
        Self {
            map: map.name.clone(),
            phase: GamePhase::Lobby,
            active_player: None,
            players: Vec::new(),
            territories: map
                .territory_names()
                .map(|t| (t.clone(), TerritoryState::default()))
                .collect(),
        }
    }

    /// Get a player by name
    pub fn player(&self, name: &str) -> Option<&Player> {
        self.players.iter().find(|p| p.name == name)
    }

    pub(crate) fn player_mut(&mut self, name: &str) -> Option<&mut Player> {
        self.players.iter_mut().find(|p| p.name == name)
    }

    pub fn territory(&self, name: &str) -> Option<&TerritoryState> {
        self.territories.get(name)
    }

    /// Troops on a territory (0 for unknown territories)
    pub fn troops(&self, territory: &str) -> u32 {
        self.territory(territory).map(|t| t.troops).unwrap_or(0)
    }

    pub fn owner_of(&self, territory: &str) -> Option<&str> {
        self.territory(territory).and_then(|t| t.owner.as_deref())
    }

    /// Territories owned by `player`, in map order
    pub fn owned_by<'a, 'p>(&'a self, player: &'p str) -> impl Iterator<Item = &'a TerritoryId> + 'p
    where
        'a: 'p,
    {
        self.territories
            .iter()
            .filter(move |(_, t)| t.is_owned_by(player))
            .map(|(id, _)| id)
    }

    /// Sum of troops on the board
    pub fn total_troops(&self) -> u64 {
        self.territories.values().map(|t| u64::from(t.troops)).sum()
    }

    /// Players that have not been eliminated, in turn order
    pub fn living_players(&self) -> impl Iterator<Item = &Player> {
        self.players.iter().filter(|p| p.is_alive())
    }

    /// The only player left standing, if it has come to that
    pub fn sole_survivor(&self) -> Option<&Player> {
        let mut living = self.living_players();
        match (living.next(), living.next()) {
            (Some(only), None) => Some(only),
            _ => None,
        }
    }

    /// Check if the game is finished
    pub fn is_finished(&self) -> bool {
        matches!(self.phase, GamePhase::Finished { .. })
    }

    /// Get the winner if the game is finished
    pub fn winner(&self) -> Option<&str> {
        match &self.phase {
            GamePhase::Finished { winner } => Some(winner),
            _ => None,
        }
    }

    /// The next living player after `current` in turn order
    pub fn next_player_after(&self, current: &str) -> Option<&Player> {
        let idx = self.players.iter().position(|p| p.name == current)?;
        let count = self.players.len();
        (1..=count)
            .map(|offset| &self.players[(idx + offset) % count])
            .find(|p| p.is_alive())
    }

    /// Recompute every player's derived stats from the board
    pub fn compute_stats(&self, map: &GameMap) -> BTreeMap<PlayerId, PlayerStats> {
        self.players
            .iter()
            .map(|player| {
                let mut territories = 0;
                let mut troops = 0;
                for state in self.territories.values() {
                    if state.is_owned_by(&player.name) {
                        territories += 1;
                        troops += state.troops;
                    }
                }

                let region_bonus: u32 = map
                    .regions()
                    .filter(|(_, region)| {
                        region
                            .territories
                            .iter()
                            .all(|t| self.owner_of(t) == Some(player.name.as_str()))
                    })
                    .map(|(_, region)| region.bonus)
                    .sum();

                let stats = PlayerStats {
                    territories,
                    troops,
                    reinforcements: reinforcements_for(territories, region_bonus),
                    eliminated: territories == 0,
                };
                (player.name.clone(), stats)
            })
            .collect()
    }

    /// Get all currently valid actions for a player. Deploy and move
    /// actions are representative (whole amounts), not exhaustive.
    pub fn valid_actions(&self, map: &GameMap, player: &str) -> Vec<GameAction> {
        let mut actions = Vec::new();

        if let GamePhase::Lobby = self.phase {
            if self.player(player).is_none() && self.players.len() < self.seat_limit(map) {
                actions.push(GameAction::JoinGame {});
            }
            if self.active_player.as_deref() == Some(player) && self.players.len() >= MIN_PLAYERS {
                actions.push(GameAction::StartGame {});
            }
            return actions;
        }

        if self.active_player.as_deref() != Some(player) {
            return actions;
        }

        match &self.phase {
            GamePhase::Lobby | GamePhase::Finished { .. } => {}

            GamePhase::Deploy { reinforcements } => {
                if *reinforcements == 0 {
                    actions.push(GameAction::EndDeploy {});
                } else {
                    for territory in self.owned_by(player) {
                        actions.push(GameAction::Deploy {
                            deployments: BTreeMap::from([(territory.clone(), *reinforcements)]),
                        });
                    }
                }
            }

            GamePhase::Attack => {
                for from in self.owned_by(player) {
                    if self.troops(from) <= 1 {
                        continue;
                    }
                    for to in map.neighbours(from).into_iter().flatten() {
                        if self.owner_of(to) != Some(player) {
                            actions.push(GameAction::Attack {
                                from: from.clone(),
                                to: to.clone(),
                            });
                        }
                    }
                }
                actions.push(GameAction::EndAttack {});
            }

            GamePhase::Advance { from, to } => {
                let max = self.troops(from).saturating_sub(1);
                for troops in [max, 0] {
                    actions.push(GameAction::Advance {
                        from: from.clone(),
                        to: to.clone(),
                        troops,
                    });
                    if max == 0 {
                        break;
                    }
                }
            }

            GamePhase::Reinforce => {
                for from in self.owned_by(player) {
                    let movable = self.troops(from).saturating_sub(1);
                    if movable == 0 {
                        continue;
                    }
                    for to in self.owned_by(player).filter(|t| *t != from) {
                        actions.push(GameAction::Reinforce {
                            from: from.clone(),
                            to: to.clone(),
                            troops: movable,
                        });
                    }
                }
                actions.push(GameAction::EndReinforce {});
            }
        }

        actions
    }

    fn seat_limit(&self, map: &GameMap) -> usize {
        MAX_PLAYERS.min(map.territory_count())
    }

    /// Apply an action to the game state.
    ///
    /// On success the state has been advanced and the returned events,
    /// applied in order to the previous state, reproduce it exactly. On
    /// failure nothing changes.
    pub fn apply_action<D: Dice>(
        &mut self,
        map: &GameMap,
        player: &str,
        action: GameAction,
        dice: &mut D,
    ) -> Result<Vec<GameEvent>, GameError> {
        if self.is_finished() {
            return Err(GameError::GameOver);
        }

        let mut tx = Transition::new(self);

        match &action {
            // ==================== Lobby ====================
            GameAction::JoinGame {} => self.join(map, player, &mut tx)?,

            action => {
                if self.player(player).is_none() {
                    return Err(GameError::UnknownPlayer(player.to_string()));
                }
                if self.active_player.as_deref() != Some(player) {
                    return Err(GameError::NotYourTurn);
                }

                match action {
                    GameAction::JoinGame {} => unreachable!("handled above"),
                    GameAction::StartGame {} => self.start(map, dice, &mut tx)?,

                    // ==================== Deploy ====================
                    GameAction::Deploy { deployments } => {
                        self.deploy(map, player, deployments, &mut tx)?
                    }
                    GameAction::EndDeploy {} => self.end_deploy(&mut tx)?,

                    // ==================== Attack ====================
                    GameAction::Attack { from, to } => {
                        self.attack(map, player, from, to, dice, &mut tx)?
                    }
                    GameAction::Advance { from, to, troops } => {
                        self.advance(player, from, to, *troops, &mut tx)?
                    }
                    GameAction::EndAttack {} => {
                        if self.phase != GamePhase::Attack {
                            return Err(GameError::wrong_phase(&self.phase));
                        }
                        tx.change_phase(self.active_player.clone(), GamePhase::Reinforce)?;
                    }

                    // ==================== Reinforce ====================
                    GameAction::Reinforce { from, to, troops } => {
                        self.reinforce(player, from, to, *troops, &mut tx)?
                    }
                    GameAction::EndReinforce {} => {
                        if self.phase != GamePhase::Reinforce {
                            return Err(GameError::wrong_phase(&self.phase));
                        }
                        Self::end_turn(player, &mut tx)?;
                    }
                }
            }
        }

        debug!(
            player,
            action = action.name(),
            events = tx.events.len(),
            "action resolved"
        );

        *self = tx.state;
        Ok(tx.events)
    }

    // ==================== Helper Methods ====================

    fn join(&self, map: &GameMap, player: &str, tx: &mut Transition) -> Result<(), GameError> {
        if self.phase != GamePhase::Lobby {
            return Err(GameError::wrong_phase(&self.phase));
        }
        if self.player(player).is_some() {
            return Err(GameError::AlreadyJoined(player.to_string()));
        }
        if self.players.len() >= self.seat_limit(map) {
            return Err(GameError::GameFull);
        }

        tx.emit(GameEvent::PlayerJoined {
            player: player.to_string(),
            color: PlayerColor::for_seat(self.players.len()),
        })
    }

    fn start<D: Dice>(
        &self,
        map: &GameMap,
        dice: &mut D,
        tx: &mut Transition,
    ) -> Result<(), GameError> {
        if self.phase != GamePhase::Lobby {
            return Err(GameError::wrong_phase(&self.phase));
        }
        if self.players.len() < MIN_PLAYERS {
            return Err(GameError::NotEnoughPlayers {
                have: self.players.len(),
                need: MIN_PLAYERS,
            });
        }

        // Deal the shuffled territories round-robin in turn order
        let mut order: Vec<TerritoryId> = map.territory_names().cloned().collect();
        dice.shuffle(&mut order);

        let mut dealt = self.clone();
        for (idx, territory) in order.into_iter().enumerate() {
            let owner = &self.players[idx % self.players.len()].name;
            dealt
                .territories
                .insert(territory, TerritoryState::owned_by(owner.clone(), STARTING_TROOPS));
        }
        for (name, stats) in dealt.compute_stats(map) {
            if let Some(player) = dealt.player_mut(&name) {
                player.set_stats(stats);
            }
        }

        let first = &dealt.players[0];
        let next_phase = GamePhase::Deploy {
            reinforcements: first.reinforcements,
        };
        let first = Some(first.name.clone());

        tx.emit(GameEvent::snapshot(&dealt))?;
        tx.change_phase(first, next_phase)
    }

    fn deploy(
        &self,
        map: &GameMap,
        player: &str,
        deployments: &BTreeMap<TerritoryId, u32>,
        tx: &mut Transition,
    ) -> Result<(), GameError> {
        let available = match self.phase {
            GamePhase::Deploy { reinforcements } => reinforcements,
            _ => return Err(GameError::wrong_phase(&self.phase)),
        };

        let mut requested: u64 = 0;
        for (territory, troops) in deployments {
            let state = self
                .territory(territory)
                .ok_or_else(|| GameError::UnknownTerritory(territory.clone()))?;
            if !state.is_owned_by(player) {
                return Err(GameError::NotOwner(territory.clone()));
            }
            requested += u64::from(*troops);
        }
        if requested > u64::from(available) {
            return Err(GameError::InsufficientReinforcements {
                requested,
                available,
            });
        }

        let deployments: BTreeMap<TerritoryId, u32> = deployments
            .iter()
            .filter(|(_, troops)| **troops > 0)
            .map(|(t, n)| (t.clone(), *n))
            .collect();
        if deployments.is_empty() {
            return Ok(());
        }

        tx.emit(GameEvent::Deploy {
            player: player.to_string(),
            deployments,
        })?;
        tx.refresh_stats(map)
    }

    fn end_deploy(&self, tx: &mut Transition) -> Result<(), GameError> {
        match self.phase {
            GamePhase::Deploy { reinforcements: 0 } => {
                tx.change_phase(self.active_player.clone(), GamePhase::Attack)
            }
            GamePhase::Deploy { reinforcements } => {
                Err(GameError::ReinforcementsRemaining(reinforcements))
            }
            _ => Err(GameError::wrong_phase(&self.phase)),
        }
    }

    fn attack<D: Dice>(
        &self,
        map: &GameMap,
        player: &str,
        from: &str,
        to: &str,
        dice: &mut D,
        tx: &mut Transition,
    ) -> Result<(), GameError> {
        if self.phase != GamePhase::Attack {
            return Err(GameError::wrong_phase(&self.phase));
        }

        let source = self
            .territory(from)
            .ok_or_else(|| GameError::UnknownTerritory(from.to_string()))?;
        let target = self
            .territory(to)
            .ok_or_else(|| GameError::UnknownTerritory(to.to_string()))?;
        if !source.is_owned_by(player) {
            return Err(GameError::NotOwner(from.to_string()));
        }
        if target.is_owned_by(player) {
            return Err(GameError::OwnTerritory(to.to_string()));
        }
        if !map.is_adjacent(from, to) {
            return Err(GameError::NotNeighbour {
                from: from.to_string(),
                to: to.to_string(),
            });
        }
        if source.troops <= 1 {
            return Err(GameError::InsufficientTroops(from.to_string()));
        }
        let defender = target
            .owner
            .clone()
            .ok_or_else(|| GameError::Internal(format!("territory '{to}' has no owner")))?;

        let attacker_dice = dice.roll(combat::attacker_dice(source.troops));
        let defender_dice = dice.roll(combat::defender_dice(target.troops));
        let losses = combat::resolve(&attacker_dice, &defender_dice);
        let conquered = losses.defender >= target.troops;

        tx.emit(GameEvent::Attack {
            player: player.to_string(),
            from: from.to_string(),
            to: to.to_string(),
            defender,
            attacker_dice,
            defender_dice,
            attacker_losses: losses.attacker,
            defender_losses: losses.defender,
            conquered,
        })?;
        tx.refresh_stats(map)?;

        if let Some(winner) = tx.state.sole_survivor().map(|p| p.name.clone()) {
            return tx.change_phase(self.active_player.clone(), GamePhase::Finished { winner });
        }

        if conquered {
            tx.change_phase(
                self.active_player.clone(),
                GamePhase::Advance {
                    from: from.to_string(),
                    to: to.to_string(),
                },
            )?;
        }
        Ok(())
    }

    fn advance(
        &self,
        player: &str,
        from: &str,
        to: &str,
        troops: u32,
        tx: &mut Transition,
    ) -> Result<(), GameError> {
        let (forced_from, forced_to) = match &self.phase {
            GamePhase::Advance { from, to } => (from, to),
            _ => return Err(GameError::wrong_phase(&self.phase)),
        };
        if from != forced_from || to != forced_to {
            return Err(GameError::AdvanceMismatch {
                from: forced_from.clone(),
                to: forced_to.clone(),
            });
        }

        let max = self.troops(from).saturating_sub(1);
        if troops > max {
            return Err(GameError::OutOfRange {
                troops,
                min: 0,
                max,
            });
        }

        tx.emit(GameEvent::Advance {
            player: player.to_string(),
            from: from.to_string(),
            to: to.to_string(),
            troops,
        })?;
        tx.change_phase(self.active_player.clone(), GamePhase::Attack)
    }

    fn reinforce(
        &self,
        player: &str,
        from: &str,
        to: &str,
        troops: u32,
        tx: &mut Transition,
    ) -> Result<(), GameError> {
        if self.phase != GamePhase::Reinforce {
            return Err(GameError::wrong_phase(&self.phase));
        }

        let source = self
            .territory(from)
            .ok_or_else(|| GameError::UnknownTerritory(from.to_string()))?;
        let target = self
            .territory(to)
            .ok_or_else(|| GameError::UnknownTerritory(to.to_string()))?;
        if !source.is_owned_by(player) {
            return Err(GameError::NotOwner(from.to_string()));
        }
        if !target.is_owned_by(player) {
            return Err(GameError::NotOwner(to.to_string()));
        }
        if from == to {
            return Err(GameError::SameTerritory(from.to_string()));
        }
        if source.troops <= troops {
            return Err(GameError::InsufficientTroops(from.to_string()));
        }
        if troops == 0 {
            return Err(GameError::OutOfRange {
                troops,
                min: 1,
                max: source.troops - 1,
            });
        }

        tx.emit(GameEvent::Reinforce {
            player: player.to_string(),
            from: from.to_string(),
            to: to.to_string(),
            troops,
        })?;
        Self::end_turn(player, tx)
    }

    /// Hand the turn to the next living player, starting their deploy
    fn end_turn(player: &str, tx: &mut Transition) -> Result<(), GameError> {
        let next = tx
            .state
            .next_player_after(player)
            .ok_or_else(|| GameError::Internal("no living player to pass the turn to".into()))?;
        let phase = GamePhase::Deploy {
            reinforcements: next.reinforcements,
        };
        let next = Some(next.name.clone());
        tx.change_phase(next, phase)
    }
}
