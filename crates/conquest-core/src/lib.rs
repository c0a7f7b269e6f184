//! Conquest - a turn-based territory conquest game engine
//!
//! This crate provides the core game logic for Conquest, including:
//! - Static maps: territories, adjacency and region bonuses
//! - Player state and the reinforcement formula
//! - Dice and battle resolution
//! - Game state machine with full rule enforcement
//! - Event logs and observer replicas
//!
//! # Architecture
//!
//! The engine is event sourced. Resolving an action validates it against
//! the current state and produces events; applying those events in order
//! is the only way state changes, on the server and on every observer.
//! It can be compiled to:
//! - Native Rust for server-side game hosting
//! - WebAssembly for browser observers and local games against bots
//!
//! # Modules
//!
//! - [`map`]: Territory graph and regions
//! - [`player`]: Players, colours and derived stats
//! - [`combat`]: Dice sources and battle resolution
//! - [`actions`]: Player actions and the events they produce
//! - [`game`]: Game state machine
//! - [`replay`]: Event application, logs and replicas
//! - [`bot`]: Computer players

pub mod actions;
pub mod bot;
pub mod combat;
pub mod game;
pub mod map;
pub mod player;
pub mod replay;
#[cfg(feature = "wasm")]
pub mod wasm;

// Re-export commonly used types
pub use actions::{GameAction, GameEvent, SequencedEvent, Submission};
pub use bot::{Bot, BotDifficulty};
pub use combat::{Dice, LoadedDice, Losses, RandomDice};
pub use game::{
    ErrorClass, GameError, GamePhase, GameState, TerritoryState, MAX_PLAYERS, MIN_PLAYERS,
    STARTING_TROOPS,
};
pub use map::{GameMap, MapError, Region, RegionId, Territory, TerritoryId};
pub use player::{reinforcements_for, Player, PlayerColor, PlayerId, PlayerStats};
pub use replay::{
    Backoff, ConsistencyError, EventLog, Received, Replica, StateSnapshot, SyncError,
};
