//! Player state and derived statistics.
//!
//! This module contains:
//! - Player struct with colour, elimination flag and derived stats
//! - PlayerStats, the per-player payload of a stats refresh
//! - The reinforcement formula

use serde::{Deserialize, Serialize};

/// Player identifier (the player's unique name)
pub type PlayerId = String;

/// Minimum reinforcements a player receives per turn
pub const MIN_REINFORCEMENTS: u32 = 3;

/// Territories needed per additional reinforcement
pub const TERRITORIES_PER_REINFORCEMENT: u32 = 3;

/// Player colour for UI rendering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlayerColor {
    Red,
    Blue,
    Green,
    Yellow,
}

impl PlayerColor {
    /// Colours in the order they are handed out
    pub const ALL: [PlayerColor; 4] = [
        PlayerColor::Red,
        PlayerColor::Blue,
        PlayerColor::Green,
        PlayerColor::Yellow,
    ];

    /// Get colour for a seat index
    pub fn for_seat(seat: usize) -> Self {
        Self::ALL[seat % Self::ALL.len()]
    }
}

/// Derived per-player statistics, recomputed whenever ownership or troop
/// counts change
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerStats {
    /// Number of territories owned
    pub territories: u32,
    /// Troops across all owned territories
    pub troops: u32,
    /// Reinforcements granted at the start of the player's next deploy
    pub reinforcements: u32,
    /// Whether the player has lost every territory
    pub eliminated: bool,
}

/// A player in the game
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Player {
    pub name: PlayerId,
    pub color: PlayerColor,
    pub eliminated: bool,
    pub reinforcements: u32,
    pub territories: u32,
    pub troops: u32,
}

impl Player {
    /// Create a new player who has not been dealt any territory yet
    pub fn new(name: impl Into<PlayerId>, color: PlayerColor) -> Self {
        Self {
            name: name.into(),
            color,
            eliminated: false,
            reinforcements: 0,
            territories: 0,
            troops: 0,
        }
    }

    /// Current stats as a single value
    pub fn stats(&self) -> PlayerStats {
        PlayerStats {
            territories: self.territories,
            troops: self.troops,
            reinforcements: self.reinforcements,
            eliminated: self.eliminated,
        }
    }

    /// Overwrite the derived fields
    pub fn set_stats(&mut self, stats: PlayerStats) {
        self.territories = stats.territories;
        self.troops = stats.troops;
        self.reinforcements = stats.reinforcements;
        self.eliminated = stats.eliminated;
    }

    /// Whether the player still takes turns
    pub fn is_alive(&self) -> bool {
        !self.eliminated
    }
}

/// Reinforcements for a player holding `territories` territories and
/// complete regions worth `region_bonus` in total
pub fn reinforcements_for(territories: u32, region_bonus: u32) -> u32 {
    (territories / TERRITORIES_PER_REINFORCEMENT).max(MIN_REINFORCEMENTS) + region_bonus
}
