//! Event application, logs and observer replicas.
//!
//! [`GameState::apply_event`] is the single definition of what an event
//! does to a state. The resolver builds its results with it, the server's
//! [`EventLog`] replays with it, and every [`Replica`] follows the live
//! stream with it.

use crate::actions::{GameEvent, SequencedEvent};
use crate::game::{GamePhase, GameState, TerritoryState};
use crate::map::TerritoryId;
use crate::player::{Player, PlayerId};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// An event that does not fit the state it was applied to
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConsistencyError {
    #[error("'{event}' event does not apply in the '{phase}' phase")]
    UnexpectedPhase {
        event: &'static str,
        phase: &'static str,
    },

    #[error("expected active player {expected:?}, found {found:?}")]
    ActivePlayerMismatch {
        expected: Option<PlayerId>,
        found: Option<PlayerId>,
    },

    #[error("unknown territory '{0}'")]
    UnknownTerritory(TerritoryId),

    #[error("unknown player '{0}'")]
    UnknownPlayer(PlayerId),

    #[error("player '{0}' is already seated")]
    DuplicatePlayer(PlayerId),

    #[error("territory '{territory}' should belong to '{expected}', found {found:?}")]
    OwnerMismatch {
        territory: TerritoryId,
        expected: PlayerId,
        found: Option<PlayerId>,
    },

    #[error("territory '{territory}' has {have} troops, needs {need}")]
    NotEnoughTroops {
        territory: TerritoryId,
        have: u32,
        need: u32,
    },

    #[error("deploying {requested} troops with {available} available")]
    ReinforcementsExceeded { requested: u64, available: u32 },

    #[error("conquest flag disagrees with troops left in '{0}'")]
    ConquestMismatch(TerritoryId),

    #[error("move from '{0}' to itself")]
    SameTerritory(TerritoryId),
}

impl GameState {
    /// Apply one event. The state is only modified if the event is
    /// consistent with it.
    pub fn apply_event(&mut self, event: &GameEvent) -> Result<(), ConsistencyError> {
        match event {
            GameEvent::PlayerJoined { player, color } => {
                self.expect_phase(event, matches!(self.phase, GamePhase::Lobby))?;
                if self.player(player).is_some() {
                    return Err(ConsistencyError::DuplicatePlayer(player.clone()));
                }
                self.players.push(Player::new(player.clone(), *color));
                if self.active_player.is_none() {
                    self.active_player = Some(player.clone());
                }
            }

            GameEvent::Deploy {
                player,
                deployments,
            } => {
                let available = match self.phase {
                    GamePhase::Deploy { reinforcements } => reinforcements,
                    _ => return Err(self.unexpected(event)),
                };
                let requested: u64 = deployments.values().map(|n| u64::from(*n)).sum();
                if requested > u64::from(available) {
                    return Err(ConsistencyError::ReinforcementsExceeded {
                        requested,
                        available,
                    });
                }
                for territory in deployments.keys() {
                    self.expect_owner(territory, player)?;
                }

                for (territory, troops) in deployments {
                    self.territory_mut(territory)?.troops += troops;
                }
                // requested <= available, so this fits
                self.phase = GamePhase::Deploy {
                    reinforcements: available - requested as u32,
                };
            }

            GameEvent::Attack {
                player,
                from,
                to,
                defender,
                attacker_losses,
                defender_losses,
                conquered,
                ..
            } => {
                self.expect_phase(event, self.phase == GamePhase::Attack)?;
                let attacking = self.expect_owner(from, player)?.troops;
                let defending = self.expect_owner(to, defender)?.troops;

                if attacking <= *attacker_losses {
                    return Err(ConsistencyError::NotEnoughTroops {
                        territory: from.clone(),
                        have: attacking,
                        need: attacker_losses + 1,
                    });
                }
                if defending < *defender_losses {
                    return Err(ConsistencyError::NotEnoughTroops {
                        territory: to.clone(),
                        have: defending,
                        need: *defender_losses,
                    });
                }
                let attacking = attacking - attacker_losses;
                let defending = defending - defender_losses;
                if *conquered != (defending == 0) {
                    return Err(ConsistencyError::ConquestMismatch(to.clone()));
                }
                if *conquered && attacking < 2 {
                    return Err(ConsistencyError::NotEnoughTroops {
                        territory: from.clone(),
                        have: attacking,
                        need: 2,
                    });
                }

                if *conquered {
                    self.territory_mut(from)?.troops = attacking - 1;
                    *self.territory_mut(to)? = TerritoryState::owned_by(player.clone(), 1);
                } else {
                    self.territory_mut(from)?.troops = attacking;
                    self.territory_mut(to)?.troops = defending;
                }
            }

            GameEvent::Advance {
                player,
                from,
                to,
                troops,
            } => {
                let forced = matches!(
                    &self.phase,
                    GamePhase::Advance { from: f, to: t } if f == from && t == to
                );
                self.expect_phase(event, forced)?;
                self.move_troops(player, from, to, *troops)?;
            }

            GameEvent::Reinforce {
                player,
                from,
                to,
                troops,
            } => {
                self.expect_phase(event, self.phase == GamePhase::Reinforce)?;
                if from == to {
                    return Err(ConsistencyError::SameTerritory(from.clone()));
                }
                self.move_troops(player, from, to, *troops)?;
            }

            GameEvent::PhaseChanged {
                old_player,
                new_player,
                old_phase,
                new_phase,
            } => {
                self.expect_phase(event, self.phase == *old_phase)?;
                if self.active_player != *old_player {
                    return Err(ConsistencyError::ActivePlayerMismatch {
                        expected: old_player.clone(),
                        found: self.active_player.clone(),
                    });
                }
                if let Some(next) = new_player {
                    if self.player(next).is_none() {
                        return Err(ConsistencyError::UnknownPlayer(next.clone()));
                    }
                }
                self.phase = new_phase.clone();
                self.active_player = new_player.clone();
            }

            GameEvent::StatsChanged { updates } => {
                if let Some(unknown) = updates.keys().find(|name| self.player(name).is_none()) {
                    return Err(ConsistencyError::UnknownPlayer(unknown.clone()));
                }
                for (name, stats) in updates {
                    if let Some(player) = self.player_mut(name) {
                        player.set_stats(*stats);
                    }
                }
            }

            GameEvent::Snapshot { state } => {
                *self = state.as_ref().clone();
            }
        }

        Ok(())
    }

    fn unexpected(&self, event: &GameEvent) -> ConsistencyError {
        ConsistencyError::UnexpectedPhase {
            event: event.name(),
            phase: self.phase.name(),
        }
    }

    fn expect_phase(&self, event: &GameEvent, ok: bool) -> Result<(), ConsistencyError> {
        if ok {
            Ok(())
        } else {
            Err(self.unexpected(event))
        }
    }

    fn expect_owner(
        &self,
        territory: &str,
        owner: &str,
    ) -> Result<&TerritoryState, ConsistencyError> {
        let state = self
            .territory(territory)
            .ok_or_else(|| ConsistencyError::UnknownTerritory(territory.to_string()))?;
        if !state.is_owned_by(owner) {
            return Err(ConsistencyError::OwnerMismatch {
                territory: territory.to_string(),
                expected: owner.to_string(),
                found: state.owner.clone(),
            });
        }
        Ok(state)
    }

    fn territory_mut(&mut self, territory: &str) -> Result<&mut TerritoryState, ConsistencyError> {
        self.territories
            .get_mut(territory)
            .ok_or_else(|| ConsistencyError::UnknownTerritory(territory.to_string()))
    }

    /// Move troops between two territories of the same owner, leaving at
    /// least one behind
    fn move_troops(
        &mut self,
        player: &str,
        from: &str,
        to: &str,
        troops: u32,
    ) -> Result<(), ConsistencyError> {
        let available = self.expect_owner(from, player)?.troops;
        self.expect_owner(to, player)?;
        if available <= troops {
            return Err(ConsistencyError::NotEnoughTroops {
                territory: from.to_string(),
                have: available,
                need: troops + 1,
            });
        }

        self.territory_mut(from)?.troops -= troops;
        self.territory_mut(to)?.troops += troops;
        Ok(())
    }
}

/// A full state at a known position in the event stream, as served to
/// observers that need to resynchronize
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub seq: u64,
    pub state: GameState,
}

impl StateSnapshot {
    /// The snapshot as a stream entry
    pub fn into_event(self) -> SequencedEvent {
        SequencedEvent {
            seq: self.seq,
            event: GameEvent::Snapshot {
                state: Box::new(self.state),
            },
        }
    }
}

/// The authoritative, append-only record of a game
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventLog {
    initial: GameState,
    events: Vec<SequencedEvent>,
}

impl EventLog {
    pub fn new(initial: GameState) -> Self {
        Self {
            initial,
            events: Vec::new(),
        }
    }

    /// State the log replays from
    pub fn initial(&self) -> &GameState {
        &self.initial
    }

    pub fn events(&self) -> &[SequencedEvent] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Sequence number of the newest event (0 when empty)
    pub fn last_seq(&self) -> u64 {
        self.events.last().map(|e| e.seq).unwrap_or(0)
    }

    /// Append events, numbering them after the current tail
    pub fn append(&mut self, events: impl IntoIterator<Item = GameEvent>) -> Vec<SequencedEvent> {
        let start = self.events.len();
        for event in events {
            let seq = self.last_seq() + 1;
            self.events.push(SequencedEvent { seq, event });
        }
        self.events[start..].to_vec()
    }

    /// Events with a sequence number greater than `seq`
    pub fn since(&self, seq: u64) -> &[SequencedEvent] {
        let idx = self.events.partition_point(|e| e.seq <= seq);
        &self.events[idx..]
    }

    /// Rebuild the state as it was after event `seq`
    pub fn replay_to(&self, seq: u64) -> Result<GameState, ConsistencyError> {
        let mut state = self.initial.clone();
        for entry in self.events.iter().take_while(|e| e.seq <= seq) {
            state.apply_event(&entry.event)?;
        }
        Ok(state)
    }

    /// Rebuild the current state from the initial state
    pub fn replay(&self) -> Result<GameState, ConsistencyError> {
        let mut state = self.initial.clone();
        for entry in &self.events {
            state.apply_event(&entry.event)?;
        }
        Ok(state)
    }
}

/// Outcome of feeding an event to a [`Replica`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Received {
    Applied,
    /// A snapshot replaced the state
    Resynced,
    /// Already seen; ignored
    Duplicate,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    #[error("missed events: expected seq {expected}, received {received}")]
    Gap { expected: u64, received: u64 },

    #[error("event {seq} does not apply: {source}")]
    Diverged {
        seq: u64,
        #[source]
        source: ConsistencyError,
    },

    #[error("replica is stale and needs a snapshot")]
    Stale,
}

/// An observer's copy of a game, kept current from the event stream.
///
/// [`Replica::new`] starts stale and waits for a snapshot (either a
/// `Snapshot` event or [`Replica::resync`]). [`Replica::from_initial`]
/// starts live at sequence 0 from the game's initial state, for an
/// observer that will see the stream from its first event. Once live, a
/// gap or an event that does not apply makes it stale again until the
/// next snapshot. a gap or an event that does not apply makes it stale
/// again until the next snapshot.
#[derive(Debug, Clone, Default)]
pub struct Replica {
    state: Option<GameState>,
    last_seq: u64,
    stale: bool,
}

impl Replica {
    pub fn new() -> Self {
        Self {
            state: None,
            last_seq: 0,
            stale: true,
        }
    }

    /// Live replica that expects the stream from seq 1
    pub fn from_initial(state: GameState) -> Self {
        Self {
            state: Some(state),
            last_seq: 0,
            stale: false,
        }
    }

    /// Last known state, possibly stale
    pub fn state(&self) -> Option<&GameState> {
        self.state.as_ref()
    }

    pub fn last_seq(&self) -> u64 {
        self.last_seq
    }

    pub fn is_stale(&self) -> bool {
        self.stale || self.state.is_none()
    }

    /// Replace the state with a full snapshot
    pub fn resync_from(&mut self, snapshot: StateSnapshot) {
        self.resync(snapshot.seq, snapshot.state);
    }

    /// Replace the state with a full snapshot taken at `seq`
    pub fn resync(&mut self, seq: u64, state: GameState) {
        self.state = Some(state);
        self.last_seq = seq;
        self.stale = false;
    }

    pub fn receive(&mut self, entry: &SequencedEvent) -> Result<Received, SyncError> {
        if let GameEvent::Snapshot { state } = &entry.event {
            self.resync(entry.seq, state.as_ref().clone());
            return Ok(Received::Resynced);
        }

        if self.is_stale() {
            return Err(SyncError::Stale);
        }
        if entry.seq <= self.last_seq {
            return Ok(Received::Duplicate);
        }
        if entry.seq != self.last_seq + 1 {
            self.stale = true;
            return Err(SyncError::Gap {
                expected: self.last_seq + 1,
                received: entry.seq,
            });
        }

        let state = self.state.as_mut().ok_or(SyncError::Stale)?;
        if let Err(source) = state.apply_event(&entry.event) {
            self.stale = true;
            return Err(SyncError::Diverged {
                seq: entry.seq,
                source,
            });
        }
        self.last_seq = entry.seq;
        Ok(Received::Applied)
    }
}

/// Bounded exponential backoff for snapshot retries
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    max_attempts: u32,
    attempt: u32,
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(Duration::from_millis(250), Duration::from_secs(10), 8)
    }
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration, max_attempts: u32) -> Self {
        Self {
            initial,
            max,
            max_attempts,
            attempt: 0,
        }
    }

    /// Delay before the next attempt, or `None` once attempts run out
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempt >= self.max_attempts {
            return None;
        }
        let factor = 1u32.checked_shl(self.attempt).unwrap_or(u32::MAX);
        self.attempt += 1;
        Some(self.initial.saturating_mul(factor).min(self.max))
    }

    pub fn attempts(&self) -> u32 {
        self.attempt
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}
