//! Game room management.
//!
//! A room owns one game: its state, the authoritative event log, the dice
//! and the broadcast channel watchers subscribe to. Rooms are always used
//! behind a mutex, so every action resolves against a consistent state and
//! its events reach the channel in sequence order.

use conquest_core::{
    EventLog, GameError, GameMap, GameState, RandomDice, SequencedEvent, StateSnapshot,
    Submission,
};
use rand::rngs::StdRng;
use std::sync::Arc;
use tokio::sync::{broadcast, broadcast::error::RecvError, Mutex};
use tracing::{info, warn};
use uuid::Uuid;

/// Events buffered per room before a slow watcher lags
pub const EVENT_BUFFER: usize = 256;

/// A game room that can hold multiple players.
pub struct GameRoom {
    pub id: Uuid,
    map: Arc<GameMap>,
    state: GameState,
    log: EventLog,
    dice: RandomDice<StdRng>,
    events: broadcast::Sender<SequencedEvent>,
}

impl GameRoom {
    pub fn new(id: Uuid, map: Arc<GameMap>, rng: StdRng) -> Self {
        let state = GameState::new(&map);
        let (events, _) = broadcast::channel(EVENT_BUFFER);

        Self {
            id,
            log: EventLog::new(state.clone()),
            map,
            state,
            dice: RandomDice::new(rng),
            events,
        }
    }

    pub fn state(&self) -> &GameState {
        &self.state
    }

    /// Current state tagged with the last emitted sequence number
    pub fn snapshot(&self) -> StateSnapshot {
        StateSnapshot {
            seq: self.log.last_seq(),
            state: self.state.clone(),
        }
    }

    /// Resolve one submission, record and broadcast its events
    pub fn submit(&mut self, submission: Submission) -> Result<Vec<SequencedEvent>, GameError> {
        let Submission { player, action } = submission;
        let kind = action.name();

        let events = self
            .state
            .apply_action(&self.map, &player, action, &mut self.dice)?;
        let sequenced = self.log.append(events);

        for entry in &sequenced {
            // No watchers is fine; the log keeps everything
            let _ = self.events.send(entry.clone());
        }

        info!(
            game = %self.id,
            player = %player,
            action = kind,
            seq = self.log.last_seq(),
            phase = self.state.phase.name(),
            watchers = self.watcher_count(),
            "action applied"
        );
        Ok(sequenced)
    }

    /// Subscribe to the room. The snapshot and the subscription are taken
    /// together, so the watcher yields exactly the events after it.
    pub fn watch(&self) -> (StateSnapshot, Watcher) {
        let snapshot = self.snapshot();
        let watcher = Watcher {
            game: self.id,
            events: self.events.subscribe(),
            last_sent: snapshot.seq,
            lagged: None,
        };
        (snapshot, watcher)
    }

    pub fn watcher_count(&self) -> usize {
        self.events.receiver_count()
    }
}

/// One watcher's position in a room's event stream.
///
/// Yields events in sequence order. After falling more than
/// [`EVENT_BUFFER`] events behind it yields a fresh snapshot instead of
/// the missed events, then drops buffered entries the snapshot covers.
pub struct Watcher {
    game: Uuid,
    events: broadcast::Receiver<SequencedEvent>,
    last_sent: u64,
    /// Set when a lag was seen but its snapshot not yet taken
    lagged: Option<u64>,
}

impl Watcher {
    /// Next event to deliver, or `None` once the room is gone.
    ///
    /// Cancel safe: a lag noticed before cancellation is answered with a
    /// snapshot on the next call.
    pub async fn next(&mut self, room: &Mutex<GameRoom>) -> Option<SequencedEvent> {
        loop {
            if let Some(skipped) = self.lagged {
                let snapshot = room.lock().await.snapshot();
                warn!(game = %self.game, skipped, seq = snapshot.seq, "watcher lagged, resending snapshot");
                self.lagged = None;
                self.last_sent = snapshot.seq;
                return Some(snapshot.into_event());
            }

            match self.events.recv().await {
                // Already covered by a resync snapshot
                Ok(entry) if entry.seq <= self.last_sent => continue,
                Ok(entry) => {
                    self.last_sent = entry.seq;
                    return Some(entry);
                }
                Err(RecvError::Lagged(skipped)) => self.lagged = Some(skipped),
                Err(RecvError::Closed) => return None,
            }
        }
    }

    pub fn last_sent(&self) -> u64 {
        self.last_sent
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conquest_core::{GameAction, GameEvent, GamePhase};
    use pretty_assertions::assert_eq;
    use rand::SeedableRng;
    use std::collections::BTreeMap;

    fn room() -> GameRoom {
        GameRoom::new(
            Uuid::new_v4(),
            Arc::new(GameMap::alpha()),
            StdRng::seed_from_u64(1),
        )
    }

    fn seat(room: &mut GameRoom) {
        for player in ["alice", "bob"] {
            room.submit(Submission::new(player, GameAction::JoinGame {}))
                .unwrap();
        }
    }

    #[test]
    fn test_create_room() {
        let room = room();
        assert_eq!(room.state().phase, GamePhase::Lobby);
        assert_eq!(room.state().map, "alpha");
        assert_eq!(room.snapshot().seq, 0);
        assert_eq!(room.watcher_count(), 0);
    }

    #[test]
    fn test_submit_appends_to_log() {
        let mut room = room();
        seat(&mut room);
        let events = room
            .submit(Submission::new("alice", GameAction::StartGame {}))
            .unwrap();

        assert_eq!(events.first().map(|e| e.seq), Some(3));
        assert_eq!(room.log.last_seq(), events.last().unwrap().seq);
        assert_eq!(&room.log.replay().unwrap(), room.state());
        assert!(matches!(room.state().phase, GamePhase::Deploy { .. }));
    }

    #[test]
    fn test_rejected_submission_records_nothing() {
        let mut room = room();
        seat(&mut room);
        let seq = room.log.last_seq();

        let err = room
            .submit(Submission::new("bob", GameAction::StartGame {}))
            .unwrap_err();
        assert_eq!(err, GameError::NotYourTurn);
        assert_eq!(room.log.last_seq(), seq);
    }

    #[tokio::test]
    async fn test_watchers_get_snapshot_then_events() {
        let mut room = room();
        seat(&mut room);

        let (snapshot, mut watcher) = room.watch();
        assert_eq!(snapshot.seq, 2);
        assert_eq!(snapshot.state.players.len(), 2);
        assert_eq!(watcher.last_sent(), 2);
        assert_eq!(room.watcher_count(), 1);

        room.submit(Submission::new("alice", GameAction::StartGame {}))
            .unwrap();
        let room = Mutex::new(room);
        let first = watcher.next(&room).await.unwrap();
        assert_eq!(first.seq, 3);
        assert!(matches!(first.event, GameEvent::Snapshot { .. }));
        assert_eq!(watcher.next(&room).await.unwrap().seq, 4);
    }

    /// Deploy everything on the first owned territory and pass the turn
    fn play_turn(room: &mut GameRoom) {
        let player = room.state().active_player.clone().unwrap();
        if let GamePhase::Deploy { reinforcements } = room.state().phase {
            let home = room.state().owned_by(&player).next().unwrap().clone();
            room.submit(Submission::new(
                player.as_str(),
                GameAction::Deploy {
                    deployments: BTreeMap::from([(home, reinforcements)]),
                },
            ))
            .unwrap();
        }
        for action in [
            GameAction::EndDeploy {},
            GameAction::EndAttack {},
            GameAction::EndReinforce {},
        ] {
            room.submit(Submission::new(player.as_str(), action)).unwrap();
        }
    }

    #[tokio::test]
    async fn test_lagging_watcher_gets_fresh_snapshot() {
        let mut room = room();
        seat(&mut room);
        room.submit(Submission::new("alice", GameAction::StartGame {}))
            .unwrap();
        let (_, mut watcher) = room.watch();

        while room.log.last_seq() <= EVENT_BUFFER as u64 + 10 {
            play_turn(&mut room);
        }
        let last_seq = room.log.last_seq();
        let room = Mutex::new(room);

        let resync = watcher.next(&room).await.unwrap();
        assert_eq!(resync.seq, last_seq);
        match resync.event {
            GameEvent::Snapshot { state } => assert_eq!(&*state, room.lock().await.state()),
            other => panic!("expected snapshot, got {other:?}"),
        }

        // buffered entries up to the snapshot are dropped
        play_turn(&mut *room.lock().await);
        let next = watcher.next(&room).await.unwrap();
        assert_eq!(next.seq, last_seq + 1);
        assert_eq!(watcher.last_sent(), last_seq + 1);
    }

    #[test]
    fn test_seeded_rooms_deal_identically() {
        let mut first = room();
        let mut second = room();
        for room in [&mut first, &mut second] {
            seat(room);
            room.submit(Submission::new("alice", GameAction::StartGame {}))
                .unwrap();
        }
        assert_eq!(first.state(), second.state());
    }
}
