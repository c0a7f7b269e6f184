//! Conquest watch client.
//!
//! Mirrors one game from the server's watch stream and logs every change.
//! When the mirror falls out of step it fetches a fresh snapshot over HTTP,
//! retrying with exponential backoff.
//!
//! Usage: `conquest-watch <game-id>` (server from `CONQUEST_SERVER`).

use anyhow::{bail, Context};
use conquest_core::{
    Backoff, GameEvent, Received, Replica, SequencedEvent, StateSnapshot, SyncError,
};
use futures_util::StreamExt;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_SERVER: &str = "http://127.0.0.1:8080";

struct WatchConfig {
    server: String,
    game: String,
}

impl WatchConfig {
    fn from_env() -> anyhow::Result<Self> {
        let game = std::env::args()
            .nth(1)
            .context("usage: conquest-watch <game-id>")?;
        let server = std::env::var("CONQUEST_SERVER")
            .unwrap_or_else(|_| DEFAULT_SERVER.into())
            .trim_end_matches('/')
            .to_string();
        if !server.starts_with("http://") && !server.starts_with("https://") {
            bail!("CONQUEST_SERVER must be an http(s) URL, got {server}");
        }
        Ok(Self { server, game })
    }

    fn snapshot_url(&self) -> String {
        format!("{}/game/{}", self.server, self.game)
    }

    fn watch_url(&self) -> String {
        let ws = self.server.replacen("http", "ws", 1);
        format!("{}/game/{}/watch", ws, self.game)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = WatchConfig::from_env()?;
    let http = reqwest::Client::new();
    let mut replica = Replica::new();
    let mut reconnect = Backoff::default();

    loop {
        match follow(&config, &http, &mut replica).await {
            Ok(Finished::GameOver) => return Ok(()),
            Ok(Finished::Closed) => {
                info!("server closed the stream");
                reconnect.reset();
            }
            Err(e) => warn!(error = %e, "watch stream failed"),
        }

        let Some(delay) = reconnect.next_delay() else {
            bail!("giving up after {} reconnect attempts", reconnect.attempts());
        };
        info!(delay_ms = delay.as_millis() as u64, "reconnecting");
        tokio::time::sleep(delay).await;
    }
}

enum Finished {
    GameOver,
    Closed,
}

/// Follow the watch stream until it ends or the game does
async fn follow(
    config: &WatchConfig,
    http: &reqwest::Client,
    replica: &mut Replica,
) -> anyhow::Result<Finished> {
    let url = config.watch_url();
    let (mut stream, _) = connect_async(url.as_str())
        .await
        .with_context(|| format!("cannot connect to {url}"))?;
    info!(%url, "watching");

    while let Some(frame) = stream.next().await {
        let text = match frame? {
            Message::Text(text) => text,
            Message::Close(_) => break,
            _ => continue,
        };

        let entry: SequencedEvent = match serde_json::from_str(&text) {
            Ok(entry) => entry,
            Err(e) => {
                warn!(error = %e, "ignoring malformed frame");
                continue;
            }
        };

        match replica.receive(&entry) {
            Ok(Received::Duplicate) => debug!(seq = entry.seq, "duplicate event"),
            Ok(received) => report(replica, &entry, received),
            Err(SyncError::Stale) => debug!(seq = entry.seq, "waiting for snapshot"),
            Err(e) => {
                warn!(error = %e, "replica out of sync");
                resync(config, http, replica).await?;
            }
        }

        if replica.state().is_some_and(|state| state.is_finished()) {
            return Ok(Finished::GameOver);
        }
    }

    Ok(Finished::Closed)
}

/// Fetch a snapshot, retrying with backoff
async fn resync(
    config: &WatchConfig,
    http: &reqwest::Client,
    replica: &mut Replica,
) -> anyhow::Result<()> {
    let mut backoff = Backoff::default();
    loop {
        match fetch_snapshot(config, http).await {
            Ok(snapshot) => {
                info!(seq = snapshot.seq, "resynchronized from snapshot");
                replica.resync_from(snapshot);
                return Ok(());
            }
            Err(e) => {
                let delay = backoff.next_delay().with_context(|| {
                    format!("snapshot unavailable after {} attempts", backoff.attempts())
                })?;
                warn!(error = %e, delay_ms = delay.as_millis() as u64, "snapshot fetch failed");
                tokio::time::sleep(delay).await;
            }
        }
    }
}

async fn fetch_snapshot(config: &WatchConfig, http: &reqwest::Client) -> anyhow::Result<StateSnapshot> {
    let snapshot = http
        .get(config.snapshot_url())
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;
    Ok(snapshot)
}

fn report(replica: &Replica, entry: &SequencedEvent, received: Received) {
    let Some(state) = replica.state() else {
        return;
    };

    match &entry.event {
        GameEvent::Attack {
            player,
            from,
            to,
            attacker_dice,
            defender_dice,
            conquered,
            ..
        } => info!(
            seq = entry.seq,
            %player,
            %from,
            %to,
            ?attacker_dice,
            ?defender_dice,
            conquered,
            "attack"
        ),
        GameEvent::PhaseChanged { .. } => info!(
            seq = entry.seq,
            phase = state.phase.name(),
            active = ?state.active_player,
            "phase changed"
        ),
        event => info!(
            seq = entry.seq,
            event = event.name(),
            resynced = received == Received::Resynced,
            "event"
        ),
    }

    if let Some(winner) = state.winner() {
        info!(%winner, "game over");
    }
}
