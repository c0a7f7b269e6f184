//! HTTP API and websocket watch streams.

use crate::room::GameRoom;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use conquest_core::{ErrorClass, GameError, GameMap, SequencedEvent, StateSnapshot, Submission};
use dashmap::DashMap;
use futures_util::{Sink, SinkExt, StreamExt};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use uuid::Uuid;

/// Server state shared across all connections.
pub struct ServerState {
    /// Loaded maps by name
    pub maps: BTreeMap<String, Arc<GameMap>>,
    /// All games, each behind its own lock
    pub rooms: DashMap<Uuid, Arc<Mutex<GameRoom>>>,
    /// Base dice seed; each new room gets the next one
    seed: Option<u64>,
    rooms_created: AtomicU64,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ServerError {
    #[error("unknown map '{0}'")]
    UnknownMap(String),

    #[error("game {0} not found")]
    UnknownGame(String),
}

impl ServerState {
    pub fn new(maps: BTreeMap<String, Arc<GameMap>>, seed: Option<u64>) -> Self {
        Self {
            maps,
            rooms: DashMap::new(),
            seed,
            rooms_created: AtomicU64::new(0),
        }
    }

    /// Open a lobby on the named map
    pub fn create_game(&self, map: &str) -> Result<Uuid, ServerError> {
        let map = self
            .maps
            .get(map)
            .cloned()
            .ok_or_else(|| ServerError::UnknownMap(map.to_string()))?;

        let nth = self.rooms_created.fetch_add(1, Ordering::Relaxed);
        let rng = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(nth)),
            None => StdRng::from_entropy(),
        };

        let id = Uuid::new_v4();
        info!(game = %id, map = %map.name, "game created");
        self.rooms
            .insert(id, Arc::new(Mutex::new(GameRoom::new(id, map, rng))));
        Ok(id)
    }

    pub fn room(&self, id: &str) -> Result<Arc<Mutex<GameRoom>>, ServerError> {
        Uuid::parse_str(id)
            .ok()
            .and_then(|uuid| self.rooms.get(&uuid).map(|room| Arc::clone(room.value())))
            .ok_or_else(|| ServerError::UnknownGame(id.to_string()))
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct CreateGameRequest {
    #[serde(default = "default_map")]
    pub map: String,
}

fn default_map() -> String {
    "alpha".to_string()
}

#[derive(Debug, Deserialize, Serialize)]
pub struct CreateGameResponse {
    pub id: Uuid,
}

pub fn build_router(state: Arc<ServerState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/map/{id}", get(get_map_handler))
        .route("/game", post(create_game_handler))
        .route("/game/{id}", get(get_game_handler).post(submit_action_handler))
        .route("/game/{id}/watch", get(watch_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Run the HTTP server.
pub async fn run_server(addr: SocketAddr, state: Arc<ServerState>) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "Conquest server listening");
    axum::serve(listener, build_router(state)).await?;
    Ok(())
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({"ok": true, "service": "conquest-server"}))
}

async fn get_map_handler(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<String>,
) -> Result<Json<GameMap>, ApiError> {
    let map = state
        .maps
        .get(&id)
        .ok_or_else(|| ApiError::not_found(format!("map '{id}' not found")))?;
    Ok(Json(map.as_ref().clone()))
}

async fn create_game_handler(
    State(state): State<Arc<ServerState>>,
    Json(request): Json<CreateGameRequest>,
) -> Result<Json<CreateGameResponse>, ApiError> {
    let id = state.create_game(&request.map)?;
    Ok(Json(CreateGameResponse { id }))
}

async fn get_game_handler(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<String>,
) -> Result<Json<StateSnapshot>, ApiError> {
    let room = state.room(&id)?;
    let snapshot = room.lock().await.snapshot();
    Ok(Json(snapshot))
}

/// The body is parsed here rather than by the `Json` extractor so that
/// malformed submissions get the same `{"error": ..}` shape as rule
/// violations.
async fn submit_action_handler(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<String>,
    body: String,
) -> Result<Json<Vec<SequencedEvent>>, ApiError> {
    let room = state.room(&id)?;
    let submission: Submission = serde_json::from_str(&body)
        .map_err(|e| ApiError::bad_request(format!("malformed action: {e}")))?;

    let events = room.lock().await.submit(submission)?;
    Ok(Json(events))
}

async fn watch_handler(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<String>,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    let room = state.room(&id)?;
    Ok(ws.on_upgrade(move |socket| stream_events(socket, room)))
}

/// Send a snapshot, then every later event, until either side goes away.
async fn stream_events(socket: WebSocket, room: Arc<Mutex<GameRoom>>) {
    let (game, (snapshot, mut watcher)) = {
        let room = room.lock().await;
        (room.id, room.watch())
    };
    let (mut sender, mut receiver) = socket.split();
    info!(game = %game, seq = snapshot.seq, "watcher connected");

    if send_event(&mut sender, &snapshot.into_event()).await.is_err() {
        return;
    }

    loop {
        tokio::select! {
            entry = watcher.next(&room) => match entry {
                Some(entry) => {
                    if send_event(&mut sender, &entry).await.is_err() {
                        break;
                    }
                }
                None => break,
            },
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }

    info!(game = %game, seq = watcher.last_sent(), "watcher disconnected");
}

async fn send_event<S>(sender: &mut S, entry: &SequencedEvent) -> Result<(), ()>
where
    S: Sink<Message> + Unpin,
{
    let text = serde_json::to_string(entry).map_err(|_| ())?;
    sender.send(Message::Text(text.into())).await.map_err(|_| ())
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }
}

impl From<ServerError> for ApiError {
    fn from(err: ServerError) -> Self {
        match err {
            ServerError::UnknownMap(_) => Self::bad_request(err.to_string()),
            ServerError::UnknownGame(_) => Self::not_found(err.to_string()),
        }
    }
}

impl From<GameError> for ApiError {
    fn from(err: GameError) -> Self {
        let status = match (&err, err.class()) {
            (GameError::GameOver, _) => StatusCode::CONFLICT,
            (_, ErrorClass::Internal) => StatusCode::INTERNAL_SERVER_ERROR,
            (_, ErrorClass::Validation | ErrorClass::Protocol) => StatusCode::BAD_REQUEST,
        };
        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        warn!(status = %self.status, message = %self.message, "request failed");
        (
            self.status,
            Json(serde_json::json!({"error": self.message})),
        )
            .into_response()
    }
}
