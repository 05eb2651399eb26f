//! WebSocket Relay Server
//!
//! Pairs two connections into a room and forwards peer events between them.
//! The relay never runs the game; each participant validates the other's
//! events against its own engine.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, RwLock, broadcast};
use tokio_tungstenite::{accept_async, tungstenite::Message};
use futures_util::{SinkExt, StreamExt};
use tracing::{info, warn, error, debug, instrument};

use crate::game::board::{BoardDimensions, DEFAULT_SIZE};
use crate::game::state::{GameError, Player};
use crate::network::protocol::{
    ClientFrame, ErrorCode, JoinInfo, JoinRequest, PeerEvent, RoomId, ServerFrame,
};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Maximum open rooms.
    pub max_rooms: usize,
    /// Connections silent for this long are closed.
    pub idle_timeout: Duration,
    /// Rows for rooms created without a size.
    pub default_rows: usize,
    /// Columns for rooms created without a size.
    pub default_columns: usize,
    /// Player who moves first in every room.
    pub starting_player: Player,
    /// Server version string.
    pub version: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            max_connections: 1000,
            max_rooms: 500,
            idle_timeout: Duration::from_secs(300),
            default_rows: DEFAULT_SIZE,
            default_columns: DEFAULT_SIZE,
            starting_player: Player::Player1,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables.
    ///
    /// Unset or unparsable variables keep their default.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            bind_addr: env_or("DROP_FOUR_BIND", defaults.bind_addr),
            max_connections: env_or("DROP_FOUR_MAX_CONNECTIONS", defaults.max_connections),
            max_rooms: env_or("DROP_FOUR_MAX_ROOMS", defaults.max_rooms),
            idle_timeout: Duration::from_secs(env_or(
                "DROP_FOUR_IDLE_TIMEOUT_SECS",
                defaults.idle_timeout.as_secs(),
            )),
            ..defaults
        }
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(value) => value.parse().unwrap_or_else(|_| {
            warn!("Ignoring invalid {}={:?}", key, value);
            default
        }),
        Err(_) => default,
    }
}

/// Game server errors.
#[derive(Debug, thiserror::Error)]
pub enum GameServerError {
    /// Failed to bind to address.
    #[error("Failed to bind: {0}")]
    BindFailed(#[from] std::io::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Connection limit reached.
    #[error("Connection limit reached")]
    ConnectionLimitReached,
}

/// Reasons the relay refuses a frame.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RelayError {
    /// Both seats taken.
    #[error("Room {0} is full")]
    RoomFull(RoomId),

    /// `max_rooms` reached.
    #[error("Too many open rooms")]
    ServerOverloaded,

    /// Frame requires a room first.
    #[error("Not in a room")]
    NotInRoom,

    /// Connection already seated.
    #[error("Already in room {0}")]
    AlreadyInRoom(RoomId),

    /// Event names another room.
    #[error("Event for room {got} sent from room {expected}")]
    WrongRoom { expected: RoomId, got: RoomId },

    /// Event claims to come from the other seat.
    #[error("{sender} cannot publish events for {claimed}")]
    ForgedOrigin { sender: Player, claimed: Player },

    /// Requested board size cannot be played.
    #[error(transparent)]
    InvalidSize(GameError),
}

impl RelayError {
    /// Wire error code.
    pub fn code(&self) -> ErrorCode {
        match self {
            RelayError::RoomFull(_) => ErrorCode::RoomFull,
            RelayError::ServerOverloaded => ErrorCode::ServerOverloaded,
            RelayError::NotInRoom => ErrorCode::NotInRoom,
            RelayError::AlreadyInRoom(_) => ErrorCode::AlreadyInRoom,
            RelayError::WrongRoom { .. } => ErrorCode::WrongRoom,
            RelayError::ForgedOrigin { .. } | RelayError::InvalidSize(_) => ErrorCode::InvalidInput,
        }
    }
}

impl From<RelayError> for ServerFrame {
    fn from(e: RelayError) -> Self {
        ServerFrame::error(e.code(), e.to_string())
    }
}

// =============================================================================
// ROOM REGISTRY
// =============================================================================

/// One seated connection.
#[derive(Clone)]
struct Member {
    addr: SocketAddr,
    role: Player,
    sender: mpsc::Sender<ServerFrame>,
}

struct Room {
    dimensions: BoardDimensions,
    members: Vec<Member>,
}

impl Room {
    fn other(&self, addr: SocketAddr) -> Option<&Member> {
        self.members.iter().find(|m| m.addr != addr)
    }
}

#[derive(Default)]
struct RegistryInner {
    rooms: BTreeMap<RoomId, Room>,
    seats: BTreeMap<SocketAddr, (RoomId, Player)>,
}

/// Rooms and who sits in them.
pub struct RoomRegistry {
    inner: RwLock<RegistryInner>,
    max_rooms: usize,
    default_dimensions: BoardDimensions,
    starting_player: Player,
}

impl RoomRegistry {
    /// Create a registry with the limits and defaults from `config`.
    pub fn new(config: &ServerConfig) -> Self {
        Self {
            inner: RwLock::new(RegistryInner::default()),
            max_rooms: config.max_rooms,
            default_dimensions: BoardDimensions::from_sizes(config.default_rows, config.default_columns)
                .unwrap_or_else(|e| {
                    warn!("{}; using the default size", e);
                    BoardDimensions::default()
                }),
            starting_player: config.starting_player,
        }
    }

    /// Seat `addr` in the requested room.
    ///
    /// The first joiner creates the room with its requested size and plays
    /// `Player1`; the second plays `Player2` and the size request is ignored.
    pub async fn join(
        &self,
        addr: SocketAddr,
        request: JoinRequest,
        sender: mpsc::Sender<ServerFrame>,
    ) -> Result<JoinInfo, RelayError> {
        let mut inner = self.inner.write().await;

        if let Some((room_id, _)) = inner.seats.get(&addr) {
            return Err(RelayError::AlreadyInRoom(room_id.clone()));
        }

        let room_id = request
            .room_id
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        let room_count = inner.rooms.len();
        let (role, dimensions, waiting) = match inner.rooms.get_mut(&room_id) {
            Some(room) => {
                if room.members.len() >= 2 {
                    return Err(RelayError::RoomFull(room_id));
                }
                let role = room.members[0].role.other();
                let waiting = room.members[0].sender.clone();
                room.members.push(Member { addr, role, sender });
                (role, room.dimensions, Some(waiting))
            }
            None => {
                if room_count >= self.max_rooms {
                    return Err(RelayError::ServerOverloaded);
                }
                let dimensions = match (request.rows, request.columns) {
                    (None, None) => self.default_dimensions,
                    (rows, columns) => BoardDimensions::new(
                        rows.unwrap_or(self.default_dimensions.rows as i64),
                        columns.unwrap_or(self.default_dimensions.columns as i64),
                    )
                    .map_err(RelayError::InvalidSize)?,
                };
                inner.rooms.insert(
                    room_id.clone(),
                    Room {
                        dimensions,
                        members: vec![Member { addr, role: Player::Player1, sender }],
                    },
                );
                (Player::Player1, dimensions, None)
            }
        };
        inner.seats.insert(addr, (room_id.clone(), role));
        drop(inner);

        let opponent_present = waiting.is_some();
        if let Some(waiting) = waiting {
            let _ = waiting.send(ServerFrame::PeerJoined { role }).await;
        }

        info!("{} joined room {} as {}", addr, room_id, role);
        Ok(JoinInfo {
            room_id,
            role,
            rows: dimensions.rows,
            columns: dimensions.columns,
            starting_player: self.starting_player,
            opponent_present,
        })
    }

    /// Forward an event from `addr` to the other member of its room.
    ///
    /// Returns whether the event was handed to an opponent; events sent
    /// while the other seat is empty are dropped.
    pub async fn route(&self, addr: SocketAddr, event: PeerEvent) -> Result<bool, RelayError> {
        let target = {
            let inner = self.inner.read().await;
            let (room_id, role) = inner.seats.get(&addr).ok_or(RelayError::NotInRoom)?;
            if event.room_id() != room_id.as_str() {
                return Err(RelayError::WrongRoom {
                    expected: room_id.clone(),
                    got: event.room_id().to_string(),
                });
            }
            if event.origin() != *role {
                return Err(RelayError::ForgedOrigin {
                    sender: *role,
                    claimed: event.origin(),
                });
            }
            inner
                .rooms
                .get(room_id)
                .and_then(|room| room.other(addr))
                .map(|m| m.sender.clone())
        };

        match target {
            Some(sender) => {
                debug!("Relaying {} from {}", event.topic(), addr);
                Ok(sender.send(ServerFrame::Event(event)).await.is_ok())
            }
            None => {
                debug!("Dropping {} from {}: no opponent", event.topic(), addr);
                Ok(false)
            }
        }
    }

    /// Remove `addr` from its room and close the room.
    ///
    /// The remaining member is unseated and told with `PeerLeft`.
    pub async fn leave(&self, addr: SocketAddr) -> Option<(RoomId, Player)> {
        let (room_id, role, remaining) = {
            let mut inner = self.inner.write().await;
            let (room_id, role) = inner.seats.remove(&addr)?;
            let remaining = inner
                .rooms
                .remove(&room_id)
                .and_then(|room| room.other(addr).cloned());
            if let Some(member) = &remaining {
                inner.seats.remove(&member.addr);
            }
            (room_id, role, remaining)
        };

        if let Some(member) = remaining {
            let _ = member.sender.send(ServerFrame::PeerLeft { role }).await;
        }
        info!("{} left room {} ({})", addr, room_id, role);
        Some((room_id, role))
    }

    /// Number of open rooms.
    pub async fn room_count(&self) -> usize {
        self.inner.read().await.rooms.len()
    }

    /// Room and role of a connection.
    pub async fn seat_of(&self, addr: &SocketAddr) -> Option<(RoomId, Player)> {
        self.inner.read().await.seats.get(addr).cloned()
    }
}

// =============================================================================
// SERVER
// =============================================================================

/// Connected client state.
struct ConnectedClient {
    /// Connection time.
    connected_at: Instant,
}

/// The relay server.
pub struct RelayServer {
    /// Server configuration.
    config: ServerConfig,
    /// Room registry.
    registry: Arc<RoomRegistry>,
    /// Connected clients.
    clients: Arc<RwLock<BTreeMap<SocketAddr, ConnectedClient>>>,
    /// Shutdown signal.
    shutdown_tx: broadcast::Sender<()>,
}

impl RelayServer {
    /// Create a new relay server.
    pub fn new(config: ServerConfig) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        let registry = Arc::new(RoomRegistry::new(&config));

        Self {
            config,
            registry,
            clients: Arc::new(RwLock::new(BTreeMap::new())),
            shutdown_tx,
        }
    }

    /// Bind the configured address and run until shutdown.
    #[instrument(skip(self))]
    pub async fn run(&self) -> Result<(), GameServerError> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        self.serve(listener).await
    }

    /// Accept connections from `listener` until shutdown.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), GameServerError> {
        info!(
            "Relay server v{} listening on {}",
            self.config.version,
            listener.local_addr()?
        );

        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            let clients_count = self.clients.read().await.len();
                            if clients_count >= self.config.max_connections {
                                warn!("{} for {}", GameServerError::ConnectionLimitReached, addr);
                                continue;
                            }

                            info!("New connection from {}", addr);
                            self.handle_connection(stream, addr);
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        Ok(())
    }

    /// Handle a new WebSocket connection.
    fn handle_connection(&self, stream: TcpStream, addr: SocketAddr) {
        let clients = self.clients.clone();
        let registry = self.registry.clone();
        let idle_timeout = self.config.idle_timeout;
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let ws_stream = match accept_async(stream).await {
                Ok(ws) => ws,
                Err(e) => {
                    error!("WebSocket handshake failed for {}: {}", addr, e);
                    return;
                }
            };

            let (mut ws_sender, mut ws_receiver) = ws_stream.split();
            let (msg_tx, mut msg_rx) = mpsc::channel::<ServerFrame>(64);

            clients.write().await.insert(addr, ConnectedClient {
                connected_at: Instant::now(),
            });

            // Spawn message sender task
            let sender_task = tokio::spawn(async move {
                while let Some(frame) = msg_rx.recv().await {
                    let text = match frame.to_json() {
                        Ok(t) => t,
                        Err(e) => {
                            error!("Failed to serialize frame: {}", e);
                            continue;
                        }
                    };
                    if ws_sender.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                let _ = ws_sender.close().await;
            });

            let idle = tokio::time::sleep(idle_timeout);
            tokio::pin!(idle);

            // Handle incoming frames
            loop {
                tokio::select! {
                    msg = ws_receiver.next() => {
                        let frame = match msg {
                            Some(Ok(Message::Text(text))) => ClientFrame::from_json(&text)
                                .map_err(|e| e.to_string()),
                            Some(Ok(Message::Binary(data))) => ClientFrame::from_bytes(&data)
                                .map_err(|e| e.to_string()),
                            Some(Ok(Message::Close(_))) | None => {
                                debug!("Client {} disconnected", addr);
                                break;
                            }
                            Some(Err(e)) => {
                                error!("WebSocket error for {}: {}", addr, e);
                                break;
                            }
                            Some(Ok(_)) => continue,
                        };
                        idle.as_mut().reset(tokio::time::Instant::now() + idle_timeout);

                        match frame {
                            Ok(frame) => {
                                Self::handle_client_frame(addr, frame, &registry, &msg_tx).await;
                            }
                            Err(e) => {
                                debug!("Invalid frame from {}: {}", addr, e);
                                let _ = msg_tx.send(ServerFrame::error(
                                    ErrorCode::InvalidInput,
                                    "Invalid frame format",
                                )).await;
                            }
                        }
                    }
                    _ = &mut idle => {
                        info!("Closing idle connection {}", addr);
                        break;
                    }
                    _ = shutdown_rx.recv() => {
                        let _ = msg_tx.send(ServerFrame::Shutdown {
                            reason: "Server shutting down".to_string(),
                        }).await;
                        break;
                    }
                }
            }

            // Cleanup
            registry.leave(addr).await;
            drop(msg_tx);
            if tokio::time::timeout(Duration::from_secs(1), sender_task).await.is_err() {
                debug!("Sender for {} did not drain in time", addr);
            }

            if let Some(client) = clients.write().await.remove(&addr) {
                info!("Client {} cleaned up after {:?}", addr, client.connected_at.elapsed());
            }
        });
    }

    /// Handle one client frame.
    async fn handle_client_frame(
        addr: SocketAddr,
        frame: ClientFrame,
        registry: &RoomRegistry,
        sender: &mpsc::Sender<ServerFrame>,
    ) {
        let reply = match frame {
            ClientFrame::Join(request) => {
                match registry.join(addr, request, sender.clone()).await {
                    Ok(info) => Some(ServerFrame::Joined(info)),
                    Err(e) => {
                        debug!("Join from {} refused: {}", addr, e);
                        Some(e.into())
                    }
                }
            }
            ClientFrame::Publish(event) => match registry.route(addr, event).await {
                Ok(_) => None,
                Err(e) => {
                    warn!("Publish from {} refused: {}", addr, e);
                    Some(e.into())
                }
            },
            ClientFrame::Leave => match registry.leave(addr).await {
                Some(_) => None,
                None => Some(RelayError::NotInRoom.into()),
            },
            ClientFrame::Ping { timestamp } => Some(ServerFrame::Pong {
                timestamp,
                server_time: std::time::SystemTime::now()
                    .duration_since(std::time::UNIX_EPOCH)
                    .unwrap_or_default()
                    .as_millis() as u64,
            }),
        };

        if let Some(reply) = reply {
            let _ = sender.send(reply).await;
        }
    }

    /// Shutdown the server.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Room registry.
    pub fn registry(&self) -> &Arc<RoomRegistry> {
        &self.registry
    }

    /// Get active connection count.
    pub async fn connection_count(&self) -> usize {
        self.clients.read().await.len()
    }

    /// Get open room count.
    pub async fn room_count(&self) -> usize {
        self.registry.room_count().await
    }
}
