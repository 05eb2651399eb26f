//! Protocol Messages
//!
//! Two layers of wire types:
//!
//! - **Peer events** (`move`, `gameWon`, `gameDrawn`) exchanged between the
//!   two sessions of a room through whatever transport connects them.
//! - **Relay frames** wrapping those events for the WebSocket relay, plus the
//!   join handshake.
//!
//! Frames are JSON text for debugging ease, with bincode for binary frames.
//! All enums use serde's default external tagging so both encodings work.

use serde::{Serialize, Deserialize};

use crate::game::board::Board;
use crate::game::state::Player;

/// Room identifier as chosen by the participants.
pub type RoomId = String;

// =============================================================================
// PEER EVENTS
// =============================================================================

/// Kinds of peer event; each has its own topic per room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventKind {
    /// A piece was dropped and the game continues.
    Move,
    /// A piece was dropped and won the game.
    GameWon,
    /// A piece was dropped and filled the board.
    GameDrawn,
}

impl EventKind {
    /// All kinds, in subscription order.
    pub const ALL: [EventKind; 3] = [EventKind::Move, EventKind::GameWon, EventKind::GameDrawn];

    /// Event name on the wire.
    pub fn name(self) -> &'static str {
        match self {
            EventKind::Move => "move",
            EventKind::GameWon => "gameWon",
            EventKind::GameDrawn => "gameDrawn",
        }
    }
}

/// Subscription topic: event name and room id joined by `_`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Topic(String);

impl Topic {
    /// Topic for one event kind in one room.
    pub fn new(kind: EventKind, room_id: &str) -> Self {
        Self(format!("{}_{}", kind.name(), room_id))
    }

    /// `move_<room>`.
    pub fn moves(room_id: &str) -> Self {
        Self::new(EventKind::Move, room_id)
    }

    /// `gameWon_<room>`.
    pub fn game_won(room_id: &str) -> Self {
        Self::new(EventKind::GameWon, room_id)
    }

    /// `gameDrawn_<room>`.
    pub fn game_drawn(room_id: &str) -> Self {
        Self::new(EventKind::GameDrawn, room_id)
    }

    /// Every topic a session in `room_id` listens on.
    pub fn all_for_room(room_id: &str) -> Vec<Topic> {
        EventKind::ALL.iter().map(|k| Self::new(*k, room_id)).collect()
    }

    /// Topic string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A non-terminal drop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MovePayload {
    /// Room the move belongs to.
    pub room_id: RoomId,
    /// Board after the move.
    pub board: Board,
    /// Player on move after the move.
    pub current_player: Player,
    /// Column the piece was dropped into. Signed so that out-of-range
    /// values survive decoding and are rejected by the engine.
    pub column: i64,
    /// Row the piece landed in.
    pub row: usize,
    /// Who moved.
    pub player: Player,
    /// Hex hash of board and turn after the move.
    #[serde(default)]
    pub board_hash: Option<String>,
}

/// A winning drop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameWonPayload {
    /// Room the game belongs to.
    pub room_id: RoomId,
    /// Who won.
    pub winner: Player,
    /// Column of the winning drop, when the sender supplies it.
    #[serde(default)]
    pub column: Option<i64>,
}

/// A drop that filled the board without a winner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameDrawnPayload {
    /// Room the game belongs to.
    pub room_id: RoomId,
    /// Who made the last drop.
    pub player: Player,
    /// Column of the last drop, when the sender supplies it.
    #[serde(default)]
    pub column: Option<i64>,
}

/// Event published by one session for the other session of its room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PeerEvent {
    /// `move`
    Move(MovePayload),
    /// `gameWon`
    GameWon(GameWonPayload),
    /// `gameDrawn`
    GameDrawn(GameDrawnPayload),
}

impl PeerEvent {
    /// Event kind.
    pub fn kind(&self) -> EventKind {
        match self {
            PeerEvent::Move(_) => EventKind::Move,
            PeerEvent::GameWon(_) => EventKind::GameWon,
            PeerEvent::GameDrawn(_) => EventKind::GameDrawn,
        }
    }

    /// Room the event belongs to.
    pub fn room_id(&self) -> &str {
        match self {
            PeerEvent::Move(p) => &p.room_id,
            PeerEvent::GameWon(p) => &p.room_id,
            PeerEvent::GameDrawn(p) => &p.room_id,
        }
    }

    /// Topic the event is delivered on.
    pub fn topic(&self) -> Topic {
        Topic::new(self.kind(), self.room_id())
    }

    /// Player whose drop produced the event.
    pub fn origin(&self) -> Player {
        match self {
            PeerEvent::Move(p) => p.player,
            PeerEvent::GameWon(p) => p.winner,
            PeerEvent::GameDrawn(p) => p.player,
        }
    }
}

// =============================================================================
// CLIENT -> RELAY FRAMES
// =============================================================================

/// Frames sent from a peer to the relay server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientFrame {
    /// Join (or create) a room.
    Join(JoinRequest),

    /// Relay an event to the other participant of the room.
    Publish(PeerEvent),

    /// Leave the current room.
    Leave,

    /// Ping for latency measurement.
    Ping { timestamp: u64 },
}

/// Join request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JoinRequest {
    /// Room to join. A fresh id is generated when absent.
    pub room_id: Option<RoomId>,
    /// Requested rows; only honored when this join creates the room.
    pub rows: Option<i64>,
    /// Requested columns; only honored when this join creates the room.
    pub columns: Option<i64>,
}

// =============================================================================
// RELAY -> CLIENT FRAMES
// =============================================================================

/// Frames sent from the relay server to a peer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerFrame {
    /// Join accepted.
    Joined(JoinInfo),

    /// The other participant joined the room.
    PeerJoined { role: Player },

    /// The other participant left; the room is closed.
    PeerLeft { role: Player },

    /// Event relayed from the other participant.
    Event(PeerEvent),

    /// Pong response.
    Pong { timestamp: u64, server_time: u64 },

    /// Error message.
    Error(ServerError),

    /// Server is shutting down.
    Shutdown { reason: String },
}

/// Result of a successful join.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinInfo {
    /// Room joined.
    pub room_id: RoomId,
    /// Role assigned to the joiner.
    pub role: Player,
    /// Board rows for the room.
    pub rows: usize,
    /// Board columns for the room.
    pub columns: usize,
    /// Player who moves first in every game of the room.
    pub starting_player: Player,
    /// Whether the other seat is already taken.
    pub opponent_present: bool,
}

/// Server error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerError {
    /// Error code.
    pub code: ErrorCode,
    /// Human-readable message.
    pub message: String,
}

/// Error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Invalid frame.
    InvalidInput,
    /// Room already has two participants.
    RoomFull,
    /// Too many rooms open.
    ServerOverloaded,
    /// Publish or leave before joining.
    NotInRoom,
    /// Already joined a room on this connection.
    AlreadyInRoom,
    /// Event addressed to a room other than the sender's.
    WrongRoom,
}

// =============================================================================
// SERIALIZATION HELPERS
// =============================================================================

impl ClientFrame {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }

    /// Serialize to binary.
    pub fn to_bytes(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }

    /// Deserialize from binary.
    pub fn from_bytes(data: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(data)
    }
}

impl ServerFrame {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }

    /// Serialize to binary.
    pub fn to_bytes(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }

    /// Deserialize from binary.
    pub fn from_bytes(data: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(data)
    }

    /// Shorthand for an error frame.
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        ServerFrame::Error(ServerError {
            code,
            message: message.into(),
        })
    }
}
