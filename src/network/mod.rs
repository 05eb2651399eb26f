//! Network Layer
//!
//! Sessions, the transport boundary between them, and the WebSocket relay.
//! Everything that touches rooms, roles or I/O lives here; the rules live
//! in `game/`.

pub mod client;
pub mod protocol;
pub mod server;
pub mod session;
pub mod transport;

pub use client::{ClientError, WsTransport};
pub use protocol::{
    ClientFrame, ServerFrame, PeerEvent, MovePayload, GameWonPayload, GameDrawnPayload,
    JoinRequest, JoinInfo, Topic, RoomId,
};
pub use server::{RelayServer, RoomRegistry, ServerConfig, GameServerError, RelayError};
pub use session::{GameSession, RoomHandle, RoomView, SessionConfig, SessionError, SessionNotice};
pub use transport::{LocalRelay, Transport, TransportError};
