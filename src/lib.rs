//! # Drop Four
//!
//! Two-player gravity-drop connection game with a WebSocket room relay.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    DROP FOUR SERVER                          │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/            - Shared primitives                        │
//! │  └── hash.rs      - Board snapshot hashing                   │
//! │                                                              │
//! │  game/            - Rules engine (deterministic)             │
//! │  ├── board.rs     - Grid, gravity drop, win scan             │
//! │  └── state.rs     - Players, turns, win/draw state           │
//! │                                                              │
//! │  network/         - Rooms and I/O                            │
//! │  ├── protocol.rs  - Peer events and relay frames             │
//! │  ├── transport.rs - Publish/subscribe boundary               │
//! │  ├── session.rs   - Per-peer session and room actor          │
//! │  ├── server.rs    - WebSocket relay                          │
//! │  └── client.rs    - WebSocket transport                      │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Consistency
//!
//! Each participant runs its own engine. A move is applied locally, then
//! published; the receiving side replays it against its own board and only
//! commits when the result matches what was broadcast. A mismatch surfaces
//! as `SessionError::DesyncDetected` and leaves local state untouched.
//!
//! Turn ownership is never stored: a peer may move exactly when the game's
//! current player equals its assigned role.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod core;
pub mod game;
pub mod network;

// Re-export commonly used types
pub use crate::core::hash::StateHash;
pub use game::board::{Board, BoardDimensions, Cell};
pub use game::state::{GameError, GamePhase, GameState, Player};
pub use network::session::{GameSession, RoomHandle, SessionConfig, SessionError};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
