//! Game Logic Module
//!
//! The board engine. Pure and deterministic: no I/O, no notion of rooms or
//! network identity.
//!
//! ## Module Structure
//!
//! - `board`: Grid storage, gravity drop, win detection
//! - `state`: Players, turn order, terminal state machine

pub mod board;
pub mod state;

// Re-export key types
pub use board::{Board, BoardDimensions, Cell, CONNECT_LENGTH, DEFAULT_SIZE, MAX_SIZE};
pub use state::{snapshot_hash, DropOutcome, GameError, GamePhase, GameState, Placement, Player};
