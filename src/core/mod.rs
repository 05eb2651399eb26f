//! Core deterministic primitives.
//!
//! Nothing in here touches the network or the clock.

pub mod hash;

pub use hash::{compute_state_hash, StateHash, StateHasher};
