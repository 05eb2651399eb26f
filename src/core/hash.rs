//! Board State Hashing
//!
//! Deterministic hashing of a board snapshot and the side to move.
//! Peers attach the hash to every `move` broadcast so a mismatch can be
//! reported compactly instead of dumping two full grids into the log.

use sha2::{Sha256, Digest};

/// Hash output type (256 bits / 32 bytes)
pub type StateHash = [u8; 32];

/// Deterministic hasher for game state.
///
/// Wraps SHA-256 with a domain separator. Order of updates is part of the
/// hash, so callers must feed fields in a fixed order.
pub struct StateHasher {
    hasher: Sha256,
}

impl StateHasher {
    /// Create a new hasher with domain separator.
    pub fn new(domain: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(domain);
        Self { hasher }
    }

    /// Create hasher for a board snapshot.
    pub fn for_board_state() -> Self {
        Self::new(b"DROP_FOUR_BOARD_V1")
    }

    /// Update with raw bytes.
    #[inline]
    pub fn update_bytes(&mut self, bytes: &[u8]) {
        self.hasher.update(bytes);
    }

    /// Update with a u8 value.
    #[inline]
    pub fn update_u8(&mut self, value: u8) {
        self.hasher.update([value]);
    }

    /// Update with a u32 value (little-endian).
    #[inline]
    pub fn update_u32(&mut self, value: u32) {
        self.hasher.update(value.to_le_bytes());
    }

    /// Update with a boolean.
    #[inline]
    pub fn update_bool(&mut self, value: bool) {
        self.update_u8(value as u8);
    }

    /// Finalize and return the hash.
    pub fn finalize(self) -> StateHash {
        self.hasher.finalize().into()
    }
}

/// Compute the hash of a board snapshot.
///
/// Dimensions go first so that two boards with the same cell bytes but a
/// different shape never collide. The closure adds the cells and turn.
pub fn compute_state_hash<F>(rows: u32, columns: u32, add_state: F) -> StateHash
where
    F: FnOnce(&mut StateHasher),
{
    let mut hasher = StateHasher::for_board_state();

    hasher.update_u32(rows);
    hasher.update_u32(columns);

    add_state(&mut hasher);

    hasher.finalize()
}

/// First four bytes of a hash as hex, for log lines.
pub fn short_hex(hash: &StateHash) -> String {
    hex::encode(&hash[..4])
}
