//! Game State Definitions
//!
//! `GameState` owns one board plus whose turn it is and whether the game is
//! over. `drop_piece` is the only way to mutate it; a failed drop leaves the
//! state exactly as it was.

use serde::{Serialize, Deserialize};

use crate::core::hash::{compute_state_hash, StateHash};
use crate::game::board::{Board, BoardDimensions};

// =============================================================================
// PLAYER
// =============================================================================

/// One of the two participants of a room.
///
/// Serialized as `1` or `2`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum Player {
    /// First player. Moves first unless configured otherwise.
    #[default]
    Player1,
    /// Second player.
    Player2,
}

impl Player {
    /// The opponent.
    #[inline]
    pub fn other(self) -> Player {
        match self {
            Player::Player1 => Player::Player2,
            Player::Player2 => Player::Player1,
        }
    }

    /// Wire number (1 or 2).
    #[inline]
    pub fn number(self) -> u8 {
        self.into()
    }
}

impl From<Player> for u8 {
    fn from(player: Player) -> Self {
        match player {
            Player::Player1 => 1,
            Player::Player2 => 2,
        }
    }
}

impl TryFrom<u8> for Player {
    type Error = GameError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Player::Player1),
            2 => Ok(Player::Player2),
            other => Err(GameError::UnknownPlayer(other)),
        }
    }
}

impl std::fmt::Display for Player {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Player {}", self.number())
    }
}

// =============================================================================
// PHASE / ERRORS
// =============================================================================

/// Terminal flag of a game.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GamePhase {
    /// Moves are accepted.
    InProgress,
    /// A player connected four.
    Won(Player),
    /// Board filled with no winner.
    Drawn,
}

impl GamePhase {
    /// Check if no further drops are accepted.
    #[inline]
    pub fn is_terminal(self) -> bool {
        !matches!(self, GamePhase::InProgress)
    }
}

/// Errors from the board engine.
///
/// All of them are recoverable; the game stays usable.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GameError {
    /// Column index outside the board.
    #[error("Column {column} is outside the board (0..{columns})")]
    InvalidColumn { column: i64, columns: usize },

    /// No empty cell left in the column.
    #[error("Column {column} is full")]
    ColumnFull { column: usize },

    /// Game already won or drawn.
    #[error("Game is over")]
    GameOver,

    /// Drop attempted by the player who is not on move.
    #[error("It is {expected}'s turn, not {got}'s")]
    NotPlayersTurn { expected: Player, got: Player },

    /// Player number other than 1 or 2.
    #[error("Unknown player number {0}")]
    UnknownPlayer(u8),

    /// Malformed board snapshot.
    #[error("Invalid board: {0}")]
    InvalidBoard(String),

    /// Requested board size is too large.
    #[error("Board size {rows}x{columns} is out of range (max {max}x{max})", max = crate::game::board::MAX_SIZE)]
    InvalidDimensions { rows: i64, columns: i64 },
}

// =============================================================================
// DROP RESULT
// =============================================================================

/// What a successful drop did to the game.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DropOutcome {
    /// Game continues; the turn passed to the other player.
    Continue,
    /// The mover connected four.
    Won(Player),
    /// Board is full with no winner.
    Drawn,
}

/// A successfully applied drop.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Placement {
    /// Row the piece landed in.
    pub row: usize,
    /// Column it was dropped into.
    pub column: usize,
    /// Who dropped it.
    pub player: Player,
    /// Resulting game outcome.
    pub outcome: DropOutcome,
}

// =============================================================================
// GAME STATE
// =============================================================================

/// Complete state of one game.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameState {
    board: Board,
    current_player: Player,
    starting_player: Player,
    phase: GamePhase,
    move_count: u32,
}

impl GameState {
    /// Create a fresh game.
    pub fn new(dims: BoardDimensions, starting_player: Player) -> Self {
        Self {
            board: Board::new(dims),
            current_player: starting_player,
            starting_player,
            phase: GamePhase::InProgress,
            move_count: 0,
        }
    }

    /// Create a fresh game from raw dimensions with Player 1 to move.
    ///
    /// Non-positive dimensions fall back to the default size; oversized ones
    /// are rejected.
    pub fn initialize(rows: i64, columns: i64) -> Result<Self, GameError> {
        Ok(Self::new(BoardDimensions::new(rows, columns)?, Player::Player1))
    }

    /// Board.
    #[inline]
    pub fn board(&self) -> &Board {
        &self.board
    }

    /// Player on move.
    #[inline]
    pub fn current_player(&self) -> Player {
        self.current_player
    }

    /// Player who moves first after a reset.
    #[inline]
    pub fn starting_player(&self) -> Player {
        self.starting_player
    }

    /// Terminal flag.
    #[inline]
    pub fn phase(&self) -> GamePhase {
        self.phase
    }

    /// Check if the game is won or drawn.
    #[inline]
    pub fn is_terminal(&self) -> bool {
        self.phase.is_terminal()
    }

    /// Drops applied since the last reset.
    #[inline]
    pub fn move_count(&self) -> u32 {
        self.move_count
    }

    /// Drop a piece for `player` into `column`.
    ///
    /// Checks run in order: game over, turn, column range, column full. On
    /// error nothing changes. On success the phase advances and, if the game
    /// continues, the turn passes to the other player.
    pub fn drop_piece(&mut self, column: usize, player: Player) -> Result<Placement, GameError> {
        if self.phase.is_terminal() {
            return Err(GameError::GameOver);
        }

        if player != self.current_player {
            return Err(GameError::NotPlayersTurn {
                expected: self.current_player,
                got: player,
            });
        }

        let row = self.board.drop_piece(column, player)?;
        self.move_count += 1;

        let outcome = if self.board.check_win(row, column, player) {
            self.phase = GamePhase::Won(player);
            DropOutcome::Won(player)
        } else if self.board.is_full() {
            self.phase = GamePhase::Drawn;
            DropOutcome::Drawn
        } else {
            self.current_player = player.other();
            DropOutcome::Continue
        };

        Ok(Placement { row, column, player, outcome })
    }

    /// Board full and the last piece did not win.
    pub fn check_draw(&self) -> bool {
        self.board.is_full() && !matches!(self.phase, GamePhase::Won(_))
    }

    /// Start a new game on a board of the same size.
    pub fn reset(&mut self) {
        *self = Self::new(self.board.dimensions(), self.starting_player);
    }

    /// Hash of the board and the player on move.
    pub fn hash(&self) -> StateHash {
        snapshot_hash(&self.board, self.current_player, self.phase.is_terminal())
    }
}

/// Hash of a board snapshot as `GameState::hash` computes it.
///
/// Lets a receiver hash a broadcast board without rebuilding a game.
pub fn snapshot_hash(board: &Board, current_player: Player, terminal: bool) -> StateHash {
    let dims = board.dimensions();
    compute_state_hash(dims.rows as u32, dims.columns as u32, |hasher| {
        hasher.update_bytes(&board.cell_bytes());
        hasher.update_u8(current_player.number());
        hasher.update_bool(terminal);
    })
}

impl Default for GameState {
    fn default() -> Self {
        Self::new(BoardDimensions::default(), Player::Player1)
    }
}
