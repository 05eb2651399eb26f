//! Board Storage and Win Detection
//!
//! A `rows x columns` grid filled by gravity. Row 0 is the top; a dropped
//! piece lands in the highest row index that is still empty. Cells only ever
//! go from `Empty` to a player, never back.

use std::fmt;
use serde::{Serialize, Deserialize};

use crate::game::state::{GameError, Player};

/// Pieces in an unbroken line needed to win.
pub const CONNECT_LENGTH: usize = 4;

/// Side length used when a dimension is missing or non-positive.
pub const DEFAULT_SIZE: usize = 5;

/// Largest accepted side length.
pub const MAX_SIZE: usize = 64;

/// Axes scanned by `check_win`: horizontal, vertical, both diagonals.
const WIN_DIRECTIONS: [(i64, i64); 4] = [(0, 1), (1, 0), (1, 1), (1, -1)];

// =============================================================================
// CELL
// =============================================================================

/// Contents of one board cell.
///
/// Serialized as `0`, `1` or `2`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum Cell {
    /// No piece.
    #[default]
    Empty,
    /// Piece owned by player 1.
    Player1,
    /// Piece owned by player 2.
    Player2,
}

impl Cell {
    /// Owner of the cell, if any.
    pub fn owner(self) -> Option<Player> {
        match self {
            Cell::Empty => None,
            Cell::Player1 => Some(Player::Player1),
            Cell::Player2 => Some(Player::Player2),
        }
    }

    /// Check if no piece occupies the cell.
    #[inline]
    pub fn is_empty(self) -> bool {
        self == Cell::Empty
    }
}

impl From<Player> for Cell {
    fn from(player: Player) -> Self {
        match player {
            Player::Player1 => Cell::Player1,
            Player::Player2 => Cell::Player2,
        }
    }
}

impl From<Cell> for u8 {
    fn from(cell: Cell) -> Self {
        match cell {
            Cell::Empty => 0,
            Cell::Player1 => 1,
            Cell::Player2 => 2,
        }
    }
}

impl TryFrom<u8> for Cell {
    type Error = GameError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Cell::Empty),
            1 => Ok(Cell::Player1),
            2 => Ok(Cell::Player2),
            other => Err(GameError::InvalidBoard(format!("unknown cell value {}", other))),
        }
    }
}

// =============================================================================
// DIMENSIONS
// =============================================================================

/// Board shape.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoardDimensions {
    /// Number of rows.
    pub rows: usize,
    /// Number of columns.
    pub columns: usize,
}

impl BoardDimensions {
    /// Build from caller-supplied values.
    ///
    /// Non-positive values become `DEFAULT_SIZE`; anything above `MAX_SIZE`
    /// is rejected.
    pub fn new(rows: i64, columns: i64) -> Result<Self, GameError> {
        match (clamp_dimension(rows), clamp_dimension(columns)) {
            (Some(r), Some(c)) => Ok(Self { rows: r, columns: c }),
            _ => Err(GameError::InvalidDimensions { rows, columns }),
        }
    }

    /// Build from optional values; `None` means the default.
    pub fn from_optional(rows: Option<i64>, columns: Option<i64>) -> Result<Self, GameError> {
        Self::new(rows.unwrap_or(0), columns.unwrap_or(0))
    }

    /// Build from unsigned sizes, as announced by the relay.
    pub fn from_sizes(rows: usize, columns: usize) -> Result<Self, GameError> {
        let signed = |v: usize| i64::try_from(v).unwrap_or(i64::MAX);
        Self::new(signed(rows), signed(columns))
    }

    /// Total number of cells.
    #[inline]
    pub fn cell_count(&self) -> usize {
        self.rows * self.columns
    }
}

impl Default for BoardDimensions {
    fn default() -> Self {
        Self {
            rows: DEFAULT_SIZE,
            columns: DEFAULT_SIZE,
        }
    }
}

fn clamp_dimension(value: i64) -> Option<usize> {
    if value <= 0 {
        Some(DEFAULT_SIZE)
    } else {
        usize::try_from(value).ok().filter(|&v| v <= MAX_SIZE)
    }
}

// =============================================================================
// BOARD
// =============================================================================

/// The playing grid.
///
/// On the wire a board is a list of rows (`Cell[][]`), top row first.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Vec<Cell>>", into = "Vec<Vec<Cell>>")]
pub struct Board {
    dims: BoardDimensions,
    /// Row-major cells.
    cells: Vec<Cell>,
}

impl Board {
    /// Create an all-empty board.
    pub fn new(dims: BoardDimensions) -> Self {
        Self {
            dims,
            cells: vec![Cell::Empty; dims.cell_count()],
        }
    }

    /// Rebuild a board from a list of rows.
    ///
    /// Rejects empty or ragged grids and pieces floating above an empty cell,
    /// since no sequence of drops can produce them.
    pub fn from_rows(rows: Vec<Vec<Cell>>) -> Result<Self, GameError> {
        let row_count = rows.len();
        let columns = rows.first().map(Vec::len).unwrap_or(0);
        if row_count == 0 || columns == 0 {
            return Err(GameError::InvalidBoard("board has no cells".to_string()));
        }
        if row_count > MAX_SIZE || columns > MAX_SIZE {
            return Err(GameError::InvalidBoard(format!(
                "{}x{} exceeds the {}x{} limit",
                row_count, columns, MAX_SIZE, MAX_SIZE
            )));
        }
        if let Some(bad) = rows.iter().position(|r| r.len() != columns) {
            return Err(GameError::InvalidBoard(format!(
                "row {} has {} cells, expected {}",
                bad,
                rows[bad].len(),
                columns
            )));
        }

        let board = Self {
            dims: BoardDimensions { rows: row_count, columns },
            cells: rows.into_iter().flatten().collect(),
        };

        for col in 0..columns {
            for row in 0..row_count - 1 {
                if !board.at(row, col).is_empty() && board.at(row + 1, col).is_empty() {
                    return Err(GameError::InvalidBoard(format!(
                        "floating piece at row {}, column {}",
                        row, col
                    )));
                }
            }
        }

        Ok(board)
    }

    /// Board shape.
    #[inline]
    pub fn dimensions(&self) -> BoardDimensions {
        self.dims
    }

    /// Number of rows.
    #[inline]
    pub fn rows(&self) -> usize {
        self.dims.rows
    }

    /// Number of columns.
    #[inline]
    pub fn columns(&self) -> usize {
        self.dims.columns
    }

    /// Cell at `(row, col)`, or `None` when out of bounds.
    pub fn cell(&self, row: usize, col: usize) -> Option<Cell> {
        if row < self.dims.rows && col < self.dims.columns {
            Some(self.at(row, col))
        } else {
            None
        }
    }

    #[inline]
    fn at(&self, row: usize, col: usize) -> Cell {
        self.cells[row * self.dims.columns + col]
    }

    /// Check if a column has no empty cell. Out-of-range columns count as full.
    pub fn is_column_full(&self, col: usize) -> bool {
        if col >= self.dims.columns {
            return true;
        }
        !self.at(0, col).is_empty()
    }

    /// Check if every cell is occupied.
    pub fn is_full(&self) -> bool {
        (0..self.dims.columns).all(|col| self.is_column_full(col))
    }

    /// Columns that still accept a piece.
    pub fn legal_columns(&self) -> Vec<usize> {
        (0..self.dims.columns)
            .filter(|&col| !self.is_column_full(col))
            .collect()
    }

    /// Number of occupied cells.
    pub fn filled_count(&self) -> usize {
        self.cells.iter().filter(|c| !c.is_empty()).count()
    }

    /// Row the next piece in `col` would land in, without placing it.
    pub fn landing_row(&self, col: usize) -> Option<usize> {
        if col >= self.dims.columns {
            return None;
        }
        (0..self.dims.rows).rev().find(|&row| self.at(row, col).is_empty())
    }

    /// Drop a piece for `player` into `col`; returns the row it landed in.
    ///
    /// Fails without touching the board when the column is out of range or
    /// full.
    pub fn drop_piece(&mut self, col: usize, player: Player) -> Result<usize, GameError> {
        if col >= self.dims.columns {
            return Err(GameError::InvalidColumn {
                column: col as i64,
                columns: self.dims.columns,
            });
        }

        let row = self
            .landing_row(col)
            .ok_or(GameError::ColumnFull { column: col })?;

        let columns = self.dims.columns;
        self.cells[row * columns + col] = player.into();
        Ok(row)
    }

    /// Check whether the piece just placed at `(row, col)` completes a line.
    ///
    /// For each axis, walks offsets -3..=3 around the placed cell, resetting
    /// the run on any cell that is out of bounds or not `player`'s. Only
    /// valid when centered on the newest piece: a line elsewhere on the board
    /// is not found.
    pub fn check_win(&self, row: usize, col: usize, player: Player) -> bool {
        let reach = (CONNECT_LENGTH - 1) as i64;
        let target = Cell::from(player);

        WIN_DIRECTIONS.iter().any(|&(d_row, d_col)| {
            let mut count = 0;
            for i in -reach..=reach {
                let r = row as i64 + i * d_row;
                let c = col as i64 + i * d_col;
                if self.owned_by(r, c, target) {
                    count += 1;
                    if count == CONNECT_LENGTH {
                        return true;
                    }
                } else {
                    count = 0;
                }
            }
            false
        })
    }

    fn owned_by(&self, row: i64, col: i64, target: Cell) -> bool {
        match (usize::try_from(row), usize::try_from(col)) {
            (Ok(row), Ok(col)) => self.cell(row, col) == Some(target),
            _ => false,
        }
    }

    /// Copy out as a list of rows.
    pub fn to_rows(&self) -> Vec<Vec<Cell>> {
        self.cells
            .chunks(self.dims.columns)
            .map(<[Cell]>::to_vec)
            .collect()
    }

    /// Raw cell bytes, row-major, for hashing.
    pub(crate) fn cell_bytes(&self) -> Vec<u8> {
        self.cells.iter().map(|&c| u8::from(c)).collect()
    }
}

impl Default for Board {
    fn default() -> Self {
        Self::new(BoardDimensions::default())
    }
}

impl TryFrom<Vec<Vec<Cell>>> for Board {
    type Error = GameError;

    fn try_from(rows: Vec<Vec<Cell>>) -> Result<Self, Self::Error> {
        Self::from_rows(rows)
    }
}

impl From<Board> for Vec<Vec<Cell>> {
    fn from(board: Board) -> Self {
        board.to_rows()
    }
}

impl fmt::Display for Board {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for row in self.cells.chunks(self.dims.columns) {
            let line: String = row
                .iter()
                .map(|c| match c {
                    Cell::Empty => '.',
                    Cell::Player1 => 'X',
                    Cell::Player2 => 'O',
                })
                .collect();
            writeln!(f, "{}", line)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    use Player::{Player1 as P1, Player2 as P2};

    #[test]
    fn test_new_board_is_empty() {
        let board = Board::default();
        assert_eq!(board.rows(), 5);
        assert_eq!(board.columns(), 5);
        for row in 0..5 {
            for col in 0..5 {
                assert_eq!(board.cell(row, col), Some(Cell::Empty));
            }
        }
    }

    #[test]
    fn test_dimensions_clamp_non_positive() {
        assert_eq!(BoardDimensions::new(0, -3), Ok(BoardDimensions { rows: 5, columns: 5 }));
        assert_eq!(BoardDimensions::new(6, 7), Ok(BoardDimensions { rows: 6, columns: 7 }));
        assert_eq!(
            BoardDimensions::from_optional(None, Some(8)),
            Ok(BoardDimensions { rows: 5, columns: 8 })
        );
    }

    #[test]
    fn test_dimensions_upper_bound() {
        let max = MAX_SIZE as i64;
        assert_eq!(
            BoardDimensions::new(max, max),
            Ok(BoardDimensions { rows: MAX_SIZE, columns: MAX_SIZE })
        );
        assert_eq!(
            BoardDimensions::new(max + 1, 5),
            Err(GameError::InvalidDimensions { rows: max + 1, columns: 5 })
        );
        assert_eq!(
            BoardDimensions::new(1 << 33, 1 << 33),
            Err(GameError::InvalidDimensions { rows: 1 << 33, columns: 1 << 33 })
        );
        assert!(BoardDimensions::from_sizes(usize::MAX, 5).is_err());
        assert_eq!(
            BoardDimensions::from_sizes(6, 7),
            Ok(BoardDimensions { rows: 6, columns: 7 })
        );
    }

    #[test]
    fn test_from_rows_rejects_oversized() {
        let rows = vec![vec![Cell::Empty; MAX_SIZE + 1]; 2];
        assert!(matches!(Board::from_rows(rows), Err(GameError::InvalidBoard(_))));
    }

    #[test]
    fn test_drop_piece_stacks() {
        let mut board = Board::default();

        assert_eq!(board.drop_piece(2, P1).unwrap(), 4);
        assert_eq!(board.cell(4, 2), Some(Cell::Player1));

        assert_eq!(board.drop_piece(2, P2).unwrap(), 3);
        assert_eq!(board.cell(3, 2), Some(Cell::Player2));
        assert_eq!(board.filled_count(), 2);
    }

    #[test]
    fn test_invalid_column() {
        let mut board = Board::default();
        let before = board.clone();
        assert_eq!(
            board.drop_piece(5, P1),
            Err(GameError::InvalidColumn { column: 5, columns: 5 })
        );
        assert_eq!(board, before);
    }

    #[test]
    fn test_column_full() {
        let mut board = Board::default();
        for _ in 0..5 {
            board.drop_piece(0, P1).unwrap();
        }
        let before = board.clone();

        assert!(board.is_column_full(0));
        assert_eq!(board.drop_piece(0, P2), Err(GameError::ColumnFull { column: 0 }));
        assert_eq!(board, before);
        assert_eq!(board.legal_columns(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_full_board() {
        let mut board = Board::new(BoardDimensions::new(2, 2).unwrap());
        for col in 0..2 {
            board.drop_piece(col, P1).unwrap();
            board.drop_piece(col, P2).unwrap();
        }
        assert!(board.is_full());
        assert!(board.legal_columns().is_empty());
    }

    #[test]
    fn test_horizontal_win() {
        let mut board = Board::default();
        for col in 0..4 {
            board.drop_piece(col, P1).unwrap();
        }
        assert!(board.check_win(4, 3, P1));
        assert!(board.check_win(4, 0, P1));
    }

    #[test]
    fn test_vertical_win() {
        let mut board = Board::default();
        for _ in 0..4 {
            board.drop_piece(2, P2).unwrap();
        }
        assert!(board.check_win(1, 2, P2));
        assert!(!board.check_win(1, 2, P1));
    }

    #[test]
    fn test_diagonal_down_right_win() {
        // (1, 1) axis: cells (1,0) (2,1) (3,2) (4,3)
        let mut board = Board::default();
        for (col, fillers) in [(0, 3), (1, 2), (2, 1), (3, 0)] {
            for _ in 0..fillers {
                board.drop_piece(col, P2).unwrap();
            }
            board.drop_piece(col, P1).unwrap();
        }
        assert!(board.check_win(1, 0, P1));
        assert!(board.check_win(4, 3, P1));
    }

    #[test]
    fn test_diagonal_down_left_win() {
        // (1, -1) axis: cells (1,4) (2,3) (3,2) (4,1)
        let mut board = Board::default();
        for (col, fillers) in [(4, 3), (3, 2), (2, 1), (1, 0)] {
            for _ in 0..fillers {
                board.drop_piece(col, P2).unwrap();
            }
            board.drop_piece(col, P1).unwrap();
        }
        assert!(board.check_win(4, 1, P1));
        assert!(board.check_win(2, 3, P1));
    }

    #[test]
    fn test_win_in_middle_of_five() {
        // X X . X X on the bottom row, then fill the gap
        let mut board = Board::default();
        for col in [0, 1, 3, 4] {
            board.drop_piece(col, P1).unwrap();
        }
        assert!(!board.check_win(4, 4, P1));

        let row = board.drop_piece(2, P1).unwrap();
        assert!(board.check_win(row, 2, P1));
    }

    #[test]
    fn test_run_resets_inside_window() {
        // Row: X X O X X X . on a 7-wide board. The run before the O is
        // discarded; the three after it plus the new piece win.
        let mut board = Board::new(BoardDimensions::new(5, 7).unwrap());
        for col in [0, 1, 3, 4, 5] {
            board.drop_piece(col, P1).unwrap();
        }
        board.drop_piece(2, P2).unwrap();
        assert!(!board.check_win(4, 3, P1));

        let row = board.drop_piece(6, P1).unwrap();
        assert!(board.check_win(row, 6, P1));
        assert!(board.check_win(row, 3, P1));
    }

    #[test]
    fn test_reset_run_not_counted_across_opponent() {
        // X X O X X with the last piece in column 3: the window around it
        // holds four X, but never four in a row.
        let mut board = Board::new(BoardDimensions::new(5, 7).unwrap());
        for col in [0, 1, 4] {
            board.drop_piece(col, P1).unwrap();
        }
        board.drop_piece(2, P2).unwrap();
        let row = board.drop_piece(3, P1).unwrap();
        assert!(!board.check_win(row, 3, P1));
        assert!(!board.check_win(row, 4, P1));
    }

    #[test]
    fn test_no_win_with_three() {
        let mut board = Board::default();
        for col in 0..3 {
            board.drop_piece(col, P1).unwrap();
        }
        assert!(!board.check_win(4, 1, P1));
    }

    #[test]
    fn test_broken_line_is_not_a_win() {
        let mut board = Board::default();
        board.drop_piece(0, P1).unwrap();
        board.drop_piece(1, P1).unwrap();
        board.drop_piece(2, P2).unwrap();
        board.drop_piece(3, P1).unwrap();
        board.drop_piece(4, P1).unwrap();
        assert!(!board.check_win(4, 4, P1));
        assert!(!board.check_win(4, 1, P1));
    }

    #[test]
    fn test_from_rows_roundtrip_and_validation() {
        let mut board = Board::default();
        board.drop_piece(1, P1).unwrap();
        board.drop_piece(1, P2).unwrap();
        assert_eq!(Board::from_rows(board.to_rows()).unwrap(), board);

        assert!(Board::from_rows(vec![]).is_err());
        assert!(Board::from_rows(vec![vec![Cell::Empty; 3], vec![Cell::Empty; 2]]).is_err());

        let floating = vec![
            vec![Cell::Player1, Cell::Empty],
            vec![Cell::Empty, Cell::Empty],
        ];
        assert!(matches!(
            Board::from_rows(floating),
            Err(GameError::InvalidBoard(_))
        ));
    }

    #[test]
    fn test_board_json_is_nested_ints() {
        let mut board = Board::new(BoardDimensions::new(2, 3).unwrap());
        board.drop_piece(0, P1).unwrap();
        board.drop_piece(2, P2).unwrap();

        let json = serde_json::to_string(&board).unwrap();
        assert_eq!(json, "[[0,0,0],[1,0,2]]");

        let parsed: Board = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, board);
        assert!(serde_json::from_str::<Board>("[[0,3]]").is_err());
    }

    #[test]
    fn test_display() {
        let mut board = Board::new(BoardDimensions::new(2, 2).unwrap());
        board.drop_piece(1, P1).unwrap();
        board.drop_piece(1, P2).unwrap();
        assert_eq!(board.to_string(), ".O\n.X\n");
    }

    proptest! {
        #[test]
        fn prop_drop_fills_lowest_empty_only(
            prefill in proptest::collection::vec(0usize..5, 0..20),
            col in 0usize..5,
        ) {
            let mut board = Board::default();
            for (i, c) in prefill.iter().enumerate() {
                let player = if i % 2 == 0 { P1 } else { P2 };
                let _ = board.drop_piece(*c, player);
            }
            prop_assume!(!board.is_column_full(col));

            let before = board.clone();
            let expected_row = before.landing_row(col).unwrap();
            let row = board.drop_piece(col, P1).unwrap();
            prop_assert_eq!(row, expected_row);

            for r in 0..5 {
                for c in 0..5 {
                    if (r, c) == (row, col) {
                        prop_assert_eq!(board.cell(r, c), Some(Cell::Player1));
                    } else {
                        prop_assert_eq!(board.cell(r, c), before.cell(r, c));
                    }
                }
            }
        }

        #[test]
        fn prop_three_in_a_row_never_wins(start in 0usize..3, row_pick in 0usize..5) {
            // Lay three P1 pieces horizontally on an otherwise P2-free row.
            let mut board = Board::default();
            for _ in 0..(4 - row_pick) {
                for col in 0..5 {
                    board.drop_piece(col, P2).unwrap();
                }
            }
            let row = row_pick;
            for col in start..start + 3 {
                board.drop_piece(col, P1).unwrap();
            }
            for col in start..start + 3 {
                prop_assert!(!board.check_win(row, col, P1));
            }
        }
    }
}
