//! Game Session Management
//!
//! A `GameSession` is one participant's view of a room: it owns the local
//! `GameState`, gates local drops on turn ownership, publishes results to the
//! other participant, and checks the other participant's events by replaying
//! them against its own engine.
//!
//! `RoomHandle` runs a session on its own task so that local requests and
//! inbound events for one room are applied strictly one at a time.

use std::sync::Arc;
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, info, warn, instrument};

use crate::core::hash::short_hex;
use crate::game::board::{Board, BoardDimensions};
use crate::game::state::{snapshot_hash, DropOutcome, GameError, GamePhase, GameState, Placement, Player};
use crate::network::protocol::{
    GameDrawnPayload, GameWonPayload, JoinInfo, MovePayload, PeerEvent, RoomId, Topic,
};
use crate::network::transport::{Transport, TransportError};

/// Configuration for a game session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Room the session plays in.
    pub room_id: RoomId,
    /// Board shape.
    pub dimensions: BoardDimensions,
    /// Role assigned to the local participant.
    pub local_role: Player,
    /// Player who moves first in every game, including after a reset.
    pub starting_player: Player,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            room_id: String::new(),
            dimensions: BoardDimensions::default(),
            local_role: Player::Player1,
            starting_player: Player::Player1,
        }
    }
}

impl SessionConfig {
    /// Config for `room_id` playing as `local_role` on the default board.
    pub fn new(room_id: impl Into<RoomId>, local_role: Player) -> Self {
        Self {
            room_id: room_id.into(),
            local_role,
            ..Default::default()
        }
    }

    /// Set board dimensions; non-positive values fall back to the default.
    pub fn with_dimensions(mut self, rows: i64, columns: i64) -> Result<Self, GameError> {
        self.dimensions = BoardDimensions::new(rows, columns)?;
        Ok(self)
    }

    /// Set the starting player.
    pub fn with_starting_player(mut self, player: Player) -> Self {
        self.starting_player = player;
        self
    }

    /// Config matching what the relay assigned on join.
    pub fn from_join(info: &JoinInfo) -> Result<Self, GameError> {
        Ok(Self {
            room_id: info.room_id.clone(),
            dimensions: BoardDimensions::from_sizes(info.rows, info.columns)?,
            local_role: info.role,
            starting_player: info.starting_player,
        })
    }
}

/// Result of a local drop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Piece placed, turn passed to the opponent.
    Moved { row: usize, column: usize },
    /// Piece placed and won; the board has been reset.
    Won(Player),
    /// Piece placed and filled the board; the board has been reset.
    Drawn,
}

/// Result of applying an inbound peer event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteOutcome {
    /// Our own event echoed back; nothing changed.
    Ignored,
    /// Opponent's piece placed.
    Moved { row: usize, column: usize, player: Player },
    /// Opponent won; the board has been reset.
    Won(Player),
    /// Opponent filled the board; the board has been reset.
    Drawn,
}

/// Notifications for the presentation layer about things the opponent did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionNotice {
    /// Opponent dropped a piece.
    RemoteMoved { row: usize, column: usize, player: Player },
    /// A game in this room was won.
    GameWon { winner: Player },
    /// A game in this room was drawn.
    GameDrawn,
    /// An inbound event did not match the local board and was rejected.
    DesyncDetected { reason: String },
}

/// Read-only snapshot for rendering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoomView {
    /// Room identifier.
    pub room_id: RoomId,
    /// Current board.
    pub board: Board,
    /// Player on move.
    pub current_player: Player,
    /// Local participant's role.
    pub local_role: Player,
    /// Whether local input should be enabled.
    pub is_my_turn: bool,
    /// Terminal flag.
    pub phase: GamePhase,
    /// Drops in the current game.
    pub move_count: u32,
    /// Hex hash of the board and turn.
    pub board_hash: String,
}

/// Session errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    /// Local participant tried to move out of turn.
    #[error("Not your turn")]
    NotYourTurn,

    /// Engine rejected the drop.
    #[error(transparent)]
    Game(#[from] GameError),

    /// Opponent's event does not match what the local engine produces.
    #[error("Board out of sync: {reason} (local {expected}, remote {received})")]
    DesyncDetected {
        reason: String,
        expected: String,
        received: String,
    },

    /// Event addressed to another room.
    #[error("Event for room {got} delivered to room {expected}")]
    WrongRoom { expected: RoomId, got: RoomId },

    /// Room task has stopped.
    #[error("Room closed")]
    RoomClosed,
}

// =============================================================================
// GAME SESSION
// =============================================================================

/// One participant's session in a room.
pub struct GameSession {
    config: SessionConfig,
    state: GameState,
    transport: Arc<dyn Transport>,
}

impl GameSession {
    /// Create a session with a fresh game.
    pub fn new(config: SessionConfig, transport: Arc<dyn Transport>) -> Self {
        let state = GameState::new(config.dimensions, config.starting_player);
        Self {
            config,
            state,
            transport,
        }
    }

    /// Room identifier.
    pub fn room_id(&self) -> &str {
        &self.config.room_id
    }

    /// Local participant's role.
    pub fn local_role(&self) -> Player {
        self.config.local_role
    }

    /// Session configuration.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Current game.
    pub fn state(&self) -> &GameState {
        &self.state
    }

    /// Transport the session publishes on.
    pub fn transport(&self) -> Arc<dyn Transport> {
        self.transport.clone()
    }

    /// Whether the local participant is on move.
    ///
    /// Always derived from the game, never stored.
    pub fn is_my_turn(&self) -> bool {
        self.state.current_player() == self.config.local_role
    }

    /// Snapshot for rendering.
    pub fn view(&self) -> RoomView {
        RoomView {
            room_id: self.config.room_id.clone(),
            board: self.state.board().clone(),
            current_player: self.state.current_player(),
            local_role: self.config.local_role,
            is_my_turn: self.is_my_turn(),
            phase: self.state.phase(),
            move_count: self.state.move_count(),
            board_hash: hex::encode(self.state.hash()),
        }
    }

    /// Drop a local piece into `column`.
    ///
    /// `NotYourTurn` is checked before the engine is touched. Engine errors
    /// come back unchanged inside `SessionError::Game`. A failed publish is
    /// logged and does not undo the drop.
    #[instrument(skip(self), fields(room = %self.config.room_id, role = %self.config.local_role))]
    pub fn request_drop(&mut self, column: usize) -> Result<Outcome, SessionError> {
        if !self.is_my_turn() {
            return Err(SessionError::NotYourTurn);
        }

        let placement = self.state.drop_piece(column, self.config.local_role)?;

        #[cfg(feature = "debug-tracing")]
        tracing::trace!("Board after drop:\n{}", self.state.board());

        match placement.outcome {
            DropOutcome::Continue => {
                let hash = self.state.hash();
                debug!(
                    "Dropped at ({}, {}), state {}",
                    placement.row,
                    placement.column,
                    short_hex(&hash)
                );
                self.publish(PeerEvent::Move(MovePayload {
                    room_id: self.config.room_id.clone(),
                    board: self.state.board().clone(),
                    current_player: self.state.current_player(),
                    column: column as i64,
                    row: placement.row,
                    player: placement.player,
                    board_hash: Some(hex::encode(hash)),
                }));
                Ok(Outcome::Moved {
                    row: placement.row,
                    column,
                })
            }
            DropOutcome::Won(winner) => {
                info!("{} wins room {}", winner, self.config.room_id);
                self.publish(PeerEvent::GameWon(GameWonPayload {
                    room_id: self.config.room_id.clone(),
                    winner,
                    column: Some(column as i64),
                }));
                self.state.reset();
                Ok(Outcome::Won(winner))
            }
            DropOutcome::Drawn => {
                info!("Room {} drawn", self.config.room_id);
                self.publish(PeerEvent::GameDrawn(GameDrawnPayload {
                    room_id: self.config.room_id.clone(),
                    player: placement.player,
                    column: Some(column as i64),
                }));
                self.state.reset();
                Ok(Outcome::Drawn)
            }
        }
    }

    /// Apply any inbound peer event.
    pub fn handle_event(&mut self, event: &PeerEvent) -> Result<RemoteOutcome, SessionError> {
        match event {
            PeerEvent::Move(payload) => self.on_remote_move(payload),
            PeerEvent::GameWon(payload) => self.on_remote_game_won(payload),
            PeerEvent::GameDrawn(payload) => self.on_remote_game_drawn(payload),
        }
    }

    /// Apply the opponent's move.
    ///
    /// The drop is replayed on a copy of the local game; only if the result
    /// matches the broadcast board, turn and hash is the copy committed.
    /// Otherwise local state is untouched and `DesyncDetected` is returned.
    pub fn on_remote_move(&mut self, payload: &MovePayload) -> Result<RemoteOutcome, SessionError> {
        self.check_room(&payload.room_id)?;
        if payload.player == self.config.local_role {
            debug!("Ignoring echo of own move in column {}", payload.column);
            return Ok(RemoteOutcome::Ignored);
        }

        let received = payload
            .board_hash
            .clone()
            .unwrap_or_else(|| hex::encode(snapshot_hash(&payload.board, payload.current_player, false)));

        let mut next = self.state.clone();
        let placement = self
            .replay(&mut next, payload.column, payload.player)
            .map_err(|reason| self.desync(reason, &received))?;

        if placement.outcome != DropOutcome::Continue {
            return Err(self.desync(
                format!("move in column {} ends the game locally", payload.column),
                &received,
            ));
        }
        if placement.row != payload.row {
            return Err(self.desync(
                format!("piece landed in row {} locally, remote says {}", placement.row, payload.row),
                &received,
            ));
        }
        if next.board() != &payload.board || next.current_player() != payload.current_player {
            return Err(self.desync("board snapshot differs".to_string(), &received));
        }
        let local_hash = hex::encode(next.hash());
        if payload.board_hash.as_deref().is_some_and(|h| h != local_hash) {
            return Err(self.desync("board hash differs".to_string(), &received));
        }

        self.state = next;
        debug!("Applied remote move at ({}, {})", placement.row, placement.column);
        Ok(RemoteOutcome::Moved {
            row: placement.row,
            column: placement.column,
            player: placement.player,
        })
    }

    /// Apply the opponent's win and start a new game.
    ///
    /// When the winning column is included it must actually win on the local
    /// board; without it the win is taken as reported.
    pub fn on_remote_game_won(&mut self, payload: &GameWonPayload) -> Result<RemoteOutcome, SessionError> {
        self.check_room(&payload.room_id)?;
        if payload.winner == self.config.local_role {
            debug!("Ignoring echo of own win");
            return Ok(RemoteOutcome::Ignored);
        }

        if let Some(column) = payload.column {
            let mut next = self.state.clone();
            let received = format!("won by {}", payload.winner);
            let placement = self
                .replay(&mut next, column, payload.winner)
                .map_err(|reason| self.desync(reason, &received))?;
            if placement.outcome != DropOutcome::Won(payload.winner) {
                return Err(self.desync(
                    format!("column {} does not win locally", column),
                    &received,
                ));
            }
        }

        info!("{} won room {}", payload.winner, self.config.room_id);
        self.state.reset();
        Ok(RemoteOutcome::Won(payload.winner))
    }

    /// Apply the opponent's board-filling drop and start a new game.
    pub fn on_remote_game_drawn(&mut self, payload: &GameDrawnPayload) -> Result<RemoteOutcome, SessionError> {
        self.check_room(&payload.room_id)?;
        if payload.player == self.config.local_role {
            debug!("Ignoring echo of own draw");
            return Ok(RemoteOutcome::Ignored);
        }

        if let Some(column) = payload.column {
            let mut next = self.state.clone();
            let received = "drawn".to_string();
            let placement = self
                .replay(&mut next, column, payload.player)
                .map_err(|reason| self.desync(reason, &received))?;
            if placement.outcome != DropOutcome::Drawn {
                return Err(self.desync(
                    format!("column {} does not fill the board locally", column),
                    &received,
                ));
            }
        }

        info!("Room {} drawn", self.config.room_id);
        self.state.reset();
        Ok(RemoteOutcome::Drawn)
    }

    /// Run a remote drop against `state`, turning engine errors into a reason.
    fn replay(
        &self,
        state: &mut GameState,
        column: i64,
        player: Player,
    ) -> Result<Placement, String> {
        let column = usize::try_from(column).map_err(|_| {
            GameError::InvalidColumn {
                column,
                columns: state.board().columns(),
            }
            .to_string()
        })?;
        state
            .drop_piece(column, player)
            .map_err(|e| format!("remote drop rejected locally: {}", e))
    }

    fn desync(&self, reason: String, received: &str) -> SessionError {
        let local = self.state.hash();
        warn!(
            "Desync in room {}: {} (local {}, remote {})",
            self.config.room_id,
            reason,
            short_hex(&local),
            received
        );
        let expected = hex::encode(local);
        SessionError::DesyncDetected {
            reason,
            expected,
            received: received.to_string(),
        }
    }

    fn check_room(&self, room_id: &str) -> Result<(), SessionError> {
        if room_id != self.config.room_id {
            return Err(SessionError::WrongRoom {
                expected: self.config.room_id.clone(),
                got: room_id.to_string(),
            });
        }
        Ok(())
    }

    fn publish(&self, event: PeerEvent) {
        if let Err(e) = self.transport.publish(event) {
            warn!("Failed to publish to room {}: {}", self.config.room_id, e);
        }
    }
}

// =============================================================================
// ROOM ACTOR
// =============================================================================

/// Requests handled by a room task.
enum RoomCommand {
    RequestDrop {
        column: usize,
        reply: oneshot::Sender<Result<Outcome, SessionError>>,
    },
    View {
        reply: oneshot::Sender<RoomView>,
    },
    Close,
}

/// Handle to a session running on its own task.
///
/// Cloning the handle shares the same room.
#[derive(Clone)]
pub struct RoomHandle {
    room_id: RoomId,
    commands: mpsc::Sender<RoomCommand>,
    notices: broadcast::Sender<SessionNotice>,
}

impl RoomHandle {
    /// Subscribe the session to its room's topics and start its task.
    pub fn spawn(session: GameSession) -> Result<Self, TransportError> {
        let room_id = session.room_id().to_string();
        let transport = session.transport();

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        for topic in Topic::all_for_room(&room_id) {
            transport.subscribe(topic, event_tx.clone())?;
        }

        let (command_tx, command_rx) = mpsc::channel(64);
        let (notice_tx, _) = broadcast::channel(256);

        tokio::spawn(run_room(session, command_rx, event_rx, notice_tx.clone()));

        Ok(Self {
            room_id,
            commands: command_tx,
            notices: notice_tx,
        })
    }

    /// Room identifier.
    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    /// Drop a local piece.
    pub async fn request_drop(&self, column: usize) -> Result<Outcome, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(RoomCommand::RequestDrop { column, reply })
            .await
            .map_err(|_| SessionError::RoomClosed)?;
        rx.await.map_err(|_| SessionError::RoomClosed)?
    }

    /// Current snapshot.
    pub async fn view(&self) -> Result<RoomView, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(RoomCommand::View { reply })
            .await
            .map_err(|_| SessionError::RoomClosed)?;
        rx.await.map_err(|_| SessionError::RoomClosed)
    }

    /// Subscribe to notices about the opponent's actions.
    pub fn subscribe_notices(&self) -> broadcast::Receiver<SessionNotice> {
        self.notices.subscribe()
    }

    /// Stop the room task.
    pub async fn close(&self) {
        let _ = self.commands.send(RoomCommand::Close).await;
    }

    /// Check if the room task has stopped.
    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }
}

/// Room task: the only place the session is touched.
///
/// Inbound events always go first, so a command never overtakes an event
/// that was queued before it.
async fn run_room(
    mut session: GameSession,
    mut commands: mpsc::Receiver<RoomCommand>,
    mut events: mpsc::UnboundedReceiver<PeerEvent>,
    notices: broadcast::Sender<SessionNotice>,
) {
    debug!("Room {} task started as {}", session.room_id(), session.local_role());

    loop {
        tokio::select! {
            biased;

            Some(event) = events.recv() => apply_event(&mut session, &event, &notices),
            command = commands.recv() => {
                // An event may have landed between the two polls
                while let Ok(event) = events.try_recv() {
                    apply_event(&mut session, &event, &notices);
                }
                match command {
                    Some(RoomCommand::RequestDrop { column, reply }) => {
                        let _ = reply.send(session.request_drop(column));
                    }
                    Some(RoomCommand::View { reply }) => {
                        let _ = reply.send(session.view());
                    }
                    Some(RoomCommand::Close) | None => break,
                }
            }
        }
    }

    debug!("Room {} task stopped", session.room_id());
}

fn apply_event(session: &mut GameSession, event: &PeerEvent, notices: &broadcast::Sender<SessionNotice>) {
    let notice = match session.handle_event(event) {
        Ok(RemoteOutcome::Ignored) => None,
        Ok(RemoteOutcome::Moved { row, column, player }) => {
            Some(SessionNotice::RemoteMoved { row, column, player })
        }
        Ok(RemoteOutcome::Won(winner)) => Some(SessionNotice::GameWon { winner }),
        Ok(RemoteOutcome::Drawn) => Some(SessionNotice::GameDrawn),
        Err(SessionError::DesyncDetected { reason, .. }) => {
            Some(SessionNotice::DesyncDetected { reason })
        }
        Err(e) => {
            warn!("Dropped event {} in room {}: {}", event.topic(), session.room_id(), e);
            None
        }
    };
    if let Some(notice) = notice {
        let _ = notices.send(notice);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use crate::game::board::Cell;
    use crate::network::transport::LocalRelay;

    use Player::{Player1 as P1, Player2 as P2};

    /// Session plus the inbox its topics are routed to.
    struct Peer {
        session: GameSession,
        inbox: mpsc::UnboundedReceiver<PeerEvent>,
    }

    impl Peer {
        fn new(relay: &Arc<LocalRelay>, role: Player) -> Self {
            let session = GameSession::new(SessionConfig::new("room", role), relay.clone());
            let (tx, inbox) = mpsc::unbounded_channel();
            for topic in Topic::all_for_room("room") {
                relay.subscribe(topic, tx.clone()).unwrap();
            }
            Self { session, inbox }
        }

        /// Apply everything queued, returning the outcomes.
        fn drain(&mut self) -> Vec<Result<RemoteOutcome, SessionError>> {
            let mut out = Vec::new();
            while let Ok(event) = self.inbox.try_recv() {
                out.push(self.session.handle_event(&event));
            }
            out
        }
    }

    fn pair() -> (Arc<LocalRelay>, Peer, Peer) {
        let relay = Arc::new(LocalRelay::new());
        let a = Peer::new(&relay, P1);
        let b = Peer::new(&relay, P2);
        (relay, a, b)
    }

    /// Alternate drops between the two peers, syncing after each.
    fn play(a: &mut Peer, b: &mut Peer, columns: &[usize]) -> Vec<Outcome> {
        let mut outcomes = Vec::new();
        for &col in columns {
            let (mover, other) = if a.session.is_my_turn() { (&mut *a, &mut *b) } else { (&mut *b, &mut *a) };
            outcomes.push(mover.session.request_drop(col).unwrap());
            mover.drain();
            for result in other.drain() {
                result.unwrap();
            }
        }
        outcomes
    }

    #[test]
    fn test_config_builders() {
        let config = SessionConfig::new("r", P2)
            .with_dimensions(-1, 7)
            .unwrap()
            .with_starting_player(P2);
        assert_eq!(config.dimensions, BoardDimensions { rows: 5, columns: 7 });
        assert_eq!(config.starting_player, P2);

        let info = JoinInfo {
            room_id: "x".to_string(),
            role: P2,
            rows: 6,
            columns: 7,
            starting_player: P1,
            opponent_present: true,
        };
        let config = SessionConfig::from_join(&info).unwrap();
        assert_eq!(config.local_role, P2);
        assert_eq!(config.dimensions, BoardDimensions { rows: 6, columns: 7 });
    }

    #[test]
    fn test_oversized_board_is_rejected() {
        assert_eq!(
            SessionConfig::new("r", P2).with_dimensions(1 << 33, 1 << 33),
            Err(GameError::InvalidDimensions { rows: 1 << 33, columns: 1 << 33 })
        );

        let info = JoinInfo {
            room_id: "x".to_string(),
            role: P2,
            rows: usize::MAX,
            columns: 7,
            starting_player: P1,
            opponent_present: true,
        };
        assert!(matches!(
            SessionConfig::from_join(&info),
            Err(GameError::InvalidDimensions { .. })
        ));
    }

    #[test]
    fn test_only_player_one_starts() {
        let (_relay, mut a, mut b) = pair();
        assert!(a.session.is_my_turn());
        assert!(!b.session.is_my_turn());
        assert_eq!(b.session.request_drop(0), Err(SessionError::NotYourTurn));
        assert_eq!(b.session.state().board().filled_count(), 0);
        assert!(a.session.request_drop(0).is_ok());
    }

    #[test]
    fn test_move_syncs_peer_and_flips_turn() {
        let (_relay, mut a, mut b) = pair();

        assert_eq!(a.session.request_drop(2), Ok(Outcome::Moved { row: 4, column: 2 }));
        assert!(!a.session.is_my_turn());

        // A's own echo is ignored
        assert_eq!(a.drain(), vec![Ok(RemoteOutcome::Ignored)]);

        assert_eq!(
            b.drain(),
            vec![Ok(RemoteOutcome::Moved { row: 4, column: 2, player: P1 })]
        );
        assert!(b.session.is_my_turn());
        assert_eq!(a.session.state(), b.session.state());
        assert_eq!(b.session.state().board().cell(4, 2), Some(Cell::Player1));
    }

    #[test]
    fn test_exactly_one_peer_on_move() {
        let (_relay, mut a, mut b) = pair();
        for col in [0, 1, 2, 3, 4, 0, 1, 2] {
            assert_ne!(a.session.is_my_turn(), b.session.is_my_turn());
            play(&mut a, &mut b, &[col]);
            assert_eq!(a.session.state(), b.session.state());
        }
    }

    #[test]
    fn test_engine_errors_propagate() {
        let (_relay, mut a, _b) = pair();
        assert_eq!(
            a.session.request_drop(5),
            Err(SessionError::Game(GameError::InvalidColumn { column: 5, columns: 5 }))
        );
        // Still our turn; room usable
        assert!(a.session.is_my_turn());
        assert!(a.session.request_drop(4).is_ok());
    }

    #[test]
    fn test_column_full_propagates() {
        let (_relay, mut a, mut b) = pair();
        play(&mut a, &mut b, &[0, 0, 0, 0, 0]);
        let mover = if a.session.is_my_turn() { &mut a } else { &mut b };
        assert_eq!(
            mover.session.request_drop(0),
            Err(SessionError::Game(GameError::ColumnFull { column: 0 }))
        );
    }

    #[test]
    fn test_tampered_board_is_rejected() {
        let (_relay, _a, mut b) = pair();

        // Claims column 3 but ships a board with the piece in column 4
        let mut fake_board = Board::default();
        fake_board.drop_piece(4, P1).unwrap();

        let before = b.session.state().clone();
        let result = b.session.on_remote_move(&MovePayload {
            room_id: "room".to_string(),
            board: fake_board,
            current_player: P2,
            column: 3,
            row: 4,
            player: P1,
            board_hash: None,
        });
        assert!(matches!(result, Err(SessionError::DesyncDetected { .. })));
        assert_eq!(b.session.state(), &before);
    }

    #[test]
    fn test_out_of_range_remote_move_is_desync() {
        let (_relay, _a, mut b) = pair();
        let mut board = Board::default();
        board.drop_piece(0, P1).unwrap();
        let result = b.session.on_remote_move(&MovePayload {
            room_id: "room".to_string(),
            board,
            current_player: P2,
            column: -1,
            row: 4,
            player: P1,
            board_hash: None,
        });
        match result {
            Err(SessionError::DesyncDetected { reason, .. }) => assert!(reason.contains("-1")),
            other => panic!("Expected desync, got {:?}", other),
        }
        assert_eq!(b.session.state().move_count(), 0);
    }

    #[test]
    fn test_remote_move_out_of_turn_is_desync() {
        let (_relay, mut a, mut b) = pair();
        play(&mut a, &mut b, &[1]);

        // Player 2 is on move; a second player 1 move cannot be replayed
        let mut board = b.session.state().board().clone();
        board.drop_piece(2, P1).unwrap();
        let result = b.session.on_remote_move(&MovePayload {
            room_id: "room".to_string(),
            board,
            current_player: P2,
            column: 2,
            row: 4,
            player: P1,
            board_hash: None,
        });
        assert!(matches!(result, Err(SessionError::DesyncDetected { .. })));
        assert_eq!(b.session.state().move_count(), 1);
    }

    #[test]
    fn test_wrong_hash_is_rejected() {
        let (_relay, mut a, mut b) = pair();
        a.session.request_drop(1).unwrap();
        let event = b.inbox.try_recv().unwrap();
        let PeerEvent::Move(mut payload) = event else { panic!("expected move") };
        payload.board_hash = Some("00".repeat(32));

        assert!(matches!(
            b.session.on_remote_move(&payload),
            Err(SessionError::DesyncDetected { .. })
        ));
        assert_eq!(b.session.state().move_count(), 0);
    }

    #[test]
    fn test_wrong_room_rejected() {
        let (_relay, _a, mut b) = pair();
        let result = b.session.on_remote_game_won(&GameWonPayload {
            room_id: "elsewhere".to_string(),
            winner: P1,
            column: None,
        });
        assert_eq!(
            result,
            Err(SessionError::WrongRoom {
                expected: "room".to_string(),
                got: "elsewhere".to_string()
            })
        );
    }

    #[test]
    fn test_win_resets_both_peers() {
        let (_relay, mut a, mut b) = pair();

        let outcomes = play(&mut a, &mut b, &[2, 0, 2, 0, 2, 0]);
        assert!(outcomes.iter().all(|o| matches!(o, Outcome::Moved { .. })));

        assert_eq!(a.session.request_drop(2), Ok(Outcome::Won(P1)));
        assert_eq!(a.session.state().board().filled_count(), 0);
        assert_eq!(b.drain(), vec![Ok(RemoteOutcome::Won(P1))]);

        for peer in [&a, &b] {
            assert_eq!(peer.session.state().phase(), GamePhase::InProgress);
            assert_eq!(peer.session.state().current_player(), P1);
            assert_eq!(peer.session.state().board().filled_count(), 0);
        }
        assert!(a.session.is_my_turn());
        assert!(!b.session.is_my_turn());
    }

    #[test]
    fn test_fake_win_is_rejected() {
        let (_relay, mut a, mut b) = pair();
        play(&mut a, &mut b, &[2, 0]);

        let result = b.session.on_remote_game_won(&GameWonPayload {
            room_id: "room".to_string(),
            winner: P1,
            column: Some(3),
        });
        assert!(matches!(result, Err(SessionError::DesyncDetected { .. })));
        assert_eq!(b.session.state().move_count(), 2);
    }

    #[test]
    fn test_win_without_column_is_trusted() {
        let (_relay, _a, mut b) = pair();
        let result = b.session.on_remote_game_won(&GameWonPayload {
            room_id: "room".to_string(),
            winner: P1,
            column: None,
        });
        assert_eq!(result, Ok(RemoteOutcome::Won(P1)));
    }

    #[test]
    fn test_draw_resets_both_peers() {
        let (_relay, mut a, mut b) = pair();
        let sequence: Vec<usize> = (0..5).flat_map(|_| [0, 2, 1, 3, 4]).collect();

        let outcomes = play(&mut a, &mut b, &sequence);
        assert_eq!(outcomes.last(), Some(&Outcome::Drawn));
        assert_eq!(a.session.state(), b.session.state());
        assert_eq!(a.session.state().board().filled_count(), 0);
    }

    #[test]
    fn test_publish_failure_does_not_fail_drop() {
        let (relay, mut a, _b) = pair();
        relay.close();
        assert_eq!(a.session.request_drop(0), Ok(Outcome::Moved { row: 4, column: 0 }));
        assert!(!a.session.is_my_turn());
    }

    #[test]
    fn test_random_games_stay_in_sync() {
        use rand::{rngs::StdRng, Rng, SeedableRng};

        let mut rng = StdRng::seed_from_u64(0xD40F);
        let (_relay, mut a, mut b) = pair();
        let mut finished = 0;

        for _ in 0..400 {
            let legal = a.session.state().board().legal_columns();
            let column = legal[rng.gen_range(0..legal.len())];
            let outcome = play(&mut a, &mut b, &[column])[0];
            if !matches!(outcome, Outcome::Moved { .. }) {
                finished += 1;
            }

            assert_eq!(a.session.state(), b.session.state());
            assert_ne!(a.session.is_my_turn(), b.session.is_my_turn());
        }
        assert!(finished > 0);
    }

    #[test]
    fn test_view() {
        let (_relay, mut a, _b) = pair();
        a.session.request_drop(3).unwrap();
        let view = a.session.view();
        assert_eq!(view.room_id, "room");
        assert_eq!(view.current_player, P2);
        assert!(!view.is_my_turn);
        assert_eq!(view.move_count, 1);
        assert_eq!(view.board_hash, hex::encode(a.session.state().hash()));
    }

    // =========================================================================
    // ROOM ACTOR
    // =========================================================================

    async fn next_notice(rx: &mut broadcast::Receiver<SessionNotice>) -> SessionNotice {
        tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out waiting for notice")
            .expect("notice channel closed")
    }

    fn spawn_pair() -> (RoomHandle, RoomHandle) {
        let relay: Arc<LocalRelay> = Arc::new(LocalRelay::new());
        let a = RoomHandle::spawn(GameSession::new(SessionConfig::new("room", P1), relay.clone())).unwrap();
        let b = RoomHandle::spawn(GameSession::new(SessionConfig::new("room", P2), relay)).unwrap();
        (a, b)
    }

    #[tokio::test]
    async fn test_room_handles_play_a_game() {
        let (a, b) = spawn_pair();
        let mut a_notices = a.subscribe_notices();
        let mut b_notices = b.subscribe_notices();

        for _ in 0..3 {
            a.request_drop(2).await.unwrap();
            assert!(matches!(next_notice(&mut b_notices).await, SessionNotice::RemoteMoved { player: P1, .. }));
            b.request_drop(0).await.unwrap();
            assert!(matches!(next_notice(&mut a_notices).await, SessionNotice::RemoteMoved { player: P2, .. }));
        }

        assert_eq!(a.view().await.unwrap().board, b.view().await.unwrap().board);
        assert_eq!(a.request_drop(2).await, Ok(Outcome::Won(P1)));
        assert_eq!(next_notice(&mut b_notices).await, SessionNotice::GameWon { winner: P1 });

        let view_a = a.view().await.unwrap();
        let view_b = b.view().await.unwrap();
        assert!(view_a.is_my_turn);
        assert!(!view_b.is_my_turn);
        assert_eq!(view_b.move_count, 0);
    }

    #[tokio::test]
    async fn test_room_handle_rejects_out_of_turn() {
        let (_a, b) = spawn_pair();
        assert_eq!(b.request_drop(1).await, Err(SessionError::NotYourTurn));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_reply_is_never_ahead_of_opponent_move() {
        for _ in 0..500 {
            let (a, b) = spawn_pair();
            a.request_drop(0).await.unwrap();
            assert_eq!(b.request_drop(1).await, Ok(Outcome::Moved { row: 4, column: 1 }));
            a.close().await;
            b.close().await;
        }
    }

    #[tokio::test]
    async fn test_room_handle_close() {
        let (a, _b) = spawn_pair();
        a.close().await;
        tokio::time::timeout(Duration::from_secs(2), async {
            while !a.is_closed() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
        assert_eq!(a.request_drop(0).await, Err(SessionError::RoomClosed));
    }
}
