//! Drop Four Server
//!
//! `drop-four-server [serve]` runs the WebSocket relay.
//! `drop-four-server demo` plays a scripted game between two in-process
//! sessions.

use std::sync::Arc;
use anyhow::Context;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use drop_four::{
    VERSION,
    game::board::CONNECT_LENGTH,
    network::{
        server::{RelayServer, ServerConfig},
        session::{Outcome, RoomHandle, SessionNotice},
        transport::LocalRelay,
    },
    GameSession, Player, SessionConfig,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Drop Four Server v{}", VERSION);
    info!("Connect {} to win", CONNECT_LENGTH);

    match std::env::args().nth(1).as_deref() {
        None | Some("serve") => serve().await,
        Some("demo") => demo_match().await,
        Some(other) => anyhow::bail!("Unknown command {:?} (expected `serve` or `demo`)", other),
    }
}

/// Run the relay until Ctrl-C.
async fn serve() -> anyhow::Result<()> {
    let config = ServerConfig::from_env();
    info!(
        "Max connections: {}, max rooms: {}, idle timeout: {:?}",
        config.max_connections, config.max_rooms, config.idle_timeout
    );

    let server = Arc::new(RelayServer::new(config));
    let running = server.clone();
    let mut handle = tokio::spawn(async move { running.run().await });

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("Failed to listen for Ctrl-C")?;
            info!("Ctrl-C received");
            server.shutdown();
        }
        result = &mut handle => {
            result.context("Server task panicked")??;
            return Ok(());
        }
    }

    handle.await.context("Server task panicked")??;
    Ok(())
}

/// Demo: two sessions sharing an in-process relay.
async fn demo_match() -> anyhow::Result<()> {
    info!("=== Starting Demo Match ===");

    let relay = Arc::new(LocalRelay::new());
    let one = RoomHandle::spawn(GameSession::new(
        SessionConfig::new("demo", Player::Player1),
        relay.clone(),
    ))?;
    let two = RoomHandle::spawn(GameSession::new(
        SessionConfig::new("demo", Player::Player2),
        relay.clone(),
    ))?;
    let mut notices = two.subscribe_notices();

    // Player 1 builds a diagonal; player 2 plays elsewhere
    let script = [(Player::Player1, 0), (Player::Player2, 1), (Player::Player1, 1),
                  (Player::Player2, 2), (Player::Player1, 2), (Player::Player2, 3),
                  (Player::Player1, 2), (Player::Player2, 3), (Player::Player1, 3),
                  (Player::Player2, 0), (Player::Player1, 3)];

    for (player, column) in script {
        let handle = if player == Player::Player1 { &one } else { &two };
        match handle.request_drop(column).await? {
            Outcome::Moved { row, column } => info!("{} dropped into ({}, {})", player, row, column),
            Outcome::Won(winner) => {
                info!("{} connects {}!", winner, CONNECT_LENGTH);
                break;
            }
            Outcome::Drawn => {
                info!("Board full, draw");
                break;
            }
        }
    }

    // Wait until player 2 has seen the result
    loop {
        match notices.recv().await? {
            SessionNotice::GameWon { winner } => {
                info!("Player 2 saw {} win", winner);
                break;
            }
            SessionNotice::DesyncDetected { reason } => {
                warn!("Desync: {}", reason);
                break;
            }
            _ => {}
        }
    }

    let view_one = one.view().await?;
    let view_two = two.view().await?;
    info!("=== Match Results ===");
    info!("Events published: {}", relay.published_count());
    info!("Player 1 state hash: {}", view_one.board_hash);
    info!("Player 2 state hash: {}", view_two.board_hash);

    if view_one.board_hash == view_two.board_hash {
        info!("SYNC VERIFIED: both peers reset to the same board");
    } else {
        warn!("SYNC FAILURE: peers disagree");
    }

    one.close().await;
    two.close().await;
    Ok(())
}
