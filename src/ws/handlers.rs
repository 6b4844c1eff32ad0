//! WebSocket message dispatch
//!
//! This module provides the main entry point for handling client messages.
//! Authorization is checked here, then dispatched to role-specific handler modules.

use crate::protocol::{ClientMessage, ServerMessage};
use crate::state::{AppState, GameHandle};
use crate::types::{Player, PlayerId, Role};
use std::sync::Arc;

use super::{host, player};

/// Macro to check host authorization and return early if unauthorized
macro_rules! check_host {
    ($conn:expr, $action:expr) => {
        if $conn.role != Role::Host {
            return Some(ServerMessage::Error {
                code: "UNAUTHORIZED".to_string(),
                msg: format!("Only host can {}", $action),
            });
        }
    };
}

/// One client's view of the server: the game it is attached to, its role,
/// and its seat (the player id doubles as its token)
#[derive(Clone)]
pub struct Connection {
    pub game: Arc<GameHandle>,
    pub role: Role,
    pub player_id: Option<PlayerId>,
}

impl Connection {
    pub fn new(game: Arc<GameHandle>, role: Role, player_id: Option<PlayerId>) -> Self {
        Self {
            game,
            role,
            player_id,
        }
    }

    /// The seated player behind this connection
    pub fn seat(&self) -> Result<Player, ServerMessage> {
        let id = self
            .player_id
            .as_deref()
            .ok_or_else(|| ServerMessage::error("UNAUTHORIZED", "Join the game first"))?;
        self.game
            .snapshot()
            .player(id)
            .cloned()
            .ok_or_else(|| ServerMessage::error("UNAUTHORIZED", format!("Unknown player {}", id)))
    }

    /// Seat check plus the per-player submission rate limit
    pub async fn submitter(&self, state: &AppState) -> Result<Player, ServerMessage> {
        let player = self.seat()?;
        if !state.allow_submission(&player.id).await {
            tracing::warn!(player_id = %player.id, "Submission rate limited");
            return Err(ServerMessage::error(
                "RATE_LIMITED",
                "Too many submissions, slow down",
            ));
        }
        Ok(player)
    }
}

/// Handle client messages and return optional response
pub async fn handle_message(
    msg: ClientMessage,
    conn: &Connection,
    state: &Arc<AppState>,
) -> Option<ServerMessage> {
    match msg {
        ClientMessage::Sync { since } => {
            let events = conn.game.events_since(since);
            let last_seq = conn.game.snapshot().last_seq;
            tracing::debug!(game_id = %conn.game.id(), since, count = events.len(), "Sync");
            Some(ServerMessage::Events { events, last_seq })
        }

        // Seated player messages
        ClientMessage::SubmitDiscussion {
            message,
            suggestions,
            timestamp,
        } => player::handle_submit_discussion(state, conn, message, suggestions, timestamp).await,

        ClientMessage::SubmitWordVote {
            word,
            approved,
            confidence,
            timestamp,
        } => {
            player::handle_submit_word_vote(state, conn, word, approved, confidence, timestamp)
                .await
        }

        ClientMessage::SubmitMetaVote {
            poll_id,
            action,
            confidence,
            reasoning,
            timestamp,
        } => {
            player::handle_submit_meta_vote(
                state, conn, poll_id, action, confidence, reasoning, timestamp,
            )
            .await
        }

        ClientMessage::GiveClue { word, number } => {
            player::handle_give_clue(state, conn, word, number).await
        }

        ClientMessage::RequestGuess { word } => {
            player::handle_request_guess(state, conn, word).await
        }

        ClientMessage::RequestTurnSwitch { reason } => {
            player::handle_request_turn_switch(conn, reason).await
        }

        // Host-only commands (authorization checked before dispatch)
        ClientMessage::HostForceTurn { reason } => {
            check_host!(conn, "force a turn switch");
            host::handle_force_turn(conn, reason).await
        }

        ClientMessage::HostGuess { word } => {
            check_host!(conn, "reveal words");
            host::handle_guess(conn, word).await
        }

        ClientMessage::HostOpenPoll { team } => {
            check_host!(conn, "open a poll");
            host::handle_open_poll(conn, team).await
        }
    }
}
