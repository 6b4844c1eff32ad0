//! Host-only message handlers

use super::handlers::Connection;
use super::player::guess_result;
use crate::protocol::ServerMessage;
use crate::types::Team;

pub async fn handle_force_turn(conn: &Connection, reason: String) -> Option<ServerMessage> {
    tracing::info!(game_id = %conn.game.id(), %reason, "Host forcing turn switch");
    match conn
        .game
        .mutate(move |s, now| s.request_forced_switch(reason, true, now))
        .await
    {
        Ok(switched) => Some(ServerMessage::TurnSwitch { switched }),
        Err(e) => Some(e.into()),
    }
}

pub async fn handle_guess(conn: &Connection, word: String) -> Option<ServerMessage> {
    tracing::info!(game_id = %conn.game.id(), %word, "Host reveal");
    match conn
        .game
        .mutate(|s, now| s.request_guess(&word, None, now))
        .await
    {
        Ok(effect) => Some(guess_result(effect)),
        Err(e) => Some(e.into()),
    }
}

pub async fn handle_open_poll(conn: &Connection, team: Team) -> Option<ServerMessage> {
    match conn
        .game
        .mutate(|s, now| s.open_meta_poll(team, now))
        .await
    {
        Ok(poll_id) => Some(ServerMessage::PollOpened { poll_id }),
        Err(e) => Some(e.into()),
    }
}
