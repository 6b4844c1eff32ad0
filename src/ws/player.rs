//! Seated player message handlers

use super::handlers::Connection;
use crate::protocol::ServerMessage;
use crate::state::machine::GuessEffect;
use crate::state::AppState;
use crate::types::*;
use chrono::{DateTime, Utc};

pub(super) fn guess_result(effect: GuessEffect) -> ServerMessage {
    let turn = effect
        .transition
        .as_ref()
        .map(|t| t.to)
        .unwrap_or(TurnState::turn_of(effect.team));
    ServerMessage::GuessResult {
        word: effect.word,
        card: effect.card,
        outcome: effect.outcome,
        turn,
    }
}

pub async fn handle_submit_discussion(
    state: &AppState,
    conn: &Connection,
    message: String,
    suggestions: Vec<WordSuggestion>,
    timestamp: Option<DateTime<Utc>>,
) -> Option<ServerMessage> {
    let player = match conn.submitter(state).await {
        Ok(p) => p,
        Err(e) => return Some(e),
    };
    let entry = DiscussionEntry {
        team: player.team,
        author: player.id.clone(),
        message,
        suggestions,
        timestamp: timestamp.unwrap_or_else(Utc::now),
        voting_context: None,
    };
    match conn
        .game
        .mutate(move |s, now| s.submit_discussion(entry, now))
        .await
    {
        Ok(status) => Some(ServerMessage::Ack { status }),
        Err(e) => {
            tracing::debug!(player_id = %player.id, "Discussion rejected: {}", e);
            Some(e.into())
        }
    }
}

pub async fn handle_submit_word_vote(
    state: &AppState,
    conn: &Connection,
    word: Word,
    approved: bool,
    confidence: f64,
    timestamp: Option<DateTime<Utc>>,
) -> Option<ServerMessage> {
    let player = match conn.submitter(state).await {
        Ok(p) => p,
        Err(e) => return Some(e),
    };
    let vote = WordVote {
        team: player.team,
        voter: player.id.clone(),
        word,
        approved,
        confidence,
        timestamp: timestamp.unwrap_or_else(Utc::now),
    };
    tracing::debug!(
        game_id = %conn.game.id(),
        team = %vote.team,
        voter = %vote.voter,
        word = %vote.word,
        approved,
        "Word vote"
    );
    match conn
        .game
        .mutate(move |s, now| s.submit_word_vote(vote, now))
        .await
    {
        Ok(status) => Some(ServerMessage::Ack { status }),
        Err(e) => Some(e.into()),
    }
}

#[allow(clippy::too_many_arguments)]
pub async fn handle_submit_meta_vote(
    state: &AppState,
    conn: &Connection,
    poll_id: PollId,
    action: MetaAction,
    confidence: f64,
    reasoning: Option<String>,
    timestamp: Option<DateTime<Utc>>,
) -> Option<ServerMessage> {
    let player = match conn.submitter(state).await {
        Ok(p) => p,
        Err(e) => return Some(e),
    };
    let vote = MetaVote {
        poll_id,
        team: player.team,
        voter: player.id.clone(),
        action,
        confidence: confidence.clamp(0.0, 1.0),
        timestamp: timestamp.unwrap_or_else(Utc::now),
        reasoning,
    };
    tracing::debug!(
        game_id = %conn.game.id(),
        team = %vote.team,
        voter = %vote.voter,
        poll_id = %vote.poll_id,
        %action,
        "Meta vote"
    );
    match conn
        .game
        .mutate(move |s, now| s.submit_meta_vote(vote, now))
        .await
    {
        Ok(status) => Some(ServerMessage::Ack { status }),
        Err(e) => Some(e.into()),
    }
}

pub async fn handle_give_clue(
    state: &AppState,
    conn: &Connection,
    word: String,
    number: u8,
) -> Option<ServerMessage> {
    let player = match conn.submitter(state).await {
        Ok(p) => p,
        Err(e) => return Some(e),
    };
    match conn
        .game
        .mutate(|s, now| s.give_clue(player.team, &player.id, &word, number, now))
        .await
    {
        Ok(clue) => {
            tracing::info!(game_id = %conn.game.id(), team = %clue.team, clue = %clue.word, "Clue given");
            Some(ServerMessage::ClueAccepted { clue })
        }
        Err(e) => Some(e.into()),
    }
}

pub async fn handle_request_guess(
    state: &AppState,
    conn: &Connection,
    word: Word,
) -> Option<ServerMessage> {
    let player = match conn.submitter(state).await {
        Ok(p) => p,
        Err(e) => return Some(e),
    };
    match conn
        .game
        .mutate(|s, now| s.request_guess(&word, Some(&player.id), now))
        .await
    {
        Ok(effect) => Some(guess_result(effect)),
        Err(e) => Some(e.into()),
    }
}

pub async fn handle_request_turn_switch(conn: &Connection, reason: String) -> Option<ServerMessage> {
    let player = match conn.seat() {
        Ok(p) => p,
        Err(e) => return Some(e),
    };
    tracing::debug!(player_id = %player.id, %reason, "Turn switch requested");
    match conn
        .game
        .mutate(move |s, now| s.request_forced_switch(reason, false, now))
        .await
    {
        Ok(switched) => Some(ServerMessage::TurnSwitch { switched }),
        Err(e) => Some(e.into()),
    }
}
