use crate::event::EventEnvelope;
use crate::state::{GameSnapshot, SubmitStatus};
use crate::types::*;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const PROTOCOL_VERSION: &str = "1.0";

/// Frames a client sends over the socket. Team and voter come from the
/// connection's seat, never from the frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "t", rename_all = "snake_case")]
pub enum ClientMessage {
    SubmitDiscussion {
        message: String,
        #[serde(default)]
        suggestions: Vec<WordSuggestion>,
        /// Client-side creation time; resending the same frame with the same
        /// timestamp is recognised as a duplicate
        #[serde(default)]
        timestamp: Option<DateTime<Utc>>,
    },
    SubmitWordVote {
        word: Word,
        approved: bool,
        #[serde(default = "full_confidence")]
        confidence: f64,
        #[serde(default)]
        timestamp: Option<DateTime<Utc>>,
    },
    SubmitMetaVote {
        poll_id: PollId,
        action: MetaAction,
        #[serde(default = "full_confidence")]
        confidence: f64,
        #[serde(default)]
        reasoning: Option<String>,
        #[serde(default)]
        timestamp: Option<DateTime<Utc>>,
    },
    GiveClue {
        word: String,
        number: u8,
    },
    RequestGuess {
        word: Word,
    },
    /// Operatives may only claim an overdue deadline
    RequestTurnSwitch {
        reason: String,
    },
    /// Catch up after a gap
    Sync {
        since: u64,
    },
    // Host-only messages
    HostForceTurn {
        reason: String,
    },
    HostGuess {
        word: Word,
    },
    HostOpenPoll {
        team: Team,
    },
}

fn full_confidence() -> f64 {
    1.0
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "t", rename_all = "snake_case")]
pub enum ServerMessage {
    Welcome {
        protocol: String,
        role: Role,
        player: Option<Player>,
        snapshot: Box<GameSnapshot>,
        server_now: DateTime<Utc>,
    },
    Snapshot {
        snapshot: Box<GameSnapshot>,
    },
    Event {
        event: EventEnvelope,
    },
    Events {
        events: Vec<EventEnvelope>,
        last_seq: u64,
    },
    Ack {
        status: SubmitStatus,
    },
    ClueAccepted {
        clue: Clue,
    },
    GuessResult {
        word: Word,
        card: CardKind,
        outcome: GuessOutcome,
        turn: TurnState,
    },
    TurnSwitch {
        switched: bool,
    },
    PollOpened {
        poll_id: PollId,
    },
    Error {
        code: String,
        msg: String,
    },
}

impl ServerMessage {
    pub fn error(code: &str, msg: impl Into<String>) -> Self {
        ServerMessage::Error {
            code: code.to_string(),
            msg: msg.into(),
        }
    }
}

impl From<GameError> for ServerMessage {
    fn from(e: GameError) -> Self {
        ServerMessage::error(e.code(), e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_message_tags() {
        let msg: ClientMessage = serde_json::from_str(
            r#"{"t": "submit_word_vote", "word": "OCEAN", "approved": true}"#,
        )
        .unwrap();
        match msg {
            ClientMessage::SubmitWordVote {
                confidence,
                timestamp,
                ..
            } => {
                assert_eq!(confidence, 1.0);
                assert!(timestamp.is_none());
            }
            other => panic!("unexpected {:?}", other),
        }

        let msg: ClientMessage = serde_json::from_str(
            r#"{"t": "submit_meta_vote", "poll_id": "p1", "action": "end_turn", "confidence": 0.4}"#,
        )
        .unwrap();
        assert!(matches!(
            msg,
            ClientMessage::SubmitMetaVote {
                action: MetaAction::EndTurn,
                ..
            }
        ));
    }

    #[test]
    fn test_error_from_game_error() {
        let msg: ServerMessage = GameError::NotFound("Poll p9".to_string()).into();
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["t"], "error");
        assert_eq!(json["code"], "NOT_FOUND");
    }
}
