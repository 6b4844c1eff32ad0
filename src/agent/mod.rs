//! Automated players.
//!
//! An [`AgentCollaborator`] decides what to say and how to vote; an
//! [`AgentRunner`] watches one game on behalf of one automated player and
//! submits those decisions through the same surface human clients use.

mod llm_agent;
pub mod retry;
mod runner;

pub use llm_agent::LlmAgent;
pub use retry::{Backoff, RetryPolicy};
pub use runner::AgentRunner;

use crate::llm::LlmResult;
use crate::state::session::{GameSnapshot, PollView};
use crate::types::*;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// How many recent discussion entries an agent sees
const DISCUSSION_WINDOW: usize = 20;

/// A card as one player may see it: operatives only learn a card's colour
/// once it is revealed
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VisibleCard {
    pub word: Word,
    pub revealed: bool,
    pub kind: Option<CardKind>,
}

/// The view of a game handed to a collaborator
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GameContext {
    pub player_id: PlayerId,
    pub team: Team,
    pub position: Position,
    pub board: Vec<VisibleCard>,
    pub clue: Option<Clue>,
    pub scores: Scores,
    pub remaining_secs: u64,
    pub discussion: Vec<DiscussionEntry>,
    pub open_poll: Option<PollView>,
}

impl GameContext {
    pub fn new(snapshot: &GameSnapshot, player: &Player, discussion: Vec<DiscussionEntry>) -> Self {
        let spymaster = player.position == Position::Spymaster;
        let board = snapshot
            .cards
            .iter()
            .map(|c| VisibleCard {
                word: c.word.clone(),
                revealed: c.revealed,
                kind: (spymaster || c.revealed).then_some(c.kind),
            })
            .collect();
        let skip = discussion.len().saturating_sub(DISCUSSION_WINDOW);
        Self {
            player_id: player.id.clone(),
            team: player.team,
            position: player.position,
            board,
            clue: snapshot.clue.clone(),
            scores: snapshot.scores,
            remaining_secs: snapshot.remaining_ms / 1000,
            discussion: discussion.into_iter().skip(skip).collect(),
            open_poll: snapshot
                .open_poll
                .as_ref()
                .filter(|p| p.team == player.team)
                .cloned(),
        }
    }

    pub fn unrevealed(&self) -> impl Iterator<Item = &VisibleCard> {
        self.board.iter().filter(|c| !c.revealed)
    }

    pub fn is_guessable(&self, word: &str) -> bool {
        self.unrevealed().any(|c| c.word.eq_ignore_ascii_case(word))
    }

    /// Plain-text rendering used in prompts
    pub fn describe(&self) -> String {
        let mut out = format!(
            "You are on the {} team as {}. Score: red {} / blue {}. {}s left in this turn.\n",
            self.team,
            match self.position {
                Position::Spymaster => "spymaster",
                Position::Operative => "an operative",
            },
            self.scores.red,
            self.scores.blue,
            self.remaining_secs
        );
        out.push_str("Board:\n");
        for card in &self.board {
            let state = match (card.revealed, card.kind) {
                (true, Some(kind)) => format!("revealed, {:?}", kind),
                (false, Some(kind)) => format!("{:?}", kind),
                _ => "unknown".to_string(),
            };
            out.push_str(&format!("- {} ({})\n", card.word, state));
        }
        if let Some(clue) = &self.clue {
            out.push_str(&format!("Current clue: {} {}\n", clue.word, clue.number));
        }
        if !self.discussion.is_empty() {
            out.push_str("Team discussion so far:\n");
            for entry in &self.discussion {
                out.push_str(&format!("{}: {}\n", entry.author, entry.message));
            }
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClueSuggestion {
    pub word: String,
    pub number: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscussionReply {
    pub message: String,
    #[serde(default)]
    pub suggestions: Vec<WordSuggestion>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WordDecision {
    pub approved: bool,
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetaDecision {
    pub action: MetaAction,
    pub confidence: f64,
    #[serde(default)]
    pub reasoning: Option<String>,
}

/// Decision-making half of an automated player. Errors are retryable
/// collaborator failures; they never stall the game.
#[async_trait]
pub trait AgentCollaborator: Send + Sync {
    async fn get_clue(&self, ctx: &GameContext) -> LlmResult<ClueSuggestion>;

    async fn discuss(&self, ctx: &GameContext) -> LlmResult<DiscussionReply>;

    async fn vote_on_word(&self, ctx: &GameContext, word: &str) -> LlmResult<WordDecision>;

    async fn vote_on_meta(&self, ctx: &GameContext) -> LlmResult<MetaDecision>;

    fn name(&self) -> &str;
}

/// Display name for an automated player
pub fn agent_name() -> String {
    petname::petname(2, "-").unwrap_or_else(|| format!("agent-{}", ulid::Ulid::new()))
}
