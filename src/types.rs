use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque ID types for type safety
pub type GameId = String;
pub type PlayerId = String;
pub type PollId = String;
pub type Word = String;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Team {
    Red,
    Blue,
}

impl Team {
    pub fn other(self) -> Team {
        match self {
            Team::Red => Team::Blue,
            Team::Blue => Team::Red,
        }
    }
}

impl fmt::Display for Team {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Team::Red => write!(f, "red"),
            Team::Blue => write!(f, "blue"),
        }
    }
}

/// Whose turn it is, or who has won. The win states are terminal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TurnState {
    RedTurn,
    BlueTurn,
    RedWin,
    BlueWin,
}

impl TurnState {
    pub fn turn_of(team: Team) -> Self {
        match team {
            Team::Red => TurnState::RedTurn,
            Team::Blue => TurnState::BlueTurn,
        }
    }

    pub fn win_for(team: Team) -> Self {
        match team {
            Team::Red => TurnState::RedWin,
            Team::Blue => TurnState::BlueWin,
        }
    }

    /// Team currently allowed to act, `None` once the game is over
    pub fn active_team(&self) -> Option<Team> {
        match self {
            TurnState::RedTurn => Some(Team::Red),
            TurnState::BlueTurn => Some(Team::Blue),
            TurnState::RedWin | TurnState::BlueWin => None,
        }
    }

    pub fn winner(&self) -> Option<Team> {
        match self {
            TurnState::RedWin => Some(Team::Red),
            TurnState::BlueWin => Some(Team::Blue),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.winner().is_some()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Position {
    Spymaster,
    Operative,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PlayerRole {
    Human,
    AutomatedAgent { model: String },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Player {
    pub id: PlayerId,
    pub display_name: String,
    pub role: PlayerRole,
    pub team: Team,
    pub position: Position,
}

impl Player {
    pub fn is_operative_of(&self, team: Team) -> bool {
        self.team == team && self.position == Position::Operative
    }

    pub fn is_spymaster_of(&self, team: Team) -> bool {
        self.team == team && self.position == Position::Spymaster
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum CardKind {
    Red,
    Blue,
    Neutral,
    Assassin,
}

impl CardKind {
    pub fn owner(&self) -> Option<Team> {
        match self {
            CardKind::Red => Some(Team::Red),
            CardKind::Blue => Some(Team::Blue),
            CardKind::Neutral | CardKind::Assassin => None,
        }
    }

    pub fn of_team(team: Team) -> Self {
        match team {
            Team::Red => CardKind::Red,
            Team::Blue => CardKind::Blue,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Card {
    pub word: Word,
    pub kind: CardKind,
}

/// How a revealed word relates to the team that guessed it
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum GuessOutcome {
    OwnTeam,
    OpposingTeam,
    Neutral,
    Assassin,
}

impl GuessOutcome {
    pub fn classify(kind: CardKind, guessing: Team) -> Self {
        match kind {
            CardKind::Assassin => GuessOutcome::Assassin,
            CardKind::Neutral => GuessOutcome::Neutral,
            k if k.owner() == Some(guessing) => GuessOutcome::OwnTeam,
            _ => GuessOutcome::OpposingTeam,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Scores {
    pub red: u32,
    pub blue: u32,
}

impl Scores {
    pub fn get(&self, team: Team) -> u32 {
        match team {
            Team::Red => self.red,
            Team::Blue => self.blue,
        }
    }

    pub fn add(&mut self, team: Team) -> u32 {
        let slot = match team {
            Team::Red => &mut self.red,
            Team::Blue => &mut self.blue,
        };
        *slot += 1;
        *slot
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Clue {
    pub team: Team,
    pub word: String,
    pub number: u8,
    pub given_by: PlayerId,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum MetaAction {
    Continue,
    EndTurn,
    DiscussMore,
}

impl MetaAction {
    pub const ALL: [MetaAction; 3] = [
        MetaAction::Continue,
        MetaAction::EndTurn,
        MetaAction::DiscussMore,
    ];

    /// Tie-break preference, lower wins
    pub fn tie_rank(&self) -> u8 {
        match self {
            MetaAction::Continue => 0,
            MetaAction::DiscussMore => 1,
            MetaAction::EndTurn => 2,
        }
    }
}

impl fmt::Display for MetaAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetaAction::Continue => write!(f, "continue"),
            MetaAction::EndTurn => write!(f, "end_turn"),
            MetaAction::DiscussMore => write!(f, "discuss_more"),
        }
    }
}

impl std::str::FromStr for MetaAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace(['-', ' '], "_").as_str() {
            "continue" => Ok(MetaAction::Continue),
            "end_turn" | "end" | "pass" => Ok(MetaAction::EndTurn),
            "discuss_more" | "discuss" => Ok(MetaAction::DiscussMore),
            other => Err(format!("Unknown meta action: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WordSuggestion {
    pub word: Word,
    pub confidence: f64,
}

/// Free-text discussion message. Append-only.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DiscussionEntry {
    pub team: Team,
    pub author: PlayerId,
    pub message: String,
    #[serde(default)]
    pub suggestions: Vec<WordSuggestion>,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voting_context: Option<bool>,
}

/// Uniqueness key is (team, voter, word); the latest timestamp wins.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WordVote {
    pub team: Team,
    pub voter: PlayerId,
    pub word: Word,
    pub approved: bool,
    pub confidence: f64,
    pub timestamp: DateTime<Utc>,
}

/// Uniqueness key is (poll_id, voter); the latest timestamp wins.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetaVote {
    pub poll_id: PollId,
    pub team: Team,
    pub voter: PlayerId,
    pub action: MetaAction,
    pub confidence: f64,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
}

/// Why the turn changed hands (or ended)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TurnChangeCause {
    OpposingWord { word: Word },
    NeutralWord { word: Word },
    Assassin { word: Word },
    AllWordsFound,
    MetaEndTurn { poll_id: PollId },
    MetaContinue { poll_id: PollId },
    Expired,
    Forced { reason: String },
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum GuessSource {
    Consensus,
    Requested,
}

/// Immutable history entry, display only
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TurnRecord {
    ClueGiven {
        clue: Clue,
    },
    Guess {
        team: Team,
        word: Word,
        card: CardKind,
        outcome: GuessOutcome,
        source: GuessSource,
        at: DateTime<Utc>,
    },
    MetaResolved {
        team: Team,
        poll_id: PollId,
        action: MetaAction,
        at: DateTime<Utc>,
    },
    Transition {
        from: TurnState,
        to: TurnState,
        cause: TurnChangeCause,
        generation: u64,
        at: DateTime<Utc>,
    },
}

/// Policy knobs for word and meta quorum
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QuorumPolicy {
    /// Fraction of operatives that must approve for the accelerated rule
    pub accelerated_fraction: f64,
    /// Average confidence the accelerated rule requires
    pub accelerated_min_confidence: f64,
    /// Minimum approving voters for the accelerated rule
    pub accelerated_min_voters: usize,
    /// Share of operatives backing one meta action that closes a poll early
    pub dominant_fraction: f64,
}

impl Default for QuorumPolicy {
    fn default() -> Self {
        Self {
            accelerated_fraction: 0.30,
            accelerated_min_confidence: 0.75,
            accelerated_min_voters: 2,
            dominant_fraction: 0.80,
        }
    }
}

/// Longest turn a game may be configured with (one day)
pub const MAX_TURN_SECONDS: u64 = 24 * 60 * 60;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GameConfig {
    pub turn_seconds: u64,
    pub starting_team: Team,
    pub quorum: QuorumPolicy,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            turn_seconds: 60,
            starting_team: Team::Red,
            quorum: QuorumPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Host,
    Player,
    Observer,
}

/// Errors produced by game operations
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GameError {
    #[error("Invalid action: {0}")]
    InvalidAction(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Stale timer fire (generation {expected}, current {current})")]
    StaleTimerFire { expected: u64, current: u64 },
}

impl GameError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        GameError::InvalidAction(msg.into())
    }

    pub fn code(&self) -> &'static str {
        match self {
            GameError::InvalidAction(_) => "INVALID_ACTION",
            GameError::NotFound(_) => "NOT_FOUND",
            GameError::StaleTimerFire { .. } => "STALE_TIMER",
        }
    }
}

pub type GameResult<T> = Result<T, GameError>;
