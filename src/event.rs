//! Canonical event envelope shared by the push stream, the snapshot poll and
//! the submission surface.

use crate::types::*;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// How many characters of free text take part in an event identity
const CONTENT_PREFIX_CHARS: usize = 48;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TurnChange {
    pub from: TurnState,
    pub to: TurnState,
    pub cause: TurnChangeCause,
    /// Turn generation after the change
    pub generation: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GuessMade {
    pub word: Word,
    pub card: CardKind,
    pub outcome: GuessOutcome,
    pub source: GuessSource,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    Discussion(DiscussionEntry),
    WordVote(WordVote),
    MetaVote(MetaVote),
    TurnChange(TurnChange),
    Guess(GuessMade),
}

/// One event as seen by every consumer.
///
/// `seq` is assigned by the authoritative session when the event is first
/// applied; copies that have not been through a session carry `0`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EventEnvelope {
    #[serde(default)]
    pub seq: u64,
    pub team: Team,
    pub timestamp: DateTime<Utc>,
    pub payload: EventPayload,
}

impl EventEnvelope {
    pub fn discussion(entry: DiscussionEntry) -> Self {
        Self {
            seq: 0,
            team: entry.team,
            timestamp: entry.timestamp,
            payload: EventPayload::Discussion(entry),
        }
    }

    pub fn word_vote(vote: WordVote) -> Self {
        Self {
            seq: 0,
            team: vote.team,
            timestamp: vote.timestamp,
            payload: EventPayload::WordVote(vote),
        }
    }

    pub fn meta_vote(vote: MetaVote) -> Self {
        Self {
            seq: 0,
            team: vote.team,
            timestamp: vote.timestamp,
            payload: EventPayload::MetaVote(vote),
        }
    }

    pub fn turn_change(team: Team, change: TurnChange, at: DateTime<Utc>) -> Self {
        Self {
            seq: 0,
            team,
            timestamp: at,
            payload: EventPayload::TurnChange(change),
        }
    }

    pub fn guess(team: Team, guess: GuessMade, at: DateTime<Utc>) -> Self {
        Self {
            seq: 0,
            team,
            timestamp: at,
            payload: EventPayload::Guess(guess),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self.payload {
            EventPayload::Discussion(_) => "discussion",
            EventPayload::WordVote(_) => "word_vote",
            EventPayload::MetaVote(_) => "meta_vote",
            EventPayload::TurnChange(_) => "turn_change",
            EventPayload::Guess(_) => "guess",
        }
    }

    /// Stable identity derived from content, independent of which path
    /// delivered the event.
    pub fn id(&self) -> EventId {
        let ts = self.timestamp.timestamp_millis();
        match &self.payload {
            EventPayload::Discussion(d) => {
                EventId::derive(&["discussion", &ts.to_string(), &d.author, &prefix(&d.message)])
            }
            EventPayload::WordVote(v) => EventId::derive(&[
                "word_vote",
                &ts.to_string(),
                &v.voter,
                &format!("{}:{}:{}", v.team, v.word.to_lowercase(), v.approved),
            ]),
            EventPayload::MetaVote(v) => EventId::derive(&["meta_vote", &v.poll_id, &v.voter]),
            EventPayload::TurnChange(t) => {
                EventId::derive(&["turn_change", &t.generation.to_string()])
            }
            EventPayload::Guess(g) => EventId::derive(&["guess", &g.word.to_lowercase()]),
        }
    }

    /// Whether a revision keeps the decision of `other`
    pub fn same_choice(&self, other: &EventEnvelope) -> bool {
        match (&self.payload, &other.payload) {
            (EventPayload::MetaVote(mine), EventPayload::MetaVote(theirs)) => {
                mine.action == theirs.action
            }
            (EventPayload::WordVote(mine), EventPayload::WordVote(theirs)) => {
                mine.approved == theirs.approved
            }
            _ => true,
        }
    }

    /// Fold optional fields that `other` carries and `self` lacks.
    /// Returns true if anything changed.
    pub fn enrich_from(&mut self, other: &EventEnvelope) -> bool {
        match (&mut self.payload, &other.payload) {
            (EventPayload::MetaVote(mine), EventPayload::MetaVote(theirs)) => {
                if mine.reasoning.is_none() && theirs.reasoning.is_some() {
                    mine.reasoning = theirs.reasoning.clone();
                    true
                } else {
                    false
                }
            }
            (EventPayload::Discussion(mine), EventPayload::Discussion(theirs)) => {
                let mut changed = false;
                if mine.voting_context.is_none() && theirs.voting_context.is_some() {
                    mine.voting_context = theirs.voting_context;
                    changed = true;
                }
                if mine.suggestions.is_empty() && !theirs.suggestions.is_empty() {
                    mine.suggestions = theirs.suggestions.clone();
                    changed = true;
                }
                if theirs.message.len() > mine.message.len()
                    && theirs.message.starts_with(&mine.message)
                {
                    mine.message = theirs.message.clone();
                    changed = true;
                }
                changed
            }
            _ => false,
        }
    }
}

fn prefix(text: &str) -> String {
    text.trim().chars().take(CONTENT_PREFIX_CHARS).collect()
}

/// Content-derived event identity (hex of a truncated SHA-256)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EventId(String);

impl EventId {
    fn derive(parts: &[&str]) -> Self {
        let mut hasher = Sha256::new();
        for part in parts {
            hasher.update(part.as_bytes());
            hasher.update([0u8]);
        }
        let digest = hasher.finalize();
        EventId(hex::encode(&digest[..16]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
