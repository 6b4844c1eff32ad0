//! Word-vote consensus for the active team.
//!
//! Tallies are kept per word and per distinct voter, so resubmissions revise a
//! vote instead of adding to it. Each word can trigger an auto-guess once.

use crate::types::*;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuorumKind {
    /// More than half of the operatives approve (or all of them)
    Majority,
    /// Enough confident voters to shortcut the majority
    Accelerated,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WordTally {
    pub word: Word,
    pub approving: usize,
    pub rejecting: usize,
    pub average_confidence: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum WordVoteOutcome {
    /// Vote stored; quorum not (yet) reached
    Counted(WordTally),
    /// Older than the vote already held for this voter and word
    Outdated,
    /// Quorum reached for the first time: guess this word
    AutoGuess { tally: WordTally, quorum: QuorumKind },
    /// Quorum already fired for this word earlier
    AlreadyTriggered,
}

/// Decide whether `approving` voters out of `operatives` reach quorum
pub fn quorum_reached(
    approving: usize,
    average_confidence: f64,
    operatives: usize,
    policy: &QuorumPolicy,
) -> Option<QuorumKind> {
    if operatives == 0 || approving == 0 {
        return None;
    }
    let half = operatives.div_ceil(2);
    if approving > half || approving >= operatives {
        return Some(QuorumKind::Majority);
    }
    let fraction = approving as f64 / operatives as f64;
    if approving >= policy.accelerated_min_voters
        && fraction >= policy.accelerated_fraction
        && average_confidence >= policy.accelerated_min_confidence
    {
        return Some(QuorumKind::Accelerated);
    }
    None
}

#[derive(Debug, Clone, Default)]
pub struct ConsensusVoteTracker {
    team: Option<Team>,
    votes: HashMap<Word, HashMap<PlayerId, WordVote>>,
    triggered: HashSet<Word>,
}

impl ConsensusVoteTracker {
    pub fn new(team: Team) -> Self {
        Self {
            team: Some(team),
            ..Default::default()
        }
    }

    pub fn team(&self) -> Option<Team> {
        self.team
    }

    /// Drop every tally and start counting for `team`
    pub fn reset(&mut self, team: Option<Team>) {
        self.team = team;
        self.votes.clear();
        self.triggered.clear();
    }

    /// A revealed word takes no further votes
    pub fn retire_word(&mut self, word: &str) {
        let key = normalize(word);
        self.votes.remove(&key);
        self.triggered.insert(key);
    }

    pub fn record(
        &mut self,
        vote: WordVote,
        operatives: usize,
        policy: &QuorumPolicy,
    ) -> WordVoteOutcome {
        let key = normalize(&vote.word);
        if self.triggered.contains(&key) {
            return WordVoteOutcome::AlreadyTriggered;
        }

        let ballots = self.votes.entry(key.clone()).or_default();
        if let Some(existing) = ballots.get(&vote.voter) {
            if existing.timestamp > vote.timestamp {
                return WordVoteOutcome::Outdated;
            }
        }
        ballots.insert(vote.voter.clone(), vote);

        let tally = Self::tally_of(&key, ballots);
        match quorum_reached(tally.approving, tally.average_confidence, operatives, policy) {
            Some(quorum) => {
                self.triggered.insert(key);
                WordVoteOutcome::AutoGuess { tally, quorum }
            }
            None => WordVoteOutcome::Counted(tally),
        }
    }

    pub fn tally(&self, word: &str) -> Option<WordTally> {
        let key = normalize(word);
        self.votes.get(&key).map(|b| Self::tally_of(&key, b))
    }

    /// All current tallies, most approved first
    pub fn tallies(&self) -> Vec<WordTally> {
        let mut list: Vec<_> = self
            .votes
            .iter()
            .map(|(word, ballots)| Self::tally_of(word, ballots))
            .filter(|t| t.approving + t.rejecting > 0)
            .collect();
        list.sort_by(|a, b| b.approving.cmp(&a.approving).then(a.word.cmp(&b.word)));
        list
    }

    fn tally_of(word: &str, ballots: &HashMap<PlayerId, WordVote>) -> WordTally {
        let approvals: Vec<f64> = ballots
            .values()
            .filter(|v| v.approved)
            .map(|v| v.confidence.clamp(0.0, 1.0))
            .collect();
        let approving = approvals.len();
        let average_confidence = if approving == 0 {
            0.0
        } else {
            approvals.iter().sum::<f64>() / approving as f64
        };
        WordTally {
            word: word.to_string(),
            approving,
            rejecting: ballots.len() - approving,
            average_confidence,
        }
    }
}

fn normalize(word: &str) -> Word {
    word.trim().to_uppercase()
}
