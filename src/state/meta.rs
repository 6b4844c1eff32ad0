//! Continue / end-turn / discuss-more polls.
//!
//! At most one poll is open per team. Closing a poll (resolved or discarded)
//! happens exactly once; later votes for it are rejected.

use crate::types::*;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "action", rename_all = "snake_case")]
pub enum PollStatus {
    Open,
    Resolved(MetaAction),
    Discarded,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetaPoll {
    pub id: PollId,
    pub team: Team,
    pub created_at: DateTime<Utc>,
    /// Turn generation the poll was opened in
    pub generation: u64,
    pub options: Vec<MetaAction>,
    pub status: PollStatus,
    pub votes: BTreeMap<PlayerId, MetaVote>,
}

impl MetaPoll {
    pub fn is_open(&self) -> bool {
        self.status == PollStatus::Open
    }

    pub fn tally(&self) -> MetaTally {
        let mut tally = MetaTally::default();
        for vote in self.votes.values() {
            match vote.action {
                MetaAction::Continue => tally.continue_votes += 1,
                MetaAction::EndTurn => tally.end_turn += 1,
                MetaAction::DiscussMore => tally.discuss_more += 1,
            }
        }
        tally
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetaTally {
    #[serde(rename = "continue")]
    pub continue_votes: usize,
    pub end_turn: usize,
    pub discuss_more: usize,
}

impl MetaTally {
    pub fn voters(&self) -> usize {
        self.continue_votes + self.end_turn + self.discuss_more
    }

    pub fn count(&self, action: MetaAction) -> usize {
        match action {
            MetaAction::Continue => self.continue_votes,
            MetaAction::EndTurn => self.end_turn,
            MetaAction::DiscussMore => self.discuss_more,
        }
    }

    /// Plurality action; ties go to `continue`, then `discuss_more`
    pub fn leader(&self) -> Option<(MetaAction, usize)> {
        MetaAction::ALL
            .iter()
            .map(|a| (*a, self.count(*a)))
            .filter(|(_, n)| *n > 0)
            .min_by(|(a, na), (b, nb)| nb.cmp(na).then(a.tie_rank().cmp(&b.tie_rank())))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MetaVoteOutcome {
    Recorded(MetaTally),
    /// A strictly newer vote from this voter is already held; an equal
    /// timestamp replaces the held vote
    Outdated,
    /// This vote closed the poll
    Resolved {
        poll_id: PollId,
        team: Team,
        action: MetaAction,
        generation: u64,
        tally: MetaTally,
    },
}

#[derive(Debug, Clone, Default)]
pub struct MetaDecisionTracker {
    polls: HashMap<PollId, MetaPoll>,
    open: HashMap<Team, PollId>,
}

impl MetaDecisionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a poll for `team` unless one is already open.
    /// Returns the poll id and whether it was newly created.
    pub fn open_poll(&mut self, team: Team, generation: u64, now: DateTime<Utc>) -> (PollId, bool) {
        if let Some(id) = self.open.get(&team) {
            return (id.clone(), false);
        }
        let poll = MetaPoll {
            id: ulid::Ulid::new().to_string(),
            team,
            created_at: now,
            generation,
            options: MetaAction::ALL.to_vec(),
            status: PollStatus::Open,
            votes: BTreeMap::new(),
        };
        let id = poll.id.clone();
        tracing::debug!(poll_id = %id, %team, generation, "Meta poll opened");
        self.open.insert(team, id.clone());
        self.polls.insert(id.clone(), poll);
        (id, true)
    }

    pub fn open_poll_for(&self, team: Team) -> Option<&MetaPoll> {
        self.open.get(&team).and_then(|id| self.polls.get(id))
    }

    pub fn poll(&self, poll_id: &str) -> Option<&MetaPoll> {
        self.polls.get(poll_id)
    }

    /// Record a vote. `operatives` are the eligible voters of the poll's team.
    pub fn submit_vote(
        &mut self,
        vote: MetaVote,
        operatives: &[PlayerId],
        policy: &QuorumPolicy,
    ) -> GameResult<MetaVoteOutcome> {
        let poll = self
            .polls
            .get_mut(&vote.poll_id)
            .ok_or_else(|| GameError::NotFound(format!("Poll {}", vote.poll_id)))?;
        if !poll.is_open() {
            return Err(GameError::invalid(format!(
                "Poll {} is closed",
                vote.poll_id
            )));
        }
        if vote.team != poll.team || !operatives.contains(&vote.voter) {
            return Err(GameError::invalid(format!(
                "{} may not vote in this poll",
                vote.voter
            )));
        }
        if let Some(existing) = poll.votes.get(&vote.voter) {
            if existing.timestamp > vote.timestamp {
                return Ok(MetaVoteOutcome::Outdated);
            }
        }
        poll.votes.insert(vote.voter.clone(), vote);

        let tally = poll.tally();
        let everyone_voted = tally.voters() >= operatives.len();
        let dominant = tally
            .leader()
            .map(|(_, n)| n as f64 / operatives.len() as f64 >= policy.dominant_fraction)
            .unwrap_or(false);

        if !(everyone_voted || dominant) {
            return Ok(MetaVoteOutcome::Recorded(tally));
        }
        let Some((action, _)) = tally.leader() else {
            return Ok(MetaVoteOutcome::Recorded(tally));
        };

        poll.status = PollStatus::Resolved(action);
        let outcome = MetaVoteOutcome::Resolved {
            poll_id: poll.id.clone(),
            team: poll.team,
            action,
            generation: poll.generation,
            tally,
        };
        self.open.remove(&poll.team);
        Ok(outcome)
    }

    /// Close the team's open poll without applying it
    pub fn discard(&mut self, team: Team) -> Option<PollId> {
        let id = self.open.remove(&team)?;
        if let Some(poll) = self.polls.get_mut(&id) {
            poll.status = PollStatus::Discarded;
        }
        tracing::debug!(poll_id = %id, %team, "Meta poll discarded");
        Some(id)
    }

    pub fn discard_all(&mut self) {
        self.discard(Team::Red);
        self.discard(Team::Blue);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(ms: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(1_700_000_000_000 + ms).unwrap()
    }

    fn ops(n: usize) -> Vec<PlayerId> {
        (0..n).map(|i| format!("op{}", i)).collect()
    }

    fn vote(poll_id: &str, voter: &str, action: MetaAction, ms: i64) -> MetaVote {
        MetaVote {
            poll_id: poll_id.to_string(),
            team: Team::Red,
            voter: voter.to_string(),
            action,
            confidence: 0.5,
            timestamp: at(ms),
            reasoning: None,
        }
    }

    #[test]
    fn test_open_poll_is_idempotent() {
        let mut tracker = MetaDecisionTracker::new();
        let (first, created) = tracker.open_poll(Team::Red, 1, at(0));
        assert!(created);
        let (second, created) = tracker.open_poll(Team::Red, 1, at(1));
        assert!(!created);
        assert_eq!(first, second);

        let (blue, _) = tracker.open_poll(Team::Blue, 1, at(2));
        assert_ne!(first, blue);
    }

    #[test]
    fn test_duplicate_votes_count_voter_once() {
        let mut tracker = MetaDecisionTracker::new();
        let policy = QuorumPolicy::default();
        let (id, _) = tracker.open_poll(Team::Red, 1, at(0));
        for i in 0..4 {
            let outcome = tracker
                .submit_vote(vote(&id, "op0", MetaAction::EndTurn, i), &ops(3), &policy)
                .unwrap();
            assert!(matches!(outcome, MetaVoteOutcome::Recorded(t) if t.voters() == 1));
        }
    }

    #[test]
    fn test_equal_timestamp_replaces_and_older_is_outdated() {
        let mut tracker = MetaDecisionTracker::new();
        let policy = QuorumPolicy::default();
        let (id, _) = tracker.open_poll(Team::Red, 1, at(0));
        tracker
            .submit_vote(vote(&id, "op0", MetaAction::Continue, 10), &ops(3), &policy)
            .unwrap();
        let same_time = tracker
            .submit_vote(vote(&id, "op0", MetaAction::EndTurn, 10), &ops(3), &policy)
            .unwrap();
        assert!(matches!(same_time, MetaVoteOutcome::Recorded(t) if t.end_turn == 1 && t.continue_votes == 0));

        let older = tracker
            .submit_vote(vote(&id, "op0", MetaAction::Continue, 5), &ops(3), &policy)
            .unwrap();
        assert_eq!(older, MetaVoteOutcome::Outdated);
    }

    #[test]
    fn test_resolves_when_everyone_voted_with_continue_tiebreak() {
        let mut tracker = MetaDecisionTracker::new();
        let policy = QuorumPolicy::default();
        let (id, _) = tracker.open_poll(Team::Red, 7, at(0));
        tracker
            .submit_vote(vote(&id, "op0", MetaAction::EndTurn, 1), &ops(2), &policy)
            .unwrap();
        let outcome = tracker
            .submit_vote(vote(&id, "op1", MetaAction::Continue, 2), &ops(2), &policy)
            .unwrap();
        match outcome {
            MetaVoteOutcome::Resolved {
                action, generation, ..
            } => {
                assert_eq!(action, MetaAction::Continue);
                assert_eq!(generation, 7);
            }
            other => panic!("Expected resolution, got {:?}", other),
        }
        assert!(tracker.open_poll_for(Team::Red).is_none());

        let late = tracker.submit_vote(vote(&id, "op0", MetaAction::EndTurn, 3), &ops(2), &policy);
        assert!(matches!(late, Err(GameError::InvalidAction(_))));
    }

    #[test]
    fn test_dominant_majority_closes_early() {
        let mut tracker = MetaDecisionTracker::new();
        let policy = QuorumPolicy {
            dominant_fraction: 0.5,
            ..QuorumPolicy::default()
        };
        let (id, _) = tracker.open_poll(Team::Red, 1, at(0));
        tracker
            .submit_vote(vote(&id, "op0", MetaAction::EndTurn, 1), &ops(4), &policy)
            .unwrap();
        let outcome = tracker
            .submit_vote(vote(&id, "op1", MetaAction::EndTurn, 2), &ops(4), &policy)
            .unwrap();
        assert!(matches!(
            outcome,
            MetaVoteOutcome::Resolved {
                action: MetaAction::EndTurn,
                ..
            }
        ));
    }

    #[test]
    fn test_spymaster_and_discarded_polls_rejected() {
        let mut tracker = MetaDecisionTracker::new();
        let policy = QuorumPolicy::default();
        let (id, _) = tracker.open_poll(Team::Red, 1, at(0));
        let spymaster = tracker.submit_vote(vote(&id, "sm", MetaAction::Continue, 1), &ops(3), &policy);
        assert!(spymaster.is_err());

        assert_eq!(tracker.discard(Team::Red), Some(id.clone()));
        assert_eq!(tracker.poll(&id).unwrap().status, PollStatus::Discarded);
        let closed = tracker.submit_vote(vote(&id, "op0", MetaAction::Continue, 2), &ops(3), &policy);
        assert!(closed.is_err());

        let (fresh, created) = tracker.open_poll(Team::Red, 2, at(3));
        assert!(created);
        assert_ne!(fresh, id);
    }

    #[test]
    fn test_tally_leader_ties() {
        let tally = MetaTally {
            continue_votes: 0,
            end_turn: 1,
            discuss_more: 1,
        };
        assert_eq!(tally.leader(), Some((MetaAction::DiscussMore, 1)));
        assert_eq!(MetaTally::default().leader(), None);
    }
}
