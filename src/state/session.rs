//! Per-game session: the single writer that ties the state machine, the two
//! vote trackers, the turn clock and the event log together.
//!
//! Every mutating call first enforces the turn deadline, so a turn whose time
//! has run out is ended before anything else is applied to it.

use super::consensus::{ConsensusVoteTracker, WordTally, WordVoteOutcome};
use super::machine::{GameStateMachine, GuessEffect, Transition};
use super::meta::{MetaDecisionTracker, MetaPoll, MetaTally, MetaVoteOutcome};
use super::reconcile::{EventReconciler, EventSource, Observation};
use crate::event::{EventEnvelope, EventPayload, GuessMade, TurnChange};
use crate::types::*;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Result of a submission, returned to the submitter as an acknowledgement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SubmitStatus {
    Recorded { seq: u64 },
    Duplicate { seq: u64, enriched: bool },
    /// Accepted but without effect on the game (e.g. inactive team)
    Ignored { reason: String },
    /// The vote completed a quorum and the word was guessed
    Guessed { seq: u64, word: Word },
    /// The vote closed its meta poll
    PollResolved { seq: u64, action: MetaAction },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CardView {
    pub word: Word,
    pub kind: CardKind,
    pub revealed: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollView {
    pub id: PollId,
    pub team: Team,
    pub created_at: DateTime<Utc>,
    pub options: Vec<MetaAction>,
    pub votes: Vec<MetaVote>,
    pub tally: MetaTally,
}

impl From<&MetaPoll> for PollView {
    fn from(p: &MetaPoll) -> Self {
        Self {
            id: p.id.clone(),
            team: p.team,
            created_at: p.created_at,
            options: p.options.clone(),
            votes: p.votes.values().cloned().collect(),
            tally: p.tally(),
        }
    }
}

/// Everything a client needs to render or catch up, as of `server_now`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameSnapshot {
    pub game_id: GameId,
    pub turn: TurnState,
    pub scores: Scores,
    pub cards: Vec<CardView>,
    pub assassin: Option<Word>,
    pub revealed: Vec<Word>,
    pub clue: Option<Clue>,
    pub generation: u64,
    pub turn_started_at: DateTime<Utc>,
    pub turn_duration_secs: u64,
    pub turn_deadline: DateTime<Utc>,
    pub remaining_ms: u64,
    pub server_now: DateTime<Utc>,
    pub open_poll: Option<PollView>,
    pub word_tallies: Vec<WordTally>,
    pub players: Vec<Player>,
    pub history: Vec<TurnRecord>,
    pub events: Vec<EventEnvelope>,
    pub last_seq: u64,
}

impl GameSnapshot {
    /// Recompute the time-dependent fields for `now`
    pub fn refreshed(&self, now: DateTime<Utc>) -> Self {
        let mut copy = self.clone();
        copy.server_now = now;
        copy.remaining_ms = if self.turn.is_terminal() {
            0
        } else {
            (self.turn_deadline - now)
                .to_std()
                .map(|d| d.as_millis() as u64)
                .unwrap_or(0)
        };
        copy
    }

    pub fn player(&self, id: &str) -> Option<&Player> {
        self.players.iter().find(|p| p.id == id)
    }

    pub fn active_team(&self) -> Option<Team> {
        self.turn.active_team()
    }
}

pub struct GameSession {
    machine: GameStateMachine,
    consensus: ConsensusVoteTracker,
    meta: MetaDecisionTracker,
    reconciler: EventReconciler,
    players: BTreeMap<PlayerId, Player>,
    history: Vec<TurnRecord>,
    outbox: Vec<EventEnvelope>,
}

impl GameSession {
    pub fn new(machine: GameStateMachine) -> Self {
        let team = machine.active_team();
        Self {
            machine,
            consensus: ConsensusVoteTracker::new(team.unwrap_or(Team::Red)),
            meta: MetaDecisionTracker::new(),
            reconciler: EventReconciler::new(),
            players: BTreeMap::new(),
            history: Vec::new(),
            outbox: Vec::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.machine.game().id
    }

    pub fn machine(&self) -> &GameStateMachine {
        &self.machine
    }

    pub fn meta(&self) -> &MetaDecisionTracker {
        &self.meta
    }

    pub fn consensus(&self) -> &ConsensusVoteTracker {
        &self.consensus
    }

    pub fn history(&self) -> &[TurnRecord] {
        &self.history
    }

    pub fn players(&self) -> impl Iterator<Item = &Player> {
        self.players.values()
    }

    /// Events produced since the last call, in application order
    pub fn take_outbox(&mut self) -> Vec<EventEnvelope> {
        std::mem::take(&mut self.outbox)
    }

    pub fn events_since(&self, since: u64) -> Vec<EventEnvelope> {
        self.reconciler.since(since)
    }

    /// Operatives of `team`, the electorate for both kinds of vote
    pub fn operatives(&self, team: Team) -> Vec<PlayerId> {
        self.players
            .values()
            .filter(|p| p.is_operative_of(team))
            .map(|p| p.id.clone())
            .collect()
    }

    pub fn join(&mut self, player: Player) -> GameResult<Player> {
        if let Some(existing) = self.players.get(&player.id) {
            if existing.team == player.team && existing.position == player.position {
                return Ok(existing.clone());
            }
            return Err(GameError::invalid(format!(
                "{} already joined as {:?} for {}",
                player.id, existing.position, existing.team
            )));
        }
        if player.position == Position::Spymaster
            && self.players.values().any(|p| p.is_spymaster_of(player.team))
        {
            return Err(GameError::invalid(format!(
                "{} already has a spymaster",
                player.team
            )));
        }
        tracing::info!(
            game_id = %self.id(),
            player_id = %player.id,
            team = %player.team,
            position = ?player.position,
            "Player joined"
        );
        self.players.insert(player.id.clone(), player.clone());
        Ok(player)
    }

    fn player(&self, id: &str) -> GameResult<&Player> {
        self.players
            .get(id)
            .ok_or_else(|| GameError::NotFound(format!("Player {}", id)))
    }

    fn require_active(&self) -> GameResult<Team> {
        self.machine
            .active_team()
            .ok_or_else(|| GameError::invalid("Game is over"))
    }

    /// End the turn if its time ran out. Returns true if the turn changed.
    pub fn enforce_deadline(&mut self, now: DateTime<Utc>) -> bool {
        if !self.machine.clock().is_expired(now) {
            return false;
        }
        let generation = self.machine.generation();
        self.expire_turn(generation, now)
    }

    /// Timer entry point. Stale or early fires are no-ops.
    pub fn expire_turn(&mut self, generation: u64, now: DateTime<Utc>) -> bool {
        match self
            .machine
            .force_turn_expiry(generation, TurnChangeCause::Expired, true, now)
        {
            Ok(transition) => {
                tracing::info!(
                    game_id = %self.id(),
                    generation,
                    to = ?transition.to,
                    "Turn expired"
                );
                self.apply_transition(transition);
                true
            }
            Err(GameError::StaleTimerFire { expected, current }) => {
                tracing::debug!(expected, current, "Ignoring stale timer fire");
                false
            }
            Err(e) => {
                tracing::debug!("Timer fire ignored: {}", e);
                false
            }
        }
    }

    /// Forced switch requested by a client. The host may switch at any time;
    /// anyone else only once the clock has run out, so redundant client-side
    /// timers are harmless.
    pub fn request_forced_switch(
        &mut self,
        reason: String,
        by_host: bool,
        now: DateTime<Utc>,
    ) -> GameResult<bool> {
        let before = self.machine.generation();
        self.enforce_deadline(now);
        self.require_active()?;
        if self.machine.generation() != before || !by_host {
            return Ok(self.machine.generation() != before);
        }
        let transition = self.machine.force_turn_expiry(
            before,
            TurnChangeCause::Forced { reason },
            false,
            now,
        )?;
        self.apply_transition(transition);
        Ok(true)
    }

    pub fn give_clue(
        &mut self,
        team: Team,
        spymaster: &str,
        word: &str,
        number: u8,
        now: DateTime<Utc>,
    ) -> GameResult<Clue> {
        self.enforce_deadline(now);
        let active = self.require_active()?;
        if !self.player(spymaster)?.is_spymaster_of(team) {
            return Err(GameError::invalid(format!(
                "{} is not the {} spymaster",
                spymaster, team
            )));
        }
        if team != active {
            return Err(GameError::invalid(format!("It is not {}'s turn", team)));
        }
        let word = word.trim();
        if word.is_empty() || word.contains(char::is_whitespace) {
            return Err(GameError::invalid("Clue must be a single word"));
        }
        if number > 9 {
            return Err(GameError::invalid("Clue number must be between 0 and 9"));
        }
        let clue = Clue {
            team,
            word: word.to_uppercase(),
            number,
            given_by: spymaster.to_string(),
            at: now,
        };
        self.machine.set_clue(clue.clone())?;
        self.history.push(TurnRecord::ClueGiven { clue: clue.clone() });
        self.log(EventEnvelope::discussion(DiscussionEntry {
            team,
            author: spymaster.to_string(),
            message: format!("CLUE: {} ({})", clue.word, clue.number),
            suggestions: vec![],
            timestamp: now,
            voting_context: None,
        }));
        Ok(clue)
    }

    pub fn submit_discussion(
        &mut self,
        mut entry: DiscussionEntry,
        now: DateTime<Utc>,
    ) -> GameResult<SubmitStatus> {
        self.enforce_deadline(now);
        self.require_active()?;
        let author = self.player(&entry.author)?;
        if author.team != entry.team {
            return Err(GameError::invalid(format!(
                "{} is not on team {}",
                entry.author, entry.team
            )));
        }
        if author.position == Position::Spymaster {
            return Err(GameError::invalid("Spymasters cannot join the discussion"));
        }
        if entry.message.trim().is_empty() {
            return Err(GameError::invalid("Message is empty"));
        }
        for s in &mut entry.suggestions {
            s.word = s.word.trim().to_uppercase();
            s.confidence = s.confidence.clamp(0.0, 1.0);
        }
        let observation = self.log(EventEnvelope::discussion(entry));
        Ok(status_for(observation))
    }

    pub fn submit_word_vote(
        &mut self,
        mut vote: WordVote,
        now: DateTime<Utc>,
    ) -> GameResult<SubmitStatus> {
        self.enforce_deadline(now);
        let active = self.require_active()?;
        if !self.player(&vote.voter)?.is_operative_of(vote.team) {
            return Err(GameError::invalid(format!(
                "{} cannot vote for {}",
                vote.voter, vote.team
            )));
        }
        let card = self
            .machine
            .game()
            .card(&vote.word)
            .ok_or_else(|| GameError::invalid(format!("{} is not on the board", vote.word)))?;
        if self.machine.game().is_revealed(&card.word) {
            return Err(GameError::invalid(format!(
                "{} is already revealed",
                card.word
            )));
        }
        if vote.team != active {
            return Ok(SubmitStatus::Ignored {
                reason: format!("It is {}'s turn", active),
            });
        }
        vote.word = card.word.clone();
        vote.confidence = vote.confidence.clamp(0.0, 1.0);

        let observation = self.log(EventEnvelope::word_vote(vote.clone()));
        if !observation.should_apply() {
            return Ok(status_for(observation));
        }

        let operatives = self.operatives(active).len();
        let policy = self.machine.game().config.quorum.clone();
        match self.consensus.record(vote, operatives, &policy) {
            WordVoteOutcome::AutoGuess { tally, quorum } => {
                tracing::info!(
                    game_id = %self.id(),
                    word = %tally.word,
                    approving = tally.approving,
                    operatives,
                    ?quorum,
                    "Word reached quorum"
                );
                self.apply_guess(&tally.word, GuessSource::Consensus, now)?;
                Ok(SubmitStatus::Guessed {
                    seq: observation.seq(),
                    word: tally.word,
                })
            }
            WordVoteOutcome::Counted(_)
            | WordVoteOutcome::Outdated
            | WordVoteOutcome::AlreadyTriggered => Ok(SubmitStatus::Recorded {
                seq: observation.seq(),
            }),
        }
    }

    pub fn open_meta_poll(&mut self, team: Team, now: DateTime<Utc>) -> GameResult<PollId> {
        self.enforce_deadline(now);
        let active = self.require_active()?;
        if team != active {
            return Err(GameError::invalid(format!("It is not {}'s turn", team)));
        }
        let (id, _) = self.meta.open_poll(team, self.machine.generation(), now);
        Ok(id)
    }

    pub fn submit_meta_vote(
        &mut self,
        vote: MetaVote,
        now: DateTime<Utc>,
    ) -> GameResult<SubmitStatus> {
        self.enforce_deadline(now);
        self.require_active()?;
        let poll = self
            .meta
            .poll(&vote.poll_id)
            .ok_or_else(|| GameError::NotFound(format!("Poll {}", vote.poll_id)))?;
        if !poll.is_open() {
            return Err(GameError::invalid(format!(
                "Poll {} is closed",
                vote.poll_id
            )));
        }
        let poll_team = poll.team;
        let operatives = self.operatives(poll_team);
        if vote.team != poll_team || !operatives.contains(&vote.voter) {
            return Err(GameError::invalid(format!(
                "{} may not vote in poll {}",
                vote.voter, vote.poll_id
            )));
        }

        let observation = self.log(EventEnvelope::meta_vote(vote.clone()));
        if !observation.should_apply() {
            return Ok(status_for(observation));
        }
        let policy = self.machine.game().config.quorum.clone();
        match self.meta.submit_vote(vote, &operatives, &policy)? {
            MetaVoteOutcome::Resolved {
                poll_id,
                team,
                action,
                generation,
                tally,
            } => {
                tracing::info!(
                    game_id = %self.id(),
                    %poll_id,
                    %team,
                    %action,
                    voters = tally.voters(),
                    "Meta poll resolved"
                );
                self.history.push(TurnRecord::MetaResolved {
                    team,
                    poll_id: poll_id.clone(),
                    action,
                    at: now,
                });
                match self
                    .machine
                    .resolve_meta_decision(&poll_id, action, generation, now)
                {
                    Ok(Some(transition)) => self.apply_transition(transition),
                    Ok(None) => {}
                    Err(e) => tracing::warn!(%poll_id, "Meta decision not applied: {}", e),
                }
                Ok(SubmitStatus::PollResolved {
                    seq: observation.seq(),
                    action,
                })
            }
            MetaVoteOutcome::Recorded(_) | MetaVoteOutcome::Outdated => {
                Ok(SubmitStatus::Recorded {
                    seq: observation.seq(),
                })
            }
        }
    }

    /// Explicit guess request; `requested_by` of `None` is the host
    pub fn request_guess(
        &mut self,
        word: &str,
        requested_by: Option<&str>,
        now: DateTime<Utc>,
    ) -> GameResult<GuessEffect> {
        self.enforce_deadline(now);
        let active = self.require_active()?;
        if let Some(id) = requested_by {
            if !self.player(id)?.is_operative_of(active) {
                return Err(GameError::invalid(format!(
                    "{} cannot guess for {}",
                    id, active
                )));
            }
        }
        self.apply_guess(word, GuessSource::Requested, now)
    }

    /// Route an envelope from the generic submission path to its handler
    pub fn submit_event(
        &mut self,
        envelope: EventEnvelope,
        now: DateTime<Utc>,
    ) -> GameResult<SubmitStatus> {
        match envelope.payload {
            EventPayload::Discussion(entry) => self.submit_discussion(entry, now),
            EventPayload::WordVote(vote) => self.submit_word_vote(vote, now),
            EventPayload::MetaVote(vote) => self.submit_meta_vote(vote, now),
            EventPayload::TurnChange(_) | EventPayload::Guess(_) => Err(GameError::invalid(
                "Turn changes and guesses are produced by the server",
            )),
        }
    }

    fn apply_guess(
        &mut self,
        word: &str,
        source: GuessSource,
        now: DateTime<Utc>,
    ) -> GameResult<GuessEffect> {
        let effect = self.machine.guess_word(word, now)?;
        self.consensus.retire_word(&effect.word);
        self.history.push(TurnRecord::Guess {
            team: effect.team,
            word: effect.word.clone(),
            card: effect.card,
            outcome: effect.outcome,
            source,
            at: now,
        });
        self.log(EventEnvelope::guess(
            effect.team,
            GuessMade {
                word: effect.word.clone(),
                card: effect.card,
                outcome: effect.outcome,
                source,
            },
            now,
        ));
        tracing::info!(
            game_id = %self.id(),
            team = %effect.team,
            word = %effect.word,
            outcome = ?effect.outcome,
            "Word revealed"
        );

        match &effect.transition {
            Some(transition) => self.apply_transition(transition.clone()),
            None => {
                let (poll_id, created) =
                    self.meta
                        .open_poll(effect.team, self.machine.generation(), now);
                if created {
                    tracing::debug!(%poll_id, "Meta decision opened after correct guess");
                }
            }
        }
        Ok(effect)
    }

    fn apply_transition(&mut self, transition: Transition) {
        let team = transition
            .from
            .active_team()
            .or_else(|| transition.to.winner())
            .unwrap_or(Team::Red);
        self.history.push(TurnRecord::Transition {
            from: transition.from,
            to: transition.to,
            cause: transition.cause.clone(),
            generation: transition.generation,
            at: transition.at,
        });
        self.log(EventEnvelope::turn_change(
            team,
            TurnChange {
                from: transition.from,
                to: transition.to,
                cause: transition.cause.clone(),
                generation: transition.generation,
            },
            transition.at,
        ));

        if transition.to.is_terminal() {
            self.meta.discard_all();
            self.consensus.reset(None);
            tracing::info!(game_id = %self.id(), result = ?transition.to, "Game finished");
        } else if transition.is_switch() {
            if let Some(outgoing) = transition.from.active_team() {
                self.meta.discard(outgoing);
            }
            self.consensus.reset(transition.to.active_team());
        }
    }

    fn log(&mut self, envelope: EventEnvelope) -> Observation {
        let id = envelope.id();
        let observation = self.reconciler.observe(envelope, EventSource::Local);
        if !matches!(observation, Observation::Duplicate { .. }) {
            if let Some(stored) = self.reconciler.get(&id) {
                self.outbox.push(stored.clone());
            }
        }
        observation
    }

    pub fn snapshot(&self, now: DateTime<Utc>) -> GameSnapshot {
        let game = self.machine.game();
        let clock = &game.clock;
        let open_poll = game
            .turn
            .active_team()
            .and_then(|t| self.meta.open_poll_for(t))
            .map(PollView::from);
        GameSnapshot {
            game_id: game.id.clone(),
            turn: game.turn,
            scores: game.scores,
            cards: game
                .cards
                .iter()
                .map(|c| CardView {
                    word: c.word.clone(),
                    kind: c.kind,
                    revealed: game.is_revealed(&c.word),
                })
                .collect(),
            assassin: game.assassin().cloned(),
            revealed: game.revealed.clone(),
            clue: game.clue.clone(),
            generation: clock.generation(),
            turn_started_at: clock.started_at(),
            turn_duration_secs: clock.duration().as_secs(),
            turn_deadline: clock.deadline(),
            remaining_ms: clock.remaining(now).as_millis() as u64,
            server_now: now,
            open_poll,
            word_tallies: self.consensus.tallies(),
            players: self.players.values().cloned().collect(),
            history: self.history.clone(),
            events: self.reconciler.ordered(),
            last_seq: self.reconciler.last_seq(),
        }
    }
}

fn status_for(observation: Observation) -> SubmitStatus {
    match observation {
        Observation::New { seq } | Observation::Superseded { seq } => SubmitStatus::Recorded { seq },
        Observation::Enriched { seq } => SubmitStatus::Duplicate {
            seq,
            enriched: true,
        },
        Observation::Duplicate { seq } => SubmitStatus::Duplicate {
            seq,
            enriched: false,
        },
    }
}
