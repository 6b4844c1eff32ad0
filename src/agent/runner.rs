use super::retry::{with_retry, Backoff, RetryPolicy};
use super::{AgentCollaborator, GameContext};
use crate::config::AppConfig;
use crate::event::{EventEnvelope, EventPayload};
use crate::state::reconcile::{EventReconciler, EventSource};
use crate::state::session::{GameSnapshot, SubmitStatus};
use crate::state::GameHandle;
use crate::types::*;
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// Suggestions below this confidence are not worth a vote
const MIN_CANDIDATE_CONFIDENCE: f64 = 0.4;
/// Word votes cast per pass
const VOTES_PER_PASS: usize = 2;

/// What this agent already did, so redelivered state never causes a repeat
#[derive(Debug, Default)]
struct Memory {
    clue_generation: Option<u64>,
    discussed: HashSet<(u64, Word)>,
    voted_words: HashSet<(u64, Word)>,
    voted_polls: HashSet<PollId>,
    /// Words suggested by the team this turn, with the best confidence seen
    candidates: HashMap<Word, f64>,
}

/// Drives one automated player. Observes the game through the push
/// subscription and the snapshot poll, merged by an [`EventReconciler`].
pub struct AgentRunner {
    player: Player,
    handle: Arc<GameHandle>,
    collaborator: Arc<dyn AgentCollaborator>,
    retry: RetryPolicy,
    resubscribe: RetryPolicy,
    poll_interval: Duration,
    reconciler: EventReconciler,
    poll_watermark: u64,
    memory: Memory,
}

impl AgentRunner {
    pub fn new(
        player: Player,
        handle: Arc<GameHandle>,
        collaborator: Arc<dyn AgentCollaborator>,
        config: &AppConfig,
    ) -> Self {
        Self {
            player,
            handle,
            collaborator,
            retry: RetryPolicy {
                max_attempts: config.agent_max_attempts,
                base: config.agent_retry_base,
                cap: config.agent_retry_cap,
            },
            resubscribe: RetryPolicy {
                max_attempts: u32::MAX,
                base: Duration::from_millis(250),
                cap: config.agent_retry_cap,
            },
            poll_interval: config.snapshot_poll_interval,
            reconciler: EventReconciler::new(),
            poll_watermark: 0,
            memory: Memory::default(),
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    pub async fn run(mut self) {
        tracing::info!(
            game_id = %self.handle.id(),
            player_id = %self.player.id,
            collaborator = self.collaborator.name(),
            "Agent started"
        );
        let mut events = Some(self.handle.subscribe_events());
        let mut backoff = Backoff::new(self.resubscribe);
        let mut resubscribe_at = Instant::now();
        let mut poll = tokio::time::interval(self.poll_interval);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let keep_going = tokio::select! {
                received = next_event(&mut events) => match received {
                    Ok(envelope) => {
                        backoff.reset();
                        self.observe(envelope, EventSource::Push);
                        self.act_now().await
                    }
                    Err(e) => {
                        let delay = backoff.next_delay();
                        tracing::warn!(
                            player_id = %self.player.id,
                            delay_ms = delay.as_millis() as u64,
                            "Event stream gap ({}), relying on polls until resubscribed",
                            e
                        );
                        events = None;
                        resubscribe_at = Instant::now() + delay;
                        self.step().await
                    }
                },
                _ = tokio::time::sleep_until(resubscribe_at), if events.is_none() => {
                    tracing::debug!(player_id = %self.player.id, "Resubscribed to game events");
                    events = Some(self.handle.subscribe_events());
                    true
                }
                _ = poll.tick() => self.step().await,
            };
            if !keep_going {
                break;
            }
        }

        tracing::info!(
            game_id = %self.handle.id(),
            player_id = %self.player.id,
            "Agent finished"
        );
    }

    /// One poll-and-act pass. Returns false once the game is over.
    pub async fn step(&mut self) -> bool {
        self.poll();
        self.act_now().await
    }

    fn poll(&mut self) {
        for envelope in self.handle.events_since(self.poll_watermark) {
            self.poll_watermark = self.poll_watermark.max(envelope.seq);
            self.observe(envelope, EventSource::Poll);
        }
    }

    fn observe(&mut self, envelope: EventEnvelope, source: EventSource) {
        let observation = self.reconciler.observe(envelope.clone(), source);
        if !observation.should_apply() {
            return;
        }
        match envelope.payload {
            EventPayload::Discussion(entry) if entry.team == self.player.team => {
                self.remember_suggestions(&entry.suggestions);
            }
            EventPayload::Guess(guess) => {
                self.memory.candidates.remove(&guess.word);
            }
            EventPayload::TurnChange(_) => self.memory.candidates.clear(),
            _ => {}
        }
    }

    fn remember_suggestions(&mut self, suggestions: &[WordSuggestion]) {
        for s in suggestions {
            let best = self
                .memory
                .candidates
                .entry(s.word.to_uppercase())
                .or_insert(0.0);
            *best = best.max(s.confidence);
        }
    }

    async fn act_now(&mut self) -> bool {
        let snapshot = self.handle.snapshot_at(Utc::now());
        if snapshot.turn.is_terminal() {
            return false;
        }
        if snapshot.active_team() == Some(self.player.team) {
            match self.player.position {
                Position::Spymaster => self.give_clue(&snapshot).await,
                Position::Operative => self.operate(&snapshot).await,
            }
        }
        true
    }

    fn context(&self, snapshot: &GameSnapshot) -> GameContext {
        let discussion = self
            .reconciler
            .ordered()
            .into_iter()
            .filter_map(|e| match e.payload {
                EventPayload::Discussion(d) if d.team == self.player.team => Some(d),
                _ => None,
            })
            .collect();
        GameContext::new(snapshot, &self.player, discussion)
    }

    async fn give_clue(&mut self, snapshot: &GameSnapshot) {
        if snapshot.clue.is_some() || self.memory.clue_generation == Some(snapshot.generation) {
            return;
        }
        self.memory.clue_generation = Some(snapshot.generation);

        let ctx = self.context(snapshot);
        let collaborator = &*self.collaborator;
        let ctx_ref = &ctx;
        let clue = match with_retry(&self.retry, "get_clue", move || {
            collaborator.get_clue(ctx_ref)
        })
        .await
        {
            Ok(clue) => clue,
            Err(e) => {
                tracing::warn!(player_id = %self.player.id, "Giving up on clue: {}", e);
                return;
            }
        };

        let team = self.player.team;
        let id = self.player.id.clone();
        let result = self
            .handle
            .mutate(move |s, now| s.give_clue(team, &id, &clue.word, clue.number.min(9), now))
            .await;
        match result {
            Ok(clue) => tracing::info!(
                player_id = %self.player.id,
                clue = %clue.word,
                number = clue.number,
                "Agent gave clue"
            ),
            Err(e) => tracing::debug!(player_id = %self.player.id, "Clue rejected: {}", e),
        }
    }

    async fn operate(&mut self, snapshot: &GameSnapshot) {
        if let Some(poll) = snapshot
            .open_poll
            .as_ref()
            .filter(|p| p.team == self.player.team)
        {
            if self.memory.voted_polls.insert(poll.id.clone()) {
                self.vote_meta(snapshot, poll.id.clone()).await;
            }
            return;
        }

        let Some(clue) = &snapshot.clue else {
            return;
        };
        if self
            .memory
            .discussed
            .insert((snapshot.generation, clue.word.clone()))
        {
            self.discuss(snapshot).await;
        }
        self.vote_words(snapshot).await;
    }

    async fn discuss(&mut self, snapshot: &GameSnapshot) {
        let ctx = self.context(snapshot);
        let collaborator = &*self.collaborator;
        let ctx_ref = &ctx;
        let reply = match with_retry(&self.retry, "discuss", move || {
            collaborator.discuss(ctx_ref)
        })
        .await
        {
            Ok(reply) => reply,
            Err(e) => {
                tracing::warn!(player_id = %self.player.id, "Skipping discussion: {}", e);
                return;
            }
        };
        self.remember_suggestions(&reply.suggestions);

        let entry = DiscussionEntry {
            team: self.player.team,
            author: self.player.id.clone(),
            message: reply.message,
            suggestions: reply.suggestions,
            timestamp: Utc::now(),
            voting_context: Some(false),
        };
        if let Err(e) = self
            .handle
            .mutate(move |s, now| s.submit_discussion(entry, now))
            .await
        {
            tracing::debug!(player_id = %self.player.id, "Discussion rejected: {}", e);
        }
    }

    async fn vote_words(&mut self, snapshot: &GameSnapshot) {
        let mut candidates: Vec<(Word, f64)> = self
            .memory
            .candidates
            .iter()
            .filter(|(word, confidence)| {
                **confidence >= MIN_CANDIDATE_CONFIDENCE
                    && !self
                        .memory
                        .voted_words
                        .contains(&(snapshot.generation, (*word).clone()))
                    && snapshot
                        .cards
                        .iter()
                        .any(|c| !c.revealed && c.word.eq_ignore_ascii_case(word))
            })
            .map(|(w, c)| (w.clone(), *c))
            .collect();
        candidates.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        candidates.truncate(VOTES_PER_PASS);

        for (word, _) in candidates {
            self.memory
                .voted_words
                .insert((snapshot.generation, word.clone()));
            let ctx = self.context(snapshot);
            let collaborator = &*self.collaborator;
            let ctx_ref = &ctx;
            let word_ref = word.as_str();
            let decision = match with_retry(&self.retry, "vote_on_word", move || {
                collaborator.vote_on_word(ctx_ref, word_ref)
            })
            .await
            {
                Ok(decision) => decision,
                Err(e) => {
                    tracing::warn!(player_id = %self.player.id, %word, "Skipping word vote: {}", e);
                    continue;
                }
            };

            let vote = WordVote {
                team: self.player.team,
                voter: self.player.id.clone(),
                word: word.clone(),
                approved: decision.approved,
                confidence: decision.confidence,
                timestamp: Utc::now(),
            };
            match self
                .handle
                .mutate(move |s, now| s.submit_word_vote(vote, now))
                .await
            {
                Ok(SubmitStatus::Guessed { word, .. }) => {
                    tracing::info!(player_id = %self.player.id, %word, "Agent vote completed quorum");
                    return;
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::debug!(player_id = %self.player.id, %word, "Word vote rejected: {}", e);
                    return;
                }
            }
        }
    }

    async fn vote_meta(&mut self, snapshot: &GameSnapshot, poll_id: PollId) {
        let ctx = self.context(snapshot);
        let collaborator = &*self.collaborator;
        let ctx_ref = &ctx;
        let decision = match with_retry(&self.retry, "vote_on_meta", move || {
            collaborator.vote_on_meta(ctx_ref)
        })
        .await
        {
            Ok(decision) => decision,
            Err(e) => {
                tracing::warn!(player_id = %self.player.id, %poll_id, "Skipping meta vote: {}", e);
                return;
            }
        };

        let vote = MetaVote {
            poll_id,
            team: self.player.team,
            voter: self.player.id.clone(),
            action: decision.action,
            confidence: decision.confidence,
            timestamp: Utc::now(),
            reasoning: decision.reasoning,
        };
        if let Err(e) = self
            .handle
            .mutate(move |s, now| s.submit_meta_vote(vote, now))
            .await
        {
            tracing::debug!(player_id = %self.player.id, "Meta vote rejected: {}", e);
        }
    }
}

async fn next_event(
    rx: &mut Option<broadcast::Receiver<EventEnvelope>>,
) -> Result<EventEnvelope, RecvError> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{ClueSuggestion, DiscussionReply, MetaDecision, WordDecision};
    use crate::llm::{LlmError, LlmResult};
    use crate::state::machine::tests::fixed_cards;
    use crate::state::machine::GameStateMachine;
    use crate::state::GameSession;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Always suggests R0 and approves everything
    #[derive(Default)]
    struct Scripted {
        fail: bool,
        calls: AtomicU32,
    }

    impl Scripted {
        fn check(&self) -> LlmResult<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(LlmError::Timeout(Duration::from_millis(1)))
            } else {
                Ok(())
            }
        }
    }

    #[async_trait]
    impl AgentCollaborator for Scripted {
        async fn get_clue(&self, _ctx: &GameContext) -> LlmResult<ClueSuggestion> {
            self.check()?;
            Ok(ClueSuggestion {
                word: "ocean".to_string(),
                number: 1,
            })
        }

        async fn discuss(&self, _ctx: &GameContext) -> LlmResult<DiscussionReply> {
            self.check()?;
            Ok(DiscussionReply {
                message: "R0 for sure".to_string(),
                suggestions: vec![WordSuggestion {
                    word: "R0".to_string(),
                    confidence: 0.9,
                }],
            })
        }

        async fn vote_on_word(&self, _ctx: &GameContext, _word: &str) -> LlmResult<WordDecision> {
            self.check()?;
            Ok(WordDecision {
                approved: true,
                confidence: 0.9,
            })
        }

        async fn vote_on_meta(&self, _ctx: &GameContext) -> LlmResult<MetaDecision> {
            self.check()?;
            Ok(MetaDecision {
                action: MetaAction::EndTurn,
                confidence: 0.7,
                reasoning: Some("one is enough".to_string()),
            })
        }

        fn name(&self) -> &str {
            "scripted"
        }
    }

    fn config() -> AppConfig {
        AppConfig {
            agent_retry_base: Duration::from_millis(1),
            agent_retry_cap: Duration::from_millis(2),
            snapshot_poll_interval: Duration::from_millis(10),
            ..AppConfig::default()
        }
    }

    fn bot(id: &str, position: Position) -> Player {
        Player {
            id: id.to_string(),
            display_name: id.to_string(),
            role: PlayerRole::AutomatedAgent {
                model: "scripted".to_string(),
            },
            team: Team::Red,
            position,
        }
    }

    fn game(players: &[Player]) -> Arc<GameHandle> {
        let now = Utc::now();
        let machine =
            GameStateMachine::from_cards("g".to_string(), fixed_cards(), GameConfig::default(), now);
        let mut session = GameSession::new(machine);
        for p in players {
            session.join(p.clone()).unwrap();
        }
        Arc::new(GameHandle::new(session, now))
    }

    fn runner(
        player: Player,
        handle: &Arc<GameHandle>,
        collaborator: Arc<Scripted>,
    ) -> AgentRunner {
        AgentRunner::new(player, handle.clone(), collaborator, &config())
    }

    #[tokio::test]
    async fn test_spymaster_gives_one_clue_per_turn() {
        let sm = bot("sm", Position::Spymaster);
        let handle = game(&[sm.clone()]);
        let collaborator = Arc::new(Scripted::default());
        let mut agent = runner(sm, &handle, collaborator.clone());

        assert!(agent.step().await);
        assert!(agent.step().await);
        let snap = handle.snapshot();
        assert_eq!(snap.clue.as_ref().unwrap().word, "OCEAN");
        assert_eq!(collaborator.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_operative_discusses_votes_and_decides() {
        let sm = bot("sm", Position::Spymaster);
        let op = bot("op", Position::Operative);
        let handle = game(&[sm.clone(), op.clone()]);
        let collaborator = Arc::new(Scripted::default());
        let mut spymaster = runner(sm, &handle, collaborator.clone());
        let mut operative = runner(op, &handle, collaborator.clone());

        spymaster.step().await;
        // discuss, then the lone operative's approval is a quorum
        operative.step().await;
        let snap = handle.snapshot();
        assert_eq!(snap.revealed, vec!["R0".to_string()]);
        assert!(snap.open_poll.is_some());

        // the poll resolves to end_turn with the only vote
        operative.step().await;
        let snap = handle.snapshot();
        assert_eq!(snap.turn, TurnState::BlueTurn);
        assert!(snap.events.iter().any(|e| matches!(
            &e.payload,
            EventPayload::MetaVote(v) if v.reasoning.as_deref() == Some("one is enough")
        )));

        // nothing to do on the other team's turn
        let calls = collaborator.calls.load(Ordering::SeqCst);
        operative.step().await;
        assert_eq!(collaborator.calls.load(Ordering::SeqCst), calls);
    }

    #[tokio::test]
    async fn test_failing_collaborator_is_retried_then_skipped() {
        let sm = bot("sm", Position::Spymaster);
        let handle = game(&[sm.clone()]);
        let collaborator = Arc::new(Scripted {
            fail: true,
            ..Default::default()
        });
        let mut agent = runner(sm, &handle, collaborator.clone());

        assert!(agent.step().await);
        assert_eq!(collaborator.calls.load(Ordering::SeqCst), 3);
        assert!(handle.snapshot().clue.is_none());
        assert_eq!(handle.snapshot().turn, TurnState::RedTurn);
    }

    #[tokio::test]
    async fn test_push_and_poll_apply_once() {
        let op = bot("op", Position::Operative);
        let handle = game(&[op.clone()]);
        let mut agent = runner(op, &handle, Arc::new(Scripted::default()));
        let mut rx = handle.subscribe_events();

        handle
            .mutate(|s, now| {
                s.submit_discussion(
                    DiscussionEntry {
                        team: Team::Red,
                        author: "op".to_string(),
                        message: "maybe R3".to_string(),
                        suggestions: vec![WordSuggestion {
                            word: "R3".to_string(),
                            confidence: 0.5,
                        }],
                        timestamp: now,
                        voting_context: None,
                    },
                    now,
                )
            })
            .await
            .unwrap();

        let pushed = rx.recv().await.unwrap();
        agent.observe(pushed, EventSource::Push);
        agent.poll();
        assert_eq!(agent.reconciler.len(), 1);
        assert_eq!(agent.memory.candidates.get("R3"), Some(&0.5));
    }

    #[tokio::test]
    async fn test_spawned_runner_stops_when_game_ends() {
        let sm = bot("sm", Position::Spymaster);
        let handle = game(&[sm.clone()]);
        let task = runner(sm, &handle, Arc::new(Scripted::default())).spawn();

        tokio::time::timeout(Duration::from_secs(2), async {
            while handle.snapshot().clue.is_none() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        handle
            .mutate(|s, now| s.request_guess("X", None, now))
            .await
            .unwrap();
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .unwrap()
            .unwrap();
    }
}
