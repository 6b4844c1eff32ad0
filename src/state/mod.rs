pub mod clock;
pub mod consensus;
mod game;
pub mod machine;
pub mod meta;
mod player;
pub mod reconcile;
pub mod session;
pub mod words;

pub use game::NewGame;
pub use player::JoinRequest;
pub use session::{GameSession, GameSnapshot, SubmitStatus};

use crate::abuse::RateLimiter;
use crate::config::AppConfig;
use crate::event::EventEnvelope;
use crate::llm::{LlmConfig, LlmManager};
use crate::types::*;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, watch, Mutex, RwLock};
use tokio::task::JoinHandle;

/// Capacity of each game's push channel; slow subscribers see `Lagged`
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// One running game: a single-writer session plus its read and push channels
pub struct GameHandle {
    id: GameId,
    session: Mutex<GameSession>,
    snapshot_tx: watch::Sender<Arc<GameSnapshot>>,
    events_tx: broadcast::Sender<EventEnvelope>,
}

impl GameHandle {
    pub fn new(session: GameSession, now: DateTime<Utc>) -> Self {
        let id = session.id().to_string();
        let (snapshot_tx, _) = watch::channel(Arc::new(session.snapshot(now)));
        let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            id,
            session: Mutex::new(session),
            snapshot_tx,
            events_tx,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Apply one mutation at the current time
    pub async fn mutate<T>(
        &self,
        f: impl FnOnce(&mut GameSession, DateTime<Utc>) -> GameResult<T>,
    ) -> GameResult<T> {
        self.mutate_at(Utc::now(), f).await
    }

    /// Apply one mutation at `now`. Events it produced are pushed and a fresh
    /// snapshot is published before the lock is released, so subscribers see
    /// them in mutation order. The snapshot is published even when `f` fails:
    /// deadline enforcement may have changed the turn first.
    pub async fn mutate_at<T>(
        &self,
        now: DateTime<Utc>,
        f: impl FnOnce(&mut GameSession, DateTime<Utc>) -> GameResult<T>,
    ) -> GameResult<T> {
        let mut session = self.session.lock().await;
        let result = f(&mut session, now);
        for event in session.take_outbox() {
            // No subscribers is fine
            let _ = self.events_tx.send(event);
        }
        self.snapshot_tx
            .send_replace(Arc::new(session.snapshot(now)));
        result
    }

    /// Last published snapshot; never waits on the mutation lock
    pub fn snapshot(&self) -> Arc<GameSnapshot> {
        self.snapshot_tx.borrow().clone()
    }

    /// Last published snapshot with the remaining time recomputed for `now`
    pub fn snapshot_at(&self, now: DateTime<Utc>) -> GameSnapshot {
        self.snapshot().refreshed(now)
    }

    pub fn events_since(&self, since: u64) -> Vec<EventEnvelope> {
        self.snapshot()
            .events
            .iter()
            .filter(|e| e.seq > since)
            .cloned()
            .collect()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<EventEnvelope> {
        self.events_tx.subscribe()
    }

    pub fn subscribe_snapshots(&self) -> watch::Receiver<Arc<GameSnapshot>> {
        self.snapshot_tx.subscribe()
    }
}

/// Shared application state
pub struct AppState {
    pub games: RwLock<HashMap<GameId, Arc<GameHandle>>>,
    pub config: AppConfig,
    pub llm: Option<Arc<LlmManager>>,
    pub llm_config: LlmConfig,
    /// Per-player submission limiter (None = disabled)
    pub rate_limiter: Option<RateLimiter>,
    agent_tasks: RwLock<HashMap<GameId, Vec<JoinHandle<()>>>>,
}

impl AppState {
    pub fn new(config: AppConfig) -> Self {
        Self::new_with_llm(config, None, LlmConfig::default())
    }

    pub fn new_with_llm(
        config: AppConfig,
        llm: Option<LlmManager>,
        llm_config: LlmConfig,
    ) -> Self {
        Self {
            games: RwLock::new(HashMap::new()),
            config,
            llm: llm.map(Arc::new),
            llm_config,
            rate_limiter: None,
            agent_tasks: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_rate_limiter(mut self, limiter: Option<RateLimiter>) -> Self {
        self.rate_limiter = limiter;
        self
    }

    /// Returns false when the caller exceeded the submission rate
    pub async fn allow_submission(&self, player_id: &str) -> bool {
        match &self.rate_limiter {
            Some(limiter) => limiter.check(&format!("player:{}", player_id)).await,
            None => true,
        }
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new(AppConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::machine::tests::{at, fixed_cards};
    use crate::state::machine::GameStateMachine;

    fn handle() -> GameHandle {
        let machine = GameStateMachine::from_cards(
            "g1".to_string(),
            fixed_cards(),
            GameConfig::default(),
            at(0),
        );
        let mut session = GameSession::new(machine);
        for (id, position) in [("sm", Position::Spymaster), ("op", Position::Operative)] {
            session
                .join(Player {
                    id: id.to_string(),
                    display_name: id.to_string(),
                    role: PlayerRole::Human,
                    team: Team::Red,
                    position,
                })
                .unwrap();
        }
        GameHandle::new(session, at(0))
    }

    #[tokio::test]
    async fn test_mutation_publishes_events_and_snapshot() {
        let handle = handle();
        let mut events = handle.subscribe_events();
        let mut snapshots = handle.subscribe_snapshots();

        handle
            .mutate_at(at(5), |s, now| s.request_guess("N1", Some("op"), now))
            .await
            .unwrap();

        let guess = events.recv().await.unwrap();
        assert_eq!(guess.kind(), "guess");
        let change = events.recv().await.unwrap();
        assert_eq!(change.kind(), "turn_change");
        assert!(guess.seq < change.seq);

        assert!(snapshots.has_changed().unwrap());
        let snap = snapshots.borrow_and_update().clone();
        assert_eq!(snap.turn, TurnState::BlueTurn);
        assert_eq!(handle.events_since(guess.seq).len(), 1);
    }

    #[tokio::test]
    async fn test_failed_mutation_still_publishes_expiry() {
        let handle = handle();
        // the guess arrives after the deadline: the turn ends first, then the
        // guess is rejected because red is no longer active
        let result = handle
            .mutate_at(at(61), |s, now| s.request_guess("R0", Some("op"), now))
            .await;
        assert!(result.is_err());
        assert_eq!(handle.snapshot().turn, TurnState::BlueTurn);
        assert!(handle.snapshot().revealed.is_empty());
    }

    #[tokio::test]
    async fn test_snapshot_refresh_counts_down() {
        let handle = handle();
        assert_eq!(handle.snapshot_at(at(15)).remaining_ms, 45_000);
        assert_eq!(handle.snapshot_at(at(90)).remaining_ms, 0);
    }

    #[tokio::test]
    async fn test_submission_rate_limit() {
        let state = AppState::default().with_rate_limiter(Some(RateLimiter::new(
            2,
            std::time::Duration::from_secs(10),
        )));
        assert!(state.allow_submission("p").await);
        assert!(state.allow_submission("p").await);
        assert!(!state.allow_submission("p").await);
        assert!(state.allow_submission("q").await);
    }
}
