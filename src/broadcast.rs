//! Background tasks

use crate::abuse::RateLimiter;
use crate::state::{AppState, GameHandle};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;

/// Expire the game's turn if its published deadline has passed. Returns true
/// when the turn changed.
pub async fn check_deadline(game: &GameHandle, now: DateTime<Utc>) -> bool {
    let snapshot = game.snapshot();
    if snapshot.turn.is_terminal() || snapshot.turn_deadline > now {
        return false;
    }
    let generation = snapshot.generation;
    // A stale generation is a no-op inside the session
    game.mutate_at(now, |s, now| Ok(s.expire_turn(generation, now)))
        .await
        .unwrap_or(false)
}

/// Spawn a background task that ends turns whose clock ran out, even when
/// nobody is submitting anything
pub fn spawn_turn_clock_watcher(state: Arc<AppState>) {
    let tick = state.config.clock_tick;
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(tick).await;

            let now = Utc::now();
            for game in state.list_games().await {
                if check_deadline(&game, now).await {
                    tracing::debug!(game_id = %game.id(), "Turn clock expired");
                }
            }
        }
    });
}

/// Spawn a background task that trims rate-limit tables
pub fn spawn_rate_limit_cleanup(limiters: Vec<RateLimiter>) {
    if limiters.is_empty() {
        return;
    }
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(Duration::from_secs(60)).await;
            for limiter in &limiters {
                let remaining = limiter.cleanup().await;
                tracing::trace!(remaining, "Rate limiter cleaned up");
            }
        }
    });
}
