//! Authoritative per-turn countdown.
//!
//! Every reset bumps the turn generation. A timer fire carries the generation
//! it was armed for, so a fire that arrives after the turn already moved on is
//! recognised as stale and ignored.

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpiryCheck {
    /// Generation matches and the countdown has reached zero
    Due,
    /// Generation matches but time remains
    NotDue,
    /// Fire was armed for an earlier generation
    Stale { current: u64 },
    /// Clock no longer runs (game over)
    Stopped,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TurnClock {
    started_at: DateTime<Utc>,
    duration_ms: u64,
    generation: u64,
    running: bool,
}

impl TurnClock {
    pub fn new(duration: Duration, now: DateTime<Utc>) -> Self {
        Self {
            started_at: now,
            duration_ms: u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
            generation: 1,
            running: true,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn duration(&self) -> Duration {
        Duration::from_millis(self.duration_ms)
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Saturates at the latest representable instant
    pub fn deadline(&self) -> DateTime<Utc> {
        i64::try_from(self.duration_ms)
            .ok()
            .and_then(TimeDelta::try_milliseconds)
            .and_then(|delta| self.started_at.checked_add_signed(delta))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// `duration - (now - started_at)`, clamped at zero
    pub fn remaining(&self, now: DateTime<Utc>) -> Duration {
        if !self.running {
            return Duration::ZERO;
        }
        (self.deadline() - now).to_std().unwrap_or(Duration::ZERO)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.running && self.remaining(now).is_zero()
    }

    pub fn check(&self, generation: u64, now: DateTime<Utc>) -> ExpiryCheck {
        if !self.running {
            ExpiryCheck::Stopped
        } else if generation != self.generation {
            ExpiryCheck::Stale {
                current: self.generation,
            }
        } else if self.is_expired(now) {
            ExpiryCheck::Due
        } else {
            ExpiryCheck::NotDue
        }
    }

    /// Restart the countdown for a new turn (or a continued one).
    /// Returns the new generation.
    pub fn reset(&mut self, now: DateTime<Utc>) -> u64 {
        self.started_at = now;
        self.generation += 1;
        self.generation
    }

    pub fn stop(&mut self) {
        self.running = false;
        self.generation += 1;
    }
}
