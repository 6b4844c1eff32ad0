//! Server configuration loaded from the environment

use crate::types::{GameConfig, QuorumPolicy, Team, MAX_TURN_SECONDS};
use std::net::SocketAddr;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    /// Defaults for newly created games
    pub game: GameConfig,
    /// How often automated agents poll the snapshot
    pub snapshot_poll_interval: Duration,
    /// Attempts per collaborator call before giving up
    pub agent_max_attempts: u32,
    pub agent_retry_base: Duration,
    pub agent_retry_cap: Duration,
    /// Tick of the turn clock watcher
    pub clock_tick: Duration,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 6574)),
            game: GameConfig::default(),
            snapshot_poll_interval: Duration::from_millis(2000),
            agent_max_attempts: 3,
            agent_retry_base: Duration::from_millis(500),
            agent_retry_cap: Duration::from_secs(8),
            clock_tick: Duration::from_millis(250),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
}

impl AppConfig {
    /// Load configuration from environment variables, falling back to defaults
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let quorum_defaults = QuorumPolicy::default();

        let bind_addr = match std::env::var("BIND_ADDR") {
            Ok(raw) => raw.trim().parse::<SocketAddr>().unwrap_or_else(|e| {
                tracing::warn!("Invalid BIND_ADDR {:?}: {}, using default", raw, e);
                defaults.bind_addr
            }),
            Err(_) => defaults.bind_addr,
        };

        let starting_team = match std::env::var("STARTING_TEAM").as_deref() {
            Ok("blue") | Ok("BLUE") => Team::Blue,
            _ => Team::Red,
        };

        let quorum = QuorumPolicy {
            accelerated_fraction: env_parse("WORD_QUORUM_ACCEL_FRACTION")
                .unwrap_or(quorum_defaults.accelerated_fraction),
            accelerated_min_confidence: env_parse("WORD_QUORUM_ACCEL_CONFIDENCE")
                .unwrap_or(quorum_defaults.accelerated_min_confidence),
            accelerated_min_voters: env_parse("WORD_QUORUM_ACCEL_MIN_VOTERS")
                .unwrap_or(quorum_defaults.accelerated_min_voters),
            dominant_fraction: env_parse("META_DOMINANT_FRACTION")
                .unwrap_or(quorum_defaults.dominant_fraction),
        };

        let config = Self {
            bind_addr,
            game: GameConfig {
                turn_seconds: env_parse("TURN_SECONDS")
                    .filter(|s| *s > 0 && *s <= MAX_TURN_SECONDS)
                    .unwrap_or(defaults.game.turn_seconds),
                starting_team,
                quorum,
            },
            snapshot_poll_interval: env_parse("SNAPSHOT_POLL_MS")
                .filter(|ms| *ms > 0)
                .map(Duration::from_millis)
                .unwrap_or(defaults.snapshot_poll_interval),
            agent_max_attempts: env_parse("AGENT_MAX_ATTEMPTS")
                .filter(|n| *n > 0)
                .unwrap_or(defaults.agent_max_attempts),
            ..defaults
        };

        tracing::info!(
            bind_addr = %config.bind_addr,
            turn_seconds = config.game.turn_seconds,
            starting_team = %config.game.starting_team,
            "Server config loaded"
        );
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn clear_env() {
        for key in [
            "BIND_ADDR",
            "TURN_SECONDS",
            "STARTING_TEAM",
            "WORD_QUORUM_ACCEL_FRACTION",
            "WORD_QUORUM_ACCEL_CONFIDENCE",
            "WORD_QUORUM_ACCEL_MIN_VOTERS",
            "META_DOMINANT_FRACTION",
            "SNAPSHOT_POLL_MS",
            "AGENT_MAX_ATTEMPTS",
        ] {
            std::env::remove_var(key);
        }
    }

    #[test]
    #[serial]
    fn test_defaults_without_env() {
        clear_env();
        let config = AppConfig::from_env();
        assert_eq!(config.bind_addr.port(), 6574);
        assert_eq!(config.game.turn_seconds, 60);
        assert_eq!(config.game.starting_team, Team::Red);
        assert_eq!(config.game.quorum.accelerated_min_voters, 2);
        assert_eq!(config.snapshot_poll_interval, Duration::from_millis(2000));
        assert_eq!(config.agent_max_attempts, 3);
    }

    #[test]
    #[serial]
    fn test_env_overrides() {
        clear_env();
        std::env::set_var("BIND_ADDR", "127.0.0.1:9000");
        std::env::set_var("TURN_SECONDS", "90");
        std::env::set_var("STARTING_TEAM", "blue");
        std::env::set_var("META_DOMINANT_FRACTION", "1.0");
        std::env::set_var("AGENT_MAX_ATTEMPTS", "0");
        let config = AppConfig::from_env();
        assert_eq!(config.bind_addr.to_string(), "127.0.0.1:9000");
        assert_eq!(config.game.turn_seconds, 90);
        assert_eq!(config.game.starting_team, Team::Blue);
        assert_eq!(config.game.quorum.dominant_fraction, 1.0);
        // zero attempts would never call the collaborator
        assert_eq!(config.agent_max_attempts, 3);
        clear_env();
    }

    #[test]
    #[serial]
    fn test_invalid_values_fall_back() {
        clear_env();
        std::env::set_var("BIND_ADDR", "not an address");
        std::env::set_var("TURN_SECONDS", "soon");
        let config = AppConfig::from_env();
        assert_eq!(config.bind_addr.port(), 6574);
        assert_eq!(config.game.turn_seconds, 60);
        clear_env();
    }

    #[test]
    #[serial]
    fn test_out_of_range_values_fall_back() {
        clear_env();
        std::env::set_var("TURN_SECONDS", "10000000000000");
        std::env::set_var("SNAPSHOT_POLL_MS", "0");
        let config = AppConfig::from_env();
        assert_eq!(config.game.turn_seconds, 60);
        assert_eq!(config.snapshot_poll_interval, Duration::from_millis(2000));
        clear_env();
    }
}
