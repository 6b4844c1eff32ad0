use super::machine::GameStateMachine;
use super::words::default_words;
use super::{AppState, GameHandle, GameSession};
use crate::types::*;
use chrono::Utc;
use std::sync::Arc;

/// Options for a new game; unset fields use the server defaults
#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct NewGame {
    pub words: Option<Vec<String>>,
    pub turn_seconds: Option<u64>,
    pub starting_team: Option<Team>,
}

impl AppState {
    /// Deal a board and register the game
    pub async fn create_game(&self, options: NewGame) -> GameResult<Arc<GameHandle>> {
        let now = Utc::now();
        let mut config = self.config.game.clone();
        if let Some(secs) = options.turn_seconds {
            if secs == 0 {
                return Err(GameError::invalid("Turn must last at least one second"));
            }
            if secs > MAX_TURN_SECONDS {
                return Err(GameError::invalid(format!(
                    "Turn may last at most {} seconds",
                    MAX_TURN_SECONDS
                )));
            }
            config.turn_seconds = secs;
        }
        if let Some(team) = options.starting_team {
            config.starting_team = team;
        }
        let words = options.words.unwrap_or_else(default_words);

        let id = ulid::Ulid::new().to_string();
        let machine = GameStateMachine::new(id.clone(), &words, config, now)?;
        let handle = Arc::new(GameHandle::new(GameSession::new(machine), now));

        self.games.write().await.insert(id.clone(), handle.clone());
        tracing::info!(game_id = %id, "Game created");
        Ok(handle)
    }

    pub async fn get_game(&self, id: &str) -> Option<Arc<GameHandle>> {
        self.games.read().await.get(id).cloned()
    }

    pub async fn require_game(&self, id: &str) -> GameResult<Arc<GameHandle>> {
        self.get_game(id)
            .await
            .ok_or_else(|| GameError::NotFound(format!("Game {}", id)))
    }

    pub async fn list_games(&self) -> Vec<Arc<GameHandle>> {
        self.games.read().await.values().cloned().collect()
    }

    /// Host teardown: stop the game's agents and forget it
    pub async fn remove_game(&self, id: &str) -> GameResult<()> {
        let removed = self.games.write().await.remove(id);
        if removed.is_none() {
            return Err(GameError::NotFound(format!("Game {}", id)));
        }
        let tasks = self.agent_tasks.write().await.remove(id).unwrap_or_default();
        for task in &tasks {
            task.abort();
        }
        tracing::info!(game_id = %id, agents = tasks.len(), "Game removed");
        Ok(())
    }
}
