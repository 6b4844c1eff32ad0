use super::{AppState, GameHandle};
use crate::agent::{agent_name, AgentCollaborator, AgentRunner, LlmAgent};
use crate::types::*;
use rand::Rng;
use serde::Deserialize;
use std::sync::Arc;

/// Safe character set for short codes (excludes 0/O, 1/I/L to avoid confusion)
const CODE_CHARS: &[u8] = b"ABCDEFGHJKMNPQRSTUVWXYZ23456789";
const CODE_LENGTH: usize = 5;

/// Generate a random short code (5 characters)
fn generate_short_code() -> String {
    let mut rng = rand::rng();
    (0..CODE_LENGTH)
        .map(|_| CODE_CHARS[rng.random_range(0..CODE_CHARS.len())] as char)
        .collect()
}

/// Seat request. `agent_model` set means "seat an automated player";
/// an empty string picks the configured default model.
#[derive(Debug, Clone, Deserialize)]
pub struct JoinRequest {
    #[serde(default)]
    pub player_id: Option<PlayerId>,
    #[serde(default)]
    pub display_name: Option<String>,
    pub team: Team,
    pub position: Position,
    #[serde(default)]
    pub agent_model: Option<String>,
}

impl AppState {
    /// Seat a player. Human players get a short code as their id (which is
    /// also their connection token) unless they bring one.
    pub async fn join_player(&self, game_id: &str, request: JoinRequest) -> GameResult<Player> {
        let handle = self.require_game(game_id).await?;

        if let Some(model) = request.agent_model.clone() {
            let llm = self
                .llm
                .clone()
                .ok_or_else(|| GameError::invalid("No LLM provider is configured"))?;
            let model_id = Some(model.trim().to_string())
                .filter(|m| !m.is_empty())
                .or_else(|| self.llm_config.default_model_id());
            let collaborator = LlmAgent::new(
                llm,
                model_id.clone(),
                self.llm_config.default_timeout,
                self.llm_config.default_max_tokens,
            );
            let model = model_id.unwrap_or_else(|| "default".to_string());
            return self
                .join_agent(&handle, request, model, Arc::new(collaborator))
                .await;
        }

        let player = Player {
            id: request
                .player_id
                .filter(|id| !id.trim().is_empty())
                .unwrap_or_else(generate_short_code),
            display_name: request
                .display_name
                .filter(|n| !n.trim().is_empty())
                .unwrap_or_else(|| "Anonymous".to_string()),
            role: PlayerRole::Human,
            team: request.team,
            position: request.position,
        };
        let player = handle.mutate(move |s, _| s.join(player)).await?;
        tracing::info!(
            game_id = %game_id,
            player_id = %player.id,
            team = %player.team,
            position = ?player.position,
            "Player joined"
        );
        Ok(player)
    }

    /// Seat an automated player driven by `collaborator` and start its runner
    pub async fn join_agent(
        &self,
        handle: &Arc<GameHandle>,
        request: JoinRequest,
        model: String,
        collaborator: Arc<dyn AgentCollaborator>,
    ) -> GameResult<Player> {
        let player = Player {
            id: request
                .player_id
                .unwrap_or_else(|| format!("agent-{}", ulid::Ulid::new())),
            display_name: request.display_name.unwrap_or_else(agent_name),
            role: PlayerRole::AutomatedAgent { model },
            team: request.team,
            position: request.position,
        };
        let player = handle.mutate(move |s, _| s.join(player)).await?;

        let task = AgentRunner::new(player.clone(), handle.clone(), collaborator, &self.config)
            .spawn();
        self.agent_tasks
            .write()
            .await
            .entry(handle.id().to_string())
            .or_default()
            .push(task);
        tracing::info!(
            game_id = %handle.id(),
            player_id = %player.id,
            name = %player.display_name,
            team = %player.team,
            position = ?player.position,
            "Agent joined"
        );
        Ok(player)
    }

    /// Number of agent tasks still running for a game
    pub async fn running_agents(&self, game_id: &str) -> usize {
        self.agent_tasks
            .read()
            .await
            .get(game_id)
            .map(|tasks| tasks.iter().filter(|t| !t.is_finished()).count())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{ClueSuggestion, DiscussionReply, GameContext, MetaDecision, WordDecision};
    use crate::llm::{LlmError, LlmResult};
    use crate::state::game::NewGame;
    use async_trait::async_trait;

    struct Silent;

    #[async_trait]
    impl AgentCollaborator for Silent {
        async fn get_clue(&self, _ctx: &GameContext) -> LlmResult<ClueSuggestion> {
            Err(LlmError::ConfigError("silent".to_string()))
        }

        async fn discuss(&self, _ctx: &GameContext) -> LlmResult<DiscussionReply> {
            Err(LlmError::ConfigError("silent".to_string()))
        }

        async fn vote_on_word(&self, _ctx: &GameContext, _word: &str) -> LlmResult<WordDecision> {
            Err(LlmError::ConfigError("silent".to_string()))
        }

        async fn vote_on_meta(&self, _ctx: &GameContext) -> LlmResult<MetaDecision> {
            Err(LlmError::ConfigError("silent".to_string()))
        }

        fn name(&self) -> &str {
            "silent"
        }
    }

    fn request(team: Team, position: Position) -> JoinRequest {
        JoinRequest {
            player_id: None,
            display_name: Some("Ada".to_string()),
            team,
            position,
            agent_model: None,
        }
    }

    #[test]
    fn test_short_code_alphabet() {
        let code = generate_short_code();
        assert_eq!(code.len(), CODE_LENGTH);
        assert!(code.bytes().all(|b| CODE_CHARS.contains(&b)));
    }

    #[tokio::test]
    async fn test_join_human_player() {
        let state = AppState::default();
        let handle = state.create_game(NewGame::default()).await.unwrap();

        let player = state
            .join_player(handle.id(), request(Team::Blue, Position::Operative))
            .await
            .unwrap();
        assert_eq!(player.display_name, "Ada");
        assert_eq!(player.role, PlayerRole::Human);
        assert_eq!(handle.snapshot().player(&player.id), Some(&player));

        let missing = state
            .join_player("nope", request(Team::Red, Position::Operative))
            .await;
        assert!(matches!(missing, Err(GameError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_agent_without_llm_is_rejected() {
        let state = AppState::default();
        let handle = state.create_game(NewGame::default()).await.unwrap();
        let mut req = request(Team::Red, Position::Operative);
        req.agent_model = Some(String::new());
        let result = state.join_player(handle.id(), req).await;
        assert!(matches!(result, Err(GameError::InvalidAction(_))));
    }

    #[tokio::test]
    async fn test_agent_tasks_stop_with_the_game() {
        let state = AppState::default();
        let handle = state.create_game(NewGame::default()).await.unwrap();
        let mut req = request(Team::Red, Position::Spymaster);
        req.display_name = None;
        let agent = state
            .join_agent(&handle, req, "silent".to_string(), Arc::new(Silent))
            .await
            .unwrap();
        assert!(matches!(agent.role, PlayerRole::AutomatedAgent { .. }));
        assert!(!agent.display_name.is_empty());
        assert_eq!(state.running_agents(handle.id()).await, 1);

        state.remove_game(handle.id()).await.unwrap();
        assert_eq!(state.running_agents(handle.id()).await, 0);
    }
}
