//! HTTP API endpoints.
//!
//! The poll path (snapshot and event pickup), the submission surface for
//! clients that do not hold a socket, and the host game management routes.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::abuse::{self, AbuseConfig};
use crate::auth::{self, AuthConfig};
use crate::event::EventEnvelope;
use crate::llm::list_local_models;
use crate::protocol::{ClientMessage, ServerMessage};
use crate::state::{AppState, GameHandle, GameSnapshot, JoinRequest, NewGame};
use crate::types::*;
use crate::ws::{self, handlers, Connection};

/// Every route the server exposes
pub fn router(
    state: Arc<AppState>,
    auth_config: Arc<AuthConfig>,
    abuse_config: Arc<AbuseConfig>,
) -> Router {
    // Protected host routes (with HTTP Basic Auth)
    let host_routes = Router::new()
        .route("/api/host/games", post(create_game))
        .route("/api/host/games/{id}", axum::routing::delete(delete_game))
        .route("/api/host/games/{id}/players", post(join_player))
        .route("/api/host/games/{id}/force-turn", post(host_force_turn))
        .layer(middleware::from_fn_with_state(
            auth_config.clone(),
            auth::host_auth_middleware,
        ));

    let public_routes = Router::new()
        .route("/ws", get(ws::ws_handler))
        .route("/api/games", get(list_games))
        .route("/api/games/{id}/snapshot", get(get_snapshot))
        .route("/api/games/{id}/events", get(get_events))
        .route("/api/games/{id}/discussion", post(post_discussion))
        .route("/api/games/{id}/word-votes", post(post_word_vote))
        .route("/api/games/{id}/meta-votes", post(post_meta_vote))
        .route("/api/games/{id}/guess", post(post_guess))
        .route("/api/games/{id}/clue", post(post_clue))
        .route("/api/games/{id}/force-turn", post(post_force_turn))
        .route("/api/models", get(list_available_models))
        .layer(middleware::from_fn_with_state(
            auth_config,
            auth::host_ws_auth_middleware,
        ))
        .layer(middleware::from_fn_with_state(
            abuse_config,
            abuse::abuse_middleware,
        ));

    Router::new()
        .merge(public_routes)
        .merge(host_routes)
        .with_state(state)
}

/// Status code for a `ServerMessage::Error` code
fn status_for_code(code: &str) -> StatusCode {
    match code {
        "NOT_FOUND" => StatusCode::NOT_FOUND,
        "UNAUTHORIZED" => StatusCode::FORBIDDEN,
        "RATE_LIMITED" => StatusCode::TOO_MANY_REQUESTS,
        "STALE_TIMER" => StatusCode::CONFLICT,
        _ => StatusCode::BAD_REQUEST,
    }
}

fn error_response(e: GameError) -> Response {
    let status = status_for_code(e.code());
    (status, Json(ServerMessage::from(e))).into_response()
}

fn reply(msg: Option<ServerMessage>) -> Response {
    match msg {
        Some(ServerMessage::Error { code, msg }) => {
            let status = status_for_code(&code);
            (status, Json(ServerMessage::Error { code, msg })).into_response()
        }
        Some(msg) => Json(msg).into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    }
}

async fn game_or_404(state: &AppState, id: &str) -> Result<Arc<GameHandle>, Response> {
    state.require_game(id).await.map_err(error_response)
}

/// Run a client message on behalf of `player_id`, exactly as the socket would
async fn submit_as(
    state: &Arc<AppState>,
    game_id: &str,
    role: Role,
    player_id: Option<PlayerId>,
    msg: ClientMessage,
) -> Response {
    let game = match game_or_404(state, game_id).await {
        Ok(g) => g,
        Err(r) => return r,
    };
    let conn = Connection::new(game, role, player_id);
    reply(handlers::handle_message(msg, &conn, state).await)
}

#[derive(Debug, Clone, Serialize)]
pub struct GameSummary {
    pub game_id: GameId,
    pub turn: TurnState,
    pub scores: Scores,
    pub players: usize,
    pub last_seq: u64,
}

/// GET /api/games
pub async fn list_games(State(state): State<Arc<AppState>>) -> Json<Vec<GameSummary>> {
    let games = state
        .list_games()
        .await
        .into_iter()
        .map(|g| {
            let snap = g.snapshot();
            GameSummary {
                game_id: snap.game_id.clone(),
                turn: snap.turn,
                scores: snap.scores,
                players: snap.players.len(),
                last_seq: snap.last_seq,
            }
        })
        .collect();
    Json(games)
}

/// GET /api/games/{id}/snapshot
pub async fn get_snapshot(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<GameSnapshot>, Response> {
    let game = game_or_404(&state, &id).await?;
    Ok(Json(game.snapshot_at(Utc::now())))
}

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    #[serde(default)]
    pub since: u64,
}

#[derive(Debug, Serialize)]
pub struct EventsResponse {
    pub events: Vec<EventEnvelope>,
    pub last_seq: u64,
}

/// GET /api/games/{id}/events?since=<seq>
pub async fn get_events(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(query): Query<EventsQuery>,
) -> Result<Json<EventsResponse>, Response> {
    let game = game_or_404(&state, &id).await?;
    Ok(Json(EventsResponse {
        events: game.events_since(query.since),
        last_seq: game.snapshot().last_seq,
    }))
}

#[derive(Debug, Deserialize)]
pub struct DiscussionBody {
    pub player_id: PlayerId,
    pub message: String,
    #[serde(default)]
    pub suggestions: Vec<WordSuggestion>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

/// POST /api/games/{id}/discussion
pub async fn post_discussion(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<DiscussionBody>,
) -> Response {
    let msg = ClientMessage::SubmitDiscussion {
        message: body.message,
        suggestions: body.suggestions,
        timestamp: body.timestamp,
    };
    submit_as(&state, &id, Role::Player, Some(body.player_id), msg).await
}

#[derive(Debug, Deserialize)]
pub struct WordVoteBody {
    pub player_id: PlayerId,
    pub word: Word,
    pub approved: bool,
    #[serde(default = "full_confidence")]
    pub confidence: f64,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

fn full_confidence() -> f64 {
    1.0
}

/// POST /api/games/{id}/word-votes
pub async fn post_word_vote(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<WordVoteBody>,
) -> Response {
    let msg = ClientMessage::SubmitWordVote {
        word: body.word,
        approved: body.approved,
        confidence: body.confidence,
        timestamp: body.timestamp,
    };
    submit_as(&state, &id, Role::Player, Some(body.player_id), msg).await
}

#[derive(Debug, Deserialize)]
pub struct MetaVoteBody {
    pub player_id: PlayerId,
    pub poll_id: PollId,
    pub action: MetaAction,
    #[serde(default = "full_confidence")]
    pub confidence: f64,
    #[serde(default)]
    pub reasoning: Option<String>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

/// POST /api/games/{id}/meta-votes
pub async fn post_meta_vote(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<MetaVoteBody>,
) -> Response {
    let msg = ClientMessage::SubmitMetaVote {
        poll_id: body.poll_id,
        action: body.action,
        confidence: body.confidence,
        reasoning: body.reasoning,
        timestamp: body.timestamp,
    };
    submit_as(&state, &id, Role::Player, Some(body.player_id), msg).await
}

#[derive(Debug, Deserialize)]
pub struct GuessBody {
    pub player_id: PlayerId,
    pub word: Word,
}

/// POST /api/games/{id}/guess
pub async fn post_guess(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<GuessBody>,
) -> Response {
    let msg = ClientMessage::RequestGuess { word: body.word };
    submit_as(&state, &id, Role::Player, Some(body.player_id), msg).await
}

#[derive(Debug, Deserialize)]
pub struct ClueBody {
    pub player_id: PlayerId,
    pub word: String,
    pub number: u8,
}

/// POST /api/games/{id}/clue
pub async fn post_clue(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<ClueBody>,
) -> Response {
    let msg = ClientMessage::GiveClue {
        word: body.word,
        number: body.number,
    };
    submit_as(&state, &id, Role::Player, Some(body.player_id), msg).await
}

#[derive(Debug, Deserialize)]
pub struct ForceTurnBody {
    #[serde(default)]
    pub player_id: Option<PlayerId>,
    #[serde(default = "default_reason")]
    pub reason: String,
}

fn default_reason() -> String {
    "timeout".to_string()
}

/// POST /api/games/{id}/force-turn
///
/// Player request; only honoured once the turn clock has run out.
pub async fn post_force_turn(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<ForceTurnBody>,
) -> Response {
    let msg = ClientMessage::RequestTurnSwitch {
        reason: body.reason,
    };
    submit_as(&state, &id, Role::Player, body.player_id, msg).await
}

/// POST /api/host/games/{id}/force-turn
pub async fn host_force_turn(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<ForceTurnBody>,
) -> Response {
    let msg = ClientMessage::HostForceTurn {
        reason: body.reason,
    };
    submit_as(&state, &id, Role::Host, None, msg).await
}

/// POST /api/host/games
pub async fn create_game(
    State(state): State<Arc<AppState>>,
    body: Option<Json<NewGame>>,
) -> Result<(StatusCode, Json<GameSnapshot>), Response> {
    let options = body.map(|Json(b)| b).unwrap_or_default();
    let game = state.create_game(options).await.map_err(error_response)?;
    Ok((StatusCode::CREATED, Json(game.snapshot_at(Utc::now()))))
}

/// POST /api/host/games/{id}/players
pub async fn join_player(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(request): Json<JoinRequest>,
) -> Result<(StatusCode, Json<Player>), Response> {
    let player = state
        .join_player(&id, request)
        .await
        .map_err(error_response)?;
    Ok((StatusCode::CREATED, Json(player)))
}

/// DELETE /api/host/games/{id}
pub async fn delete_game(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Response {
    match state.remove_game(&id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => error_response(e),
    }
}

/// Response structure for available models
#[derive(Debug, Clone, Serialize)]
pub struct AvailableModelsResponse {
    pub openai_models: Vec<ModelInfo>,
    pub ollama_models: Vec<ModelInfo>,
    pub default_model: Option<String>,
}

/// Information about a single model
#[derive(Debug, Clone, Serialize)]
pub struct ModelInfo {
    /// Unique identifier in format "provider:model" (e.g., "openai:gpt-4o-mini")
    pub id: String,
    pub name: String,
}

/// Static list of OpenAI models to offer
const OPENAI_MODELS: &[&str] = &["gpt-4.1", "gpt-4o", "gpt-4o-mini"];

/// List models automated players can be seated with.
///
/// GET /api/models
pub async fn list_available_models(
    State(state): State<Arc<AppState>>,
) -> Json<AvailableModelsResponse> {
    let config = &state.llm_config;

    let openai_models: Vec<ModelInfo> = if config.openai_api_key.is_some() {
        OPENAI_MODELS
            .iter()
            .map(|name| ModelInfo {
                id: format!("openai:{}", name),
                name: name.to_string(),
            })
            .collect()
    } else {
        vec![]
    };

    let ollama_models: Vec<ModelInfo> = match &config.ollama_base_url {
        Some(base_url) => match list_local_models(base_url).await {
            Ok(models) => models
                .into_iter()
                .map(|name| ModelInfo {
                    id: format!("ollama:{}", name),
                    name,
                })
                .collect(),
            Err(e) => {
                tracing::warn!("Failed to list Ollama models: {}", e);
                vec![]
            }
        },
        None => vec![],
    };

    Json(AvailableModelsResponse {
        openai_models,
        ollama_models,
        default_model: config.default_model_id(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_map_to_statuses() {
        assert_eq!(status_for_code("NOT_FOUND"), StatusCode::NOT_FOUND);
        assert_eq!(status_for_code("RATE_LIMITED"), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(status_for_code("INVALID_ACTION"), StatusCode::BAD_REQUEST);
        assert_eq!(
            reply(Some(ServerMessage::error("UNAUTHORIZED", "no"))).status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(reply(None).status(), StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn test_http_vote_requires_seat() {
        let state = Arc::new(AppState::default());
        let game = state.create_game(NewGame::default()).await.unwrap();
        let word = game.snapshot().cards[0].word.clone();

        let response = post_word_vote(
            State(state.clone()),
            Path(game.id().to_string()),
            Json(WordVoteBody {
                player_id: "ghost".to_string(),
                word,
                approved: true,
                confidence: 1.0,
                timestamp: None,
            }),
        )
        .await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let missing = get_snapshot(State(state), Path("nope".to_string())).await;
        assert_eq!(missing.err().map(|r| r.status()), Some(StatusCode::NOT_FOUND));
    }
}
