use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use codenames::{
    abuse, api, auth, broadcast, config::AppConfig, llm, state::AppState, state::NewGame,
};

#[tokio::main]
async fn main() {
    // Load .env file if present (before any env var reads)
    if let Err(e) = dotenvy::dotenv() {
        // Not an error if .env doesn't exist, only log if it's a different issue
        if !matches!(e, dotenvy::Error::Io(_)) {
            eprintln!("Warning: Failed to load .env file: {}", e);
        }
    }

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "codenames=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Codenames...");

    let config = AppConfig::from_env();
    let auth_config = Arc::new(auth::AuthConfig::from_env());
    let abuse_config = Arc::new(abuse::AbuseConfig::from_env());

    // Initialize LLM providers
    let llm_config = llm::LlmConfig::from_env();
    let llm_manager = match llm_config.build_manager() {
        Ok(manager) => {
            tracing::info!("LLM providers initialized successfully");
            Some(manager)
        }
        Err(e) => {
            tracing::warn!(
                "Failed to initialize LLM providers: {}. Automated players will not be available.",
                e
            );
            None
        }
    };

    let addr = config.bind_addr;
    let state = Arc::new(
        AppState::new_with_llm(config, llm_manager, llm_config)
            .with_rate_limiter(abuse_config.submission_limiter.clone()),
    );

    // Start with one game so clients can connect without naming it
    match state.create_game(NewGame::default()).await {
        Ok(game) => tracing::info!(game_id = %game.id(), "Default game ready"),
        Err(e) => tracing::error!("Failed to create default game: {}", e),
    }

    broadcast::spawn_turn_clock_watcher(state.clone());
    broadcast::spawn_rate_limit_cleanup(
        [
            abuse_config.submission_limiter.clone(),
            abuse_config.connection_limiter.clone(),
        ]
        .into_iter()
        .flatten()
        .collect(),
    );

    let app = api::router(state, auth_config, abuse_config)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    tracing::info!("Listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    axum::serve(listener, app).await.unwrap();
}
