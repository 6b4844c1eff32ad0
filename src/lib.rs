// Public API for integration tests and potential library usage

pub mod abuse;
pub mod agent;
pub mod api;
pub mod auth;
pub mod config;
pub mod event;
pub mod llm;
pub mod protocol;
pub mod state;
pub mod types;
pub mod ws;

// Re-export broadcast for testing
pub mod broadcast;
