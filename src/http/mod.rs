//! The HTTP surface: five routes serving two wire protocols over one
//! local listener.

pub mod error;
pub mod handlers;

use crate::auth::OAuthManager;
use crate::thinking_cache::ThinkingCache;
use crate::upstream::anthropic_client::AnthropicClient;
use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub oauth: Arc<OAuthManager>,
    pub anthropic: Arc<AnthropicClient>,
    pub thinking_cache: Arc<ThinkingCache>,
}

impl AppState {
    pub fn new(oauth: Arc<OAuthManager>) -> Self {
        Self {
            anthropic: Arc::new(AnthropicClient::new(oauth.clone())),
            oauth,
            thinking_cache: Arc::new(ThinkingCache::default()),
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(handlers::healthz))
        .route("/v1/models", get(handlers::list_models))
        .route("/auth/status", get(handlers::auth_status))
        .route("/v1/messages", post(handlers::messages))
        .route("/v1/chat/completions", post(handlers::chat_completions))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
