//! Health check endpoint

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use super::AppContext;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub module: String,
    pub version: String,
    pub git_hash: String,
    /// State of the realtime service (`unstarted`, `running`, `stopped`)
    pub service_state: String,
    /// Currently connected live viewers
    pub subscribers: usize,
    /// Whether the upstream account is logged in
    pub authorized: bool,
}

/// GET /health
pub async fn health(State(ctx): State<AppContext>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        module: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        git_hash: env!("GIT_HASH").to_string(),
        service_state: ctx.realtime.state().await.as_str().to_string(),
        subscribers: ctx.realtime.subscriber_count().await,
        authorized: ctx.oauth.has_token().await,
    })
}
