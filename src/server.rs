use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{body::Bytes, extract::State, response::IntoResponse, routing::get, Json, Router};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::config::ConfigStore;
use crate::grafana::AnnotationSender;
use crate::health;
use crate::pipeline::process_command;
use crate::reply::{CommandResponse, METHOD_NOT_ALLOWED};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ConfigStore>,
    pub sender: Arc<dyn AnnotationSender>,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(command_get).post(command_post))
        .route("/healthz", get(healthz))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn command_get(State(state): State<AppState>) -> Json<CommandResponse> {
    Json(CommandResponse::ephemeral(
        &state.config.current(),
        METHOD_NOT_ALLOWED,
    ))
}

// Always 200: failures travel in the reply text.
async fn command_post(State(state): State<AppState>, body: Bytes) -> Json<CommandResponse> {
    let config = state.config.current();
    let text = process_command(&body, &config, state.sender.as_ref()).await;
    Json(CommandResponse::ephemeral(&config, text))
}

async fn healthz(State(state): State<AppState>) -> impl IntoResponse {
    let report = health::check(&state.config.current()).await;
    (report.status, report.body)
}

/// Bind the configured address and serve until the process stops.
pub async fn run(state: AppState) -> Result<()> {
    let addr = state.config.current().listen_address();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {addr}"))?;

    info!("Listening on {}", addr);

    axum::serve(listener, build_router(state))
        .await
        .context("Server error")?;

    Ok(())
}
