use std::sync::Arc;

use anabranch_core::{
    processor::TaskProcessor,
    queue::TaskQueue,
    ticketing::{TicketSource, WebhookOutcome},
};
use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use chrono::Utc;
use serde_json::{json, Value};
use tower_http::trace::TraceLayer;

pub(crate) const SIGNATURE_HEADER: &str = "x-hub-signature";

pub(crate) struct AppState {
    pub queue: Arc<TaskQueue>,
    pub processor: Arc<TaskProcessor>,
    /// `None` when Jira ingestion is disabled.
    pub jira: Option<Arc<dyn TicketSource>>,
    pub agent_provider: String,
}

pub(crate) fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/status", get(status))
        .route("/webhooks/jira", post(jira_webhook))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ── Error helper ──────────────────────────────────────────────────────────

fn internal(e: impl std::fmt::Display) -> StatusCode {
    tracing::error!("internal error: {e}");
    StatusCode::INTERNAL_SERVER_ERROR
}

// ── Handlers ──────────────────────────────────────────────────────────────

async fn health() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

async fn status(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "running",
        "agentProvider": state.agent_provider,
        "timestamp": Utc::now().to_rfc3339(),
        "queue": {
            "length": state.queue.len(),
            "processing": state.processor.is_draining(),
        },
        "recentTasks": state.processor.history(),
    }))
}

async fn jira_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, StatusCode> {
    let Some(jira) = &state.jira else {
        return Err(StatusCode::NOT_FOUND);
    };
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok());

    let outcome = jira.handle_webhook(signature, &body).await.map_err(internal)?;
    let code = match &outcome {
        WebhookOutcome::Accepted { .. } => StatusCode::ACCEPTED,
        WebhookOutcome::Ignored { .. } => StatusCode::OK,
        WebhookOutcome::Rejected => {
            return Ok((
                StatusCode::UNAUTHORIZED,
                Json(json!({ "error": "invalid webhook signature" })),
            )
                .into_response())
        }
    };
    Ok((code, Json(outcome)).into_response())
}
