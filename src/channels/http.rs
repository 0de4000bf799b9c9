//! HTTP channel — JSON chat endpoint and health check.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use tower_http::cors::CorsLayer;
use tracing::{error, info};
use uuid::Uuid;

use crate::conversation::{ConversationRouter, TurnRequest};
use crate::error::TurnError;
use crate::sessions::SessionStore;

/// Shared state for the chat routes.
#[derive(Clone)]
pub struct ChatState {
    pub router: Arc<ConversationRouter>,
    pub sessions: Arc<SessionStore>,
}

/// Build the chat routes with permissive CORS.
pub fn chat_routes(state: ChatState) -> Router {
    Router::new()
        .route("/chat", post(chat))
        .route("/health", get(health))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "aid-assist"
    }))
}

/// POST /chat
///
/// Body: `{"message", "location"?, "session_id"?, "history"?}`. When a
/// session id is given without history, the stored history is used and the
/// exchange is recorded afterwards.
async fn chat(State(state): State<ChatState>, Json(mut request): Json<TurnRequest>) -> Response {
    if let Some(session_id) = request.session_id.as_deref()
        && request.history.is_empty()
    {
        request.history = state.sessions.history(session_id).await;
    }

    let message = request.message.clone();
    let session_id = request.session_id.clone();

    match state.router.process_turn(request).await {
        Ok(reply) => {
            if let Some(session_id) = session_id {
                state
                    .sessions
                    .record_exchange(&session_id, message.trim(), &reply.response)
                    .await;
            }
            (StatusCode::OK, Json(reply)).into_response()
        }
        Err(TurnError::EmptyMessage) => (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({"detail": "Message must not be empty"})),
        )
            .into_response(),
        Err(e) => {
            let error_id = Uuid::new_v4();
            error!(error_id = %error_id, error = %e, "Chat turn failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({
                    "detail": "An error occurred while processing your request",
                    "error_id": error_id.to_string(),
                })),
            )
                .into_response()
        }
    }
}

/// Bind and serve the chat routes until the task is dropped.
pub async fn serve(state: ChatState, port: u16) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port, "Chat server started");
    axum::serve(listener, chat_routes(state)).await
}
