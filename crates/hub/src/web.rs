use std::env;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use serde_json::json;
use tokio::net::TcpListener;

use crate::engine::{Command, Engine};
use crate::error::HubError;
use crate::mqtt::PowerSwitch;
use crate::state::SharedState;

// ---------------------------------------------------------------------------
// Shared handler state
// ---------------------------------------------------------------------------

pub struct WebState<S: PowerSwitch> {
    pub shared: SharedState,
    pub engine: Arc<Engine<S>>,
}

impl<S: PowerSwitch> Clone for WebState<S> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
            engine: self.engine.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Routes
// ---------------------------------------------------------------------------

pub fn router<S: PowerSwitch + 'static>(state: WebState<S>) -> Router {
    Router::new()
        .route("/api/status", get(api_status))
        .route("/api/command", post(api_command))
        .with_state(state)
}

async fn api_status<S: PowerSwitch>(State(state): State<WebState<S>>) -> impl IntoResponse {
    let st = state.shared.read().await;
    Json(st.to_status())
}

async fn api_command<S: PowerSwitch>(
    State(state): State<WebState<S>>,
    Json(cmd): Json<Command>,
) -> Response {
    match state.engine.dispatch(cmd).await {
        Ok(reply) => Json(reply).into_response(),
        Err(err) => error_response(err),
    }
}

/// Map a rejected command onto an HTTP status plus a small JSON body with a
/// machine-readable kind.
fn error_response(err: HubError) -> Response {
    let status = match &err {
        HubError::NotFound { .. } => StatusCode::NOT_FOUND,
        HubError::NotAuthorized => StatusCode::FORBIDDEN,
        HubError::InvalidSlot(_) => StatusCode::UNPROCESSABLE_ENTITY,
        HubError::QuotaExhausted { .. }
        | HubError::SlotNotAllowed { .. }
        | HubError::PlugDisabled(_) => StatusCode::CONFLICT,
        HubError::PlugUnreachable(_) => StatusCode::BAD_GATEWAY,
        HubError::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    let body = json!({
        "error": err.kind(),
        "detail": err.to_string(),
    });
    (status, Json(body)).into_response()
}

// ---------------------------------------------------------------------------
// Server entry-point
// ---------------------------------------------------------------------------

pub async fn serve<S: PowerSwitch + 'static>(state: WebState<S>) {
    let port: u16 = env::var("WEB_PORT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(8080);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await.expect("failed to bind web port");

    tracing::info!("api listening on http://{addr}");

    axum::serve(listener, router(state))
        .await
        .expect("web server error");
}

// ===========================================================================
// Tests
// ===========================================================================
