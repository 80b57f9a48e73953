use axum::{
    extract::{Query, State, WebSocketUpgrade},
    http::{header, HeaderMap},
    response::Response,
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;

use application::AuthError;

use crate::{error::ApiError, state::AppState, ws_connection::WebSocketConnection};

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ws", get(websocket_upgrade))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    status: &'static str,
    connections: usize,
    online_users: usize,
    active_rooms: usize,
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        connections: state.coordinator.connection_count().await,
        online_users: state.coordinator.online_user_count().await,
        active_rooms: state.coordinator.active_room_count().await,
    })
}

#[derive(Debug, Deserialize)]
struct WsQuery {
    token: Option<String>,
}

/// `?token=` 优先，其次是 `Authorization: Bearer`
fn credential(query: &WsQuery, headers: &HeaderMap) -> Result<String, AuthError> {
    if let Some(token) = query.token.as_deref().filter(|token| !token.is_empty()) {
        return Ok(token.to_owned());
    }
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::to_owned)
        .ok_or(AuthError::MissingCredential)
}

async fn websocket_upgrade(
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    let token = credential(&query, &headers)?;
    let user_id = state.verifier.verify(&token).await.map_err(|err| {
        tracing::info!(error = %err, "websocket handshake rejected");
        ApiError::from(err)
    })?;

    Ok(ws.on_upgrade(move |socket| WebSocketConnection::new(state, user_id).run(socket)))
}
