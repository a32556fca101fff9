//! HTTP 표면과 WebSocket 루프

use crate::error::RelayError;
use crate::handlers;
use crate::protocol::{ClientMessage, ServerMessage};
use crate::state::AppState;
use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, State, WebSocketUpgrade,
    },
    http::{header, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use chrono::{SecondsFormat, Utc};
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::mpsc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

const SERVICE_NAME: &str = "GroupRide Signaling Relay";
const MAX_SESSION_ID_LEN: usize = 128;

/// 라우터 설정
pub fn create_router(state: Arc<AppState>) -> Router {
    let cors = cors_layer(&state.config.cors_origins);

    Router::new()
        .route("/", get(health_handler).options(preflight_handler))
        .route("/health", get(health_handler).options(preflight_handler))
        .route(
            "/signal/:session_id",
            get(signal_handler).options(preflight_handler),
        )
        .fallback(fallback_handler)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let allow_origin = if origins.is_empty() {
        AllowOrigin::from(Any)
    } else {
        AllowOrigin::list(
            origins
                .iter()
                .filter_map(|origin| HeaderValue::from_str(origin).ok()),
        )
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::UPGRADE])
}

pub async fn health_handler() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": SERVICE_NAME,
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
    }))
}

async fn preflight_handler() -> StatusCode {
    StatusCode::NO_CONTENT
}

async fn fallback_handler(method: Method) -> Response {
    if method == Method::OPTIONS {
        return StatusCode::NO_CONTENT.into_response();
    }
    (StatusCode::NOT_FOUND, "Not Found").into_response()
}

/// `/signal/:session_id`: 업그레이드 요청이면 WebSocket, 아니면 세션 안내
async fn signal_handler(
    Path(session_id): Path<String>,
    State(state): State<Arc<AppState>>,
    ws: Option<WebSocketUpgrade>,
) -> Response {
    if !is_valid_session_id(&session_id) {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": RelayError::InvalidSessionId.to_string() })),
        )
            .into_response();
    }

    match ws {
        Some(ws) => ws
            .on_upgrade(move |socket| handle_socket(socket, state, session_id))
            .into_response(),
        None => Json(json!({
            "sessionId": session_id,
            "message": "Connect via WebSocket to join this session",
        }))
        .into_response(),
    }
}

fn is_valid_session_id(session_id: &str) -> bool {
    !session_id.is_empty()
        && session_id.len() <= MAX_SESSION_ID_LEN
        && session_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>, session_id: String) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();

    // 연결 처리
    let peer_id = match handlers::handle_connection(state.clone(), &session_id, tx.clone()).await {
        Ok(peer_id) => peer_id,
        Err(err) => {
            let rejection = ServerMessage::Error {
                message: err.to_string(),
            };
            if let Ok(json) = serde_json::to_string(&rejection) {
                let _ = ws_sender.send(Message::Text(json)).await;
            }
            let _ = ws_sender.send(Message::Close(None)).await;
            return;
        }
    };

    // 송신 태스크
    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if let Ok(json) = serde_json::to_string(&msg) {
                if ws_sender.send(Message::Text(json)).await.is_err() {
                    break;
                }
            }
        }
    });

    // 수신 처리
    while let Some(result) = ws_receiver.next().await {
        match result {
            Ok(Message::Text(text)) => {
                handle_text(&state, &peer_id, &tx, &text).await;
            }
            Ok(Message::Binary(data)) => match String::from_utf8(data) {
                Ok(text) => handle_text(&state, &peer_id, &tx, &text).await,
                Err(_) => reply_invalid(&peer_id, &tx),
            },
            Ok(Message::Close(_)) => break,
            Err(err) => {
                tracing::warn!(peer_id = %peer_id, error = %err, "WebSocket error");
                break;
            }
            _ => {}
        }
    }

    // 연결 해제
    handlers::handle_disconnect(state, &peer_id).await;
    send_task.abort();
}

async fn handle_text(
    state: &Arc<AppState>,
    peer_id: &str,
    sender: &mpsc::UnboundedSender<ServerMessage>,
    text: &str,
) {
    let value: Value = match serde_json::from_str(text) {
        Ok(value) => value,
        Err(_) => {
            reply_invalid(peer_id, sender);
            return;
        }
    };

    match serde_json::from_value::<ClientMessage>(value.clone()) {
        Ok(msg) => handle_client_message(state, peer_id, msg).await,
        Err(err) => {
            let kind = value.get("type").and_then(Value::as_str).unwrap_or("<none>");
            tracing::warn!(peer_id = %peer_id, kind = %kind, error = %err, "Unknown or malformed message ignored");
        }
    }
}

fn reply_invalid(peer_id: &str, sender: &mpsc::UnboundedSender<ServerMessage>) {
    tracing::warn!(peer_id = %peer_id, "Invalid message format");
    let _ = sender.send(ServerMessage::Error {
        message: "Invalid message format".to_string(),
    });
}

async fn handle_client_message(state: &Arc<AppState>, peer_id: &str, msg: ClientMessage) {
    match msg {
        ClientMessage::Join { name, ftp } => {
            handlers::handle_join(state.clone(), peer_id, name, ftp).await;
        }
        ClientMessage::Signal { target, signal } => {
            handlers::handle_signal(state.clone(), peer_id, target.as_deref(), signal).await;
        }
        ClientMessage::RequestJoin { name } => {
            handlers::handle_request_join(state.clone(), peer_id, name).await;
        }
        ClientMessage::Broadcast { data } => {
            handlers::handle_broadcast(state.clone(), peer_id, data).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_ids_are_restricted_to_url_safe_tokens() {
        assert!(is_valid_session_id("swift-mountain-climbing-falcon"));
        assert!(is_valid_session_id("abc_123"));
        assert!(!is_valid_session_id(""));
        assert!(!is_valid_session_id("has space"));
        assert!(!is_valid_session_id(&"a".repeat(129)));
    }
}
