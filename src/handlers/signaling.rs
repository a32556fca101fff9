//! 시그널링 중계 핸들러

use crate::protocol::ServerMessage;
use crate::state::AppState;
use serde_json::Value;
use std::sync::Arc;

/// `signal` 처리: 대상 피어에게 그대로 전달. 대상이 없으면 기록 후 버림.
pub async fn handle_signal(
    state: Arc<AppState>,
    from_peer_id: &str,
    target: Option<&str>,
    signal: Value,
) {
    let Some(target_id) = target else {
        tracing::warn!(from = %from_peer_id, "Signal missing target");
        return;
    };

    // 같은 세션 안에서만 중계
    let from_session = state.peers.get(from_peer_id).map(|s| s.session_id.clone());
    let target_session = state.peers.get(target_id).map(|s| s.session_id.clone());
    let same_session = from_session.is_some() && from_session == target_session;
    if !same_session {
        tracing::warn!(from = %from_peer_id, target = %target_id, "Signal target unknown, dropped");
        return;
    }

    send_to_peer(
        &state,
        target_id,
        ServerMessage::Signal {
            from: from_peer_id.to_string(),
            signal,
        },
    )
    .await;

    tracing::debug!(from = %from_peer_id, target = %target_id, "Relayed signal");
}

/// 특정 피어에게 메시지 전송
pub async fn send_to_peer(state: &AppState, peer_id: &str, message: ServerMessage) {
    if let Some(session) = state.peers.get(peer_id) {
        if session.sender.send(message).is_err() {
            tracing::debug!(peer_id = %peer_id, "Peer sender closed, message dropped");
        }
    }
}

/// 여러 피어에게 메시지 전송
pub async fn send_to_peers(state: &AppState, peer_ids: &[String], message: ServerMessage) {
    for peer_id in peer_ids {
        send_to_peer(state, peer_id, message.clone()).await;
    }
}

/// 세션의 특정 피어를 제외하고 브로드캐스트
pub async fn broadcast_to_session_except(
    state: &AppState,
    session_id: &str,
    except_peer_id: &str,
    message: ServerMessage,
) {
    let Some(room) = state.session(session_id) else {
        return;
    };
    let members = room.members.read().await.clone();
    for peer_id in members.iter().filter(|id| id.as_str() != except_peer_id) {
        send_to_peer(state, peer_id, message.clone()).await;
    }
}
