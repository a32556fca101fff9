//! 세션 멤버십 핸들러

use crate::handlers::signaling::{broadcast_to_session_except, send_to_peer, send_to_peers};
use crate::protocol::ServerMessage;
use crate::state::{AppState, PeerMetadata};
use serde_json::Value;
use std::sync::Arc;

const DEFAULT_NAME: &str = "Unnamed";
const DEFAULT_FTP: u32 = 200;

/// `join` 처리: 메타데이터 기록 후 다른 피어에게 `peer-joined` 전송
pub async fn handle_join(state: Arc<AppState>, peer_id: &str, name: Option<String>, ftp: Option<u32>) {
    let name = name
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| DEFAULT_NAME.to_string());
    let ftp = ftp.filter(|f| *f > 0).unwrap_or(DEFAULT_FTP);

    let session_id = match state.peers.get_mut(peer_id) {
        Some(mut session) => {
            session.metadata = Some(PeerMetadata {
                name: name.clone(),
                ftp,
            });
            session.session_id.clone()
        }
        None => return,
    };

    let is_host = match state.session(&session_id) {
        Some(room) => room.host().await.as_deref() == Some(peer_id),
        None => false,
    };

    broadcast_to_session_except(
        &state,
        &session_id,
        peer_id,
        ServerMessage::PeerJoined {
            peer_id: peer_id.to_string(),
            name: name.clone(),
            ftp,
            is_host,
        },
    )
    .await;

    tracing::info!(
        peer_id = %peer_id,
        session_id = %session_id,
        name = %name,
        ftp = ftp,
        is_host = is_host,
        "Peer announced"
    );
}

/// `request-join` 처리: 현재 호스트에게만 전달
pub async fn handle_request_join(state: Arc<AppState>, peer_id: &str, name: Option<String>) {
    let Some(session_id) = session_of(&state, peer_id) else {
        return;
    };
    let host = match state.session(&session_id) {
        Some(room) => room.host().await,
        None => None,
    };

    match host {
        Some(host_id) if host_id != peer_id => {
            send_to_peer(
                &state,
                &host_id,
                ServerMessage::RequestJoin {
                    from: peer_id.to_string(),
                    name,
                },
            )
            .await;
            tracing::debug!(from = %peer_id, host = %host_id, "Forwarded join request to host");
        }
        _ => {
            tracing::debug!(from = %peer_id, session_id = %session_id, "No other host for join request");
        }
    }
}

/// `broadcast` 처리: 발신자를 제외한 전원에게 전달
pub async fn handle_broadcast(state: Arc<AppState>, peer_id: &str, data: Value) {
    let Some(session_id) = session_of(&state, peer_id) else {
        return;
    };
    broadcast_to_session_except(
        &state,
        &session_id,
        peer_id,
        ServerMessage::Broadcast {
            from: peer_id.to_string(),
            data,
        },
    )
    .await;
    tracing::debug!(from = %peer_id, session_id = %session_id, "Relayed broadcast");
}

/// 세션 나가기 내부 로직: 멤버 제거, `peer-left`, 필요 시 `host-changed`
pub async fn leave_session(state: &AppState, peer_id: &str, session_id: &str) {
    let Some(room) = state.session(session_id) else {
        return;
    };

    let (was_host, remaining) = {
        let mut members = room.members.write().await;
        let Some(position) = members.iter().position(|id| id == peer_id) else {
            return;
        };
        members.remove(position);
        if members.is_empty() {
            state
                .sessions
                .remove_if(session_id, |_, current| Arc::ptr_eq(current, &room));
            tracing::info!(session_id = %session_id, "Session scope deleted");
        }
        (position == 0, members.clone())
    };

    send_to_peers(
        state,
        &remaining,
        ServerMessage::PeerLeft {
            peer_id: peer_id.to_string(),
        },
    )
    .await;

    if was_host {
        if let Some(new_host) = remaining.first() {
            send_to_peers(
                state,
                &remaining,
                ServerMessage::HostChanged {
                    peer_id: new_host.clone(),
                },
            )
            .await;
            tracing::info!(
                session_id = %session_id,
                previous = %peer_id,
                current = %new_host,
                "Host handed over"
            );
        }
    }

    tracing::info!(
        peer_id = %peer_id,
        session_id = %session_id,
        remaining = remaining.len(),
        "Peer left session"
    );
}

/// 빈 세션 스코프 정리
pub async fn cleanup_idle_sessions(state: Arc<AppState>) {
    let mut deleted = 0;

    state.sessions.retain(|session_id, room| {
        let empty = room
            .members
            .try_read()
            .map(|members| members.is_empty())
            .unwrap_or(false);
        if empty {
            tracing::info!(
                session_id = %session_id,
                age_secs = room.created_at.elapsed().as_secs(),
                "Cleaned up idle session"
            );
            deleted += 1;
        }
        !empty
    });

    if deleted > 0 {
        tracing::info!(deleted_sessions = deleted, "Cleanup completed");
    }
}

fn session_of(state: &AppState, peer_id: &str) -> Option<String> {
    state.peers.get(peer_id).map(|session| session.session_id.clone())
}
