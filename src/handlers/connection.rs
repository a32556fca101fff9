//! 연결 핸들러

use crate::error::RelayError;
use crate::protocol::{PeerSummary, ServerMessage};
use crate::state::{AppState, PeerSession, SessionRoom};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc::UnboundedSender;
use uuid::Uuid;

/// 새 연결 처리: 피어 ID 발급, 호스트 판정, `id`/`existing-peers` 전송
pub async fn handle_connection(
    state: Arc<AppState>,
    session_id: &str,
    sender: UnboundedSender<ServerMessage>,
) -> Result<String, RelayError> {
    let peer_id = Uuid::new_v4().to_string();
    let max_size = state.config.session.max_size;

    // 멤버 목록 쓰기 락으로 동시 접속의 도착 순서를 직렬화
    let (is_host, others) = loop {
        let room = state
            .sessions
            .entry(session_id.to_string())
            .or_insert_with(|| {
                tracing::info!(session_id = %session_id, "Session scope created");
                Arc::new(SessionRoom::new(session_id.to_string()))
            })
            .clone();

        let mut members = room.members.write().await;

        // 마지막 피어가 나가면서 스코프가 제거된 경우 다시 시도
        let live = state
            .sessions
            .get(session_id)
            .is_some_and(|current| Arc::ptr_eq(current.value(), &room));
        if !live {
            continue;
        }

        if members.len() >= max_size {
            tracing::warn!(session_id = %session_id, size = members.len(), "Session full, rejected connection");
            return Err(RelayError::SessionFull);
        }
        let others = members.clone();
        let is_host = members.is_empty();

        state.peers.insert(
            peer_id.clone(),
            PeerSession {
                id: peer_id.clone(),
                session_id: session_id.to_string(),
                sender: sender.clone(),
                metadata: None,
                connected_at: Instant::now(),
            },
        );
        members.push(peer_id.clone());
        break (is_host, others);
    };

    let _ = sender.send(ServerMessage::Id {
        id: peer_id.clone(),
        is_host,
    });

    // 이미 공지한 피어만 열거
    let existing: Vec<PeerSummary> = others
        .iter()
        .enumerate()
        .filter_map(|(index, id)| {
            let session = state.peers.get(id)?;
            let meta = session.metadata.as_ref()?;
            Some(PeerSummary {
                id: id.clone(),
                name: meta.name.clone(),
                ftp: meta.ftp,
                is_host: index == 0,
            })
        })
        .collect();

    if !existing.is_empty() {
        let _ = sender.send(ServerMessage::ExistingPeers { peers: existing });
    }

    tracing::info!(
        peer_id = %peer_id,
        session_id = %session_id,
        is_host = is_host,
        total = others.len() + 1,
        "New connection established"
    );
    Ok(peer_id)
}

/// 연결 해제 처리
pub async fn handle_disconnect(state: Arc<AppState>, peer_id: &str) {
    let Some((_, session)) = state.peers.remove(peer_id) else {
        return;
    };
    crate::handlers::session::leave_session(&state, peer_id, &session.session_id).await;
    tracing::info!(
        peer_id = %session.id,
        connected_secs = session.connected_at.elapsed().as_secs(),
        "Connection closed"
    );
}
