//! 릴레이 상태 관리

use crate::config::Config;
use crate::protocol::ServerMessage;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc::UnboundedSender, RwLock};

/// 전역 릴레이 상태
pub struct AppState {
    /// 세션 스코프 (session_id -> SessionRoom)
    pub sessions: DashMap<String, Arc<SessionRoom>>,
    /// 피어 연결 (peer_id -> PeerSession)
    pub peers: DashMap<String, PeerSession>,
    /// 설정
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        Self {
            sessions: DashMap::new(),
            peers: DashMap::new(),
            config: Arc::new(config),
        }
    }

    /// 세션 스코프 조회 (락을 잡지 않도록 Arc 복제)
    pub fn session(&self, session_id: &str) -> Option<Arc<SessionRoom>> {
        self.sessions.get(session_id).map(|room| room.clone())
    }
}

/// 한 세션의 랑데부 스코프
pub struct SessionRoom {
    pub id: String,
    /// 도착 순서대로 정렬된 피어 ID. 첫 번째가 호스트.
    pub members: RwLock<Vec<String>>,
    pub created_at: Instant,
}

impl SessionRoom {
    pub fn new(id: String) -> Self {
        Self {
            id,
            members: RwLock::new(Vec::new()),
            created_at: Instant::now(),
        }
    }

    /// 현재 호스트 (가장 먼저 들어와 아직 연결된 피어)
    pub async fn host(&self) -> Option<String> {
        self.members.read().await.first().cloned()
    }
}

/// `join`으로 공지된 피어 메타데이터
#[derive(Debug, Clone, PartialEq)]
pub struct PeerMetadata {
    pub name: String,
    pub ftp: u32,
}

/// 피어 연결 정보
pub struct PeerSession {
    pub id: String,
    pub session_id: String,
    pub sender: UnboundedSender<ServerMessage>,
    pub metadata: Option<PeerMetadata>,
    pub connected_at: Instant,
}
