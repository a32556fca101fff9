//! 주변 애플리케이션에 전달되는 세션 이벤트

use super::roster::Participant;
use crate::protocol::SharedWorkout;

/// 구독자는 `SessionClient::subscribe`로 여러 개 둘 수 있음
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// 로스터 전체 스냅샷
    RosterChanged(Vec<Participant>),
    WorkoutReceived(SharedWorkout),
    /// 카운트다운 시작. `start_time`은 유닉스 밀리초.
    SessionStart { start_time: i64 },
    CountdownTick { seconds_remaining: u64 },
    WorkoutStarted,
    SessionEnd,
    HostChanged { peer_id: String },
    LinkConnected { peer_id: String },
    LinkClosed { peer_id: String },
    Disconnected,
}
