//! 동기화 시작 카운트다운

use super::events::SessionEvent;
use chrono::Utc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// `start_time`(유닉스 밀리초)까지 매 초 `CountdownTick`, 도달 시 `WorkoutStarted`.
/// 반환된 핸들을 abort하면 취소됩니다.
pub fn spawn_countdown(start_time: i64, events: broadcast::Sender<SessionEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let remaining_ms = start_time - Utc::now().timestamp_millis();
            if remaining_ms <= 0 {
                let _ = events.send(SessionEvent::WorkoutStarted);
                tracing::info!(start_time = start_time, "Synchronized workout started");
                break;
            }

            let seconds_remaining = ((remaining_ms + 999) / 1000) as u64;
            let _ = events.send(SessionEvent::CountdownTick { seconds_remaining });

            // 다음 정수 초 경계까지 대기
            let until_boundary = match remaining_ms % 1000 {
                0 => 1000,
                rest => rest,
            };
            tokio::time::sleep(Duration::from_millis(until_boundary as u64)).await;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::timeout;

    #[tokio::test]
    async fn ticks_down_then_starts() {
        let (tx, mut rx) = broadcast::channel(16);
        let start = Utc::now().timestamp_millis() + 1_500;
        let _handle = spawn_countdown(start, tx);

        let mut ticks = Vec::new();
        loop {
            let event = timeout(Duration::from_secs(5), rx.recv())
                .await
                .expect("countdown stalled")
                .unwrap();
            match event {
                SessionEvent::CountdownTick { seconds_remaining } => ticks.push(seconds_remaining),
                SessionEvent::WorkoutStarted => break,
                other => panic!("unexpected event: {other:?}"),
            }
        }
        assert_eq!(ticks.first(), Some(&2));
        assert_eq!(ticks.last(), Some(&1));
        assert!(Utc::now().timestamp_millis() >= start);
    }

    #[tokio::test]
    async fn aborting_cancels_the_countdown() {
        let (tx, mut rx) = broadcast::channel(16);
        let handle = spawn_countdown(Utc::now().timestamp_millis() + 3_000, tx);
        assert!(matches!(
            rx.recv().await.unwrap(),
            SessionEvent::CountdownTick { .. }
        ));
        handle.abort();
        assert!(handle.await.unwrap_err().is_cancelled());
        // 송신자가 태스크와 함께 해제되어 채널이 닫힘
        assert!(matches!(
            timeout(Duration::from_secs(4), rx.recv()).await.unwrap(),
            Err(broadcast::error::RecvError::Closed)
        ));
    }
}
