//! 피어 링크 위에서 주고받는 애플리케이션 메시지

use super::workout::SharedWorkout;
use serde::{Deserialize, Serialize};

/// 피어 ↔ 피어 메시지
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum PeerMessage {
    #[serde(rename_all = "camelCase")]
    Metrics {
        /// 호스트가 중계할 때 원래 발신자
        #[serde(default, skip_serializing_if = "Option::is_none")]
        peer_id: Option<String>,
        power: u32,
        cadence: u32,
        #[serde(default)]
        heart_rate: u32,
        progress: f64,
    },

    #[serde(rename_all = "camelCase")]
    FtpUpdate {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        peer_id: Option<String>,
        ftp: u32,
    },

    Workout { workout: SharedWorkout },

    #[serde(rename_all = "camelCase")]
    StartCountdown {
        /// 유닉스 밀리초
        start_time: i64,
    },

    EndWorkout,
}

impl PeerMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            PeerMessage::Metrics { .. } => "metrics",
            PeerMessage::FtpUpdate { .. } => "ftp-update",
            PeerMessage::Workout { .. } => "workout",
            PeerMessage::StartCountdown { .. } => "start-countdown",
            PeerMessage::EndWorkout => "end-workout",
        }
    }

    /// 중계 시 원래 발신자를 기록한 사본
    pub fn attributed_to(&self, origin: &str) -> PeerMessage {
        match self.clone() {
            PeerMessage::Metrics {
                power,
                cadence,
                heart_rate,
                progress,
                ..
            } => PeerMessage::Metrics {
                peer_id: Some(origin.to_string()),
                power,
                cadence,
                heart_rate,
                progress,
            },
            PeerMessage::FtpUpdate { ftp, .. } => PeerMessage::FtpUpdate {
                peer_id: Some(origin.to_string()),
                ftp,
            },
            other => other,
        }
    }
}
