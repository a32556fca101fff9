//! 공유 워크아웃 모델
//!
//! 호스트가 공유하는 인터벌 목록입니다. 각 참가자는 호스트의 FTP가 아니라
//! 자신의 FTP로 목표 파워를 계산합니다.

use serde::{Deserialize, Serialize};

/// 호스트가 공유하는 워크아웃
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SharedWorkout {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub intervals: Vec<Interval>,
    /// 공유 시점의 호스트 FTP (참고용)
    pub ftp: u32,
}

/// 단일 인터벌
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawInterval")]
pub struct Interval {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    /// 초 단위
    pub duration: u32,
    #[serde(flatten)]
    pub power: PowerSpec,
}

/// 파워 지정 방식
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "powerType", rename_all = "lowercase")]
pub enum PowerSpec {
    /// FTP 대비 퍼센트
    Relative { percentage: u32 },
    /// 절대 와트
    Absolute { power: u32 },
    /// 두 퍼센트 사이의 선형 변화
    #[serde(rename_all = "camelCase")]
    Ramp {
        percentage_low: u32,
        percentage_high: u32,
    },
}

/// 디자이너가 만든 인터벌 원형. `powerType`이 없거나 모르는 값이면 상대 파워로 봄.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawInterval {
    #[serde(default)]
    name: String,
    #[serde(rename = "type", default)]
    kind: String,
    duration: u32,
    #[serde(default)]
    power_type: Option<String>,
    #[serde(default)]
    percentage: Option<u32>,
    #[serde(default)]
    power: Option<u32>,
    #[serde(default)]
    percentage_low: Option<u32>,
    #[serde(default)]
    percentage_high: Option<u32>,
}

impl From<RawInterval> for Interval {
    fn from(raw: RawInterval) -> Self {
        let power = match (raw.power_type.as_deref(), raw.percentage_low, raw.percentage_high) {
            (Some("absolute"), _, _) => PowerSpec::Absolute {
                power: raw.power.unwrap_or(0),
            },
            (Some("ramp"), Some(percentage_low), Some(percentage_high)) => PowerSpec::Ramp {
                percentage_low,
                percentage_high,
            },
            _ => PowerSpec::Relative {
                percentage: raw.percentage.filter(|p| *p > 0).unwrap_or(100),
            },
        };
        Self {
            name: raw.name,
            kind: raw.kind,
            duration: raw.duration,
            power,
        }
    }
}

impl Interval {
    /// 인터벌 시작 후 `elapsed` 초 시점의 목표 와트
    pub fn target_watts(&self, ftp: u32, elapsed: f64) -> u32 {
        let percent = match self.power {
            PowerSpec::Absolute { power } => return power,
            PowerSpec::Relative { percentage } => percentage as f64,
            PowerSpec::Ramp {
                percentage_low,
                percentage_high,
            } => {
                let fraction = if self.duration == 0 {
                    0.0
                } else {
                    (elapsed / self.duration as f64).clamp(0.0, 1.0)
                };
                percentage_low as f64 + (percentage_high as f64 - percentage_low as f64) * fraction
            }
        };
        (ftp as f64 * percent / 100.0).round() as u32
    }
}

impl SharedWorkout {
    /// 전체 길이 (초)
    pub fn total_duration(&self) -> u32 {
        self.intervals.iter().map(|i| i.duration).sum()
    }

    /// 경과 시간에 해당하는 인터벌과 그 안에서의 경과 시간
    pub fn interval_at(&self, elapsed: f64) -> Option<(&Interval, f64)> {
        let mut start = 0.0;
        for interval in &self.intervals {
            let end = start + interval.duration as f64;
            if elapsed < end {
                return Some((interval, (elapsed - start).max(0.0)));
            }
            start = end;
        }
        None
    }

    /// 참가자 자신의 FTP로 계산한 목표 와트. 워크아웃이 끝났으면 `None`.
    pub fn target_watts_at(&self, ftp: u32, elapsed: f64) -> Option<u32> {
        self.interval_at(elapsed)
            .map(|(interval, offset)| interval.target_watts(ftp, offset))
    }

    /// 0.0–1.0 진행률
    pub fn progress_at(&self, elapsed: f64) -> f64 {
        let total = self.total_duration();
        if total == 0 {
            return 0.0;
        }
        (elapsed / total as f64).clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> SharedWorkout {
        SharedWorkout {
            name: "Sweet Spot".into(),
            description: None,
            ftp: 220,
            intervals: vec![
                Interval {
                    name: "Warmup".into(),
                    kind: "warmup".into(),
                    duration: 300,
                    power: PowerSpec::Ramp {
                        percentage_low: 50,
                        percentage_high: 70,
                    },
                },
                Interval {
                    name: "Tempo".into(),
                    kind: "tempo".into(),
                    duration: 600,
                    power: PowerSpec::Relative { percentage: 85 },
                },
                Interval {
                    name: "Hold".into(),
                    kind: "threshold".into(),
                    duration: 120,
                    power: PowerSpec::Absolute { power: 250 },
                },
            ],
        }
    }

    #[test]
    fn intervals_use_the_designer_wire_format() {
        let value = serde_json::to_value(&sample()).unwrap();
        assert_eq!(
            value["intervals"][0],
            json!({"name": "Warmup", "type": "warmup", "duration": 300,
                   "powerType": "ramp", "percentageLow": 50, "percentageHigh": 70})
        );
        assert_eq!(
            value["intervals"][1],
            json!({"name": "Tempo", "type": "tempo", "duration": 600,
                   "powerType": "relative", "percentage": 85})
        );
        assert_eq!(value["intervals"][2]["powerType"], "absolute");
        assert!(value.get("description").is_none());
    }

    #[test]
    fn designer_intervals_round_trip_through_json() {
        let workout = sample();
        let back: SharedWorkout =
            serde_json::from_value(serde_json::to_value(&workout).unwrap()).unwrap();
        assert_eq!(back, workout);
    }

    #[test]
    fn missing_power_type_defaults_to_relative() {
        let workout: SharedWorkout = serde_json::from_value(json!({
            "name": "Shared Workout",
            "ftp": 220,
            "intervals": [
                {"name": "Tempo", "type": "tempo", "duration": 600, "percentage": 85},
                {"name": "Easy", "type": "endurance", "duration": 300},
                {"name": "Hold", "type": "threshold", "duration": 60, "powerType": "absolute"}
            ]
        }))
        .unwrap();
        assert_eq!(workout.intervals[0].power, PowerSpec::Relative { percentage: 85 });
        assert_eq!(workout.intervals[1].power, PowerSpec::Relative { percentage: 100 });
        assert_eq!(workout.intervals[2].power, PowerSpec::Absolute { power: 0 });
        assert_eq!(workout.target_watts_at(200, 700.0), Some(200));
    }

    #[test]
    fn workout_message_without_power_type_is_accepted() {
        let raw = r#"{"type":"workout","workout":{"name":"Shared Workout","ftp":220,"intervals":[{"name":"Tempo","type":"tempo","duration":600,"percentage":85}]}}"#;
        match serde_json::from_str::<crate::protocol::PeerMessage>(raw).unwrap() {
            crate::protocol::PeerMessage::Workout { workout } => {
                assert_eq!(workout.intervals[0].power, PowerSpec::Relative { percentage: 85 });
            }
            other => panic!("expected workout, got {other:?}"),
        }
    }

    #[test]
    fn target_power_scales_with_own_ftp() {
        let workout = sample();
        // 호스트 FTP(220)가 아니라 참가자 FTP 사용
        assert_eq!(workout.target_watts_at(300, 400.0), Some(255));
        assert_eq!(workout.target_watts_at(200, 400.0), Some(170));
        // 절대 와트는 FTP와 무관
        assert_eq!(workout.target_watts_at(300, 950.0), Some(250));
        assert_eq!(workout.target_watts_at(300, 5000.0), None);
    }

    #[test]
    fn ramp_interpolates_linearly() {
        let workout = sample();
        assert_eq!(workout.target_watts_at(200, 0.0), Some(100));
        assert_eq!(workout.target_watts_at(200, 150.0), Some(120));
        assert_eq!(workout.target_watts_at(200, 299.9), Some(140));
    }

    #[test]
    fn progress_is_clamped() {
        let workout = sample();
        assert_eq!(workout.total_duration(), 1020);
        assert_eq!(workout.progress_at(510.0), 0.5);
        assert_eq!(workout.progress_at(2000.0), 1.0);
    }
}
