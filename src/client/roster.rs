//! 참가자 로스터
//!
//! 세션 클라이언트만 소유하고 변경합니다. 외부에는 스냅샷만 노출합니다.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// 세션 참가자
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub id: String,
    pub name: String,
    pub is_host: bool,
    pub ftp: u32,
    pub power: u32,
    pub cadence: u32,
    /// 0이면 알 수 없음
    pub heart_rate: u32,
    /// 0.0–1.0
    pub progress: f64,
}

impl Participant {
    pub fn new(id: impl Into<String>, name: impl Into<String>, ftp: u32) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            is_host: false,
            ftp,
            power: 0,
            cadence: 0,
            heart_rate: 0,
            progress: 0.0,
        }
    }
}

struct Entry {
    order: u64,
    participant: Participant,
}

/// 피어 ID로 키잉된 참가자 집합. 호스트 플래그는 최대 한 명.
#[derive(Default)]
pub struct Roster {
    entries: HashMap<String, Entry>,
    next_order: u64,
}

impl Roster {
    pub fn new() -> Self {
        Self::default()
    }

    /// 참가자 추가 또는 갱신 (필드별 마지막 값 우선). 새로 추가됐으면 `true`.
    ///
    /// `is_host == false`는 기존 호스트를 강등하지 않습니다. 호스트 이동은
    /// `set_host`로만 일어납니다.
    pub fn upsert(&mut self, id: &str, name: &str, ftp: u32, is_host: bool) -> bool {
        let inserted = match self.entries.get_mut(id) {
            Some(entry) => {
                entry.participant.name = name.to_string();
                entry.participant.ftp = ftp;
                false
            }
            None => {
                let order = self.next_order;
                self.next_order += 1;
                self.entries.insert(
                    id.to_string(),
                    Entry {
                        order,
                        participant: Participant::new(id, name, ftp),
                    },
                );
                true
            }
        };
        if is_host {
            self.set_host(id);
        }
        inserted
    }

    pub fn remove(&mut self, id: &str) -> Option<Participant> {
        self.entries.remove(id).map(|entry| entry.participant)
    }

    pub fn update_metrics(
        &mut self,
        id: &str,
        power: u32,
        cadence: u32,
        heart_rate: u32,
        progress: f64,
    ) -> bool {
        match self.entries.get_mut(id) {
            Some(entry) => {
                let p = &mut entry.participant;
                p.power = power;
                p.cadence = cadence;
                p.heart_rate = heart_rate;
                p.progress = if progress.is_finite() {
                    progress.clamp(0.0, 1.0)
                } else {
                    0.0
                };
                true
            }
            None => false,
        }
    }

    pub fn update_ftp(&mut self, id: &str, ftp: u32) -> bool {
        match self.entries.get_mut(id) {
            Some(entry) => {
                entry.participant.ftp = ftp;
                true
            }
            None => false,
        }
    }

    /// 호스트 플래그를 `id`로 옮김. 모르는 ID면 아무것도 바꾸지 않음.
    pub fn set_host(&mut self, id: &str) -> bool {
        if !self.entries.contains_key(id) {
            return false;
        }
        for (key, entry) in self.entries.iter_mut() {
            entry.participant.is_host = key == id;
        }
        true
    }

    pub fn host(&self) -> Option<&Participant> {
        self.entries
            .values()
            .map(|entry| &entry.participant)
            .find(|p| p.is_host)
    }

    pub fn get(&self, id: &str) -> Option<&Participant> {
        self.entries.get(id).map(|entry| &entry.participant)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// 추가된 순서의 스냅샷
    pub fn snapshot(&self) -> Vec<Participant> {
        let mut entries: Vec<&Entry> = self.entries.values().collect();
        entries.sort_by_key(|entry| entry.order);
        entries
            .into_iter()
            .map(|entry| entry.participant.clone())
            .collect()
    }

    pub fn ids(&self) -> Vec<String> {
        self.snapshot().into_iter().map(|p| p.id).collect()
    }
}
