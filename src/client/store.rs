//! 세션 재개용 로컬 기록 (best-effort)

use crate::error::StoreError;
use crate::protocol::SharedWorkout;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

/// 저장 키
pub const SESSION_STATE_KEY: &str = "session_state";

/// `{sessionId, isHost, userName, createdAt, workout}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub session_id: String,
    pub is_host: bool,
    pub user_name: String,
    /// 유닉스 밀리초
    pub created_at: i64,
    #[serde(default)]
    pub workout: Option<SharedWorkout>,
}

impl SessionRecord {
    pub fn is_expired(&self, now_ms: i64, ttl: Duration) -> bool {
        now_ms.saturating_sub(self.created_at) > ttl.as_millis() as i64
    }
}

/// 기록 저장소
pub trait SessionStore: Send + Sync {
    fn load(&self) -> Result<Option<SessionRecord>, StoreError>;
    fn save(&self, record: &SessionRecord) -> Result<(), StoreError>;
    fn clear(&self) -> Result<(), StoreError>;
}

/// 유효한 기록만 반환. 만료되었거나 읽을 수 없는 기록은 지우고 `None`.
pub fn load_valid_record(
    store: &dyn SessionStore,
    now_ms: i64,
    ttl: Duration,
) -> Option<SessionRecord> {
    match store.load() {
        Ok(Some(record)) if record.is_expired(now_ms, ttl) => {
            tracing::info!(session_id = %record.session_id, "Stored session expired, discarding");
            clear_quietly(store);
            None
        }
        Ok(record) => record,
        Err(err) => {
            tracing::warn!(error = %err, "Stored session unreadable, discarding");
            clear_quietly(store);
            None
        }
    }
}

pub(crate) fn clear_quietly(store: &dyn SessionStore) {
    if let Err(err) = store.clear() {
        tracing::warn!(error = %err, "Failed to clear stored session");
    }
}

/// JSON 파일 저장소 (`<dir>/session_state.json`)
pub struct FileSessionStore {
    path: PathBuf,
}

impl FileSessionStore {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            path: dir.as_ref().join(format!("{SESSION_STATE_KEY}.json")),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SessionStore for FileSessionStore {
    fn load(&self) -> Result<Option<SessionRecord>, StoreError> {
        match fs::read_to_string(&self.path) {
            Ok(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn save(&self, record: &SessionRecord) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, serde_json::to_vec_pretty(record)?)?;
        Ok(())
    }

    fn clear(&self) -> Result<(), StoreError> {
        match fs::remove_file(&self.path) {
            Err(err) if err.kind() != std::io::ErrorKind::NotFound => Err(err.into()),
            _ => Ok(()),
        }
    }
}

/// 메모리 저장소
#[derive(Default)]
pub struct MemorySessionStore {
    record: Mutex<Option<SessionRecord>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_record(record: SessionRecord) -> Self {
        Self {
            record: Mutex::new(Some(record)),
        }
    }

    pub fn current(&self) -> Option<SessionRecord> {
        self.record.lock().ok().and_then(|guard| guard.clone())
    }
}

impl SessionStore for MemorySessionStore {
    fn load(&self) -> Result<Option<SessionRecord>, StoreError> {
        Ok(self.current())
    }

    fn save(&self, record: &SessionRecord) -> Result<(), StoreError> {
        if let Ok(mut guard) = self.record.lock() {
            *guard = Some(record.clone());
        }
        Ok(())
    }

    fn clear(&self) -> Result<(), StoreError> {
        if let Ok(mut guard) = self.record.lock() {
            *guard = None;
        }
        Ok(())
    }
}
