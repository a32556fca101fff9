//! 에러 타입

use std::time::Duration;

/// 릴레이 측 에러
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("Session is full")]
    SessionFull,

    #[error("Invalid session id")]
    InvalidSessionId,
}

/// 세션 클라이언트 에러
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Invalid session code: {0}")]
    InvalidSessionCode(String),

    #[error("Signaling server connection timeout after {0:?}")]
    SignalingTimeout(Duration),

    #[error("Failed to connect to signaling server: {0}")]
    Signaling(String),

    #[error("Signaling connection closed before identity was assigned")]
    SignalingClosed,

    #[error("Already in a session; disconnect first")]
    AlreadyActive,

    #[error("Not in a session")]
    NotInSession,

    #[error("Only the host can do this")]
    NotHost,

    #[error("FTP must be between 50 and 500 W, got {0}")]
    InvalidFtp(u32),

    #[error(transparent)]
    Link(#[from] LinkError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// 피어 링크 에러
#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("Peer link is not connected")]
    NotConnected,

    #[error("Invalid negotiation payload: {0}")]
    InvalidSignal(String),

    #[error("Negotiation failed: {0}")]
    Negotiation(String),

    #[error("Send failed: {0}")]
    Send(String),
}

/// 세션 기록 저장소 에러
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Session store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Session record is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}
