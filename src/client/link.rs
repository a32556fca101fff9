//! 피어 링크 추상화
//!
//! 링크는 협상이 끝나기 전까지 `Signal` 이벤트로 협상 페이로드를 내보내고,
//! 상대의 페이로드는 `PeerLink::signal`로 받습니다. 연결 후에는 신뢰성 있는
//! 순서 보장 텍스트 채널입니다.

use crate::error::LinkError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;

/// 링크에서 세션 클라이언트로 올라오는 이벤트
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    /// 릴레이를 통해 상대에게 보낼 협상 페이로드
    Signal {
        peer_id: String,
        link_id: u64,
        payload: Value,
    },
    Connected { peer_id: String, link_id: u64 },
    Data {
        peer_id: String,
        link_id: u64,
        text: String,
    },
    Closed { peer_id: String, link_id: u64 },
    Failed {
        peer_id: String,
        link_id: u64,
        error: String,
    },
}

impl LinkEvent {
    pub fn peer_id(&self) -> &str {
        match self {
            LinkEvent::Signal { peer_id, .. }
            | LinkEvent::Connected { peer_id, .. }
            | LinkEvent::Data { peer_id, .. }
            | LinkEvent::Closed { peer_id, .. }
            | LinkEvent::Failed { peer_id, .. } => peer_id,
        }
    }

    pub fn link_id(&self) -> u64 {
        match self {
            LinkEvent::Signal { link_id, .. }
            | LinkEvent::Connected { link_id, .. }
            | LinkEvent::Data { link_id, .. }
            | LinkEvent::Closed { link_id, .. }
            | LinkEvent::Failed { link_id, .. } => *link_id,
        }
    }
}

/// 링크 생성 요청
#[derive(Debug, Clone)]
pub struct LinkRequest {
    pub local_id: String,
    pub remote_id: String,
    pub link_id: u64,
    /// `true`면 협상 개시자 (offer 생성)
    pub initiator: bool,
    pub events: UnboundedSender<LinkEvent>,
}

/// 원격 참가자 한 명과의 직접 채널
#[async_trait]
pub trait PeerLink: Send + Sync {
    fn peer_id(&self) -> &str;
    fn link_id(&self) -> u64;
    fn is_connected(&self) -> bool;

    /// 상대가 보낸 협상 페이로드 적용
    async fn signal(&self, payload: Value) -> Result<(), LinkError>;

    /// 연결되지 않은 링크는 `LinkError::NotConnected`
    async fn send(&self, text: String) -> Result<(), LinkError>;

    async fn close(&self);
}

/// 링크 팩토리
#[async_trait]
pub trait PeerConnector: Send + Sync {
    async fn open(&self, request: LinkRequest) -> Result<Arc<dyn PeerLink>, LinkError>;
}

/// SimplePeer 호환 협상 페이로드
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum NegotiationSignal {
    Offer { sdp: String },
    Answer { sdp: String },
    Candidate { candidate: IceCandidate },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(rename = "sdpMid", default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(
        rename = "sdpMLineIndex",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub sdp_mline_index: Option<u16>,
}

impl NegotiationSignal {
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    pub fn from_value(value: Value) -> Result<Self, LinkError> {
        serde_json::from_value(value).map_err(|err| LinkError::InvalidSignal(err.to_string()))
    }
}
