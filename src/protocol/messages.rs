//! 클라이언트-릴레이 메시지 프로토콜 정의

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 클라이언트 → 릴레이 메시지
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientMessage {
    /// 이름과 FTP 공지
    Join {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ftp: Option<u32>,
    },

    /// 협상 페이로드 (내용은 해석하지 않음)
    Signal {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target: Option<String>,
        signal: Value,
    },

    /// 호스트에게 연결 시작 요청
    RequestJoin {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
    },

    /// 발신자를 제외한 전원에게 전달
    Broadcast { data: Value },
}

/// 릴레이 → 클라이언트 메시지
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerMessage {
    // Identity
    #[serde(rename_all = "camelCase")]
    Id { id: String, is_host: bool },
    ExistingPeers { peers: Vec<PeerSummary> },

    // Roster Events
    #[serde(rename_all = "camelCase")]
    PeerJoined {
        peer_id: String,
        name: String,
        ftp: u32,
        is_host: bool,
    },
    #[serde(rename_all = "camelCase")]
    PeerLeft { peer_id: String },
    #[serde(rename_all = "camelCase")]
    HostChanged { peer_id: String },

    // Relayed
    Signal { from: String, signal: Value },
    RequestJoin {
        from: String,
        #[serde(default)]
        name: Option<String>,
    },
    Broadcast { from: String, data: Value },

    Error { message: String },
}

/// `existing-peers` 항목
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerSummary {
    pub id: String,
    pub name: String,
    pub ftp: u32,
    #[serde(default)]
    pub is_host: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn server_messages_use_kebab_case_tags_and_camel_case_fields() {
        let msg = ServerMessage::PeerJoined {
            peer_id: "p1".into(),
            name: "Ana".into(),
            ftp: 240,
            is_host: false,
        };
        assert_eq!(
            serde_json::to_value(&msg).unwrap(),
            json!({"type": "peer-joined", "peerId": "p1", "name": "Ana", "ftp": 240, "isHost": false})
        );

        let id = serde_json::to_value(ServerMessage::Id {
            id: "p2".into(),
            is_host: true,
        })
        .unwrap();
        assert_eq!(id, json!({"type": "id", "id": "p2", "isHost": true}));
    }

    #[test]
    fn join_fields_are_optional() {
        let msg: ClientMessage = serde_json::from_str(r#"{"type":"join"}"#).unwrap();
        assert_eq!(msg, ClientMessage::Join { name: None, ftp: None });
    }

    #[test]
    fn signal_payload_is_kept_opaque() {
        let raw = r#"{"type":"signal","target":"p9","signal":{"type":"offer","sdp":"v=0","extra":[1,2]}}"#;
        let msg: ClientMessage = serde_json::from_str(raw).unwrap();
        match msg {
            ClientMessage::Signal { target, signal } => {
                assert_eq!(target.as_deref(), Some("p9"));
                assert_eq!(signal["extra"], json!([1, 2]));
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn unknown_type_is_rejected() {
        assert!(serde_json::from_str::<ClientMessage>(r#"{"type":"heartbeat"}"#).is_err());
    }
}
