//! WebRTC 데이터 채널 링크
//!
//! 협상 페이로드는 SimplePeer와 같은 JSON 모양이라 브라우저 클라이언트와도
//! 같은 세션에서 연결됩니다. 채널은 순서 보장(ordered) 데이터 채널 하나입니다.

use super::link::{IceCandidate, LinkEvent, LinkRequest, NegotiationSignal, PeerConnector, PeerLink};
use crate::error::LinkError;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc::UnboundedSender, Mutex as AsyncMutex};
use webrtc::api::APIBuilder;
use webrtc::data_channel::data_channel_init::RTCDataChannelInit;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;

const DATA_CHANNEL_LABEL: &str = "groupride";

fn negotiation(err: webrtc::Error) -> LinkError {
    LinkError::Negotiation(err.to_string())
}

/// STUN 서버 목록으로 링크를 만드는 커넥터
#[derive(Clone)]
pub struct WebRtcConnector {
    ice_servers: Vec<RTCIceServer>,
}

impl WebRtcConnector {
    pub fn new(stun_servers: &[String]) -> Self {
        let ice_servers = if stun_servers.is_empty() {
            Vec::new()
        } else {
            vec![RTCIceServer {
                urls: stun_servers.to_vec(),
                ..Default::default()
            }]
        };
        Self { ice_servers }
    }
}

#[async_trait]
impl PeerConnector for WebRtcConnector {
    async fn open(&self, request: LinkRequest) -> Result<Arc<dyn PeerLink>, LinkError> {
        let api = APIBuilder::new().build();
        let config = RTCConfiguration {
            ice_servers: self.ice_servers.clone(),
            ..Default::default()
        };
        let pc = Arc::new(api.new_peer_connection(config).await.map_err(negotiation)?);

        let shared = Arc::new(LinkShared {
            peer_id: request.remote_id.clone(),
            link_id: request.link_id,
            events: request.events,
            connected: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            channel: AsyncMutex::new(None),
        });

        let on_candidate = shared.clone();
        pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            let shared = on_candidate.clone();
            Box::pin(async move {
                let Some(candidate) = candidate else { return };
                match candidate.to_json() {
                    Ok(init) => shared.emit_signal(NegotiationSignal::Candidate {
                        candidate: IceCandidate {
                            candidate: init.candidate,
                            sdp_mid: init.sdp_mid,
                            sdp_mline_index: init.sdp_mline_index,
                        },
                    }),
                    Err(err) => {
                        tracing::warn!(peer_id = %shared.peer_id, error = %err, "Failed to encode ICE candidate");
                    }
                }
            })
        }));

        let on_state = shared.clone();
        pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
            let shared = on_state.clone();
            Box::pin(async move {
                tracing::debug!(peer_id = %shared.peer_id, state = %state, "Peer connection state changed");
                if let Some(terminal) = link_outcome(state) {
                    match terminal {
                        LinkOutcome::Failed => shared.fail("ICE connection failed"),
                        LinkOutcome::Closed => shared.mark_closed(),
                    }
                }
            })
        }));

        if request.initiator {
            let init = RTCDataChannelInit {
                ordered: Some(true),
                ..Default::default()
            };
            let channel = pc
                .create_data_channel(DATA_CHANNEL_LABEL, Some(init))
                .await
                .map_err(negotiation)?;
            attach_channel(shared.clone(), channel).await;

            let offer = pc.create_offer(None).await.map_err(negotiation)?;
            pc.set_local_description(offer.clone())
                .await
                .map_err(negotiation)?;
            shared.emit_signal(NegotiationSignal::Offer { sdp: offer.sdp });
        } else {
            let on_channel = shared.clone();
            pc.on_data_channel(Box::new(move |channel: Arc<RTCDataChannel>| {
                let shared = on_channel.clone();
                Box::pin(async move {
                    tracing::debug!(peer_id = %shared.peer_id, label = %channel.label(), "Data channel received");
                    attach_channel(shared, channel).await;
                })
            }));
        }

        Ok(Arc::new(WebRtcLink {
            pc,
            shared,
            pending_candidates: AsyncMutex::new(Vec::new()),
        }))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LinkOutcome {
    Failed,
    Closed,
}

/// 링크를 끝내는 상태만 반환. `Disconnected`는 ICE가 다시 붙을 수 있어 제외.
fn link_outcome(state: RTCPeerConnectionState) -> Option<LinkOutcome> {
    match state {
        RTCPeerConnectionState::Failed => Some(LinkOutcome::Failed),
        RTCPeerConnectionState::Closed => Some(LinkOutcome::Closed),
        _ => None,
    }
}

struct LinkShared {
    peer_id: String,
    link_id: u64,
    events: UnboundedSender<LinkEvent>,
    connected: AtomicBool,
    closed: AtomicBool,
    channel: AsyncMutex<Option<Arc<RTCDataChannel>>>,
}

impl LinkShared {
    fn emit(&self, event: LinkEvent) {
        let _ = self.events.send(event);
    }

    fn emit_signal(&self, signal: NegotiationSignal) {
        self.emit(LinkEvent::Signal {
            peer_id: self.peer_id.clone(),
            link_id: self.link_id,
            payload: signal.to_value(),
        });
    }

    fn mark_connected(&self) {
        if !self.closed.load(Ordering::SeqCst) && !self.connected.swap(true, Ordering::SeqCst) {
            self.emit(LinkEvent::Connected {
                peer_id: self.peer_id.clone(),
                link_id: self.link_id,
            });
        }
    }

    fn mark_closed(&self) {
        self.connected.store(false, Ordering::SeqCst);
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.emit(LinkEvent::Closed {
                peer_id: self.peer_id.clone(),
                link_id: self.link_id,
            });
        }
    }

    fn fail(&self, error: &str) {
        self.connected.store(false, Ordering::SeqCst);
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.emit(LinkEvent::Failed {
                peer_id: self.peer_id.clone(),
                link_id: self.link_id,
                error: error.to_string(),
            });
        }
    }
}

async fn attach_channel(shared: Arc<LinkShared>, channel: Arc<RTCDataChannel>) {
    let on_open = shared.clone();
    channel.on_open(Box::new(move || {
        let shared = on_open.clone();
        Box::pin(async move {
            shared.mark_connected();
        })
    }));

    let on_close = shared.clone();
    channel.on_close(Box::new(move || {
        let shared = on_close.clone();
        Box::pin(async move {
            shared.mark_closed();
        })
    }));

    let on_message = shared.clone();
    channel.on_message(Box::new(move |msg: DataChannelMessage| {
        let shared = on_message.clone();
        Box::pin(async move {
            let text = String::from_utf8_lossy(&msg.data).into_owned();
            shared.emit(LinkEvent::Data {
                peer_id: shared.peer_id.clone(),
                link_id: shared.link_id,
                text,
            });
        })
    }));

    *shared.channel.lock().await = Some(channel);
}

/// `RTCPeerConnection` 하나를 감싼 링크
pub struct WebRtcLink {
    pc: Arc<RTCPeerConnection>,
    shared: Arc<LinkShared>,
    /// 원격 SDP가 설정되기 전에 도착한 후보
    pending_candidates: AsyncMutex<Vec<RTCIceCandidateInit>>,
}

impl WebRtcLink {
    async fn flush_candidates(&self) {
        let pending: Vec<RTCIceCandidateInit> = self.pending_candidates.lock().await.drain(..).collect();
        for candidate in pending {
            if let Err(err) = self.pc.add_ice_candidate(candidate).await {
                tracing::debug!(peer_id = %self.shared.peer_id, error = %err, "Failed to add buffered ICE candidate");
            }
        }
    }
}

#[async_trait]
impl PeerLink for WebRtcLink {
    fn peer_id(&self) -> &str {
        &self.shared.peer_id
    }

    fn link_id(&self) -> u64 {
        self.shared.link_id
    }

    fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    async fn signal(&self, payload: Value) -> Result<(), LinkError> {
        match NegotiationSignal::from_value(payload)? {
            NegotiationSignal::Offer { sdp } => {
                let offer = RTCSessionDescription::offer(sdp).map_err(negotiation)?;
                self.pc
                    .set_remote_description(offer)
                    .await
                    .map_err(negotiation)?;
                self.flush_candidates().await;

                let answer = self.pc.create_answer(None).await.map_err(negotiation)?;
                self.pc
                    .set_local_description(answer.clone())
                    .await
                    .map_err(negotiation)?;
                self.shared
                    .emit_signal(NegotiationSignal::Answer { sdp: answer.sdp });
            }
            NegotiationSignal::Answer { sdp } => {
                let answer = RTCSessionDescription::answer(sdp).map_err(negotiation)?;
                self.pc
                    .set_remote_description(answer)
                    .await
                    .map_err(negotiation)?;
                self.flush_candidates().await;
            }
            NegotiationSignal::Candidate { candidate } => {
                let init = RTCIceCandidateInit {
                    candidate: candidate.candidate,
                    sdp_mid: candidate.sdp_mid,
                    sdp_mline_index: candidate.sdp_mline_index,
                    username_fragment: None,
                };
                if self.pc.remote_description().await.is_none() {
                    self.pending_candidates.lock().await.push(init);
                } else {
                    self.pc.add_ice_candidate(init).await.map_err(negotiation)?;
                }
            }
        }
        Ok(())
    }

    async fn send(&self, text: String) -> Result<(), LinkError> {
        if !self.is_connected() {
            return Err(LinkError::NotConnected);
        }
        let channel = self.shared.channel.lock().await.clone();
        let channel = channel.ok_or(LinkError::NotConnected)?;
        channel
            .send_text(text)
            .await
            .map(|_| ())
            .map_err(|err| LinkError::Send(err.to_string()))
    }

    async fn close(&self) {
        self.shared.closed.store(true, Ordering::SeqCst);
        self.shared.connected.store(false, Ordering::SeqCst);
        if let Err(err) = self.pc.close().await {
            tracing::debug!(peer_id = %self.shared.peer_id, error = %err, "Error closing peer connection");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[test]
    fn only_failed_and_closed_end_a_link() {
        assert_eq!(link_outcome(RTCPeerConnectionState::Failed), Some(LinkOutcome::Failed));
        assert_eq!(link_outcome(RTCPeerConnectionState::Closed), Some(LinkOutcome::Closed));
        assert_eq!(link_outcome(RTCPeerConnectionState::Disconnected), None);
        assert_eq!(link_outcome(RTCPeerConnectionState::Connecting), None);
        assert_eq!(link_outcome(RTCPeerConnectionState::Connected), None);
    }

    #[tokio::test]
    async fn initiator_emits_an_offer_signal() {
        let connector = WebRtcConnector::new(&[]);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let link = connector
            .open(LinkRequest {
                local_id: "a".into(),
                remote_id: "b".into(),
                link_id: 3,
                initiator: true,
                events: tx,
            })
            .await
            .unwrap();

        assert!(!link.is_connected());
        match rx.recv().await.unwrap() {
            LinkEvent::Signal {
                peer_id,
                link_id,
                payload,
            } => {
                assert_eq!(peer_id, "b");
                assert_eq!(link_id, 3);
                assert_eq!(payload["type"], "offer");
                assert!(payload["sdp"].as_str().unwrap().starts_with("v=0"));
            }
            other => panic!("expected offer, got {other:?}"),
        }
        link.close().await;
    }
}
