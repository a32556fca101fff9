//! 프로세스 내 피어 링크
//!
//! 같은 `MemoryNetwork`를 공유하는 클라이언트끼리 채널로 연결합니다. 협상
//! 페이로드는 실제 링크와 같은 모양으로 릴레이를 거치므로 시그널링 경로 전체를
//! 그대로 검증할 수 있습니다.

use super::link::{LinkEvent, LinkRequest, NegotiationSignal, PeerConnector, PeerLink};
use crate::error::LinkError;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc::UnboundedSender;

type EndpointKey = (String, String);

#[derive(Clone)]
struct Endpoint {
    link_id: u64,
    events: UnboundedSender<LinkEvent>,
    connected: Arc<AtomicBool>,
    closed: Arc<AtomicBool>,
}

/// 공유 가능한 가상 네트워크
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    endpoints: Arc<Mutex<HashMap<EndpointKey, Endpoint>>>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    fn endpoint(&self, local: &str, remote: &str) -> Option<Endpoint> {
        self.endpoints
            .lock()
            .ok()
            .and_then(|map| map.get(&(local.to_string(), remote.to_string())).cloned())
    }

    fn register(&self, local: &str, remote: &str, endpoint: Endpoint) {
        if let Ok(mut map) = self.endpoints.lock() {
            map.insert((local.to_string(), remote.to_string()), endpoint);
        }
    }

    fn unregister(&self, local: &str, remote: &str, link_id: u64) {
        if let Ok(mut map) = self.endpoints.lock() {
            let key = (local.to_string(), remote.to_string());
            if map.get(&key).is_some_and(|e| e.link_id == link_id) {
                map.remove(&key);
            }
        }
    }

    /// 두 피어 사이의 링크를 양쪽 모두 끊음 (네트워크 단절 흉내)
    pub fn sever(&self, a: &str, b: &str) {
        for (local, remote) in [(a, b), (b, a)] {
            if let Some(endpoint) = self.endpoint(local, remote) {
                self.unregister(local, remote, endpoint.link_id);
                notify_closed(&endpoint, remote);
            }
        }
    }

    /// 연결된 링크 수 (양방향 각각 계산)
    pub fn connected_links(&self) -> usize {
        self.endpoints
            .lock()
            .map(|map| {
                map.values()
                    .filter(|e| e.connected.load(Ordering::SeqCst))
                    .count()
            })
            .unwrap_or(0)
    }
}

fn notify_closed(endpoint: &Endpoint, remote: &str) {
    endpoint.connected.store(false, Ordering::SeqCst);
    if !endpoint.closed.swap(true, Ordering::SeqCst) {
        let _ = endpoint.events.send(LinkEvent::Closed {
            peer_id: remote.to_string(),
            link_id: endpoint.link_id,
        });
    }
}

#[async_trait]
impl PeerConnector for MemoryNetwork {
    async fn open(&self, request: LinkRequest) -> Result<Arc<dyn PeerLink>, LinkError> {
        let link = MemoryLink {
            network: self.clone(),
            local_id: request.local_id,
            remote_id: request.remote_id,
            link_id: request.link_id,
            events: request.events,
            connected: Arc::new(AtomicBool::new(false)),
            closed: Arc::new(AtomicBool::new(false)),
        };
        self.register(&link.local_id, &link.remote_id, link.endpoint());

        if request.initiator {
            link.emit_signal(NegotiationSignal::Offer {
                sdp: format!("memory:{}", link.local_id),
            });
        }

        Ok(Arc::new(link))
    }
}

/// `MemoryNetwork` 위의 링크
pub struct MemoryLink {
    network: MemoryNetwork,
    local_id: String,
    remote_id: String,
    link_id: u64,
    events: UnboundedSender<LinkEvent>,
    connected: Arc<AtomicBool>,
    closed: Arc<AtomicBool>,
}

impl MemoryLink {
    fn endpoint(&self) -> Endpoint {
        Endpoint {
            link_id: self.link_id,
            events: self.events.clone(),
            connected: self.connected.clone(),
            closed: self.closed.clone(),
        }
    }

    fn emit_signal(&self, signal: NegotiationSignal) {
        let _ = self.events.send(LinkEvent::Signal {
            peer_id: self.remote_id.clone(),
            link_id: self.link_id,
            payload: signal.to_value(),
        });
    }

    fn mark_connected(&self) {
        if !self.connected.swap(true, Ordering::SeqCst) {
            let _ = self.events.send(LinkEvent::Connected {
                peer_id: self.remote_id.clone(),
                link_id: self.link_id,
            });
        }
    }

    fn counterpart(&self) -> Option<Endpoint> {
        self.network.endpoint(&self.remote_id, &self.local_id)
    }
}

#[async_trait]
impl PeerLink for MemoryLink {
    fn peer_id(&self) -> &str {
        &self.remote_id
    }

    fn link_id(&self) -> u64 {
        self.link_id
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn signal(&self, payload: Value) -> Result<(), LinkError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(LinkError::NotConnected);
        }
        match NegotiationSignal::from_value(payload)? {
            NegotiationSignal::Offer { .. } => {
                if self.counterpart().is_none() {
                    return Err(LinkError::Negotiation(format!(
                        "no pending offer from {}",
                        self.remote_id
                    )));
                }
                self.mark_connected();
                self.emit_signal(NegotiationSignal::Answer {
                    sdp: format!("memory:{}", self.local_id),
                });
            }
            NegotiationSignal::Answer { .. } => {
                let answered = self
                    .counterpart()
                    .is_some_and(|e| e.connected.load(Ordering::SeqCst));
                if !answered {
                    return Err(LinkError::Negotiation(format!(
                        "answer from {} without a live endpoint",
                        self.remote_id
                    )));
                }
                self.mark_connected();
            }
            NegotiationSignal::Candidate { .. } => {}
        }
        Ok(())
    }

    async fn send(&self, text: String) -> Result<(), LinkError> {
        if !self.is_connected() {
            return Err(LinkError::NotConnected);
        }
        let counterpart = self
            .counterpart()
            .filter(|e| !e.closed.load(Ordering::SeqCst))
            .ok_or(LinkError::NotConnected)?;
        counterpart
            .events
            .send(LinkEvent::Data {
                peer_id: self.local_id.clone(),
                link_id: counterpart.link_id,
                text,
            })
            .map_err(|err| LinkError::Send(err.to_string()))
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.connected.store(false, Ordering::SeqCst);
        self.network
            .unregister(&self.local_id, &self.remote_id, self.link_id);
        if let Some(counterpart) = self.counterpart() {
            notify_closed(&counterpart, &self.local_id);
        }
    }
}
