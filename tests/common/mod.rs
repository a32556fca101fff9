//! 통합 테스트 공용 도우미

#![allow(dead_code)]

use futures::{SinkExt, StreamExt};
use groupride_sync::client::{
    MemoryNetwork, MemorySessionStore, SessionClient, SessionEvent,
};
use groupride_sync::config::{Config, SessionConfig};
use groupride_sync::{handlers, AppState, ClientConfig};
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

pub const WAIT: Duration = Duration::from_secs(5);

pub fn relay_config(max_size: usize) -> Config {
    Config {
        session: SessionConfig {
            max_size,
            sweep_interval: Duration::from_secs(300),
        },
        ..Config::default()
    }
}

/// 임의 포트에 릴레이를 띄우고 주소 반환
pub async fn spawn_relay(config: Config) -> (SocketAddr, Arc<AppState>) {
    let state = Arc::new(AppState::new(config));
    let app = handlers::create_router(state.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, state)
}

pub type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub async fn ws_connect(addr: SocketAddr, session_id: &str) -> Socket {
    let (socket, _) = connect_async(format!("ws://{addr}/signal/{session_id}"))
        .await
        .unwrap();
    socket
}

pub async fn send_json(socket: &mut Socket, value: Value) {
    socket.send(Message::Text(value.to_string())).await.unwrap();
}

/// 다음 텍스트 프레임을 JSON으로
pub async fn recv_json(socket: &mut Socket) -> Value {
    loop {
        let frame = tokio::time::timeout(WAIT, socket.next())
            .await
            .expect("timed out waiting for relay message")
            .expect("relay closed the socket")
            .unwrap();
        if let Message::Text(text) = frame {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

/// `type`이 `kind`인 메시지가 올 때까지 나머지는 건너뜀
pub async fn recv_type(socket: &mut Socket, kind: &str) -> Value {
    loop {
        let value = recv_json(socket).await;
        if value["type"] == kind {
            return value;
        }
    }
}

/// 지정 시간 동안 아무 텍스트 프레임도 오지 않아야 함
pub async fn expect_silence(socket: &mut Socket, window: Duration) {
    if let Ok(Some(Ok(Message::Text(text)))) = tokio::time::timeout(window, socket.next()).await {
        panic!("unexpected relay message: {text}");
    }
}

/// 연결 후 `id` 메시지까지 받고 피어 ID 반환
/// 릴레이가 `join`을 기록할 때까지 기다려 이후 입장자의 `existing-peers`에 포함되게 함
pub async fn join_raw(
    addr: SocketAddr,
    state: &AppState,
    session_id: &str,
    name: &str,
) -> (Socket, String, bool) {
    let mut socket = ws_connect(addr, session_id).await;
    let id = recv_json(&mut socket).await;
    assert_eq!(id["type"], "id");
    let peer_id = id["id"].as_str().unwrap().to_string();
    let is_host = id["isHost"].as_bool().unwrap();
    send_json(
        &mut socket,
        serde_json::json!({"type": "join", "name": name, "ftp": 200}),
    )
    .await;
    tokio::time::timeout(WAIT, async {
        while !state
            .peers
            .get(&peer_id)
            .is_some_and(|peer| peer.metadata.is_some())
        {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("join was not recorded");
    (socket, peer_id, is_host)
}

pub fn client_config(addr: SocketAddr) -> ClientConfig {
    ClientConfig {
        signaling_url: format!("ws://{addr}"),
        signaling_timeout: Duration::from_secs(2),
        ..ClientConfig::default()
    }
}

pub fn new_client(addr: SocketAddr, network: &MemoryNetwork) -> (SessionClient, Arc<MemorySessionStore>) {
    let store = Arc::new(MemorySessionStore::new());
    let client = SessionClient::new(client_config(addr), Arc::new(network.clone()), store.clone());
    (client, store)
}

/// 조건을 만족하는 이벤트가 올 때까지 대기
pub async fn wait_for<F>(events: &mut broadcast::Receiver<SessionEvent>, mut pred: F) -> SessionEvent
where
    F: FnMut(&SessionEvent) -> bool,
{
    tokio::time::timeout(WAIT, async {
        loop {
            match events.recv().await {
                Ok(event) if pred(&event) => return event,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("event channel closed"),
            }
        }
    })
    .await
    .expect("timed out waiting for session event")
}

/// 클라이언트 상태가 조건을 만족할 때까지 폴링
pub async fn eventually<F>(mut check: F)
where
    F: FnMut() -> bool,
{
    tokio::time::timeout(WAIT, async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}
