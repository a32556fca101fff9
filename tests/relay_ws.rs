//! 릴레이 WebSocket 프로토콜

mod common;

use common::*;
use futures::{SinkExt, StreamExt};
use serde_json::json;
use std::time::Duration;
use tokio_tungstenite::tungstenite::Message;

#[tokio::test]
async fn first_connection_is_host_and_later_ones_are_not() {
    let (addr, state) = spawn_relay(relay_config(16)).await;

    let (_a, a_id, a_host) = join_raw(addr, &state, "ride-one", "Ana").await;
    let (_b, b_id, b_host) = join_raw(addr, &state, "ride-one", "Ben").await;

    assert!(a_host);
    assert!(!b_host);
    assert_ne!(a_id, b_id);
}

#[tokio::test]
async fn sessions_are_isolated_scopes() {
    let (addr, state) = spawn_relay(relay_config(16)).await;

    let (mut a, _, a_host) = join_raw(addr, &state, "ride-one", "Ana").await;
    let (_b, _, b_host) = join_raw(addr, &state, "ride-two", "Ben").await;

    assert!(a_host);
    assert!(b_host);
    expect_silence(&mut a, Duration::from_millis(200)).await;
}

#[tokio::test]
async fn joiner_receives_existing_announced_peers() {
    let (addr, state) = spawn_relay(relay_config(16)).await;
    let (mut a, a_id, _) = join_raw(addr, &state, "ride", "Ana").await;

    let mut b = ws_connect(addr, "ride").await;
    let id = recv_json(&mut b).await;
    assert_eq!(id["type"], "id");
    assert_eq!(id["isHost"], false);

    let existing = recv_json(&mut b).await;
    assert_eq!(existing["type"], "existing-peers");
    assert_eq!(
        existing["peers"],
        json!([{"id": a_id, "name": "Ana", "ftp": 200, "isHost": true}])
    );

    // 아직 공지하지 않은 피어는 다른 피어에게 보이지 않음
    expect_silence(&mut a, Duration::from_millis(200)).await;
}

#[tokio::test]
async fn join_announcement_reaches_other_peers() {
    let (addr, state) = spawn_relay(relay_config(16)).await;
    let (mut a, _, _) = join_raw(addr, &state, "ride", "Ana").await;

    let mut b = ws_connect(addr, "ride").await;
    let b_id = recv_json(&mut b).await["id"].as_str().unwrap().to_string();
    send_json(&mut b, json!({"type": "join", "name": "Ben", "ftp": 250})).await;

    let joined = recv_json(&mut a).await;
    assert_eq!(
        joined,
        json!({"type": "peer-joined", "peerId": b_id, "name": "Ben", "ftp": 250, "isHost": false})
    );
}

#[tokio::test]
async fn join_without_fields_uses_defaults() {
    let (addr, state) = spawn_relay(relay_config(16)).await;
    let (mut a, _, _) = join_raw(addr, &state, "ride", "Ana").await;

    let mut b = ws_connect(addr, "ride").await;
    recv_json(&mut b).await;
    send_json(&mut b, json!({"type": "join"})).await;

    let joined = recv_json(&mut a).await;
    assert_eq!(joined["name"], "Unnamed");
    assert_eq!(joined["ftp"], 200);
}

#[tokio::test]
async fn signal_is_forwarded_verbatim_to_target() {
    let (addr, state) = spawn_relay(relay_config(16)).await;
    let (mut a, a_id, _) = join_raw(addr, &state, "ride", "Ana").await;
    let (mut b, b_id, _) = join_raw(addr, &state, "ride", "Ben").await;
    recv_json(&mut a).await; // peer-joined
    recv_json(&mut b).await; // existing-peers

    let payload = json!({"type": "offer", "sdp": "v=0\r\nopaque"});
    send_json(&mut a, json!({"type": "signal", "target": b_id, "signal": payload})).await;

    let relayed = recv_json(&mut b).await;
    assert_eq!(relayed, json!({"type": "signal", "from": a_id, "signal": payload}));
}

#[tokio::test]
async fn signal_to_unknown_target_is_dropped() {
    let (addr, state) = spawn_relay(relay_config(16)).await;
    let (mut a, _, _) = join_raw(addr, &state, "ride", "Ana").await;
    let (mut b, _, _) = join_raw(addr, &state, "ride", "Ben").await;
    recv_json(&mut a).await;
    recv_json(&mut b).await;

    send_json(&mut a, json!({"type": "signal", "target": "nobody", "signal": {}})).await;
    send_json(&mut a, json!({"type": "signal", "signal": {}})).await;

    expect_silence(&mut a, Duration::from_millis(200)).await;
    expect_silence(&mut b, Duration::from_millis(200)).await;
}

#[tokio::test]
async fn signal_does_not_cross_sessions() {
    let (addr, state) = spawn_relay(relay_config(16)).await;
    let (mut a, _, _) = join_raw(addr, &state, "ride-one", "Ana").await;
    let (mut b, b_id, _) = join_raw(addr, &state, "ride-two", "Ben").await;

    send_json(&mut a, json!({"type": "signal", "target": b_id, "signal": {}})).await;
    expect_silence(&mut b, Duration::from_millis(200)).await;
}

#[tokio::test]
async fn request_join_goes_only_to_host() {
    let (addr, state) = spawn_relay(relay_config(16)).await;
    let (mut a, _, _) = join_raw(addr, &state, "ride", "Ana").await;
    let (mut b, _, _) = join_raw(addr, &state, "ride", "Ben").await;
    let (mut c, c_id, _) = join_raw(addr, &state, "ride", "Cy").await;
    recv_json(&mut a).await; // Ben joined
    recv_json(&mut a).await; // Cy joined
    recv_json(&mut b).await; // existing-peers
    recv_json(&mut b).await; // Cy joined
    recv_json(&mut c).await; // existing-peers

    send_json(&mut c, json!({"type": "request-join", "name": "Cy"})).await;

    let request = recv_json(&mut a).await;
    assert_eq!(request, json!({"type": "request-join", "from": c_id, "name": "Cy"}));
    expect_silence(&mut b, Duration::from_millis(200)).await;
}

#[tokio::test]
async fn broadcast_reaches_everyone_but_the_sender() {
    let (addr, state) = spawn_relay(relay_config(16)).await;
    let (mut a, a_id, _) = join_raw(addr, &state, "ride", "Ana").await;
    let (mut b, _, _) = join_raw(addr, &state, "ride", "Ben").await;
    recv_json(&mut a).await;
    recv_json(&mut b).await;

    let data = json!({"type": "end-workout"});
    send_json(&mut a, json!({"type": "broadcast", "data": data})).await;

    assert_eq!(
        recv_json(&mut b).await,
        json!({"type": "broadcast", "from": a_id, "data": data})
    );
    expect_silence(&mut a, Duration::from_millis(200)).await;
}

#[tokio::test]
async fn non_host_leaving_emits_peer_left_only() {
    let (addr, state) = spawn_relay(relay_config(16)).await;
    let (mut a, _, _) = join_raw(addr, &state, "ride", "Ana").await;
    let (b, b_id, _) = join_raw(addr, &state, "ride", "Ben").await;
    recv_json(&mut a).await;

    drop(b);

    assert_eq!(recv_json(&mut a).await, json!({"type": "peer-left", "peerId": b_id}));
    expect_silence(&mut a, Duration::from_millis(200)).await;
}

#[tokio::test]
async fn host_leaving_hands_over_to_earliest_remaining() {
    let (addr, state) = spawn_relay(relay_config(16)).await;
    let (a, a_id, _) = join_raw(addr, &state, "ride", "Ana").await;
    let (mut b, b_id, _) = join_raw(addr, &state, "ride", "Ben").await;
    let (mut c, _, _) = join_raw(addr, &state, "ride", "Cy").await;
    recv_json(&mut b).await; // existing-peers
    recv_json(&mut b).await; // Cy joined
    recv_json(&mut c).await; // existing-peers

    drop(a);

    for socket in [&mut b, &mut c] {
        assert_eq!(recv_json(socket).await, json!({"type": "peer-left", "peerId": a_id}));
        assert_eq!(recv_json(socket).await, json!({"type": "host-changed", "peerId": b_id}));
    }

    // 새로 들어오는 피어는 호스트가 아님
    let (_d, _, d_host) = join_raw(addr, &state, "ride", "Di").await;
    assert!(!d_host);
}

#[tokio::test]
async fn invalid_json_gets_an_error_reply_and_connection_survives() {
    let (addr, state) = spawn_relay(relay_config(16)).await;
    let (mut a, _, _) = join_raw(addr, &state, "ride", "Ana").await;
    let (mut b, _, _) = join_raw(addr, &state, "ride", "Ben").await;
    recv_json(&mut a).await;
    recv_json(&mut b).await;

    a.send(Message::Text("{not json".into())).await.unwrap();
    assert_eq!(
        recv_json(&mut a).await,
        json!({"type": "error", "message": "Invalid message format"})
    );

    // 알 수 없는 타입은 조용히 무시
    send_json(&mut a, json!({"type": "teleport"})).await;
    expect_silence(&mut a, Duration::from_millis(200)).await;

    send_json(&mut a, json!({"type": "broadcast", "data": {"ok": true}})).await;
    assert_eq!(recv_json(&mut b).await["data"], json!({"ok": true}));
}

#[tokio::test]
async fn full_session_rejects_extra_connections() {
    let (addr, state) = spawn_relay(relay_config(2)).await;
    let (_a, _, _) = join_raw(addr, &state, "ride", "Ana").await;
    let (_b, _, _) = join_raw(addr, &state, "ride", "Ben").await;

    let mut c = ws_connect(addr, "ride").await;
    assert_eq!(
        recv_json(&mut c).await,
        json!({"type": "error", "message": "Session is full"})
    );
    let next = tokio::time::timeout(WAIT, c.next()).await.unwrap();
    assert!(matches!(next, None | Some(Ok(Message::Close(_))) | Some(Err(_))));
}

#[tokio::test]
async fn empty_session_scope_is_removed() {
    let (addr, state) = spawn_relay(relay_config(16)).await;
    let (a, _, _) = join_raw(addr, &state, "ride", "Ana").await;
    assert!(state.session("ride").is_some());

    drop(a);
    tokio::time::timeout(WAIT, async {
        while state.session("ride").is_some() || !state.peers.is_empty() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("session scope was not removed");
}
