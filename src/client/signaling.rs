//! 릴레이 WebSocket 연결
//!
//! 쓰기/읽기 태스크 두 개로 나뉘며, 세션 클라이언트는 채널로만 주고받습니다.
//! 핸들이 drop되면 두 태스크 모두 중단됩니다.

use crate::error::SessionError;
use crate::protocol::{ClientMessage, ServerMessage};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use url::Url;

/// 릴레이 연결 핸들
pub struct SignalingConnection {
    outgoing: mpsc::UnboundedSender<ClientMessage>,
    writer: JoinHandle<()>,
    reader: JoinHandle<()>,
}

/// `{base}/signal/{session_id}`
pub fn session_url(base: &str, session_id: &str) -> Result<Url, SessionError> {
    let mut url = Url::parse(base).map_err(|err| SessionError::Signaling(err.to_string()))?;
    match url.scheme() {
        "ws" | "wss" => {}
        "http" => set_scheme(&mut url, "ws")?,
        "https" => set_scheme(&mut url, "wss")?,
        other => {
            return Err(SessionError::Signaling(format!(
                "unsupported relay scheme: {other}"
            )))
        }
    }
    url.path_segments_mut()
        .map_err(|_| SessionError::Signaling(format!("relay url cannot be a base: {base}")))?
        .pop_if_empty()
        .extend(["signal", session_id]);
    Ok(url)
}

fn set_scheme(url: &mut Url, scheme: &str) -> Result<(), SessionError> {
    url.set_scheme(scheme)
        .map_err(|_| SessionError::Signaling(format!("cannot switch relay url to {scheme}")))
}

impl SignalingConnection {
    /// 연결 후 수신 메시지 채널을 함께 반환
    pub async fn connect(
        base_url: &str,
        session_id: &str,
    ) -> Result<(Self, mpsc::UnboundedReceiver<ServerMessage>), SessionError> {
        let url = session_url(base_url, session_id)?;
        tracing::debug!(url = %url, "Connecting to signaling relay");

        let (stream, _) = connect_async(url.as_str())
            .await
            .map_err(|err| SessionError::Signaling(err.to_string()))?;
        let (mut ws_write, mut ws_read) = stream.split();

        let (outgoing, mut outgoing_rx) = mpsc::unbounded_channel::<ClientMessage>();
        let (incoming_tx, incoming) = mpsc::unbounded_channel::<ServerMessage>();

        let writer = tokio::spawn(async move {
            while let Some(msg) = outgoing_rx.recv().await {
                let text = match serde_json::to_string(&msg) {
                    Ok(text) => text,
                    Err(err) => {
                        tracing::warn!(error = %err, "Failed to encode relay message");
                        continue;
                    }
                };
                if ws_write.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
            let _ = ws_write.send(Message::Close(None)).await;
        });

        let reader = tokio::spawn(async move {
            while let Some(frame) = ws_read.next().await {
                let text = match frame {
                    Ok(Message::Text(text)) => text,
                    Ok(Message::Binary(data)) => match String::from_utf8(data) {
                        Ok(text) => text,
                        Err(_) => {
                            tracing::warn!("Ignoring non UTF-8 relay frame");
                            continue;
                        }
                    },
                    Ok(Message::Close(_)) => break,
                    Ok(_) => continue,
                    Err(err) => {
                        tracing::debug!(error = %err, "Signaling stream error");
                        break;
                    }
                };

                match serde_json::from_str::<ServerMessage>(&text) {
                    Ok(msg) => {
                        if incoming_tx.send(msg).is_err() {
                            break;
                        }
                    }
                    Err(err) => {
                        tracing::warn!(error = %err, raw = %text, "Ignoring malformed relay message");
                    }
                }
            }
            tracing::debug!("Signaling reader finished");
        });

        Ok((
            Self {
                outgoing,
                writer,
                reader,
            },
            incoming,
        ))
    }

    /// 큐에 넣기만 함. 연결이 끊겼으면 `false`.
    pub fn send(&self, msg: ClientMessage) -> bool {
        self.outgoing.send(msg).is_ok()
    }

    pub fn sender(&self) -> mpsc::UnboundedSender<ClientMessage> {
        self.outgoing.clone()
    }

    pub fn close(&self) {
        self.reader.abort();
        self.writer.abort();
    }
}

impl Drop for SignalingConnection {
    fn drop(&mut self) {
        self.close();
    }
}
