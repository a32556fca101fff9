//! 세션 클라이언트
//!
//! 참가자 한 명의 세션 멤버십을 관리합니다.
//!
//! - 릴레이 연결과 ID 획득 (`Idle` → `SignalingConnecting` → `Identified`)
//! - 로스터 유지와 호스트 판정 (릴레이가 준 값을 그대로 신뢰)
//! - 피어 링크 협상 (호스트가 개시자, 나머지는 응답자)
//! - 링크 위 애플리케이션 메시지 처리와 호스트 중계
//!
//! 릴레이 메시지와 링크 이벤트는 세션마다 하나인 드라이버 태스크가 순서대로
//! 처리합니다. 공개 API는 상태 락을 짧게 잡고 스냅샷한 링크로만 전송합니다.

use super::code::{generate_session_code, normalize_session_code};
use super::countdown::spawn_countdown;
use super::events::SessionEvent;
use super::link::{LinkEvent, LinkRequest, PeerConnector, PeerLink};
use super::roster::{Participant, Roster};
use super::signaling::SignalingConnection;
use super::store::{clear_quietly, load_valid_record, SessionRecord, SessionStore};
use crate::config::ClientConfig;
use crate::error::SessionError;
use crate::protocol::{ClientMessage, PeerMessage, ServerMessage, SharedWorkout};
use chrono::Utc;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;

const EVENT_CAPACITY: usize = 256;
const MIN_FTP: u32 = 50;
const MAX_FTP: u32 = 500;

/// 클라이언트 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    SignalingConnecting,
    Identified,
    Active,
    Disconnected,
}

/// create/join 결과
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub session_id: String,
    pub peer_id: String,
}

/// 초대용 정보
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ShareInfo {
    pub session_id: String,
    pub peer_id: String,
}

impl ShareInfo {
    pub fn invite_text(&self) -> String {
        format!(
            "Join my group ride!\n\nSession Code:\n{}\n\nEnter this code to join.",
            self.session_id
        )
    }
}

struct State {
    phase: Phase,
    /// create/join마다 증가. 이전 세션의 늦은 이벤트를 걸러냄.
    generation: u64,
    session_id: Option<String>,
    local_id: Option<String>,
    user_name: String,
    is_host: bool,
    local_ftp: u32,
    created_at: i64,
    roster: Roster,
    links: HashMap<String, Arc<dyn PeerLink>>,
    next_link_id: u64,
    link_events: Option<mpsc::UnboundedSender<LinkEvent>>,
    signaling: Option<SignalingConnection>,
    shutdown: Option<oneshot::Sender<()>>,
    workout: Option<SharedWorkout>,
    countdown: Option<JoinHandle<()>>,
    /// 마지막으로 받은 동기화 시작 시각. 종료 후에도 남아 늦게 온 중복 시작을 걸러냄.
    last_start: Option<i64>,
    /// 마지막 `end-workout` 이후 새 시작이 없음. 링크와 릴레이로 중복 도착한 종료를 걸러냄.
    ended: bool,
}

impl State {
    fn new(default_ftp: u32) -> Self {
        Self {
            phase: Phase::Idle,
            generation: 0,
            session_id: None,
            local_id: None,
            user_name: String::new(),
            is_host: false,
            local_ftp: default_ftp,
            created_at: 0,
            roster: Roster::new(),
            links: HashMap::new(),
            next_link_id: 0,
            link_events: None,
            signaling: None,
            shutdown: None,
            workout: None,
            countdown: None,
            last_start: None,
            ended: false,
        }
    }

    fn in_session(&self) -> bool {
        matches!(self.phase, Phase::Identified | Phase::Active)
    }

    fn record(&self) -> Option<SessionRecord> {
        Some(SessionRecord {
            session_id: self.session_id.clone()?,
            is_host: self.is_host,
            user_name: self.user_name.clone(),
            created_at: self.created_at,
            workout: self.workout.clone(),
        })
    }

    fn relay(&self, msg: ClientMessage) {
        match &self.signaling {
            Some(conn) if conn.send(msg) => {}
            _ => tracing::debug!("Signaling connection unavailable, relay message dropped"),
        }
    }

    /// 원격 참가자 중 연결된 링크가 없는 사람이 있는지
    fn has_unlinked_peers(&self) -> bool {
        let local = self.local_id.as_deref();
        self.roster.ids().iter().any(|id| {
            Some(id.as_str()) != local
                && !self.links.get(id).is_some_and(|link| link.is_connected())
        })
    }
}

struct Inner {
    config: ClientConfig,
    connector: Arc<dyn PeerConnector>,
    store: Arc<dyn SessionStore>,
    events: broadcast::Sender<SessionEvent>,
    state: Mutex<State>,
}

/// 세션 클라이언트 핸들 (복제해도 같은 세션을 가리킴)
#[derive(Clone)]
pub struct SessionClient {
    inner: Arc<Inner>,
}

impl SessionClient {
    pub fn new(
        config: ClientConfig,
        connector: Arc<dyn PeerConnector>,
        store: Arc<dyn SessionStore>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let state = State::new(config.default_ftp);
        Self {
            inner: Arc::new(Inner {
                config,
                connector,
                store,
                events,
                state: Mutex::new(state),
            }),
        }
    }

    /// 이벤트 구독. 구독자는 여러 개일 수 있음.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    /// 새 세션 코드를 만들고 호스트로 입장
    pub async fn create_session(&self, user_name: &str) -> Result<SessionInfo, SessionError> {
        let code = generate_session_code();
        self.inner.connect(code, user_name).await
    }

    /// 기존 세션 코드로 입장. 형식이 틀린 코드는 연결 전에 거부.
    pub async fn join_session(
        &self,
        session_code: &str,
        user_name: &str,
    ) -> Result<SessionInfo, SessionError> {
        let code = normalize_session_code(session_code)?;
        self.inner.connect(code, user_name).await
    }

    /// 저장된 세션 재입장. 기록이 없거나 만료되었거나 재입장에 실패하면 `None`.
    pub async fn restore_session(&self) -> Option<SessionInfo> {
        if self.inner.state().in_session() {
            return None;
        }
        let now = Utc::now().timestamp_millis();
        let record = load_valid_record(
            self.inner.store.as_ref(),
            now,
            self.inner.config.session_ttl,
        )?;

        tracing::info!(
            session_id = %record.session_id,
            is_host = record.is_host,
            "Restoring session"
        );

        match self
            .inner
            .connect(record.session_id.clone(), &record.user_name)
            .await
        {
            Ok(info) => {
                if let Some(workout) = record.workout {
                    let restored = {
                        let mut st = self.inner.state();
                        if st.is_host && st.workout.is_none() {
                            st.workout = Some(workout);
                            st.record()
                        } else {
                            None
                        }
                    };
                    if let Some(record) = restored {
                        self.inner.save_record(record);
                    }
                }
                Some(info)
            }
            Err(err) => {
                tracing::warn!(error = %err, "Session restore failed, discarding stored session");
                clear_quietly(self.inner.store.as_ref());
                None
            }
        }
    }

    /// 모든 링크와 릴레이 연결을 닫음. 어떤 상태에서 불러도 안전.
    pub async fn disconnect(&self) {
        self.inner.disconnect().await;
    }

    /// 내 메트릭 갱신 후 연결된 모든 링크로 전송. 준비 안 된 링크는 건너뜀.
    pub async fn broadcast_metrics(&self, power: u32, cadence: u32, progress: f64, heart_rate: u32) {
        let in_session = {
            let mut st = self.inner.state();
            if let Some(local) = st.local_id.clone() {
                st.roster
                    .update_metrics(&local, power, cadence, heart_rate, progress);
            }
            st.in_session()
        };
        if !in_session {
            return;
        }

        let message = PeerMessage::Metrics {
            peer_id: None,
            power,
            cadence,
            heart_rate,
            progress: if progress.is_finite() {
                progress.clamp(0.0, 1.0)
            } else {
                0.0
            },
        };
        self.inner.broadcast(&message, None).await;
    }

    /// FTP 변경. 세션 밖에서는 다음 입장 공지에 쓰일 값만 바꿈.
    pub async fn update_ftp(&self, ftp: u32) -> Result<(), SessionError> {
        if !(MIN_FTP..=MAX_FTP).contains(&ftp) {
            return Err(SessionError::InvalidFtp(ftp));
        }
        let in_session = {
            let mut st = self.inner.state();
            st.local_ftp = ftp;
            if let Some(local) = st.local_id.clone() {
                st.roster.update_ftp(&local, ftp);
            }
            let in_session = st.in_session();
            if in_session {
                self.inner.emit_roster(&st);
            }
            in_session
        };

        if in_session {
            let message = PeerMessage::FtpUpdate { peer_id: None, ftp };
            self.inner.broadcast(&message, None).await;
        }
        Ok(())
    }

    /// 호스트 전용. 워크아웃을 공유하고 이후 연결되는 피어에게도 전달.
    pub async fn share_workout(&self, workout: SharedWorkout) -> Result<(), SessionError> {
        let record = {
            let mut st = self.inner.state();
            self.inner.require_host(&st)?;
            st.workout = Some(workout.clone());
            st.record()
        };
        if let Some(record) = record {
            self.inner.save_record(record);
        }

        tracing::info!(name = %workout.name, intervals = workout.intervals.len(), "Sharing workout");
        self.inner
            .broadcast(&PeerMessage::Workout { workout }, None)
            .await;
        Ok(())
    }

    /// 호스트 전용. `countdown_secs` 후 시작하는 동기화 카운트다운. 시작 시각(유닉스 밀리초) 반환.
    pub async fn start_synchronized_workout(&self, countdown_secs: u64) -> Result<i64, SessionError> {
        let start_time = {
            let st = self.inner.state();
            self.inner.require_host(&st)?;
            Utc::now().timestamp_millis() + (countdown_secs as i64) * 1000
        };

        self.inner.begin_countdown(start_time);
        self.inner
            .broadcast_control(PeerMessage::StartCountdown { start_time })
            .await;
        Ok(start_time)
    }

    /// 호스트 전용. 진행 중인 카운트다운/운동 종료.
    pub async fn end_workout(&self) -> Result<(), SessionError> {
        {
            let st = self.inner.state();
            self.inner.require_host(&st)?;
        }
        self.inner.broadcast_control(PeerMessage::EndWorkout).await;
        self.inner.end_local_workout();
        Ok(())
    }

    pub fn share_info(&self) -> Option<ShareInfo> {
        let st = self.inner.state();
        if !st.in_session() {
            return None;
        }
        Some(ShareInfo {
            session_id: st.session_id.clone()?,
            peer_id: st.local_id.clone()?,
        })
    }

    /// 나를 포함한 로스터 스냅샷 (입장 순서)
    pub fn participants(&self) -> Vec<Participant> {
        self.inner.state().roster.snapshot()
    }

    /// 나를 뺀 로스터 스냅샷
    pub fn remote_participants(&self) -> Vec<Participant> {
        let st = self.inner.state();
        let local = st.local_id.clone();
        st.roster
            .snapshot()
            .into_iter()
            .filter(|p| Some(&p.id) != local.as_ref())
            .collect()
    }

    pub fn shared_workout(&self) -> Option<SharedWorkout> {
        self.inner.state().workout.clone()
    }

    pub fn is_host(&self) -> bool {
        self.inner.state().is_host
    }

    pub fn phase(&self) -> Phase {
        self.inner.state().phase
    }

    pub fn local_peer_id(&self) -> Option<String> {
        self.inner.state().local_id.clone()
    }

    pub fn session_id(&self) -> Option<String> {
        self.inner.state().session_id.clone()
    }

    /// 연결 완료된 피어 링크 ID 목록
    pub fn connected_peers(&self) -> Vec<String> {
        let st = self.inner.state();
        let mut peers: Vec<String> = st
            .links
            .iter()
            .filter(|(_, link)| link.is_connected())
            .map(|(id, _)| id.clone())
            .collect();
        peers.sort();
        peers
    }
}

impl Inner {
    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }

    fn emit_roster(&self, st: &State) {
        self.emit(SessionEvent::RosterChanged(st.roster.snapshot()));
    }

    fn require_host(&self, st: &State) -> Result<(), SessionError> {
        if !st.in_session() {
            return Err(SessionError::NotInSession);
        }
        if !st.is_host {
            return Err(SessionError::NotHost);
        }
        Ok(())
    }

    fn save_record(&self, record: SessionRecord) {
        if let Err(err) = self.store.save(&record) {
            tracing::warn!(error = %err, "Failed to persist session state");
        }
    }

    // ========================================================================
    // Connect / Disconnect
    // ========================================================================

    async fn connect(
        self: &Arc<Self>,
        session_id: String,
        user_name: &str,
    ) -> Result<SessionInfo, SessionError> {
        let generation = {
            let mut st = self.state();
            if matches!(
                st.phase,
                Phase::SignalingConnecting | Phase::Identified | Phase::Active
            ) {
                return Err(SessionError::AlreadyActive);
            }
            st.phase = Phase::SignalingConnecting;
            st.generation += 1;
            st.generation
        };

        tracing::info!(session_id = %session_id, "Connecting to session");

        let timeout = self.config.signaling_timeout;
        let opened = match tokio::time::timeout(timeout, self.open_signaling(&session_id)).await {
            Ok(result) => result,
            Err(_) => Err(SessionError::SignalingTimeout(timeout)),
        };

        let (connection, incoming, local_id, is_host, backlog) = match opened {
            Ok(opened) => opened,
            Err(err) => {
                tracing::warn!(session_id = %session_id, error = %err, "Signaling connection failed");
                let mut st = self.state();
                if st.generation == generation {
                    st.phase = Phase::Idle;
                }
                return Err(err);
            }
        };

        let (link_tx, link_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let record = {
            let mut st = self.state();
            if st.generation != generation || st.phase != Phase::SignalingConnecting {
                // 연결 중에 disconnect()가 불림
                return Err(SessionError::SignalingClosed);
            }

            st.phase = Phase::Identified;
            st.session_id = Some(session_id.clone());
            st.local_id = Some(local_id.clone());
            st.user_name = user_name.to_string();
            st.is_host = is_host;
            st.created_at = Utc::now().timestamp_millis();
            st.roster.clear();
            st.links.clear();
            st.workout = None;
            st.last_start = None;
            st.ended = false;

            let ftp = st.local_ftp;
            st.roster.upsert(&local_id, user_name, ftp, is_host);

            connection.send(ClientMessage::Join {
                name: Some(user_name.to_string()),
                ftp: Some(ftp),
            });

            st.signaling = Some(connection);
            st.link_events = Some(link_tx);
            st.shutdown = Some(shutdown_tx);
            self.emit_roster(&st);
            st.record()
        };

        if let Some(record) = record {
            self.save_record(record);
        }

        tokio::spawn(drive(
            Arc::downgrade(self),
            generation,
            incoming,
            link_rx,
            shutdown_rx,
            backlog,
        ));

        tracing::info!(
            session_id = %session_id,
            peer_id = %local_id,
            is_host = is_host,
            "Joined session"
        );

        Ok(SessionInfo {
            session_id,
            peer_id: local_id,
        })
    }

    /// 릴레이에 연결하고 `id` 메시지를 기다림. 그 전에 온 메시지는 backlog로.
    async fn open_signaling(
        &self,
        session_id: &str,
    ) -> Result<
        (
            SignalingConnection,
            mpsc::UnboundedReceiver<ServerMessage>,
            String,
            bool,
            Vec<ServerMessage>,
        ),
        SessionError,
    > {
        let (connection, mut incoming) =
            SignalingConnection::connect(&self.config.signaling_url, session_id).await?;

        let mut backlog = Vec::new();
        loop {
            match incoming.recv().await {
                Some(ServerMessage::Id { id, is_host }) => {
                    return Ok((connection, incoming, id, is_host, backlog));
                }
                Some(ServerMessage::Error { message }) => {
                    return Err(SessionError::Signaling(message));
                }
                Some(other) => backlog.push(other),
                None => return Err(SessionError::SignalingClosed),
            }
        }
    }

    async fn disconnect(&self) {
        let (links, signaling, countdown, was_in_session) = {
            let mut st = self.state();
            let was_in_session = st.phase != Phase::Idle && st.phase != Phase::Disconnected;
            if st.phase != Phase::Idle {
                st.phase = Phase::Disconnected;
            }
            st.generation += 1;
            st.session_id = None;
            st.local_id = None;
            st.is_host = false;
            st.roster.clear();
            st.workout = None;
            st.last_start = None;
            st.ended = false;
            st.link_events = None;
            st.shutdown = None;
            let links: Vec<Arc<dyn PeerLink>> = st.links.drain().map(|(_, link)| link).collect();
            (links, st.signaling.take(), st.countdown.take(), was_in_session)
        };

        if let Some(countdown) = countdown {
            countdown.abort();
        }
        if let Some(signaling) = signaling {
            signaling.close();
        }
        for link in links {
            link.close().await;
        }
        clear_quietly(self.store.as_ref());

        if was_in_session {
            tracing::info!("Disconnected from session");
            self.emit(SessionEvent::Disconnected);
        }
    }

    // ========================================================================
    // Relay Messages
    // ========================================================================

    async fn handle_relay(self: &Arc<Self>, generation: u64, msg: ServerMessage) {
        if self.state().generation != generation {
            return;
        }

        match msg {
            ServerMessage::Id { id, .. } => {
                tracing::debug!(peer_id = %id, "Ignoring repeated identity message");
            }

            ServerMessage::ExistingPeers { peers } => {
                let (is_host, host) = {
                    let mut st = self.state();
                    let local = st.local_id.clone();
                    for peer in &peers {
                        if Some(&peer.id) != local.as_ref() {
                            st.roster.upsert(&peer.id, &peer.name, peer.ftp, peer.is_host);
                        }
                    }
                    st.phase = Phase::Active;
                    self.emit_roster(&st);
                    let host = st.roster.host().map(|p| p.id.clone());
                    (st.is_host, host.filter(|h| Some(h) != local.as_ref()))
                };

                if is_host {
                    for peer in peers {
                        self.ensure_link(generation, &peer.id, true).await;
                    }
                } else if host.is_some() {
                    // 호스트의 peer-joined 처리와 경쟁해도 링크는 하나만 생김
                    let st = self.state();
                    st.relay(ClientMessage::RequestJoin {
                        name: Some(st.user_name.clone()),
                    });
                }
            }

            ServerMessage::PeerJoined {
                peer_id,
                name,
                ftp,
                is_host: peer_is_host,
            } => {
                let is_host = {
                    let mut st = self.state();
                    if st.local_id.as_deref() == Some(peer_id.as_str()) {
                        return;
                    }
                    let inserted = st.roster.upsert(&peer_id, &name, ftp, peer_is_host);
                    st.phase = Phase::Active;
                    self.emit_roster(&st);
                    if inserted {
                        tracing::info!(peer_id = %peer_id, name = %name, "Participant joined");
                    }
                    st.is_host
                };
                if is_host {
                    self.ensure_link(generation, &peer_id, true).await;
                }
            }

            ServerMessage::PeerLeft { peer_id } => {
                tracing::info!(peer_id = %peer_id, "Participant left");
                self.remove_peer(&peer_id).await;
            }

            ServerMessage::HostChanged { peer_id } => {
                self.handle_host_changed(generation, peer_id).await;
            }

            ServerMessage::Signal { from, signal } => {
                let Some(link) = self.ensure_link(generation, &from, false).await else {
                    return;
                };
                if let Err(err) = link.signal(signal).await {
                    tracing::warn!(peer_id = %from, error = %err, "Failed to apply negotiation payload");
                    if !link.is_connected() {
                        self.drop_link(&from, link.link_id()).await;
                    }
                }
            }

            ServerMessage::RequestJoin { from, name } => {
                let is_host = {
                    let mut st = self.state();
                    if st.is_host && !st.roster.contains(&from) {
                        let ftp = self.config.default_ftp;
                        st.roster
                            .upsert(&from, name.as_deref().unwrap_or("Unnamed"), ftp, false);
                        self.emit_roster(&st);
                    }
                    st.is_host
                };
                if is_host {
                    tracing::debug!(peer_id = %from, "Join request received");
                    self.ensure_link(generation, &from, true).await;
                }
            }

            ServerMessage::Broadcast { from, data } => {
                match serde_json::from_value::<PeerMessage>(data) {
                    Ok(message) => self.handle_peer_message(&from, message, true).await,
                    Err(err) => {
                        tracing::warn!(peer_id = %from, error = %err, "Ignoring malformed relay broadcast");
                    }
                }
            }

            ServerMessage::Error { message } => {
                tracing::warn!(message = %message, "Relay reported an error");
            }
        }
    }

    async fn handle_host_changed(self: &Arc<Self>, generation: u64, peer_id: String) {
        let (promoted, unlinked, record) = {
            let mut st = self.state();
            let promoted = st.local_id.as_deref() == Some(peer_id.as_str());
            if !st.roster.set_host(&peer_id) {
                tracing::debug!(peer_id = %peer_id, "Host changed to a peer not in the roster");
            }
            st.is_host = promoted;
            self.emit_roster(&st);

            let unlinked: Vec<String> = if promoted {
                st.roster
                    .ids()
                    .into_iter()
                    .filter(|id| Some(id) != st.local_id.as_ref() && !st.links.contains_key(id))
                    .collect()
            } else {
                Vec::new()
            };
            let record = if promoted { st.record() } else { None };
            (promoted, unlinked, record)
        };

        if let Some(record) = record {
            self.save_record(record);
        }

        tracing::info!(peer_id = %peer_id, promoted = promoted, "Host changed");
        self.emit(SessionEvent::HostChanged {
            peer_id: peer_id.clone(),
        });
        for peer in unlinked {
            self.ensure_link(generation, &peer, true).await;
        }
    }

    // ========================================================================
    // Peer Links
    // ========================================================================

    /// 피어 링크가 없으면 생성. 드라이버에서만 호출.
    async fn ensure_link(
        &self,
        generation: u64,
        peer_id: &str,
        initiator: bool,
    ) -> Option<Arc<dyn PeerLink>> {
        let request = {
            let mut st = self.state();
            if st.generation != generation {
                return None;
            }
            if let Some(link) = st.links.get(peer_id) {
                return Some(link.clone());
            }
            let local_id = st.local_id.clone()?;
            if local_id == peer_id {
                return None;
            }
            let events = st.link_events.clone()?;
            st.next_link_id += 1;
            LinkRequest {
                local_id,
                remote_id: peer_id.to_string(),
                link_id: st.next_link_id,
                initiator,
                events,
            }
        };

        tracing::debug!(peer_id = %peer_id, initiator = initiator, "Opening peer link");

        let link = match self.connector.open(request).await {
            Ok(link) => link,
            Err(err) => {
                tracing::warn!(peer_id = %peer_id, error = %err, "Failed to open peer link");
                return None;
            }
        };

        let stale = {
            let mut st = self.state();
            if st.generation != generation {
                true
            } else {
                st.links.insert(peer_id.to_string(), link.clone());
                false
            }
        };
        if stale {
            link.close().await;
            return None;
        }
        Some(link)
    }

    async fn drop_link(&self, peer_id: &str, link_id: u64) {
        let link = {
            let mut st = self.state();
            match st.links.get(peer_id) {
                Some(link) if link.link_id() == link_id => st.links.remove(peer_id),
                _ => None,
            }
        };
        if let Some(link) = link {
            link.close().await;
        }
    }

    /// 링크와 로스터 항목 제거
    async fn remove_peer(&self, peer_id: &str) {
        let link = {
            let mut st = self.state();
            let link = st.links.remove(peer_id);
            let removed = st.roster.remove(peer_id).is_some();
            if removed {
                self.emit_roster(&st);
            }
            link
        };
        if let Some(link) = link {
            link.close().await;
            self.emit(SessionEvent::LinkClosed {
                peer_id: peer_id.to_string(),
            });
        }
    }

    async fn handle_link_event(self: &Arc<Self>, generation: u64, event: LinkEvent) {
        let current = {
            let st = self.state();
            if st.generation != generation {
                return;
            }
            st.links.get(event.peer_id()).map(|link| link.link_id())
        };
        if current != Some(event.link_id()) {
            tracing::debug!(peer_id = %event.peer_id(), "Ignoring event from a stale link");
            return;
        }

        match event {
            LinkEvent::Signal {
                peer_id, payload, ..
            } => {
                self.state().relay(ClientMessage::Signal {
                    target: Some(peer_id),
                    signal: payload,
                });
            }

            LinkEvent::Connected { peer_id, .. } => {
                tracing::info!(peer_id = %peer_id, "Peer link established");
                self.emit(SessionEvent::LinkConnected {
                    peer_id: peer_id.clone(),
                });

                let workout = {
                    let st = self.state();
                    if st.is_host {
                        st.workout.clone()
                    } else {
                        None
                    }
                };
                if let Some(workout) = workout {
                    self.send_to_peer(&peer_id, &PeerMessage::Workout { workout })
                        .await;
                }
            }

            LinkEvent::Data { peer_id, text, .. } => {
                match serde_json::from_str::<PeerMessage>(&text) {
                    Ok(message) => self.handle_peer_message(&peer_id, message, false).await,
                    Err(err) => {
                        tracing::warn!(peer_id = %peer_id, error = %err, "Ignoring malformed peer message");
                    }
                }
            }

            LinkEvent::Closed { peer_id, .. } => {
                tracing::info!(peer_id = %peer_id, "Peer link closed");
                self.remove_peer(&peer_id).await;
            }

            LinkEvent::Failed {
                peer_id,
                link_id,
                error,
            } => {
                tracing::warn!(peer_id = %peer_id, error = %error, "Peer link failed");
                self.drop_link(&peer_id, link_id).await;
            }
        }
    }

    // ========================================================================
    // Application Messages
    // ========================================================================

    /// `via_relay`는 릴레이 broadcast로 받은 경우 (모두가 이미 받았으므로 중계하지 않음)
    async fn handle_peer_message(&self, from: &str, message: PeerMessage, via_relay: bool) {
        let relay_onward = match &message {
            PeerMessage::Metrics {
                peer_id,
                power,
                cadence,
                heart_rate,
                progress,
            } => {
                let mut st = self.state();
                let subject = self.subject_of(&st, from, peer_id.as_deref(), via_relay);
                if st.local_id.as_deref() == Some(subject.as_str()) {
                    return;
                }
                if st
                    .roster
                    .update_metrics(&subject, *power, *cadence, *heart_rate, *progress)
                {
                    self.emit_roster(&st);
                } else {
                    tracing::debug!(peer_id = %subject, "Metrics for unknown participant");
                }
                st.is_host && !via_relay
            }

            PeerMessage::FtpUpdate { peer_id, ftp } => {
                let mut st = self.state();
                let subject = self.subject_of(&st, from, peer_id.as_deref(), via_relay);
                if st.local_id.as_deref() == Some(subject.as_str()) {
                    return;
                }
                if st.roster.update_ftp(&subject, *ftp) {
                    self.emit_roster(&st);
                }
                st.is_host && !via_relay
            }

            PeerMessage::Workout { workout } => {
                let record = {
                    let mut st = self.state();
                    if st.is_host {
                        tracing::debug!(peer_id = %from, "Host ignores incoming workout");
                        return;
                    }
                    st.workout = Some(workout.clone());
                    st.record()
                };
                tracing::info!(peer_id = %from, name = %workout.name, "Workout received");
                if let Some(record) = record {
                    self.save_record(record);
                }
                self.emit(SessionEvent::WorkoutReceived(workout.clone()));
                false
            }

            PeerMessage::StartCountdown { start_time } => {
                if self.state().is_host {
                    return;
                }
                self.begin_countdown(*start_time);
                false
            }

            PeerMessage::EndWorkout => {
                if self.state().is_host {
                    return;
                }
                self.end_local_workout();
                false
            }
        };

        if relay_onward {
            self.broadcast(&message.attributed_to(from), Some(from)).await;
        }
    }

    /// 메시지가 가리키는 참가자. 호스트가 중계한 링크 메시지만 `peerId`를 신뢰.
    fn subject_of(&self, st: &State, from: &str, claimed: Option<&str>, via_relay: bool) -> String {
        match claimed {
            Some(claimed) if claimed != from && !via_relay => {
                let from_host = st.roster.host().is_some_and(|host| host.id == from);
                if from_host {
                    claimed.to_string()
                } else {
                    from.to_string()
                }
            }
            _ => from.to_string(),
        }
    }

    fn begin_countdown(&self, start_time: i64) {
        let mut st = self.state();
        if st.last_start == Some(start_time) {
            return;
        }
        if let Some(previous) = st.countdown.take() {
            previous.abort();
        }
        st.last_start = Some(start_time);
        st.ended = false;
        self.emit(SessionEvent::SessionStart { start_time });
        st.countdown = Some(spawn_countdown(start_time, self.events.clone()));
        tracing::info!(start_time = start_time, "Countdown started");
    }

    fn end_local_workout(&self) {
        let mut st = self.state();
        if st.ended {
            return;
        }
        st.ended = true;
        if let Some(countdown) = st.countdown.take() {
            countdown.abort();
        }
        self.emit(SessionEvent::SessionEnd);
        tracing::info!("Workout ended");
    }

    // ========================================================================
    // Sending
    // ========================================================================

    /// 연결된 링크에만 전송 (큐잉 없음)
    async fn broadcast(&self, message: &PeerMessage, exclude: Option<&str>) {
        let text = match serde_json::to_string(message) {
            Ok(text) => text,
            Err(err) => {
                tracing::warn!(error = %err, "Failed to encode peer message");
                return;
            }
        };

        let targets: Vec<Arc<dyn PeerLink>> = {
            let st = self.state();
            st.links
                .iter()
                .filter(|(id, link)| Some(id.as_str()) != exclude && link.is_connected())
                .map(|(_, link)| link.clone())
                .collect()
        };

        for link in targets {
            if let Err(err) = link.send(text.clone()).await {
                tracing::debug!(peer_id = %link.peer_id(), kind = message.kind(), error = %err, "Peer send failed");
            }
        }
    }

    /// 제어 메시지. 링크가 없는 참가자가 있으면 릴레이 broadcast로도 보냄.
    async fn broadcast_control(&self, message: PeerMessage) {
        self.broadcast(&message, None).await;

        let st = self.state();
        if st.has_unlinked_peers() {
            match serde_json::to_value(&message) {
                Ok(data) => st.relay(ClientMessage::Broadcast { data }),
                Err(err) => tracing::warn!(error = %err, "Failed to encode control message"),
            }
        }
    }

    async fn send_to_peer(&self, peer_id: &str, message: &PeerMessage) {
        let link = self.state().links.get(peer_id).cloned();
        let Some(link) = link.filter(|link| link.is_connected()) else {
            return;
        };
        match serde_json::to_string(message) {
            Ok(text) => {
                if let Err(err) = link.send(text).await {
                    tracing::debug!(peer_id = %peer_id, error = %err, "Peer send failed");
                }
            }
            Err(err) => tracing::warn!(error = %err, "Failed to encode peer message"),
        }
    }

    fn handle_relay_lost(&self, generation: u64) {
        let mut st = self.state();
        if st.generation == generation && st.signaling.take().is_some() {
            tracing::warn!("Signaling connection lost; existing peer links stay up");
        }
    }
}

/// 세션 하나의 릴레이 메시지와 링크 이벤트를 순서대로 처리
async fn drive(
    inner: Weak<Inner>,
    generation: u64,
    mut relay: mpsc::UnboundedReceiver<ServerMessage>,
    mut links: mpsc::UnboundedReceiver<LinkEvent>,
    mut shutdown: oneshot::Receiver<()>,
    backlog: Vec<ServerMessage>,
) {
    for msg in backlog {
        let Some(inner) = inner.upgrade() else { return };
        inner.handle_relay(generation, msg).await;
    }

    let mut relay_open = true;
    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            msg = relay.recv(), if relay_open => {
                let Some(inner) = inner.upgrade() else { break };
                match msg {
                    Some(msg) => inner.handle_relay(generation, msg).await,
                    None => {
                        relay_open = false;
                        inner.handle_relay_lost(generation);
                    }
                }
            }
            event = links.recv() => {
                let Some(event) = event else { break };
                let Some(inner) = inner.upgrade() else { break };
                inner.handle_link_event(generation, event).await;
            }
        }
    }
    tracing::debug!(generation = generation, "Session driver stopped");
}
