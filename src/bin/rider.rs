//! GroupRide 라이더 CLI
//!
//! 세션을 만들거나 참가해 1초마다 모의 메트릭을 보내고, 로스터 변화를 출력합니다.

use anyhow::Context;
use clap::{Parser, Subcommand};
use groupride_sync::client::{
    FileSessionStore, PeerConnector, SessionClient, SessionEvent, SessionInfo,
};
use groupride_sync::protocol::SharedWorkout;
use groupride_sync::ClientConfig;
use rand::Rng;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "groupride-rider", version, about = "Join a GroupRide session from the terminal")]
struct Cli {
    /// 릴레이 URL (기본값은 GROUPRIDE_SIGNALING_URL)
    #[arg(long, env = "GROUPRIDE_SIGNALING_URL")]
    relay_url: Option<String>,

    /// 표시 이름
    #[arg(long, default_value = "Rider")]
    name: String,

    /// FTP (50-500 W)
    #[arg(long)]
    ftp: Option<u32>,

    /// Ctrl-C 시 세션 기록을 남겨 `restore`로 재입장 가능
    #[arg(long)]
    keep_session: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// 새 세션 생성 (호스트)
    Create {
        /// 공유할 워크아웃 JSON 파일
        #[arg(long)]
        workout: Option<PathBuf>,

        /// 첫 참가자 연결 후 카운트다운 시작 (초)
        #[arg(long)]
        countdown: Option<u64>,
    },
    /// 세션 코드로 참가
    Join { code: String },
    /// 저장된 세션 재입장
    Restore,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut config = ClientConfig::from_env();
    if let Some(url) = cli.relay_url.clone() {
        config.signaling_url = url;
    }

    let log_level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(&log_level))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let store = Arc::new(FileSessionStore::new(&config.state_dir));
    let connector = connector(&config);
    let client = SessionClient::new(config, connector, store);

    if let Some(ftp) = cli.ftp {
        client.update_ftp(ftp).await?;
    }

    let mut events = client.subscribe();

    let info: SessionInfo = match &cli.command {
        Command::Create { .. } => client.create_session(&cli.name).await?,
        Command::Join { code } => client.join_session(code, &cli.name).await?,
        Command::Restore => client
            .restore_session()
            .await
            .context("no stored session to restore")?,
    };

    println!("Session: {}", info.session_id);
    println!("Peer ID: {}", info.peer_id);
    if let Some(share) = client.share_info() {
        println!("\n{}\n", share.invite_text());
    }

    let mut pending_countdown = None;
    if let Command::Create { workout, countdown } = &cli.command {
        if let Some(path) = workout {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            let workout: SharedWorkout = serde_json::from_str(&raw)
                .with_context(|| format!("invalid workout file {}", path.display()))?;
            client.share_workout(workout).await?;
        }
        pending_countdown = *countdown;
    }

    let metrics_client = client.clone();
    let metrics = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(1));
        let mut elapsed = 0u32;
        loop {
            ticker.tick().await;
            let (power, cadence, heart_rate) = {
                let mut rng = rand::thread_rng();
                (
                    rng.gen_range(150..260),
                    rng.gen_range(80..100),
                    rng.gen_range(120..160),
                )
            };
            let progress = metrics_client
                .shared_workout()
                .map(|w| w.progress_at(f64::from(elapsed)))
                .unwrap_or(0.0);
            metrics_client
                .broadcast_metrics(power, cadence, progress, heart_rate)
                .await;
            elapsed += 1;
        }
    });

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => match event {
                Ok(event) => {
                    if let SessionEvent::LinkConnected { .. } = &event {
                        if let Some(secs) = pending_countdown.take() {
                            let start = client.start_synchronized_workout(secs).await?;
                            tracing::info!(start_time = start, "Countdown scheduled");
                        }
                    }
                    print_event(&event);
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped = skipped, "Event stream lagged");
                }
                Err(RecvError::Closed) => break,
            }
        }
    }

    metrics.abort();
    if cli.keep_session {
        println!("Leaving session record in place; run `restore` to rejoin");
    } else {
        client.disconnect().await;
    }
    Ok(())
}

#[cfg(feature = "webrtc")]
fn connector(config: &ClientConfig) -> Arc<dyn PeerConnector> {
    Arc::new(groupride_sync::client::webrtc::WebRtcConnector::new(
        &config.stun_servers,
    ))
}

#[cfg(not(feature = "webrtc"))]
fn connector(_config: &ClientConfig) -> Arc<dyn PeerConnector> {
    tracing::warn!("Built without the webrtc feature; peer links only work inside this process");
    Arc::new(groupride_sync::client::MemoryNetwork::new())
}

fn print_event(event: &SessionEvent) {
    match event {
        SessionEvent::RosterChanged(participants) => {
            println!("Roster ({}):", participants.len());
            for p in participants {
                println!(
                    "  {}{:<16} ftp {:>3}  {:>4} W  {:>3} rpm  {:>3} bpm  {:>5.1}%",
                    if p.is_host { "*" } else { " " },
                    p.name,
                    p.ftp,
                    p.power,
                    p.cadence,
                    p.heart_rate,
                    p.progress * 100.0
                );
            }
        }
        SessionEvent::WorkoutReceived(workout) => {
            println!(
                "Workout received: {} ({} intervals, {} s)",
                workout.name,
                workout.intervals.len(),
                workout.total_duration()
            );
        }
        SessionEvent::SessionStart { start_time } => println!("Countdown to {start_time}"),
        SessionEvent::CountdownTick { seconds_remaining } => println!("{seconds_remaining}..."),
        SessionEvent::WorkoutStarted => println!("GO!"),
        SessionEvent::SessionEnd => println!("Workout ended by host"),
        SessionEvent::HostChanged { peer_id } => println!("Host is now {peer_id}"),
        SessionEvent::LinkConnected { peer_id } => println!("Linked with {peer_id}"),
        SessionEvent::LinkClosed { peer_id } => println!("Link to {peer_id} closed"),
        SessionEvent::Disconnected => println!("Disconnected"),
    }
}
