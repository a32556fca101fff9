//! GroupRide 시그널링 릴레이 서버

use groupride_sync::{config::Config, handlers, AppState};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env();

    // 로깅 초기화
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(&config.log_level))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let state = Arc::new(AppState::new(config.clone()));

    // 빈 세션 정리 스케줄러
    let cleanup_state = state.clone();
    let sweep_interval = config.session.sweep_interval;
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(sweep_interval);
        loop {
            interval.tick().await;
            handlers::cleanup_idle_sessions(cleanup_state.clone()).await;
        }
    });

    let app = handlers::create_router(state.clone());

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("🚴 GroupRide Signaling Relay started");
    tracing::info!("Address: {}", addr);
    tracing::info!("WebSocket: ws://{}/signal/<session-id>", addr);

    axum::serve(listener, app).await?;
    Ok(())
}
