//! 환경 변수 기반 설정 관리

use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// 릴레이 서버 설정
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub host: String,
    /// 비어 있으면 모든 오리진 허용
    pub cors_origins: Vec<String>,
    pub session: SessionConfig,
    pub log_level: String,
}

/// 세션 스코프 설정
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub max_size: usize,
    pub sweep_interval: Duration,
}

impl Config {
    /// 환경 변수에서 설정 로드
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        Self {
            port: env_parse("PORT", 8787),
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            cors_origins: parse_origins(&env::var("CORS_ORIGINS").unwrap_or_else(|_| "*".into())),
            session: SessionConfig {
                max_size: env_parse("MAX_SESSION_SIZE", 16),
                sweep_interval: Duration::from_secs(env_parse("SESSION_SWEEP_INTERVAL_SECS", 300)),
            },
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8787,
            host: "0.0.0.0".to_string(),
            cors_origins: Vec::new(),
            session: SessionConfig {
                max_size: 16,
                sweep_interval: Duration::from_secs(300),
            },
            log_level: "info".to_string(),
        }
    }
}

/// 세션 클라이언트 설정
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// 릴레이 베이스 URL (`ws://` 또는 `wss://`)
    pub signaling_url: String,
    pub signaling_timeout: Duration,
    pub default_ftp: u32,
    pub session_ttl: Duration,
    pub stun_servers: Vec<String>,
    pub state_dir: PathBuf,
}

impl ClientConfig {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        let defaults = Self::default();

        Self {
            signaling_url: env::var("GROUPRIDE_SIGNALING_URL").unwrap_or(defaults.signaling_url),
            signaling_timeout: Duration::from_secs(env_parse("GROUPRIDE_SIGNALING_TIMEOUT_SECS", 10)),
            default_ftp: env_parse("GROUPRIDE_DEFAULT_FTP", defaults.default_ftp),
            session_ttl: Duration::from_secs(env_parse::<u64>("GROUPRIDE_SESSION_TTL_HOURS", 24) * 3600),
            stun_servers: env::var("GROUPRIDE_STUN_SERVERS")
                .map(|v| {
                    v.split(',')
                        .map(|s| s.trim().to_string())
                        .filter(|s| !s.is_empty())
                        .collect()
                })
                .unwrap_or(defaults.stun_servers),
            state_dir: env::var("GROUPRIDE_STATE_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.state_dir),
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            signaling_url: "ws://127.0.0.1:8787".to_string(),
            signaling_timeout: Duration::from_secs(10),
            default_ftp: 200,
            session_ttl: Duration::from_secs(24 * 3600),
            stun_servers: vec![
                "stun:stun.l.google.com:19302".to_string(),
                "stun:global.stun.twilio.com:3478".to_string(),
                "stun:stun1.l.google.com:19302".to_string(),
            ],
            state_dir: PathBuf::from(".groupride"),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn parse_origins(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty() && *s != "*")
        .map(|s| s.to_string())
        .collect()
}
