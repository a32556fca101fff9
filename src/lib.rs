//! GroupRide 세션 동기화
//!
//! 시그널링 릴레이(`handlers`, `state`)와 참가자별 세션 클라이언트(`client`)를
//! 제공합니다. 릴레이는 협상 페이로드를 해석하지 않고 중계만 하며, 피어 링크가
//! 맺어진 뒤의 애플리케이션 메시지는 피어끼리 직접 주고받습니다.

pub mod client;
pub mod config;
pub mod error;
pub mod handlers;
pub mod protocol;
pub mod state;

pub use config::{ClientConfig, Config};
pub use error::{LinkError, RelayError, SessionError, StoreError};
pub use state::AppState;
