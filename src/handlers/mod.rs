//! 핸들러 모듈

pub mod connection;
pub mod http;
pub mod session;
pub mod signaling;

pub use connection::*;
pub use http::*;
pub use session::*;
pub use signaling::*;
