//! 와이어 프로토콜 정의

pub mod messages;
pub mod peer;
pub mod workout;

pub use messages::{ClientMessage, PeerSummary, ServerMessage};
pub use peer::PeerMessage;
pub use workout::{Interval, PowerSpec, SharedWorkout};
