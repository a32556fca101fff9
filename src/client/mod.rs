//! 참가자별 세션 클라이언트

pub mod code;
pub mod countdown;
pub mod events;
pub mod link;
pub mod memory;
pub mod roster;
pub mod session;
pub mod signaling;
pub mod store;
#[cfg(feature = "webrtc")]
pub mod webrtc;

pub use events::SessionEvent;
pub use link::{LinkEvent, NegotiationSignal, PeerConnector, PeerLink};
pub use memory::MemoryNetwork;
pub use roster::{Participant, Roster};
pub use session::{Phase, SessionClient, SessionInfo, ShareInfo};
pub use store::{FileSessionStore, MemorySessionStore, SessionRecord, SessionStore};
