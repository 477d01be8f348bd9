//! Remote peers
//!
//! A peer owns one SSH connection attempt and the bridge process it starts
//! on the far side.

pub mod classify;
pub mod control;
pub mod host;
pub mod lifecycle;
pub mod password;
pub mod remote;

pub use classify::classify_failure;
pub use control::{ControlMessage, Superuser};
pub use lifecycle::{PeerCore, PeerState};
pub use password::OneShotPassword;
pub use remote::{PeerId, PeerParams, RemotePeer, PROTOCOL_VERSION};
