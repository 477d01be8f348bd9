//! SSH router - routes channel requests to bridges on remote hosts
//!
//! Requests naming another host are served by a remote peer: an SSH
//! connection to that host running a bridge process, spoken to through
//! framed control messages on its stdin. Peers are cached per host, user
//! and (for private sessions) requesting channel, and drop out of the cache
//! when they fail or close.
//!
//! # Features
//!
//! - One shared connection per host and user; private sessions get their own
//! - Host keys checked against known_hosts; unknown keys are reported, never trusted
//! - Agent, identity file and single-attempt password authentication
//! - Structured failure reports (`no-host`, `unknown-hostkey`, `authentication-failed`, ...)
//!
//! # Example Usage (CLI)
//!
//! ```bash
//! echo '{"command": "open", "channel": "1", "host": "admin@example.com"}' | ssh-router
//! ```

pub mod config;
pub mod error;
pub mod peer;
pub mod router;
pub mod server;
pub mod ssh;

#[cfg(test)]
mod testing;

// Re-exports for convenience
pub use config::{Args, Config};
pub use error::{PeerError, Result, RouterError};
pub use peer::{PeerState, RemotePeer};
pub use router::{ConnectionKey, RemoteRouter, RouteOptions, RouterConfig};
pub use server::{Reply, RouterServer};
pub use ssh::{LoginTransport, RusshTransport};
