//! SSH login layer
//!
//! This module provides the transport seam used by remote peers, the prompt
//! responder that drives authentication, and a russh-backed implementation
//! with known_hosts verification and agent support.

pub mod agent;
pub mod config;
pub mod handler;
pub mod known_hosts;
pub mod quote;
pub mod responder;
pub mod session;
pub mod transport;

// Re-exports
pub use config::{LoginOptions, TransportConfig};
pub use handler::RouterHandler;
pub use known_hosts::{HostKeyVerification, KnownHostsStore};
pub use responder::{AuthResponder, HostKeySighting, InteractionResponder, ResponderReport};
pub use session::RusshTransport;
pub use transport::{ConnectRequest, LoginSession, LoginTransport, RemoteProcess, TransportError};
