//! Error types for the SSH router
//!
//! [`PeerError`] is the closed set of problems a remote peer can report when
//! its connection fails. [`RouterError`] is the crate-wide error used by
//! configuration, I/O and the front-end.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Identity of a host key that would need to be accepted by the user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct HostIdentity {
    /// `"<host> <algorithm> <base64 key>"`, known_hosts line format
    pub host_key: String,

    /// Key fingerprint, e.g. `SHA256:...`
    pub host_fingerprint: String,
}

/// Outcome of one authentication method offered by the server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuthMethodResult {
    /// We had no credential for this method
    NotProvided,
    /// We had a credential but never got to use it
    NotTried,
    /// The server rejected our credential
    Denied,
}

/// Structured connection failure of a remote peer
///
/// Serializes to the problem fields of a close control message:
/// `{"problem": "unknown-hostkey", "host-key": ..., "host-fingerprint": ...}`.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "problem", rename_all = "kebab-case", rename_all_fields = "kebab-case")]
pub enum PeerError {
    /// The host could not be reached (resolution, refused, unreachable)
    #[error("no-host: {message}")]
    NoHost { message: String },

    /// The host presented a key that differs from the trusted one
    #[error("invalid-hostkey")]
    InvalidHostkey {
        #[serde(flatten)]
        identity: Option<HostIdentity>,
    },

    /// First-seen host key on a private session; the user may accept it
    #[error("unknown-hostkey")]
    UnknownHostkey {
        #[serde(flatten)]
        identity: Option<HostIdentity>,
    },

    /// First-seen host key on a shared session
    #[error("unknown-host")]
    UnknownHost,

    /// No offered authentication method succeeded
    #[error("authentication-failed: {error}")]
    AuthenticationFailed {
        error: String,
        auth_method_results: BTreeMap<String, AuthMethodResult>,
    },

    /// Any other transport failure
    #[error("internal-error: {message}")]
    InternalError { message: String },
}

impl PeerError {
    /// The problem code carried on the wire
    pub fn problem(&self) -> &'static str {
        match self {
            PeerError::NoHost { .. } => "no-host",
            PeerError::InvalidHostkey { .. } => "invalid-hostkey",
            PeerError::UnknownHostkey { .. } => "unknown-hostkey",
            PeerError::UnknownHost => "unknown-host",
            PeerError::AuthenticationFailed { .. } => "authentication-failed",
            PeerError::InternalError { .. } => "internal-error",
        }
    }

    /// Serialize into a JSON object suitable for merging into a control message
    pub fn to_fields(&self) -> serde_json::Map<String, serde_json::Value> {
        match serde_json::to_value(self) {
            Ok(serde_json::Value::Object(map)) => map,
            _ => {
                let mut map = serde_json::Map::new();
                map.insert("problem".to_string(), self.problem().into());
                map
            }
        }
    }
}

/// Main error type for the SSH router
#[derive(Debug, Error)]
pub enum RouterError {
    /// A remote peer failed to connect
    #[error("peer error: {0}")]
    Peer(#[from] PeerError),

    /// Connection-level failure outside the peer taxonomy (closed peer, spawn)
    #[error("SSH connection error: {0}")]
    Connection(String),

    /// Malformed request or control message
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding/decoding error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias using RouterError
pub type Result<T> = std::result::Result<T, RouterError>;

impl RouterError {
    /// Create a connection error from a string
    pub fn connection(msg: impl Into<String>) -> Self {
        RouterError::Connection(msg.into())
    }

    /// Create a protocol error from a string
    pub fn protocol(msg: impl Into<String>) -> Self {
        RouterError::Protocol(msg.into())
    }

    /// Create a config error from a string
    pub fn config(msg: impl Into<String>) -> Self {
        RouterError::Config(msg.into())
    }
}
