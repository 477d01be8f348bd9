//! Login transport seam
//!
//! A [`LoginTransport`] performs the SSH handshake and authentication for a
//! peer and hands back a [`LoginSession`] able to launch the remote bridge.
//! The production implementation lives in [`super::session`].

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::AsyncWrite;

use super::config::LoginOptions;
use super::responder::InteractionResponder;

/// Failure of a login attempt, as reported by the transport
#[derive(Debug, Error)]
pub enum TransportError {
    /// Network-level failure: resolution, refused, unreachable
    #[error("{0}")]
    Io(#[from] std::io::Error),

    /// The host key was rejected. `changed` is set when a different key
    /// was already trusted for this host.
    #[error("host key verification failed{}", changed_suffix(.changed))]
    HostKey { changed: bool },

    /// Every attempted method failed; `methods` is what the server offered
    #[error("authentication failed (server offered: {})", .methods.join(","))]
    Authentication { methods: Vec<String> },

    /// Anything else the transport reports
    #[error("{0}")]
    Other(String),
}

fn changed_suffix(changed: &bool) -> &'static str {
    if *changed {
        " (key changed)"
    } else {
        ""
    }
}

impl TransportError {
    pub fn other(msg: impl Into<String>) -> Self {
        TransportError::Other(msg.into())
    }
}

/// Parameters of one login attempt
pub struct ConnectRequest {
    /// Address without port or `user@` prefix
    pub address: String,

    /// Login name; `None` lets the transport choose
    pub login_name: Option<String>,

    /// Port override; `None` uses the transport default
    pub port: Option<u16>,

    /// Whether the responder may be asked to trust an unknown host key
    pub handle_host_key: bool,

    pub options: LoginOptions,

    pub responder: Arc<dyn InteractionResponder>,
}

impl std::fmt::Debug for ConnectRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectRequest")
            .field("address", &self.address)
            .field("login_name", &self.login_name)
            .field("port", &self.port)
            .field("handle_host_key", &self.handle_host_key)
            .field("options", &self.options)
            .finish()
    }
}

/// A process started on the remote host
pub struct RemoteProcess {
    /// The process' standard input
    pub stdin: Pin<Box<dyn AsyncWrite + Send>>,

    /// Resolves when the process exits, with its exit status if reported
    pub exit: Pin<Box<dyn Future<Output = Option<u32>> + Send>>,
}

/// Performs SSH logins
#[async_trait]
pub trait LoginTransport: Send + Sync {
    async fn connect(
        &self,
        request: ConnectRequest,
    ) -> Result<Box<dyn LoginSession>, TransportError>;
}

/// An authenticated SSH session
#[async_trait]
pub trait LoginSession: Send + Sync {
    /// Turn an argv into the command line executed on the remote host
    fn wrap_subprocess_args(&self, argv: &[&str]) -> String;

    /// Launch `command` on the remote host
    async fn spawn(&self, command: &str) -> Result<RemoteProcess, TransportError>;

    /// Tear the session down
    async fn disconnect(&self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_error_display() {
        assert_eq!(
            TransportError::HostKey { changed: true }.to_string(),
            "host key verification failed (key changed)"
        );
        assert_eq!(
            TransportError::HostKey { changed: false }.to_string(),
            "host key verification failed"
        );
        let err = TransportError::Authentication {
            methods: vec!["publickey".to_string(), "password".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "authentication failed (server offered: publickey,password)"
        );
    }
}
