//! SSH client handler implementation
//!
//! Implements the `russh::client::Handler` trait. Server keys are checked
//! against known_hosts; unknown keys are only put to the responder when the
//! connection is allowed to make a trust decision.

use std::sync::Arc;

use russh::keys::{PublicKey, PublicKeyBase64};
use thiserror::Error;
use tracing::{debug, warn};

use super::known_hosts::{fingerprint, HostKeyVerification, KnownHostsStore};
use super::responder::{HostKeySighting, InteractionResponder};

/// Errors raised by the handler during the handshake
#[derive(Debug, Error)]
pub enum HandlerError {
    /// The server key was rejected
    #[error("host key verification failed")]
    HostKey { changed: bool },

    #[error(transparent)]
    Russh(#[from] russh::Error),
}

/// SSH client handler for russh
pub struct RouterHandler {
    host: String,
    port: u16,
    handle_host_key: bool,
    known_hosts: Arc<KnownHostsStore>,
    responder: Arc<dyn InteractionResponder>,
}

impl RouterHandler {
    pub fn new(
        host: impl Into<String>,
        port: u16,
        handle_host_key: bool,
        known_hosts: Arc<KnownHostsStore>,
        responder: Arc<dyn InteractionResponder>,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            handle_host_key,
            known_hosts,
            responder,
        }
    }

    fn sighting(&self, reason: &str, key: &PublicKey) -> HostKeySighting {
        let host = if self.port == 22 {
            self.host.clone()
        } else {
            format!("[{}]:{}", self.host, self.port)
        };
        HostKeySighting {
            reason: reason.to_string(),
            host,
            algorithm: key.algorithm().as_str().to_string(),
            key: key.public_key_base64(),
            fingerprint: fingerprint(key),
        }
    }
}

impl russh::client::Handler for RouterHandler {
    type Error = HandlerError;

    /// Verify the server's host key
    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        match self
            .known_hosts
            .verify(&self.host, self.port, server_public_key)
        {
            HostKeyVerification::Verified => Ok(true),
            HostKeyVerification::Changed => {
                warn!(
                    "Host key for {}:{} changed, refusing to connect",
                    self.host, self.port
                );
                // Recorded so the failure can carry the offending key
                let sighting = self.sighting("changed", server_public_key);
                self.responder.do_hostkey(sighting).await;
                Err(HandlerError::HostKey { changed: true })
            }
            HostKeyVerification::Unknown if self.handle_host_key => {
                let sighting = self.sighting("unknown", server_public_key);
                if self.responder.do_hostkey(sighting).await {
                    debug!("Responder trusted host key for {}", self.host);
                    Ok(true)
                } else {
                    Err(HandlerError::HostKey { changed: false })
                }
            }
            HostKeyVerification::Unknown => {
                debug!(
                    "Unknown host key for {}:{} and no trust decision allowed",
                    self.host, self.port
                );
                Err(HandlerError::HostKey { changed: false })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use russh::client::Handler;

    use super::*;
    use crate::ssh::responder::AuthResponder;

    const KEY_A: &str =
        "ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAIA/mf/xhu3/QSvh4/9scogtazfVwXAsEn2fKZoQxFb9V";
    const KEY_B: &str =
        "ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAIHynMsl8Vn6h67bphl0LiyncGn1LE+uEwo/YbBmUpIlk";

    fn handler(
        known: &str,
        handle_host_key: bool,
        port: u16,
    ) -> (RouterHandler, Arc<AuthResponder>) {
        let responder = Arc::new(AuthResponder::new(None));
        let handler = RouterHandler::new(
            "example.com",
            port,
            handle_host_key,
            Arc::new(KnownHostsStore::parse(known)),
            responder.clone(),
        );
        (handler, responder)
    }

    #[tokio::test]
    async fn test_known_key_accepted_silently() {
        let (mut handler, responder) = handler(&format!("example.com {}", KEY_A), true, 22);
        let key = PublicKey::from_openssh(KEY_A).unwrap();

        assert!(handler.check_server_key(&key).await.unwrap());
        assert!(responder.report().await.hostkeys_seen.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_key_private_asks_responder() {
        let (mut handler, responder) = handler("", true, 2222);
        let key = PublicKey::from_openssh(KEY_A).unwrap();

        let result = handler.check_server_key(&key).await;
        assert!(matches!(result, Err(HandlerError::HostKey { changed: false })));

        let seen = responder.report().await.hostkeys_seen;
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].reason, "unknown");
        assert_eq!(seen[0].host, "[example.com]:2222");
        assert_eq!(seen[0].algorithm, "ssh-ed25519");
    }

    #[tokio::test]
    async fn test_unknown_key_shared_session_not_asked() {
        let (mut handler, responder) = handler("", false, 22);
        let key = PublicKey::from_openssh(KEY_A).unwrap();

        let result = handler.check_server_key(&key).await;
        assert!(matches!(result, Err(HandlerError::HostKey { changed: false })));
        assert!(responder.report().await.hostkeys_seen.is_empty());
    }

    #[tokio::test]
    async fn test_changed_key_rejected() {
        let (mut handler, responder) = handler(&format!("example.com {}", KEY_A), false, 22);
        let key = PublicKey::from_openssh(KEY_B).unwrap();

        let result = handler.check_server_key(&key).await;
        assert!(matches!(result, Err(HandlerError::HostKey { changed: true })));

        let seen = responder.report().await.hostkeys_seen;
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].reason, "changed");
    }
}
