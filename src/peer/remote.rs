//! SSH-backed remote peer

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use serde_json::Value;
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

use super::classify::classify_failure;
use super::control::{control_frame, ControlMessage, Superuser};
use super::lifecycle::{PeerCore, PeerState};
use super::host::{split_host_port, split_user};
use super::password::OneShotPassword;
use crate::error::{PeerError, Result};
use crate::ssh::{AuthResponder, ConnectRequest, LoginOptions, LoginTransport};

/// Version of the control protocol announced in the init message
pub const PROTOCOL_VERSION: u32 = 1;

static NEXT_PEER_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a peer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(u64);

impl PeerId {
    fn next() -> Self {
        PeerId(NEXT_PEER_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "peer-{}", self.0)
    }
}

/// Everything needed to start a peer
#[derive(Debug)]
pub struct PeerParams {
    /// Host as requested; may carry `user@` and `:port`
    pub host: String,
    pub user: Option<String>,
    pub password: Option<String>,
    pub private: bool,
    pub superuser: Superuser,
    pub bridge_command: String,
}

/// One SSH connection and the bridge running on the far side
///
/// The connection is attempted in a background task started by
/// [`RemotePeer::start`]; callers observe the outcome through
/// [`RemotePeer::wait_ready`] and [`RemotePeer::wait_done`].
pub struct RemotePeer {
    id: PeerId,
    host: String,
    user: Option<String>,
    private: bool,
    password: OneShotPassword,
    superuser: Superuser,
    bridge_command: String,
    core: Arc<PeerCore>,
    transport: Arc<dyn LoginTransport>,
    connect_task: Mutex<Option<AbortHandle>>,
}

impl RemotePeer {
    /// Create the peer and start connecting in the background
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(params: PeerParams, transport: Arc<dyn LoginTransport>) -> Arc<Self> {
        let peer = Arc::new(Self {
            id: PeerId::next(),
            host: params.host,
            user: params.user,
            private: params.private,
            password: OneShotPassword::new(params.password),
            superuser: params.superuser,
            bridge_command: params.bridge_command,
            core: Arc::new(PeerCore::new()),
            transport,
            connect_task: Mutex::new(None),
        });

        peer.core.set_connecting();

        let task_peer = Arc::clone(&peer);
        let task = tokio::spawn(async move {
            if let Err(error) = task_peer.connect().await {
                info!("{} to {} failed: {}", task_peer.id, task_peer.host, error);
                task_peer.core.fail(error);
            }
        });
        *peer
            .connect_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(task.abort_handle());

        peer
    }

    async fn connect(&self) -> std::result::Result<(), PeerError> {
        debug!(
            "Starting ssh session user={:?}, host={}, private={}",
            self.user, self.host, self.private
        );

        let (host_user, rest) = split_user(&self.host);
        let (address, port) = split_host_port(rest);
        let login_name = self.user.clone().or_else(|| host_user.map(str::to_string));

        let password = self.password.peek();
        let options = LoginOptions::for_password(password.is_some());
        let responder = Arc::new(AuthResponder::new(password));

        let request = ConnectRequest {
            address: address.to_string(),
            login_name,
            port,
            handle_host_key: self.private,
            options,
            responder: responder.clone(),
        };

        let session = match self.transport.connect(request).await {
            Ok(session) => session,
            Err(e) => {
                debug!("Connecting to {} failed: {}", address, e);
                let report = responder.report().await;
                return Err(classify_failure(
                    e,
                    &report,
                    self.private,
                    self.password.is_held(),
                ));
            }
        };

        let command = session.wrap_subprocess_args(&[self.bridge_command.as_str()]);
        let process = match session.spawn(&command).await {
            Ok(process) => process,
            Err(e) => {
                warn!("Failed to start {} on {}: {}", self.bridge_command, address, e);
                session.disconnect().await;
                return Err(PeerError::InternalError {
                    message: e.to_string(),
                });
            }
        };

        let init = ControlMessage::Init {
            version: PROTOCOL_VERSION,
            host: self.host.clone(),
            superuser: self.superuser.clone(),
        };
        let preamble = control_frame(&init).map_err(internal)?;

        match self.core.attach(session, process, preamble).await {
            Ok(()) => {
                info!("{} ready on {}", self.id, self.host);
                Ok(())
            }
            // Closed while connecting: nothing to report
            Err(_) if self.core.state().is_terminal() => Ok(()),
            Err(e) => Err(internal(e)),
        }
    }

    /// Handle a kill request
    ///
    /// A kill naming this host closes the peer; a kill without a host is
    /// passed on to the bridge. Kills for other hosts are ignored.
    pub async fn kill(&self, host: Option<&str>, group: Option<&str>, message: &Value) {
        match host {
            Some(host) if host == self.host => {
                debug!("Kill for {} closes {}", host, self.id);
                self.close().await;
            }
            Some(_) => {}
            None => {
                debug!("Forwarding kill (group {:?}) to {}", group, self.id);
                if let Err(e) = self.core.write_control(message).await {
                    debug!("Could not forward kill to {}: {}", self.id, e);
                }
            }
        }
    }

    /// Answer an authorize challenge with the held password, once
    pub async fn authorize(&self, message: &Value) -> Result<()> {
        let challenge = message.get("challenge").and_then(Value::as_str).unwrap_or("");
        if !challenge.starts_with("plain1:") {
            debug!("Ignoring authorize challenge {:?}", challenge);
            return Ok(());
        }

        let cookie = message
            .get("cookie")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let reply = ControlMessage::Authorize {
            cookie,
            response: self.password.take().unwrap_or_default(),
        };
        self.core.write_control(&reply).await
    }

    pub fn superuser_init_done(&self) {
        self.password.clear();
    }

    /// Stop connecting, close the bridge and the session
    pub async fn close(&self) {
        let task = self
            .connect_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            task.abort();
        }
        self.core.close().await;
    }

    pub async fn wait_ready(&self) -> Result<()> {
        self.core.wait_ready().await
    }

    pub async fn wait_done(&self) -> PeerState {
        self.core.wait_done().await
    }

    pub fn state(&self) -> PeerState {
        self.core.state()
    }

    /// Write an arbitrary control message to the bridge
    pub async fn write_control(&self, message: &Value) -> Result<()> {
        self.core.write_control(message).await
    }

    pub fn id(&self) -> PeerId {
        self.id
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn user(&self) -> Option<&str> {
        self.user.as_deref()
    }

    pub fn is_private(&self) -> bool {
        self.private
    }

    pub fn has_password(&self) -> bool {
        self.password.is_held()
    }
}

impl std::fmt::Debug for RemotePeer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemotePeer")
            .field("id", &self.id)
            .field("host", &self.host)
            .field("user", &self.user)
            .field("private", &self.private)
            .field("state", &self.core.state())
            .finish()
    }
}

fn internal(e: impl std::fmt::Display) -> PeerError {
    PeerError::InternalError {
        message: e.to_string(),
    }
}
