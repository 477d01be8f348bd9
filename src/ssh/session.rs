//! russh-backed login transport
//!
//! [`RusshTransport`] performs the handshake through [`RouterHandler`] and
//! authenticates in a fixed order: `none` (to learn the offered methods),
//! ssh-agent, identity files, then a single password attempt when allowed.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use russh::client::{self, AuthResult, Handle};
use russh::keys::{PrivateKey, PrivateKeyWithHashAlg};
use russh::{ChannelMsg, Disconnect, MethodKind, MethodSet};
use tracing::{debug, info, trace, warn};

use super::agent::authenticate_with_agent;
use super::config::TransportConfig;
use super::handler::{HandlerError, RouterHandler};
use super::known_hosts::KnownHostsStore;
use super::quote::quote_argv;
use super::responder::InteractionResponder;
use super::transport::{
    ConnectRequest, LoginSession, LoginTransport, RemoteProcess, TransportError,
};

/// Login transport built on russh
#[derive(Debug, Clone)]
pub struct RusshTransport {
    config: TransportConfig,
}

impl RusshTransport {
    pub fn new(config: TransportConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    async fn authenticate(
        &self,
        handle: &mut Handle<RouterHandler>,
        user: &str,
        request: &ConnectRequest,
    ) -> Result<(), TransportError> {
        let result = handle
            .authenticate_none(user)
            .await
            .map_err(map_russh_error)?;
        let mut offered = match result {
            AuthResult::Success => return Ok(()),
            AuthResult::Failure {
                remaining_methods, ..
            } => remaining_methods,
        };
        debug!("Server offers {:?} for {}", method_names(&offered), user);

        if self.config.use_agent && offered.contains(&MethodKind::PublicKey) {
            match authenticate_with_agent(handle, user).await {
                Some(AuthResult::Success) => {
                    info!("Agent authentication succeeded for {}", user);
                    return Ok(());
                }
                Some(AuthResult::Failure {
                    remaining_methods, ..
                }) => offered = remaining_methods,
                None => {}
            }
        }

        if offered.contains(&MethodKind::PublicKey) {
            for path in &self.config.identity_files {
                let Some(key) = load_identity(path, request.responder.as_ref()).await else {
                    continue;
                };
                debug!("Trying identity file {}", path.display());
                let key_with_alg = PrivateKeyWithHashAlg::new(Arc::new(key), None);
                match handle
                    .authenticate_publickey(user, key_with_alg)
                    .await
                    .map_err(map_russh_error)?
                {
                    AuthResult::Success => {
                        info!("Key authentication succeeded with {}", path.display());
                        return Ok(());
                    }
                    AuthResult::Failure {
                        remaining_methods, ..
                    } => offered = remaining_methods,
                }
            }
        }

        if request.options.allows_password() && offered.contains(&MethodKind::Password) {
            let prompt = format!("{}@{}'s password: ", user, request.address);
            if let Some(password) = request.responder.do_askpass("", &prompt, "").await {
                match handle
                    .authenticate_password(user, password)
                    .await
                    .map_err(map_russh_error)?
                {
                    AuthResult::Success => {
                        info!("Password authentication succeeded for {}", user);
                        return Ok(());
                    }
                    AuthResult::Failure {
                        remaining_methods, ..
                    } => offered = remaining_methods,
                }
            }
        }

        Err(TransportError::Authentication {
            methods: method_names(&offered),
        })
    }
}

#[async_trait]
impl LoginTransport for RusshTransport {
    async fn connect(
        &self,
        request: ConnectRequest,
    ) -> Result<Box<dyn LoginSession>, TransportError> {
        let port = request.port.unwrap_or(self.config.default_port);
        let user = request
            .login_name
            .clone()
            .unwrap_or_else(|| self.config.default_user.clone());

        info!("Connecting to {}@{}:{}", user, request.address, port);

        let known_hosts = KnownHostsStore::load(&self.config.known_hosts)
            .map_err(|e| TransportError::other(format!("failed to read known_hosts: {}", e)))?;

        let handler = RouterHandler::new(
            request.address.clone(),
            port,
            request.handle_host_key,
            Arc::new(known_hosts),
            request.responder.clone(),
        );

        let ssh_config = Arc::new(client::Config::default());
        let mut handle = client::connect(ssh_config, (request.address.as_str(), port), handler)
            .await
            .map_err(map_handler_error)?;

        debug!("SSH handshake with {} completed", request.address);

        if let Err(e) = self.authenticate(&mut handle, &user, &request).await {
            let _ = handle
                .disconnect(Disconnect::ByApplication, "", "")
                .await;
            return Err(e);
        }

        Ok(Box::new(RusshSession { handle }))
    }
}

/// An authenticated russh session
pub struct RusshSession {
    handle: Handle<RouterHandler>,
}

#[async_trait]
impl LoginSession for RusshSession {
    fn wrap_subprocess_args(&self, argv: &[&str]) -> String {
        quote_argv(argv)
    }

    async fn spawn(&self, command: &str) -> Result<RemoteProcess, TransportError> {
        let mut channel = self
            .handle
            .channel_open_session()
            .await
            .map_err(map_russh_error)?;

        channel
            .exec(true, command)
            .await
            .map_err(map_russh_error)?;
        debug!("Started remote command: {}", command);

        let stdin = Box::pin(channel.make_writer());
        let exit = Box::pin(async move {
            let mut exit_status = None;
            while let Some(msg) = channel.wait().await {
                match msg {
                    ChannelMsg::Data { data } => trace!("bridge stdout: {} bytes", data.len()),
                    ChannelMsg::ExtendedData { data, .. } => {
                        trace!("bridge stderr: {}", String::from_utf8_lossy(&data))
                    }
                    ChannelMsg::ExitStatus { exit_status: status } => exit_status = Some(status),
                    _ => {}
                }
            }
            exit_status
        });

        Ok(RemoteProcess { stdin, exit })
    }

    async fn disconnect(&self) {
        if let Err(e) = self
            .handle
            .disconnect(Disconnect::ByApplication, "", "")
            .await
        {
            warn!("SSH disconnect failed: {}", e);
        }
    }
}

/// Read a private key file, asking for a passphrase when it is encrypted
async fn load_identity(path: &Path, responder: &dyn InteractionResponder) -> Option<PrivateKey> {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) => {
            trace!("Skipping identity {}: {}", path.display(), e);
            return None;
        }
    };

    let key = match PrivateKey::from_openssh(content.as_bytes()) {
        Ok(key) => key,
        Err(e) => {
            warn!("Failed to parse identity {}: {}", path.display(), e);
            return None;
        }
    };
    if !key.is_encrypted() {
        return Some(key);
    }

    let prompt = format!("Enter passphrase for key '{}': ", path.display());
    let passphrase = responder.do_askpass("", &prompt, "").await?;
    match russh::keys::decode_secret_key(&content, Some(&passphrase)) {
        Ok(key) => Some(key),
        Err(e) => {
            warn!("Failed to unlock identity {}: {}", path.display(), e);
            None
        }
    }
}

fn method_name(kind: &MethodKind) -> &'static str {
    #[allow(unreachable_patterns)]
    match kind {
        MethodKind::None => "none",
        MethodKind::Password => "password",
        MethodKind::PublicKey => "publickey",
        MethodKind::HostBased => "hostbased",
        MethodKind::KeyboardInteractive => "keyboard-interactive",
        _ => "unknown",
    }
}

fn method_names(methods: &MethodSet) -> Vec<String> {
    methods
        .iter()
        .map(|kind| method_name(kind).to_string())
        .collect()
}

fn map_russh_error(err: russh::Error) -> TransportError {
    match err {
        russh::Error::IO(e) => TransportError::Io(e),
        russh::Error::UnknownKey => TransportError::HostKey { changed: false },
        other => TransportError::other(other.to_string()),
    }
}

fn map_handler_error(err: HandlerError) -> TransportError {
    match err {
        HandlerError::HostKey { changed } => TransportError::HostKey { changed },
        HandlerError::Russh(e) => map_russh_error(e),
    }
}
