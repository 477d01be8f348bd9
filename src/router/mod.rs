//! Host routing
//!
//! [`RemoteRouter`] decides whether a request is served locally or by a
//! remote peer, and keeps one peer per [`ConnectionKey`]. Peers remove
//! themselves from the cache when they finish.

pub mod options;

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::peer::{PeerId, PeerParams, RemotePeer, Superuser};
use crate::ssh::LoginTransport;

pub use options::RouteOptions;

/// Command started on the remote host when none is configured
pub const DEFAULT_BRIDGE_COMMAND: &str = "remote-bridge";

/// Identity of a cached connection
///
/// `isolation` is the requesting channel for private sessions, so those
/// never share a connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionKey {
    pub host: String,
    pub user: Option<String>,
    pub isolation: Option<String>,
}

/// Router settings
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Name of this machine; requests for it are served locally
    pub local_host: String,

    /// User running the router; naming it explicitly is the same as naming nobody
    pub local_user: String,

    /// Command that starts the bridge on the remote host
    pub bridge_command: String,
}

impl RouterConfig {
    pub fn new(local_host: impl Into<String>, local_user: impl Into<String>) -> Self {
        Self {
            local_host: local_host.into(),
            local_user: local_user.into(),
            bridge_command: DEFAULT_BRIDGE_COMMAND.to_string(),
        }
    }

    pub fn with_bridge_command(mut self, command: impl Into<String>) -> Self {
        self.bridge_command = command.into();
        self
    }
}

/// Routes requests to cached remote peers
pub struct RemoteRouter {
    config: RouterConfig,
    transport: Arc<dyn LoginTransport>,
    remotes: Arc<DashMap<ConnectionKey, Arc<RemotePeer>>>,
}

impl RemoteRouter {
    pub fn new(config: RouterConfig, transport: Arc<dyn LoginTransport>) -> Self {
        Self {
            config,
            transport,
            remotes: Arc::new(DashMap::new()),
        }
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    /// Derive the cache key for a request, or `None` if it is local
    pub fn connection_key(&self, options: &RouteOptions) -> Option<ConnectionKey> {
        let host = options.host.as_deref().unwrap_or(&self.config.local_host);
        if host == self.config.local_host {
            return None;
        }

        // Without an explicit user, ssh decides; track those by the host
        // string's own user part, if any
        let user = options
            .user
            .as_deref()
            .filter(|user| !user.is_empty() && *user != self.config.local_user)
            .or_else(|| {
                host.rsplit_once('@')
                    .map(|(user, _)| user)
                    .filter(|user| !user.is_empty())
            })
            .map(str::to_string);

        let isolation = if options.is_private() {
            if options.channel.is_none() {
                warn!("Private session requested without a channel, sharing instead");
            }
            options.channel.clone()
        } else {
            None
        };

        Some(ConnectionKey {
            host: host.to_string(),
            user,
            isolation,
        })
    }

    /// Find or start the peer serving `options`
    ///
    /// Returns `None` for the local host. Must be called from within a
    /// tokio runtime.
    pub fn route(&self, options: &RouteOptions) -> Option<Arc<RemotePeer>> {
        let key = self.connection_key(options)?;
        debug!("Request for channel {:?} is remote, key={:?}", options.channel, key);

        let peer = match self.remotes.entry(key.clone()) {
            Entry::Occupied(entry) if !entry.get().state().is_terminal() => {
                return Some(Arc::clone(entry.get()));
            }
            Entry::Occupied(mut entry) => {
                // Finished, but its watcher has not removed it yet
                debug!("{} for {:?} already finished, replacing it", entry.get().id(), key);
                let peer = self.start_peer(&key, options);
                entry.insert(Arc::clone(&peer));
                peer
            }
            Entry::Vacant(entry) => {
                debug!("{:?} is not among the existing remotes, opening a new connection", key);
                let peer = self.start_peer(&key, options);
                entry.insert(Arc::clone(&peer));
                peer
            }
        };

        self.watch_peer(key, Arc::clone(&peer));
        Some(peer)
    }

    fn start_peer(&self, key: &ConnectionKey, options: &RouteOptions) -> Arc<RemotePeer> {
        let params = PeerParams {
            host: key.host.clone(),
            user: key.user.clone(),
            password: options.password.clone(),
            private: key.isolation.is_some(),
            superuser: Superuser::from_option(options.init_superuser.as_deref()),
            bridge_command: self.config.bridge_command.clone(),
        };
        RemotePeer::start(params, Arc::clone(&self.transport))
    }

    /// Drop the cache entry once the peer finishes
    fn watch_peer(&self, key: ConnectionKey, peer: Arc<RemotePeer>) {
        let remotes = Arc::clone(&self.remotes);
        tokio::spawn(async move {
            let state = peer.wait_done().await;
            debug!("{} for {:?} finished: {:?}", peer.id(), key, state);
            remove_if_same(&remotes, &key, peer.id());
        });
    }

    /// Remove `key` if it still maps to peer `id`
    pub fn remove_peer(&self, key: &ConnectionKey, id: PeerId) -> bool {
        remove_if_same(&self.remotes, key, id)
    }

    fn peers(&self) -> Vec<Arc<RemotePeer>> {
        let mut peers: Vec<_> = self
            .remotes
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        peers.sort_by_key(|peer| peer.id());
        peers.dedup_by_key(|peer| peer.id());
        peers
    }

    /// Pass a kill request to every live peer
    pub async fn kill(&self, host: Option<&str>, group: Option<&str>, message: &Value) {
        for peer in self.peers() {
            peer.kill(host, group, message).await;
        }
    }

    /// Close every peer
    pub async fn shutdown(&self) {
        let peers = self.peers();
        if !peers.is_empty() {
            info!("Closing {} remote peer(s)", peers.len());
        }
        for peer in peers {
            peer.close().await;
        }
    }

    pub fn len(&self) -> usize {
        self.remotes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.remotes.is_empty()
    }
}

fn remove_if_same(
    remotes: &DashMap<ConnectionKey, Arc<RemotePeer>>,
    key: &ConnectionKey,
    id: PeerId,
) -> bool {
    remotes
        .remove_if(key, |_, peer| peer.id() == id)
        .is_some()
}
