//! ssh-agent authentication
//!
//! Tries every identity held by the agent behind `SSH_AUTH_SOCK`. The agent
//! does the signing, so locked keys loaded with `ssh-add` work here even
//! though the router never unlocks key files itself.

use std::future::Future;

use russh::client::{AuthResult, Handle};
use russh::keys::agent::client::{AgentClient, AgentStream};
use russh::keys::ssh_key;
use russh::{AgentAuthError, CryptoVec, Signer};
use tracing::{debug, warn};

use super::handler::RouterHandler;

type DynAgent = AgentClient<Box<dyn AgentStream + Send + Unpin + 'static>>;

/// Send-safe [`Signer`] over a borrowed agent
///
/// Clones the requested key before the async block so the returned future
/// holds no borrow of the caller's key across `.await`.
struct AgentSigner<'a> {
    agent: &'a mut DynAgent,
}

impl Signer for AgentSigner<'_> {
    type Error = AgentAuthError;

    fn auth_publickey_sign(
        &mut self,
        key: &ssh_key::PublicKey,
        hash_alg: Option<ssh_key::HashAlg>,
        to_sign: CryptoVec,
    ) -> impl Future<Output = Result<CryptoVec, Self::Error>> + Send {
        let key_owned = key.clone();
        async move {
            self.agent
                .sign_request(&key_owned, hash_alg, to_sign)
                .await
                .map_err(Into::into)
        }
    }
}

#[cfg(unix)]
async fn connect_agent() -> Option<DynAgent> {
    match AgentClient::connect_env().await {
        Ok(agent) => Some(agent.dynamic()),
        Err(e) => {
            debug!("No ssh-agent available: {}", e);
            None
        }
    }
}

#[cfg(not(unix))]
async fn connect_agent() -> Option<DynAgent> {
    debug!("ssh-agent is not supported on this platform");
    None
}

/// Try the agent's identities in order
///
/// Returns the last authentication result, or `None` when no agent is
/// reachable or it holds no keys. Agent errors are not fatal: the caller
/// falls through to the next method.
pub async fn authenticate_with_agent(
    handle: &mut Handle<RouterHandler>,
    user: &str,
) -> Option<AuthResult> {
    let mut agent = connect_agent().await?;

    let keys = match agent.request_identities().await {
        Ok(keys) => keys,
        Err(e) => {
            warn!("Failed to list agent keys: {}", e);
            return None;
        }
    };
    if keys.is_empty() {
        debug!("ssh-agent holds no keys");
        return None;
    }

    let mut last = None;
    for key in &keys {
        debug!("Trying agent key {} ({})", key.algorithm(), key.comment());
        match handle
            .authenticate_publickey_with(
                user,
                key.clone(),
                None,
                &mut AgentSigner { agent: &mut agent },
            )
            .await
        {
            Ok(result) if result.success() => return Some(result),
            Ok(result) => last = Some(result),
            Err(e) => warn!("Agent signing failed for {}: {}", key.comment(), e),
        }
    }
    last
}
