//! Interactive prompt handling during login
//!
//! The transport calls into an [`InteractionResponder`] whenever the
//! handshake needs a decision: trusting a host key, or supplying a password
//! or key passphrase. [`AuthResponder`] is the policy used by remote peers.

use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use tokio::sync::Mutex;
use tracing::{debug, error};

use crate::error::HostIdentity;

static PASSPHRASE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^Enter passphrase for key '(.*)': $").expect("passphrase prompt pattern")
});

/// A host key presented during the handshake
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostKeySighting {
    /// Why we were asked (`"unknown"`, `"changed"`)
    pub reason: String,
    pub host: String,
    pub algorithm: String,
    /// Base64 public key blob
    pub key: String,
    pub fingerprint: String,
}

impl HostKeySighting {
    /// The identity fields reported to the user when this key needs accepting
    pub fn identity(&self) -> HostIdentity {
        HostIdentity {
            host_key: format!("{} {} {}", self.host, self.algorithm, self.key),
            host_fingerprint: self.fingerprint.clone(),
        }
    }
}

/// Answers prompts raised by the login transport
#[async_trait]
pub trait InteractionResponder: Send + Sync {
    /// Should the transport trust this host key? Only asked when the
    /// connection was allowed to make an interactive trust decision.
    async fn do_hostkey(&self, sighting: HostKeySighting) -> bool;

    /// Supply a secret for `prompt`, or `None` to decline
    async fn do_askpass(&self, messages: &str, prompt: &str, hint: &str) -> Option<String>;
}

/// What a responder observed during one connection attempt
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponderReport {
    pub hostkeys_seen: Vec<HostKeySighting>,
    pub error_message: Option<String>,
    pub password_attempts: u32,
}

/// Prompt policy for one connection attempt
///
/// Never trusts host keys on its own and never unlocks private keys. A held
/// password is handed out at most once.
pub struct AuthResponder {
    password: Option<String>,
    report: Mutex<ResponderReport>,
}

impl AuthResponder {
    pub fn new(password: Option<String>) -> Self {
        Self {
            password,
            report: Mutex::new(ResponderReport::default()),
        }
    }

    pub async fn report(&self) -> ResponderReport {
        self.report.lock().await.clone()
    }

    pub async fn hostkeys_seen(&self) -> Vec<HostKeySighting> {
        self.report.lock().await.hostkeys_seen.clone()
    }

    pub async fn error_message(&self) -> Option<String> {
        self.report.lock().await.error_message.clone()
    }

    pub async fn password_attempts(&self) -> u32 {
        self.report.lock().await.password_attempts
    }
}

impl std::fmt::Debug for AuthResponder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthResponder")
            .field("has_password", &self.password.is_some())
            .finish()
    }
}

#[async_trait]
impl InteractionResponder for AuthResponder {
    async fn do_hostkey(&self, sighting: HostKeySighting) -> bool {
        debug!(
            "Host key sighting ({}) for {}: {} {}",
            sighting.reason, sighting.host, sighting.algorithm, sighting.fingerprint
        );
        self.report.lock().await.hostkeys_seen.push(sighting);
        false
    }

    async fn do_askpass(&self, _messages: &str, prompt: &str, hint: &str) -> Option<String> {
        debug!("Got askpass({}): {}", hint, prompt);

        if let Some(captures) = PASSPHRASE_RE.captures(prompt) {
            // Locked keys are never unlocked here; the front-end loads them
            // into the agent and retries.
            let path = captures.get(1).map_or("", |m| m.as_str());
            debug!("Passphrase request for {}, declining", path);
            self.report.lock().await.error_message = Some(format!("locked identity: {}", path));
            return None;
        }

        let mut report = self.report.lock().await;
        let Some(password) = self.password.as_ref() else {
            error!("Password prompt without a held password: {}", prompt);
            return None;
        };
        if report.password_attempts > 0 {
            error!("Refusing a second password attempt: {}", prompt);
            return None;
        }
        report.password_attempts += 1;
        Some(password.clone())
    }
}
