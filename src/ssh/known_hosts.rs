//! Known hosts lookup for host key verification
//!
//! Reads an OpenSSH `known_hosts` file and classifies a presented key as
//! verified, unknown or changed. Hashed host names (`|1|...`) and marker
//! lines (`@cert-authority`, `@revoked`) are skipped.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use russh::keys::{HashAlg, PublicKey, PublicKeyBase64};
use tracing::{debug, warn};

use crate::error::Result;

/// Result of host key verification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostKeyVerification {
    /// Key matches a known_hosts entry
    Verified,
    /// No entry for this host and key type
    Unknown,
    /// An entry of the same key type holds a different key
    Changed,
}

/// Entry in known_hosts: (key_type, base64_key)
#[derive(Debug, Clone, PartialEq, Eq)]
struct HostKeyEntry {
    key_type: String,
    key_data: String,
}

/// Parsed known_hosts file
#[derive(Debug, Default)]
pub struct KnownHostsStore {
    hosts: HashMap<String, Vec<HostKeyEntry>>,
}

impl KnownHostsStore {
    /// Load a known_hosts file; a missing file is an empty store
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!("known_hosts {} does not exist", path.display());
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        Ok(Self::parse(&content))
    }

    /// Parse known_hosts content
    pub fn parse(content: &str) -> Self {
        let mut hosts: HashMap<String, Vec<HostKeyEntry>> = HashMap::new();

        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with('@') {
                continue;
            }

            let mut parts = line.split_whitespace();
            let (Some(hostnames), Some(key_type), Some(key_data)) =
                (parts.next(), parts.next(), parts.next())
            else {
                continue;
            };

            let entry = HostKeyEntry {
                key_type: key_type.to_string(),
                key_data: key_data.to_string(),
            };

            for hostname in hostnames.split(',') {
                if hostname.starts_with('|') {
                    continue;
                }
                hosts
                    .entry(hostname.to_lowercase())
                    .or_default()
                    .push(entry.clone());
            }
        }

        Self { hosts }
    }

    /// known_hosts spelling of host and port
    fn make_key(host: &str, port: u16) -> String {
        let host = host.to_lowercase();
        if port == 22 {
            host
        } else {
            format!("[{}]:{}", host, port)
        }
    }

    /// Verify a host's public key
    pub fn verify(&self, host: &str, port: u16, key: &PublicKey) -> HostKeyVerification {
        let lookup_key = Self::make_key(host, port);
        let key_type = key.algorithm().as_str().to_string();
        let key_data = key.public_key_base64();

        let Some(entries) = self.hosts.get(&lookup_key) else {
            debug!("Unknown host: {}", lookup_key);
            return HostKeyVerification::Unknown;
        };

        let mut changed = false;
        for entry in entries.iter().filter(|e| e.key_type == key_type) {
            if entry.key_data == key_data {
                debug!("Host key verified for {} ({})", lookup_key, key_type);
                return HostKeyVerification::Verified;
            }
            changed = true;
        }

        if changed {
            warn!("HOST KEY CHANGED for {} ({})", lookup_key, key_type);
            HostKeyVerification::Changed
        } else {
            debug!("Host {} known but no {} key stored", lookup_key, key_type);
            HostKeyVerification::Unknown
        }
    }

    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }
}

/// SHA256 fingerprint of a public key, `SHA256:<base64>`
pub fn fingerprint(key: &PublicKey) -> String {
    key.fingerprint(HashAlg::Sha256).to_string()
}

/// Default known_hosts location (`~/.ssh/known_hosts`)
pub fn default_known_hosts_path() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_default()
        .join(".ssh")
        .join("known_hosts")
}
