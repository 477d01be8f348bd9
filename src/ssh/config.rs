//! SSH configuration types
//!
//! [`LoginOptions`] is the per-attempt authentication policy a peer hands to
//! the transport. [`TransportConfig`] holds the process-wide settings of the
//! russh transport.

use std::path::PathBuf;

/// Authentication policy for one login attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginOptions {
    /// Refuse unknown or changed host keys unless a trust decision is allowed
    pub strict_host_key_checking: bool,

    /// How many times the password prompt may be answered
    pub number_of_password_prompts: u32,

    /// Whether password authentication may be attempted at all
    pub password_authentication: bool,

    /// Whether keyboard-interactive authentication may be attempted
    pub kbd_interactive_authentication: bool,
}

impl LoginOptions {
    /// Policy for a peer that does or does not hold a password
    ///
    /// With a password exactly one password prompt is allowed. Without one,
    /// only non-interactive methods (agent, unencrypted identity files) remain.
    pub fn for_password(has_password: bool) -> Self {
        if has_password {
            Self {
                strict_host_key_checking: true,
                number_of_password_prompts: 1,
                password_authentication: true,
                kbd_interactive_authentication: false,
            }
        } else {
            Self {
                strict_host_key_checking: true,
                number_of_password_prompts: 0,
                password_authentication: false,
                kbd_interactive_authentication: false,
            }
        }
    }

    /// True if a password may be sent
    pub fn allows_password(&self) -> bool {
        self.password_authentication && self.number_of_password_prompts > 0
    }
}

/// Settings of the russh-based transport
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Login name used when a request names no user
    pub default_user: String,

    /// Port used when the host string carries none
    pub default_port: u16,

    /// known_hosts file consulted for host key verification
    pub known_hosts: PathBuf,

    /// Private key files tried for public key authentication, in order
    pub identity_files: Vec<PathBuf>,

    /// Try keys held by the ssh-agent (`SSH_AUTH_SOCK`)
    pub use_agent: bool,
}

impl TransportConfig {
    /// Create a transport configuration with minimal required fields
    pub fn new(default_user: impl Into<String>, known_hosts: impl Into<PathBuf>) -> Self {
        Self {
            default_user: default_user.into(),
            default_port: 22,
            known_hosts: known_hosts.into(),
            identity_files: Vec::new(),
            use_agent: true,
        }
    }

    /// Add a private key file
    pub fn with_identity_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.identity_files.push(path.into());
        self
    }

    /// Enable or disable agent authentication
    pub fn with_agent(mut self, use_agent: bool) -> Self {
        self.use_agent = use_agent;
        self
    }

    /// Set the port used when none is given
    pub fn with_default_port(mut self, port: u16) -> Self {
        self.default_port = port;
        self
    }
}
