//! Configuration and CLI argument parsing for the SSH router

use clap::Parser;
use std::path::PathBuf;

use crate::error::{Result, RouterError};
use crate::router::{RouterConfig, DEFAULT_BRIDGE_COMMAND};
use crate::ssh::known_hosts::default_known_hosts_path;
use crate::ssh::TransportConfig;

/// Default log filter when neither `--log-level` nor `RUST_LOG` is set
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// SSH router CLI Arguments
#[derive(Parser, Debug, Clone)]
#[command(name = "ssh-router")]
#[command(version)]
#[command(about = "Routes channel requests to SSH-connected remote bridges")]
pub struct Args {
    /// Name of this machine; requests for it are not routed
    #[arg(long, default_value = "localhost", env = "SSH_ROUTER_LOCAL_HOST")]
    pub local_host: String,

    /// User running the router; also the default SSH login name
    #[arg(long, env = "SSH_ROUTER_LOCAL_USER")]
    pub local_user: Option<String>,

    /// known_hosts file used to verify host keys (default: ~/.ssh/known_hosts)
    #[arg(long, env = "SSH_ROUTER_KNOWN_HOSTS")]
    pub known_hosts: Option<PathBuf>,

    /// Private key file to try; may be given more than once
    #[arg(long = "identity", env = "SSH_ROUTER_IDENTITY", value_delimiter = ',')]
    pub identities: Vec<PathBuf>,

    /// Do not use keys from the ssh-agent
    #[arg(long, default_value = "false", env = "SSH_ROUTER_NO_AGENT")]
    pub no_agent: bool,

    /// Command that starts the bridge on the remote host
    #[arg(long, default_value = DEFAULT_BRIDGE_COMMAND, env = "SSH_ROUTER_BRIDGE_COMMAND")]
    pub bridge_command: String,

    /// Log filter, e.g. `debug` or `ssh_router=trace`
    #[arg(long, env = "SSH_ROUTER_LOG_LEVEL")]
    pub log_level: Option<String>,
}

/// Parsed and validated configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub local_host: String,

    pub local_user: String,

    pub known_hosts: PathBuf,

    pub identities: Vec<PathBuf>,

    pub use_agent: bool,

    pub bridge_command: String,

    pub log_level: Option<String>,
}

impl Config {
    /// Create Config from CLI Args
    pub fn from_args(args: Args) -> Result<Self> {
        validate_args(&args)?;

        let local_user = args
            .local_user
            .filter(|user| !user.is_empty())
            .or_else(|| std::env::var("USER").ok().filter(|user| !user.is_empty()))
            .ok_or_else(|| {
                RouterError::config("missing --local-user and $USER is unset")
            })?;

        let known_hosts = args.known_hosts.unwrap_or_else(default_known_hosts_path);

        Ok(Config {
            local_host: args.local_host,
            local_user,
            known_hosts,
            identities: args.identities,
            use_agent: !args.no_agent,
            bridge_command: args.bridge_command,
            log_level: args.log_level,
        })
    }

    pub fn router_config(&self) -> RouterConfig {
        RouterConfig::new(&self.local_host, &self.local_user)
            .with_bridge_command(&self.bridge_command)
    }

    pub fn transport_config(&self) -> TransportConfig {
        let mut config = TransportConfig::new(&self.local_user, &self.known_hosts)
            .with_agent(self.use_agent);
        for identity in &self.identities {
            config = config.with_identity_file(identity);
        }
        config
    }
}

/// Validate CLI arguments
fn validate_args(args: &Args) -> Result<()> {
    let mut errors = Vec::new();

    if args.local_host.is_empty() {
        errors.push("--local-host must not be empty".to_string());
    }

    if args.bridge_command.trim().is_empty() {
        errors.push("--bridge-command must not be empty".to_string());
    }

    for identity in &args.identities {
        if !identity.exists() {
            errors.push(format!("Identity file not found: {}", identity.display()));
        }
    }

    if !errors.is_empty() {
        return Err(RouterError::Config(format!(
            "invalid arguments:\n{}",
            errors.join("\n")
        )));
    }

    Ok(())
}
