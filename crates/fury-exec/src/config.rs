//! Connection configuration for SSH targets

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ExecError;

/// Default SSH port
pub const DEFAULT_PORT: u16 = 22;

/// How the server host key is verified
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HostKeyCheck {
    /// Verify against known hosts if the file exists, otherwise skip
    /// verification with a warning
    #[default]
    Auto,
    /// Verify against known hosts; a missing file is an error
    Strict,
    /// Never verify the host key
    Off,
}

/// SSH connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SshConfig {
    /// `host`, `host:port` or `[ipv6]:port`
    pub addr: String,
    /// Port used when `addr` has none
    #[serde(default = "default_port")]
    pub port: u16,
    /// Account to authenticate as
    #[serde(default = "default_user")]
    pub user: String,
    /// Agent socket, overriding `SSH_AUTH_SOCK`
    #[serde(default)]
    pub agent_socket: Option<PathBuf>,
    /// Known hosts file, overriding `~/.ssh/known_hosts`
    #[serde(default)]
    pub known_hosts: Option<PathBuf>,
    /// Host key verification policy
    #[serde(default)]
    pub host_key_check: HostKeyCheck,
    /// Give up dialing after this many seconds
    #[serde(default)]
    pub connect_timeout_secs: Option<u64>,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_user() -> String {
    "root".to_string()
}

impl SshConfig {
    /// Settings for `addr` with every other field at its default
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            port: DEFAULT_PORT,
            user: default_user(),
            agent_socket: None,
            known_hosts: None,
            host_key_check: HostKeyCheck::default(),
            connect_timeout_secs: None,
        }
    }

    /// Set the account name
    #[must_use]
    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = user.into();
        self
    }

    /// Set the agent socket path
    #[must_use]
    pub fn with_agent_socket(mut self, path: impl Into<PathBuf>) -> Self {
        self.agent_socket = Some(path.into());
        self
    }

    /// Set the known hosts file
    #[must_use]
    pub fn with_known_hosts(mut self, path: impl Into<PathBuf>) -> Self {
        self.known_hosts = Some(path.into());
        self
    }

    /// Set the host key policy
    #[must_use]
    pub fn with_host_key_check(mut self, check: HostKeyCheck) -> Self {
        self.host_key_check = check;
        self
    }

    /// Set the connect timeout, rounded up to whole seconds
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        let secs = timeout.as_secs() + u64::from(timeout.subsec_nanos() > 0);
        self.connect_timeout_secs = Some(secs);
        self
    }

    /// Connect timeout, if any
    ///
    /// # Errors
    /// Returns `ExecError::Config` for a zero timeout
    pub fn connect_timeout(&self) -> Result<Option<Duration>, ExecError> {
        match self.connect_timeout_secs {
            Some(0) => Err(ExecError::Config(
                "connect_timeout_secs must be at least 1".to_string(),
            )),
            secs => Ok(secs.map(Duration::from_secs)),
        }
    }

    /// Split `addr` into host and port
    ///
    /// # Errors
    /// Returns `ExecError::Config` for an empty host or unparsable port
    pub fn host_port(&self) -> Result<(String, u16), ExecError> {
        let addr = self.addr.trim();
        let bad = |why: &str| ExecError::Config(format!("address {addr:?}: {why}"));

        let (host, port) = if let Some(rest) = addr.strip_prefix('[') {
            let (host, tail) = rest.split_once(']').ok_or_else(|| bad("unclosed '['"))?;
            match tail {
                "" => (host, None),
                _ => {
                    let port = tail.strip_prefix(':').ok_or_else(|| bad("junk after ']'"))?;
                    (host, Some(port))
                }
            }
        } else if addr.matches(':').count() > 1 {
            // Bare IPv6 address without a port.
            (addr, None)
        } else if let Some((host, port)) = addr.split_once(':') {
            (host, Some(port))
        } else {
            (addr, None)
        };

        if host.is_empty() {
            return Err(bad("empty host"));
        }
        let port = match port {
            Some(p) => p.parse::<u16>().map_err(|_| bad("invalid port"))?,
            None => self.port,
        };
        Ok((host.to_string(), port))
    }
}
