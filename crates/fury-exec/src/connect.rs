//! Connection bootstrap: agent authentication and host key verification

use std::ffi::OsString;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use russh::client;
use russh::keys::agent::client::AgentClient;
use russh::keys::ssh_key::{self, HashAlg};
use russh::keys::check_known_hosts_path;
use tokio::net::UnixStream;
use tokio::time::timeout;
use tracing::{debug, info, instrument, warn};

use crate::config::{HostKeyCheck, SshConfig};
use crate::error::ExecError;

/// Environment variable naming the agent socket
pub const AGENT_SOCKET_VAR: &str = "SSH_AUTH_SOCK";

/// Source of truth for server host keys on one connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostKeyPolicy {
    /// Accept only keys listed for the host in this file
    KnownHosts(PathBuf),
    /// Accept any key
    Skip,
}

/// Pick the agent socket from configuration, then the environment
pub(crate) fn agent_socket(
    configured: Option<&Path>,
    from_env: Option<OsString>,
) -> Result<PathBuf, ExecError> {
    if let Some(path) = configured {
        return Ok(path.to_path_buf());
    }
    match from_env {
        Some(value) if !value.is_empty() => Ok(PathBuf::from(value)),
        _ => Err(ExecError::NoAgentFound),
    }
}

/// Decide how host keys are checked
///
/// `home` is the invoking user's home directory, used for the default
/// `~/.ssh/known_hosts` location.
pub(crate) fn host_key_policy(
    check: HostKeyCheck,
    configured: Option<&Path>,
    home: Option<PathBuf>,
) -> Result<HostKeyPolicy, ExecError> {
    if check == HostKeyCheck::Off {
        warn!("host key checking disabled by configuration");
        return Ok(HostKeyPolicy::Skip);
    }

    let path = match configured {
        Some(path) => path.to_path_buf(),
        None => match home {
            Some(home) => home.join(".ssh").join("known_hosts"),
            None if check == HostKeyCheck::Strict => {
                return Err(ExecError::KnownHosts(
                    "no home directory to find known_hosts in".to_string(),
                ));
            }
            None => {
                warn!("no home directory, skipping host key checking");
                return Ok(HostKeyPolicy::Skip);
            }
        },
    };

    match std::fs::File::open(&path) {
        Ok(_) => Ok(HostKeyPolicy::KnownHosts(path)),
        Err(e) if e.kind() == ErrorKind::NotFound && check == HostKeyCheck::Auto => {
            warn!(path = %path.display(), "no known_hosts file, skipping host key checking");
            Ok(HostKeyPolicy::Skip)
        }
        Err(e) => Err(ExecError::KnownHosts(format!("load {}: {e}", path.display()))),
    }
}

/// russh client handler enforcing a [`HostKeyPolicy`]
#[derive(Debug)]
pub struct HostKeyVerifier {
    host: String,
    port: u16,
    policy: HostKeyPolicy,
}

impl HostKeyVerifier {
    /// Verify keys presented by `host:port` under `policy`
    pub fn new(host: impl Into<String>, port: u16, policy: HostKeyPolicy) -> Self {
        Self {
            host: host.into(),
            port,
            policy,
        }
    }

    /// Whether `key` is acceptable for this host
    #[must_use]
    pub fn verify(&self, key: &ssh_key::PublicKey) -> bool {
        let path = match &self.policy {
            HostKeyPolicy::Skip => return true,
            HostKeyPolicy::KnownHosts(path) => path,
        };

        match check_known_hosts_path(&self.host, self.port, key, path) {
            Ok(true) => {
                debug!(host = %self.host, "host key matches known_hosts");
                true
            }
            Ok(false) => {
                warn!(host = %self.host, port = self.port, "host not in known_hosts");
                false
            }
            Err(e) => {
                warn!(host = %self.host, port = self.port, error = %e, "host key verification failed");
                false
            }
        }
    }
}

impl client::Handler for HostKeyVerifier {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &ssh_key::PublicKey,
    ) -> Result<bool, Self::Error> {
        Ok(self.verify(server_public_key))
    }
}

/// Open an authenticated, host-verified connection
///
/// Keys come from the SSH agent only.
///
/// # Errors
/// Returns the bootstrap error kinds of [`ExecError`]
#[instrument(skip(config), fields(addr = %config.addr, user = %config.user))]
pub async fn connect(config: &SshConfig) -> Result<client::Handle<HostKeyVerifier>, ExecError> {
    let (host, port) = config.host_port()?;
    let connect_timeout = config.connect_timeout()?;

    let socket = agent_socket(
        config.agent_socket.as_deref(),
        std::env::var_os(AGENT_SOCKET_VAR),
    )?;
    let mut agent = AgentClient::connect_uds(&socket)
        .await
        .map_err(|e| ExecError::AgentUnavailable(e.to_string()))?;
    let identities = agent
        .request_identities()
        .await
        .map_err(|e| ExecError::AgentSignerError(e.to_string()))?;
    debug!(count = identities.len(), "loaded identities from SSH agent");

    let policy = host_key_policy(
        config.host_key_check,
        config.known_hosts.as_deref(),
        dirs::home_dir(),
    )?;

    info!(host = %host, port, user = %config.user, "connecting to SSH");

    let client_config = Arc::new(client::Config::default());
    let handler = HostKeyVerifier::new(host.clone(), port, policy);
    let dial = client::connect(client_config, (host.as_str(), port), handler);
    let dialed = match connect_timeout {
        Some(limit) => timeout(limit, dial)
            .await
            .map_err(|_| ExecError::Timeout { timeout: limit })?,
        None => dial.await,
    };
    let mut session = dialed.map_err(|e| match e {
        russh::Error::UnknownKey => ExecError::HostKeyRejected(format!("{host}:{port}")),
        e => ExecError::ConnectionFailed(e.to_string()),
    })?;

    authenticate(&mut session, &config.user, identities, &mut agent).await?;

    info!(host = %host, "SSH connected and authenticated");
    Ok(session)
}

async fn authenticate(
    session: &mut client::Handle<HostKeyVerifier>,
    user: &str,
    identities: Vec<ssh_key::PublicKey>,
    agent: &mut AgentClient<UnixStream>,
) -> Result<(), ExecError> {
    let hash_alg = session
        .best_supported_rsa_hash()
        .await
        .ok()
        .flatten()
        .flatten();

    for key in identities {
        let fingerprint = key.fingerprint(HashAlg::Sha256);
        let auth_res = session
            .authenticate_publickey_with(user, key, hash_alg, agent)
            .await
            .map_err(|e| ExecError::AuthenticationFailed(e.to_string()))?;

        if auth_res.success() {
            debug!(%fingerprint, "authenticated with agent key");
            return Ok(());
        }
        debug!(%fingerprint, "agent key rejected");
    }

    Err(ExecError::AuthenticationFailed(format!(
        "no agent identity accepted for user {user}"
    )))
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tempfile::TempDir;

    use super::*;

    const KNOWN_KEY: &str =
        "ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAILM+rvN+ot98qgEN796jTiQfZfG1KaT0PtFDJ/XFSqti";
    const OTHER_KEY: &str =
        "ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAIJZIP2O7erZsBF6EdKyipk+E78ltttKC3vOmjkqpkKSB";

    fn key(line: &str) -> ssh_key::PublicKey {
        ssh_key::PublicKey::from_openssh(line).unwrap()
    }

    fn known_hosts(dir: &TempDir, contents: &str) -> PathBuf {
        let path = dir.path().join("known_hosts");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_agent_socket_from_config_wins() {
        let got = agent_socket(Some(Path::new("/run/agent.sock")), Some("/tmp/env".into()));
        assert_eq!(got.unwrap(), PathBuf::from("/run/agent.sock"));
    }

    #[test]
    fn test_agent_socket_from_env() {
        let got = agent_socket(None, Some("/tmp/ssh-XXXX/agent.1".into()));
        assert_eq!(got.unwrap(), PathBuf::from("/tmp/ssh-XXXX/agent.1"));
    }

    #[test]
    fn test_no_agent_found() {
        assert!(matches!(agent_socket(None, None), Err(ExecError::NoAgentFound)));
        assert!(matches!(
            agent_socket(None, Some(OsString::new())),
            Err(ExecError::NoAgentFound)
        ));
    }

    #[test]
    fn test_policy_skips_without_home() {
        let policy = host_key_policy(HostKeyCheck::Auto, None, None).unwrap();
        assert_eq!(policy, HostKeyPolicy::Skip);
    }

    #[test]
    fn test_policy_skips_without_file() {
        let home = TempDir::new().unwrap();
        let policy =
            host_key_policy(HostKeyCheck::Auto, None, Some(home.path().to_path_buf())).unwrap();
        assert_eq!(policy, HostKeyPolicy::Skip);
    }

    #[test]
    fn test_policy_uses_home_known_hosts() {
        let home = TempDir::new().unwrap();
        std::fs::create_dir(home.path().join(".ssh")).unwrap();
        let path = home.path().join(".ssh").join("known_hosts");
        std::fs::write(&path, "").unwrap();

        let policy =
            host_key_policy(HostKeyCheck::Auto, None, Some(home.path().to_path_buf())).unwrap();
        assert_eq!(policy, HostKeyPolicy::KnownHosts(path));
    }

    #[test]
    fn test_strict_policy_requires_file() {
        let home = TempDir::new().unwrap();
        assert!(matches!(
            host_key_policy(HostKeyCheck::Strict, None, Some(home.path().to_path_buf())),
            Err(ExecError::KnownHosts(_))
        ));
        assert!(matches!(
            host_key_policy(HostKeyCheck::Strict, None, None),
            Err(ExecError::KnownHosts(_))
        ));
    }

    #[test]
    fn test_off_policy_ignores_file() {
        let dir = TempDir::new().unwrap();
        let path = known_hosts(&dir, "");
        let policy = host_key_policy(HostKeyCheck::Off, Some(&path), None).unwrap();
        assert_eq!(policy, HostKeyPolicy::Skip);
    }

    #[test]
    fn test_unreadable_known_hosts_is_error() {
        let dir = TempDir::new().unwrap();
        let not_a_dir = known_hosts(&dir, "");
        let path = not_a_dir.join("known_hosts");
        assert!(matches!(
            host_key_policy(HostKeyCheck::Auto, Some(&path), None),
            Err(ExecError::KnownHosts(_))
        ));
    }

    #[test]
    fn test_verifier_accepts_listed_key() {
        let dir = TempDir::new().unwrap();
        let path = known_hosts(&dir, &format!("web1.example.com {KNOWN_KEY}\n"));
        let verifier = HostKeyVerifier::new("web1.example.com", 22, HostKeyPolicy::KnownHosts(path));

        assert!(verifier.verify(&key(KNOWN_KEY)));
    }

    #[test]
    fn test_verifier_rejects_changed_key() {
        let dir = TempDir::new().unwrap();
        let path = known_hosts(&dir, &format!("web1.example.com {KNOWN_KEY}\n"));
        let verifier = HostKeyVerifier::new("web1.example.com", 22, HostKeyPolicy::KnownHosts(path));

        assert!(!verifier.verify(&key(OTHER_KEY)));
    }

    #[test]
    fn test_verifier_rejects_unknown_host() {
        let dir = TempDir::new().unwrap();
        let path = known_hosts(&dir, &format!("web1.example.com {KNOWN_KEY}\n"));
        let verifier = HostKeyVerifier::new("db9.example.com", 22, HostKeyPolicy::KnownHosts(path));

        assert!(!verifier.verify(&key(KNOWN_KEY)));
    }

    #[test]
    fn test_verifier_skip_accepts_anything() {
        let verifier = HostKeyVerifier::new("anything", 22, HostKeyPolicy::Skip);
        assert!(verifier.verify(&key(OTHER_KEY)));
    }

    #[tokio::test]
    async fn test_connect_without_agent_socket() {
        let dir = TempDir::new().unwrap();
        let config = SshConfig::new("127.0.0.1:1").with_agent_socket(dir.path().join("nope.sock"));

        assert!(matches!(
            connect(&config).await,
            Err(ExecError::AgentUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_connect_rejects_bad_address_first() {
        let config = SshConfig::new("host:notaport").with_agent_socket("/nonexistent");
        assert!(matches!(connect(&config).await, Err(ExecError::Config(_))));
    }

    #[tokio::test]
    async fn test_connect_rejects_zero_timeout_before_dialing() {
        let config = SshConfig::new("127.0.0.1:1")
            .with_agent_socket("/nonexistent")
            .with_connect_timeout(std::time::Duration::ZERO);
        assert!(matches!(connect(&config).await, Err(ExecError::Config(_))));
    }
}
