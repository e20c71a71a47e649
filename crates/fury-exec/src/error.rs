//! Error types for fury-exec

use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// A command that ran to completion but exited with a nonzero status
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[error("command exited with status {status}")]
pub struct ExitStatus {
    /// Exit status code reported by the process
    pub status: i32,
}

/// Why an environment variable name was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvNameProblem {
    /// The name is the empty string
    Empty,
    /// The name starts with this digit
    LeadingDigit(char),
    /// The name contains this character outside `[A-Za-z0-9_]`
    IllegalCharacter(char),
}

impl fmt::Display for EnvNameProblem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EnvNameProblem::Empty => f.write_str("name is empty"),
            EnvNameProblem::LeadingDigit(c) => write!(f, "starts with digit {c:?}"),
            EnvNameProblem::IllegalCharacter(c) => write!(f, "illegal character {c:?}"),
        }
    }
}

/// Errors that can occur while building, connecting for or running a command
#[derive(Error, Debug, Clone)]
pub enum ExecError {
    /// The command ran and exited nonzero
    #[error(transparent)]
    Exit(#[from] ExitStatus),

    /// The remote process was terminated by a signal
    #[error("command killed by signal {signal}")]
    Signaled {
        /// Signal name as reported by the peer
        signal: String,
    },

    /// Environment variable name cannot be placed unquoted on a command line
    #[error("invalid environment variable name {name:?}: {problem}")]
    InvalidEnvironmentName {
        /// The offending name
        name: String,
        /// What is wrong with it
        problem: EnvNameProblem,
    },

    /// Command has no path to execute
    #[error("command path is empty")]
    EmptyPath,

    /// No SSH agent socket is configured
    #[error("no SSH agent found, SSH_AUTH_SOCK not defined")]
    NoAgentFound,

    /// SSH agent socket could not be dialed
    #[error("dialing SSH agent: {0}")]
    AgentUnavailable(String),

    /// SSH agent did not hand out identities
    #[error("getting signers from SSH agent: {0}")]
    AgentSignerError(String),

    /// Known hosts file could not be loaded
    #[error("loading known hosts: {0}")]
    KnownHosts(String),

    /// Server host key did not verify against known hosts
    #[error("host key verification failed for {0}")]
    HostKeyRejected(String),

    /// Failed to connect to remote host
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Authentication failed
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Session could not be opened or was refused by the peer
    #[error("session error: {0}")]
    Session(String),

    /// I/O error while copying standard streams
    #[error("I/O error: {0}")]
    Io(String),

    /// Process spawn error
    #[error("failed to spawn process: {0}")]
    Spawn(String),

    /// The session ended without reporting how the command exited
    #[error("remote command exited without exit status or exit signal")]
    MissingExitStatus,

    /// Command timed out
    #[error("command timed out after {timeout:?}")]
    Timeout {
        /// Timeout duration that was exceeded
        timeout: Duration,
    },

    /// Invalid configuration
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl ExecError {
    /// Exit status, if the command ran and exited nonzero
    #[must_use]
    pub fn exit_status(&self) -> Option<ExitStatus> {
        match self {
            ExecError::Exit(status) => Some(*status),
            _ => None,
        }
    }

    /// Whether the command ran to completion and exited nonzero
    #[must_use]
    pub fn is_exit_status(&self) -> bool {
        matches!(self, ExecError::Exit(_))
    }

    /// Whether the command could not be run, or could not be observed to the end
    #[must_use]
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            ExecError::ConnectionFailed(_)
                | ExecError::Session(_)
                | ExecError::Io(_)
                | ExecError::Spawn(_)
                | ExecError::MissingExitStatus
                | ExecError::Timeout { .. }
        )
    }

    /// Check if error is retryable
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ExecError::ConnectionFailed(_)
                | ExecError::Session(_)
                | ExecError::Io(_)
                | ExecError::Timeout { .. }
        )
    }
}

impl From<std::io::Error> for ExecError {
    fn from(err: std::io::Error) -> Self {
        ExecError::Io(err.to_string())
    }
}
