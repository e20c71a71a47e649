//! fury-exec: Structured command execution
//!
//! Describes a program invocation as a [`Command`] and runs it through a
//! [`Runner`]: locally, over SSH, or in memory for tests. The SSH runner
//! turns each command into one quoted `/bin/sh -c` line with a reset
//! environment, so the remote side sees exactly the command's variables.

pub mod command;
pub mod config;
pub mod connect;
pub mod error;
pub mod fake;
pub mod local;
mod session;
pub mod shell;
pub mod ssh;
pub mod traits;

pub use command::{Buffer, Command, Input, Output};
pub use config::{HostKeyCheck, SshConfig};
pub use connect::{HostKeyPolicy, HostKeyVerifier};
pub use error::{EnvNameProblem, ExecError, ExitStatus};
pub use fake::{RecordedCommand, RecordingRunner};
pub use local::LocalRunner;
pub use shell::{check_env_name, command_line, quote};
pub use ssh::SshRunner;
pub use traits::{Applier, Runner};
