//! Runner and applier capabilities

use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::time::timeout;
use tracing::error;

use crate::command::Command;
use crate::error::ExecError;

/// Executes external programs
#[async_trait]
pub trait Runner: Send + Sync {
    /// Execute `cmd`.
    ///
    /// Returns `Ok(())` if the command runs, has no problems copying
    /// stdin, stdout and stderr, and exits with status zero. A nonzero
    /// exit yields `ExecError::Exit`; failing to run at all yields one of
    /// the transport kinds.
    async fn run(&self, cmd: Command) -> Result<(), ExecError>;

    /// Execute `cmd`, giving up after `timeout_duration`.
    ///
    /// The in-flight execution is dropped on expiry.
    async fn run_with_timeout(
        &self,
        cmd: Command,
        timeout_duration: Duration,
    ) -> Result<(), ExecError> {
        let start = Instant::now();
        let path = cmd.path.clone();

        match timeout(timeout_duration, self.run(cmd)).await {
            Ok(result) => result,
            Err(_) => {
                error!(
                    path = %path,
                    timeout = ?timeout_duration,
                    elapsed = ?start.elapsed(),
                    "command timed out"
                );
                Err(ExecError::Timeout {
                    timeout: timeout_duration,
                })
            }
        }
    }

    /// Short name of the runner kind
    fn runner_type(&self) -> &'static str;
}

/// Applies its state to a [`Runner`]
#[async_trait]
pub trait Applier: Send + Sync {
    /// Bring the target into this state by running commands on `runner`
    async fn apply(&self, runner: &dyn Runner) -> Result<(), ExecError>;
}
