//! Routing of session output and mapping of how the command ended

use crate::command::Output;
use crate::error::{ExecError, ExitStatus};

/// How the remote process ended, as reported by the peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Exit {
    Status(i32),
    Signal(String),
}

/// Map a process exit code to a run result
pub(crate) fn status_result(status: i32) -> Result<(), ExecError> {
    if status == 0 {
        Ok(())
    } else {
        Err(ExitStatus { status }.into())
    }
}

/// Collects everything a session produces for one command
///
/// Writes go to one sink at a time in arrival order, so a sink shared by
/// stdout and stderr sees whole chunks, never interleaved bytes.
#[derive(Debug)]
pub(crate) struct SessionOutput {
    stdout: Option<Output>,
    stderr: Option<Output>,
    exit: Option<Exit>,
}

impl SessionOutput {
    pub(crate) fn new(stdout: Option<Output>, stderr: Option<Output>) -> Self {
        Self {
            stdout,
            stderr,
            exit: None,
        }
    }

    pub(crate) async fn stdout(&self, data: &[u8]) -> Result<(), ExecError> {
        write_to(self.stdout.as_ref(), data).await
    }

    pub(crate) async fn stderr(&self, data: &[u8]) -> Result<(), ExecError> {
        write_to(self.stderr.as_ref(), data).await
    }

    /// Record how the process ended; only the first report counts
    pub(crate) fn exited(&mut self, exit: Exit) {
        if self.exit.is_none() {
            self.exit = Some(exit);
        }
    }

    /// Flush the sinks and turn the recorded exit into a result
    pub(crate) async fn finish(self) -> Result<(), ExecError> {
        if let Some(out) = &self.stdout {
            out.flush().await?;
        }
        if let Some(err) = &self.stderr
            && !self.stdout.as_ref().is_some_and(|out| out.same_sink(err))
        {
            err.flush().await?;
        }

        match self.exit {
            Some(Exit::Status(status)) => status_result(status),
            Some(Exit::Signal(signal)) => Err(ExecError::Signaled { signal }),
            None => Err(ExecError::MissingExitStatus),
        }
    }
}

async fn write_to(sink: Option<&Output>, data: &[u8]) -> Result<(), ExecError> {
    match sink {
        Some(sink) => sink.write_all(data).await.map_err(ExecError::from),
        None => Ok(()),
    }
}
