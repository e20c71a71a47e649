//! Local command execution using `tokio::process`

use std::io::ErrorKind;
use std::os::unix::process::ExitStatusExt;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command as ProcessCommand;
use tracing::{debug, error, instrument};

use crate::command::{Command, Input, Output};
use crate::error::ExecError;
use crate::session::status_result;
use crate::shell::check_env_name;
use crate::traits::Runner;

/// Local command executor
///
/// Executes commands on the local machine with the same environment
/// isolation as the SSH runner: the child sees exactly `cmd.env`.
#[derive(Debug, Clone)]
pub struct LocalRunner;

impl LocalRunner {
    /// Create a new local runner
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    fn process(cmd: &Command) -> Result<ProcessCommand, ExecError> {
        if cmd.path.is_empty() {
            return Err(ExecError::EmptyPath);
        }

        let mut process = ProcessCommand::new(&cmd.path);
        process
            .args(&cmd.args)
            .env_clear()
            .current_dir(if cmd.dir.is_empty() { "/" } else { cmd.dir.as_str() })
            .stdin(piped_if(cmd.stdin.is_some()))
            .stdout(piped_if(cmd.stdout.is_some()))
            .stderr(piped_if(cmd.stderr.is_some()))
            .kill_on_drop(true);

        for (name, value) in cmd.sorted_env() {
            check_env_name(name)?;
            process.env(name, value);
        }
        Ok(process)
    }
}

impl Default for LocalRunner {
    fn default() -> Self {
        Self::new()
    }
}

fn piped_if(bound: bool) -> Stdio {
    if bound { Stdio::piped() } else { Stdio::null() }
}

async fn feed<W>(input: Option<Input>, child_stdin: Option<W>) -> Result<(), ExecError>
where
    W: tokio::io::AsyncWrite + Unpin,
{
    let (Some(input), Some(mut child_stdin)) = (input, child_stdin) else {
        return Ok(());
    };

    let mut reader = input.into_inner();
    let copied = match tokio::io::copy(&mut reader, &mut child_stdin).await {
        Ok(_) => child_stdin.shutdown().await,
        Err(e) => Err(e),
    };
    match copied {
        // The child exited without reading all of its input.
        Err(e) if e.kind() == ErrorKind::BrokenPipe => {
            debug!("child closed stdin early");
            Ok(())
        }
        other => Ok(other?),
    }
}

async fn drain<R>(pipe: Option<R>, sink: Option<Output>) -> Result<(), ExecError>
where
    R: AsyncRead + Unpin,
{
    let (Some(mut pipe), Some(sink)) = (pipe, sink) else {
        return Ok(());
    };

    let mut buf = vec![0u8; 8192];
    loop {
        let n = pipe.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        sink.write_all(&buf[..n]).await?;
    }
    sink.flush().await?;
    Ok(())
}

#[async_trait]
impl Runner for LocalRunner {
    #[instrument(skip(self, cmd), level = "debug", fields(path = %cmd.path))]
    async fn run(&self, mut cmd: Command) -> Result<(), ExecError> {
        let mut process = Self::process(&cmd)?;

        debug!(path = %cmd.path, args = ?cmd.args, "executing local command");

        let mut child = process
            .spawn()
            .map_err(|e| ExecError::Spawn(format!("{}: {e}", cmd.path)))?;

        let (_, _, _, status) = tokio::try_join!(
            feed(cmd.stdin.take(), child.stdin.take()),
            drain(child.stdout.take(), cmd.stdout.take()),
            drain(child.stderr.take(), cmd.stderr.take()),
            async { child.wait().await.map_err(ExecError::from) },
        )?;

        match (status.code(), status.signal()) {
            (Some(code), _) => {
                if code != 0 {
                    error!(path = %cmd.path, status = code, "command failed");
                }
                status_result(code)
            }
            (None, Some(signal)) => Err(ExecError::Signaled {
                signal: signal.to_string(),
            }),
            (None, None) => Err(ExecError::MissingExitStatus),
        }
    }

    fn runner_type(&self) -> &'static str {
        "local"
    }
}
