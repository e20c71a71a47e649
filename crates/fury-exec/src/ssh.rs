//! SSH command execution using russh crate

use std::fmt;

use async_trait::async_trait;
use russh::{ChannelMsg, Disconnect, client};
use tokio::io::{AsyncRead, AsyncWriteExt};
use tracing::{debug, info, instrument, trace, warn};

use crate::command::{Command, Input};
use crate::config::SshConfig;
use crate::connect::{self, HostKeyVerifier};
use crate::error::ExecError;
use crate::session::{Exit, SessionOutput};
use crate::shell::command_line;
use crate::traits::Runner;

/// Extended data type code for stderr
const SSH_EXTENDED_DATA_STDERR: u32 = 1;

/// Runs commands over one SSH connection
///
/// Every [`Runner::run`] opens its own session channel, so concurrent
/// calls are multiplexed over the connection.
pub struct SshRunner<H: client::Handler = HostKeyVerifier> {
    /// Connection handle
    session: client::Handle<H>,
    /// Where the connection goes, for logging
    target: String,
}

impl<H: client::Handler> fmt::Debug for SshRunner<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SshRunner")
            .field("target", &self.target)
            .finish_non_exhaustive()
    }
}

impl SshRunner {
    /// Connect to `config.addr` and authenticate with the SSH agent
    ///
    /// # Errors
    /// Returns the bootstrap error kinds of [`ExecError`]
    pub async fn connect(config: &SshConfig) -> Result<Self, ExecError> {
        let session = connect::connect(config).await?;
        Ok(Self::from_handle(session, config.addr.clone()))
    }
}

impl<H: client::Handler> SshRunner<H> {
    /// Wrap an already established connection
    pub fn from_handle(session: client::Handle<H>, target: impl Into<String>) -> Self {
        Self {
            session,
            target: target.into(),
        }
    }

    /// Host this runner executes on
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Disconnect; later runs fail with a session error
    ///
    /// # Errors
    /// Returns `ExecError::Io` if disconnection fails
    pub async fn close(&self) -> Result<(), ExecError> {
        self.session
            .disconnect(Disconnect::ByApplication, "", "English")
            .await
            .map_err(|e| ExecError::Io(e.to_string()))?;
        info!(host = %self.target, "SSH disconnected");
        Ok(())
    }

    /// Open a channel, run `line` on it and close it again
    async fn execute(&self, line: String, cmd: Command) -> Result<(), ExecError> {
        let mut channel = self
            .session
            .channel_open_session()
            .await
            .map_err(|e| ExecError::Session(format!("opening session: {e}")))?;

        let result = drive(&mut channel, line, cmd).await;

        if let Err(e) = channel.close().await {
            // The peer usually closes first once the command is done.
            trace!(error = %e, "closing session channel");
        }
        result
    }
}

/// Run `line` on `channel`, copying the command's streams until the
/// channel closes
async fn drive(
    channel: &mut russh::Channel<client::Msg>,
    line: String,
    cmd: Command,
) -> Result<(), ExecError> {
    channel
        .exec(true, line)
        .await
        .map_err(|e| ExecError::Session(format!("exec request: {e}")))?;

    let stdin = cmd.stdin.map(Input::into_inner);
    let mut stdin_done = stdin.is_none();
    if stdin_done {
        channel
            .eof()
            .await
            .map_err(|e| ExecError::Io(e.to_string()))?;
    }
    let writer = channel.make_writer();
    let copy_stdin = copy_stdin(stdin, writer);
    tokio::pin!(copy_stdin);

    let mut output = SessionOutput::new(cmd.stdout, cmd.stderr);

    loop {
        tokio::select! {
            copied = &mut copy_stdin, if !stdin_done => {
                stdin_done = true;
                copied?;
            }
            msg = channel.wait() => match msg {
                Some(ChannelMsg::Data { data }) => output.stdout(&data).await?,
                Some(ChannelMsg::ExtendedData { data, ext }) => {
                    if ext == SSH_EXTENDED_DATA_STDERR {
                        output.stderr(&data).await?;
                    }
                }
                Some(ChannelMsg::ExitStatus { exit_status }) => {
                    debug!(exit_status, "remote command exited");
                    output.exited(Exit::Status(exit_status.cast_signed()));
                }
                Some(ChannelMsg::ExitSignal { signal_name, .. }) => {
                    let signal = format!("{signal_name:?}");
                    warn!(signal = %signal, "remote command killed by signal");
                    output.exited(Exit::Signal(signal));
                }
                Some(ChannelMsg::Failure) => {
                    return Err(ExecError::Session("exec request rejected".to_string()));
                }
                Some(ChannelMsg::Close) | None => break,
                Some(_) => {}
            },
        }
    }

    output.finish().await
}

async fn copy_stdin<W>(
    stdin: Option<Box<dyn AsyncRead + Send + Unpin>>,
    mut writer: W,
) -> Result<(), ExecError>
where
    W: tokio::io::AsyncWrite + Unpin,
{
    if let Some(mut stdin) = stdin {
        tokio::io::copy(&mut stdin, &mut writer).await?;
        writer.shutdown().await?;
    }
    Ok(())
}

#[async_trait]
impl<H> Runner for SshRunner<H>
where
    H: client::Handler,
{
    #[instrument(skip(self, cmd), fields(host = %self.target, path = %cmd.path))]
    async fn run(&self, cmd: Command) -> Result<(), ExecError> {
        let line = command_line(&cmd)?;
        trace!(command = %line, "executing remote command");
        self.execute(line, cmd).await
    }

    fn runner_type(&self) -> &'static str {
        "ssh"
    }
}
