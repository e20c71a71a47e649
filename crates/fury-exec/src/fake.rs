//! In-memory runner for testing code that drives a [`Runner`]

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;

use crate::command::Command;
use crate::error::ExecError;
use crate::traits::Runner;

/// The parts of a [`Command`] a [`RecordingRunner`] keeps
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCommand {
    /// Program path
    pub path: String,
    /// Arguments, without the program
    pub args: Vec<String>,
    /// Environment the command asked for
    pub env: HashMap<String, String>,
    /// Working directory, empty for the default
    pub dir: String,
}

impl From<&Command> for RecordedCommand {
    fn from(cmd: &Command) -> Self {
        Self {
            path: cmd.path.clone(),
            args: cmd.args.clone(),
            env: cmd.env.clone(),
            dir: cmd.dir.clone(),
        }
    }
}

/// A canned answer for one run
#[derive(Debug, Clone)]
struct Reply {
    stdout: Vec<u8>,
    result: Result<(), ExecError>,
}

/// Records every command and answers from a queue of canned replies
///
/// Once the queue is empty every run succeeds without output.
#[derive(Debug, Default)]
pub struct RecordingRunner {
    commands: Mutex<Vec<RecordedCommand>>,
    replies: Mutex<VecDeque<Reply>>,
}

impl RecordingRunner {
    /// Runner with no canned replies
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a result for the next unanswered run
    #[must_use]
    pub fn reply(self, result: Result<(), ExecError>) -> Self {
        self.push(Vec::new(), result);
        self
    }

    /// Queue a successful run that writes `stdout` to the command's stdout
    #[must_use]
    pub fn reply_with_output(self, stdout: impl Into<Vec<u8>>) -> Self {
        self.push(stdout.into(), Ok(()));
        self
    }

    fn push(&self, stdout: Vec<u8>, result: Result<(), ExecError>) {
        self.replies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(Reply { stdout, result });
    }

    /// Commands seen so far, in call order
    #[must_use]
    pub fn commands(&self) -> Vec<RecordedCommand> {
        self.commands
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl Runner for RecordingRunner {
    async fn run(&self, cmd: Command) -> Result<(), ExecError> {
        self.commands
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(RecordedCommand::from(&cmd));

        let reply = self
            .replies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();

        let Some(reply) = reply else {
            return Ok(());
        };
        if let Some(stdout) = &cmd.stdout
            && !reply.stdout.is_empty()
        {
            stdout.write_all(&reply.stdout).await?;
        }
        reply.result
    }

    fn runner_type(&self) -> &'static str {
        "recording"
    }
}
