//! Structured description of a program invocation

use std::collections::HashMap;
use std::fmt;
use std::io;
use std::pin::Pin;
use std::sync::{Arc, PoisonError};
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;

/// Byte source bound to a command's standard input
pub struct Input(Box<dyn AsyncRead + Send + Unpin>);

impl Input {
    /// Wrap a reader
    pub fn new<R>(reader: R) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        Self(Box::new(reader))
    }

    pub(crate) fn into_inner(self) -> Box<dyn AsyncRead + Send + Unpin> {
        self.0
    }
}

impl fmt::Debug for Input {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Input").finish_non_exhaustive()
    }
}

/// Byte sink bound to a command's standard output or error
///
/// Clones share the underlying writer. Each write holds the writer's lock
/// for its whole duration, so binding one `Output` to both stdout and
/// stderr never interleaves partial writes.
#[derive(Clone)]
pub struct Output(Arc<Mutex<Box<dyn AsyncWrite + Send + Unpin>>>);

impl Output {
    /// Wrap a writer
    pub fn new<W>(writer: W) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self(Arc::new(Mutex::new(Box::new(writer))))
    }

    /// Whether both handles write to the same sink
    #[must_use]
    pub fn same_sink(&self, other: &Output) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Write all of `buf` while holding the sink
    ///
    /// # Errors
    /// Returns the writer's I/O error
    pub async fn write_all(&self, buf: &[u8]) -> io::Result<()> {
        let mut writer = self.0.lock().await;
        writer.write_all(buf).await
    }

    /// Flush the sink
    ///
    /// # Errors
    /// Returns the writer's I/O error
    pub async fn flush(&self) -> io::Result<()> {
        let mut writer = self.0.lock().await;
        writer.flush().await
    }
}

impl fmt::Debug for Output {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Output").finish_non_exhaustive()
    }
}

/// In-memory sink that keeps everything written to it
#[derive(Debug, Clone, Default)]
pub struct Buffer(Arc<std::sync::Mutex<Vec<u8>>>);

impl Buffer {
    /// Create an empty buffer
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Output handle writing into this buffer
    #[must_use]
    pub fn output(&self) -> Output {
        Output::new(self.clone())
    }

    /// Copy of the bytes written so far
    #[must_use]
    pub fn contents(&self) -> Vec<u8> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Bytes written so far, lossily decoded as UTF-8
    #[must_use]
    pub fn to_string_lossy(&self) -> String {
        String::from_utf8_lossy(&self.contents()).into_owned()
    }
}

impl AsyncWrite for Buffer {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

/// An external program to run
///
/// `path` is the only field that must be set. A relative `path` is
/// resolved relative to `dir`. An empty `dir` means `/`. Absent streams
/// are connected to the null device.
#[derive(Debug, Default)]
pub struct Command {
    /// Program to execute
    pub path: String,
    /// Command line arguments, not including the program
    pub args: Vec<String>,
    /// Complete environment of the process
    pub env: HashMap<String, String>,
    /// Working directory
    pub dir: String,
    /// Standard input
    pub stdin: Option<Input>,
    /// Standard output
    pub stdout: Option<Output>,
    /// Standard error
    pub stderr: Option<Output>,
}

impl Command {
    /// Create a command running `path` with no arguments
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    /// Append an argument
    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append several arguments
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set an environment variable
    #[must_use]
    pub fn env(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(name.into(), value.into());
        self
    }

    /// Set several environment variables
    #[must_use]
    pub fn envs<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.env
            .extend(vars.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Set the working directory
    #[must_use]
    pub fn dir(mut self, dir: impl Into<String>) -> Self {
        self.dir = dir.into();
        self
    }

    /// Bind standard input
    #[must_use]
    pub fn stdin(mut self, input: Input) -> Self {
        self.stdin = Some(input);
        self
    }

    /// Bind standard output
    #[must_use]
    pub fn stdout(mut self, output: Output) -> Self {
        self.stdout = Some(output);
        self
    }

    /// Bind standard error
    #[must_use]
    pub fn stderr(mut self, output: Output) -> Self {
        self.stderr = Some(output);
        self
    }

    /// Environment entries ordered by name
    #[must_use]
    pub fn sorted_env(&self) -> Vec<(&str, &str)> {
        let mut env: Vec<(&str, &str)> = self
            .env
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        env.sort_unstable_by(|a, b| a.0.cmp(b.0));
        env
    }
}
