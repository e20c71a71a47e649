//! fury CLI
//!
//! Runs one structured command locally or on a remote host over SSH

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use color_eyre::Result;
use fury_exec::{Command, ExecError, Input, LocalRunner, Output, Runner, SshConfig, SshRunner};
use tracing_subscriber::EnvFilter;

mod config;

use config::Config;

/// Exit code when the command could not be run at all
const EXIT_UNAVAILABLE: u8 = 255;

#[derive(Parser, Debug)]
#[command(name = "fury")]
#[command(about = "Run a command with an exact environment, locally or over SSH", long_about = None)]
struct Cli {
    /// Configuration file (defaults to FURY_CONFIG, ./fury.toml, /etc/fury/fury.toml)
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Run on this machine instead of over SSH
    #[arg(long, conflicts_with_all = ["addr", "user"])]
    local: bool,

    /// SSH target, overriding the configured one
    #[arg(long)]
    addr: Option<String>,

    /// Account to log in as, overriding the configured one
    #[arg(long)]
    user: Option<String>,

    /// Working directory of the command
    #[arg(long, short = 'C', default_value = "")]
    dir: String,

    /// Environment variable for the command, as NAME=VALUE
    #[arg(long = "env", short, value_parser = parse_env)]
    env: Vec<(String, String)>,

    /// Forward this process's stdin to the command
    #[arg(long)]
    stdin: bool,

    /// Give up after this many seconds
    #[arg(long)]
    timeout: Option<u64>,

    /// Program and its arguments
    #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
    command: Vec<String>,
}

fn parse_env(s: &str) -> Result<(String, String), String> {
    s.split_once('=')
        .map(|(name, value)| (name.to_string(), value.to_string()))
        .ok_or_else(|| format!("expected NAME=VALUE, got {s:?}"))
}

impl Cli {
    fn target(&self, configured: Option<SshConfig>) -> Result<SshConfig> {
        let mut target = match (&self.addr, configured) {
            (Some(addr), Some(mut config)) => {
                config.addr.clone_from(addr);
                config
            }
            (Some(addr), None) => SshConfig::new(addr.clone()),
            (None, Some(config)) => config,
            (None, None) => eyre::bail!("no target: pass --addr or set [target] in the config"),
        };
        if let Some(user) = &self.user {
            target.user.clone_from(user);
        }
        Ok(target)
    }

    fn build_command(&self) -> Command {
        let (path, args) = self
            .command
            .split_first()
            .map_or(("", &[][..]), |(p, a)| (p.as_str(), a));

        let mut cmd = Command::new(path)
            .args(args)
            .envs(self.env.iter().cloned())
            .dir(&self.dir)
            .stdout(Output::new(tokio::io::stdout()))
            .stderr(Output::new(tokio::io::stderr()));
        if self.stdin {
            cmd = cmd.stdin(Input::new(tokio::io::stdin()));
        }
        cmd
    }
}

async fn execute(runner: &dyn Runner, cmd: Command, timeout: Option<u64>) -> Result<(), ExecError> {
    match timeout {
        Some(secs) => runner.run_with_timeout(cmd, Duration::from_secs(secs)).await,
        None => runner.run(cmd).await,
    }
}

fn exit_code(result: &Result<(), ExecError>) -> u8 {
    match result {
        Ok(()) => 0,
        Err(ExecError::Exit(status)) => u8::try_from(status.status).unwrap_or(EXIT_UNAVAILABLE),
        Err(e) => {
            tracing::error!(error = %e, "command did not complete");
            eprintln!("fury: {e}");
            EXIT_UNAVAILABLE
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    color_eyre::install()?;
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::load_default()?,
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log.level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cmd = cli.build_command();

    if cli.local {
        let result = execute(&LocalRunner::new(), cmd, cli.timeout).await;
        return Ok(ExitCode::from(exit_code(&result)));
    }

    let target = cli.target(config.target)?;
    let runner = SshRunner::connect(&target).await?;
    let result = execute(&runner, cmd, cli.timeout).await;
    if let Err(e) = runner.close().await {
        tracing::warn!(host = runner.target(), error = %e, "closing SSH connection");
    }
    Ok(ExitCode::from(exit_code(&result)))
}
