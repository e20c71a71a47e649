//! Configuration loading and types

use std::path::{Path, PathBuf};

use fury_exec::SshConfig;
use serde::Deserialize;

/// Top-level configuration for the fury CLI
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Default SSH target
    #[serde(default)]
    pub target: Option<SshConfig>,
    /// Logging settings
    #[serde(default)]
    pub log: LogConfig,
}

/// Logging settings
#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error), used when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "warn".to_string()
}

impl Config {
    /// Load configuration from file
    ///
    /// # Errors
    /// Returns error if file cannot be read or parsed
    pub fn load(path: &Path) -> eyre::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| eyre::eyre!("reading {}: {e}", path.display()))?;
        let config: Config =
            toml::from_str(&content).map_err(|e| eyre::eyre!("parsing {}: {e}", path.display()))?;
        Ok(config)
    }

    /// Load from default paths or use defaults
    ///
    /// # Errors
    /// Returns error if a config file exists but cannot be loaded
    pub fn load_default() -> eyre::Result<Self> {
        if let Ok(path) = std::env::var("FURY_CONFIG") {
            return Self::load(Path::new(&path));
        }

        let mut paths = vec![
            PathBuf::from("fury.toml"),
            PathBuf::from("/etc/fury/fury.toml"),
        ];
        if let Some(dir) = dirs::config_dir() {
            paths.push(dir.join("fury").join("fury.toml"));
        }

        for path in paths {
            if path.exists() {
                return Self::load(&path);
            }
        }

        Ok(Config::default())
    }
}
