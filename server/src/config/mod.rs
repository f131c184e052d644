//! Server configuration

use anyhow::{Context, Result};
use protocol::{DEFAULT_KEY_LENGTH, DEFAULT_PREFIX, DEFAULT_WINDOW_SECS, TimeWindow};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub knock: KnockConfig,
    pub capture: CaptureConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct KnockConfig {
    pub prefix: String,
    pub key_length: usize,
    pub secret_dir: PathBuf,
    pub window_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub ipv4: bool,
    pub ipv6: bool,
    pub buffer_size: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub log_accepted: bool,
    pub log_rejected: bool,
}

impl Default for KnockConfig {
    fn default() -> Self {
        Self {
            prefix: DEFAULT_PREFIX.to_string(),
            key_length: DEFAULT_KEY_LENGTH,
            secret_dir: PathBuf::from("secrets/"),
            window_secs: DEFAULT_WINDOW_SECS,
        }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            ipv4: true,
            ipv6: true,
            buffer_size: 65535,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            log_accepted: true,
            log_rejected: false,
        }
    }
}

impl Config {
    /// Load the config file, falling back to defaults when it does not exist
    ///
    /// The result is not validated yet; call `validate` once command-line
    /// overrides have been applied.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.is_file() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse config file")
    }

    pub fn validate(&self) -> Result<()> {
        if self.knock.key_length == 0 {
            anyhow::bail!("knock.key_length must be greater than zero");
        }
        if self.knock.prefix.is_empty() {
            anyhow::bail!("knock.prefix must not be empty");
        }
        if !self.capture.ipv4 && !self.capture.ipv6 {
            anyhow::bail!("at least one of capture.ipv4 and capture.ipv6 must be enabled");
        }
        if self.capture.buffer_size < 28 {
            anyhow::bail!("capture.buffer_size must hold at least an IPv4 and UDP header");
        }
        self.window()?;
        Ok(())
    }

    pub fn window(&self) -> Result<TimeWindow> {
        TimeWindow::from_secs(self.knock.window_secs)
            .context("knock.window_secs must be at least 1")
    }
}
