use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::fetch::AudioFormat;

/// File looked up in the working directory before the user config dir
const LOCAL_CONFIG_FILE: &str = "downloader.yaml";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// yt-dlp invocation settings
    pub ytdlp: YtDlpConfig,

    /// Transcoding target
    pub audio: AudioConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct YtDlpConfig {
    /// Executable name or path
    pub path: String,

    /// Format selector
    pub format: String,

    /// Output template, relative to the destination directory
    pub output_template: String,

    /// Download a single video even if the URL points into a playlist
    pub no_playlist: bool,

    /// Extra arguments appended before the URL
    pub extra_args: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Target audio format
    pub format: AudioFormat,

    /// Value for `--audio-quality` (0 best .. 10 worst, or a bitrate like 128K)
    pub quality: Option<String>,
}

impl Default for YtDlpConfig {
    fn default() -> Self {
        Self {
            path: "yt-dlp".to_string(),
            format: "bestaudio/best".to_string(),
            output_template: "%(title)s.%(ext)s".to_string(),
            no_playlist: true,
            extra_args: Vec::new(),
        }
    }
}

impl Config {
    /// Load configuration.
    ///
    /// An explicit path must exist. Otherwise the local and user config files
    /// are tried in turn and defaults are used when neither exists. Nothing is
    /// ever written back.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let path = match explicit {
            Some(path) => Some(path.to_path_buf()),
            None => Self::config_path(),
        };

        let Some(path) = path else {
            tracing::debug!("No config file found, using defaults");
            return Ok(Self::default());
        };

        tracing::debug!("Loading config from {}", path.display());

        let content = fs_err::read_to_string(&path).context("Failed to read config file")?;
        let config = Self::from_yaml(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        Ok(config)
    }

    /// Parse and validate a YAML document
    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// First existing config file, if any
    fn config_path() -> Option<PathBuf> {
        let local_config = PathBuf::from(LOCAL_CONFIG_FILE);
        if local_config.exists() {
            return Some(local_config);
        }

        dirs::config_dir()
            .map(|dir| dir.join("audio-downloader").join("config.yaml"))
            .filter(|path| path.exists())
    }

    /// Validate configuration
    fn validate(&self) -> Result<()> {
        if self.ytdlp.path.trim().is_empty() {
            anyhow::bail!("ytdlp.path must not be empty");
        }

        if self.ytdlp.format.trim().is_empty() {
            anyhow::bail!("ytdlp.format must not be empty");
        }

        if self.ytdlp.output_template.trim().is_empty() {
            anyhow::bail!("ytdlp.output_template must not be empty");
        }

        if Path::new(&self.ytdlp.output_template).is_absolute() {
            anyhow::bail!("ytdlp.output_template must be relative to the destination directory");
        }

        Ok(())
    }
}
