use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub mod ytdlp;

pub use ytdlp::YtDlpFetcher;

use crate::events::Terminated;

/// Target audio formats the transcoder can produce
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum AudioFormat {
    #[default]
    Mp3,
    M4a,
    Aac,
    Flac,
    Opus,
    Vorbis,
    Wav,
}

impl AudioFormat {
    /// Codec name understood by `--audio-format`
    pub fn codec(&self) -> &'static str {
        match self {
            AudioFormat::Mp3 => "mp3",
            AudioFormat::M4a => "m4a",
            AudioFormat::Aac => "aac",
            AudioFormat::Flac => "flac",
            AudioFormat::Opus => "opus",
            AudioFormat::Vorbis => "vorbis",
            AudioFormat::Wav => "wav",
        }
    }

    /// Extension of the file the transcoder writes
    pub fn extension(&self) -> &'static str {
        match self {
            AudioFormat::Vorbis => "ogg",
            other => other.codec(),
        }
    }
}

impl std::fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.codec())
    }
}

/// What to download and where to put it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadRequest {
    /// Source page of the media
    pub url: String,

    /// Existing directory receiving the transcoded file
    pub dest_dir: PathBuf,

    /// ffmpeg binary or the directory containing it
    pub transcoder: PathBuf,
}

/// Stage of a single file transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferStatus {
    Downloading,
    Finished,
    Error,
}

impl TransferStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "downloading" => Some(TransferStatus::Downloading),
            "finished" => Some(TransferStatus::Finished),
            "error" => Some(TransferStatus::Error),
            _ => None,
        }
    }
}

/// One progress report from the downloader
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressUpdate {
    pub status: TransferStatus,
    pub downloaded_bytes: Option<u64>,
    pub total_bytes: Option<u64>,
    pub total_bytes_estimate: Option<u64>,
    /// File being written; for `Finished` this is the downloaded file
    pub filename: Option<PathBuf>,
}

impl ProgressUpdate {
    /// Exact total size, falling back to the downloader's estimate
    pub fn total(&self) -> Option<u64> {
        self.total_bytes.or(self.total_bytes_estimate)
    }
}

/// Severity-tagged diagnostics coming out of the downloader.
///
/// `debug` and `info` are informational. `error` is fatal: implementations
/// report the failure and return the [`Terminated`] token, after which the
/// caller must stop driving the download and the process exits non-zero.
pub trait LogSink {
    fn debug(&mut self, message: &str);

    fn info(&mut self, message: &str);

    fn error(&mut self, message: &str) -> Terminated;
}

/// Receiver of everything a fetch reports while it runs
pub trait DownloadObserver: LogSink + Send {
    fn on_progress(&mut self, update: &ProgressUpdate);
}

/// Errors raised by a fetch capability
#[derive(thiserror::Error, Debug)]
pub enum FetchError {
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read downloader output: {0}")]
    Io(#[from] std::io::Error),

    /// The failure already went through [`LogSink::error`]
    #[error("downloader reported an error: {0}")]
    Reported(String),

    #[error("downloader exited with {status}: {diagnostic}")]
    ToolFailed { status: String, diagnostic: String },
}

impl FetchError {
    /// Raw text to hand to the normalizer
    pub fn diagnostic(&self) -> String {
        match self {
            FetchError::ToolFailed { diagnostic, .. } => diagnostic.clone(),
            other => other.to_string(),
        }
    }
}

/// Downloads a media stream and transcodes its audio.
///
/// Runs to completion on the caller's task and reports through `observer`
/// synchronously. Once the observer's error slot has fired the implementation
/// must stop and return [`FetchError::Reported`].
#[async_trait]
pub trait FetchAndTranscode: Send + Sync {
    async fn fetch_and_transcode(
        &self,
        request: &DownloadRequest,
        observer: &mut dyn DownloadObserver,
    ) -> Result<(), FetchError>;

    /// Name of the tool doing the work, for logs
    fn tool_name(&self) -> &str;
}
