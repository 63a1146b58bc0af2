//! Audio Downloader - fetch the audio track of an online video with yt-dlp
//!
//! The binary hands the download and transcoding to yt-dlp and ffmpeg and
//! reports progress to a supervising process as newline-delimited JSON records
//! on stdout.

pub mod cli;
pub mod config;
pub mod diagnostics;
pub mod download;
pub mod events;
pub mod fetch;
pub mod utils;

pub use cli::Cli;
pub use config::Config;
pub use diagnostics::normalize;
pub use download::{DownloadPipeline, Outcome};
pub use events::{Event, EventEmitter, EventKind};
pub use fetch::{AudioFormat, DownloadRequest, FetchAndTranscode, YtDlpFetcher};

/// Result type used throughout the library
pub type Result<T> = anyhow::Result<T>;

/// Error types specific to the downloader
#[derive(thiserror::Error, Debug)]
pub enum DownloaderError {
    #[error("Destination is not an existing directory: {0}")]
    InvalidDestination(std::path::PathBuf),

    #[error("Destination is not writable: {0}")]
    DestinationNotWritable(std::path::PathBuf),

    #[error("Transcoder not found: {0}")]
    TranscoderNotFound(std::path::PathBuf),

    #[error("Downloader finished without reporting a file")]
    MissingFilename,
}
