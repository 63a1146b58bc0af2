use clap::Parser;
use std::path::PathBuf;

use crate::fetch::{AudioFormat, DownloadRequest};

#[derive(Parser, Debug)]
#[command(
    name = "downloader",
    about = "Download the audio track of an online video and report progress as JSON lines",
    version,
    long_about = "Downloads the best audio stream of a video with yt-dlp, transcodes it with ffmpeg and prints one JSON record per line on stdout: {\"type\":1,\"percentage\":..} while downloading, then {\"type\":2,\"filename\":..} on success or {\"type\":3,\"msg\":..} on failure. Logs go to stderr."
)]
pub struct Cli {
    /// Url of the media to download
    #[arg(long, value_name = "URL")]
    pub url: String,

    /// Existing directory to store the file in
    #[arg(long, value_name = "DIR")]
    pub dir: PathBuf,

    /// ffmpeg binary or the directory containing it
    #[arg(long = "ffmpeg_location", value_name = "PATH")]
    pub ffmpeg_location: PathBuf,

    /// Target audio format (overrides the config file)
    #[arg(long = "audio_format", value_enum, value_name = "FORMAT")]
    pub audio_format: Option<AudioFormat>,

    /// Configuration file
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,
}

impl Cli {
    pub fn download_request(&self) -> DownloadRequest {
        DownloadRequest {
            url: self.url.clone(),
            dest_dir: self.dir.clone(),
            transcoder: self.ffmpeg_location.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_required_flags() {
        let cli = Cli::try_parse_from([
            "downloader",
            "--url",
            "https://youtu.be/abc",
            "--dir",
            "/music",
            "--ffmpeg_location",
            "/usr/bin/ffmpeg",
        ])
        .unwrap();

        assert_eq!(cli.audio_format, None);
        assert!(!cli.verbose);
        assert_eq!(
            cli.download_request(),
            DownloadRequest {
                url: "https://youtu.be/abc".to_string(),
                dest_dir: PathBuf::from("/music"),
                transcoder: PathBuf::from("/usr/bin/ffmpeg"),
            }
        );
    }

    #[test]
    fn test_parse_optional_flags() {
        let cli = Cli::try_parse_from([
            "downloader",
            "--url=https://youtu.be/abc",
            "--dir=/music",
            "--ffmpeg_location=/usr/bin",
            "--audio_format",
            "opus",
            "--config",
            "dl.yaml",
            "-v",
        ])
        .unwrap();

        assert_eq!(cli.audio_format, Some(AudioFormat::Opus));
        assert_eq!(cli.config, Some(PathBuf::from("dl.yaml")));
        assert!(cli.verbose);
    }

    #[test]
    fn test_missing_required_flag() {
        assert!(Cli::try_parse_from(["downloader", "--url", "x", "--dir", "/music"]).is_err());
    }
}
