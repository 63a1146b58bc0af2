use async_trait::async_trait;
use std::ffi::OsString;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;

use super::{
    AudioFormat, DownloadObserver, DownloadRequest, FetchAndTranscode, FetchError, LogSink,
    ProgressUpdate, TransferStatus,
};
use crate::config::YtDlpConfig;
use crate::diagnostics;

/// Marks the progress lines yt-dlp prints through our template
pub const PROGRESS_PREFIX: &str = "[audio-downloader]";

/// Fields are space separated; the filename goes last since it may contain spaces
const PROGRESS_TEMPLATE: &str = "download:[audio-downloader] %(progress.status)s \
     %(progress.downloaded_bytes)s %(progress.total_bytes)s \
     %(progress.total_bytes_estimate)s %(progress.filename)s";

/// Audio downloader backed by the yt-dlp executable
pub struct YtDlpFetcher {
    yt_dlp_path: String,
    format: String,
    output_template: String,
    no_playlist: bool,
    extra_args: Vec<String>,
    audio_format: AudioFormat,
    audio_quality: Option<String>,
}

impl YtDlpFetcher {
    pub fn new(config: &YtDlpConfig, audio_format: AudioFormat, audio_quality: Option<String>) -> Self {
        Self {
            yt_dlp_path: config.path.clone(),
            format: config.format.clone(),
            output_template: config.output_template.clone(),
            no_playlist: config.no_playlist,
            extra_args: config.extra_args.clone(),
            audio_format,
            audio_quality,
        }
    }

    /// Check if yt-dlp is available
    pub async fn check_availability(&self) -> bool {
        crate::utils::check_command_available(&self.yt_dlp_path).await
    }

    /// Command line handed to yt-dlp for `request`
    pub fn build_args(&self, request: &DownloadRequest) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            "--format".into(),
            self.format.clone().into(),
            "--output".into(),
            request.dest_dir.join(&self.output_template).into_os_string(),
            "--extract-audio".into(),
            "--audio-format".into(),
            self.audio_format.codec().into(),
        ];

        if let Some(quality) = &self.audio_quality {
            args.push("--audio-quality".into());
            args.push(quality.into());
        }

        args.push("--ffmpeg-location".into());
        args.push(request.transcoder.clone().into_os_string());

        args.extend(["--newline", "--progress", "--progress-template"].map(OsString::from));
        args.push(PROGRESS_TEMPLATE.into());

        if self.no_playlist {
            args.push("--no-playlist".into());
        }

        args.extend(self.extra_args.iter().map(OsString::from));

        args.push("--".into());
        args.push(request.url.clone().into());

        args
    }
}

/// Parse a line printed through [`PROGRESS_TEMPLATE`].
///
/// Returns `None` for anything else. yt-dlp prints `NA` for missing fields.
pub fn parse_progress_line(line: &str) -> Option<ProgressUpdate> {
    let rest = line.trim_end_matches(['\r', '\n']).strip_prefix(PROGRESS_PREFIX)?;
    let mut fields = rest.trim_start().splitn(5, ' ');

    let status = TransferStatus::parse(fields.next()?)?;
    let downloaded_bytes = parse_bytes(fields.next()?);
    let total_bytes = parse_bytes(fields.next()?);
    let total_bytes_estimate = parse_bytes(fields.next()?);
    let filename = fields
        .next()
        .filter(|name| !name.is_empty() && *name != "NA")
        .map(PathBuf::from);

    Some(ProgressUpdate {
        status,
        downloaded_bytes,
        total_bytes,
        total_bytes_estimate,
        filename,
    })
}

/// Byte counts come out as integers, estimates as floats
fn parse_bytes(field: &str) -> Option<u64> {
    if field == "NA" {
        return None;
    }

    field.parse::<u64>().ok().or_else(|| {
        field
            .parse::<f64>()
            .ok()
            .filter(|value| value.is_finite() && *value >= 0.0)
            .map(|value| value.round() as u64)
    })
}

/// Decode one raw output line, dropping the line terminator.
///
/// yt-dlp relays ffmpeg and site text verbatim, so invalid UTF-8 is replaced
/// rather than rejected.
fn decode_line(raw: &[u8]) -> String {
    let raw = raw.strip_suffix(b"\n").unwrap_or(raw);
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    String::from_utf8_lossy(raw).into_owned()
}

/// Which stream of the child a line came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stream {
    Stdout,
    Stderr,
}

impl YtDlpFetcher {
    /// Route one output line. Returns the failure message once the error slot fired.
    fn dispatch_line(
        &self,
        stream: Stream,
        line: &str,
        observer: &mut dyn DownloadObserver,
    ) -> Option<String> {
        if let Some(update) = parse_progress_line(line) {
            observer.on_progress(&update);
            return None;
        }

        if line.trim().is_empty() {
            return None;
        }

        match stream {
            Stream::Stderr if diagnostics::is_error_line(line) => {
                let terminated = observer.error(line);
                Some(terminated.into_message())
            }
            Stream::Stderr if diagnostics::is_warning_line(line) => {
                observer.info(line);
                None
            }
            _ => {
                observer.debug(line);
                None
            }
        }
    }
}

#[async_trait]
impl FetchAndTranscode for YtDlpFetcher {
    async fn fetch_and_transcode(
        &self,
        request: &DownloadRequest,
        observer: &mut dyn DownloadObserver,
    ) -> Result<(), FetchError> {
        tracing::debug!("Downloading audio for: {}", request.url);

        let mut child = Command::new(&self.yt_dlp_path)
            .args(self.build_args(request))
            .env("PYTHONIOENCODING", "utf-8")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| FetchError::Spawn {
                program: self.yt_dlp_path.clone(),
                source,
            })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| std::io::Error::other("yt-dlp stdout was not captured"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| std::io::Error::other("yt-dlp stderr was not captured"))?;

        let mut stdout = BufReader::new(stdout);
        let mut stderr = BufReader::new(stderr);
        // Partial reads stay here when the other branch of the select wins
        let mut stdout_buf = Vec::new();
        let mut stderr_buf = Vec::new();
        let mut stdout_open = true;
        let mut stderr_open = true;
        let mut last_stderr_line: Option<String> = None;

        while stdout_open || stderr_open {
            // stdout first, so progress printed before a failure is reported before it
            let (stream, read) = tokio::select! {
                biased;
                read = stdout.read_until(b'\n', &mut stdout_buf), if stdout_open => (Stream::Stdout, read?),
                read = stderr.read_until(b'\n', &mut stderr_buf), if stderr_open => (Stream::Stderr, read?),
            };

            let (open, buf) = match stream {
                Stream::Stdout => (&mut stdout_open, &mut stdout_buf),
                Stream::Stderr => (&mut stderr_open, &mut stderr_buf),
            };
            if read == 0 {
                *open = false;
                if buf.is_empty() {
                    continue;
                }
            }
            let line = decode_line(buf);
            buf.clear();

            if let Some(message) = self.dispatch_line(stream, &line, observer) {
                if let Err(err) = child.start_kill() {
                    tracing::debug!("yt-dlp already gone: {}", err);
                }
                let _ = child.wait().await;
                return Err(FetchError::Reported(message));
            }

            if stream == Stream::Stderr && !line.trim().is_empty() {
                last_stderr_line = Some(line);
            }
        }

        let status = child.wait().await?;
        tracing::debug!("yt-dlp exited with {}", status);

        if !status.success() {
            return Err(FetchError::ToolFailed {
                status: status.to_string(),
                diagnostic: last_stderr_line.unwrap_or_default(),
            });
        }

        Ok(())
    }

    fn tool_name(&self) -> &str {
        &self.yt_dlp_path
    }
}
