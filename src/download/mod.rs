//! Runs one download from request to terminal record.
//!
//! Invocation lifecycle: `STARTED -> PROGRESS* -> (DONE | FAILED)`. The
//! pipeline guarantees exactly one terminal record, and that it is the last
//! thing written to the event stream.

use std::cell::OnceCell;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

mod reporter;

use crate::events::{EmitError, EventEmitter};
use crate::fetch::{AudioFormat, DownloadRequest, FetchAndTranscode, FetchError};
use crate::DownloaderError;
use reporter::Reporter;

/// Exit status of a failed invocation (`-1` as an unsigned byte)
pub const FAILURE_EXIT_CODE: u8 = 255;

/// Single-assignment holder for the file reported as finished.
///
/// Starts empty and can be filled once; later fills are rejected.
#[derive(Debug, Default)]
pub struct FilenameSlot(OnceCell<PathBuf>);

impl FilenameSlot {
    /// Store `path`, or hand it back if the slot is already filled
    pub fn fill(&self, path: PathBuf) -> Result<(), PathBuf> {
        self.0.set(path)
    }

    #[cfg(test)]
    pub fn get(&self) -> Option<&Path> {
        self.0.get().map(PathBuf::as_path)
    }

    pub fn into_inner(self) -> Option<PathBuf> {
        self.0.into_inner()
    }
}

/// Terminal state of an invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// DONE was written with this path
    Done(PathBuf),

    /// FAILED was written with this reason
    Failed(String),
}

impl Outcome {
    #[cfg(test)]
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Done(_))
    }

    pub fn exit_code(&self) -> ExitCode {
        match self {
            Outcome::Done(_) => ExitCode::SUCCESS,
            Outcome::Failed(_) => ExitCode::from(FAILURE_EXIT_CODE),
        }
    }
}

/// Path of the transcoded file: the finished download with its extension swapped
pub fn derive_final_path(finished: &Path, format: AudioFormat) -> PathBuf {
    finished.with_extension(format.extension())
}

/// Drives a fetch capability and turns its callbacks into protocol records
pub struct DownloadPipeline {
    fetcher: Box<dyn FetchAndTranscode>,
    audio_format: AudioFormat,
}

impl DownloadPipeline {
    pub fn new(fetcher: Box<dyn FetchAndTranscode>, audio_format: AudioFormat) -> Self {
        Self {
            fetcher,
            audio_format,
        }
    }

    /// Run one download, writing records to `emitter`.
    ///
    /// Every failure is normalized and reported as FAILED; the returned error
    /// is reserved for the event stream itself being unwritable.
    pub async fn run<W: Write + Send>(
        &self,
        request: &DownloadRequest,
        emitter: &mut EventEmitter<W>,
    ) -> Result<Outcome, EmitError> {
        let mut reporter = Reporter::new(emitter);

        if let Err(err) = preflight(request) {
            let terminated = reporter.fail(&err.to_string());
            return Ok(Outcome::Failed(terminated.into_message()));
        }

        tracing::info!(
            "Fetching {} with {}",
            crate::utils::extract_domain(&request.url).unwrap_or_else(|| request.url.clone()),
            self.fetcher.tool_name()
        );

        let result = self
            .fetcher
            .fetch_and_transcode(request, &mut reporter)
            .await;

        if let Some(terminated) = reporter.take_terminated() {
            if let Err(err) = &result {
                tracing::debug!("Fetch stopped after reported error: {}", err);
            }
            return Ok(Outcome::Failed(terminated.into_message()));
        }

        if let Some(err) = reporter.take_emit_error() {
            return Err(err);
        }

        if let Err(err) = result {
            let raw = match &err {
                FetchError::Reported(message) => message.clone(),
                other => {
                    tracing::error!("{} failed: {}", self.fetcher.tool_name(), other);
                    other.diagnostic()
                }
            };
            let terminated = reporter.fail(&raw);
            return Ok(Outcome::Failed(terminated.into_message()));
        }

        let Some(finished) = reporter.take_finished().into_inner() else {
            let terminated = reporter.fail(&DownloaderError::MissingFilename.to_string());
            return Ok(Outcome::Failed(terminated.into_message()));
        };

        let final_path = derive_final_path(&finished, self.audio_format);
        reporter
            .emitter()
            .emit_done(&final_path.to_string_lossy())?;

        tracing::info!("Audio saved to: {}", final_path.display());
        Ok(Outcome::Done(final_path))
    }
}

/// Checks made before handing the request to the downloader
fn preflight(request: &DownloadRequest) -> Result<(), DownloaderError> {
    match fs_err::metadata(&request.dest_dir) {
        Ok(meta) if meta.is_dir() => {
            if meta.permissions().readonly() {
                return Err(DownloaderError::DestinationNotWritable(
                    request.dest_dir.clone(),
                ));
            }
        }
        _ => return Err(DownloaderError::InvalidDestination(request.dest_dir.clone())),
    }

    if !request.transcoder.exists() {
        return Err(DownloaderError::TranscoderNotFound(request.transcoder.clone()));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::Event;
    use crate::fetch::{DownloadObserver, LogSink, ProgressUpdate, TransferStatus};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// What the scripted fetcher does, step by step
    #[derive(Clone)]
    enum Step {
        Progress(u64, Option<u64>),
        Finished(&'static str),
        Debug(&'static str),
        Error(&'static str),
        Fail(&'static str),
    }

    struct ScriptedFetcher {
        steps: Vec<Step>,
        calls: Arc<AtomicUsize>,
    }

    impl ScriptedFetcher {
        fn new(steps: Vec<Step>) -> Self {
            Self {
                steps,
                calls: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    #[async_trait]
    impl FetchAndTranscode for ScriptedFetcher {
        async fn fetch_and_transcode(
            &self,
            _request: &DownloadRequest,
            observer: &mut dyn DownloadObserver,
        ) -> Result<(), FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);

            for step in &self.steps {
                match step.clone() {
                    Step::Progress(downloaded, total) => observer.on_progress(&ProgressUpdate {
                        status: TransferStatus::Downloading,
                        downloaded_bytes: Some(downloaded),
                        total_bytes: total,
                        total_bytes_estimate: None,
                        filename: None,
                    }),
                    Step::Finished(name) => observer.on_progress(&ProgressUpdate {
                        status: TransferStatus::Finished,
                        downloaded_bytes: None,
                        total_bytes: None,
                        total_bytes_estimate: None,
                        filename: Some(PathBuf::from(name)),
                    }),
                    Step::Debug(line) => observer.debug(line),
                    Step::Error(line) => {
                        let terminated = observer.error(line);
                        return Err(FetchError::Reported(terminated.into_message()));
                    }
                    Step::Fail(diagnostic) => {
                        return Err(FetchError::ToolFailed {
                            status: "exit status: 1".to_string(),
                            diagnostic: diagnostic.to_string(),
                        })
                    }
                }
            }

            Ok(())
        }

        fn tool_name(&self) -> &str {
            "scripted"
        }
    }

    struct Workspace {
        _dir: tempfile::TempDir,
        request: DownloadRequest,
    }

    fn workspace() -> Workspace {
        let dir = tempfile::tempdir().unwrap();
        let transcoder = dir.path().join("ffmpeg");
        fs_err::write(&transcoder, "").unwrap();
        let request = DownloadRequest {
            url: "https://www.youtube.com/watch?v=abc".to_string(),
            dest_dir: dir.path().to_path_buf(),
            transcoder,
        };
        Workspace { _dir: dir, request }
    }

    async fn run(steps: Vec<Step>, request: &DownloadRequest) -> (Outcome, Vec<Event>) {
        let pipeline = DownloadPipeline::new(Box::new(ScriptedFetcher::new(steps)), AudioFormat::Mp3);
        let mut emitter = EventEmitter::new(Vec::new());
        let outcome = pipeline.run(request, &mut emitter).await.unwrap();

        let events = String::from_utf8(emitter.into_inner())
            .unwrap()
            .lines()
            .map(|line| Event::from_line(line).unwrap())
            .collect();
        (outcome, events)
    }

    fn terminal_count(events: &[Event]) -> usize {
        events.iter().filter(|event| event.kind().is_terminal()).count()
    }

    #[test]
    fn test_derive_final_path() {
        assert_eq!(
            derive_final_path(Path::new("song.webm"), AudioFormat::Mp3),
            PathBuf::from("song.mp3")
        );
        assert_eq!(
            derive_final_path(Path::new("/music/My.Band - Live.m4a"), AudioFormat::Mp3),
            PathBuf::from("/music/My.Band - Live.mp3")
        );
        assert_eq!(
            derive_final_path(Path::new("/music/no_extension"), AudioFormat::Vorbis),
            PathBuf::from("/music/no_extension.ogg")
        );
    }

    #[test]
    fn test_filename_slot_is_single_assignment() {
        let slot = FilenameSlot::default();
        assert_eq!(slot.get(), None);

        slot.fill(PathBuf::from("first.webm")).unwrap();
        assert_eq!(
            slot.fill(PathBuf::from("second.webm")),
            Err(PathBuf::from("second.webm"))
        );
        assert_eq!(slot.into_inner(), Some(PathBuf::from("first.webm")));
    }

    #[test]
    fn test_outcome_success() {
        assert!(Outcome::Done(PathBuf::from("a.mp3")).is_success());
        assert!(!Outcome::Failed("x".to_string()).is_success());
    }

    #[tokio::test]
    async fn test_successful_download() {
        let ws = workspace();
        let steps = vec![
            Step::Debug("[youtube] Extracting URL"),
            Step::Progress(0, Some(200)),
            Step::Progress(100, None),
            Step::Progress(100, Some(200)),
            Step::Progress(200, Some(200)),
            Step::Finished("/music/song.webm"),
        ];

        let (outcome, events) = run(steps, &ws.request).await;

        assert_eq!(outcome, Outcome::Done(PathBuf::from("/music/song.mp3")));
        assert_eq!(
            events,
            vec![
                Event::Progress { percentage: 0.0 },
                Event::Progress { percentage: 50.0 },
                Event::Progress { percentage: 100.0 },
                Event::Done {
                    filename: "/music/song.mp3".to_string()
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_reported_error_fails_once() {
        let ws = workspace();
        let steps = vec![
            Step::Progress(10, Some(100)),
            Step::Error("\x1b[0;31mERROR:\x1b[0m [youtube] id: Private video"),
        ];

        let (outcome, events) = run(steps, &ws.request).await;

        assert_eq!(outcome, Outcome::Failed("Private video".to_string()));
        assert_eq!(terminal_count(&events), 1);
        assert_eq!(
            events.last(),
            Some(&Event::Failed {
                msg: "Private video".to_string()
            })
        );
    }

    #[tokio::test]
    async fn test_unreported_tool_failure_is_not_swallowed() {
        let ws = workspace();
        let steps = vec![
            Step::Finished("/music/song.webm"),
            Step::Fail("ERROR: [youtube] id: Postprocessing: ffmpeg not found"),
        ];

        let (outcome, events) = run(steps, &ws.request).await;

        assert_eq!(
            outcome,
            Outcome::Failed("Postprocessing: ffmpeg not found".to_string())
        );
        assert_eq!(events.len(), 1);
        assert!(!events.iter().any(|event| matches!(event, Event::Done { .. })));
    }

    #[tokio::test]
    async fn test_tool_failure_without_diagnostic() {
        let ws = workspace();
        let (outcome, events) = run(vec![Step::Fail("")], &ws.request).await;

        assert_eq!(outcome, Outcome::Failed("Unknown error".to_string()));
        assert_eq!(
            events,
            vec![Event::Failed {
                msg: "Unknown error".to_string()
            }]
        );
    }

    #[tokio::test]
    async fn test_success_without_finished_file_fails() {
        let ws = workspace();
        let (outcome, events) = run(vec![Step::Progress(1, Some(1))], &ws.request).await;

        assert!(!outcome.is_success());
        assert_eq!(terminal_count(&events), 1);
        assert_eq!(events.last().map(Event::kind), Some(crate::events::EventKind::Failed));
    }

    #[tokio::test]
    async fn test_second_finished_file_keeps_first() {
        let ws = workspace();
        let steps = vec![Step::Finished("/music/a.webm"), Step::Finished("/music/b.m4a")];

        let (outcome, _) = run(steps, &ws.request).await;
        assert_eq!(outcome, Outcome::Done(PathBuf::from("/music/a.mp3")));
    }

    #[tokio::test]
    async fn test_missing_destination_skips_fetch() {
        let ws = workspace();
        let mut request = ws.request.clone();
        request.dest_dir = request.dest_dir.join("does-not-exist");

        let fetcher = ScriptedFetcher::new(vec![Step::Finished("/music/a.webm")]);
        let calls = Arc::clone(&fetcher.calls);
        let pipeline = DownloadPipeline::new(Box::new(fetcher), AudioFormat::Mp3);
        let mut emitter = EventEmitter::new(Vec::new());
        let outcome = pipeline.run(&request, &mut emitter).await.unwrap();

        assert!(!outcome.is_success());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        let output = String::from_utf8(emitter.into_inner()).unwrap();
        assert_eq!(output.lines().count(), 1);
        assert_eq!(
            Event::from_line(output.trim()).unwrap().kind(),
            crate::events::EventKind::Failed
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_read_only_destination_skips_fetch() {
        use std::os::unix::fs::PermissionsExt;

        let ws = workspace();
        let music = ws.request.dest_dir.join("music");
        fs_err::create_dir(&music).unwrap();
        fs_err::set_permissions(&music, std::fs::Permissions::from_mode(0o555)).unwrap();
        let mut request = ws.request.clone();
        request.dest_dir = music.clone();

        let fetcher = ScriptedFetcher::new(vec![Step::Finished("/music/a.webm")]);
        let calls = Arc::clone(&fetcher.calls);
        let pipeline = DownloadPipeline::new(Box::new(fetcher), AudioFormat::Mp3);
        let mut emitter = EventEmitter::new(Vec::new());
        let outcome = pipeline.run(&request, &mut emitter).await.unwrap();

        fs_err::set_permissions(&music, std::fs::Permissions::from_mode(0o755)).unwrap();

        assert!(matches!(outcome, Outcome::Failed(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        let output = String::from_utf8(emitter.into_inner()).unwrap();
        assert_eq!(output.lines().count(), 1);
        assert_eq!(
            Event::from_line(output.trim()).unwrap().kind(),
            crate::events::EventKind::Failed
        );
    }

    #[tokio::test]
    async fn test_missing_transcoder_fails() {
        let ws = workspace();
        let mut request = ws.request.clone();
        request.transcoder = request.dest_dir.join("no-ffmpeg-here");

        let (outcome, events) = run(vec![Step::Finished("/music/a.webm")], &request).await;
        assert!(!outcome.is_success());
        assert_eq!(events.len(), 1);
    }

    #[tokio::test]
    async fn test_progress_is_bounded() {
        let ws = workspace();
        let steps = (0..=10)
            .map(|i| Step::Progress(i * 37, Some(370)))
            .chain([Step::Finished("x.webm")])
            .collect();

        let (_, events) = run(steps, &ws.request).await;
        for event in &events {
            if let Event::Progress { percentage } = event {
                assert!((0.0..=100.0).contains(percentage));
            }
        }
        assert!(matches!(events.last(), Some(Event::Done { .. })));
    }
}
