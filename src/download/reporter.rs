use std::io::Write;

use super::FilenameSlot;
use crate::diagnostics;
use crate::events::{EmitError, EventEmitter, Terminated};
use crate::fetch::{DownloadObserver, LogSink, ProgressUpdate, TransferStatus};
use crate::utils::format_file_size;

/// Bridges fetch callbacks to the event protocol for one invocation
pub(crate) struct Reporter<'a, W: Write> {
    emitter: &'a mut EventEmitter<W>,
    finished: FilenameSlot,
    terminated: Option<Terminated>,
    emit_error: Option<EmitError>,
}

impl<'a, W: Write> Reporter<'a, W> {
    pub(crate) fn new(emitter: &'a mut EventEmitter<W>) -> Self {
        Self {
            emitter,
            finished: FilenameSlot::default(),
            terminated: None,
            emit_error: None,
        }
    }

    /// Normalize `raw` and issue the FAILED record
    pub(crate) fn fail(&mut self, raw: &str) -> Terminated {
        let reason = diagnostics::normalize(raw);
        tracing::error!("Download failed: {}", raw);
        self.emitter.emit_failed(&reason)
    }

    pub(crate) fn emitter(&mut self) -> &mut EventEmitter<W> {
        self.emitter
    }

    pub(crate) fn take_terminated(&mut self) -> Option<Terminated> {
        self.terminated.take()
    }

    /// First write error hit while reporting progress
    pub(crate) fn take_emit_error(&mut self) -> Option<EmitError> {
        self.emit_error.take()
    }

    pub(crate) fn take_finished(&mut self) -> FilenameSlot {
        std::mem::take(&mut self.finished)
    }
}

impl<W: Write> LogSink for Reporter<'_, W> {
    fn debug(&mut self, message: &str) {
        tracing::debug!(target: "audio_downloader::ytdlp", "{}", message);
    }

    fn info(&mut self, message: &str) {
        tracing::info!(target: "audio_downloader::ytdlp", "{}", message);
    }

    fn error(&mut self, message: &str) -> Terminated {
        let terminated = self.fail(message);
        self.terminated.get_or_insert_with(|| terminated.clone());
        terminated
    }
}

impl<W: Write + Send> DownloadObserver for Reporter<'_, W> {
    fn on_progress(&mut self, update: &ProgressUpdate) {
        match update.status {
            TransferStatus::Downloading => {
                let Some(downloaded) = update.downloaded_bytes else {
                    tracing::debug!("Progress update without byte count, skipping");
                    return;
                };

                if let Err(err) = self.emitter.emit_progress(downloaded, update.total()) {
                    tracing::error!("Failed to report progress: {}", err);
                    self.emit_error.get_or_insert(err);
                }
            }
            TransferStatus::Finished => match &update.filename {
                Some(filename) => {
                    tracing::info!(
                        "Downloaded {} ({})",
                        filename.display(),
                        update
                            .downloaded_bytes
                            .or(update.total())
                            .map_or_else(|| "unknown size".to_string(), format_file_size)
                    );
                    if let Err(rejected) = self.finished.fill(filename.clone()) {
                        tracing::warn!(
                            "Ignoring second finished file {}, keeping the first one",
                            rejected.display()
                        );
                    }
                }
                None => tracing::warn!("Downloader finished without naming the file"),
            },
            TransferStatus::Error => {
                tracing::debug!("Downloader reported a transfer error, waiting for its diagnostic");
            }
        }
    }
}
