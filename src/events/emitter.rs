use std::io::{self, Write};

use super::{Event, EventKind};

/// Errors raised while writing records
#[derive(thiserror::Error, Debug)]
pub enum EmitError {
    #[error("failed to serialize {0} record: {1}")]
    Serialize(EventKind, #[source] serde_json::Error),

    #[error("failed to write record: {0}")]
    Io(#[from] io::Error),

    #[error("cannot emit {attempted} record after the {finished} record")]
    AlreadyFinished {
        finished: EventKind,
        attempted: EventKind,
    },
}

/// Proof that the FAILED record for this invocation has been issued.
///
/// Only [`EventEmitter::emit_failed`] hands these out. Whoever holds one must
/// stop the download and let the process exit with a non-zero status.
#[must_use = "a failed invocation must end the process with a non-zero status"]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Terminated {
    message: String,
}

impl Terminated {
    /// The normalized reason carried by the FAILED record
    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn into_message(self) -> String {
        self.message
    }
}

/// Writes protocol records, one line each, flushing after every record.
///
/// Refuses anything after the first DONE or FAILED record so the terminal
/// record is always the last line of output.
pub struct EventEmitter<W: Write> {
    writer: W,
    finished: Option<EventKind>,
}

impl EventEmitter<io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write> EventEmitter<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            finished: None,
        }
    }

    /// Kind of the terminal record already written, if any
    #[cfg(test)]
    pub fn finished(&self) -> Option<EventKind> {
        self.finished
    }

    pub fn is_finished(&self) -> bool {
        self.finished.is_some()
    }

    #[cfg(test)]
    pub fn get_ref(&self) -> &W {
        &self.writer
    }

    pub fn into_inner(self) -> W {
        self.writer
    }

    /// Report transfer progress.
    ///
    /// Returns `Ok(None)` without writing anything when the total size is
    /// unknown or zero, otherwise the percentage that was written.
    pub fn emit_progress(
        &mut self,
        downloaded: u64,
        total: Option<u64>,
    ) -> Result<Option<f64>, EmitError> {
        let Some(total) = total.filter(|total| *total > 0) else {
            tracing::debug!(downloaded, "Total size unknown, skipping progress record");
            return Ok(None);
        };

        let percentage = downloaded as f64 / total as f64 * 100.0;
        self.write(&Event::Progress { percentage })?;
        Ok(Some(percentage))
    }

    /// Report the final file. Terminal.
    pub fn emit_done(&mut self, filename: &str) -> Result<(), EmitError> {
        self.write(&Event::Done {
            filename: filename.to_string(),
        })
    }

    /// Report a failure. Terminal.
    ///
    /// The token is handed out even when the record could not be written
    /// (the write error is logged): the invocation is over either way.
    pub fn emit_failed(&mut self, message: &str) -> Terminated {
        if let Err(err) = self.write(&Event::Failed {
            msg: message.to_string(),
        }) {
            tracing::error!("Failed to report failure \"{}\": {}", message, err);
            self.finished.get_or_insert(EventKind::Failed);
        }

        Terminated {
            message: message.to_string(),
        }
    }

    fn write(&mut self, event: &Event) -> Result<(), EmitError> {
        let kind = event.kind();

        if let Some(finished) = self.finished {
            return Err(EmitError::AlreadyFinished {
                finished,
                attempted: kind,
            });
        }

        let line = event
            .to_line()
            .map_err(|err| EmitError::Serialize(kind, err))?;

        if kind.is_terminal() {
            self.finished = Some(kind);
        }

        writeln!(self.writer, "{}", line)?;
        self.writer.flush()?;

        Ok(())
    }
}
