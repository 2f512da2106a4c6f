//! Running one external process and turning its output into a line stream and an exit code.
//!
//! The stream carries every stdout and stderr line in arrival order, then a final sentinel line
//! `Process completed with return code: <N>`, then ends. Consumers only look at the final line to
//! decide success; a stream that ends without a well-formed sentinel counts as exit code 1.

use crate::actors::worker::WorkerHandle;
use crate::command::CommandSpec;
use crate::errors::{JobError, Result, WorkerError};
use crate::events::ProcessStatus;
use crate::types::OutputLine;
use tokio::sync::mpsc;

pub const SENTINEL_PREFIX: &str = "Process completed with return code: ";

/// Exit code reported when the stream carries no usable sentinel.
const UNKNOWN_EXIT_CODE: i32 = 1;

pub fn sentinel_line(code: i32) -> OutputLine {
    format!("{SENTINEL_PREFIX}{code}")
}

pub fn parse_sentinel(line: &str) -> Option<i32> {
    line.strip_prefix(SENTINEL_PREFIX)?.trim().parse().ok()
}

/// Exit code implied by the last line of a finished stream.
pub fn exit_code(last_line: Option<&str>) -> i32 {
    last_line
        .and_then(parse_sentinel)
        .unwrap_or(UNKNOWN_EXIT_CODE)
}

/// A started child process together with its output stream.
pub struct ProcessExecution {
    worker: WorkerHandle,
    lines: mpsc::Receiver<OutputLine>,
    last_line: Option<OutputLine>,
}

impl ProcessExecution {
    /// Start `spec`. At most `capacity` lines are buffered before the readers wait for the
    /// consumer.
    pub fn spawn(spec: &CommandSpec, capacity: usize) -> Result<Self> {
        let (lines_tx, lines) = mpsc::channel(capacity.max(1));
        let worker = WorkerHandle::spawn(spec, lines_tx).map_err(JobError::Spawn)?;
        Ok(Self {
            worker,
            lines,
            last_line: None,
        })
    }

    /// Next output line, or `None` once the stream has ended.
    pub async fn next_line(&mut self) -> Option<OutputLine> {
        let line = self.lines.recv().await?;
        self.last_line = Some(line.clone());
        Some(line)
    }

    /// Kill the child. The stream keeps delivering what is left, ending with the sentinel.
    pub async fn stop(&self) -> std::result::Result<(), WorkerError> {
        self.worker.stop().await
    }

    pub async fn status(&self) -> std::result::Result<ProcessStatus, WorkerError> {
        self.worker.status().await
    }

    /// Exit code derived from the last line seen so far; meaningful once `next_line` returned
    /// `None`.
    pub fn exit_code(&self) -> i32 {
        exit_code(self.last_line.as_deref())
    }
}
