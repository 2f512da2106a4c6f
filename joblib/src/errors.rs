use std::{io, result};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum JobError {
    #[error("System busy, please try again later")]
    Busy,
    #[error("Invalid remote location {location}: {reason}")]
    InvalidLocation { location: String, reason: String },
    #[error("Transfer failed for {location}: {reason}")]
    Transfer { location: String, reason: String },
    #[error("{}", script_failure(.code, .timed_out))]
    Script { code: i32, timed_out: bool },
    #[error("Generated output file not found: {0}")]
    MissingOutput(String),
    #[error("Invalid request: {}", .0.join(" "))]
    Validation(Vec<String>),
    #[error("Workspace error: {0}")]
    Workspace(#[source] io::Error),
    #[error("Failed to start process: {0}")]
    Spawn(#[source] io::Error),
}

impl JobError {
    pub(crate) fn transfer(location: impl Into<String>, reason: impl ToString) -> Self {
        JobError::Transfer {
            location: location.into(),
            reason: reason.to_string(),
        }
    }
}

pub type Result<T> = result::Result<T, JobError>;

fn script_failure(code: &i32, timed_out: &bool) -> String {
    if *timed_out {
        format!("Script timed out and was killed (exit code {code})")
    } else {
        format!("Script failed with exit code {code}")
    }
}

/// Failures talking to a running process supervisor.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum WorkerError {
    #[error("process already stopped")]
    AlreadyStopped,
    #[error("process supervisor exited")]
    Gone,
}
