use std::fmt;

/// Lifecycle of the supervised child process.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProcessStatus {
    Running,
    Exited { code: i32 },
    Killed { signal: i32 },
}

impl ProcessStatus {
    /// The integer reported in the sentinel line; signals are reported negated.
    pub fn return_code(&self) -> Option<i32> {
        match *self {
            ProcessStatus::Running => None,
            ProcessStatus::Exited { code } => Some(code),
            ProcessStatus::Killed { signal } => Some(-signal),
        }
    }
}

/// Pipeline state of one job execution.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JobState {
    Admitted,
    InputsStaged,
    Running,
    OutputsCollected,
    Done,
    Failed,
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JobState::Admitted => "admitted",
            JobState::InputsStaged => "inputs_staged",
            JobState::Running => "running",
            JobState::OutputsCollected => "outputs_collected",
            JobState::Done => "done",
            JobState::Failed => "failed",
        };
        f.write_str(name)
    }
}
