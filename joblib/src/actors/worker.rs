mod actor;
mod messages;

use crate::command::CommandSpec;
use crate::errors::WorkerError;
use crate::events::ProcessStatus;
use crate::types::OutputLine;
use actor::Actor;
use messages::WorkerMessage;
use std::{io, process::Stdio};
use tokio::{
    process,
    sync::{mpsc, oneshot},
};

/// Handle to the actor supervising one child process.
///
/// The actor forwards every line the child writes to stdout or stderr into `lines_tx`, followed by
/// one sentinel line carrying the exit code, and then drops the sender so the channel closes.
/// The child leads its own process group; stopping it, or dropping the last handle while it still
/// runs, kills the whole group so no descendant outlives the job.
#[derive(Clone)]
pub struct WorkerHandle {
    sender: mpsc::UnboundedSender<WorkerMessage>,
}

impl WorkerHandle {
    pub fn spawn(spec: &CommandSpec, lines_tx: mpsc::Sender<OutputLine>) -> io::Result<Self> {
        let mut command = process::Command::new(&spec.program);
        let child = command
            .args(&spec.args)
            .current_dir(&spec.dir)
            .envs(&spec.envs)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0)
            .kill_on_drop(true)
            .spawn()?;
        let (sender, inbox) = mpsc::unbounded_channel();
        Actor::spawn(inbox, lines_tx, child);
        Ok(Self { sender })
    }

    pub async fn status(&self) -> Result<ProcessStatus, WorkerError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(WorkerMessage::GetStatus { response: tx })
            .map_err(|_| WorkerError::Gone)?;
        rx.await.map_err(|_| WorkerError::Gone)
    }

    /// Kill the child and every process in its group. Its remaining output and the sentinel are
    /// still delivered.
    pub async fn stop(&self) -> Result<(), WorkerError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(WorkerMessage::Stop { response: tx })
            .map_err(|_| WorkerError::Gone)?;
        rx.await.map_err(|_| WorkerError::Gone)?
    }
}
