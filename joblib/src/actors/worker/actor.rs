use super::messages::WorkerMessage;
use crate::errors::WorkerError;
use crate::events::ProcessStatus;
use crate::supervisor::sentinel_line;
use crate::types::OutputLine;

use futures::future::{join_all, FutureExt};
use nix::errno::Errno;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use std::os::unix::process::ExitStatusExt;
use std::process::ExitStatus;
use std::time::Duration;
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, BufReader},
    process::Child,
    select,
    sync::{mpsc, oneshot},
    task::JoinHandle,
};
use tracing::{debug, error, warn};

/// How long the pipes may stay open after the child's process group was killed.
const PIPE_DRAIN_GRACE: Duration = Duration::from_secs(5);

pub struct Actor {
    inbox: mpsc::UnboundedReceiver<WorkerMessage>,
    kill_tx: Option<oneshot::Sender<()>>,
    status: ProcessStatus,
}

impl Actor {
    pub fn spawn(
        inbox: mpsc::UnboundedReceiver<WorkerMessage>,
        lines_tx: mpsc::Sender<OutputLine>,
        child: Child,
    ) {
        let (kill_tx, kill_rx) = oneshot::channel();
        tokio::spawn(async move {
            let actor = Self {
                inbox,
                kill_tx: Some(kill_tx),
                status: ProcessStatus::Running,
            };
            actor.run(lines_tx, kill_rx, child).await;
        });
    }

    async fn run(
        mut self,
        lines_tx: mpsc::Sender<OutputLine>,
        kill_rx: oneshot::Receiver<()>,
        mut child: Child,
    ) {
        let (child_exit_tx, child_exit_rx) = oneshot::channel();
        // spawned with process_group(0), so the group id is the child's pid
        let group = child.id().map(|id| Pid::from_raw(id as i32));

        // one reader per pipe, both feeding the same channel
        let mut readers: Vec<JoinHandle<()>> = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            readers.push(tokio::spawn(forward_lines(stdout, lines_tx.clone())));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(tokio::spawn(forward_lines(stderr, lines_tx.clone())));
        }

        let mut kill_rx = kill_rx.fuse();
        tokio::spawn(async move {
            let exit = loop {
                select! {
                    _ = &mut kill_rx => kill_group(&mut child, group),
                    exit = child.wait() => break exit,
                }
            };

            // descendants left behind by the child still hold its pipes
            if let Some(group) = group {
                sweep_group(group);
            }
            let drained = tokio::time::timeout(PIPE_DRAIN_GRACE, join_all(readers.iter_mut())).await;
            if drained.is_err() {
                warn!("child output still open after exit; abandoning it");
                readers.iter().for_each(JoinHandle::abort);
            }

            match exit {
                Ok(exit) => {
                    let status = to_status(exit);
                    if let Some(code) = status.return_code() {
                        let _ = lines_tx.send(sentinel_line(code)).await;
                    }
                    let _ = child_exit_tx.send(status);
                }
                Err(err) => {
                    // no sentinel: the consumer treats the run as failed
                    error!(error = %err, "could not collect child exit status");
                }
            }
            // dropping lines_tx here closes the output channel
        });

        self.handle_messages(child_exit_rx).await;
    }

    async fn handle_messages(&mut self, child_exit_rx: oneshot::Receiver<ProcessStatus>) {
        use WorkerMessage::*;
        let mut child_exit_rx = child_exit_rx.fuse();
        loop {
            select! {
                maybe_msg = self.inbox.recv() => {
                    if let Some(msg) = maybe_msg {
                        match msg {
                            GetStatus { response } => {
                                let _ = response.send(self.status);
                            }
                            Stop { response } => {
                                match (self.status, self.kill_tx.take()) {
                                    (ProcessStatus::Running, Some(kill_tx)) => {
                                        let _ = kill_tx.send(());
                                        let _ = response.send(Ok(()));
                                    }
                                    _ => {
                                        let _ = response.send(Err(WorkerError::AlreadyStopped));
                                    }
                                }
                            }
                        }
                    } else {
                        // handle dropped, make sure the child does not outlive it
                        if let Some(kill_tx) = self.kill_tx.take() {
                            let _ = kill_tx.send(());
                        }
                        return;
                    }
                }
                exit_status = &mut child_exit_rx => {
                    if let Ok(status) = exit_status {
                        self.status = status;
                    }
                }
            }
        }
    }
}

/// SIGKILL the child's whole process group, falling back to the child alone.
fn kill_group(child: &mut Child, group: Option<Pid>) {
    if let Some(group) = group {
        match killpg(group, Signal::SIGKILL) {
            Ok(()) => return,
            Err(err) => warn!(error = %err, "failed to kill process group"),
        }
    }
    if let Err(err) = child.start_kill() {
        warn!(error = %err, "failed to kill child process");
    }
}

/// Kill whatever is left of the group once its leader has exited.
fn sweep_group(group: Pid) {
    match killpg(group, Signal::SIGKILL) {
        Ok(()) => debug!(%group, "killed leftover processes"),
        Err(Errno::ESRCH) => {}
        Err(err) => warn!(%group, error = %err, "failed to kill leftover processes"),
    }
}

fn to_status(exit: ExitStatus) -> ProcessStatus {
    if let Some(code) = exit.code() {
        ProcessStatus::Exited { code }
    } else if let Some(signal) = exit.signal() {
        ProcessStatus::Killed { signal }
    } else {
        ProcessStatus::Exited { code: 1 }
    }
}

/// Forward complete lines from `pipe`, decoded lossily and without the line terminator.
async fn forward_lines<R>(pipe: R, lines_tx: mpsc::Sender<OutputLine>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(pipe);
    let mut buf = Vec::with_capacity(4096);
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(n) if n > 0 => {
                let line = String::from_utf8_lossy(trim_line_end(&buf)).into_owned();
                if lines_tx.send(line).await.is_err() {
                    break;
                }
            }
            _ => break,
        }
    }
}

fn trim_line_end(buf: &[u8]) -> &[u8] {
    let buf = buf.strip_suffix(b"\n").unwrap_or(buf);
    buf.strip_suffix(b"\r").unwrap_or(buf)
}
