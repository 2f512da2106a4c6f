use crate::errors::WorkerError;
use crate::events::ProcessStatus;
use tokio::sync::oneshot;

pub enum WorkerMessage {
    GetStatus {
        response: oneshot::Sender<ProcessStatus>,
    },
    Stop {
        response: oneshot::Sender<Result<(), WorkerError>>,
    },
}
