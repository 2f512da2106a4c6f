use crate::errors::{JobError, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Single-slot admission gate.
///
/// Only one holder at a time; a caller that cannot get the slot within its timeout is told the
/// system is busy instead of queueing. Clones share the same slot.
#[derive(Clone, Debug)]
pub struct AdmissionGate {
    slot: Arc<Semaphore>,
}

/// Proof of holding the gate's slot. The slot is freed when the permit is released or dropped,
/// whichever comes first, so it is given back exactly once.
#[derive(Debug)]
pub struct AdmissionPermit {
    _permit: OwnedSemaphorePermit,
}

impl AdmissionGate {
    pub fn new() -> Self {
        Self {
            slot: Arc::new(Semaphore::new(1)),
        }
    }

    /// Wait up to `timeout` for the slot.
    pub async fn acquire(&self, timeout: Duration) -> Result<AdmissionPermit> {
        match tokio::time::timeout(timeout, self.slot.clone().acquire_owned()).await {
            Ok(Ok(permit)) => Ok(AdmissionPermit { _permit: permit }),
            // the semaphore is never closed, but a closed gate admits nobody
            Ok(Err(_)) | Err(_) => Err(JobError::Busy),
        }
    }

    pub fn is_busy(&self) -> bool {
        self.slot.available_permits() == 0
    }
}

impl Default for AdmissionGate {
    fn default() -> Self {
        Self::new()
    }
}

impl AdmissionPermit {
    pub fn release(self) {}
}
