use crate::errors::{JobError, Result};
use crate::types::JobId;
use std::io;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, warn};
use uuid::Uuid;

/// Scratch directory owned by one job execution.
///
/// Removed by `destroy`, or on drop if `destroy` was never reached.
#[derive(Debug)]
pub struct Workspace {
    id: JobId,
    dir: Option<TempDir>,
    root: PathBuf,
}

impl Workspace {
    /// Create a fresh uniquely named directory under `parent`.
    pub async fn create(parent: &Path) -> Result<Self> {
        let id = Uuid::new_v4();
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(JobError::Workspace)?;
        let builder_parent = parent.to_path_buf();
        let dir = tokio::task::spawn_blocking(move || {
            tempfile::Builder::new()
                .prefix(&format!("job-{id}-"))
                .tempdir_in(builder_parent)
        })
        .await
        .map_err(|err| JobError::Workspace(io::Error::new(io::ErrorKind::Other, err)))?
        .map_err(JobError::Workspace)?;
        let root = dir.path().to_path_buf();
        debug!(job_id = %id, root = %root.display(), "workspace created");
        Ok(Self {
            id,
            dir: Some(dir),
            root,
        })
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Remove the directory and everything in it. A directory that is already gone is not an
    /// error.
    pub fn destroy(mut self) -> io::Result<()> {
        self.remove()
    }

    fn remove(&mut self) -> io::Result<()> {
        let dir = match self.dir.take() {
            Some(dir) => dir,
            None => return Ok(()),
        };
        match dir.close() {
            Ok(()) => {
                debug!(job_id = %self.id, root = %self.root.display(), "workspace removed");
                Ok(())
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err),
        }
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if let Err(err) = self.remove() {
            warn!(job_id = %self.id, root = %self.root.display(), error = %err, "workspace removal failed");
        }
    }
}
