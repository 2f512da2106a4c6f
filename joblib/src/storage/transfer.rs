use super::ObjectStore;
use crate::errors::{JobError, Result};
use crate::location::RemoteLocation;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

/// Lifetime of a published URL unless the caller asks otherwise.
pub const DEFAULT_URL_EXPIRY: Duration = Duration::from_secs(3600);

/// A local file that was uploaded and published.
///
/// The local copy no longer exists by the time this value is handed out.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UploadedArtifact {
    pub local_path: PathBuf,
    pub remote_key: String,
    pub url: String,
}

/// Job-level transfers between the remote store and local disk.
///
/// Downloads always land in a fresh uniquely named directory under the caller-supplied `into`
/// directory, so repeated or concurrent downloads never collide. Uploads go to `output_bucket`.
pub struct TransferClient<S: ?Sized> {
    store: Arc<S>,
    output_bucket: String,
}

impl<S: ObjectStore + ?Sized> TransferClient<S> {
    pub fn new(store: Arc<S>, output_bucket: impl Into<String>) -> Self {
        Self {
            store,
            output_bucket: output_bucket.into(),
        }
    }

    /// Download one object, returning the path of the local copy.
    pub async fn download_object(&self, location: &RemoteLocation, into: &Path) -> Result<PathBuf> {
        let dir = fresh_dir(into).await?;
        let local_path = dir.join(location.file_name());

        self.store
            .get_object_to_path(location.bucket(), location.key(), &local_path)
            .await
            .map_err(|err| JobError::transfer(location.to_string(), err))?;

        info!(%location, path = %local_path.display(), "object downloaded");
        Ok(local_path)
    }

    /// Download every object under the location's prefix, preserving relative paths. Returns the
    /// local directory standing in for the prefix.
    ///
    /// Files fetched before a failure stay on disk; the caller's workspace owns their removal.
    pub async fn download_prefix(&self, location: &RemoteLocation, into: &Path) -> Result<PathBuf> {
        let prefix = location.prefix();
        let dir = fresh_dir(into).await?;

        let entries = self
            .store
            .list_objects(location.bucket(), &prefix)
            .await
            .map_err(|err| JobError::transfer(location.to_string(), err))?;

        let mut fetched = 0usize;
        for entry in entries.iter().filter(|entry| !entry.is_directory_marker()) {
            let relative = match relative_key(&entry.key, &prefix) {
                Some(relative) => relative,
                None => {
                    warn!(key = %entry.key, %prefix, "skipping key outside of the requested prefix");
                    continue;
                }
            };
            let local_path = dir.join(relative);
            if let Some(parent) = local_path.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(JobError::Workspace)?;
            }

            info!(bucket = location.bucket(), key = %entry.key, path = %local_path.display(), "downloading");
            self.store
                .get_object_to_path(location.bucket(), &entry.key, &local_path)
                .await
                .map_err(|err| JobError::transfer(format!("s3://{}/{}", location.bucket(), entry.key), err))?;
            fetched += 1;
        }

        if fetched == 0 {
            warn!(%location, "prefix download found no objects");
        }
        info!(%location, objects = fetched, path = %dir.display(), "prefix downloaded");
        Ok(dir)
    }

    /// Upload `local_file` under `remote_prefix`, delete the local copy, and mint an expiring URL.
    ///
    /// Never fails the caller: any problem is logged and reported as `None` so that the remaining
    /// files of a batch can still be published.
    pub async fn upload_and_publish(
        &self,
        local_file: &Path,
        remote_prefix: &str,
        expiry: Duration,
    ) -> Option<UploadedArtifact> {
        let file_name = match local_file.file_name().and_then(|name| name.to_str()) {
            Some(name) => name,
            None => {
                warn!(path = %local_file.display(), "cannot derive an object name from path");
                return None;
            }
        };
        let prefix = remote_prefix.trim_end_matches('/');
        let remote_key = if prefix.is_empty() {
            file_name.to_string()
        } else {
            format!("{prefix}/{file_name}")
        };
        let bucket = self.output_bucket.as_str();

        if let Err(err) = self
            .store
            .put_object_from_path(bucket, &remote_key, local_file)
            .await
        {
            warn!(path = %local_file.display(), bucket, key = %remote_key, error = %err, "upload failed");
            return None;
        }
        info!(path = %local_file.display(), bucket, key = %remote_key, "uploaded");

        if let Err(err) = tokio::fs::remove_file(local_file).await {
            warn!(path = %local_file.display(), error = %err, "could not delete uploaded file");
        }

        match self.store.presign_get(bucket, &remote_key, expiry).await {
            Ok(url) => Some(UploadedArtifact {
                local_path: local_file.to_path_buf(),
                remote_key,
                url,
            }),
            Err(err) => {
                warn!(bucket, key = %remote_key, error = %err, "could not mint presigned url");
                None
            }
        }
    }
}

async fn fresh_dir(into: &Path) -> Result<PathBuf> {
    let dir = into.join(Uuid::new_v4().to_string());
    tokio::fs::create_dir_all(&dir)
        .await
        .map_err(JobError::Workspace)?;
    Ok(dir)
}

/// Part of `key` below `prefix`, as a relative path that cannot escape its base directory.
fn relative_key<'a>(key: &'a str, prefix: &str) -> Option<&'a Path> {
    let relative = Path::new(key.strip_prefix(prefix)?);
    let contained = relative
        .components()
        .all(|component| matches!(component, Component::Normal(_)));
    (contained && relative.components().next().is_some()).then(|| relative)
}
