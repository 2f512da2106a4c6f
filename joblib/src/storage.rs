//! Object-store access.
//!
//! `ObjectStore` is the narrow seam over the remote store (one call per remote operation);
//! `TransferClient` builds the job-level transfers on top of it: single-object download,
//! recursive prefix download, and upload-then-publish with an expiring URL.

#[cfg(test)]
pub(crate) mod memory;
mod s3;
mod transfer;

pub use s3::{S3ObjectStore, S3Settings};
pub use transfer::{TransferClient, UploadedArtifact, DEFAULT_URL_EXPIRY};

use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;
use std::{io, result};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("object store error: {0}")]
    Remote(String),
    #[error("object not found: {0}")]
    NotFound(String),
    #[error("local io error: {0}")]
    Io(#[from] io::Error),
}

pub type StorageResult<T> = result::Result<T, StorageError>;

/// One listed object.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObjectEntry {
    pub key: String,
}

impl ObjectEntry {
    /// Placeholder key ending in `/` that some tools create to make a "folder" visible.
    pub fn is_directory_marker(&self) -> bool {
        self.key.ends_with('/')
    }
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Fetch one object and write it to `path`, replacing any existing file.
    async fn get_object_to_path(&self, bucket: &str, key: &str, path: &Path)
        -> StorageResult<()>;

    /// List every object under `prefix`, across all result pages.
    async fn list_objects(&self, bucket: &str, prefix: &str) -> StorageResult<Vec<ObjectEntry>>;

    /// Upload the file at `path` as `key`. Returns once the store has confirmed the write.
    async fn put_object_from_path(&self, bucket: &str, key: &str, path: &Path)
        -> StorageResult<()>;

    /// Mint a URL that allows fetching `key` without credentials until `expiry` has passed.
    async fn presign_get(&self, bucket: &str, key: &str, expiry: Duration)
        -> StorageResult<String>;
}
