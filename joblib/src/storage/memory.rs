//! In-memory `ObjectStore` for tests.

use super::{ObjectEntry, ObjectStore, StorageError, StorageResult};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

#[derive(Default)]
pub(crate) struct MemoryObjectStore {
    objects: Mutex<BTreeMap<(String, String), Vec<u8>>>,
    failing_gets: Mutex<HashSet<String>>,
    failing_puts: Mutex<HashSet<String>>,
}

impl MemoryObjectStore {
    pub(crate) fn insert(&self, bucket: &str, key: &str, data: &[u8]) {
        self.objects
            .lock()
            .unwrap()
            .insert((bucket.to_string(), key.to_string()), data.to_vec());
    }

    pub(crate) fn get(&self, bucket: &str, key: &str) -> Option<Vec<u8>> {
        self.objects
            .lock()
            .unwrap()
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
    }

    pub(crate) fn fail_get(&self, key: &str) {
        self.failing_gets.lock().unwrap().insert(key.to_string());
    }

    /// Reject uploads of every key ending in `suffix`.
    pub(crate) fn fail_put(&self, suffix: &str) {
        self.failing_puts.lock().unwrap().insert(suffix.to_string());
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn get_object_to_path(
        &self,
        bucket: &str,
        key: &str,
        path: &Path,
    ) -> StorageResult<()> {
        if self.failing_gets.lock().unwrap().contains(key) {
            return Err(StorageError::Remote(format!("injected failure for {key}")));
        }
        let data = self
            .get(bucket, key)
            .ok_or_else(|| StorageError::NotFound(format!("s3://{bucket}/{key}")))?;
        tokio::fs::write(path, data).await?;
        Ok(())
    }

    async fn list_objects(&self, bucket: &str, prefix: &str) -> StorageResult<Vec<ObjectEntry>> {
        Ok(self
            .objects
            .lock()
            .unwrap()
            .iter()
            .filter(|((b, key), _)| b == bucket && key.starts_with(prefix))
            .map(|((_, key), _)| ObjectEntry { key: key.clone() })
            .collect())
    }

    async fn put_object_from_path(
        &self,
        bucket: &str,
        key: &str,
        path: &Path,
    ) -> StorageResult<()> {
        let rejected = self
            .failing_puts
            .lock()
            .unwrap()
            .iter()
            .any(|suffix| key.ends_with(suffix.as_str()));
        if rejected {
            return Err(StorageError::Remote(format!("injected failure for {key}")));
        }
        let data = tokio::fs::read(path).await?;
        self.insert(bucket, key, &data);
        Ok(())
    }

    async fn presign_get(
        &self,
        bucket: &str,
        key: &str,
        expiry: Duration,
    ) -> StorageResult<String> {
        Ok(format!(
            "https://{bucket}.store.test/{key}?expires={}",
            expiry.as_secs()
        ))
    }
}
