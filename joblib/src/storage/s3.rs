use super::{ObjectEntry, ObjectStore, StorageError, StorageResult};
use async_trait::async_trait;
use aws_sdk_s3::{
    config::{Credentials, Region},
    error::DisplayErrorContext,
    presigning::PresigningConfig,
    primitives::ByteStream,
    Client,
};
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::debug;

/// Connection settings for an S3-compatible store.
#[derive(Clone, Debug)]
pub struct S3Settings {
    pub region: String,
    /// Custom endpoint for S3-compatible stores such as MinIO; `None` means AWS.
    pub endpoint: Option<String>,
    pub access_key_id: String,
    pub secret_access_key: String,
}

/// `ObjectStore` backed by `aws-sdk-s3` with static credentials.
#[derive(Clone, Debug)]
pub struct S3ObjectStore {
    client: Client,
}

impl S3ObjectStore {
    pub fn new(settings: &S3Settings) -> Self {
        let credentials = Credentials::new(
            &settings.access_key_id,
            &settings.secret_access_key,
            None,
            None,
            "gateway-static",
        );

        let mut builder = aws_sdk_s3::Config::builder()
            .credentials_provider(credentials)
            .region(Region::new(settings.region.clone()))
            .behavior_version_latest();

        if let Some(endpoint) = &settings.endpoint {
            // MinIO and friends do not resolve virtual-hosted buckets
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }

        Self {
            client: Client::from_conf(builder.build()),
        }
    }
}

fn remote<E: std::error::Error>(err: E) -> StorageError {
    StorageError::Remote(DisplayErrorContext(&err).to_string())
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn get_object_to_path(
        &self,
        bucket: &str,
        key: &str,
        path: &Path,
    ) -> StorageResult<()> {
        let response = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|err| {
                let missing = err
                    .as_service_error()
                    .map(|e| e.is_no_such_key())
                    .unwrap_or(false);
                if missing {
                    StorageError::NotFound(format!("s3://{bucket}/{key}"))
                } else {
                    remote(err)
                }
            })?;

        let mut body = response.body.into_async_read();
        let mut file = tokio::fs::File::create(path).await?;
        let written = tokio::io::copy(&mut body, &mut file).await?;
        file.flush().await?;
        debug!(bucket, key, bytes = written, path = %path.display(), "object fetched");
        Ok(())
    }

    async fn list_objects(&self, bucket: &str, prefix: &str) -> StorageResult<Vec<ObjectEntry>> {
        let mut pages = self
            .client
            .list_objects_v2()
            .bucket(bucket)
            .prefix(prefix)
            .into_paginator()
            .send();

        let mut entries = Vec::new();
        while let Some(page) = pages.next().await {
            let page = page.map_err(remote)?;
            entries.extend(page.contents().iter().filter_map(|object| {
                object.key().map(|key| ObjectEntry {
                    key: key.to_string(),
                })
            }));
        }
        Ok(entries)
    }

    async fn put_object_from_path(
        &self,
        bucket: &str,
        key: &str,
        path: &Path,
    ) -> StorageResult<()> {
        let body = ByteStream::from_path(path)
            .await
            .map_err(|err| StorageError::Remote(err.to_string()))?;
        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(body)
            .send()
            .await
            .map_err(remote)?;
        Ok(())
    }

    async fn presign_get(
        &self,
        bucket: &str,
        key: &str,
        expiry: Duration,
    ) -> StorageResult<String> {
        let config =
            PresigningConfig::expires_in(expiry).map_err(|err| StorageError::Remote(err.to_string()))?;
        let request = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .presigned(config)
            .await
            .map_err(remote)?;
        Ok(request.uri().to_string())
    }
}
