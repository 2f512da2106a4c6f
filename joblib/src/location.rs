use crate::errors::{JobError, Result};
use std::fmt;
use std::str::FromStr;

/// A bucket plus an object key (or key prefix) in the remote object store.
///
/// Accepted forms are `s3://bucket/key` and `https://bucket.<store-host>/key`; in the second form
/// the bucket is the first dot-separated label of the host.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemoteLocation {
    bucket: String,
    key: String,
}

impl RemoteLocation {
    pub fn parse(uri: &str) -> Result<Self> {
        let uri = uri.trim();
        let invalid = |reason: &str| JobError::InvalidLocation {
            location: uri.to_string(),
            reason: reason.to_string(),
        };

        let (scheme, rest) = uri
            .split_once("://")
            .ok_or_else(|| invalid("expected 's3://' or 'https://'"))?;
        let (authority, path) = rest.split_once('/').unwrap_or((rest, ""));

        let bucket = match scheme.to_ascii_lowercase().as_str() {
            "s3" => authority,
            "https" => authority.split('.').next().unwrap_or_default(),
            _ => return Err(invalid("expected 's3://' or 'https://'")),
        };
        // query strings and fragments are not part of the key
        let key = path
            .split(['?', '#'])
            .next()
            .unwrap_or_default()
            .trim_start_matches('/');

        if bucket.is_empty() || key.is_empty() {
            return Err(invalid("could not extract bucket and key"));
        }
        Ok(Self {
            bucket: bucket.to_string(),
            key: key.to_string(),
        })
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// The key as a folder prefix, always ending in exactly one `/`.
    pub fn prefix(&self) -> String {
        format!("{}/", self.key.trim_end_matches('/'))
    }

    /// Last path segment of the key.
    pub fn file_name(&self) -> &str {
        self.key
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .unwrap_or_default()
    }
}

impl FromStr for RemoteLocation {
    type Err = JobError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for RemoteLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s3://{}/{}", self.bucket, self.key)
    }
}
