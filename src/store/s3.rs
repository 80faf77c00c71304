//! Artifacts on an S3-compatible object store (MinIO in practice).

use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_s3::config::{Builder, Credentials};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use bytes::Bytes;
use tracing::{info, trace};

use super::ArtifactStore;
use crate::error::{Error, Result};

/// Connection settings for [`S3Store::open`].
#[derive(Clone, Debug)]
pub struct S3Config {
    /// Endpoint including the scheme, e.g. `http://127.0.0.1:9000`.
    pub endpoint: String,
    pub user: String,
    pub password: String,
    pub bucket: String,
    /// Key prefix under which every artifact is stored.
    pub prefix: String,
}

pub struct S3Store {
    client: Client,
    bucket: String,
    prefix: String,
}

/// Build a client for a MinIO-style endpoint (static credentials, path-style
/// addressing).
pub fn get_min_io_client(endpoint: &str, access_id: &str, access_key: &str) -> Client {
    let credentials = Credentials::new(access_id, access_key, None, None, "minio");
    let config = Builder::new()
        .region(Region::new("us-east-1"))
        .endpoint_url(endpoint)
        .credentials_provider(credentials)
        .force_path_style(true)
        .behavior_version(BehaviorVersion::latest())
        .build();
    Client::from_conf(config)
}

impl S3Store {
    /// Connect and create the bucket if it does not exist yet.
    pub async fn open(config: S3Config) -> Result<Self> {
        let client = get_min_io_client(&config.endpoint, &config.user, &config.password);
        let buckets = client
            .list_buckets()
            .send()
            .await
            .map_err(|e| Error::artifact(&config.bucket, e))?;
        let present = buckets
            .buckets()
            .iter()
            .any(|b| b.name() == Some(config.bucket.as_str()));
        if !present {
            info!(bucket = %config.bucket, "creating bucket");
            client
                .create_bucket()
                .bucket(&config.bucket)
                .send()
                .await
                .map_err(|e| Error::artifact(&config.bucket, e))?;
        }
        Ok(Self {
            client,
            bucket: config.bucket,
            prefix: config.prefix.trim_end_matches('/').to_string(),
        })
    }

    fn key(&self, name: &str) -> String {
        if self.prefix.is_empty() {
            name.to_string()
        } else {
            format!("{}/{}", self.prefix, name)
        }
    }
}

#[async_trait]
impl ArtifactStore for S3Store {
    async fn put(&self, name: &str, data: Bytes) -> Result<()> {
        let key = self.key(name);
        trace!(bucket = %self.bucket, %key, len = data.len(), "put object");
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(data))
            .send()
            .await
            .map_err(|e| Error::artifact(name, e))?;
        Ok(())
    }

    async fn get(&self, name: &str) -> Result<Bytes> {
        let key = self.key(name);
        trace!(bucket = %self.bucket, %key, "get object");
        let object = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| Error::artifact(name, e))?;
        let data = object
            .body
            .collect()
            .await
            .map_err(|e| Error::artifact(name, e))?;
        Ok(data.into_bytes())
    }

    async fn delete(&self, name: &str) -> Result<()> {
        // S3 reports success for keys that do not exist.
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(self.key(name))
            .send()
            .await
            .map_err(|e| Error::artifact(name, e))?;
        Ok(())
    }

    async fn exists(&self, name: &str) -> Result<bool> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(self.key(name))
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(e) => match e.as_service_error() {
                Some(service) if service.is_not_found() => Ok(false),
                _ => Err(Error::artifact(name, e)),
            },
        }
    }
}
