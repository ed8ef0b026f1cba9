use crate::config::S3Settings;
use crate::ports::storage::{StorageError, StoragePort};
use async_trait::async_trait;
use aws_sdk_s3::config::{Credentials, Region};
use aws_sdk_s3::error::SdkError;
use aws_sdk_s3::operation::get_object::GetObjectError;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use std::path::Path;
use tracing::debug;

/// S3Adapter implements StoragePort for S3-compatible object storage.
#[derive(Clone)]
pub struct S3Adapter {
    client: Client,
    bucket: String,
}

impl S3Adapter {
    pub fn new(client: Client, bucket: String) -> Self {
        Self { client, bucket }
    }

    /// Build a client for a custom endpoint (R2, MinIO) from static credentials.
    pub async fn from_settings(settings: &S3Settings) -> Self {
        let credentials = Credentials::new(
            settings.access_key_id.clone(),
            settings.secret_access_key.clone(),
            None,
            None,
            "stitcher",
        );

        let shared = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(Region::new(settings.region.clone()))
            .credentials_provider(credentials)
            .endpoint_url(&settings.endpoint_url)
            .load()
            .await;

        let config = aws_sdk_s3::config::Builder::from(&shared)
            .force_path_style(true)
            .build();

        Self::new(Client::from_conf(config), settings.bucket.clone())
    }
}

#[async_trait]
impl StoragePort for S3Adapter {
    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let mut keys = Vec::new();
        let mut continuation_token: Option<String> = None;

        loop {
            let resp = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(prefix)
                .set_continuation_token(continuation_token.take())
                .send()
                .await
                .map_err(|e| StorageError::request(prefix, e))?;

            keys.extend(
                resp.contents()
                    .iter()
                    .filter_map(|object| object.key())
                    .map(str::to_string),
            );

            match resp.next_continuation_token() {
                Some(token) if resp.is_truncated().unwrap_or(false) => {
                    continuation_token = Some(token.to_string());
                }
                _ => break,
            }
        }

        debug!(prefix, count = keys.len(), "listed objects");
        Ok(keys)
    }

    async fn download(&self, key: &str, local_path: &Path) -> Result<(), StorageError> {
        let resp = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| match e {
                SdkError::ServiceError(ref service)
                    if matches!(service.err(), GetObjectError::NoSuchKey(_)) =>
                {
                    StorageError::NotFound(key.to_string())
                }
                other => StorageError::request(key, other),
            })?;

        let body = resp
            .body
            .collect()
            .await
            .map_err(|e| StorageError::request(key, e))?;
        tokio::fs::write(local_path, body.into_bytes())
            .await
            .map_err(|e| StorageError::io(local_path, e))?;
        Ok(())
    }

    async fn upload(&self, local_path: &Path, key: &str) -> Result<(), StorageError> {
        let body = tokio::fs::read(local_path)
            .await
            .map_err(|e| StorageError::io(local_path, e))?;
        let byte_stream = ByteStream::from(body);
        let content_type = mime_guess::from_path(local_path)
            .first_or_octet_stream()
            .to_string();

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .body(byte_stream)
            .send()
            .await
            .map_err(|e| StorageError::request(key, e))?;
        Ok(())
    }
}
