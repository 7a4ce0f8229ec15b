//! Blob storage — the S3/MinIO boundary for resume PDFs.
//!
//! Delete is idempotent: removing a key that no longer exists is a success,
//! so compensation paths and the retention sweep never fail on an
//! already-gone file.

use async_trait::async_trait;
use aws_sdk_s3::error::{ProvideErrorMetadata, SdkError};
use aws_sdk_s3::operation::delete_object::DeleteObjectError;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use bytes::Bytes;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("blob upload failed for key '{key}': {message}")]
    Upload { key: String, message: String },

    #[error("blob delete failed for key '{key}': {message}")]
    Delete { key: String, message: String },

    #[error("signed URL generation failed for key '{key}': {message}")]
    Presign { key: String, message: String },
}

/// Object-store operations the rest of the service is allowed to use.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Stores `bytes` under `key` and returns the blob's locator URL.
    async fn put(&self, bytes: Bytes, key: &str, content_type: &str)
        -> Result<String, StorageError>;

    /// Removes `key`. Deleting a missing key is not an error.
    async fn delete(&self, key: &str) -> Result<(), StorageError>;

    /// Returns a time-limited read URL for `key`.
    async fn signed_read_url(&self, key: &str, ttl_secs: u64) -> Result<String, StorageError>;
}

/// S3-backed implementation, pointed at MinIO locally or AWS in production.
pub struct S3BlobStore {
    client: aws_sdk_s3::Client,
    bucket: String,
    endpoint: String,
}

impl S3BlobStore {
    pub fn new(client: aws_sdk_s3::Client, bucket: String, endpoint: String) -> Self {
        Self {
            client,
            bucket,
            endpoint,
        }
    }

    /// Stable locator recorded on the resume row. Read access goes through
    /// signed URLs; this identifies the object, it does not grant access.
    fn locator(&self, key: &str) -> String {
        format!("{}/{}/{}", self.endpoint.trim_end_matches('/'), self.bucket, key)
    }
}

#[async_trait]
impl BlobStore for S3BlobStore {
    async fn put(
        &self,
        bytes: Bytes,
        key: &str,
        content_type: &str,
    ) -> Result<String, StorageError> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(bytes))
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| StorageError::Upload {
                key: key.to_string(),
                message: e.to_string(),
            })?;

        info!("Uploaded blob to s3://{}/{}", self.bucket, key);
        Ok(self.locator(key))
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        match self
            .client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(_) => {
                info!("Deleted blob s3://{}/{}", self.bucket, key);
                Ok(())
            }
            Err(e) => {
                if is_not_found(&e) {
                    warn!("Blob s3://{}/{} already absent, treating delete as success", self.bucket, key);
                    return Ok(());
                }
                Err(StorageError::Delete {
                    key: key.to_string(),
                    message: e.to_string(),
                })
            }
        }
    }

    async fn signed_read_url(&self, key: &str, ttl_secs: u64) -> Result<String, StorageError> {
        let presigning = PresigningConfig::expires_in(Duration::from_secs(ttl_secs)).map_err(
            |e| StorageError::Presign {
                key: key.to_string(),
                message: e.to_string(),
            },
        )?;

        let presigned = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .presigned(presigning)
            .await
            .map_err(|e| StorageError::Presign {
                key: key.to_string(),
                message: e.to_string(),
            })?;

        Ok(presigned.uri().to_string())
    }
}

fn is_not_found(err: &SdkError<DeleteObjectError>) -> bool {
    matches!(err, SdkError::ServiceError(se) if se.err().meta().code() == Some("NoSuchKey"))
}
