/*!
Amazon S3 storage backend.

Uploads are written to a single object key with `put_object`; bucket versioning or
lifecycle rules decide what happens to earlier uploads.
*/

use std::fmt;

use async_trait::async_trait;
use autobackup_retry::{classify, with_policy, RetryPolicy, RetryableError};
use aws_sdk_s3::error::ProvideErrorMetadata;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client as S3Client;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::StorageClient;
use crate::config::StorageConfig;
use crate::{BackupError, Result};

/// Amazon S3 storage backend
///
/// Credentials come from the standard AWS provider chain (environment variables,
/// `~/.aws/credentials`, instance or task roles).
///
/// # Example
/// ```rust,no_run
/// use autobackup_core::storage::S3StorageAdapter;
///
/// # async fn demo() -> autobackup_core::Result<()> {
/// let adapter = S3StorageAdapter::new("my-backups", "app/latest.gz", None).await?;
/// assert_eq!(adapter.to_string(), "s3://my-backups/app/latest.gz");
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct S3StorageAdapter {
    client: S3Client,
    bucket: String,
    key: String,
    retry_policy: RetryPolicy,
}

impl S3StorageAdapter {
    /// Create a backend for `bucket`/`key`, loading AWS configuration from the environment
    pub async fn new(
        bucket: impl Into<String>,
        key: impl Into<String>,
        region: Option<String>,
    ) -> Result<Self> {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
        if let Some(region) = region {
            loader = loader.region(aws_config::Region::new(region));
        }
        let sdk_config = loader.load().await;

        if sdk_config.credentials_provider().is_none() {
            return Err(BackupError::storage(
                "AWS credentials not found. Please set AWS_ACCESS_KEY_ID, AWS_SECRET_ACCESS_KEY, and AWS_REGION environment variables",
            ));
        }

        Ok(Self::with_client(S3Client::new(&sdk_config), bucket, key))
    }

    /// Create a backend from an already configured client
    pub fn with_client(client: S3Client, bucket: impl Into<String>, key: impl Into<String>) -> Self {
        let adapter = Self {
            client,
            bucket: bucket.into(),
            key: key.into(),
            retry_policy: RetryPolicy::cloud_storage(),
        };
        info!(bucket = %adapter.bucket, key = %adapter.key, "Initialized S3 storage adapter");
        adapter
    }

    /// Create a backend from an S3 [`StorageConfig`]
    pub async fn from_config(config: &StorageConfig) -> Result<Self> {
        let bucket = config
            .s3_bucket
            .clone()
            .ok_or_else(|| BackupError::validation("S3 backend requires a valid bucket name"))?;
        let key = config
            .s3_key
            .clone()
            .ok_or_else(|| BackupError::validation("S3 backend requires an object key"))?;
        Self::new(bucket, key, config.s3_region.clone()).await
    }

    /// Override the retry policy used for `put_object`
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    async fn put_with_retry(&self, data: Vec<u8>) -> Result<()> {
        let client = self.client.clone();
        let bucket = self.bucket.clone();
        let key = self.key.clone();

        let result = with_policy("put_object", self.retry_policy.clone(), move |attempt| {
            let client = client.clone();
            let bucket = bucket.clone();
            let key = key.clone();
            let body = ByteStream::from(data.clone());
            Box::pin(async move {
                debug!(bucket = %bucket, key = %key, attempt, "Starting S3 put_object operation");
                client
                    .put_object()
                    .bucket(&bucket)
                    .key(&key)
                    .body(body)
                    .send()
                    .await
                    .map(|_| ())
                    .map_err(|e| classify("put_object", map_s3_error("put_object", e, &key)))
            })
        })
        .await;

        result.map_err(|e| {
            error!(bucket = %self.bucket, key = %self.key, error = %e, "Failed to upload to S3");
            BackupError::storage(e.to_string())
        })
    }
}

impl fmt::Display for S3StorageAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s3://{}/{}", self.bucket, self.key)
    }
}

#[async_trait]
impl StorageClient for S3StorageAdapter {
    async fn upload(
        &self,
        cancel: &CancellationToken,
        reader: &mut (dyn AsyncRead + Send + Unpin),
    ) -> Result<()> {
        // Buffer the whole stream so retries can resend it; the caller's byte count
        // reflects the stream, not the number of attempts.
        let mut data = Vec::new();
        tokio::select! {
            _ = cancel.cancelled() => {
                return Err(BackupError::cancelled(format!("upload to {self} cancelled")));
            }
            read = reader.read_to_end(&mut data) => {
                read.map_err(|e| BackupError::storage(format!("Failed to read upload stream: {e}")))?;
            }
        }

        info!(bucket = %self.bucket, key = %self.key, size = data.len(), "Uploading snapshot to S3");

        tokio::select! {
            _ = cancel.cancelled() => {
                Err(BackupError::cancelled(format!("upload to {self} cancelled")))
            }
            result = self.put_with_retry(data) => result,
        }
    }
}

/// S3 failure with a retry classification
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
struct S3Failure {
    message: String,
    transient: bool,
}

impl RetryableError for S3Failure {
    fn is_transient(&self) -> bool {
        self.transient
    }
}

fn map_s3_error<E: ProvideErrorMetadata + fmt::Debug>(
    op: &str,
    error: aws_sdk_s3::error::SdkError<E>,
    key: &str,
) -> S3Failure {
    use aws_sdk_s3::error::SdkError;

    let (message, transient) = match &error {
        SdkError::DispatchFailure(dispatch_err) => {
            (format!("S3 {op} request failed to dispatch: {dispatch_err:?}"), true)
        }
        SdkError::TimeoutError(_) => (format!("S3 {op} request timed out (key: {key})"), true),
        SdkError::ResponseError(response_err) => {
            (format!("S3 {op} response error: {response_err:?}"), true)
        }
        SdkError::ServiceError(service_err) => match service_err.err().code() {
            Some("NoSuchBucket") => ("S3 bucket not found".to_string(), false),
            Some("AccessDenied") | Some("Forbidden") => (
                "Access denied to S3 (check credentials and permissions)".to_string(),
                false,
            ),
            Some("InvalidBucketName") => ("Invalid S3 bucket name".to_string(), false),
            Some(code @ ("InternalError" | "ServiceUnavailable" | "SlowDown" | "RequestTimeout")) => (
                format!(
                    "S3 service error ({code}): {}",
                    service_err.err().message().unwrap_or("Unknown error")
                ),
                true,
            ),
            Some(code) => (
                format!(
                    "S3 service error ({code}): {}",
                    service_err.err().message().unwrap_or("Unknown error")
                ),
                false,
            ),
            None => (format!("S3 {op} service error: {service_err:?}"), false),
        },
        _ => (format!("S3 {op} error: {error}"), false),
    };

    S3Failure { message, transient }
}
