//! S3-compatible object store
//!
//! Wraps the AWS SDK for S3-compatible storage access (MinIO, Cloudflare
//! R2, Backblaze B2, AWS S3).

use aws_config::BehaviorVersion;
use aws_sdk_s3::{
    config::{Credentials, Region},
    primitives::ByteStream,
    Client,
};
use chrono::Utc;

use crate::config::StorageConfig;

use super::{ObjectStore, StorageError};

/// S3-backed [`ObjectStore`]. Committed files land under
/// `user_id/timestamp/filename`.
#[derive(Clone)]
pub struct S3ObjectStore {
    client: Client,
    bucket: String,
}

impl S3ObjectStore {
    /// Create a new S3 store from configuration.
    pub async fn new(config: &StorageConfig) -> Result<Self, StorageError> {
        let credentials = Credentials::new(
            &config.access_key,
            &config.secret_key,
            None,
            None,
            "cargohold",
        );

        let region = config
            .region
            .clone()
            .unwrap_or_else(|| "us-east-1".to_string());

        let s3_config = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .endpoint_url(&config.endpoint)
            .region(Region::new(region))
            .credentials_provider(credentials)
            .force_path_style(true) // Required for MinIO and other S3-compatible services
            .build();

        let client = Client::from_conf(s3_config);

        // Probe the bucket; a missing bucket is created so a fresh MinIO
        // instance works out of the box.
        let bucket = config.bucket.clone();
        match client.head_bucket().bucket(&bucket).send().await {
            Ok(_) => {
                tracing::info!("connected to S3 bucket: {}", bucket);
            }
            Err(_) => {
                client
                    .create_bucket()
                    .bucket(&bucket)
                    .send()
                    .await
                    .map_err(|e| {
                        StorageError::ConnectionFailed(format!(
                            "bucket {} unavailable and could not be created: {}",
                            bucket, e
                        ))
                    })?;
                tracing::info!("created S3 bucket: {}", bucket);
            }
        }

        Ok(Self { client, bucket })
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }
}

#[async_trait::async_trait]
impl ObjectStore for S3ObjectStore {
    async fn commit(
        &self,
        data: Vec<u8>,
        owner_id: &str,
        file_name: &str,
    ) -> Result<String, StorageError> {
        let timestamp = Utc::now().format("%Y%m%d_%H%M%S");
        let key = format!("{}/{}/{}", owner_id, timestamp, file_name);
        let size = data.len();

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .body(ByteStream::from(data))
            .send()
            .await
            .map_err(|e| StorageError::CommitFailed(e.to_string()))?;

        tracing::info!(key = %key, size = size, "committed object to S3");
        Ok(key)
    }
}
