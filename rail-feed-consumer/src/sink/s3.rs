use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client as AwsS3Client;
use tracing::info;

use super::{object_name, FlushSink};
use crate::error::SinkError;
use crate::normalize::CanonicalRecord;

/// Writes each window as one object, `<prefix><label>.json`.
pub struct S3Sink {
    client: AwsS3Client,
    bucket: String,
    prefix: String,
}

impl S3Sink {
    pub fn new(client: AwsS3Client, bucket: String, prefix: String) -> Self {
        Self {
            client,
            bucket,
            prefix,
        }
    }

    pub async fn from_env(
        bucket: String,
        prefix: String,
        endpoint: Option<String>,
    ) -> Result<Self, SinkError> {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Some(endpoint) = endpoint {
            loader = loader.endpoint_url(endpoint);
        }
        let shared = loader.load().await;
        let config = aws_sdk_s3::config::Builder::from(&shared)
            .force_path_style(true)
            .build();
        info!(bucket, prefix, "Writing record batches to object storage");
        Ok(Self::new(AwsS3Client::from_conf(config), bucket, prefix))
    }

    pub fn key_for(&self, label: &str) -> String {
        format!("{}{}", self.prefix, object_name(label))
    }
}

#[async_trait]
impl FlushSink for S3Sink {
    async fn persist(&self, label: &str, records: &[CanonicalRecord]) -> Result<(), SinkError> {
        let contents = serde_json::to_vec_pretty(records)?;
        let key = self.key_for(label);

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .content_type("application/json")
            .body(ByteStream::from(contents))
            .send()
            .await
            .map_err(|e| SinkError::ObjectStore(format!("failed to put {key}: {e}")))?;

        info!(bucket = self.bucket, key, records = records.len(), "Uploaded batch");
        Ok(())
    }
}
