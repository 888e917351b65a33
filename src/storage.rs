use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use aws_config::meta::region::RegionProviderChain;
use aws_config::BehaviorVersion;
use aws_credential_types::Credentials;
use aws_sdk_s3::config::{Builder as S3ConfigBuilder, Region};
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client as S3Client;
use tracing::{debug, info};

use crate::config::AppConfig;

/// Blob storage for uploaded documents. Objects are addressed by key and
/// handed out to browsers through short-lived presigned URLs.
#[async_trait]
pub trait ObjectStorage: Send + Sync + 'static {
    async fn put_object(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: Option<String>,
        content_disposition: Option<String>,
    ) -> Result<()>;

    /// `content_disposition` overrides the stored header on the response.
    async fn presign_get_object(
        &self,
        key: &str,
        expires_in: Duration,
        content_disposition: Option<String>,
    ) -> Result<String>;

    async fn delete_object(&self, key: &str) -> Result<()>;
}

pub struct S3Storage {
    client: S3Client,
    bucket: String,
}

impl S3Storage {
    pub fn new(client: S3Client, bucket: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
        }
    }

    /// Client for `config.s3_bucket`. Static keys win over the default
    /// credential chain, and a custom endpoint (MinIO, LocalStack) switches
    /// to path-style addressing.
    pub async fn from_config(config: &AppConfig) -> Result<Self> {
        let region_provider =
            RegionProviderChain::first_try(Some(Region::new(config.aws_region.clone())))
                .or_default_provider()
                .or_else("us-east-1");
        let mut loader = aws_config::defaults(BehaviorVersion::latest()).region(region_provider);

        if let Some(endpoint) = &config.aws_endpoint_url {
            loader = loader.endpoint_url(endpoint);
        }
        if let (Some(access_key), Some(secret_key)) = (
            config.aws_access_key_id.clone(),
            config.aws_secret_access_key.clone(),
        ) {
            loader = loader.credentials_provider(Credentials::new(
                access_key, secret_key, None, None, "portal-config",
            ));
        }

        let shared = loader.load().await;
        let s3_config = S3ConfigBuilder::from(&shared)
            .force_path_style(config.aws_endpoint_url.is_some())
            .build();

        info!(
            bucket = %config.s3_bucket,
            endpoint = config.aws_endpoint_url.as_deref().unwrap_or("aws"),
            "object storage configured"
        );
        Ok(Self::new(S3Client::from_conf(s3_config), config.s3_bucket.clone()))
    }
}

#[async_trait]
impl ObjectStorage for S3Storage {
    async fn put_object(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: Option<String>,
        content_disposition: Option<String>,
    ) -> Result<()> {
        let size = bytes.len();
        let mut request = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(bytes));

        if let Some(content_type) = content_type {
            request = request.content_type(content_type);
        }

        if let Some(content_disposition) = content_disposition {
            request = request.content_disposition(content_disposition);
        }

        request
            .send()
            .await
            .with_context(|| format!("failed to upload `{key}` to S3"))?;

        debug!(bucket = %self.bucket, key, size, "object stored");
        Ok(())
    }

    async fn presign_get_object(
        &self,
        key: &str,
        expires_in: Duration,
        content_disposition: Option<String>,
    ) -> Result<String> {
        let presign_config = PresigningConfig::builder()
            .expires_in(expires_in)
            .build()
            .context("failed to build S3 presigning config")?;

        let mut request = self.client.get_object().bucket(&self.bucket).key(key);
        if let Some(content_disposition) = content_disposition {
            request = request.response_content_disposition(content_disposition);
        }

        let presigned = request
            .presigned(presign_config)
            .await
            .context("failed to generate presigned download URL")?;

        Ok(presigned.uri().to_string())
    }

    async fn delete_object(&self, key: &str) -> Result<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .with_context(|| format!("failed to delete `{key}` from S3"))?;
        debug!(bucket = %self.bucket, key, "object deleted");
        Ok(())
    }
}
