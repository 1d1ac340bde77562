use async_trait::async_trait;
use aws_config::retry::RetryConfig;
use aws_config::timeout::TimeoutConfigBuilder;
use aws_sdk_s3::error::SdkError;
use aws_sdk_s3::primitives::ByteStream;
use segflow_config::{registry::Registry, Configurable};
use segflow_error::{ChromaError, ErrorCodes};
use std::time::Duration;
use thiserror::Error;

use super::config::StorageConfig;

#[derive(Clone)]
pub struct S3Storage {
    bucket: String,
    client: aws_sdk_s3::Client,
}

#[derive(Error, Debug)]
pub enum S3PutError {
    #[error("S3 PUT error: {0}")]
    S3PutError(String),
}

impl ChromaError for S3PutError {
    fn code(&self) -> ErrorCodes {
        ErrorCodes::Internal
    }
}

#[derive(Error, Debug)]
pub enum S3GetError {
    #[error("S3 GET error: {0}")]
    S3GetError(String),
    #[error("No such key: {0}")]
    NoSuchKey(String),
}

impl ChromaError for S3GetError {
    fn code(&self) -> ErrorCodes {
        match self {
            S3GetError::NoSuchKey(_) => ErrorCodes::NotFound,
            S3GetError::S3GetError(_) => ErrorCodes::Internal,
        }
    }
}

impl S3Storage {
    fn new(bucket: &str, client: aws_sdk_s3::Client) -> S3Storage {
        S3Storage {
            bucket: bucket.to_string(),
            client,
        }
    }

    async fn create_bucket(&self) -> Result<(), String> {
        let res = self
            .client
            .create_bucket()
            .bucket(self.bucket.clone())
            .send()
            .await;
        match res {
            Ok(_) => Ok(()),
            Err(SdkError::ServiceError(err)) => match err.into_err() {
                aws_sdk_s3::operation::create_bucket::CreateBucketError::BucketAlreadyExists(_)
                | aws_sdk_s3::operation::create_bucket::CreateBucketError::BucketAlreadyOwnedByYou(_) => {
                    Ok(())
                }
                e => Err(e.to_string()),
            },
            Err(e) => Err(e.to_string()),
        }
    }

    pub async fn get(&self, key: &str) -> Result<Vec<u8>, S3GetError> {
        let res = self
            .client
            .get_object()
            .bucket(self.bucket.clone())
            .key(key)
            .send()
            .await;
        match res {
            Ok(res) => {
                let bytes = res
                    .body
                    .collect()
                    .await
                    .map_err(|e| S3GetError::S3GetError(e.to_string()))?;
                Ok(bytes.to_vec())
            }
            Err(SdkError::ServiceError(err)) => match err.into_err() {
                aws_sdk_s3::operation::get_object::GetObjectError::NoSuchKey(msg) => {
                    Err(S3GetError::NoSuchKey(msg.to_string()))
                }
                e => Err(S3GetError::S3GetError(e.to_string())),
            },
            Err(e) => Err(S3GetError::S3GetError(e.to_string())),
        }
    }

    pub async fn put_bytes(&self, key: &str, bytes: Vec<u8>) -> Result<(), S3PutError> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(bytes))
            .send()
            .await
            .map_err(|e| S3PutError::S3PutError(e.to_string()))?;
        Ok(())
    }

    pub async fn put_file(&self, key: &str, path: &str) -> Result<(), S3PutError> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| S3PutError::S3PutError(e.to_string()))?;
        self.put_bytes(key, bytes).await
    }

    pub async fn delete(&self, key: &str) -> Result<(), S3PutError> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| S3PutError::S3PutError(e.to_string()))?;
        Ok(())
    }

    pub async fn list_prefix(&self, prefix: &str) -> Result<Vec<String>, S3GetError> {
        let mut out = Vec::new();
        let mut continuation_token = None;
        loop {
            let mut req = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(prefix);
            if let Some(token) = continuation_token.take() {
                req = req.continuation_token(token);
            }
            let res = req
                .send()
                .await
                .map_err(|e| S3GetError::S3GetError(e.to_string()))?;
            for obj in res.contents() {
                if let Some(key) = obj.key() {
                    out.push(key.to_string());
                }
            }
            if res.is_truncated() == Some(true) {
                continuation_token = res.next_continuation_token().map(str::to_string);
            } else {
                break;
            }
        }
        Ok(out)
    }
}

#[derive(Error, Debug)]
pub enum StorageConfigError {
    #[error("Invalid storage config")]
    InvalidStorageConfig,
    #[error("Failed to create bucket: {0}")]
    FailedToCreateBucket(String),
}

impl ChromaError for StorageConfigError {
    fn code(&self) -> ErrorCodes {
        match self {
            StorageConfigError::InvalidStorageConfig => ErrorCodes::InvalidArgument,
            StorageConfigError::FailedToCreateBucket(_) => ErrorCodes::Internal,
        }
    }
}

#[async_trait]
impl Configurable<StorageConfig> for S3Storage {
    async fn try_from_config(
        config: &StorageConfig,
        _registry: &Registry,
    ) -> Result<Self, Box<dyn ChromaError>> {
        match config {
            StorageConfig::S3(s3_config) => {
                let client = match &s3_config.credentials {
                    super::config::S3CredentialsConfig::Minio => {
                        let cred = aws_sdk_s3::config::Credentials::new(
                            "minio",
                            "minio123",
                            None,
                            None,
                            "loaded-from-env",
                        );
                        let timeout_config_builder = TimeoutConfigBuilder::default()
                            .connect_timeout(Duration::from_millis(s3_config.connect_timeout_ms))
                            .read_timeout(Duration::from_millis(s3_config.request_timeout_ms));
                        let config = aws_sdk_s3::config::Builder::new()
                            .endpoint_url("http://minio.segflow:9000".to_string())
                            .credentials_provider(cred)
                            .behavior_version_latest()
                            .region(aws_sdk_s3::config::Region::new("us-east-1"))
                            .force_path_style(true)
                            .timeout_config(timeout_config_builder.build())
                            .retry_config(RetryConfig::standard())
                            .build();
                        aws_sdk_s3::Client::from_conf(config)
                    }
                    super::config::S3CredentialsConfig::AWS => {
                        let config = aws_config::load_from_env().await;
                        let timeout_config_builder = TimeoutConfigBuilder::default()
                            .connect_timeout(Duration::from_millis(s3_config.connect_timeout_ms))
                            .read_timeout(Duration::from_millis(s3_config.request_timeout_ms));
                        let config = config
                            .to_builder()
                            .timeout_config(timeout_config_builder.build())
                            .retry_config(RetryConfig::standard())
                            .build();
                        aws_sdk_s3::Client::new(&config)
                    }
                };
                let storage = S3Storage::new(&s3_config.bucket, client);
                if s3_config.credentials == super::config::S3CredentialsConfig::Minio {
                    storage
                        .create_bucket()
                        .await
                        .map_err(|e| Box::new(StorageConfigError::FailedToCreateBucket(e)) as Box<dyn ChromaError>)?;
                }
                Ok(storage)
            }
            _ => Err(Box::new(StorageConfigError::InvalidStorageConfig)),
        }
    }
}
