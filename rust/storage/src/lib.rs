use self::config::StorageConfig;
use self::s3::S3GetError;
use async_trait::async_trait;
use segflow_config::{registry::Registry, Configurable};
use segflow_error::{ChromaError, ErrorCodes};

pub mod config;
pub mod local;
pub mod s3;

pub use s3::StorageConfigError;

use local::LocalStorage;
use s3::S3Storage;
use thiserror::Error;

#[derive(Clone)]
enum StorageKind {
    S3(S3Storage),
    Local(LocalStorage),
}

/// Object-store handle shared by the data coordinator and every data node.
/// Binlog paths recorded in `SegmentInfo`/`FlushPack` are keys into this
/// store; the coordinator never reads the bytes, only the node that wrote
/// them and, at recovery time, the node that re-opens them.
#[derive(Clone)]
pub struct Storage {
    kind: StorageKind,
}

#[derive(Error, Debug, Clone)]
pub enum GetError {
    #[error("No such key: {0}")]
    NoSuchKey(String),
    #[error("storage error: {0}")]
    Other(String),
}

impl ChromaError for GetError {
    fn code(&self) -> ErrorCodes {
        match self {
            GetError::NoSuchKey(_) => ErrorCodes::NotFound,
            GetError::Other(_) => ErrorCodes::Internal,
        }
    }
}

#[derive(Error, Debug, Clone)]
#[error("storage error: {0}")]
pub struct PutError(pub String);

impl ChromaError for PutError {
    fn code(&self) -> ErrorCodes {
        ErrorCodes::Internal
    }
}

impl Storage {
    pub fn new_test_storage() -> Self {
        let dir = tempfile::TempDir::new()
            .expect("should be able to create a temporary directory")
            .into_path();
        Storage {
            kind: StorageKind::Local(LocalStorage::new(
                dir.to_str().expect("path should be utf8"),
            )),
        }
    }

    pub async fn get(&self, key: &str) -> Result<Vec<u8>, GetError> {
        match &self.kind {
            StorageKind::S3(s3) => s3.get(key).await.map_err(|e| match e {
                S3GetError::NoSuchKey(_) => GetError::NoSuchKey(key.to_string()),
                S3GetError::S3GetError(msg) => GetError::Other(msg),
            }),
            StorageKind::Local(local) => local
                .get(key)
                .await
                .map(|bytes| bytes.as_ref().clone())
                .map_err(GetError::Other),
        }
    }

    pub async fn put_bytes(&self, key: &str, bytes: Vec<u8>) -> Result<(), PutError> {
        match &self.kind {
            StorageKind::S3(s3) => s3.put_bytes(key, bytes).await.map_err(|e| PutError(e.to_string())),
            StorageKind::Local(local) => local
                .put_bytes(key, &bytes)
                .await
                .map_err(PutError),
        }
    }

    pub async fn put_file(&self, key: &str, path: &str) -> Result<(), PutError> {
        match &self.kind {
            StorageKind::S3(s3) => s3.put_file(key, path).await.map_err(|e| PutError(e.to_string())),
            StorageKind::Local(local) => local.put_file(key, path).await.map_err(PutError),
        }
    }

    pub async fn delete(&self, key: &str) -> Result<(), PutError> {
        match &self.kind {
            StorageKind::S3(s3) => s3.delete(key).await.map_err(|e| PutError(e.to_string())),
            StorageKind::Local(local) => local.delete(key).await.map_err(PutError),
        }
    }

    pub async fn list_prefix(&self, prefix: &str) -> Result<Vec<String>, GetError> {
        match &self.kind {
            StorageKind::S3(s3) => s3
                .list_prefix(prefix)
                .await
                .map_err(|e| GetError::Other(e.to_string())),
            StorageKind::Local(local) => local
                .list_prefix(prefix)
                .await
                .map_err(GetError::Other),
        }
    }
}

#[async_trait]
impl Configurable<StorageConfig> for Storage {
    async fn try_from_config(
        config: &StorageConfig,
        registry: &Registry,
    ) -> Result<Self, Box<dyn ChromaError>> {
        let kind = match config {
            StorageConfig::S3(_) => StorageKind::S3(S3Storage::try_from_config(config, registry).await?),
            StorageConfig::Local(_) => {
                StorageKind::Local(LocalStorage::try_from_config(config, registry).await?)
            }
        };
        Ok(Storage { kind })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_then_get_roundtrips() {
        let storage = Storage::new_test_storage();
        storage.put_bytes("a/b", b"hello".to_vec()).await.unwrap();
        let bytes = storage.get("a/b").await.unwrap();
        assert_eq!(bytes, b"hello");
    }

    #[tokio::test]
    async fn missing_key_is_not_found() {
        let storage = Storage::new_test_storage();
        let err = storage.get("nope").await.unwrap_err();
        assert!(matches!(err, GetError::Other(_)));
    }

    #[tokio::test]
    async fn list_prefix_finds_written_keys() {
        let storage = Storage::new_test_storage();
        storage.put_bytes("seg/1/insert/f1", b"x".to_vec()).await.unwrap();
        storage.put_bytes("seg/1/insert/f2", b"y".to_vec()).await.unwrap();
        storage.put_bytes("seg/2/insert/f1", b"z".to_vec()).await.unwrap();
        let mut keys = storage.list_prefix("seg/1/").await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["seg/1/insert/f1", "seg/1/insert/f2"]);
    }
}
