use serde::Deserialize;

/// The configuration for the chosen storage backend. Both the DC and the DN
/// binaries load one of these into a `Storage` handle during startup and
/// share it across the binlog write path.
#[derive(Deserialize, Debug, Clone)]
pub enum StorageConfig {
    #[serde(alias = "s3")]
    S3(S3StorageConfig),
    #[serde(alias = "local")]
    Local(LocalStorageConfig),
}

#[derive(Deserialize, PartialEq, Debug, Clone)]
pub enum S3CredentialsConfig {
    Minio,
    AWS,
}

#[derive(Deserialize, Debug, Clone)]
pub struct S3StorageConfig {
    pub bucket: String,
    pub credentials: S3CredentialsConfig,
    pub connect_timeout_ms: u64,
    pub request_timeout_ms: u64,
    pub upload_part_size_bytes: usize,
}

#[derive(Deserialize, Debug, Clone)]
pub struct LocalStorageConfig {
    pub root: String,
}
