//! Process configuration for the data coordinator binary, loaded the way
//! `rust-sysdb`'s `SysDbServiceConfig`/`RootConfig` are: figment over a YAML
//! file with `CHROMA_`-prefixed environment overrides.

use std::collections::HashMap;
use std::time::Duration;

use figment::providers::{Env, Format, Yaml};
use serde::{Deserialize, Serialize};

use segflow_storage::config::StorageConfig;
use segflow_tracing::OtelFilter;

const DEFAULT_CONFIG_PATH: &str = "./segflow_config.yaml";

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct DataCoordConfig {
    #[serde(default = "DataCoordConfig::default_service_name")]
    pub service_name: String,
    #[serde(default = "DataCoordConfig::default_otel_endpoint")]
    pub otel_endpoint: String,
    #[serde(default)]
    pub otel_filters: Vec<OtelFilter>,
    #[serde(default = "DataCoordConfig::default_port")]
    pub port: u16,
    #[serde(default = "DataCoordConfig::default_storage")]
    pub storage: StorageConfig,
    /// Known data nodes at startup, `nodeID -> gRPC endpoint`. The source
    /// discovers nodes through a memberlist watch; this workspace has no
    /// such service and takes the live set as static configuration instead.
    #[serde(default)]
    pub data_nodes: HashMap<String, String>,
    #[serde(default = "DataCoordConfig::default_scan_interval_secs")]
    pub flush_scan_interval_secs: u64,
}

impl DataCoordConfig {
    fn default_service_name() -> String {
        "segflow-datacoord".to_string()
    }

    fn default_otel_endpoint() -> String {
        "http://otel-collector.segflow.svc.cluster.local:4317".to_string()
    }

    fn default_port() -> u16 {
        13333
    }

    fn default_scan_interval_secs() -> u64 {
        10
    }

    fn default_storage() -> StorageConfig {
        StorageConfig::Local(segflow_storage::config::LocalStorageConfig {
            root: "./segflow_data".to_string(),
        })
    }

    pub fn flush_scan_interval(&self) -> Duration {
        Duration::from_secs(self.flush_scan_interval_secs)
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct RootConfig {
    pub data_coord: DataCoordConfig,
}

impl RootConfig {
    pub fn load() -> Self {
        Self::load_from_path(DEFAULT_CONFIG_PATH)
    }

    pub fn load_from_path(path: &str) -> Self {
        let mut f = figment::Figment::from(Env::prefixed("CHROMA_").map(|k| match k {
            k => k.as_str().replace("__", ".").into(),
        }));
        if std::path::Path::new(path).exists() {
            f = figment::Figment::from(Yaml::file(path)).merge(f);
        }
        match f.extract() {
            Ok(config) => config,
            Err(e) => panic!("Error loading config: {}", e),
        }
    }
}
