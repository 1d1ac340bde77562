use figment::providers::{Env, Format, Yaml};
use serde::{Deserialize, Serialize};

use segflow_storage::config::StorageConfig;
use segflow_tracing::OtelFilter;

use crate::flow_graph::FlowGraphConfig;

const DEFAULT_CONFIG_PATH: &str = "./segflow_config.yaml";

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct DataNodeConfig {
    #[serde(default = "DataNodeConfig::default_service_name")]
    pub service_name: String,
    #[serde(default = "DataNodeConfig::default_otel_endpoint")]
    pub otel_endpoint: String,
    #[serde(default)]
    pub otel_filters: Vec<OtelFilter>,
    #[serde(default = "DataNodeConfig::default_port")]
    pub port: u16,
    #[serde(default = "DataNodeConfig::default_node_id")]
    pub node_id: String,
    #[serde(default = "DataNodeConfig::default_data_coord_addr")]
    pub data_coord_addr: String,
    #[serde(default = "DataNodeConfig::default_storage")]
    pub storage: StorageConfig,
    #[serde(default)]
    pub flow_graph: FlowGraphConfig,
}

impl DataNodeConfig {
    fn default_service_name() -> String {
        "segflow-datanode".to_string()
    }

    fn default_otel_endpoint() -> String {
        "http://otel-collector.segflow.svc.cluster.local:4317".to_string()
    }

    fn default_port() -> u16 {
        13334
    }

    fn default_node_id() -> String {
        "datanode-0".to_string()
    }

    fn default_data_coord_addr() -> String {
        "http://127.0.0.1:13333".to_string()
    }

    fn default_storage() -> StorageConfig {
        StorageConfig::Local(segflow_storage::config::LocalStorageConfig {
            root: "./segflow_data".to_string(),
        })
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct RootConfig {
    pub data_node: DataNodeConfig,
}

impl RootConfig {
    pub fn load() -> Self {
        Self::load_from_path(DEFAULT_CONFIG_PATH)
    }

    pub fn load_from_path(path: &str) -> Self {
        let mut f = figment::Figment::from(Env::prefixed("CHROMA_").map(|k| k.as_str().replace("__", ".").into()));
        if std::path::Path::new(path).exists() {
            f = figment::Figment::from(Yaml::file(path)).merge(f);
        }
        match f.extract() {
            Ok(config) => config,
            Err(e) => panic!("Error loading config: {}", e),
        }
    }
}
