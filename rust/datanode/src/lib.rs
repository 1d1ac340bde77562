//! Data Node Flush Pipeline (DN-FP): C7-C9 plus the C10 gRPC surface that
//! the data coordinator drives.

pub mod config;
pub mod flow_graph;
pub mod flush_manager;
pub mod notify;
pub mod replica;
pub mod server;

use segflow_config::{registry::Registry, Configurable};

use config::RootConfig;
use server::DataNodeService;

const CONFIG_PATH_ENV_VAR: &str = "CONFIG_PATH";

pub async fn data_node_service_entrypoint() {
    let config = match std::env::var(CONFIG_PATH_ENV_VAR) {
        Ok(config_path) => RootConfig::load_from_path(&config_path),
        Err(_) => RootConfig::load(),
    };
    let config = config.data_node;

    segflow_tracing::init_otel_tracing(
        &config.service_name,
        &config.otel_filters,
        &config.otel_endpoint,
    );

    let registry = Registry::new();
    let service = match DataNodeService::try_from_config(&config, &registry).await {
        Ok(service) => service,
        Err(err) => panic!("failed to construct data node service: {err:?}"),
    };

    service.run().await;
}
