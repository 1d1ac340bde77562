//! Data Coordinator Segment Manager (DC-SM): C1-C6 plus the C10 gRPC
//! surface that exposes them.

pub mod compaction;
pub mod config;
pub mod dispatch;
pub mod flush_policy;
pub mod policy;
pub mod segment_allocator;
pub mod server;

use segflow_config::{registry::Registry, Configurable};

use config::RootConfig;
use server::DataCoordService;

const CONFIG_PATH_ENV_VAR: &str = "CONFIG_PATH";

pub async fn data_coord_service_entrypoint() {
    let config = match std::env::var(CONFIG_PATH_ENV_VAR) {
        Ok(config_path) => RootConfig::load_from_path(&config_path),
        Err(_) => RootConfig::load(),
    };
    let config = config.data_coord;

    segflow_tracing::init_otel_tracing(
        &config.service_name,
        &config.otel_filters,
        &config.otel_endpoint,
    );

    let registry = Registry::new();
    let service = match DataCoordService::try_from_config(&config, &registry).await {
        Ok(service) => service,
        Err(err) => panic!("failed to construct data coordinator service: {err:?}"),
    };

    service.run().await;
}
