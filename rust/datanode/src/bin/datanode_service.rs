use segflow_datanode::data_node_service_entrypoint;

#[tokio::main]
async fn main() {
    Box::pin(data_node_service_entrypoint()).await;
}
