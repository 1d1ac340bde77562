use segflow_datacoord::data_coord_service_entrypoint;

#[tokio::main]
async fn main() {
    Box::pin(data_coord_service_entrypoint()).await;
}
