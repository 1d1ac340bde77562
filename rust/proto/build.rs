fn main() -> Result<(), Box<dyn std::error::Error>> {
    let proto_paths = ["../../idl/segflow/proto/segflow.proto"];

    tonic_build::configure()
        .emit_rerun_if_changed(true)
        .compile(&proto_paths, &["../../idl/"])?;

    Ok(())
}
