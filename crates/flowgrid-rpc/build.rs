fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Vendored protoc and well-known types, so no system install is needed.
    let mut config = prost_build::Config::new();
    config.protoc_executable(protoc_bin_vendored::protoc_bin_path()?);
    let includes = [
        std::path::PathBuf::from("proto"),
        protoc_bin_vendored::include_path()?,
    ];

    tonic_build::configure()
        .build_server(false)
        .compile_protos_with_config(config, &["proto/worker.proto"], &includes)?;
    Ok(())
}
