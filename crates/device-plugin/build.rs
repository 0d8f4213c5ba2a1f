fn main() -> Result<(), Box<dyn std::error::Error>> {
    // the kubelet calls our DevicePlugin service and we call its Registration service
    tonic_build::configure()
        .build_server(true)
        .build_client(true)
        .compile_protos(&["proto/api.proto"], &["proto"])?;
    Ok(())
}
