fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Vendored protoc, no system installation required
    let protoc = protoc_bin_vendored::protoc_bin_path()?;
    std::env::set_var("PROTOC", protoc);

    tonic_prost_build::configure()
        .build_client(true)
        .build_server(true)
        .compile_protos(&["src/proto/lockbox.proto"], &["src/proto"])?;

    println!("cargo:rerun-if-changed=src/proto/lockbox.proto");
    Ok(())
}
