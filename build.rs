fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("cargo:rerun-if-changed=proto/platform.proto");
    println!("cargo:rerun-if-changed=migrations");

    tonic_build::configure()
        .build_server(true)
        .build_client(true) // bera-cli and the test harness talk to the server
        .compile(&["proto/platform.proto"], &["proto"])?;
    Ok(())
}
