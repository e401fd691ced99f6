fn main() -> Result<(), Box<dyn std::error::Error>> {
    // protox compiles the vendored proto without needing a protoc binary.
    let descriptors = protox::compile(["proto/csi.proto"], ["proto"])?;
    tonic_build::configure().build_client(false).compile_fds(descriptors)?;
    println!("cargo:rerun-if-changed=proto/csi.proto");
    Ok(())
}
