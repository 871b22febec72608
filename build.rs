fn main() -> Result<(), Box<dyn std::error::Error>> {
    // The server half is only used by the in-crate tests.
    tonic_prost_build::configure()
        .server_mod_attribute("dtprotos", "#[cfg(test)]")
        .compile_protos(&["proto/device.proto"], &["proto"])?;
    Ok(())
}
