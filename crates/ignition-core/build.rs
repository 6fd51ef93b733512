//! Build script for ignition-core.
//!
//! Compiles the machine API protobuf subset into client code.
#![allow(clippy::disallowed_methods)]
#![allow(clippy::disallowed_macros)]

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tonic_build::configure()
        // Only the client side is needed; nodes serve the API.
        .build_server(false)
        .build_client(true)
        .compile_protos(
            &["proto/common.proto", "proto/machine.proto", "proto/cluster.proto"],
            &["proto/"],
        )?;

    println!("cargo:rerun-if-changed=proto/");

    Ok(())
}
