//! Build script for sitepack-stub.
//!
//! Writes the compiled-in fallback payload to `OUT_DIR`. Set
//! `SITEPACK_EMBED_PAYLOAD` to a zip archive to bake it into the stub;
//! otherwise the fallback is empty and only appended payloads are used.

use std::path::PathBuf;

fn main() {
    println!("cargo:rerun-if-env-changed=SITEPACK_EMBED_PAYLOAD");

    let out_dir = PathBuf::from(std::env::var_os("OUT_DIR").expect("OUT_DIR not set"));
    let dest = out_dir.join("embedded_payload.bin");

    let payload = match std::env::var_os("SITEPACK_EMBED_PAYLOAD") {
        Some(path) if !path.is_empty() => {
            let path = PathBuf::from(path);
            println!("cargo:rerun-if-changed={}", path.display());
            std::fs::read(&path)
                .unwrap_or_else(|e| panic!("failed to read {}: {}", path.display(), e))
        }
        _ => Vec::new(),
    };

    std::fs::write(&dest, payload).expect("failed to write embedded payload");
}
