// Locates the system libcec when the `libcec` feature is enabled and derives the
// capability flags the crate needs from its version.
// The link itself is emitted by libcec-sys.
use std::env;
use std::process::Command;

const LIBCEC_PKG: &str = "libcec";
// cec_adapter_descriptor (detect_adapters) is only reliable from 4.x onwards
const DESCRIPTOR_MIN_MAJOR: u32 = 4;

fn probe_version() -> Result<String, String> {
    let output = Command::new("pkg-config")
        .args(["--modversion", LIBCEC_PKG])
        .output()
        .map_err(|e| format!("failed to run pkg-config: {}", e))?;

    if !output.status.success() {
        return Err(format!("pkg-config could not find {}", LIBCEC_PKG));
    }

    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

fn parse_major(version: &str) -> Option<u32> {
    version.split('.').next()?.parse().ok()
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-env-changed=PKG_CONFIG_PATH");

    if env::var_os("CARGO_FEATURE_LIBCEC").is_none() {
        return;
    }

    let major = match probe_version() {
        Ok(version) => {
            println!("cargo:rustc-env=CEC_LIB_VERSION={}", version);
            parse_major(&version)
        }
        Err(e) => {
            // libcec-sys builds its bundled copy in that case, which is always recent enough
            println!("cargo:warning={}, assuming the bundled libcec", e);
            println!("cargo:rustc-env=CEC_LIB_VERSION=bundled");
            None
        }
    };

    if major.map_or(true, |major| major >= DESCRIPTOR_MIN_MAJOR) {
        println!("cargo:rustc-cfg=cec_adapter_descriptor");
    }
}
