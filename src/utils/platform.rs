//! Platform identification for package resolvers.
//!
//! Resolvers and URL templates use Go-style naming (`linux`/`darwin`,
//! `amd64`/`arm64`) because the registry ecosystem this plugs into publishes
//! artifacts under those names.

/// Operating system string as resolvers expect it.
pub fn os() -> &'static str {
    if cfg!(target_os = "macos") {
        "darwin"
    } else if cfg!(target_os = "windows") {
        "windows"
    } else {
        "linux"
    }
}

/// CPU architecture string as resolvers expect it.
pub fn arch() -> &'static str {
    if cfg!(target_arch = "aarch64") {
        "arm64"
    } else if cfg!(target_arch = "x86_64") {
        "amd64"
    } else if cfg!(target_arch = "x86") {
        "386"
    } else {
        std::env::consts::ARCH
    }
}
