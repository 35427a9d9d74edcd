//! Release asset naming
//!
//! Binaries are published as `ciwi-<os>-<arch>[.exe]` with Go-style platform
//! names.

/// Candidate names of the checksum listing, in lookup order
pub const CHECKSUM_ASSETS: [&str; 2] = ["ciwi-checksums.txt", "checksums.txt"];

/// Normalise an OS name to its release spelling
pub fn normalize_os(os: &str) -> &str {
    match os {
        "macos" | "darwin" => "darwin",
        other => other,
    }
}

/// Normalise an architecture name to its release spelling
pub fn normalize_arch(arch: &str) -> &str {
    match arch {
        "x86_64" | "amd64" => "amd64",
        "aarch64" | "arm64" => "arm64",
        other => other,
    }
}

/// Asset name for `(os, arch)`, or `None` for unsupported hosts
pub fn asset_name(os: &str, arch: &str) -> Option<String> {
    let os = normalize_os(os);
    let arch = normalize_arch(arch);

    match (os, arch) {
        ("linux" | "darwin", "amd64" | "arm64") => Some(format!("ciwi-{os}-{arch}")),
        ("windows", "amd64" | "arm64") => Some(format!("ciwi-{os}-{arch}.exe")),
        _ => None,
    }
}

/// Asset name of the running host
pub fn current_asset_name() -> Option<String> {
    asset_name(std::env::consts::OS, std::env::consts::ARCH)
}
