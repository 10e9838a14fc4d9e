/// Library version, taken from the package manifest
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const VERSION_MAJOR: &str = env!("CARGO_PKG_VERSION_MAJOR");
pub const VERSION_MINOR: &str = env!("CARGO_PKG_VERSION_MINOR");
pub const VERSION_PATCH: &str = env!("CARGO_PKG_VERSION_PATCH");

/// Returns the version as `(major, minor, patch)`
pub fn version_triple() -> (u32, u32, u32) {
    (
        VERSION_MAJOR.parse().unwrap_or(0),
        VERSION_MINOR.parse().unwrap_or(0),
        VERSION_PATCH.parse().unwrap_or(0),
    )
}
