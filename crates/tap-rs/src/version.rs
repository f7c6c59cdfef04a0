//! Build-time version information.
//!
//! The values are baked into the binary at compile time and written into the
//! `X-TAP` header of every proxied response. `TAP_VERSION_HASH` and
//! `TAP_BUILD_DATE` can be injected by the build pipeline; local builds fall
//! back to a recognizable placeholder.

/// Build information for the running proxy.
#[derive(Debug, Clone, Copy)]
pub struct BuildInfo {
    /// Semantic version, taken from the crate manifest.
    pub version: &'static str,
    /// Git revision this build was produced from.
    pub version_hash: &'static str,
    /// Date the binary was built.
    pub build_date: &'static str,
}

const UNKNOWN: &str = "Unknown/CustomBuild";

/// Build information of this compilation.
pub const BUILD_INFO: BuildInfo = BuildInfo {
    version: env!("CARGO_PKG_VERSION"),
    version_hash: match option_env!("TAP_VERSION_HASH") {
        Some(hash) => hash,
        None => UNKNOWN,
    },
    build_date: match option_env!("TAP_BUILD_DATE") {
        Some(date) => date,
        None => UNKNOWN,
    },
};
