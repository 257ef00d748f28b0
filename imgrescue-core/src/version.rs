//! Checks that the catalog was published for this version of the tool.
use thiserror::Error;

/// The catalog format version this build understands.
pub const RECOVERY_TOOL_VERSION: &str = "0.9.2";

const GENERIC_REMEDIATION: &str =
    "Please download a version of this tool that matches the recovery catalog.";

#[derive(Debug, Error, PartialEq, Eq)]
#[error(
    "This tool is version {build} but the recovery catalog requires version {declared}.\n{remediation}"
)]
pub struct VersionMismatch {
    pub declared: String,
    pub build: String,
    pub remediation: String,
}

/// Requires `declared` and `build` to be byte-for-byte equal.
pub fn check(
    declared: &str,
    build: &str,
    remediation: Option<&str>,
) -> Result<(), VersionMismatch> {
    if declared == build {
        return Ok(());
    }
    Err(VersionMismatch {
        declared: declared.to_string(),
        build: build.to_string(),
        remediation: remediation
            .filter(|r| !r.trim().is_empty())
            .unwrap_or(GENERIC_REMEDIATION)
            .to_string(),
    })
}
