//! What the host can do, decided once at startup.
use crate::checksum::ChecksumKind;
use crate::platform::DeviceBackend;
use crate::unpack::UnpackKind;
use anyhow::{Result, anyhow};
use tracing::info;

/// Host tools the image writer cannot work without.
const REQUIRED_TOOLS: [&str; 2] = ["mount", "umount"];

/// Immutable description of the host, threaded through every component.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HostCapabilities {
    /// The digest the catalog must carry for every image.
    pub checksum: ChecksumKind,
    pub unpack: UnpackKind,
    pub devices: DeviceBackend,
}

impl HostCapabilities {
    /// Probes the host.
    ///
    /// # Errors
    ///
    /// Fails if a tool in [`REQUIRED_TOOLS`] cannot be found on `PATH`.
    pub fn detect() -> Result<Self> {
        let missing: Vec<&str> = REQUIRED_TOOLS
            .into_iter()
            .filter(|tool| which::which(tool).is_err())
            .collect();
        if !missing.is_empty() {
            return Err(anyhow!(
                "Required tools are missing from PATH: {}",
                missing.join(", ")
            ));
        }

        let devices = if which::which("lsblk").is_ok() {
            DeviceBackend::Lsblk
        } else {
            DeviceBackend::Sysfs
        };

        let caps = Self {
            checksum: ChecksumKind::strongest(),
            unpack: UnpackKind::preferred(),
            devices,
        };
        info!(
            "host capabilities: checksum={}, unpack={:?}, devices={:?}",
            caps.checksum, caps.unpack, caps.devices
        );
        Ok(caps)
    }
}
