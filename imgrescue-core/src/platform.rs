//! Discovery of removable block devices.
//!
//! Two backends expose the same [`DeviceSource`] capability: one driven by
//! `lsblk`, which reports removable media and transport directly, and one
//! that walks `/sys/block` when `lsblk` is not installed. The backend is
//! picked once, from [`HostCapabilities`](crate::host::HostCapabilities),
//! and the rest of the crate only talks to the trait.

mod lsblk;
mod sysfs;

pub use self::lsblk::LsblkSource;
pub use self::sysfs::SysfsSource;

use crate::device::Device;
use anyhow::Result;

/// A way of listing removable, directly attached block devices.
pub trait DeviceSource {
    /// Lists devices in the backend's native order.
    fn list(&self) -> Result<Vec<Device>>;
}

/// Which device backend the host supports.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeviceBackend {
    Lsblk,
    Sysfs,
}

impl DeviceBackend {
    /// Builds the device source for this backend.
    pub fn source(self) -> Box<dyn DeviceSource> {
        match self {
            DeviceBackend::Lsblk => Box::new(LsblkSource::new()),
            DeviceBackend::Sysfs => Box::new(SysfsSource::new()),
        }
    }
}

/// Joins vendor and model into a single description.
pub(crate) fn describe(vendor: &str, model: &str) -> String {
    [vendor.trim(), model.trim()]
        .into_iter()
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}
