use std::fmt;
use std::path::PathBuf;

/// Represents a removable block device discovered on the system.
///
/// This struct is populated by one of the device backends in the
/// [`crate::platform`] module and only lives for a single scan.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Device {
    /// The system path to the device (e.g., `/dev/sdb`).
    pub path: PathBuf,
    /// The kernel-provided name of the device (e.g., "sdb").
    pub name: String,
    /// The total size of the device in MiB.
    pub size_mb: u64,
    /// Vendor and model as reported by the device.
    pub description: String,
    pub removable: bool,
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let description = if self.description.is_empty() {
            "(unknown device)"
        } else {
            &self.description
        };

        write!(
            f,
            "{:<12} {:<30} {} MB",
            self.path.display(),
            description,
            self.size_mb
        )
    }
}
