use super::{DeviceSource, describe};
use crate::MB;
use crate::device::Device;
use anyhow::{Context, Result};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Helper to read a specific attribute below a `/sys/block/<device>` entry.
fn read_sys_file(root: &Path, device_name: &str, file: &str) -> io::Result<String> {
    let path = root.join(device_name).join(file);
    fs::read_to_string(path).map(|s| s.trim().to_string())
}

/// Helper to find the parent device of a partition (e.g., /dev/sda1 -> /dev/sda).
/// This is used to find the system drive's parent for exclusion.
fn get_parent_device_path(path: &Path) -> PathBuf {
    let path_str = path.to_string_lossy();

    if path_str.starts_with("/dev/sd") || path_str.starts_with("/dev/vd") {
        if let Some(index) = path_str.rfind(|c: char| c.is_alphabetic()) {
            return PathBuf::from(&path_str[..=index]);
        }
    } else if path_str.starts_with("/dev/mmcblk") || path_str.starts_with("/dev/nvme") {
        if let Some(index) = path_str.rfind('p') {
            return PathBuf::from(&path_str[..index]);
        }
    }

    path.to_path_buf()
}

/// Finds the disk that holds the root filesystem, so it is never offered.
fn find_system_disk() -> Option<PathBuf> {
    let disks = sysinfo::Disks::new_with_refreshed_list();
    disks
        .iter()
        .find(|disk| disk.mount_point() == Path::new("/"))
        .map(|disk| get_parent_device_path(&PathBuf::from("/dev/").join(disk.name())))
}

/// Generic block-device backend scanning `/sys/block`.
///
/// A device is offered when:
/// 1.  It is not a loop device and not the disk holding `/`.
/// 2.  `/sys/block/<device>/removable` is `1`.
/// 3.  Its resolved sysfs path runs through a USB bus, i.e. it is directly
///     attached rather than behind a card reader on an internal bus.
/// 4.  `/sys/block/<device>/size` is non-zero, which filters out empty
///     card readers.
pub struct SysfsSource {
    root: PathBuf,
    dev_dir: PathBuf,
    system_disk: Option<PathBuf>,
}

impl SysfsSource {
    pub fn new() -> Self {
        let system_disk = find_system_disk();
        if system_disk.is_none() {
            warn!("could not determine the system drive");
        }
        Self {
            root: PathBuf::from("/sys/block"),
            dev_dir: PathBuf::from("/dev"),
            system_disk,
        }
    }

    /// Scans an alternative sysfs tree. Used by tests.
    pub fn with_root(root: impl Into<PathBuf>, dev_dir: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            dev_dir: dev_dir.into(),
            system_disk: None,
        }
    }

    fn is_directly_attached(&self, device_name: &str) -> bool {
        fs::canonicalize(self.root.join(device_name))
            .map(|p| p.to_string_lossy().contains("/usb"))
            .unwrap_or(false)
    }
}

impl Default for SysfsSource {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceSource for SysfsSource {
    fn list(&self) -> Result<Vec<Device>> {
        let block_dir = fs::read_dir(&self.root)
            .with_context(|| format!("failed to read {}", self.root.display()))?;

        let mut names: Vec<String> = block_dir
            .filter_map(Result::ok)
            .map(|entry| entry.file_name().to_string_lossy().to_string())
            .collect();
        names.sort();

        let mut devices = Vec::new();
        for device_name in names {
            let device_path = self.dev_dir.join(&device_name);

            if device_name.starts_with("loop") || Some(&device_path) == self.system_disk.as_ref() {
                continue;
            }

            let is_removable = read_sys_file(&self.root, &device_name, "removable")
                .map(|s| s == "1")
                .unwrap_or(false);

            if !is_removable || !self.is_directly_attached(&device_name) {
                debug!("skipping {}: not a removable USB device", device_name);
                continue;
            }

            let size_sectors = read_sys_file(&self.root, &device_name, "size")
                .ok()
                .and_then(|s| s.parse::<u64>().ok())
                .unwrap_or(0);

            if size_sectors == 0 {
                continue;
            }

            let vendor = read_sys_file(&self.root, &device_name, "device/vendor").unwrap_or_default();
            let model = read_sys_file(&self.root, &device_name, "device/model").unwrap_or_default();

            devices.push(Device {
                path: device_path,
                name: device_name,
                size_mb: size_sectors * 512 / MB,
                description: describe(&vendor, &model),
                removable: true,
            });
        }

        Ok(devices)
    }
}
