//! Mounting and unmounting, delegated to the host's `mount`/`umount`.
use anyhow::{Context, Result, anyhow};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, info};

/// Something that can be mounted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MountSource {
    /// A block device node, e.g. `/dev/sdb12`.
    Block(PathBuf),
    /// A byte range of a disk image, attached through a loop device.
    ImageRegion {
        image: PathBuf,
        offset: u64,
        size: u64,
    },
}

/// Mount primitives the image writer depends on.
pub trait Mounter {
    /// Unmounts every mounted partition of `device`.
    fn unmount_device(&self, device: &Path) -> Result<()>;
    fn mount(&self, source: &MountSource, target: &Path, read_only: bool) -> Result<()>;
    fn unmount(&self, target: &Path) -> Result<()>;
}

/// Path of partition `number` on `device`
/// (`/dev/sdb` -> `/dev/sdb3`, `/dev/mmcblk0` -> `/dev/mmcblk0p3`).
pub fn partition_path(device: &Path, number: u32) -> PathBuf {
    let base = device.to_string_lossy();
    if base.ends_with(|c: char| c.is_ascii_digit()) {
        PathBuf::from(format!("{base}p{number}"))
    } else {
        PathBuf::from(format!("{base}{number}"))
    }
}

/// Finds mount points whose source is `device` or one of its partitions.
pub(crate) fn mounts_of(mounts: &str, device: &Path) -> Vec<PathBuf> {
    let device = device.to_string_lossy();
    mounts
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let source = fields.next()?;
            let target = fields.next()?;
            let rest = source.strip_prefix(device.as_ref())?;
            let is_partition = rest.is_empty()
                || rest.trim_start_matches('p').chars().all(|c| c.is_ascii_digit());
            is_partition.then(|| PathBuf::from(target.replace("\\040", " ")))
        })
        .collect()
}

/// [`Mounter`] backed by the host tools.
pub struct SystemMounter;

impl SystemMounter {
    fn run(mut command: Command) -> Result<()> {
        debug!("running {:?}", command);
        let output = command
            .output()
            .with_context(|| format!("failed to run {:?}", command.get_program()))?;
        if !output.status.success() {
            return Err(anyhow!(
                "{:?} failed: {}",
                command.get_program(),
                String::from_utf8_lossy(&output.stderr).trim()
            ));
        }
        Ok(())
    }
}

impl Mounter for SystemMounter {
    fn unmount_device(&self, device: &Path) -> Result<()> {
        let mounts =
            fs::read_to_string("/proc/mounts").context("failed to read /proc/mounts")?;
        // Deepest mount points first, so nested mounts come off cleanly.
        let mut targets = mounts_of(&mounts, device);
        targets.sort_by_key(|t| std::cmp::Reverse(t.components().count()));

        for target in targets {
            info!("unmounting {}", target.display());
            self.unmount(&target)
                .with_context(|| format!("could not unmount {}", target.display()))?;
        }
        Ok(())
    }

    fn mount(&self, source: &MountSource, target: &Path, read_only: bool) -> Result<()> {
        let mut command = Command::new("mount");
        let mut options = vec![if read_only { "ro" } else { "rw" }.to_string()];
        let device = match source {
            MountSource::Block(device) => device.clone(),
            MountSource::ImageRegion {
                image,
                offset,
                size,
            } => {
                options.push("loop".into());
                options.push(format!("offset={offset}"));
                options.push(format!("sizelimit={size}"));
                image.clone()
            }
        };
        command.arg("-o").arg(options.join(",")).arg(device).arg(target);
        Self::run(command)
    }

    fn unmount(&self, target: &Path) -> Result<()> {
        let mut command = Command::new("umount");
        command.arg(target);
        Self::run(command)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partition_naming() {
        assert_eq!(partition_path(Path::new("/dev/sdb"), 3), PathBuf::from("/dev/sdb3"));
        assert_eq!(
            partition_path(Path::new("/dev/mmcblk0"), 12),
            PathBuf::from("/dev/mmcblk0p12")
        );
        assert_eq!(
            partition_path(Path::new("/dev/nvme0n1"), 3),
            PathBuf::from("/dev/nvme0n1p3")
        );
    }

    #[test]
    fn finds_mounts_of_a_device_and_its_partitions() {
        let mounts = "\
/dev/sda2 / ext4 rw 0 0
/dev/sdb1 /media/usb\\040stick vfat rw 0 0
/dev/sdb12 /media/efi vfat rw 0 0
/dev/sdbb1 /media/other vfat rw 0 0
/dev/mmcblk0p1 /boot vfat rw 0 0
";
        assert_eq!(
            mounts_of(mounts, Path::new("/dev/sdb")),
            [PathBuf::from("/media/usb stick"), PathBuf::from("/media/efi")]
        );
        assert_eq!(
            mounts_of(mounts, Path::new("/dev/mmcblk0")),
            [PathBuf::from("/boot")]
        );
        assert!(mounts_of(mounts, Path::new("/dev/sdc")).is_empty());
    }
}
