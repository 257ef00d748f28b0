//! Contains the logic for writing a recovery image onto a drive.
//!
//! This module handles the multi-stage process of writing, which includes:
//! 1.  Unmounting everything that is mounted from the target drive.
//! 2.  Locating the root filesystem and kernel partitions inside the image.
//! 3.  Copying the recovery kernel into both kernel slots of the drive.
//! 4.  Raw-copying the root filesystem sectors onto the drive.
//! 5.  Optionally verifying the copied sectors against the image.
//!
//! Step 4 is the point of no return. There is no rollback: if it is
//! interrupted the drive is left in an unknown, possibly unbootable state.
use crate::device::Device;
use crate::download::DownloadArtifact;
use crate::layout::{ImageLayout, KERNEL_PARTITION, PartitionSpan, ROOT_PARTITION};
use crate::mount::{MountSource, Mounter, partition_path};
use anyhow::{Context, Result, anyhow};
use sha2::{Digest, Sha256};
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::os::unix::fs::{FileTypeExt, OpenOptionsExt};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};

const BUFFER_SIZE: usize = 1024 * 1024; // 1 MiB
const BLOCK_SIZE: usize = 512;

/// The kernel shipped inside the image's kernel partition.
pub const RECOVERY_KERNEL: &str = "syslinux/vmlinuz.A";
/// The primary and secondary kernel slots on the drive.
pub const KERNEL_SLOTS: [&str; 2] = ["syslinux/vmlinuz.A", "syslinux/vmlinuz.B"];

fn is_block_device(path: &Path) -> bool {
    fs::metadata(path)
        .map(|m| m.file_type().is_block_device())
        .unwrap_or(false)
}

fn check_running(running: &AtomicBool) -> Result<()> {
    if !running.load(Ordering::SeqCst) {
        return Err(anyhow!("Operation cancelled by user"));
    }
    Ok(())
}

/// Copies the recovery kernel from a mounted image partition into both
/// kernel slots of a mounted drive partition.
pub fn copy_kernel(image_root: &Path, drive_root: &Path) -> Result<()> {
    let kernel = image_root.join(RECOVERY_KERNEL);
    for slot in KERNEL_SLOTS {
        let dest = drive_root.join(slot);
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(&kernel, &dest).with_context(|| {
            format!("failed to copy {} to {}", kernel.display(), dest.display())
        })?;
        debug!("copied recovery kernel to {}", dest.display());
    }
    Ok(())
}

/// Mounts the image's kernel partition and the drive's, patches the kernel
/// slots, and unmounts both again even if the copy failed.
fn patch_kernels(
    image: &Path,
    drive: &Path,
    kernel: PartitionSpan,
    mounter: &dyn Mounter,
) -> Result<()> {
    let image_mount = tempfile::Builder::new().prefix("imgrescue-image").tempdir()?;
    let drive_mount = tempfile::Builder::new().prefix("imgrescue-drive").tempdir()?;

    let source = MountSource::ImageRegion {
        image: image.to_path_buf(),
        offset: kernel.offset(),
        size: kernel.len(),
    };
    mounter
        .mount(&source, image_mount.path(), true)
        .context("could not mount the image's kernel partition")?;

    let result = mounter
        .mount(
            &MountSource::Block(partition_path(drive, KERNEL_PARTITION)),
            drive_mount.path(),
            false,
        )
        .context("could not mount the drive's kernel partition")
        .and_then(|()| {
            let copied = copy_kernel(image_mount.path(), drive_mount.path());
            let unmounted = mounter.unmount(drive_mount.path());
            copied.and(unmounted)
        });

    let unmounted = mounter.unmount(image_mount.path());
    result.and(unmounted)
}

/// Copies `span` of `image` onto the start of `dest`, sector for sector.
///
/// `dest` is opened with `O_DIRECT` when it is a block device.
pub fn copy_sectors<F>(
    image: &Path,
    dest: &Path,
    span: PartitionSpan,
    running: &AtomicBool,
    on_write_start: impl FnOnce(u64),
    mut on_write_progress: F,
) -> Result<()>
where
    F: FnMut(u64),
{
    let mut image_file = File::open(image)?;
    image_file.seek(SeekFrom::Start(span.offset()))?;

    let mut options = OpenOptions::new();
    options.write(true);
    if is_block_device(dest) {
        options.custom_flags(libc::O_DIRECT); // Use O_DIRECT for unbuffered I/O
    }
    let mut device_file = options
        .open(dest)
        .with_context(|| format!("failed to open {}", dest.display()))?;

    let total = span.len();
    on_write_start(total);

    // Align buffer to 512 bytes for O_DIRECT compatibility.
    let mut buf = vec![0u8; BUFFER_SIZE + BLOCK_SIZE];
    let offset = buf.as_ptr().align_offset(BLOCK_SIZE);
    let buffer = &mut buf[offset..offset + BUFFER_SIZE];

    // Spans are whole sectors, so every chunk is a multiple of BLOCK_SIZE.
    let mut written: u64 = 0;
    while written < total {
        check_running(running)?;

        let to_read = std::cmp::min(BUFFER_SIZE as u64, total - written) as usize;
        image_file.read_exact(&mut buffer[..to_read])?;
        device_file.write_all(&buffer[..to_read])?;

        written += to_read as u64;
        on_write_progress(written);
    }

    device_file.sync_all()?;
    Ok(())
}

/// Hashes `span` of `image` and the same number of bytes at the start of
/// `dest` and fails if they differ.
pub fn verify_sectors<F>(
    image: &Path,
    dest: &Path,
    span: PartitionSpan,
    running: &AtomicBool,
    on_verify_start: impl FnOnce(u64),
    mut on_verify_progress: F,
) -> Result<()>
where
    F: FnMut(u64),
{
    let mut image_file = File::open(image)?;
    image_file.seek(SeekFrom::Start(span.offset()))?;
    let mut device_file = File::open(dest)?;

    let total = span.len();
    on_verify_start(total);

    let mut image_hasher = Sha256::new();
    let mut device_hasher = Sha256::new();

    let mut image_buf = vec![0u8; BUFFER_SIZE];
    let mut device_buf = vec![0u8; BUFFER_SIZE];

    let mut remaining = total;
    while remaining > 0 {
        check_running(running)?;

        let chunk = std::cmp::min(BUFFER_SIZE as u64, remaining) as usize;
        image_file.read_exact(&mut image_buf[..chunk])?;
        device_file.read_exact(&mut device_buf[..chunk])?;

        image_hasher.update(&image_buf[..chunk]);
        device_hasher.update(&device_buf[..chunk]);

        remaining -= chunk as u64;
        on_verify_progress(total - remaining);
    }

    if image_hasher.finalize() != device_hasher.finalize() {
        return Err(anyhow!("Verification failed: hash mismatch."));
    }
    Ok(())
}

/// Writes a verified recovery image onto `device`.
///
/// This is the main entry point for the writing process. It orchestrates
/// the unmount, kernel patch, raw copy and verification stages, reporting
/// progress for the long-running ones via callbacks.
///
/// # Arguments
///
/// * `artifact` - The unpacked, checksum-verified image.
/// * `device` - The drive to overwrite.
/// * `mounter` - Mount primitives used to unmount the drive and patch kernels.
/// * `verify` - If `true`, the copied sectors are read back and compared.
/// * `running` - An `Arc<AtomicBool>` to allow for graceful cancellation.
/// * `on_write_start` - Closure called when the raw copy begins, with its size.
/// * `on_write_progress` - Closure called with the number of bytes written.
/// * `on_verify_start` - Closure called when verification begins, with its size.
/// * `on_verify_progress` - Closure called with the number of bytes verified.
///
/// # Errors
///
/// This function will return an error if:
/// - A partition of the drive cannot be unmounted.
/// - The image is not a GPT image with root and kernel partitions.
/// - The kernel slots cannot be patched.
/// - An I/O error occurs during the copy.
/// - The verification hash does not match.
/// - The operation is cancelled.
#[allow(clippy::too_many_arguments)]
pub fn run<F1, F2>(
    artifact: &DownloadArtifact,
    device: &Device,
    mounter: &dyn Mounter,
    verify: bool,
    running: Arc<AtomicBool>,
    on_write_start: impl FnOnce(u64),
    on_write_progress: F1,
    on_verify_start: impl FnOnce(u64),
    on_verify_progress: F2,
) -> Result<()>
where
    F1: FnMut(u64),
    F2: FnMut(u64),
{
    info!(
        "writing {} to {}",
        artifact.path.display(),
        device.path.display()
    );
    mounter
        .unmount_device(&device.path)
        .with_context(|| format!("Could not unmount {}", device.path.display()))?;

    let layout = ImageLayout::read(&artifact.path)?;
    if layout.root.is_empty() {
        return Err(anyhow!("The image's root filesystem partition is empty."));
    }

    patch_kernels(&artifact.path, &device.path, layout.kernel, mounter)?;

    let root = partition_path(&device.path, ROOT_PARTITION);
    info!(
        "copying {} sectors from sector {} onto {}",
        layout.root.count,
        layout.root.start,
        root.display()
    );
    if let Err(e) = copy_sectors(
        &artifact.path,
        &root,
        layout.root,
        &running,
        on_write_start,
        on_write_progress,
    ) {
        warn!("raw copy onto {} failed: {:#}", root.display(), e);
        return Err(e);
    }

    if verify {
        verify_sectors(
            &artifact.path,
            &root,
            layout.root,
            &running,
            on_verify_start,
            on_verify_progress,
        )?;
    }

    Ok(())
}
