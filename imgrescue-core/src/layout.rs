//! Locating partitions inside a GPT disk image.
use anyhow::{Context, Result, anyhow, bail};
use gpt_disk_io::{BlockIo, BlockIoAdapter, Disk};
use gpt_disk_types::BlockSize;
use std::collections::BTreeMap;
use std::fs::File;
use std::path::Path;
use tracing::debug;

pub const SECTOR_SIZE: u64 = 512;

/// Partition holding the root filesystem.
pub const ROOT_PARTITION: u32 = 3;
/// Partition holding the bootloader and kernel slots.
pub const KERNEL_PARTITION: u32 = 12;

/// A contiguous run of 512-byte sectors.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PartitionSpan {
    pub start: u64,
    pub count: u64,
}

impl PartitionSpan {
    /// Byte offset of the first sector.
    pub fn offset(&self) -> u64 {
        self.start * SECTOR_SIZE
    }

    /// Length in bytes.
    pub fn len(&self) -> u64 {
        self.count * SECTOR_SIZE
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}

/// Where the writer finds what it needs inside the image.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ImageLayout {
    pub root: PartitionSpan,
    pub kernel: PartitionSpan,
}

impl ImageLayout {
    /// Reads the primary GPT of `image`.
    pub fn read(image: &Path) -> Result<Self> {
        let mut partitions = read_partitions(image)?;
        let mut take = |number: u32| {
            partitions
                .remove(&number)
                .ok_or_else(|| anyhow!("{} has no partition {}", image.display(), number))
        };
        let layout = Self {
            root: take(ROOT_PARTITION)?,
            kernel: take(KERNEL_PARTITION)?,
        };
        debug!("image layout: {:?}", layout);
        Ok(layout)
    }
}

/// Reads every used entry of the primary GPT, keyed by 1-based partition
/// number.
pub fn read_partitions(image: &Path) -> Result<BTreeMap<u32, PartitionSpan>> {
    let mut file =
        File::open(image).with_context(|| format!("failed to open {}", image.display()))?;
    let mut block_io = BlockIoAdapter::new(&mut file, BlockSize::BS_512);
    if block_io.num_blocks().map_err(|e| anyhow!("{e:?}"))? < 2 {
        bail!("{} is too small to be a disk image", image.display());
    }
    let mut disk = Disk::new(block_io).map_err(|e| anyhow!("{e:?}"))?;

    let mut block_buf = [0u8; SECTOR_SIZE as usize];
    let header = disk
        .read_primary_gpt_header(&mut block_buf)
        .map_err(|e| anyhow!("failed to read GPT header: {e:?}"))?;
    if !header.is_signature_valid() {
        bail!("{} is not a GPT disk image", image.display());
    }

    let layout = header
        .get_partition_entry_array_layout()
        .map_err(|e| anyhow!("invalid GPT partition array: {e:?}"))?;

    let mut partitions = BTreeMap::new();
    let entries = disk
        .gpt_partition_entry_array_iter(layout, &mut block_buf)
        .map_err(|e| anyhow!("failed to read GPT partitions: {e:?}"))?;
    for (index, entry) in entries.enumerate() {
        let entry = entry.map_err(|e| anyhow!("failed to read GPT partition: {e:?}"))?;
        if !entry.is_used() {
            continue;
        }
        let start = entry.starting_lba.to_u64();
        let end = entry.ending_lba.to_u64();
        if end < start {
            bail!("partition {} ends before it starts", index + 1);
        }
        partitions.insert(
            index as u32 + 1,
            PartitionSpan {
                start,
                count: end - start + 1,
            },
        );
    }
    Ok(partitions)
}
