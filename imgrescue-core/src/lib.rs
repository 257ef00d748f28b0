//! The core, UI-agnostic library for the `imgrescue` recovery media tool.
//!
//! `imgrescue-core` does everything between "here is a catalog URL" and
//! "the drive now holds a recovery image", without ever touching the
//! terminal. Front-ends plug in through a few seams: a [`select::Prompter`]
//! for questions, a [`fetch::Fetcher`] for transfers, a
//! [`platform::DeviceSource`] for drive discovery and a [`mount::Mounter`]
//! for mounts. Long-running stages report progress via callbacks.
//!
//! The library is structured into several key modules:
//! - [`catalog`] and [`version`]: parsing and validating the remote catalog.
//! - [`select`] and [`state`]: the paged chooser and what it remembers
//!   between runs.
//! - [`download`]: fetching, verifying and unpacking the chosen image, built
//!   on [`fetch`], [`checksum`] and [`unpack`].
//! - [`platform`]: discovering removable drives.
//! - [`mod@write`]: writing the image onto a drive, built on [`layout`] and
//!   [`mount`].
//!
//! ## Example: Writing a Downloaded Image
//!
//! ```rust,no_run
//! use imgrescue_core::{download::DownloadArtifact, mount::SystemMounter, write};
//! use imgrescue_core::platform::{DeviceBackend, DeviceSource};
//! use std::sync::{Arc, atomic::AtomicBool};
//! use anyhow::Result;
//!
//! fn main() -> Result<()> {
//!     let artifact = DownloadArtifact {
//!         path: "work/recovery.bin".into(),
//!         size: 1_500_000_000,
//!         checksum_verified: true,
//!         required_mb: 1431,
//!     };
//!     let devices = DeviceBackend::Sysfs.source().list()?;
//!     let drive = devices.first().expect("No removable devices found.");
//!
//!     // A shared flag to allow for graceful cancellation.
//!     let running = Arc::new(AtomicBool::new(true));
//!
//!     write::run(
//!         &artifact,
//!         drive,
//!         &SystemMounter,
//!         true, // Read the copy back and compare
//!         running,
//!         |_| {}, // on_write_start
//!         |written| println!("{} bytes written", written),
//!         |_| {}, // on_verify_start
//!         |_| {}, // on_verify_progress
//!     )?;
//!
//!     Ok(())
//! }
//! ```

pub mod catalog;
pub mod checksum;
pub mod device;
pub mod download;
pub mod fetch;
pub mod host;
pub mod layout;
pub mod mount;
pub mod platform;
pub mod remedy;
pub mod select;
pub mod state;
pub mod unpack;
pub mod version;
pub mod write;

/// One megabyte as used in every size shown to the user (1 MiB).
pub const MB: u64 = 1024 * 1024;

/// `bytes` in whole megabytes, rounded up.
pub fn mb_ceil(bytes: u64) -> u64 {
    bytes.div_ceil(MB)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn megabytes_round_up() {
        assert_eq!(mb_ceil(0), 0);
        assert_eq!(mb_ceil(1), 1);
        assert_eq!(mb_ceil(MB), 1);
        assert_eq!(mb_ceil(MB + 1), 2);
        assert_eq!(mb_ceil(1431 * MB), 1431);
    }
}
