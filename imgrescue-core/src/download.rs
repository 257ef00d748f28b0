//! Fetching, verifying and unpacking the chosen image.
//!
//! [`acquire`] runs the whole pipeline for one catalog stanza:
//! 1.  Check there is room in the work directory for the container and the
//!     unpacked image together.
//! 2.  Ask the user what to do if this exact URL was fetched last time.
//! 3.  Fetch the container, resuming a partial file if one is present.
//! 4.  Check the container size and digest.
//! 5.  Unpack the image and check its size.
//!
//! Nothing is unpacked unless the container passed both checks.
use crate::catalog::ImageStanza;
use crate::checksum::{self, ChecksumKind};
use crate::fetch::{FetchError, Fetcher, fetch_resumable};
use crate::host::HostCapabilities;
use crate::state::StateStore;
use crate::unpack;
use crate::{MB, mb_ceil};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use thiserror::Error;
use tracing::{debug, info, warn};

/// The verified, unpacked image ready to be written.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DownloadArtifact {
    pub path: PathBuf,
    /// Size of the unpacked image in bytes.
    pub size: u64,
    pub checksum_verified: bool,
    /// Capacity, in MiB, a drive needs to hold the image.
    pub required_mb: u64,
}

/// What to do when the selected image was already fetched by a previous run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RepeatChoice {
    Quit,
    Redownload,
    /// Forget the previous choice so the user can pick again on the next run.
    Restart,
}

#[derive(Debug, Error)]
pub enum AcquireError {
    #[error(
        "Not enough free space in {}: {available_mb} MB available, {required_mb} MB needed.",
        .dir.display()
    )]
    InsufficientSpace {
        dir: PathBuf,
        available_mb: u64,
        required_mb: u64,
    },
    #[error("Download failed: {0}")]
    FetchFailed(#[source] FetchError),
    #[error("Downloaded file {} is {actual} bytes, expected {expected}.", .path.display())]
    SizeMismatch {
        path: PathBuf,
        expected: u64,
        actual: u64,
    },
    #[error("{kind} checksum of {} is {actual}, expected {expected}.", .path.display())]
    ChecksumMismatch {
        path: PathBuf,
        kind: ChecksumKind,
        expected: String,
        actual: String,
    },
    #[error("Unpacking {file} failed: {reason}")]
    UnpackFailed { file: String, reason: String },
    #[error("The catalog entry has no {0} checksum.")]
    MissingChecksum(ChecksumKind),
    #[error("Cannot derive a file name from {0}")]
    BadUrl(String),
    #[error("Operation cancelled by user")]
    Cancelled,
    #[error("Your previous choice was reset. Please run this tool again to pick a new image.")]
    RestartRequested,
    #[error("Could not update saved state: {0}")]
    State(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl From<FetchError> for AcquireError {
    fn from(e: FetchError) -> Self {
        match e {
            FetchError::Cancelled => AcquireError::Cancelled,
            other => AcquireError::FetchFailed(other),
        }
    }
}

/// Progress callbacks for the download stage.
pub struct DownloadProgress<S, P> {
    /// Called with the resume offset and the expected total, if known.
    pub on_start: S,
    /// Called with the number of bytes on disk.
    pub on_progress: P,
}

/// Free space in MiB on the filesystem holding `dir`.
pub fn available_mb(dir: &Path) -> io::Result<u64> {
    let stat = nix::sys::statvfs::statvfs(dir).map_err(io::Error::from)?;
    let bytes = stat.blocks_available() as u64 * stat.fragment_size() as u64;
    Ok(bytes / MB)
}

/// Fails unless `available_mb` can hold `required_mb`.
pub fn check_space(dir: &Path, available_mb: u64, required_mb: u64) -> Result<(), AcquireError> {
    if available_mb < required_mb {
        return Err(AcquireError::InsufficientSpace {
            dir: dir.to_path_buf(),
            available_mb,
            required_mb,
        });
    }
    Ok(())
}

/// The local file name for a download: the last path segment of `url`.
pub fn file_name_from_url(url: &str) -> Option<&str> {
    let path = url.split(['?', '#']).next()?;
    let name = path.rsplit('/').next()?;
    (!name.is_empty() && path.contains('/')).then_some(name)
}

/// Space, in MiB, needed for the container and the unpacked image together.
/// Sizes too large to add up saturate, so they can never fit.
pub fn required_space_mb(stanza: &ImageStanza) -> u64 {
    stanza
        .zip_file_size
        .checked_add(stanza.file_size)
        .map_or(u64::MAX, mb_ceil)
}

/// Removes a container that is already as long as the catalog says or
/// longer. Only a shorter file can be the tail of an interrupted transfer.
fn discard_complete(container: &Path, expected: u64) -> io::Result<()> {
    match fs::metadata(container) {
        Ok(meta) if meta.len() >= expected => {
            info!(
                "discarding {} ({} bytes) before fetching it again",
                container.display(),
                meta.len()
            );
            fs::remove_file(container)
        }
        Ok(_) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// Downloads, verifies and unpacks `stanza` into `work_dir`.
///
/// `on_repeat` is only consulted when `stanza.url` is the URL recorded by
/// the previous run.
#[allow(clippy::too_many_arguments)]
pub fn acquire<S, P>(
    stanza: &ImageStanza,
    work_dir: &Path,
    caps: &HostCapabilities,
    store: &StateStore,
    fetcher: &dyn Fetcher,
    running: &Arc<AtomicBool>,
    on_repeat: impl FnOnce(&ImageStanza) -> RepeatChoice,
    progress: DownloadProgress<S, P>,
) -> Result<DownloadArtifact, AcquireError>
where
    S: FnOnce(u64, Option<u64>),
    P: FnMut(u64),
{
    let required_mb = required_space_mb(stanza);
    let available = available_mb(work_dir)?;
    debug!("{} MB free in {}, {} MB needed", available, work_dir.display(), required_mb);
    check_space(work_dir, available, required_mb)?;

    let container_name =
        file_name_from_url(&stanza.url).ok_or_else(|| AcquireError::BadUrl(stanza.url.clone()))?;
    let container = work_dir.join(container_name);

    confirm_fresh_url(stanza, store, on_repeat)?;
    discard_complete(&container, stanza.zip_file_size)?;

    info!("fetching {} into {}", stanza.url, container.display());
    fetch_resumable(
        fetcher,
        &stanza.url,
        &container,
        running,
        progress.on_start,
        progress.on_progress,
    )?;

    verify_container(stanza, &container, caps.checksum)?;

    info!("unpacking {} from {}", stanza.file, container.display());
    let image = unpack::unpack(caps.unpack, &container, &stanza.file, work_dir).map_err(|e| {
        AcquireError::UnpackFailed {
            file: stanza.file.clone(),
            reason: e.to_string(),
        }
    })?;

    let size = fs::metadata(&image)?.len();
    if size != stanza.file_size {
        return Err(AcquireError::UnpackFailed {
            file: stanza.file.clone(),
            reason: format!("unpacked {size} bytes, expected {}", stanza.file_size),
        });
    }

    Ok(DownloadArtifact {
        path: image,
        size,
        checksum_verified: true,
        required_mb: mb_ceil(stanza.file_size),
    })
}

fn state_error(e: anyhow::Error) -> AcquireError {
    AcquireError::State(format!("{e:#}"))
}

fn confirm_fresh_url(
    stanza: &ImageStanza,
    store: &StateStore,
    on_repeat: impl FnOnce(&ImageStanza) -> RepeatChoice,
) -> Result<(), AcquireError> {
    let last = store.last_url().map_err(state_error)?;
    if last.as_deref() != Some(stanza.url.as_str()) {
        return store.set_last_url(&stanza.url).map_err(state_error);
    }

    match on_repeat(stanza) {
        RepeatChoice::Quit => Err(AcquireError::Cancelled),
        RepeatChoice::Redownload => Ok(()),
        RepeatChoice::Restart => {
            store.clear_has_run().map_err(state_error)?;
            Err(AcquireError::RestartRequested)
        }
    }
}

/// Checks the downloaded container against the catalog's size and digest.
pub fn verify_container(
    stanza: &ImageStanza,
    container: &Path,
    kind: ChecksumKind,
) -> Result<(), AcquireError> {
    let actual = fs::metadata(container)?.len();
    if actual != stanza.zip_file_size {
        return Err(AcquireError::SizeMismatch {
            path: container.to_path_buf(),
            expected: stanza.zip_file_size,
            actual,
        });
    }

    let expected = stanza
        .digest(kind)
        .ok_or(AcquireError::MissingChecksum(kind))?;
    let digest = checksum::digest_file(container, kind)?;
    if !checksum::matches(expected, &digest) {
        warn!("{} mismatch for {}", kind, container.display());
        return Err(AcquireError::ChecksumMismatch {
            path: container.to_path_buf(),
            kind,
            expected: expected.to_string(),
            actual: digest,
        });
    }
    debug!("{} of {} verified", kind, container.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn space_check_reports_both_amounts() {
        let err = check_space(Path::new("/work"), 10, 11).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("10 MB available"));
        assert!(message.contains("11 MB needed"));
        assert!(check_space(Path::new("/work"), 11, 11).is_ok());
    }

    #[test]
    fn file_name_is_last_url_segment() {
        assert_eq!(file_name_from_url("http://x/img.zip"), Some("img.zip"));
        assert_eq!(
            file_name_from_url("https://dl.example.com/a/b/board_1.2.bin.zip?token=1#frag"),
            Some("board_1.2.bin.zip")
        );
        assert_eq!(file_name_from_url("http://x/dir/"), None);
        assert_eq!(file_name_from_url("img.zip"), None);
    }

    fn stanza(zip_file_size: u64, file_size: u64) -> ImageStanza {
        ImageStanza {
            name: "Board X".into(),
            file: "img.bin".into(),
            zip_file_size,
            file_size,
            url: "http://x/img.zip".into(),
            md5: Some("00".into()),
            sha1: None,
        }
    }

    #[test]
    fn oversized_catalog_sizes_cannot_fit() {
        assert_eq!(required_space_mb(&stanza(MB, MB + 1)), 3);
        assert_eq!(required_space_mb(&stanza(u64::MAX, 1)), u64::MAX);

        let work = tempfile::tempdir().unwrap();
        let state = tempfile::tempdir().unwrap();
        let fetcher = crate::fetch::tests::MemoryFetcher::new(Vec::new());
        let caps = HostCapabilities {
            checksum: ChecksumKind::Md5,
            unpack: crate::unpack::UnpackKind::Gzip,
            devices: crate::platform::DeviceBackend::Sysfs,
        };

        let err = acquire(
            &stanza(u64::MAX, 1),
            work.path(),
            &caps,
            &StateStore::new(state.path()),
            &fetcher,
            &Arc::new(AtomicBool::new(true)),
            |_| RepeatChoice::Quit,
            DownloadProgress {
                on_start: |_, _| {},
                on_progress: |_| {},
            },
        )
        .unwrap_err();
        assert!(matches!(
            err,
            AcquireError::InsufficientSpace { required_mb: u64::MAX, .. }
        ));
        assert_eq!(fetcher.requests.get(), 0);
    }

    #[test]
    fn complete_or_stale_container_is_discarded() {
        let dir = tempfile::tempdir().unwrap();
        let container = dir.path().join("img.zip");

        fs::write(&container, [0u8; 10]).unwrap();
        discard_complete(&container, 20).unwrap();
        assert!(container.exists());

        discard_complete(&container, 10).unwrap();
        assert!(!container.exists());

        fs::write(&container, [0u8; 30]).unwrap();
        discard_complete(&container, 20).unwrap();
        assert!(!container.exists());

        discard_complete(&container, 20).unwrap();
    }

    #[test]
    fn repeated_url_restart_clears_has_run() {
        use crate::state::SelectionState;

        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path());
        store
            .save_selection(SelectionState {
                has_run: true,
                last_index: 2,
            })
            .unwrap();
        store.set_last_url("http://x/img.zip").unwrap();

        let stanza = ImageStanza {
            name: "Board X".into(),
            file: "img.bin".into(),
            zip_file_size: 1,
            file_size: 1,
            url: "http://x/img.zip".into(),
            md5: Some("00".into()),
            sha1: None,
        };

        let err = confirm_fresh_url(&stanza, &store, |_| RepeatChoice::Restart).unwrap_err();
        assert!(matches!(err, AcquireError::RestartRequested));
        assert!(!store.load_selection().unwrap().has_run);

        let err = confirm_fresh_url(&stanza, &store, |_| RepeatChoice::Quit).unwrap_err();
        assert!(matches!(err, AcquireError::Cancelled));

        assert!(confirm_fresh_url(&stanza, &store, |_| RepeatChoice::Redownload).is_ok());
    }

    #[test]
    fn new_url_is_recorded_without_asking() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path());
        let stanza = ImageStanza {
            name: "Board X".into(),
            file: "img.bin".into(),
            zip_file_size: 1,
            file_size: 1,
            url: "http://x/new.zip".into(),
            md5: Some("00".into()),
            sha1: None,
        };

        confirm_fresh_url(&stanza, &store, |_| panic!("should not ask")).unwrap();
        assert_eq!(store.last_url().unwrap().as_deref(), Some("http://x/new.zip"));
    }
}
