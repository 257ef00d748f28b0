use anyhow::{Context, Result};
use clap::Parser;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Where the recovery catalog is published.
pub const DEFAULT_CATALOG_URL: &str =
    "https://dl.google.com/dl/edgedl/chromeos/recovery/recovery.conf";

#[derive(Parser, Debug)]
#[command(name = "imgrescue")]
#[command(
    about = "Download a recovery image and write it onto a removable drive",
    version
)]
pub struct Cli {
    /// Read the recovery catalog from URL instead of the default location
    #[arg(long = "config", value_name = "URL", default_value = DEFAULT_CATALOG_URL)]
    pub catalog_url: String,

    /// Skip reading the written data back for verification
    #[arg(short = 'n', long = "no-verify")]
    pub no_verify: bool,

    /// Keep downloads in DIR so an interrupted run can resume
    #[arg(long, env = "WORKDIR", value_name = "DIR")]
    pub workdir: Option<PathBuf>,

    /// Reserved for pinning the target drive
    #[arg(long, env = "DEVICE", hide = true)]
    pub device: Option<String>,

    /// Pick the first image whose name contains MODEL, without asking
    #[arg(long, env = "MODEL")]
    pub model: Option<String>,
}

/// The working directory for one run.
pub enum WorkDir {
    /// Given by the user; survives the run.
    Persistent(PathBuf),
    /// Removed when dropped.
    Temporary(TempDir),
}

impl WorkDir {
    pub fn resolve(requested: Option<&Path>) -> Result<Self> {
        match requested {
            Some(dir) => {
                fs::create_dir_all(dir)
                    .with_context(|| format!("failed to create {}", dir.display()))?;
                Ok(WorkDir::Persistent(dir.to_path_buf()))
            }
            None => Ok(WorkDir::Temporary(
                tempfile::Builder::new().prefix("imgrescue").tempdir()?,
            )),
        }
    }

    pub fn path(&self) -> &Path {
        match self {
            WorkDir::Persistent(dir) => dir,
            WorkDir::Temporary(dir) => dir.path(),
        }
    }
}

impl Cli {
    /// The model string, if one was given and is not blank.
    pub fn model(&self) -> Option<&str> {
        self.model.as_deref().filter(|m| !m.trim().is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_the_published_catalog() {
        let cli = Cli::try_parse_from(["imgrescue"]).unwrap();
        assert_eq!(cli.catalog_url, DEFAULT_CATALOG_URL);
        assert!(!cli.no_verify);
    }

    #[test]
    fn catalog_url_can_be_overridden() {
        let cli =
            Cli::try_parse_from(["imgrescue", "--config", "http://localhost/recovery.conf", "-n"])
                .unwrap();
        assert_eq!(cli.catalog_url, "http://localhost/recovery.conf");
        assert!(cli.no_verify);
    }

    #[test]
    fn positional_arguments_are_rejected() {
        assert!(Cli::try_parse_from(["imgrescue", "image.bin"]).is_err());
    }

    #[test]
    fn blank_model_is_ignored() {
        let cli = Cli::try_parse_from(["imgrescue", "--model", " "]).unwrap();
        assert_eq!(cli.model(), None);
        let cli = Cli::try_parse_from(["imgrescue", "--model", "Board X"]).unwrap();
        assert_eq!(cli.model(), Some("Board X"));
    }

    #[test]
    fn persistent_workdir_is_created() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("work");
        let work = WorkDir::resolve(Some(&dir)).unwrap();
        assert!(dir.is_dir());
        assert_eq!(work.path(), dir);
    }

    #[test]
    fn temporary_workdir_is_removed_on_drop() {
        let work = WorkDir::resolve(None).unwrap();
        let path = work.path().to_path_buf();
        assert!(path.is_dir());
        drop(work);
        assert!(!path.exists());
    }
}
