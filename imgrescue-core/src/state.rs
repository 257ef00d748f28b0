//! Records that survive between runs of the tool.
//!
//! Two independent records live in the state directory: the last image the
//! user picked interactively, and the URL of the last image that was
//! fetched. Both are read and rewritten without locking; running two
//! instances against the same state directory is not supported.
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

const SELECTION_FILE: &str = "selection.json";
const LAST_URL_FILE: &str = "last_url";

/// The user's last interactive choice.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectionState {
    pub has_run: bool,
    /// 1-based catalog index.
    pub last_index: usize,
}

/// Directory-backed store for the cross-run records.
#[derive(Clone, Debug)]
pub struct StateStore {
    dir: PathBuf,
}

impl StateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// The per-user default location, under the platform config directory.
    pub fn default_location() -> Option<Self> {
        dirs::config_dir().map(|d| Self::new(d.join("imgrescue")))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Loads the saved selection. A missing or unreadable record reads as
    /// "never run".
    pub fn load_selection(&self) -> Result<SelectionState> {
        let path = self.dir.join(SELECTION_FILE);
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(SelectionState::default()),
            Err(e) => return Err(e).with_context(|| format!("failed to read {}", path.display())),
        };
        match serde_json::from_str(&text) {
            Ok(state) => Ok(state),
            Err(e) => {
                debug!("ignoring corrupt {}: {}", path.display(), e);
                Ok(SelectionState::default())
            }
        }
    }

    pub fn save_selection(&self, state: SelectionState) -> Result<()> {
        self.write(SELECTION_FILE, &serde_json::to_string_pretty(&state)?)
    }

    /// Forgets that the tool has run before, keeping the saved index.
    pub fn clear_has_run(&self) -> Result<()> {
        let mut state = self.load_selection()?;
        state.has_run = false;
        self.save_selection(state)
    }

    pub fn last_url(&self) -> Result<Option<String>> {
        let path = self.dir.join(LAST_URL_FILE);
        match fs::read_to_string(&path) {
            Ok(text) => {
                let url = text.trim();
                Ok((!url.is_empty()).then(|| url.to_string()))
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("failed to read {}", path.display())),
        }
    }

    pub fn set_last_url(&self, url: &str) -> Result<()> {
        self.write(LAST_URL_FILE, &format!("{url}\n"))
    }

    fn write(&self, name: &str, contents: &str) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("failed to create {}", self.dir.display()))?;
        let path = self.dir.join(name);
        fs::write(&path, contents).with_context(|| format!("failed to write {}", path.display()))
    }
}
