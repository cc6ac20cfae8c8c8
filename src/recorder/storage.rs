use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::warn;

use super::types::{Recording, RecordingError};

/// Subfolder recordings are moved into instead of being deleted.
pub const ARCHIVE_DIR: &str = "archive";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("malformed recording file: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid recording: {0}")]
    Invalid(#[from] RecordingError),
    #[error("no recording named '{0}'")]
    NotFound(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordingEntry {
    pub name: String,
    pub path: PathBuf,
}

/// One JSON file per recording under a single root directory.
#[derive(Debug, Clone)]
pub struct RecordingStore {
    root: PathBuf,
}

impl RecordingStore {
    pub fn at(root: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// Store under the user config directory, `saved/` like the rest of
    /// the app's files.
    pub fn open_default() -> Result<Self, StorageError> {
        let root = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("macrocast")
            .join("saved");
        Self::at(root)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, name: &str) -> PathBuf {
        self.root.join(format!("{}.json", slug::slugify(name)))
    }

    /// Validate and write, returning the file path.
    pub fn save(&self, recording: &Recording) -> Result<PathBuf, StorageError> {
        recording.validate()?;
        let path = self.path_for(&recording.name);
        let json = serde_json::to_string_pretty(recording)?;
        fs::write(&path, json)?;
        Ok(path)
    }

    /// Load and validate one file. A partially loaded recording is never
    /// handed to the caller.
    pub fn load(&self, path: &Path) -> Result<Recording, StorageError> {
        let contents = fs::read_to_string(path)?;
        let recording: Recording = serde_json::from_str(&contents)?;
        recording.validate()?;
        Ok(recording)
    }

    pub fn load_named(&self, name: &str) -> Result<Recording, StorageError> {
        let path = self.path_for(name);
        if !path.exists() {
            return Err(StorageError::NotFound(name.to_string()));
        }
        self.load(&path)
    }

    /// All readable recordings, sorted by file name. Unreadable files are
    /// skipped with a warning; they stay on disk untouched.
    pub fn list(&self) -> Result<Vec<RecordingEntry>, StorageError> {
        let mut paths: Vec<PathBuf> = fs::read_dir(&self.root)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
            .collect();
        paths.sort();

        let mut entries = Vec::with_capacity(paths.len());
        for path in paths {
            match self.load(&path) {
                Ok(recording) => entries.push(RecordingEntry {
                    name: recording.name,
                    path,
                }),
                Err(error) => warn!(path = %path.display(), %error, "skipping recording"),
            }
        }
        Ok(entries)
    }

    /// Move a recording file into the archive subfolder, contents
    /// untouched. Returns the new path.
    pub fn archive(&self, path: &Path) -> Result<PathBuf, StorageError> {
        let archive_dir = self.root.join(ARCHIVE_DIR);
        fs::create_dir_all(&archive_dir)?;
        let file_name = path
            .file_name()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no file name"))?;
        let destination = archive_dir.join(file_name);
        fs::rename(path, &destination)?;
        Ok(destination)
    }
}
