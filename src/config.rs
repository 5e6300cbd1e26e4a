//! Extraction configuration
//!
//! The storage root is passed explicitly into every extraction instead of
//! living in process-wide state, so callers with different roots never
//! interfere with each other.

use std::{
    env,
    ffi::OsString,
    path::{Path, PathBuf},
};

/// Environment variable naming the storage root
pub const STORAGE_DIRECTORY_VAR: &str = "EPUB_STORAGE_DIRECTORY";

/// Directory created under the user's home when no storage root is configured
const DEFAULT_STORAGE_DIRECTORY: &str = "BOOKS";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Directory under which every book is extracted
    ///
    /// Public paths are expressed relative to this directory.
    pub storage_root: PathBuf,

    /// Remove the book directory when an extraction fails
    ///
    /// Off by default: the partially extracted tree is left for the caller.
    pub cleanup_on_failure: bool,
}

impl Config {
    pub fn new<P: AsRef<Path>>(storage_root: P) -> Self {
        Self {
            storage_root: storage_root.as_ref().to_path_buf(),
            cleanup_on_failure: false,
        }
    }

    /// Builds the configuration from the environment
    ///
    /// `EPUB_STORAGE_DIRECTORY` wins when set and non-empty; otherwise books
    /// go to `$HOME/BOOKS`, or `./BOOKS` when no home directory is known.
    pub fn from_env() -> Self {
        Self::from_vars(env::var_os(STORAGE_DIRECTORY_VAR), env::var_os("HOME"))
    }

    fn from_vars(storage_directory: Option<OsString>, home: Option<OsString>) -> Self {
        let storage_root = match storage_directory {
            Some(path) if !path.to_string_lossy().trim().is_empty() => PathBuf::from(path),
            _ => home
                .filter(|home| !home.is_empty())
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("."))
                .join(DEFAULT_STORAGE_DIRECTORY),
        };

        Self::new(storage_root)
    }

    pub fn with_cleanup_on_failure(mut self, cleanup: bool) -> Self {
        self.cleanup_on_failure = cleanup;
        self
    }
}
