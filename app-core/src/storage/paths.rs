use std::fs;
use std::path::{Path, PathBuf};

use crate::errors::{AppError, AppResult};

/// Filesystem layout of the client's on-device state.
#[derive(Debug, Clone)]
pub struct AppPaths {
    /// Root directory for app data.
    root_dir: PathBuf,
    /// Encrypted token slot file.
    secure_store_file: PathBuf,
    /// Directory of namespaced JSON documents (session flags, preferences).
    state_dir: PathBuf,
}

impl AppPaths {
    pub const SECURE_STORE_FILENAME: &'static str = "secure.store";

    pub fn new(root: impl AsRef<Path>) -> AppResult<Self> {
        let root_dir = root.as_ref().to_path_buf();
        if root_dir.as_os_str().is_empty() {
            return Err(AppError::StorageError(
                "App data directory cannot be empty".to_string(),
            ));
        }

        Ok(Self {
            secure_store_file: root_dir.join(Self::SECURE_STORE_FILENAME),
            state_dir: root_dir.join("state"),
            root_dir,
        })
    }

    pub fn ensure_directories(&self) -> AppResult<()> {
        fs::create_dir_all(&self.root_dir)?;
        fs::create_dir_all(&self.state_dir)?;
        Ok(())
    }

    pub fn secure_store_file(&self) -> &Path {
        &self.secure_store_file
    }

    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }

    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }
}
