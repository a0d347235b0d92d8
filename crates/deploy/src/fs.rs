//! File system utils.

use std::{
    fs::{File, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
};

use anyhow::Context;
use fs2::FileExt;

pub struct FsHandler;

impl FsHandler {
    /// Create a state directory (and its parents) if it doesn't exist.
    pub fn create_state_directory(path: &Path) -> anyhow::Result<()> {
        if path.is_dir() {
            return Ok(());
        }

        std::fs::create_dir_all(path).context("Failed to create state directory")?;
        tracing::debug!("Created state directory: {}", path.display());

        Ok(())
    }

    /// Path of the scratch file used while replacing `path`.
    pub fn temp_path(path: &Path) -> PathBuf {
        let mut name = path.file_name().unwrap_or_default().to_os_string();
        name.push(".tmp");
        path.with_file_name(name)
    }

    /// Replace the content of `path` without ever exposing a partially written file.
    ///
    /// The bytes go to a sibling `.tmp` file which is flushed to disk and then
    /// renamed over `path`. A crash at any point leaves either the previous
    /// content or the new one.
    pub fn write_atomic(path: &Path, contents: &[u8]) -> anyhow::Result<()> {
        let temp_path = Self::temp_path(path);

        let mut file = File::create(&temp_path)
            .with_context(|| format!("Failed to create {}", temp_path.display()))?;
        file.write_all(contents)
            .with_context(|| format!("Failed to write {}", temp_path.display()))?;
        file.sync_all()
            .with_context(|| format!("Failed to flush {}", temp_path.display()))?;
        drop(file);

        std::fs::rename(&temp_path, path).with_context(|| {
            format!(
                "Failed to move {} over {}",
                temp_path.display(),
                path.display()
            )
        })?;

        // Persist the rename itself.
        #[cfg(unix)]
        if let Some(parent) = path.parent() {
            File::open(parent)
                .and_then(|dir| dir.sync_all())
                .with_context(|| format!("Failed to flush directory {}", parent.display()))?;
        }

        Ok(())
    }

    /// Try to take an exclusive advisory lock on `path`, creating it if needed.
    ///
    /// Returns `Ok(None)` if another process already holds the lock. The lock
    /// is released when the returned file is dropped.
    pub fn try_lock(path: &Path) -> anyhow::Result<Option<File>> {
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(path)
            .with_context(|| format!("Failed to open lock file {}", path.display()))?;

        match FileExt::try_lock_exclusive(&file) {
            Ok(()) => Ok(Some(file)),
            Err(e) if e.kind() == fs2::lock_contended_error().kind() => Ok(None),
            Err(e) => {
                Err(e).with_context(|| format!("Failed to lock {}", path.display()))
            }
        }
    }
}
