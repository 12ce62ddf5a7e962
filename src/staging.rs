//! Per-request staging of uploaded images.
//!
//! Every upload gets its own randomly named directory under the working
//! directory, so concurrent requests never share an input file. The
//! directory is removed with [`StagedInput::remove`] once the script is done;
//! if the guard is dropped first (an early error or a cancelled request) its
//! `Drop` removes it instead.

use std::path::{Path, PathBuf};
use tempfile::TempDir;

const STAGING_PREFIX: &str = "plate-";

/// An uploaded image written to disk, deleted again on drop.
#[derive(Debug)]
pub struct StagedInput {
    dir: TempDir,
    image_path: PathBuf,
    removed: bool,
}

impl StagedInput {
    /// Create a fresh staging directory inside `work_dir` and write `data`
    /// to `file_name` within it.
    pub async fn write(work_dir: &Path, file_name: &str, data: &[u8]) -> std::io::Result<Self> {
        let dir = tempfile::Builder::new()
            .prefix(STAGING_PREFIX)
            .tempdir_in(work_dir)?;
        let image_path = dir.path().join(file_name);

        // Construct the guard first so a failed write still cleans up.
        let staged = Self {
            dir,
            image_path,
            removed: false,
        };
        tokio::fs::write(&staged.image_path, data).await?;

        tracing::debug!(
            "Staged {} bytes at {}",
            data.len(),
            staged.image_path.display()
        );
        Ok(staged)
    }

    /// Directory the image was staged in.
    pub fn dir(&self) -> &Path {
        self.dir.path()
    }

    pub fn image_path(&self) -> &Path {
        &self.image_path
    }

    /// Delete the staging directory without blocking the runtime.
    pub async fn remove(mut self) {
        self.removed = true;
        log_removal(self.dir.path(), tokio::fs::remove_dir_all(self.dir.path()).await);
    }
}

fn log_removal(path: &Path, result: std::io::Result<()>) {
    match result {
        Ok(()) => tracing::debug!("Removed staging directory {}", path.display()),
        Err(e) => tracing::warn!(
            "Failed to remove staging directory {}: {}",
            path.display(),
            e
        ),
    }
}

impl Drop for StagedInput {
    fn drop(&mut self) {
        if self.removed {
            return;
        }
        // TempDir's own drop runs after this and ignores a missing directory.
        log_removal(self.dir.path(), std::fs::remove_dir_all(self.dir.path()));
    }
}
