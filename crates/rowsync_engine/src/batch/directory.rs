//! Batch directory layout.
//!
//! ```text
//! <root>/<batch id>/
//!     summary.cbor
//!     0000_Customers.rsp
//!     0001_Orders.rsp
//!     0002_Orders.rsp
//! ```

use crate::error::SyncResult;
use rowsync_protocol::{part_file_name, BatchInfo, BatchPartInfo, TableName, SUMMARY_FILE_NAME};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;
use uuid::Uuid;

/// One directory holding the part files and summary of a change set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchDirectory {
    path: PathBuf,
    batch_id: String,
}

impl BatchDirectory {
    /// Creates `<root>/<batch_id>`, including missing parents.
    ///
    /// # Errors
    ///
    /// Fails if the directory cannot be created.
    pub fn create(root: &Path, batch_id: impl Into<String>) -> SyncResult<Self> {
        let batch_id = batch_id.into();
        let path = root.join(&batch_id);
        fs::create_dir_all(&path)?;
        debug!(path = %path.display(), "created batch directory");
        Ok(Self { path, batch_id })
    }

    /// Creates a directory under `root` with a fresh random batch id.
    ///
    /// # Errors
    ///
    /// Fails if the directory cannot be created.
    pub fn create_unique(root: &Path) -> SyncResult<Self> {
        Self::create(root, Uuid::new_v4().simple().to_string())
    }

    /// Opens an existing batch directory.
    ///
    /// # Errors
    ///
    /// Fails if `path` is not a directory.
    pub fn open(path: impl Into<PathBuf>) -> SyncResult<Self> {
        let path = path.into();
        if !fs::metadata(&path)?.is_dir() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("{} is not a directory", path.display()),
            )
            .into());
        }
        let batch_id = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(Self { path, batch_id })
    }

    /// Directory path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Batch id (the directory name).
    #[must_use]
    pub fn batch_id(&self) -> &str {
        &self.batch_id
    }

    /// Path of the part file for a table and index.
    #[must_use]
    pub fn part_path_for(&self, index: u32, table: &TableName) -> PathBuf {
        self.path.join(part_file_name(index, table))
    }

    /// Path of a recorded part.
    #[must_use]
    pub fn part_path(&self, part: &BatchPartInfo) -> PathBuf {
        self.path.join(&part.file_name)
    }

    /// Path of the summary file.
    #[must_use]
    pub fn summary_path(&self) -> PathBuf {
        self.path.join(SUMMARY_FILE_NAME)
    }

    /// Writes the manifest summary.
    ///
    /// # Errors
    ///
    /// Fails on encoding or I/O errors.
    pub fn write_summary(&self, batch: &BatchInfo) -> SyncResult<()> {
        fs::write(self.summary_path(), batch.encode_summary()?)?;
        Ok(())
    }

    /// Rebuilds the manifest from the summary without scanning part files.
    ///
    /// # Errors
    ///
    /// Fails if the summary is missing or malformed.
    pub fn load_summary(&self) -> SyncResult<BatchInfo> {
        let bytes = fs::read(self.summary_path())?;
        Ok(BatchInfo::decode_summary(&bytes)?)
    }

    /// Removes the directory and everything in it.
    ///
    /// # Errors
    ///
    /// Fails if removal fails.
    pub fn cleanup(self) -> SyncResult<()> {
        fs::remove_dir_all(&self.path)?;
        debug!(path = %self.path.display(), "removed batch directory");
        Ok(())
    }

    /// Removes the directory unless `retain` is set (diagnostic batches).
    ///
    /// # Errors
    ///
    /// Fails if removal fails.
    pub fn cleanup_unless(self, retain: bool) -> SyncResult<()> {
        if retain {
            debug!(path = %self.path.display(), "retaining batch directory");
            Ok(())
        } else {
            self.cleanup()
        }
    }
}
