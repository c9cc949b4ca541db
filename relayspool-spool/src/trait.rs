use std::path::{Path, PathBuf};

use async_trait::async_trait;

/// Access to the spool directory.
///
/// Spool files are identified by their absolute path, which is also the
/// key the delivery ledger tracks them under.
#[async_trait]
pub trait Spool: Send + Sync + std::fmt::Debug {
    /// List candidate spool files, excluding hidden entries and directories
    ///
    /// # Errors
    /// If the spool cannot be enumerated
    async fn list(&self) -> crate::Result<Vec<PathBuf>>;

    /// Read the raw contents of a spool file
    ///
    /// # Errors
    /// If the file does not exist or cannot be read
    async fn read(&self, path: &Path) -> crate::Result<Vec<u8>>;

    /// Remove a spool file once all of its recipients are done
    ///
    /// # Errors
    /// If the file cannot be removed
    async fn remove(&self, path: &Path) -> crate::Result<()>;

    /// Whether the spool file still exists
    ///
    /// # Errors
    /// If existence cannot be determined
    async fn exists(&self, path: &Path) -> crate::Result<bool>;
}
