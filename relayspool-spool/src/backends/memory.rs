use std::{
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use async_trait::async_trait;
use dashmap::DashMap;

use crate::{error::SpoolError, r#trait::Spool};

/// In-memory spool.
///
/// Intended for tests of the delivery core: files are inserted and removed
/// directly, and removal failures can be injected to exercise the paths
/// where the backing file outlives its ledger record.
#[derive(Debug, Clone, Default)]
pub struct MemorySpool {
    pub(crate) files: Arc<DashMap<PathBuf, Arc<[u8]>>>,
    fail_removal: Arc<AtomicBool>,
}

impl MemorySpool {
    /// Create a new empty spool
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Place a file into the spool, replacing any existing one at `path`
    pub fn insert(&self, path: impl Into<PathBuf>, contents: impl AsRef<[u8]>) {
        self.files
            .insert(path.into(), Arc::from(contents.as_ref()));
    }

    /// Remove a file behind the relay's back
    pub fn delete(&self, path: impl AsRef<Path>) -> bool {
        self.files.remove(path.as_ref()).is_some()
    }

    /// Make every subsequent [`Spool::remove`] fail (or succeed again)
    pub fn fail_removal(&self, fail: bool) {
        self.fail_removal.store(fail, Ordering::SeqCst);
    }

    /// Whether `path` is currently spooled
    #[must_use]
    pub fn contains(&self, path: impl AsRef<Path>) -> bool {
        self.files.contains_key(path.as_ref())
    }

    /// Number of spooled files
    #[must_use]
    pub fn len(&self) -> usize {
        self.files.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

#[async_trait]
impl Spool for MemorySpool {
    async fn list(&self) -> crate::Result<Vec<PathBuf>> {
        let mut files: Vec<PathBuf> = self
            .files
            .iter()
            .map(|entry| entry.key().clone())
            .filter(|path| {
                path.file_name()
                    .is_some_and(|name| name.as_encoded_bytes().first() != Some(&b'.'))
            })
            .collect();
        files.sort();
        Ok(files)
    }

    async fn read(&self, path: &Path) -> crate::Result<Vec<u8>> {
        self.files
            .get(path)
            .map(|entry| entry.value().to_vec())
            .ok_or_else(|| SpoolError::NotFound(path.to_path_buf()))
    }

    async fn remove(&self, path: &Path) -> crate::Result<()> {
        if self.fail_removal.load(Ordering::SeqCst) {
            return Err(SpoolError::io(
                path,
                std::io::Error::new(std::io::ErrorKind::PermissionDenied, "removal disabled"),
            ));
        }

        self.files
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| SpoolError::NotFound(path.to_path_buf()))
    }

    async fn exists(&self, path: &Path) -> crate::Result<bool> {
        Ok(self.files.contains_key(path))
    }
}
