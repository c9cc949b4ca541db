use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use relayspool_common::internal;
use tokio::fs;

use crate::{
    error::{SpoolError, ValidationError},
    r#trait::Spool,
};

/// Spool backed by a watched directory.
///
/// Every regular, non-hidden entry of the directory is one queued message.
/// Hidden entries are reserved for the relay's own bookkeeping (the ledger
/// snapshot lives there by default) and sub-directories are ignored.
#[derive(Debug, Clone)]
pub struct FileSpool {
    path: PathBuf,
}

impl FileSpool {
    /// Open an existing spool directory.
    ///
    /// The path is made absolute and `.`/`..` are resolved lexically, so
    /// ledger keys do not depend on how the directory was spelled.
    ///
    /// # Errors
    /// - If the path does not exist
    /// - If the path exists but is not a directory
    /// - If the path cannot be made absolute
    pub fn open(path: impl AsRef<Path>) -> crate::Result<Self> {
        let path = path.as_ref();
        let display = path.display().to_string();

        let absolute = std::path::absolute(path)
            .map(|path| normalise(&path))
            .map_err(|e| ValidationError::Unresolvable {
                path: display.clone(),
                reason: e.to_string(),
            })?;

        if !absolute
            .try_exists()
            .map_err(|e| SpoolError::io(&absolute, e))?
        {
            return Err(ValidationError::PathNotFound(display).into());
        }

        if !absolute.is_dir() {
            return Err(ValidationError::NotDirectory(display).into());
        }

        internal!("Opened spool directory {}", absolute.display());

        Ok(Self { path: absolute })
    }

    /// The absolute spool directory
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Resolve `.` and `..` without touching the filesystem. `..` at the root
/// stays at the root.
fn normalise(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if matches!(out.components().next_back(), Some(Component::Normal(_))) {
                    out.pop();
                }
            }
            other => out.push(other),
        }
    }
    out
}

fn is_hidden(name: &std::ffi::OsStr) -> bool {
    name.as_encoded_bytes().first() == Some(&b'.')
}

#[async_trait]
impl Spool for FileSpool {
    async fn list(&self) -> crate::Result<Vec<PathBuf>> {
        let mut entries = fs::read_dir(&self.path)
            .await
            .map_err(|e| SpoolError::io(&self.path, e))?;
        let mut files = Vec::new();

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| SpoolError::io(&self.path, e))?
        {
            if is_hidden(&entry.file_name()) {
                continue;
            }

            match entry.file_type().await {
                Ok(kind) if kind.is_dir() => continue,
                Ok(_) => files.push(entry.path()),
                Err(e) => {
                    tracing::warn!(path = %entry.path().display(), error = %e, "Unable to stat spool entry, skipping");
                }
            }
        }

        files.sort();
        Ok(files)
    }

    async fn read(&self, path: &Path) -> crate::Result<Vec<u8>> {
        fs::read(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                SpoolError::NotFound(path.to_path_buf())
            } else {
                SpoolError::io(path, e)
            }
        })
    }

    async fn remove(&self, path: &Path) -> crate::Result<()> {
        fs::remove_file(path)
            .await
            .map_err(|e| SpoolError::io(path, e))
    }

    async fn exists(&self, path: &Path) -> crate::Result<bool> {
        fs::try_exists(path)
            .await
            .map_err(|e| SpoolError::io(path, e))
    }
}
