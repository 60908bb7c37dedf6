//! Internally managed storage locations
//!
//! Every internal data source gets a fresh directory `<root>/<uuid>`. Names are
//! never reused, so a reader holding a stale location can never observe a
//! later data source's bytes.

use crate::errors::{ChunkyardError, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct StorageAllocator {
    root: PathBuf,
}

impl StorageAllocator {
    /// Create `root` if needed and resolve it to a canonical absolute path,
    /// the form asset URIs are recorded in.
    pub async fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref();
        tokio::fs::create_dir_all(root)
            .await
            .map_err(|e| ChunkyardError::storage(root.display(), e))?;
        let root = tokio::fs::canonicalize(root)
            .await
            .map_err(|e| ChunkyardError::storage(root.display(), e))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create a new, empty directory; the caller owns it until it is recorded.
    pub async fn allocate(&self) -> Result<PathBuf> {
        let dir = self.root.join(Uuid::new_v4().simple().to_string());
        tokio::fs::create_dir(&dir)
            .await
            .map_err(|e| ChunkyardError::storage(dir.display(), e))?;
        debug!(dir = %dir.display(), "allocated storage");
        Ok(dir)
    }

    /// Delete an allocated directory. Paths outside the storage root are refused.
    pub async fn reclaim(&self, dir: &Path) -> Result<()> {
        if !dir.starts_with(&self.root) || dir == self.root {
            return Err(ChunkyardError::CatalogCorrupted(format!(
                "refusing to reclaim '{}': not under writable storage '{}'",
                dir.display(),
                self.root.display()
            )));
        }
        match tokio::fs::remove_dir_all(dir).await {
            Ok(()) => {
                info!(dir = %dir.display(), "reclaimed storage");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ChunkyardError::storage(dir.display(), e)),
        }
    }
}

/// Removes directories allocated for a create that never committed.
///
/// Failed creates call [`AllocationGuard::release`]. Dropped without
/// [`AllocationGuard::commit`], for instance when the creating future is
/// cancelled, it deletes everything it still tracks synchronously.
#[derive(Debug, Default)]
pub struct AllocationGuard {
    dirs: Vec<PathBuf>,
}

impl AllocationGuard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn track(&mut self, dir: PathBuf) {
        self.dirs.push(dir);
    }

    pub fn commit(mut self) {
        self.dirs.clear();
    }

    /// Delete every tracked directory without blocking the runtime.
    pub async fn release(mut self) {
        for dir in std::mem::take(&mut self.dirs) {
            match tokio::fs::remove_dir_all(&dir).await {
                Ok(()) => debug!(dir = %dir.display(), "released uncommitted storage"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!(dir = %dir.display(), error = %e, "failed to release storage"),
            }
        }
    }
}

impl Drop for AllocationGuard {
    fn drop(&mut self) {
        for dir in self.dirs.drain(..) {
            match std::fs::remove_dir_all(&dir) {
                Ok(()) => debug!(dir = %dir.display(), "released uncommitted storage"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!(dir = %dir.display(), error = %e, "failed to release storage"),
            }
        }
    }
}
