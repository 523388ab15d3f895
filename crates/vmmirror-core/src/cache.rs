//! Download-once local mirror of remote objects.

use crate::CoreError;
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Component, Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info};

/// Exclusive advisory lock on a cache entry, released on drop.
///
/// `flock` semantics: separate opens conflict even within one process, so
/// the lock serializes both threads and processes sharing a cache root.
pub struct CacheLock {
    lock_file: File,
}

impl CacheLock {
    pub fn acquire(lock_path: &Path) -> Result<Self, CoreError> {
        if let Some(parent) = lock_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(lock_path)?;

        file.lock_exclusive()
            .map_err(|e| CoreError::LockFailed(format!("{}: {e}", lock_path.display())))?;

        Ok(Self { lock_file: file })
    }
}

impl Drop for CacheLock {
    fn drop(&mut self) {
        let _ = self.lock_file.unlock();
    }
}

/// Fsync a directory so a preceding `rename()` into it is durable.
fn fsync_dir(dir: &Path) -> Result<(), io::Error> {
    let f = File::open(dir)?;
    f.sync_all()
}

/// Reject absolute paths and `..` so remote keys cannot escape a local root.
pub(crate) fn checked_relative(rel_path: &str) -> Result<&Path, io::Error> {
    let path = Path::new(rel_path);
    let clean = !rel_path.is_empty()
        && path
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
    if clean {
        Ok(path)
    } else {
        Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("refusing unsafe relative path '{rel_path}'"),
        ))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheOutcome {
    /// The entry was already present; nothing was downloaded.
    Hit,
    /// The entry was downloaded by this call.
    Downloaded { bytes: u64 },
}

/// Append-only local mirror of remote objects.
///
/// The entry for bucket-relative path `p` lives at `root/p`; its presence
/// means the object has been fetched. Entries are written to a temporary
/// file and renamed into place, so a visible entry is always complete.
/// There is no eviction.
#[derive(Debug, Clone)]
pub struct LocalCache {
    root: PathBuf,
}

impl LocalCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[inline]
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn entry_path(&self, rel_path: &str) -> Result<PathBuf, CoreError> {
        Ok(self.root.join(checked_relative(rel_path)?))
    }

    pub fn contains(&self, rel_path: &str) -> bool {
        self.entry_path(rel_path).is_ok_and(|p| p.is_file())
    }

    fn lock_path(entry: &Path) -> PathBuf {
        let name = entry
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        entry.with_file_name(format!(".{name}.lock"))
    }

    /// Make sure `rel_path` is cached, calling `download` to fill it if not.
    ///
    /// Concurrent callers for the same missing entry serialize on the entry
    /// lock; whoever comes second finds the finished entry and reports a hit.
    /// If `download` fails the partial file is discarded and the entry stays
    /// absent.
    pub fn ensure<F>(&self, rel_path: &str, download: F) -> Result<CacheOutcome, CoreError>
    where
        F: FnOnce(&mut dyn Write) -> Result<u64, CoreError>,
    {
        let dest = self.entry_path(rel_path)?;
        if dest.is_file() {
            debug!("cache hit: {rel_path}");
            return Ok(CacheOutcome::Hit);
        }

        let dir = dest.parent().unwrap_or(&self.root).to_path_buf();
        fs::create_dir_all(&dir)?;

        let _lock = CacheLock::acquire(&Self::lock_path(&dest))?;
        if dest.is_file() {
            debug!("cache hit after wait: {rel_path}");
            return Ok(CacheOutcome::Hit);
        }

        let mut tmp = NamedTempFile::new_in(&dir)?;
        let bytes = download(&mut tmp)?;
        tmp.flush()?;
        tmp.as_file().sync_all()?;
        tmp.persist(&dest).map_err(|e| CoreError::LocalIo(e.error))?;
        fsync_dir(&dir)?;

        info!("cached {rel_path} ({bytes} bytes)");
        Ok(CacheOutcome::Downloaded { bytes })
    }
}
