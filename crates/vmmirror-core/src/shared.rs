//! Lazily built index shared by concurrent fetchers.

use crate::bucket::ImageBucket;
use crate::capability::CapabilityFilter;
use crate::index::ImageIndex;
use crate::CoreError;
use std::sync::{Arc, Mutex, OnceLock};
use vmmirror_remote::RemoteBackend;

/// Process-wide image index, built on first use.
///
/// Concurrent first callers serialize on a build lock so the bucket is
/// mapped once; afterwards reads go straight to the `OnceLock` without
/// locking. A failed build leaves nothing installed and the next caller
/// tries again. Share it between fetchers with an `Arc`.
pub struct SharedIndex {
    backend: Arc<dyn RemoteBackend>,
    bucket: ImageBucket,
    index: OnceLock<ImageIndex>,
    build_lock: Mutex<()>,
}

impl SharedIndex {
    pub fn new(backend: Arc<dyn RemoteBackend>, bucket: ImageBucket) -> Self {
        Self {
            backend,
            bucket,
            index: OnceLock::new(),
            build_lock: Mutex::new(()),
        }
    }

    /// Return the index, building it if no caller has done so yet.
    pub fn get(&self) -> Result<&ImageIndex, CoreError> {
        if let Some(index) = self.index.get() {
            return Ok(index);
        }

        let _guard = self
            .build_lock
            .lock()
            .map_err(|e| CoreError::LockFailed(format!("index build lock poisoned: {e}")))?;
        if let Some(index) = self.index.get() {
            return Ok(index);
        }

        tracing::debug!(
            "building image index for {}/{}",
            self.bucket.bucket(),
            self.bucket.prefix()
        );
        let built = ImageIndex::build(self.backend.as_ref(), &self.bucket)?;
        Ok(self.index.get_or_init(|| built))
    }

    pub fn is_built(&self) -> bool {
        self.index.get().is_some()
    }

    pub fn backend(&self) -> &dyn RemoteBackend {
        self.backend.as_ref()
    }

    pub fn bucket(&self) -> &ImageBucket {
        &self.bucket
    }

    pub fn capabilities(&self) -> Result<Vec<String>, CoreError> {
        Ok(self
            .get()?
            .capabilities()
            .into_iter()
            .map(str::to_owned)
            .collect())
    }

    pub fn images_matching(&self, filter: &CapabilityFilter) -> Result<Vec<String>, CoreError> {
        Ok(self
            .get()?
            .images_matching(filter)
            .into_iter()
            .map(str::to_owned)
            .collect())
    }
}
