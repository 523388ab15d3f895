//! Image index and caching slot fetcher for microVM boot images.
//!
//! This crate maps a remote image bucket into an `ImageIndex` (image name to
//! resource keys, capability to image names), answers capability filter
//! queries, keeps a process-shared lazily built index in `SharedIndex`, and
//! materializes images into caller-owned `Slot` directories through
//! `ImageFetcher`, downloading each remote object at most once into a
//! `LocalCache`.

pub mod bucket;
pub mod cache;
pub mod capability;
pub mod config;
pub mod fetch;
pub mod index;
pub mod resource;
pub mod shared;
pub mod slot;

pub use bucket::ImageBucket;
pub use cache::{CacheLock, CacheOutcome, LocalCache};
pub use capability::{CapabilityFilter, CAPABILITY_TAG_PREFIX, WILDCARD};
pub use config::{FetcherConfig, ENV_LOCAL_IMAGES_PATH};
pub use fetch::{FetchReport, FetchedResource, ImageFetcher};
pub use index::ImageIndex;
pub use resource::{classify, is_slot_provided_dir, ResourceKind};
pub use shared::SharedIndex;
pub use slot::{Slot, SshConfig};

use thiserror::Error;
use vmmirror_remote::RemoteError;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("image index unavailable: {0}")]
    IndexUnavailable(#[source] RemoteError),
    #[error("image not found: {0}")]
    ImageNotFound(String),
    #[error("download of '{key}' failed: {source}")]
    ResourceDownloadFailed {
        key: String,
        #[source]
        source: RemoteError,
    },
    #[error("local I/O error: {0}")]
    LocalIo(#[from] std::io::Error),
    #[error("cache lock failed: {0}")]
    LockFailed(String),
}
