//! Materializing indexed images into slots.

use crate::cache::{CacheOutcome, LocalCache};
use crate::config::FetcherConfig;
use crate::resource::{classify, is_slot_provided_dir, ResourceKind};
use crate::shared::SharedIndex;
use crate::slot::Slot;
use crate::CoreError;
use serde::Serialize;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// Mode of SSH private keys copied into a slot: owner read-only.
pub const SSH_KEY_MODE: u32 = 0o400;

/// One resource materialized into a slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FetchedResource {
    pub key: String,
    pub kind: ResourceKind,
    /// Served from the local cache rather than downloaded by this fetch.
    pub cached: bool,
}

/// Result of fetching one image into a slot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FetchReport {
    pub image: String,
    pub resources: Vec<FetchedResource>,
    pub resources_downloaded: usize,
    pub resources_cached: usize,
    pub files_copied: usize,
    pub dirs_created: usize,
    pub bytes_downloaded: u64,
}

/// Copies images from the shared index into slots through a local cache.
///
/// Any number of fetchers may share one `SharedIndex`, and any number of
/// threads may call [`fetch`](Self::fetch) on one fetcher.
pub struct ImageFetcher {
    index: Arc<SharedIndex>,
    config: FetcherConfig,
}

impl ImageFetcher {
    pub fn new(index: Arc<SharedIndex>, config: FetcherConfig) -> Self {
        Self { index, config }
    }

    pub fn index(&self) -> &SharedIndex {
        &self.index
    }

    pub fn config(&self) -> &FetcherConfig {
        &self.config
    }

    /// The cache serving `slot`: the configured local images directory, or
    /// else the slot's session root.
    pub fn cache_for(&self, slot: &Slot) -> LocalCache {
        let root = self
            .config
            .local_images_path
            .clone()
            .unwrap_or_else(|| slot.session_root.clone());
        LocalCache::new(root)
    }

    /// Copy every resource of `image` into `slot`, downloading what the
    /// cache does not hold yet.
    ///
    /// On error the slot is left as far as it got; discarding it is up to
    /// the caller.
    pub fn fetch(&self, image: &str, slot: &mut Slot) -> Result<FetchReport, CoreError> {
        let index = self.index.get()?;
        let resources = index
            .resources(image)
            .ok_or_else(|| CoreError::ImageNotFound(image.to_owned()))?;

        if !slot.exists() {
            return Err(CoreError::LocalIo(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("slot directory {} does not exist", slot.path.display()),
            )));
        }

        let bucket = self.index.bucket();
        let backend = self.index.backend();
        let cache = self.cache_for(slot);
        let mut report = FetchReport {
            image: image.to_owned(),
            ..FetchReport::default()
        };

        debug!(
            "fetching '{image}' ({} resources) into {} via cache {}",
            resources.len(),
            slot.path.display(),
            cache.root().display()
        );

        for resource_key in resources {
            if is_slot_provided_dir(resource_key) {
                continue;
            }

            let kind = classify(resource_key);
            let dest = slot.dest_path(resource_key)?;

            if !kind.is_file() {
                fs::create_dir_all(&dest)?;
                report.dirs_created += 1;
                report.resources.push(FetchedResource {
                    key: resource_key.clone(),
                    kind,
                    cached: false,
                });
                continue;
            }

            let rel_path = bucket.resource_key(image, resource_key);
            let outcome = cache.ensure(&rel_path, |out| {
                backend
                    .download_object(bucket.bucket(), &rel_path, out)
                    .map_err(|source| CoreError::ResourceDownloadFailed {
                        key: rel_path.clone(),
                        source,
                    })
            })?;
            match outcome {
                CacheOutcome::Hit => report.resources_cached += 1,
                CacheOutcome::Downloaded { bytes } => {
                    report.resources_downloaded += 1;
                    report.bytes_downloaded += bytes;
                }
            }
            report.resources.push(FetchedResource {
                key: resource_key.clone(),
                kind,
                cached: outcome == CacheOutcome::Hit,
            });

            copy_into_slot(&cache.entry_path(&rel_path)?, &dest)?;
            report.files_copied += 1;

            match kind {
                ResourceKind::Kernel => slot.kernel_file = Some(dest),
                ResourceKind::Rootfs => slot.rootfs_file = Some(dest),
                ResourceKind::SshKey => {
                    fs::set_permissions(&dest, fs::Permissions::from_mode(SSH_KEY_MODE))?;
                    slot.ssh_config.ssh_key_path = Some(dest);
                }
                ResourceKind::Generic | ResourceKind::Directory => {}
            }
        }

        info!(
            "fetched '{image}' into {}: {} downloaded, {} from cache",
            slot.path.display(),
            report.resources_downloaded,
            report.resources_cached
        );
        Ok(report)
    }
}

/// Copy a cached file to `dest`, replacing whatever is there. A previous
/// copy may be read-only (SSH keys), so it is removed rather than overwritten.
fn copy_into_slot(cached: &Path, dest: &Path) -> Result<(), CoreError> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }
    if dest.is_file() {
        fs::remove_file(dest)?;
    }
    fs::copy(cached, dest)?;
    Ok(())
}
