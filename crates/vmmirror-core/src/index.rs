//! Capability-aware inventory of the image bucket.

use crate::bucket::ImageBucket;
use crate::capability::{capabilities_from_tags, CapabilityFilter, WILDCARD};
use crate::CoreError;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, warn};
use vmmirror_remote::{list_all_keys, RemoteBackend};

/// Inventory of the image bucket, derived from one listing pass plus one
/// tagging call per image root folder.
///
/// The index is immutable once built. Refreshing it means building a new one.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ImageIndex {
    /// Image name to resource keys, in listing order.
    resources_by_image: BTreeMap<String, Vec<String>>,
    /// Capability name to the images whose root folder carries it.
    images_by_capability: BTreeMap<String, BTreeSet<String>>,
}

impl ImageIndex {
    /// Map every object under the bucket prefix.
    ///
    /// Any listing or tagging failure aborts the build and nothing is
    /// returned. Resources of an image whose root marker never shows up in
    /// the listing are dropped, so every indexed image has a root folder.
    pub fn build(backend: &dyn RemoteBackend, bucket: &ImageBucket) -> Result<Self, CoreError> {
        let keys = list_all_keys(backend, bucket.bucket(), bucket.prefix())
            .map_err(CoreError::IndexUnavailable)?;

        let mut resources_by_image: BTreeMap<String, Vec<String>> = BTreeMap::new();
        let mut images_by_capability: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        let mut roots: BTreeSet<String> = BTreeSet::new();

        for key in &keys {
            let Some((image, resource)) = bucket.split_key(key) else {
                debug!("skipping key outside image folders: {key}");
                continue;
            };

            if resource.is_empty() {
                if !roots.insert(image.to_owned()) {
                    continue;
                }
                resources_by_image.entry(image.to_owned()).or_default();
                let tags = backend
                    .get_object_tagging(bucket.bucket(), key)
                    .map_err(CoreError::IndexUnavailable)?;
                for cap in capabilities_from_tags(&tags) {
                    images_by_capability
                        .entry(cap)
                        .or_default()
                        .insert(image.to_owned());
                }
            } else {
                resources_by_image
                    .entry(image.to_owned())
                    .or_default()
                    .push(resource.to_owned());
            }
        }

        resources_by_image.retain(|image, resources| {
            let rooted = roots.contains(image);
            if !rooted {
                warn!(
                    "dropping {} resource(s) of '{image}': no root folder marker",
                    resources.len()
                );
            }
            rooted
        });

        info!(
            "indexed {} image(s), {} capability(ies) from {} key(s) in {}/{}",
            resources_by_image.len(),
            images_by_capability.len(),
            keys.len(),
            bucket.bucket(),
            bucket.prefix()
        );

        Ok(Self {
            resources_by_image,
            images_by_capability,
        })
    }

    /// All capability names advertised by at least one image.
    pub fn capabilities(&self) -> Vec<&str> {
        self.images_by_capability.keys().map(String::as_str).collect()
    }

    /// Images holding every capability in `filter`.
    ///
    /// Unknown capabilities match nothing; they are not an error.
    pub fn images_matching(&self, filter: &CapabilityFilter) -> BTreeSet<&str> {
        let all: BTreeSet<&str> = self.resources_by_image.keys().map(String::as_str).collect();

        let mut matched: Option<BTreeSet<&str>> = None;
        for entry in filter.entries() {
            let holders: BTreeSet<&str> = if entry == WILDCARD {
                all.clone()
            } else {
                self.images_by_capability
                    .get(entry)
                    .map(|set| set.iter().map(String::as_str).collect())
                    .unwrap_or_default()
            };
            matched = Some(match matched {
                None => holders,
                Some(acc) => acc.intersection(&holders).copied().collect(),
            });
        }
        matched.unwrap_or(all)
    }

    pub fn images(&self) -> Vec<&str> {
        self.resources_by_image.keys().map(String::as_str).collect()
    }

    pub fn contains(&self, image: &str) -> bool {
        self.resources_by_image.contains_key(image)
    }

    /// Resource keys of `image`, in listing order.
    pub fn resources(&self, image: &str) -> Option<&[String]> {
        self.resources_by_image.get(image).map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.resources_by_image.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources_by_image.is_empty()
    }
}
