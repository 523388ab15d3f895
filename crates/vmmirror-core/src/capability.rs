use std::collections::BTreeSet;
use vmmirror_remote::Tag;

/// Tag keys starting with this prefix advertise a capability; the rest of
/// the key is the capability name. Tag values are ignored.
pub const CAPABILITY_TAG_PREFIX: &str = "capability:";

/// Filter entry matching every indexed image.
pub const WILDCARD: &str = "*";

/// Extract capability names from an object's tag set.
pub fn capabilities_from_tags(tags: &[Tag]) -> BTreeSet<String> {
    tags.iter()
        .filter_map(|t| t.key.strip_prefix(CAPABILITY_TAG_PREFIX))
        .map(str::to_owned)
        .collect()
}

/// A conjunction of required capabilities.
///
/// An image matches when it holds every listed capability. The `*` entry
/// stands for "any image" and an empty filter behaves as `["*"]`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapabilityFilter {
    entries: Vec<String>,
}

impl CapabilityFilter {
    pub fn new<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            entries: entries.into_iter().map(Into::into).collect(),
        }
    }

    /// The filter matching every image.
    pub fn all() -> Self {
        Self::default()
    }

    /// Entries to intersect over; `["*"]` when the filter is empty.
    pub fn entries(&self) -> Vec<&str> {
        if self.entries.is_empty() {
            vec![WILDCARD]
        } else {
            self.entries.iter().map(String::as_str).collect()
        }
    }

    pub fn is_all(&self) -> bool {
        self.entries().iter().all(|e| *e == WILDCARD)
    }
}
