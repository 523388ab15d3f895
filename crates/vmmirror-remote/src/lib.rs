//! Read-only access to the object store holding microVM boot images.
//!
//! This crate provides the `RemoteBackend` trait (paginated listing, object
//! tagging, streaming download), a paginating `list_all_keys` helper, an
//! HTTP backend speaking the vmmirror bucket protocol, remote endpoint
//! configuration, and an in-memory mock backend for tests.

pub mod config;
pub mod http;
pub mod listing;
pub mod mock;

pub use config::{RemoteConfig, DEFAULT_IMAGES_PREFIX};
pub use listing::list_all_keys;

/// Protocol version sent as `X-Vmmirror-Protocol` header on all HTTP requests.
pub const PROTOCOL_VERSION: u32 = 1;

use serde::{Deserialize, Serialize};
use std::io::Write;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("remote I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("HTTP error: {0}")]
    Http(String),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("remote config error: {0}")]
    Config(String),
}

/// One entry of a bucket listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectSummary {
    pub key: String,
    #[serde(default)]
    pub size: u64,
}

/// A single page of a bucket listing.
///
/// `next_continuation_token` is `Some` while more pages remain.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListPage {
    #[serde(default)]
    pub contents: Vec<ObjectSummary>,
    #[serde(default)]
    pub next_continuation_token: Option<String>,
}

/// A key/value tag attached to a remote object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub key: String,
    #[serde(default)]
    pub value: String,
}

impl Tag {
    pub fn new(key: &str, value: &str) -> Self {
        Self {
            key: key.to_owned(),
            value: value.to_owned(),
        }
    }
}

/// Tag set of a remote object, as returned by the tagging endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tagging {
    #[serde(default)]
    pub tag_set: Vec<Tag>,
}

/// Trait for read-only object store backends.
///
/// Retries, authentication and connection reuse are the backend's concern;
/// callers treat every error as final.
pub trait RemoteBackend: Send + Sync {
    /// List one page of objects under `prefix`, resuming at `continuation`.
    fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
        continuation: Option<&str>,
    ) -> Result<ListPage, RemoteError>;

    /// Fetch the tag set of a single object.
    fn get_object_tagging(&self, bucket: &str, key: &str) -> Result<Vec<Tag>, RemoteError>;

    /// Stream an object's bytes into `out`. Returns the number of bytes written.
    fn download_object(
        &self,
        bucket: &str,
        key: &str,
        out: &mut dyn Write,
    ) -> Result<u64, RemoteError>;
}
