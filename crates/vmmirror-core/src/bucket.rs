use vmmirror_remote::RemoteConfig;

/// Location of the image folders in the remote store: a bucket plus the
/// folder prefix that every image folder lives under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageBucket {
    bucket: String,
    prefix: String,
}

impl ImageBucket {
    /// The prefix is normalized to end with a single `/`; an empty prefix
    /// places image folders at the bucket root.
    pub fn new(bucket: &str, prefix: &str) -> Self {
        let trimmed = prefix.trim_end_matches('/');
        let prefix = if trimmed.is_empty() {
            String::new()
        } else {
            format!("{trimmed}/")
        };
        Self {
            bucket: bucket.to_owned(),
            prefix,
        }
    }

    pub fn from_config(config: &RemoteConfig) -> Self {
        Self::new(&config.bucket, &config.prefix)
    }

    #[inline]
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    #[inline]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Key of an image's root folder marker, e.g. `microvm-images/ubuntu1/`.
    pub fn image_key(&self, image: &str) -> String {
        format!("{}{image}/", self.prefix)
    }

    /// Bucket key of one resource of an image. This is also the resource's
    /// path relative to a local cache root.
    pub fn resource_key(&self, image: &str, resource: &str) -> String {
        format!("{}{image}/{resource}", self.prefix)
    }

    /// Split a listed key of the form `<prefix><image>/<resource...>` into
    /// `(image, resource)`. `resource` is empty for the image root marker.
    /// Keys outside that shape yield `None`.
    pub fn split_key<'a>(&self, key: &'a str) -> Option<(&'a str, &'a str)> {
        let rest = key.strip_prefix(self.prefix.as_str())?;
        let (image, resource) = rest.split_once('/')?;
        if image.is_empty() {
            return None;
        }
        Some((image, resource))
    }
}
