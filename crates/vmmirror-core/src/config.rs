use std::path::PathBuf;

/// Environment variable naming an operator-managed local images directory.
pub const ENV_LOCAL_IMAGES_PATH: &str = "OPT_LOCAL_IMAGES_PATH";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetcherConfig {
    /// Persistent cache root. When unset, resources are cached under each
    /// slot's session root.
    pub local_images_path: Option<PathBuf>,
}

impl FetcherConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var_os(name))
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<std::ffi::OsString>) -> Self {
        Self {
            local_images_path: lookup(ENV_LOCAL_IMAGES_PATH)
                .filter(|v| !v.is_empty())
                .map(PathBuf::from),
        }
    }

    #[must_use]
    pub fn with_local_images_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.local_images_path = Some(path.into());
        self
    }
}
