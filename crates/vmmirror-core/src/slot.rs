use crate::cache::checked_relative;
use crate::resource::{FSFILES_DIR, KERNEL_DIR};
use crate::CoreError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

/// SSH settings a test harness uses to reach the booted microVM.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SshConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssh_key_path: Option<PathBuf>,
}

/// A caller-owned directory that one image is materialized into.
///
/// The slot manager creates `path` with `kernel/` and `fsfiles/` beneath
/// it. Fetching writes into the slot and records where the kernel, root
/// filesystem and SSH key landed; it never removes anything.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slot {
    pub path: PathBuf,
    /// Root directory of the test session the slot belongs to. Serves as
    /// the cache root when no local images directory is configured.
    pub session_root: PathBuf,
    #[serde(default)]
    pub kernel_file: Option<PathBuf>,
    #[serde(default)]
    pub rootfs_file: Option<PathBuf>,
    #[serde(default)]
    pub ssh_config: SshConfig,
}

impl Slot {
    pub fn new(path: impl Into<PathBuf>, session_root: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            session_root: session_root.into(),
            kernel_file: None,
            rootfs_file: None,
            ssh_config: SshConfig::default(),
        }
    }

    /// Create the slot directory and its kernel and fsfiles subdirectories.
    /// Existing directories are reused.
    pub fn prepare(
        path: impl Into<PathBuf>,
        session_root: impl Into<PathBuf>,
    ) -> Result<Self, CoreError> {
        let slot = Self::new(path, session_root);
        fs::create_dir_all(slot.kernel_dir())?;
        fs::create_dir_all(slot.fsfiles_dir())?;
        Ok(slot)
    }

    #[inline]
    pub fn kernel_dir(&self) -> PathBuf {
        self.path.join(KERNEL_DIR)
    }

    #[inline]
    pub fn fsfiles_dir(&self) -> PathBuf {
        self.path.join(FSFILES_DIR)
    }

    /// Destination of `resource_key` inside the slot.
    pub fn dest_path(&self, resource_key: &str) -> Result<PathBuf, CoreError> {
        Ok(self.path.join(checked_relative(resource_key)?))
    }

    pub fn exists(&self) -> bool {
        self.path.is_dir()
    }
}
