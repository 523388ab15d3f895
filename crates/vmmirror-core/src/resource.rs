//! Classification of resource keys by suffix.
//!
//! This is the single place where the bucket layout's naming conventions
//! live. Nothing here inspects file contents.

use serde::Serialize;

/// Kernel directory marker; every slot already provides it.
pub const KERNEL_DIR: &str = "kernel/";
/// Block-device (root filesystem) directory marker; every slot already provides it.
pub const FSFILES_DIR: &str = "fsfiles/";

pub const KERNEL_SUFFIX: &str = "vmlinux.bin";
pub const ROOTFS_SUFFIX: &str = "rootfs.ext4";
pub const SSH_KEY_SUFFIX: &str = ".id_rsa";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    /// A directory marker (key ends with `/`).
    Directory,
    Kernel,
    Rootfs,
    SshKey,
    /// Any other file resource.
    Generic,
}

impl ResourceKind {
    pub fn is_file(self) -> bool {
        !matches!(self, Self::Directory)
    }
}

pub fn classify(resource_key: &str) -> ResourceKind {
    if resource_key.ends_with('/') {
        ResourceKind::Directory
    } else if resource_key.ends_with(KERNEL_SUFFIX) {
        ResourceKind::Kernel
    } else if resource_key.ends_with(ROOTFS_SUFFIX) {
        ResourceKind::Rootfs
    } else if resource_key.ends_with(SSH_KEY_SUFFIX) {
        ResourceKind::SshKey
    } else {
        ResourceKind::Generic
    }
}

/// Whether `resource_key` names one of the directories a slot is created with.
pub fn is_slot_provided_dir(resource_key: &str) -> bool {
    resource_key == KERNEL_DIR || resource_key == FSFILES_DIR
}
