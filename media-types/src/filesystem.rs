// SPDX-License-Identifier: GPL-3.0-only

//! Filesystems the installer knows how to create

use std::fmt;

use crate::error::{ModelError, Result};

/// Filesystems supported for new partitions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Filesystem {
    Btrfs,
    Ext2,
    Ext3,
    Ext4,
    F2fs,
    Swap,
    Vfat,
    Xfs,
}

/// How the partition name passed to `parted mkpart` is chosen.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MkpartStyle {
    /// Partition named after its mount point.
    Common,
    /// `linux-swap`, or `eswap-<name>` when the swap is encrypted.
    Swap,
    /// `EFI fat32`.
    Vfat,
}

impl Filesystem {
    pub const ALL: [Filesystem; 8] = [
        Filesystem::Btrfs,
        Filesystem::Ext2,
        Filesystem::Ext3,
        Filesystem::Ext4,
        Filesystem::F2fs,
        Filesystem::Swap,
        Filesystem::Vfat,
        Filesystem::Xfs,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Btrfs => "btrfs",
            Self::Ext2 => "ext2",
            Self::Ext3 => "ext3",
            Self::Ext4 => "ext4",
            Self::F2fs => "f2fs",
            Self::Swap => "swap",
            Self::Vfat => "vfat",
            Self::Xfs => "xfs",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|fs| fs.as_str() == s)
            .ok_or_else(|| ModelError::UnsupportedFilesystem(s.to_string()))
    }

    /// Formatter binary.
    pub fn mkfs_command(&self) -> String {
        match self {
            Self::Swap => "mkswap".to_string(),
            other => format!("mkfs.{}", other.as_str()),
        }
    }

    /// Arguments always passed to the formatter.
    pub fn mkfs_args(&self) -> &'static [&'static str] {
        match self {
            Self::Ext2 | Self::Ext3 => &["-v", "-F"],
            Self::Ext4 => &["-v", "-F", "-b", "4096"],
            Self::Btrfs | Self::Xfs | Self::F2fs => &["-f"],
            Self::Vfat => &["-F32"],
            Self::Swap => &[],
        }
    }

    /// Formatter flag that sets the filesystem label.
    pub fn label_flag(&self) -> &'static str {
        match self {
            Self::Vfat => "-n",
            Self::F2fs => "-l",
            _ => "-L",
        }
    }

    pub fn max_label_length(&self) -> usize {
        match self {
            Self::Ext2 | Self::Ext3 | Self::Ext4 => 16,
            Self::Swap => 15,
            Self::Xfs => 12,
            Self::F2fs => 512,
            Self::Btrfs => 255,
            Self::Vfat => 11,
        }
    }

    pub fn mkpart_style(&self) -> MkpartStyle {
        match self {
            Self::Swap => MkpartStyle::Swap,
            Self::Vfat => MkpartStyle::Vfat,
            _ => MkpartStyle::Common,
        }
    }

    pub fn is_ext(&self) -> bool {
        matches!(self, Self::Ext2 | Self::Ext3 | Self::Ext4)
    }

    /// Filesystems a root partition may use.
    pub fn can_host_root(&self) -> bool {
        self.is_ext() || matches!(self, Self::Xfs | Self::F2fs)
    }
}

impl fmt::Display for Filesystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Label length cap for any fstype string, 11 for unknown ones.
pub fn max_label_length(fs_type: &str) -> usize {
    match Filesystem::parse(fs_type) {
        Ok(fs) => fs.max_label_length(),
        Err(_) => {
            tracing::warn!("unknown file system type {fs_type}, defaulting to 11 character label");
            11
        }
    }
}

/// Sorted names of the supported filesystems.
pub fn supported_filesystems() -> Vec<&'static str> {
    let mut names: Vec<&'static str> = Filesystem::ALL.iter().map(|fs| fs.as_str()).collect();
    names.sort_unstable();
    names
}

/// Length of the longest supported filesystem name, for column layout.
pub fn largest_filesystem_name() -> usize {
    Filesystem::ALL
        .iter()
        .map(|fs| fs.as_str().len())
        .max()
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn supported_list_is_sorted() {
        assert_eq!(
            supported_filesystems(),
            vec!["btrfs", "ext2", "ext3", "ext4", "f2fs", "swap", "vfat", "xfs"]
        );
        assert_eq!(largest_filesystem_name(), 5);
    }

    #[test]
    fn formatter_conventions() {
        assert_eq!(Filesystem::Swap.mkfs_command(), "mkswap");
        assert_eq!(Filesystem::Ext4.mkfs_command(), "mkfs.ext4");
        assert_eq!(Filesystem::Ext4.mkfs_args(), &["-v", "-F", "-b", "4096"]);
        assert_eq!(Filesystem::Vfat.label_flag(), "-n");
        assert_eq!(Filesystem::F2fs.label_flag(), "-l");
        assert_eq!(Filesystem::Xfs.label_flag(), "-L");
        assert_eq!(max_label_length("ext3"), 16);
        assert_eq!(max_label_length("ntfs"), 11);
        assert!(Filesystem::parse("ntfs").is_err());
        assert!(Filesystem::F2fs.can_host_root());
        assert!(!Filesystem::Btrfs.can_host_root());
    }
}
