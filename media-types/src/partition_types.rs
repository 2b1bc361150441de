// SPDX-License-Identifier: GPL-3.0-only

//! GPT partition type catalog
//!
//! systemd-gpt-auto-generator discovers `/`, `/home`, `/srv`, swap and the
//! EFI system partition by type GUID, so those mounts never need an fstab
//! entry.

use crate::device::BlockDevice;

/// A GPT partition type the installer assigns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GptType {
    /// Short key (mount point, `swap` or `efi`)
    pub key: &'static str,
    /// Human-readable name
    pub name: &'static str,
    /// Type GUID as accepted by `sgdisk --typecode`
    pub guid: &'static str,
}

pub const GPT_ROOT_X86_64: GptType = GptType {
    key: "/",
    name: "Linux root (x86-64)",
    guid: "4F68BCE3-E8CD-4DB1-96E7-FBCAF984B709",
};

pub const GPT_HOME: GptType = GptType {
    key: "/home",
    name: "Linux home",
    guid: "933AC7E1-2EB4-4F13-B844-0E14E2AEF915",
};

pub const GPT_SRV: GptType = GptType {
    key: "/srv",
    name: "Linux server data",
    guid: "3B8F8425-20E0-4F3B-907F-1A25A76F98E8",
};

pub const GPT_SWAP: GptType = GptType {
    key: "swap",
    name: "Linux swap",
    guid: "0657FD6D-A4AB-43C4-84E5-0933C84B4F4F",
};

pub const GPT_EFI: GptType = GptType {
    key: "efi",
    name: "EFI System",
    guid: "C12A7328-F81F-11D2-BA4B-00A0C93EC93B",
};

pub const GPT_TYPES: [GptType; 5] = [GPT_ROOT_X86_64, GPT_HOME, GPT_SRV, GPT_SWAP, GPT_EFI];

/// Type GUID for a planned partition, or `None` when it gets the default
/// Linux filesystem type.
pub fn gpt_type_for(bd: &BlockDevice) -> Option<GptType> {
    if bd.fs_type == "vfat" && bd.mount_point == "/boot" {
        return Some(GPT_EFI);
    }
    if bd.fs_type == "swap" {
        return Some(GPT_SWAP);
    }

    let found = GPT_TYPES
        .into_iter()
        .find(|t| t.key.starts_with('/') && t.key == bd.mount_point);
    if found.is_none() {
        tracing::warn!(
            "{}: no GPT type for mount {:?} ({}), keeping the default",
            bd.name,
            bd.mount_point,
            bd.fs_type
        );
    }
    found
}

/// Mounts that are found through their GPT type (plus `/boot`).
pub fn is_standard_mount(bd: &BlockDevice) -> bool {
    bd.fs_type == "swap"
        || bd.mount_point == "/boot"
        || GPT_TYPES
            .iter()
            .any(|t| t.key.starts_with('/') && t.key == bd.mount_point)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bd(fs_type: &str, mount_point: &str) -> BlockDevice {
        BlockDevice {
            name: "sda1".to_string(),
            fs_type: fs_type.to_string(),
            mount_point: mount_point.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn maps_mounts_to_guids() {
        assert_eq!(gpt_type_for(&bd("vfat", "/boot")), Some(GPT_EFI));
        assert_eq!(gpt_type_for(&bd("ext4", "/")), Some(GPT_ROOT_X86_64));
        assert_eq!(gpt_type_for(&bd("xfs", "/home")), Some(GPT_HOME));
        assert_eq!(gpt_type_for(&bd("swap", "")), Some(GPT_SWAP));
        assert_eq!(gpt_type_for(&bd("ext4", "/boot")), None);
        assert_eq!(gpt_type_for(&bd("ext4", "/var")), None);
    }

    #[test]
    fn standard_mounts() {
        assert!(is_standard_mount(&bd("ext4", "/boot")));
        assert!(is_standard_mount(&bd("ext4", "/srv")));
        assert!(is_standard_mount(&bd("swap", "")));
        assert!(!is_standard_mount(&bd("ext4", "/var")));
    }
}
