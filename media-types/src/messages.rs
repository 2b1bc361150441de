// SPDX-License-Identifier: GPL-3.0-only

//! User-facing report lines shared by discovery, planning, validation and
//! the writer. Every text comes from the fluent bundle.

use crate::fl;

pub fn media_partitioned() -> String {
    fl!("media-partitioned")
}

pub fn media_used() -> String {
    fl!("media-used")
}

pub fn media_erased() -> String {
    fl!("media-erased")
}

pub fn media_data_loss() -> String {
    fl!("media-data-loss")
}

pub fn portion_entire_disk() -> String {
    fl!("portion-entire-disk")
}

pub fn portion_partial() -> String {
    fl!("portion-partial")
}

pub fn portion_advanced() -> String {
    fl!("portion-advanced")
}

pub fn new_partition_table() -> String {
    fl!("new-partition-table")
}

/// `size` is already human readable.
pub fn add_partition(size: &str) -> String {
    fl!("add-partition", size = size)
}

pub fn format_partition(fs_type: &str) -> String {
    fl!("format-partition", fstype = fs_type)
}

pub fn use_partition() -> String {
    fl!("use-partition")
}

pub fn remove_partition() -> String {
    fl!("remove-partition")
}

pub fn partition_info_failed() -> String {
    fl!("partition-info-failed")
}

pub fn swap_file(path: &str, size: &str) -> String {
    fl!("swap-file", path = path, size = size)
}

pub fn legacy_mode() -> String {
    fl!("legacy-mode")
}

pub fn legacy_no_boot() -> String {
    fl!("legacy-no-boot")
}

pub fn multiple_mount_partitions(mount_point: &str) -> String {
    fl!("multiple-mount-partitions", mount = mount_point)
}

pub fn no_boot_partition() -> String {
    fl!("no-boot-partition")
}

pub fn no_boot_or_root_partition() -> String {
    fl!("no-boot-or-root-partition")
}

pub fn remove_logical_volume(volume: &str) -> String {
    fl!("remove-logical-volume", volume = volume)
}

pub fn remove_volume_group(group: &str) -> String {
    fl!("remove-volume-group", group = group)
}

pub fn reduce_volume_group(volume: &str, group: &str) -> String {
    fl!("reduce-volume-group", volume = volume, group = group)
}

pub fn remove_physical_volume(volume: &str) -> String {
    fl!("remove-physical-volume", volume = volume)
}

pub fn degrade_raid(raid: &str) -> String {
    fl!("degrade-raid", raid = raid)
}

pub fn remove_raid_member(raid: &str) -> String {
    fl!("remove-raid-member", raid = raid)
}

pub fn no_media_selected() -> String {
    fl!("no-media-selected")
}

pub fn must_be(subject: &str, requirement: &str) -> String {
    fl!("must-be", subject = subject, requirement = requirement)
}

pub fn missing_partition(label: &str) -> String {
    fl!("missing-partition", label = label)
}

pub fn multiple_partitions(label: &str) -> String {
    fl!("multiple-partitions", label = label)
}

pub fn encryption_unsupported(label: &str) -> String {
    fl!("encryption-unsupported", label = label)
}

pub fn unreadable_size(size: &str) -> String {
    fl!("unreadable-size", size = size)
}

pub fn invalid_partition_label(label: &str) -> String {
    fl!("invalid-partition-label", label = label)
}

pub fn passphrase_prompt() -> String {
    fl!("passphrase-prompt")
}

pub fn passphrase_confirm() -> String {
    fl!("passphrase-confirm")
}

pub fn passphrase_mismatch() -> String {
    fl!("passphrase-mismatch")
}

pub fn passphrase_required() -> String {
    fl!("passphrase-required")
}

pub fn passphrase_ascii_only() -> String {
    fl!("passphrase-ascii-only")
}

pub fn passphrase_too_short(min: usize) -> String {
    fl!("passphrase-too-short", min = min.to_string())
}

pub fn passphrase_too_long(max: usize) -> String {
    fl!("passphrase-too-long", max = max.to_string())
}

/// `<device>: <message>` as printed in plans.
pub fn device_line(name: &str, message: &str) -> String {
    format!("{name}: {message}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arguments_are_substituted() {
        assert_eq!(add_partition("1GiB"), "Add new partition. [1GiB]");
        assert_eq!(
            reduce_volume_group("sdc1", "vg0"),
            "Remove physical volume: sdc1 from volume group: vg0"
        );
        assert_eq!(
            passphrase_too_short(8),
            "Passphrase must be at least 8 characters long"
        );
        assert_eq!(
            device_line("sda1", &remove_partition()),
            "sda1: WARNING: partition will be removed."
        );
    }

    #[test]
    fn report_lines_read_as_sentences() {
        assert_eq!(
            partition_info_failed(),
            "WARNING: Failed to detect partition information."
        );
        assert_eq!(no_boot_partition(), "No /boot partition found");
        assert_eq!(multiple_mount_partitions("/"), "Found multiple / partitions");
    }
}
